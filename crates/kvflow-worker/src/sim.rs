// Local simulation of a worker fleet
// Decision: Workers share one in-memory store and coordinate only through the backend
// Decision: The workflow script is fixed: fan out N activities, finish when all complete

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use kvflow_storage::MemoryKv;
use kvflow_workflows::config::{env_millis, env_parse, ConfigError};
use kvflow_workflows::prelude::*;
use kvflow_workflows::PollerError;
use rand::Rng;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Worker processes, each with its own worker id
    pub workers: usize,
    /// Instances created up front
    pub instances: usize,
    /// Activities each instance fans out to
    pub activities_per_instance: usize,
    /// Upper bound of simulated activity work
    pub activity_time: Duration,
    /// Give up after this long
    pub run_timeout: Duration,
    pub backend: BackendOptions,
    pub poller: PollerConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            instances: 20,
            activities_per_instance: 3,
            activity_time: Duration::from_millis(50),
            run_timeout: Duration::from_secs(60),
            backend: BackendOptions::new("kvflow", "worker"),
            poller: PollerConfig::default().with_max_interval(Duration::from_millis(500)),
        }
    }
}

impl SimConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let mut backend = BackendOptions::from_env()?;
        if backend.root.is_empty() {
            backend.root = defaults.backend.root.clone();
        }
        Ok(Self {
            workers: env_parse("KVFLOW_SIM_WORKERS")?.unwrap_or(defaults.workers),
            instances: env_parse("KVFLOW_SIM_INSTANCES")?.unwrap_or(defaults.instances),
            activities_per_instance: env_parse("KVFLOW_SIM_ACTIVITIES")?
                .unwrap_or(defaults.activities_per_instance),
            activity_time: env_millis("KVFLOW_SIM_ACTIVITY_TIME_MS")?
                .unwrap_or(defaults.activity_time),
            run_timeout: env_millis("KVFLOW_SIM_TIMEOUT_MS")?.unwrap_or(defaults.run_timeout),
            backend,
            poller: PollerConfig::from_env()?,
        })
    }
}

// =============================================================================
// Workflow script
// =============================================================================

/// Outcome of one workflow task
#[derive(Debug, Default, PartialEq)]
pub struct Decision {
    pub state: WorkflowInstanceState,
    /// New events followed by generated ones, sequenced
    pub executed: Vec<HistoryEvent>,
    pub activities: Vec<HistoryEvent>,
}

/// Apply the fan-out script to a task
///
/// `completed_before` is the number of activity results already in history.
pub fn decide(task: &WorkflowTask, fan_out: usize, completed_before: usize) -> Decision {
    let mut decision = Decision::default();
    let mut next_sequence = task.last_sequence_id;
    let mut completed = completed_before;

    for event in &task.new_events {
        next_sequence += 1;
        decision
            .executed
            .push(event.clone().with_sequence_id(next_sequence));

        match &event.attributes {
            EventAttributes::WorkflowExecutionStarted { .. } => {
                for idx in 0..fan_out {
                    next_sequence += 1;
                    let scheduled = HistoryEvent::new(EventAttributes::ActivityScheduled {
                        name: format!("step-{idx}"),
                        queue: Queue::unset(),
                        inputs: vec![json!({ "step": idx })],
                    })
                    .with_sequence_id(next_sequence)
                    .with_schedule_event_id(next_sequence);
                    decision.executed.push(scheduled.clone());
                    decision.activities.push(scheduled);
                }
            }
            EventAttributes::ActivityCompleted { .. } | EventAttributes::ActivityFailed { .. } => {
                completed += 1;
            }
            EventAttributes::WorkflowExecutionCanceled => {
                decision.state = WorkflowInstanceState::Finished;
            }
            _ => {}
        }
    }

    if completed >= fan_out && decision.activities.is_empty() {
        decision.state = WorkflowInstanceState::Finished;
    }
    if decision.state == WorkflowInstanceState::Finished {
        next_sequence += 1;
        decision.executed.push(
            HistoryEvent::new(EventAttributes::WorkflowExecutionFinished {
                result: Some(json!({ "activities": completed })),
                error: None,
            })
            .with_sequence_id(next_sequence),
        );
    }
    decision
}

// =============================================================================
// Workers
// =============================================================================

async fn run_workflow_worker(
    backend: Arc<Backend>,
    config: SimConfig,
    shutdown_rx: watch::Receiver<bool>,
) -> Result<u64> {
    let mut poller = TaskPoller::new(
        backend.clone(),
        vec![Queue::default()],
        config.poller.clone(),
        shutdown_rx,
    );
    let mut completed = 0u64;

    loop {
        let task = match poller.poll_workflow_task().await {
            Ok(Some(task)) => task,
            Ok(None) => {
                if poller.wait().await {
                    break;
                }
                continue;
            }
            Err(PollerError::Shutdown) => break,
            Err(err) => return Err(err.into()),
        };

        let history = backend
            .get_workflow_instance_history(&task.instance, None)
            .await
            .context("read history")?;
        let completed_before = history
            .iter()
            .filter(|e| {
                matches!(
                    e.attributes,
                    EventAttributes::ActivityCompleted { .. } | EventAttributes::ActivityFailed { .. }
                )
            })
            .count();
        let decision = decide(&task, config.activities_per_instance, completed_before);

        let result = backend
            .complete_workflow_task(
                &task,
                decision.state,
                &decision.executed,
                &decision.activities,
                &[],
                &[],
            )
            .await;
        match result {
            Ok(()) => completed += 1,
            Err(BackendError::LockLost(instance)) => {
                warn!(%instance, "lost workflow task to another worker");
            }
            Err(err) => return Err(err).context("complete workflow task"),
        }
    }

    Ok(completed)
}

async fn run_activity_worker(
    backend: Arc<Backend>,
    config: SimConfig,
    shutdown_rx: watch::Receiver<bool>,
) -> Result<u64> {
    let mut poller = TaskPoller::new(
        backend.clone(),
        vec![Queue::default()],
        config.poller.clone(),
        shutdown_rx,
    );
    let mut completed = 0u64;

    loop {
        let task = match poller.poll_activity_task().await {
            Ok(Some(task)) => task,
            Ok(None) => {
                if poller.wait().await {
                    break;
                }
                continue;
            }
            Err(PollerError::Shutdown) => break,
            Err(err) => return Err(err.into()),
        };

        let max_ms = config.activity_time.as_millis().max(1) as u64;
        let work = Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms));
        tokio::time::sleep(work / 2).await;
        if let Err(err) = backend.extend_activity_task(&task).await {
            warn!(error = %err, activity_id = %task.activity_id, "abandoning activity");
            continue;
        }
        tokio::time::sleep(work / 2).await;

        let result = HistoryEvent::new(EventAttributes::ActivityCompleted {
            result: Some(json!({ "took_ms": work.as_millis() as u64 })),
        })
        .with_schedule_event_id(task.event.sequence_id);

        match backend.complete_activity_task(&task, &result).await {
            Ok(()) => completed += 1,
            Err(BackendError::ActivityNotFound(id)) => {
                warn!(activity_id = %id, "activity already completed elsewhere");
            }
            Err(err) => return Err(err).context("complete activity task"),
        }
    }

    Ok(completed)
}

// =============================================================================
// Simulation
// =============================================================================

/// Counters reported when a run ends
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SimReport {
    pub workflow_tasks: u64,
    pub activity_tasks: u64,
    pub removed_instances: usize,
    pub stats: Stats,
}

pub struct Simulation {
    kv: Arc<MemoryKv>,
    config: SimConfig,
}

impl Simulation {
    pub fn new(config: SimConfig) -> Self {
        Self {
            kv: Arc::new(MemoryKv::new()),
            config,
        }
    }

    fn backend(&self, worker_id: String) -> Arc<Backend> {
        let options = self.config.backend.clone().with_worker_id(worker_id);
        Arc::new(Backend::new(self.kv.clone(), options))
    }

    /// Run until every instance finished, the timeout hits, or `stop` flips
    pub async fn run(self, mut stop: watch::Receiver<bool>) -> Result<SimReport> {
        let admin = self.backend("admin".to_string());
        for idx in 0..self.config.instances {
            let instance = WorkflowInstance::start(format!("sim-{idx}"));
            let start = HistoryEvent::new(EventAttributes::WorkflowExecutionStarted {
                name: "fan_out".into(),
                queue: Queue::default(),
                metadata: [("origin".to_string(), "sim".to_string())].into(),
                inputs: vec![],
            });
            admin
                .create_workflow_instance(&instance, &start)
                .await
                .context("seed instance")?;
        }
        info!(instances = self.config.instances, "seeded instances");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut workflow_workers = JoinSet::new();
        let mut activity_workers = JoinSet::new();
        for idx in 0..self.config.workers {
            let backend = self.backend(format!("{}-{idx}", self.config.backend.worker_id));
            workflow_workers.spawn(run_workflow_worker(
                backend.clone(),
                self.config.clone(),
                shutdown_rx.clone(),
            ));
            activity_workers.spawn(run_activity_worker(
                backend,
                self.config.clone(),
                shutdown_rx.clone(),
            ));
        }

        let deadline = tokio::time::sleep(self.config.run_timeout);
        tokio::pin!(deadline);
        let mut ticker = tokio::time::interval(Duration::from_millis(100));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let stats = admin.get_stats().await.context("read stats")?;
                    debug!(
                        active = stats.active_workflow_instances,
                        pending_workflows = stats.pending_workflow_tasks_total(),
                        pending_activities = stats.pending_activity_tasks_total(),
                        "progress"
                    );
                    if stats.active_workflow_instances == 0 {
                        break;
                    }
                }
                _ = &mut deadline => {
                    warn!("simulation timed out");
                    break;
                }
                _ = stop.changed() => {
                    info!("stop requested");
                    break;
                }
            }
        }

        let _ = shutdown_tx.send(true);
        let mut report = SimReport::default();
        while let Some(joined) = workflow_workers.join_next().await {
            report.workflow_tasks += joined.context("join workflow worker")??;
        }
        while let Some(joined) = activity_workers.join_next().await {
            report.activity_tasks += joined.context("join activity worker")??;
        }

        report.stats = admin.get_stats().await.context("read stats")?;
        report.removed_instances = admin
            .remove_workflow_instances(RemovalOptions::default())
            .await
            .context("remove finished instances")?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(new_events: Vec<HistoryEvent>, last_sequence_id: i64) -> WorkflowTask {
        let instance = WorkflowInstance::new("wf", "1");
        WorkflowTask {
            id: instance.instance_id.clone(),
            instance,
            state: WorkflowInstanceState::Active,
            queue: Queue::default(),
            metadata: Default::default(),
            last_sequence_id,
            new_events,
        }
    }

    fn started() -> HistoryEvent {
        HistoryEvent::new(EventAttributes::WorkflowExecutionStarted {
            name: "fan_out".into(),
            queue: Queue::default(),
            metadata: Default::default(),
            inputs: vec![],
        })
    }

    fn activity_done() -> HistoryEvent {
        HistoryEvent::new(EventAttributes::ActivityCompleted { result: None })
    }

    #[test]
    fn test_start_fans_out() {
        let decision = decide(&task(vec![started()], 0), 2, 0);

        assert_eq!(decision.state, WorkflowInstanceState::Active);
        assert_eq!(decision.activities.len(), 2);
        let sequence: Vec<_> = decision.executed.iter().map(|e| e.sequence_id).collect();
        assert_eq!(sequence, vec![1, 2, 3]);
    }

    #[test]
    fn test_finishes_after_last_result() {
        let partial = decide(&task(vec![activity_done()], 3), 2, 0);
        assert_eq!(partial.state, WorkflowInstanceState::Active);

        let done = decide(&task(vec![activity_done()], 4), 2, 1);
        assert_eq!(done.state, WorkflowInstanceState::Finished);
        assert_eq!(done.executed.len(), 2);
        assert_eq!(done.executed[1].kind(), "workflow_execution_finished");
        assert_eq!(done.executed[1].sequence_id, 6);
    }

    #[test]
    fn test_cancel_finishes() {
        let cancel = HistoryEvent::new(EventAttributes::WorkflowExecutionCanceled);
        let decision = decide(&task(vec![cancel], 1), 3, 0);
        assert_eq!(decision.state, WorkflowInstanceState::Finished);
    }

    #[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 2))]
    async fn test_simulation_drains_all_instances() {
        let config = SimConfig {
            workers: 2,
            instances: 4,
            activities_per_instance: 2,
            activity_time: Duration::from_millis(2),
            run_timeout: Duration::from_secs(20),
            poller: PollerConfig::new()
                .with_min_interval(Duration::from_millis(1))
                .with_max_interval(Duration::from_millis(10)),
            ..Default::default()
        };
        let (_stop_tx, stop_rx) = watch::channel(false);

        let report = Simulation::new(config).run(stop_rx).await.unwrap();

        assert_eq!(report.stats.active_workflow_instances, 0);
        assert_eq!(report.activity_tasks, 8);
        assert_eq!(report.removed_instances, 4);
    }
}
