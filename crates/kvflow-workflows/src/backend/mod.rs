//! Workflow backend over the consensus store
//!
//! [`Backend`] implements [`WorkflowBackend`], the contract a workflow engine
//! drives: instance lifecycle, work-stealing task dispatch, and atomic task
//! completion. The backend holds no in-memory coordination state; every
//! decision is made against the store and guarded by transaction compares.

mod completion;
mod diagnostics;
mod dispatch;
mod lifecycle;
mod stats;

use async_trait::async_trait;
use kvflow_storage::SharedKvClient;
use uuid::Uuid;

pub use diagnostics::{DiagnosticsBackend, WorkflowInstanceRef, WorkflowInstanceTree};

use crate::config::BackendOptions;
use crate::error::BackendError;
use crate::model::{
    ActivityTask, HistoryEvent, Queue, RemovalOptions, Stats, WorkflowEvent, WorkflowInstance,
    WorkflowInstanceState, WorkflowTask,
};
use crate::store::Store;

/// Storage contract consumed by a workflow engine
#[async_trait]
pub trait WorkflowBackend: Send + Sync {
    /// Register a new instance with its execution-started event
    async fn create_workflow_instance(
        &self,
        instance: &WorkflowInstance,
        start_event: &HistoryEvent,
    ) -> Result<(), BackendError>;

    async fn cancel_workflow_instance(
        &self,
        instance: &WorkflowInstance,
        cancel_event: &HistoryEvent,
    ) -> Result<(), BackendError>;

    /// Delete a finished execution with its history
    async fn remove_workflow_instance(&self, instance: &WorkflowInstance)
        -> Result<(), BackendError>;

    /// Delete every finished execution matching `options`; returns how many
    ///
    /// Commits one transaction per `batch_size` executions. A failed batch
    /// leaves earlier batches removed; calling again is safe and removes
    /// only what is left.
    async fn remove_workflow_instances(
        &self,
        options: RemovalOptions,
    ) -> Result<usize, BackendError>;

    async fn get_workflow_instance_state(
        &self,
        instance: &WorkflowInstance,
    ) -> Result<WorkflowInstanceState, BackendError>;

    /// History after `last_sequence_id` (`None` = from the start)
    async fn get_workflow_instance_history(
        &self,
        instance: &WorkflowInstance,
        last_sequence_id: Option<i64>,
    ) -> Result<Vec<HistoryEvent>, BackendError>;

    /// Deliver an event to the active execution of `instance_id`
    async fn signal_workflow(
        &self,
        instance_id: &str,
        event: &HistoryEvent,
    ) -> Result<(), BackendError>;

    /// Claim the next workflow task, or `None` when there is no work
    async fn get_workflow_task(&self, queues: &[Queue])
        -> Result<Option<WorkflowTask>, BackendError>;

    /// Refresh the task's lock lease
    async fn extend_workflow_task(&self, task: &WorkflowTask) -> Result<(), BackendError>;

    /// Commit the outcome of a workflow task atomically
    async fn complete_workflow_task(
        &self,
        task: &WorkflowTask,
        state: WorkflowInstanceState,
        executed_events: &[HistoryEvent],
        activity_events: &[HistoryEvent],
        timer_events: &[HistoryEvent],
        workflow_events: &[WorkflowEvent],
    ) -> Result<(), BackendError>;

    /// Claim the next activity, or `None` when there is no work
    async fn get_activity_task(&self, queues: &[Queue])
        -> Result<Option<ActivityTask>, BackendError>;

    async fn extend_activity_task(&self, task: &ActivityTask) -> Result<(), BackendError>;

    /// Record an activity's result as a pending event on its workflow
    async fn complete_activity_task(
        &self,
        task: &ActivityTask,
        result: &HistoryEvent,
    ) -> Result<(), BackendError>;

    async fn get_stats(&self) -> Result<Stats, BackendError>;

    /// Whether abandoned claims expire on their own
    fn supports_expiration(&self) -> bool {
        false
    }
}

/// Consensus-store backed [`WorkflowBackend`]
#[derive(Clone)]
pub struct Backend {
    store: Store,
    options: BackendOptions,
    /// Unique per process; distinguishes restarts of the same worker id
    worker_instance_id: String,
}

impl Backend {
    pub fn new(client: SharedKvClient, options: BackendOptions) -> Self {
        let store =
            Store::new(client, options.root.clone()).with_retry(options.transport_retry.clone());
        Self {
            store,
            options,
            worker_instance_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn options(&self) -> &BackendOptions {
        &self.options
    }

    pub fn worker_id(&self) -> &str {
        &self.options.worker_id
    }

    pub fn worker_instance_id(&self) -> &str {
        &self.worker_instance_id
    }

    pub fn store(&self) -> &Store {
        &self.store
    }
}

#[async_trait]
impl WorkflowBackend for Backend {
    async fn create_workflow_instance(
        &self,
        instance: &WorkflowInstance,
        start_event: &HistoryEvent,
    ) -> Result<(), BackendError> {
        self.create_instance(instance, start_event).await
    }

    async fn cancel_workflow_instance(
        &self,
        instance: &WorkflowInstance,
        cancel_event: &HistoryEvent,
    ) -> Result<(), BackendError> {
        self.cancel_instance(instance, cancel_event).await
    }

    async fn remove_workflow_instance(
        &self,
        instance: &WorkflowInstance,
    ) -> Result<(), BackendError> {
        self.remove_instance(instance).await
    }

    async fn remove_workflow_instances(
        &self,
        options: RemovalOptions,
    ) -> Result<usize, BackendError> {
        self.remove_instances(options).await
    }

    async fn get_workflow_instance_state(
        &self,
        instance: &WorkflowInstance,
    ) -> Result<WorkflowInstanceState, BackendError> {
        self.instance_state(instance).await
    }

    async fn get_workflow_instance_history(
        &self,
        instance: &WorkflowInstance,
        last_sequence_id: Option<i64>,
    ) -> Result<Vec<HistoryEvent>, BackendError> {
        self.instance_history(instance, last_sequence_id).await
    }

    async fn signal_workflow(
        &self,
        instance_id: &str,
        event: &HistoryEvent,
    ) -> Result<(), BackendError> {
        self.signal(instance_id, event).await
    }

    async fn get_workflow_task(
        &self,
        queues: &[Queue],
    ) -> Result<Option<WorkflowTask>, BackendError> {
        self.claim_workflow_task(queues).await
    }

    async fn extend_workflow_task(&self, task: &WorkflowTask) -> Result<(), BackendError> {
        self.extend_workflow_lock(task).await
    }

    async fn complete_workflow_task(
        &self,
        task: &WorkflowTask,
        state: WorkflowInstanceState,
        executed_events: &[HistoryEvent],
        activity_events: &[HistoryEvent],
        timer_events: &[HistoryEvent],
        workflow_events: &[WorkflowEvent],
    ) -> Result<(), BackendError> {
        self.commit_workflow_task(
            task,
            state,
            executed_events,
            activity_events,
            timer_events,
            workflow_events,
        )
        .await
    }

    async fn get_activity_task(
        &self,
        queues: &[Queue],
    ) -> Result<Option<ActivityTask>, BackendError> {
        self.claim_activity_task(queues).await
    }

    async fn extend_activity_task(&self, task: &ActivityTask) -> Result<(), BackendError> {
        self.extend_activity_lock(task).await
    }

    async fn complete_activity_task(
        &self,
        task: &ActivityTask,
        result: &HistoryEvent,
    ) -> Result<(), BackendError> {
        self.commit_activity_task(task, result).await
    }

    async fn get_stats(&self) -> Result<Stats, BackendError> {
        self.collect_stats().await
    }

    fn supports_expiration(&self) -> bool {
        true
    }
}
