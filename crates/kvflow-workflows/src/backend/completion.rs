//! Atomic task completion and cross-instance event propagation

use std::collections::HashSet;

use tracing::{debug, info, instrument, warn};

use super::Backend;
use crate::error::{BackendError, StorageResultExt};
use crate::model::{
    events_by_instance, ActivityTask, EventAttributes, HistoryEvent, WorkflowEvent,
    WorkflowInstance, WorkflowInstanceState, WorkflowTask,
};
use crate::store::{
    ActivityQueueItem, HistoryEventRecord, PendingEventRecord, WorkflowInstanceSticky,
};

impl Backend {
    #[instrument(
        skip(self, task, executed_events, activity_events, timer_events, workflow_events),
        fields(instance = %task.instance, state = %state)
    )]
    pub(super) async fn commit_workflow_task(
        &self,
        task: &WorkflowTask,
        state: WorkflowInstanceState,
        executed_events: &[HistoryEvent],
        activity_events: &[HistoryEvent],
        timer_events: &[HistoryEvent],
        workflow_events: &[WorkflowEvent],
    ) -> Result<(), BackendError> {
        let instance = &task.instance;
        let (iid, eid) = (&instance.instance_id, &instance.execution_id);

        let mut record = self
            .store
            .instances
            .get(iid, eid)
            .exec_opt()
            .await
            .context("get queued workflow instance")?
            .ok_or(BackendError::InstanceNotFound)?;

        let lock = self
            .store
            .workflow_locks
            .get(iid, eid)
            .exec_opt()
            .await
            .context("get workflow lock")?
            .filter(|lock| lock.is_held_by(&self.worker_instance_id));
        let Some(lock) = lock else {
            warn!("completing a task whose lock is gone");
            return Err(BackendError::LockLost(instance.to_string()));
        };

        let mut txn = self.store.txn();
        txn.add(self.store.workflow_locks.delete_value(&lock));

        let pending = self
            .store
            .pending_events
            .get_sorted(iid, eid)
            .await
            .context("get future events")?;

        let mut deleted_pending: HashSet<&str> = HashSet::new();
        for event in executed_events {
            if deleted_pending.insert(event.id.as_str()) {
                txn.add(self.store.pending_events.delete(iid, eid, &event.id));
            }
            txn.add(
                self.store
                    .history
                    .create(&HistoryEventRecord::new(instance, event.clone()))
                    .context("encode history event")?,
            );

            if matches!(event.attributes, EventAttributes::TimerCanceled) {
                for future in &pending {
                    if future.event.schedule_event_id == event.schedule_event_id
                        && deleted_pending.insert(future.event.id.as_str())
                    {
                        txn.add(self.store.pending_events.delete(iid, eid, &future.event.id));
                    }
                }
            }
        }

        for event in activity_events {
            let EventAttributes::ActivityScheduled { queue, .. } = &event.attributes else {
                return Err(BackendError::InvalidEvent(event.kind().to_string()));
            };
            let item = ActivityQueueItem::new(instance, queue.or(&task.queue), event.clone());
            txn.add(
                self.store
                    .activity_queue
                    .create(&item)
                    .context("encode activity queue item")?,
            );
        }

        for event in timer_events {
            txn.add(
                self.store
                    .pending_events
                    .create(&PendingEventRecord::new(instance, event.clone()))
                    .context("encode timer event")?,
            );
        }

        // one new execution per instance id per transaction
        let mut started: HashSet<&str> = HashSet::new();
        for (target, events) in events_by_instance(workflow_events) {
            let first = &events[0].event;
            if let EventAttributes::WorkflowExecutionStarted {
                queue, metadata, ..
            } = &first.attributes
            {
                if started.contains(target.instance_id.as_str())
                    || self.execution_conflicts(target, instance).await?
                {
                    debug!(target = %target, "sub-workflow already exists");
                    let failure = HistoryEvent::new(EventAttributes::SubWorkflowFailed {
                        error: BackendError::InstanceAlreadyExists.to_string(),
                    })
                    .with_schedule_event_id(target.parent.as_ref().map_or(0, |p| p.event_id));
                    txn.add(
                        self.store
                            .pending_events
                            .create(&PendingEventRecord::new(instance, failure))
                            .context("encode sub-workflow failure")?,
                    );
                    continue;
                }
                self.add_instance_creation(
                    &mut txn,
                    target,
                    queue.or(&task.queue),
                    metadata.clone(),
                )
                .await?;
                started.insert(target.instance_id.as_str());
            }

            for event in events {
                txn.add(
                    self.store
                        .pending_events
                        .create(&PendingEventRecord::new(target, event.event.clone()))
                        .context("encode workflow event")?,
                );
            }
        }

        let sticky = WorkflowInstanceSticky::new(iid, &self.options.worker_id);
        match state {
            WorkflowInstanceState::ContinuedAsNew
                if self.options.remove_continued_as_new_instances =>
            {
                txn.add(self.store.instances.delete(iid, eid));
                txn.add(self.store.workflow_queue.delete(&task.queue, iid, eid));
            }
            WorkflowInstanceState::ContinuedAsNew | WorkflowInstanceState::Finished => {
                record.transition(state);
                txn.add(self.store.workflow_queue.delete(&task.queue, iid, eid));
                txn.add(self.store.instances.update(&record).context("encode instance")?);
                txn.add(
                    self.store
                        .stickies
                        .put(&sticky)
                        .context("encode sticky")?
                        .with_ttl(self.options.sticky_timeout),
                );
            }
            WorkflowInstanceState::Active => {
                record.transition(state);
                txn.add(self.store.instances.update(&record).context("encode instance")?);
                txn.add(
                    self.store
                        .stickies
                        .put(&sticky)
                        .context("encode sticky")?
                        .with_ttl(self.options.sticky_timeout),
                );
            }
        }

        match txn.commit().await {
            Ok(_) => {}
            Err(err) if err.is_constraint_violation() => {
                warn!("workflow task completion lost a concurrent write");
                return Err(BackendError::LockLost(instance.to_string()));
            }
            Err(err) => {
                return Err(BackendError::storage("persist workflow task completion", err))
            }
        }

        if state.is_terminal() {
            info!(executed = executed_events.len(), "workflow execution ended");
        } else {
            debug!(
                executed = executed_events.len(),
                activities = activity_events.len(),
                timers = timer_events.len(),
                "workflow task completed"
            );
        }
        Ok(())
    }

    /// Whether starting `target` would duplicate an existing execution
    ///
    /// The completing execution itself does not count: continue-as-new
    /// starts its successor in the same transaction that ends it.
    async fn execution_conflicts(
        &self,
        target: &WorkflowInstance,
        completing: &WorkflowInstance,
    ) -> Result<bool, BackendError> {
        let exists = self
            .store
            .instances
            .exists(&target.instance_id, &target.execution_id)
            .exec()
            .await
            .context("check for existing sub-workflow instance")?;
        if exists {
            return Ok(true);
        }
        Ok(self
            .active_execution(&target.instance_id)
            .await?
            .is_some_and(|active| !active.instance.same_execution(completing)))
    }

    #[instrument(skip(self, task, result), fields(activity_id = %task.activity_id))]
    pub(super) async fn commit_activity_task(
        &self,
        task: &ActivityTask,
        result: &HistoryEvent,
    ) -> Result<(), BackendError> {
        let iid = &task.instance.instance_id;
        let exists = self
            .store
            .activity_queue
            .get(&task.queue, iid, &task.activity_id)
            .exec_opt()
            .await
            .context("get activity queue item")?
            .is_some();
        if !exists {
            return Err(BackendError::ActivityNotFound(task.activity_id.clone()));
        }

        self.store
            .txn()
            .with_op(self.store.activity_locks.delete(iid, &task.activity_id))
            .with_op(
                self.store
                    .activity_queue
                    .delete(&task.queue, iid, &task.activity_id),
            )
            .with_op(
                self.store
                    .pending_events
                    .create(&PendingEventRecord::new(&task.instance, result.clone()))
                    .context("encode activity result")?,
            )
            .commit()
            .await
            .context("complete activity task")?;

        debug!(result = result.kind(), "activity task completed");
        Ok(())
    }
}
