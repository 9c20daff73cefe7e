//! Work-stealing task dispatch
//!
//! Workers scan queue items in the order the store returns them and claim
//! the first eligible one. A claim is one transaction: the lock write
//! (create, or update when reclaiming a lock left by an earlier process of
//! the same worker) plus a version-checked touch of the queue item. Losing
//! that transaction means another worker got there first, so the scan
//! moves on.

use chrono::Utc;
use kvflow_storage::PutOp;
use tracing::{debug, instrument, trace, warn};

use super::Backend;
use crate::error::{BackendError, StorageResultExt};
use crate::model::{ActivityTask, Queue, WorkflowTask};
use crate::store::{ActivityLock, WorkflowInstanceLock, WorkflowInstanceSticky};

/// Caps the number of queue items a single dispatch call inspects
struct ScanBudget {
    remaining: Option<usize>,
}

impl ScanBudget {
    fn new(max: Option<usize>) -> Self {
        Self { remaining: max }
    }

    /// Consume one unit; false once the budget is spent
    fn take(&mut self) -> bool {
        match &mut self.remaining {
            None => true,
            Some(0) => false,
            Some(n) => {
                *n -= 1;
                true
            }
        }
    }
}

impl Backend {
    #[instrument(skip(self), fields(worker_id = %self.options.worker_id))]
    pub(super) async fn claim_workflow_task(
        &self,
        queues: &[Queue],
    ) -> Result<Option<WorkflowTask>, BackendError> {
        let mut budget = ScanBudget::new(self.options.max_scan_items);

        for queue in queues {
            let items = self
                .store
                .workflow_queue
                .get_by_queue(queue)
                .exec()
                .await
                .context("get queue items")?;

            for mut item in items {
                if !budget.take() {
                    debug!("scan budget exhausted");
                    return Ok(None);
                }
                let (iid, eid) = (
                    item.instance.instance_id.clone(),
                    item.instance.execution_id.clone(),
                );

                let lock = self
                    .store
                    .workflow_locks
                    .get(&iid, &eid)
                    .exec_opt()
                    .await
                    .context("check for lock")?;
                let Some(lock_op) = self.workflow_lock_op(&iid, &eid, lock)? else {
                    trace!(instance_id = %iid, "instance locked");
                    continue;
                };

                let sticky = self
                    .store
                    .stickies
                    .get(&iid)
                    .exec_opt()
                    .await
                    .context("check for sticky")?;
                if sticky.is_some_and(|s| s.worker_id != self.options.worker_id) {
                    trace!(instance_id = %iid, "instance sticky to another worker");
                    continue;
                }

                let now = Utc::now();
                let new_events: Vec<_> = self
                    .store
                    .pending_events
                    .get_sorted(&iid, &eid)
                    .await
                    .context("get pending events")?
                    .into_iter()
                    .map(|record| record.event)
                    .filter(|event| event.is_visible_at(now))
                    .collect();
                if new_events.is_empty() {
                    continue;
                }

                item.update_last_locked();

                let sticky = WorkflowInstanceSticky::new(&iid, &self.options.worker_id);
                let result = self
                    .store
                    .txn()
                    .with_op(lock_op)
                    .with_op(
                        self.store
                            .stickies
                            .put(&sticky)
                            .context("encode sticky")?
                            .with_ttl(self.options.sticky_timeout),
                    )
                    .with_op(self.store.workflow_queue.update(&item).context("encode queue item")?)
                    .commit()
                    .await;
                match result {
                    Ok(_) => {}
                    Err(err) if err.is_constraint_violation() => {
                        debug!(instance_id = %iid, "lost claim race");
                        continue;
                    }
                    Err(err) => return Err(BackendError::storage("lock workflow instance", err)),
                }

                let last_sequence_id = self
                    .store
                    .history
                    .get_last_sequence_id(&iid, &eid)
                    .await
                    .context("get last sequence id")?;

                debug!(
                    instance = %item.instance,
                    events = new_events.len(),
                    "claimed workflow task"
                );
                return Ok(Some(WorkflowTask {
                    id: iid,
                    instance: item.instance,
                    state: item.state,
                    queue: item.queue,
                    metadata: item.metadata,
                    last_sequence_id,
                    new_events,
                }));
            }
        }

        Ok(None)
    }

    /// Lock write for a claim, or `None` when another worker holds the lock
    fn workflow_lock_op(
        &self,
        instance_id: &str,
        execution_id: &str,
        lock: Option<WorkflowInstanceLock>,
    ) -> Result<Option<PutOp>, BackendError> {
        let worker_id = &self.options.worker_id;
        let ttl = self.options.workflow_lock_timeout;
        let op = match lock {
            None => {
                let lock = WorkflowInstanceLock::new(
                    instance_id,
                    execution_id,
                    worker_id,
                    &self.worker_instance_id,
                );
                self.store.workflow_locks.create(&lock)
            }
            Some(mut lock) if lock.can_be_reassigned_to(worker_id, &self.worker_instance_id) => {
                debug!(instance_id, "reclaiming lock from earlier worker process");
                lock.reassign(worker_id, &self.worker_instance_id);
                self.store.workflow_locks.update(&lock)
            }
            Some(_) => return Ok(None),
        };
        Ok(Some(op.context("encode lock")?.with_ttl(ttl)))
    }

    #[instrument(skip(self, task), fields(instance = %task.instance))]
    pub(super) async fn extend_workflow_lock(&self, task: &WorkflowTask) -> Result<(), BackendError> {
        let (iid, eid) = (&task.instance.instance_id, &task.instance.execution_id);
        let lost = || BackendError::LockLost(task.instance.to_string());

        let mut item = self
            .store
            .workflow_queue
            .get(&task.queue, iid, eid)
            .exec_opt()
            .await
            .context("get workflow queue item")?
            .ok_or_else(lost)?;
        let lock = self
            .store
            .workflow_locks
            .get(iid, eid)
            .exec_opt()
            .await
            .context("get workflow lock")?
            .filter(|lock| lock.is_held_by(&self.worker_instance_id))
            .ok_or_else(lost)?;

        item.update_last_locked();

        let result = self
            .store
            .txn()
            .with_op(
                self.store
                    .workflow_locks
                    .update(&lock)
                    .context("encode lock")?
                    .with_ttl(self.options.workflow_lock_timeout),
            )
            .with_op(self.store.workflow_queue.update(&item).context("encode queue item")?)
            .commit()
            .await;
        match result {
            Ok(_) => {
                trace!("workflow lock extended");
                Ok(())
            }
            Err(err) if err.is_constraint_violation() => {
                warn!("workflow lock changed while extending");
                Err(lost())
            }
            Err(err) => Err(BackendError::storage("update lock", err)),
        }
    }

    #[instrument(skip(self), fields(worker_id = %self.options.worker_id))]
    pub(super) async fn claim_activity_task(
        &self,
        queues: &[Queue],
    ) -> Result<Option<ActivityTask>, BackendError> {
        let mut budget = ScanBudget::new(self.options.max_scan_items);
        let worker_id = &self.options.worker_id;
        let ttl = self.options.activity_lock_timeout;

        for queue in queues {
            let items = self
                .store
                .activity_queue
                .get_by_queue(queue)
                .exec()
                .await
                .context("get activity queue items")?;

            for mut item in items {
                if !budget.take() {
                    debug!("scan budget exhausted");
                    return Ok(None);
                }
                let iid = item.instance_id.clone();
                let event_id = item.event.id.clone();

                let lock = self
                    .store
                    .activity_locks
                    .get(&iid, &event_id)
                    .exec_opt()
                    .await
                    .context("check for activity lock")?;
                let lock_op = match lock {
                    None => self.store.activity_locks.create(&ActivityLock::new(
                        &iid,
                        &event_id,
                        worker_id,
                        &self.worker_instance_id,
                    )),
                    Some(mut lock)
                        if lock.can_be_reassigned_to(worker_id, &self.worker_instance_id) =>
                    {
                        lock.reassign(worker_id, &self.worker_instance_id);
                        self.store.activity_locks.update(&lock)
                    }
                    Some(_) => {
                        trace!(activity_id = %event_id, "activity locked");
                        continue;
                    }
                }
                .context("encode activity lock")?
                .with_ttl(ttl);

                item.update_last_locked();

                let result = self
                    .store
                    .txn()
                    .with_op(lock_op)
                    .with_op(
                        self.store
                            .activity_queue
                            .update(&item)
                            .context("encode activity queue item")?,
                    )
                    .commit()
                    .await;
                match result {
                    Ok(_) => {}
                    Err(err) if err.is_constraint_violation() => {
                        debug!(activity_id = %event_id, "lost activity claim race");
                        continue;
                    }
                    Err(err) => return Err(BackendError::storage("lock activity", err)),
                }

                debug!(activity_id = %event_id, "claimed activity task");
                return Ok(Some(ActivityTask {
                    id: event_id.clone(),
                    activity_id: event_id,
                    instance: item.instance(),
                    queue: item.queue,
                    event: item.event,
                }));
            }
        }

        Ok(None)
    }

    #[instrument(skip(self, task), fields(activity_id = %task.activity_id))]
    pub(super) async fn extend_activity_lock(&self, task: &ActivityTask) -> Result<(), BackendError> {
        let iid = &task.instance.instance_id;
        let lost = || BackendError::LockLost(format!("activity {}", task.activity_id));

        let mut item = self
            .store
            .activity_queue
            .get(&task.queue, iid, &task.activity_id)
            .exec_opt()
            .await
            .context("get activity queue item")?
            .ok_or_else(|| BackendError::ActivityNotFound(task.activity_id.clone()))?;
        let lock = self
            .store
            .activity_locks
            .get(iid, &task.activity_id)
            .exec_opt()
            .await
            .context("get activity lock")?
            .filter(|lock| lock.is_held_by(&self.worker_instance_id))
            .ok_or_else(lost)?;

        item.update_last_locked();

        let result = self
            .store
            .txn()
            .with_op(
                self.store
                    .activity_locks
                    .update(&lock)
                    .context("encode activity lock")?
                    .with_ttl(self.options.activity_lock_timeout),
            )
            .with_op(
                self.store
                    .activity_queue
                    .update(&item)
                    .context("encode activity queue item")?,
            )
            .commit()
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(err) if err.is_constraint_violation() => Err(lost()),
            Err(err) => Err(BackendError::storage("update activity lock", err)),
        }
    }
}
