//! Instance lifecycle: create, cancel, signal, remove, reads

use std::collections::{HashMap, HashSet};

use kvflow_storage::{StorageError, Txn};
use tracing::{debug, info, instrument};

use super::Backend;
use crate::error::{BackendError, StorageResultExt};
use crate::model::{
    EventAttributes, HistoryEvent, Queue, RemovalOptions, WorkflowInstance, WorkflowInstanceState,
    WorkflowMetadata,
};
use crate::store::{
    InstanceFence, PendingEventRecord, WorkflowInstanceRecord, WorkflowQueueItem,
};

impl Backend {
    #[instrument(skip(self, start_event), fields(instance = %instance))]
    pub(super) async fn create_instance(
        &self,
        instance: &WorkflowInstance,
        start_event: &HistoryEvent,
    ) -> Result<(), BackendError> {
        let (queue, metadata) = match &start_event.attributes {
            EventAttributes::WorkflowExecutionStarted {
                queue, metadata, ..
            } => (queue.or(&Queue::default()), metadata.clone()),
            other => return Err(BackendError::InvalidEvent(other.kind().to_string())),
        };

        if self.active_execution(&instance.instance_id).await?.is_some() {
            return Err(BackendError::InstanceAlreadyExists);
        }

        let mut txn = self.store.txn();
        self.add_instance_creation(&mut txn, instance, queue.clone(), metadata)
            .await?;
        txn.add(
            self.store
                .pending_events
                .put(&PendingEventRecord::new(instance, start_event.clone()))
                .context("encode start event")?,
        );

        match txn.commit().await {
            Ok(_) => {
                info!(queue = %queue, "workflow instance created");
                Ok(())
            }
            Err(err) if err.is_constraint_violation() => {
                debug!("lost instance creation race");
                Err(BackendError::InstanceAlreadyExists)
            }
            Err(err) => Err(BackendError::storage("create workflow instance", err)),
        }
    }

    /// First active execution of `instance_id`, if any
    pub(super) async fn active_execution(
        &self,
        instance_id: &str,
    ) -> Result<Option<WorkflowInstanceRecord>, BackendError> {
        let records = self
            .store
            .instances
            .get_by_instance_id(instance_id)
            .exec()
            .await
            .context("check for existing active instance")?;
        Ok(records
            .into_iter()
            .find(|record| record.state == WorkflowInstanceState::Active))
    }

    /// Add the record, fence and queue item writes that create an execution
    ///
    /// The fence write is version-checked against the fence read here, so a
    /// concurrent create for the same instance id fails at commit.
    pub(super) async fn add_instance_creation(
        &self,
        txn: &mut Txn,
        instance: &WorkflowInstance,
        queue: Queue,
        metadata: WorkflowMetadata,
    ) -> Result<(), BackendError> {
        let fence = self
            .store
            .fences
            .get(&instance.instance_id)
            .exec_opt()
            .await
            .context("read instance fence")?;
        let fence = InstanceFence::advance(fence.as_ref(), instance);

        let record = WorkflowInstanceRecord::new(instance.clone(), queue.clone(), metadata.clone());
        let item = WorkflowQueueItem::new(instance.clone(), queue, metadata);

        txn.add(self.store.fences.update(&fence).context("encode instance fence")?);
        txn.add(self.store.instances.create(&record).context("encode instance")?);
        txn.add(self.store.workflow_queue.create(&item).context("encode queue item")?);
        Ok(())
    }

    #[instrument(skip(self, cancel_event), fields(instance = %instance))]
    pub(super) async fn cancel_instance(
        &self,
        instance: &WorkflowInstance,
        cancel_event: &HistoryEvent,
    ) -> Result<(), BackendError> {
        let exists = self
            .store
            .instances
            .exists(&instance.instance_id, &instance.execution_id)
            .exec()
            .await
            .context("get workflow instance")?;
        if !exists {
            return Err(BackendError::InstanceNotFound);
        }

        self.store
            .pending_events
            .create(&PendingEventRecord::new(instance, cancel_event.clone()))
            .context("encode cancel event")?
            .exec()
            .await
            .context("create pending event")?;

        info!("workflow instance cancellation requested");
        Ok(())
    }

    #[instrument(skip(self, event), fields(event = event.kind()))]
    pub(super) async fn signal(
        &self,
        instance_id: &str,
        event: &HistoryEvent,
    ) -> Result<(), BackendError> {
        let record = self
            .active_execution(instance_id)
            .await?
            .ok_or(BackendError::InstanceNotFound)?;

        self.store
            .pending_events
            .create(&PendingEventRecord::new(&record.instance, event.clone()))
            .context("encode signal event")?
            .exec()
            .await
            .context("signal workflow")?;

        debug!(execution_id = %record.instance.execution_id, "workflow signaled");
        Ok(())
    }

    #[instrument(skip(self), fields(instance = %instance))]
    pub(super) async fn remove_instance(
        &self,
        instance: &WorkflowInstance,
    ) -> Result<(), BackendError> {
        let record = self
            .store
            .instances
            .get(&instance.instance_id, &instance.execution_id)
            .exec_opt()
            .await
            .context("get workflow instance")?
            .ok_or(BackendError::InstanceNotFound)?;

        if !record.state.is_terminal() {
            return Err(BackendError::InstanceNotFinished);
        }

        let fence = self.unused_fence(&instance.instance_id, 1).await?;
        self.commit_removal(&[&record.instance], fence.into_iter().collect())
            .await
            .context("delete workflow instance")?;

        info!("workflow instance removed");
        Ok(())
    }

    /// The instance id's fence, if `removing` covers every execution left
    ///
    /// The fence is read before the executions are counted: a create that
    /// commits after the read bumps its version, so the version-checked
    /// delete built from it can no longer succeed.
    async fn unused_fence(
        &self,
        instance_id: &str,
        removing: usize,
    ) -> Result<Option<InstanceFence>, BackendError> {
        let fence = self
            .store
            .fences
            .get(instance_id)
            .exec_opt()
            .await
            .context("read instance fence")?;
        if fence.is_none() {
            return Ok(None);
        }

        let executions = self
            .store
            .instances
            .get_by_instance_id(instance_id)
            .count()
            .await
            .context("count executions")?;
        Ok(fence.filter(|_| executions <= removing))
    }

    /// Delete `executions` and the given fences in one transaction
    ///
    /// A fence rewritten since it was read belongs to a new execution; the
    /// removal is then committed again without touching any fence.
    async fn commit_removal(
        &self,
        executions: &[&WorkflowInstance],
        fences: Vec<InstanceFence>,
    ) -> Result<(), StorageError> {
        let removal = |fences: &[InstanceFence]| {
            let mut txn = self.store.txn();
            for instance in executions {
                self.add_execution_removal(&mut txn, instance);
            }
            for fence in fences {
                txn.add(self.store.fences.delete_value(fence));
            }
            txn
        };

        match removal(&fences).commit().await {
            Ok(_) => Ok(()),
            Err(err) if err.is_constraint_violation() && !fences.is_empty() => {
                debug!("instance fence taken by a new execution, keeping it");
                removal(&[]).commit().await.map(|_| ())
            }
            Err(err) => Err(err),
        }
    }

    fn add_execution_removal(&self, txn: &mut Txn, instance: &WorkflowInstance) {
        let (iid, eid) = (&instance.instance_id, &instance.execution_id);
        txn.add(self.store.instances.delete(iid, eid));
        txn.add(self.store.history.delete_by_execution(iid, eid));
        txn.add(self.store.pending_events.delete_by_execution(iid, eid));
    }

    #[instrument(skip(self))]
    pub(super) async fn remove_instances(
        &self,
        options: RemovalOptions,
    ) -> Result<usize, BackendError> {
        let records = self
            .store
            .instances
            .get_all()
            .exec()
            .await
            .context("get all instances")?;

        let removable: Vec<&WorkflowInstanceRecord> = records
            .iter()
            .filter(|record| record.state.is_terminal())
            .filter(|record| match options.finished_before {
                Some(cutoff) => record.finished_at.is_some_and(|at| at < cutoff),
                None => true,
            })
            .collect();

        let mut removed_per_instance: HashMap<&str, usize> = HashMap::new();
        for record in &removable {
            *removed_per_instance
                .entry(record.instance.instance_id.as_str())
                .or_default() += 1;
        }

        // a fence is considered once, in the first batch touching its instance id
        let mut fences_checked: HashSet<&str> = HashSet::new();
        let mut removed = 0;
        for batch in removable.chunks(options.batch_size.max(1)) {
            let mut fences = Vec::new();
            for record in batch {
                let iid = record.instance.instance_id.as_str();
                if fences_checked.insert(iid) {
                    let removing = removed_per_instance.get(iid).copied().unwrap_or(0);
                    fences.extend(self.unused_fence(iid, removing).await?);
                }
            }

            let executions: Vec<&WorkflowInstance> =
                batch.iter().map(|record| &record.instance).collect();
            self.commit_removal(&executions, fences)
                .await
                .context("remove workflow instances")?;
            removed += batch.len();
            debug!(batch = batch.len(), removed, "removed instance batch");
        }

        info!(removed, "bulk removal finished");
        Ok(removed)
    }

    pub(super) async fn instance_state(
        &self,
        instance: &WorkflowInstance,
    ) -> Result<WorkflowInstanceState, BackendError> {
        self.store
            .instances
            .get(&instance.instance_id, &instance.execution_id)
            .exec_opt()
            .await
            .context("get instance")?
            .map(|record| record.state)
            .ok_or(BackendError::InstanceNotFound)
    }

    pub(super) async fn instance_history(
        &self,
        instance: &WorkflowInstance,
        last_sequence_id: Option<i64>,
    ) -> Result<Vec<HistoryEvent>, BackendError> {
        let records = self
            .store
            .history
            .get_after_sequence_id(&instance.instance_id, &instance.execution_id, last_sequence_id)
            .await
            .context("get events")?;
        Ok(records.into_iter().map(|record| record.event).collect())
    }
}
