use chrono::{DateTime, Utc};
use kvflow_storage::{
    DeleteKeyOp, DeleteValueOp, ExistsOp, GetOp, GetPrefixOp, PutOp, SharedKvClient, SortOrder, SortTarget,
    StorageError,
};
use serde::{Deserialize, Serialize};

use super::{entity_key, entity_prefix, stored_value};
use crate::model::{Queue, WorkflowInstance, WorkflowInstanceState, WorkflowMetadata};

/// Persistent record of one instance execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstanceRecord {
    pub instance: WorkflowInstance,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    pub queue: Queue,
    #[serde(default)]
    pub metadata: WorkflowMetadata,
    pub state: WorkflowInstanceState,
    #[serde(skip)]
    version: i64,
}

stored_value!(WorkflowInstanceRecord);

impl WorkflowInstanceRecord {
    /// New active record
    pub fn new(instance: WorkflowInstance, queue: Queue, metadata: WorkflowMetadata) -> Self {
        Self {
            instance,
            created_at: Utc::now(),
            finished_at: None,
            queue,
            metadata,
            state: WorkflowInstanceState::Active,
            version: 0,
        }
    }

    /// Move to `state`, stamping `finished_at` on the first terminal state
    pub fn transition(&mut self, state: WorkflowInstanceState) {
        self.state = state;
        if state.is_terminal() && self.finished_at.is_none() {
            self.finished_at = Some(Utc::now());
        }
    }
}

#[derive(Clone)]
pub struct WorkflowInstanceStore {
    client: SharedKvClient,
    root: String,
}

impl WorkflowInstanceStore {
    const KIND: &'static str = "instances";

    pub fn new(client: SharedKvClient, root: &str) -> Self {
        Self {
            client,
            root: root.to_string(),
        }
    }

    pub fn key(&self, instance_id: &str, execution_id: &str) -> String {
        entity_key(&self.root, Self::KIND, &[instance_id, execution_id])
    }

    pub fn instance_prefix(&self, instance_id: &str) -> String {
        entity_prefix(&self.root, Self::KIND, &[instance_id])
    }

    pub fn get(&self, instance_id: &str, execution_id: &str) -> GetOp<WorkflowInstanceRecord> {
        GetOp::new(self.client.clone(), self.key(instance_id, execution_id))
    }

    pub fn exists(&self, instance_id: &str, execution_id: &str) -> ExistsOp {
        ExistsOp::new(self.client.clone(), self.key(instance_id, execution_id))
    }

    /// Every execution of an instance id
    pub fn get_by_instance_id(&self, instance_id: &str) -> GetPrefixOp<WorkflowInstanceRecord> {
        GetPrefixOp::new(self.client.clone(), self.instance_prefix(instance_id))
    }

    /// Every record, newest first
    pub fn get_all(&self) -> GetPrefixOp<WorkflowInstanceRecord> {
        GetPrefixOp::new(
            self.client.clone(),
            entity_prefix(&self.root, Self::KIND, &[]),
        )
        .with_sort(SortTarget::CreateRevision, SortOrder::Descend)
    }

    pub fn create(&self, record: &WorkflowInstanceRecord) -> Result<PutOp, StorageError> {
        let key = self.key(&record.instance.instance_id, &record.instance.execution_id);
        PutOp::create(self.client.clone(), key, record)
    }

    pub fn update(&self, record: &WorkflowInstanceRecord) -> Result<PutOp, StorageError> {
        let key = self.key(&record.instance.instance_id, &record.instance.execution_id);
        PutOp::update(self.client.clone(), key, record)
    }

    pub fn delete(&self, instance_id: &str, execution_id: &str) -> DeleteKeyOp {
        DeleteKeyOp::new(self.client.clone(), self.key(instance_id, execution_id))
    }
}

/// Per-instance-id fence
///
/// Every transaction that creates an execution for an instance id also
/// rewrites the fence, guarded by the fence version read beforehand. Two
/// creates racing on the same instance id with different execution ids
/// therefore cannot both commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceFence {
    pub instance_id: String,
    /// Execution created by the last successful create
    pub execution_id: String,
    #[serde(skip)]
    version: i64,
}

stored_value!(InstanceFence);

impl InstanceFence {
    /// Fence to write for `instance`, carrying the version of `current`
    pub fn advance(current: Option<&InstanceFence>, instance: &WorkflowInstance) -> Self {
        Self {
            instance_id: instance.instance_id.clone(),
            execution_id: instance.execution_id.clone(),
            version: current.map_or(0, |fence| fence.version),
        }
    }
}

#[derive(Clone)]
pub struct InstanceFenceStore {
    client: SharedKvClient,
    root: String,
}

impl InstanceFenceStore {
    const KIND: &'static str = "instance_fences";

    pub fn new(client: SharedKvClient, root: &str) -> Self {
        Self {
            client,
            root: root.to_string(),
        }
    }

    pub fn key(&self, instance_id: &str) -> String {
        entity_key(&self.root, Self::KIND, &[instance_id])
    }

    pub fn get(&self, instance_id: &str) -> GetOp<InstanceFence> {
        GetOp::new(self.client.clone(), self.key(instance_id))
    }

    /// Write guarded by the fence's version (version 0 means "absent")
    pub fn update(&self, fence: &InstanceFence) -> Result<PutOp, StorageError> {
        PutOp::update(self.client.clone(), self.key(&fence.instance_id), fence)
    }

    /// Delete guarded by the version read; fails if a create rewrote it since
    pub fn delete_value(&self, fence: &InstanceFence) -> DeleteValueOp {
        DeleteValueOp::new(self.client.clone(), self.key(&fence.instance_id), fence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvflow_storage::StoredValue;

    #[test]
    fn test_transition_stamps_finished_at_once() {
        let mut record = WorkflowInstanceRecord::new(
            WorkflowInstance::new("wf", "1"),
            Queue::default(),
            WorkflowMetadata::new(),
        );
        record.transition(WorkflowInstanceState::Active);
        assert!(record.finished_at.is_none());

        record.transition(WorkflowInstanceState::Finished);
        let finished_at = record.finished_at;
        assert!(finished_at.is_some());

        record.transition(WorkflowInstanceState::Finished);
        assert_eq!(record.finished_at, finished_at);
    }

    #[test]
    fn test_fence_carries_current_version() {
        let instance = WorkflowInstance::new("wf", "2");
        assert_eq!(InstanceFence::advance(None, &instance).version(), 0);

        let mut current = InstanceFence::advance(None, &WorkflowInstance::new("wf", "1"));
        current.set_version(3);
        let next = InstanceFence::advance(Some(&current), &instance);
        assert_eq!(next.version(), 3);
        assert_eq!(next.execution_id, "2");
    }
}
