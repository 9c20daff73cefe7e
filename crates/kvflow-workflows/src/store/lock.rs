//! Leased claim records
//!
//! Every key written here carries a TTL. A lock's presence is the only
//! authority for "claimed"; when its lease expires the item is free again.

use chrono::{DateTime, Utc};
use kvflow_storage::{
    DeleteKeyOp, DeleteValueOp, ExistsOp, GetOp, PutOp, SharedKvClient, StorageError,
};
use serde::{Deserialize, Serialize};

use super::{entity_key, stored_value};

/// Claim on one workflow execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstanceLock {
    pub instance_id: String,
    pub execution_id: String,
    pub created_at: DateTime<Utc>,
    pub worker_id: String,
    /// Identifies one process lifetime of `worker_id`
    pub worker_instance_id: String,
    #[serde(skip)]
    version: i64,
}

stored_value!(WorkflowInstanceLock);

impl WorkflowInstanceLock {
    pub fn new(
        instance_id: &str,
        execution_id: &str,
        worker_id: &str,
        worker_instance_id: &str,
    ) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            execution_id: execution_id.to_string(),
            created_at: Utc::now(),
            worker_id: worker_id.to_string(),
            worker_instance_id: worker_instance_id.to_string(),
            version: 0,
        }
    }

    pub fn is_held_by(&self, worker_instance_id: &str) -> bool {
        self.worker_instance_id == worker_instance_id
    }

    /// A lock left behind by an earlier process of the same worker
    pub fn can_be_reassigned_to(&self, worker_id: &str, worker_instance_id: &str) -> bool {
        self.worker_id == worker_id && self.worker_instance_id != worker_instance_id
    }

    pub fn reassign(&mut self, worker_id: &str, worker_instance_id: &str) {
        self.worker_id = worker_id.to_string();
        self.worker_instance_id = worker_instance_id.to_string();
    }
}

#[derive(Clone)]
pub struct WorkflowInstanceLockStore {
    client: SharedKvClient,
    root: String,
}

impl WorkflowInstanceLockStore {
    const KIND: &'static str = "workflow_instance_locks";

    pub fn new(client: SharedKvClient, root: &str) -> Self {
        Self {
            client,
            root: root.to_string(),
        }
    }

    pub fn key(&self, instance_id: &str, execution_id: &str) -> String {
        entity_key(&self.root, Self::KIND, &[instance_id, execution_id])
    }

    pub fn get(&self, instance_id: &str, execution_id: &str) -> GetOp<WorkflowInstanceLock> {
        GetOp::new(self.client.clone(), self.key(instance_id, execution_id))
    }

    pub fn exists(&self, instance_id: &str, execution_id: &str) -> ExistsOp {
        ExistsOp::new(self.client.clone(), self.key(instance_id, execution_id))
    }

    pub fn create(&self, lock: &WorkflowInstanceLock) -> Result<PutOp, StorageError> {
        PutOp::create(
            self.client.clone(),
            self.key(&lock.instance_id, &lock.execution_id),
            lock,
        )
    }

    pub fn update(&self, lock: &WorkflowInstanceLock) -> Result<PutOp, StorageError> {
        PutOp::update(
            self.client.clone(),
            self.key(&lock.instance_id, &lock.execution_id),
            lock,
        )
    }

    pub fn delete(&self, instance_id: &str, execution_id: &str) -> DeleteKeyOp {
        DeleteKeyOp::new(self.client.clone(), self.key(instance_id, execution_id))
    }

    /// Delete only if the lock is still at the version it was read at
    pub fn delete_value(&self, lock: &WorkflowInstanceLock) -> DeleteValueOp {
        DeleteValueOp::new(
            self.client.clone(),
            self.key(&lock.instance_id, &lock.execution_id),
            lock,
        )
    }
}

/// Routes an instance back to the worker that last ran it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstanceSticky {
    pub instance_id: String,
    pub worker_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    version: i64,
}

stored_value!(WorkflowInstanceSticky);

impl WorkflowInstanceSticky {
    pub fn new(instance_id: &str, worker_id: &str) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            worker_id: worker_id.to_string(),
            created_at: Utc::now(),
            version: 0,
        }
    }
}

#[derive(Clone)]
pub struct WorkflowInstanceStickyStore {
    client: SharedKvClient,
    root: String,
}

impl WorkflowInstanceStickyStore {
    const KIND: &'static str = "workflow_instance_stickies";

    pub fn new(client: SharedKvClient, root: &str) -> Self {
        Self {
            client,
            root: root.to_string(),
        }
    }

    pub fn key(&self, instance_id: &str) -> String {
        entity_key(&self.root, Self::KIND, &[instance_id])
    }

    pub fn get(&self, instance_id: &str) -> GetOp<WorkflowInstanceSticky> {
        GetOp::new(self.client.clone(), self.key(instance_id))
    }

    pub fn put(&self, sticky: &WorkflowInstanceSticky) -> Result<PutOp, StorageError> {
        PutOp::put(self.client.clone(), self.key(&sticky.instance_id), sticky)
    }

    pub fn delete(&self, instance_id: &str) -> DeleteKeyOp {
        DeleteKeyOp::new(self.client.clone(), self.key(instance_id))
    }
}

/// Claim on one scheduled activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityLock {
    pub instance_id: String,
    pub event_id: String,
    pub created_at: DateTime<Utc>,
    pub worker_id: String,
    pub worker_instance_id: String,
    #[serde(skip)]
    version: i64,
}

stored_value!(ActivityLock);

impl ActivityLock {
    pub fn new(
        instance_id: &str,
        event_id: &str,
        worker_id: &str,
        worker_instance_id: &str,
    ) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            event_id: event_id.to_string(),
            created_at: Utc::now(),
            worker_id: worker_id.to_string(),
            worker_instance_id: worker_instance_id.to_string(),
            version: 0,
        }
    }

    pub fn is_held_by(&self, worker_instance_id: &str) -> bool {
        self.worker_instance_id == worker_instance_id
    }

    pub fn can_be_reassigned_to(&self, worker_id: &str, worker_instance_id: &str) -> bool {
        self.worker_id == worker_id && self.worker_instance_id != worker_instance_id
    }

    pub fn reassign(&mut self, worker_id: &str, worker_instance_id: &str) {
        self.worker_id = worker_id.to_string();
        self.worker_instance_id = worker_instance_id.to_string();
    }
}

#[derive(Clone)]
pub struct ActivityLockStore {
    client: SharedKvClient,
    root: String,
}

impl ActivityLockStore {
    const KIND: &'static str = "activity_locks";

    pub fn new(client: SharedKvClient, root: &str) -> Self {
        Self {
            client,
            root: root.to_string(),
        }
    }

    pub fn key(&self, instance_id: &str, event_id: &str) -> String {
        entity_key(&self.root, Self::KIND, &[instance_id, event_id])
    }

    pub fn get(&self, instance_id: &str, event_id: &str) -> GetOp<ActivityLock> {
        GetOp::new(self.client.clone(), self.key(instance_id, event_id))
    }

    pub fn create(&self, lock: &ActivityLock) -> Result<PutOp, StorageError> {
        PutOp::create(
            self.client.clone(),
            self.key(&lock.instance_id, &lock.event_id),
            lock,
        )
    }

    pub fn update(&self, lock: &ActivityLock) -> Result<PutOp, StorageError> {
        PutOp::update(
            self.client.clone(),
            self.key(&lock.instance_id, &lock.event_id),
            lock,
        )
    }

    pub fn delete(&self, instance_id: &str, event_id: &str) -> DeleteKeyOp {
        DeleteKeyOp::new(self.client.clone(), self.key(instance_id, event_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reassignment_only_within_same_worker() {
        let lock = WorkflowInstanceLock::new("wf", "1", "worker-a", "proc-1");

        assert!(lock.is_held_by("proc-1"));
        assert!(lock.can_be_reassigned_to("worker-a", "proc-2"));
        assert!(!lock.can_be_reassigned_to("worker-a", "proc-1"));
        assert!(!lock.can_be_reassigned_to("worker-b", "proc-3"));
    }

    #[test]
    fn test_activity_lock_reassign() {
        let mut lock = ActivityLock::new("wf", "evt", "worker-a", "proc-1");
        lock.reassign("worker-a", "proc-2");
        assert!(lock.is_held_by("proc-2"));
    }
}
