//! Entity stores
//!
//! One store per persisted entity kind. Each store only knows its key layout
//! under `/{root}/workflows/{kind}/...` and hands out storage operations;
//! committing them (alone or together) is up to the caller.

/// Implements `StoredValue` for a record with a `version: i64` field
macro_rules! stored_value {
    ($ty:ty) => {
        impl kvflow_storage::StoredValue for $ty {
            fn version(&self) -> i64 {
                self.version
            }

            fn set_version(&mut self, version: i64) {
                self.version = version;
            }
        }
    };
}
pub(crate) use stored_value;

mod history;
mod instance;
mod lock;
mod pending_event;
mod queue;

use kvflow_storage::{RetryPolicy, SharedKvClient, Txn};

pub use history::{HistoryEventRecord, HistoryEventStore};
pub use instance::{
    InstanceFence, InstanceFenceStore, WorkflowInstanceRecord, WorkflowInstanceStore,
};
pub use lock::{
    ActivityLock, ActivityLockStore, WorkflowInstanceLock, WorkflowInstanceLockStore,
    WorkflowInstanceSticky, WorkflowInstanceStickyStore,
};
pub use pending_event::{PendingEventRecord, PendingEventStore};
pub use queue::{
    ActivityQueueItem, ActivityQueueItemStore, WorkflowQueueItem, WorkflowQueueItemStore,
};

/// Key under `/{root}/workflows/{kind}/{parts...}`
pub(crate) fn entity_key(root: &str, kind: &str, parts: &[&str]) -> String {
    let mut segments = vec![root, "workflows", kind];
    segments.extend_from_slice(parts);
    kvflow_storage::key::key(&segments)
}

/// Prefix under `/{root}/workflows/{kind}/{parts...}/`
pub(crate) fn entity_prefix(root: &str, kind: &str, parts: &[&str]) -> String {
    let mut segments = vec![root, "workflows", kind];
    segments.extend_from_slice(parts);
    kvflow_storage::key::prefix(&segments)
}

/// All entity stores over one client
#[derive(Clone)]
pub struct Store {
    client: SharedKvClient,
    retry: Option<RetryPolicy>,
    pub instances: WorkflowInstanceStore,
    pub fences: InstanceFenceStore,
    pub pending_events: PendingEventStore,
    pub workflow_queue: WorkflowQueueItemStore,
    pub workflow_locks: WorkflowInstanceLockStore,
    pub stickies: WorkflowInstanceStickyStore,
    pub activity_queue: ActivityQueueItemStore,
    pub activity_locks: ActivityLockStore,
    pub history: HistoryEventStore,
}

impl Store {
    pub fn new(client: SharedKvClient, root: impl Into<String>) -> Self {
        let root = root.into();
        Self {
            instances: WorkflowInstanceStore::new(client.clone(), &root),
            fences: InstanceFenceStore::new(client.clone(), &root),
            pending_events: PendingEventStore::new(client.clone(), &root),
            workflow_queue: WorkflowQueueItemStore::new(client.clone(), &root),
            workflow_locks: WorkflowInstanceLockStore::new(client.clone(), &root),
            stickies: WorkflowInstanceStickyStore::new(client.clone(), &root),
            activity_queue: ActivityQueueItemStore::new(client.clone(), &root),
            activity_locks: ActivityLockStore::new(client.clone(), &root),
            history: HistoryEventStore::new(client.clone(), &root),
            client,
            retry: None,
        }
    }

    /// Retry transient failures of transactions started with [`Store::txn`]
    pub fn with_retry(mut self, policy: Option<RetryPolicy>) -> Self {
        self.retry = policy;
        self
    }

    pub fn client(&self) -> &SharedKvClient {
        &self.client
    }

    /// Empty transaction on this store's client
    pub fn txn(&self) -> Txn {
        Txn::new(self.client.clone()).with_retry(self.retry.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_keys() {
        assert_eq!(
            entity_key("cp", "instances", &["wf-1", "exec-1"]),
            "/cp/workflows/instances/wf-1/exec-1"
        );
        assert_eq!(
            entity_prefix("/cp/", "pending_events", &["wf-1"]),
            "/cp/workflows/pending_events/wf-1/"
        );
        assert_eq!(entity_prefix("", "instances", &[]), "/workflows/instances/");
    }
}
