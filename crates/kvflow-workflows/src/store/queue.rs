use chrono::{DateTime, Utc};
use kvflow_storage::{DeleteKeyOp, GetOp, GetPrefixOp, PutOp, SharedKvClient, StorageError};
use serde::{Deserialize, Serialize};

use super::{entity_key, entity_prefix, stored_value};
use crate::model::{
    HistoryEvent, Queue, WorkflowInstance, WorkflowInstanceState, WorkflowMetadata,
};

/// Dispatch entry of an active workflow execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowQueueItem {
    pub instance: WorkflowInstance,
    pub queue: Queue,
    #[serde(default)]
    pub metadata: WorkflowMetadata,
    pub state: WorkflowInstanceState,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_locked: Option<DateTime<Utc>>,
    #[serde(skip)]
    version: i64,
}

stored_value!(WorkflowQueueItem);

impl WorkflowQueueItem {
    pub fn new(instance: WorkflowInstance, queue: Queue, metadata: WorkflowMetadata) -> Self {
        Self {
            instance,
            queue,
            metadata,
            state: WorkflowInstanceState::Active,
            created_at: Utc::now(),
            last_locked: None,
            version: 0,
        }
    }

    /// Touch the item so a version-checked write proves it still exists
    pub fn update_last_locked(&mut self) {
        self.last_locked = Some(Utc::now());
    }
}

#[derive(Clone)]
pub struct WorkflowQueueItemStore {
    client: SharedKvClient,
    root: String,
}

impl WorkflowQueueItemStore {
    const KIND: &'static str = "workflow_queue_items";

    pub fn new(client: SharedKvClient, root: &str) -> Self {
        Self {
            client,
            root: root.to_string(),
        }
    }

    pub fn key(&self, queue: &Queue, instance_id: &str, execution_id: &str) -> String {
        entity_key(
            &self.root,
            Self::KIND,
            &[queue.as_str(), instance_id, execution_id],
        )
    }

    pub fn get(
        &self,
        queue: &Queue,
        instance_id: &str,
        execution_id: &str,
    ) -> GetOp<WorkflowQueueItem> {
        GetOp::new(self.client.clone(), self.key(queue, instance_id, execution_id))
    }

    /// Items of one queue in key order
    pub fn get_by_queue(&self, queue: &Queue) -> GetPrefixOp<WorkflowQueueItem> {
        GetPrefixOp::new(
            self.client.clone(),
            entity_prefix(&self.root, Self::KIND, &[queue.as_str()]),
        )
    }

    pub fn get_all(&self) -> GetPrefixOp<WorkflowQueueItem> {
        GetPrefixOp::new(
            self.client.clone(),
            entity_prefix(&self.root, Self::KIND, &[]),
        )
    }

    fn item_key(&self, item: &WorkflowQueueItem) -> String {
        self.key(
            &item.queue,
            &item.instance.instance_id,
            &item.instance.execution_id,
        )
    }

    pub fn create(&self, item: &WorkflowQueueItem) -> Result<PutOp, StorageError> {
        PutOp::create(self.client.clone(), self.item_key(item), item)
    }

    pub fn update(&self, item: &WorkflowQueueItem) -> Result<PutOp, StorageError> {
        PutOp::update(self.client.clone(), self.item_key(item), item)
    }

    pub fn delete(&self, queue: &Queue, instance_id: &str, execution_id: &str) -> DeleteKeyOp {
        DeleteKeyOp::new(self.client.clone(), self.key(queue, instance_id, execution_id))
    }
}

/// Dispatch entry of a scheduled activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityQueueItem {
    pub instance_id: String,
    pub execution_id: String,
    pub queue: Queue,
    /// The activity-scheduled event; its id is the activity id
    pub event: HistoryEvent,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_locked: Option<DateTime<Utc>>,
    #[serde(skip)]
    version: i64,
}

stored_value!(ActivityQueueItem);

impl ActivityQueueItem {
    pub fn new(instance: &WorkflowInstance, queue: Queue, event: HistoryEvent) -> Self {
        Self {
            instance_id: instance.instance_id.clone(),
            execution_id: instance.execution_id.clone(),
            queue,
            event,
            created_at: Utc::now(),
            last_locked: None,
            version: 0,
        }
    }

    pub fn instance(&self) -> WorkflowInstance {
        WorkflowInstance::new(&self.instance_id, &self.execution_id)
    }

    pub fn update_last_locked(&mut self) {
        self.last_locked = Some(Utc::now());
    }
}

#[derive(Clone)]
pub struct ActivityQueueItemStore {
    client: SharedKvClient,
    root: String,
}

impl ActivityQueueItemStore {
    const KIND: &'static str = "activity_queue_items";

    pub fn new(client: SharedKvClient, root: &str) -> Self {
        Self {
            client,
            root: root.to_string(),
        }
    }

    pub fn key(&self, queue: &Queue, instance_id: &str, event_id: &str) -> String {
        entity_key(
            &self.root,
            Self::KIND,
            &[queue.as_str(), instance_id, event_id],
        )
    }

    pub fn get(
        &self,
        queue: &Queue,
        instance_id: &str,
        event_id: &str,
    ) -> GetOp<ActivityQueueItem> {
        GetOp::new(self.client.clone(), self.key(queue, instance_id, event_id))
    }

    pub fn get_by_queue(&self, queue: &Queue) -> GetPrefixOp<ActivityQueueItem> {
        GetPrefixOp::new(
            self.client.clone(),
            entity_prefix(&self.root, Self::KIND, &[queue.as_str()]),
        )
    }

    pub fn get_all(&self) -> GetPrefixOp<ActivityQueueItem> {
        GetPrefixOp::new(
            self.client.clone(),
            entity_prefix(&self.root, Self::KIND, &[]),
        )
    }

    fn item_key(&self, item: &ActivityQueueItem) -> String {
        self.key(&item.queue, &item.instance_id, &item.event.id)
    }

    pub fn create(&self, item: &ActivityQueueItem) -> Result<PutOp, StorageError> {
        PutOp::create(self.client.clone(), self.item_key(item), item)
    }

    pub fn update(&self, item: &ActivityQueueItem) -> Result<PutOp, StorageError> {
        PutOp::update(self.client.clone(), self.item_key(item), item)
    }

    pub fn delete(&self, queue: &Queue, instance_id: &str, event_id: &str) -> DeleteKeyOp {
        DeleteKeyOp::new(self.client.clone(), self.key(queue, instance_id, event_id))
    }
}
