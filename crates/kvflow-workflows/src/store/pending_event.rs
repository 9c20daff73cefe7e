use kvflow_storage::{
    DeleteKeyOp, DeletePrefixOp, GetPrefixOp, PutOp, SharedKvClient, StorageError,
};
use serde::{Deserialize, Serialize};

use super::{entity_key, entity_prefix, stored_value};
use crate::model::{HistoryEvent, WorkflowInstance};

/// An event waiting in an execution's mailbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingEventRecord {
    pub instance_id: String,
    pub execution_id: String,
    pub event: HistoryEvent,
    #[serde(skip)]
    version: i64,
}

stored_value!(PendingEventRecord);

impl PendingEventRecord {
    pub fn new(instance: &WorkflowInstance, event: HistoryEvent) -> Self {
        Self {
            instance_id: instance.instance_id.clone(),
            execution_id: instance.execution_id.clone(),
            event,
            version: 0,
        }
    }
}

/// Stable sort by event timestamp
pub fn sort_pending_events(events: &mut [PendingEventRecord]) {
    events.sort_by_key(|record| record.event.timestamp);
}

#[derive(Clone)]
pub struct PendingEventStore {
    client: SharedKvClient,
    root: String,
}

impl PendingEventStore {
    const KIND: &'static str = "pending_events";

    pub fn new(client: SharedKvClient, root: &str) -> Self {
        Self {
            client,
            root: root.to_string(),
        }
    }

    pub fn key(&self, instance_id: &str, execution_id: &str, event_id: &str) -> String {
        entity_key(&self.root, Self::KIND, &[instance_id, execution_id, event_id])
    }

    pub fn execution_prefix(&self, instance_id: &str, execution_id: &str) -> String {
        entity_prefix(&self.root, Self::KIND, &[instance_id, execution_id])
    }

    pub fn get_by_execution(
        &self,
        instance_id: &str,
        execution_id: &str,
    ) -> GetPrefixOp<PendingEventRecord> {
        GetPrefixOp::new(
            self.client.clone(),
            self.execution_prefix(instance_id, execution_id),
        )
    }

    /// Events of an execution sorted by timestamp
    pub async fn get_sorted(
        &self,
        instance_id: &str,
        execution_id: &str,
    ) -> Result<Vec<PendingEventRecord>, StorageError> {
        let mut events = self.get_by_execution(instance_id, execution_id).exec().await?;
        sort_pending_events(&mut events);
        Ok(events)
    }

    pub fn create(&self, record: &PendingEventRecord) -> Result<PutOp, StorageError> {
        let key = self.key(&record.instance_id, &record.execution_id, &record.event.id);
        PutOp::create(self.client.clone(), key, record)
    }

    pub fn put(&self, record: &PendingEventRecord) -> Result<PutOp, StorageError> {
        let key = self.key(&record.instance_id, &record.execution_id, &record.event.id);
        PutOp::put(self.client.clone(), key, record)
    }

    pub fn delete(&self, instance_id: &str, execution_id: &str, event_id: &str) -> DeleteKeyOp {
        DeleteKeyOp::new(
            self.client.clone(),
            self.key(instance_id, execution_id, event_id),
        )
    }

    pub fn delete_by_execution(&self, instance_id: &str, execution_id: &str) -> DeletePrefixOp {
        DeletePrefixOp::new(
            self.client.clone(),
            self.execution_prefix(instance_id, execution_id),
        )
    }
}
