use kvflow_storage::{
    DeletePrefixOp, GetPrefixOp, GetRangeOp, PutOp, SharedKvClient, SortOrder, SortTarget,
    StorageError,
};
use serde::{Deserialize, Serialize};

use super::{entity_key, entity_prefix, stored_value};
use crate::model::{HistoryEvent, WorkflowInstance};

/// An applied event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEventRecord {
    pub instance_id: String,
    pub execution_id: String,
    pub event: HistoryEvent,
    #[serde(skip)]
    version: i64,
}

stored_value!(HistoryEventRecord);

impl HistoryEventRecord {
    pub fn new(instance: &WorkflowInstance, event: HistoryEvent) -> Self {
        Self {
            instance_id: instance.instance_id.clone(),
            execution_id: instance.execution_id.clone(),
            event,
            version: 0,
        }
    }
}

#[derive(Clone)]
pub struct HistoryEventStore {
    client: SharedKvClient,
    root: String,
}

impl HistoryEventStore {
    const KIND: &'static str = "history_events";

    pub fn new(client: SharedKvClient, root: &str) -> Self {
        Self {
            client,
            root: root.to_string(),
        }
    }

    /// Sequence ids are zero padded so key order equals sequence order
    pub fn key(&self, instance_id: &str, execution_id: &str, sequence_id: i64) -> String {
        let sequence = format!("{sequence_id:020}");
        entity_key(&self.root, Self::KIND, &[instance_id, execution_id, &sequence])
    }

    pub fn execution_prefix(&self, instance_id: &str, execution_id: &str) -> String {
        entity_prefix(&self.root, Self::KIND, &[instance_id, execution_id])
    }

    /// Events with a sequence id greater than `last_sequence_id`, in order
    ///
    /// `None` reads the whole history.
    pub async fn get_after_sequence_id(
        &self,
        instance_id: &str,
        execution_id: &str,
        last_sequence_id: Option<i64>,
    ) -> Result<Vec<HistoryEventRecord>, StorageError> {
        let prefix = self.execution_prefix(instance_id, execution_id);
        let start = match last_sequence_id {
            Some(last) => self.key(instance_id, execution_id, last.saturating_add(1)),
            None => prefix.clone(),
        };
        let end = kvflow_storage::kv::prefix_end(&prefix);
        GetRangeOp::new(self.client.clone(), start, end).exec().await
    }

    /// Highest applied sequence id, 0 for an empty history
    pub async fn get_last_sequence_id(
        &self,
        instance_id: &str,
        execution_id: &str,
    ) -> Result<i64, StorageError> {
        let last: Vec<HistoryEventRecord> = GetPrefixOp::new(
            self.client.clone(),
            self.execution_prefix(instance_id, execution_id),
        )
        .with_sort(SortTarget::Key, SortOrder::Descend)
        .with_limit(1)
        .exec()
        .await?;
        Ok(last.first().map_or(0, |record| record.event.sequence_id))
    }

    /// Create-only: a sequence id can be written once
    pub fn create(&self, record: &HistoryEventRecord) -> Result<PutOp, StorageError> {
        let key = self.key(
            &record.instance_id,
            &record.execution_id,
            record.event.sequence_id,
        );
        PutOp::create(self.client.clone(), key, record)
    }

    pub fn delete_by_execution(&self, instance_id: &str, execution_id: &str) -> DeletePrefixOp {
        DeletePrefixOp::new(
            self.client.clone(),
            self.execution_prefix(instance_id, execution_id),
        )
    }
}
