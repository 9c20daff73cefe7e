//! Units of work handed to workers

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::event::HistoryEvent;
use super::instance::{Queue, WorkflowInstance, WorkflowInstanceState, WorkflowMetadata};

/// A claimed workflow instance with the events it should apply next
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTask {
    /// Task id (the instance id)
    pub id: String,
    pub instance: WorkflowInstance,
    pub state: WorkflowInstanceState,
    pub queue: Queue,
    pub metadata: WorkflowMetadata,
    /// Sequence id of the last applied history event (0 for a fresh instance)
    pub last_sequence_id: i64,
    /// Visible pending events, oldest first
    pub new_events: Vec<HistoryEvent>,
}

/// A claimed activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityTask {
    pub id: String,
    pub activity_id: String,
    pub queue: Queue,
    /// Execution that scheduled the activity
    pub instance: WorkflowInstance,
    /// The activity-scheduled event
    pub event: HistoryEvent,
}

/// Point-in-time backend statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub active_workflow_instances: i64,
    pub pending_workflow_tasks: BTreeMap<Queue, i64>,
    pub pending_activity_tasks: BTreeMap<Queue, i64>,
}

impl Stats {
    pub fn pending_workflow_tasks_total(&self) -> i64 {
        self.pending_workflow_tasks.values().sum()
    }

    pub fn pending_activity_tasks_total(&self) -> i64 {
        self.pending_activity_tasks.values().sum()
    }
}

/// Options for bulk removal of finished instances
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovalOptions {
    /// Only remove instances finished strictly before this time
    pub finished_before: Option<DateTime<Utc>>,
    /// Instances removed per transaction
    pub batch_size: usize,
}

impl Default for RemovalOptions {
    fn default() -> Self {
        Self {
            finished_before: None,
            batch_size: 100,
        }
    }
}

impl RemovalOptions {
    pub fn with_finished_before(mut self, finished_before: DateTime<Utc>) -> Self {
        self.finished_before = Some(finished_before);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}
