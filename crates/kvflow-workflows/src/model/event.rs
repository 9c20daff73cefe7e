//! History events
//!
//! Every change to a workflow instance is an event. Events wait in the
//! instance's pending mailbox until a workflow task applies them, after
//! which they are appended to the instance's history with a sequence id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::instance::{Queue, WorkflowInstance, WorkflowMetadata};

/// Event payload, tagged by kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventAttributes {
    // =========================================================================
    // Workflow lifecycle
    // =========================================================================
    WorkflowExecutionStarted {
        name: String,
        /// Empty means "the parent's queue" for sub-workflows
        #[serde(default = "Queue::unset")]
        queue: Queue,
        #[serde(default)]
        metadata: WorkflowMetadata,
        #[serde(default)]
        inputs: Vec<serde_json::Value>,
    },

    WorkflowExecutionFinished {
        #[serde(default)]
        result: Option<serde_json::Value>,
        #[serde(default)]
        error: Option<String>,
    },

    WorkflowExecutionContinuedAsNew {
        #[serde(default)]
        inputs: Vec<serde_json::Value>,
    },

    WorkflowExecutionCanceled,

    SignalReceived {
        name: String,
        #[serde(default)]
        arg: Option<serde_json::Value>,
    },

    // =========================================================================
    // Activities
    // =========================================================================
    ActivityScheduled {
        name: String,
        /// Empty means "the workflow's queue"
        #[serde(default = "Queue::unset")]
        queue: Queue,
        #[serde(default)]
        inputs: Vec<serde_json::Value>,
    },

    ActivityCompleted {
        #[serde(default)]
        result: Option<serde_json::Value>,
    },

    ActivityFailed {
        error: String,
    },

    // =========================================================================
    // Timers
    // =========================================================================
    TimerScheduled {
        at: DateTime<Utc>,
    },

    TimerFired {
        at: DateTime<Utc>,
    },

    TimerCanceled,

    // =========================================================================
    // Sub-workflows
    // =========================================================================
    SubWorkflowScheduled {
        sub_workflow_instance: WorkflowInstance,
        name: String,
        #[serde(default)]
        inputs: Vec<serde_json::Value>,
    },

    SubWorkflowCompleted {
        #[serde(default)]
        result: Option<serde_json::Value>,
    },

    SubWorkflowFailed {
        error: String,
    },

    SubWorkflowCancellationRequested {
        sub_workflow_instance: WorkflowInstance,
    },
}

impl EventAttributes {
    /// Stable kind name, matching the serialized tag
    pub fn kind(&self) -> &'static str {
        match self {
            Self::WorkflowExecutionStarted { .. } => "workflow_execution_started",
            Self::WorkflowExecutionFinished { .. } => "workflow_execution_finished",
            Self::WorkflowExecutionContinuedAsNew { .. } => "workflow_execution_continued_as_new",
            Self::WorkflowExecutionCanceled => "workflow_execution_canceled",
            Self::SignalReceived { .. } => "signal_received",
            Self::ActivityScheduled { .. } => "activity_scheduled",
            Self::ActivityCompleted { .. } => "activity_completed",
            Self::ActivityFailed { .. } => "activity_failed",
            Self::TimerScheduled { .. } => "timer_scheduled",
            Self::TimerFired { .. } => "timer_fired",
            Self::TimerCanceled => "timer_canceled",
            Self::SubWorkflowScheduled { .. } => "sub_workflow_scheduled",
            Self::SubWorkflowCompleted { .. } => "sub_workflow_completed",
            Self::SubWorkflowFailed { .. } => "sub_workflow_failed",
            Self::SubWorkflowCancellationRequested { .. } => {
                "sub_workflow_cancellation_requested"
            }
        }
    }

    pub fn starts_execution(&self) -> bool {
        matches!(self, Self::WorkflowExecutionStarted { .. })
    }
}

/// A single event, pending or applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEvent {
    /// Unique event id; doubles as the activity id for scheduled activities
    pub id: String,

    /// Position in the instance's history; 0 until the event is applied
    #[serde(default)]
    pub sequence_id: i64,

    pub timestamp: DateTime<Utc>,

    /// Not delivered to a workflow task before this time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visible_at: Option<DateTime<Utc>>,

    /// Id of the event that scheduled this one (activity, timer, sub-workflow)
    #[serde(default)]
    pub schedule_event_id: i64,

    pub attributes: EventAttributes,
}

impl HistoryEvent {
    pub fn new(attributes: EventAttributes) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            sequence_id: 0,
            timestamp: Utc::now(),
            visible_at: None,
            schedule_event_id: 0,
            attributes,
        }
    }

    pub fn with_sequence_id(mut self, sequence_id: i64) -> Self {
        self.sequence_id = sequence_id;
        self
    }

    pub fn with_visible_at(mut self, visible_at: DateTime<Utc>) -> Self {
        self.visible_at = Some(visible_at);
        self
    }

    pub fn with_schedule_event_id(mut self, schedule_event_id: i64) -> Self {
        self.schedule_event_id = schedule_event_id;
        self
    }

    /// True once `visible_at` is absent or not in the future
    pub fn is_visible_at(&self, now: DateTime<Utc>) -> bool {
        self.visible_at.map_or(true, |at| at <= now)
    }

    pub fn kind(&self) -> &'static str {
        self.attributes.kind()
    }
}

/// An event addressed to another workflow instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub instance: WorkflowInstance,
    pub event: HistoryEvent,
}

impl WorkflowEvent {
    pub fn new(instance: WorkflowInstance, event: HistoryEvent) -> Self {
        Self { instance, event }
    }
}

/// Group events by target execution, preserving first-seen order of targets
/// and the relative order of events within each target
pub fn events_by_instance(
    events: &[WorkflowEvent],
) -> Vec<(&WorkflowInstance, Vec<&WorkflowEvent>)> {
    let mut groups: Vec<(&WorkflowInstance, Vec<&WorkflowEvent>)> = Vec::new();
    for event in events {
        match groups
            .iter_mut()
            .find(|(target, _)| target.same_execution(&event.instance))
        {
            Some((_, group)) => group.push(event),
            None => groups.push((&event.instance, vec![event])),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_event_tag_matches_kind() {
        let event = HistoryEvent::new(EventAttributes::SignalReceived {
            name: "go".into(),
            arg: None,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["attributes"]["type"], event.kind());
    }

    #[test]
    fn test_visibility() {
        let now = Utc::now();
        let event = HistoryEvent::new(EventAttributes::TimerCanceled);
        assert!(event.is_visible_at(now));

        let later = event.clone().with_visible_at(now + Duration::minutes(5));
        assert!(!later.is_visible_at(now));
        assert!(later.is_visible_at(now + Duration::minutes(5)));
    }

    #[test]
    fn test_events_by_instance_keeps_first_seen_order() {
        let a = WorkflowInstance::new("a", "1");
        let b = WorkflowInstance::new("b", "1");
        let signal = |name: &str| {
            HistoryEvent::new(EventAttributes::SignalReceived {
                name: name.into(),
                arg: None,
            })
        };
        let events = vec![
            WorkflowEvent::new(b.clone(), signal("b1")),
            WorkflowEvent::new(a.clone(), signal("a1")),
            WorkflowEvent::new(b.clone(), signal("b2")),
        ];

        let groups = events_by_instance(&events);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, &b);
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].0, &a);
    }

    #[test]
    fn test_starts_execution() {
        let start = EventAttributes::WorkflowExecutionStarted {
            name: "wf".into(),
            queue: Queue::default(),
            metadata: WorkflowMetadata::new(),
            inputs: vec![],
        };
        assert!(start.starts_execution());
        assert!(!EventAttributes::TimerCanceled.starts_execution());
    }
}
