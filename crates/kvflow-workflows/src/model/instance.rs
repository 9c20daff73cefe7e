//! Workflow instance identity and lifecycle state

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Free-form metadata carried from the start event to the instance record
/// and its queue item
pub type WorkflowMetadata = BTreeMap<String, String>;

/// Parent link of a sub-workflow
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParentInstance {
    pub instance_id: String,
    pub execution_id: String,
    /// Event id of the sub-workflow-scheduled event in the parent
    pub event_id: i64,
}

/// One execution of a workflow instance
///
/// An instance id stays stable across continue-as-new; every continuation
/// gets a fresh execution id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub instance_id: String,
    pub execution_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<ParentInstance>,
}

impl WorkflowInstance {
    pub fn new(instance_id: impl Into<String>, execution_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            execution_id: execution_id.into(),
            parent: None,
        }
    }

    /// New instance with a random execution id
    pub fn start(instance_id: impl Into<String>) -> Self {
        Self::new(instance_id, uuid::Uuid::new_v4().to_string())
    }

    pub fn with_parent(mut self, parent: ParentInstance) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Same instance, next execution (continue-as-new)
    pub fn continued(&self) -> Self {
        Self {
            instance_id: self.instance_id.clone(),
            execution_id: uuid::Uuid::new_v4().to_string(),
            parent: self.parent.clone(),
        }
    }

    pub fn is_sub_workflow(&self) -> bool {
        self.parent.is_some()
    }

    /// Compare by instance and execution id only
    pub fn same_execution(&self, other: &WorkflowInstance) -> bool {
        self.instance_id == other.instance_id && self.execution_id == other.execution_id
    }
}

impl fmt::Display for WorkflowInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.instance_id, self.execution_id)
    }
}

/// Lifecycle state of an instance execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowInstanceState {
    #[default]
    Active,
    ContinuedAsNew,
    Finished,
}

impl WorkflowInstanceState {
    /// Finished or continued-as-new
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Active => false,
            Self::ContinuedAsNew | Self::Finished => true,
        }
    }
}

impl fmt::Display for WorkflowInstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::ContinuedAsNew => write!(f, "continued_as_new"),
            Self::Finished => write!(f, "finished"),
        }
    }
}

/// Dispatch queue name
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Queue(String);

impl Queue {
    pub const DEFAULT: &'static str = "default";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Empty queue name, resolved to a fallback by [`Queue::or`]
    pub fn unset() -> Self {
        Self(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `self`, or `fallback` when no queue was named
    pub fn or(&self, fallback: &Queue) -> Queue {
        if self.is_empty() {
            fallback.clone()
        } else {
            self.clone()
        }
    }
}

impl Default for Queue {
    fn default() -> Self {
        Self::new(Self::DEFAULT)
    }
}

impl fmt::Display for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Queue {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Queue {
    fn from(name: String) -> Self {
        Self(name)
    }
}
