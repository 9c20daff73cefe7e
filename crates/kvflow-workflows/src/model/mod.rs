//! Domain types shared by the stores and the backend

mod event;
mod instance;
mod task;

pub use event::{events_by_instance, EventAttributes, HistoryEvent, WorkflowEvent};
pub use instance::{
    ParentInstance, Queue, WorkflowInstance, WorkflowInstanceState, WorkflowMetadata,
};
pub use task::{ActivityTask, RemovalOptions, Stats, WorkflowTask};
