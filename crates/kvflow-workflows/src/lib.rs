//! # Workflow Backend on a Consensus Store
//!
//! Durable storage and dispatch for a workflow engine, built entirely on
//! the versioned key-value contract of `kvflow-storage`.
//!
//! ## Features
//!
//! - **Instance lifecycle**: at most one active execution per instance id
//! - **Work stealing**: any worker may claim any unlocked queue item
//! - **Leased locks**: a crashed worker's claims expire with their TTL
//! - **Sticky routing**: instances return to the worker that last ran them
//! - **Atomic completion**: history, timers, activities and cross-instance
//!   events commit in one transaction
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 WorkflowBackend (Backend)                │
//! │   lifecycle · dispatch · completion · stats · diagnostics│
//! └──────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                          Store                           │
//! │  instances, pending events, queue items, locks, history  │
//! └──────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                 KvClient (kvflow-storage)                │
//! │     versioned keys, leases, compare-guarded txns         │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use kvflow_storage::MemoryKv;
//! use kvflow_workflows::prelude::*;
//!
//! # tokio_test_block_on(async {
//! let backend = Backend::new(Arc::new(MemoryKv::new()), BackendOptions::new("cp", "worker-1"));
//!
//! let instance = WorkflowInstance::start("order-42");
//! let start = HistoryEvent::new(EventAttributes::WorkflowExecutionStarted {
//!     name: "ship_order".into(),
//!     queue: Queue::default(),
//!     metadata: Default::default(),
//!     inputs: vec![],
//! });
//! backend.create_workflow_instance(&instance, &start).await.unwrap();
//!
//! let task = backend.get_workflow_task(&[Queue::default()]).await.unwrap();
//! assert!(task.is_some());
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod model;
pub mod poller;
pub mod store;

pub use backend::{
    Backend, DiagnosticsBackend, WorkflowBackend, WorkflowInstanceRef, WorkflowInstanceTree,
};
pub use config::{BackendOptions, ConfigError};
pub use error::BackendError;
pub use poller::{PollerConfig, PollerError, TaskPoller};

/// Prelude for common imports
pub mod prelude {
    pub use crate::backend::{Backend, DiagnosticsBackend, WorkflowBackend};
    pub use crate::config::BackendOptions;
    pub use crate::error::BackendError;
    pub use crate::model::{
        ActivityTask, EventAttributes, HistoryEvent, ParentInstance, Queue, RemovalOptions,
        Stats, WorkflowEvent, WorkflowInstance, WorkflowInstanceState, WorkflowTask,
    };
    pub use crate::poller::{PollerConfig, TaskPoller};
}
