//! Versioned transactional storage over a consensus-backed key-value store
//!
//! This crate provides typed, optimistic-concurrency primitives:
//!
//! - [`GetOp`], [`GetPrefixOp`], [`GetRangeOp`], [`GetMultipleOp`],
//!   [`ExistsOp`] for reads
//! - [`PutOp`] (put / create-only / version-checked update, optional TTL)
//! - [`DeleteKeyOp`], [`DeletePrefixOp`], [`DeleteValueOp`]
//! - [`Txn`] to commit any mix of the above atomically
//!
//! The store is consumed through [`KvClient`]; [`MemoryKv`] implements it
//! in-process.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use kvflow_storage::{GetOp, MemoryKv, PutOp, SharedKvClient, StoredValue};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Counter {
//!     value: u64,
//!     #[serde(skip)]
//!     version: i64,
//! }
//!
//! impl StoredValue for Counter {
//!     fn version(&self) -> i64 { self.version }
//!     fn set_version(&mut self, version: i64) { self.version = version; }
//! }
//!
//! # async fn demo() -> Result<(), kvflow_storage::StorageError> {
//! let client: SharedKvClient = Arc::new(MemoryKv::new());
//! PutOp::create(client.clone(), "/counter", &Counter { value: 0, version: 0 })?
//!     .exec()
//!     .await?;
//!
//! let mut counter: Counter = GetOp::new(client.clone(), "/counter").exec().await?;
//! counter.value += 1;
//! PutOp::update(client, "/counter", &counter)?.exec().await?;
//! # Ok(())
//! # }
//! ```

pub mod delete;
pub mod error;
pub mod get;
pub mod key;
pub mod kv;
pub mod memory;
pub mod put;
pub mod retry;
pub mod txn;
pub mod value;

pub use delete::{DeleteKeyOp, DeletePrefixOp, DeleteValueOp};
pub use error::StorageError;
pub use get::{ExistsOp, GetMultipleOp, GetOp, GetPrefixOp, GetRangeOp};
pub use kv::{
    Compare, CompareOp, KeyValue, KvClient, KvOp, LeaseId, RangeRequest, RangeResponse,
    SharedKvClient, SortOrder, SortTarget, TxnRequest, TxnResponse,
};
pub use memory::MemoryKv;
pub use put::PutOp;
pub use retry::{retry, with_timeout, RetryPolicy};
pub use txn::{Txn, TxnOperation};
pub use value::{decode_kv, decode_kvs, StoredValue};
