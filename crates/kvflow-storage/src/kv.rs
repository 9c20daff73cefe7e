//! Consensus store contract
//!
//! The subset of an etcd-style API the storage layer relies on:
//! linearizable range reads, compare-guarded multi-op transactions and
//! lease-scoped keys. Every committed transaction advances a single store
//! revision; each key tracks its own `version` (number of writes since it
//! was created, 0 when absent).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StorageError;

/// Lease identifier returned by [`KvClient::grant_lease`]
pub type LeaseId = i64;

/// Shared handle to a consensus store client
pub type SharedKvClient = Arc<dyn KvClient>;

/// A stored key with its metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: Vec<u8>,
    /// Store revision at which the key was created
    pub create_revision: i64,
    /// Store revision of the last write to the key
    pub mod_revision: i64,
    /// Number of writes since creation (1 after the first put)
    pub version: i64,
    pub lease: Option<LeaseId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortTarget {
    Key,
    CreateRevision,
    ModRevision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascend,
    Descend,
}

/// Range read request
///
/// With `range_end` unset only `key` itself is read; otherwise every key in
/// `[key, range_end)`.
#[derive(Debug, Clone, Default)]
pub struct RangeRequest {
    pub key: String,
    pub range_end: Option<String>,
    pub limit: Option<usize>,
    pub sort: Option<(SortTarget, SortOrder)>,
    pub count_only: bool,
}

impl RangeRequest {
    /// Read a single key
    pub fn key(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    /// Read every key starting with `prefix`
    pub fn prefix(prefix: impl Into<String>) -> Self {
        let key = prefix.into();
        let range_end = prefix_end(&key);
        Self {
            key,
            range_end: Some(range_end),
            ..Default::default()
        }
    }

    /// Read every key in `[start, end)`
    pub fn range(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            key: start.into(),
            range_end: Some(end.into()),
            ..Default::default()
        }
    }

    pub fn with_sort(mut self, target: SortTarget, order: SortOrder) -> Self {
        self.sort = Some((target, order));
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn count_only(mut self) -> Self {
        self.count_only = true;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct RangeResponse {
    /// Matching keys; empty for count-only requests
    pub kvs: Vec<KeyValue>,
    /// Number of matching keys before `limit` was applied
    pub count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    NotEqual,
    Greater,
    Less,
}

/// A condition on a key's version evaluated at commit time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compare {
    pub key: String,
    pub op: CompareOp,
    pub version: i64,
}

impl Compare {
    pub fn version(key: impl Into<String>, op: CompareOp, version: i64) -> Self {
        Self {
            key: key.into(),
            op,
            version,
        }
    }

    /// Key's version equals `version` (0 means "does not exist")
    pub fn version_eq(key: impl Into<String>, version: i64) -> Self {
        Self::version(key, CompareOp::Equal, version)
    }

    pub fn not_exists(key: impl Into<String>) -> Self {
        Self::version_eq(key, 0)
    }

    pub fn exists(key: impl Into<String>) -> Self {
        Self::version(key, CompareOp::Greater, 0)
    }

    /// Evaluate against the key's current version
    pub fn holds(&self, current: i64) -> bool {
        match self.op {
            CompareOp::Equal => current == self.version,
            CompareOp::NotEqual => current != self.version,
            CompareOp::Greater => current > self.version,
            CompareOp::Less => current < self.version,
        }
    }
}

/// A single write inside a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvOp {
    Put {
        key: String,
        value: Vec<u8>,
        lease: Option<LeaseId>,
    },
    Delete {
        key: String,
    },
    DeletePrefix {
        prefix: String,
    },
}

impl KvOp {
    /// Key (or prefix) the op writes
    pub fn key(&self) -> &str {
        match self {
            Self::Put { key, .. } | Self::Delete { key } => key,
            Self::DeletePrefix { prefix } => prefix,
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            Self::Put { .. } => "put",
            Self::Delete { .. } => "delete",
            Self::DeletePrefix { .. } => "delete prefix",
        }
    }
}

/// Compare-guarded transaction: every op in `success` is applied iff every
/// compare holds
#[derive(Debug, Clone, Default)]
pub struct TxnRequest {
    pub compares: Vec<Compare>,
    pub success: Vec<KvOp>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpResponse {
    Put,
    Delete { deleted: i64 },
}

#[derive(Debug, Clone, Default)]
pub struct TxnResponse {
    pub succeeded: bool,
    /// Store revision after the transaction
    pub revision: i64,
    /// One response per op when `succeeded`
    pub responses: Vec<OpResponse>,
}

impl TxnResponse {
    /// Total number of keys removed by delete ops
    pub fn deleted(&self) -> i64 {
        self.responses
            .iter()
            .map(|r| match r {
                OpResponse::Delete { deleted } => *deleted,
                OpResponse::Put => 0,
            })
            .sum()
    }
}

/// Client for a linearizable consensus-backed key-value store
///
/// Implementations must be safe to share between any number of concurrent
/// workers. A key attached to a lease must disappear once the lease's TTL
/// elapses; this is the only crash-recovery mechanism the workflow backend
/// relies on.
#[async_trait]
pub trait KvClient: Send + Sync + 'static {
    /// Linearizable range read
    async fn range(&self, request: RangeRequest) -> Result<RangeResponse, StorageError>;

    /// Atomic compare-and-apply transaction
    async fn txn(&self, request: TxnRequest) -> Result<TxnResponse, StorageError>;

    /// Grant a lease that expires after `ttl`
    async fn grant_lease(&self, ttl: Duration) -> Result<LeaseId, StorageError>;

    /// Revoke a lease, deleting every key attached to it
    async fn revoke_lease(&self, lease: LeaseId) -> Result<(), StorageError>;
}

/// Smallest key strictly greater than every key starting with `prefix`
///
/// Returns an empty string (no upper bound) when no such key exists.
pub fn prefix_end(prefix: &str) -> String {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        if let Some(next) = next_char(last) {
            chars.push(next);
            return chars.into_iter().collect();
        }
    }
    String::new()
}

fn next_char(c: char) -> Option<char> {
    let mut code = c as u32 + 1;
    // Skip the surrogate gap
    if (0xD800..=0xDFFF).contains(&code) {
        code = 0xE000;
    }
    char::from_u32(code)
}
