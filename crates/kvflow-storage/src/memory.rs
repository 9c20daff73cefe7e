//! In-memory implementation of KvClient
//!
//! Provides the same revision, version and lease semantics as the
//! production consensus store so the engine's concurrency behaviour can be
//! exercised without one. Lease expiry is evaluated against
//! `tokio::time::Instant`, which lets tests drive TTLs with a paused clock.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::trace;

use crate::error::StorageError;
use crate::kv::{
    KeyValue, KvClient, KvOp, LeaseId, OpResponse, RangeRequest, RangeResponse, SortOrder,
    SortTarget, TxnRequest, TxnResponse,
};

struct Entry {
    value: Vec<u8>,
    create_revision: i64,
    mod_revision: i64,
    version: i64,
    lease: Option<LeaseId>,
}

struct Lease {
    expires_at: Instant,
}

#[derive(Default)]
struct State {
    revision: i64,
    next_lease: LeaseId,
    data: BTreeMap<String, Entry>,
    leases: HashMap<LeaseId, Lease>,
}

impl State {
    /// Drop expired leases and every key still attached to them
    fn expire_leases(&mut self, now: Instant) {
        let expired: HashSet<LeaseId> = self
            .leases
            .iter()
            .filter(|(_, lease)| lease.expires_at <= now)
            .map(|(id, _)| *id)
            .collect();
        if expired.is_empty() {
            return;
        }
        for id in &expired {
            self.leases.remove(id);
        }
        self.remove_keys_with_leases(&expired);
    }

    fn remove_keys_with_leases(&mut self, leases: &HashSet<LeaseId>) {
        let before = self.data.len();
        self.data
            .retain(|_, entry| !entry.lease.is_some_and(|id| leases.contains(&id)));
        let removed = before - self.data.len();
        if removed > 0 {
            self.revision += 1;
            trace!(removed, revision = self.revision, "expired leased keys");
        }
    }

    fn version_of(&self, key: &str) -> i64 {
        self.data.get(key).map_or(0, |e| e.version)
    }

    fn to_key_value(key: &str, entry: &Entry) -> KeyValue {
        KeyValue {
            key: key.to_string(),
            value: entry.value.clone(),
            create_revision: entry.create_revision,
            mod_revision: entry.mod_revision,
            version: entry.version,
            lease: entry.lease,
        }
    }
}

/// In-memory consensus store
///
/// # Example
///
/// ```
/// use kvflow_storage::MemoryKv;
///
/// let kv = MemoryKv::new();
/// assert_eq!(kv.key_count(), 0);
/// ```
#[derive(Default)]
pub struct MemoryKv {
    state: Mutex<State>,
    fail_next: AtomicUsize,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys
    pub fn key_count(&self) -> usize {
        let mut state = self.state.lock();
        state.expire_leases(Instant::now());
        state.data.len()
    }

    /// All live keys in order (for debugging and tests)
    pub fn keys(&self) -> Vec<String> {
        let mut state = self.state.lock();
        state.expire_leases(Instant::now());
        state.data.keys().cloned().collect()
    }

    /// Current store revision
    pub fn revision(&self) -> i64 {
        self.state.lock().revision
    }

    /// Make the next `n` calls fail with [`StorageError::Unavailable`]
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StorageError> {
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match injected {
            Ok(_) => Err(StorageError::Unavailable("injected failure".to_string())),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl KvClient for MemoryKv {
    async fn range(&self, request: RangeRequest) -> Result<RangeResponse, StorageError> {
        self.check_available()?;
        let mut state = self.state.lock();
        state.expire_leases(Instant::now());

        let mut kvs: Vec<KeyValue> = match &request.range_end {
            None => state
                .data
                .get(&request.key)
                .map(|entry| State::to_key_value(&request.key, entry))
                .into_iter()
                .collect(),
            Some(end) => {
                let upper = if end.is_empty() {
                    Bound::Unbounded
                } else {
                    Bound::Excluded(end.clone())
                };
                state
                    .data
                    .range((Bound::Included(request.key.clone()), upper))
                    .map(|(key, entry)| State::to_key_value(key, entry))
                    .collect()
            }
        };

        if let Some((target, order)) = request.sort {
            match target {
                SortTarget::Key => {}
                SortTarget::CreateRevision => kvs.sort_by_key(|kv| kv.create_revision),
                SortTarget::ModRevision => kvs.sort_by_key(|kv| kv.mod_revision),
            }
            if order == SortOrder::Descend {
                kvs.reverse();
            }
        }

        let count = kvs.len();
        if request.count_only {
            kvs.clear();
        } else if let Some(limit) = request.limit {
            kvs.truncate(limit);
        }

        Ok(RangeResponse { kvs, count })
    }

    async fn txn(&self, request: TxnRequest) -> Result<TxnResponse, StorageError> {
        self.check_available()?;
        let mut state = self.state.lock();
        state.expire_leases(Instant::now());

        let succeeded = request
            .compares
            .iter()
            .all(|cmp| cmp.holds(state.version_of(&cmp.key)));
        if !succeeded {
            return Ok(TxnResponse {
                succeeded: false,
                revision: state.revision,
                responses: vec![],
            });
        }

        // Validate leases before touching anything so a failed txn leaves no trace
        for op in &request.success {
            if let KvOp::Put {
                lease: Some(lease), ..
            } = op
            {
                if !state.leases.contains_key(lease) {
                    return Err(StorageError::LeaseNotFound(*lease));
                }
            }
        }

        if request.success.is_empty() {
            return Ok(TxnResponse {
                succeeded: true,
                revision: state.revision,
                responses: vec![],
            });
        }

        state.revision += 1;
        let revision = state.revision;
        let mut responses = Vec::with_capacity(request.success.len());
        for op in request.success {
            match op {
                KvOp::Put { key, value, lease } => {
                    match state.data.get_mut(&key) {
                        Some(entry) => {
                            entry.value = value;
                            entry.mod_revision = revision;
                            entry.version += 1;
                            entry.lease = lease;
                        }
                        None => {
                            state.data.insert(
                                key,
                                Entry {
                                    value,
                                    create_revision: revision,
                                    mod_revision: revision,
                                    version: 1,
                                    lease,
                                },
                            );
                        }
                    }
                    responses.push(OpResponse::Put);
                }
                KvOp::Delete { key } => {
                    let deleted = i64::from(state.data.remove(&key).is_some());
                    responses.push(OpResponse::Delete { deleted });
                }
                KvOp::DeletePrefix { prefix } => {
                    let before = state.data.len();
                    state.data.retain(|key, _| !key.starts_with(&prefix));
                    let deleted = (before - state.data.len()) as i64;
                    responses.push(OpResponse::Delete { deleted });
                }
            }
        }

        Ok(TxnResponse {
            succeeded: true,
            revision,
            responses,
        })
    }

    async fn grant_lease(&self, ttl: Duration) -> Result<LeaseId, StorageError> {
        self.check_available()?;
        let mut state = self.state.lock();
        let now = Instant::now();
        state.expire_leases(now);
        state.next_lease += 1;
        let id = state.next_lease;
        state.leases.insert(
            id,
            Lease {
                expires_at: now + ttl,
            },
        );
        Ok(id)
    }

    async fn revoke_lease(&self, lease: LeaseId) -> Result<(), StorageError> {
        self.check_available()?;
        let mut state = self.state.lock();
        state.expire_leases(Instant::now());
        if state.leases.remove(&lease).is_none() {
            return Err(StorageError::LeaseNotFound(lease));
        }
        state.remove_keys_with_leases(&HashSet::from([lease]));
        Ok(())
    }
}
