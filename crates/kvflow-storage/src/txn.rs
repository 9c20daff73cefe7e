//! Transaction coordinator
//!
//! Every mutating storage operation is a [`TxnOperation`]: the store ops it
//! needs plus the compares that must hold at commit time. [`Txn`] batches any
//! number of them into a single store transaction.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::error::StorageError;
use crate::kv::{Compare, KvOp, SharedKvClient, TxnRequest, TxnResponse};
use crate::retry::{retry, RetryPolicy};

/// A unit of work that can be committed as part of a transaction
#[async_trait]
pub trait TxnOperation: Send + Sync {
    /// Store ops to apply; async because a TTL requires granting a lease
    async fn ops(&self) -> Result<Vec<KvOp>, StorageError>;

    /// Conditions that must hold for the transaction to apply
    fn cmps(&self) -> Vec<Compare>;
}

#[async_trait]
impl<T: TxnOperation + ?Sized> TxnOperation for Box<T> {
    async fn ops(&self) -> Result<Vec<KvOp>, StorageError> {
        (**self).ops().await
    }

    fn cmps(&self) -> Vec<Compare> {
        (**self).cmps()
    }
}

/// Atomic batch of operations
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use kvflow_storage::{DeleteKeyOp, MemoryKv, SharedKvClient, Txn};
///
/// # async fn demo() -> Result<(), kvflow_storage::StorageError> {
/// let client: SharedKvClient = Arc::new(MemoryKv::new());
/// Txn::new(client.clone())
///     .with_op(DeleteKeyOp::new(client.clone(), "/a"))
///     .with_op(DeleteKeyOp::new(client, "/b"))
///     .commit()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct Txn {
    client: SharedKvClient,
    ops: Vec<Box<dyn TxnOperation>>,
    retry: Option<RetryPolicy>,
}

impl Txn {
    pub fn new(client: SharedKvClient) -> Self {
        Self {
            client,
            ops: Vec::new(),
            retry: None,
        }
    }

    /// Retry transient store failures with `policy`
    pub fn with_retry(mut self, policy: Option<RetryPolicy>) -> Self {
        self.retry = policy;
        self
    }

    pub fn with_op(mut self, op: impl TxnOperation + 'static) -> Self {
        self.add(op);
        self
    }

    pub fn add(&mut self, op: impl TxnOperation + 'static) {
        self.ops.push(Box::new(op));
    }

    pub fn add_boxed(&mut self, op: Box<dyn TxnOperation>) {
        self.ops.push(op);
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Commit every operation atomically
    ///
    /// Fails with [`StorageError::DuplicateKeysInTransaction`] before
    /// touching the store if two ops write the same key, and with
    /// [`StorageError::OperationConstraintViolated`] if any compare does not
    /// hold. In both cases nothing is written.
    pub async fn commit(self) -> Result<TxnResponse, StorageError> {
        if self.ops.is_empty() {
            return Ok(TxnResponse {
                succeeded: true,
                ..Default::default()
            });
        }

        let mut request = TxnRequest::default();
        for op in &self.ops {
            request.compares.extend(op.cmps());
            request.success.extend(op.ops().await?);
        }

        check_duplicate_keys(&request.success)?;

        trace!(
            compares = request.compares.len(),
            ops = request.success.len(),
            "committing transaction"
        );

        let client = self.client;
        let response = match &self.retry {
            Some(policy) => retry(policy, || client.txn(request.clone())).await?,
            None => client.txn(request).await?,
        };

        if !response.succeeded {
            debug!("transaction compares not satisfied");
            return Err(StorageError::OperationConstraintViolated);
        }
        Ok(response)
    }
}

fn check_duplicate_keys(ops: &[KvOp]) -> Result<(), StorageError> {
    let mut order: Vec<&str> = Vec::new();
    let mut by_key: HashMap<&str, Vec<&KvOp>> = HashMap::new();
    for op in ops {
        let entry = by_key.entry(op.key()).or_default();
        if entry.is_empty() {
            order.push(op.key());
        }
        entry.push(op);
    }

    let duplicates: Vec<String> = order
        .into_iter()
        .filter_map(|key| by_key.get(key).filter(|ops| ops.len() > 1))
        .flatten()
        .map(|op| format!("{} {}", op.action(), op.key()))
        .collect();

    if duplicates.is_empty() {
        Ok(())
    } else {
        Err(StorageError::DuplicateKeysInTransaction(duplicates))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(key: &str) -> KvOp {
        KvOp::Put {
            key: key.to_string(),
            value: vec![],
            lease: None,
        }
    }

    #[test]
    fn test_duplicate_keys_grouped_by_key() {
        let ops = vec![
            put("/a"),
            put("/b"),
            KvOp::Delete {
                key: "/a".to_string(),
            },
        ];

        match check_duplicate_keys(&ops) {
            Err(StorageError::DuplicateKeysInTransaction(keys)) => {
                assert_eq!(keys, vec!["put /a".to_string(), "delete /a".to_string()]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_distinct_keys_pass() {
        assert!(check_duplicate_keys(&[put("/a"), put("/b")]).is_ok());
    }
}
