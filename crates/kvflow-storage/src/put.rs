//! Typed writes

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::kv::{Compare, KvOp, SharedKvClient};
use crate::txn::{Txn, TxnOperation};
use crate::value::{encode, StoredValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PutMode {
    /// Unconditional write
    Put,
    /// Only if the key does not exist
    Create,
    /// Only if the stored version equals the value's version
    Update,
}

/// Write a value, optionally scoped to a lease
///
/// The payload is serialized when the op is constructed, so the op owns no
/// reference to the value afterwards.
pub struct PutOp {
    client: SharedKvClient,
    key: String,
    payload: Vec<u8>,
    version: i64,
    ttl: Option<Duration>,
    mode: PutMode,
}

impl PutOp {
    fn build<V: StoredValue>(
        client: SharedKvClient,
        key: impl Into<String>,
        value: &V,
        mode: PutMode,
    ) -> Result<Self, StorageError> {
        let key = key.into();
        let payload = encode(&key, value)?;
        Ok(Self {
            client,
            key,
            payload,
            version: value.version(),
            ttl: None,
            mode,
        })
    }

    /// Unconditional put
    pub fn put<V: StoredValue>(
        client: SharedKvClient,
        key: impl Into<String>,
        value: &V,
    ) -> Result<Self, StorageError> {
        Self::build(client, key, value, PutMode::Put)
    }

    /// Create-only put
    pub fn create<V: StoredValue>(
        client: SharedKvClient,
        key: impl Into<String>,
        value: &V,
    ) -> Result<Self, StorageError> {
        Self::build(client, key, value, PutMode::Create)
    }

    /// Put guarded by the version the value was read at
    pub fn update<V: StoredValue>(
        client: SharedKvClient,
        key: impl Into<String>,
        value: &V,
    ) -> Result<Self, StorageError> {
        Self::build(client, key, value, PutMode::Update)
    }

    /// Attach the key to a fresh lease with this TTL
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Execute on its own
    ///
    /// A failed create reports [`StorageError::AlreadyExists`] and a failed
    /// update reports [`StorageError::ValueVersionMismatch`].
    pub async fn exec(self) -> Result<(), StorageError> {
        let client = self.client.clone();
        let key = self.key.clone();
        let mode = self.mode;
        match Txn::new(client).with_op(self).commit().await {
            Ok(_) => Ok(()),
            Err(StorageError::OperationConstraintViolated) => Err(match mode {
                PutMode::Create => StorageError::AlreadyExists(key),
                PutMode::Update | PutMode::Put => StorageError::ValueVersionMismatch(key),
            }),
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl TxnOperation for PutOp {
    async fn ops(&self) -> Result<Vec<KvOp>, StorageError> {
        let lease = match self.ttl {
            Some(ttl) => Some(self.client.grant_lease(ttl).await?),
            None => None,
        };
        Ok(vec![KvOp::Put {
            key: self.key.clone(),
            value: self.payload.clone(),
            lease,
        }])
    }

    fn cmps(&self) -> Vec<Compare> {
        match self.mode {
            PutMode::Put => vec![],
            PutMode::Create => vec![Compare::not_exists(&self.key)],
            PutMode::Update => vec![Compare::version_eq(&self.key, self.version)],
        }
    }
}
