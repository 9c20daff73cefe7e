//! Typed deletes

use async_trait::async_trait;

use crate::error::StorageError;
use crate::kv::{Compare, KvOp, SharedKvClient};
use crate::txn::{Txn, TxnOperation};
use crate::value::StoredValue;

/// Delete a single key unconditionally
pub struct DeleteKeyOp {
    client: SharedKvClient,
    key: String,
}

impl DeleteKeyOp {
    pub fn new(client: SharedKvClient, key: impl Into<String>) -> Self {
        Self {
            client,
            key: key.into(),
        }
    }

    /// Returns the number of keys removed (0 or 1)
    pub async fn exec(self) -> Result<i64, StorageError> {
        let client = self.client.clone();
        let resp = Txn::new(client).with_op(self).commit().await?;
        Ok(resp.deleted())
    }
}

#[async_trait]
impl TxnOperation for DeleteKeyOp {
    async fn ops(&self) -> Result<Vec<KvOp>, StorageError> {
        Ok(vec![KvOp::Delete {
            key: self.key.clone(),
        }])
    }

    fn cmps(&self) -> Vec<Compare> {
        vec![]
    }
}

/// Delete every key under a prefix
pub struct DeletePrefixOp {
    client: SharedKvClient,
    prefix: String,
}

impl DeletePrefixOp {
    /// A trailing `/` is appended to `prefix` when missing
    pub fn new(client: SharedKvClient, prefix: impl Into<String>) -> Self {
        let mut prefix = prefix.into();
        if !prefix.ends_with('/') {
            prefix.push('/');
        }
        Self { client, prefix }
    }

    /// Returns the number of keys removed
    pub async fn exec(self) -> Result<i64, StorageError> {
        let client = self.client.clone();
        let resp = Txn::new(client).with_op(self).commit().await?;
        Ok(resp.deleted())
    }
}

#[async_trait]
impl TxnOperation for DeletePrefixOp {
    async fn ops(&self) -> Result<Vec<KvOp>, StorageError> {
        Ok(vec![KvOp::DeletePrefix {
            prefix: self.prefix.clone(),
        }])
    }

    fn cmps(&self) -> Vec<Compare> {
        vec![]
    }
}

/// Delete a key only if it is still at the version `value` was read at
pub struct DeleteValueOp {
    client: SharedKvClient,
    key: String,
    version: i64,
}

impl DeleteValueOp {
    pub fn new<V: StoredValue>(client: SharedKvClient, key: impl Into<String>, value: &V) -> Self {
        Self {
            client,
            key: key.into(),
            version: value.version(),
        }
    }

    /// Fails with [`StorageError::ValueVersionMismatch`] when the key was
    /// modified or removed since it was read
    pub async fn exec(self) -> Result<(), StorageError> {
        let client = self.client.clone();
        let key = self.key.clone();
        match Txn::new(client).with_op(self).commit().await {
            Ok(_) => Ok(()),
            Err(StorageError::OperationConstraintViolated) => {
                Err(StorageError::ValueVersionMismatch(key))
            }
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl TxnOperation for DeleteValueOp {
    async fn ops(&self) -> Result<Vec<KvOp>, StorageError> {
        Ok(vec![KvOp::Delete {
            key: self.key.clone(),
        }])
    }

    fn cmps(&self) -> Vec<Compare> {
        vec![Compare::version_eq(&self.key, self.version)]
    }
}
