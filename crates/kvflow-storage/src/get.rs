//! Typed reads

use std::marker::PhantomData;

use tracing::trace;

use crate::error::StorageError;
use crate::kv::{RangeRequest, SharedKvClient, SortOrder, SortTarget};
use crate::value::{decode_kv, decode_kvs, StoredValue};

/// Read a single value
pub struct GetOp<V> {
    client: SharedKvClient,
    key: String,
    _marker: PhantomData<fn() -> V>,
}

impl<V: StoredValue> GetOp<V> {
    pub fn new(client: SharedKvClient, key: impl Into<String>) -> Self {
        Self {
            client,
            key: key.into(),
            _marker: PhantomData,
        }
    }

    /// Fails with [`StorageError::NotFound`] when the key is absent
    pub async fn exec(&self) -> Result<V, StorageError> {
        self.exec_opt()
            .await?
            .ok_or_else(|| StorageError::NotFound(self.key.clone()))
    }

    pub async fn exec_opt(&self) -> Result<Option<V>, StorageError> {
        let resp = self.client.range(RangeRequest::key(&self.key)).await?;
        resp.kvs.first().map(decode_kv).transpose()
    }
}

/// Read several keys; absent keys are skipped
pub struct GetMultipleOp<V> {
    client: SharedKvClient,
    keys: Vec<String>,
    _marker: PhantomData<fn() -> V>,
}

impl<V: StoredValue> GetMultipleOp<V> {
    pub fn new(client: SharedKvClient, keys: Vec<String>) -> Self {
        Self {
            client,
            keys,
            _marker: PhantomData,
        }
    }

    pub async fn exec(&self) -> Result<Vec<V>, StorageError> {
        let mut values = Vec::with_capacity(self.keys.len());
        for key in &self.keys {
            let resp = self.client.range(RangeRequest::key(key)).await?;
            if let Some(kv) = resp.kvs.first() {
                values.push(decode_kv(kv)?);
            }
        }
        Ok(values)
    }
}

/// Read every value under a prefix
///
/// The prefix must end with `/`; one is appended otherwise so that sibling
/// keys sharing a name prefix are never matched.
pub struct GetPrefixOp<V> {
    client: SharedKvClient,
    request: RangeRequest,
    _marker: PhantomData<fn() -> V>,
}

impl<V: StoredValue> GetPrefixOp<V> {
    pub fn new(client: SharedKvClient, prefix: impl Into<String>) -> Self {
        let mut prefix = prefix.into();
        if !prefix.ends_with('/') {
            prefix.push('/');
        }
        Self {
            client,
            request: RangeRequest::prefix(prefix),
            _marker: PhantomData,
        }
    }

    pub fn with_sort(mut self, target: SortTarget, order: SortOrder) -> Self {
        self.request = self.request.with_sort(target, order);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.request = self.request.with_limit(limit);
        self
    }

    pub async fn exec(&self) -> Result<Vec<V>, StorageError> {
        let resp = self.client.range(self.request.clone()).await?;
        trace!(prefix = %self.request.key, count = resp.kvs.len(), "prefix read");
        decode_kvs(&resp.kvs)
    }

    /// Number of keys under the prefix, without reading values
    pub async fn count(&self) -> Result<usize, StorageError> {
        let resp = self.client.range(self.request.clone().count_only()).await?;
        Ok(resp.count)
    }
}

/// Read every value in `[start, end)`
pub struct GetRangeOp<V> {
    client: SharedKvClient,
    request: RangeRequest,
    _marker: PhantomData<fn() -> V>,
}

impl<V: StoredValue> GetRangeOp<V> {
    pub fn new(client: SharedKvClient, start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            client,
            request: RangeRequest::range(start, end),
            _marker: PhantomData,
        }
    }

    pub fn with_sort(mut self, target: SortTarget, order: SortOrder) -> Self {
        self.request = self.request.with_sort(target, order);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.request = self.request.with_limit(limit);
        self
    }

    pub async fn exec(&self) -> Result<Vec<V>, StorageError> {
        let resp = self.client.range(self.request.clone()).await?;
        decode_kvs(&resp.kvs)
    }
}

/// Check whether a key is present
pub struct ExistsOp {
    client: SharedKvClient,
    key: String,
}

impl ExistsOp {
    pub fn new(client: SharedKvClient, key: impl Into<String>) -> Self {
        Self {
            client,
            key: key.into(),
        }
    }

    pub async fn exec(&self) -> Result<bool, StorageError> {
        let resp = self
            .client
            .range(RangeRequest::key(&self.key).count_only())
            .await?;
        Ok(resp.count > 0)
    }
}
