//! Storage error taxonomy

use std::time::Duration;

use crate::kv::LeaseId;

/// Error type for storage operations
///
/// `NotFound`, `AlreadyExists`, `ValueVersionMismatch` and
/// `OperationConstraintViolated` are sentinel errors that callers are
/// expected to match on. Everything else is diagnostic.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// No value stored under the key
    #[error("key not found: {0:?}")]
    NotFound(String),

    /// Create-only write found the key already present
    #[error("key already exists: {0:?}")]
    AlreadyExists(String),

    /// Stored version did not match the version carried by the value
    #[error("value version mismatch: {0:?}")]
    ValueVersionMismatch(String),

    /// A transaction's compare conditions were not jointly satisfied
    #[error("operation constraint violated")]
    OperationConstraintViolated,

    /// A transaction touched at least one key more than once
    ///
    /// Each entry is `"<action> <key>"`, e.g. `"put /a"`.
    #[error("duplicate keys in transaction: [{}]", .0.join(", "))]
    DuplicateKeysInTransaction(Vec<String>),

    /// Value could not be serialized
    #[error("failed to encode value for {key:?}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Stored payload could not be deserialized
    #[error("failed to decode {key:?}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// A put referenced a lease that was never granted or already expired
    #[error("lease not found: {0}")]
    LeaseNotFound(LeaseId),

    /// Transient store/transport failure
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The operation did not finish within its deadline
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }

    /// True for every error that means "a compare failed at commit time"
    ///
    /// Single-op execution reports create/update failures with their own
    /// sentinel, transactions report them as `OperationConstraintViolated`.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            Self::OperationConstraintViolated
                | Self::AlreadyExists(_)
                | Self::ValueVersionMismatch(_)
        )
    }

    /// Errors worth retrying without re-reading any state
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_keys_message_lists_every_op() {
        let err = StorageError::DuplicateKeysInTransaction(vec![
            "put /a".to_string(),
            "delete /a".to_string(),
        ]);
        let message = err.to_string();
        assert!(message.contains("put /a"));
        assert!(message.contains("delete /a"));
    }

    #[test]
    fn test_classification() {
        assert!(StorageError::NotFound("k".into()).is_not_found());
        assert!(StorageError::AlreadyExists("k".into()).is_constraint_violation());
        assert!(StorageError::OperationConstraintViolated.is_constraint_violation());
        assert!(!StorageError::NotFound("k".into()).is_constraint_violation());
        assert!(StorageError::Unavailable("down".into()).is_transient());
        assert!(!StorageError::LeaseNotFound(3).is_transient());
    }
}
