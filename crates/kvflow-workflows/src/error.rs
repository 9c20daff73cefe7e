//! Backend error taxonomy

use kvflow_storage::StorageError;

/// Errors returned by [`WorkflowBackend`](crate::WorkflowBackend) operations
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// An active execution already exists for the instance id
    #[error("workflow instance already exists")]
    InstanceAlreadyExists,

    #[error("workflow instance not found")]
    InstanceNotFound,

    /// Removal was requested for an instance that is still active
    #[error("workflow instance is not finished")]
    InstanceNotFinished,

    #[error("activity not found: {0}")]
    ActivityNotFound(String),

    /// The task's lock expired or was taken over by another worker
    #[error("lock lost for {0}")]
    LockLost(String),

    /// The event has the wrong kind for the operation
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// Storage failure with the operation that hit it
    #[error("failed to {context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: StorageError,
    },
}

impl BackendError {
    pub fn storage(context: impl Into<String>, source: StorageError) -> Self {
        Self::Storage {
            context: context.into(),
            source,
        }
    }

    /// The underlying storage error, if any
    pub fn storage_error(&self) -> Option<&StorageError> {
        match self {
            Self::Storage { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Attach operation context to storage results
pub trait StorageResultExt<T> {
    fn context(self, context: &str) -> Result<T, BackendError>;
}

impl<T> StorageResultExt<T> for Result<T, StorageError> {
    fn context(self, context: &str) -> Result<T, BackendError> {
        self.map_err(|source| BackendError::storage(context, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_in_message() {
        let result: Result<(), StorageError> = Err(StorageError::Unavailable("down".into()));
        let err = result.context("get queue items").unwrap_err();
        assert_eq!(
            err.to_string(),
            "failed to get queue items: store unavailable: down"
        );
        assert!(err.storage_error().is_some_and(StorageError::is_transient));
    }
}
