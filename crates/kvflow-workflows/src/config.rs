//! Backend configuration

use std::time::Duration;

use kvflow_storage::retry::duration_millis;
use kvflow_storage::RetryPolicy;
use serde::{Deserialize, Serialize};

/// Invalid configuration value
#[derive(Debug, thiserror::Error)]
#[error("invalid value for {name}: {value:?}")]
pub struct ConfigError {
    pub name: &'static str,
    pub value: String,
}

/// Options for [`Backend`](crate::Backend)
///
/// # Example
///
/// ```
/// use kvflow_workflows::BackendOptions;
/// use std::time::Duration;
///
/// let options = BackendOptions::new("control-plane", "host-1")
///     .with_workflow_lock_timeout(Duration::from_secs(30))
///     .with_sticky_timeout(Duration::from_secs(120));
///
/// assert_eq!(options.root, "control-plane");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendOptions {
    /// Key prefix; every key lives under `/{root}/workflows/`
    pub root: String,

    /// Stable identity of this worker across restarts
    pub worker_id: String,

    /// TTL of workflow instance locks
    #[serde(with = "duration_millis")]
    pub workflow_lock_timeout: Duration,

    /// TTL of activity locks
    #[serde(with = "duration_millis")]
    pub activity_lock_timeout: Duration,

    /// TTL of sticky routing records
    #[serde(with = "duration_millis")]
    pub sticky_timeout: Duration,

    /// Delete continued-as-new executions instead of keeping them as history
    #[serde(default)]
    pub remove_continued_as_new_instances: bool,

    /// Upper bound on queue items inspected per dispatch call (None = all)
    #[serde(default)]
    pub max_scan_items: Option<usize>,

    /// Retry policy for transient store failures on commits
    #[serde(default)]
    pub transport_retry: Option<RetryPolicy>,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            root: String::new(),
            worker_id: "worker".to_string(),
            workflow_lock_timeout: Duration::from_secs(60),
            activity_lock_timeout: Duration::from_secs(60),
            sticky_timeout: Duration::from_secs(5 * 60),
            remove_continued_as_new_instances: false,
            max_scan_items: None,
            transport_retry: None,
        }
    }
}

impl BackendOptions {
    pub fn new(root: impl Into<String>, worker_id: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            worker_id: worker_id.into(),
            ..Default::default()
        }
    }

    /// Read options from `KVFLOW_*` environment variables, falling back to
    /// defaults for anything unset
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            root: std::env::var("KVFLOW_ROOT").unwrap_or(defaults.root),
            worker_id: std::env::var("KVFLOW_WORKER_ID").unwrap_or(defaults.worker_id),
            workflow_lock_timeout: env_millis("KVFLOW_WORKFLOW_LOCK_TIMEOUT_MS")?
                .unwrap_or(defaults.workflow_lock_timeout),
            activity_lock_timeout: env_millis("KVFLOW_ACTIVITY_LOCK_TIMEOUT_MS")?
                .unwrap_or(defaults.activity_lock_timeout),
            sticky_timeout: env_millis("KVFLOW_STICKY_TIMEOUT_MS")?
                .unwrap_or(defaults.sticky_timeout),
            remove_continued_as_new_instances: env_parse("KVFLOW_REMOVE_CONTINUED_AS_NEW")?
                .unwrap_or(defaults.remove_continued_as_new_instances),
            max_scan_items: env_parse("KVFLOW_MAX_SCAN_ITEMS")?,
            transport_retry: defaults.transport_retry,
        })
    }

    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn with_workflow_lock_timeout(mut self, timeout: Duration) -> Self {
        self.workflow_lock_timeout = timeout;
        self
    }

    pub fn with_activity_lock_timeout(mut self, timeout: Duration) -> Self {
        self.activity_lock_timeout = timeout;
        self
    }

    pub fn with_sticky_timeout(mut self, timeout: Duration) -> Self {
        self.sticky_timeout = timeout;
        self
    }

    pub fn with_remove_continued_as_new_instances(mut self, remove: bool) -> Self {
        self.remove_continued_as_new_instances = remove;
        self
    }

    pub fn with_max_scan_items(mut self, max: usize) -> Self {
        self.max_scan_items = Some(max);
        self
    }

    pub fn with_transport_retry(mut self, policy: RetryPolicy) -> Self {
        self.transport_retry = Some(policy);
        self
    }
}

/// Parse an optional environment variable
pub fn env_parse<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError { name, value }),
        Err(_) => Ok(None),
    }
}

/// Parse an optional environment variable holding milliseconds
pub fn env_millis(name: &'static str) -> Result<Option<Duration>, ConfigError> {
    Ok(env_parse::<u64>(name)?.map(Duration::from_millis))
}
