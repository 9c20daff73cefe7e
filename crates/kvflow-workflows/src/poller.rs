//! Task polling with exponential backoff
//!
//! A worker's poll loop: claim a task, back off while queues are empty,
//! snap back to the minimum interval once work shows up.

use std::sync::Arc;
use std::time::Duration;

use kvflow_storage::retry::duration_millis;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, instrument, trace};

use crate::backend::WorkflowBackend;
use crate::config::{env_millis, env_parse, ConfigError};
use crate::error::BackendError;
use crate::model::{ActivityTask, Queue, WorkflowTask};

/// Polling configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollerConfig {
    /// Interval while tasks keep arriving
    #[serde(with = "duration_millis")]
    pub min_interval: Duration,

    /// Interval cap while idle
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,

    /// Growth factor per empty poll
    pub backoff_multiplier: f64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(5),
            backoff_multiplier: 1.5,
        }
    }
}

impl PollerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `KVFLOW_POLL_*` environment variables over the defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            min_interval: env_millis("KVFLOW_POLL_MIN_INTERVAL_MS")?
                .unwrap_or(defaults.min_interval),
            max_interval: env_millis("KVFLOW_POLL_MAX_INTERVAL_MS")?
                .unwrap_or(defaults.max_interval),
            backoff_multiplier: defaults.backoff_multiplier,
        };
        let name = "KVFLOW_POLL_BACKOFF_MULTIPLIER";
        let multiplier = env_parse::<f64>(name)?.unwrap_or(defaults.backoff_multiplier);
        if !multiplier.is_finite() {
            return Err(ConfigError {
                name,
                value: multiplier.to_string(),
            });
        }
        Ok(config.with_backoff_multiplier(multiplier))
    }

    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier.max(1.0);
        self
    }
}

/// Poller errors
#[derive(Debug, thiserror::Error)]
pub enum PollerError {
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("worker is shutting down")]
    Shutdown,
}

/// Claims tasks from a set of queues with adaptive backoff
pub struct TaskPoller {
    backend: Arc<dyn WorkflowBackend>,
    queues: Vec<Queue>,
    config: PollerConfig,
    current_interval: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl TaskPoller {
    /// `queues` are polled in order; earlier queues take priority
    pub fn new(
        backend: Arc<dyn WorkflowBackend>,
        queues: Vec<Queue>,
        config: PollerConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            backend,
            queues,
            current_interval: config.min_interval,
            config,
            shutdown_rx,
        }
    }

    #[instrument(skip(self))]
    pub async fn poll_workflow_task(&mut self) -> Result<Option<WorkflowTask>, PollerError> {
        if self.is_shutdown() {
            return Err(PollerError::Shutdown);
        }
        let task = self.backend.get_workflow_task(&self.queues).await?;
        self.record(task.is_some());
        Ok(task)
    }

    #[instrument(skip(self))]
    pub async fn poll_activity_task(&mut self) -> Result<Option<ActivityTask>, PollerError> {
        if self.is_shutdown() {
            return Err(PollerError::Shutdown);
        }
        let task = self.backend.get_activity_task(&self.queues).await?;
        self.record(task.is_some());
        Ok(task)
    }

    /// Sleep for the current interval; true if shutdown interrupted it
    pub async fn wait(&mut self) -> bool {
        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::select! {
            _ = tokio::time::sleep(self.current_interval) => false,
            _ = shutdown_rx.changed() => {
                debug!("shutdown signal received during wait");
                true
            }
        }
    }

    pub fn current_interval(&self) -> Duration {
        self.current_interval
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    fn record(&mut self, found: bool) {
        if found {
            self.current_interval = self.config.min_interval;
        } else {
            let next = Duration::try_from_secs_f64(
                self.current_interval.as_secs_f64() * self.config.backoff_multiplier,
            )
            .unwrap_or(self.config.max_interval);
            self.current_interval = next.min(self.config.max_interval);
            trace!(
                interval_ms = self.current_interval.as_millis() as u64,
                "no task found, backing off"
            );
        }
    }
}
