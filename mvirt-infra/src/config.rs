//! Reconciler timing configuration.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Default bounded wait for a long-running operation inside a single call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Default interval between polls during the bounded wait.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Default requeue hint for non-terminal states and missing dependencies.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(20);

/// Default requeue hint while an operation handle is outstanding.
pub const DEFAULT_OPERATION_REQUEUE: Duration = Duration::from_secs(15);

/// Timing knobs shared by the client adapter and the services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileConfig {
    /// How long a create/update/delete call waits for its operation before
    /// handing back an operation handle.
    pub call_timeout: Duration,
    /// Poll interval inside `call_timeout`.
    pub poll_interval: Duration,
    /// Retry hint for a non-terminal provisioning state or a dependency that
    /// does not exist yet.
    pub retry_after: Duration,
    /// Retry hint while an operation is still running cloud-side.
    pub operation_requeue: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            retry_after: DEFAULT_RETRY_AFTER,
            operation_requeue: DEFAULT_OPERATION_REQUEUE,
        }
    }
}

/// On-disk form of [`ReconcileConfig`]. Missing fields keep their defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconcileConfigFile {
    pub call_timeout_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub retry_after_ms: Option<u64>,
    pub operation_requeue_ms: Option<u64>,
}

impl ReconcileConfigFile {
    /// Read a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        serde_json::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// Overlay the values present in this file onto `base`.
    pub fn apply(&self, base: ReconcileConfig) -> ReconcileConfig {
        ReconcileConfig {
            call_timeout: self
                .call_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(base.call_timeout),
            poll_interval: self
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(base.poll_interval),
            retry_after: self
                .retry_after_ms
                .map(Duration::from_millis)
                .unwrap_or(base.retry_after),
            operation_requeue: self
                .operation_requeue_ms
                .map(Duration::from_millis)
                .unwrap_or(base.operation_requeue),
        }
    }
}

/// Errors loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}
