//! Loader configuration
//!
//! Worker-pool sizing and table reservations for the registry/scheduler pair.

use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for a [`ResourceRegistry`](crate::ResourceRegistry) and its
/// [`JobScheduler`](crate::JobScheduler).
///
/// Every field has a default, so a JSON file only needs the keys it changes:
/// ```json
/// { "worker_fraction": 0.5, "max_workers": 4 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Share of the machine's hardware parallelism spent on load workers.
    pub worker_fraction: f32,
    pub min_workers: usize,
    pub max_workers: Option<usize>,
    /// Resource slots reserved up front (reserved, not allocated).
    pub initial_slot_capacity: usize,
    /// Job slots and free-list entries reserved up front.
    pub initial_job_capacity: usize,
    /// Sleep between polls in `wait_for_load`, in microseconds.
    pub wait_poll_interval_us: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            worker_fraction: 1.0 / 3.0,
            min_workers: 1,
            max_workers: None,
            initial_slot_capacity: 4096,
            initial_job_capacity: 128,
            wait_poll_interval_us: 100,
        }
    }
}

impl LoaderConfig {
    /// Parse a config from JSON and validate it.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON config file and validate it.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.worker_fraction > 0.0 && self.worker_fraction <= 1.0) {
            return Err(ConfigError::Invalid {
                field: "worker_fraction",
                reason: format!("must be in (0, 1], got {}", self.worker_fraction),
            });
        }
        if self.wait_poll_interval_us == 0 {
            return Err(ConfigError::Invalid {
                field: "wait_poll_interval_us",
                reason: "must be greater than zero".to_string(),
            });
        }
        if let Some(max) = self.max_workers {
            if max < self.min_workers.max(1) {
                return Err(ConfigError::Invalid {
                    field: "max_workers",
                    reason: format!(
                        "{max} is below min_workers ({})",
                        self.min_workers.max(1)
                    ),
                });
            }
        }
        Ok(())
    }

    /// Number of workers to spawn given `available` hardware threads.
    ///
    /// `ceil(available * worker_fraction)`, clamped to
    /// `[max(min_workers, 1), max_workers]`.
    pub fn worker_count(&self, available: usize) -> usize {
        let wanted = (available as f32 * self.worker_fraction).ceil() as usize;
        let floor = self.min_workers.max(1);
        let count = wanted.max(floor);
        match self.max_workers {
            Some(max) => count.min(max.max(floor)),
            None => count,
        }
    }

    #[inline]
    pub fn wait_poll_interval(&self) -> Duration {
        Duration::from_micros(self.wait_poll_interval_us)
    }
}
