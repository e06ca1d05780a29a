use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors returned by [`ResourceRegistry`](crate::ResourceRegistry) operations.
///
/// Stale handles and type mismatches are never errors; those degrade to
/// `None`/`false` at the call site.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("resource registry has been shut down")]
    ShutDown,

    #[error("failed to grow resource slot table to {requested} slots")]
    OutOfMemory { requested: usize },

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors returned by the [`JobScheduler`](crate::JobScheduler).
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("job scheduler has been cleaned up")]
    ShutDown,

    #[error("failed to grow job slot table to {requested} slots")]
    OutOfMemory { requested: usize },

    #[error("failed to spawn load worker thread")]
    WorkerSpawn(#[source] io::Error),
}

/// Errors produced while reading or validating a [`LoaderConfig`](crate::LoaderConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read loader config '{path}'")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse loader config")]
    Parse(#[from] serde_json::Error),

    #[error("invalid loader config: `{field}` {reason}")]
    Invalid { field: &'static str, reason: String },
}
