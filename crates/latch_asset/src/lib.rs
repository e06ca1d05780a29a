//! Latch Asset Pipeline
//!
//! Concurrent resource registry and asynchronous load scheduling:
//! - [`ResourceRegistry`]: slot table of polymorphic resources behind
//!   generation-checked, ref-counted [`ResourceHandle`]s, with deferred
//!   destruction
//! - [`JobScheduler`]: priority-ordered load jobs serviced by a worker pool,
//!   with cancellation and completion callbacks
//! - [`Resource`]: the capability a loadable resource implements
//!
//! # Usage
//!
//! ```ignore
//! use latch_asset::{LoadPriority, ResourceRegistry};
//!
//! let registry = ResourceRegistry::new()?;
//! let (mesh, _job) = registry.create_with(
//!     MeshAsset::from_path("level.obj"),
//!     LoadPriority::HIGH,
//!     Some(Box::new(|handle, ok| tracing::info!(?handle, ok, "mesh ready"))),
//! )?;
//!
//! // Each tick
//! registry.flush_destructors();
//!
//! // Teardown
//! registry.shutdown();
//! ```

mod config;
mod error;
mod handle;
mod job;
mod registry;
mod resource;
mod scheduler;
mod state;
mod type_tag;

pub use config::LoaderConfig;
pub use error::{ConfigError, RegistryError, SchedulerError};
pub use handle::ResourceHandle;
pub use job::{JobHandle, JobState, LoadCallback, LoadPriority};
pub use registry::{RegistryStats, ResourceRef, ResourceRegistry};
pub use resource::Resource;
pub use scheduler::JobScheduler;
pub use state::{AtomicLoadState, LoadState};
pub use type_tag::TypeTag;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
