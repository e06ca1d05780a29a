//! The capability every registry-managed resource implements.

use crate::LoadState;
use std::any::Any;

/// A loadable resource owned by a [`ResourceRegistry`](crate::ResourceRegistry).
///
/// `load` runs on a worker thread while the registry's slot table is held
/// for shared access. Implementations keep their data behind interior
/// mutability, set [`LoadState::Loading`] before doing work, and finish in
/// [`LoadState::Loaded`] or [`LoadState::Failed`]. The registry never infers
/// success; it only reads back `load_state`.
///
/// `load` must not create or drop handles of the registry that owns it; both
/// need exclusive access to the slot table the worker is reading.
///
/// # Example
/// ```
/// use latch_asset::{AtomicLoadState, LoadState, Resource};
/// use std::sync::OnceLock;
///
/// struct Greeting {
///     text: OnceLock<String>,
///     state: AtomicLoadState,
/// }
///
/// impl Resource for Greeting {
///     fn load(&self) {
///         self.state.advance(LoadState::Loading);
///         let _ = self.text.set("hello".to_string());
///         self.state.advance(LoadState::Loaded);
///     }
///
///     fn load_state(&self) -> LoadState {
///         self.state.get()
///     }
/// }
/// ```
pub trait Resource: Send + Sync + 'static {
    /// Produce the resource's data. Side-effecting; called at most once per
    /// dispatched load job.
    fn load(&self);

    /// Current state; must never move backwards.
    fn load_state(&self) -> LoadState;
}

/// Object-safe view used for slot storage, adding downcasting.
pub(crate) trait StoredResource: Resource {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Resource> StoredResource for T {
    #[inline]
    fn as_any(&self) -> &dyn Any {
        self
    }
}
