//! Reference-counted resource handle with generational index
//!
//! Handles are the only way to reach a resource stored in a
//! [`ResourceRegistry`](crate::ResourceRegistry). Cloning a handle adds a
//! reference, dropping one removes it; the last drop queues the resource for
//! deferred destruction.

use crate::registry::RegistryShared;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Weak;

/// Handle to a registry slot.
///
/// Format: [32-bit slot index | 32-bit generation]
/// - Index: position in the registry's slot table
/// - Generation: bumped every time the slot is freed (stale handles stop resolving)
///
/// `Clone` registers a new reference, `Drop` releases one, and a plain Rust
/// move transfers the reference without touching the registry. A default
/// handle uses a sentinel index and never resolves.
pub struct ResourceHandle {
    index: u32,
    generation: u32,
    owner: Weak<RegistryShared>,
}

impl ResourceHandle {
    /// Sentinel slot index of an empty handle.
    pub const NULL_INDEX: u32 = u32::MAX;

    /// Build a handle that already owns one reference on `owner`'s slot.
    pub(crate) fn adopt(index: u32, generation: u32, owner: Weak<RegistryShared>) -> Self {
        Self {
            index,
            generation,
            owner,
        }
    }

    /// An empty handle; equivalent to `ResourceHandle::default()`.
    pub const fn null() -> Self {
        Self {
            index: Self::NULL_INDEX,
            generation: 0,
            owner: Weak::new(),
        }
    }

    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.index == Self::NULL_INDEX
    }

    /// Whether the handle still refers to a live resource.
    ///
    /// Returns `false` for empty handles, recycled slots and handles whose
    /// registry has been dropped or shut down.
    pub fn is_valid(&self) -> bool {
        if self.is_null() {
            return false;
        }
        self.owner
            .upgrade()
            .map(|shared| shared.is_valid(self))
            .unwrap_or(false)
    }

    /// Serialize index and generation to a 64-bit integer (for logs and debugging).
    pub fn to_bits(&self) -> u64 {
        ((self.generation as u64) << 32) | (self.index as u64)
    }

    #[inline]
    pub(crate) fn owner_ptr(&self) -> *const RegistryShared {
        self.owner.as_ptr()
    }
}

impl Default for ResourceHandle {
    fn default() -> Self {
        Self::null()
    }
}

impl Clone for ResourceHandle {
    fn clone(&self) -> Self {
        if !self.is_null() {
            if let Some(shared) = self.owner.upgrade() {
                shared.register(self);
            }
        }
        Self {
            index: self.index,
            generation: self.generation,
            owner: self.owner.clone(),
        }
    }
}

impl Drop for ResourceHandle {
    fn drop(&mut self) {
        if self.is_null() {
            return;
        }
        if let Some(shared) = self.owner.upgrade() {
            shared.unregister(self);
        }
        self.index = Self::NULL_INDEX;
    }
}

impl PartialEq for ResourceHandle {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl Eq for ResourceHandle {}

impl Hash for ResourceHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return f.write_str("ResourceHandle(null)");
        }
        f.debug_struct("ResourceHandle")
            .field("index", &self.index)
            .field("generation", &self.generation)
            .finish()
    }
}
