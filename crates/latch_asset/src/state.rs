//! Load state shared between a resource and the workers that load it.

use std::sync::atomic::{AtomicU8, Ordering};

/// Where a resource is in its loading lifecycle.
///
/// Transitions only move forward: `Unloaded -> Loading -> {Loaded, Failed}`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LoadState {
    Unloaded = 0,
    Loading = 1,
    Loaded = 2,
    Failed = 3,
}

impl LoadState {
    /// `Loaded` and `Failed` end the lifecycle.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, LoadState::Loaded | LoadState::Failed)
    }

    #[inline]
    fn rank(self) -> u8 {
        match self {
            LoadState::Unloaded => 0,
            LoadState::Loading => 1,
            LoadState::Loaded | LoadState::Failed => 2,
        }
    }

    #[inline]
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => LoadState::Loading,
            2 => LoadState::Loaded,
            3 => LoadState::Failed,
            _ => LoadState::Unloaded,
        }
    }
}

/// Atomic cell holding a [`LoadState`].
///
/// Resources embed one of these and report it from
/// [`Resource::load_state`](crate::Resource::load_state). Writes are
/// `Release`, reads are `Acquire`, so data written by `load()` before the
/// final transition is visible to whoever observes the terminal state.
#[derive(Debug)]
pub struct AtomicLoadState(AtomicU8);

impl AtomicLoadState {
    pub const fn new() -> Self {
        Self(AtomicU8::new(LoadState::Unloaded as u8))
    }

    #[inline]
    pub fn get(&self) -> LoadState {
        LoadState::from_raw(self.0.load(Ordering::Acquire))
    }

    /// Move to `next` if that is a forward transition.
    ///
    /// Returns `false` and leaves the state untouched when `next` would
    /// regress or when the current state is already terminal.
    pub fn advance(&self, next: LoadState) -> bool {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            if next.rank() <= LoadState::from_raw(current).rank() {
                return false;
            }
            match self.0.compare_exchange_weak(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }
}

impl Default for AtomicLoadState {
    fn default() -> Self {
        Self::new()
    }
}
