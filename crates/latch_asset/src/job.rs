//! Load job types: handles, priorities, per-slot job entries.

use crate::ResourceHandle;
use parking_lot::Mutex;
use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

/// Callback run on the worker after a load job finishes.
///
/// Receives the loaded resource's handle and whether it ended `Loaded`.
/// Not invoked for canceled jobs.
pub type LoadCallback = Box<dyn FnOnce(ResourceHandle, bool) + Send + 'static>;

/// Dispatch priority of a load job. Higher values dequeue first.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LoadPriority(pub i8);

impl LoadPriority {
    pub const LOW: Self = Self(-1);
    pub const NORMAL: Self = Self(0);
    pub const HIGH: Self = Self(1);
}

impl Default for LoadPriority {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl fmt::Display for LoadPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle to a queued load job.
///
/// Same generational rule as [`ResourceHandle`], in its own numbering space.
/// Plain data; holding one keeps nothing alive.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct JobHandle {
    pub(crate) index: u32,
    pub(crate) generation: u32,
    pub(crate) priority: LoadPriority,
}

impl JobHandle {
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }

    #[inline]
    pub fn priority(&self) -> LoadPriority {
        self.priority
    }
}

/// Progress of a job through a worker.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum JobState {
    Uninitialized = 0,
    Running = 1,
    Finished = 2,
}

impl JobState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => JobState::Running,
            2 => JobState::Finished,
            _ => JobState::Uninitialized,
        }
    }
}

/// What a job loads and who to tell afterwards.
pub(crate) struct JobPayload {
    pub target: ResourceHandle,
    pub callback: Option<LoadCallback>,
}

/// One slot of the job table.
pub(crate) struct JobEntry {
    generation: AtomicU32,
    canceled: AtomicBool,
    state: AtomicU8,
    priority: LoadPriority,
    payload: Mutex<Option<JobPayload>>,
}

impl JobEntry {
    pub fn new(priority: LoadPriority, payload: JobPayload) -> Self {
        Self {
            generation: AtomicU32::new(1),
            canceled: AtomicBool::new(false),
            state: AtomicU8::new(JobState::Uninitialized as u8),
            priority,
            payload: Mutex::new(Some(payload)),
        }
    }

    /// Refill a recycled slot. The generation was already bumped on release.
    pub fn reset(&mut self, priority: LoadPriority, payload: JobPayload) {
        *self.canceled.get_mut() = false;
        *self.state.get_mut() = JobState::Uninitialized as u8;
        self.priority = priority;
        *self.payload.get_mut() = Some(payload);
    }

    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }

    #[inline]
    pub fn matches(&self, handle: &JobHandle) -> bool {
        self.generation() == handle.generation
    }

    pub fn handle(&self, index: u32) -> JobHandle {
        JobHandle {
            index,
            generation: self.generation(),
            priority: self.priority,
        }
    }

    /// Invalidate every outstanding handle to this slot.
    pub fn retire(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    #[inline]
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    #[inline]
    pub fn state(&self) -> JobState {
        JobState::from_raw(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set_state(&self, state: JobState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn take_payload(&self) -> Option<JobPayload> {
        self.payload.lock().take()
    }
}

/// Queue element: the handle plus a submission counter used as tie-break.
#[derive(Debug)]
pub(crate) struct QueuedJob {
    pub handle: JobHandle,
    pub sequence: u64,
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for QueuedJob {}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedJob {
    /// Max-heap order: higher priority first, then earlier submission.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.handle
            .priority
            .cmp(&other.handle.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}
