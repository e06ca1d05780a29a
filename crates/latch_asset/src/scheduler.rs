// scheduler.rs - Priority-ordered load jobs serviced by a worker pool
//
// Jobs live in their own generation-checked slot table. `enqueue` writes the
// slot under the job-table lock, releases it, then pushes the handle onto the
// queue; it never holds both. Workers pop a handle, claim the job's payload
// under a shared job-table lock, release it, and only then take the resource
// table for the load. Callbacks run with no lock held.

use crate::job::{JobEntry, JobHandle, JobPayload, JobState, LoadCallback, LoadPriority, QueuedJob};
use crate::registry::RegistryShared;
use crate::{LoadState, LoaderConfig, ResourceHandle, SchedulerError};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::BinaryHeap;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, debug_span, error, trace, warn};

struct JobTable {
    entries: Vec<JobEntry>,
    free_list: Vec<u32>,
}

impl JobTable {
    fn entry(&self, handle: &JobHandle) -> Option<&JobEntry> {
        self.entries
            .get(handle.index as usize)
            .filter(|entry| entry.matches(handle))
    }

    fn allocate(
        &mut self,
        priority: LoadPriority,
        payload: JobPayload,
    ) -> Result<JobHandle, SchedulerError> {
        if let Some(index) = self.free_list.pop() {
            let entry = &mut self.entries[index as usize];
            entry.reset(priority, payload);
            return Ok(entry.handle(index));
        }

        let len = self.entries.len();
        let out_of_memory = SchedulerError::OutOfMemory {
            requested: len + 1,
        };
        let index = u32::try_from(len).map_err(|_| out_of_memory)?;
        let free_room = (len + 1).saturating_sub(self.free_list.len());
        if self.entries.try_reserve(1).is_err() || self.free_list.try_reserve(free_room).is_err()
        {
            return Err(SchedulerError::OutOfMemory {
                requested: len + 1,
            });
        }
        self.entries.push(JobEntry::new(priority, payload));
        Ok(self.entries[len].handle(index))
    }
}

struct SchedulerShared {
    queue: Mutex<BinaryHeap<QueuedJob>>,
    job_available: Condvar,
    jobs: RwLock<JobTable>,
    resources: Arc<RegistryShared>,
    running: AtomicBool,
    sequence: AtomicU64,
}

/// Outcome of claiming a popped job.
enum Claim {
    Stale,
    Canceled(Option<JobPayload>),
    Run(JobPayload),
}

impl SchedulerShared {
    fn worker_loop(&self, worker: usize) {
        trace!(worker, "load worker started");
        while let Some(queued) = self.next_job() {
            self.dispatch(queued.handle);
        }
        trace!(worker, "load worker exiting");
    }

    /// Block until a job is queued or the scheduler stops.
    fn next_job(&self) -> Option<QueuedJob> {
        let mut queue = self.queue.lock();
        loop {
            if !self.running.load(Ordering::Acquire) {
                return None;
            }
            if let Some(job) = queue.pop() {
                return Some(job);
            }
            self.job_available.wait(&mut queue);
        }
    }

    fn claim(&self, handle: &JobHandle) -> Claim {
        let jobs = self.jobs.read();
        let Some(entry) = jobs.entry(handle) else {
            return Claim::Stale;
        };
        entry.set_state(JobState::Running);
        if entry.is_canceled() {
            return Claim::Canceled(entry.take_payload());
        }
        match entry.take_payload() {
            Some(payload) => Claim::Run(payload),
            None => Claim::Canceled(None),
        }
    }

    fn dispatch(&self, handle: JobHandle) {
        let span = debug_span!(
            "asset_load",
            job = handle.index,
            generation = handle.generation,
            priority = handle.priority.0
        );
        let _enter = span.enter();

        match self.claim(&handle) {
            Claim::Stale => {
                debug!("stale load job dropped");
            }
            Claim::Canceled(payload) => {
                trace!("load job canceled before dispatch");
                self.recycle(&handle);
                drop(payload);
            }
            Claim::Run(JobPayload { target, callback }) => {
                let loaded = panic::catch_unwind(AssertUnwindSafe(|| {
                    self.resources.load_target(&target)
                }));
                let state = loaded.unwrap_or_else(|_| {
                    error!(slot = target.index(), "resource load panicked");
                    None
                });
                let success = state == Some(LoadState::Loaded);

                if let Some(entry) = self.jobs.read().entry(&handle) {
                    entry.set_state(JobState::Finished);
                }
                trace!(slot = target.index(), ?state, success, "load job finished");

                if let Some(callback) = callback {
                    let notified =
                        panic::catch_unwind(AssertUnwindSafe(move || callback(target, success)));
                    if notified.is_err() {
                        error!("load completion callback panicked");
                    }
                } else {
                    drop(target);
                }
                self.recycle(&handle);
            }
        }
    }

    /// Retire the job's generation and return its slot to the free list.
    fn recycle(&self, handle: &JobHandle) {
        let mut jobs = self.jobs.write();
        let JobTable {
            entries,
            free_list,
        } = &mut *jobs;
        if let Some(entry) = entries
            .get(handle.index as usize)
            .filter(|entry| entry.matches(handle))
        {
            entry.retire();
            free_list.push(handle.index);
        }
    }
}

/// Worker pool that runs resource loads in priority order.
///
/// Owned by a [`ResourceRegistry`](crate::ResourceRegistry), which submits
/// one job per created resource. Further jobs (reloads, reprioritized loads)
/// can be submitted with [`enqueue`](Self::enqueue).
pub struct JobScheduler {
    shared: Arc<SchedulerShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl JobScheduler {
    /// Spawn the worker pool and reserve job storage.
    ///
    /// The pool size is `config.worker_count(available_parallelism)`.
    pub(crate) fn initialize(
        resources: Arc<RegistryShared>,
        config: &LoaderConfig,
    ) -> Result<Self, SchedulerError> {
        let available = thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        let worker_count = config.worker_count(available);

        let capacity = config.initial_job_capacity;
        let mut queue = BinaryHeap::new();
        let mut entries = Vec::new();
        let mut free_list = Vec::new();
        if queue.try_reserve(capacity).is_err()
            || entries.try_reserve(capacity).is_err()
            || free_list.try_reserve(capacity).is_err()
        {
            return Err(SchedulerError::OutOfMemory {
                requested: capacity,
            });
        }

        let shared = Arc::new(SchedulerShared {
            queue: Mutex::new(queue),
            job_available: Condvar::new(),
            jobs: RwLock::new(JobTable {
                entries,
                free_list,
            }),
            resources,
            running: AtomicBool::new(true),
            sequence: AtomicU64::new(0),
        });
        let scheduler = Self {
            shared,
            workers: Mutex::new(Vec::new()),
            worker_count,
        };

        for worker in 0..worker_count {
            let shared = Arc::clone(&scheduler.shared);
            let spawned = thread::Builder::new()
                .name(format!("latch-asset-worker-{worker}"))
                .spawn(move || shared.worker_loop(worker));
            match spawned {
                Ok(join) => scheduler.workers.lock().push(join),
                Err(err) => {
                    scheduler.cleanup();
                    return Err(SchedulerError::WorkerSpawn(err));
                }
            }
        }

        debug!(workers = worker_count, available, "load workers started");
        Ok(scheduler)
    }

    /// Queue a load of `target`.
    ///
    /// Wakes one idle worker. Jobs with a higher `priority` dequeue first;
    /// the job keeps `target` alive until it has run or been canceled.
    pub fn enqueue(
        &self,
        target: ResourceHandle,
        priority: LoadPriority,
        callback: Option<LoadCallback>,
    ) -> Result<JobHandle, SchedulerError> {
        let payload = JobPayload { target, callback };
        let handle = {
            let mut jobs = self.shared.jobs.write();
            if !self.shared.running.load(Ordering::Acquire) {
                drop(jobs);
                warn!("load job submitted after scheduler cleanup");
                return Err(SchedulerError::ShutDown);
            }
            jobs.allocate(priority, payload)?
        };

        let sequence = self.shared.sequence.fetch_add(1, Ordering::Relaxed);
        self.shared.queue.lock().push(QueuedJob { handle, sequence });
        self.shared.job_available.notify_one();

        trace!(
            job = handle.index,
            generation = handle.generation,
            %priority,
            "load job queued"
        );
        Ok(handle)
    }

    /// Mark a queued job as canceled.
    ///
    /// Returns whether the handle was still valid. Cancellation is checked
    /// when a worker dispatches the job; a load already running completes.
    pub fn cancel(&self, handle: &JobHandle) -> bool {
        let jobs = self.shared.jobs.read();
        match jobs.entry(handle) {
            Some(entry) => {
                entry.cancel();
                trace!(job = handle.index, "load job canceled");
                true
            }
            None => false,
        }
    }

    pub fn is_valid(&self, handle: &JobHandle) -> bool {
        self.shared.jobs.read().entry(handle).is_some()
    }

    /// State of a job that has not been recycled yet.
    pub fn state(&self, handle: &JobHandle) -> Option<JobState> {
        self.shared.jobs.read().entry(handle).map(JobEntry::state)
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Jobs waiting in the queue (including stale ones not yet popped).
    pub fn queued_len(&self) -> usize {
        self.shared.queue.lock().len()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Stop and join every worker, then drop all queued jobs.
    ///
    /// Later `enqueue` calls fail with [`SchedulerError::ShutDown`]. Calling
    /// this again is a no-op. Must not be called from a load callback, since
    /// it joins the worker running that callback.
    pub fn cleanup(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        {
            let _queue = self.shared.queue.lock();
            self.shared.job_available.notify_all();
        }

        let workers = std::mem::take(&mut *self.workers.lock());
        let joined = workers.len();
        for worker in workers {
            if worker.join().is_err() {
                error!("load worker panicked");
            }
        }

        let queued = std::mem::take(&mut *self.shared.queue.lock());
        let entries = {
            let mut jobs = self.shared.jobs.write();
            jobs.free_list.clear();
            std::mem::take(&mut jobs.entries)
        };
        // Payloads hold resource handles; release them with no lock held.
        let dropped = entries
            .into_iter()
            .filter_map(|entry| entry.take_payload())
            .count();
        drop(queued);

        debug!(workers = joined, dropped, "load workers stopped");
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        self.cleanup();
    }
}
