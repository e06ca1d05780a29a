// registry.rs - Slot table owning every resource, with deferred destruction
//
// Lock domains, always acquired in this order when nested:
//   job queue -> job table -> resource table -> pending destruction
// The resource table is a `RwLock`: growth, slot writes and slot release take
// it exclusively; validity checks, reads, ref-counting and loads share it.
// Shared acquisitions are recursive so a thread holding a `ResourceRef` can
// keep reading while a writer is queued.

use crate::handle::ResourceHandle;
use crate::job::{JobHandle, LoadCallback, LoadPriority};
use crate::resource::{Resource, StoredResource};
use crate::scheduler::JobScheduler;
use crate::{LoadState, LoaderConfig, RegistryError, TypeTag};
use parking_lot::{MappedRwLockReadGuard, Mutex, RwLock, RwLockReadGuard};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Shared borrow of a stored resource.
///
/// Holds the registry's slot table for shared access while alive. Further
/// reads and clones on the same thread are fine, even with a `create`
/// waiting on another thread. Do not call `create` or drop the last handle
/// to a resource of the same registry while holding one on the same thread;
/// both need the table exclusively.
pub type ResourceRef<'a, T> = MappedRwLockReadGuard<'a, T>;

/// Point-in-time counters for a registry's slot table.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Slots ever allocated (live + free).
    pub slots: usize,
    pub live: usize,
    pub free: usize,
    /// Released resources waiting for `flush_destructors`.
    pub pending_destroy: usize,
}

struct ResourceEntry {
    generation: u32,
    tag: Option<TypeTag>,
    resource: Option<Box<dyn StoredResource>>,
    ref_count: AtomicU32,
}

impl ResourceEntry {
    fn vacant() -> Self {
        Self {
            generation: 1,
            tag: None,
            resource: None,
            ref_count: AtomicU32::new(0),
        }
    }

    #[inline]
    fn resource(&self) -> Option<&dyn StoredResource> {
        self.resource.as_deref()
    }
}

struct ResourceTable {
    entries: Vec<ResourceEntry>,
    /// Released slot indices, reused LIFO.
    free_list: Vec<u32>,
}

impl ResourceTable {
    /// Entry for `handle` if its generation is current and the slot is occupied.
    fn live(&self, handle: &ResourceHandle) -> Option<&ResourceEntry> {
        let entry = self.entries.get(handle.index() as usize)?;
        (entry.generation == handle.generation() && entry.resource.is_some()).then_some(entry)
    }

    /// Pop a free slot or grow the table by one.
    fn reserve_slot(&mut self) -> Result<u32, RegistryError> {
        if let Some(index) = self.free_list.pop() {
            return Ok(index);
        }

        let len = self.entries.len();
        let out_of_memory = RegistryError::OutOfMemory {
            requested: len + 1,
        };
        let index = match u32::try_from(len) {
            Ok(index) if index != ResourceHandle::NULL_INDEX => index,
            _ => return Err(out_of_memory),
        };
        // Keep the free list able to hold every slot so release never allocates.
        let free_room = (len + 1).saturating_sub(self.free_list.len());
        if self.entries.try_reserve(1).is_err() || self.free_list.try_reserve(free_room).is_err()
        {
            return Err(out_of_memory);
        }
        self.entries.push(ResourceEntry::vacant());
        Ok(index)
    }
}

/// State shared between the registry front-end, its handles and the load workers.
pub(crate) struct RegistryShared {
    table: RwLock<ResourceTable>,
    pending: Mutex<Vec<Box<dyn StoredResource>>>,
    shut_down: AtomicBool,
    poll_interval: Duration,
}

impl RegistryShared {
    pub(crate) fn new(config: &LoaderConfig) -> Result<Self, RegistryError> {
        let capacity = config.initial_slot_capacity;
        let mut entries = Vec::new();
        let mut free_list = Vec::new();
        if entries.try_reserve(capacity).is_err() || free_list.try_reserve(capacity).is_err() {
            return Err(RegistryError::OutOfMemory {
                requested: capacity,
            });
        }

        Ok(Self {
            table: RwLock::new(ResourceTable {
                entries,
                free_list,
            }),
            pending: Mutex::new(Vec::new()),
            shut_down: AtomicBool::new(false),
            poll_interval: config.wait_poll_interval(),
        })
    }

    /// Whether `handle` was issued by this registry.
    #[inline]
    fn owns(&self, handle: &ResourceHandle) -> bool {
        std::ptr::eq(handle.owner_ptr(), self)
    }

    pub(crate) fn is_valid(&self, handle: &ResourceHandle) -> bool {
        self.owns(handle) && self.table.read_recursive().live(handle).is_some()
    }

    fn insert(
        &self,
        tag: TypeTag,
        resource: Box<dyn StoredResource>,
    ) -> Result<(u32, u32), RegistryError> {
        let mut table = self.table.write();
        if self.shut_down.load(Ordering::Acquire) {
            return Err(RegistryError::ShutDown);
        }
        // On error `resource` drops after the guard, so a resource owning
        // handles can release them without deadlocking.
        let index = table.reserve_slot()?;

        let entry = &mut table.entries[index as usize];
        entry.tag = Some(tag);
        entry.resource = Some(resource);
        entry.ref_count.store(1, Ordering::Relaxed);
        let generation = entry.generation;

        trace!(slot = index, generation, tag = tag.raw(), "resource slot allocated");
        Ok((index, generation))
    }

    /// Add a reference for a handle being cloned.
    pub(crate) fn register(&self, handle: &ResourceHandle) {
        if !self.owns(handle) {
            return;
        }
        let table = self.table.read_recursive();
        if let Some(entry) = table.live(handle) {
            entry.ref_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Drop a reference; the last one frees the slot and defers destruction.
    pub(crate) fn unregister(&self, handle: &ResourceHandle) {
        if !self.owns(handle) {
            return;
        }
        let released = {
            let table = self.table.read_recursive();
            match table.live(handle) {
                Some(entry) => entry.ref_count.fetch_sub(1, Ordering::AcqRel) == 1,
                None => return,
            }
        };
        if !released {
            return;
        }

        let mut table = self.table.write();
        let ResourceTable {
            entries,
            free_list,
        } = &mut *table;
        let Some(entry) = entries.get_mut(handle.index() as usize) else {
            return;
        };
        if entry.generation != handle.generation() || entry.ref_count.load(Ordering::Acquire) != 0
        {
            return;
        }

        entry.generation = entry.generation.wrapping_add(1);
        entry.tag = None;
        let resource = entry.resource.take();
        free_list.push(handle.index());
        trace!(
            slot = handle.index(),
            generation = handle.generation(),
            "resource slot released"
        );

        if let Some(resource) = resource {
            self.pending.lock().push(resource);
        }
    }

    /// Run `load()` on the resource behind `handle` and report the state it
    /// ended in. `None` when the handle no longer resolves.
    pub(crate) fn load_target(&self, handle: &ResourceHandle) -> Option<LoadState> {
        if !self.owns(handle) {
            return None;
        }
        let table = self.table.read_recursive();
        let resource = table.live(handle)?.resource()?;
        resource.load();
        let state = resource.load_state();
        if !state.is_terminal() {
            warn!(
                slot = handle.index(),
                ?state,
                "resource returned from load() without reaching a terminal state"
            );
        }
        Some(state)
    }

    fn load_state(&self, handle: &ResourceHandle) -> Option<LoadState> {
        if !self.owns(handle) {
            return None;
        }
        let table = self.table.read_recursive();
        table
            .live(handle)
            .and_then(ResourceEntry::resource)
            .map(|resource| resource.load_state())
    }

    fn wait_for_load(&self, handle: &ResourceHandle) -> Option<LoadState> {
        loop {
            let state = self.load_state(handle)?;
            if state.is_terminal() {
                return Some(state);
            }
            std::thread::sleep(self.poll_interval);
        }
    }

    fn ref_count(&self, handle: &ResourceHandle) -> Option<u32> {
        if !self.owns(handle) {
            return None;
        }
        let table = self.table.read_recursive();
        table
            .live(handle)
            .map(|entry| entry.ref_count.load(Ordering::Acquire))
    }

    fn flush_destructors(&self) -> usize {
        let doomed = std::mem::take(&mut *self.pending.lock());
        let count = doomed.len();
        drop(doomed);
        if count > 0 {
            debug!(count, "flushed deferred resource destructors");
        }
        count
    }

    fn shutdown(&self) {
        let (pending, live) = {
            let mut table = self.table.write();
            if self.shut_down.swap(true, Ordering::AcqRel) {
                return;
            }
            let pending = std::mem::take(&mut *self.pending.lock());
            let live: Vec<_> = table
                .entries
                .drain(..)
                .filter_map(|entry| entry.resource)
                .collect();
            table.free_list.clear();
            (pending, live)
        };

        let flushed = pending.len();
        drop(pending);
        let forced = live.len();
        drop(live);
        info!(flushed, forced, "resource registry shut down");
    }

    fn stats(&self) -> RegistryStats {
        let table = self.table.read_recursive();
        let live = table
            .entries
            .iter()
            .filter(|entry| entry.resource.is_some())
            .count();
        RegistryStats {
            slots: table.entries.len(),
            live,
            free: table.free_list.len(),
            pending_destroy: self.pending.lock().len(),
        }
    }
}

/// Slot-based store of polymorphic resources, loaded off-thread.
///
/// `create` stores a resource, returns a ref-counted [`ResourceHandle`] and
/// always submits a load job to the owned [`JobScheduler`]. Dropping the last
/// handle moves the resource to a pending list that
/// [`flush_destructors`](Self::flush_destructors) frees in one batch.
///
/// # Example
/// ```ignore
/// let registry = ResourceRegistry::new()?;
/// let mesh = registry.create(MeshAsset::from_path("cube.obj"))?;
/// registry.wait_for_load(&mesh);
/// if let Some(mesh_ref) = registry.get::<MeshAsset>(&mesh) {
///     upload(&*mesh_ref);
/// }
/// drop(mesh);
/// registry.flush_destructors(); // once per tick
/// ```
pub struct ResourceRegistry {
    shared: Arc<RegistryShared>,
    scheduler: JobScheduler,
}

impl ResourceRegistry {
    /// Registry with the default [`LoaderConfig`].
    pub fn new() -> Result<Self, RegistryError> {
        Self::with_config(LoaderConfig::default())
    }

    pub fn with_config(config: LoaderConfig) -> Result<Self, RegistryError> {
        config.validate()?;
        let shared = Arc::new(RegistryShared::new(&config)?);
        let scheduler = JobScheduler::initialize(Arc::clone(&shared), &config)?;
        info!(
            workers = scheduler.worker_count(),
            slots = config.initial_slot_capacity,
            "resource registry initialized"
        );
        Ok(Self { shared, scheduler })
    }

    /// Store `resource` and queue it for loading at normal priority.
    pub fn create<T: Resource>(&self, resource: T) -> Result<ResourceHandle, RegistryError> {
        self.create_with(resource, LoadPriority::NORMAL, None)
            .map(|(handle, _)| handle)
    }

    /// Store `resource` and queue its load job with the given priority and
    /// completion callback.
    pub fn create_with<T: Resource>(
        &self,
        resource: T,
        priority: LoadPriority,
        callback: Option<LoadCallback>,
    ) -> Result<(ResourceHandle, JobHandle), RegistryError> {
        let (index, generation) = self
            .shared
            .insert(TypeTag::of::<T>(), Box::new(resource))?;
        let handle = ResourceHandle::adopt(index, generation, Arc::downgrade(&self.shared));
        let job = self.scheduler.enqueue(handle.clone(), priority, callback)?;
        Ok((handle, job))
    }

    pub fn is_valid(&self, handle: &ResourceHandle) -> bool {
        self.shared.is_valid(handle)
    }

    /// Borrow the resource behind `handle` as a `T`.
    ///
    /// `None` when the handle is stale, belongs to another registry, or the
    /// slot holds a different type.
    pub fn get<T: Resource>(&self, handle: &ResourceHandle) -> Option<ResourceRef<'_, T>> {
        if !self.shared.owns(handle) {
            return None;
        }
        let tag = TypeTag::of::<T>();
        let table = self.shared.table.read_recursive();
        RwLockReadGuard::try_map(table, |table| {
            let entry = table.live(handle)?;
            if entry.tag != Some(tag) {
                return None;
            }
            entry.resource()?.as_any().downcast_ref::<T>()
        })
        .ok()
    }

    /// Run `f` against the resource behind `handle` as a `T`.
    pub fn with<T: Resource, R>(
        &self,
        handle: &ResourceHandle,
        f: impl FnOnce(&T) -> R,
    ) -> Option<R> {
        self.get::<T>(handle).map(|resource| f(&resource))
    }

    pub fn load_state(&self, handle: &ResourceHandle) -> Option<LoadState> {
        self.shared.load_state(handle)
    }

    /// Block until the resource reaches `Loaded` or `Failed`.
    ///
    /// Polls at the configured interval. Returns `None` as soon as the
    /// handle stops resolving, otherwise the terminal state.
    pub fn wait_for_load(&self, handle: &ResourceHandle) -> Option<LoadState> {
        self.shared.wait_for_load(handle)
    }

    /// Current reference count of a live handle's slot.
    pub fn ref_count(&self, handle: &ResourceHandle) -> Option<u32> {
        self.shared.ref_count(handle)
    }

    /// Free every resource released since the last flush. Returns how many
    /// were freed.
    pub fn flush_destructors(&self) -> usize {
        self.shared.flush_destructors()
    }

    /// Stop the load workers, flush pending destructors, then free every
    /// resource still stored, regardless of outstanding handles.
    ///
    /// Outstanding handles become stale. Later `create` calls fail with
    /// [`RegistryError::ShutDown`]. Calling this more than once is a no-op.
    pub fn shutdown(&self) {
        self.scheduler.cleanup();
        self.shared.shutdown();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shut_down.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> RegistryStats {
        self.shared.stats()
    }

    pub fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }
}

impl Drop for ResourceRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AtomicLoadState, SchedulerError};
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    struct Texture {
        drops: Arc<AtomicUsize>,
        state: AtomicLoadState,
    }

    impl Texture {
        fn new(drops: &Arc<AtomicUsize>) -> Self {
            Self {
                drops: Arc::clone(drops),
                state: AtomicLoadState::new(),
            }
        }
    }

    impl Resource for Texture {
        fn load(&self) {
            self.state.advance(LoadState::Loading);
            self.state.advance(LoadState::Loaded);
        }

        fn load_state(&self) -> LoadState {
            self.state.get()
        }
    }

    impl Drop for Texture {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Sound {
        state: AtomicLoadState,
    }

    impl Resource for Sound {
        fn load(&self) {
            self.state.advance(LoadState::Failed);
        }

        fn load_state(&self) -> LoadState {
            self.state.get()
        }
    }

    fn registry() -> ResourceRegistry {
        ResourceRegistry::with_config(LoaderConfig {
            max_workers: Some(2),
            ..LoaderConfig::default()
        })
        .unwrap()
    }

    /// Wait until the auto-submitted job has released its reference.
    fn settle(registry: &ResourceRegistry, handle: &ResourceHandle) {
        registry.wait_for_load(handle);
        let deadline = Instant::now() + Duration::from_secs(5);
        while registry.ref_count(handle) != Some(1) {
            assert!(Instant::now() < deadline, "load job never released its handle");
            std::thread::sleep(Duration::from_micros(100));
        }
    }

    #[test]
    fn create_loads_in_background() {
        let drops = Arc::new(AtomicUsize::new(0));
        let registry = registry();
        let handle = registry.create(Texture::new(&drops)).unwrap();

        assert!(registry.is_valid(&handle));
        assert_eq!(registry.wait_for_load(&handle), Some(LoadState::Loaded));
        assert_eq!(registry.load_state(&handle), Some(LoadState::Loaded));
        assert!(registry.get::<Texture>(&handle).is_some());
    }

    #[test]
    fn failed_load_is_terminal() {
        let registry = registry();
        let handle = registry
            .create(Sound {
                state: AtomicLoadState::new(),
            })
            .unwrap();
        assert_eq!(registry.wait_for_load(&handle), Some(LoadState::Failed));
    }

    #[test]
    fn get_with_wrong_type_is_none() {
        let drops = Arc::new(AtomicUsize::new(0));
        let registry = registry();
        let handle = registry.create(Texture::new(&drops)).unwrap();
        assert!(registry.get::<Sound>(&handle).is_none());
        assert!(registry.with(&handle, |_: &Texture| ()).is_some());
    }

    #[test]
    fn clones_share_one_slot() {
        let drops = Arc::new(AtomicUsize::new(0));
        let registry = registry();
        let handle = registry.create(Texture::new(&drops)).unwrap();
        settle(&registry, &handle);

        let copies: Vec<_> = (0..4).map(|_| handle.clone()).collect();
        assert_eq!(registry.ref_count(&handle), Some(5));
        assert!(copies.iter().all(|copy| *copy == handle));

        drop(copies);
        assert_eq!(registry.ref_count(&handle), Some(1));
        drop(handle);

        assert_eq!(drops.load(Ordering::SeqCst), 0, "destruction is deferred");
        assert_eq!(registry.flush_destructors(), 1);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert_eq!(registry.flush_destructors(), 0);
    }

    #[test]
    fn recycled_slot_rejects_old_handle() {
        let drops = Arc::new(AtomicUsize::new(0));
        let registry = registry();
        let first = registry.create(Texture::new(&drops)).unwrap();
        settle(&registry, &first);
        let (index, generation) = (first.index(), first.generation());
        drop(first);

        let second = registry.create(Texture::new(&drops)).unwrap();
        assert_eq!(second.index(), index);
        assert_ne!(second.generation(), generation);

        // Rebuilt from the raw parts of the released handle; dropping it is a no-op.
        let old = ResourceHandle::adopt(index, generation, Arc::downgrade(&registry.shared));
        assert!(!registry.is_valid(&old));
        assert!(registry.get::<Texture>(&old).is_none());
        assert_eq!(registry.wait_for_load(&old), None);
        assert!(registry.is_valid(&second));
    }

    #[test]
    fn handles_from_another_registry_do_not_resolve() {
        let drops = Arc::new(AtomicUsize::new(0));
        let a = registry();
        let b = registry();
        let handle = a.create(Texture::new(&drops)).unwrap();
        let _other = b.create(Texture::new(&drops)).unwrap();

        assert!(a.is_valid(&handle));
        assert!(!b.is_valid(&handle));
        assert!(b.get::<Texture>(&handle).is_none());
        assert_eq!(b.ref_count(&handle), None);
    }

    #[test]
    fn shutdown_frees_everything_and_rejects_create() {
        let drops = Arc::new(AtomicUsize::new(0));
        let registry = registry();
        let kept = registry.create(Texture::new(&drops)).unwrap();
        let released = registry.create(Texture::new(&drops)).unwrap();
        settle(&registry, &kept);
        settle(&registry, &released);
        drop(released);

        registry.shutdown();
        assert_eq!(drops.load(Ordering::SeqCst), 2);
        assert!(!kept.is_valid());
        assert!(registry.is_shut_down());
        assert!(matches!(
            registry.create(Texture::new(&drops)),
            Err(RegistryError::ShutDown)
        ));

        registry.shutdown();
        drop(kept);
        assert_eq!(registry.flush_destructors(), 0);
    }

    #[test]
    fn stats_track_live_and_free_slots() {
        let drops = Arc::new(AtomicUsize::new(0));
        let registry = registry();
        let a = registry.create(Texture::new(&drops)).unwrap();
        let b = registry.create(Texture::new(&drops)).unwrap();
        settle(&registry, &a);
        settle(&registry, &b);
        drop(a);

        let stats = registry.stats();
        assert_eq!(stats.slots, 2);
        assert_eq!(stats.live, 1);
        assert_eq!(stats.free, 1);
        assert_eq!(stats.pending_destroy, 1);
    }

    #[test]
    fn overlapping_reads_survive_a_waiting_create() {
        let drops = Arc::new(AtomicUsize::new(0));
        let registry = registry();
        let a = registry.create(Texture::new(&drops)).unwrap();
        let b = registry.create(Texture::new(&drops)).unwrap();
        settle(&registry, &a);
        settle(&registry, &b);

        let first = registry.get::<Texture>(&a).unwrap();
        std::thread::scope(|scope| {
            let creator = scope.spawn(|| registry.create(Texture::new(&drops)).is_ok());
            // Give the creator time to queue up on the exclusive lock.
            std::thread::sleep(Duration::from_millis(50));

            let second = registry.get::<Texture>(&b).expect("second borrow");
            assert!(registry.is_valid(&a));
            assert_eq!(registry.load_state(&b), Some(LoadState::Loaded));
            let copy = b.clone();
            drop(copy);
            drop(second);
            drop(first);

            assert!(creator.join().unwrap());
        });
    }

    #[test]
    fn oversized_reservations_are_out_of_memory() {
        let slots = ResourceRegistry::with_config(LoaderConfig {
            initial_slot_capacity: usize::MAX,
            ..LoaderConfig::default()
        });
        assert!(matches!(slots, Err(RegistryError::OutOfMemory { .. })));

        let jobs = ResourceRegistry::with_config(LoaderConfig {
            initial_job_capacity: usize::MAX,
            ..LoaderConfig::default()
        });
        assert!(matches!(
            jobs,
            Err(RegistryError::Scheduler(SchedulerError::OutOfMemory { .. }))
        ));
    }

    #[test]
    fn handle_outliving_registry_is_inert() {
        let drops = Arc::new(AtomicUsize::new(0));
        let handle = {
            let registry = registry();
            registry.create(Texture::new(&drops)).unwrap()
        };
        assert!(!handle.is_valid());
        let copy = handle.clone();
        drop(copy);
        drop(handle);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }
}
