//! Shared mock resources for the integration tests.

#![allow(dead_code)]

use latch_asset::{
    AtomicLoadState, LoadState, LoaderConfig, Resource, ResourceHandle, ResourceRegistry,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::TRACE)
        .try_init();
}

pub fn registry(workers: usize) -> ResourceRegistry {
    init_tracing();
    ResourceRegistry::with_config(LoaderConfig {
        min_workers: workers,
        max_workers: Some(workers),
        ..LoaderConfig::default()
    })
    .expect("registry should start")
}

/// Poll `cond` until it holds, failing the test after a few seconds.
pub fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_micros(200));
    }
}

/// Wait for the load and for the load job to give back its reference.
pub fn settle(registry: &ResourceRegistry, handle: &ResourceHandle) {
    registry.wait_for_load(handle);
    eventually("load job to release its handle", || {
        registry.ref_count(handle) == Some(1)
    });
}

/// Counts loads and drops; loads succeed unless built with `failing`.
pub struct MockResource {
    pub name: &'static str,
    fail: bool,
    state: AtomicLoadState,
    loads: Arc<AtomicUsize>,
    drops: Arc<AtomicUsize>,
    log: Option<Arc<Mutex<Vec<&'static str>>>>,
}

#[derive(Clone, Default)]
pub struct Counters {
    pub loads: Arc<AtomicUsize>,
    pub drops: Arc<AtomicUsize>,
}

impl Counters {
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn drops(&self) -> usize {
        self.drops.load(Ordering::SeqCst)
    }
}

impl MockResource {
    pub fn new(name: &'static str, counters: &Counters) -> Self {
        Self {
            name,
            fail: false,
            state: AtomicLoadState::new(),
            loads: Arc::clone(&counters.loads),
            drops: Arc::clone(&counters.drops),
            log: None,
        }
    }

    pub fn failing(name: &'static str, counters: &Counters) -> Self {
        let mut resource = Self::new(name, counters);
        resource.fail = true;
        resource
    }

    pub fn logging(mut self, log: &Arc<Mutex<Vec<&'static str>>>) -> Self {
        self.log = Some(Arc::clone(log));
        self
    }
}

impl Resource for MockResource {
    fn load(&self) {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if let Some(log) = &self.log {
            log.lock().push(self.name);
        }
        self.state.advance(LoadState::Loading);
        self.state.advance(if self.fail {
            LoadState::Failed
        } else {
            LoadState::Loaded
        });
    }

    fn load_state(&self) -> LoadState {
        self.state.get()
    }
}

impl Drop for MockResource {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Resource whose load parks the worker until the test releases it.
pub struct GateResource {
    started: Arc<Barrier>,
    release: Arc<Barrier>,
    state: AtomicLoadState,
}

pub struct Gate {
    started: Arc<Barrier>,
    release: Arc<Barrier>,
}

impl Gate {
    pub fn new() -> Self {
        Self {
            started: Arc::new(Barrier::new(2)),
            release: Arc::new(Barrier::new(2)),
        }
    }

    pub fn resource(&self) -> GateResource {
        GateResource {
            started: Arc::clone(&self.started),
            release: Arc::clone(&self.release),
            state: AtomicLoadState::new(),
        }
    }

    /// Block until a worker is inside the gate's `load()`.
    pub fn wait_started(&self) {
        self.started.wait();
    }

    /// Let the parked worker finish its load.
    pub fn open(&self) {
        self.release.wait();
    }
}

impl Resource for GateResource {
    fn load(&self) {
        self.state.advance(LoadState::Loading);
        self.started.wait();
        self.release.wait();
        self.state.advance(LoadState::Loaded);
    }

    fn load_state(&self) -> LoadState {
        self.state.get()
    }
}
