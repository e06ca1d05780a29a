//! Latch Engine Runtime
//!
//! Boots the asset registry, streams a few files through the load workers
//! and drives a fixed 60Hz tick that flushes released resources.

mod resources;

use anyhow::{Context, Result};
use latch_asset::{LoadPriority, LoadState, LoaderConfig, ResourceHandle, ResourceRegistry};
use resources::{BlobResource, Settings, SettingsResource};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Fixed simulation tick rate (60 Hz = 16.666ms per tick)
const TICK_RATE_HZ: u32 = 60;
const TICK_DURATION: Duration = Duration::from_micros(16_666);
const RUN_TICKS: u64 = 2 * TICK_RATE_HZ as u64;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_thread_names(true)
        .init();

    tracing::info!("Latch Engine v{}", latch_asset::VERSION);

    let config = match std::env::args_os().nth(1) {
        Some(path) => LoaderConfig::from_path(&path)
            .with_context(|| format!("loading config from {}", PathBuf::from(&path).display()))?,
        None => LoaderConfig::default(),
    };
    let registry = ResourceRegistry::with_config(config).context("starting resource registry")?;
    tracing::info!(workers = registry.scheduler().worker_count(), "Asset workers running");

    let dir = std::env::temp_dir().join(format!("latch_runtime_{}", std::process::id()));
    std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    let settings_path = dir.join("settings.json");
    let mut settings = Settings::default();
    settings.graphics.fullscreen = true;
    std::fs::write(&settings_path, serde_json::to_vec_pretty(&settings)?)
        .context("writing demo settings")?;
    let blob_path = dir.join("splash.bin");
    std::fs::write(&blob_path, vec![0xA5; 4096]).context("writing demo blob")?;

    let (settings_handle, _) = registry.create_with(
        SettingsResource::new(&settings_path),
        LoadPriority::HIGH,
        Some(Box::new(|handle: ResourceHandle, ok| {
            tracing::info!(slot = handle.index(), ok, "settings load finished");
        })),
    )?;
    let mut blobs: Vec<ResourceHandle> = Vec::new();
    for name in ["splash.bin", "missing.bin"] {
        let (handle, _) = registry.create_with(
            BlobResource::new(dir.join(name)),
            LoadPriority::NORMAL,
            Some(Box::new(move |handle: ResourceHandle, ok| {
                tracing::info!(slot = handle.index(), ok, name, "blob load finished");
            })),
        )?;
        blobs.push(handle);
    }

    match registry.wait_for_load(&settings_handle) {
        Some(LoadState::Loaded) => {
            let graphics = registry
                .with::<SettingsResource, _>(&settings_handle, |r| {
                    r.settings().map(|s| s.graphics.clone())
                })
                .flatten();
            tracing::info!(?graphics, "Settings applied");
        }
        state => tracing::warn!(?state, "Settings unavailable, using defaults"),
    }

    let mut next_tick = Instant::now();
    for tick in 0..RUN_TICKS {
        if tick == RUN_TICKS / 2 {
            // Release the blobs halfway through; the next flush frees them.
            for handle in blobs.drain(..) {
                let len = registry.with::<BlobResource, _>(&handle, |b| b.bytes().len());
                tracing::debug!(slot = handle.index(), ?len, "releasing blob");
            }
        }

        let freed = registry.flush_destructors();
        if freed > 0 {
            tracing::info!(tick, freed, "Flushed released resources");
        }

        next_tick += TICK_DURATION;
        if let Some(wait) = next_tick.checked_duration_since(Instant::now()) {
            std::thread::sleep(wait);
        }
    }

    let stats = registry.stats();
    tracing::info!(?stats, "Shutting down");
    drop(settings_handle);
    registry.shutdown();

    if let Err(error) = std::fs::remove_dir_all(&dir) {
        tracing::warn!(dir = %dir.display(), %error, "failed to remove scratch directory");
    }
    Ok(())
}
