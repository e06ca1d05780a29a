//! File-backed resources loaded by the asset workers

use latch_asset::{AtomicLoadState, LoadState, Resource};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::OnceLock;

/// Engine settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub graphics: GraphicsSettings,
    pub audio: AudioSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphicsSettings {
    pub resolution_width: u32,
    pub resolution_height: u32,
    pub fullscreen: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSettings {
    pub master_volume: f32,
}

impl Default for GraphicsSettings {
    fn default() -> Self {
        Self {
            resolution_width: 1280,
            resolution_height: 720,
            fullscreen: false,
        }
    }
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self { master_volume: 1.0 }
    }
}

/// Settings parsed from a JSON file on a load worker.
pub struct SettingsResource {
    path: PathBuf,
    settings: OnceLock<Settings>,
    state: AtomicLoadState,
}

impl SettingsResource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            settings: OnceLock::new(),
            state: AtomicLoadState::new(),
        }
    }

    /// Parsed settings, once loaded.
    pub fn settings(&self) -> Option<&Settings> {
        self.settings.get()
    }
}

impl Resource for SettingsResource {
    fn load(&self) {
        if !self.state.advance(LoadState::Loading) {
            return;
        }
        let parsed = std::fs::read_to_string(&self.path)
            .map_err(|e| e.to_string())
            .and_then(|text| serde_json::from_str::<Settings>(&text).map_err(|e| e.to_string()));
        match parsed {
            Ok(settings) => {
                let _ = self.settings.set(settings);
                self.state.advance(LoadState::Loaded);
            }
            Err(error) => {
                tracing::warn!(path = %self.path.display(), %error, "failed to load settings");
                self.state.advance(LoadState::Failed);
            }
        }
    }

    fn load_state(&self) -> LoadState {
        self.state.get()
    }
}

/// Raw file contents.
pub struct BlobResource {
    path: PathBuf,
    bytes: OnceLock<Vec<u8>>,
    state: AtomicLoadState,
}

impl BlobResource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            bytes: OnceLock::new(),
            state: AtomicLoadState::new(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        self.bytes.get().map(Vec::as_slice).unwrap_or_default()
    }
}

impl Resource for BlobResource {
    fn load(&self) {
        if !self.state.advance(LoadState::Loading) {
            return;
        }
        match std::fs::read(&self.path) {
            Ok(bytes) => {
                tracing::debug!(path = %self.path.display(), len = bytes.len(), "blob read");
                let _ = self.bytes.set(bytes);
                self.state.advance(LoadState::Loaded);
            }
            Err(error) => {
                tracing::warn!(path = %self.path.display(), %error, "failed to read blob");
                self.state.advance(LoadState::Failed);
            }
        }
    }

    fn load_state(&self) -> LoadState {
        self.state.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn scratch(name: &str, contents: &[u8]) -> PathBuf {
        let path =
            std::env::temp_dir().join(format!("latch_runtime_{}_{name}", std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn settings_parse_with_defaults() {
        let path = scratch("settings.json", br#"{ "audio": { "master_volume": 0.25 } }"#);
        let resource = SettingsResource::new(&path);
        resource.load();

        assert_eq!(resource.load_state(), LoadState::Loaded);
        let settings = resource.settings().unwrap();
        assert_eq!(settings.audio.master_volume, 0.25);
        assert_eq!(settings.graphics, GraphicsSettings::default());
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn malformed_settings_fail() {
        let path = scratch("broken.json", b"{ not json");
        let resource = SettingsResource::new(&path);
        resource.load();

        assert_eq!(resource.load_state(), LoadState::Failed);
        assert!(resource.settings().is_none());
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn blob_reads_bytes_once() {
        let path = scratch("blob.bin", &[1, 2, 3]);
        let blob = BlobResource::new(&path);
        blob.load();
        std::fs::write(&path, [9]).unwrap();
        blob.load();

        assert_eq!(blob.load_state(), LoadState::Loaded);
        assert_eq!(blob.bytes(), &[1, 2, 3]);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn missing_blob_fails() {
        let blob = BlobResource::new(Path::new("/definitely/not/here.bin"));
        blob.load();
        assert_eq!(blob.load_state(), LoadState::Failed);
        assert!(blob.bytes().is_empty());
    }
}
