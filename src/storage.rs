//! Client-local persisted state
//!
//! The only state the pipeline persists across sessions is the camera
//! overlay position. It is kept behind a small key-value interface so the
//! host injects storage instead of the pipeline reaching for globals.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Storage key for the overlay position, shared with the original client
pub const CAMERA_POSITION_KEY: &str = "cameraPosition";

/// Rendered size of the camera overlay in pixels
pub const OVERLAY_WIDTH: i32 = 320;
pub const OVERLAY_HEIGHT: i32 = 240;

/// Margin used for the default overlay placement
const OVERLAY_MARGIN: i32 = 20;

/// Key-value persistence for client-local UI state
pub trait StateStore: Send + Sync {
    fn load(&self, key: &str) -> Option<String>;
    fn save(&self, key: &str, value: &str);
}

/// Host viewport dimensions in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: i32,
    pub height: i32,
}

/// Pixel offset of the draggable camera overlay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayPosition {
    pub x: i32,
    pub y: i32,
}

impl OverlayPosition {
    /// Default placement: bottom-left with a fixed margin.
    pub fn default_for(viewport: Viewport) -> Self {
        Self {
            x: OVERLAY_MARGIN,
            y: (viewport.height - OVERLAY_HEIGHT - OVERLAY_MARGIN).max(0),
        }
    }

    /// Clamp the overlay fully inside the viewport.
    pub fn clamped(self, viewport: Viewport) -> Self {
        let max_x = (viewport.width - OVERLAY_WIDTH).max(0);
        let max_y = (viewport.height - OVERLAY_HEIGHT).max(0);
        Self {
            x: self.x.clamp(0, max_x),
            y: self.y.clamp(0, max_y),
        }
    }

    /// Read the persisted position, falling back to the default placement.
    /// Corrupt entries are ignored the same way the original ignored
    /// malformed localStorage values.
    pub fn load(store: &dyn StateStore, viewport: Viewport) -> Self {
        store
            .load(CAMERA_POSITION_KEY)
            .and_then(|raw| serde_json::from_str::<OverlayPosition>(&raw).ok())
            .map(|pos| pos.clamped(viewport))
            .unwrap_or_else(|| Self::default_for(viewport))
    }

    pub fn save(self, store: &dyn StateStore) {
        match serde_json::to_string(&self) {
            Ok(raw) => store.save(CAMERA_POSITION_KEY, &raw),
            Err(e) => tracing::warn!("Failed to serialize overlay position: {e}"),
        }
    }
}

/// File-backed store keeping all keys in one JSON object
pub struct JsonFileStore {
    path: PathBuf,
    cache: Mutex<HashMap<String, String>>,
}

impl JsonFileStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let cache = Self::read_map(&path);
        Self {
            path,
            cache: Mutex::new(cache),
        }
    }

    fn read_map(path: &Path) -> HashMap<String, String> {
        match fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            Err(_) => HashMap::new(),
        }
    }

    fn flush(&self, map: &HashMap<String, String>) {
        let raw = match serde_json::to_string_pretty(map) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("Failed to serialize state store: {e}");
                return;
            }
        };
        if let Err(e) = fs::write(&self.path, raw) {
            tracing::warn!("Failed to write state store {:?}: {e}", self.path);
        }
    }
}

impl StateStore for JsonFileStore {
    fn load(&self, key: &str) -> Option<String> {
        self.cache.lock().get(key).cloned()
    }

    fn save(&self, key: &str, value: &str) {
        let mut map = self.cache.lock();
        map.insert(key.to_string(), value.to_string());
        self.flush(&map);
    }
}

/// In-memory store for tests and hosts without persistence
#[derive(Default)]
pub struct MemoryStore {
    map: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn load(&self, key: &str) -> Option<String> {
        self.map.lock().get(key).cloned()
    }

    fn save(&self, key: &str, value: &str) {
        self.map.lock().insert(key.to_string(), value.to_string());
    }
}
