//! Persistent key-value storage.
//!
//! Values are stored as JSON files, one per key, in a directory. By default
//! that is the platform-appropriate config directory:
//!   - Linux: `~/.config/notifeed/`
//!   - macOS: `~/Library/Application Support/notifeed/`
//!   - Windows: `%APPDATA%\notifeed\`

use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};

#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store rooted in the user's config directory, if the platform has one.
    pub fn default_location() -> Option<Self> {
        Some(Self::new(dirs::config_dir()?.join("notifeed")))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Save a value. Returns `true` if the operation succeeded.
    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> bool {
        match serde_json::to_string(value) {
            Ok(json) => self.save_raw(key, &json),
            Err(err) => {
                tracing::warn!(key, error = %err, "failed to serialize stored value");
                false
            }
        }
    }

    /// Load a value. `None` if the key doesn't exist or deserialization fails.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let json = self.load_raw(key)?;
        match serde_json::from_str(&json) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(key, error = %err, "ignoring unreadable stored value");
                None
            }
        }
    }

    pub fn remove(&self, key: &str) {
        if let Err(err) = std::fs::remove_file(self.file_path(key)) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(key, error = %err, "failed to remove stored value");
            }
        }
    }

    fn file_path(&self, key: &str) -> PathBuf {
        // Sanitize key to be a valid filename
        let safe_key = key.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_");
        self.dir.join(format!("{}.json", safe_key))
    }

    fn save_raw(&self, key: &str, value: &str) -> bool {
        if let Err(err) = std::fs::create_dir_all(&self.dir) {
            tracing::warn!(dir = %self.dir.display(), error = %err, "cannot create storage dir");
            return false;
        }
        std::fs::write(self.file_path(key), value).is_ok()
    }

    fn load_raw(&self, key: &str) -> Option<String> {
        std::fs::read_to_string(self.file_path(key)).ok()
    }
}
