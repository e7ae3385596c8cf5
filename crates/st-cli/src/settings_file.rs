use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use st_core::Settings;
use st_runtime::{HostError, SettingsStore};

/// Load settings from a JSON file. A missing file reads as fresh defaults.
pub fn read_settings(path: &Path) -> Result<Settings, String> {
    if !path.exists() {
        log::debug!("{} not found, starting from defaults", path.display());
        return Ok(Settings::default());
    }
    let text = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read '{}': {}", path.display(), e))?;
    let value: serde_json::Value = serde_json::from_str(&text)
        .map_err(|e| format!("Invalid settings in '{}': {}", path.display(), e))?;
    Ok(Settings::from_stored(Some(value)))
}

pub fn write_settings(path: &Path, settings: &Settings) -> Result<(), String> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create '{}': {}", parent.display(), e))?;
    }
    let text = serde_json::to_string_pretty(settings)
        .map_err(|e| format!("Failed to serialize settings: {}", e))?;
    fs::write(path, text).map_err(|e| format!("Failed to write '{}': {}", path.display(), e))
}

/// Settings persisted to a file on every write.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

#[async_trait(?Send)]
impl SettingsStore for FileStore {
    async fn read(&self) -> Result<Settings, HostError> {
        read_settings(&self.path).map_err(HostError::new)
    }

    async fn write(&self, settings: &Settings) -> Result<(), HostError> {
        write_settings(&self.path, settings).map_err(HostError::new)
    }
}

/// Settings held in memory; writes never reach the file they came from.
pub struct MemoryStore {
    settings: RefCell<Settings>,
}

impl MemoryStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: RefCell::new(settings),
        }
    }
}

#[async_trait(?Send)]
impl SettingsStore for MemoryStore {
    async fn read(&self) -> Result<Settings, HostError> {
        Ok(self.settings.borrow().clone())
    }

    async fn write(&self, settings: &Settings) -> Result<(), HostError> {
        *self.settings.borrow_mut() = settings.clone();
        Ok(())
    }
}
