//! Persisted local key-value state (opaque strings, synchronous access).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::MnemoError;

/// Key holding the user's explicit language choice.
pub const LANGUAGE_OVERRIDE: &str = "languageOverride";

pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str) -> Result<(), MnemoError>;
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Process-lifetime settings.
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, key: &str, value: &str) -> Self {
        lock(&self.values).insert(key.to_owned(), value.to_owned());
        self
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.values).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), MnemoError> {
        lock(&self.values).insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

/// Settings kept as one JSON object on disk, rewritten on every `set`.
#[derive(Debug)]
pub struct JsonFileSettings {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl JsonFileSettings {
    /// Open (or start) the file at `path`. A missing or unreadable file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "settings file unreadable, starting empty"
                );
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };
        Self {
            path,
            values: Mutex::new(values),
        }
    }

    /// `<config dir>/mnemo/settings.json`, or the working directory when the
    /// platform has no config directory.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mnemo")
            .join("settings.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, values: &BTreeMap<String, String>) -> Result<(), MnemoError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| MnemoError::Settings(e.to_string()))?;
        }
        let raw = serde_json::to_string_pretty(values)
            .map_err(|e| MnemoError::Settings(e.to_string()))?;
        std::fs::write(&self.path, raw).map_err(|e| MnemoError::Settings(e.to_string()))
    }
}

impl SettingsStore for JsonFileSettings {
    fn get(&self, key: &str) -> Option<String> {
        lock(&self.values).get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<(), MnemoError> {
        let mut values = lock(&self.values);
        values.insert(key.to_owned(), value.to_owned());
        self.write(&values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_settings_get_set() {
        let s = MemorySettings::new().with(LANGUAGE_OVERRIDE, "ko");
        assert_eq!(s.get(LANGUAGE_OVERRIDE).as_deref(), Some("ko"));
        s.set(LANGUAGE_OVERRIDE, "auto").unwrap();
        assert_eq!(s.get(LANGUAGE_OVERRIDE).as_deref(), Some("auto"));
        assert!(s.get("other").is_none());
    }

    #[test]
    fn file_settings_persist_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let s = JsonFileSettings::open(&path);
        assert!(s.get(LANGUAGE_OVERRIDE).is_none());
        s.set(LANGUAGE_OVERRIDE, "ja").unwrap();

        let reopened = JsonFileSettings::open(&path);
        assert_eq!(reopened.get(LANGUAGE_OVERRIDE).as_deref(), Some("ja"));
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        let s = JsonFileSettings::open(&path);
        assert!(s.get(LANGUAGE_OVERRIDE).is_none());
        s.set(LANGUAGE_OVERRIDE, "fr").unwrap();
        assert_eq!(JsonFileSettings::open(&path).get(LANGUAGE_OVERRIDE).as_deref(), Some("fr"));
    }
}
