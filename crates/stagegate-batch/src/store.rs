use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

/// Key/value storage that outlives a single request. Holds the stage handle
/// and the batch cursor for each slot.
pub trait HandleStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn clear(&self, key: &str) -> Result<()>;
}

pub fn handle_key(slot: &str) -> String {
    format!("{slot}.stage")
}

pub fn cursor_key(slot: &str) -> String {
    format!("{slot}.batch")
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct HandleStateFile {
    #[serde(default)]
    entries: BTreeMap<String, String>,
}

/// Handle store backed by a single TOML file.
#[derive(Debug, Clone)]
pub struct FileHandleStore {
    path: PathBuf,
}

impl FileHandleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_state(&self) -> Result<HandleStateFile> {
        if !self.path.exists() {
            return Ok(HandleStateFile::default());
        }

        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("failed reading handle store: {}", self.path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("failed parsing handle store: {}", self.path.display()))
    }

    fn save_state(&self, state: &HandleStateFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed creating handle store root: {}", parent.display())
            })?;
        }

        let content = toml::to_string(state)
            .with_context(|| format!("failed serializing handle store: {}", self.path.display()))?;
        let tmp_path = self.path.with_extension("toml.tmp");
        fs::write(&tmp_path, content)
            .with_context(|| format!("failed writing handle store: {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("failed replacing handle store: {}", self.path.display()))
    }
}

impl HandleStore for FileHandleStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.load_state()?.entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut state = self.load_state()?;
        state.entries.insert(key.to_string(), value.to_string());
        self.save_state(&state)
    }

    fn clear(&self, key: &str) -> Result<()> {
        let mut state = self.load_state()?;
        if state.entries.remove(key).is_none() {
            return Ok(());
        }
        self.save_state(&state)
    }
}

#[derive(Debug, Default)]
pub struct MemoryHandleStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryHandleStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow!("handle store lock poisoned"))
    }
}

impl HandleStore for MemoryHandleStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn clear(&self, key: &str) -> Result<()> {
        self.entries()?.remove(key);
        Ok(())
    }
}
