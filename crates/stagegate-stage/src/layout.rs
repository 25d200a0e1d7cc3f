use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateLayout {
    root: PathBuf,
}

impl StateLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.root.join("staging")
    }

    pub fn stage_dir(&self, id: &str) -> PathBuf {
        self.staging_dir().join(id)
    }

    pub fn ledger_dir(&self) -> PathBuf {
        self.root.join("ledger")
    }

    pub fn stage_record_path(&self, id: &str) -> PathBuf {
        self.ledger_dir().join(format!("{id}.toml"))
    }

    pub fn stage_journal_path(&self, id: &str) -> PathBuf {
        self.ledger_dir().join(format!("{id}.journal"))
    }

    pub fn slots_dir(&self) -> PathBuf {
        self.root.join("slots")
    }

    pub fn slot_marker_path(&self, slot: &str) -> PathBuf {
        self.slots_dir().join(format!("{slot}.active"))
    }

    pub fn step_lock_path(&self, slot: &str) -> PathBuf {
        self.slots_dir().join(format!("{slot}.step.lock"))
    }

    pub fn handles_path(&self) -> PathBuf {
        self.root.join("handles.toml")
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        for dir in [self.staging_dir(), self.ledger_dir(), self.slots_dir()] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}

pub fn default_state_root() -> Result<PathBuf> {
    if let Ok(home) = std::env::var("STAGEGATE_HOME") {
        if !home.trim().is_empty() {
            return Ok(PathBuf::from(home));
        }
    }

    if cfg!(windows) {
        let app_data = std::env::var("LOCALAPPDATA")
            .context("LOCALAPPDATA is not set; cannot resolve Windows state root")?;
        return Ok(PathBuf::from(app_data).join("Stagegate"));
    }

    let home = std::env::var("HOME").context("HOME is not set; cannot resolve state root")?;
    Ok(PathBuf::from(home).join(".stagegate"))
}
