use anyhow::{anyhow, Context, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::warn;

use crate::{StageJournalEntry, StageRecord, StateLayout};

pub const STAGE_RECORD_VERSION: u32 = 1;

static STAGE_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotClaim {
    Claimed(PathBuf),
    Held { stage_id: String },
}

/// Exclusive right to run one batch step on a slot. The lock file is
/// removed when the guard drops.
#[derive(Debug)]
pub struct StepLock {
    path: PathBuf,
}

impl StepLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StepLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %err, "failed to remove step lock");
            }
        }
    }
}

/// Stage records, per-stage transition journals and per-slot ownership
/// markers under the state root.
#[derive(Debug, Clone)]
pub struct StageLedger {
    layout: StateLayout,
}

impl StageLedger {
    pub fn new(layout: StateLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &StateLayout {
        &self.layout
    }

    pub fn claim_slot(&self, slot: &str, stage_id: &str) -> Result<SlotClaim> {
        let path = self.layout.slot_marker_path(slot);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                let existing = self.read_slot_marker(slot)?.unwrap_or_default();
                return Ok(SlotClaim::Held { stage_id: existing });
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to claim slot marker: {}", path.display())
                });
            }
        };

        file.write_all(format!("{stage_id}\n").as_bytes())
            .with_context(|| format!("failed to write slot marker: {}", path.display()))?;
        file.flush()
            .with_context(|| format!("failed to flush slot marker: {}", path.display()))?;
        Ok(SlotClaim::Claimed(path))
    }

    pub fn read_slot_marker(&self, slot: &str) -> Result<Option<String>> {
        let path = self.layout.slot_marker_path(slot);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read slot marker: {}", path.display()));
            }
        };

        let stage_id = raw.trim();
        if stage_id.is_empty() {
            return Ok(None);
        }
        Ok(Some(stage_id.to_string()))
    }

    pub fn clear_slot_marker(&self, slot: &str) -> Result<()> {
        let path = self.layout.slot_marker_path(slot);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err)
                .with_context(|| format!("failed to clear slot marker: {}", path.display())),
        }
    }

    /// Takes the slot's step lock. `None` when another step holds it.
    pub fn acquire_step_lock(&self, slot: &str) -> Result<Option<StepLock>> {
        let path = self.layout.step_lock_path(slot);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to take step lock: {}", path.display()));
            }
        };
        let lock = StepLock { path };

        file.write_all(format!("{}\n", std::process::id()).as_bytes())
            .with_context(|| format!("failed to write step lock: {}", lock.path.display()))?;
        Ok(Some(lock))
    }

    /// Removes a step lock left behind by a process that died mid-step.
    pub fn clear_step_lock(&self, slot: &str) -> Result<()> {
        let path = self.layout.step_lock_path(slot);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("failed to clear step lock: {}", path.display()))
            }
        }
    }

    pub fn write_record(&self, record: &StageRecord) -> Result<PathBuf> {
        let path = self.layout.stage_record_path(&record.id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let payload = toml::to_string(record)
            .with_context(|| format!("failed to serialize stage record '{}'", record.id))?;
        let tmp_path = path.with_extension("toml.tmp");
        fs::write(&tmp_path, payload)
            .with_context(|| format!("failed to write stage record: {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &path)
            .with_context(|| format!("failed to replace stage record: {}", path.display()))?;
        Ok(path)
    }

    pub fn read_record(&self, stage_id: &str) -> Result<Option<StageRecord>> {
        if !is_valid_stage_id(stage_id) {
            return Ok(None);
        }

        let path = self.layout.stage_record_path(stage_id);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read stage record: {}", path.display()));
            }
        };

        let record: StageRecord = toml::from_str(&raw)
            .with_context(|| format!("failed parsing stage record: {}", path.display()))?;
        if record.version != STAGE_RECORD_VERSION {
            return Err(anyhow!(
                "unsupported stage record version {} (expected {}): {}",
                record.version,
                STAGE_RECORD_VERSION,
                path.display()
            ));
        }
        Ok(Some(record))
    }

    pub fn append_journal_entry(&self, stage_id: &str, entry: &StageJournalEntry) -> Result<PathBuf> {
        let path = self.layout.stage_journal_path(stage_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let line = serde_json::to_string(entry)
            .with_context(|| format!("failed to serialize journal entry for '{stage_id}'"))?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open stage journal: {}", path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("failed to append stage journal: {}", path.display()))?;
        file.write_all(b"\n").with_context(|| {
            format!("failed to append stage journal newline: {}", path.display())
        })?;
        file.flush()
            .with_context(|| format!("failed to flush stage journal: {}", path.display()))?;
        Ok(path)
    }

    pub fn read_journal(&self, stage_id: &str) -> Result<Vec<StageJournalEntry>> {
        let path = self.layout.stage_journal_path(stage_id);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read stage journal: {}", path.display()));
            }
        };

        raw.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| {
                serde_json::from_str(line).with_context(|| {
                    format!("invalid stage journal line in {}: {line}", path.display())
                })
            })
            .collect()
    }
}

pub fn generate_stage_id(slot: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    let sequence = STAGE_ID_COUNTER.fetch_add(1, Ordering::Relaxed);

    let mut hasher = Sha256::new();
    hasher.update(slot.as_bytes());
    hasher.update(nanos.to_le_bytes());
    hasher.update(std::process::id().to_le_bytes());
    hasher.update(sequence.to_le_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("stage-{}", &digest[..16])
}

pub fn is_valid_stage_id(stage_id: &str) -> bool {
    stage_id
        .strip_prefix("stage-")
        .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|ch| ch.is_ascii_hexdigit()))
}

pub fn validate_slot_name(slot: &str) -> bool {
    let mut chars = slot.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    slot.len() <= 128
        && first.is_ascii_alphanumeric()
        && chars.all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
}

pub fn current_unix_timestamp() -> Result<u64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system time is before unix epoch")?
        .as_secs())
}
