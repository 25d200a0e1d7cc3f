mod catalog;
mod directory_engine;
mod engine;
mod error;
mod fs_utils;
mod layout;
mod ledger;
mod lifecycle;
mod types;

pub use catalog::{latest_release, select_release, CatalogRelease, ReleaseCatalog, ReleaseSource};
pub use directory_engine::{
    DirectoryEngine, CACHE_DIR_NAME, PACKAGE_CACHE_FILE_NAME, PRE_APPLY_BACKUP_FILE_NAME,
};
pub use engine::StagingEngine;
pub use error::StageError;
pub use layout::{default_state_root, StateLayout};
pub use ledger::{
    current_unix_timestamp, generate_stage_id, is_valid_stage_id, validate_slot_name, SlotClaim,
    StageLedger, StepLock, STAGE_RECORD_VERSION,
};
pub use lifecycle::{Stage, StageLifecycle, DEFAULT_STAGE_TIMEOUT};
pub use types::{StageHandle, StageJournalEntry, StageOperation, StageRecord, StageState};

#[cfg(test)]
mod tests;
