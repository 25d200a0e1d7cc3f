use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use stagegate_core::StageKind;
use stagegate_validation::{Checkpoint, StageContext, ValidationPipeline, ValidationReport};
use tracing::{debug, info, warn};

use crate::ledger::{
    current_unix_timestamp, generate_stage_id, validate_slot_name, SlotClaim, StageLedger,
    STAGE_RECORD_VERSION,
};
use crate::{
    StageError, StageHandle, StageJournalEntry, StageOperation, StageRecord, StageState,
    StagingEngine,
};

pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(300);

/// A claimed stage: the in-memory view of its ledger record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    record: StageRecord,
}

impl Stage {
    pub fn handle(&self) -> StageHandle {
        StageHandle::new(self.record.id.clone())
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn slot(&self) -> &str {
        &self.record.slot
    }

    pub fn kind(&self) -> &StageKind {
        &self.record.kind
    }

    pub fn state(&self) -> StageState {
        self.record.state
    }

    pub fn operations(&self) -> &[StageOperation] {
        &self.record.operations
    }

    pub fn failure(&self) -> Option<&str> {
        self.record.failure.as_deref()
    }

    pub fn directory(&self) -> Option<&Path> {
        self.record.directory.as_deref()
    }

    pub fn record(&self) -> &StageRecord {
        &self.record
    }

    pub fn context(&self) -> StageContext {
        StageContext {
            id: self.record.id.clone(),
            kind: self.record.kind.clone(),
            directory: self.record.directory.clone(),
        }
    }

    fn committed_cleanly(&self) -> bool {
        match self.record.state {
            StageState::Finalized => true,
            StageState::Committed => self.record.failure.is_none(),
            _ => false,
        }
    }
}

/// Drives stages through create, populate, apply, finalize and destroy.
/// Every transition is persisted before the call returns, so any later
/// process can pick the stage up again from its handle.
pub struct StageLifecycle {
    engine: Arc<dyn StagingEngine>,
    ledger: StageLedger,
    pipeline: ValidationPipeline,
    stage_timeout: Duration,
}

impl StageLifecycle {
    pub fn new(engine: Arc<dyn StagingEngine>, ledger: StageLedger, pipeline: ValidationPipeline) -> Self {
        Self {
            engine,
            ledger,
            pipeline,
            stage_timeout: DEFAULT_STAGE_TIMEOUT,
        }
    }

    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    pub fn project_root(&self) -> &Path {
        self.pipeline.project_root()
    }

    pub fn ledger(&self) -> &StageLedger {
        &self.ledger
    }

    pub fn pipeline(&self) -> &ValidationPipeline {
        &self.pipeline
    }

    pub fn create(&self, slot: &str, kind: StageKind) -> Result<StageHandle, StageError> {
        if !validate_slot_name(slot) {
            return Err(StageError::InvalidSlot(slot.to_string()));
        }

        let id = generate_stage_id(slot);
        self.claim_slot_marker(slot, &id)?;

        let directory = match self.engine.allocate(&id, self.project_root()) {
            Ok(directory) => directory,
            Err(source) => {
                self.ledger
                    .clear_slot_marker(slot)
                    .map_err(StageError::Ledger)?;
                return Err(StageError::Engine {
                    operation: "allocate",
                    source,
                });
            }
        };

        let now = current_unix_timestamp().map_err(StageError::Ledger)?;
        let mut stage = Stage {
            record: StageRecord {
                version: STAGE_RECORD_VERSION,
                id: id.clone(),
                slot: slot.to_string(),
                kind,
                state: StageState::Absent,
                directory: Some(directory),
                failure: None,
                created_at_unix: now,
                updated_at_unix: now,
                journal_seq: 0,
                operations: Vec::new(),
            },
        };
        self.transition(&mut stage, StageState::Created, "create", None)?;
        Ok(StageHandle::new(id))
    }

    /// Rehydrates a stage from its handle. Never creates one.
    pub fn claim(&self, handle: &StageHandle) -> Result<Stage, StageError> {
        let not_found = || StageError::StageNotFound {
            id: handle.id.clone(),
        };

        let record = self
            .ledger
            .read_record(&handle.id)
            .map_err(StageError::Ledger)?
            .ok_or_else(not_found)?;
        if !record.state.is_live() {
            return Err(not_found());
        }
        if !record.directory.as_ref().is_some_and(|dir| dir.is_dir()) {
            debug!(stage = %record.id, "stage directory is gone");
            return Err(not_found());
        }

        Ok(Stage { record })
    }

    /// Handle of the live stage holding `slot`, if any.
    pub fn stage_for_slot(&self, slot: &str) -> Result<Option<StageHandle>, StageError> {
        Ok(self.live_record_for_slot(slot)?.map(|record| StageHandle::new(record.id)))
    }

    pub fn is_available(&self, slot: &str) -> Result<bool, StageError> {
        Ok(self.live_record_for_slot(slot)?.is_none())
    }

    pub fn require(&self, stage: &mut Stage, packages: &[String]) -> Result<(), StageError> {
        if matches!(stage.kind(), StageKind::Uninstaller) {
            return Err(StageError::UnsupportedOperation {
                kind: stage.kind().clone(),
                operation: "require",
            });
        }
        let operations = packages
            .iter()
            .map(|spec| StageOperation::require(spec))
            .collect::<Vec<_>>();
        self.populate(stage, operations, "require")
    }

    pub fn uninstall(&self, stage: &mut Stage, packages: &[String]) -> Result<(), StageError> {
        if matches!(stage.kind(), StageKind::Installer) {
            return Err(StageError::UnsupportedOperation {
                kind: stage.kind().clone(),
                operation: "uninstall",
            });
        }
        let operations = packages
            .iter()
            .map(|name| StageOperation::remove(name))
            .collect::<Vec<_>>();
        self.populate(stage, operations, "uninstall")
    }

    /// Runs the pre-apply checkpoint and commits the stage. Returns the
    /// warnings the checkpoint produced.
    pub fn apply(&self, stage: &mut Stage) -> Result<ValidationReport, StageError> {
        ensure_state(stage, &[StageState::Populated], "apply")?;

        let report = self.pipeline.run(Checkpoint::PreApply, &stage.context())?;
        if report.has_errors() {
            warn!(stage = stage.id(), errors = report.errors().len(), "apply blocked by validation");
            return Err(StageError::ValidationFailed(report));
        }

        self.transition(stage, StageState::Committing, "apply", None)?;
        let stage_dir = stage_directory(stage)?;
        if let Err(source) = self.engine.commit(&stage_dir, self.project_root()) {
            let failure = format!("{source:#}");
            stage.record.failure = Some(failure.clone());
            self.transition(stage, StageState::Committed, "commit", Some(failure))?;
            return Err(StageError::Engine {
                operation: "commit",
                source,
            });
        }

        self.transition(stage, StageState::Committed, "commit", None)?;
        Ok(report)
    }

    pub fn post_apply(&self, stage: &mut Stage) -> Result<(), StageError> {
        if stage.state() != StageState::Committed || stage.failure().is_some() {
            return Err(StageError::InvalidTransition {
                state: stage.state(),
                operation: "post-apply",
            });
        }

        let stage_dir = stage_directory(stage)?;
        self.engine
            .post_apply(&stage_dir, self.project_root())
            .map_err(|source| StageError::Engine {
                operation: "post-apply",
                source,
            })?;
        self.transition(stage, StageState::Finalized, "post-apply", None)
    }

    /// Releases the stage directory and frees its slot. Stages that have
    /// not committed cleanly need `force`.
    pub fn destroy(&self, mut stage: Stage, force: bool) -> Result<(), StageError> {
        if !stage.state().is_live() {
            return Err(StageError::InvalidTransition {
                state: stage.state(),
                operation: "destroy",
            });
        }
        if !force && !stage.committed_cleanly() {
            return Err(StageError::ForceRequired {
                id: stage.id().to_string(),
                state: stage.state(),
            });
        }

        if let Some(stage_dir) = stage.directory() {
            self.engine
                .release(stage_dir)
                .map_err(|source| StageError::Engine {
                    operation: "release",
                    source,
                })?;
        }

        let detail = force.then(|| "forced".to_string());
        self.transition(&mut stage, StageState::Destroyed, "destroy", detail)?;
        self.release_slot_marker(stage.slot(), stage.id())
    }

    /// Destroys whatever live stage holds `slot`, even one whose directory
    /// has disappeared. Returns the id of the released stage.
    pub fn force_release_slot(&self, slot: &str) -> Result<Option<String>, StageError> {
        let Some(record) = self.live_record_for_slot(slot)? else {
            return Ok(None);
        };
        let id = record.id.clone();
        self.destroy(Stage { record }, true)?;
        Ok(Some(id))
    }

    pub fn status_check(&self, stage: &Stage) -> Result<ValidationReport, StageError> {
        Ok(self.pipeline.run(Checkpoint::StatusCheck, &stage.context())?)
    }

    pub fn journal(&self, handle: &StageHandle) -> Result<Vec<StageJournalEntry>, StageError> {
        self.ledger
            .read_journal(&handle.id)
            .map_err(StageError::Ledger)
    }

    fn populate(
        &self,
        stage: &mut Stage,
        operations: Vec<StageOperation>,
        operation: &'static str,
    ) -> Result<(), StageError> {
        ensure_state(stage, &[StageState::Created, StageState::Populated], operation)?;
        if operations.is_empty() {
            debug!(stage = stage.id(), operation, "nothing to stage");
            return Ok(());
        }

        let stage_dir = stage_directory(stage)?;
        self.engine
            .stage(&operations, self.project_root(), &stage_dir, self.stage_timeout)
            .map_err(|source| StageError::Engine {
                operation: "stage",
                source,
            })?;

        let detail = operations
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        stage.record.operations.extend(operations);
        self.transition(stage, StageState::Populated, operation, Some(detail))
    }

    fn transition(
        &self,
        stage: &mut Stage,
        to: StageState,
        operation: &str,
        detail: Option<String>,
    ) -> Result<(), StageError> {
        let now = current_unix_timestamp().map_err(StageError::Ledger)?;
        let from = stage.record.state;
        stage.record.state = to;
        stage.record.updated_at_unix = now;
        stage.record.journal_seq += 1;

        self.ledger
            .write_record(&stage.record)
            .map_err(StageError::Ledger)?;
        let entry = StageJournalEntry {
            seq: stage.record.journal_seq,
            at_unix: now,
            operation: operation.to_string(),
            from,
            to,
            detail,
        };
        self.ledger
            .append_journal_entry(&stage.record.id, &entry)
            .map_err(StageError::Ledger)?;

        info!(
            stage = %stage.record.id,
            slot = %stage.record.slot,
            kind = %stage.record.kind,
            %from,
            %to,
            operation,
            "stage transition"
        );
        Ok(())
    }

    fn claim_slot_marker(&self, slot: &str, id: &str) -> Result<(), StageError> {
        for _ in 0..2 {
            match self.ledger.claim_slot(slot, id).map_err(StageError::Ledger)? {
                SlotClaim::Claimed(_) => return Ok(()),
                SlotClaim::Held { stage_id } => {
                    if self.record_is_live(&stage_id)? {
                        return Err(StageError::StageBusy {
                            slot: slot.to_string(),
                            stage_id,
                        });
                    }
                    debug!(slot, stale = %stage_id, "clearing stale slot marker");
                    self.ledger
                        .clear_slot_marker(slot)
                        .map_err(StageError::Ledger)?;
                }
            }
        }

        let holder = self
            .ledger
            .read_slot_marker(slot)
            .map_err(StageError::Ledger)?
            .unwrap_or_default();
        Err(StageError::StageBusy {
            slot: slot.to_string(),
            stage_id: holder,
        })
    }

    fn release_slot_marker(&self, slot: &str, id: &str) -> Result<(), StageError> {
        let holder = self
            .ledger
            .read_slot_marker(slot)
            .map_err(StageError::Ledger)?;
        if holder.as_deref() == Some(id) {
            self.ledger
                .clear_slot_marker(slot)
                .map_err(StageError::Ledger)?;
        }
        Ok(())
    }

    fn record_is_live(&self, id: &str) -> Result<bool, StageError> {
        Ok(self
            .ledger
            .read_record(id)
            .map_err(StageError::Ledger)?
            .is_some_and(|record| record.state.is_live()))
    }

    fn live_record_for_slot(&self, slot: &str) -> Result<Option<StageRecord>, StageError> {
        let Some(id) = self
            .ledger
            .read_slot_marker(slot)
            .map_err(StageError::Ledger)?
        else {
            return Ok(None);
        };
        Ok(self
            .ledger
            .read_record(&id)
            .map_err(StageError::Ledger)?
            .filter(|record| record.state.is_live() && record.slot == slot))
    }
}

fn ensure_state(
    stage: &Stage,
    allowed: &[StageState],
    operation: &'static str,
) -> Result<(), StageError> {
    if allowed.contains(&stage.state()) {
        return Ok(());
    }
    Err(StageError::InvalidTransition {
        state: stage.state(),
        operation,
    })
}

fn stage_directory(stage: &Stage) -> Result<std::path::PathBuf, StageError> {
    stage
        .record
        .directory
        .clone()
        .ok_or_else(|| StageError::StageNotFound {
            id: stage.record.id.clone(),
        })
}
