use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use stagegate_core::{normalize_version, JsonInventory, PackageInventory, PackageSet};
use stagegate_stage::{
    latest_release, validate_slot_name, DirectoryEngine, ReleaseCatalog, ReleaseSource,
    StageError, StageHandle, StageLedger, StageLifecycle, StageState, StateLayout, StepLock,
};
use stagegate_validation::{ValidationPipeline, ValidationReport};
use tracing::{info, warn};

use crate::candidates::{uninstallable_packages, Extension, UninstallCandidate};
use crate::config::{StagegateConfig, DEFAULT_GOVERNED_NAMESPACE, DEFAULT_PROJECT_URL_PREFIX};
use crate::cursor::{BatchCursor, BatchStep, Workflow};
use crate::query::InstallQuery;
use crate::store::{cursor_key, handle_key, FileHandleStore, HandleStore};
use crate::BatchError;

pub const DEFAULT_FINALIZE_DELAY: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// A step ran; `next` is what the following call will do.
    Pending { completed: BatchStep, next: BatchStep },
    /// Too early for the next step; nothing was touched.
    Waiting { remaining: Duration },
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchStatus {
    pub cursor: Option<BatchCursor>,
    pub stage: Option<(StageHandle, StageState)>,
}

/// Splits an install or uninstall into single steps that each fit in one
/// request. Between requests only the stage handle and the cursor are kept.
pub struct BatchOrchestrator {
    lifecycle: StageLifecycle,
    store: Arc<dyn HandleStore>,
    inventory: Arc<dyn PackageInventory>,
    releases: Arc<dyn ReleaseSource>,
    namespace: String,
    url_prefix: String,
    finalize_delay: Duration,
}

impl BatchOrchestrator {
    pub fn new(
        lifecycle: StageLifecycle,
        store: Arc<dyn HandleStore>,
        inventory: Arc<dyn PackageInventory>,
        releases: Arc<dyn ReleaseSource>,
    ) -> Self {
        Self {
            lifecycle,
            store,
            inventory,
            releases,
            namespace: DEFAULT_GOVERNED_NAMESPACE.to_string(),
            url_prefix: DEFAULT_PROJECT_URL_PREFIX.to_string(),
            finalize_delay: DEFAULT_FINALIZE_DELAY,
        }
    }

    /// Wires the filesystem collaborators described by `config`.
    pub fn from_config(config: &StagegateConfig) -> anyhow::Result<Self> {
        let state_root = config.resolved_state_root()?;
        let layout = StateLayout::new(&state_root);
        layout.ensure_base_dirs()?;

        let inventory = JsonInventory::with_namespace(&config.governed_namespace);
        let releases: Arc<dyn ReleaseSource> =
            Arc::new(ReleaseCatalog::open(config.resolved_catalog_root()));
        let engine = DirectoryEngine::new(layout.clone(), inventory.clone(), releases.clone());
        let pipeline = ValidationPipeline::standard(
            Arc::new(inventory.clone()),
            &config.project_root,
            &config.governed_namespace,
        );
        let lifecycle = StageLifecycle::new(Arc::new(engine), StageLedger::new(layout.clone()), pipeline)
            .with_stage_timeout(config.stage_timeout());

        Ok(Self::new(
            lifecycle,
            Arc::new(FileHandleStore::new(layout.handles_path())),
            Arc::new(inventory),
            releases,
        )
        .with_namespace(&config.governed_namespace)
        .with_url_prefix(&config.project_url_prefix)
        .with_finalize_delay(config.finalize_delay()))
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_url_prefix(mut self, url_prefix: impl Into<String>) -> Self {
        self.url_prefix = url_prefix.into();
        self
    }

    pub fn with_finalize_delay(mut self, delay: Duration) -> Self {
        self.finalize_delay = delay;
        self
    }

    pub fn lifecycle(&self) -> &StageLifecycle {
        &self.lifecycle
    }

    pub fn project_root(&self) -> &Path {
        self.lifecycle.project_root()
    }

    /// Queues an install of the latest catalog release of the queried
    /// project. Returns the `package:version` spec that will be required.
    pub fn begin_install(&self, slot: &str, query: &str) -> Result<String, BatchError> {
        self.ensure_idle(slot)?;
        let query = InstallQuery::parse(query, &self.url_prefix)?;

        let active = self.active_packages()?;
        if let Some(installed) = active.package_by_project_name(&query.project) {
            return Err(BatchError::AlreadyInstalled {
                project: query.project,
                package: installed.name.clone(),
            });
        }

        let package = query.package_name(&self.namespace);
        let releases = self
            .releases
            .releases(&package)
            .map_err(BatchError::Catalog)?;
        let release = latest_release(&releases).ok_or_else(|| BatchError::NoInstallableRelease {
            project: query.project.clone(),
        })?;
        let spec = format!("{package}:{}", normalize_version(&release.version));

        self.save_cursor(slot, &BatchCursor::new(Workflow::Install, vec![spec.clone()]))?;
        info!(slot, project = %query.project, %spec, "queued install batch");
        Ok(spec)
    }

    pub fn begin_uninstall(&self, slot: &str, names: &[String]) -> Result<(), BatchError> {
        self.ensure_idle(slot)?;
        if names.is_empty() {
            return Err(BatchError::InvalidQuery(
                "Select at least one package to uninstall.".to_string(),
            ));
        }

        let active = self.active_packages()?;
        if let Some(missing) = names.iter().find(|name| !active.contains(name)) {
            return Err(BatchError::NotInstalled {
                name: missing.clone(),
            });
        }

        self.save_cursor(slot, &BatchCursor::new(Workflow::Uninstall, names.to_vec()))?;
        info!(slot, packages = %names.join(", "), "queued uninstall batch");
        Ok(())
    }

    pub fn run_next_step(&self, slot: &str) -> Result<StepOutcome, BatchError> {
        self.run_next_step_at(slot, now_unix_ms())
    }

    /// Runs exactly one step of the batch on `slot`. On failure the cursor
    /// stays on the failed step with the error recorded; calling again
    /// retries it. A second caller on the same slot gets `BatchInProgress`
    /// while a step is running.
    pub fn run_next_step_at(&self, slot: &str, now_unix_ms: u64) -> Result<StepOutcome, BatchError> {
        let _lock = self.step_lock(slot)?;
        let mut cursor = self.load_cursor(slot)?.ok_or_else(|| BatchError::NoBatch {
            slot: slot.to_string(),
        })?;

        if let Some(remaining) = cursor.remaining_wait_ms(now_unix_ms) {
            return Ok(StepOutcome::Waiting {
                remaining: Duration::from_millis(remaining),
            });
        }

        let step = cursor.next_step;
        if let Err(err) = self.execute_step(slot, &cursor, step) {
            warn!(slot, %step, error = %err, "batch step failed");
            cursor.last_error = Some(err.to_string());
            self.save_cursor(slot, &cursor)?;
            return Err(err);
        }

        let Some(next) = step.next() else {
            self.clear_batch(slot)?;
            info!(slot, workflow = %cursor.workflow, "batch finished");
            return Ok(StepOutcome::Done);
        };

        cursor.next_step = next;
        cursor.last_error = None;
        cursor.not_before_unix_ms = (step == BatchStep::Apply)
            .then(|| now_unix_ms.saturating_add(duration_ms(self.finalize_delay)));
        self.save_cursor(slot, &cursor)?;
        info!(slot, completed = %step, %next, "batch step finished");
        Ok(StepOutcome::Pending {
            completed: step,
            next,
        })
    }

    /// Force-destroys the slot's stage and forgets the batch, including a
    /// step lock left by a crashed process. Returns the id of the destroyed
    /// stage, if there was one.
    pub fn cancel(&self, slot: &str) -> Result<Option<String>, BatchError> {
        ensure_slot_name(slot)?;
        let mut released = None;
        if let Some(handle) = self.stored_handle(slot)? {
            match self.lifecycle.claim(&handle) {
                Ok(stage) => {
                    self.lifecycle.destroy(stage, true)?;
                    released = Some(handle.id);
                }
                Err(StageError::StageNotFound { .. }) => {}
                Err(err) => return Err(err.into()),
            }
        }
        if let Some(id) = self.lifecycle.force_release_slot(slot)? {
            released = Some(id);
        }

        self.clear_batch(slot)?;
        self.lifecycle
            .ledger()
            .clear_step_lock(slot)
            .map_err(|err| BatchError::Stage(StageError::Ledger(err)))?;
        info!(slot, stage = ?released, "batch cancelled");
        Ok(released)
    }

    /// Status-check validation of the slot's stage; empty when nothing is
    /// staged.
    pub fn preview_status(&self, slot: &str) -> Result<ValidationReport, BatchError> {
        let Some(handle) = self.current_handle(slot)? else {
            return Ok(ValidationReport::new());
        };
        match self.lifecycle.claim(&handle) {
            Ok(stage) => Ok(self.lifecycle.status_check(&stage)?),
            Err(StageError::StageNotFound { .. }) => Ok(ValidationReport::new()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn is_available(&self, slot: &str) -> Result<bool, BatchError> {
        Ok(self.load_cursor(slot)?.is_none() && self.lifecycle.is_available(slot)?)
    }

    pub fn status(&self, slot: &str) -> Result<BatchStatus, BatchError> {
        let cursor = self.load_cursor(slot)?;
        let stage = match self.current_handle(slot)? {
            Some(handle) => match self.lifecycle.claim(&handle) {
                Ok(stage) => Some((handle, stage.state())),
                Err(StageError::StageNotFound { .. }) => None,
                Err(err) => return Err(err.into()),
            },
            None => None,
        };
        Ok(BatchStatus { cursor, stage })
    }

    pub fn uninstallable(&self, extensions: &[Extension]) -> Result<Vec<UninstallCandidate>, BatchError> {
        Ok(uninstallable_packages(&self.active_packages()?, extensions))
    }

    fn execute_step(&self, slot: &str, cursor: &BatchCursor, step: BatchStep) -> Result<(), BatchError> {
        match step {
            BatchStep::Begin => {
                let handle = match self.adoptable_stage(slot, cursor.workflow)? {
                    Some(handle) => {
                        info!(slot, stage = %handle.id, "resuming stage from an earlier attempt");
                        handle
                    }
                    None => self.lifecycle.create(slot, cursor.workflow.stage_kind())?,
                };
                self.store
                    .set(&handle_key(slot), &handle.id)
                    .map_err(BatchError::Store)?;
            }
            BatchStep::Populate => {
                let mut stage = self.lifecycle.claim(&self.required_handle(slot)?)?;
                match cursor.workflow {
                    Workflow::Install => self.lifecycle.require(&mut stage, &cursor.packages)?,
                    Workflow::Uninstall => self.lifecycle.uninstall(&mut stage, &cursor.packages)?,
                }
            }
            BatchStep::Apply => {
                let mut stage = self.lifecycle.claim(&self.required_handle(slot)?)?;
                let report = self.lifecycle.apply(&mut stage)?;
                for warning in report.warnings() {
                    for message in &warning.messages {
                        info!(slot, %message, "apply warning");
                    }
                }
            }
            BatchStep::Finalize => {
                let mut stage = self.lifecycle.claim(&self.required_handle(slot)?)?;
                // A retry after a failed release finds the stage already finalized.
                if stage.state() != StageState::Finalized {
                    self.lifecycle.post_apply(&mut stage)?;
                }
                self.lifecycle.destroy(stage, false)?;
            }
        }
        Ok(())
    }

    fn step_lock(&self, slot: &str) -> Result<StepLock, BatchError> {
        ensure_slot_name(slot)?;
        self.lifecycle
            .ledger()
            .acquire_step_lock(slot)
            .map_err(|err| BatchError::Stage(StageError::Ledger(err)))?
            .ok_or_else(|| BatchError::BatchInProgress {
                slot: slot.to_string(),
            })
    }

    /// The slot's live stage, when it is a fresh stage of the right kind
    /// whose handle never made it into the store.
    fn adoptable_stage(&self, slot: &str, workflow: Workflow) -> Result<Option<StageHandle>, BatchError> {
        let Some(handle) = self.lifecycle.stage_for_slot(slot)? else {
            return Ok(None);
        };
        match self.lifecycle.claim(&handle) {
            Ok(stage)
                if stage.state() == StageState::Created
                    && *stage.kind() == workflow.stage_kind() =>
            {
                Ok(Some(handle))
            }
            Ok(_) | Err(StageError::StageNotFound { .. }) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn ensure_idle(&self, slot: &str) -> Result<(), BatchError> {
        if self.is_available(slot)? {
            return Ok(());
        }
        Err(BatchError::BatchInProgress {
            slot: slot.to_string(),
        })
    }

    fn active_packages(&self) -> Result<PackageSet, BatchError> {
        PackageSet::load(self.inventory.as_ref(), self.project_root())
            .map_err(|err| BatchError::Stage(StageError::from(err)))
    }

    fn stored_handle(&self, slot: &str) -> Result<Option<StageHandle>, BatchError> {
        Ok(self
            .store
            .get(&handle_key(slot))
            .map_err(BatchError::Store)?
            .map(StageHandle::new))
    }

    fn required_handle(&self, slot: &str) -> Result<StageHandle, BatchError> {
        self.stored_handle(slot)?.ok_or_else(|| BatchError::NoBatch {
            slot: slot.to_string(),
        })
    }

    fn current_handle(&self, slot: &str) -> Result<Option<StageHandle>, BatchError> {
        match self.stored_handle(slot)? {
            Some(handle) => Ok(Some(handle)),
            None => Ok(self.lifecycle.stage_for_slot(slot)?),
        }
    }

    fn load_cursor(&self, slot: &str) -> Result<Option<BatchCursor>, BatchError> {
        let Some(raw) = self
            .store
            .get(&cursor_key(slot))
            .map_err(BatchError::Store)?
        else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid batch cursor for slot '{slot}'"))
            .map(Some)
            .map_err(BatchError::Store)
    }

    fn save_cursor(&self, slot: &str, cursor: &BatchCursor) -> Result<(), BatchError> {
        let raw = serde_json::to_string(cursor)
            .with_context(|| format!("failed to serialize batch cursor for slot '{slot}'"))
            .map_err(BatchError::Store)?;
        self.store
            .set(&cursor_key(slot), &raw)
            .map_err(BatchError::Store)
    }

    fn clear_batch(&self, slot: &str) -> Result<(), BatchError> {
        self.store
            .clear(&cursor_key(slot))
            .and_then(|()| self.store.clear(&handle_key(slot)))
            .map_err(BatchError::Store)
    }
}

fn ensure_slot_name(slot: &str) -> Result<(), BatchError> {
    if validate_slot_name(slot) {
        return Ok(());
    }
    Err(StageError::InvalidSlot(slot.to_string()).into())
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

pub fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(duration_ms)
        .unwrap_or_default()
}
