use std::path::{Path, PathBuf};
use std::sync::Arc;

use stagegate_core::{InventoryError, PackageInventory, PackageSet, PackageSetDiff};
use tracing::{debug, warn};

use crate::report::ValidationReport;
use crate::types::{Checkpoint, StageContext};
use crate::validator::{ChangeReporter, StabilityGate, Validator};

/// Ordered validators run at the status-check and pre-apply checkpoints.
pub struct ValidationPipeline {
    inventory: Arc<dyn PackageInventory>,
    project_root: PathBuf,
    validators: Vec<Box<dyn Validator>>,
}

impl ValidationPipeline {
    pub fn new(inventory: Arc<dyn PackageInventory>, project_root: impl Into<PathBuf>) -> Self {
        Self {
            inventory,
            project_root: project_root.into(),
            validators: Vec::new(),
        }
    }

    /// Pipeline with the stability gate followed by the change reporter.
    pub fn standard(
        inventory: Arc<dyn PackageInventory>,
        project_root: impl Into<PathBuf>,
        namespace: &str,
    ) -> Self {
        Self::new(inventory, project_root)
            .with_validator(StabilityGate::new(namespace))
            .with_validator(ChangeReporter)
    }

    pub fn with_validator(mut self, validator: impl Validator + 'static) -> Self {
        self.validators.push(Box::new(validator));
        self
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn validator_names(&self) -> Vec<&'static str> {
        self.validators.iter().map(|validator| validator.name()).collect()
    }

    /// Snapshots both package sets afresh and runs every validator
    /// registered for `checkpoint`. A stage without a directory yields an
    /// empty report.
    pub fn run(
        &self,
        checkpoint: Checkpoint,
        stage: &StageContext,
    ) -> Result<ValidationReport, InventoryError> {
        let mut report = ValidationReport::new();
        let Some(stage_dir) = stage.directory.as_deref().filter(|_| stage.directory_exists())
        else {
            debug!(stage = %stage.id, %checkpoint, "stage directory missing, nothing to validate");
            return Ok(report);
        };

        let active = PackageSet::load(self.inventory.as_ref(), &self.project_root)?;
        let staged = PackageSet::load(self.inventory.as_ref(), stage_dir)?;
        let diff = PackageSetDiff::new(active, staged);

        for validator in &self.validators {
            if !validator.runs_at(checkpoint) {
                continue;
            }
            let results = validator.validate(stage, &diff);
            debug!(
                stage = %stage.id,
                %checkpoint,
                validator = validator.name(),
                findings = results.len(),
                "validator finished"
            );
            report.extend(results);
        }

        if report.has_errors() {
            warn!(stage = %stage.id, %checkpoint, errors = report.errors().len(), "validation reported errors");
        }
        Ok(report)
    }
}
