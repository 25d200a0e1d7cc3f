use stagegate_core::{normalize_version, stability_of, PackageSetDiff, StageKind};

use crate::report::ValidationResult;
use crate::types::{Checkpoint, StageContext};

/// A check over the diff between the active and staged package sets.
///
/// Implementations must not mutate anything; they only report.
pub trait Validator: Send + Sync {
    fn name(&self) -> &'static str;

    fn runs_at(&self, checkpoint: Checkpoint) -> bool;

    fn validate(&self, stage: &StageContext, diff: &PackageSetDiff) -> Vec<ValidationResult>;
}

/// Refuses to install non-stable releases of packages in the governed
/// namespace. Only installer stages are inspected.
#[derive(Debug, Clone)]
pub struct StabilityGate {
    namespace: String,
}

impl StabilityGate {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }
}

impl Validator for StabilityGate {
    fn name(&self) -> &'static str {
        "stability-gate"
    }

    fn runs_at(&self, _checkpoint: Checkpoint) -> bool {
        true
    }

    fn validate(&self, stage: &StageContext, diff: &PackageSetDiff) -> Vec<ValidationResult> {
        if stage.kind != StageKind::Installer {
            return Vec::new();
        }

        let mut results = Vec::new();
        for package in &diff.added() {
            if !package.in_namespace(&self.namespace) {
                continue;
            }
            let stability = stability_of(&normalize_version(&package.version));
            if stability.is_stable() {
                continue;
            }
            results.push(
                ValidationResult::error(format!(
                    "Unable to install {}, version {}, because only installing stable modules is supported.",
                    package.project_name(),
                    package.version
                ))
                .for_package(&package.name),
            );
        }
        results
    }
}

pub const CHANGED_VERSIONS_HEADING: &str =
    "The following packages have changed versions in the staging directory:";
pub const ADDED_PACKAGES_HEADING: &str =
    "The following packages were added in the staging directory:";

/// Lists every version change and addition as warnings for the status
/// preview.
#[derive(Debug, Clone, Default)]
pub struct ChangeReporter;

impl Validator for ChangeReporter {
    fn name(&self) -> &'static str {
        "change-reporter"
    }

    fn runs_at(&self, checkpoint: Checkpoint) -> bool {
        checkpoint == Checkpoint::StatusCheck
    }

    fn validate(&self, _stage: &StageContext, diff: &PackageSetDiff) -> Vec<ValidationResult> {
        let mut results = Vec::new();

        let changed = diff
            .changed()
            .iter()
            .filter_map(|staged| {
                diff.active().get(&staged.name).map(|active| {
                    format!(
                        "{} changed from {} to {}",
                        staged.name, active.version, staged.version
                    )
                })
            })
            .collect::<Vec<_>>();
        if !changed.is_empty() {
            results.push(ValidationResult::warnings(changed, CHANGED_VERSIONS_HEADING));
        }

        let added = diff
            .added()
            .iter()
            .map(|package| format!("{} added with version {}", package.name, package.version))
            .collect::<Vec<_>>();
        if !added.is_empty() {
            results.push(ValidationResult::warnings(added, ADDED_PACKAGES_HEADING));
        }

        results
    }
}
