use stagegate_core::{InventoryError, StageKind};
use stagegate_validation::ValidationReport;
use thiserror::Error;

use crate::types::StageState;

#[derive(Debug, Error)]
pub enum StageError {
    #[error("slot '{slot}' is busy with stage {stage_id}")]
    StageBusy { slot: String, stage_id: String },
    #[error("stage '{id}' not found")]
    StageNotFound { id: String },
    #[error("{operation} is not supported by {kind} stages")]
    UnsupportedOperation {
        kind: StageKind,
        operation: &'static str,
    },
    #[error("validation failed: {0}")]
    ValidationFailed(ValidationReport),
    #[error("staging engine failed during {operation}")]
    Engine {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error(transparent)]
    DirectoryUnreadable(#[from] InventoryError),
    #[error("cannot {operation} a stage in state {state}")]
    InvalidTransition {
        state: StageState,
        operation: &'static str,
    },
    #[error("stage {id} is {state} and holds uncommitted work; destroy it with force")]
    ForceRequired { id: String, state: StageState },
    #[error("invalid slot name '{0}'")]
    InvalidSlot(String),
    #[error("stage ledger failure")]
    Ledger(#[source] anyhow::Error),
}

impl StageError {
    pub fn validation_report(&self) -> Option<&ValidationReport> {
        match self {
            Self::ValidationFailed(report) => Some(report),
            _ => None,
        }
    }
}
