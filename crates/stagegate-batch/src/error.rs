use stagegate_stage::StageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error(transparent)]
    Stage(#[from] StageError),
    #[error("no batch is in progress for slot '{slot}'")]
    NoBatch { slot: String },
    #[error("there is another operation in progress for slot '{slot}'")]
    BatchInProgress { slot: String },
    #[error("{0}")]
    InvalidQuery(String),
    #[error("The project {project} is already installed.")]
    AlreadyInstalled { project: String, package: String },
    #[error("No installable releases found for the project {project}.")]
    NoInstallableRelease { project: String },
    #[error("package '{name}' is not installed")]
    NotInstalled { name: String },
    #[error("failed to read release catalog")]
    Catalog(#[source] anyhow::Error),
    #[error("handle store failure")]
    Store(#[source] anyhow::Error),
}

impl BatchError {
    pub fn stage_error(&self) -> Option<&StageError> {
        match self {
            Self::Stage(err) => Some(err),
            _ => None,
        }
    }
}
