use std::fmt;
use std::path::PathBuf;

use stagegate_core::StageKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Checkpoint {
    /// Advisory preview, may run any time.
    StatusCheck,
    /// Runs right before a commit; errors here block it.
    PreApply,
}

impl Checkpoint {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StatusCheck => "status-check",
            Self::PreApply => "pre-apply",
        }
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of the stage under validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageContext {
    pub id: String,
    pub kind: StageKind,
    pub directory: Option<PathBuf>,
}

impl StageContext {
    pub fn directory_exists(&self) -> bool {
        self.directory.as_ref().is_some_and(|dir| dir.is_dir())
    }
}
