use std::fmt;

use serde::{Deserialize, Serialize};
use stagegate_core::StageKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Workflow {
    Install,
    Uninstall,
}

impl Workflow {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Uninstall => "uninstall",
        }
    }

    pub fn stage_kind(self) -> StageKind {
        match self {
            Self::Install => StageKind::Installer,
            Self::Uninstall => StageKind::Uninstaller,
        }
    }
}

impl fmt::Display for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStep {
    Begin,
    Populate,
    Apply,
    Finalize,
}

impl BatchStep {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Begin => "begin",
            Self::Populate => "populate",
            Self::Apply => "apply",
            Self::Finalize => "finalize",
        }
    }

    pub fn next(self) -> Option<Self> {
        match self {
            Self::Begin => Some(Self::Populate),
            Self::Populate => Some(Self::Apply),
            Self::Apply => Some(Self::Finalize),
            Self::Finalize => None,
        }
    }
}

impl fmt::Display for BatchStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Queue position of a batch. Holds no stage state; the stage itself is
/// only ever reached through its handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCursor {
    pub workflow: Workflow,
    pub packages: Vec<String>,
    pub next_step: BatchStep,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before_unix_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl BatchCursor {
    pub fn new(workflow: Workflow, packages: Vec<String>) -> Self {
        Self {
            workflow,
            packages,
            next_step: BatchStep::Begin,
            not_before_unix_ms: None,
            last_error: None,
        }
    }

    pub fn remaining_wait_ms(&self, now_unix_ms: u64) -> Option<u64> {
        self.not_before_unix_ms
            .filter(|not_before| *not_before > now_unix_ms)
            .map(|not_before| not_before - now_unix_ms)
    }
}
