use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use stagegate_core::StageKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageState {
    Absent,
    Created,
    Populated,
    Committing,
    Committed,
    Finalized,
    Destroyed,
}

impl StageState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Created => "created",
            Self::Populated => "populated",
            Self::Committing => "committing",
            Self::Committed => "committed",
            Self::Finalized => "finalized",
            Self::Destroyed => "destroyed",
        }
    }

    pub fn is_live(self) -> bool {
        !matches!(self, Self::Absent | Self::Destroyed)
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StageOperation {
    Require {
        package: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        constraint: Option<String>,
    },
    Remove {
        package: String,
    },
}

impl StageOperation {
    /// Parses `vendor/name` or `vendor/name:constraint`.
    pub fn require(spec: &str) -> Self {
        let spec = spec.trim();
        match spec.split_once(':') {
            Some((package, constraint)) if !constraint.trim().is_empty() => Self::Require {
                package: package.trim().to_string(),
                constraint: Some(constraint.trim().to_string()),
            },
            Some((package, _)) => Self::Require {
                package: package.trim().to_string(),
                constraint: None,
            },
            None => Self::Require {
                package: spec.to_string(),
                constraint: None,
            },
        }
    }

    pub fn remove(package: &str) -> Self {
        Self::Remove {
            package: package.trim().to_string(),
        }
    }

    pub fn package(&self) -> &str {
        match self {
            Self::Require { package, .. } | Self::Remove { package } => package,
        }
    }
}

impl fmt::Display for StageOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Require {
                package,
                constraint: Some(constraint),
            } => write!(f, "require {package}:{constraint}"),
            Self::Require { package, .. } => write!(f, "require {package}"),
            Self::Remove { package } => write!(f, "remove {package}"),
        }
    }
}

/// Opaque id of an in-flight stage; the only stage value that crosses a
/// request boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StageHandle {
    pub id: String,
}

impl StageHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl fmt::Display for StageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub version: u32,
    pub id: String,
    pub slot: String,
    pub kind: StageKind,
    pub state: StageState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub created_at_unix: u64,
    pub updated_at_unix: u64,
    #[serde(default)]
    pub journal_seq: u64,
    #[serde(default)]
    pub operations: Vec<StageOperation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageJournalEntry {
    pub seq: u64,
    pub at_unix: u64,
    pub operation: String,
    pub from: StageState,
    pub to: StageState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
