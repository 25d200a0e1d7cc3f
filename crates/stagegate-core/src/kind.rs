use std::fmt;

use serde::{Deserialize, Serialize};

/// Workflow family that created a stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StageKind {
    Installer,
    Uninstaller,
    Other(String),
}

impl StageKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Installer => "installer",
            Self::Uninstaller => "uninstaller",
            Self::Other(tag) => tag,
        }
    }

    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "installer" => Self::Installer,
            "uninstaller" => Self::Uninstaller,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for StageKind {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<StageKind> for String {
    fn from(value: StageKind) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
