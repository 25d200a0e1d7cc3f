use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use stagegate_core::PackageSet;

/// A module known to the host application, with the project that ships it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extension {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default)]
    pub enabled: bool,
}

impl Extension {
    pub fn new(name: impl Into<String>, project: impl Into<String>, enabled: bool) -> Self {
        Self {
            name: name.into(),
            project: Some(project.into()),
            enabled,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ExtensionsFile {
    #[serde(default)]
    extensions: Vec<Extension>,
}

/// Reads `[[extensions]]` entries. A missing file lists nothing.
pub fn load_extensions(path: &Path) -> Result<Vec<Extension>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed reading extensions: {}", path.display()));
        }
    };
    let file: ExtensionsFile = toml::from_str(&raw)
        .with_context(|| format!("failed parsing extensions: {}", path.display()))?;
    Ok(file.extensions)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UninstallCandidate {
    pub package: String,
    pub project: String,
}

impl fmt::Display for UninstallCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.project, self.package)
    }
}

/// Installed packages that no enabled extension depends on. A package is a
/// candidate when one of its extensions is disabled, and is dropped again if
/// any enabled extension belongs to it.
pub fn uninstallable_packages(active: &PackageSet, extensions: &[Extension]) -> Vec<UninstallCandidate> {
    let mut candidates: Vec<UninstallCandidate> = Vec::new();
    let mut required: HashSet<&str> = HashSet::new();

    for extension in extensions {
        let Some(project) = extension.project.as_deref() else {
            continue;
        };
        let Some(package) = active.package_by_project_name(project) else {
            continue;
        };

        if extension.enabled {
            required.insert(package.name.as_str());
        } else if !candidates
            .iter()
            .any(|candidate| candidate.package == package.name)
        {
            candidates.push(UninstallCandidate {
                package: package.name.clone(),
                project: project.to_string(),
            });
        }
    }

    candidates.retain(|candidate| !required.contains(candidate.package.as_str()));
    candidates
}
