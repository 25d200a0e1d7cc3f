use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::package::{project_for_name, InstalledPackage};
use crate::package_set::PackageSet;

pub const INVENTORY_FILE_NAME: &str = "installed.json";

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("no package inventory found in {}", path.display())]
    DirectoryUnreadable { path: PathBuf },
    #[error("failed to read package inventory: {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse package inventory: {}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write package inventory: {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("package '{name}' is listed more than once")]
    DuplicatePackage { name: String },
}

/// Lists the packages installed in a directory.
pub trait PackageInventory: Send + Sync {
    fn list_packages(&self, directory: &Path) -> Result<PackageSet, InventoryError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct InventoryFile {
    #[serde(default)]
    packages: Vec<InstalledPackage>,
}

/// Reads `installed.json` from a project or staging directory. Entries
/// without an explicit project get one looked up from the governed
/// namespace, when one is configured.
#[derive(Debug, Clone, Default)]
pub struct JsonInventory {
    namespace: Option<String>,
}

impl JsonInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
        }
    }

    pub fn inventory_path(directory: &Path) -> PathBuf {
        directory.join(INVENTORY_FILE_NAME)
    }

    pub fn write_package_set(directory: &Path, packages: &PackageSet) -> Result<PathBuf, InventoryError> {
        let path = Self::inventory_path(directory);
        let file = InventoryFile {
            packages: packages.iter().cloned().collect(),
        };
        let payload = serde_json::to_string_pretty(&file).map_err(|source| {
            InventoryError::Malformed {
                path: path.clone(),
                source,
            }
        })?;

        let tmp_path = directory.join(format!("{INVENTORY_FILE_NAME}.tmp"));
        fs::write(&tmp_path, format!("{payload}\n")).map_err(|source| InventoryError::Write {
            path: tmp_path.clone(),
            source,
        })?;
        fs::rename(&tmp_path, &path).map_err(|source| InventoryError::Write {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}

impl PackageInventory for JsonInventory {
    fn list_packages(&self, directory: &Path) -> Result<PackageSet, InventoryError> {
        let path = Self::inventory_path(directory);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(InventoryError::DirectoryUnreadable {
                    path: directory.to_path_buf(),
                });
            }
            Err(source) => return Err(InventoryError::Read { path, source }),
        };

        let file: InventoryFile = serde_json::from_str(&raw)
            .map_err(|source| InventoryError::Malformed { path, source })?;
        let packages = file
            .packages
            .into_iter()
            .map(|mut package| {
                if package.project.is_none() {
                    if let Some(namespace) = &self.namespace {
                        package.project = project_for_name(&package.name, namespace);
                    }
                }
                package
            })
            .collect();
        PackageSet::new(packages)
    }
}
