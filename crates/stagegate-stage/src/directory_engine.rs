use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use stagegate_core::{
    normalize_version, InstalledPackage, JsonInventory, PackageInventory, PackageSet,
};
use tracing::debug;

use crate::catalog::{select_release, ReleaseSource};
use crate::fs_utils::{remove_dir_if_exists, remove_file_if_exists};
use crate::{StageOperation, StateLayout};

pub const PRE_APPLY_BACKUP_FILE_NAME: &str = "installed.json.pre-apply";
pub const CACHE_DIR_NAME: &str = ".stagegate-cache";
pub const PACKAGE_CACHE_FILE_NAME: &str = "packages.txt";

/// Staging engine that keeps each stage as a directory holding its own
/// package inventory under the state root.
pub struct DirectoryEngine {
    layout: StateLayout,
    inventory: JsonInventory,
    releases: Arc<dyn ReleaseSource>,
}

impl DirectoryEngine {
    pub fn new(layout: StateLayout, inventory: JsonInventory, releases: Arc<dyn ReleaseSource>) -> Self {
        Self {
            layout,
            inventory,
            releases,
        }
    }

    pub fn package_cache_path(active_dir: &Path) -> PathBuf {
        active_dir.join(CACHE_DIR_NAME).join(PACKAGE_CACHE_FILE_NAME)
    }

    fn resolve_require(&self, package: &str, constraint: Option<&str>) -> Result<InstalledPackage> {
        let releases = self
            .releases
            .releases(package)
            .with_context(|| format!("failed loading releases for {package}"))?;
        if releases.is_empty() {
            bail!("package '{package}' was not found in the release catalog");
        }

        let release = select_release(&releases, constraint)?.ok_or_else(|| {
            anyhow!(
                "no release of {package} satisfies '{}'",
                constraint.unwrap_or("*")
            )
        })?;

        let mut resolved = InstalledPackage::new(package, normalize_version(&release.version));
        if let Some(project) = &release.project {
            resolved = resolved.with_project(project.clone());
        }
        Ok(resolved)
    }
}

impl crate::StagingEngine for DirectoryEngine {
    fn allocate(&self, stage_id: &str, active_dir: &Path) -> Result<PathBuf> {
        let stage_dir = self.layout.stage_dir(stage_id);
        if stage_dir.exists() {
            bail!("staging directory already exists: {}", stage_dir.display());
        }

        let active = self.inventory.list_packages(active_dir)?;
        fs::create_dir_all(&stage_dir).with_context(|| {
            format!("failed to create staging directory: {}", stage_dir.display())
        })?;
        JsonInventory::write_package_set(&stage_dir, &active)?;
        debug!(stage = stage_id, dir = %stage_dir.display(), packages = active.len(), "allocated staging directory");
        Ok(stage_dir)
    }

    fn stage(
        &self,
        operations: &[StageOperation],
        _active_dir: &Path,
        stage_dir: &Path,
        timeout: Duration,
    ) -> Result<()> {
        let started = Instant::now();
        let mut packages = self.inventory.list_packages(stage_dir)?.into_packages();

        for operation in operations {
            if started.elapsed() > timeout {
                bail!(
                    "staging timed out after {}s while processing '{operation}'",
                    timeout.as_secs()
                );
            }

            match operation {
                StageOperation::Require {
                    package,
                    constraint,
                } => {
                    let resolved = self.resolve_require(package, constraint.as_deref())?;
                    debug!(package = %resolved.name, version = %resolved.version, "staging require");
                    match packages.iter_mut().find(|existing| existing.name == *package) {
                        Some(existing) => *existing = resolved,
                        None => packages.push(resolved),
                    }
                }
                StageOperation::Remove { package } => {
                    let before = packages.len();
                    packages.retain(|existing| existing.name != *package);
                    if packages.len() == before {
                        bail!("package '{package}' is not installed in the staging directory");
                    }
                    debug!(package = %package, "staging removal");
                }
            }
        }

        let staged = PackageSet::new(packages)?;
        JsonInventory::write_package_set(stage_dir, &staged)?;
        Ok(())
    }

    fn commit(&self, stage_dir: &Path, active_dir: &Path) -> Result<()> {
        let staged = self.inventory.list_packages(stage_dir)?;

        let active_inventory = JsonInventory::inventory_path(active_dir);
        let backup = stage_dir.join(PRE_APPLY_BACKUP_FILE_NAME);
        fs::copy(&active_inventory, &backup).with_context(|| {
            format!(
                "failed to back up {} to {}",
                active_inventory.display(),
                backup.display()
            )
        })?;

        JsonInventory::write_package_set(active_dir, &staged)?;
        debug!(active = %active_dir.display(), packages = staged.len(), "committed staged inventory");
        Ok(())
    }

    fn post_apply(&self, _stage_dir: &Path, active_dir: &Path) -> Result<()> {
        let active = self.inventory.list_packages(active_dir)?;
        let cache_path = Self::package_cache_path(active_dir);
        let cache_dir = active_dir.join(CACHE_DIR_NAME);
        fs::create_dir_all(&cache_dir)
            .with_context(|| format!("failed to create {}", cache_dir.display()))?;

        let mut listing = String::new();
        for package in &active {
            listing.push_str(&format!("{} {}\n", package.name, package.version));
        }

        let tmp_path = cache_dir.join(format!("{PACKAGE_CACHE_FILE_NAME}.tmp"));
        remove_file_if_exists(&tmp_path)
            .with_context(|| format!("failed to clear {}", tmp_path.display()))?;
        fs::write(&tmp_path, listing)
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &cache_path)
            .with_context(|| format!("failed to replace {}", cache_path.display()))?;
        debug!(cache = %cache_path.display(), "rebuilt package cache");
        Ok(())
    }

    fn release(&self, stage_dir: &Path) -> Result<()> {
        remove_dir_if_exists(stage_dir).with_context(|| {
            format!("failed to remove staging directory: {}", stage_dir.display())
        })?;
        debug!(dir = %stage_dir.display(), "released staging directory");
        Ok(())
    }
}
