use std::collections::HashMap;
use std::path::Path;

use crate::inventory::{InventoryError, PackageInventory};
use crate::package::InstalledPackage;
use crate::version::normalize_version;

/// Immutable snapshot of the packages installed in one directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageSet {
    packages: Vec<InstalledPackage>,
    by_name: HashMap<String, usize>,
}

impl PackageSet {
    pub fn new(packages: Vec<InstalledPackage>) -> Result<Self, InventoryError> {
        let mut by_name = HashMap::with_capacity(packages.len());
        for (index, package) in packages.iter().enumerate() {
            if by_name.insert(package.name.clone(), index).is_some() {
                return Err(InventoryError::DuplicatePackage {
                    name: package.name.clone(),
                });
            }
        }
        Ok(Self { packages, by_name })
    }

    pub fn load(inventory: &dyn PackageInventory, directory: &Path) -> Result<Self, InventoryError> {
        inventory.list_packages(directory)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&InstalledPackage> {
        self.by_name.get(name).map(|index| &self.packages[*index])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn package_by_project_name(&self, project: &str) -> Option<&InstalledPackage> {
        self.packages
            .iter()
            .find(|package| package.project.as_deref() == Some(project))
    }

    pub fn iter(&self) -> impl Iterator<Item = &InstalledPackage> {
        self.packages.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.packages.iter().map(|package| package.name.as_str()).collect()
    }

    pub fn into_packages(self) -> Vec<InstalledPackage> {
        self.packages
    }

    fn subset<F>(&self, keep: F) -> Self
    where
        F: Fn(&InstalledPackage) -> bool,
    {
        let packages = self
            .packages
            .iter()
            .filter(|package| keep(package))
            .cloned()
            .collect::<Vec<_>>();
        let by_name = packages
            .iter()
            .enumerate()
            .map(|(index, package)| (package.name.clone(), index))
            .collect();
        Self { packages, by_name }
    }
}

impl<'a> IntoIterator for &'a PackageSet {
    type Item = &'a InstalledPackage;
    type IntoIter = std::slice::Iter<'a, InstalledPackage>;

    fn into_iter(self) -> Self::IntoIter {
        self.packages.iter()
    }
}

/// Packages in `staged` whose name is absent from `active`.
pub fn added_in(staged: &PackageSet, active: &PackageSet) -> PackageSet {
    staged.subset(|package| !active.contains(&package.name))
}

/// Packages present in both sets whose normalized versions differ.
pub fn changed_versions(staged: &PackageSet, active: &PackageSet) -> PackageSet {
    staged.subset(|package| match active.get(&package.name) {
        Some(active_package) => {
            normalize_version(&package.version) != normalize_version(&active_package.version)
        }
        None => false,
    })
}

/// Active and staged snapshots taken together; the added and changed views
/// are derived on demand.
#[derive(Debug, Clone)]
pub struct PackageSetDiff {
    active: PackageSet,
    staged: PackageSet,
}

impl PackageSetDiff {
    pub fn new(active: PackageSet, staged: PackageSet) -> Self {
        Self { active, staged }
    }

    pub fn active(&self) -> &PackageSet {
        &self.active
    }

    pub fn staged(&self) -> &PackageSet {
        &self.staged
    }

    pub fn added(&self) -> PackageSet {
        added_in(&self.staged, &self.active)
    }

    pub fn changed(&self) -> PackageSet {
        changed_versions(&self.staged, &self.active)
    }

    pub fn removed(&self) -> PackageSet {
        added_in(&self.active, &self.staged)
    }
}
