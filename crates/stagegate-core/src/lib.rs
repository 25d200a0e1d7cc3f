mod inventory;
mod kind;
mod package;
mod package_set;
mod version;

pub use inventory::{InventoryError, JsonInventory, PackageInventory, INVENTORY_FILE_NAME};
pub use kind::StageKind;
pub use package::{project_for_name, InstalledPackage};
pub use package_set::{added_in, changed_versions, PackageSet, PackageSetDiff};
pub use version::{normalize_version, parse_version, stability_of, Stability};
