use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use semver::{Version, VersionReq};
use serde::Deserialize;
use stagegate_core::{normalize_version, parse_version};

/// A published release of a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogRelease {
    pub package: String,
    pub version: String,
    pub project: Option<String>,
}

impl CatalogRelease {
    pub fn semantic_version(&self) -> Option<Version> {
        parse_version(&self.version)
    }
}

/// Lists the known releases of a package, in no particular order.
pub trait ReleaseSource: Send + Sync {
    fn releases(&self, package: &str) -> Result<Vec<CatalogRelease>>;
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    releases: Vec<CatalogFileRelease>,
}

#[derive(Debug, Deserialize)]
struct CatalogFileRelease {
    version: String,
}

/// Release catalog on disk: one `<root>/<vendor>/<name>.toml` per package
/// with an optional `project` key and a `[[releases]]` array.
#[derive(Debug, Clone)]
pub struct ReleaseCatalog {
    root: PathBuf,
}

impl ReleaseCatalog {
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn package_path(&self, package: &str) -> Result<PathBuf> {
        let (vendor, name) = package
            .split_once('/')
            .filter(|(vendor, name)| is_path_segment(vendor) && is_path_segment(name))
            .ok_or_else(|| anyhow!("invalid package name '{package}': expected vendor/name"))?;
        Ok(self.root.join(vendor).join(format!("{name}.toml")))
    }
}

impl ReleaseSource for ReleaseCatalog {
    fn releases(&self, package: &str) -> Result<Vec<CatalogRelease>> {
        let path = self.package_path(package)?;
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed reading catalog entry: {}", path.display()));
            }
        };

        let file: CatalogFile = toml::from_str(&raw)
            .with_context(|| format!("failed parsing catalog entry: {}", path.display()))?;
        Ok(file
            .releases
            .into_iter()
            .map(|release| CatalogRelease {
                package: package.to_string(),
                version: release.version,
                project: file.project.clone(),
            })
            .collect())
    }
}

fn is_path_segment(value: &str) -> bool {
    !value.is_empty()
        && value != "."
        && value != ".."
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
}

/// Picks the release a constraint resolves to. An exact version selects the
/// release with that normalized version; any other constraint selects the
/// highest release it matches; no constraint selects the highest release.
/// Releases that do not read as semantic versions are never selected by a
/// range.
pub fn select_release<'a>(
    releases: &'a [CatalogRelease],
    constraint: Option<&str>,
) -> Result<Option<&'a CatalogRelease>> {
    let Some(constraint) = constraint.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(highest(releases.iter()));
    };

    let normalized = normalize_version(constraint);
    if let Some(exact) = releases
        .iter()
        .find(|release| normalize_version(&release.version) == normalized)
    {
        return Ok(Some(exact));
    }
    if parse_version(constraint).is_some() {
        return Ok(None);
    }

    let requirement = VersionReq::parse(constraint)
        .with_context(|| format!("invalid version constraint '{constraint}'"))?;
    Ok(highest(releases.iter().filter(|release| {
        release
            .semantic_version()
            .is_some_and(|version| requirement.matches(&version))
    })))
}

/// Highest release that reads as a semantic version.
pub fn latest_release(releases: &[CatalogRelease]) -> Option<&CatalogRelease> {
    highest(releases.iter())
}

fn highest<'a>(releases: impl Iterator<Item = &'a CatalogRelease>) -> Option<&'a CatalogRelease> {
    releases
        .filter_map(|release| release.semantic_version().map(|version| (version, release)))
        .max_by(|(left, _), (right, _)| left.cmp(right))
        .map(|(_, release)| release)
}
