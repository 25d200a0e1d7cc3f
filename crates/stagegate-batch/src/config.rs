use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use stagegate_stage::default_state_root;

pub const CONFIG_FILE_NAME: &str = "stagegate.toml";
pub const DEFAULT_GOVERNED_NAMESPACE: &str = "drupal/";
pub const DEFAULT_PROJECT_URL_PREFIX: &str = "https://www.drupal.org/project/";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagegateConfig {
    pub project_root: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_root: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog_root: Option<PathBuf>,
    pub governed_namespace: String,
    pub project_url_prefix: String,
    pub stage_timeout_secs: u64,
    pub finalize_delay_ms: u64,
    pub extensions_file: PathBuf,
}

impl Default for StagegateConfig {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            state_root: None,
            catalog_root: None,
            governed_namespace: DEFAULT_GOVERNED_NAMESPACE.to_string(),
            project_url_prefix: DEFAULT_PROJECT_URL_PREFIX.to_string(),
            stage_timeout_secs: 300,
            finalize_delay_ms: 1000,
            extensions_file: PathBuf::from("extensions.toml"),
        }
    }
}

impl StagegateConfig {
    /// Reads a config file. Relative paths inside it are taken relative to
    /// the directory holding the file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed reading config: {}", path.display()))?;
        let mut config: Self = toml::from_str(&content)
            .with_context(|| format!("failed parsing config: {}", path.display()))?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.project_root = rebase(base, &config.project_root);
        config.state_root = config.state_root.map(|root| rebase(base, &root));
        config.catalog_root = config.catalog_root.map(|root| rebase(base, &root));
        Ok(config)
    }

    /// `explicit` wins; otherwise `<project_root>/stagegate.toml` when it
    /// exists; otherwise defaults. A given `project_root` always overrides
    /// the one from the file.
    pub fn discover(explicit: Option<&Path>, project_root: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load(path)?,
            None => {
                let root = project_root.unwrap_or_else(|| Path::new("."));
                let candidate = root.join(CONFIG_FILE_NAME);
                if candidate.is_file() {
                    Self::load(&candidate)?
                } else {
                    Self::default()
                }
            }
        };

        if let Some(root) = project_root {
            config.project_root = root.to_path_buf();
        }
        Ok(config)
    }

    pub fn resolved_state_root(&self) -> Result<PathBuf> {
        match &self.state_root {
            Some(root) => Ok(root.clone()),
            None => default_state_root(),
        }
    }

    pub fn resolved_catalog_root(&self) -> PathBuf {
        self.catalog_root
            .clone()
            .unwrap_or_else(|| self.project_root.join("catalog"))
    }

    pub fn extensions_path(&self) -> PathBuf {
        rebase(&self.project_root, &self.extensions_file)
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    pub fn finalize_delay(&self) -> Duration {
        Duration::from_millis(self.finalize_delay_ms)
    }
}

fn rebase(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
