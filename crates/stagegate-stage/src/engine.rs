use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;

use crate::StageOperation;

/// Applies package operations to an isolated copy of the project and moves
/// the result into place. The lifecycle decides when each call is allowed.
pub trait StagingEngine: Send + Sync {
    /// Creates the staging directory for `stage_id`, seeded from the
    /// active project.
    fn allocate(&self, stage_id: &str, active_dir: &Path) -> Result<PathBuf>;

    fn stage(
        &self,
        operations: &[StageOperation],
        active_dir: &Path,
        stage_dir: &Path,
        timeout: Duration,
    ) -> Result<()>;

    fn commit(&self, stage_dir: &Path, active_dir: &Path) -> Result<()>;

    fn post_apply(&self, stage_dir: &Path, active_dir: &Path) -> Result<()>;

    fn release(&self, stage_dir: &Path) -> Result<()>;
}
