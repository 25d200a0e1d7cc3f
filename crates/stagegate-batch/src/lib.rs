mod candidates;
mod config;
mod cursor;
mod error;
mod orchestrator;
mod query;
mod store;

pub use candidates::{load_extensions, uninstallable_packages, Extension, UninstallCandidate};
pub use config::{
    StagegateConfig, CONFIG_FILE_NAME, DEFAULT_GOVERNED_NAMESPACE, DEFAULT_PROJECT_URL_PREFIX,
};
pub use cursor::{BatchCursor, BatchStep, Workflow};
pub use error::BatchError;
pub use orchestrator::{
    now_unix_ms, BatchOrchestrator, BatchStatus, StepOutcome, DEFAULT_FINALIZE_DELAY,
};
pub use query::InstallQuery;
pub use store::{cursor_key, handle_key, FileHandleStore, HandleStore, MemoryHandleStore};
