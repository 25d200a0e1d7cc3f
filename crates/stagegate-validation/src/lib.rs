mod pipeline;
mod report;
mod types;
mod validator;

pub use pipeline::ValidationPipeline;
pub use report::{Severity, ValidationReport, ValidationResult};
pub use types::{Checkpoint, StageContext};
pub use validator::{
    ChangeReporter, StabilityGate, Validator, ADDED_PACKAGES_HEADING, CHANGED_VERSIONS_HEADING,
};
