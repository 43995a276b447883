//! Replay scripts
//!
//! Synthesis of a `ReplayScript` from a finished trace, its text artifact,
//! validation of hand-edited scripts and local execution against Chrome.

pub mod executor;
pub mod render;
pub mod synth;
pub mod types;
pub mod validation;

pub use executor::ReplayExecutor;
pub use render::{artifact_filename, render_script, render_step};
pub use synth::{step_durations, synthesize};
pub use types::{ExecutionReport, ReplayScript, ReplayStep, StepKind, StepResult, StepStatus};
pub use validation::{
    ErrorLocation, ScriptValidator, ValidationError, ValidationErrorType, ValidationResult,
};
