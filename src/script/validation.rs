//! Replay Script Validation
//!
//! Validates replay scripts (typically hand-edited JSON) before execution,
//! catching errors early and providing detailed error messages.

use super::types::{ReplayScript, ReplayStep, StepKind};
use serde::{Deserialize, Serialize};

/// Detailed validation error with location information
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationError {
    /// Error type/category
    pub error_type: ValidationErrorType,

    /// Human-readable error message
    pub message: String,

    /// Location of the error (step index, field name, etc.)
    pub location: ErrorLocation,

    /// Suggestion for fixing the error
    pub suggestion: Option<String>,
}

/// Types of validation errors
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorType {
    /// JSON syntax error
    JsonSyntax,

    /// JSON is well-formed but does not describe a replay script
    InvalidStructure,

    /// Missing required field
    MissingField,

    /// Invalid field value
    InvalidValue,
}

/// Location information for errors
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorLocation {
    /// Step index if the error is in a specific step
    pub step_index: Option<usize>,

    /// Field path (e.g., "steps[2].locator")
    pub field_path: String,

    /// Line number in JSON (if available)
    pub line: Option<usize>,

    /// Column number in JSON (if available)
    pub column: Option<usize>,
}

impl ErrorLocation {
    fn field(path: &str) -> Self {
        Self {
            step_index: None,
            field_path: path.to_string(),
            line: None,
            column: None,
        }
    }

    fn step(index: usize, field: &str) -> Self {
        Self {
            step_index: Some(index),
            field_path: format!("steps[{}].{}", index, field),
            line: None,
            column: None,
        }
    }
}

/// Result of validation with all errors found
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<ValidationError>,

    /// Non-blocking issues
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn success() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn failure(errors: Vec<ValidationError>) -> Self {
        Self {
            is_valid: false,
            errors,
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
        self.is_valid = false;
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }
}

/// Replay script validator
#[derive(Debug, Default)]
pub struct ScriptValidator;

impl ScriptValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate a replay script from a JSON string
    pub fn validate_json(&self, json: &str) -> ValidationResult {
        let script: ReplayScript = match serde_json::from_str(json) {
            Ok(s) => s,
            Err(e) => {
                let (error_type, suggestion) = if e.is_data() {
                    (
                        ValidationErrorType::InvalidStructure,
                        "Check field names and types against a synthesized script",
                    )
                } else {
                    (
                        ValidationErrorType::JsonSyntax,
                        "Check for missing commas, brackets, or quotes",
                    )
                };
                return ValidationResult::failure(vec![ValidationError {
                    error_type,
                    message: format!("Could not read script: {}", e),
                    location: ErrorLocation {
                        step_index: None,
                        field_path: String::new(),
                        line: Some(e.line()),
                        column: Some(e.column()),
                    },
                    suggestion: Some(suggestion.to_string()),
                }]);
            }
        };

        let mut result = ValidationResult::success();
        self.validate_script(&script, &mut result);
        result
    }

    /// Validate a parsed replay script
    pub fn validate_script(&self, script: &ReplayScript, result: &mut ValidationResult) {
        if script.name.is_empty() {
            result.add_error(ValidationError {
                error_type: ValidationErrorType::MissingField,
                message: "Script name is required and cannot be empty".to_string(),
                location: ErrorLocation::field("name"),
                suggestion: Some("Add a descriptive name for your script".to_string()),
            });
        } else if !script
            .name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
        {
            result.add_warning(
                "Script name should only contain alphanumeric characters, hyphens, and underscores"
                    .to_string(),
            );
        }

        if script.start_url.trim().is_empty() {
            result.add_error(ValidationError {
                error_type: ValidationErrorType::MissingField,
                message: "Start URL is required".to_string(),
                location: ErrorLocation::field("start_url"),
                suggestion: Some("Set start_url to the page the replay opens first".to_string()),
            });
        } else if !has_scheme(&script.start_url) {
            result.add_error(ValidationError {
                error_type: ValidationErrorType::InvalidValue,
                message: format!("Start URL '{}' has no scheme", script.start_url),
                location: ErrorLocation::field("start_url"),
                suggestion: Some(format!("Use https://{}", script.start_url)),
            });
        }

        let Some(first) = script.steps.first() else {
            result.add_error(ValidationError {
                error_type: ValidationErrorType::MissingField,
                message: "Script must contain the landing step".to_string(),
                location: ErrorLocation::field("steps"),
                suggestion: Some("Add a step 0 of kind 'landing'".to_string()),
            });
            return;
        };

        if first.kind != StepKind::Landing {
            result.add_error(ValidationError {
                error_type: ValidationErrorType::InvalidStructure,
                message: format!("Step 0 must be the landing step, found '{}'", first.kind.as_str()),
                location: ErrorLocation::step(0, "kind"),
                suggestion: Some("Insert a landing step before the first action".to_string()),
            });
        }

        if script.step_count != script.steps.len() {
            result.add_error(ValidationError {
                error_type: ValidationErrorType::InvalidValue,
                message: format!(
                    "step_count is {} but the script has {} steps",
                    script.step_count,
                    script.steps.len()
                ),
                location: ErrorLocation::field("step_count"),
                suggestion: Some(format!("Set step_count to {}", script.steps.len())),
            });
        }

        for (index, step) in script.steps.iter().enumerate() {
            self.validate_step(step, index, result);
        }
    }

    fn validate_step(&self, step: &ReplayStep, index: usize, result: &mut ValidationResult) {
        if step.step_index != index {
            result.add_error(ValidationError {
                error_type: ValidationErrorType::InvalidValue,
                message: format!("Step {} has step_index {}", index, step.step_index),
                location: ErrorLocation::step(index, "step_index"),
                suggestion: Some(format!("Renumber to {}", index)),
            });
        }

        if step.duration_ms < 0 {
            result.add_error(ValidationError {
                error_type: ValidationErrorType::InvalidValue,
                message: format!("Step {} has negative duration {}", index, step.duration_ms),
                location: ErrorLocation::step(index, "duration_ms"),
                suggestion: Some("Durations are milliseconds until the next step".to_string()),
            });
        }

        match step.kind {
            StepKind::Landing => {
                if index > 0 {
                    result.add_error(ValidationError {
                        error_type: ValidationErrorType::InvalidStructure,
                        message: format!("Step {} is a second landing step", index),
                        location: ErrorLocation::step(index, "kind"),
                        suggestion: Some("Only step 0 may be a landing step".to_string()),
                    });
                }
                return;
            }
            StepKind::Type => match step.typed_value.as_deref() {
                None => result.add_error(ValidationError {
                    error_type: ValidationErrorType::MissingField,
                    message: format!("Step {} types but has no typed_value", index),
                    location: ErrorLocation::step(index, "typed_value"),
                    suggestion: Some("Add typed_value or change the step to 'click'".to_string()),
                }),
                Some("") => result.add_warning(format!("Step {} types an empty value", index)),
                Some(_) => {}
            },
            StepKind::Click => {}
        }

        if step.issue.is_some() {
            return;
        }
        if step.locator.is_empty() {
            result.add_warning(format!(
                "Step {} has an empty locator and will be skipped",
                index
            ));
        } else if !step.locator.is_well_formed() {
            result.add_warning(format!(
                "Step {} locator '{}' looks malformed and will be skipped",
                index, step.locator
            ));
        }
    }
}

fn has_scheme(url: &str) -> bool {
    url.contains("://") || url.starts_with("about:") || url.starts_with("data:")
}
