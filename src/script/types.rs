//! Replay Script Types
//!
//! Defines the JSON structure for replay scripts synthesized from recordings.

use crate::locator::Locator;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// A replay script: a landing step followed by one action per recorded click
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayScript {
    /// Script name (lowercase-hyphenated)
    pub name: String,

    /// Page the replay starts from
    pub start_url: String,

    /// Script creation timestamp (ISO 8601)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,

    /// Recording session this script was synthesized from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Number of steps, landing step included
    pub step_count: usize,

    pub steps: Vec<ReplayStep>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    /// Synthetic step 0: the start page, no action
    Landing,
    Click,
    Type,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Landing => "landing",
            StepKind::Click => "click",
            StepKind::Type => "type",
        }
    }
}

/// One instruction of a replay script
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayStep {
    pub step_index: usize,
    pub kind: StepKind,

    /// Element to act on (empty for the landing step)
    #[serde(default)]
    pub locator: Locator,

    pub description: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub typed_value: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub variable_name: Option<String>,

    pub url: String,
    pub timestamp: i64,

    /// Time until the next step
    pub duration_ms: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub element_tag: Option<String>,

    /// Problem that makes the step unreplayable; such steps are skipped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue: Option<String>,
}

/// Result of executing a single step
#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub step: usize,
    pub kind: StepKind,
    pub status: StepStatus,

    /// How long the step took to execute
    pub duration: Duration,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Success,
    Failed,
    Skipped,
}

/// Complete report of a replay
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub script_name: String,
    pub total_steps: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total_duration: Duration,
    pub results: Vec<StepResult>,
}

impl ReplayScript {
    /// Load a replay script from a JSON file
    pub async fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let script: ReplayScript = serde_json::from_str(&content)?;
        Ok(script)
    }

    /// Save this script to a JSON file
    pub async fn to_file(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    /// Steps after the landing step
    pub fn actions(&self) -> &[ReplayStep] {
        self.steps.get(1..).unwrap_or(&[])
    }

    /// Whether nothing beyond the landing page was recorded
    pub fn is_noop(&self) -> bool {
        self.actions().is_empty()
    }

    /// Validate script structure (basic checks)
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.is_empty() {
            anyhow::bail!("Script name cannot be empty");
        }

        let Some(first) = self.steps.first() else {
            anyhow::bail!("Script must contain a landing step");
        };
        if first.kind != StepKind::Landing {
            anyhow::bail!("Step 0 must be the landing step, found '{}'", first.kind.as_str());
        }

        if self.step_count != self.steps.len() {
            anyhow::bail!(
                "step_count is {} but script has {} steps",
                self.step_count,
                self.steps.len()
            );
        }

        for (i, step) in self.steps.iter().enumerate() {
            if step.step_index != i {
                anyhow::bail!("Step {} has step_index {}", i, step.step_index);
            }
            if i > 0 && step.kind == StepKind::Landing {
                anyhow::bail!("Step {} is a second landing step", i);
            }
            if step.kind == StepKind::Type && step.typed_value.is_none() {
                anyhow::bail!("Step {} types but has no value", i);
            }
        }

        Ok(())
    }
}

impl ExecutionReport {
    pub fn new(script_name: String, total_steps: usize) -> Self {
        Self {
            script_name,
            total_steps,
            successful: 0,
            failed: 0,
            skipped: 0,
            total_duration: Duration::from_secs(0),
            results: Vec::with_capacity(total_steps),
        }
    }

    /// Add a step result and update counters
    pub fn add_result(&mut self, result: StepResult) {
        self.total_duration += result.duration;

        match result.status {
            StepStatus::Success => self.successful += 1,
            StepStatus::Failed => self.failed += 1,
            StepStatus::Skipped => self.skipped += 1,
        }

        self.results.push(result);
    }

    /// Skipped steps do not fail a replay
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.successful + self.skipped == self.total_steps
    }

    /// Get success rate as percentage of steps that were attempted
    pub fn success_rate(&self) -> f64 {
        let attempted = self.total_steps - self.skipped;
        if attempted == 0 {
            return 0.0;
        }
        (self.successful as f64 / attempted as f64) * 100.0
    }
}
