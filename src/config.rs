//! Recorder configuration
//!
//! Timings, size caps and locations used by the capture agent, the session
//! coordinator and the hand-off. Every field has a default so a partial JSON
//! file is enough to override a single value.

use crate::error::{RecorderError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Delay between a click and its post-action capture
    pub settle_delay_ms: u64,

    /// Delay before the coordinator re-attempts a missing post-action capture
    pub retry_delay_ms: u64,

    /// Debounce window for navigation-triggered DOM snapshots
    pub dom_debounce_ms: u64,

    /// Maximum characters kept from an element's text
    pub text_cap: usize,

    /// Maximum characters kept from a candidate's text in diagnostics
    pub candidate_text_cap: usize,

    /// Maximum serialized size of a cleaned DOM
    pub dom_cap: usize,

    /// Maximum length of a generated input variable name
    pub variable_name_cap: usize,

    /// Payloads above this size are split into fragments
    pub chunk_size: usize,

    /// Largest frame the hand-off channel accepts
    pub max_frame_bytes: usize,

    /// Directory for persisted session state
    pub storage_dir: PathBuf,

    /// Directory for exported recordings and script artifacts
    pub output_dir: PathBuf,

    /// Remote automation engine endpoint (local replay when absent)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine_url: Option<String>,

    /// Evaluation criteria forwarded to the engine
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eval_criteria: Option<String>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 800,
            retry_delay_ms: 1200,
            dom_debounce_ms: 2000,
            text_cap: 100,
            candidate_text_cap: 50,
            dom_cap: 200_000,
            variable_name_cap: 30,
            chunk_size: 50_000,
            max_frame_bytes: 128 * 1024,
            storage_dir: default_storage_dir(),
            output_dir: PathBuf::from("./recordings"),
            engine_url: None,
            eval_criteria: None,
        }
    }
}

impl RecorderConfig {
    /// Load configuration from a JSON file
    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            RecorderError::Other(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        let config: RecorderConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RecorderError::Other("chunk_size must be positive".to_string()));
        }
        // A base64 fragment inflates by 4/3; leave room for the frame envelope.
        if self.chunk_size.div_ceil(3) * 4 + 256 > self.max_frame_bytes {
            return Err(RecorderError::Other(format!(
                "chunk_size {} does not fit in max_frame_bytes {}",
                self.chunk_size, self.max_frame_bytes
            )));
        }
        if self.retry_delay_ms <= self.settle_delay_ms {
            log::warn!(
                "retry_delay_ms ({}) <= settle_delay_ms ({}); retries may race the primary capture",
                self.retry_delay_ms,
                self.settle_delay_ms
            );
        }
        Ok(())
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn dom_debounce(&self) -> Duration {
        Duration::from_millis(self.dom_debounce_ms)
    }
}

fn default_storage_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("clickpath")
        .join("state")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RecorderConfig::default();
        assert_eq!(config.settle_delay_ms, 800);
        assert_eq!(config.retry_delay_ms, 1200);
        assert_eq!(config.dom_debounce_ms, 2000);
        assert_eq!(config.chunk_size, 50_000);
        assert!(config.validate().is_ok());
        assert!(config.storage_dir.ends_with("clickpath/state"));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: RecorderConfig =
            serde_json::from_str(r#"{"settle_delay_ms": 250, "engine_url": "http://localhost:3000"}"#)
                .unwrap();
        assert_eq!(config.settle_delay_ms, 250);
        assert_eq!(config.retry_delay_ms, 1200);
        assert_eq!(config.engine_url.as_deref(), Some("http://localhost:3000"));
    }

    #[test]
    fn test_chunk_must_fit_frame() {
        let config = RecorderConfig {
            chunk_size: 200_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
