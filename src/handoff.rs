//! Hand-off of a finished recording
//!
//! Turns a stopped trace into a replay script, per-step records for the
//! consuming surface, and the downloadable script artifact. Step records carry
//! full screenshots and DOM, so they travel over the chunked transfer protocol.

use crate::error::{RecorderError, Result};
use crate::locator::Locator;
use crate::script::{artifact_filename, render_script, render_step, synthesize};
use crate::script::{ReplayScript, StepKind};
use crate::session::Trace;
use crate::transfer::{ChannelSink, Detachable, TransferReceiver, TransferSender};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

/// Everything the consuming surface shows for one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub step_number: usize,
    /// Screenshot as a `data:` URL
    #[serde(default)]
    pub screenshot: Option<String>,
    #[serde(default)]
    pub dom: Option<String>,
    pub code: String,
    pub url: String,
    pub locator: Locator,
    pub timestamp: i64,
    pub duration: i64,
    pub element_text: String,
    pub element_tag: String,
}

/// The heavy parts of a step record, moved as one payload
#[derive(Debug, Default, Serialize, Deserialize)]
struct StepPayload {
    screenshot: Option<String>,
    dom: Option<String>,
}

impl Detachable for StepRecord {
    fn payload_len(&self) -> usize {
        self.screenshot.as_ref().map_or(0, |s| s.len()) + self.dom.as_ref().map_or(0, |d| d.len())
    }

    fn detach_payload(&mut self) -> Option<Vec<u8>> {
        if self.screenshot.is_none() && self.dom.is_none() {
            return None;
        }
        let payload = StepPayload {
            screenshot: self.screenshot.take(),
            dom: self.dom.take(),
        };
        serde_json::to_vec(&payload).ok()
    }

    fn attach_payload(&mut self, data: Vec<u8>) {
        match serde_json::from_slice::<StepPayload>(&data) {
            Ok(payload) => {
                self.screenshot = payload.screenshot;
                self.dom = payload.dom;
            }
            Err(e) => log::warn!("Dropping unreadable payload for step {}: {}", self.step_number, e),
        }
    }
}

/// Synthesize the script for a stopped trace; a trace without clicks has
/// nothing to hand off.
pub fn finalize(trace: &Trace) -> Result<ReplayScript> {
    if trace.clicks.is_empty() {
        log::warn!("Session {} has no clicks; skipping hand-off", trace.session_id);
        return Err(RecorderError::NoData);
    }
    Ok(synthesize(trace))
}

/// One record per script step, landing step first
pub fn build_step_records(trace: &Trace, script: &ReplayScript) -> Vec<StepRecord> {
    let mut records = Vec::with_capacity(script.steps.len());

    for step in &script.steps {
        if step.kind == StepKind::Landing {
            records.push(StepRecord {
                step_number: 0,
                screenshot: trace.initial_screenshot.as_ref().map(|s| s.data_url()),
                dom: trace.initial_dom.clone(),
                code: render_step(step),
                url: step.url.clone(),
                locator: Locator::default(),
                timestamp: trace.start_time,
                duration: 0,
                element_text: "Landing page".to_string(),
                element_tag: String::new(),
            });
            continue;
        }

        // Action steps are numbered in click order
        let Some(click) = trace.clicks.get(step.step_index - 1) else {
            log::warn!("Step {} has no matching click", step.step_index);
            continue;
        };
        let label = click.target.label();
        let element_text = match &step.typed_value {
            Some(value) if step.kind == StepKind::Type => format!("Type {} into {}", value, label),
            _ => format!("Click {}", label),
        };

        records.push(StepRecord {
            step_number: step.step_index,
            screenshot: click.screenshot.as_ref().map(|s| s.data_url()),
            dom: click.post_action_dom.clone(),
            code: render_step(step),
            url: step.url.clone(),
            locator: step.locator.clone(),
            timestamp: step.timestamp,
            duration: step.duration_ms,
            element_text,
            element_tag: step.element_tag.clone().unwrap_or_default(),
        });
    }

    records
}

/// Stream step records to a consuming surface; returns the transfer id.
pub async fn send_step_records(
    records: Vec<StepRecord>,
    tx: mpsc::Sender<String>,
    chunk_size: usize,
    max_frame_bytes: usize,
) -> Result<u64> {
    let mut sink = ChannelSink::new(tx, max_frame_bytes);
    TransferSender::new(chunk_size).send(records, &mut sink).await
}

/// Receiving surface: waits for a complete transfer, then writes the records.
pub async fn receive_step_records(
    rx: &mut mpsc::Receiver<String>,
    dir: &Path,
) -> Result<Vec<StepRecord>> {
    let mut receiver = TransferReceiver::<StepRecord>::new();
    let records = receiver.receive(rx).await?;

    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join("step_records.json");
    tokio::fs::write(&path, serde_json::to_string_pretty(&records)?).await?;
    log::info!("Wrote {} step records to {}", records.len(), path.display());
    Ok(records)
}

/// Write the downloadable script artifact into `dir`
pub async fn write_script_artifact(script: &ReplayScript, dir: &Path) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(artifact_filename(chrono::Utc::now()));
    tokio::fs::write(&path, render_script(script)).await?;
    log::info!("Script artifact saved to {}", path.display());
    Ok(path)
}

/// Result of handing off one session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoffSummary {
    pub session_id: String,
    pub script: ReplayScript,
    pub artifact: PathBuf,
    pub records: usize,
    pub transfer_id: u64,
}

/// Finalize a trace and deliver everything the consuming surface needs
/// under `dir`.
pub async fn hand_off(
    trace: &Trace,
    dir: &Path,
    chunk_size: usize,
    max_frame_bytes: usize,
) -> Result<HandoffSummary> {
    let script = finalize(trace)?;
    let records = build_step_records(trace, &script);
    let count = records.len();

    let (tx, mut rx) = mpsc::channel::<String>(16);
    let receiver_dir = dir.to_path_buf();
    let receiving =
        tokio::spawn(async move { receive_step_records(&mut rx, &receiver_dir).await });

    let transfer_id = send_step_records(records, tx, chunk_size, max_frame_bytes).await?;
    let received = receiving
        .await
        .map_err(|e| RecorderError::Other(format!("step record receiver failed: {}", e)))??;
    if received.len() != count {
        return Err(RecorderError::TransferIncomplete {
            transfer_id,
            reason: format!("sent {} records, stored {}", count, received.len()),
        });
    }

    let artifact = write_script_artifact(&script, dir).await?;
    let json_path = dir.join("script.json");
    tokio::fs::write(&json_path, serde_json::to_string_pretty(&script)?).await?;

    Ok(HandoffSummary {
        session_id: trace.session_id.clone(),
        script,
        artifact,
        records: count,
        transfer_id,
    })
}
