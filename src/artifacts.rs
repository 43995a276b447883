//! Recording export
//!
//! Writes a finished trace to disk as a browsable set of frames: one PNG and
//! one cleaned HTML file per step, plus `trace.json` and a `frames.json`
//! manifest with SHA-256 hashes for deduplication.

use crate::error::Result;
use crate::session::trace::sha256_hex;
use crate::session::{Screenshot, Trace};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Screenshot file written for a frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotArtifact {
    pub path: String,
    pub format: String,
    pub size_bytes: usize,
    pub hash: String,
}

/// DOM file written for a frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomArtifact {
    pub path: String,
    pub size_bytes: usize,
    pub hash: String,
}

/// One exported moment of the recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameArtifact {
    /// Sequential frame identifier; 0 is the landing page
    pub frame_id: usize,

    /// ISO 8601 capture time
    pub timestamp: String,

    /// Milliseconds since the recording started
    pub elapsed_ms: i64,

    pub url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub locator: Option<String>,

    pub description: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<ScreenshotArtifact>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub dom: Option<DomArtifact>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingManifest {
    pub session_id: String,
    pub trace_path: String,
    pub frames: Vec<FrameArtifact>,
}

fn iso_timestamp(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|t| t.to_rfc3339())
        .unwrap_or_default()
}

async fn write_screenshot(
    dir: &Path,
    frame_id: usize,
    shot: &Screenshot,
) -> Result<ScreenshotArtifact> {
    let path = dir.join(format!("frame_{:04}.{}", frame_id, shot.format));
    tokio::fs::write(&path, &shot.data).await?;
    Ok(ScreenshotArtifact {
        path: path.to_string_lossy().to_string(),
        format: shot.format.clone(),
        size_bytes: shot.size_bytes(),
        hash: shot.hash.clone(),
    })
}

async fn write_dom(dir: &Path, frame_id: usize, html: &str) -> Result<DomArtifact> {
    let path = dir.join(format!("frame_{:04}.html", frame_id));
    tokio::fs::write(&path, html).await?;
    Ok(DomArtifact {
        path: path.to_string_lossy().to_string(),
        size_bytes: html.len(),
        hash: sha256_hex(html.as_bytes()),
    })
}

/// Export `trace` into `dir`, creating it if needed.
pub async fn export_recording(trace: &Trace, dir: &Path) -> Result<RecordingManifest> {
    tokio::fs::create_dir_all(dir).await?;
    let mut frames = Vec::with_capacity(trace.clicks.len() + 1);

    let screenshot = match &trace.initial_screenshot {
        Some(shot) => Some(write_screenshot(dir, 0, shot).await?),
        None => None,
    };
    let dom = match &trace.initial_dom {
        Some(html) => Some(write_dom(dir, 0, html).await?),
        None => None,
    };
    frames.push(FrameArtifact {
        frame_id: 0,
        timestamp: iso_timestamp(trace.start_time),
        elapsed_ms: 0,
        url: trace.start_url.clone().unwrap_or_default(),
        locator: None,
        description: "Landing page".to_string(),
        screenshot,
        dom,
    });

    for (i, click) in trace.clicks.iter().enumerate() {
        let frame_id = i + 1;
        let screenshot = match &click.screenshot {
            Some(shot) => Some(write_screenshot(dir, frame_id, shot).await?),
            None => None,
        };
        let dom = match &click.post_action_dom {
            Some(html) => Some(write_dom(dir, frame_id, html).await?),
            None => None,
        };
        frames.push(FrameArtifact {
            frame_id,
            timestamp: iso_timestamp(click.timestamp),
            elapsed_ms: click.timestamp - trace.start_time,
            url: click.url.clone(),
            locator: Some(click.target.meaningful_locator.to_string()),
            description: click.target.label().to_string(),
            screenshot,
            dom,
        });
    }

    let trace_path = dir.join("trace.json");
    tokio::fs::write(&trace_path, serde_json::to_string_pretty(trace)?).await?;

    let manifest = RecordingManifest {
        session_id: trace.session_id.clone(),
        trace_path: trace_path.to_string_lossy().to_string(),
        frames,
    };
    tokio::fs::write(dir.join("frames.json"), serde_json::to_string_pretty(&manifest)?).await?;

    log::info!(
        "Exported {} frames for {} to {}",
        manifest.frames.len(),
        trace.session_id,
        dir.display()
    );
    Ok(manifest)
}

/// Directory for a session's exports under `output_dir`
pub fn session_dir(output_dir: &Path, session_id: &str) -> PathBuf {
    output_dir.join(session_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_export_landing_only() {
        let scratch = tempfile::tempdir().unwrap();
        let dir = scratch.path().join("export");
        let mut trace = Trace::new(1_700_000_000_000);
        trace.start_url = Some("https://example.com/".to_string());
        trace.initial_screenshot = Some(Screenshot::png(vec![1, 2, 3]));
        trace.initial_dom = Some("<body>hi</body>".to_string());

        let manifest = export_recording(&trace, &dir).await.unwrap();
        assert_eq!(manifest.frames.len(), 1);
        let frame = &manifest.frames[0];
        assert!(frame.screenshot.as_ref().unwrap().path.ends_with("frame_0000.png"));
        assert_eq!(
            frame.dom.as_ref().unwrap().hash,
            sha256_hex(b"<body>hi</body>")
        );
        assert!(dir.join("trace.json").exists());
    }
}
