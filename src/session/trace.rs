//! Recorded session data
//!
//! A `Trace` is the authoritative record of one recording session. It is
//! created on start, mutated only by the session coordinator and handed to
//! the synthesizer on stop.

use crate::dom::DomSummary;
use crate::locator::{Locator, TargetDescriptor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Distinguishes sessions started within the same millisecond
static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Hex-encoded SHA-256 of raw bytes
pub fn sha256_hex(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Base64 (standard alphabet) encoding for byte payloads in JSON
pub mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Screenshot {
    pub format: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    pub hash: String,
    pub captured_at: i64,
}

impl Screenshot {
    pub fn png(data: Vec<u8>) -> Self {
        Self {
            format: "png".to_string(),
            hash: sha256_hex(&data),
            data,
            captured_at: now_millis(),
        }
    }

    /// `data:` URL suitable for embedding in HTML or handing to a UI
    pub fn data_url(&self) -> String {
        use base64::{engine::general_purpose::STANDARD, Engine as _};
        format!("data:image/{};base64,{}", self.format, STANDARD.encode(&self.data))
    }

    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationEvent {
    pub timestamp: i64,
    pub url: String,
    pub title: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Modifiers {
    #[serde(default)]
    pub ctrl: bool,
    #[serde(default)]
    pub shift: bool,
    #[serde(default)]
    pub alt: bool,
    #[serde(default)]
    pub meta: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pointer {
    pub x: f64,
    pub y: f64,
    /// 0 = left, 1 = middle, 2 = right
    #[serde(default)]
    pub button: i16,
    #[serde(default)]
    pub modifiers: Modifiers,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClickEvent {
    pub timestamp: i64,
    pub sequence: u64,
    pub url: String,
    pub title: String,
    pub pointer: Pointer,
    pub target: TargetDescriptor,
    /// Page state before the click took effect
    pub dom_snapshot: DomSummary,
    pub screenshot: Option<Screenshot>,
    /// Cleaned DOM after the click settled
    pub post_action_dom: Option<String>,
    pub screenshot_pending: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputElement {
    pub tag: String,
    #[serde(rename = "type")]
    pub input_type: Option<String>,
    pub name: Option<String>,
    pub id: Option<String>,
    pub placeholder: Option<String>,
    pub class_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputVariable {
    pub variable_name: String,
    pub locator: Locator,
    pub value: String,
    pub element: InputElement,
    pub first_captured: i64,
    pub last_updated: i64,
    pub update_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputEvent {
    pub timestamp: i64,
    pub url: String,
    pub locator: Locator,
    pub variable_name: String,
    pub value: String,
    pub update_count: u32,
}

/// Which event kinds are recorded while tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureFlags {
    pub dom: bool,
    pub clicks: bool,
    pub inputs: bool,
}

impl CaptureFlags {
    pub fn all() -> Self {
        Self {
            dom: true,
            clicks: true,
            inputs: true,
        }
    }
}

impl Default for CaptureFlags {
    fn default() -> Self {
        Self::all()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub session_id: String,
    pub navigations: Vec<NavigationEvent>,
    pub clicks: Vec<ClickEvent>,
    pub input_events: Vec<InputEvent>,
    pub variables: BTreeMap<Locator, InputVariable>,
    pub dom_snapshots: Vec<DomSummary>,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub start_url: Option<String>,
    pub final_url: Option<String>,
    pub initial_screenshot: Option<Screenshot>,
    pub initial_dom: Option<String>,
    pub final_screenshot: Option<Screenshot>,
    /// Sequence number handed to the next click
    pub next_sequence: u64,
}

impl Trace {
    pub fn new(start_time: i64) -> Self {
        Self {
            session_id: format!(
                "session-{}-{}",
                start_time,
                SESSION_COUNTER.fetch_add(1, Ordering::Relaxed)
            ),
            navigations: Vec::new(),
            clicks: Vec::new(),
            input_events: Vec::new(),
            variables: BTreeMap::new(),
            dom_snapshots: Vec::new(),
            start_time,
            end_time: None,
            start_url: None,
            final_url: None,
            initial_screenshot: None,
            initial_dom: None,
            final_screenshot: None,
            next_sequence: 1,
        }
    }

    pub fn click(&self, sequence: u64) -> Option<&ClickEvent> {
        self.clicks.iter().find(|c| c.sequence == sequence)
    }

    pub fn click_mut(&mut self, sequence: u64) -> Option<&mut ClickEvent> {
        self.clicks.iter_mut().find(|c| c.sequence == sequence)
    }

    /// Variable recorded for `locator`, if it holds a non-empty value
    pub fn typed_value(&self, locator: &Locator) -> Option<&InputVariable> {
        self.variables
            .get(locator)
            .filter(|v| !v.value.is_empty())
    }

    /// Start URL, else the first navigation, else the first click's page
    pub fn effective_start_url(&self) -> Option<&str> {
        self.start_url
            .as_deref()
            .or_else(|| self.navigations.first().map(|n| n.url.as_str()))
            .or_else(|| self.clicks.first().map(|c| c.url.as_str()))
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.end_time.map(|end| end - self.start_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_screenshot_base64_json() {
        let shot = Screenshot::png(vec![0x89, b'P', b'N', b'G']);
        let json = serde_json::to_value(&shot).unwrap();
        assert_eq!(json["data"], "iVBORw==");
        assert_eq!(shot.hash.len(), 64);

        let back: Screenshot = serde_json::from_value(json).unwrap();
        assert_eq!(back, shot);
        assert!(shot.data_url().starts_with("data:image/png;base64,"));
    }

    #[test]
    fn test_session_id_from_start_time() {
        let trace = Trace::new(1700000000000);
        assert!(trace.session_id.starts_with("session-1700000000000-"));
        assert_eq!(trace.next_sequence, 1);
        assert_eq!(trace.effective_start_url(), None);
    }

    #[test]
    fn test_session_ids_unique_within_a_millisecond() {
        let first = Trace::new(1700000000000);
        let second = Trace::new(1700000000000);
        assert_ne!(first.session_id, second.session_id);
    }

    #[test]
    fn test_trace_serializes_variables_by_locator() {
        let mut trace = Trace::new(1);
        let locator = Locator::new("//*[@id=\"q\"]");
        trace.variables.insert(
            locator.clone(),
            InputVariable {
                variable_name: "q".into(),
                locator: locator.clone(),
                value: "socks".into(),
                element: InputElement::default(),
                first_captured: 1,
                last_updated: 2,
                update_count: 1,
            },
        );
        let json = serde_json::to_string(&trace).unwrap();
        let back: Trace = serde_json::from_str(&json).unwrap();
        assert_eq!(back.typed_value(&locator).map(|v| v.value.as_str()), Some("socks"));
    }
}
