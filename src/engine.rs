//! Remote automation engine client
//!
//! Posts a rendered script to the engine and follows its server-sent event
//! stream until the run completes or fails.

use crate::error::{RecorderError, Result};
use futures::StreamExt;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Path of the execute endpoint relative to the engine base URL
pub const EXECUTE_PATH: &str = "/api/browser-extension/execute";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineRequest {
    pub url: String,
    pub script: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eval_criteria: Option<String>,
}

/// One `data:` event from the engine stream
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Started,
    DebuggerUrl(String),
    Completed(Value),
    Error(String),
    /// Anything else the engine sends; kept for logging
    Other(Value),
}

impl EngineEvent {
    pub fn from_value(value: Value) -> Self {
        if let Some(url) = value.get("debuggerUrl").and_then(Value::as_str) {
            return EngineEvent::DebuggerUrl(url.to_string());
        }
        if let Some(error) = value.get("error") {
            let message = match error.as_str() {
                Some(s) => s.to_string(),
                None => error.to_string(),
            };
            return EngineEvent::Error(message);
        }
        match value.get("status").and_then(Value::as_str) {
            Some("started") => EngineEvent::Started,
            Some("completed") => {
                EngineEvent::Completed(value.get("results").cloned().unwrap_or(Value::Null))
            }
            _ => EngineEvent::Other(value),
        }
    }
}

/// Splits a byte stream into SSE `data:` payloads, holding partial lines
/// until the rest arrives.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk; returns every event completed by it
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<EngineEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = Self::decode_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a final line that was not newline-terminated
    pub fn finish(&mut self) -> Option<EngineEvent> {
        let line = std::mem::take(&mut self.buffer);
        Self::decode_line(&line)
    }

    fn decode_line(line: &[u8]) -> Option<EngineEvent> {
        let text = String::from_utf8_lossy(line);
        let text = text.trim_end_matches(['\r', '\n']);
        let data = text.strip_prefix("data: ")?;
        match serde_json::from_str::<Value>(data) {
            Ok(value) => Some(EngineEvent::from_value(value)),
            Err(e) => {
                log::warn!("Ignoring undecodable engine event: {}", e);
                None
            }
        }
    }
}

/// Outcome of a run that reached `completed`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineOutcome {
    pub debugger_url: Option<String>,
    pub results: Value,
}

#[derive(Clone)]
pub struct EngineClient {
    http: Client,
    base_url: String,
}

impl EngineClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether the engine answers at its base URL
    pub async fn is_reachable(&self) -> bool {
        match self
            .http
            .get(&self.base_url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(response) => {
                let ok = response.status().is_success();
                if !ok {
                    log::warn!("Engine responded with status {}", response.status());
                }
                ok
            }
            Err(e) => {
                log::warn!("Engine connectivity check failed: {}", e);
                false
            }
        }
    }

    /// Submit a script and follow the event stream, reporting each event to
    /// `on_event`.
    pub async fn run<F>(&self, request: &EngineRequest, mut on_event: F) -> Result<EngineOutcome>
    where
        F: FnMut(&EngineEvent) + Send,
    {
        let url = format!("{}{}", self.base_url, EXECUTE_PATH);
        log::info!("Submitting {} byte script to {}", request.script.len(), url);

        let response = self
            .http
            .post(&url)
            .header(header::ACCEPT, "text/event-stream")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RecorderError::Engine(format!(
                "server responded with status {} - {}",
                status, body
            )));
        }

        let mut decoder = SseDecoder::new();
        let mut debugger_url = None;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            for event in decoder.feed(&chunk) {
                if let Some(outcome) = Self::apply(event, &mut debugger_url, &mut on_event)? {
                    return Ok(outcome);
                }
            }
        }
        if let Some(event) = decoder.finish() {
            if let Some(outcome) = Self::apply(event, &mut debugger_url, &mut on_event)? {
                return Ok(outcome);
            }
        }

        Err(RecorderError::Engine(
            "event stream ended before the run completed".to_string(),
        ))
    }

    fn apply<F>(
        event: EngineEvent,
        debugger_url: &mut Option<String>,
        on_event: &mut F,
    ) -> Result<Option<EngineOutcome>>
    where
        F: FnMut(&EngineEvent),
    {
        on_event(&event);
        match event {
            EngineEvent::Started => log::info!("Engine run started"),
            EngineEvent::DebuggerUrl(url) => {
                log::info!("Engine debug URL: {}", url);
                *debugger_url = Some(url);
            }
            EngineEvent::Completed(results) => {
                log::info!("Engine run completed");
                return Ok(Some(EngineOutcome {
                    debugger_url: debugger_url.take(),
                    results,
                }));
            }
            EngineEvent::Error(message) => return Err(RecorderError::Engine(message)),
            EngineEvent::Other(value) => log::debug!("Engine event: {}", value),
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decoder_joins_split_lines() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: {\"stat").is_empty());
        let events = decoder.feed(b"us\":\"started\"}\n\ndata: {\"debuggerUrl\":\"http://d\"}\n");
        assert_eq!(
            events,
            vec![
                EngineEvent::Started,
                EngineEvent::DebuggerUrl("http://d".to_string())
            ]
        );
    }

    #[test]
    fn test_decoder_flushes_unterminated_line() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: {\"error\":\"boom\"}").is_empty());
        assert_eq!(decoder.finish(), Some(EngineEvent::Error("boom".to_string())));
    }

    #[test]
    fn test_event_classification() {
        assert_eq!(
            EngineEvent::from_value(json!({"status": "completed", "results": [1]})),
            EngineEvent::Completed(json!([1]))
        );
        assert!(matches!(
            EngineEvent::from_value(json!({"status": "queued"})),
            EngineEvent::Other(_)
        ));
    }

    #[test]
    fn test_request_is_camel_case() {
        let request = EngineRequest {
            url: "https://shop.test".into(),
            script: "async function main() {}".into(),
            eval_criteria: Some("cart has socks".into()),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["evalCriteria"], "cart has socks");
    }
}
