//! Binding listener
//!
//! Forwards binding calls from the hook script to the capture agent until the
//! page goes away or the agent detaches.

use super::hooks::BINDING_NAME;
use crate::capture::{CaptureAgent, PageSignal};
use chromiumoxide::cdp::js_protocol::runtime::EventBindingCalled;
use chromiumoxide::listeners::EventStream;
use futures::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Decode a binding payload; `None` for calls that are not page signals
pub fn decode_signal(name: &str, payload: &str) -> Option<PageSignal> {
    if name != BINDING_NAME {
        return None;
    }
    match serde_json::from_str::<PageSignal>(payload) {
        Ok(signal) => Some(signal),
        Err(e) => {
            log::warn!("Ignoring malformed page signal: {}", e);
            None
        }
    }
}

pub fn spawn_listener(
    agent: Arc<CaptureAgent>,
    mut events: EventStream<EventBindingCalled>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            if agent.is_detached() {
                break;
            }
            let Some(signal) = decode_signal(&event.name, &event.payload) else {
                continue;
            };
            if let Err(e) = agent.handle(signal).await {
                log::error!("Capture stopped: {}", e);
                break;
            }
        }
        // Stream end means the page or browser is gone
        agent.detach();
        log::info!("Binding listener finished");
    })
}
