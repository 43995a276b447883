//! Session lifecycle and trace ownership
//!
//! The coordinator is the single writer of the active `Trace`. Every mutation
//! is persisted before the lock is released, so a restarted process can pick
//! up where it left off via [`SessionCoordinator::resume`].

use super::store::{KeyValueStore, KEY_FLAGS, KEY_TRACE, KEY_TRACKING};
use super::trace::{
    now_millis, CaptureFlags, ClickEvent, InputElement, InputEvent, InputVariable,
    NavigationEvent, Pointer, Screenshot, Trace,
};
use crate::config::RecorderConfig;
use crate::dom::{CleanOptions, DomSummary};
use crate::error::{RecorderError, Result};
use crate::host::PageHost;
use crate::locator::{Locator, TargetDescriptor};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Everything known about a click at the moment it happens
#[derive(Debug, Clone)]
pub struct ClickReport {
    pub timestamp: i64,
    pub url: String,
    pub title: String,
    pub pointer: Pointer,
    pub target: TargetDescriptor,
    pub dom_snapshot: DomSummary,
}

/// Identifies one click of one session for later reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClickTicket {
    pub session_id: String,
    pub sequence: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownVariable {
    pub locator: Locator,
    pub variable_name: String,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct InputReport {
    pub timestamp: i64,
    pub url: String,
    pub locator: Locator,
    pub variable_name: String,
    pub value: String,
    pub element: InputElement,
    /// Every variable the capture side currently knows about
    pub known: Vec<KnownVariable>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Idle,
    Recording,
}

/// Partial flag update; absent fields keep their current value
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FlagUpdate {
    pub dom: Option<bool>,
    pub clicks: Option<bool>,
    pub inputs: Option<bool>,
}

/// What the capture side checks before handling each signal
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureState {
    pub tracking: bool,
    pub session_id: Option<String>,
    pub flags: CaptureFlags,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub phase: SessionPhase,
    pub session_id: Option<String>,
    pub start_time: Option<i64>,
    pub navigations: usize,
    pub clicks: usize,
    pub inputs: usize,
    pub dom_snapshots: usize,
    pub pending_screenshots: usize,
    pub flags: CaptureFlags,
}

#[derive(Default)]
struct SessionState {
    tracking: bool,
    flags: CaptureFlags,
    trace: Option<Trace>,
}

impl SessionState {
    /// The trace, but only while recording
    fn recording(&mut self) -> Option<&mut Trace> {
        if self.tracking {
            self.trace.as_mut()
        } else {
            None
        }
    }
}

pub struct SessionCoordinator {
    store: Arc<dyn KeyValueStore>,
    host: Arc<dyn PageHost>,
    config: RecorderConfig,
    state: Mutex<SessionState>,
}

impl SessionCoordinator {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        host: Arc<dyn PageHost>,
        config: RecorderConfig,
    ) -> Self {
        Self {
            store,
            host,
            config,
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn host(&self) -> &Arc<dyn PageHost> {
        &self.host
    }

    pub fn clean_options(&self) -> CleanOptions {
        CleanOptions {
            text_cap: self.config.text_cap,
            max_chars: self.config.dom_cap,
        }
    }

    /// Reload an in-flight session after a restart.
    ///
    /// Returns `true` when a recording was resumed.
    pub async fn resume(&self) -> Result<bool> {
        let mut state = self.state.lock().await;

        if let Some(flags) = self.store.get(KEY_FLAGS).await? {
            match serde_json::from_value::<CaptureFlags>(flags) {
                Ok(flags) => state.flags = flags,
                Err(e) => log::warn!("Ignoring unreadable capture flags: {}", e),
            }
        }

        let tracking = self
            .store
            .get(KEY_TRACKING)
            .await?
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if !tracking {
            return Ok(false);
        }

        let Some(value) = self.store.get(KEY_TRACE).await? else {
            log::warn!("Tracking flag set but no trace persisted; staying idle");
            self.store.set(KEY_TRACKING, serde_json::json!(false)).await?;
            return Ok(false);
        };

        match serde_json::from_value::<Trace>(value) {
            Ok(trace) => {
                log::info!(
                    "Resumed session {} ({} clicks, {} navigations)",
                    trace.session_id,
                    trace.clicks.len(),
                    trace.navigations.len()
                );
                state.trace = Some(trace);
                state.tracking = true;
                Ok(true)
            }
            Err(e) => {
                log::warn!("Discarding unreadable persisted trace: {}", e);
                self.store.remove(KEY_TRACE).await?;
                self.store.set(KEY_TRACKING, serde_json::json!(false)).await?;
                Ok(false)
            }
        }
    }

    /// Begin a new recording, discarding any previous one.
    pub async fn start(&self) -> Result<String> {
        {
            let mut state = self.state.lock().await;
            if let Some(old) = state.trace.take() {
                log::info!("Discarding previous session {}", old.session_id);
            }
            state.tracking = false;
            self.persist(&state).await;
        }

        let start_time = now_millis();
        let mut trace = Trace::new(start_time);

        trace.start_url = match self.host.active_url().await {
            Ok(url) => Some(url),
            Err(e) => {
                log::warn!("Could not read start URL: {}", e);
                None
            }
        };
        trace.initial_screenshot = match self.host.capture_screenshot().await {
            Ok(data) => Some(Screenshot::png(data)),
            Err(e) => {
                log::warn!("Initial screenshot failed: {}", e);
                None
            }
        };
        trace.initial_dom = match self.host.capture_cleaned_dom(&self.clean_options()).await {
            Ok(html) => Some(html),
            Err(e) => {
                log::warn!("Initial DOM capture failed: {}", e);
                None
            }
        };

        let session_id = trace.session_id.clone();
        let mut state = self.state.lock().await;
        state.trace = Some(trace);
        state.tracking = true;
        state.flags = CaptureFlags::all();
        self.persist(&state).await;

        log::info!("Recording started: {}", session_id);
        Ok(session_id)
    }

    /// Finish the recording and hand back the trace.
    pub async fn stop(&self) -> Result<Trace> {
        let mut trace = {
            let mut state = self.state.lock().await;
            if !state.tracking {
                return Err(RecorderError::NotRecording);
            }
            state.tracking = false;
            let trace = state.trace.take().ok_or(RecorderError::NotRecording)?;
            self.persist(&state).await;
            trace
        };

        trace.final_url = self.host.active_url().await.ok();
        trace.final_screenshot = match self.host.capture_screenshot().await {
            Ok(data) => Some(Screenshot::png(data)),
            Err(e) => {
                log::warn!("Final screenshot failed: {}", e);
                None
            }
        };
        trace.end_time = Some(now_millis());

        log::info!(
            "Recording stopped: {} ({} clicks, {} inputs, {} navigations)",
            trace.session_id,
            trace.clicks.len(),
            trace.variables.len(),
            trace.navigations.len()
        );
        Ok(trace)
    }

    pub async fn report_navigation(&self, url: &str, title: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(trace) = state.recording() else {
            log::debug!("Dropping navigation to {} (not recording)", url);
            return Ok(false);
        };
        if trace.navigations.last().is_some_and(|last| last.url == url) {
            log::debug!("Dropping navigation to {} (URL unchanged)", url);
            return Ok(false);
        }
        trace.navigations.push(NavigationEvent {
            timestamp: now_millis(),
            url: url.to_string(),
            title: title.to_string(),
        });
        log::info!("Navigation: {}", url);
        self.persist(&state).await;
        Ok(true)
    }

    pub async fn report_dom_snapshot(&self, summary: DomSummary) -> Result<bool> {
        let mut state = self.state.lock().await;
        if !state.flags.dom {
            return Ok(false);
        }
        let Some(trace) = state.recording() else {
            return Ok(false);
        };
        log::info!(
            "DOM snapshot for {}: {} elements, depth {}",
            summary.url,
            summary.total_elements,
            summary.max_depth
        );
        trace.dom_snapshots.push(summary);
        self.persist(&state).await;
        Ok(true)
    }

    /// Record a click and schedule the retry safeguard for its capture.
    pub async fn report_click(self: &Arc<Self>, click: ClickReport) -> Result<Option<ClickTicket>> {
        let ticket = {
            let mut state = self.state.lock().await;
            if !state.flags.clicks {
                return Ok(None);
            }
            let Some(trace) = state.recording() else {
                log::debug!("Dropping click (not recording)");
                return Ok(None);
            };

            let sequence = trace.next_sequence;
            trace.next_sequence += 1;
            log::info!(
                "Click #{} on {} '{}' ({})",
                sequence,
                click.target.meaningful_tag_name,
                click.target.label(),
                click.target.meaningful_locator
            );
            trace.clicks.push(ClickEvent {
                timestamp: click.timestamp,
                sequence,
                url: click.url,
                title: click.title,
                pointer: click.pointer,
                target: click.target,
                dom_snapshot: click.dom_snapshot,
                screenshot: None,
                post_action_dom: None,
                screenshot_pending: true,
            });
            let ticket = ClickTicket {
                session_id: trace.session_id.clone(),
                sequence,
            };
            self.persist(&state).await;
            ticket
        };

        let this = Arc::clone(self);
        let retry_ticket = ticket.clone();
        tokio::spawn(async move {
            tokio::time::sleep(this.config.retry_delay()).await;
            if let Err(e) = this.retry_capture(&retry_ticket).await {
                log::warn!("Retry capture for click #{} failed: {}", retry_ticket.sequence, e);
            }
        });

        Ok(Some(ticket))
    }

    /// Capture again if the click still has no screenshot.
    async fn retry_capture(&self, ticket: &ClickTicket) -> Result<()> {
        if !self.needs_capture(ticket).await {
            return Ok(());
        }
        log::info!("Screenshot missing for click #{}, capturing now", ticket.sequence);

        let screenshot = self.host.capture_screenshot().await?;
        let dom = match self.host.capture_cleaned_dom(&self.clean_options()).await {
            Ok(html) => Some(html),
            Err(e) => {
                log::warn!("Fallback DOM capture failed: {}", e);
                None
            }
        };
        self.reconcile(ticket, Some(Screenshot::png(screenshot)), dom)
            .await?;
        Ok(())
    }

    async fn needs_capture(&self, ticket: &ClickTicket) -> bool {
        let mut state = self.state.lock().await;
        state
            .recording()
            .filter(|trace| trace.session_id == ticket.session_id)
            .and_then(|trace| trace.click(ticket.sequence))
            .is_some_and(|click| click.screenshot.is_none())
    }

    /// Attach post-action data to the click identified by `ticket`.
    ///
    /// Fields already present are never overwritten. Returns `true` when
    /// anything changed.
    pub async fn reconcile(
        &self,
        ticket: &ClickTicket,
        screenshot: Option<Screenshot>,
        dom: Option<String>,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(trace) = state
            .recording()
            .filter(|trace| trace.session_id == ticket.session_id)
        else {
            log::debug!("Dropping late capture for click #{}", ticket.sequence);
            return Ok(false);
        };
        let Some(click) = trace.click_mut(ticket.sequence) else {
            log::warn!("No click #{} in {}", ticket.sequence, ticket.session_id);
            return Ok(false);
        };

        let mut changed = false;
        if click.screenshot.is_none() {
            if let Some(shot) = screenshot {
                click.screenshot = Some(shot);
                changed = true;
            }
        }
        if click.post_action_dom.is_none() {
            if let Some(html) = dom {
                click.post_action_dom = Some(html);
                changed = true;
            }
        }
        click.screenshot_pending = click.screenshot.is_none();

        if changed {
            log::debug!("Reconciled capture for click #{}", ticket.sequence);
            self.persist(&state).await;
        }
        Ok(changed)
    }

    /// Upsert the variable for the reported locator and log the edit.
    pub async fn report_input(&self, input: InputReport) -> Result<Option<InputVariable>> {
        let mut state = self.state.lock().await;
        if !state.flags.inputs {
            return Ok(None);
        }
        let Some(trace) = state.recording() else {
            return Ok(None);
        };

        for known in &input.known {
            if !trace.variables.contains_key(&known.locator) {
                trace.variables.insert(
                    known.locator.clone(),
                    InputVariable {
                        variable_name: known.variable_name.clone(),
                        locator: known.locator.clone(),
                        value: known.value.clone(),
                        element: InputElement::default(),
                        first_captured: input.timestamp,
                        last_updated: input.timestamp,
                        update_count: 0,
                    },
                );
            }
        }

        let variable = trace
            .variables
            .entry(input.locator.clone())
            .or_insert_with(|| InputVariable {
                variable_name: input.variable_name.clone(),
                locator: input.locator.clone(),
                value: String::new(),
                element: input.element.clone(),
                first_captured: input.timestamp,
                last_updated: input.timestamp,
                update_count: 0,
            });
        variable.value = input.value.clone();
        variable.last_updated = input.timestamp;
        variable.update_count += 1;
        if variable.element == InputElement::default() {
            variable.element = input.element;
        }
        let variable = variable.clone();

        trace.input_events.push(InputEvent {
            timestamp: input.timestamp,
            url: input.url,
            locator: input.locator,
            variable_name: variable.variable_name.clone(),
            value: variable.value.clone(),
            update_count: variable.update_count,
        });
        log::info!(
            "Input {} = \"{}\" (update {})",
            variable.variable_name,
            variable.value,
            variable.update_count
        );

        self.persist(&state).await;
        Ok(Some(variable))
    }

    /// Toggle capture flags; affects only events handled afterwards.
    pub async fn set_flags(&self, update: FlagUpdate) -> CaptureFlags {
        let mut state = self.state.lock().await;
        if let Some(dom) = update.dom {
            state.flags.dom = dom;
        }
        if let Some(clicks) = update.clicks {
            state.flags.clicks = clicks;
        }
        if let Some(inputs) = update.inputs {
            state.flags.inputs = inputs;
        }
        self.persist(&state).await;
        log::info!("Capture flags: {:?}", state.flags);
        state.flags
    }

    pub async fn capture_state(&self) -> CaptureState {
        let state = self.state.lock().await;
        CaptureState {
            tracking: state.tracking,
            session_id: state
                .trace
                .as_ref()
                .filter(|_| state.tracking)
                .map(|t| t.session_id.clone()),
            flags: state.flags,
        }
    }

    pub async fn status(&self) -> SessionStatus {
        let state = self.state.lock().await;
        let trace = state.trace.as_ref().filter(|_| state.tracking);
        SessionStatus {
            phase: if trace.is_some() {
                SessionPhase::Recording
            } else {
                SessionPhase::Idle
            },
            session_id: trace.map(|t| t.session_id.clone()),
            start_time: trace.map(|t| t.start_time),
            navigations: trace.map_or(0, |t| t.navigations.len()),
            clicks: trace.map_or(0, |t| t.clicks.len()),
            inputs: trace.map_or(0, |t| t.variables.len()),
            dom_snapshots: trace.map_or(0, |t| t.dom_snapshots.len()),
            pending_screenshots: trace.map_or(0, |t| {
                t.clicks.iter().filter(|c| c.screenshot_pending).count()
            }),
            flags: state.flags,
        }
    }

    /// Copy of the in-flight trace, if recording
    pub async fn current_trace(&self) -> Option<Trace> {
        let state = self.state.lock().await;
        state.trace.clone().filter(|_| state.tracking)
    }

    /// Write-through of the whole session state; failures degrade to a warning.
    async fn persist(&self, state: &SessionState) {
        if let Err(e) = self.try_persist(state).await {
            log::warn!("Failed to persist session state: {}", e);
        }
    }

    async fn try_persist(&self, state: &SessionState) -> Result<()> {
        self.store
            .set(KEY_TRACKING, serde_json::json!(state.tracking))
            .await?;
        self.store
            .set(KEY_FLAGS, serde_json::to_value(state.flags)?)
            .await?;
        match state.trace.as_ref().filter(|_| state.tracking) {
            Some(trace) => self.store.set(KEY_TRACE, serde_json::to_value(trace)?).await,
            None => self.store.remove(KEY_TRACE).await,
        }
    }
}
