//! Capture agent
//!
//! Turns raw page signals (navigation, click, input) into structured events
//! for the session coordinator. Clicks are reported immediately with their
//! pre-action state; the post-action screenshot and DOM follow after a settle
//! delay and are reconciled onto the click by sequence number.

use crate::dom::summary::default_field_type;
use crate::dom::tree::truncate_chars;
use crate::dom::{DocumentSnapshot, DomSummary, DomTree, NodeId};
use crate::error::{RecorderError, Result};
use crate::host::PageHost;
use crate::locator::{locate, resolve_meaningful_target, Locator, TextCaps};
use crate::session::trace::{now_millis, InputElement, InputVariable, Modifiers, Pointer, Screenshot};
use crate::session::{ClickReport, ClickTicket, InputReport, KnownVariable, SessionCoordinator};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// Signal posted by the in-page hook
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PageSignal {
    Load {
        url: String,
        #[serde(default)]
        title: String,
    },
    UrlChanged {
        url: String,
        #[serde(default)]
        title: String,
    },
    PopState {
        url: String,
        #[serde(default)]
        title: String,
    },
    HashChange {
        url: String,
        #[serde(default)]
        title: String,
    },
    Click {
        url: String,
        #[serde(default)]
        title: String,
        #[serde(default)]
        timestamp: Option<i64>,
        #[serde(default)]
        x: f64,
        #[serde(default)]
        y: f64,
        #[serde(default)]
        button: i16,
        #[serde(default)]
        modifiers: Modifiers,
        /// Element-index path of the target from `<html>`
        target_path: Vec<usize>,
        document: DocumentSnapshot,
    },
    Input {
        url: String,
        #[serde(default)]
        title: String,
        #[serde(default)]
        timestamp: Option<i64>,
        value: String,
        target_path: Vec<usize>,
        /// Absent when the page has not changed since the last snapshot it sent
        #[serde(default)]
        document: Option<DocumentSnapshot>,
    },
}

impl PageSignal {
    pub fn kind(&self) -> &'static str {
        match self {
            PageSignal::Load { .. } => "load",
            PageSignal::UrlChanged { .. } => "url_changed",
            PageSignal::PopState { .. } => "pop_state",
            PageSignal::HashChange { .. } => "hash_change",
            PageSignal::Click { .. } => "click",
            PageSignal::Input { .. } => "input",
        }
    }
}

/// Lower-case and keep only `[A-Za-z0-9_]`, replacing the rest with `_`
fn sanitize_identifier(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

fn sanitize_capped(text: &str, cap: usize) -> String {
    let sanitized = sanitize_identifier(&text.to_lowercase());
    truncate_chars(&sanitized, cap).to_string()
}

/// Text of the `<label>` associated with a form control
fn label_text(tree: &DomTree, node: NodeId) -> Option<String> {
    let by_for = tree.non_empty_attr(node, "id").and_then(|id| {
        tree.find(|candidate| {
            tree.tag(candidate) == Some("label") && tree.attr(candidate, "for") == Some(id)
        })
    });
    let label = by_for.or_else(|| tree.closest_ancestor(node, "label"))?;
    let text = tree.text_content(label);
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Per-session variable names, stable per locator
#[derive(Debug, Default)]
pub struct InputRegistry {
    session_id: Option<String>,
    names: HashMap<Locator, String>,
    values: HashMap<Locator, String>,
    counter: usize,
}

impl InputRegistry {
    fn is_current(&self, session_id: &str) -> bool {
        self.session_id.as_deref() == Some(session_id)
    }

    /// Switch to `session_id`, keeping the names already recorded for it.
    ///
    /// Fallback numbering continues after the highest suffix in `restored`.
    fn enter_session(&mut self, session_id: &str, restored: &BTreeMap<Locator, InputVariable>) {
        if self.is_current(session_id) {
            return;
        }
        self.session_id = Some(session_id.to_string());
        self.names.clear();
        self.values.clear();
        self.counter = 0;
        for (locator, variable) in restored {
            self.names
                .insert(locator.clone(), variable.variable_name.clone());
            self.values.insert(locator.clone(), variable.value.clone());
            let suffix = variable
                .variable_name
                .rsplit_once('_')
                .and_then(|(_, n)| n.parse::<usize>().ok());
            if let Some(n) = suffix {
                self.counter = self.counter.max(n);
            }
        }
    }

    /// Variable name for the control, generated on first sight.
    pub fn name_for(
        &mut self,
        tree: &DomTree,
        node: NodeId,
        locator: &Locator,
        cap: usize,
    ) -> String {
        if let Some(name) = self.names.get(locator) {
            return name.clone();
        }
        let name = self.generate(tree, node, cap);
        self.names.insert(locator.clone(), name.clone());
        name
    }

    fn generate(&mut self, tree: &DomTree, node: NodeId, cap: usize) -> String {
        if let Some(name) = tree.non_empty_attr(node, "name") {
            return sanitize_identifier(name);
        }
        if let Some(id) = tree.non_empty_attr(node, "id") {
            return sanitize_identifier(id);
        }
        if let Some(placeholder) = tree.non_empty_attr(node, "placeholder") {
            return sanitize_capped(placeholder, cap);
        }
        if let Some(label) = label_text(tree, node) {
            return sanitize_capped(&label, cap);
        }
        let tag = tree.tag(node).unwrap_or("input");
        let input_type = tree
            .non_empty_attr(node, "type")
            .map(str::to_ascii_lowercase)
            .unwrap_or_else(|| default_field_type(tag).to_string());
        self.counter += 1;
        format!("{}_{}", input_type, self.counter)
    }

    fn record_value(&mut self, locator: &Locator, value: &str) {
        self.values.insert(locator.clone(), value.to_string());
    }

    fn known(&self) -> Vec<KnownVariable> {
        let mut known: Vec<KnownVariable> = self
            .names
            .iter()
            .map(|(locator, name)| KnownVariable {
                locator: locator.clone(),
                variable_name: name.clone(),
                value: self.values.get(locator).cloned().unwrap_or_default(),
            })
            .collect();
        known.sort_by(|a, b| a.locator.cmp(&b.locator));
        known
    }
}

#[derive(Default)]
struct AgentState {
    registry: InputRegistry,
    /// Last document the page sent; reused by input signals without one
    last_document: Option<Arc<DomTree>>,
    dom_timer: Option<JoinHandle<()>>,
    pending: Vec<JoinHandle<()>>,
}

pub struct CaptureAgent {
    coordinator: Arc<SessionCoordinator>,
    host: Arc<dyn PageHost>,
    caps: TextCaps,
    state: Mutex<AgentState>,
    detached: AtomicBool,
}

impl CaptureAgent {
    pub fn new(coordinator: Arc<SessionCoordinator>) -> Arc<Self> {
        let config = coordinator.config();
        let caps = TextCaps {
            text: config.text_cap,
            candidate_text: config.candidate_text_cap,
        };
        let host = Arc::clone(coordinator.host());
        Arc::new(Self {
            coordinator,
            host,
            caps,
            state: Mutex::new(AgentState::default()),
            detached: AtomicBool::new(false),
        })
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    /// Stop handling signals and cancel every pending capture.
    pub fn detach(&self) {
        if self.detached.swap(true, Ordering::SeqCst) {
            return;
        }
        log::warn!("Capture agent detached; further page signals are ignored");
        if let Ok(mut state) = self.state.lock() {
            if let Some(timer) = state.dom_timer.take() {
                timer.abort();
            }
            for task in state.pending.drain(..) {
                task.abort();
            }
        }
    }

    /// Handle one page signal.
    ///
    /// Host invalidation detaches the agent and is returned to the caller;
    /// other failures are logged and the signal is dropped.
    pub async fn handle(self: &Arc<Self>, signal: PageSignal) -> Result<()> {
        if self.is_detached() {
            return Ok(());
        }
        let kind = signal.kind();
        match self.dispatch(signal).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_host_invalidated() => {
                self.detach();
                Err(e)
            }
            Err(e) => {
                log::warn!("Dropping {} signal: {}", kind, e);
                Ok(())
            }
        }
    }

    /// Tree for a click or input signal, caching any document it carries
    fn signal_document(&self, signal: &PageSignal) -> Result<Option<Arc<DomTree>>> {
        let document = match signal {
            PageSignal::Click { document, .. } => Some(document),
            PageSignal::Input { document, .. } => document.as_ref(),
            _ => return Ok(None),
        };
        let mut state = self.lock_state()?;
        if let Some(document) = document {
            state.last_document = Some(Arc::new(DomTree::from_snapshot(document)?));
        }
        Ok(state.last_document.clone())
    }

    async fn dispatch(self: &Arc<Self>, signal: PageSignal) -> Result<()> {
        let tree = self.signal_document(&signal)?;
        let capture = self.coordinator.capture_state().await;
        let Some(session_id) = capture.session_id.filter(|_| capture.tracking) else {
            log::debug!("Ignoring {} signal (not recording)", signal.kind());
            return Ok(());
        };

        match signal {
            PageSignal::Load { url, title }
            | PageSignal::UrlChanged { url, title }
            | PageSignal::PopState { url, title }
            | PageSignal::HashChange { url, title } => {
                let recorded = self.coordinator.report_navigation(&url, &title).await?;
                if recorded && capture.flags.dom {
                    self.schedule_dom_snapshot();
                }
                Ok(())
            }
            PageSignal::Click {
                url,
                title,
                timestamp,
                x,
                y,
                button,
                modifiers,
                target_path,
                ..
            } => {
                if !capture.flags.clicks {
                    return Ok(());
                }
                let timestamp = timestamp.unwrap_or_else(now_millis);
                let tree = tree.ok_or_else(|| missing_document("click"))?;
                let node = target_node(&tree, &target_path)?;
                let target = resolve_meaningful_target(&tree, node, &self.caps);
                let dom_snapshot = DomSummary::from_tree(&tree, &url, &title, timestamp);

                let report = ClickReport {
                    timestamp,
                    url,
                    title,
                    pointer: Pointer {
                        x,
                        y,
                        button,
                        modifiers,
                    },
                    target,
                    dom_snapshot,
                };
                if let Some(ticket) = self.coordinator.report_click(report).await? {
                    self.schedule_post_action_capture(ticket);
                }
                Ok(())
            }
            PageSignal::Input {
                url,
                timestamp,
                value,
                target_path,
                ..
            } => {
                if !capture.flags.inputs {
                    return Ok(());
                }
                let tree = tree.ok_or_else(|| missing_document("input"))?;
                let node = target_node(&tree, &target_path)?;
                let tag = tree.tag(node).unwrap_or_default();
                if !matches!(tag, "input" | "textarea" | "select") {
                    return Ok(());
                }
                let locator = locate(&tree, node);
                let element = InputElement {
                    tag: tag.to_ascii_uppercase(),
                    input_type: tree.non_empty_attr(node, "type").map(str::to_string),
                    name: tree.non_empty_attr(node, "name").map(str::to_string),
                    id: tree.non_empty_attr(node, "id").map(str::to_string),
                    placeholder: tree.non_empty_attr(node, "placeholder").map(str::to_string),
                    class_name: tree.non_empty_attr(node, "class").map(str::to_string),
                };

                let named_here = self.lock_state()?.registry.is_current(&session_id);
                let restored = if named_here {
                    BTreeMap::new()
                } else {
                    self.coordinator
                        .current_trace()
                        .await
                        .map(|trace| trace.variables)
                        .unwrap_or_default()
                };

                let (variable_name, known) = {
                    let mut state = self.lock_state()?;
                    state.registry.enter_session(&session_id, &restored);
                    let name = state.registry.name_for(
                        &tree,
                        node,
                        &locator,
                        self.coordinator.config().variable_name_cap,
                    );
                    state.registry.record_value(&locator, &value);
                    (name, state.registry.known())
                };

                self.coordinator
                    .report_input(InputReport {
                        timestamp: timestamp.unwrap_or_else(now_millis),
                        url,
                        locator,
                        variable_name,
                        value,
                        element,
                        known,
                    })
                    .await?;
                Ok(())
            }
        }
    }

    fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, AgentState>> {
        self.state
            .lock()
            .map_err(|_| RecorderError::Other("capture agent state poisoned".to_string()))
    }

    /// Wait for the page to settle, then capture and reconcile onto the click.
    fn schedule_post_action_capture(self: &Arc<Self>, ticket: ClickTicket) {
        let this = Arc::clone(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(this.coordinator.config().settle_delay()).await;
            if this.is_detached() {
                return;
            }

            let screenshot = match this.host.capture_screenshot().await {
                Ok(data) => Some(Screenshot::png(data)),
                Err(e) if e.is_host_invalidated() => {
                    this.detach();
                    return;
                }
                Err(e) => {
                    log::warn!("Post-action screenshot for click #{} failed: {}", ticket.sequence, e);
                    None
                }
            };
            let dom = match this
                .host
                .capture_cleaned_dom(&this.coordinator.clean_options())
                .await
            {
                Ok(html) => Some(html),
                Err(e) if e.is_host_invalidated() => {
                    this.detach();
                    return;
                }
                Err(e) => {
                    log::warn!("Post-action DOM for click #{} failed: {}", ticket.sequence, e);
                    None
                }
            };

            if let Err(e) = this.coordinator.reconcile(&ticket, screenshot, dom).await {
                log::warn!("Reconcile for click #{} failed: {}", ticket.sequence, e);
            }
        });

        if let Ok(mut state) = self.state.lock() {
            state.pending.retain(|t| !t.is_finished());
            state.pending.push(task);
        }
    }

    /// Debounced page summary; a burst of navigations yields one snapshot.
    fn schedule_dom_snapshot(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(this.coordinator.config().dom_debounce()).await;
            if this.is_detached() {
                return;
            }
            if let Err(e) = this.capture_dom_summary().await {
                if e.is_host_invalidated() {
                    this.detach();
                } else {
                    log::warn!("DOM snapshot failed: {}", e);
                }
            }
        });

        if let Ok(mut state) = self.state.lock() {
            if let Some(previous) = state.dom_timer.replace(task) {
                previous.abort();
            }
        }
    }

    async fn capture_dom_summary(&self) -> Result<()> {
        let capture = self.coordinator.capture_state().await;
        if !capture.tracking || !capture.flags.dom {
            log::debug!("DOM snapshot skipped (tracking: {}, dom: {})", capture.tracking, capture.flags.dom);
            return Ok(());
        }
        let tree = self.host.capture_document().await?;
        let url = self.host.active_url().await?;
        let title = self.host.title().await.unwrap_or_default();
        let summary = DomSummary::from_tree(&tree, &url, &title, now_millis());
        self.coordinator.report_dom_snapshot(summary).await?;
        Ok(())
    }
}

fn missing_document(kind: &str) -> RecorderError {
    RecorderError::InvalidSnapshot(format!("{} signal without a document snapshot", kind))
}

fn target_node(tree: &DomTree, path: &[usize]) -> Result<NodeId> {
    tree.node_at_path(path).ok_or_else(|| {
        RecorderError::InvalidSnapshot(format!("no element at path {:?}", path))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::RawNode;

    fn form_tree() -> DomTree {
        let raw = RawNode::element("html").child(
            RawNode::element("body")
                .child(RawNode::element("input").attr("name", "user[email]"))
                .child(RawNode::element("input").attr("id", "zip-code"))
                .child(RawNode::element("input").attr("placeholder", "Search Products Here"))
                .child(
                    RawNode::element("label")
                        .child(RawNode::text(" Your Favourite Colour, please and thank you "))
                        .child(RawNode::element("input")),
                )
                .child(RawNode::element("input").attr("type", "email"))
                .child(RawNode::element("textarea")),
        );
        DomTree::from_raw(&raw).unwrap()
    }

    fn name_of(registry: &mut InputRegistry, tree: &DomTree, path: &[usize]) -> String {
        let node = tree.node_at_path(path).unwrap();
        let locator = locate(tree, node);
        registry.name_for(tree, node, &locator, 30)
    }

    #[test]
    fn test_variable_naming_priority() {
        let tree = form_tree();
        let mut registry = InputRegistry::default();
        registry.enter_session("s1", &BTreeMap::new());

        assert_eq!(name_of(&mut registry, &tree, &[0, 0]), "user_email_");
        assert_eq!(name_of(&mut registry, &tree, &[0, 1]), "zip_code");
        assert_eq!(name_of(&mut registry, &tree, &[0, 2]), "search_products_here");
        assert_eq!(
            name_of(&mut registry, &tree, &[0, 3, 0]),
            "your_favourite_colour__please_"
        );
        assert_eq!(name_of(&mut registry, &tree, &[0, 4]), "email_1");
        assert_eq!(name_of(&mut registry, &tree, &[0, 5]), "textarea_2");
        // Stable on repeat
        assert_eq!(name_of(&mut registry, &tree, &[0, 4]), "email_1");
    }

    #[test]
    fn test_registry_resets_per_session() {
        let tree = form_tree();
        let mut registry = InputRegistry::default();
        registry.enter_session("s1", &BTreeMap::new());
        assert_eq!(name_of(&mut registry, &tree, &[0, 4]), "email_1");
        registry.enter_session("s2", &BTreeMap::new());
        assert_eq!(name_of(&mut registry, &tree, &[0, 5]), "textarea_1");
    }

    #[test]
    fn test_click_signal_json() {
        let json = serde_json::json!({
            "type": "click",
            "url": "https://shop.test/",
            "x": 10.5,
            "y": 20.0,
            "target_path": [1, 0],
            "document": [
                {"tag": "html"},
                {"parent": 0, "tag": "head"},
                {"parent": 0, "tag": "body"},
                {"parent": 2, "tag": "button"},
                {"parent": 3, "text": "Go"}
            ]
        });
        let signal: PageSignal = serde_json::from_value(json).unwrap();
        assert_eq!(signal.kind(), "click");
        let PageSignal::Click { target_path, document, button, .. } = signal else {
            panic!("expected click");
        };
        assert_eq!(button, 0);
        let tree = DomTree::from_snapshot(&document).unwrap();
        let node = target_node(&tree, &target_path).unwrap();
        assert_eq!(tree.tag(node), Some("button"));
    }

    #[test]
    fn test_input_signal_without_document() {
        let json = serde_json::json!({
            "type": "input",
            "url": "https://shop.test/",
            "value": "so",
            "target_path": [1, 0]
        });
        let signal: PageSignal = serde_json::from_value(json).unwrap();
        let PageSignal::Input { document, .. } = signal else {
            panic!("expected input");
        };
        assert!(document.is_none());
    }

    #[test]
    fn test_registry_continues_restored_numbering() {
        let tree = form_tree();
        let email = tree.node_at_path(&[0, 4]).unwrap();
        let textarea = tree.node_at_path(&[0, 5]).unwrap();
        let email_locator = locate(&tree, email);
        let mut restored = BTreeMap::new();
        restored.insert(
            email_locator.clone(),
            InputVariable {
                variable_name: "email_3".to_string(),
                locator: email_locator.clone(),
                value: "a@b.test".to_string(),
                element: InputElement::default(),
                first_captured: 1,
                last_updated: 2,
                update_count: 4,
            },
        );

        let mut registry = InputRegistry::default();
        registry.enter_session("s1", &restored);
        assert_eq!(registry.name_for(&tree, email, &email_locator, 30), "email_3");
        let textarea_locator = locate(&tree, textarea);
        assert_eq!(
            registry.name_for(&tree, textarea, &textarea_locator, 30),
            "textarea_4"
        );
        assert!(registry
            .known()
            .iter()
            .any(|k| k.variable_name == "email_3" && k.value == "a@b.test"));
    }
}
