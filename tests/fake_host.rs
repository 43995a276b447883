//! In-memory page host for tests
//!
//! Stands in for the browser tab: holds a document snapshot that tests can
//! swap between signals, hands out a fixed screenshot, and can be told to fail
//! or to behave as if the tab went away.

use async_trait::async_trait;
use clickpath::dom::{DomTree, RawNode};
use clickpath::{PageHost, RecorderError, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Smallest valid PNG header; content is irrelevant to the recorder
pub const PNG_BYTES: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

pub struct FakeHost {
    url: Mutex<String>,
    title: Mutex<String>,
    document: Mutex<RawNode>,
    screenshot_failures: AtomicUsize,
    invalidated: AtomicBool,
    screenshots_taken: AtomicUsize,
}

#[allow(dead_code)]
impl FakeHost {
    pub fn new(url: &str, document: RawNode) -> Self {
        Self {
            url: Mutex::new(url.to_string()),
            title: Mutex::new("Fake Page".to_string()),
            document: Mutex::new(document),
            screenshot_failures: AtomicUsize::new(0),
            invalidated: AtomicBool::new(false),
            screenshots_taken: AtomicUsize::new(0),
        }
    }

    pub fn set_url(&self, url: &str) {
        *self.url.lock().unwrap() = url.to_string();
    }

    pub fn set_document(&self, document: RawNode) {
        *self.document.lock().unwrap() = document;
    }

    pub fn document(&self) -> RawNode {
        self.document.lock().unwrap().clone()
    }

    /// Fail the next `n` screenshot calls
    pub fn fail_screenshots(&self, n: usize) {
        self.screenshot_failures.store(n, Ordering::SeqCst);
    }

    /// Behave as if the tab was closed
    pub fn invalidate(&self) {
        self.invalidated.store(true, Ordering::SeqCst);
    }

    pub fn screenshots_taken(&self) -> usize {
        self.screenshots_taken.load(Ordering::SeqCst)
    }

    fn check_alive(&self) -> Result<()> {
        if self.invalidated.load(Ordering::SeqCst) {
            return Err(RecorderError::HostInvalidated("tab closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PageHost for FakeHost {
    async fn active_url(&self) -> Result<String> {
        self.check_alive()?;
        Ok(self.url.lock().unwrap().clone())
    }

    async fn title(&self) -> Result<String> {
        self.check_alive()?;
        Ok(self.title.lock().unwrap().clone())
    }

    async fn capture_screenshot(&self) -> Result<Vec<u8>> {
        self.check_alive()?;
        let failed = self
            .screenshot_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(RecorderError::CaptureFailed("screenshot unavailable".to_string()));
        }
        self.screenshots_taken.fetch_add(1, Ordering::SeqCst);
        Ok(PNG_BYTES.to_vec())
    }

    async fn capture_document(&self) -> Result<DomTree> {
        self.check_alive()?;
        DomTree::from_raw(&self.document())
    }
}

/// Search form used across tests:
/// `<form><input id="q" placeholder="Search"><button>Search</button></form>`
/// plus a "Submit" button outside the form.
#[allow(dead_code)]
pub fn search_page() -> RawNode {
    RawNode::element("html")
        .child(RawNode::element("head").child(RawNode::element("title").child(RawNode::text("Shop"))))
        .child(
            RawNode::element("body")
                .child(
                    RawNode::element("form")
                        .child(
                            RawNode::element("input")
                                .attr("id", "q")
                                .attr("type", "text")
                                .attr("placeholder", "Search"),
                        )
                        .child(RawNode::element("button").child(RawNode::text("Search"))),
                )
                .child(
                    RawNode::element("div").attr("class", "actions").child(
                        RawNode::element("button")
                            .attr("type", "submit")
                            .child(RawNode::element("span").child(RawNode::text("Submit"))),
                    ),
                ),
        )
}
