//! Page host abstraction
//!
//! Everything the recorder needs from the browser tab being recorded. The
//! Chrome driver implements it over CDP; tests use an in-memory page.

use crate::dom::{clean_document, CleanOptions, DomTree};
use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait PageHost: Send + Sync {
    /// URL of the tab being recorded
    async fn active_url(&self) -> Result<String>;

    async fn title(&self) -> Result<String>;

    /// PNG screenshot of the visible viewport
    async fn capture_screenshot(&self) -> Result<Vec<u8>>;

    /// Snapshot of the live document
    async fn capture_document(&self) -> Result<DomTree>;

    /// Snapshot the document and serialize it as cleaned HTML
    async fn capture_cleaned_dom(&self, opts: &CleanOptions) -> Result<String> {
        let tree = self.capture_document().await?;
        Ok(clean_document(&tree, opts))
    }
}
