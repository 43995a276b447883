//! Locator resolution
//!
//! Turns a node of a DOM snapshot into an XPath-style locator and picks the
//! most meaningful clickable descendant for human-readable step descriptions.
//! Both are pure functions of the snapshot.

use crate::dom::tree::{truncate_chars, DomTree, NodeId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tags considered meaningful, highest priority first
pub const PRIORITY_TAGS: &[&str] = &[
    "button", "a", "input", "span", "label", "h1", "h2", "h3", "h4", "h5", "h6", "p",
];

/// XPath-style path uniquely addressing an element in one snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Locator(String);

impl Locator {
    pub fn new(path: impl Into<String>) -> Self {
        Locator(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Cheap structural check used before replaying a locator
    pub fn is_well_formed(&self) -> bool {
        let path = self.0.trim();
        if !path.starts_with('/') || (path.ends_with('/') && path != "/") {
            return false;
        }
        let mut depth = 0i32;
        let mut in_quotes = false;
        for c in path.chars() {
            match c {
                '"' => in_quotes = !in_quotes,
                '[' if !in_quotes => depth += 1,
                ']' if !in_quotes => {
                    depth -= 1;
                    if depth < 0 {
                        return false;
                    }
                }
                _ => {}
            }
        }
        depth == 0 && !in_quotes
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Locator {
    fn from(path: &str) -> Self {
        Locator::new(path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionKind {
    /// No meaningful descendant; the literal target was used
    Original,
    Meaningful,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub tag: String,
    pub text: String,
    pub priority: usize,
    pub text_len: usize,
    pub depth: usize,
    pub locator: Locator,
}

/// What was clicked and what the click most plausibly meant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetDescriptor {
    pub raw_tag_name: String,
    pub raw_locator: Locator,
    pub raw_text: String,
    pub meaningful_tag_name: String,
    pub meaningful_locator: Locator,
    pub meaningful_text: String,
    pub resolution_kind: ResolutionKind,
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

impl TargetDescriptor {
    /// Best available description of the target for a step label
    pub fn label(&self) -> &str {
        if !self.meaningful_text.trim().is_empty() {
            &self.meaningful_text
        } else if !self.raw_text.trim().is_empty() {
            &self.raw_text
        } else {
            "element"
        }
    }
}

/// Text caps applied while resolving targets
#[derive(Debug, Clone, Copy)]
pub struct TextCaps {
    pub text: usize,
    pub candidate_text: usize,
}

impl Default for TextCaps {
    fn default() -> Self {
        Self {
            text: 100,
            candidate_text: 50,
        }
    }
}

/// Compute the locator of `node`; text nodes resolve through their parent.
pub fn locate(tree: &DomTree, node: NodeId) -> Locator {
    let Some(element) = tree.element_of(node) else {
        return Locator::new("");
    };

    if let Some(id) = tree.non_empty_attr(element, "id") {
        return Locator::new(format!("//*[@id=\"{}\"]", id));
    }
    if Some(element) == tree.body() {
        return Locator::new("/html/body");
    }
    if element == tree.root() {
        return Locator::new("/html");
    }

    let mut steps = Vec::new();
    let mut current = Some(element);
    while let Some(el) = current.filter(|&el| tree.is_element(el)) {
        let tag = tree.tag(el).unwrap_or_default();
        let index = 1 + tree
            .preceding_element_siblings(el)
            .filter(|&s| tree.tag(s) == Some(tag))
            .count();
        if index > 1 {
            steps.push(format!("/{}[{}]", tag, index));
        } else {
            steps.push(format!("/{}", tag));
        }
        current = tree.parent(el);
    }
    steps.reverse();
    Locator::new(steps.concat())
}

fn priority_of(tag: &str) -> Option<usize> {
    PRIORITY_TAGS.iter().position(|&t| t == tag)
}

/// Pick the most meaningful element within the clicked subtree.
pub fn resolve_meaningful_target(tree: &DomTree, node: NodeId, caps: &TextCaps) -> TargetDescriptor {
    let target = tree.element_of(node).unwrap_or(node);
    let raw_tag_name = tree.tag(target).unwrap_or_default().to_ascii_uppercase();
    let raw_locator = locate(tree, target);
    let raw_text = truncate_chars(tree.text_content(target).trim(), caps.text).to_string();

    let mut ranked: Vec<(NodeId, Candidate)> = tree
        .descendants(target)
        .into_iter()
        .filter_map(|id| {
            let tag = tree.tag(id)?;
            let priority = priority_of(tag)?;
            let text = tree.text_content(id);
            let text = text.trim();
            if text.is_empty() {
                return None;
            }
            Some((
                id,
                Candidate {
                    tag: tag.to_string(),
                    text: text.to_string(),
                    priority,
                    text_len: text.chars().count(),
                    depth: tree.depth(id),
                    locator: locate(tree, id),
                },
            ))
        })
        .collect();

    // Stable: ties keep document order.
    ranked.sort_by_key(|(_, c)| (c.priority, c.text_len));

    let Some((_, best)) = ranked.first() else {
        return TargetDescriptor {
            meaningful_tag_name: raw_tag_name.clone(),
            meaningful_locator: raw_locator.clone(),
            meaningful_text: raw_text.clone(),
            raw_tag_name,
            raw_locator,
            raw_text,
            resolution_kind: ResolutionKind::Original,
            candidates: Vec::new(),
        };
    };

    let meaningful_tag_name = best.tag.to_ascii_uppercase();
    let meaningful_locator = best.locator.clone();
    let meaningful_text = truncate_chars(&best.text, caps.text).to_string();

    let candidates = ranked
        .into_iter()
        .map(|(_, mut c)| {
            c.text = truncate_chars(&c.text, caps.candidate_text).to_string();
            c
        })
        .collect();

    TargetDescriptor {
        raw_tag_name,
        raw_locator,
        raw_text,
        meaningful_tag_name,
        meaningful_locator,
        meaningful_text,
        resolution_kind: ResolutionKind::Meaningful,
        candidates,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_well_formed() {
        assert!(Locator::new("/html/body/div[2]").is_well_formed());
        assert!(Locator::new("//*[@id=\"a]b\"]").is_well_formed());
        assert!(!Locator::new("").is_well_formed());
        assert!(!Locator::new("html/body").is_well_formed());
        assert!(!Locator::new("/html/body/div[2").is_well_formed());
        assert!(!Locator::new("/html/body/").is_well_formed());
    }

    #[test]
    fn test_label_fallbacks() {
        let mut target = TargetDescriptor {
            raw_tag_name: "DIV".into(),
            raw_locator: Locator::new("/html/body/div"),
            raw_text: "raw".into(),
            meaningful_tag_name: "DIV".into(),
            meaningful_locator: Locator::new("/html/body/div"),
            meaningful_text: "".into(),
            resolution_kind: ResolutionKind::Original,
            candidates: vec![],
        };
        assert_eq!(target.label(), "raw");
        target.raw_text.clear();
        assert_eq!(target.label(), "element");
    }
}
