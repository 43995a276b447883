//! Cleaned DOM serialization
//!
//! Produces the compact HTML stored alongside screenshots: non-content
//! elements are dropped, only identifying attributes survive, long text is
//! shortened, whitespace is collapsed and the result is capped.

use super::tree::{truncate_chars, DomTree, NodeId, NodeKind};

const STRIPPED_TAGS: &[&str] = &[
    "script", "style", "noscript", "iframe", "svg", "canvas", "img", "video", "audio",
];

const KEPT_ATTRIBUTES: &[&str] = &[
    "id",
    "class",
    "role",
    "data-testid",
    "type",
    "name",
    "placeholder",
    "value",
];

const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "input", "link", "meta", "source", "track", "wbr",
];

const TRUNCATION_MARKER: &str = "... [truncated]";

#[derive(Debug, Clone, Copy)]
pub struct CleanOptions {
    /// Text nodes longer than this are trimmed and suffixed with `...`
    pub text_cap: usize,
    /// Maximum characters of the serialized output
    pub max_chars: usize,
}

impl Default for CleanOptions {
    fn default() -> Self {
        Self {
            text_cap: 100,
            max_chars: 200_000,
        }
    }
}

/// Serialize the subtree at `root` as cleaned HTML.
pub fn clean_dom(tree: &DomTree, root: NodeId, opts: &CleanOptions) -> String {
    let mut html = String::new();
    write_node(tree, root, opts, &mut html);

    let collapsed = html.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() > opts.max_chars {
        let mut capped = truncate_chars(&collapsed, opts.max_chars).to_string();
        capped.push_str(TRUNCATION_MARKER);
        capped
    } else {
        collapsed
    }
}

/// Clean the whole document starting at `<html>`.
pub fn clean_document(tree: &DomTree, opts: &CleanOptions) -> String {
    clean_dom(tree, tree.root(), opts)
}

fn is_stripped(tree: &DomTree, id: NodeId) -> bool {
    let Some(tag) = tree.tag(id) else {
        return false;
    };
    if STRIPPED_TAGS.contains(&tag) {
        return true;
    }
    tag == "link"
        && tree
            .attr(id, "rel")
            .is_some_and(|rel| rel.split_whitespace().any(|r| r.eq_ignore_ascii_case("stylesheet")))
}

fn keeps_attribute(name: &str) -> bool {
    KEPT_ATTRIBUTES.contains(&name) || name.starts_with("aria-")
}

enum Visit<'a> {
    Open(NodeId),
    Close(&'a str),
}

fn write_node(tree: &DomTree, root: NodeId, opts: &CleanOptions, out: &mut String) {
    let mut stack = vec![Visit::Open(root)];
    while let Some(visit) = stack.pop() {
        let id = match visit {
            Visit::Close(tag) => {
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
                continue;
            }
            Visit::Open(id) => id,
        };
        match &tree.node(id).kind {
            NodeKind::Text(text) => {
                let text = if text.chars().count() > opts.text_cap {
                    format!("{}...", truncate_chars(text.trim(), opts.text_cap))
                } else {
                    text.clone()
                };
                escape_into(&text, false, out);
            }
            NodeKind::Element { tag, attrs } => {
                if is_stripped(tree, id) {
                    continue;
                }
                out.push('<');
                out.push_str(tag);
                for (name, value) in attrs.iter().filter(|(name, _)| keeps_attribute(name)) {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    escape_into(value, true, out);
                    out.push('"');
                }
                out.push('>');
                if VOID_TAGS.contains(&tag.as_str()) {
                    continue;
                }
                stack.push(Visit::Close(tag));
                for &child in tree.children(id).iter().rev() {
                    stack.push(Visit::Open(child));
                }
            }
        }
    }
}

fn escape_into(text: &str, attribute: bool, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::tree::RawNode;

    fn doc(body: RawNode) -> DomTree {
        DomTree::from_raw(
            &RawNode::element("html")
                .child(
                    RawNode::element("head")
                        .child(RawNode::element("script").child(RawNode::text("var x = 1;")))
                        .child(RawNode::element("link").attr("rel", "stylesheet").attr("href", "a.css"))
                        .child(RawNode::element("link").attr("rel", "icon")),
                )
                .child(body),
        )
        .unwrap()
    }

    #[test]
    fn test_strips_non_content_and_attributes() {
        let tree = doc(
            RawNode::element("body")
                .child(
                    RawNode::element("button")
                        .attr("id", "go")
                        .attr("onclick", "run()")
                        .attr("style", "color: red")
                        .attr("aria-label", "Go")
                        .child(RawNode::text("Go")),
                )
                .child(RawNode::element("img").attr("src", "x.png"))
                .child(RawNode::element("svg").child(RawNode::element("path"))),
        );
        let html = clean_document(&tree, &CleanOptions::default());
        assert_eq!(
            html,
            "<html><head><link></head><body><button aria-label=\"Go\" id=\"go\">Go</button></body></html>"
        );
    }

    #[test]
    fn test_collapses_whitespace_and_shortens_text() {
        let long = format!("  {}  ", "a".repeat(150));
        let tree = doc(
            RawNode::element("body")
                .child(RawNode::element("p").child(RawNode::text("one\n\n   two")))
                .child(RawNode::element("p").child(RawNode::text(&long))),
        );
        let html = clean_document(&tree, &CleanOptions::default());
        assert!(html.contains("<p>one two</p>"));
        assert!(html.contains(&format!("<p>{}...</p>", "a".repeat(100))));
    }

    #[test]
    fn test_caps_output() {
        let mut body = RawNode::element("body");
        for i in 0..50 {
            body = body.child(RawNode::element("div").attr("id", &format!("d{}", i)));
        }
        let tree = doc(body);
        let opts = CleanOptions {
            text_cap: 100,
            max_chars: 64,
        };
        let html = clean_document(&tree, &opts);
        assert!(html.ends_with(TRUNCATION_MARKER));
        assert_eq!(html.chars().count(), 64 + TRUNCATION_MARKER.len());
    }

    #[test]
    fn test_escapes_markup() {
        let tree = doc(
            RawNode::element("body")
                .child(RawNode::element("input").attr("value", "a\"b").attr("type", "text"))
                .child(RawNode::element("span").child(RawNode::text("1 < 2 & 3"))),
        );
        let html = clean_document(&tree, &CleanOptions::default());
        assert!(html.contains("<input type=\"text\" value=\"a&quot;b\"><span>"));
        assert!(html.contains("1 &lt; 2 &amp; 3"));
    }
}
