//! Page statistics captured with every click and after navigation settles

use super::tree::{truncate_chars, DomTree, NodeId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const LINK_TEXT_CAP: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkSummary {
    pub href: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSummary {
    pub src: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSummary {
    pub tag: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub name: Option<String>,
    pub id: Option<String>,
    pub placeholder: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormSummary {
    pub action: Option<String>,
    pub method: String,
    pub fields: Vec<FieldSummary>,
}

/// Statistics describing one document at one instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomSummary {
    pub url: String,
    pub title: String,
    pub timestamp: i64,
    pub total_elements: usize,
    pub tags: BTreeMap<String, usize>,
    pub classes: BTreeMap<String, usize>,
    pub ids: BTreeMap<String, usize>,
    pub links: Vec<LinkSummary>,
    pub images: Vec<ImageSummary>,
    pub forms: Vec<FormSummary>,
    pub max_depth: usize,
}

impl DomSummary {
    /// Summarize the whole document.
    pub fn from_tree(tree: &DomTree, url: &str, title: &str, timestamp: i64) -> Self {
        let mut summary = DomSummary {
            url: url.to_string(),
            title: title.to_string(),
            timestamp,
            total_elements: 0,
            tags: BTreeMap::new(),
            classes: BTreeMap::new(),
            ids: BTreeMap::new(),
            links: Vec::new(),
            images: Vec::new(),
            forms: Vec::new(),
            max_depth: 0,
        };

        let root = tree.root();
        let root_depth = tree.depth(root);
        for id in tree.descendants(root) {
            let Some(tag) = tree.tag(id) else { continue };
            summary.total_elements += 1;
            *summary.tags.entry(tag.to_string()).or_default() += 1;
            summary.max_depth = summary.max_depth.max(tree.depth(id) - root_depth);

            if let Some(class) = tree.attr(id, "class") {
                for cls in class.split_whitespace() {
                    *summary.classes.entry(cls.to_string()).or_default() += 1;
                }
            }
            if let Some(element_id) = tree.non_empty_attr(id, "id") {
                *summary.ids.entry(element_id.to_string()).or_default() += 1;
            }

            match tag {
                "a" => {
                    if let Some(href) = tree.attr(id, "href") {
                        let text = tree.text_content(id);
                        summary.links.push(LinkSummary {
                            href: href.to_string(),
                            text: truncate_chars(text.trim(), LINK_TEXT_CAP).to_string(),
                            title: tree.non_empty_attr(id, "title").map(str::to_string),
                        });
                    }
                }
                "img" => summary.images.push(ImageSummary {
                    src: tree.attr(id, "src").unwrap_or_default().to_string(),
                    alt: tree.non_empty_attr(id, "alt").map(str::to_string),
                }),
                "form" => summary.forms.push(summarize_form(tree, id)),
                _ => {}
            }
        }
        summary
    }
}

fn summarize_form(tree: &DomTree, form: NodeId) -> FormSummary {
    let fields = tree
        .descendants(form)
        .into_iter()
        .filter(|&id| matches!(tree.tag(id), Some("input" | "select" | "textarea")))
        .map(|id| {
            let tag = tree.tag(id).unwrap_or_default().to_string();
            let field_type = tree
                .non_empty_attr(id, "type")
                .map(str::to_ascii_lowercase)
                .unwrap_or_else(|| default_field_type(&tag).to_string());
            FieldSummary {
                tag,
                field_type,
                name: tree.non_empty_attr(id, "name").map(str::to_string),
                id: tree.non_empty_attr(id, "id").map(str::to_string),
                placeholder: tree.non_empty_attr(id, "placeholder").map(str::to_string),
            }
        })
        .collect();

    FormSummary {
        action: tree.non_empty_attr(form, "action").map(str::to_string),
        method: tree
            .non_empty_attr(form, "method")
            .map(str::to_ascii_lowercase)
            .unwrap_or_else(|| "get".to_string()),
        fields,
    }
}

/// Type the browser reports for a form control with no explicit `type`
pub fn default_field_type(tag: &str) -> &'static str {
    match tag {
        "textarea" => "textarea",
        "select" => "select-one",
        _ => "text",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::tree::RawNode;

    #[test]
    fn test_summary_counts() {
        let raw = RawNode::element("html").child(
            RawNode::element("body")
                .child(
                    RawNode::element("a")
                        .attr("href", "/docs")
                        .attr("class", "nav primary")
                        .child(RawNode::text("  Docs  ")),
                )
                .child(
                    RawNode::element("form")
                        .attr("action", "/search")
                        .attr("id", "search")
                        .child(RawNode::element("input").attr("name", "q"))
                        .child(RawNode::element("select").attr("name", "lang")),
                )
                .child(RawNode::element("img").attr("src", "logo.png").attr("alt", "")),
        );
        let tree = DomTree::from_raw(&raw).unwrap();
        let summary = DomSummary::from_tree(&tree, "https://x.test/", "X", 42);

        assert_eq!(summary.total_elements, 7);
        assert_eq!(summary.tags.get("input"), Some(&1));
        assert_eq!(summary.classes.get("nav"), Some(&1));
        assert_eq!(summary.ids.get("search"), Some(&1));
        assert_eq!(summary.max_depth, 3);
        assert_eq!(summary.links[0].text, "Docs");
        assert_eq!(summary.images[0].alt, None);

        let form = &summary.forms[0];
        assert_eq!(form.method, "get");
        assert_eq!(form.fields.len(), 2);
        assert_eq!(form.fields[0].field_type, "text");
        assert_eq!(form.fields[1].field_type, "select-one");
    }
}
