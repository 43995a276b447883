//! Replay fidelity
//!
//! Scores how closely a replayed page matches the recorded one by comparing
//! their cleaned DOM strings: visible text by edit distance, structure by the
//! overlap of tag sets.

use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};
use std::collections::HashSet;

/// Weight of text similarity in the overall score
const CONTENT_WEIGHT: f64 = 0.7;
const STRUCTURE_WEIGHT: f64 = 0.3;

/// Longest text (in chars) fed to the edit-distance computation
const MAX_TEXT_CHARS: usize = 5_000;

/// Lines reported per side of the diff
const MAX_DIFF_LINES: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

/// Percentages in `0..=100`, rounded to one decimal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FidelityReport {
    pub similarity: f64,
    pub structural_similarity: f64,
    pub content_similarity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<DomDiff>,
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Edit distance over chars
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j]
            } else {
                1 + prev[j].min(prev[j + 1]).min(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Visible text of an HTML string with whitespace collapsed
fn text_content(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => {
                in_tag = true;
                text.push(' ');
            }
            '>' if in_tag => {
                in_tag = false;
                text.push(' ');
            }
            _ if !in_tag => text.push(c),
            _ => {}
        }
    }
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lowercased names of every opening tag
fn tag_names(html: &str) -> HashSet<String> {
    let mut tags = HashSet::new();
    let mut rest = html;
    while let Some(pos) = rest.find('<') {
        rest = &rest[pos + 1..];
        let name: String = rest
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        let terminated = rest[name.len()..]
            .chars()
            .next()
            .is_some_and(|c| c == '>' || c.is_whitespace());
        if !name.is_empty() && terminated {
            tags.insert(name.to_ascii_lowercase());
        }
    }
    tags
}

fn string_similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 100.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let a: String = a.chars().take(MAX_TEXT_CHARS).collect();
    let b: String = b.chars().take(MAX_TEXT_CHARS).collect();
    let max_len = a.chars().count().max(b.chars().count()) as f64;
    let distance = levenshtein(&a, &b) as f64;
    ((max_len - distance) / max_len * 100.0).clamp(0.0, 100.0)
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 100.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    intersection / union * 100.0
}

/// Split markup at tag boundaries, one tag per line
fn tag_lines(html: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let bytes = html.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'>' {
            let mut j = i + 1;
            while j < bytes.len() && bytes[j].is_ascii_whitespace() {
                j += 1;
            }
            if j < bytes.len() && bytes[j] == b'<' {
                pieces.push(&html[start..i]);
                start = j + 1;
                i = j + 1;
                continue;
            }
        }
        i += 1;
    }
    pieces.push(&html[start..]);

    let last = pieces.len() - 1;
    pieces
        .into_iter()
        .enumerate()
        .map(|(i, piece)| {
            if i == 0 || i == last {
                piece.to_string()
            } else {
                format!("<{}>", piece)
            }
        })
        .collect()
}

/// Added and removed tag lines in document order, at most ten distinct of each
pub fn diff(recorded: &str, replayed: &str) -> DomDiff {
    let before = tag_lines(recorded).join("\n");
    let after = tag_lines(replayed).join("\n");
    let changes = TextDiff::from_lines(&before, &after);

    let mut result = DomDiff::default();
    let mut seen_added = HashSet::new();
    let mut seen_removed = HashSet::new();
    for change in changes.iter_all_changes() {
        let line = change.value().trim_end_matches('\n');
        let (lines, seen) = match change.tag() {
            ChangeTag::Insert => (&mut result.added, &mut seen_added),
            ChangeTag::Delete => (&mut result.removed, &mut seen_removed),
            ChangeTag::Equal => continue,
        };
        if lines.len() < MAX_DIFF_LINES && seen.insert(line.to_string()) {
            lines.push(line.to_string());
        }
    }
    result
}

/// Compare a recorded DOM with the DOM seen during replay.
pub fn compare(recorded: &str, replayed: &str) -> FidelityReport {
    if recorded.is_empty() && replayed.is_empty() {
        return FidelityReport {
            similarity: 100.0,
            structural_similarity: 100.0,
            content_similarity: 100.0,
            diff: None,
        };
    }
    if recorded.is_empty() || replayed.is_empty() {
        return FidelityReport {
            similarity: 0.0,
            structural_similarity: 0.0,
            content_similarity: 0.0,
            diff: None,
        };
    }

    let structural = jaccard(&tag_names(recorded), &tag_names(replayed));
    let content = string_similarity(&text_content(recorded), &text_content(replayed));
    let overall = content * CONTENT_WEIGHT + structural * STRUCTURE_WEIGHT;

    FidelityReport {
        similarity: round1(overall),
        structural_similarity: round1(structural),
        content_similarity: round1(content),
        diff: Some(diff(recorded, replayed)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
    }

    #[test]
    fn test_identical_doms() {
        let html = "<div><p>Hello</p></div>";
        let report = compare(html, html);
        assert_eq!(report.similarity, 100.0);
        assert_eq!(report.diff, Some(DomDiff::default()));
    }

    #[test]
    fn test_empty_sides() {
        assert_eq!(compare("", "").similarity, 100.0);
        assert_eq!(compare("<p>x</p>", "").similarity, 0.0);
    }

    #[test]
    fn test_weighted_score() {
        // Same text, tag sets {div,p} vs {div,span}: jaccard 1/3
        let report = compare("<div><p>Hi</p></div>", "<div><span>Hi</span></div>");
        assert_eq!(report.content_similarity, 100.0);
        assert_eq!(report.structural_similarity, 33.3);
        assert_eq!(report.similarity, 80.0);
    }

    #[test]
    fn test_diff_lines() {
        let d = diff("<div><p>a</p></div>", "<div><p>b</p></div>");
        assert_eq!(d.added, vec!["<p>b</p>".to_string()]);
        assert_eq!(d.removed, vec!["<p>a</p>".to_string()]);
    }

    #[test]
    fn test_diff_caps_and_dedups() {
        let recorded = "<ul><li>keep</li></ul>";
        let items: String = (0..15).map(|i| format!("<li>n{}</li><li>dup</li>", i)).collect();
        let replayed = format!("<ul><li>keep</li>{}</ul>", items);
        let d = diff(recorded, &replayed);
        assert_eq!(d.added.len(), MAX_DIFF_LINES);
        assert_eq!(d.added[0], "<li>n0</li>");
        assert_eq!(d.added.iter().filter(|l| l.as_str() == "<li>dup</li>").count(), 1);
        assert!(d.removed.is_empty());
    }
}
