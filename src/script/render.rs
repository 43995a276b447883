//! Text artifact for a replay script
//!
//! Renders an act-style automation script that a remote engine can execute,
//! plus the per-step snippets used in step records.

use super::types::{ReplayScript, ReplayStep, StepKind};

/// Escape a value for a double-quoted script literal
pub fn escape_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out
}

/// Keep step comments on one line
fn comment_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Code for a single step, indented for a function body
pub fn render_step(step: &ReplayStep) -> String {
    let selector = escape_literal(step.locator.as_str());
    match step.kind {
        StepKind::Landing => "// Step 0: Initial landing page".to_string(),
        StepKind::Type => {
            let value = escape_literal(step.typed_value.as_deref().unwrap_or_default());
            format!(
                "await stagehand.act({{\n    selector: \"{}\",\n    description: \"{}\",\n    method: \"type\",\n    arguments: [\"{}\"]\n  }});",
                selector,
                escape_literal(&step.description),
                value
            )
        }
        StepKind::Click => format!(
            "await stagehand.act({{\n    selector: \"{}\",\n    description: \"{}\",\n    method: \"click\",\n    arguments: []\n  }});",
            selector,
            escape_literal(&step.description)
        ),
    }
}

/// Render the whole script; an empty recording yields a no-op body.
pub fn render_script(script: &ReplayScript) -> String {
    let actions = script.actions();
    if actions.is_empty() {
        return [
            "/**",
            " * Browser Recording Generated Script",
            " * No actions were recorded",
            " */",
            "",
            "async function main(page, stagehand) {",
            "  console.log(\"No actions to replay\");",
            "  return { message: \"No actions recorded\" };",
            "}",
        ]
        .join("\n");
    }

    let mut lines = vec![
        "/**".to_string(),
        " * Browser Recording Generated Script".to_string(),
        format!(" * Generated from {} recorded action(s)", actions.len()),
        format!(" * Start URL: {}", comment_text(&script.start_url)),
        " *".to_string(),
        " * You can modify it before execution.".to_string(),
        " */".to_string(),
        String::new(),
        "async function main(page, stagehand) {".to_string(),
    ];

    for step in actions {
        let heading = match step.kind {
            StepKind::Type => format!("Type into {}", comment_text(&step.description)),
            _ => comment_text(&step.description),
        };
        lines.push(format!("  // Step {}: {}", step.step_index, heading));
        if let Some(issue) = &step.issue {
            lines.push(format!("  // Skipped: {}", comment_text(issue)));
        } else {
            lines.push(format!("  {}", render_step(step)));
        }
        lines.push(String::new());
    }

    let replayable = actions.iter().filter(|s| s.issue.is_none()).count();
    lines.push(format!(
        "  console.log(\"All {} action(s) completed\");",
        replayable
    ));
    lines.push(format!("  return {{ actionsCompleted: {} }};", replayable));
    lines.push("}".to_string());
    lines.join("\n")
}

/// Download name for a script artifact, e.g. `click-through-script-2024-05-01T10-20-30.txt`
pub fn artifact_filename(at: chrono::DateTime<chrono::Utc>) -> String {
    format!("click-through-script-{}.txt", at.format("%Y-%m-%dT%H-%M-%S"))
}
