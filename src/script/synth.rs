//! Script synthesis
//!
//! Compiles a finished trace into a deterministic `ReplayScript`: a landing
//! step, then one `type` or `click` step per recorded click.

use super::types::{ReplayScript, ReplayStep, StepKind};
use crate::locator::Locator;
use crate::session::trace::{ClickEvent, Trace};

/// Start page used when the trace recorded none
pub const FALLBACK_START_URL: &str = "about:blank";

/// Time from each click to the next; the last click gets the rounded mean of
/// the earlier gaps, and a lone click gets zero.
pub fn step_durations(timestamps: &[i64]) -> Vec<i64> {
    let n = timestamps.len();
    let mut durations: Vec<i64> = timestamps.windows(2).map(|w| w[1] - w[0]).collect();
    if n > 1 {
        let total: i64 = durations.iter().sum();
        let mean = (total as f64 / durations.len() as f64).round() as i64;
        durations.push(mean);
    } else if n == 1 {
        durations.push(0);
    }
    durations
}

fn locator_issue(locator: &Locator) -> Option<String> {
    if locator.is_empty() {
        Some("empty locator".to_string())
    } else if !locator.is_well_formed() {
        Some(format!("malformed locator '{}'", locator))
    } else {
        None
    }
}

fn action_step(trace: &Trace, index: usize, click: &ClickEvent, duration_ms: i64) -> ReplayStep {
    let target = &click.target;
    let locator = target.meaningful_locator.clone();
    let label = target.label().to_string();
    let issue = locator_issue(&locator);
    if let Some(issue) = &issue {
        log::warn!("Step {} ({}): {}", index, label, issue);
    }

    let (kind, description, typed_value, variable_name) = match trace.typed_value(&locator) {
        Some(variable) => (
            StepKind::Type,
            format!("type {} into {}", variable.value, label),
            Some(variable.value.clone()),
            Some(variable.variable_name.clone()),
        ),
        None => (StepKind::Click, label, None, None),
    };

    ReplayStep {
        step_index: index,
        kind,
        locator,
        description,
        typed_value,
        variable_name,
        url: click.url.clone(),
        timestamp: click.timestamp,
        duration_ms,
        element_tag: Some(target.meaningful_tag_name.clone()).filter(|t| !t.is_empty()),
        issue,
    }
}

/// Compile a trace into a replay script.
pub fn synthesize(trace: &Trace) -> ReplayScript {
    let start_url = trace
        .effective_start_url()
        .unwrap_or(FALLBACK_START_URL)
        .to_string();

    let mut steps = Vec::with_capacity(trace.clicks.len() + 1);
    steps.push(ReplayStep {
        step_index: 0,
        kind: StepKind::Landing,
        locator: Locator::default(),
        description: "Landing page".to_string(),
        typed_value: None,
        variable_name: None,
        url: start_url.clone(),
        timestamp: trace.start_time,
        duration_ms: 0,
        element_tag: None,
        issue: None,
    });

    let timestamps: Vec<i64> = trace.clicks.iter().map(|c| c.timestamp).collect();
    let durations = step_durations(&timestamps);
    for (i, (click, duration)) in trace.clicks.iter().zip(durations).enumerate() {
        steps.push(action_step(trace, i + 1, click, duration));
    }

    let created = chrono::DateTime::from_timestamp_millis(trace.start_time)
        .unwrap_or_else(chrono::Utc::now)
        .to_rfc3339();

    log::info!(
        "Synthesized {} steps from {} clicks ({} typed)",
        steps.len(),
        trace.clicks.len(),
        steps.iter().filter(|s| s.kind == StepKind::Type).count()
    );

    ReplayScript {
        name: format!("click-through-{}", trace.session_id),
        start_url,
        created: Some(created),
        session_id: Some(trace.session_id.clone()),
        step_count: steps.len(),
        steps,
    }
}
