//! Script synthesis and rendering from hand-built traces

use clickpath::dom::{DomSummary, DomTree, RawNode};
use clickpath::locator::{Locator, TextCaps};
use clickpath::session::{ClickEvent, InputElement, InputVariable, Pointer, Trace};
use clickpath::{render_script, resolve_meaningful_target, synthesize, ScriptValidator, StepKind};

fn page() -> RawNode {
    RawNode::element("html").child(
        RawNode::element("body")
            .child(RawNode::element("input").attr("name", "q"))
            .child(RawNode::element("button").child(RawNode::text("Say \"hi\"")))
            .child(RawNode::element("a").attr("href", "/next").child(RawNode::text("Next"))),
    )
}

fn click_on(trace: &mut Trace, path: &[usize], timestamp: i64) {
    let tree = DomTree::from_raw(&page()).unwrap();
    let node = tree.node_at_path(path).unwrap();
    let sequence = trace.next_sequence;
    trace.next_sequence += 1;
    trace.clicks.push(ClickEvent {
        timestamp,
        sequence,
        url: "https://example.com/form".to_string(),
        title: "Form".to_string(),
        pointer: Pointer::default(),
        target: resolve_meaningful_target(&tree, node, &TextCaps::default()),
        dom_snapshot: DomSummary::from_tree(&tree, "https://example.com/form", "Form", timestamp),
        screenshot: None,
        post_action_dom: None,
        screenshot_pending: true,
    });
}

fn type_into(trace: &mut Trace, locator: &str, name: &str, value: &str) {
    let locator = Locator::new(locator);
    trace.variables.insert(
        locator.clone(),
        InputVariable {
            variable_name: name.to_string(),
            locator,
            value: value.to_string(),
            element: InputElement {
                tag: "INPUT".to_string(),
                ..InputElement::default()
            },
            first_captured: 0,
            last_updated: 0,
            update_count: 1,
        },
    );
}

fn trace() -> Trace {
    let mut trace = Trace::new(1_700_000_000_000);
    trace.start_url = Some("https://example.com/form".to_string());
    trace
}

#[test]
fn test_step_count_is_clicks_plus_landing() {
    for clicks in 0..5 {
        let mut trace = trace();
        for i in 0..clicks {
            click_on(&mut trace, &[0, 2], 1_000 * i as i64);
        }
        let script = synthesize(&trace);
        assert_eq!(script.steps.len(), trace.clicks.len() + 1);
        assert_eq!(script.step_count, script.steps.len());
        assert_eq!(script.steps[0].kind, StepKind::Landing);
        assert_eq!(script.steps[0].url, "https://example.com/form");
    }
    println!("✅ Every script is clicks + 1 steps long");
}

#[test]
fn test_start_url_falls_back_to_first_click() {
    let mut trace = Trace::new(1_700_000_000_000);
    click_on(&mut trace, &[0, 1], 1_000);
    assert_eq!(synthesize(&trace).start_url, "https://example.com/form");

    let empty = Trace::new(1_700_000_000_000);
    assert_eq!(synthesize(&empty).start_url, "about:blank");
}

#[test]
fn test_empty_value_does_not_make_a_type_step() {
    let mut trace = trace();
    type_into(&mut trace, "/html/body/input", "q", "");
    click_on(&mut trace, &[0, 0], 1_000);
    let script = synthesize(&trace);
    assert_eq!(script.steps[1].kind, StepKind::Click);
    assert!(script.steps[1].typed_value.is_none());
}

#[test]
fn test_rendered_script_escapes_literals() {
    let mut trace = trace();
    type_into(&mut trace, "/html/body/input", "q", "say \"cheese\"\\now");
    click_on(&mut trace, &[0, 0], 1_000);
    click_on(&mut trace, &[0, 1], 2_500);

    let script = synthesize(&trace);
    assert_eq!(script.steps[1].kind, StepKind::Type);
    assert_eq!(script.steps[2].description, "Say \"hi\"");

    let text = render_script(&script);
    assert!(text.contains("Generated from 2 recorded action(s)"));
    assert!(text.contains(r#"arguments: ["say \"cheese\"\\now"]"#));
    assert!(text.contains(r#"description: "Say \"hi\"""#));
    assert!(text.contains("method: \"click\""));
    assert!(text.contains("return { actionsCompleted: 2 };"));
}

#[test]
fn test_empty_trace_renders_noop() {
    let script = synthesize(&trace());
    assert!(script.is_noop());
    let text = render_script(&script);
    assert!(text.contains("No actions were recorded"));
    assert!(text.contains("async function main(page, stagehand)"));
    assert!(!text.contains("stagehand.act"));
}

#[test]
fn test_malformed_locator_fails_only_its_step() {
    let mut trace = trace();
    click_on(&mut trace, &[0, 1], 1_000);
    click_on(&mut trace, &[0, 2], 2_000);
    trace.clicks[0].target.meaningful_locator = Locator::new("/html/body/button[");

    let script = synthesize(&trace);
    assert_eq!(script.step_count, 3);
    assert!(script.steps[1].issue.is_some());
    assert!(script.steps[2].issue.is_none());

    let text = render_script(&script);
    assert!(text.contains("// Skipped: malformed locator"));
    assert!(text.contains("return { actionsCompleted: 1 };"));

    // Still a structurally valid script; the bad locator is only a warning
    let json = serde_json::to_string(&script).unwrap();
    let result = ScriptValidator::new().validate_json(&json);
    assert!(result.is_valid, "errors: {:?}", result.errors);
}

#[test]
fn test_synthesis_is_deterministic() {
    let mut trace = trace();
    type_into(&mut trace, "/html/body/input", "q", "socks");
    click_on(&mut trace, &[0, 0], 1_000);
    click_on(&mut trace, &[0, 2], 4_000);
    let first = synthesize(&trace);
    let second = synthesize(&trace);
    assert_eq!(first, second);
    assert_eq!(render_script(&first), render_script(&second));
    assert_eq!(first.name, format!("click-through-{}", trace.session_id));
}
