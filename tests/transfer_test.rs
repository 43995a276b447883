//! Chunked transfer of step records and the full hand-off of a session

mod fake_host;

use clickpath::handoff::{receive_step_records, send_step_records};
use clickpath::locator::Locator;
use clickpath::session::Modifiers;
use clickpath::transfer::ChannelSink;
use clickpath::{
    hand_off, CaptureAgent, MemoryStore, PageSignal, RecorderConfig, RecorderError,
    SessionCoordinator, StepRecord, TransferReceiver, TransferSender,
};
use fake_host::{search_page, FakeHost};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn record(step_number: usize, dom_len: usize) -> StepRecord {
    StepRecord {
        step_number,
        screenshot: Some("data:image/png;base64,iVBORw0KGgo=".to_string()),
        dom: Some("x".repeat(dom_len)),
        code: format!("// Step {}", step_number),
        url: "https://shop.test/".to_string(),
        locator: Locator::new(format!("/html/body/div[{}]", step_number + 1)),
        timestamp: 1_000 * step_number as i64,
        duration: 1_000,
        element_text: format!("Click item {}", step_number),
        element_tag: "DIV".to_string(),
    }
}

#[tokio::test]
async fn test_large_records_round_trip() -> anyhow::Result<()> {
    let chunk_size = 1_000;
    // Three full chunks and a remainder, a small record, then another large one
    let records = vec![
        record(0, 3 * chunk_size + 17),
        record(1, 10),
        record(2, 5 * chunk_size),
    ];

    let (tx, mut rx) = mpsc::channel::<String>(64);
    let sent = records.clone();
    let sender = tokio::spawn(async move { send_step_records(sent, tx, chunk_size, 8 * 1024).await });

    let mut frames = Vec::new();
    while let Some(text) = rx.recv().await {
        frames.push(text);
    }
    let transfer_id = sender.await??;

    let kinds: Vec<String> = frames
        .iter()
        .map(|f| {
            serde_json::from_str::<serde_json::Value>(f).unwrap()["kind"]
                .as_str()
                .unwrap()
                .to_string()
        })
        .collect();
    assert_eq!(kinds.iter().filter(|k| *k == "record").count(), 3);
    assert!(kinds.iter().filter(|k| *k == "fragment").count() >= 4 + 5);
    assert_eq!(kinds.last().map(String::as_str), Some("ready"));

    let mut receiver = TransferReceiver::<StepRecord>::new();
    let mut delivered = None;
    for text in &frames {
        let frame = serde_json::from_str(text)?;
        assert!(delivered.is_none(), "nothing may follow the ready frame");
        delivered = receiver.accept(frame)?;
    }
    let delivered = delivered.expect("transfer completes on ready");
    assert_eq!(delivered, records);
    assert_eq!(receiver.in_flight(), 0);

    println!("✅ Transfer {} delivered {} records", transfer_id, delivered.len());
    Ok(())
}

#[tokio::test]
async fn test_dropped_fragment_yields_nothing() -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::channel::<String>(64);
    send_step_records(vec![record(0, 2_500)], tx, 1_000, 8 * 1024).await?;

    let mut frames = Vec::new();
    while let Some(text) = rx.recv().await {
        frames.push(text);
    }
    // Lose the final fragment before the ready frame
    let ready = frames.pop().unwrap();
    frames.pop();
    frames.push(ready);

    let mut receiver = TransferReceiver::<StepRecord>::new();
    let mut outcome = Ok(None);
    for text in &frames {
        outcome = receiver.accept(serde_json::from_str(text)?);
        if outcome.is_err() {
            break;
        }
    }
    assert!(matches!(outcome, Err(RecorderError::TransferIncomplete { .. })));
    Ok(())
}

#[tokio::test]
async fn test_oversized_frame_is_rejected() -> anyhow::Result<()> {
    let (tx, _rx) = mpsc::channel::<String>(64);
    let mut sink = ChannelSink::new(tx, 512);
    // Chunk size larger than the frame limit: the whole record goes inline
    let err = TransferSender::new(10_000)
        .send(vec![record(0, 2_000)], &mut sink)
        .await
        .unwrap_err();
    assert!(matches!(err, RecorderError::FrameTooLarge { max: 512, .. }));
    Ok(())
}

#[tokio::test]
async fn test_escaped_dom_is_fragmented_within_frame_limit() -> anyhow::Result<()> {
    // Raw length fits one chunk, but every quote doubles once escaped
    let mut quoted = record(0, 0);
    quoted.dom = Some("\"".repeat(700));
    let chunk_size = 1_000;
    let max_frame = chunk_size / 3 * 4 + 4 + 256;

    let (tx, mut rx) = mpsc::channel::<String>(64);
    send_step_records(vec![quoted.clone()], tx, chunk_size, max_frame).await?;

    let mut receiver = TransferReceiver::<StepRecord>::new();
    let mut fragments = 0;
    let mut delivered = None;
    while let Some(text) = rx.recv().await {
        assert!(text.len() <= max_frame);
        let frame: clickpath::Frame<StepRecord> = serde_json::from_str(&text)?;
        if matches!(frame, clickpath::Frame::Fragment { .. }) {
            fragments += 1;
        }
        delivered = receiver.accept(frame)?.or(delivered);
    }
    assert!(fragments >= 1, "escaped record travels as fragments");
    assert_eq!(delivered, Some(vec![quoted]));
    Ok(())
}

#[tokio::test]
async fn test_receiver_writes_step_records() -> anyhow::Result<()> {
    let scratch = tempfile::tempdir()?;
    let dir = scratch.path().join("records");
    let (tx, mut rx) = mpsc::channel::<String>(64);
    let receiving = {
        let dir = dir.clone();
        tokio::spawn(async move { receive_step_records(&mut rx, &dir).await })
    };
    send_step_records(vec![record(0, 100), record(1, 4_000)], tx, 1_000, 8 * 1024).await?;

    let records = receiving.await??;
    assert_eq!(records.len(), 2);
    let written: Vec<StepRecord> =
        serde_json::from_str(&std::fs::read_to_string(dir.join("step_records.json"))?)?;
    assert_eq!(written, records);
    Ok(())
}

#[tokio::test]
async fn test_hand_off_recorded_session() -> anyhow::Result<()> {
    let config = RecorderConfig {
        settle_delay_ms: 20,
        retry_delay_ms: 80,
        dom_debounce_ms: 30,
        ..RecorderConfig::default()
    };
    let host = Arc::new(FakeHost::new("https://shop.test/", search_page()));
    let coordinator = Arc::new(SessionCoordinator::new(
        Arc::new(MemoryStore::new()),
        host,
        config,
    ));
    let agent = CaptureAgent::new(Arc::clone(&coordinator));

    coordinator.start().await?;
    agent
        .handle(PageSignal::Click {
            url: "https://shop.test/".to_string(),
            title: "Shop".to_string(),
            timestamp: Some(1_000),
            x: 5.0,
            y: 5.0,
            button: 0,
            modifiers: Modifiers::default(),
            target_path: vec![1, 1, 0],
            document: search_page().flatten(),
        })
        .await?;
    tokio::time::sleep(Duration::from_millis(250)).await;
    let trace = coordinator.stop().await?;

    let scratch = tempfile::tempdir()?;
    let dir = scratch.path().join("handoff");
    // Small chunks force the cleaned DOM through fragments
    let summary = hand_off(&trace, &dir, 64, 4 * 1024).await?;
    assert_eq!(summary.records, 2);
    assert_eq!(summary.script.step_count, 2);
    assert_eq!(summary.session_id, trace.session_id);
    assert!(summary.artifact.exists());

    let artifact = std::fs::read_to_string(&summary.artifact)?;
    assert!(artifact.contains("async function main(page, stagehand)"));
    assert!(artifact.contains("/html/body/div/button"));

    let records: Vec<StepRecord> =
        serde_json::from_str(&std::fs::read_to_string(dir.join("step_records.json"))?)?;
    assert_eq!(records[0].step_number, 0);
    assert_eq!(records[0].element_text, "Landing page");
    assert_eq!(records[1].element_text, "Click Submit");
    assert!(records[1].screenshot.as_deref().unwrap().starts_with("data:image/png;base64,"));
    assert!(records[1].dom.is_some());
    assert!(dir.join("script.json").exists());

    println!("✅ Hand-off wrote records and artifact to {}", dir.display());
    Ok(())
}

#[tokio::test]
async fn test_hand_off_without_clicks_writes_nothing() -> anyhow::Result<()> {
    let trace = clickpath::Trace::new(1_700_000_000_000);
    let scratch = tempfile::tempdir()?;
    let dir = scratch.path().join("empty");
    let err = hand_off(&trace, &dir, 1_000, 8 * 1024).await.unwrap_err();
    assert!(matches!(err, RecorderError::NoData));
    assert!(!dir.exists());
    Ok(())
}
