use clap::Parser;
use clickpath::artifacts::{export_recording, session_dir};
use clickpath::browser::{spawn_listener, ChromeDriver, ConnectionMode};
use clickpath::engine::{EngineClient, EngineEvent, EngineRequest};
use clickpath::fidelity;
use clickpath::handoff::{hand_off, HandoffSummary};
use clickpath::host::PageHost;
use clickpath::script::{render_script, ReplayExecutor};
use clickpath::session::{FlagUpdate, Trace};
use clickpath::{CaptureAgent, FileStore, RecorderConfig, RecorderError, SessionCoordinator};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use warp::Filter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 9669)]
    port: u16,

    /// Page to open before recording
    #[arg(short, long)]
    url: Option<String>,

    /// Run Chrome without a window
    #[arg(long)]
    headless: bool,

    /// Launch Chrome with --no-sandbox (Linux AppArmor workaround)
    #[arg(long)]
    no_sandbox: bool,

    /// Path to the Chrome executable
    #[arg(long)]
    chrome_path: Option<String>,

    /// Attach to a Chrome already listening on this debug port
    #[arg(long)]
    debug_port: Option<u16>,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Automation engine base URL
    #[arg(long)]
    engine_url: Option<String>,

    /// Directory for exported recordings
    #[arg(short, long)]
    output_dir: Option<PathBuf>,
}

#[derive(Debug, serde::Serialize)]
struct ApiResponse {
    status: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
}

impl ApiResponse {
    fn ok(message: impl Into<String>, data: impl serde::Serialize) -> Self {
        Self {
            status: "success".to_string(),
            message: message.into(),
            data: serde_json::to_value(data).ok(),
        }
    }

    fn error(e: &RecorderError) -> Self {
        Self {
            status: "error".to_string(),
            message: e.status_message(),
            data: None,
        }
    }
}

/// The last stopped session that produced a script
struct Finished {
    trace: Trace,
    summary: HandoffSummary,
}

// Shared state
struct AppState {
    driver: Arc<ChromeDriver>,
    coordinator: Arc<SessionCoordinator>,
    engine: Option<EngineClient>,
    last: Mutex<Option<Finished>>,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();

    if let Err(e) = run(args).await {
        log::error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => RecorderConfig::from_file(path).await?,
        None => RecorderConfig::default(),
    };
    if let Some(url) = args.engine_url.clone() {
        config.engine_url = Some(url);
    }
    if let Some(dir) = args.output_dir.clone() {
        config.output_dir = dir;
    }
    config.validate()?;

    log::info!("Starting clickpath recorder on port {}", args.port);

    let mode = match args.debug_port {
        Some(port) => ConnectionMode::DebugPort(port),
        None => ConnectionMode::Sandboxed {
            chrome_path: args.chrome_path.clone(),
            no_sandbox: args.no_sandbox,
            headless: args.headless,
        },
    };
    let driver = Arc::new(ChromeDriver::new(mode).await?);
    if let Some(url) = &args.url {
        driver.navigate(url).await?;
    }

    let store = Arc::new(FileStore::new(config.storage_dir.clone()));
    let engine = config.engine_url.as_deref().map(EngineClient::new).transpose()?;
    let host: Arc<dyn PageHost> = driver.clone();
    let coordinator = Arc::new(SessionCoordinator::new(store, host, config));
    if coordinator.resume().await? {
        log::info!("Resumed an in-flight recording");
    }

    let agent = CaptureAgent::new(Arc::clone(&coordinator));
    let events = driver.install_capture_hooks().await?;
    spawn_listener(agent, events);

    let state = Arc::new(AppState {
        driver,
        coordinator,
        engine,
        last: Mutex::new(None),
    });
    let state_filter = warp::any().map(move || state.clone());

    let health =
        warp::path("health").map(|| warp::reply::json(&serde_json::json!({ "status": "ok" })));

    let start = warp::path!("session" / "start")
        .and(warp::post())
        .and(state_filter.clone())
        .and_then(handle_start);

    let stop = warp::path!("session" / "stop")
        .and(warp::post())
        .and(state_filter.clone())
        .and_then(handle_stop);

    let status = warp::path!("session" / "status")
        .and(warp::get())
        .and(state_filter.clone())
        .and_then(handle_status);

    let flags = warp::path!("session" / "flags")
        .and(warp::post())
        .and(warp::body::json())
        .and(state_filter.clone())
        .and_then(handle_flags);

    let script = warp::path!("session" / "script")
        .and(warp::get())
        .and(state_filter.clone())
        .and_then(handle_script);

    let replay = warp::path!("session" / "replay")
        .and(warp::post())
        .and(state_filter.clone())
        .and_then(handle_replay);

    let engine_health = warp::path!("engine" / "health")
        .and(warp::get())
        .and(state_filter)
        .and_then(handle_engine_health);

    let routes = health
        .or(start)
        .or(stop)
        .or(status)
        .or(flags)
        .or(script)
        .or(replay)
        .or(engine_health);

    // Bind manually to handle "port in use" error gracefully
    let addr = SocketAddr::from(([127, 0, 0, 1], args.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("Port {} is already in use or unavailable: {}", args.port, e))?;

    log::info!("Listening on http://{}", addr);
    warp::serve(routes)
        .run_incoming(tokio_stream::wrappers::TcpListenerStream::new(listener))
        .await;
    Ok(())
}

async fn handle_start(state: Arc<AppState>) -> Result<impl warp::Reply, warp::Rejection> {
    let reply = match state.coordinator.start().await {
        Ok(session_id) => ApiResponse::ok(
            "Recording started",
            serde_json::json!({ "sessionId": session_id }),
        ),
        Err(e) => {
            log::error!("Failed to start recording: {}", e);
            ApiResponse::error(&e)
        }
    };
    Ok(warp::reply::json(&reply))
}

async fn handle_stop(state: Arc<AppState>) -> Result<impl warp::Reply, warp::Rejection> {
    let trace = match state.coordinator.stop().await {
        Ok(trace) => trace,
        Err(e) => return Ok(warp::reply::json(&ApiResponse::error(&e))),
    };

    let config = state.coordinator.config();
    let dir = session_dir(&config.output_dir, &trace.session_id);
    let summary = match hand_off(&trace, &dir, config.chunk_size, config.max_frame_bytes).await {
        Ok(summary) => summary,
        Err(e) => {
            log::warn!("Hand-off skipped: {}", e);
            return Ok(warp::reply::json(&ApiResponse::error(&e)));
        }
    };
    if let Err(e) = export_recording(&trace, &dir).await {
        log::warn!("Recording export failed: {}", e);
    }

    if let Some(engine) = &state.engine {
        let request = EngineRequest {
            url: summary.script.start_url.clone(),
            script: render_script(&summary.script),
            eval_criteria: config.eval_criteria.clone(),
        };
        let engine = engine.clone();
        tokio::spawn(async move {
            if let Err(e) = upload(&engine, request).await {
                log::error!("Engine upload failed: {}", e);
            }
        });
    }

    let reply = ApiResponse::ok(
        format!(
            "Recording stopped with {} step(s)",
            summary.script.step_count
        ),
        &summary,
    );
    *state.last.lock().await = Some(Finished { trace, summary });
    Ok(warp::reply::json(&reply))
}

async fn upload(engine: &EngineClient, request: EngineRequest) -> clickpath::Result<()> {
    if !engine.is_reachable().await {
        return Err(RecorderError::Engine(format!(
            "{} is not reachable",
            engine.base_url()
        )));
    }
    let outcome = engine
        .run(&request, |event| {
            if let EngineEvent::Error(message) = event {
                log::error!("Engine reported: {}", message);
            }
        })
        .await?;
    log::info!("Engine results: {}", outcome.results);
    Ok(())
}

async fn handle_status(state: Arc<AppState>) -> Result<impl warp::Reply, warp::Rejection> {
    let status = state.coordinator.status().await;
    Ok(warp::reply::json(&ApiResponse::ok("ok", status)))
}

async fn handle_flags(
    update: FlagUpdate,
    state: Arc<AppState>,
) -> Result<impl warp::Reply, warp::Rejection> {
    let flags = state.coordinator.set_flags(update).await;
    Ok(warp::reply::json(&ApiResponse::ok("Capture flags updated", flags)))
}

async fn handle_script(state: Arc<AppState>) -> Result<impl warp::Reply, warp::Rejection> {
    let last = state.last.lock().await;
    let reply = match last.as_ref() {
        Some(finished) => ApiResponse::ok(
            finished.summary.artifact.display().to_string(),
            serde_json::json!({
                "script": finished.summary.script,
                "text": render_script(&finished.summary.script),
            }),
        ),
        None => ApiResponse::error(&RecorderError::NoData),
    };
    Ok(warp::reply::json(&reply))
}

async fn handle_replay(state: Arc<AppState>) -> Result<impl warp::Reply, warp::Rejection> {
    let last = state.last.lock().await;
    let Some(finished) = last.as_ref() else {
        return Ok(warp::reply::json(&ApiResponse::error(&RecorderError::NoData)));
    };

    let page = match state.driver.current_page().await {
        Ok(page) => page,
        Err(e) => return Ok(warp::reply::json(&ApiResponse::error(&e))),
    };

    let report = match ReplayExecutor::new(page).execute_script(&finished.summary.script).await {
        Ok(report) => report,
        Err(e) => {
            log::error!("Replay failed: {:#}", e);
            return Ok(warp::reply::json(&ApiResponse {
                status: "error".to_string(),
                message: format!("Replay failed: {}", e),
                data: None,
            }));
        }
    };

    let recorded = finished
        .trace
        .clicks
        .last()
        .and_then(|c| c.post_action_dom.clone())
        .unwrap_or_default();
    let replayed = state
        .driver
        .capture_cleaned_dom(&state.coordinator.clean_options())
        .await
        .unwrap_or_default();
    let fidelity = fidelity::compare(&recorded, &replayed);

    log::info!(
        "Replay finished: {}/{} steps ok, {:.1}% DOM similarity",
        report.successful,
        report.total_steps,
        fidelity.similarity
    );
    Ok(warp::reply::json(&ApiResponse::ok(
        format!("Replayed {} step(s)", report.total_steps),
        serde_json::json!({ "report": report, "fidelity": fidelity }),
    )))
}

async fn handle_engine_health(state: Arc<AppState>) -> Result<impl warp::Reply, warp::Rejection> {
    let reachable = match &state.engine {
        Some(engine) => engine.is_reachable().await,
        None => false,
    };
    Ok(warp::reply::json(&serde_json::json!({
        "configured": state.engine.is_some(),
        "reachable": reachable,
    })))
}
