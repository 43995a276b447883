//! Local HTTP server for tests
//!
//! Serves a small shop with a search form for recording tests, and a fake
//! automation engine that answers the execute endpoint with a canned event
//! stream. Each server instance runs on a random available port.

use std::net::SocketAddr;
use tokio::sync::oneshot;
use warp::Filter;

const SHOP_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <title>Test Shop</title>
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <style>button { padding: 8px; }</style>
</head>
<body>
    <form action="/results" method="get">
        <input id="q" name="q" type="text" placeholder="Search">
        <button type="submit">Search</button>
    </form>
    <div class="actions">
        <button id="submit" type="button" onclick="document.getElementById('status').textContent = 'Submitted'">
            <span>Submit</span>
        </button>
        <p id="status">Waiting</p>
    </div>
</body>
</html>"#;

const RESULTS_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <title>Results</title>
</head>
<body>
    <h1>Results</h1>
    <p><a href="/">Back to shop</a></p>
</body>
</html>"#;

/// Body of a canned engine run; a script containing `FAIL` gets an error event
fn engine_events(script: &str) -> String {
    if script.contains("FAIL") {
        return [
            "data: {\"status\":\"started\"}",
            "",
            "data: {\"error\":\"Step 1 failed: element not found\"}",
            "",
        ]
        .join("\n");
    }
    let completed = serde_json::json!({
        "status": "completed",
        "results": { "scriptBytes": script.len() },
    });
    [
        "data: {\"status\":\"started\"}".to_string(),
        String::new(),
        "data: {\"debuggerUrl\":\"http://127.0.0.1:9222/devtools/page/1\"}".to_string(),
        String::new(),
        format!("data: {}", completed),
        String::new(),
    ]
    .join("\n")
}

/// Test server for pages and the fake engine
pub struct TestServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl TestServer {
    /// Start a new test server on a random available port
    pub async fn start() -> Self {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        // Routes
        let index = warp::path::end().map(|| warp::reply::html(SHOP_PAGE));
        let results = warp::path("results").map(|| warp::reply::html(RESULTS_PAGE));

        let execute = warp::path!("api" / "browser-extension" / "execute")
            .and(warp::post())
            .and(warp::body::json())
            .map(|request: serde_json::Value| {
                let script = request["script"].as_str().unwrap_or_default();
                warp::reply::with_header(engine_events(script), "content-type", "text/event-stream")
            });

        let routes = index.or(results).or(execute);

        // Bind to random port
        let (addr, server) =
            warp::serve(routes).bind_with_graceful_shutdown(([127, 0, 0, 1], 0), async {
                shutdown_rx.await.ok();
            });

        // Spawn server in background
        tokio::spawn(server);

        Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Get the base URL for this server (e.g., "http://127.0.0.1:12345")
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the socket address
    #[allow(dead_code)]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Wait for the server to be ready by making a test request
    pub async fn wait_ready(&self) -> anyhow::Result<()> {
        let url = self.url();
        let max_attempts = 10;

        for attempt in 1..=max_attempts {
            match reqwest::get(&url).await {
                Ok(response) if response.status().is_success() => {
                    println!("✅ Test server ready on: {}", url);
                    return Ok(());
                }
                Ok(response) => {
                    println!(
                        "⚠️ Attempt {}: Server returned status {}",
                        attempt,
                        response.status()
                    );
                }
                Err(e) => {
                    println!("⚠️ Attempt {}: Server not ready - {}", attempt, e);
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            }
        }

        anyhow::bail!(
            "Server did not become ready after {} attempts",
            max_attempts
        )
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        // Signal server to shutdown
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
