//! Local replay executor
//!
//! Replays a synthesized script against a live page: navigates to the start
//! URL, then resolves each step's locator with `document.evaluate` and clicks
//! or types into the element.

use super::types::{ExecutionReport, ReplayScript, ReplayStep, StepKind, StepResult, StepStatus};
use anyhow::{Context, Result};
use std::time::{Duration, Instant};

// Note: We use chromiumoxide module names because spider_chrome re-exports them
use chromiumoxide::cdp::browser_protocol::input;
use chromiumoxide::cdp::browser_protocol::page;
use chromiumoxide::cdp::js_protocol::runtime;
use chromiumoxide::page::Page;

/// Longest pause honoured between paced steps
const MAX_STEP_DELAY: Duration = Duration::from_secs(5);

/// Replays scripts step by step via spider_chrome's Page API.
pub struct ReplayExecutor {
    page: Page,
    pace: bool,
}

impl ReplayExecutor {
    pub fn new(page: Page) -> Self {
        Self { page, pace: false }
    }

    /// Wait each step's recorded duration (capped) before the next one
    pub fn with_pacing(mut self, pace: bool) -> Self {
        self.pace = pace;
        self
    }

    /// Execute a complete replay script
    pub async fn execute_script(&self, script: &ReplayScript) -> Result<ExecutionReport> {
        script.validate()?;

        let mut report = ExecutionReport::new(script.name.clone(), script.steps.len());

        for step in &script.steps {
            if let Some(issue) = &step.issue {
                log::warn!("Skipping step {}: {}", step.step_index, issue);
                report.add_result(StepResult {
                    step: step.step_index,
                    kind: step.kind,
                    status: StepStatus::Skipped,
                    duration: Duration::ZERO,
                    error: Some(issue.clone()),
                });
                continue;
            }

            let start = Instant::now();
            match self.execute_step(script, step).await {
                Ok(()) => {
                    log::debug!("Step {} ({}) ok", step.step_index, step.kind.as_str());
                    report.add_result(StepResult {
                        step: step.step_index,
                        kind: step.kind,
                        status: StepStatus::Success,
                        duration: start.elapsed(),
                        error: None,
                    });
                }
                Err(e) => {
                    log::error!("Step {} failed: {:#}", step.step_index, e);
                    report.add_result(StepResult {
                        step: step.step_index,
                        kind: step.kind,
                        status: StepStatus::Failed,
                        duration: start.elapsed(),
                        error: Some(format!("{:#}", e)),
                    });

                    // Later steps depend on the page state this one should have produced
                    break;
                }
            }

            if self.pace && step.duration_ms > 0 {
                let delay = Duration::from_millis(step.duration_ms as u64).min(MAX_STEP_DELAY);
                tokio::time::sleep(delay).await;
            }
        }

        Ok(report)
    }

    async fn execute_step(&self, script: &ReplayScript, step: &ReplayStep) -> Result<()> {
        match step.kind {
            StepKind::Landing => self.navigate(&script.start_url).await,
            StepKind::Click => self.click(step).await,
            StepKind::Type => self.type_text(step).await,
        }
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        self.page
            .execute(page::NavigateParams::new(url))
            .await
            .with_context(|| format!("Page.navigate to {} failed", url))?;
        self.page
            .wait_for_navigation()
            .await
            .context("Waiting for landing page load failed")?;
        Ok(())
    }

    async fn click(&self, step: &ReplayStep) -> Result<()> {
        let expression = format!(
            "(() => {{ const el = {}; if (!el) return false; \
             el.scrollIntoView({{block: 'center'}}); el.click(); return true; }})()",
            element_lookup(step)?
        );
        self.expect_element(step, &expression).await
    }

    async fn type_text(&self, step: &ReplayStep) -> Result<()> {
        let value = step
            .typed_value
            .as_deref()
            .context("Type step has no value")?;

        let expression = format!(
            "(() => {{ const el = {}; if (!el) return false; el.focus(); \
             if ('value' in el) {{ el.value = ''; }} return true; }})()",
            element_lookup(step)?
        );
        self.expect_element(step, &expression).await?;

        self.page
            .execute(input::InsertTextParams::new(value))
            .await
            .context("Input.insertText failed")?;
        Ok(())
    }

    /// Evaluate a lookup expression that returns whether the element was found
    async fn expect_element(&self, step: &ReplayStep, expression: &str) -> Result<()> {
        let params = runtime::EvaluateParams::builder()
            .expression(expression)
            .return_by_value(true)
            .build()
            .map_err(anyhow::Error::msg)?;

        let response = self
            .page
            .execute(params)
            .await
            .context("Runtime.evaluate failed")?;

        if let Some(details) = &response.exception_details {
            anyhow::bail!("Script error at step {}: {}", step.step_index, details.text);
        }

        if !evaluated_true(&response.result) {
            anyhow::bail!("No element matches locator {}", step.locator);
        }
        Ok(())
    }
}

/// Whether an evaluation returned the boolean `true` by value
fn evaluated_true(returns: &runtime::EvaluateReturns) -> bool {
    returns
        .result
        .value
        .as_ref()
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

/// JavaScript expression resolving the step's locator to a node
fn element_lookup(step: &ReplayStep) -> Result<String> {
    let literal = serde_json::to_string(step.locator.as_str())?;
    Ok(format!(
        "document.evaluate({}, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue",
        literal
    ))
}
