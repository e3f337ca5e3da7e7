//! Runner that locates the target app, executes scenarios and collects evidence

use std::path::PathBuf;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::RunnerConfig;
use crate::error::{E2eError, E2eResult};
use crate::evidence::Artifact;
use crate::playwright::{
    clean_message, parse_events, NodeExecutor, PlaywrightHandle, ScriptEvent, ScriptExecutor,
    ScriptOutput, StepResult, StepStatus,
};
use crate::scenario::Scenario;
use crate::server::{self, ServerHandle};

/// Final state of a scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Failed,
    /// A guard step ended the scenario early
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleMessage {
    pub level: String,
    pub text: String,
}

/// Result of running a single scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub name: String,
    pub route: Option<String>,
    pub outcome: Outcome,
    pub duration_ms: u64,
    pub steps: Vec<StepResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub console: Vec<ConsoleMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dialogs: Vec<String>,
    pub artifacts: Vec<Artifact>,
    pub error: Option<String>,
}

impl ScenarioResult {
    fn empty(scenario: &Scenario) -> Self {
        Self {
            name: scenario.name.clone(),
            route: scenario.route().map(String::from),
            outcome: Outcome::Failed,
            duration_ms: 0,
            steps: vec![],
            console: vec![],
            dialogs: vec![],
            artifacts: vec![],
            error: None,
        }
    }

    /// Steps that failed softly
    pub fn warnings(&self) -> impl Iterator<Item = &StepResult> {
        self.steps.iter().filter(|s| s.status == StepStatus::Warned)
    }
}

/// Result of running a set of scenarios
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteResult {
    pub started_at: DateTime<Utc>,
    pub base_url: String,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub stopped: usize,
    pub duration_ms: u64,
    pub results: Vec<ScenarioResult>,
}

impl SuiteResult {
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.stopped == 0
    }
}

/// Runs verification scenarios one after another
pub struct VerificationRunner<E: ScriptExecutor = NodeExecutor> {
    config: RunnerConfig,
    playwright: PlaywrightHandle,
    executor: E,

    /// Dev server spawned by this runner, if any
    server: Option<ServerHandle>,

    base_url: Option<String>,
}

impl VerificationRunner<NodeExecutor> {
    /// Create a runner that executes scripts with the local `node`
    pub fn new(config: RunnerConfig) -> E2eResult<Self> {
        let executor = NodeExecutor::new(&config.playwright);
        Self::with_executor(config, executor)
    }

    /// Fail early when Node.js is not installed
    pub async fn check_prerequisites(&self) -> E2eResult<()> {
        self.executor.check_installed().await
    }
}

impl<E: ScriptExecutor> VerificationRunner<E> {
    pub fn with_executor(config: RunnerConfig, executor: E) -> E2eResult<Self> {
        let playwright = PlaywrightHandle::new(config.playwright.clone())?;

        Ok(Self {
            config,
            playwright,
            executor,
            server: None,
            base_url: None,
        })
    }

    /// Use this base URL without probing for a server
    pub fn set_base_url(&mut self, base_url: impl Into<String>) {
        self.base_url = Some(base_url.into());
    }

    /// Locate the target application, spawning it first if configured
    pub async fn start(&mut self) -> E2eResult<String> {
        if let Some(url) = &self.base_url {
            return Ok(url.clone());
        }

        let url = match &self.config.server.spawn {
            Some(command) => {
                let server = ServerHandle::spawn(command, &self.config.server).await?;
                let url = server.base_url().to_string();
                self.server = Some(server);
                url
            }
            None => server::resolve_base_url(&self.config.server).await?,
        };

        self.base_url = Some(url.clone());
        Ok(url)
    }

    /// Stop a dev server spawned by this runner
    pub fn stop_server(&mut self) {
        if let Some(mut server) = self.server.take() {
            server.stop();
        }
    }

    /// Scenarios from the configured directory, or the built-in set
    pub fn load_scenarios(&self) -> E2eResult<Vec<Scenario>> {
        match &self.config.scenarios_dir {
            Some(dir) => Scenario::load_all(dir),
            None => Scenario::builtin(),
        }
    }

    /// The Node script a scenario compiles to
    pub fn script_for(&self, scenario: &Scenario, base_url: &str) -> String {
        self.playwright.build_script(scenario, base_url)
    }

    /// Run scenarios in order
    pub async fn run_scenarios(&mut self, scenarios: &[Scenario]) -> E2eResult<SuiteResult> {
        let started_at = Utc::now();
        let start = Instant::now();
        let base_url = self.start().await?;

        let mut results = Vec::with_capacity(scenarios.len());
        let mut passed = 0;
        let mut failed = 0;
        let mut stopped = 0;

        info!("Running {} scenario(s) against {}", scenarios.len(), base_url);

        for scenario in scenarios {
            match self.run_scenario(scenario, &base_url).await {
                Ok(result) => {
                    match result.outcome {
                        Outcome::Passed => {
                            passed += 1;
                            info!("✓ {} ({} ms)", result.name, result.duration_ms);
                        }
                        Outcome::Failed => {
                            failed += 1;
                            error!(
                                "✗ {} - {}",
                                result.name,
                                result.error.as_deref().unwrap_or("unknown error")
                            );
                        }
                        Outcome::Stopped => {
                            stopped += 1;
                            warn!(
                                "■ {} stopped - {}",
                                result.name,
                                result.error.as_deref().unwrap_or("guard step failed")
                            );
                        }
                    }
                    results.push(result);
                }
                Err(e) => {
                    failed += 1;
                    error!("✗ {} - {}", scenario.name, e);
                    results.push(ScenarioResult {
                        error: Some(e.to_string()),
                        ..ScenarioResult::empty(scenario)
                    });
                }
            }
        }

        let duration_ms = start.elapsed().as_millis() as u64;

        info!(
            "Results: {} passed, {} failed, {} stopped ({} ms)",
            passed, failed, stopped, duration_ms
        );

        Ok(SuiteResult {
            started_at,
            base_url,
            total: scenarios.len(),
            passed,
            failed,
            stopped,
            duration_ms,
            results,
        })
    }

    /// Run a single scenario
    pub async fn run_scenario(&self, scenario: &Scenario, base_url: &str) -> E2eResult<ScenarioResult> {
        let start = Instant::now();
        info!("▶ {} ({})", scenario.name, scenario.route().unwrap_or("-"));

        let script = self.playwright.build_script(scenario, base_url);
        let output = self.executor.execute(&script).await?;

        let mut result = collect_result(scenario, &output);
        result.duration_ms = start.elapsed().as_millis() as u64;
        Ok(result)
    }

    /// Write the suite report as JSON
    pub fn write_results(&self, results: &SuiteResult) -> E2eResult<PathBuf> {
        std::fs::create_dir_all(&self.config.output_dir)?;

        let path = self.config.output_dir.join("verification-report.json");
        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(&path, json)?;

        info!("Report written to: {}", path.display());
        Ok(path)
    }
}

impl<E: ScriptExecutor> Drop for VerificationRunner<E> {
    fn drop(&mut self) {
        self.stop_server();
    }
}

/// Fold script events into a scenario result
fn collect_result(scenario: &Scenario, output: &ScriptOutput) -> ScenarioResult {
    let (events, passthrough) = parse_events(&output.stdout);
    for line in &passthrough {
        debug!("script: {}", line);
    }

    let mut result = ScenarioResult::empty(scenario);
    let mut finished = false;

    for event in events {
        match event {
            ScriptEvent::Step { index, name, status, duration_ms, detail, error } => {
                let error = error.map(|e| clean_message(&e));
                let detail = detail.filter(|d| !d.is_null());
                log_step(&name, status, duration_ms, detail.as_ref(), error.as_deref());
                result.steps.push(StepResult { index, name, status, duration_ms, detail, error });
            }
            ScriptEvent::Console { level, text } => {
                info!("CONSOLE [{}]: {}", level, text);
                result.console.push(ConsoleMessage { level, text });
            }
            ScriptEvent::Dialog { message } => {
                info!("Dialog received: {}", message);
                result.dialogs.push(message);
            }
            ScriptEvent::Screenshot { path, debug } => match Artifact::inspect(&path, debug) {
                Ok(artifact) => {
                    if debug {
                        warn!("Debug screenshot saved: {}", path.display());
                    } else {
                        info!("Screenshot saved: {}", path.display());
                    }
                    result.artifacts.push(artifact);
                }
                Err(e) => warn!("Screenshot {} is not usable: {}", path.display(), e),
            },
            ScriptEvent::Log { message } => info!("[{}] {}", scenario.name, message),
            ScriptEvent::Done { outcome, error } => {
                result.outcome = outcome;
                result.error = error.map(|e| clean_message(&e));
                finished = true;
            }
        }
    }

    if finished && (output.success || result.outcome != Outcome::Passed) {
        return result;
    }

    // Script died before reporting, or exited non-zero after reporting a pass.
    // Keep what was collected and fail the scenario.
    let stderr = clean_message(&output.stderr);
    let error = if !stderr.is_empty() {
        E2eError::Playwright(stderr)
    } else if finished {
        E2eError::Playwright(format!("script exited with {} after reporting a pass", output.status))
    } else {
        E2eError::ScriptOutput { status: output.status.clone() }
    };
    result.outcome = Outcome::Failed;
    result.error = Some(error.to_string());
    result
}

fn log_step(
    name: &str,
    status: StepStatus,
    duration_ms: u64,
    detail: Option<&serde_json::Value>,
    error: Option<&str>,
) {
    let error = error.unwrap_or("unknown error");
    match status {
        StepStatus::Passed => match detail {
            Some(serde_json::Value::String(s)) => info!("  ✓ {} ({} ms): {}", name, duration_ms, s),
            Some(value) => info!("  ✓ {} ({} ms): {}", name, duration_ms, value),
            None => info!("  ✓ {} ({} ms)", name, duration_ms),
        },
        StepStatus::Warned => warn!("  ! {} - {}", name, error),
        StepStatus::Failed => error!("  ✗ {} - {}", name, error),
        StepStatus::Stopped => warn!("  ■ {} - {}", name, error),
    }
}
