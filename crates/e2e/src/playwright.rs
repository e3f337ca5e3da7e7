//! Playwright browser automation
//!
//! A scenario is compiled into a single Node script that launches one
//! browser, runs every step against the same page and closes the browser in a
//! `finally` block. The script reports back through JSON lines on stdout,
//! each prefixed with [`EVENT_PREFIX`].

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command as TokioCommand;
use tracing::{debug, warn};

use crate::error::{E2eError, E2eResult};
use crate::runner::Outcome;
use crate::scenario::{Action, ClickAttempt, Coord, Locator, OnFail, Scenario, Target, Viewport};

/// Marks stdout lines that carry script events
pub const EVENT_PREFIX: &str = "@@tabletop-e2e ";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

/// Configuration for Playwright
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaywrightConfig {
    pub browser: Browser,
    pub headless: bool,
    pub viewport: Viewport,

    /// Playwright default timeout for actions and waits
    pub default_timeout_ms: u64,

    /// Relative screenshot paths are resolved against this directory
    pub screenshot_dir: PathBuf,

    pub node_binary: PathBuf,

    /// Directory containing the `playwright` package, exported as `NODE_PATH`
    pub node_path: Option<PathBuf>,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            browser: Browser::Chromium,
            headless: true,
            viewport: Viewport::default(),
            default_timeout_ms: 30_000,
            screenshot_dir: PathBuf::from("test-results/screenshots"),
            node_binary: PathBuf::from("node"),
            node_path: None,
        }
    }
}

/// Status of a single executed step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Passed,
    Warned,
    Failed,
    Stopped,
}

/// Result of executing a test step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub index: usize,
    pub name: String,
    pub status: StepStatus,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Event reported by a running script
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScriptEvent {
    Step {
        index: usize,
        name: String,
        status: StepStatus,
        duration_ms: u64,
        #[serde(default)]
        detail: Option<serde_json::Value>,
        #[serde(default)]
        error: Option<String>,
    },
    Console {
        level: String,
        text: String,
    },
    Dialog {
        message: String,
    },
    Screenshot {
        path: PathBuf,
        #[serde(default)]
        debug: bool,
    },
    Log {
        message: String,
    },
    Done {
        outcome: Outcome,
        #[serde(default)]
        error: Option<String>,
    },
}

/// Output of a finished script process
#[derive(Debug, Clone, Default)]
pub struct ScriptOutput {
    pub success: bool,
    pub status: String,
    pub stdout: String,
    pub stderr: String,
}

/// Runs a generated script and captures its output
#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    async fn execute(&self, script: &str) -> E2eResult<ScriptOutput>;
}

/// Builds Playwright scripts for scenarios
pub struct PlaywrightHandle {
    config: PlaywrightConfig,
}

impl PlaywrightHandle {
    /// Create a new Playwright handle, creating the screenshot directory
    pub fn new(mut config: PlaywrightConfig) -> E2eResult<Self> {
        if config.screenshot_dir.is_relative() {
            config.screenshot_dir = std::env::current_dir()?.join(&config.screenshot_dir);
        }
        std::fs::create_dir_all(&config.screenshot_dir)?;

        Ok(Self { config })
    }

    pub fn config(&self) -> &PlaywrightConfig {
        &self.config
    }

    /// Resolve a screenshot path named by a scenario
    pub fn screenshot_path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config.screenshot_dir.join(path)
        }
    }

    /// Build the Node script that runs `scenario` against `base_url`
    pub fn build_script(&self, scenario: &Scenario, base_url: &str) -> String {
        let viewport = scenario.viewport.unwrap_or(self.config.viewport);
        let mut script = String::new();

        script.push_str(&format!(
            "// Scenario: {name}\n\
             const {{ chromium, firefox, webkit }} = require('playwright');\n\
             \n\
             const PREFIX = {prefix};\n",
            name = scenario.name.replace(is_line_terminator, " "),
            prefix = js_str(EVENT_PREFIX),
        ));
        script.push_str(SCRIPT_PRELUDE);

        script.push_str(&format!(
            r#"
(async () => {{
  let browser = null;
  let outcome = 'passed';
  let failure = null;
  try {{
    browser = await {browser}.launch({{ headless: {headless} }});
    const context = await browser.newContext({{ viewport: {{ width: {width}, height: {height} }} }});
    const page = await context.newPage();
    page.setDefaultTimeout({timeout});

    let lastDialog = null;
    let dialogPolicy = 'dismiss';
    page.on('dialog', async (dialog) => {{
      lastDialog = dialog.message();
      emit({{ event: 'dialog', message: lastDialog }});
      if (dialogPolicy === 'accept') {{
        await dialog.accept();
      }} else {{
        await dialog.dismiss();
      }}
    }});
"#,
            browser = self.config.browser.as_str(),
            headless = self.config.headless,
            width = viewport.width,
            height = viewport.height,
            timeout = self.config.default_timeout_ms,
        ));

        if scenario.capture_console {
            script.push_str(
                "    page.on('console', (msg) => emit({ event: 'console', level: msg.type(), text: msg.text() }));\n",
            );
        }

        script.push_str("\n    try {\n");
        for (index, step) in scenario.steps.iter().enumerate() {
            script.push_str(&format!(
                "      await step({index}, {name}, {on_fail}, async () => {{\n",
                index = index,
                name = js_str(&step.name()),
                on_fail = js_str(on_fail_str(step.on_fail)),
            ));
            for line in self.step_body(&step.action, base_url).lines() {
                script.push_str("        ");
                script.push_str(line);
                script.push('\n');
            }
            script.push_str("      });\n");
        }

        script.push_str(
            r#"    } catch (error) {
      if (error instanceof StopScenario) {
        outcome = 'stopped';
        failure = error.message;
      } else {
        outcome = 'failed';
        failure = describe(error);
"#,
        );
        if let Some(debug_path) = &scenario.debug_screenshot {
            let path = js_path(&self.screenshot_path(debug_path));
            script.push_str(&format!(
                r#"        try {{
          await page.screenshot({{ path: {path} }});
          emit({{ event: 'screenshot', path: {path}, debug: true }});
        }} catch (shotError) {{
          emit({{ event: 'log', message: 'debug screenshot failed: ' + describe(shotError) }});
        }}
"#,
                path = path,
            ));
        }
        script.push_str(SCRIPT_EPILOGUE);

        script
    }

    /// JavaScript body for one step; it may `return` a detail value
    fn step_body(&self, action: &Action, base_url: &str) -> String {
        match action {
            Action::Goto { path, wait_until } => {
                let mut js = format!("await page.goto({});", js_str(&resolve_url(base_url, path)));
                if let Some(state) = wait_until {
                    js.push_str(&format!("\nawait page.waitForLoadState({});", js_str(state.as_str())));
                }
                js
            }
            Action::WaitFor { target, timeout_ms, state } => {
                let options = js_options(&[
                    ("state", Some(js_str(state.as_str()))),
                    ("timeout", timeout_ms.map(|t| t.to_string())),
                ]);
                match target {
                    Target::Selector(selector) => {
                        format!("await page.waitForSelector({}, {});", js_str(selector), options)
                    }
                    Target::Locator(_) => {
                        format!("await {}.first().waitFor({});", locator_js(target), options)
                    }
                }
            }
            Action::ExpectVisible { target } => format!(
                "if (!(await {})) {{\n  throw new Error({});\n}}",
                visible_js(target),
                js_str(&format!("expected {} to be visible", target)),
            ),
            Action::ExpectHidden { target } => format!(
                "if (await {}) {{\n  throw new Error({});\n}}",
                visible_js(target),
                js_str(&format!("expected {} to be hidden", target)),
            ),
            Action::Click { target, timeout_ms } => {
                let options = js_options(&[("timeout", timeout_ms.map(|t| t.to_string()))]);
                match target {
                    Target::Selector(selector) => {
                        format!("await page.click({}, {});", js_str(selector), options)
                    }
                    Target::Locator(_) => format!("await {}.click({});", locator_js(target), options),
                }
            }
            Action::ClickAt { target, attempts, settle_ms } => {
                click_at_js(target, attempts, *settle_ms)
            }
            Action::Fill { target, value } => match target {
                Target::Selector(selector) => {
                    format!("await page.fill({}, {});", js_str(selector), js_str(value))
                }
                Target::Locator(_) => format!("await {}.fill({});", locator_js(target), js_str(value)),
            },
            Action::Press { target, key } => match target {
                Some(Target::Selector(selector)) => {
                    format!("await page.press({}, {});", js_str(selector), js_str(key))
                }
                Some(target) => format!("await {}.press({});", locator_js(target), js_str(key)),
                None => format!("await page.keyboard.press({});", js_str(key)),
            },
            Action::HandleDialogs { accept } => format!(
                "dialogPolicy = {};",
                js_str(if *accept { "accept" } else { "dismiss" })
            ),
            Action::ExpectDialog { contains_any } => format!(
                "const message = lastDialog === null ? '' : lastDialog;\n\
                 const wanted = {};\n\
                 if (!wanted.some((fragment) => message.includes(fragment))) {{\n  \
                 throw new Error('unexpected dialog message: ' + JSON.stringify(message));\n\
                 }}\n\
                 return message;",
                js_array(contains_any.iter().map(|s| js_str(s))),
            ),
            Action::ReadValue { target, timeout_ms } => {
                let options = js_options(&[("timeout", timeout_ms.map(|t| t.to_string()))]);
                match target {
                    Target::Selector(selector) => {
                        format!("return await page.inputValue({}, {});", js_str(selector), options)
                    }
                    Target::Locator(_) => {
                        format!("return await {}.first().inputValue({});", locator_js(target), options)
                    }
                }
            }
            Action::Count { target, min } => format!(
                "const found = await {}.count();\n\
                 if (found < {min}) {{\n  \
                 throw new Error({prefix} + found);\n\
                 }}\n\
                 return found;",
                locator_js(target),
                min = min,
                prefix = js_str(&format!("expected at least {} match(es) for {}, found ", min, target)),
            ),
            Action::Sleep { ms } => format!("await page.waitForTimeout({});", ms),
            Action::Screenshot { path, full_page } => {
                let path = js_path(&self.screenshot_path(path));
                format!(
                    "await page.screenshot({{ path: {path}, fullPage: {full_page} }});\n\
                     emit({{ event: 'screenshot', path: {path}, debug: false }});\n\
                     return {path};",
                    path = path,
                    full_page = full_page,
                )
            }
            Action::Log { message } => {
                format!("emit({{ event: 'log', message: {} }});", js_str(message))
            }
        }
    }
}

const SCRIPT_PRELUDE: &str = r#"
class StopScenario extends Error {}

const emit = (event) => process.stdout.write(PREFIX + JSON.stringify(event) + '\n');
const describe = (error) => (error && error.message) ? error.message : String(error);

async function step(index, name, onFail, body) {
  const started = Date.now();
  try {
    const detail = await body();
    emit({
      event: 'step', index, name, status: 'passed',
      duration_ms: Date.now() - started,
      detail: detail === undefined ? null : detail,
    });
  } catch (error) {
    const status = onFail === 'warn' ? 'warned' : (onFail === 'stop' ? 'stopped' : 'failed');
    emit({ event: 'step', index, name, status, duration_ms: Date.now() - started, error: describe(error) });
    if (onFail === 'stop') {
      throw new StopScenario(name + ': ' + describe(error));
    }
    if (onFail === 'fail') {
      throw new Error(name + ': ' + describe(error));
    }
  }
}
"#;

const SCRIPT_EPILOGUE: &str = r#"      }
    }
  } catch (error) {
    outcome = 'failed';
    failure = describe(error);
  } finally {
    if (browser) {
      try {
        await browser.close();
      } catch (closeError) {
        emit({ event: 'log', message: 'browser close failed: ' + describe(closeError) });
      }
    }
  }
  emit({ event: 'done', outcome, error: failure });
  process.exitCode = outcome === 'passed' ? 0 : 1;
})();
"#;

/// Characters that end a `//` comment in JavaScript
fn is_line_terminator(c: char) -> bool {
    matches!(c, '\n' | '\r' | '\u{2028}' | '\u{2029}')
}

fn on_fail_str(on_fail: OnFail) -> &'static str {
    match on_fail {
        OnFail::Fail => "fail",
        OnFail::Warn => "warn",
        OnFail::Stop => "stop",
    }
}

/// Encode a string as a JavaScript string literal
pub(crate) fn js_str(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

fn js_path(path: &Path) -> String {
    js_str(&path.to_string_lossy())
}

fn js_array(items: impl Iterator<Item = String>) -> String {
    format!("[{}]", items.collect::<Vec<_>>().join(", "))
}

/// Object literal from the options that are set; `{}` when none are
fn js_options(options: &[(&str, Option<String>)]) -> String {
    let fields: Vec<String> = options
        .iter()
        .filter_map(|(key, value)| value.as_ref().map(|v| format!("{}: {}", key, v)))
        .collect();
    if fields.is_empty() {
        "{}".to_string()
    } else {
        format!("{{ {} }}", fields.join(", "))
    }
}

/// Playwright locator expression for a target
pub(crate) fn locator_js(target: &Target) -> String {
    match target {
        Target::Selector(selector) => format!("page.locator({})", js_str(selector)),
        Target::Locator(Locator::Text { text, exact, first }) => {
            let mut js = if *exact {
                format!("page.getByText({}, {{ exact: true }})", js_str(text))
            } else {
                format!("page.getByText({})", js_str(text))
            };
            if *first {
                js.push_str(".first()");
            }
            js
        }
        Target::Locator(Locator::Role { role, name, exact }) => match name {
            Some(name) if *exact => format!(
                "page.getByRole({}, {{ name: {}, exact: true }})",
                js_str(role),
                js_str(name)
            ),
            Some(name) => format!("page.getByRole({}, {{ name: {} }})", js_str(role), js_str(name)),
            None => format!("page.getByRole({})", js_str(role)),
        },
        Target::Locator(Locator::Css { css, has_text, first }) => {
            let mut js = match has_text {
                Some(text) => format!("page.locator({}, {{ hasText: {} }})", js_str(css), js_str(text)),
                None => format!("page.locator({})", js_str(css)),
            };
            if *first {
                js.push_str(".first()");
            }
            js
        }
    }
}

/// Non-waiting visibility check for a target
fn visible_js(target: &Target) -> String {
    match target {
        Target::Selector(selector) => format!("page.isVisible({})", js_str(selector)),
        Target::Locator(_) => format!("{}.first().isVisible()", locator_js(target)),
    }
}

fn coord_js(coord: Coord, origin: &str, extent: &str) -> String {
    match coord {
        Coord::Pixels(px) => format!("box.{} + {}", origin, px),
        Coord::Percent(pct) => format!("box.{} + box.{} * {}", origin, extent, pct / 100.0),
    }
}

fn click_at_js(target: &Target, attempts: &[ClickAttempt], settle_ms: u64) -> String {
    let mut js = format!(
        "const box = await {}.first().boundingBox();\n\
         if (!box) {{\n  throw new Error({});\n}}\n\
         const attempts = [\n",
        locator_js(target),
        js_str(&format!("no bounding box for {}", target)),
    );

    for attempt in attempts {
        let checks = js_array(
            attempt
                .confirm
                .iter()
                .map(|t| format!("() => {}", visible_js(t))),
        );
        js.push_str(&format!(
            "  {{ x: {}, y: {}, confirm: {} }},\n",
            coord_js(attempt.at.x, "x", "width"),
            coord_js(attempt.at.y, "y", "height"),
            checks,
        ));
    }

    js.push_str(&format!(
        "];\n\
         for (const attempt of attempts) {{\n  \
         await page.mouse.click(attempt.x, attempt.y);\n  \
         await page.waitForTimeout({settle});\n  \
         if (attempt.confirm.length === 0) {{\n    \
         return `clicked at ${{attempt.x}}, ${{attempt.y}}`;\n  \
         }}\n  \
         for (const check of attempt.confirm) {{\n    \
         if (await check()) {{\n      \
         return `confirmed after click at ${{attempt.x}}, ${{attempt.y}}`;\n    \
         }}\n  \
         }}\n\
         }}\n\
         throw new Error({error});",
        settle = settle_ms,
        error = js_str(&format!("no click on {} was confirmed", target)),
    ));

    js
}

/// Join a scenario path onto the base URL; absolute URLs pass through
pub fn resolve_url(base_url: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn ansi_pattern() -> &'static Regex {
    static ANSI: OnceLock<Regex> = OnceLock::new();
    ANSI.get_or_init(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").expect("valid ANSI regex"))
}

/// Strip terminal colour codes Playwright puts in error messages
pub fn clean_message(message: &str) -> String {
    ansi_pattern().replace_all(message, "").trim().to_string()
}

/// Split script stdout into events and the remaining plain lines
pub fn parse_events(stdout: &str) -> (Vec<ScriptEvent>, Vec<String>) {
    let mut events = Vec::new();
    let mut passthrough = Vec::new();

    for line in stdout.lines() {
        match line.strip_prefix(EVENT_PREFIX) {
            Some(payload) => match serde_json::from_str::<ScriptEvent>(payload) {
                Ok(event) => events.push(event),
                Err(e) => warn!("Malformed script event ({}): {}", e, payload),
            },
            None if !line.trim().is_empty() => passthrough.push(line.to_string()),
            None => {}
        }
    }

    (events, passthrough)
}

/// Runs scripts with the local `node` binary
#[derive(Debug, Clone)]
pub struct NodeExecutor {
    node_binary: PathBuf,
    node_path: Option<PathBuf>,
}

impl NodeExecutor {
    pub fn new(config: &PlaywrightConfig) -> Self {
        let node_path = config.node_path.clone().or_else(|| {
            std::env::current_dir()
                .ok()
                .map(|dir| dir.join("node_modules"))
                .filter(|dir| dir.is_dir())
        });

        Self {
            node_binary: config.node_binary.clone(),
            node_path,
        }
    }

    /// Check that node can be started
    pub async fn check_installed(&self) -> E2eResult<()> {
        let status = TokioCommand::new(&self.node_binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match status {
            Ok(status) if status.success() => Ok(()),
            _ => Err(E2eError::NodeNotFound),
        }
    }
}

#[async_trait]
impl ScriptExecutor for NodeExecutor {
    async fn execute(&self, script: &str) -> E2eResult<ScriptOutput> {
        // CommonJS extension so `require` works regardless of package settings
        let temp_dir = tempfile::tempdir()?;
        let script_path = temp_dir.path().join("scenario.cjs");
        tokio::fs::write(&script_path, script).await?;

        debug!("Running Playwright script: {}", script_path.display());

        let mut cmd = TokioCommand::new(&self.node_binary);
        cmd.arg(&script_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(node_path) = &self.node_path {
            cmd.env("NODE_PATH", node_path);
        }

        let mut child = cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => E2eError::NodeNotFound,
            _ => E2eError::Io(e),
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| E2eError::Playwright("script stdout was not captured".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| E2eError::Playwright("script stderr was not captured".to_string()))?;

        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let mut collected = String::new();
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            debug!("node: {}", line);
            collected.push_str(&line);
            collected.push('\n');
        }

        let status = child.wait().await?;
        let stderr = stderr_task.await.unwrap_or_default();

        Ok(ScriptOutput {
            success: status.success(),
            status: status.to_string(),
            stdout: collected,
            stderr,
        })
    }
}
