//! Declarative YAML verification scenarios
//!
//! A scenario is a flat, ordered list of browser steps run against one page
//! of the front-end. Steps locate elements with a [`Target`], which is either
//! a raw Playwright selector string or a structured locator.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::{E2eError, E2eResult};

/// Scenarios compiled into the binary, one per front-end page check.
const BUILTIN: &[(&str, &str)] = &[
    ("characters.yaml", include_str!("../scenarios/characters.yaml")),
    ("dm.yaml", include_str!("../scenarios/dm.yaml")),
    ("memories.yaml", include_str!("../scenarios/memories.yaml")),
    ("play.yaml", include_str!("../scenarios/play.yaml")),
    ("rulebook.yaml", include_str!("../scenarios/rulebook.yaml")),
    ("rulebook-interactive.yaml", include_str!("../scenarios/rulebook-interactive.yaml")),
    ("scripts.yaml", include_str!("../scenarios/scripts.yaml")),
    ("settings.yaml", include_str!("../scenarios/settings.yaml")),
];

/// A complete verification scenario parsed from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    /// Unique name for this scenario
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Tags for filtering
    #[serde(default)]
    pub tags: Vec<String>,

    /// Viewport override; the configured default applies when absent
    #[serde(default)]
    pub viewport: Option<Viewport>,

    /// Forward browser console messages into the run log
    #[serde(default)]
    pub capture_console: bool,

    /// Screenshot written when the scenario fails
    #[serde(default)]
    pub debug_screenshot: Option<String>,

    /// Steps to execute in order
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self { width: 1280, height: 720 }
    }
}

/// One step plus its failure policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    #[serde(flatten)]
    pub action: Action,

    /// What happens to the scenario when this step fails
    #[serde(default)]
    pub on_fail: OnFail,

    /// Name used in logs and reports instead of the generated one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Step {
    pub fn new(action: Action) -> Self {
        Self { action, on_fail: OnFail::Fail, label: None }
    }

    /// Name shown for this step in logs and reports
    pub fn name(&self) -> String {
        match &self.label {
            Some(label) => label.clone(),
            None => self.action.describe(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnFail {
    /// Halt the scenario and report it failed
    #[default]
    Fail,
    /// Report the failure and keep going
    Warn,
    /// Report the failure and end the scenario early as stopped
    Stop,
}

/// A single browser action
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Navigate to a path relative to the base URL, or to an absolute URL
    Goto {
        path: String,
        #[serde(default)]
        wait_until: Option<LoadState>,
    },

    /// Block until an element reaches a state
    WaitFor {
        target: Target,
        #[serde(default)]
        timeout_ms: Option<u64>,
        #[serde(default)]
        state: WaitState,
    },

    /// Check visibility right now, without waiting
    ExpectVisible { target: Target },

    /// Check that an element is not visible right now
    ExpectHidden { target: Target },

    /// Click an element
    Click {
        target: Target,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// Click at points inside an element's bounding box until one is confirmed
    ClickAt {
        target: Target,
        attempts: Vec<ClickAttempt>,
        #[serde(default = "default_settle_ms")]
        settle_ms: u64,
    },

    /// Fill an input or textarea
    Fill { target: Target, value: String },

    /// Press a key on an element, or on the page when no target is given
    Press {
        #[serde(default)]
        target: Option<Target>,
        key: String,
    },

    /// Accept or dismiss browser dialogs from here on, recording their messages
    HandleDialogs {
        #[serde(default = "default_true")]
        accept: bool,
    },

    /// The last dialog message contains one of the given fragments
    ExpectDialog { contains_any: Vec<String> },

    /// Read the current value of an input or select
    ReadValue {
        target: Target,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },

    /// At least `min` elements match
    Count {
        target: Target,
        #[serde(default = "default_min_count")]
        min: usize,
    },

    /// Fixed pause for animations or mocked latency
    Sleep { ms: u64 },

    /// Save a screenshot of the current page
    Screenshot {
        path: String,
        #[serde(default)]
        full_page: bool,
    },

    /// Write a message to the run log
    Log { message: String },
}

fn default_settle_ms() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

fn default_min_count() -> usize {
    1
}

impl Action {
    /// Short name for logs, e.g. `click:text=Spells`
    pub fn describe(&self) -> String {
        match self {
            Action::Goto { path, .. } => format!("goto:{}", path),
            Action::WaitFor { target, .. } => format!("wait_for:{}", target),
            Action::ExpectVisible { target } => format!("expect_visible:{}", target),
            Action::ExpectHidden { target } => format!("expect_hidden:{}", target),
            Action::Click { target, .. } => format!("click:{}", target),
            Action::ClickAt { target, .. } => format!("click_at:{}", target),
            Action::Fill { target, .. } => format!("fill:{}", target),
            Action::Press { key, .. } => format!("press:{}", key),
            Action::HandleDialogs { accept } => {
                format!("handle_dialogs:{}", if *accept { "accept" } else { "dismiss" })
            }
            Action::ExpectDialog { .. } => "expect_dialog".to_string(),
            Action::ReadValue { target, .. } => format!("read_value:{}", target),
            Action::Count { target, min } => format!("count:{}>={}", target, min),
            Action::Sleep { ms } => format!("sleep:{}ms", ms),
            Action::Screenshot { path, .. } => format!("screenshot:{}", path),
            Action::Log { message } => {
                let end = message
                    .char_indices()
                    .nth(30)
                    .map(|(i, _)| i)
                    .unwrap_or(message.len());
                format!("log:{}", &message[..end])
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadState {
    Load,
    DomContentLoaded,
    NetworkIdle,
}

impl LoadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadState::Load => "load",
            LoadState::DomContentLoaded => "domcontentloaded",
            LoadState::NetworkIdle => "networkidle",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitState {
    #[default]
    Visible,
    Hidden,
    Attached,
    Detached,
}

impl WaitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitState::Visible => "visible",
            WaitState::Hidden => "hidden",
            WaitState::Attached => "attached",
            WaitState::Detached => "detached",
        }
    }
}

/// How an element is found on the page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Target {
    /// Raw Playwright selector, e.g. `text=INT` or `h2:has-text('Spells')`
    Selector(String),
    Locator(Locator),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum Locator {
    Text {
        text: String,
        #[serde(default)]
        exact: bool,
        #[serde(default)]
        first: bool,
    },
    Role {
        role: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        exact: bool,
    },
    Css {
        css: String,
        #[serde(default)]
        has_text: Option<String>,
        #[serde(default)]
        first: bool,
    },
}

impl Target {
    pub fn selector(selector: impl Into<String>) -> Self {
        Target::Selector(selector.into())
    }

    pub fn text(text: impl Into<String>) -> Self {
        Target::Locator(Locator::Text { text: text.into(), exact: false, first: false })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Selector(selector) => write!(f, "{}", selector),
            Target::Locator(Locator::Text { text, exact, .. }) => {
                if *exact {
                    write!(f, "text=\"{}\"", text)
                } else {
                    write!(f, "text={}", text)
                }
            }
            Target::Locator(Locator::Role { role, name, .. }) => match name {
                Some(name) => write!(f, "role={}[name=\"{}\"]", role, name),
                None => write!(f, "role={}", role),
            },
            Target::Locator(Locator::Css { css, has_text, .. }) => match has_text {
                Some(text) => write!(f, "{}:has-text(\"{}\")", css, text),
                None => write!(f, "{}", css),
            },
        }
    }
}

/// One coordinate click and the elements that confirm it worked
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClickAttempt {
    pub at: Point,

    /// Any of these becoming visible confirms the click; empty always confirms
    #[serde(default)]
    pub confirm: Vec<Target>,
}

/// Point relative to the top-left corner of a bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Point {
    pub x: Coord,
    pub y: Coord,
}

/// Offset along one axis: pixels from the box origin, or a percentage of the box size
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CoordRepr", into = "CoordRepr")]
pub enum Coord {
    Pixels(f64),
    Percent(f64),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum CoordRepr {
    Number(f64),
    Text(String),
}

impl TryFrom<CoordRepr> for Coord {
    type Error = String;

    fn try_from(repr: CoordRepr) -> Result<Self, Self::Error> {
        match repr {
            CoordRepr::Number(px) => Ok(Coord::Pixels(px)),
            CoordRepr::Text(text) => text.parse(),
        }
    }
}

impl From<Coord> for CoordRepr {
    fn from(coord: Coord) -> Self {
        match coord {
            Coord::Pixels(px) => CoordRepr::Number(px),
            Coord::Percent(pct) => CoordRepr::Text(format!("{}%", pct)),
        }
    }
}

impl std::str::FromStr for Coord {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (number, percent) = if let Some(pct) = s.strip_suffix('%') {
            (pct, true)
        } else if let Some(px) = s.strip_suffix("px") {
            (px, false)
        } else {
            (s, false)
        };

        let value: f64 = number
            .trim()
            .parse()
            .map_err(|_| format!("invalid coordinate '{}': expected pixels or a percentage", s))?;

        if !value.is_finite() {
            return Err(format!("invalid coordinate '{}'", s));
        }

        Ok(if percent { Coord::Percent(value) } else { Coord::Pixels(value) })
    }
}

impl Scenario {
    /// Parse a scenario from YAML string
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let doc: serde_yaml::Value = serde_yaml::from_str(yaml)?;
        check_step_keys(&doc)?;
        let scenario: Self = serde_yaml::from_value(doc)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Parse a scenario from a YAML file
    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content).map_err(|e| in_source(e, &path.display().to_string()))
    }

    /// Load all scenarios from a directory tree, sorted by name
    pub fn load_all(dir: &Path) -> E2eResult<Vec<Self>> {
        if !dir.is_dir() {
            return Err(E2eError::ScenarioParse(format!(
                "scenario directory not found: {}",
                dir.display()
            )));
        }

        let mut scenarios = Vec::new();

        for entry in walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
        {
            scenarios.push(Self::from_file(entry.path())?);
        }

        scenarios.sort_by(|a, b| a.name.cmp(&b.name));
        check_unique_names(&scenarios)?;
        Ok(scenarios)
    }

    /// The scenarios shipped with the binary
    pub fn builtin() -> E2eResult<Vec<Self>> {
        let mut scenarios = BUILTIN
            .iter()
            .map(|(file, yaml)| {
                Self::from_yaml(yaml).map_err(|e| in_source(e, file))
            })
            .collect::<E2eResult<Vec<_>>>()?;
        scenarios.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(scenarios)
    }

    /// Filter scenarios by tag
    pub fn filter_by_tag<'a>(scenarios: &'a [Self], tag: &str) -> Vec<&'a Self> {
        scenarios.iter().filter(|s| s.tags.iter().any(|t| t == tag)).collect()
    }

    /// Find a scenario by name
    pub fn find<'a>(scenarios: &'a [Self], name: &str) -> E2eResult<&'a Self> {
        scenarios
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| E2eError::ScenarioNotFound(name.to_string()))
    }

    /// Path of the first navigation, used as the scenario's route in reports
    pub fn route(&self) -> Option<&str> {
        self.steps.iter().find_map(|step| match &step.action {
            Action::Goto { path, .. } => Some(path.as_str()),
            _ => None,
        })
    }

    fn validate(&self) -> E2eResult<()> {
        if self.name.trim().is_empty() {
            return Err(E2eError::ScenarioParse("scenario name is empty".to_string()));
        }
        if self.steps.is_empty() {
            return Err(E2eError::ScenarioParse(format!("scenario '{}' has no steps", self.name)));
        }

        for (i, step) in self.steps.iter().enumerate() {
            let invalid = |reason: &str| {
                E2eError::ScenarioParse(format!(
                    "scenario '{}' step {} ({}): {}",
                    self.name,
                    i + 1,
                    step.name(),
                    reason
                ))
            };

            match &step.action {
                Action::ClickAt { attempts, .. } if attempts.is_empty() => {
                    return Err(invalid("click_at needs at least one attempt"));
                }
                Action::ExpectDialog { contains_any } if contains_any.is_empty() => {
                    return Err(invalid("expect_dialog needs at least one fragment"));
                }
                Action::Screenshot { path, .. } if path.trim().is_empty() => {
                    return Err(invalid("screenshot path is empty"));
                }
                Action::Goto { path, .. } if path.trim().is_empty() => {
                    return Err(invalid("goto path is empty"));
                }
                _ => {}
            }
        }

        Ok(())
    }
}

/// Prefix a parse error with the file it came from
fn in_source(err: E2eError, source: &str) -> E2eError {
    match err {
        E2eError::ScenarioParse(reason) => E2eError::ScenarioParse(format!("{}: {}", source, reason)),
        E2eError::Yaml(err) => E2eError::ScenarioParse(format!("{}: {}", source, err)),
        other => other,
    }
}

/// Keys shared by every step
const STEP_KEYS: &[&str] = &["action", "on_fail", "label"];

/// Keys an action accepts on top of [`STEP_KEYS`]
fn action_keys(action: &str) -> Option<&'static [&'static str]> {
    Some(match action {
        "goto" => &["path", "wait_until"],
        "wait_for" => &["target", "timeout_ms", "state"],
        "expect_visible" | "expect_hidden" => &["target"],
        "click" | "read_value" => &["target", "timeout_ms"],
        "click_at" => &["target", "attempts", "settle_ms"],
        "fill" => &["target", "value"],
        "press" => &["target", "key"],
        "handle_dialogs" => &["accept"],
        "expect_dialog" => &["contains_any"],
        "count" => &["target", "min"],
        "sleep" => &["ms"],
        "screenshot" => &["path", "full_page"],
        "log" => &["message"],
        _ => return None,
    })
}

/// Steps are flattened, so serde drops misspelled keys; catch them here
fn check_step_keys(doc: &serde_yaml::Value) -> E2eResult<()> {
    let Some(steps) = doc.get("steps").and_then(|s| s.as_sequence()) else {
        return Ok(());
    };

    for (i, step) in steps.iter().enumerate() {
        let Some(map) = step.as_mapping() else {
            continue;
        };
        // Unknown or missing actions are reported by serde
        let Some(action) = map.get("action").and_then(|a| a.as_str()) else {
            continue;
        };
        let Some(allowed) = action_keys(action) else {
            continue;
        };

        for key in map.keys() {
            let known = key
                .as_str()
                .map(|k| STEP_KEYS.contains(&k) || allowed.contains(&k))
                .unwrap_or(false);
            if !known {
                let key = key.as_str().map(String::from).unwrap_or_else(|| format!("{:?}", key));
                return Err(E2eError::ScenarioParse(format!(
                    "step {} ({}): unknown key '{}'",
                    i + 1,
                    action,
                    key
                )));
            }
        }
    }

    Ok(())
}

fn check_unique_names(scenarios: &[Scenario]) -> E2eResult<()> {
    for pair in scenarios.windows(2) {
        if pair[0].name == pair[1].name {
            return Err(E2eError::ScenarioParse(format!(
                "duplicate scenario name: {}",
                pair[0].name
            )));
        }
    }
    Ok(())
}
