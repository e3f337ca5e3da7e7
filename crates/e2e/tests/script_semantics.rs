//! Generated scripts run under Node against an in-process fake of the
//! `playwright` package, so failure policies, dialogs and cleanup are
//! exercised without a browser. Skipped when `node` is not installed.

use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tabletop_e2e::playwright::StepStatus;
use tabletop_e2e::runner::ScenarioResult;
use tabletop_e2e::{Outcome, RunnerConfig, Scenario, VerificationRunner};
use tempfile::TempDir;

/// Fake `playwright` module. Every selector or locator is visible unless
/// listed in `hidden`; clicks on keys in `dialogs` raise a dialog.
const FAKE_PLAYWRIGHT: &str = r##"
const fs = require('fs');
const WORLD = __WORLD__;

const log = (entry) => fs.appendFileSync(WORLD.log, JSON.stringify(entry) + '\n');
const hidden = new Set(WORLD.hidden || []);
const boxless = new Set(WORLD.boxless || []);
const dialogs = WORLD.dialogs || {};
const visible = (key) => !hidden.has(key);

class Locator {
  constructor(page, key) {
    this.page = page;
    this.key = key;
  }
  first() {
    return this;
  }
  async waitFor({ state = 'visible', timeout } = {}) {
    const want = state === 'visible' || state === 'attached';
    if (visible(this.key) !== want) {
      throw new Error(`Timeout ${timeout || this.page.timeout}ms exceeded waiting for ${this.key} to be ${state}`);
    }
  }
  async isVisible() {
    return visible(this.key);
  }
  async click() {
    await this.waitFor();
    log({ call: 'click', key: this.key });
    if (dialogs[this.key] !== undefined) {
      const message = dialogs[this.key];
      await this.page.fire('dialog', {
        message: () => message,
        accept: async () => log({ call: 'dialog.accept', message }),
        dismiss: async () => log({ call: 'dialog.dismiss', message }),
      });
    }
  }
  async fill(value) {
    await this.waitFor();
    log({ call: 'fill', key: this.key, value });
  }
  async press(key) {
    await this.waitFor();
    log({ call: 'press', key: this.key, pressed: key });
  }
  async inputValue() {
    await this.waitFor();
    return 'gpt-4';
  }
  async count() {
    return visible(this.key) ? 1 : 0;
  }
  async boundingBox() {
    if (!visible(this.key) || boxless.has(this.key)) {
      return null;
    }
    return { x: 10, y: 20, width: 400, height: 300 };
  }
}

class Page {
  constructor() {
    this.handlers = {};
    this.timeout = 30000;
    this.mouse = { click: async (x, y) => log({ call: 'mouse.click', x, y }) };
    this.keyboard = { press: async (key) => log({ call: 'keyboard.press', key }) };
  }
  on(event, handler) {
    (this.handlers[event] = this.handlers[event] || []).push(handler);
  }
  async fire(event, arg) {
    for (const handler of this.handlers[event] || []) {
      await handler(arg);
    }
  }
  setDefaultTimeout(ms) {
    this.timeout = ms;
  }
  async goto(url) {
    log({ call: 'goto', url });
  }
  async waitForLoadState() {}
  async waitForTimeout() {}
  async waitForSelector(key, options) {
    return this.locator(key).waitFor(options);
  }
  async isVisible(key) {
    return visible(key);
  }
  async click(key) {
    return this.locator(key).click();
  }
  async fill(key, value) {
    return this.locator(key).fill(value);
  }
  async press(key, pressed) {
    return this.locator(key).press(pressed);
  }
  async inputValue(key) {
    return this.locator(key).inputValue();
  }
  async screenshot({ path }) {
    fs.copyFileSync(WORLD.fixture, path);
    log({ call: 'screenshot', path });
  }
  locator(css, options = {}) {
    return new Locator(this, options.hasText ? `${css}:has-text("${options.hasText}")` : css);
  }
  getByText(text, options = {}) {
    return new Locator(this, options.exact ? `text="${text}"` : `text=${text}`);
  }
  getByRole(role, options = {}) {
    return new Locator(this, options.name ? `role=${role}[name="${options.name}"]` : `role=${role}`);
  }
}

const launcher = (name) => ({
  launch: async ({ headless }) => {
    log({ call: 'launch', browser: name, headless });
    return {
      newContext: async ({ viewport }) => ({
        newPage: async () => {
          log({ call: 'newPage', viewport });
          return new Page();
        },
      }),
      close: async () => log({ call: 'close' }),
    };
  },
});

module.exports = {
  chromium: launcher('chromium'),
  firefox: launcher('firefox'),
  webkit: launcher('webkit'),
};
"##;

struct FakeBrowser {
    dir: TempDir,
}

impl FakeBrowser {
    fn new(world: Value) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let module_dir = dir.path().join("node_modules/playwright");
        std::fs::create_dir_all(&module_dir).unwrap();

        let fixture = dir.path().join("fixture.png");
        image::RgbaImage::new(4, 3).save(&fixture).unwrap();

        let mut world = world;
        world["log"] = json!(dir.path().join("calls.log"));
        world["fixture"] = json!(fixture);

        let source = FAKE_PLAYWRIGHT.replace("__WORLD__", &world.to_string());
        std::fs::write(module_dir.join("index.js"), source).unwrap();

        Self { dir }
    }

    fn screenshots(&self) -> PathBuf {
        self.dir.path().join("screenshots")
    }

    /// `None` when node is not installed
    async fn runner(&self) -> Option<VerificationRunner> {
        let mut config = RunnerConfig::default();
        config.playwright.screenshot_dir = self.screenshots();
        config.playwright.node_path = Some(self.dir.path().join("node_modules"));
        config.output_dir = self.dir.path().join("results");

        let mut runner = VerificationRunner::new(config).unwrap();
        if runner.check_prerequisites().await.is_err() {
            eprintln!("Skipping: node is not installed");
            return None;
        }
        runner.set_base_url("http://localhost:5173");
        Some(runner)
    }

    fn calls(&self) -> Vec<Value> {
        let path = self.dir.path().join("calls.log");
        std::fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    fn calls_named(&self, name: &str) -> Vec<Value> {
        self.calls().into_iter().filter(|c| c["call"] == name).collect()
    }
}

fn builtin(name: &str) -> Scenario {
    let scenarios = Scenario::builtin().unwrap();
    Scenario::find(&scenarios, name).unwrap().clone()
}

fn step<'a>(result: &'a ScenarioResult, name: &str) -> &'a tabletop_e2e::playwright::StepResult {
    result
        .steps
        .iter()
        .find(|s| s.name == name)
        .unwrap_or_else(|| panic!("{}: no step named '{}'", result.name, name))
}

fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or_default()
}

#[tokio::test]
async fn builtin_scenarios_pass_when_every_element_is_present() {
    let browser = FakeBrowser::new(json!({
        "dialogs": { "button:has-text('Inscribe Configuration')": "Configuration Inscribed" },
    }));
    let Some(runner) = browser.runner().await else {
        return;
    };

    for scenario in Scenario::builtin().unwrap() {
        let result = runner.run_scenario(&scenario, "http://localhost:5173").await.unwrap();
        assert_eq!(result.outcome, Outcome::Passed, "{}: {:?}", scenario.name, result.error);
        assert_eq!(result.steps.len(), scenario.steps.len(), "{}", scenario.name);
        assert_eq!(result.warnings().count(), 0, "{}", scenario.name);
        assert!(!result.artifacts.is_empty(), "{}", scenario.name);
        assert!(result.artifacts.iter().all(|a| !a.debug && a.width == 4), "{}", scenario.name);
    }

    // One browser per scenario, always closed
    let launches = browser.calls_named("launch").len();
    assert_eq!(launches, Scenario::builtin().unwrap().len());
    assert_eq!(browser.calls_named("close").len(), launches);
}

#[tokio::test]
async fn failing_wait_fails_scenario_with_debug_screenshot() {
    let browser = FakeBrowser::new(json!({
        "hidden": ["text=I cast Magic Missile at the darkness!"],
    }));
    let Some(runner) = browser.runner().await else {
        return;
    };

    let result = runner.run_scenario(&builtin("play"), "http://localhost:5173").await.unwrap();

    assert_eq!(result.outcome, Outcome::Failed);
    let error = result.error.as_deref().unwrap();
    assert!(error.starts_with("player message echoed: Timeout 5000ms exceeded"), "{}", error);
    assert_eq!(step(&result, "player message echoed").status, StepStatus::Failed);
    assert_eq!(result.steps.last().unwrap().name, "player message echoed");

    assert_eq!(result.artifacts.len(), 1);
    assert!(result.artifacts[0].debug);
    assert_eq!(file_name(&result.artifacts[0].path), "play_debug.png");
    assert!(browser.screenshots().join("play_debug.png").is_file());
    assert_eq!(browser.calls_named("close").len(), 1);
}

#[tokio::test]
async fn hidden_guard_stops_scenario() {
    let browser = FakeBrowser::new(json!({
        "hidden": ["h2:has-text('LLM Nexus')"],
    }));
    let Some(runner) = browser.runner().await else {
        return;
    };

    let result = runner.run_scenario(&builtin("settings"), "http://localhost:5173").await.unwrap();

    assert_eq!(result.outcome, Outcome::Stopped);
    assert!(result.error.as_deref().unwrap().starts_with("LLM Nexus card: expected"));
    assert_eq!(result.steps.last().unwrap().status, StepStatus::Stopped);
    assert!(browser.calls_named("fill").is_empty());
    assert!(result.artifacts.is_empty());
    assert_eq!(browser.calls_named("close").len(), 1);
}

#[tokio::test]
async fn unconfirmed_canvas_click_warns_and_continues() {
    let browser = FakeBrowser::new(json!({
        "hidden": ["text=Input Processor", "text=Narrator", "text=Directives & Rules"],
    }));
    let Some(runner) = browser.runner().await else {
        return;
    };

    let result = runner.run_scenario(&builtin("dm"), "http://localhost:5173").await.unwrap();

    assert_eq!(result.outcome, Outcome::Passed, "{:?}", result.error);
    let click = step(&result, "open agent node sidebar");
    assert_eq!(click.status, StepStatus::Warned);
    assert!(click.error.as_deref().unwrap().contains("no click on canvas was confirmed"));
    assert_eq!(result.warnings().count(), 1);

    // Both attempts tried in order inside the canvas box (10, 20, 400x300)
    let clicks: Vec<(f64, f64)> = browser
        .calls_named("mouse.click")
        .iter()
        .map(|c| (c["x"].as_f64().unwrap(), c["y"].as_f64().unwrap()))
        .collect();
    assert_eq!(clicks, vec![(110.0, 170.0), (210.0, 170.0)]);

    assert_eq!(step(&result, "current model").detail, Some(json!("gpt-4")));
    assert_eq!(file_name(&result.artifacts[0].path), "dm_interactive.png");
    assert_eq!(
        browser.calls_named("newPage")[0]["viewport"],
        json!({ "width": 1280, "height": 800 })
    );
}

#[tokio::test]
async fn missing_bounding_box_is_a_step_failure() {
    let browser = FakeBrowser::new(json!({ "boxless": ["canvas"] }));
    let Some(runner) = browser.runner().await else {
        return;
    };

    let result = runner.run_scenario(&builtin("dm"), "http://localhost:5173").await.unwrap();

    let click = step(&result, "open agent node sidebar");
    assert_eq!(click.status, StepStatus::Warned);
    assert_eq!(click.error.as_deref(), Some("no bounding box for canvas"));
    assert!(browser.calls_named("mouse.click").is_empty());
}

#[tokio::test]
async fn dialogs_are_dismissed_until_accepted() {
    let browser = FakeBrowser::new(json!({
        "dialogs": { "#save": "Configuration Inscribed" },
    }));
    let Some(runner) = browser.runner().await else {
        return;
    };

    let scenario = Scenario::from_yaml(
        r##"
name: dialogs
steps:
  - action: goto
    path: /settings
  - action: click
    target: "#save"
  - action: handle_dialogs
  - action: click
    target: "#save"
  - action: expect_dialog
    contains_any: [Inscribed]
"##,
    )
    .unwrap();

    let result = runner.run_scenario(&scenario, "http://localhost:5173").await.unwrap();

    assert_eq!(result.outcome, Outcome::Passed, "{:?}", result.error);
    assert_eq!(result.dialogs, vec!["Configuration Inscribed"; 2]);
    let policy: Vec<Value> = browser
        .calls()
        .into_iter()
        .filter(|c| c["call"].as_str().is_some_and(|call| call.starts_with("dialog.")))
        .map(|c| c["call"].clone())
        .collect();
    assert_eq!(policy, vec![json!("dialog.dismiss"), json!("dialog.accept")]);
    assert_eq!(
        result.steps.last().unwrap().detail,
        Some(json!("Configuration Inscribed"))
    );
}

#[tokio::test]
async fn settings_accepts_save_alert() {
    let browser = FakeBrowser::new(json!({
        "dialogs": { "button:has-text('Inscribe Configuration')": "Configuration Inscribed" },
    }));
    let Some(runner) = browser.runner().await else {
        return;
    };

    let result = runner.run_scenario(&builtin("settings"), "http://localhost:5173").await.unwrap();

    assert_eq!(result.outcome, Outcome::Passed, "{:?}", result.error);
    assert_eq!(result.dialogs, vec!["Configuration Inscribed"]);
    assert_eq!(browser.calls_named("dialog.accept").len(), 1);
    assert!(browser.calls_named("dialog.dismiss").is_empty());
    assert_eq!(
        browser.calls_named("fill")[0]["value"],
        json!("sk-test-key-12345")
    );
}

#[tokio::test]
async fn odd_scenario_names_do_not_break_the_script() {
    let browser = FakeBrowser::new(json!({}));
    let Some(runner) = browser.runner().await else {
        return;
    };

    let mut scenario = Scenario::from_yaml(
        "name: x\nsteps:\n  - action: goto\n    path: /\n  - action: log\n    message: done\n",
    )
    .unwrap();
    scenario.name = "line\rbreak\u{2028}and\u{2029}more".to_string();

    let result = runner.run_scenario(&scenario, "http://localhost:5173").await.unwrap();
    assert_eq!(result.outcome, Outcome::Passed, "{:?}", result.error);
    assert_eq!(result.steps.len(), 2);
}
