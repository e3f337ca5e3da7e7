//! Tabletop E2E Verification
//!
//! Smoke verification of the tabletop front-end through a headless browser:
//! - Locates the running dev server (or spawns it)
//! - Compiles declarative YAML scenarios into Playwright scripts run by Node
//! - Reports each step back as a JSON event and collects screenshot evidence
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 VerificationRunner (Rust)                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  start() -> base URL (probe 5173/5174, or spawn dev server) │
//! │  run_scenario(scenario)                                     │
//! │    ├── PlaywrightHandle::build_script() -> Node script      │
//! │    ├── ScriptExecutor::execute(script) -> stdout events     │
//! │    └── events -> StepResult / Artifact / ScenarioResult     │
//! │  write_results(suite) -> verification-report.json           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Scenario (YAML)                                            │
//! │    ├── name, tags, viewport, debug_screenshot               │
//! │    └── steps: [Step { action, on_fail }]                    │
//! │          ├── goto / wait_for / expect_visible               │
//! │          ├── click / click_at / fill / press                │
//! │          ├── handle_dialogs / expect_dialog / read_value    │
//! │          └── count / sleep / screenshot / log               │
//! └─────────────────────────────────────────────────────────────┘
//! ```

#![deny(rustdoc::broken_intra_doc_links, rustdoc::private_intra_doc_links)]

pub mod config;
pub mod error;
pub mod evidence;
pub mod playwright;
pub mod runner;
pub mod scenario;
pub mod server;

pub use config::RunnerConfig;
pub use error::{E2eError, E2eResult};
pub use runner::{Outcome, SuiteResult, VerificationRunner};
pub use scenario::{Scenario, Step};
