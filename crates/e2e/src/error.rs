//! Error types for the verification runner
//!
//! Step failures inside a scenario are reported as data on
//! [`StepResult`](crate::playwright::StepResult). These errors are for the runner
//! itself failing: bad scenarios, no server, no Node.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Dev server failed to start: {0}")]
    ServerStartup(String),

    #[error("No dev server answered at: {}", .0.join(", "))]
    ServerUnreachable(Vec<String>),

    #[error("Node.js not found. Install Node and run: npx playwright install chromium")]
    NodeNotFound,

    #[error("Playwright error: {0}")]
    Playwright(String),

    #[error("Scenario parse error: {0}")]
    ScenarioParse(String),

    #[error("Scenario not found: {0}")]
    ScenarioNotFound(String),

    #[error("Script produced no completion event (exit status: {status})")]
    ScriptOutput { status: String },

    #[error("Evidence error: {0}")]
    Evidence(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

pub type E2eResult<T> = Result<T, E2eError>;
