//! Runner configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{E2eError, E2eResult};
use crate::playwright::PlaywrightConfig;
use crate::server::ServerConfig;

/// Picked up from the working directory when no `--config` is given
pub const DEFAULT_CONFIG_FILE: &str = "tabletop-e2e.yaml";

/// Configuration for the verification runner
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub server: ServerConfig,
    pub playwright: PlaywrightConfig,

    /// Directory of scenario files; the built-in scenarios are used when unset
    pub scenarios_dir: Option<PathBuf>,

    /// Output directory for the run report
    pub output_dir: PathBuf,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            playwright: PlaywrightConfig::default(),
            scenarios_dir: None,
            output_dir: PathBuf::from("test-results"),
        }
    }
}

impl RunnerConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            E2eError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
            .map_err(|e| E2eError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the explicit file, else the default file if present, else defaults
    pub fn load(explicit: Option<&Path>) -> E2eResult<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.is_file() {
                    Self::from_file(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn validate(&self) -> E2eResult<()> {
        if let Some(url) = &self.server.base_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(E2eError::Config(format!(
                    "base_url must start with http:// or https://, got '{}'",
                    url
                )));
            }
        } else if self.server.candidate_ports.is_empty() {
            return Err(E2eError::Config(
                "either server.base_url or server.candidate_ports must be set".to_string(),
            ));
        }

        let viewport = self.playwright.viewport;
        if viewport.width == 0 || viewport.height == 0 {
            return Err(E2eError::Config(format!(
                "viewport must be non-zero, got {}x{}",
                viewport.width, viewport.height
            )));
        }

        if let Some(spawn) = &self.server.spawn {
            if spawn.program.trim().is_empty() {
                return Err(E2eError::Config("server.spawn.program is empty".to_string()));
            }
        }

        Ok(())
    }
}
