//! Locating the front-end dev server, and optionally spawning it

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{E2eError, E2eResult};

/// Where to find the application under test
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Explicit base URL; skips the candidate ports
    pub base_url: Option<String>,

    pub host: String,

    /// Ports tried in order; Vite moves to the next port when one is taken
    pub candidate_ports: Vec<u16>,

    /// Per-request timeout when probing
    pub probe_timeout_ms: u64,

    /// Command that starts the dev server
    pub spawn: Option<DevServerCommand>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            host: "localhost".to_string(),
            candidate_ports: vec![5173, 5174],
            probe_timeout_ms: 2000,
            spawn: None,
        }
    }
}

impl ServerConfig {
    /// Base URLs to probe, in order
    pub fn candidate_urls(&self) -> Vec<String> {
        match &self.base_url {
            Some(url) => vec![url.trim_end_matches('/').to_string()],
            None => self
                .candidate_ports
                .iter()
                .map(|port| format!("http://{}:{}", self.host, port))
                .collect(),
        }
    }

    fn client(&self) -> E2eResult<reqwest::Client> {
        Ok(reqwest::Client::builder()
            .timeout(Duration::from_millis(self.probe_timeout_ms))
            .build()?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevServerCommand {
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory, usually the front-end checkout
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,
}

fn default_startup_timeout_ms() -> u64 {
    60_000
}

impl DevServerCommand {
    /// Split a command line like `npm run dev` on whitespace
    pub fn parse(command_line: &str) -> E2eResult<Self> {
        let mut parts = command_line.split_whitespace().map(String::from);
        let program = parts
            .next()
            .ok_or_else(|| E2eError::Config("dev server command is empty".to_string()))?;

        Ok(Self {
            program,
            args: parts.collect(),
            cwd: None,
            startup_timeout_ms: default_startup_timeout_ms(),
        })
    }
}

/// Any answer short of a server error means the app is up
async fn probe(client: &reqwest::Client, url: &str) -> bool {
    match client.get(url).send().await {
        Ok(resp) if resp.status().is_server_error() => {
            warn!("{} answered {}", url, resp.status());
            false
        }
        Ok(resp) => {
            debug!("{} answered {}", url, resp.status());
            true
        }
        Err(e) => {
            // Connection refused is expected for the unused candidate
            if !e.is_connect() {
                debug!("Probe of {} failed: {}", url, e);
            }
            false
        }
    }
}

/// First candidate URL that answers, tried once each
pub async fn resolve_base_url(config: &ServerConfig) -> E2eResult<String> {
    let client = config.client()?;
    let candidates = config.candidate_urls();

    for url in &candidates {
        if probe(&client, url).await {
            info!("Target application found at {}", url);
            return Ok(url.clone());
        }
    }

    Err(E2eError::ServerUnreachable(candidates))
}

/// Handle to a dev server process started by the runner
pub struct ServerHandle {
    child: Child,
    base_url: String,
}

impl ServerHandle {
    /// Spawn the dev server and wait until one of the candidate URLs answers
    pub async fn spawn(command: &DevServerCommand, config: &ServerConfig) -> E2eResult<Self> {
        // A server already answering would pass the health check for us
        let client = config.client()?;
        for url in config.candidate_urls() {
            if probe(&client, &url).await {
                return Err(E2eError::ServerStartup(format!(
                    "{} is already in use; stop that server or run without --spawn-server",
                    url
                )));
            }
        }

        info!("Spawning dev server: {} {}", command.program, command.args.join(" "));

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(cwd) = &command.cwd {
            cmd.current_dir(cwd);
        }

        // Own process group so the package manager's children are stopped too
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let child = cmd.spawn().map_err(|e| {
            E2eError::ServerStartup(format!("Failed to spawn {}: {}", command.program, e))
        })?;

        let mut handle = ServerHandle {
            child,
            base_url: String::new(),
        };

        match handle
            .wait_for_healthy(config, Duration::from_millis(command.startup_timeout_ms))
            .await
        {
            Ok(url) => {
                info!("Dev server is up at {}", url);
                handle.base_url = url;
                Ok(handle)
            }
            Err(e) => {
                handle.stop();
                Err(e)
            }
        }
    }

    async fn wait_for_healthy(&mut self, config: &ServerConfig, timeout: Duration) -> E2eResult<String> {
        let client = config.client()?;
        let candidates = config.candidate_urls();
        let start = Instant::now();
        let mut attempts = 0usize;

        while start.elapsed() < timeout {
            attempts += 1;

            if let Some(status) = self.child.try_wait()? {
                return Err(E2eError::ServerStartup(format!(
                    "dev server exited early with {}",
                    status
                )));
            }

            for url in &candidates {
                if probe(&client, url).await {
                    return Ok(url.clone());
                }
            }

            if attempts == 1 {
                info!("Waiting for dev server to start...");
            }
            sleep(Duration::from_millis(250)).await;
        }

        Err(E2eError::ServerStartup(format!(
            "no answer from {} after {} attempts",
            candidates.join(", "),
            attempts
        )))
    }

    /// Get the base URL for this server
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Stop the server
    pub fn stop(&mut self) {
        if let Ok(Some(_)) = self.child.try_wait() {
            return;
        }

        info!("Stopping dev server (pid: {})", self.child.id());

        // Try graceful shutdown first
        #[cfg(unix)]
        {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            let pgid = Pid::from_raw(self.child.id() as i32);
            if killpg(pgid, Signal::SIGTERM).is_ok() {
                std::thread::sleep(Duration::from_millis(500));
            }
        }

        // Force kill if still running
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Minimal HTTP server answering every request with `status`
    async fn serve(status: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    let response = format!(
                        "HTTP/1.1 {}\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok",
                        status
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
        });

        port
    }

    fn unused_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    fn config(ports: Vec<u16>) -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            candidate_ports: ports,
            probe_timeout_ms: 1000,
            ..Default::default()
        }
    }

    #[test]
    fn test_default_candidates() {
        let config = ServerConfig::default();
        assert_eq!(
            config.candidate_urls(),
            vec!["http://localhost:5173", "http://localhost:5174"]
        );
    }

    #[test]
    fn test_explicit_base_url_wins() {
        let config = ServerConfig {
            base_url: Some("http://127.0.0.1:4000/".to_string()),
            ..Default::default()
        };
        assert_eq!(config.candidate_urls(), vec!["http://127.0.0.1:4000"]);
    }

    #[test]
    fn test_parse_dev_server_command() {
        let command = DevServerCommand::parse("npm run dev -- --port 5173").unwrap();
        assert_eq!(command.program, "npm");
        assert_eq!(command.args, vec!["run", "dev", "--", "--port", "5173"]);
        assert!(DevServerCommand::parse("   ").is_err());
    }

    #[tokio::test]
    async fn test_resolve_skips_dead_port() {
        let dead = unused_port();
        let live = serve("200 OK").await;

        let url = resolve_base_url(&config(vec![dead, live])).await.unwrap();
        assert_eq!(url, format!("http://127.0.0.1:{}", live));
    }

    #[tokio::test]
    async fn test_not_found_still_counts_as_up() {
        let live = serve("404 Not Found").await;
        let url = resolve_base_url(&config(vec![live])).await.unwrap();
        assert_eq!(url, format!("http://127.0.0.1:{}", live));
    }

    #[tokio::test]
    async fn test_server_error_is_not_up() {
        let broken = serve("500 Internal Server Error").await;
        let err = resolve_base_url(&config(vec![broken])).await.unwrap_err();
        assert!(matches!(err, E2eError::ServerUnreachable(_)));
    }

    #[tokio::test]
    async fn test_unreachable_lists_candidates() {
        let dead = unused_port();
        match resolve_base_url(&config(vec![dead])).await {
            Err(E2eError::ServerUnreachable(urls)) => {
                assert_eq!(urls, vec![format!("http://127.0.0.1:{}", dead)]);
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_spawn_missing_program() {
        let command = DevServerCommand::parse("definitely-not-a-dev-server-binary").unwrap();
        let err = ServerHandle::spawn(&command, &config(vec![unused_port()]))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, E2eError::ServerStartup(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_refuses_port_already_answering() {
        let stale = serve("200 OK").await;
        let command = DevServerCommand {
            startup_timeout_ms: 2000,
            ..DevServerCommand::parse("sleep 30").unwrap()
        };

        let started = Instant::now();
        let err = ServerHandle::spawn(&command, &config(vec![stale]))
            .await
            .err()
            .unwrap();

        assert!(matches!(err, E2eError::ServerStartup(_)));
        assert!(err.to_string().contains("already in use"));
        assert!(err.to_string().contains(&stale.to_string()));
        // Refused before spawning, so no wait for the startup timeout
        assert!(started.elapsed() < Duration::from_millis(1500));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_detects_early_exit() {
        let command = DevServerCommand {
            startup_timeout_ms: 5000,
            ..DevServerCommand::parse("true").unwrap()
        };
        let err = ServerHandle::spawn(&command, &config(vec![unused_port()]))
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("exited early") || err.to_string().contains("no answer"));
    }
}
