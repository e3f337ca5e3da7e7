//! tabletop-verify - headless-browser smoke verification of the tabletop front-end
//!
//! Exit codes for `run`: 0 when every scenario passed, 1 when any failed or
//! stopped early, 2 when the runner itself could not run.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use tabletop_e2e::playwright::Browser;
use tabletop_e2e::server::DevServerCommand;
use tabletop_e2e::{E2eError, E2eResult, RunnerConfig, Scenario, VerificationRunner};

/// Tabletop front-end verification runner
#[derive(Parser, Debug)]
#[command(name = "tabletop-verify")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file (YAML)
    #[arg(long, global = true, env = "TABLETOP_E2E_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run verification scenarios against the front-end
    Run(RunArgs),

    /// List available scenarios
    List(SourceArgs),

    /// Print the Playwright script generated for a scenario
    Script(ScriptArgs),
}

#[derive(Args, Debug)]
struct SourceArgs {
    /// Directory of scenario files instead of the built-in set
    #[arg(short, long, env = "TABLETOP_E2E_SCENARIOS")]
    scenarios: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Base URL of the front-end (default: probe localhost:5173, then 5174)
    #[arg(long, env = "TABLETOP_E2E_BASE_URL")]
    base_url: Option<String>,

    /// Run only scenarios with this tag
    #[arg(short, long)]
    tag: Option<String>,

    /// Run only the named scenario
    #[arg(short, long)]
    name: Option<String>,

    /// Browser engine
    #[arg(long, value_enum)]
    browser: Option<Browser>,

    /// Show the browser window
    #[arg(long)]
    headed: bool,

    /// Output directory for the report
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Directory for relative screenshot paths
    #[arg(long, env = "TABLETOP_E2E_SCREENSHOTS")]
    screenshots: Option<PathBuf>,

    /// Start the dev server with this command, e.g. "npm run dev"
    #[arg(long)]
    spawn_server: Option<String>,

    /// Working directory for --spawn-server
    #[arg(long, requires = "spawn_server")]
    app_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ScriptArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Scenario name
    name: String,

    /// Base URL embedded in the script
    #[arg(long, env = "TABLETOP_E2E_BASE_URL", default_value = "http://localhost:5173")]
    base_url: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    match execute(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!("Error: {}", e);
            ExitCode::from(2)
        }
    }
}

async fn execute(cli: Cli) -> E2eResult<bool> {
    let mut config = RunnerConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run(args) => run(config, args).await,
        Commands::List(source) => {
            apply_source(&mut config, &source);
            list(config)
        }
        Commands::Script(args) => {
            apply_source(&mut config, &args.source);
            let runner = VerificationRunner::new(config)?;
            let scenarios = runner.load_scenarios()?;
            let scenario = Scenario::find(&scenarios, &args.name)?;
            println!("{}", runner.script_for(scenario, &args.base_url));
            Ok(true)
        }
    }
}

fn apply_source(config: &mut RunnerConfig, source: &SourceArgs) {
    if let Some(dir) = &source.scenarios {
        config.scenarios_dir = Some(dir.clone());
    }
}

async fn run(mut config: RunnerConfig, args: RunArgs) -> E2eResult<bool> {
    apply_source(&mut config, &args.source);
    if let Some(url) = args.base_url {
        config.server.base_url = Some(url);
    }
    if let Some(browser) = args.browser {
        config.playwright.browser = browser;
    }
    if args.headed {
        config.playwright.headless = false;
    }
    if let Some(output) = args.output {
        config.output_dir = output;
    }
    if let Some(dir) = args.screenshots {
        config.playwright.screenshot_dir = dir;
    }
    if let Some(command_line) = &args.spawn_server {
        let mut command = DevServerCommand::parse(command_line)?;
        command.cwd = args.app_dir.clone();
        config.server.spawn = Some(command);
    }
    config.validate()?;
    let scenarios_dir = config.scenarios_dir.clone();

    let mut runner = VerificationRunner::new(config)?;
    runner.check_prerequisites().await?;

    let all = runner.load_scenarios()?;
    let selected: Vec<Scenario> = match (&args.name, &args.tag) {
        (Some(name), _) => vec![Scenario::find(&all, name)?.clone()],
        (None, Some(tag)) => Scenario::filter_by_tag(&all, tag).into_iter().cloned().collect(),
        (None, None) => all,
    };

    if selected.is_empty() {
        return Err(E2eError::ScenarioNotFound(no_selection_message(
            args.tag.as_deref(),
            scenarios_dir.as_deref(),
        )));
    }

    let results = runner.run_scenarios(&selected).await?;
    runner.write_results(&results)?;

    Ok(results.is_success())
}

fn no_selection_message(tag: Option<&str>, dir: Option<&Path>) -> String {
    match (tag, dir) {
        (Some(tag), _) => format!("no scenario tagged '{}'", tag),
        (None, Some(dir)) => format!("no scenario files in {}", dir.display()),
        (None, None) => "no scenarios to run".to_string(),
    }
}

fn list(config: RunnerConfig) -> E2eResult<bool> {
    let scenarios = match &config.scenarios_dir {
        Some(dir) => Scenario::load_all(dir)?,
        None => Scenario::builtin()?,
    };

    for scenario in &scenarios {
        println!(
            "{:<22} {:<12} {:<40} {}",
            scenario.name,
            scenario.route().unwrap_or("-"),
            scenario.tags.join(","),
            scenario.description
        );
    }

    Ok(true)
}
