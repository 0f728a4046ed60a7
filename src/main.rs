use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};

use relay::config::Config;
use relay::log::LogLevel;
use relay::orchestration::{Orchestrator, RequestId};
use relay::plan::Plan;
use relay::registry::{EchoExecutor, ExecutorRegistry};
use relay::{rlog, Error, Result, TaskGraph};

/// Relay - dependency-graph task orchestrator
#[derive(Parser, Debug)]
#[command(name = "relay")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    RELAY_DEBUG=1   Enable debug logging (alternative to --debug)")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.relay/relay.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    /// Minimum log level: error, warn, info, debug or trace (overrides --debug)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Config file (defaults to ~/.relay/relay.toml)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Check a plan file and print its tasks in dependency order
    Validate {
        /// Path to the plan (JSON, optionally inside a fenced block)
        plan: PathBuf,
    },

    /// Dry-run a plan with an echo executor for every domain
    Run {
        /// Path to the plan (JSON, optionally inside a fenced block)
        plan: PathBuf,

        /// Per-task timeout in seconds (overrides the config file)
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Maximum tasks in flight (overrides the config file)
        #[arg(long)]
        max_concurrent: Option<usize>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    relay::log::init(cli.debug);
    if let Some(level) = cli.log_level {
        relay::log::set_level(level);
    }
    if cli.debug {
        if let Some(path) = relay::log::path() {
            eprintln!("Logging to {}", path.display());
        }
    }

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Command::Validate { plan } => run_validate(&plan),
        Command::Run {
            plan,
            timeout_secs,
            max_concurrent,
        } => {
            let config = with_overrides(config, timeout_secs, max_concurrent)?;
            run_dry(&plan, config)
        }
    }
}

/// Apply command-line overrides and check the merged result.
fn with_overrides(
    config: Config,
    timeout_secs: Option<u64>,
    max_concurrent: Option<usize>,
) -> Result<Config> {
    let config = Config {
        task_timeout_secs: timeout_secs.or(config.task_timeout_secs),
        max_concurrent: max_concurrent.or(config.max_concurrent),
        ..config
    };
    config.validate()?;
    Ok(config)
}

fn load_plan(path: &Path) -> Result<Plan> {
    let text = std::fs::read_to_string(path)?;
    Plan::parse(&text).ok_or_else(|| {
        Error::Validation(format!("No plan found in {}", path.display()))
    })
}

fn run_validate(path: &Path) -> Result<()> {
    let plan = load_plan(path)?;
    let graph = TaskGraph::from_plan(&plan)?;
    let order = graph.topological_order()?;

    println!(
        "Plan OK: {} task(s), {} dependency edge(s)",
        graph.len(),
        graph.dependency_count()
    );
    for (position, task) in order.iter().enumerate() {
        println!("  {:>3}. {} [{}] {}", position + 1, task.id, task.domain, task.description);
    }
    Ok(())
}

fn run_dry(path: &Path, config: Config) -> Result<()> {
    let plan = load_plan(path)?;
    let mut registry = ExecutorRegistry::new();
    for domain in plan.domains() {
        registry.register(&domain, Arc::new(EchoExecutor));
    }

    let request_id = RequestId::new();
    rlog!(
        "Dry run {}: {} task(s) from {}",
        request_id.short(),
        plan.len(),
        path.display()
    );

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(async {
        let orchestrator = Orchestrator::new(Arc::new(registry), config);
        orchestrator.run_plan(request_id, &plan).await
    })?;

    let json_output = serde_json::json!({
        "request_id": request_id.to_string(),
        "response": result.response,
        "tasks": result.tasks,
    });
    println!("{}", serde_json::to_string_pretty(&json_output)?);
    Ok(())
}
