//! PlanFlow CLI

use anyhow::Context;
use clap::{Parser, Subcommand};
use console::style;
use planflow_engine::{
    CancellationToken, EngineConfig, ExecutionReport, FlowExecutor, FlowRegistryBuilder,
    RunStatus, Variables,
};
use planflow_plugins::{register_builtins, FlowLoader, FunctionRegistry, VariableGoalChecker};
use planflow_protocol::FlowDefinition;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "planflow")]
#[command(about = "Validate and run declarative multi-step flows")]
#[command(version)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate every flow in a directory
    Validate {
        /// Directory containing flow files
        #[arg(value_name = "FLOWS_DIR")]
        dir: PathBuf,
    },

    /// List the flows in a directory
    List {
        /// Directory containing flow files
        #[arg(value_name = "FLOWS_DIR")]
        dir: PathBuf,
    },

    /// Run a flow with the builtin text functions
    Run {
        /// Directory containing flow files
        #[arg(value_name = "FLOWS_DIR")]
        dir: PathBuf,

        /// Name of the flow to run
        #[arg(value_name = "FLOW")]
        flow: String,

        /// Initial variables as a JSON object of strings
        #[arg(long, default_value = "{}")]
        vars: String,

        /// Engine config file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the global step budget
        #[arg(long)]
        max_steps: Option<u64>,

        /// Override the call depth limit
        #[arg(long)]
        max_depth: Option<usize>,

        /// Default timeout for each function call, in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Print the JSON schema of a flow definition
    Schema,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Validate { dir } => validate_flows(&dir),
        Commands::List { dir } => list_flows(&dir),
        Commands::Run {
            dir,
            flow,
            vars,
            config,
            max_steps,
            max_depth,
            timeout_secs,
        } => {
            let config = build_config(config.as_deref(), max_steps, max_depth, timeout_secs)?;
            let report = run_flow(&dir, &flow, &vars, config).await?;
            if report.status() != RunStatus::Completed {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Schema => print_schema(),
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn validate_flows(dir: &Path) -> anyhow::Result<()> {
    eprintln!("{}", style(format!("Validating flows in {}", dir.display())).bold());

    let (flows, errors) = FlowLoader::new(dir).scan()?;
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("  {} {}", style("✗").red(), e);
        }
        eprintln!(
            "{}",
            style(format!("{} flow files rejected", errors.len()))
                .red()
                .bold()
        );
        anyhow::bail!("{} flow files could not be loaded", errors.len());
    }

    let built = FlowRegistryBuilder::default()
        .extend(flows.into_iter().map(|f| f.definition))
        .build();
    match built {
        Ok(registry) => {
            eprintln!(
                "{}",
                style(format!("{} flows valid", registry.len())).green().bold()
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("{}", style("Validation failed").red().bold());
            Err(e.into())
        }
    }
}

fn list_flows(dir: &Path) -> anyhow::Result<()> {
    let flows = FlowLoader::new(dir).load()?;
    if flows.is_empty() {
        eprintln!("{}", style("No flows found").yellow());
        return Ok(());
    }

    for flow in flows {
        let definition = &flow.definition;
        println!(
            "{}  {} steps  {}",
            style(&definition.name).cyan().bold(),
            definition.steps.len(),
            style(&definition.description).dim()
        );
    }
    Ok(())
}

fn build_config(
    path: Option<&Path>,
    max_steps: Option<u64>,
    max_depth: Option<usize>,
    timeout_secs: Option<u64>,
) -> anyhow::Result<EngineConfig> {
    let mut config = match path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(max_steps) = max_steps {
        config = config.with_max_total_steps(max_steps);
    }
    if let Some(max_depth) = max_depth {
        config = config.with_max_call_depth(max_depth);
    }
    if let Some(secs) = timeout_secs {
        config = config.with_default_step_timeout(Duration::from_secs(secs));
    }
    config.validate()?;
    Ok(config)
}

fn parse_vars(json: &str) -> anyhow::Result<Variables> {
    serde_json::from_str(json)
        .map_err(|e| anyhow::anyhow!("Invalid JSON vars (expected an object of strings): {}", e))
}

async fn run_flow(
    dir: &Path,
    flow: &str,
    vars: &str,
    config: EngineConfig,
) -> anyhow::Result<ExecutionReport> {
    let initial = parse_vars(vars)?;
    let registry = FlowLoader::new(dir).load_registry()?;

    let functions = FunctionRegistry::new();
    register_builtins(&functions).await?;

    let executor = FlowExecutor::new(
        Arc::new(functions),
        Arc::new(VariableGoalChecker::new()),
        Arc::new(registry),
        config,
    );

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            on_interrupt.cancel();
        }
    });

    eprintln!("{}", style(format!("Running flow: {}", flow)).bold().cyan());
    let report = executor.execute_by_name(flow, initial, cancel).await?;
    info!(latency_ms = report.latency_ms(), "Run finished");

    println!("{}", serde_json::to_string_pretty(&report)?);

    let status = match report.status() {
        RunStatus::Completed => style(report.status().to_string()).green().bold(),
        RunStatus::Escalated => style(report.status().to_string()).yellow().bold(),
        _ => style(report.status().to_string()).red().bold(),
    };
    eprintln!("{} after {} steps", status, report.steps_executed);
    Ok(report)
}

fn print_schema() -> anyhow::Result<()> {
    let schema = schemars::schema_for!(FlowDefinition);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}
