//! Attrition Guard CLI: predict, explain, narrate and monitor drift from the terminal.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Attrition Guard: explainable employee attrition risk
#[derive(Parser, Debug)]
#[command(name = "attrition", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (config and relative paths resolve against it)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Model bundle path (overrides `model.bundle_path`)
    #[arg(short, long)]
    bundle: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Raw employee attributes, from a JSON file and/or `--set` pairs.
#[derive(clap::Args, Debug, Default)]
struct InstanceArgs {
    /// JSON object of attributes, e.g. {"Age": 30, "OverTime": "Yes"}
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Attribute assignment, repeatable (applied after --input)
    #[arg(short, long = "set", value_name = "KEY=VALUE")]
    set: Vec<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Predict attrition risk for one employee
    Predict {
        #[command(flatten)]
        instance: InstanceArgs,

        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// Explain a prediction with its top contributing factors
    Explain {
        #[command(flatten)]
        instance: InstanceArgs,

        /// Number of factors to show (overrides `explain.top_k`)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Employee identifier used in the narration
        #[arg(long, default_value = "Employee #1042")]
        name: String,

        /// Skip the narration agent
        #[arg(long)]
        no_narrate: bool,

        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// Ask the narration agent a question about one employee
    Chat {
        #[command(flatten)]
        instance: InstanceArgs,

        /// The question to ask
        question: String,
    },
    /// Compare a batch of records against the reference dataset
    Drift {
        /// Reference CSV (overrides `drift.reference_dataset`)
        #[arg(long)]
        reference: Option<PathBuf>,

        /// Current batch CSV
        #[arg(long, conflicts_with = "simulate")]
        current: Option<PathBuf>,

        /// Sample the reference and shift Age and MonthlyIncome
        #[arg(long)]
        simulate: bool,

        /// Rows sampled with --simulate (overrides `drift.simulate_rows`)
        #[arg(long)]
        rows: Option<usize>,

        /// Seed for --simulate
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Also write the report as JSON to this path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Write the default configuration to .attrition/config.toml
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Show the effective configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "attrition-guard", "attrition-guard")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "attrition.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let options = commands::GlobalOptions {
        workspace,
        bundle: cli.bundle,
    };
    commands::handle_command(cli.command, &options).await
}
