//! stackgrid: compose, plan, apply and scale a stack.
//!
//! # Usage
//!
//! ```text
//! stackgrid init --path stack.toml --address-block 10.0.0.0/16
//! stackgrid validate -c stack.toml
//! stackgrid plan -c stack.toml --data-dir .stackgrid
//! stackgrid apply -c stack.toml --data-dir .stackgrid --prune
//! stackgrid scale -c stack.toml --data-dir .stackgrid --once
//! ```
//!
//! `plan`, `apply` and `scale` run against the local provider, whose
//! state lives in `--data-dir`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use ipnet::Ipv4Net;
use stackgrid_core::config::DEFAULT_METRIC_NAMESPACE;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(
    name = "stackgrid",
    about = "StackGrid: topology composition and step-scaling engine",
    version,
    propagate_version = true
)]
struct Cli {
    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Where the stack file and the local provider state live.
#[derive(Args, Debug, Clone)]
pub struct StackArgs {
    /// Stack file.
    #[arg(short, long, default_value = "stack.toml")]
    pub config: PathBuf,

    /// Data directory of the local provider.
    #[arg(long, default_value = ".stackgrid")]
    pub data_dir: PathBuf,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a two-unit stack file: a network and a balanced application.
    Init {
        #[arg(short, long, default_value = "stack.toml")]
        path: PathBuf,
        #[arg(long, default_value = "demo")]
        name: String,
        #[arg(long, default_value = "10.0.0.0/16")]
        address_block: Ipv4Net,
    },
    /// Compose the stack and run every structural check.
    Validate {
        #[arg(short, long, default_value = "stack.toml")]
        config: PathBuf,
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
    /// Show what apply would change, using provider reads only.
    Plan {
        #[command(flatten)]
        stack: StackArgs,
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
    /// Apply the stack. Ctrl-C cancels units not yet finished.
    Apply {
        #[command(flatten)]
        stack: StackArgs,
        /// Delete resources a unit no longer declares.
        #[arg(long)]
        prune: bool,
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
    /// Run the scaling controller over the stack's scaling policies.
    Scale {
        #[command(flatten)]
        stack: StackArgs,
        /// Evaluate every pool once and exit.
        #[arg(long)]
        once: bool,
    },
    /// Register the stack's imported networks with the local provider.
    Import {
        #[command(flatten)]
        stack: StackArgs,
    },
    /// Append a sample to a metric stream of the local provider.
    RecordMetric {
        #[arg(long, default_value = ".stackgrid")]
        data_dir: PathBuf,
        #[arg(long)]
        metric: String,
        #[arg(long, default_value = DEFAULT_METRIC_NAMESPACE)]
        namespace: String,
        /// Metric dimension as KEY=VALUE; repeatable.
        #[arg(long = "dimension", value_parser = commands::parse_dimension)]
        dimensions: Vec<(String, String)>,
        #[arg(long)]
        value: f64,
    },
    /// List the resources the local provider knows.
    Status {
        #[arg(long, default_value = ".stackgrid")]
        data_dir: PathBuf,
    },
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info,stackgrid=debug"))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json)?;

    match cli.command {
        Commands::Init {
            path,
            name,
            address_block,
        } => commands::stack::init(&path, &name, address_block),
        Commands::Validate { config, format } => commands::stack::validate(&config, format),
        Commands::Plan { stack, format } => commands::stack::plan(&stack, format).await,
        Commands::Apply { stack, prune, format } => commands::stack::apply(&stack, prune, format).await,
        Commands::Scale { stack, once } => commands::scale::scale(&stack, once).await,
        Commands::Import { stack } => commands::stack::import(&stack),
        Commands::RecordMetric {
            data_dir,
            metric,
            namespace,
            dimensions,
            value,
        } => commands::scale::record_metric(&data_dir, &metric, &namespace, dimensions, value),
        Commands::Status { data_dir } => commands::stack::status(&data_dir),
    }
}
