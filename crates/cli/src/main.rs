mod actions;
mod config;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use scheduler::{ExecutionContext, PhaseList};
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{PipelineConfig, DEFAULT_CONFIG};

#[derive(Parser)]
#[command(name = "phaseflow")]
#[command(about = "Run phase pipelines declared in TOML", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Pipeline file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG)]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the phase order of the pipeline
    Order,
    /// Zip-merge two comma-separated phase orders
    Merge {
        #[arg(long, value_delimiter = ',')]
        current: Vec<String>,

        #[arg(long, value_delimiter = ',')]
        incoming: Vec<String>,
    },
    /// Run the pipeline once and print the resulting context
    Run {
        /// Seed a context value; VALUE is parsed as JSON, falling back to a string
        #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_key_value)]
        values: Vec<(String, Value)>,

        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Commands::Order => order(&cli.config).await,
        Commands::Merge { current, incoming } => merge_orders(&current, &incoming),
        Commands::Run { values, timeout_ms } => run(&cli.config, values, timeout_ms).await,
    }
}

async fn order(path: &Path) -> Result<()> {
    let list = PipelineConfig::load(path).await?.build()?;

    for phase in list.iter().chain([list.error_phase(), list.final_phase()]) {
        let options = phase.options();
        println!(
            "{:<16} handlers={:<3} parallel={:<5} fail_fast={}",
            phase.id(),
            phase.handler_count(),
            options.parallel,
            options.fail_fast
        );
    }
    Ok(())
}

fn merge_orders(current: &[String], incoming: &[String]) -> Result<()> {
    let merged = phaseflow_core::merge(current, incoming).context("Phase orders conflict")?;
    println!("{}", merged.join(","));
    Ok(())
}

async fn run(path: &Path, values: Vec<(String, Value)>, timeout_ms: Option<u64>) -> Result<()> {
    let list = PipelineConfig::load(path)
        .await?
        .build()
        .context("Failed to build pipeline")?;

    let ctx = ExecutionContext::from_values(values.into_iter().collect());
    let outcome = execute(&list, &ctx, timeout_ms).await;

    // Printed on every outcome, including a timeout.
    println!("{}", render_context(&ctx)?);
    if let Some(error) = ctx.error() {
        println!("error: {}", error);
    }
    outcome
}

async fn execute(list: &PhaseList, ctx: &ExecutionContext, timeout_ms: Option<u64>) -> Result<()> {
    let result = match timeout_ms {
        Some(ms) => tokio::time::timeout(Duration::from_millis(ms), list.run(ctx))
            .await
            .map_err(|_| anyhow!("Pipeline run timed out after {}ms", ms))?,
        None => list.run(ctx).await,
    };
    result.context("Pipeline run failed")
}

fn render_context(ctx: &ExecutionContext) -> Result<String> {
    let values: BTreeMap<String, Value> = ctx.snapshot().into_iter().collect();
    Ok(serde_json::to_string_pretty(&values)?)
}

fn parse_key_value(s: &str) -> std::result::Result<(String, Value), String> {
    let (key, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
    if key.is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "phaseflow=info,scheduler=info".into()),
        )
        .init();
}
