use anyhow::Context;
use batch_etl::apis::{create_api, validate_partitions};
use batch_etl::clock::SystemClock;
use batch_etl::config::Config;
use batch_etl::infra::{open_sink, ReqwestHttp};
use batch_etl::logging;
use batch_etl::pipeline::transform::create_transformer;
use batch_etl::pipeline::{Pipeline, PipelineComponents, PipelineOutcome};
use batch_etl::types::WriteMode;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "batch_etl")]
#[command(about = "Batch ETL: fetch partitions from a JSON API, enrich them and load a SQL table")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline once
    Run {
        /// Path to the TOML configuration
        #[arg(long, default_value = "etl.toml")]
        config: PathBuf,
        /// Override the configured write mode (append or replace)
        #[arg(long)]
        mode: Option<WriteMode>,
        /// Override the configured destination table
        #[arg(long)]
        table: Option<String>,
    },
    /// Validate the configuration and print the plan without touching the network
    Check {
        /// Path to the TOML configuration
        #[arg(long, default_value = "etl.toml")]
        config: PathBuf,
    },
}

fn load_config(path: &Path, mode: Option<WriteMode>, table: Option<String>) -> anyhow::Result<Config> {
    let mut config = Config::read(path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    // secrets come from the environment (and `.env`), never from the file alone
    config
        .apply_env(|name| std::env::var(name).ok())
        .context("applying environment overrides")?;
    if let Some(mode) = mode {
        config.pipeline.write_mode = mode;
    }
    if let Some(table) = table {
        config.pipeline.table_name = table;
    }
    config.validate().context("validating configuration")?;
    Ok(config)
}

fn print_plan(config: &Config) {
    println!("\n📋 ETL plan");
    println!("   Source: {}", config.source.kind);
    println!("   Destination: {}", config.destination.redacted_connection_string());
    println!("   Table: {}", config.pipeline.table_name);
    println!("   Write mode: {}", config.pipeline.write_mode);
    println!(
        "   Concurrency: {}  Retries: {} (initial {} ms, x{})",
        config.pipeline.concurrency_limit,
        config.pipeline.retry_max_attempts,
        config.pipeline.retry_initial_delay_ms,
        config.pipeline.retry_backoff_multiplier
    );
    println!("   Partitions ({}):", config.pipeline.partitions.len());
    for partition in &config.pipeline.partitions {
        println!("     - {}", partition.name);
    }
}

async fn run(config: Config) -> anyhow::Result<ExitCode> {
    let api = create_api(&config.source)?;
    let transformer = create_transformer(&config.source.kind)?;
    let sink = open_sink(&config.destination).await?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, no new partitions will be fetched");
            on_signal.cancel();
        }
    });

    let components = PipelineComponents {
        http: Arc::new(ReqwestHttp::new()),
        api: Arc::from(api),
        transformer: Arc::from(transformer),
        sink,
        clock: Arc::new(SystemClock),
    };
    let pipeline = Pipeline::new(config.pipeline, components, cancel)?;
    info!(run_id = %pipeline.run_id(), "Pipeline created");

    let report = pipeline.run().await;
    println!("\n📊 Pipeline results (run {}):", report.run_id);
    println!("   Final state: {}", report.final_state);
    println!("   Elapsed: {:.2}s", report.elapsed.as_secs_f64());
    match &report.outcome {
        PipelineOutcome::Completed { rows_written } => {
            println!("   Rows written: {rows_written}");
            println!("\n✅ ETL completed");
            Ok(ExitCode::SUCCESS)
        }
        PipelineOutcome::Failed { stage, error } => {
            println!("   Failed during: {stage}");
            if let Some(partition) = error.partition() {
                println!("   Partition: {partition}");
            }
            println!("\n❌ ETL failed: {error}");
            Ok(ExitCode::FAILURE)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenv::dotenv().ok();
    let _log_guard = logging::init_logging();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, mode, table } => {
            println!("🔄 Running ETL pipeline...");
            let config = load_config(&config, mode, table)?;
            run(config).await
        }
        Commands::Check { config } => {
            let config = load_config(&config, None, None)?;
            let api = create_api(&config.source)?;
            validate_partitions(api.as_ref(), &config.pipeline.partitions)?;
            create_transformer(&config.source.kind)?;
            print_plan(&config);
            println!("\n✅ Configuration is valid");
            Ok(ExitCode::SUCCESS)
        }
    }
}
