//! Metrics Worker - queue-driven code metrics collector
//!
//! Pulls repository analysis jobs from RabbitMQ, runs the configured metric
//! tools against the downloaded repository, upserts the combined metrics
//! into PostgreSQL, and publishes a completion event.
//!
//! Exit codes:
//!   0 - Stopped cleanly (Ctrl-C while idle, or --analyze/--init-config done)
//!   1 - Fatal error; the in-flight message was requeued

mod analysis;
mod broker;
mod cli;
mod config;
mod error;
mod models;
mod pipeline;
mod resolver;
mod store;
mod worker;

use analysis::AnalyzerSet;
use anyhow::{Context, Result};
use broker::AmqpBroker;
use chrono::Utc;
use cli::Args;
use config::{Config, DEFAULT_CONFIG_FILE};
use models::Job;
use pipeline::Pipeline;
use resolver::ArtifactResolver;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use store::PostgresStore;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;
use worker::Worker;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Initialize logging
    init_logging(&args);

    info!("Metrics Worker v{}", env!("CARGO_PKG_VERSION"));

    let result = match args.analyze {
        Some(ref repo_id) => run_analyze(&args, repo_id).await,
        None => run_worker(&args).await,
    };

    if let Err(e) = result {
        error!("Worker failed: {:#}", e);
        eprintln!("\n❌ Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Handle --init-config: generate a default .metrics-worker.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            DEFAULT_CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", DEFAULT_CONFIG_FILE);
    println!("   Edit it to customize the broker, database, and analyzers.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Consume jobs until Ctrl-C or a fatal error.
async fn run_worker(args: &Args) -> Result<()> {
    let config = load_config(args)?;

    let broker = Arc::new(
        AmqpBroker::connect(&config.broker)
            .await
            .context("Failed to connect to RabbitMQ")?,
    );

    let store = PostgresStore::connect(&config.database)
        .await
        .context("Failed to connect to PostgreSQL")?;
    store
        .ensure_schema(&config.database.table)
        .await
        .with_context(|| format!("Failed to create table {}", config.database.table))?;

    let analyzers = AnalyzerSet::from_config(&config.analyzers);
    info!("Analyzers: {}", analyzers.names().join(", "));
    info!(
        "Repositories directory: {}",
        config.worker.repositories_dir.display()
    );

    let pipeline = Pipeline::new(
        ArtifactResolver::new(&config.worker.repositories_dir),
        analyzers,
        Arc::new(store),
        broker.clone(),
        config.worker.language_id,
    );
    let mut worker = Worker::new(broker.clone(), pipeline, config.broker.idle_delay());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, stopping after the current job");
            let _ = shutdown_tx.send(true);
        }
    });

    let result = worker.run(shutdown_rx).await;
    info!("Worker stopped: {}", worker.stats().summary());
    result.context("Message loop aborted")?;

    if let Err(e) = broker.close().await {
        warn!("Failed to close RabbitMQ connection: {}", e);
    }

    Ok(())
}

/// Handle --analyze: collect metrics for one repository and print them.
async fn run_analyze(args: &Args, repo_id: &str) -> Result<()> {
    let config = load_config(args)?;
    let start_time = Instant::now();

    let job = Job::new(repo_id)?;
    let resolver = ArtifactResolver::new(&config.worker.repositories_dir);
    let analyzers = AnalyzerSet::from_config(&config.analyzers);

    eprintln!(
        "🔬 Analyzing '{}' with {} analyzer(s): {}",
        job.repo_id,
        analyzers.len(),
        analyzers.names().join(", ")
    );

    let composite = pipeline::collect_metrics(&resolver, &analyzers, &job).await?;

    let report = json!({
        "repo_id": composite.repo_id,
        "analysis_date": Utc::now(),
        "duration_seconds": start_time.elapsed().as_secs_f64(),
        "metrics": composite.metrics_document(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    eprintln!("✅ Dry run complete. Nothing was stored or published.");
    Ok(())
}

/// Load configuration from file or use defaults, then apply CLI overrides.
fn load_config(args: &Args) -> Result<Config> {
    let mut config = if let Some(ref config_path) = args.config {
        // Try explicit config path
        info!("Loading config from: {}", config_path.display());
        Config::load(config_path)?
    } else {
        // Try default location
        match Config::load_default()? {
            Some(config) => {
                info!("Loaded default config from {}", DEFAULT_CONFIG_FILE);
                config
            }
            None => {
                debug!("No config file found, using defaults");
                Config::default()
            }
        }
    };

    config.merge_with_args(args);
    config.validate()?;

    Ok(config)
}
