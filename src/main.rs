//! Replilog - Replicated Message Log Service
//!
//! Runs a node in either the master or secondary role, plus small
//! operational subcommands for config management and status queries.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use clap::{Parser, Subcommand};
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use replilog::api::{master_router, secondary_router, SecondaryApiOptions};
use replilog::config::ReplilogConfig;
use replilog::error::{Error, Result};
use replilog::replication::{
    HttpTransport, MasterNode, ReplicationConfig, RetryWorker, SecondaryNode,
};

/// Replilog - Replicated Message Log Service
#[derive(Parser)]
#[command(name = "replilog")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "replilog.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the master node
    Master,

    /// Start a secondary node
    Secondary,

    /// Check status of a running node
    Status {
        /// Node address to query
        #[arg(short, long, default_value = "http://localhost:8080")]
        address: String,
    },

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "replilog.toml")]
        output: PathBuf,

        /// Node ID
        #[arg(long, default_value = "master")]
        node_id: String,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level);

    match cli.command {
        Commands::Master => run_master(cli.config).await,
        Commands::Secondary => run_secondary(cli.config).await,
        Commands::Status { address } => run_status(address).await,
        Commands::Init { output, node_id } => run_init(output, node_id),
        Commands::Validate => run_validate(cli.config),
    }
}

/// Initialize logging
fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Start the master node
async fn run_master(config_path: PathBuf) -> Result<()> {
    let config = load_config(&config_path)?;
    tracing::info!(
        "Starting master node {} with {} secondaries",
        config.node.id,
        config.cluster.secondaries.len()
    );

    let transport = Arc::new(HttpTransport::new(config.replication_timeout())?);
    let replication = ReplicationConfig::from(&config);

    let master = Arc::new(MasterNode::new(
        config.node.id.clone(),
        config.cluster.secondaries.clone(),
        transport,
        replication.clone(),
    ));

    let worker = Arc::new(RetryWorker::new(master.clone(), replication.retry_tick));
    let worker_handle = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.run().await })
    };

    let app = apply_api_layers(master_router(master), &config);
    let listener = tokio::net::TcpListener::bind(&config.node.bind_address).await?;
    tracing::info!("Master API listening on {}", config.node.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| Error::Internal(format!("HTTP server error: {}", e)))?;

    worker.stop().await;
    let _ = worker_handle.await;
    tracing::info!("Master stopped");
    Ok(())
}

/// Start a secondary node
async fn run_secondary(config_path: PathBuf) -> Result<()> {
    let config = load_config(&config_path)?;
    if config.cluster.master_url.is_empty() {
        return Err(Error::Config(
            "cluster.master_url is required for the secondary role".into(),
        ));
    }
    tracing::info!(
        "Starting secondary node {} (master: {})",
        config.node.id,
        config.cluster.master_url
    );

    let transport = Arc::new(HttpTransport::new(config.replication_timeout())?);
    let secondary = Arc::new(
        SecondaryNode::new(
            config.node.id.clone(),
            config.cluster.master_url.clone(),
            transport,
            ReplicationConfig::from(&config),
        )
        .with_apply_delay(config.replica_delay()),
    );

    // Reconcile anything missed while we were down, then watch for holes
    // the live push path cannot fill on its own.
    let startup_handle = {
        let secondary = secondary.clone();
        tokio::spawn(async move { secondary.catch_up_at_startup().await })
    };
    let watchdog_handle = {
        let secondary = secondary.clone();
        tokio::spawn(async move { secondary.run_watchdog().await })
    };

    let options = SecondaryApiOptions {
        error_rate: config.cluster.error_rate,
    };
    let app = apply_api_layers(secondary_router(secondary.clone(), options), &config);
    let listener = tokio::net::TcpListener::bind(&config.node.bind_address).await?;
    tracing::info!("Secondary API listening on {}", config.node.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| Error::Internal(format!("HTTP server error: {}", e)))?;

    secondary.stop().await;
    startup_handle.abort();
    let _ = watchdog_handle.await;
    tracing::info!("Secondary stopped");
    Ok(())
}

/// Query a running node's status endpoint
async fn run_status(address: String) -> Result<()> {
    let url = format!("{}/status", address.trim_end_matches('/'));
    let response = reqwest::get(&url).await?;
    let status = response.status();
    let body: serde_json::Value = response.json().await?;

    if !status.is_success() {
        return Err(Error::Replication(format!(
            "status query failed: HTTP {}",
            status
        )));
    }

    println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    Ok(())
}

/// Write a starter configuration file
fn run_init(output: PathBuf, node_id: String) -> Result<()> {
    if output.exists() {
        return Err(Error::Config(format!(
            "refusing to overwrite existing file {:?}",
            output
        )));
    }

    let template = format!(
        r#"[node]
id = "{node_id}"
bind_address = "0.0.0.0:8080"

[cluster]
# Secondaries the master replicates to (master role only)
secondaries = [
    {{ id = "secondary1", url = "http://secondary1:8081" }},
    {{ id = "secondary2", url = "http://secondary2:8081" }},
]
# Master URL for catch-up and acks (secondary role only)
master_url = ""
write_timeout_ms = 5000
replication_timeout_ms = 3000
retry_backoff_ms = 500
retry_backoff_cap_ms = 15000

[logging]
level = "info"
format = "pretty"
"#
    );

    std::fs::write(&output, template)?;
    println!("Wrote starter configuration to {:?}", output);
    Ok(())
}

/// Validate the configuration file
fn run_validate(config_path: PathBuf) -> Result<()> {
    let config = load_config(&config_path)?;
    println!(
        "Configuration OK: node {} ({} secondaries)",
        config.node.id,
        config.cluster.secondaries.len()
    );
    Ok(())
}

/// Layers shared by both roles' routers
fn apply_api_layers(router: Router, config: &ReplilogConfig) -> Router {
    let router = router.layer(DefaultBodyLimit::max(config.api.body_limit));
    if config.api.cors_enabled {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

fn load_config(path: &PathBuf) -> Result<ReplilogConfig> {
    ReplilogConfig::from_file(path).map_err(|e| {
        tracing::error!("Failed to load configuration from {:?}: {}", path, e);
        e
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install shutdown handler: {}", e);
    }
    tracing::info!("Shutdown signal received");
}
