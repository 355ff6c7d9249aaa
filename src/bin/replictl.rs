//! ReplICtl - Command line tool for replilog clusters
//!
//! Usage:
//!   replictl submit "hello" --concern 2   - Submit a message to the master
//!   replictl list                         - Show a node's log
//!   replictl status                       - Show a node's status
//!   replictl converge                     - Compare logs across nodes

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Deserialize;

/// Replilog Cluster Control Tool
#[derive(Parser)]
#[command(name = "replictl")]
#[command(about = "Control and monitor replilog clusters", long_about = None)]
struct Cli {
    /// API endpoint to connect to
    #[arg(short, long, default_value = "http://localhost:8080")]
    endpoint: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a message to the master
    Submit {
        /// Message text
        text: String,
        /// Write concern (acks required, master included)
        #[arg(short = 'w', long, default_value_t = 1)]
        concern: usize,
    },
    /// List a node's log
    List,
    /// Show a node's status
    Status,
    /// Check log convergence across nodes
    Converge {
        /// Additional node endpoints to compare against the primary one
        #[arg(required = true)]
        others: Vec<String>,
    },
}

// ============ API Response Types ============

#[derive(Debug, Deserialize)]
struct Entry {
    id: u64,
    text: String,
    created_at: String,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    status: String,
    entry: Entry,
    acks_achieved: usize,
    required: usize,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    code: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()?;
    let base = cli.endpoint.trim_end_matches('/').to_string();

    match cli.command {
        Commands::Submit { text, concern } => submit(&client, &base, text, concern).await,
        Commands::List => list(&client, &base).await,
        Commands::Status => status(&client, &base).await,
        Commands::Converge { others } => converge(&client, &base, others).await,
    }
}

async fn submit(
    client: &reqwest::Client,
    base: &str,
    text: String,
    concern: usize,
) -> anyhow::Result<()> {
    let response = client
        .post(format!("{base}/messages"))
        .json(&serde_json::json!({ "text": text, "w": concern }))
        .send()
        .await
        .with_context(|| format!("failed to reach {base}"))?;

    if !response.status().is_success() {
        let err: ErrorResponse = response.json().await?;
        bail!("{} ({})", err.error, err.code);
    }

    let receipt: SubmitResponse = response.json().await?;
    println!(
        "{}: entry {} acked by {}/{}",
        receipt.status, receipt.entry.id, receipt.acks_achieved, receipt.required
    );
    Ok(())
}

async fn list(client: &reqwest::Client, base: &str) -> anyhow::Result<()> {
    let entries = fetch_log(client, base).await?;
    if entries.is_empty() {
        println!("(empty log)");
        return Ok(());
    }

    println!("{:>8}  {:<28}  TEXT", "ID", "CREATED");
    for entry in entries {
        println!("{:>8}  {:<28}  {}", entry.id, entry.created_at, entry.text);
    }
    Ok(())
}

async fn status(client: &reqwest::Client, base: &str) -> anyhow::Result<()> {
    let response = client
        .get(format!("{base}/status"))
        .send()
        .await
        .with_context(|| format!("failed to reach {base}"))?;
    let body: serde_json::Value = response.json().await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

async fn converge(
    client: &reqwest::Client,
    base: &str,
    others: Vec<String>,
) -> anyhow::Result<()> {
    let reference = fetch_log(client, base).await?;
    let reference_ids: Vec<u64> = reference.iter().map(|e| e.id).collect();
    println!("{base}: {} entries", reference.len());

    let mut converged = true;
    for other in &others {
        let other_base = other.trim_end_matches('/');
        let log = fetch_log(client, other_base).await?;
        let ids: Vec<u64> = log.iter().map(|e| e.id).collect();

        if ids == reference_ids {
            println!("{other_base}: {} entries (converged)", log.len());
        } else {
            converged = false;
            let missing = reference_ids.iter().filter(|id| !ids.contains(id)).count();
            println!(
                "{other_base}: {} entries ({} behind reference)",
                log.len(),
                missing
            );
        }
    }

    if !converged {
        bail!("cluster has not converged");
    }
    println!("All nodes converged");
    Ok(())
}

async fn fetch_log(client: &reqwest::Client, base: &str) -> anyhow::Result<Vec<Entry>> {
    let response = client
        .get(format!("{base}/messages"))
        .send()
        .await
        .with_context(|| format!("failed to reach {base}"))?;
    if !response.status().is_success() {
        bail!("{base} answered HTTP {}", response.status());
    }
    Ok(response.json().await?)
}
