//! Job Store CLI - Command-line interface for the job store daemon

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use tabled::{Table, Tabled};

const DEFAULT_RPC_URL: &str = "http://127.0.0.1:9627";

#[derive(Parser)]
#[command(name = "jobstore-cli")]
#[command(about = "Job Store CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// RPC server URL
    #[arg(long, env = "JOBSTORE_RPC_URL", default_value = DEFAULT_RPC_URL)]
    rpc_url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a job and queue it for partitioning
    AddJob {
        /// Data file, relative to the daemon's data directory
        #[arg(long)]
        data_file: String,

        /// Packaging of the data file ("lin" or "jsonl")
        #[arg(long, default_value = "lin")]
        packaging: String,

        #[arg(long, default_value = "marc2")]
        format: String,

        #[arg(long, default_value = "utf8")]
        charset: String,

        /// Destination named in the specification, used for flow binding
        #[arg(long)]
        destination: String,

        #[arg(long)]
        submitter: i64,

        /// TRANSIENT, PERSISTENT, TEST or ACCTEST
        #[arg(long, default_value = "TRANSIENT")]
        job_type: String,

        /// LOW, NORMAL, HIGH or HIGHEST
        #[arg(long, default_value = "NORMAL")]
        priority: String,
    },

    /// Report a processed or delivered chunk (JSON file with the chunk result)
    AddChunk {
        /// Path to the chunk result JSON; "-" reads stdin
        file: PathBuf,
    },

    /// Abort a job
    Abort {
        job_id: i64,
    },

    /// Show a job
    Job {
        job_id: i64,
    },

    /// Queue a rerun of a job
    Rerun {
        job_id: i64,

        /// Only rerun items that failed
        #[arg(long)]
        failed_only: bool,
    },

    /// Show submit state per sink and phase
    Queues,

    /// Take messages waiting for a destination
    Poll {
        destination: String,

        #[arg(short = 'n', long, default_value = "10")]
        max: usize,
    },
}

#[derive(Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: Value,
    id: u64,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    #[allow(dead_code)]
    jsonrpc: String,
    #[allow(dead_code)]
    id: u64,
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

#[derive(Tabled)]
struct JobRow {
    id: i64,
    chunks: u64,
    items: u64,
    partitioning: String,
    processing: String,
    delivering: String,
    status: String,
}

impl JobRow {
    fn from_json(job: &Value) -> Self {
        let status = if job["aborted"].as_bool().unwrap_or(false) {
            "ABORTED".red().to_string()
        } else if job["fatalError"].as_bool().unwrap_or(false) {
            "FATAL".red().to_string()
        } else if job["timeOfCompletion"].is_null() {
            "RUNNING".yellow().to_string()
        } else {
            "DONE".green().to_string()
        };
        Self {
            id: job["id"].as_i64().unwrap_or_default(),
            chunks: job["numberOfChunks"].as_u64().unwrap_or_default(),
            items: job["numberOfItems"].as_u64().unwrap_or_default(),
            partitioning: phase_summary(&job["state"]["partitioning"]),
            processing: phase_summary(&job["state"]["processing"]),
            delivering: phase_summary(&job["state"]["delivering"]),
            status,
        }
    }
}

/// "succeeded/failed/ignored", with a trailing '*' once the phase ended
fn phase_summary(element: &Value) -> String {
    let done = if element["endAt"].is_null() { "" } else { "*" };
    format!(
        "{}/{}/{}{}",
        element["succeeded"].as_u64().unwrap_or_default(),
        element["failed"].as_u64().unwrap_or_default(),
        element["ignored"].as_u64().unwrap_or_default(),
        done
    )
}

#[derive(Tabled)]
struct QueueRow {
    sink: i64,
    phase: String,
    mode: String,
    ready: u64,
    enqueued: u64,
    sweeps: u64,
}

#[derive(Tabled)]
struct MessageRow {
    priority: i64,
    kind: String,
    job: i64,
    chunk: String,
    items: usize,
}

impl MessageRow {
    fn from_json(message: &Value) -> Self {
        let payload = &message["payload"];
        Self {
            priority: message["priority"].as_i64().unwrap_or_default(),
            kind: payload["type"].as_str().unwrap_or("?").to_string(),
            job: payload["jobId"].as_i64().unwrap_or_default(),
            chunk: payload["chunkId"]
                .as_u64()
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string()),
            items: payload["items"].as_array().map(Vec::len).unwrap_or(0),
        }
    }
}

async fn call_rpc(url: &str, method: &str, params: Value) -> Result<Value> {
    let request = JsonRpcRequest {
        jsonrpc: "2.0".to_string(),
        method: method.to_string(),
        params,
        id: 1,
    };

    let client = reqwest::Client::new();
    let response: JsonRpcResponse = client
        .post(url)
        .json(&request)
        .send()
        .await
        .context("Failed to connect to daemon")?
        .json()
        .await
        .context("Failed to parse response")?;

    if let Some(error) = response.error {
        anyhow::bail!("RPC error ({}): {}", error.code, error.message);
    }

    response
        .result
        .ok_or_else(|| anyhow::anyhow!("No result in response"))
}

fn read_chunk_result(file: &PathBuf) -> Result<Value> {
    let text = if file.as_os_str() == "-" {
        std::io::read_to_string(std::io::stdin()).context("Failed to read stdin")?
    } else {
        std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read {}", file.display()))?
    };
    serde_json::from_str(&text).context("Invalid chunk result JSON")
}

fn print_job(job: &Value) {
    println!("{}", Table::new(vec![JobRow::from_json(job)]));
    if let Some(diagnostics) = job["diagnostics"].as_array() {
        for diagnostic in diagnostics {
            println!(
                "  {} {}",
                diagnostic["level"].as_str().unwrap_or("?").red(),
                diagnostic["message"].as_str().unwrap_or_default()
            );
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::AddJob {
            data_file,
            packaging,
            format,
            charset,
            destination,
            submitter,
            job_type,
            priority,
        } => {
            let params = json!({
                "specification": {
                    "packaging": packaging,
                    "format": format,
                    "charset": charset,
                    "destination": destination,
                    "submitterId": submitter,
                    "dataFile": data_file,
                    "jobType": job_type.to_ascii_uppercase(),
                    "priority": priority.to_ascii_uppercase(),
                }
            });

            let job = call_rpc(&cli.rpc_url, "jobstore.addJob.v1", params).await?;

            println!("{}", "✓ Job added".green().bold());
            println!();
            print_job(&job);
        }

        Commands::AddChunk { file } => {
            let params = read_chunk_result(&file)?;
            let result = call_rpc(&cli.rpc_url, "jobstore.addChunk.v1", params).await?;

            if result["applied"].as_bool().unwrap_or(false) {
                println!("{}", "✓ Chunk result recorded".green().bold());
            } else {
                println!("{}", "○ Chunk result already recorded".yellow());
            }
            if !result["job"].is_null() {
                println!();
                print_job(&result["job"]);
            }
        }

        Commands::Abort { job_id } => {
            let params = json!({ "jobId": job_id });
            let job = call_rpc(&cli.rpc_url, "jobstore.abortJob.v1", params).await?;

            println!("{}", format!("✓ Job {} aborted", job_id).green().bold());
            println!();
            print_job(&job);
        }

        Commands::Job { job_id } => {
            let params = json!({ "jobId": job_id });
            let job = call_rpc(&cli.rpc_url, "jobstore.getJob.v1", params).await?;
            print_job(&job);
        }

        Commands::Rerun {
            job_id,
            failed_only,
        } => {
            let params = json!({ "jobId": job_id, "failedOnly": failed_only });
            let result = call_rpc(&cli.rpc_url, "jobstore.rerunJob.v1", params).await?;

            println!(
                "{}",
                format!("✓ Rerun {} of job {} queued", result["rerunId"], job_id)
                    .green()
                    .bold()
            );
        }

        Commands::Queues => {
            let result = call_rpc(&cli.rpc_url, "admin.queueStatus.v1", json!({})).await?;

            println!(
                "  {} {}",
                "Capacity per queue:".bold(),
                result["capacity"].as_u64().unwrap_or_default()
            );
            let rows: Vec<QueueRow> = result["entries"]
                .as_array()
                .map(|entries| {
                    entries
                        .iter()
                        .map(|e| QueueRow {
                            sink: e["sinkId"].as_i64().unwrap_or_default(),
                            phase: e["phase"].as_str().unwrap_or("?").to_string(),
                            mode: e["mode"].as_str().unwrap_or("?").to_string(),
                            ready: e["readyForQueue"].as_u64().unwrap_or_default(),
                            enqueued: e["jmsEnqueued"].as_u64().unwrap_or_default(),
                            sweeps: e["cleanSweeps"].as_u64().unwrap_or_default(),
                        })
                        .collect()
                })
                .unwrap_or_default();

            if rows.is_empty() {
                println!("{}", "No active queues".yellow());
            } else {
                println!("{}", Table::new(rows));
            }
        }

        Commands::Poll { destination, max } => {
            let params = json!({ "destination": destination, "max": max });
            let result = call_rpc(&cli.rpc_url, "broker.poll.v1", params).await?;

            let messages = result.as_array().cloned().unwrap_or_default();
            if messages.is_empty() {
                println!("{}", format!("No messages for {}", destination).yellow());
            } else {
                let rows: Vec<MessageRow> = messages.iter().map(MessageRow::from_json).collect();
                println!("{}", Table::new(rows));
                println!();
                println!("{}", serde_json::to_string_pretty(&messages)?);
            }
        }
    }

    Ok(())
}
