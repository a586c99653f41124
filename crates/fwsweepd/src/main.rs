//! fwsweepd - Firewall address-object deletion daemon
//!
//! Entry point: accepts one deletion request (flags or a JSON file), runs
//! it, and prints the structured result to stdout. The exit code reflects
//! the run outcome.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use fwsweep_common::{ConnectionLocks, ConnectionParams, DeletionRequest};
use fwsweepd::{DeletionOrchestrator, OrchConfig};

#[derive(Parser, Debug)]
#[command(name = "fwsweepd", about = "Deletes a firewall IP object and cleans up its references")]
struct Args {
    /// Read a full deletion request from a JSON file instead of flags
    #[arg(long, value_name = "FILE")]
    request: Option<PathBuf>,

    /// Firewall platform: checkpoint, fortinet or test
    #[arg(short = 't', long)]
    firewall_type: Option<String>,

    /// Identifier of the IP object to delete
    #[arg(short = 'o', long)]
    object: Option<String>,

    /// Management server hostname or IP
    #[arg(long)]
    host: Option<String>,

    /// Management API port
    #[arg(long, default_value_t = 443)]
    port: u16,

    /// Username (Check Point)
    #[arg(long)]
    username: Option<String>,

    /// Password (Check Point) or API token (FortiGate)
    #[arg(long)]
    password: Option<String>,

    /// Multi-domain server domain (Check Point)
    #[arg(long)]
    domain: Option<String>,

    /// Virtual domain partition (FortiGate)
    #[arg(long)]
    vdom: Option<String>,

    /// Leave changes staged instead of publishing them
    #[arg(long)]
    no_commit: bool,

    /// Overall run budget in seconds
    #[arg(long, default_value_t = 300)]
    timeout_secs: u64,
}

/// Initializes tracing/logging subsystem
fn init_logging() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

fn build_request(args: &Args) -> anyhow::Result<DeletionRequest> {
    if let Some(path) = &args.request {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading request file {}", path.display()))?;
        let request = serde_json::from_str(&raw)
            .with_context(|| format!("parsing request file {}", path.display()))?;
        return Ok(request);
    }

    let firewall_type = args
        .firewall_type
        .as_deref()
        .context("--firewall-type is required without --request")?
        .parse()
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    let object = args
        .object
        .as_deref()
        .context("--object is required without --request")?;
    let host = args
        .host
        .as_deref()
        .context("--host is required without --request")?;

    Ok(DeletionRequest {
        firewall_type,
        ip_object_id: object.to_string(),
        connection_params: ConnectionParams {
            host: host.to_string(),
            port: args.port,
            username: args.username.clone(),
            password: args.password.clone(),
            domain: args.domain.clone(),
            vdom: args.vdom.clone(),
        },
        auto_commit: !args.no_commit,
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let args = Args::parse();
    let request = match build_request(&args) {
        Ok(request) => request,
        Err(err) => {
            eprintln!("fwsweepd: {err:#}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        firewall = %request.firewall_type,
        object = %request.ip_object_id,
        host = %request.connection_params.host,
        "--- Starting fwsweepd deletion run ---"
    );

    let config = OrchConfig {
        timeout: Duration::from_secs(args.timeout_secs),
        ..OrchConfig::default()
    };
    let orchestrator = DeletionOrchestrator::new(config, Arc::new(ConnectionLocks::new()));
    let result = orchestrator.run(&request).await;

    match serde_json::to_string_pretty(&result) {
        Ok(json) => println!("{json}"),
        Err(err) => {
            eprintln!("fwsweepd: failed to serialize result: {err}");
            return ExitCode::FAILURE;
        }
    }

    if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
