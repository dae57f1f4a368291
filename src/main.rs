//! # Vector Probe
//!
//! Health probe for a remote vector-search service, built on the resilient
//! vector client.
//!
//! ## Usage
//!
//! ```bash
//! # Probe with defaults and environment overrides
//! CHROMADB_HOST=vectors.internal vector-probe
//!
//! # Probe with a config file
//! vector-probe /path/to/client.yaml
//!
//! # Print metrics in Prometheus text format
//! vector-probe --prometheus /path/to/client.yaml
//! ```
//!
//! Exits with status 1 when the service is unhealthy.

use anyhow::Context;
use std::env;
use tracing::{error, info, warn};
use vector_client::VectorClient;
use vector_config::{from_env, load_config, ClientConfig};
use vector_telemetry::{init_logging, LogExporter, PrometheusExporter};

/// Environment variable naming the config file
const CONFIG_ENV: &str = "VECTOR_CLIENT_CONFIG";

struct Args {
    config_path: Option<String>,
    prometheus: bool,
}

fn parse_args() -> Args {
    let mut args = Args {
        config_path: env::var(CONFIG_ENV).ok(),
        prometheus: false,
    };
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "--prometheus" => args.prometheus = true,
            _ => args.config_path = Some(arg),
        }
    }
    args
}

/// Application entry point
#[tokio::main]
async fn main() {
    let args = parse_args();

    let config = match load(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}");
            std::process::exit(2);
        }
    };

    if let Err(e) = init_logging(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        endpoint = %config.endpoint.to_endpoint(),
        "Starting vector probe"
    );

    match run(config, args.prometheus).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!(error = %e, "Probe failed");
            std::process::exit(1);
        }
    }
}

fn load(args: &Args) -> anyhow::Result<ClientConfig> {
    match &args.config_path {
        Some(path) => load_config(path).with_context(|| format!("loading {path}")),
        None => from_env().context("reading configuration from the environment"),
    }
}

/// Probe the service and print the report; returns whether it is healthy.
async fn run(config: ClientConfig, prometheus: bool) -> anyhow::Result<bool> {
    let client = VectorClient::new(config).await?;

    let report = client.health_check().await;
    if report.is_healthy() {
        info!(latency_ms = report.latency_ms, "Service healthy");
    } else {
        warn!(error = ?report.error, "Service unhealthy");
    }

    client.export_metrics(&LogExporter)?;

    if prometheus {
        let exporter = PrometheusExporter::new("vector_client")?;
        client.export_metrics(&exporter)?;
        print!("{}", exporter.gather_text()?);
    } else {
        let output = serde_json::json!({
            "health": report,
            "metrics": client.metrics(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    }

    client.close();
    Ok(report.is_healthy())
}
