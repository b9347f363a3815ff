//! Rift Resolve CLI Tool
//!
//! Loads an engine configuration and resolves one canonical request against
//! an imposter, printing the response and how it was produced.
//!
//! Usage:
//!   rift-resolve --config imposters.yaml --port 4545 --request request.json
//!   echo '{"method":"GET","path":"/users"}' | rift-resolve -c imposters.yaml -p 4545
//!
//! Proxy responses reach their upstream for real; use `--no-proxy` to fail
//! them instead.

use anyhow::{Context, Result};
use clap::Parser;
use rift_imposter_core::{
    CanonicalRequest, EngineConfig, ExportOptions, HttpProxyBroker, ProxyBroker,
};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Rift Resolve - Run a request through configured imposters
#[derive(Parser, Debug)]
#[command(name = "rift-resolve")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Engine configuration file (YAML or JSON)
    #[arg(short, long, env = "RIFT_CONFIG")]
    config: PathBuf,

    /// Imposter port to resolve against (defaults to the first configured imposter)
    #[arg(short, long)]
    port: Option<u16>,

    /// Canonical request as a JSON file; read from stdin when omitted
    #[arg(short, long)]
    request: Option<PathBuf>,

    /// Do not forward proxy responses
    #[arg(long)]
    no_proxy: bool,

    /// Print the imposter (replayable) after resolving
    #[arg(long)]
    export: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,rift_imposter_core=info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let config = EngineConfig::from_file(&args.config)?;

    let broker: Option<Arc<dyn ProxyBroker>> = if args.no_proxy {
        None
    } else {
        Some(Arc::new(
            HttpProxyBroker::new(config.proxy_timeout()).context("Failed to create proxy broker")?,
        ))
    };
    let registry = config.build_registry(broker)?;

    let port = match args.port {
        Some(port) => port,
        None => registry
            .list()
            .first()
            .map(|imposter| imposter.port())
            .context("No imposters configured")?,
    };
    let imposter = registry.get(port)?;

    let request = read_request(args.request.as_ref())?;
    let resolution = imposter.handle(&request).await?;
    println!("{}", serde_json::to_string_pretty(&resolution)?);

    if args.export {
        let exported = imposter.export(ExportOptions::replayable());
        println!("{}", serde_json::to_string_pretty(&exported)?);
    }
    Ok(())
}

fn read_request(path: Option<&PathBuf>) -> Result<CanonicalRequest> {
    let raw = match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read request file {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read request from stdin")?;
            buffer
        }
    };
    serde_json::from_str(&raw).context("Request must be a JSON object of request fields")
}
