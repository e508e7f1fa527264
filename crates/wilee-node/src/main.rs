use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;
use wilee_cluster::{
    ClusterConfig, ConsensusNode, Logger, NodeId, PeerConfig, Settings, TracingLogger,
};
use wilee_core::CertificateOperation;

mod cli;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    FmtSubscriber::builder()
        .with_max_level(max_level(cli.verbose))
        .with_target(false)
        .init();

    match cli.command {
        Commands::Serve {
            node_id,
            bind,
            advertise,
            peers,
            data_dir,
            bootstrap,
            raft_verbosity,
        } => {
            let config = ServeArgs {
                node_id,
                bind,
                advertise,
                peers,
                data_dir,
                bootstrap,
                raft_verbosity,
                verbose: cli.verbose,
            }
            .into_config()?;
            run_node(config).await?;
        }
        Commands::Status { endpoint } => {
            show_status(&endpoint).await?;
        }
        Commands::Issue {
            endpoint,
            domain,
            file,
            not_before,
            not_after,
        } => {
            let certificate = std::fs::read(&file)
                .with_context(|| format!("reading certificate {}", file.display()))?;
            let op = CertificateOperation::issue(domain, certificate, not_before, not_after);
            submit_operation(&endpoint, &op).await?;
        }
        Commands::Revoke { endpoint, domain } => {
            submit_operation(&endpoint, &CertificateOperation::revoke(domain)).await?;
        }
    }

    Ok(())
}

/// Base level is ERROR; each -v lowers it one step down to DEBUG
fn max_level(verbose: u8) -> Level {
    match verbose {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        _ => Level::DEBUG,
    }
}

struct ServeArgs {
    node_id: NodeId,
    bind: SocketAddr,
    advertise: Option<String>,
    peers: Vec<PeerConfig>,
    data_dir: Option<PathBuf>,
    bootstrap: bool,
    raft_verbosity: u32,
    verbose: u8,
}

impl ServeArgs {
    fn into_config(self) -> Result<ClusterConfig> {
        let threshold = match self.verbose {
            0 | 1 => wilee_cluster::Level::Warn,
            2 => wilee_cluster::Level::Info,
            _ => wilee_cluster::Level::Debug,
        };

        let mut config = ClusterConfig::new(self.node_id);
        config.logger = Logger::new(Arc::new(TracingLogger::new(threshold)))
            .with_verbosity(self.raft_verbosity)
            .with_verbosity_field("v");
        config.bind_addr = Some(self.bind);
        config.advertise_addr = self.advertise;
        config.peers = self.peers;
        config.storage_root = self.data_dir;
        config.bootstrap = self.bootstrap;
        config.set_defaults()?;
        config.validate()?;
        Ok(config)
    }
}

/// Run a node until ctrl-c
async fn run_node(config: ClusterConfig) -> Result<()> {
    if let Some(root) = &config.storage_root {
        std::fs::create_dir_all(root)
            .with_context(|| format!("creating data directory {}", root.display()))?;
    }

    let mut node = ConsensusNode::new(config).await?;
    node.start().await?;
    info!(
        "Node {} started on {}",
        node.id(),
        node.local_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_default()
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    node.shutdown().await?;

    Ok(())
}

/// Show node status
async fn show_status(endpoint: &str) -> Result<()> {
    let url = format!("{}/cluster/status", endpoint.trim_end_matches('/'));

    let response = reqwest::get(&url).await?;

    if response.status().is_success() {
        let status: serde_json::Value = response.json().await?;
        println!("Node Status:");
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        error!("Failed to get status: {}", response.status());
    }

    Ok(())
}

/// Submit a certificate operation to the leader
async fn submit_operation(endpoint: &str, op: &CertificateOperation) -> Result<()> {
    op.validate()?;
    let url = format!("{}/cluster/write", endpoint.trim_end_matches('/'));

    let client = reqwest::Client::new();
    let response = client.post(&url).json(op).send().await?;

    if response.status().is_success() {
        let result: serde_json::Value = response.json().await?;
        println!("Committed {}:", op);
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        let status = response.status();
        let error: serde_json::Value = response.json().await?;
        error!("Failed to submit {}: {}", op, status);
        println!("{}", serde_json::to_string_pretty(&error)?);
    }

    Ok(())
}
