use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use wilee_cluster::{NodeId, PeerConfig};

/// Wilee - Replicated certificate control plane
#[derive(Parser)]
#[command(name = "wilee")]
#[command(about = "Wilee cluster node and client")]
#[command(version)]
pub struct Cli {
    /// Log verbosity, repeat for more detail
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a cluster node until interrupted
    Serve {
        /// Unique id of this node
        #[arg(long)]
        node_id: NodeId,

        /// Address the rpc endpoint binds to
        #[arg(short, long, default_value = "127.0.0.1:7480")]
        bind: SocketAddr,

        /// Address other members reach this node on
        #[arg(long)]
        advertise: Option<String>,

        /// Peer as `id=host:port`, repeatable
        #[arg(short, long = "peer")]
        peers: Vec<PeerConfig>,

        /// Directory of the certificate store, in memory when unset
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Initialize a cluster of this node and its peers instead of joining
        #[arg(long)]
        bootstrap: bool,

        /// Depth of consensus diagnostics
        #[arg(long, default_value_t = 0)]
        raft_verbosity: u32,
    },

    /// Show node status
    Status {
        /// RPC endpoint
        #[arg(short, long, default_value = "http://127.0.0.1:7480")]
        endpoint: String,
    },

    /// Replicate a certificate for a domain
    Issue {
        /// RPC endpoint
        #[arg(short, long, default_value = "http://127.0.0.1:7480")]
        endpoint: String,

        #[arg(long)]
        domain: String,

        /// Certificate file (PEM or DER)
        #[arg(short, long)]
        file: PathBuf,

        /// Start of validity, unix seconds
        #[arg(long)]
        not_before: u64,

        /// End of validity, unix seconds
        #[arg(long)]
        not_after: u64,
    },

    /// Remove the certificate of a domain
    Revoke {
        /// RPC endpoint
        #[arg(short, long, default_value = "http://127.0.0.1:7480")]
        endpoint: String,

        #[arg(long)]
        domain: String,
    },
}
