//! shardplan — administrative driver for topology mutations.
//!
//! Operates on a local registry file, exposing the topology operations as
//! subcommands:
//!
//! ```text
//! shardplan --registry ./cluster.redb configure --primary DBServer1 --secondary DBServer2
//! shardplan --registry ./cluster.redb get-secondary --primary DBServer1
//! shardplan --registry ./cluster.redb replace-secondary \
//!     --primary DBServer1 --old-secondary DBServer2 --new-secondary DBServer3
//! shardplan --registry ./cluster.redb swap --primary DBServer1 --secondary DBServer2
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::json;
use shardplan_registry::{LocalRegistry, Registry};
use shardplan_topology::{
    MutationOptions, TopologyMutator, TopologyReader, dbserver_key,
};
use tracing::info;

#[derive(Parser)]
#[command(name = "shardplan", about = "Cluster topology administration", version)]
struct Cli {
    /// Path to the registry database file.
    #[arg(long, default_value = "./shardplan.redb")]
    registry: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the current secondary of a primary.
    GetSecondary {
        #[arg(long)]
        primary: String,
        /// Lock acquisition timeout in seconds.
        #[arg(long, default_value = "60")]
        timeout: u64,
    },
    /// Replace the secondary of a primary (compare-and-set on the old value).
    ReplaceSecondary {
        #[arg(long)]
        primary: String,
        #[arg(long)]
        old_secondary: String,
        #[arg(long)]
        new_secondary: String,
        /// Write-lock time to live in seconds.
        #[arg(long, default_value = "60")]
        ttl: u64,
        /// Lock acquisition timeout in seconds.
        #[arg(long, default_value = "60")]
        timeout: u64,
    },
    /// Swap the roles of a primary/secondary pair, repointing its shards.
    Swap {
        #[arg(long)]
        primary: String,
        #[arg(long)]
        secondary: String,
        /// Write-lock time to live in seconds.
        #[arg(long, default_value = "60")]
        ttl: u64,
        /// Lock acquisition timeout in seconds.
        #[arg(long, default_value = "60")]
        timeout: u64,
    },
    /// Seed a primary→secondary mapping (development convenience).
    Configure {
        #[arg(long)]
        primary: String,
        #[arg(long)]
        secondary: String,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shardplan=info".parse().expect("static filter")),
        )
        .init();

    let cli = Cli::parse();
    let registry = LocalRegistry::open(&cli.registry)?;
    info!(registry = ?cli.registry, "registry opened");

    match cli.command {
        Command::GetSecondary { primary, timeout } => {
            let reader = TopologyReader::new(registry);
            let info = reader.get_secondary(&primary, Duration::from_secs(timeout))?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Command::ReplaceSecondary {
            primary,
            old_secondary,
            new_secondary,
            ttl,
            timeout,
        } => {
            let mutator = TopologyMutator::new(registry);
            let opts = MutationOptions {
                ttl: Duration::from_secs(ttl),
                timeout: Duration::from_secs(timeout),
            };
            let info = mutator.replace_secondary(&primary, &old_secondary, &new_secondary, opts)?;
            info!(%primary, old = %old_secondary, new = %new_secondary, "secondary replaced");
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Command::Swap {
            primary,
            secondary,
            ttl,
            timeout,
        } => {
            let mutator = TopologyMutator::new(registry);
            let opts = MutationOptions {
                ttl: Duration::from_secs(ttl),
                timeout: Duration::from_secs(timeout),
            };
            let outcome = mutator.swap_primary_and_secondary(&primary, &secondary, opts)?;
            info!(new_primary = %outcome.primary, new_secondary = %outcome.secondary, "roles swapped");
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::Configure { primary, secondary } => {
            registry.set(&dbserver_key(&primary), &json!(secondary), None)?;
            println!("configured {primary} -> {secondary}");
        }
    }

    Ok(())
}
