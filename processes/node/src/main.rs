//! 'main' for the skipchain node process

use anyhow::{Context, Result};
use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use skipchain_common::{KeyPair, Roster, ServerIdentity, VerifierId};
use skipchain_module_identity::{storage::Data, IdentityStore};
use skipchain_module_skipchain::{signing::LocalCollectiveSigner, Skipchain};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Log directives used when `RUST_LOG` is unset or invalid
const DEFAULT_LOG_FILTER: &str = "info,fjall=warn";

#[derive(Debug, clap::Parser)]
struct Args {
    #[arg(long, value_name = "PATH", default_values_t = vec!["node.toml".to_string()])]
    config: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct NodeConfig {
    roster_size: usize,
    identity: String,
    updates: usize,
}

/// `RUST_LOG` if it parsed, the default directives otherwise
fn log_filter<E>(from_env: std::result::Result<EnvFilter, E>) -> EnvFilter {
    from_env.unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// The `name` table of `config` as a configuration of its own
fn section(config: &Config, name: &str) -> Result<Config> {
    let mut builder = Config::builder();
    if let Ok(table) = config.get_table(name) {
        for (key, value) in table {
            builder = builder.set_override(key, value)?;
        }
    }
    Ok(builder.build()?)
}

/// Deterministic local members, one per port from 7770
fn local_roster(size: usize) -> (Vec<KeyPair>, Roster) {
    let keys: Vec<KeyPair> =
        (0..size).map(|member| KeyPair::from_seed(&[member as u8 + 1; 32])).collect();
    let roster = Roster::new(
        keys.iter()
            .enumerate()
            .map(|(member, key)| {
                ServerIdentity::new(key.public(), format!("tcp://127.0.0.1:{}", 7770 + member))
            })
            .collect(),
    );
    (keys, roster)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Get arguments and config
    let args = Args::parse();
    let filter = log_filter(EnvFilter::try_from_default_env());
    tracing_subscriber::fmt().with_env_filter(filter).init();
    let mut builder = Config::builder();
    for file in &args.config {
        builder = builder.add_source(File::with_name(file));
    }
    let config = builder.add_source(Environment::with_prefix("SKIPCHAIN")).build()?;

    info!("Skipchain node process");

    let node: NodeConfig =
        section(&config, "node")?.try_deserialize().context("invalid [node] section")?;
    let (keys, roster) = local_roster(node.roster_size);
    let signer = Arc::new(LocalCollectiveSigner::new(keys));

    let skipchain = Skipchain::from_config(&section(&config, "skipchain")?, signer)?;
    let mut identities = IdentityStore::from_config(&section(&config, "identity")?)?;
    info!(known = identities.storage().identities.len(), "Identity state loaded");

    // Root and intermediate chains, then the identity's data chain under them
    let (root, interm) = skipchain
        .create_root_interm(roster.clone(), roster, vec![VerifierId::none()])
        .await?;
    info!(root = %root.hash, interm = %interm.hash, "Chain hierarchy created");

    let mut data = Data {
        threshold: 1,
        ..Data::default()
    };
    data.storage.insert("name".to_string(), node.identity.clone());
    let (_, genesis) = skipchain
        .create_data(&interm.hash, data.to_payload()?, vec![VerifierId::structure()])
        .await?;

    let mut latest = genesis.clone();
    for update in 1..=node.updates {
        data.storage.insert("update".to_string(), update.to_string());
        latest = skipchain.propose_data(&latest.hash, data.to_payload()?).await?;
    }

    let update_chain = skipchain.get_update_chain(&genesis.hash)?;
    for block in &update_chain {
        info!(
            index = block.index,
            height = block.height,
            hash = %block.hash,
            links = block.forward_links.len(),
            "Update chain"
        );
    }
    let head = update_chain.last().context("empty update chain")?.clone();
    println!("{}", serde_json::to_string_pretty(&Data::from_payload(&head.data)?)?);

    identities.record_block(&node.identity, head)?;
    identities.save()?;

    // Bye!
    info!("Exiting");
    Ok(())
}
