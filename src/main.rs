//! NFT Minter
//!
//! Command line front end for the mint pipeline.
//!
//! ## Commands
//!
//! - **wallet**: derive the payer from a seed phrase, show address and balance
//! - **estimate**: storage cost of a set of files
//! - **mint**: run the full two-transaction pipeline for an image
//! - **resume**: continue a persisted run by id
//! - **runs**: list persisted runs

// Compiler warning configuration
#![deny(unused_imports)]
#![deny(unused_mut)]
#![deny(unused_variables)]
#![warn(dead_code)]
#![warn(unused_must_use)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nft_minter::config::Config;
use nft_minter::cost::{CostEstimator, HttpPricingOracle};
use nft_minter::metrics;
use nft_minter::pipeline::{MintPipeline, MintRequest, PipelineStore};
use nft_minter::rpc_manager::{LedgerRpc, SolanaRpc};
use nft_minter::types::{FileAsset, MetadataRecord};
use nft_minter::uploader::{HttpStorageGateway, StorageUploader};
use nft_minter::wallet::{KeyDeriver, WalletManager};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Print Prometheus metrics when the command finishes
    #[arg(long)]
    print_metrics: bool,

    #[command(flatten)]
    key: KeyArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug)]
struct KeyArgs {
    /// BIP-39 seed phrase of the payer
    #[arg(long, env = "MINT_SEED_PHRASE", hide_env_values = true, global = true)]
    phrase: Option<String>,

    /// Optional BIP-39 passphrase
    #[arg(long, env = "MINT_SEED_PASSPHRASE", hide_env_values = true, global = true)]
    passphrase: Option<String>,

    /// Keypair file used instead of a seed phrase
    #[arg(long, global = true)]
    keypair: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the payer address and balance
    Wallet,

    /// Estimate the storage payment for files
    Estimate {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Mint an image as a unique NFT
    Mint {
        /// Image file; becomes the `image` of the metadata document
        #[arg(long)]
        image: PathBuf,

        /// Additional files listed under `properties.files`
        #[arg(long = "file")]
        extra_files: Vec<PathBuf>,

        #[arg(long)]
        name: String,

        #[arg(long, default_value = "")]
        symbol: String,

        #[arg(long, default_value = "")]
        description: String,

        /// Royalty in basis points
        #[arg(long, default_value_t = 0)]
        seller_fee_basis_points: u16,

        /// Print cap for the master edition (omitted: unique)
        #[arg(long)]
        max_supply: Option<u64>,

        /// Freeze the metadata after minting
        #[arg(long)]
        immutable: bool,
    },

    /// Continue a persisted run
    Resume {
        run_id: String,
    },

    /// List persisted runs
    Runs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose, args.json_logs)?;
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;
    config.validate().context("Invalid configuration")?;

    let result = run_command(&args, &config).await;

    if args.print_metrics {
        println!("{}", metrics::metrics().render()?);
    }
    result
}

async fn run_command(args: &Args, config: &Config) -> Result<()> {
    match &args.command {
        Command::Wallet => {
            let wallet = load_wallet(&args.key)?;
            let rpc = build_rpc(config);
            let summary = wallet.summary(rpc.as_ref()).await?;
            println!("address: {}", summary.address);
            println!("balance: {:.9} SOL", summary.sol());
        }
        Command::Estimate { files } => {
            let assets = read_assets(files)?;
            let estimate = build_estimator(config)?.estimate(&assets).await?;
            println!("bytes:    {}", estimate.total_bytes);
            println!("winston:  {}", estimate.winston);
            println!("lamports: {}", estimate.payment_lamports());
            println!("SOL:      {:.9}", estimate.payment_sol());
        }
        Command::Mint {
            image,
            extra_files,
            name,
            symbol,
            description,
            seller_fee_basis_points,
            max_supply,
            immutable,
        } => {
            let wallet = load_wallet(&args.key)?;
            let mut paths = vec![image.clone()];
            paths.extend(extra_files.iter().cloned());
            let assets = read_assets(&paths)?;

            let record = MetadataRecord::new(name.as_str(), symbol.as_str(), *seller_fee_basis_points)
                .with_description(description.as_str())
                .with_creator(wallet.pubkey(), 100, true);
            let mut request = MintRequest::new(record, assets);
            request.max_supply = *max_supply;
            request.is_mutable = !immutable;

            let pipeline = build_pipeline(config)?;
            let outcome = pipeline.run(wallet.keypair(), request).await;
            println!("{}", outcome);
            if !outcome.is_success() {
                anyhow::bail!("Mint did not complete; resume with `resume {}`", outcome.run_id());
            }
        }
        Command::Resume { run_id } => {
            let wallet = load_wallet(&args.key)?;
            let pipeline = build_pipeline(config)?;
            let outcome = pipeline.resume(wallet.keypair(), run_id).await?;
            println!("{}", outcome);
            if !outcome.is_success() {
                anyhow::bail!("Run {} is still incomplete", run_id);
            }
        }
        Command::Runs => {
            let store = PipelineStore::open(&config.state_dir)?;
            for (run_id, stage) in store.list()? {
                println!("{}  {}", run_id, stage);
            }
        }
    }
    Ok(())
}

/// Initialize logging subsystem
fn init_logging(verbose: bool, json: bool) -> Result<()> {
    let env_filter = if verbose {
        "nft_minter=debug,info"
    } else {
        "nft_minter=info,warn,error"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| env_filter.into());

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init();
    }

    Ok(())
}

/// Load configuration from file with fallback to defaults
fn load_config(path: &str) -> Result<Config> {
    if std::path::Path::new(path).exists() {
        Config::from_file_with_env(path)
            .with_context(|| format!("Failed to load config from {}", path))
    } else {
        warn!("Config file '{}' not found, using defaults", path);
        Ok(Config::from_env())
    }
}

fn load_wallet(key: &KeyArgs) -> Result<WalletManager> {
    if let Some(path) = &key.keypair {
        return WalletManager::from_file(path).context("Failed to load wallet");
    }
    let phrase = key
        .phrase
        .as_deref()
        .context("A seed phrase (--phrase or MINT_SEED_PHRASE) or --keypair is required")?;
    let mut deriver = KeyDeriver::default();
    if let Some(passphrase) = &key.passphrase {
        deriver = deriver.with_passphrase(passphrase.as_str());
    }
    let wallet = WalletManager::from_phrase(phrase, &deriver)?;
    info!(payer = %wallet.pubkey(), "Wallet derived");
    Ok(wallet)
}

fn read_assets(paths: &[PathBuf]) -> Result<Vec<FileAsset>> {
    paths
        .iter()
        .map(|p| FileAsset::from_path(p).with_context(|| format!("Failed to read {}", p.display())))
        .collect()
}

fn build_rpc(config: &Config) -> Arc<dyn LedgerRpc> {
    let commitment = nft_minter::rpc_manager::parse_commitment(&config.pipeline.confirm_commitment)
        .unwrap_or_default();
    Arc::new(
        SolanaRpc::new(&config.rpc.url, config.rpc_timeout(), commitment)
            .with_node_max_retries(config.rpc.node_max_retries),
    )
}

fn build_estimator(config: &Config) -> Result<CostEstimator> {
    let oracle = HttpPricingOracle::new(
        &config.pricing.arweave_url,
        &config.pricing.rates_url,
        config.pricing_timeout(),
    )?;
    Ok(CostEstimator::new(Arc::new(oracle)).with_margin(config.pricing.margin_lamports))
}

fn build_pipeline(config: &Config) -> Result<MintPipeline> {
    let gateway = HttpStorageGateway::new(&config.storage.gateway_url, config.upload_timeout())?;
    let uploader = StorageUploader::new(Arc::new(gateway), &config.storage.env)
        .with_custodian(config.custodian()?)
        .with_manifest_name(&config.storage.manifest_name);
    let store = PipelineStore::open(&config.state_dir)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received shutdown signal, cancelling");
            on_signal.cancel();
        }
    });

    Ok(MintPipeline::new(build_rpc(config), build_estimator(config)?, uploader)
        .with_store(store)
        .with_settings(config.to_settings()?)
        .with_cancellation(cancel))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mint_command() {
        let args = Args::try_parse_from([
            "nft-minter",
            "--phrase",
            "abandon abandon",
            "mint",
            "--image",
            "a.png",
            "--name",
            "Sunrise",
            "--seller-fee-basis-points",
            "2000",
        ])
        .unwrap();

        match args.command {
            Command::Mint {
                name,
                seller_fee_basis_points,
                max_supply,
                immutable,
                ..
            } => {
                assert_eq!(name, "Sunrise");
                assert_eq!(seller_fee_basis_points, 2000);
                assert_eq!(max_supply, None);
                assert!(!immutable);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(build_estimator(&config).is_ok());
    }
}
