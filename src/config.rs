//! Configuration module for the NFT minter
//!
//! This module handles configuration loading from TOML files and
//! environment variables, and provides structured configuration types.

use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use std::time::Duration;

use crate::cost::DEFAULT_MARGIN_LAMPORTS;
use crate::errors::MintError;
use crate::pipeline::PipelineSettings;
use crate::rpc_manager::parse_commitment;
use crate::uploader::{DEFAULT_CUSTODIAN, DEFAULT_GATEWAY_URL};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Ledger RPC configuration
    #[serde(default)]
    pub rpc: RpcConfig,

    /// Confirmation behaviour of both transactions
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Storage gateway configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Storage price and exchange-rate sources
    #[serde(default)]
    pub pricing: PricingConfig,

    /// Directory holding persisted pipeline runs
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    /// Ledger RPC endpoint
    #[serde(default = "default_rpc_url")]
    pub url: String,

    /// Request timeout in seconds
    #[serde(default = "default_rpc_timeout")]
    pub timeout_secs: u64,

    /// Retries the node performs for a broadcast; unset leaves the node default
    #[serde(default)]
    pub node_max_retries: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Preflight commitment for broadcasts
    #[serde(default = "default_preflight")]
    pub preflight_commitment: String,

    /// Commitment both transactions must reach
    #[serde(default = "default_confirm_commitment")]
    pub confirm_commitment: String,

    /// Confirmation bound in seconds
    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout_secs: u64,

    /// Signature status poll interval in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Upload gateway endpoint
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,

    /// Network tag sent with every upload
    #[serde(default = "default_env")]
    pub env: String,

    /// Account receiving the storage payment
    #[serde(default = "default_custodian")]
    pub custodian: String,

    /// Manifest entry whose transaction id becomes the permanent uri
    #[serde(default = "default_manifest_name")]
    pub manifest_name: String,

    /// Upload timeout in seconds
    #[serde(default = "default_upload_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Arweave node serving `/price/{bytes}`
    #[serde(default = "default_arweave_url")]
    pub arweave_url: String,

    /// Endpoint answering `{"arweave":{"usd":..},"solana":{"usd":..}}`
    #[serde(default = "default_rates_url")]
    pub rates_url: String,

    /// Lamports added on top of the estimate
    #[serde(default = "default_margin")]
    pub margin_lamports: u64,

    /// Request timeout in seconds
    #[serde(default = "default_pricing_timeout")]
    pub timeout_secs: u64,
}

// Default value functions
fn default_rpc_url() -> String { "https://api.devnet.solana.com".to_string() }
fn default_rpc_timeout() -> u64 { 30 }
fn default_preflight() -> String { "confirmed".to_string() }
fn default_confirm_commitment() -> String { "finalized".to_string() }
fn default_confirmation_timeout() -> u64 { 90 }
fn default_poll_interval() -> u64 { 500 }
fn default_gateway_url() -> String { DEFAULT_GATEWAY_URL.to_string() }
fn default_env() -> String { "devnet".to_string() }
fn default_custodian() -> String { DEFAULT_CUSTODIAN.to_string() }
fn default_manifest_name() -> String { crate::uploader::MANIFEST_FILE_NAME.to_string() }
fn default_upload_timeout() -> u64 { 120 }
fn default_arweave_url() -> String { "https://arweave.net".to_string() }
fn default_rates_url() -> String {
    "https://api.coingecko.com/api/v3/simple/price?ids=arweave,solana&vs_currencies=usd".to_string()
}
fn default_margin() -> u64 { DEFAULT_MARGIN_LAMPORTS }
fn default_pricing_timeout() -> u64 { 15 }
fn default_state_dir() -> String { ".nft-minter/state".to_string() }

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: default_rpc_url(),
            timeout_secs: default_rpc_timeout(),
            node_max_retries: None,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            preflight_commitment: default_preflight(),
            confirm_commitment: default_confirm_commitment(),
            confirmation_timeout_secs: default_confirmation_timeout(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            gateway_url: default_gateway_url(),
            env: default_env(),
            custodian: default_custodian(),
            manifest_name: default_manifest_name(),
            timeout_secs: default_upload_timeout(),
        }
    }
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            arweave_url: default_arweave_url(),
            rates_url: default_rates_url(),
            margin_lamports: default_margin(),
            timeout_secs: default_pricing_timeout(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc: RpcConfig::default(),
            pipeline: PipelineConfig::default(),
            storage: StorageConfig::default(),
            pricing: PricingConfig::default(),
            state_dir: default_state_dir(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with `.env` and environment variable overrides
    pub fn from_file_with_env(path: &str) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::from_file(path)?;
        config.apply_env();
        Ok(config)
    }

    /// Defaults with environment variable overrides
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Apply `MINT_RPC_URL`, `MINT_GATEWAY_URL` and `MINT_ENV`
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("MINT_RPC_URL") {
            self.rpc.url = url;
        }
        if let Some(url) = lookup("MINT_GATEWAY_URL") {
            self.storage.gateway_url = url;
        }
        if let Some(env) = lookup("MINT_ENV") {
            self.storage.env = env;
        }
    }

    /// Reject unusable values before anything is contacted
    pub fn validate(&self) -> Result<(), MintError> {
        for (name, url) in [
            ("rpc.url", &self.rpc.url),
            ("storage.gateway_url", &self.storage.gateway_url),
            ("pricing.arweave_url", &self.pricing.arweave_url),
            ("pricing.rates_url", &self.pricing.rates_url),
        ] {
            validate_url(name, url)?;
        }

        for (name, value) in [
            ("rpc.timeout_secs", self.rpc.timeout_secs),
            ("pipeline.confirmation_timeout_secs", self.pipeline.confirmation_timeout_secs),
            ("pipeline.poll_interval_ms", self.pipeline.poll_interval_ms),
            ("storage.timeout_secs", self.storage.timeout_secs),
            ("pricing.timeout_secs", self.pricing.timeout_secs),
        ] {
            if value == 0 {
                return Err(MintError::Config(format!("{} must be greater than zero", name)));
            }
        }

        if self.storage.env.trim().is_empty() {
            return Err(MintError::Config("storage.env must not be empty".to_string()));
        }
        if self.storage.manifest_name.trim().is_empty() {
            return Err(MintError::Config("storage.manifest_name must not be empty".to_string()));
        }
        self.custodian()?;
        self.to_settings()?;
        Ok(())
    }

    pub fn custodian(&self) -> Result<Pubkey, MintError> {
        Pubkey::from_str(&self.storage.custodian).map_err(|e| {
            MintError::Config(format!("storage.custodian {:?}: {}", self.storage.custodian, e))
        })
    }

    /// Pipeline settings derived from the `pipeline` section
    pub fn to_settings(&self) -> Result<PipelineSettings, MintError> {
        let commitment = |name: &str, value: &str| {
            parse_commitment(value)
                .ok_or_else(|| MintError::Config(format!("{}: unknown commitment {:?}", name, value)))
        };
        Ok(PipelineSettings {
            preflight: commitment("pipeline.preflight_commitment", &self.pipeline.preflight_commitment)?,
            confirm_commitment: commitment("pipeline.confirm_commitment", &self.pipeline.confirm_commitment)?,
            confirmation_timeout: Duration::from_secs(self.pipeline.confirmation_timeout_secs),
            poll_interval: Duration::from_millis(self.pipeline.poll_interval_ms),
        })
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc.timeout_secs)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.storage.timeout_secs)
    }

    pub fn pricing_timeout(&self) -> Duration {
        Duration::from_secs(self.pricing.timeout_secs)
    }
}

fn validate_url(name: &str, url: &str) -> Result<(), MintError> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| MintError::Config(format!("{} {:?}: {}", name, url, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(MintError::Config(format!("{}: unsupported scheme {:?}", name, other))),
    }
}
