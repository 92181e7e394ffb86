//! Storage cost estimation
//!
//! The Arweave node quotes a price in winston (10^-12 AR) for a byte count;
//! a rate endpoint supplies AR and SOL in USD. The estimate is converted
//! AR -> USD -> SOL -> lamports and rounded up. Estimation runs before any
//! payment instruction exists, so a failure here spends nothing.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::errors::MintError;
use crate::metrics::Timer;
use crate::types::FileAsset;

const WINSTON_PER_AR: f64 = 1e12;
const LAMPORTS_PER_SOL: f64 = 1e9;

/// Default safety margin added on top of the rounded estimate
pub const DEFAULT_MARGIN_LAMPORTS: u64 = 1_000_000;

/// USD prices of the two currencies involved in the conversion
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UsdRates {
    pub ar_usd: f64,
    pub sol_usd: f64,
}

impl UsdRates {
    fn validate(&self) -> Result<(), MintError> {
        for (label, rate) in [("arweave", self.ar_usd), ("solana", self.sol_usd)] {
            if !rate.is_finite() || rate <= 0.0 {
                return Err(MintError::estimation(format!(
                    "Invalid {} rate: {}",
                    label, rate
                )));
            }
        }
        Ok(())
    }
}

/// Source of storage prices and conversion rates
#[async_trait]
pub trait PricingOracle: Send + Sync {
    /// Price in winston for storing `total_bytes`
    async fn storage_price_winston(&self, total_bytes: u64) -> Result<u64, MintError>;

    async fn usd_rates(&self) -> Result<UsdRates, MintError>;
}

/// Result of one estimation
#[derive(Debug, Clone, PartialEq)]
pub struct CostEstimate {
    pub total_bytes: u64,
    pub winston: u64,
    pub rates: UsdRates,
    /// Converted estimate, rounded up
    pub lamports: u64,
    pub margin_lamports: u64,
}

impl CostEstimate {
    /// Amount transferred to the custodian: ceil(estimate) + margin
    pub fn payment_lamports(&self) -> u64 {
        self.lamports.saturating_add(self.margin_lamports)
    }

    pub fn payment_sol(&self) -> f64 {
        self.payment_lamports() as f64 / LAMPORTS_PER_SOL
    }
}

/// Convert a winston quote into lamports, rounding up
pub fn winston_to_lamports(winston: u64, rates: &UsdRates) -> Result<u64, MintError> {
    rates.validate()?;
    let ar = winston as f64 / WINSTON_PER_AR;
    let sol = ar * rates.ar_usd / rates.sol_usd;
    let lamports = (sol * LAMPORTS_PER_SOL).ceil();
    if !lamports.is_finite() || lamports < 0.0 || lamports > u64::MAX as f64 {
        return Err(MintError::estimation(format!(
            "Estimate out of range: {} lamports",
            lamports
        )));
    }
    Ok(lamports as u64)
}

/// Estimates the lamport cost of storing a set of files
#[derive(Clone)]
pub struct CostEstimator {
    oracle: Arc<dyn PricingOracle>,
    margin_lamports: u64,
}

impl CostEstimator {
    pub fn new(oracle: Arc<dyn PricingOracle>) -> Self {
        Self {
            oracle,
            margin_lamports: DEFAULT_MARGIN_LAMPORTS,
        }
    }

    pub fn with_margin(mut self, margin_lamports: u64) -> Self {
        self.margin_lamports = margin_lamports;
        self
    }

    pub async fn estimate(&self, files: &[FileAsset]) -> Result<CostEstimate, MintError> {
        let sizes: Vec<u64> = files.iter().map(FileAsset::size).collect();
        self.estimate_sizes(&sizes).await
    }

    pub async fn estimate_sizes(&self, sizes: &[u64]) -> Result<CostEstimate, MintError> {
        if sizes.is_empty() {
            return Err(MintError::estimation("No files to price"));
        }
        let total_bytes = sizes.iter().copied().fold(0u64, u64::saturating_add);

        let timer = Timer::with_name("estimate_latency_seconds");
        let winston = self.oracle.storage_price_winston(total_bytes).await?;
        let rates = self.oracle.usd_rates().await?;
        timer.finish();

        let lamports = winston_to_lamports(winston, &rates)?;
        debug!(total_bytes, winston, ?rates, lamports, "Storage cost quoted");

        let estimate = CostEstimate {
            total_bytes,
            winston,
            rates,
            lamports,
            margin_lamports: self.margin_lamports,
        };
        info!(
            files = sizes.len(),
            total_bytes,
            payment_lamports = estimate.payment_lamports(),
            "💰 Storage cost estimated"
        );
        Ok(estimate)
    }
}

#[derive(Debug, Deserialize)]
struct UsdQuote {
    usd: f64,
}

#[derive(Debug, Deserialize)]
struct RatesResponse {
    arweave: UsdQuote,
    solana: UsdQuote,
}

/// Oracle backed by the Arweave price endpoint and a USD rate endpoint
pub struct HttpPricingOracle {
    client: reqwest::Client,
    arweave_url: String,
    rates_url: String,
}

impl HttpPricingOracle {
    pub fn new(arweave_url: &str, rates_url: &str, timeout: Duration) -> Result<Self, MintError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MintError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            arweave_url: arweave_url.trim_end_matches('/').to_string(),
            rates_url: rates_url.to_string(),
        })
    }
}

#[async_trait]
impl PricingOracle for HttpPricingOracle {
    async fn storage_price_winston(&self, total_bytes: u64) -> Result<u64, MintError> {
        let url = format!("{}/price/{}", self.arweave_url, total_bytes);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| MintError::estimation(format!("Price request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(MintError::estimation(format!(
                "Price endpoint returned {}",
                response.status()
            )));
        }
        let body = response
            .text()
            .await
            .map_err(|e| MintError::estimation(format!("Price body unreadable: {}", e)))?;
        body.trim()
            .parse::<u64>()
            .map_err(|_| MintError::estimation(format!("Price is not an integer: {:?}", body)))
    }

    async fn usd_rates(&self) -> Result<UsdRates, MintError> {
        let response = self
            .client
            .get(&self.rates_url)
            .send()
            .await
            .map_err(|e| MintError::estimation(format!("Rate request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(MintError::estimation(format!(
                "Rate endpoint returned {}",
                response.status()
            )));
        }
        let rates: RatesResponse = response
            .json()
            .await
            .map_err(|e| MintError::estimation(format!("Rate body undecodable: {}", e)))?;
        let rates = UsdRates {
            ar_usd: rates.arweave.usd,
            sol_usd: rates.solana.usd,
        };
        rates.validate()?;
        Ok(rates)
    }
}
