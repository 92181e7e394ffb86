#![allow(dead_code)]
//! Test Helper Utilities
//!
//! Shared fixtures for the pipeline tests:
//! - a harness wiring the in-memory ledger, oracle and gateway
//! - fast confirmation settings
//! - a sample mint request

use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signer},
};
use std::sync::Arc;
use std::time::Duration;

use crate::cost::CostEstimator;
use crate::pipeline::{MintPipeline, MintRequest, PipelineSettings, PipelineState};
use crate::test_utils::{MockGateway, MockLedger, MockOracle};
use crate::types::{FileAsset, MetadataRecord};
use crate::uploader::StorageUploader;

/// 2 AR at $10 with SOL at $20: exactly 1 SOL before the margin
pub const SAMPLE_WINSTON: u64 = 2_000_000_000_000;
pub const SAMPLE_PAYMENT: u64 = 1_000_000_000 + crate::cost::DEFAULT_MARGIN_LAMPORTS;

pub struct Harness {
    pub ledger: Arc<MockLedger>,
    pub oracle: Arc<MockOracle>,
    pub gateway: Arc<MockGateway>,
    pub payer: Keypair,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_oracle(MockOracle::new(SAMPLE_WINSTON, 10.0, 20.0))
    }

    pub fn with_oracle(oracle: MockOracle) -> Self {
        Self {
            ledger: Arc::new(MockLedger::new()),
            oracle: Arc::new(oracle),
            gateway: Arc::new(MockGateway::new()),
            payer: Keypair::new(),
        }
    }

    pub fn pipeline(&self) -> MintPipeline {
        MintPipeline::new(
            self.ledger.clone(),
            CostEstimator::new(self.oracle.clone()),
            StorageUploader::new(self.gateway.clone(), "devnet"),
        )
        .with_settings(fast_settings())
    }

    pub fn state(&self, run_id: &str) -> PipelineState {
        PipelineState::new(run_id, self.payer.pubkey(), sample_request(&self.payer.pubkey()))
    }
}

pub fn fast_settings() -> PipelineSettings {
    PipelineSettings {
        confirmation_timeout: Duration::from_millis(200),
        poll_interval: Duration::from_millis(5),
        ..PipelineSettings::default()
    }
}

/// 10 KiB image, 20% royalty, the payer as sole creator
pub fn sample_request(creator: &Pubkey) -> MintRequest {
    let record = MetadataRecord::new("Sunrise", "SUN", 2000)
        .with_description("First light over the ridge")
        .with_creator(*creator, 100, true);
    MintRequest::new(
        record,
        vec![FileAsset::from_bytes("sunrise.png", "image/png", vec![7u8; 10 * 1024])],
    )
}
