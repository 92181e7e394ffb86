//! NFT Minter - two-transaction Metaplex mint pipeline
//!
//! This library exposes the pipeline and its building blocks: key
//! derivation, program address resolution, token-metadata codecs,
//! instruction builders, storage cost estimation, upload and the persisted
//! mint state machine.

pub mod config;
pub mod cost;
pub mod errors;
pub mod metrics;
pub mod observability;
pub mod pda;
pub mod pipeline;
pub mod schema;
pub mod structured_logging;
pub mod test_utils;
pub mod tx_builder;
pub mod types;
pub mod uploader;
pub mod wallet;

// Component modules with non-standard paths (directories with spaces)
#[path = "rpc manager/mod.rs"]
pub mod rpc_manager;

// Re-export commonly used types
pub use errors::MintError;
pub use pipeline::{MintOutcome, MintPipeline, MintRequest, MintStage, PipelineState, PipelineStore};
pub use solana_sdk::{pubkey::Pubkey, signature::Signature};
pub use types::{FileAsset, MetadataRecord};

#[cfg(test)]
mod tests {
    // Include test modules
    mod error_conversion_tests;
    mod instruction_ordering_tests;
    mod pipeline_flow_tests;
    mod test_helpers;
}
