//! Transaction building for the mint flow
//!
//! ## Architecture
//!
//! - **errors**: local, deterministic build failures
//! - **context**: the ordered instruction/signer accumulator
//! - **instructions**: one builder per instruction kind
//! - **assembler**: signing, single broadcast and bounded confirmation
//!
//! Builders are pure: the same inputs always produce the same instructions,
//! and nothing touches the network until [`TransactionAssembler::submit`].
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use nft_minter::pda::ProgramAddressResolver;
//! use nft_minter::tx_builder::{instructions, InstructionBatch, MetadataAuthorities};
//! use nft_minter::types::MetadataRecord;
//! use solana_sdk::{pubkey::Pubkey, signature::{Keypair, Signer}};
//!
//! # fn example() -> Result<(), nft_minter::tx_builder::TransactionBuilderError> {
//! let payer = Pubkey::new_unique();
//! let mint = Keypair::new();
//! let mint_key = mint.pubkey();
//! let resolver = ProgramAddressResolver::isolated();
//! let record = MetadataRecord::new("Sunrise", "SUN", 500).with_creator(payer, 100, true);
//!
//! let batch = instructions::create_mint_account(InstructionBatch::new(), &payer, mint, 1_461_600);
//! let batch = instructions::initialize_mint(batch, &mint_key, &payer)?;
//! let batch = instructions::create_metadata_account_v2(
//!     batch,
//!     &resolver,
//!     &MetadataAuthorities::single(mint_key, payer),
//!     &record,
//!     true,
//! )?;
//! assert_eq!(batch.len(), 3);
//! # Ok(())
//! # }
//! ```

pub mod assembler;
pub mod context;
pub mod errors;
pub mod instructions;

pub use assembler::{SubmitOptions, SubmittedTransaction, TransactionAssembler};
pub use context::InstructionBatch;
pub use errors::TransactionBuilderError;
pub use instructions::{MetadataAuthorities, MetadataUpdate};
