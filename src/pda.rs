//! Program-derived address resolution
//!
//! Derivations are pure functions of (seeds, program id). Each pipeline
//! carries an [`AddressCache`] so repeated lookups inside one run return the
//! exact same value without re-probing; separate pipelines may share a cache
//! behind an `Arc` since entries never change once written.

use dashmap::DashMap;
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;

use crate::tx_builder::TransactionBuilderError;

/// Well-known program identifiers
pub mod program_ids {
    use solana_sdk::pubkey::Pubkey;

    pub const TOKEN_METADATA: Pubkey =
        solana_sdk::pubkey!("metaqbxxUerdq28cj1RbAWkYQm3ybzjb6a8bt518x1s");
    pub const MEMO: Pubkey = solana_sdk::pubkey!("MemoSq4gqABAXKb96qnH8TysNcWxMyWCqXgDLGmfcHr");

    pub fn token() -> Pubkey {
        spl_token::id()
    }

    pub fn associated_token() -> Pubkey {
        spl_associated_token_account::id()
    }
}

const METADATA_PREFIX: &[u8] = b"metadata";
const EDITION_SUFFIX: &[u8] = b"edition";

/// Derived address plus the bump seed that pushed it off the curve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramAddress {
    pub address: Pubkey,
    pub bump: u8,
}

type CacheKey = (Pubkey, Vec<Vec<u8>>);

/// Memo of derivations for one run
#[derive(Debug, Default)]
pub struct AddressCache {
    entries: DashMap<CacheKey, ProgramAddress>,
}

impl AddressCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resolves program addresses through an explicit cache
#[derive(Debug, Clone)]
pub struct ProgramAddressResolver {
    cache: Arc<AddressCache>,
}

impl ProgramAddressResolver {
    pub fn new(cache: Arc<AddressCache>) -> Self {
        Self { cache }
    }

    /// Resolver with a private cache
    pub fn isolated() -> Self {
        Self::new(Arc::new(AddressCache::new()))
    }

    pub fn cache(&self) -> &Arc<AddressCache> {
        &self.cache
    }

    /// Find the first off-curve address, probing bumps from 255 downward
    pub fn resolve(
        &self,
        seeds: &[&[u8]],
        program_id: &Pubkey,
    ) -> Result<ProgramAddress, TransactionBuilderError> {
        let key: CacheKey = (*program_id, seeds.iter().map(|s| s.to_vec()).collect());
        if let Some(hit) = self.cache.entries.get(&key) {
            return Ok(*hit);
        }

        let derived = find_bump(seeds, program_id)?;
        // A concurrent writer can only have stored the same value
        let entry = *self.cache.entries.entry(key).or_insert(derived);
        Ok(entry)
    }

    /// Metadata account for a mint: `["metadata", metadata_program, mint]`
    pub fn metadata(&self, mint: &Pubkey) -> Result<ProgramAddress, TransactionBuilderError> {
        let program = program_ids::TOKEN_METADATA;
        self.resolve(
            &[METADATA_PREFIX, program.as_ref(), mint.as_ref()],
            &program,
        )
    }

    /// Master edition account: `["metadata", metadata_program, mint, "edition"]`
    pub fn master_edition(&self, mint: &Pubkey) -> Result<ProgramAddress, TransactionBuilderError> {
        let program = program_ids::TOKEN_METADATA;
        self.resolve(
            &[
                METADATA_PREFIX,
                program.as_ref(),
                mint.as_ref(),
                EDITION_SUFFIX,
            ],
            &program,
        )
    }

    /// Canonical token account of `owner` for `mint`
    pub fn associated_token(
        &self,
        owner: &Pubkey,
        mint: &Pubkey,
    ) -> Result<ProgramAddress, TransactionBuilderError> {
        let token_program = program_ids::token();
        self.resolve(
            &[owner.as_ref(), token_program.as_ref(), mint.as_ref()],
            &program_ids::associated_token(),
        )
    }
}

fn find_bump(seeds: &[&[u8]], program_id: &Pubkey) -> Result<ProgramAddress, TransactionBuilderError> {
    for bump in (0..=u8::MAX).rev() {
        let bump_seed = [bump];
        let mut with_bump: Vec<&[u8]> = Vec::with_capacity(seeds.len() + 1);
        with_bump.extend_from_slice(seeds);
        with_bump.push(&bump_seed);

        match Pubkey::create_program_address(&with_bump, program_id) {
            Ok(address) => return Ok(ProgramAddress { address, bump }),
            // On-curve, try the next bump
            Err(solana_sdk::pubkey::PubkeyError::InvalidSeeds) => continue,
            Err(e) => {
                return Err(TransactionBuilderError::AddressDerivation {
                    program: program_id.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    Err(TransactionBuilderError::AddressDerivation {
        program: program_id.to_string(),
        reason: "no bump seed produced an off-curve address".to_string(),
    })
}
