//! Instruction builders for the mint flow
//!
//! One function per instruction kind. Each takes the accumulator by value,
//! appends exactly one instruction and returns it. Account lists follow the
//! receiving program's expected order; a wrong order or flag is only caught
//! by the ledger, so the layouts are pinned by tests below.
//!
//! Transaction 1 order:
//! 1. storage payment transfer + one memo per file
//! 2. create mint account
//! 3. initialize mint
//! 4. create associated token account
//! 5. create metadata account (placeholder uri)
//!
//! Transaction 2 order:
//! 1. update metadata account (final uri)
//! 2. mint one token
//! 3. create master edition

use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    signature::{Keypair, Signer},
    system_program, sysvar,
};
use spl_token::solana_program::program_pack::Pack;

use crate::pda::{program_ids, ProgramAddressResolver};
use crate::schema::{
    self, CreateMasterEditionArgs, CreateMetadataAccountArgsV2, UpdateMetadataAccountArgsV2,
};
use crate::tx_builder::context::InstructionBatch;
use crate::tx_builder::errors::TransactionBuilderError;
use crate::types::MetadataRecord;

/// Size of an SPL mint account
pub const MINT_ACCOUNT_LEN: usize = spl_token::state::Mint::LEN;

/// Allocate a mint account funded with its rent-exempt balance
///
/// `mint` is the freshly generated (or, on resume, restored) account keypair;
/// it becomes an auxiliary signer of the batch.
pub fn create_mint_account(
    batch: InstructionBatch,
    payer: &Pubkey,
    mint: Keypair,
    rent_lamports: u64,
) -> InstructionBatch {
    #[allow(deprecated)]
    let ix = solana_sdk::system_instruction::create_account(
        payer,
        &mint.pubkey(),
        rent_lamports,
        MINT_ACCOUNT_LEN as u64,
        &program_ids::token(),
    );
    batch.push_signed(ix, mint)
}

/// Zero decimals, mint and freeze authority both `authority`
pub fn initialize_mint(
    batch: InstructionBatch,
    mint: &Pubkey,
    authority: &Pubkey,
) -> Result<InstructionBatch, TransactionBuilderError> {
    let ix = spl_token::instruction::initialize_mint(
        &program_ids::token(),
        mint,
        authority,
        Some(authority),
        0,
    )
    .map_err(|e| TransactionBuilderError::instruction_failed("spl_token", e.to_string()))?;
    Ok(batch.push(ix))
}

/// Create the canonical token account of `owner` for `mint`
pub fn create_associated_token_account(
    batch: InstructionBatch,
    resolver: &ProgramAddressResolver,
    payer: &Pubkey,
    owner: &Pubkey,
    mint: &Pubkey,
) -> Result<InstructionBatch, TransactionBuilderError> {
    let ata = resolver.associated_token(owner, mint)?;
    let ix = Instruction {
        program_id: program_ids::associated_token(),
        accounts: vec![
            AccountMeta::new(*payer, true),
            AccountMeta::new(ata.address, false),
            AccountMeta::new_readonly(*owner, false),
            AccountMeta::new_readonly(*mint, false),
            AccountMeta::new_readonly(system_program::id(), false),
            AccountMeta::new_readonly(program_ids::token(), false),
        ],
        // AssociatedTokenAccountInstruction::Create
        data: vec![0],
    };
    Ok(batch.push(ix))
}

/// Keys involved in creating metadata and the master edition
#[derive(Debug, Clone, Copy)]
pub struct MetadataAuthorities {
    pub mint: Pubkey,
    pub mint_authority: Pubkey,
    pub payer: Pubkey,
    pub update_authority: Pubkey,
}

impl MetadataAuthorities {
    /// The payer holds every authority, as in a self-minted token
    pub fn single(mint: Pubkey, payer: Pubkey) -> Self {
        Self {
            mint,
            mint_authority: payer,
            payer,
            update_authority: payer,
        }
    }
}

/// Create the metadata account for a mint
///
/// The record is validated first; invalid creator shares never reach an
/// instruction.
pub fn create_metadata_account_v2(
    batch: InstructionBatch,
    resolver: &ProgramAddressResolver,
    keys: &MetadataAuthorities,
    record: &MetadataRecord,
    is_mutable: bool,
) -> Result<InstructionBatch, TransactionBuilderError> {
    record.validate()?;
    let metadata = resolver.metadata(&keys.mint)?;
    let data = schema::encode_instruction(&CreateMetadataAccountArgsV2 {
        data: record.to_data_v2(),
        is_mutable,
    })?;

    let ix = Instruction {
        program_id: program_ids::TOKEN_METADATA,
        accounts: vec![
            AccountMeta::new(metadata.address, false),
            AccountMeta::new_readonly(keys.mint, false),
            AccountMeta::new_readonly(keys.mint_authority, true),
            AccountMeta::new(keys.payer, true),
            AccountMeta::new_readonly(keys.update_authority, true),
            AccountMeta::new_readonly(system_program::id(), false),
            AccountMeta::new_readonly(sysvar::rent::id(), false),
        ],
        data,
    };
    Ok(batch.push(ix))
}

/// Changes applied by UpdateMetadataAccountV2; `None` leaves a field untouched
#[derive(Debug, Clone, Default)]
pub struct MetadataUpdate {
    pub data: Option<MetadataRecord>,
    pub new_update_authority: Option<Pubkey>,
    pub primary_sale_happened: Option<bool>,
    pub is_mutable: Option<bool>,
}

impl MetadataUpdate {
    pub fn with_record(record: MetadataRecord) -> Self {
        Self {
            data: Some(record),
            ..Self::default()
        }
    }
}

pub fn update_metadata_account_v2(
    batch: InstructionBatch,
    resolver: &ProgramAddressResolver,
    mint: &Pubkey,
    update_authority: &Pubkey,
    update: &MetadataUpdate,
) -> Result<InstructionBatch, TransactionBuilderError> {
    if let Some(record) = &update.data {
        record.validate()?;
    }
    let metadata = resolver.metadata(mint)?;
    let data = schema::encode_instruction(&UpdateMetadataAccountArgsV2 {
        data: update.data.as_ref().map(MetadataRecord::to_data_v2),
        update_authority: update.new_update_authority,
        primary_sale_happened: update.primary_sale_happened,
        is_mutable: update.is_mutable,
    })?;

    let ix = Instruction {
        program_id: program_ids::TOKEN_METADATA,
        accounts: vec![
            AccountMeta::new(metadata.address, false),
            AccountMeta::new_readonly(*update_authority, true),
        ],
        data,
    };
    Ok(batch.push(ix))
}

/// Mint exactly one token into the owner's associated account
pub fn mint_one(
    batch: InstructionBatch,
    resolver: &ProgramAddressResolver,
    mint: &Pubkey,
    owner: &Pubkey,
    mint_authority: &Pubkey,
) -> Result<InstructionBatch, TransactionBuilderError> {
    let destination = resolver.associated_token(owner, mint)?;
    let ix = spl_token::instruction::mint_to(
        &program_ids::token(),
        mint,
        &destination.address,
        mint_authority,
        &[],
        1,
    )
    .map_err(|e| TransactionBuilderError::instruction_failed("spl_token", e.to_string()))?;
    Ok(batch.push(ix))
}

/// Create the master edition, capping prints at `max_supply`
///
/// `None` and `Some(0)` both produce a unique token (`Some(0)` on the wire);
/// the program itself would read `None` as unlimited.
pub fn create_master_edition_v3(
    batch: InstructionBatch,
    resolver: &ProgramAddressResolver,
    keys: &MetadataAuthorities,
    max_supply: Option<u64>,
) -> Result<InstructionBatch, TransactionBuilderError> {
    let edition = resolver.master_edition(&keys.mint)?;
    let metadata = resolver.metadata(&keys.mint)?;
    let data = schema::encode_instruction(&CreateMasterEditionArgs {
        max_supply: Some(max_supply.unwrap_or(0)),
    })?;

    let ix = Instruction {
        program_id: program_ids::TOKEN_METADATA,
        accounts: vec![
            AccountMeta::new(edition.address, false),
            AccountMeta::new(keys.mint, false),
            AccountMeta::new_readonly(keys.update_authority, true),
            AccountMeta::new_readonly(keys.mint_authority, true),
            AccountMeta::new(keys.payer, true),
            AccountMeta::new(metadata.address, false),
            AccountMeta::new_readonly(program_ids::token(), false),
            AccountMeta::new_readonly(system_program::id(), false),
            AccountMeta::new_readonly(sysvar::rent::id(), false),
        ],
        data,
    };
    Ok(batch.push(ix))
}

/// Transfer the storage payment to the custodian
pub fn storage_payment(
    batch: InstructionBatch,
    payer: &Pubkey,
    custodian: &Pubkey,
    lamports: u64,
) -> InstructionBatch {
    #[allow(deprecated)]
    let ix = solana_sdk::system_instruction::transfer(payer, custodian, lamports);
    batch.push(ix)
}

/// Attach a content fingerprint as a memo
pub fn content_memo(
    batch: InstructionBatch,
    digest_hex: &str,
) -> Result<InstructionBatch, TransactionBuilderError> {
    if digest_hex.is_empty() {
        return Err(TransactionBuilderError::instruction_failed(
            "memo",
            "empty content digest",
        ));
    }
    Ok(batch.push(Instruction {
        program_id: program_ids::MEMO,
        accounts: vec![],
        data: digest_hex.as_bytes().to_vec(),
    }))
}

/// Validate that the mint is created and initialized before anything uses it
///
/// Checks, for the first `create_account` whose new account is later
/// initialized as a mint:
/// - the create precedes the initialize
/// - no token, associated-token or metadata instruction references the mint
///   before it is initialized
#[cfg(debug_assertions)]
pub fn sanity_check_mint_order(instructions: &[Instruction]) -> Result<(), TransactionBuilderError> {
    if instructions.is_empty() {
        return Err(TransactionBuilderError::invalid_order(
            "Instruction list is empty",
        ));
    }

    let init_pos = instructions.iter().position(|ix| {
        ix.program_id == program_ids::token()
            // InitializeMint has tag 0
            && ix.data.first() == Some(&0)
    });
    let Some(init_pos) = init_pos else {
        // Nothing to check without a mint initialization (transaction 2)
        return Ok(());
    };
    let mint = instructions[init_pos].accounts[0].pubkey;

    let create_pos = instructions.iter().position(|ix| {
        ix.program_id == system_program::id()
            && ix.accounts.get(1).map(|a| a.pubkey) == Some(mint)
    });
    match create_pos {
        Some(pos) if pos < init_pos => {}
        Some(pos) => {
            return Err(TransactionBuilderError::invalid_order(format!(
                "mint {} initialized at {} before it is created at {}",
                mint, init_pos, pos
            )))
        }
        None => {
            return Err(TransactionBuilderError::invalid_order(format!(
                "mint {} initialized but never created",
                mint
            )))
        }
    }

    let users = [
        program_ids::token(),
        program_ids::associated_token(),
        program_ids::TOKEN_METADATA,
    ];
    for (idx, ix) in instructions.iter().enumerate().take(init_pos) {
        if users.contains(&ix.program_id) && ix.accounts.iter().any(|a| a.pubkey == mint) {
            return Err(TransactionBuilderError::invalid_order(format!(
                "instruction {} uses mint {} before initialization at {}",
                idx, mint, init_pos
            )));
        }
    }

    Ok(())
}

/// No-op version of sanity_check_mint_order for release builds
#[cfg(not(debug_assertions))]
#[inline]
pub fn sanity_check_mint_order(_instructions: &[Instruction]) -> Result<(), TransactionBuilderError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{decode_instruction, DataV2};

    fn record(payer: Pubkey) -> MetadataRecord {
        MetadataRecord::new("Sunrise", "SUN", 2000).with_creator(payer, 100, true)
    }

    #[test]
    fn test_create_mint_account_appends_signer() {
        let payer = Pubkey::new_unique();
        let mint = Keypair::new();
        let mint_key = mint.pubkey();

        let batch = create_mint_account(InstructionBatch::new(), &payer, mint, 1_461_600);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.signer_pubkeys(), vec![mint_key]);

        let ix = &batch.instructions()[0];
        assert_eq!(ix.program_id, system_program::id());
        assert_eq!(ix.accounts[0], AccountMeta::new(payer, true));
        assert_eq!(ix.accounts[1], AccountMeta::new(mint_key, true));
        assert_eq!(MINT_ACCOUNT_LEN, 82);
    }

    #[test]
    fn test_associated_account_matches_spl_builder() {
        let resolver = ProgramAddressResolver::isolated();
        let payer = Pubkey::new_unique();
        let mint = Pubkey::new_unique();

        let batch =
            create_associated_token_account(InstructionBatch::new(), &resolver, &payer, &payer, &mint)
                .unwrap();
        let expected = spl_associated_token_account::instruction::create_associated_token_account(
            &payer,
            &payer,
            &mint,
            &spl_token::id(),
        );
        assert_eq!(batch.instructions()[0], expected);
    }

    #[test]
    fn test_create_metadata_layout() {
        let resolver = ProgramAddressResolver::isolated();
        let payer = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let keys = MetadataAuthorities::single(mint, payer);

        let batch = create_metadata_account_v2(
            InstructionBatch::new(),
            &resolver,
            &keys,
            &record(payer),
            true,
        )
        .unwrap();
        let ix = &batch.instructions()[0];

        assert_eq!(ix.program_id, program_ids::TOKEN_METADATA);
        assert_eq!(ix.accounts.len(), 7);
        assert_eq!(
            ix.accounts[0],
            AccountMeta::new(resolver.metadata(&mint).unwrap().address, false)
        );
        assert_eq!(ix.accounts[1], AccountMeta::new_readonly(mint, false));
        assert_eq!(ix.accounts[2], AccountMeta::new_readonly(payer, true));
        assert_eq!(ix.accounts[3], AccountMeta::new(payer, true));
        assert_eq!(ix.accounts[6].pubkey, sysvar::rent::id());

        let args: CreateMetadataAccountArgsV2 = decode_instruction(&ix.data).unwrap();
        assert!(args.is_mutable);
        assert_eq!(args.data.uri.len(), 64);
        assert_eq!(args.data.seller_fee_basis_points, 2000);
    }

    #[test]
    fn test_share_mismatch_rejected_before_build() {
        let resolver = ProgramAddressResolver::isolated();
        let payer = Pubkey::new_unique();
        let keys = MetadataAuthorities::single(Pubkey::new_unique(), payer);
        let bad = MetadataRecord::new("Sunrise", "SUN", 2000).with_creator(payer, 99, true);

        let err = create_metadata_account_v2(InstructionBatch::new(), &resolver, &keys, &bad, true)
            .unwrap_err();
        assert!(matches!(err, TransactionBuilderError::Validation(_)));
        // Nothing was derived for the rejected record
        assert!(resolver.cache().is_empty());
    }

    #[test]
    fn test_update_metadata_layout() {
        let resolver = ProgramAddressResolver::isolated();
        let payer = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let uri = "https://arweave.net/abc";

        let update = MetadataUpdate::with_record(record(payer).with_uri(uri));
        let batch =
            update_metadata_account_v2(InstructionBatch::new(), &resolver, &mint, &payer, &update)
                .unwrap();
        let ix = &batch.instructions()[0];

        assert_eq!(ix.data[0], 15);
        assert_eq!(ix.accounts.len(), 2);
        assert_eq!(ix.accounts[1], AccountMeta::new_readonly(payer, true));

        let args: UpdateMetadataAccountArgsV2 = decode_instruction(&ix.data).unwrap();
        assert_eq!(args.data.map(|d: DataV2| d.uri), Some(uri.to_string()));
        assert_eq!(args.update_authority, None);
    }

    #[test]
    fn test_master_edition_is_unique_by_default() {
        let resolver = ProgramAddressResolver::isolated();
        let payer = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let keys = MetadataAuthorities::single(mint, payer);

        let batch = create_master_edition_v3(InstructionBatch::new(), &resolver, &keys, None).unwrap();
        let ix = &batch.instructions()[0];
        let args: CreateMasterEditionArgs = decode_instruction(&ix.data).unwrap();
        assert_eq!(args.max_supply, Some(0));
        assert_eq!(ix.accounts.len(), 9);
        assert_eq!(
            ix.accounts[0].pubkey,
            resolver.master_edition(&mint).unwrap().address
        );
        assert_eq!(
            ix.accounts[5],
            AccountMeta::new(resolver.metadata(&mint).unwrap().address, false)
        );
    }

    #[test]
    fn test_builders_are_idempotent() {
        let resolver = ProgramAddressResolver::isolated();
        let payer = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let keys = MetadataAuthorities::single(mint, payer);

        let a = create_metadata_account_v2(InstructionBatch::new(), &resolver, &keys, &record(payer), true)
            .unwrap();
        let b = create_metadata_account_v2(InstructionBatch::new(), &resolver, &keys, &record(payer), true)
            .unwrap();
        assert_eq!(a.instructions(), b.instructions());
    }

    #[test]
    fn test_memo_and_payment() {
        let payer = Pubkey::new_unique();
        let custodian = Pubkey::new_unique();
        let batch = storage_payment(InstructionBatch::new(), &payer, &custodian, 5_000);
        let batch = content_memo(batch, "abcd").unwrap();

        assert_eq!(batch.program_ids(), vec![system_program::id(), program_ids::MEMO]);
        assert_eq!(batch.instructions()[1].data, b"abcd".to_vec());
        assert!(batch.instructions()[1].accounts.is_empty());
        assert!(content_memo(InstructionBatch::new(), "").is_err());
    }

    #[test]
    fn test_sanity_check_mint_order() {
        let resolver = ProgramAddressResolver::isolated();
        let payer = Pubkey::new_unique();
        let mint = Keypair::new();
        let mint_key = mint.pubkey();

        let batch = create_mint_account(InstructionBatch::new(), &payer, mint, 1);
        let batch = initialize_mint(batch, &mint_key, &payer).unwrap();
        let batch =
            create_associated_token_account(batch, &resolver, &payer, &payer, &mint_key).unwrap();
        assert!(sanity_check_mint_order(batch.instructions()).is_ok());

        // Initialize before create
        let mut reversed = batch.instructions().to_vec();
        reversed.swap(0, 1);
        assert!(sanity_check_mint_order(&reversed).is_err());

        // Associated account before initialize
        let mut early = batch.instructions().to_vec();
        early.swap(1, 2);
        assert!(sanity_check_mint_order(&early).is_err());

        assert!(sanity_check_mint_order(&[]).is_err());
    }
}
