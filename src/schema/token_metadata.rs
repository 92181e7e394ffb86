//! Token-metadata program layouts
//!
//! Field order mirrors the program's own structs; reordering any field
//! breaks the wire format.

use borsh::{BorshDeserialize, BorshSerialize};
use solana_sdk::pubkey::Pubkey;

use super::{InstructionSchema, Schema};

/// Account type tag stored in the first byte of every metadata-program account
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Uninitialized,
    EditionV1,
    MasterEditionV1,
    ReservationListV1,
    MetadataV1,
    ReservationListV2,
    MasterEditionV2,
    EditionMarker,
    UseAuthorityRecord,
    CollectionAuthorityRecord,
    TokenOwnedEscrow,
    TokenRecord,
    MetadataDelegate,
    EditionMarkerV2,
}

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct Creator {
    pub address: Pubkey,
    pub verified: bool,
    /// Share of royalties, in percent
    pub share: u8,
}

impl Schema for Creator {
    const NAME: &'static str = "Creator";
    const VERSION: u8 = 1;
}

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    pub verified: bool,
    pub key: Pubkey,
}

impl Schema for Collection {
    const NAME: &'static str = "Collection";
    const VERSION: u8 = 1;
}

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UseMethod {
    Burn,
    Multiple,
    Single,
}

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct Uses {
    pub use_method: UseMethod,
    pub remaining: u64,
    pub total: u64,
}

impl Schema for Uses {
    const NAME: &'static str = "Uses";
    const VERSION: u8 = 1;
}

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStandard {
    NonFungible,
    FungibleAsset,
    Fungible,
    NonFungibleEdition,
    ProgrammableNonFungible,
    ProgrammableNonFungibleEdition,
}

/// Metadata payload as stored inside the metadata account
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct Data {
    pub name: String,
    pub symbol: String,
    pub uri: String,
    pub seller_fee_basis_points: u16,
    pub creators: Option<Vec<Creator>>,
}

impl Schema for Data {
    const NAME: &'static str = "Data";
    const VERSION: u8 = 1;
}

/// Metadata payload accepted by the V2 create/update instructions
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct DataV2 {
    pub name: String,
    pub symbol: String,
    pub uri: String,
    pub seller_fee_basis_points: u16,
    pub creators: Option<Vec<Creator>>,
    pub collection: Option<Collection>,
    pub uses: Option<Uses>,
}

impl Schema for DataV2 {
    const NAME: &'static str = "DataV2";
    const VERSION: u8 = 2;
}

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct CreateMetadataAccountArgsV2 {
    pub data: DataV2,
    pub is_mutable: bool,
}

impl Schema for CreateMetadataAccountArgsV2 {
    const NAME: &'static str = "CreateMetadataAccountArgsV2";
    const VERSION: u8 = 2;
}

impl InstructionSchema for CreateMetadataAccountArgsV2 {
    const DISCRIMINANT: u8 = 16;
}

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct UpdateMetadataAccountArgsV2 {
    pub data: Option<DataV2>,
    pub update_authority: Option<Pubkey>,
    pub primary_sale_happened: Option<bool>,
    pub is_mutable: Option<bool>,
}

impl Schema for UpdateMetadataAccountArgsV2 {
    const NAME: &'static str = "UpdateMetadataAccountArgsV2";
    const VERSION: u8 = 2;
}

impl InstructionSchema for UpdateMetadataAccountArgsV2 {
    const DISCRIMINANT: u8 = 15;
}

/// Arguments of CreateMasterEditionV3
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct CreateMasterEditionArgs {
    /// `None` allows unlimited prints, `Some(0)` makes the token unique
    pub max_supply: Option<u64>,
}

impl Schema for CreateMasterEditionArgs {
    const NAME: &'static str = "CreateMasterEditionArgs";
    const VERSION: u8 = 3;
}

impl InstructionSchema for CreateMasterEditionArgs {
    const DISCRIMINANT: u8 = 17;
}

/// Leading fields of an on-chain metadata account
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct MetadataAccount {
    pub key: Key,
    pub update_authority: Pubkey,
    pub mint: Pubkey,
    pub data: Data,
    pub primary_sale_happened: bool,
    pub is_mutable: bool,
    pub edition_nonce: Option<u8>,
    pub token_standard: Option<TokenStandard>,
    pub collection: Option<Collection>,
    pub uses: Option<Uses>,
}

impl Schema for MetadataAccount {
    const NAME: &'static str = "Metadata";
    const VERSION: u8 = 1;
}

impl MetadataAccount {
    /// Uri with the program's NUL padding removed
    pub fn uri(&self) -> &str {
        self.data.uri.trim_end_matches('\0')
    }
}

#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct MasterEditionV2 {
    pub key: Key,
    pub supply: u64,
    pub max_supply: Option<u64>,
}

impl Schema for MasterEditionV2 {
    const NAME: &'static str = "MasterEditionV2";
    const VERSION: u8 = 2;
}

impl From<DataV2> for Data {
    fn from(data: DataV2) -> Self {
        Self {
            name: data.name,
            symbol: data.symbol,
            uri: data.uri,
            seller_fee_basis_points: data.seller_fee_basis_points,
            creators: data.creators,
        }
    }
}
