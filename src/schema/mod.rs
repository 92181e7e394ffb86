//! Versioned binary codec for instruction arguments and account layouts
//!
//! Every struct that crosses the wire is registered by implementing
//! [`Schema`], which pins a name and version to its Borsh layout. Instruction
//! argument structs additionally implement [`InstructionSchema`], whose one-byte
//! discriminant prefixes the payload.
//!
//! Wire rules (Borsh):
//! - unsigned integers are fixed-width little-endian (u8, u16, u64)
//! - strings are a u32 LE byte length followed by UTF-8 bytes
//! - `Option<T>` is a presence byte (0/1) followed by the value when present
//! - public keys are 32 raw bytes
//! - `Vec<T>` is a u32 LE element count followed by the elements
//! - enum variants are a single index byte
//!
//! A layout that disagrees with the receiving program cannot be detected here;
//! it only shows up as a ledger-side rejection.

pub mod token_metadata;

use borsh::{BorshDeserialize, BorshSerialize};
use thiserror::Error;

pub use token_metadata::{
    Collection, CreateMasterEditionArgs, CreateMetadataAccountArgsV2, Creator, Data, DataV2, Key,
    MasterEditionV2, MetadataAccount, TokenStandard, UpdateMetadataAccountArgsV2, UseMethod,
    Uses,
};

/// Codec failures
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Failed to encode {schema} v{version}: {reason}")]
    Encode {
        schema: &'static str,
        version: u8,
        reason: String,
    },

    #[error("Failed to decode {schema} v{version}: {reason}")]
    Decode {
        schema: &'static str,
        version: u8,
        reason: String,
    },

    #[error("Discriminant mismatch for {schema}: expected {expected}, found {found:?}")]
    DiscriminantMismatch {
        schema: &'static str,
        expected: u8,
        found: Option<u8>,
    },
}

/// Identity of a registered layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SchemaId {
    pub name: &'static str,
    pub version: u8,
}

impl std::fmt::Display for SchemaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@v{}", self.name, self.version)
    }
}

/// A struct with a registered, versioned wire layout
pub trait Schema: BorshSerialize + BorshDeserialize {
    const NAME: &'static str;
    const VERSION: u8;

    fn schema_id() -> SchemaId {
        SchemaId {
            name: Self::NAME,
            version: Self::VERSION,
        }
    }
}

/// Instruction arguments, prefixed on the wire by a one-byte discriminant
pub trait InstructionSchema: Schema {
    const DISCRIMINANT: u8;
}

/// Every layout this crate knows how to produce or read back
pub fn registered_schemas() -> Vec<SchemaId> {
    vec![
        Creator::schema_id(),
        Collection::schema_id(),
        Uses::schema_id(),
        DataV2::schema_id(),
        Data::schema_id(),
        CreateMetadataAccountArgsV2::schema_id(),
        UpdateMetadataAccountArgsV2::schema_id(),
        CreateMasterEditionArgs::schema_id(),
        MetadataAccount::schema_id(),
        MasterEditionV2::schema_id(),
    ]
}

/// Encode a registered struct
pub fn encode<T: Schema>(value: &T) -> Result<Vec<u8>, SchemaError> {
    borsh::to_vec(value).map_err(|e| SchemaError::Encode {
        schema: T::NAME,
        version: T::VERSION,
        reason: e.to_string(),
    })
}

/// Decode a registered struct, requiring every byte to be consumed
pub fn decode<T: Schema>(bytes: &[u8]) -> Result<T, SchemaError> {
    borsh::from_slice(bytes).map_err(|e| SchemaError::Decode {
        schema: T::NAME,
        version: T::VERSION,
        reason: e.to_string(),
    })
}

/// Decode the leading bytes of an account buffer
///
/// Program accounts are allocated at their maximum size, so trailing
/// padding after the encoded struct is expected and ignored.
pub fn decode_account<T: Schema>(data: &[u8]) -> Result<T, SchemaError> {
    let mut cursor = data;
    T::deserialize(&mut cursor).map_err(|e| SchemaError::Decode {
        schema: T::NAME,
        version: T::VERSION,
        reason: e.to_string(),
    })
}

/// Encode instruction arguments as `[discriminant] ++ borsh(args)`
pub fn encode_instruction<T: InstructionSchema>(args: &T) -> Result<Vec<u8>, SchemaError> {
    let body = encode(args)?;
    let mut data = Vec::with_capacity(body.len() + 1);
    data.push(T::DISCRIMINANT);
    data.extend_from_slice(&body);
    Ok(data)
}

/// Decode an instruction payload produced by [`encode_instruction`]
pub fn decode_instruction<T: InstructionSchema>(data: &[u8]) -> Result<T, SchemaError> {
    match data.split_first() {
        Some((&tag, body)) if tag == T::DISCRIMINANT => decode(body),
        other => Err(SchemaError::DiscriminantMismatch {
            schema: T::NAME,
            expected: T::DISCRIMINANT,
            found: other.map(|(tag, _)| *tag),
        }),
    }
}
