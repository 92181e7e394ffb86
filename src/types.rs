//! Common types used throughout the application

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use solana_sdk::pubkey::Pubkey;
use std::path::{Path, PathBuf};

use crate::schema::{self, DataV2};
use crate::tx_builder::TransactionBuilderError;

/// Byte limits enforced by the token-metadata program
pub const MAX_NAME_LENGTH: usize = 32;
pub const MAX_SYMBOL_LENGTH: usize = 10;
pub const MAX_URI_LENGTH: usize = 200;
pub const MAX_CREATOR_LIMIT: usize = 5;
pub const MAX_SELLER_FEE_BASIS_POINTS: u16 = 10_000;

/// Placeholder uri used until the storage link is known (the length of an Arweave link)
pub fn placeholder_uri() -> String {
    " ".repeat(64)
}

/// Royalty recipient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatorShare {
    #[serde(with = "pubkey_string")]
    pub address: Pubkey,
    /// Percent of royalties
    pub share: u8,
    pub verified: bool,
}

/// Use-tracking configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsesConfig {
    pub method: UseMethodKind,
    pub remaining: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UseMethodKind {
    Burn,
    Multiple,
    Single,
}

/// Metadata of the token being minted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub name: String,
    pub symbol: String,
    #[serde(default)]
    pub description: String,
    /// Starts as [`placeholder_uri`] and is replaced after upload
    pub uri: String,
    pub seller_fee_basis_points: u16,
    #[serde(default)]
    pub creators: Vec<CreatorShare>,
    #[serde(default, with = "opt_display_string")]
    pub collection: Option<Pubkey>,
    #[serde(default)]
    pub uses: Option<UsesConfig>,
}

impl MetadataRecord {
    pub fn new(name: impl Into<String>, symbol: impl Into<String>, seller_fee_basis_points: u16) -> Self {
        Self {
            name: name.into(),
            symbol: symbol.into(),
            description: String::new(),
            uri: placeholder_uri(),
            seller_fee_basis_points,
            creators: Vec::new(),
            collection: None,
            uses: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_creator(mut self, address: Pubkey, share: u8, verified: bool) -> Self {
        self.creators.push(CreatorShare {
            address,
            share,
            verified,
        });
        self
    }

    /// Copy of this record pointing at a different uri
    pub fn with_uri(&self, uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..self.clone()
        }
    }

    /// Check the record against the metadata program's limits
    ///
    /// Shares are only checked when creators are present; the program accepts
    /// a record with no creators at all.
    pub fn validate(&self) -> Result<(), TransactionBuilderError> {
        if self.name.len() > MAX_NAME_LENGTH {
            return Err(TransactionBuilderError::validation(format!(
                "name is {} bytes, limit is {}",
                self.name.len(),
                MAX_NAME_LENGTH
            )));
        }
        if self.symbol.len() > MAX_SYMBOL_LENGTH {
            return Err(TransactionBuilderError::validation(format!(
                "symbol is {} bytes, limit is {}",
                self.symbol.len(),
                MAX_SYMBOL_LENGTH
            )));
        }
        if self.uri.len() > MAX_URI_LENGTH {
            return Err(TransactionBuilderError::validation(format!(
                "uri is {} bytes, limit is {}",
                self.uri.len(),
                MAX_URI_LENGTH
            )));
        }
        if self.seller_fee_basis_points > MAX_SELLER_FEE_BASIS_POINTS {
            return Err(TransactionBuilderError::validation(format!(
                "seller fee {} exceeds {} basis points",
                self.seller_fee_basis_points, MAX_SELLER_FEE_BASIS_POINTS
            )));
        }
        if self.creators.len() > MAX_CREATOR_LIMIT {
            return Err(TransactionBuilderError::validation(format!(
                "{} creators, limit is {}",
                self.creators.len(),
                MAX_CREATOR_LIMIT
            )));
        }
        if !self.creators.is_empty() {
            let total: u32 = self.creators.iter().map(|c| c.share as u32).sum();
            if total != 100 {
                return Err(TransactionBuilderError::validation(format!(
                    "creator shares sum to {}, expected 100",
                    total
                )));
            }
            for (i, creator) in self.creators.iter().enumerate() {
                if self.creators[..i].iter().any(|c| c.address == creator.address) {
                    return Err(TransactionBuilderError::validation(format!(
                        "duplicate creator {}",
                        creator.address
                    )));
                }
            }
        }
        Ok(())
    }

    /// On-chain representation
    pub fn to_data_v2(&self) -> DataV2 {
        DataV2 {
            name: self.name.clone(),
            symbol: self.symbol.clone(),
            uri: self.uri.clone(),
            seller_fee_basis_points: self.seller_fee_basis_points,
            creators: if self.creators.is_empty() {
                None
            } else {
                Some(
                    self.creators
                        .iter()
                        .map(|c| schema::Creator {
                            address: c.address,
                            verified: c.verified,
                            share: c.share,
                        })
                        .collect(),
                )
            },
            collection: self.collection.map(|key| schema::Collection {
                verified: false,
                key,
            }),
            uses: self.uses.map(|u| schema::Uses {
                use_method: match u.method {
                    UseMethodKind::Burn => schema::UseMethod::Burn,
                    UseMethodKind::Multiple => schema::UseMethod::Multiple,
                    UseMethodKind::Single => schema::UseMethod::Single,
                },
                remaining: u.remaining,
                total: u.total,
            }),
        }
    }

    /// Off-chain JSON document stored next to the image
    pub fn to_json_document(&self, assets: &[FileAsset]) -> serde_json::Value {
        let files: Vec<serde_json::Value> = assets
            .iter()
            .map(|a| serde_json::json!({ "uri": a.name, "type": a.content_type }))
            .collect();
        let creators: Vec<serde_json::Value> = self
            .creators
            .iter()
            .map(|c| {
                serde_json::json!({
                    "address": c.address.to_string(),
                    "share": c.share,
                    "verified": c.verified,
                })
            })
            .collect();

        serde_json::json!({
            "name": self.name,
            "symbol": self.symbol,
            "description": self.description,
            "seller_fee_basis_points": self.seller_fee_basis_points,
            "image": assets.first().map(|a| a.name.clone()).unwrap_or_default(),
            "external_url": "",
            "properties": {
                "category": "image",
                "files": files,
                "creators": creators,
            },
            "collection": self.collection.map(|c| c.to_string()),
        })
    }
}

/// A file destined for permanent storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAsset {
    pub name: String,
    pub content_type: String,
    /// Where the bytes were read from, so a resumed run can reload them
    #[serde(default)]
    pub source: Option<PathBuf>,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

impl FileAsset {
    pub fn from_bytes(name: impl Into<String>, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            source: None,
            bytes,
        }
    }

    /// Read a file from disk, guessing its content type from the extension
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        Ok(Self {
            content_type: content_type_for(&name).to_string(),
            name,
            source: Some(path.to_path_buf()),
            bytes,
        })
    }

    /// Reload bytes from `source` (after deserialization)
    pub fn reload(&mut self) -> std::io::Result<()> {
        if let Some(path) = &self.source {
            self.bytes = std::fs::read(path)?;
        }
        Ok(())
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Hex sha256 of the content, used as the payment memo
    pub fn content_digest(&self) -> String {
        hex::encode(Sha256::digest(&self.bytes))
    }
}

fn content_type_for(name: &str) -> &'static str {
    let ext = name.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}

/// Serde helpers for base58 public keys
pub mod pubkey_string {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use solana_sdk::pubkey::Pubkey;
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(key: &Pubkey, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&key.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Pubkey, D::Error> {
        let s = String::deserialize(d)?;
        Pubkey::from_str(&s).map_err(de::Error::custom)
    }
}

/// Serde helpers for optional values kept in their display form
pub mod opt_display_string {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use std::fmt::Display;
    use std::str::FromStr;

    pub fn serialize<T: Display, S: Serializer>(v: &Option<T>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(v) => s.serialize_some(&v.to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, T, D>(d: D) -> Result<Option<T>, D::Error>
    where
        T: FromStr,
        T::Err: Display,
        D: Deserializer<'de>,
    {
        <Option<String> as Deserialize>::deserialize(d)?
            .map(|s| T::from_str(&s))
            .transpose()
            .map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> MetadataRecord {
        MetadataRecord::new("Sunrise", "SUN", 2000).with_creator(Pubkey::new_unique(), 100, true)
    }

    #[test]
    fn test_valid_record() {
        assert!(record().validate().is_ok());
        assert_eq!(record().uri.len(), 64);
    }

    #[test]
    fn test_share_sum_rejected() {
        let r = MetadataRecord::new("A", "B", 0)
            .with_creator(Pubkey::new_unique(), 60, true)
            .with_creator(Pubkey::new_unique(), 30, false);
        let err = r.validate().unwrap_err();
        assert!(err.to_string().contains("sum to 90"));
    }

    #[test]
    fn test_limits() {
        let mut r = record();
        r.name = "x".repeat(33);
        assert!(r.validate().is_err());

        let mut r = record();
        r.seller_fee_basis_points = 10_001;
        assert!(r.validate().is_err());

        let mut r = record();
        r.symbol = "TOOLONGSYMB".to_string();
        assert!(r.validate().is_err());
    }

    #[test]
    fn test_data_v2_mapping() {
        let r = MetadataRecord::new("A", "B", 500);
        let data = r.to_data_v2();
        assert!(data.creators.is_none());
        assert_eq!(data.seller_fee_basis_points, 500);

        let r = record();
        let data = r.to_data_v2();
        assert_eq!(data.creators.as_ref().map(|c| c.len()), Some(1));
        assert!(data.collection.is_none());
        assert!(data.uses.is_none());
    }

    #[test]
    fn test_collection_and_uses_mapping() {
        let collection = Pubkey::new_unique();
        let mut r = record();
        r.collection = Some(collection);
        r.uses = Some(UsesConfig {
            method: UseMethodKind::Multiple,
            remaining: 3,
            total: 5,
        });

        let data = r.to_data_v2();
        assert_eq!(
            data.collection,
            Some(schema::Collection {
                verified: false,
                key: collection,
            })
        );
        assert_eq!(
            data.uses,
            Some(schema::Uses {
                use_method: schema::UseMethod::Multiple,
                remaining: 3,
                total: 5,
            })
        );

        r.uses = Some(UsesConfig {
            method: UseMethodKind::Burn,
            remaining: 1,
            total: 1,
        });
        assert_eq!(r.to_data_v2().uses.map(|u| u.use_method), Some(schema::UseMethod::Burn));
        r.uses = Some(UsesConfig {
            method: UseMethodKind::Single,
            remaining: 0,
            total: 1,
        });
        assert_eq!(r.to_data_v2().uses.map(|u| u.use_method), Some(schema::UseMethod::Single));
    }

    #[test]
    fn test_json_document() {
        let image = FileAsset::from_bytes("art.png", "image/png", vec![1, 2, 3]);
        let doc = record().with_description("dawn").to_json_document(&[image]);
        assert_eq!(doc["image"], "art.png");
        assert_eq!(doc["seller_fee_basis_points"], 2000);
        assert_eq!(doc["properties"]["files"][0]["type"], "image/png");
        assert_eq!(doc["properties"]["creators"][0]["share"], 100);
    }

    #[test]
    fn test_content_digest() {
        let asset = FileAsset::from_bytes("a.txt", "text/plain", b"abc".to_vec());
        assert_eq!(
            asset.content_digest(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_record_serde() {
        let r = record();
        let json = serde_json::to_string(&r).unwrap();
        let back: MetadataRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }
}
