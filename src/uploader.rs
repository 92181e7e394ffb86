//! Two-phase permanent storage
//!
//! Phase A stages the storage payment inside transaction 1: one transfer to
//! the custodian followed by one memo per file carrying its sha256 digest.
//! Phase B runs once that transaction is confirmed and hands the files to
//! the gateway together with the payment signature.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cost::CostEstimate;
use crate::errors::MintError;
use crate::metrics::{metrics, Timer};
use crate::tx_builder::{instructions, InstructionBatch, TransactionBuilderError};
use crate::types::{FileAsset, MetadataRecord};

/// Default custodian collecting storage payments
pub const DEFAULT_CUSTODIAN: Pubkey =
    solana_sdk::pubkey!("6FKvsq4ydWFci6nGq9ckbjYMtnmaqAoatz5c9XWjiDuS");

pub const DEFAULT_GATEWAY_URL: &str =
    "https://us-central1-metaplex-studios.cloudfunctions.net/uploadFile";

pub const METADATA_FILE_NAME: &str = "metadata.json";
pub const MANIFEST_FILE_NAME: &str = "manifest.json";
pub const ARWEAVE_BASE_URL: &str = "https://arweave.net";

/// Tag attached to every uploaded file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTag {
    pub name: String,
    pub value: String,
}

/// Everything the gateway needs for one upload call
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Confirmed transaction that paid for the storage
    pub transaction: Signature,
    /// Network tag, e.g. `devnet`
    pub env: String,
    pub tags: BTreeMap<String, Vec<FileTag>>,
    pub files: Vec<FileAsset>,
}

impl UploadRequest {
    /// Tag every file with the mint it belongs to
    pub fn new(transaction: Signature, env: &str, mint: &Pubkey, files: Vec<FileAsset>) -> Self {
        let tags = files
            .iter()
            .map(|f| {
                (
                    f.name.clone(),
                    vec![FileTag {
                        name: "mint".to_string(),
                        value: mint.to_string(),
                    }],
                )
            })
            .collect();
        Self {
            transaction,
            env: env.to_string(),
            tags,
            files,
        }
    }

    pub fn tags_json(&self) -> Result<String, MintError> {
        serde_json::to_string(&self.tags)
            .map_err(|e| MintError::upload(format!("Tags not serializable: {}", e)))
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(FileAsset::size).sum()
    }
}

/// Per-file result returned by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub filename: String,
    #[serde(rename = "transactionId")]
    pub transaction_id: String,
}

/// Raw gateway response body
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayResponse {
    #[serde(default)]
    pub messages: Vec<ManifestEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// File name to permanent transaction id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadManifest {
    pub entries: Vec<ManifestEntry>,
}

impl UploadManifest {
    pub fn transaction_id(&self, filename: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.filename == filename)
            .map(|e| e.transaction_id.as_str())
    }

    /// Link for the first of `names` the gateway reported
    pub fn permanent_uri(&self, names: &[&str]) -> Option<String> {
        names
            .iter()
            .find_map(|name| self.transaction_id(name))
            .map(|id| format!("{}/{}", ARWEAVE_BASE_URL, id))
    }
}

/// Storage gateway accepting paid uploads
#[async_trait]
pub trait StorageGateway: Send + Sync {
    async fn upload(&self, request: &UploadRequest) -> Result<GatewayResponse, MintError>;
}

/// Multipart HTTP gateway
pub struct HttpStorageGateway {
    client: reqwest::Client,
    url: String,
}

impl HttpStorageGateway {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, MintError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MintError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    fn form(request: &UploadRequest) -> Result<Form, MintError> {
        let mut form = Form::new()
            .text("transaction", request.transaction.to_string())
            .text("env", request.env.clone())
            .text("tags", request.tags_json()?);

        for file in &request.files {
            let part = Part::bytes(file.bytes.clone())
                .file_name(file.name.clone())
                .mime_str(&file.content_type)
                .map_err(|e| {
                    MintError::upload(format!("Invalid content type for {}: {}", file.name, e))
                })?;
            form = form.part("file[]", part);
        }
        Ok(form)
    }
}

#[async_trait]
impl StorageGateway for HttpStorageGateway {
    async fn upload(&self, request: &UploadRequest) -> Result<GatewayResponse, MintError> {
        let form = Self::form(request)?;
        let response = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| MintError::upload(format!("Gateway unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MintError::upload(format!(
                "Unable to upload the files, gateway returned {}",
                status
            )));
        }

        let body: GatewayResponse = response
            .json()
            .await
            .map_err(|e| MintError::upload(format!("Gateway response undecodable: {}", e)))?;
        Ok(body)
    }
}

/// Outcome of Phase B
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadResult {
    pub manifest: UploadManifest,
    /// Permanent link to the metadata document
    pub uri: String,
}

/// Stages storage payments and performs uploads
#[derive(Clone)]
pub struct StorageUploader {
    gateway: Arc<dyn StorageGateway>,
    custodian: Pubkey,
    env: String,
    manifest_name: String,
}

impl StorageUploader {
    pub fn new(gateway: Arc<dyn StorageGateway>, env: &str) -> Self {
        Self {
            gateway,
            custodian: DEFAULT_CUSTODIAN,
            env: env.to_string(),
            manifest_name: MANIFEST_FILE_NAME.to_string(),
        }
    }

    pub fn with_custodian(mut self, custodian: Pubkey) -> Self {
        self.custodian = custodian;
        self
    }

    pub fn with_manifest_name(mut self, name: &str) -> Self {
        self.manifest_name = name.to_string();
        self
    }

    pub fn custodian(&self) -> &Pubkey {
        &self.custodian
    }

    /// Generated metadata document for `record`, uploaded alongside the assets
    pub fn metadata_file(record: &MetadataRecord, assets: &[FileAsset]) -> Result<FileAsset, MintError> {
        let bytes = serde_json::to_vec(&record.to_json_document(assets))
            .map_err(|e| MintError::upload(format!("Metadata document: {}", e)))?;
        Ok(FileAsset::from_bytes(
            METADATA_FILE_NAME,
            "application/json",
            bytes,
        ))
    }

    /// Phase A: payment transfer followed by one digest memo per file
    pub fn stage_payment(
        &self,
        batch: InstructionBatch,
        payer: &Pubkey,
        files: &[FileAsset],
        estimate: &CostEstimate,
    ) -> Result<InstructionBatch, TransactionBuilderError> {
        let lamports = estimate.payment_lamports();
        let mut batch = instructions::storage_payment(batch, payer, &self.custodian, lamports);
        for file in files {
            batch = instructions::content_memo(batch, &file.content_digest())?;
        }
        debug!(lamports, files = files.len(), custodian = %self.custodian, "Storage payment staged");
        Ok(batch)
    }

    /// Phase B: upload with the confirmed payment signature
    pub async fn upload(
        &self,
        payment: Signature,
        mint: &Pubkey,
        files: Vec<FileAsset>,
        cancel: &CancellationToken,
    ) -> Result<UploadResult, MintError> {
        let request = UploadRequest::new(payment, &self.env, mint, files);
        let bytes = request.total_bytes();

        metrics().uploads_total.inc();
        let timer = Timer::with_name("upload_latency_seconds");
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(MintError::Cancelled { signature: None }),
            response = self.gateway.upload(&request) => response,
        };
        timer.finish();

        let result = response.and_then(|r| self.resolve(r));
        match &result {
            Ok(done) => {
                metrics().uploaded_bytes.inc_by(bytes);
                info!(%mint, %payment, uri = %done.uri, bytes, "📦 Files uploaded");
            }
            Err(e) => {
                metrics().uploads_failed.inc();
                warn!(%mint, %payment, error = %e, "Upload failed");
            }
        }
        result
    }

    fn resolve(&self, response: GatewayResponse) -> Result<UploadResult, MintError> {
        if let Some(error) = response.error {
            return Err(MintError::Upload(error));
        }
        let manifest = UploadManifest {
            entries: response.messages,
        };
        let uri = manifest
            .permanent_uri(&[&self.manifest_name, METADATA_FILE_NAME])
            .ok_or_else(|| {
                MintError::upload(format!(
                    "Gateway returned no entry for {} or {}",
                    self.manifest_name, METADATA_FILE_NAME
                ))
            })?;
        Ok(UploadResult { manifest, uri })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::UsdRates;
    use crate::pda::program_ids;
    use crate::test_utils::MockGateway;

    fn estimate(lamports: u64) -> CostEstimate {
        CostEstimate {
            total_bytes: 10,
            winston: 0,
            rates: UsdRates {
                ar_usd: 1.0,
                sol_usd: 1.0,
            },
            lamports,
            margin_lamports: 1_000_000,
        }
    }

    fn entry(name: &str, id: &str) -> ManifestEntry {
        ManifestEntry {
            filename: name.to_string(),
            transaction_id: id.to_string(),
        }
    }

    #[test]
    fn test_stage_payment_order() {
        let uploader = StorageUploader::new(Arc::new(MockGateway::new()), "devnet");
        let payer = Pubkey::new_unique();
        let files = vec![
            FileAsset::from_bytes("a.png", "image/png", vec![1, 2, 3]),
            FileAsset::from_bytes("metadata.json", "application/json", b"{}".to_vec()),
        ];

        let batch = uploader
            .stage_payment(InstructionBatch::new(), &payer, &files, &estimate(5))
            .unwrap();
        assert_eq!(
            batch.program_ids(),
            vec![
                solana_sdk::system_program::id(),
                program_ids::MEMO,
                program_ids::MEMO
            ]
        );
        assert_eq!(
            batch.instructions()[1].data,
            files[0].content_digest().into_bytes()
        );
        assert_eq!(batch.instructions()[0].accounts[1].pubkey, DEFAULT_CUSTODIAN);
    }

    #[test]
    fn test_manifest_prefers_path_manifest() {
        let manifest = UploadManifest {
            entries: vec![
                entry("a.png", "img"),
                entry("metadata.json", "meta"),
                entry("manifest.json", "mani"),
            ],
        };
        assert_eq!(
            manifest.permanent_uri(&["manifest.json", "metadata.json"]),
            Some("https://arweave.net/mani".to_string())
        );

        let no_manifest = UploadManifest {
            entries: vec![entry("metadata.json", "meta")],
        };
        assert_eq!(
            no_manifest.permanent_uri(&["manifest.json", "metadata.json"]),
            Some("https://arweave.net/meta".to_string())
        );
        assert_eq!(UploadManifest::default().permanent_uri(&["x"]), None);
    }

    #[test]
    fn test_tags_json_shape() {
        let mint = Pubkey::new_unique();
        let req = UploadRequest::new(
            Signature::default(),
            "devnet",
            &mint,
            vec![FileAsset::from_bytes("a.png", "image/png", vec![0])],
        );
        let tags: serde_json::Value = serde_json::from_str(&req.tags_json().unwrap()).unwrap();
        assert_eq!(tags["a.png"][0]["name"], "mint");
        assert_eq!(tags["a.png"][0]["value"], mint.to_string());
    }

    #[tokio::test]
    async fn test_upload_error_field() {
        let gateway = Arc::new(MockGateway::new());
        gateway.respond_with(GatewayResponse {
            messages: vec![],
            error: Some("quota exceeded".to_string()),
        });
        let uploader = StorageUploader::new(gateway.clone(), "devnet");

        let err = uploader
            .upload(
                Signature::default(),
                &Pubkey::new_unique(),
                vec![],
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MintError::Upload(ref m) if m == "quota exceeded"));
        assert_eq!(gateway.call_count(), 1);
    }

    #[tokio::test]
    async fn test_upload_missing_entry() {
        let gateway = Arc::new(MockGateway::new());
        gateway.respond_with(GatewayResponse {
            messages: vec![entry("a.png", "img")],
            error: None,
        });
        let uploader = StorageUploader::new(gateway, "devnet");
        let err = uploader
            .upload(
                Signature::default(),
                &Pubkey::new_unique(),
                vec![],
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.category(), "upload");
    }

    #[test]
    fn test_metadata_file_is_deterministic() {
        let record = MetadataRecord::new("Sunrise", "SUN", 2000);
        let assets = vec![FileAsset::from_bytes("a.png", "image/png", vec![7; 16])];
        let a = StorageUploader::metadata_file(&record, &assets).unwrap();
        let b = StorageUploader::metadata_file(&record, &assets).unwrap();
        assert_eq!(a.bytes, b.bytes);
        assert_eq!(a.name, METADATA_FILE_NAME);
    }
}
