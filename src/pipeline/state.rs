//! Persisted pipeline state
//!
//! A run moves strictly forward through [`MintStage`]; every transition is
//! stamped and the whole state is written to the store before the next
//! remote call is made.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signature},
};
use std::fmt;

use crate::errors::MintError;
use crate::types::{opt_display_string, pubkey_string, FileAsset, MetadataRecord};
use crate::uploader::UploadManifest;

/// Stages of one mint run, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MintStage {
    Idle,
    PaymentStaged,
    MintCreated,
    MetadataCreated,
    Broadcast1Confirmed,
    Uploaded,
    MetadataUpdated,
    EditionFinalized,
    Broadcast2Confirmed,
    Failed,
}

impl MintStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, MintStage::Broadcast2Confirmed | MintStage::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MintStage::Idle => "idle",
            MintStage::PaymentStaged => "payment_staged",
            MintStage::MintCreated => "mint_created",
            MintStage::MetadataCreated => "metadata_created",
            MintStage::Broadcast1Confirmed => "broadcast1_confirmed",
            MintStage::Uploaded => "uploaded",
            MintStage::MetadataUpdated => "metadata_updated",
            MintStage::EditionFinalized => "edition_finalized",
            MintStage::Broadcast2Confirmed => "broadcast2_confirmed",
            MintStage::Failed => "failed",
        }
    }
}

impl fmt::Display for MintStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the caller asked to mint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintRequest {
    pub record: MetadataRecord,
    /// Files referenced by the metadata document; the first one is the image
    pub assets: Vec<FileAsset>,
    /// Print cap for the master edition; `None` mints a unique token
    #[serde(default)]
    pub max_supply: Option<u64>,
    #[serde(default = "default_is_mutable")]
    pub is_mutable: bool,
}

fn default_is_mutable() -> bool {
    true
}

impl MintRequest {
    pub fn new(record: MetadataRecord, assets: Vec<FileAsset>) -> Self {
        Self {
            record,
            assets,
            max_supply: None,
            is_mutable: true,
        }
    }

    /// Re-read asset bytes after the request was loaded from the store
    pub fn reload_assets(&mut self) -> Result<(), MintError> {
        for asset in &mut self.assets {
            if asset.bytes.is_empty() {
                asset.reload().map_err(|e| {
                    MintError::state(format!("Cannot reload asset {}: {}", asset.name, e))
                })?;
            }
        }
        Ok(())
    }
}

/// Why and where a run stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Stage the run was trying to reach
    pub stage: MintStage,
    pub category: String,
    pub cause: String,
    pub retryable: bool,
    /// Transaction that may have reached the ledger
    #[serde(default, with = "opt_display_string")]
    pub signature: Option<Signature>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTransition {
    pub stage: MintStage,
    pub at: DateTime<Utc>,
}

/// Everything needed to continue a run after a crash or failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineState {
    pub run_id: String,
    pub stage: MintStage,
    /// Furthest stage reached successfully; never `Failed`
    pub last_completed: MintStage,
    pub request: MintRequest,
    #[serde(with = "pubkey_string")]
    pub payer: Pubkey,
    #[serde(default, with = "opt_display_string")]
    pub mint: Option<Pubkey>,
    /// Base58 keypair bytes of the mint, so a rebuilt transaction 1 reuses it
    #[serde(default)]
    pub mint_secret: Option<String>,
    #[serde(default, with = "opt_display_string")]
    pub token_account: Option<Pubkey>,
    #[serde(default, with = "opt_display_string")]
    pub metadata_address: Option<Pubkey>,
    #[serde(default, with = "opt_display_string")]
    pub edition_address: Option<Pubkey>,
    #[serde(default)]
    pub payment_lamports: Option<u64>,
    #[serde(default, with = "opt_display_string")]
    pub payment_signature: Option<Signature>,
    /// Every broadcast of transaction 1, oldest first
    #[serde(default, with = "signature_list")]
    pub payment_attempts: Vec<Signature>,
    #[serde(default, with = "opt_display_string")]
    pub finalize_signature: Option<Signature>,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub manifest: Option<UploadManifest>,
    #[serde(default)]
    pub failure: Option<FailureRecord>,
    #[serde(default)]
    pub history: Vec<StageTransition>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineState {
    pub fn new(run_id: impl Into<String>, payer: Pubkey, request: MintRequest) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            stage: MintStage::Idle,
            last_completed: MintStage::Idle,
            request,
            payer,
            mint: None,
            mint_secret: None,
            token_account: None,
            metadata_address: None,
            edition_address: None,
            payment_lamports: None,
            payment_signature: None,
            payment_attempts: Vec::new(),
            finalize_signature: None,
            uri: None,
            manifest: None,
            failure: None,
            history: vec![StageTransition {
                stage: MintStage::Idle,
                at: now,
            }],
            created_at: now,
            updated_at: now,
        }
    }

    /// Move forward to `stage`
    ///
    /// Backward moves and moves out of `Broadcast2Confirmed` are rejected.
    /// Moving out of `Failed` is allowed: that is a resume.
    pub fn advance(&mut self, stage: MintStage) -> Result<(), MintError> {
        if stage == MintStage::Failed {
            return Err(MintError::state("Use fail() to record a failure"));
        }
        if self.stage == MintStage::Broadcast2Confirmed {
            return Err(MintError::state("Run already finished"));
        }
        if stage < self.last_completed {
            return Err(MintError::state(format!(
                "Cannot move back from {} to {}",
                self.last_completed, stage
            )));
        }
        let now = Utc::now();
        self.stage = stage;
        self.last_completed = stage;
        self.failure = None;
        self.history.push(StageTransition { stage, at: now });
        self.updated_at = now;
        Ok(())
    }

    /// Record a failure while trying to reach `target`
    pub fn fail(&mut self, target: MintStage, error: &MintError) {
        let now = Utc::now();
        self.stage = MintStage::Failed;
        self.failure = Some(FailureRecord {
            stage: target,
            category: error.category().to_string(),
            cause: error.to_string(),
            retryable: error.is_retryable(),
            signature: error.broadcast_signature(),
            at: now,
        });
        self.history.push(StageTransition {
            stage: MintStage::Failed,
            at: now,
        });
        self.updated_at = now;
    }

    /// Drop local progress back to a ledger checkpoint before rebuilding
    ///
    /// Only `Idle`, `Broadcast1Confirmed` and `Uploaded` are checkpoints; the
    /// stages between them describe instructions staged in memory, which are
    /// lost with the process and must be rebuilt.
    pub fn rewind(&mut self, checkpoint: MintStage) -> Result<(), MintError> {
        if !matches!(
            checkpoint,
            MintStage::Idle | MintStage::Broadcast1Confirmed | MintStage::Uploaded
        ) {
            return Err(MintError::state(format!("{} is not a checkpoint", checkpoint)));
        }
        if checkpoint > self.last_completed {
            return Err(MintError::state(format!(
                "Cannot rewind forward from {} to {}",
                self.last_completed, checkpoint
            )));
        }
        if self.stage == MintStage::Broadcast2Confirmed {
            return Err(MintError::state("Run already finished"));
        }
        self.last_completed = checkpoint;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.stage == MintStage::Broadcast2Confirmed
    }

    /// Whether transaction 1 is known to have been confirmed
    pub fn payment_confirmed(&self) -> bool {
        self.last_completed >= MintStage::Broadcast1Confirmed && self.payment_signature.is_some()
    }

    pub fn set_mint_keypair(&mut self, keypair: &Keypair) {
        use solana_sdk::signature::Signer;
        self.mint = Some(keypair.pubkey());
        self.mint_secret = Some(bs58::encode(keypair.to_bytes()).into_string());
    }

    /// Restore the persisted mint keypair, if one was generated
    pub fn mint_keypair(&self) -> Result<Option<Keypair>, MintError> {
        let Some(secret) = &self.mint_secret else {
            return Ok(None);
        };
        let bytes = bs58::decode(secret)
            .into_vec()
            .map_err(|e| MintError::state(format!("Mint secret is not base58: {}", e)))?;
        let keypair = Keypair::try_from(bytes.as_slice())
            .map_err(|e| MintError::state(format!("Mint secret is not a keypair: {}", e)))?;
        Ok(Some(keypair))
    }
}

mod signature_list {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use solana_sdk::signature::Signature;
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(sigs: &[Signature], s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(sigs.iter().map(|sig| sig.to_string()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Signature>, D::Error> {
        Vec::<String>::deserialize(d)?
            .iter()
            .map(|s| Signature::from_str(s).map_err(de::Error::custom))
            .collect()
    }
}

/// User-visible result of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MintOutcome {
    Minted {
        run_id: String,
        mint: Pubkey,
        uri: String,
        payment_signature: Option<Signature>,
        finalize_signature: Option<Signature>,
    },
    Failed {
        run_id: String,
        stage: MintStage,
        category: String,
        cause: String,
        retryable: bool,
        /// Set when transaction 1 confirmed, i.e. the mint exists
        mint: Option<Pubkey>,
    },
}

impl MintOutcome {
    pub fn from_state(state: &PipelineState) -> Self {
        if state.is_finished() {
            if let (Some(mint), Some(uri)) = (state.mint, state.uri.clone()) {
                return MintOutcome::Minted {
                    run_id: state.run_id.clone(),
                    mint,
                    uri,
                    payment_signature: state.payment_signature,
                    finalize_signature: state.finalize_signature,
                };
            }
        }

        let (stage, category, cause, retryable) = match &state.failure {
            Some(f) => (f.stage, f.category.clone(), f.cause.clone(), f.retryable),
            None => (
                state.stage,
                "state".to_string(),
                format!("Run stopped at {}", state.stage),
                true,
            ),
        };
        MintOutcome::Failed {
            run_id: state.run_id.clone(),
            stage,
            category,
            cause,
            retryable,
            mint: if state.payment_confirmed() {
                state.mint
            } else {
                None
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, MintOutcome::Minted { .. })
    }

    pub fn run_id(&self) -> &str {
        match self {
            MintOutcome::Minted { run_id, .. } | MintOutcome::Failed { run_id, .. } => run_id,
        }
    }

    pub fn mint(&self) -> Option<Pubkey> {
        match self {
            MintOutcome::Minted { mint, .. } => Some(*mint),
            MintOutcome::Failed { mint, .. } => *mint,
        }
    }
}

impl fmt::Display for MintOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MintOutcome::Minted { mint, uri, .. } => write!(f, "Minted {} ({})", mint, uri),
            MintOutcome::Failed {
                stage, cause, mint, ..
            } => match mint {
                Some(mint) => write!(f, "Failed at {}: {} (mint {} exists)", stage, cause, mint),
                None => write!(f, "Failed at {}: {}", stage, cause),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::signature::Signer;

    fn state() -> PipelineState {
        let request = MintRequest::new(
            MetadataRecord::new("Sunrise", "SUN", 2000),
            vec![FileAsset::from_bytes("a.png", "image/png", vec![1])],
        );
        PipelineState::new("run-1", Pubkey::new_unique(), request)
    }

    #[test]
    fn test_stage_order() {
        assert!(MintStage::Idle < MintStage::PaymentStaged);
        assert!(MintStage::Broadcast1Confirmed < MintStage::Uploaded);
        assert!(MintStage::Broadcast2Confirmed.is_terminal());
        assert!(!MintStage::Uploaded.is_terminal());
    }

    #[test]
    fn test_advance_is_forward_only() {
        let mut s = state();
        s.advance(MintStage::PaymentStaged).unwrap();
        s.advance(MintStage::MintCreated).unwrap();
        // Re-entering the same stage is allowed (mint and token account both land here)
        s.advance(MintStage::MintCreated).unwrap();
        assert!(s.advance(MintStage::PaymentStaged).is_err());
        assert!(s.advance(MintStage::Failed).is_err());
        assert_eq!(s.history.len(), 4);
    }

    #[test]
    fn test_fail_records_target_stage() {
        let mut s = state();
        s.advance(MintStage::Broadcast1Confirmed).unwrap();
        s.fail(MintStage::Uploaded, &MintError::upload("gateway 502"));

        assert_eq!(s.stage, MintStage::Failed);
        assert_eq!(s.last_completed, MintStage::Broadcast1Confirmed);
        let failure = s.failure.clone().unwrap();
        assert_eq!(failure.stage, MintStage::Uploaded);
        assert_eq!(failure.category, "upload");
        assert!(failure.retryable);

        // Resume moves out of Failed
        s.advance(MintStage::Uploaded).unwrap();
        assert!(s.failure.is_none());
    }

    #[test]
    fn test_rewind_to_checkpoint() {
        let mut s = state();
        s.advance(MintStage::MetadataCreated).unwrap();
        s.fail(MintStage::Broadcast1Confirmed, &MintError::submission("expired"));

        assert!(s.rewind(MintStage::PaymentStaged).is_err());
        assert!(s.rewind(MintStage::Uploaded).is_err());
        s.rewind(MintStage::Idle).unwrap();
        s.advance(MintStage::PaymentStaged).unwrap();
        assert_eq!(s.last_completed, MintStage::PaymentStaged);
    }

    #[test]
    fn test_mint_keypair_survives_serde() {
        let mut s = state();
        let kp = Keypair::new();
        s.set_mint_keypair(&kp);

        let json = serde_json::to_string(&s).unwrap();
        let back: PipelineState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.mint, Some(kp.pubkey()));
        assert_eq!(back.mint_keypair().unwrap().unwrap().pubkey(), kp.pubkey());
        // Asset bytes are not persisted
        assert!(back.request.assets[0].bytes.is_empty());
    }

    #[test]
    fn test_outcome_hides_unconfirmed_mint() {
        let mut s = state();
        s.set_mint_keypair(&Keypair::new());
        s.advance(MintStage::MetadataCreated).unwrap();
        s.fail(MintStage::Broadcast1Confirmed, &MintError::submission("rejected"));

        let outcome = MintOutcome::from_state(&s);
        assert!(!outcome.is_success());
        assert_eq!(outcome.mint(), None);
    }
}
