//! Error taxonomy for the mint pipeline
//!
//! Every failure the pipeline can record against a stage is one of these
//! variants. Lower layers keep their own error types
//! ([`TransactionBuilderError`], [`RpcManagerError`], [`SchemaError`]) and
//! convert into [`MintError`] at the pipeline boundary.

use solana_sdk::signature::Signature;
use thiserror::Error;

use crate::rpc_manager::RpcManagerError;
use crate::schema::SchemaError;
use crate::tx_builder::TransactionBuilderError;

/// Top-level error for key derivation, estimation, building, submission and upload
#[derive(Error, Debug)]
pub enum MintError {
    /// The seed phrase failed word-list or checksum validation
    #[error("Invalid seed phrase: {0}")]
    InvalidPhrase(String),

    /// The pricing oracle could not produce a storage cost
    ///
    /// Raised before any payment instruction exists, so nothing was spent.
    #[error("Storage cost estimation failed: {0}")]
    Estimation(String),

    /// Malformed instruction arguments or an invalid metadata record
    #[error("Build error: {0}")]
    Build(#[from] TransactionBuilderError),

    /// Broadcast was rejected, or the ledger reported the transaction as failed
    ///
    /// `signature` is set when the transaction reached the ledger and failed there.
    #[error("Submission failed: {reason}")]
    Submission {
        reason: String,
        signature: Option<Signature>,
    },

    /// Confirmation was not observed inside the bound; the outcome is unknown
    #[error("Confirmation of {signature} not observed within {waited_ms}ms")]
    Timeout { signature: Signature, waited_ms: u64 },

    /// Gateway HTTP failure, error response or missing manifest entry
    #[error("Upload failed: {0}")]
    Upload(String),

    /// Work was abandoned through the cancellation token
    ///
    /// With `signature: None` nothing reached the ledger. With a signature the
    /// transaction was broadcast and its confirmation is unknown.
    #[error("{}", cancelled_message(.signature))]
    Cancelled { signature: Option<Signature> },

    /// Ledger RPC failure outside of submission
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcManagerError),

    /// Account data could not be decoded
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Persisted pipeline state is missing, corrupt or contradicts the ledger
    #[error("State error: {0}")]
    State(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

fn cancelled_message(signature: &Option<Signature>) -> String {
    match signature {
        Some(sig) => format!("Cancelled after broadcast, confirmation unknown ({})", sig),
        None => "Cancelled before broadcast".to_string(),
    }
}

impl MintError {
    /// Check if this error is potentially retryable
    ///
    /// Retrying means resuming the pipeline: submissions get a fresh
    /// blockhash and uploads reuse the confirmed payment transaction.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Submission { .. } => true,
            Self::Upload(_) => true,
            Self::Rpc(e) => e.is_retryable(),
            // Ambiguous outcomes are resumable: resume checks the ledger first
            Self::Timeout { .. } => true,
            Self::Cancelled { .. } => true,

            Self::InvalidPhrase(_) => false,
            Self::Estimation(_) => false,
            Self::Build(_) => false,
            Self::Schema(_) => false,
            Self::State(_) => false,
            Self::Config(_) => false,
        }
    }

    /// Get the error category for metrics and observability
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidPhrase(_) => "phrase",
            Self::Estimation(_) => "estimation",
            Self::Build(_) => "build",
            Self::Submission { .. } => "submission",
            Self::Timeout { .. } => "timeout",
            Self::Upload(_) => "upload",
            Self::Cancelled { .. } => "cancelled",
            Self::Rpc(_) => "rpc",
            Self::Schema(_) => "schema",
            Self::State(_) => "state",
            Self::Config(_) => "config",
        }
    }

    /// Signature of a transaction that may have reached the ledger
    pub fn broadcast_signature(&self) -> Option<Signature> {
        match self {
            Self::Timeout { signature, .. } => Some(*signature),
            Self::Cancelled { signature } => *signature,
            Self::Submission { signature, .. } => *signature,
            _ => None,
        }
    }
}

// Convenience constructors
impl MintError {
    pub fn estimation(reason: impl Into<String>) -> Self {
        Self::Estimation(reason.into())
    }

    pub fn upload(reason: impl Into<String>) -> Self {
        Self::Upload(reason.into())
    }

    pub fn state(reason: impl Into<String>) -> Self {
        Self::State(reason.into())
    }

    pub fn submission(reason: impl Into<String>) -> Self {
        Self::Submission {
            reason: reason.into(),
            signature: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MintError::InvalidPhrase("checksum".to_string());
        assert_eq!(err.to_string(), "Invalid seed phrase: checksum");

        let err = MintError::Cancelled { signature: None };
        assert_eq!(err.to_string(), "Cancelled before broadcast");

        let sig = Signature::from([7u8; 64]);
        let err = MintError::Cancelled {
            signature: Some(sig),
        };
        assert!(err.to_string().contains("confirmation unknown"));
        assert!(err.to_string().contains(&sig.to_string()));
    }

    #[test]
    fn test_error_retryability() {
        assert!(MintError::upload("503").is_retryable());
        assert!(MintError::submission("blockhash not found").is_retryable());
        assert!(MintError::Timeout {
            signature: Signature::default(),
            waited_ms: 1000
        }
        .is_retryable());

        assert!(!MintError::InvalidPhrase("x".to_string()).is_retryable());
        assert!(!MintError::estimation("oracle down").is_retryable());
        assert!(!MintError::Build(TransactionBuilderError::validation("shares")).is_retryable());
    }

    #[test]
    fn test_broadcast_signature() {
        let sig = Signature::from([3u8; 64]);
        let err = MintError::Timeout {
            signature: sig,
            waited_ms: 10,
        };
        assert_eq!(err.broadcast_signature(), Some(sig));
        assert_eq!(MintError::upload("x").broadcast_signature(), None);
        assert_eq!(MintError::Cancelled { signature: None }.broadcast_signature(), None);
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(MintError::upload("x").category(), "upload");
        assert_eq!(MintError::estimation("x").category(), "estimation");
        assert_eq!(MintError::state("x").category(), "state");
    }
}
