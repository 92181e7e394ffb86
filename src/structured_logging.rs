//! Structured logging for mint pipeline events

use solana_sdk::{pubkey::Pubkey, signature::Signature};

use crate::errors::MintError;
use crate::pipeline::MintStage;

/// Structured logger for pipeline events
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    context_id: String,
}

impl StructuredLogger {
    pub fn new(context_id: impl Into<String>) -> Self {
        Self {
            context_id: context_id.into(),
        }
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    pub fn log_run_started(&self, payer: &Pubkey, files: usize, resumed: bool) {
        tracing::info!(
            context_id = %self.context_id,
            payer = %payer,
            files = %files,
            resumed = %resumed,
            "Mint run started"
        );
    }

    pub fn log_stage(&self, stage: MintStage, mint: Option<&Pubkey>) {
        tracing::debug!(
            context_id = %self.context_id,
            stage = %stage,
            mint = ?mint.map(|m| m.to_string()),
            "Stage reached"
        );
    }

    pub fn log_submission(&self, label: &str, instructions: usize) {
        tracing::info!(
            context_id = %self.context_id,
            transaction = %label,
            instructions = %instructions,
            "Submitting transaction"
        );
    }

    pub fn log_confirmed(&self, label: &str, signature: &Signature, latency_ms: u64) {
        tracing::info!(
            context_id = %self.context_id,
            transaction = %label,
            signature = %signature,
            latency_ms = %latency_ms,
            "Transaction confirmed"
        );
    }

    pub fn log_reconciled(&self, stage: MintStage, mint: &Pubkey) {
        tracing::info!(
            context_id = %self.context_id,
            stage = %stage,
            mint = %mint,
            "Ledger already reflects stage"
        );
    }

    pub fn log_failure(&self, stage: MintStage, error: &MintError) {
        tracing::warn!(
            context_id = %self.context_id,
            stage = %stage,
            category = %error.category(),
            retryable = %error.is_retryable(),
            signature = ?error.broadcast_signature().map(|s| s.to_string()),
            error = %error,
            "Stage failed"
        );
    }

    pub fn log_minted(&self, mint: &Pubkey, uri: &str) {
        tracing::info!(
            context_id = %self.context_id,
            mint = %mint,
            uri = %uri,
            "🎉 Token minted"
        );
    }

    pub fn warn(&self, message: &str) {
        tracing::warn!(
            context_id = %self.context_id,
            message = %message,
            "Warning"
        );
    }
}
