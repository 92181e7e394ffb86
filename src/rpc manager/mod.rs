//! RPC Manager Module
//!
//! The ledger surface the mint pipeline needs: balances, rent exemption,
//! blockhashes, submission, signature status and account reads. Everything
//! above this module talks to [`LedgerRpc`] so tests can swap in an
//! in-memory ledger.

use async_trait::async_trait;
use solana_sdk::{
    account::Account, commitment_config::CommitmentConfig, hash::Hash, pubkey::Pubkey,
    signature::Signature, transaction::Transaction,
};

// Submodules
pub mod rpc_client;
pub mod rpc_errors;

// Re-exports for convenience
pub use rpc_client::SolanaRpc;
pub use rpc_errors::RpcManagerError;

/// Observed state of a submitted signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationStatus {
    /// Unknown to the node, or not yet at the requested commitment
    Pending,
    /// Landed and reached the requested commitment
    Confirmed,
    /// Landed but the ledger reported an execution error
    Failed(String),
}

/// Ledger access used by the pipeline
#[async_trait]
pub trait LedgerRpc: Send + Sync {
    /// Endpoint label for logs and errors
    fn endpoint(&self) -> &str;

    async fn get_balance(&self, pubkey: &Pubkey) -> Result<u64, RpcManagerError>;

    async fn get_minimum_balance_for_rent_exemption(
        &self,
        data_len: usize,
    ) -> Result<u64, RpcManagerError>;

    async fn get_latest_blockhash(&self) -> Result<Hash, RpcManagerError>;

    /// Broadcast a signed transaction; preflight runs at `preflight` commitment
    async fn send_transaction(
        &self,
        transaction: &Transaction,
        preflight: CommitmentConfig,
    ) -> Result<Signature, RpcManagerError>;

    async fn confirmation_status(
        &self,
        signature: &Signature,
        commitment: CommitmentConfig,
    ) -> Result<ConfirmationStatus, RpcManagerError>;

    /// Like [`confirmation_status`](Self::confirmation_status), but also
    /// searches the ledger history beyond the node's recent status cache
    async fn historical_status(
        &self,
        signature: &Signature,
        commitment: CommitmentConfig,
    ) -> Result<ConfirmationStatus, RpcManagerError> {
        self.confirmation_status(signature, commitment).await
    }

    /// `None` when the account does not exist
    async fn get_account(
        &self,
        pubkey: &Pubkey,
        commitment: CommitmentConfig,
    ) -> Result<Option<Account>, RpcManagerError>;
}

/// Map a configured commitment name onto a [`CommitmentConfig`]
///
/// `low` and `max` are accepted as aliases for `confirmed` and `finalized`.
pub fn parse_commitment(name: &str) -> Option<CommitmentConfig> {
    match name.to_ascii_lowercase().as_str() {
        "processed" => Some(CommitmentConfig::processed()),
        "confirmed" | "single" | "low" => Some(CommitmentConfig::confirmed()),
        "finalized" | "max" => Some(CommitmentConfig::finalized()),
        _ => None,
    }
}
