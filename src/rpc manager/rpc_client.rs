//! [`LedgerRpc`] over the nonblocking Solana RPC client

use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_rpc_client_api::config::RpcSendTransactionConfig;
use solana_sdk::{
    account::Account, commitment_config::CommitmentConfig, hash::Hash, pubkey::Pubkey,
    signature::Signature, transaction::Transaction,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use super::{ConfirmationStatus, LedgerRpc, RpcManagerError};
use crate::metrics::Timer;

/// Single-endpoint ledger client
pub struct SolanaRpc {
    client: Arc<RpcClient>,
    url: String,
    /// Rebroadcast budget handed to the RPC node; `None` keeps the node default
    node_max_retries: Option<usize>,
}

impl SolanaRpc {
    pub fn new(url: &str, timeout: Duration, commitment: CommitmentConfig) -> Self {
        Self {
            client: Arc::new(RpcClient::new_with_timeout_and_commitment(
                url.to_string(),
                timeout,
                commitment,
            )),
            url: url.to_string(),
            node_max_retries: None,
        }
    }

    pub fn with_node_max_retries(mut self, retries: Option<usize>) -> Self {
        self.node_max_retries = retries;
        self
    }

    fn map_err(&self, err: solana_client::client_error::ClientError) -> RpcManagerError {
        RpcManagerError::from_client_error(err, &self.url)
    }

    /// Signature status, from the recent cache or the full ledger history
    async fn lookup_status(
        &self,
        signature: &Signature,
        commitment: CommitmentConfig,
        search_history: bool,
    ) -> Result<ConfirmationStatus, RpcManagerError> {
        let timer = Timer::with_name("rpc_latency_seconds");
        let response = if search_history {
            self.client
                .get_signature_statuses_with_history(&[*signature])
                .await
        } else {
            self.client.get_signature_statuses(&[*signature]).await
        };
        timer.finish();
        let response = response.map_err(|e| self.map_err(e))?;

        let status = match response.value.into_iter().next().flatten() {
            Some(status) => status,
            None => return Ok(ConfirmationStatus::Pending),
        };

        if let Some(err) = status.err.as_ref() {
            return Ok(ConfirmationStatus::Failed(err.to_string()));
        }
        if status.satisfies_commitment(commitment) {
            Ok(ConfirmationStatus::Confirmed)
        } else {
            Ok(ConfirmationStatus::Pending)
        }
    }
}

#[async_trait]
impl LedgerRpc for SolanaRpc {
    fn endpoint(&self) -> &str {
        &self.url
    }

    #[instrument(skip(self), fields(url = %self.url))]
    async fn get_balance(&self, pubkey: &Pubkey) -> Result<u64, RpcManagerError> {
        let timer = Timer::with_name("rpc_latency_seconds");
        let result = self.client.get_balance(pubkey).await;
        timer.finish();
        result.map_err(|e| self.map_err(e))
    }

    async fn get_minimum_balance_for_rent_exemption(
        &self,
        data_len: usize,
    ) -> Result<u64, RpcManagerError> {
        let timer = Timer::with_name("rpc_latency_seconds");
        let result = self
            .client
            .get_minimum_balance_for_rent_exemption(data_len)
            .await;
        timer.finish();
        result.map_err(|e| self.map_err(e))
    }

    async fn get_latest_blockhash(&self) -> Result<Hash, RpcManagerError> {
        let timer = Timer::with_name("rpc_latency_seconds");
        let result = self.client.get_latest_blockhash().await;
        timer.finish();
        result.map_err(|e| self.map_err(e))
    }

    #[instrument(skip(self, transaction), fields(url = %self.url))]
    async fn send_transaction(
        &self,
        transaction: &Transaction,
        preflight: CommitmentConfig,
    ) -> Result<Signature, RpcManagerError> {
        let config = RpcSendTransactionConfig {
            skip_preflight: false,
            preflight_commitment: Some(preflight.commitment),
            max_retries: self.node_max_retries,
            ..Default::default()
        };
        let timer = Timer::with_name("rpc_latency_seconds");
        let result = self
            .client
            .send_transaction_with_config(transaction, config)
            .await;
        timer.finish();
        let signature = result.map_err(|e| self.map_err(e))?;
        debug!(signature = %signature, "Transaction broadcast");
        Ok(signature)
    }

    async fn confirmation_status(
        &self,
        signature: &Signature,
        commitment: CommitmentConfig,
    ) -> Result<ConfirmationStatus, RpcManagerError> {
        self.lookup_status(signature, commitment, false).await
    }

    async fn historical_status(
        &self,
        signature: &Signature,
        commitment: CommitmentConfig,
    ) -> Result<ConfirmationStatus, RpcManagerError> {
        self.lookup_status(signature, commitment, true).await
    }

    async fn get_account(
        &self,
        pubkey: &Pubkey,
        commitment: CommitmentConfig,
    ) -> Result<Option<Account>, RpcManagerError> {
        let timer = Timer::with_name("rpc_latency_seconds");
        let result = self
            .client
            .get_account_with_commitment(pubkey, commitment)
            .await;
        timer.finish();
        Ok(result.map_err(|e| self.map_err(e))?.value)
    }
}
