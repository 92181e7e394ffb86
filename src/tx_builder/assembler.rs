//! Sign, broadcast and confirm one instruction batch
//!
//! The assembler never re-broadcasts and never retries. A transaction is
//! sent at most once per `submit` call; anything after the broadcast is
//! reported with the signature so the caller can reconcile against the
//! ledger.

use solana_sdk::{
    commitment_config::CommitmentConfig,
    hash::Hash,
    signature::{Keypair, Signature, Signer},
    transaction::Transaction,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::MintError;
use crate::metrics::{metrics, Timer};
use crate::rpc_manager::{ConfirmationStatus, LedgerRpc};
use crate::tx_builder::context::InstructionBatch;
use crate::tx_builder::errors::TransactionBuilderError;
use crate::tx_builder::instructions::sanity_check_mint_order;

/// Per-submission knobs
#[derive(Debug, Clone)]
pub struct SubmitOptions {
    /// Sign against this blockhash instead of fetching a fresh one
    pub blockhash: Option<Hash>,
    /// Commitment used by the node's preflight simulation
    pub preflight: CommitmentConfig,
    /// Commitment the confirmation wait must observe
    pub confirm_commitment: CommitmentConfig,
    /// Upper bound on the confirmation wait
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            blockhash: None,
            preflight: CommitmentConfig::confirmed(),
            confirm_commitment: CommitmentConfig::finalized(),
            timeout: Duration::from_secs(90),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// A transaction observed at the requested commitment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedTransaction {
    pub signature: Signature,
    pub blockhash: Hash,
    pub confirmed_in_ms: u64,
}

/// Turns an [`InstructionBatch`] into a confirmed transaction
#[derive(Debug)]
pub struct TransactionAssembler {
    batch: InstructionBatch,
}

impl TransactionAssembler {
    pub fn new(batch: InstructionBatch) -> Self {
        Self { batch }
    }

    pub fn batch(&self) -> &InstructionBatch {
        &self.batch
    }

    /// Build and sign with the payer first, then every auxiliary signer
    pub fn sign(&self, payer: &Keypair, blockhash: Hash) -> Result<Transaction, TransactionBuilderError> {
        if self.batch.is_empty() {
            return Err(TransactionBuilderError::validation(
                "Cannot assemble an empty transaction",
            ));
        }
        sanity_check_mint_order(self.batch.instructions())?;

        let mut tx = Transaction::new_with_payer(self.batch.instructions(), Some(&payer.pubkey()));
        let mut signers: Vec<&dyn Signer> = Vec::with_capacity(1 + self.batch.signers().len());
        signers.push(payer);
        for signer in self.batch.signers() {
            signers.push(signer);
        }

        tx.try_sign(&signers, blockhash)
            .map_err(|e| TransactionBuilderError::Signing(e.to_string()))?;
        Ok(tx)
    }

    /// Sign, broadcast once and wait for `opts.confirm_commitment`
    ///
    /// Errors:
    /// - `Cancelled { signature: None }` when cancelled before the broadcast
    /// - `Submission { signature: None }` when the node rejected the broadcast
    /// - `Submission { signature: Some(_) }` when the ledger executed and failed it
    /// - `Timeout` or `Cancelled { signature: Some(_) }` when the outcome is unknown
    ///
    /// A broadcast whose answer was lost (transport failure, timeout, server
    /// error) is not a rejection: the signature is known from signing, so the
    /// confirmation wait runs on it as if the node had answered.
    pub async fn submit(
        &self,
        rpc: &dyn LedgerRpc,
        payer: &Keypair,
        opts: &SubmitOptions,
        cancel: &CancellationToken,
    ) -> Result<SubmittedTransaction, MintError> {
        if cancel.is_cancelled() {
            return Err(MintError::Cancelled { signature: None });
        }

        let blockhash = match opts.blockhash {
            Some(hash) => hash,
            None => tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(MintError::Cancelled { signature: None }),
                hash = rpc.get_latest_blockhash() => hash?,
            },
        };

        let tx = self.sign(payer, blockhash)?;
        let expected = tx.signatures[0];

        if cancel.is_cancelled() {
            return Err(MintError::Cancelled { signature: None });
        }
        let signature = tokio::select! {
            biased;
            // The request may already be on the wire
            _ = cancel.cancelled() => return Err(MintError::Cancelled { signature: Some(expected) }),
            sent = rpc.send_transaction(&tx, opts.preflight) => match sent {
                Ok(sig) => sig,
                Err(e) if e.may_have_landed() => {
                    warn!(
                        endpoint = rpc.endpoint(),
                        signature = %expected,
                        error = %e,
                        "Broadcast answer lost, waiting on the signature"
                    );
                    expected
                }
                Err(e) => {
                    metrics().tx_failed.inc();
                    warn!(endpoint = rpc.endpoint(), error = %e, "Broadcast rejected");
                    return Err(MintError::Submission {
                        reason: e.to_string(),
                        signature: None,
                    });
                }
            },
        };
        metrics().tx_submitted.inc();
        if signature != expected {
            warn!(%signature, %expected, "Node returned an unexpected signature");
        }
        debug!(%signature, instructions = self.batch.len(), "Awaiting confirmation");

        let timer = Timer::with_name("confirmation_latency_seconds");
        let waited = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(MintError::Cancelled { signature: Some(signature) });
            }
            waited = tokio::time::timeout(opts.timeout, self.await_commitment(rpc, &signature, opts)) => waited,
        };

        match waited {
            Ok(Ok(())) => {
                let confirmed_in_ms = timer.elapsed_ms();
                timer.finish();
                metrics().tx_confirmed.inc();
                info!(%signature, confirmed_in_ms, "✅ Transaction confirmed");
                Ok(SubmittedTransaction {
                    signature,
                    blockhash,
                    confirmed_in_ms,
                })
            }
            Ok(Err(e)) => {
                metrics().tx_failed.inc();
                Err(e)
            }
            Err(_) => {
                metrics().tx_timeouts.inc();
                warn!(%signature, timeout_ms = opts.timeout.as_millis() as u64, "Confirmation not observed");
                Err(MintError::Timeout {
                    signature,
                    waited_ms: timer.elapsed_ms(),
                })
            }
        }
    }

    /// Poll the signature until it reaches the commitment or fails
    ///
    /// Status polling errors are logged and polled through; the outer
    /// timeout bounds the loop.
    async fn await_commitment(
        &self,
        rpc: &dyn LedgerRpc,
        signature: &Signature,
        opts: &SubmitOptions,
    ) -> Result<(), MintError> {
        loop {
            match rpc
                .confirmation_status(signature, opts.confirm_commitment)
                .await
            {
                Ok(ConfirmationStatus::Confirmed) => return Ok(()),
                Ok(ConfirmationStatus::Failed(reason)) => {
                    warn!(%signature, %reason, "Transaction failed on ledger");
                    return Err(MintError::Submission {
                        reason,
                        signature: Some(*signature),
                    });
                }
                Ok(ConfirmationStatus::Pending) => {}
                Err(e) => debug!(%signature, error = %e, "Status poll failed"),
            }
            tokio::time::sleep(opts.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockLedger;
    use solana_sdk::{instruction::Instruction, pubkey::Pubkey};

    fn memo_batch() -> InstructionBatch {
        InstructionBatch::new().push(Instruction::new_with_bytes(
            crate::pda::program_ids::MEMO,
            b"hello",
            vec![],
        ))
    }

    fn fast_opts() -> SubmitOptions {
        SubmitOptions {
            timeout: Duration::from_millis(200),
            poll_interval: Duration::from_millis(5),
            ..SubmitOptions::default()
        }
    }

    #[test]
    fn test_sign_includes_auxiliary_signers() {
        let payer = Keypair::new();
        let extra = Keypair::new();
        let extra_key = extra.pubkey();
        #[allow(deprecated)]
        let ix = solana_sdk::system_instruction::create_account(
            &payer.pubkey(),
            &extra_key,
            1,
            82,
            &Pubkey::new_unique(),
        );
        let assembler = TransactionAssembler::new(InstructionBatch::new().push_signed(ix, extra));

        let tx = assembler.sign(&payer, Hash::new_unique()).unwrap();
        assert_eq!(tx.signatures.len(), 2);
        assert_eq!(tx.message.account_keys[0], payer.pubkey());
        assert!(tx.verify().is_ok());
    }

    #[test]
    fn test_sign_rejects_empty_batch() {
        let assembler = TransactionAssembler::new(InstructionBatch::new());
        assert!(assembler.sign(&Keypair::new(), Hash::new_unique()).is_err());
    }

    #[tokio::test]
    async fn test_submit_confirms() {
        let ledger = MockLedger::new();
        let payer = Keypair::new();
        let assembler = TransactionAssembler::new(memo_batch());

        let submitted = assembler
            .submit(&ledger, &payer, &fast_opts(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(ledger.sent_count(), 1);
        assert_eq!(ledger.sent_signatures(), vec![submitted.signature]);
    }

    #[tokio::test]
    async fn test_submit_cancelled_before_broadcast() {
        let ledger = MockLedger::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = TransactionAssembler::new(memo_batch())
            .submit(&ledger, &Keypair::new(), &fast_opts(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, MintError::Cancelled { signature: None }));
        assert_eq!(ledger.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_submit_timeout_keeps_signature() {
        let ledger = MockLedger::new();
        ledger.set_never_confirm(true);

        let err = TransactionAssembler::new(memo_batch())
            .submit(&ledger, &Keypair::new(), &fast_opts(), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            MintError::Timeout { signature, .. } => {
                assert_eq!(ledger.sent_signatures(), vec![signature]);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        // Exactly one broadcast, no silent rebroadcast
        assert_eq!(ledger.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_lost_answer_still_confirms() {
        let ledger = MockLedger::new();
        ledger.lose_next_answer("operation timed out");
        let payer = Keypair::new();

        let submitted = TransactionAssembler::new(memo_batch())
            .submit(&ledger, &payer, &fast_opts(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(ledger.sent_signatures(), vec![submitted.signature]);
    }

    #[tokio::test]
    async fn test_lost_broadcast_times_out_with_signature() {
        let ledger = MockLedger::new();
        ledger.fail_next_send("error sending request for url (http://127.0.0.1:8899/)");
        let payer = Keypair::new();
        let blockhash = Hash::new_unique();
        let assembler = TransactionAssembler::new(memo_batch());
        let expected = assembler.sign(&payer, blockhash).unwrap().signatures[0];
        let opts = SubmitOptions {
            blockhash: Some(blockhash),
            ..fast_opts()
        };

        let err = assembler
            .submit(&ledger, &payer, &opts, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MintError::Timeout { signature, .. } if signature == expected));
        assert_eq!(ledger.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_submit_rejected_broadcast() {
        let ledger = MockLedger::new();
        ledger.fail_next_send("Transaction simulation failed: insufficient lamports");

        let err = TransactionAssembler::new(memo_batch())
            .submit(&ledger, &Keypair::new(), &fast_opts(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MintError::Submission { signature: None, .. }));
        assert_eq!(ledger.sent_count(), 0);
    }
}
