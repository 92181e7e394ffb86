//! Mint pipeline
//!
//! Drives one mint through both transactions:
//!
//! 1. estimate storage cost, stage payment + content memos
//! 2. create and initialize the mint, create the owner's token account
//! 3. create metadata with a placeholder uri
//! 4. submit transaction 1 and wait for confirmation
//! 5. upload files with the confirmed payment signature
//! 6. update metadata with the permanent uri, mint one token, create the
//!    master edition
//! 7. submit transaction 2
//!
//! Every transition is persisted before the next remote call. A failed run
//! is continued by calling [`MintPipeline::execute`] again on its state (or
//! [`MintPipeline::resume`] with its run id); the ledger is consulted first
//! so nothing that already landed is rebuilt.

pub mod state;
pub mod store;

pub use state::{FailureRecord, MintOutcome, MintRequest, MintStage, PipelineState};
pub use store::PipelineStore;

use solana_sdk::{
    commitment_config::CommitmentConfig,
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Instrument};

use crate::cost::CostEstimator;
use crate::errors::MintError;
use crate::metrics::metrics;
use crate::observability::{CorrelationId, TraceContext};
use crate::pda::{program_ids, ProgramAddressResolver};
use crate::rpc_manager::{ConfirmationStatus, LedgerRpc};
use crate::schema::{self, Key, MasterEditionV2, MetadataAccount};
use crate::structured_logging::StructuredLogger;
use crate::tx_builder::{
    instructions, InstructionBatch, MetadataAuthorities, MetadataUpdate, SubmitOptions,
    TransactionAssembler,
};
use crate::types::{placeholder_uri, FileAsset};
use crate::uploader::StorageUploader;

/// Commitments and bounds used for both transactions
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Preflight commitment for broadcasts
    pub preflight: CommitmentConfig,
    /// Commitment both transactions must reach, also used for ledger reads
    pub confirm_commitment: CommitmentConfig,
    pub confirmation_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            preflight: CommitmentConfig::confirmed(),
            confirm_commitment: CommitmentConfig::finalized(),
            confirmation_timeout: Duration::from_secs(90),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// A stage failure: the stage being reached and why it was not
struct StageFailure {
    target: MintStage,
    error: MintError,
}

trait AtStage<T> {
    fn at(self, target: MintStage) -> Result<T, StageFailure>;
}

impl<T, E: Into<MintError>> AtStage<T> for Result<T, E> {
    fn at(self, target: MintStage) -> Result<T, StageFailure> {
        self.map_err(|e| StageFailure {
            target,
            error: e.into(),
        })
    }
}

/// Orchestrates cost estimation, both transactions and the upload
pub struct MintPipeline {
    rpc: Arc<dyn LedgerRpc>,
    estimator: CostEstimator,
    uploader: StorageUploader,
    resolver: ProgramAddressResolver,
    store: Option<PipelineStore>,
    settings: PipelineSettings,
    cancel: CancellationToken,
}

impl MintPipeline {
    pub fn new(rpc: Arc<dyn LedgerRpc>, estimator: CostEstimator, uploader: StorageUploader) -> Self {
        Self {
            rpc,
            estimator,
            uploader,
            resolver: ProgramAddressResolver::isolated(),
            store: None,
            settings: PipelineSettings::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Share an address cache with other pipelines
    pub fn with_resolver(mut self, resolver: ProgramAddressResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_store(mut self, store: PipelineStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn store(&self) -> Option<&PipelineStore> {
        self.store.as_ref()
    }

    /// Start a fresh run
    pub async fn run(&self, payer: &Keypair, request: MintRequest) -> MintOutcome {
        let mut state = PipelineState::new(uuid::Uuid::new_v4().to_string(), payer.pubkey(), request);
        self.execute(payer, &mut state).await
    }

    /// Continue a persisted run
    pub async fn resume(&self, payer: &Keypair, run_id: &str) -> Result<MintOutcome, MintError> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| MintError::state("No state store configured"))?;
        let mut state = store
            .load(run_id)?
            .ok_or_else(|| MintError::state(format!("Unknown run {}", run_id)))?;
        Ok(self.execute(payer, &mut state).await)
    }

    /// Drive `state` as far as it goes
    ///
    /// A fresh state starts at estimation. A failed or interrupted state is
    /// reconciled against the ledger and continued from the last checkpoint.
    pub async fn execute(&self, payer: &Keypair, state: &mut PipelineState) -> MintOutcome {
        let trace = TraceContext::with_correlation("mint", CorrelationId::from(state.run_id.as_str()));
        let logger = StructuredLogger::new(state.run_id.clone());

        if state.is_finished() {
            return MintOutcome::from_state(state);
        }

        let resumed = state.history.len() > 1;
        if resumed {
            metrics().pipelines_resumed.inc();
        } else {
            metrics().pipelines_started.inc();
        }
        metrics().active_pipelines.inc();
        logger.log_run_started(&state.payer, state.request.assets.len(), resumed);

        let result = self
            .drive(payer, state, &logger)
            .instrument(trace.span())
            .await;
        metrics().active_pipelines.dec();

        match result {
            Ok(()) => {
                metrics().pipelines_succeeded.inc();
                if let (Some(mint), Some(uri)) = (state.mint.as_ref(), state.uri.as_deref()) {
                    logger.log_minted(mint, uri);
                }
            }
            Err(StageFailure { target, error }) => {
                metrics().pipelines_failed.inc();
                logger.log_failure(target, &error);
                state.fail(target, &error);
                if let Err(e) = self.persist(state) {
                    logger.warn(&format!("Failure not persisted: {}", e));
                }
            }
        }
        MintOutcome::from_state(state)
    }

    async fn drive(
        &self,
        payer: &Keypair,
        state: &mut PipelineState,
        logger: &StructuredLogger,
    ) -> Result<(), StageFailure> {
        let next = next_stage(state.last_completed);
        if state.payer != payer.pubkey() {
            return Err(StageFailure {
                target: next,
                error: MintError::state(format!(
                    "Run belongs to {}, not {}",
                    state.payer,
                    payer.pubkey()
                )),
            });
        }
        state.request.reload_assets().at(next)?;

        if self.reconcile(state, logger).await.at(next)? {
            return Ok(());
        }

        if state.last_completed < MintStage::Broadcast1Confirmed {
            state.rewind(MintStage::Idle).at(MintStage::PaymentStaged)?;
            self.first_transaction(payer, state, logger).await?;
        }
        if state.last_completed < MintStage::Uploaded {
            self.upload(state, logger).await?;
        }
        if state.last_completed < MintStage::Broadcast2Confirmed {
            state.rewind(MintStage::Uploaded).at(MintStage::MetadataUpdated)?;
            self.second_transaction(payer, state, logger).await?;
        }
        Ok(())
    }

    /// Bring the state in line with the ledger
    ///
    /// Returns `true` when the run turns out to be finished already.
    async fn reconcile(
        &self,
        state: &mut PipelineState,
        logger: &StructuredLogger,
    ) -> Result<bool, MintError> {
        let Some(mint) = state.mint else {
            return Ok(false);
        };

        let metadata = self.fetch_metadata(&mint).await?;
        match (&metadata, state.last_completed >= MintStage::Broadcast1Confirmed) {
            (None, true) => {
                return Err(MintError::state(format!(
                    "Metadata for mint {} missing although transaction 1 was confirmed",
                    mint
                )));
            }
            (None, false) => return Ok(false),
            (Some(_), true) => {}
            (Some(_), false) => {
                // Transaction 1 landed but its confirmation was never observed
                let signature = self.landed_payment(state).await?;
                state.payment_signature = Some(signature);
                self.advance(state, MintStage::Broadcast1Confirmed, logger)?;
                record_storage_payment(state);
                logger.log_reconciled(MintStage::Broadcast1Confirmed, &mint);
            }
        }

        if self.edition_exists(&mint).await? {
            if state.uri.is_none() {
                state.uri = metadata.map(|m| m.uri().trim_end().to_string());
            }
            self.advance(state, MintStage::Broadcast2Confirmed, logger)?;
            logger.log_reconciled(MintStage::Broadcast2Confirmed, &mint);
            return Ok(true);
        }
        Ok(false)
    }

    /// Pick the transaction 1 attempt the ledger confirmed
    ///
    /// Attempts are looked up in the full ledger history, since a resume can
    /// run long after the node evicted them from its recent status cache.
    async fn landed_payment(&self, state: &PipelineState) -> Result<Signature, MintError> {
        let Some(latest) = state.payment_attempts.last().copied() else {
            return Err(MintError::state("Transaction 1 landed but no broadcast was recorded"));
        };
        for signature in state.payment_attempts.iter().rev() {
            let status = self
                .guarded(async {
                    Ok(self
                        .rpc
                        .historical_status(signature, self.settings.confirm_commitment)
                        .await?)
                })
                .await?;
            if status == ConfirmationStatus::Confirmed {
                return Ok(*signature);
            }
        }
        // Effects are visible but no attempt has reached the commitment yet
        Err(MintError::Timeout {
            signature: latest,
            waited_ms: 0,
        })
    }

    async fn first_transaction(
        &self,
        payer: &Keypair,
        state: &mut PipelineState,
        logger: &StructuredLogger,
    ) -> Result<(), StageFailure> {
        let payer_key = payer.pubkey();

        // Payment + memos
        let target = MintStage::PaymentStaged;
        let files = self.storage_files(state).at(target)?;
        let estimate = self
            .guarded(self.estimator.estimate(&files))
            .await
            .at(target)?;
        let batch = self
            .uploader
            .stage_payment(InstructionBatch::new(), &payer_key, &files, &estimate)
            .at(target)?;
        state.payment_lamports = Some(estimate.payment_lamports());
        self.advance(state, target, logger).at(target)?;

        // Mint account, initialization and the owner's token account
        let target = MintStage::MintCreated;
        let mint = match state.mint_keypair().at(target)? {
            Some(existing) => existing,
            None => Keypair::new(),
        };
        let mint_key = mint.pubkey();
        state.set_mint_keypair(&mint);
        let rent = self
            .guarded(async {
                Ok(self
                    .rpc
                    .get_minimum_balance_for_rent_exemption(instructions::MINT_ACCOUNT_LEN)
                    .await?)
            })
            .await
            .at(target)?;
        let batch = instructions::create_mint_account(batch, &payer_key, mint, rent);
        let batch = instructions::initialize_mint(batch, &mint_key, &payer_key).at(target)?;
        let batch = instructions::create_associated_token_account(
            batch,
            &self.resolver,
            &payer_key,
            &payer_key,
            &mint_key,
        )
        .at(target)?;
        state.token_account = Some(self.resolver.associated_token(&payer_key, &mint_key).at(target)?.address);
        self.advance(state, target, logger).at(target)?;

        // Metadata with a placeholder uri; stays mutable until transaction 2
        let target = MintStage::MetadataCreated;
        let record = state.request.record.with_uri(placeholder_uri());
        let batch = instructions::create_metadata_account_v2(
            batch,
            &self.resolver,
            &MetadataAuthorities::single(mint_key, payer_key),
            &record,
            true,
        )
        .at(target)?;
        state.metadata_address = Some(self.resolver.metadata(&mint_key).at(target)?.address);
        self.advance(state, target, logger).at(target)?;

        // Broadcast
        let target = MintStage::Broadcast1Confirmed;
        let submitted = self
            .submit(payer, batch, "tx1", state, logger)
            .await
            .at(target)?;
        state.payment_signature = Some(submitted);
        self.advance(state, target, logger).at(target)?;
        record_storage_payment(state);
        Ok(())
    }

    async fn upload(&self, state: &mut PipelineState, logger: &StructuredLogger) -> Result<(), StageFailure> {
        let target = MintStage::Uploaded;
        let (Some(payment), Some(mint)) = (state.payment_signature, state.mint) else {
            return Err(StageFailure {
                target,
                error: MintError::state("Upload needs a confirmed payment and a mint"),
            });
        };
        let files = self.storage_files(state).at(target)?;
        let result = self
            .uploader
            .upload(payment, &mint, files, &self.cancel)
            .await
            .at(target)?;

        state.uri = Some(result.uri);
        state.manifest = Some(result.manifest);
        self.advance(state, target, logger).at(target)
    }

    async fn second_transaction(
        &self,
        payer: &Keypair,
        state: &mut PipelineState,
        logger: &StructuredLogger,
    ) -> Result<(), StageFailure> {
        let payer_key = payer.pubkey();

        let target = MintStage::MetadataUpdated;
        let (Some(mint), Some(uri)) = (state.mint, state.uri.clone()) else {
            return Err(StageFailure {
                target,
                error: MintError::state("Finalizing needs a mint and an uploaded uri"),
            });
        };
        let mut update = MetadataUpdate::with_record(state.request.record.with_uri(uri));
        if !state.request.is_mutable {
            update.is_mutable = Some(false);
        }
        let batch = instructions::update_metadata_account_v2(
            InstructionBatch::new(),
            &self.resolver,
            &mint,
            &payer_key,
            &update,
        )
        .at(target)?;
        self.advance(state, target, logger).at(target)?;

        let target = MintStage::EditionFinalized;
        let batch = instructions::mint_one(batch, &self.resolver, &mint, &payer_key, &payer_key).at(target)?;
        let batch = instructions::create_master_edition_v3(
            batch,
            &self.resolver,
            &MetadataAuthorities::single(mint, payer_key),
            state.request.max_supply,
        )
        .at(target)?;
        state.edition_address = Some(self.resolver.master_edition(&mint).at(target)?.address);
        self.advance(state, target, logger).at(target)?;

        let target = MintStage::Broadcast2Confirmed;
        let signature = self
            .submit(payer, batch, "tx2", state, logger)
            .await
            .at(target)?;
        state.finalize_signature = Some(signature);
        self.advance(state, target, logger).at(target)
    }

    /// Broadcast once with a fresh blockhash and wait for confirmation
    async fn submit(
        &self,
        payer: &Keypair,
        batch: InstructionBatch,
        label: &str,
        state: &mut PipelineState,
        logger: &StructuredLogger,
    ) -> Result<Signature, MintError> {
        let blockhash = self
            .guarded(async { Ok(self.rpc.get_latest_blockhash().await?) })
            .await?;
        let opts = SubmitOptions {
            blockhash: Some(blockhash),
            preflight: self.settings.preflight,
            confirm_commitment: self.settings.confirm_commitment,
            timeout: self.settings.confirmation_timeout,
            poll_interval: self.settings.poll_interval,
        };
        logger.log_submission(label, batch.len());
        let assembler = TransactionAssembler::new(batch);
        let is_payment = label == "tx1";

        // Signatures are deterministic, so the attempt is on disk before it
        // can reach the ledger
        let expected = assembler.sign(payer, blockhash)?.signatures[0];
        if is_payment && !state.payment_attempts.contains(&expected) {
            state.payment_attempts.push(expected);
            self.persist(state)?;
        }

        let result = assembler
            .submit(self.rpc.as_ref(), payer, &opts, &self.cancel)
            .await;

        if is_payment {
            let broadcast = match &result {
                Ok(done) => Some(done.signature),
                Err(e) => e.broadcast_signature(),
            };
            match broadcast {
                Some(signature) if !state.payment_attempts.contains(&signature) => {
                    state.payment_attempts.push(signature);
                }
                Some(_) => {}
                // Rejected or cancelled before the broadcast: nothing can land
                None => state.payment_attempts.retain(|s| *s != expected),
            }
        }

        let submitted = result?;
        logger.log_confirmed(label, &submitted.signature, submitted.confirmed_in_ms);
        Ok(submitted.signature)
    }

    /// User assets followed by the generated metadata document
    fn storage_files(&self, state: &PipelineState) -> Result<Vec<FileAsset>, MintError> {
        let assets = &state.request.assets;
        if assets.is_empty() {
            return Err(MintError::state("Nothing to store: no assets"));
        }
        if let Some(empty) = assets.iter().find(|a| a.bytes.is_empty()) {
            return Err(MintError::state(format!("Asset {} has no content", empty.name)));
        }
        let mut files = assets.clone();
        files.push(StorageUploader::metadata_file(&state.request.record, assets)?);
        Ok(files)
    }

    async fn fetch_metadata(&self, mint: &Pubkey) -> Result<Option<MetadataAccount>, MintError> {
        let address = self.resolver.metadata(mint)?.address;
        let account = self
            .guarded(async {
                Ok(self
                    .rpc
                    .get_account(&address, self.settings.confirm_commitment)
                    .await?)
            })
            .await?;
        let Some(account) = account else {
            return Ok(None);
        };
        if account.owner != program_ids::TOKEN_METADATA {
            warn!(%address, owner = %account.owner, "Metadata address owned by another program");
            return Ok(None);
        }
        let decoded: MetadataAccount = schema::decode_account(&account.data)?;
        if decoded.key != Key::MetadataV1 || decoded.mint != *mint {
            debug!(%address, "Metadata account does not belong to this mint");
            return Ok(None);
        }
        Ok(Some(decoded))
    }

    async fn edition_exists(&self, mint: &Pubkey) -> Result<bool, MintError> {
        let address = self.resolver.master_edition(mint)?.address;
        let account = self
            .guarded(async {
                Ok(self
                    .rpc
                    .get_account(&address, self.settings.confirm_commitment)
                    .await?)
            })
            .await?;
        let Some(account) = account else {
            return Ok(false);
        };
        if account.owner != program_ids::TOKEN_METADATA {
            return Ok(false);
        }
        Ok(matches!(
            schema::decode_account::<MasterEditionV2>(&account.data),
            Ok(edition) if edition.key == Key::MasterEditionV2
        ))
    }

    fn advance(
        &self,
        state: &mut PipelineState,
        stage: MintStage,
        logger: &StructuredLogger,
    ) -> Result<(), MintError> {
        state.advance(stage)?;
        metrics().stage_transitions.inc();
        logger.log_stage(stage, state.mint.as_ref());
        self.persist(state)
    }

    fn persist(&self, state: &PipelineState) -> Result<(), MintError> {
        match &self.store {
            Some(store) => store.save(state),
            None => Ok(()),
        }
    }

    /// Race a remote call against cancellation; nothing has been broadcast
    async fn guarded<T, F>(&self, fut: F) -> Result<T, MintError>
    where
        F: Future<Output = Result<T, MintError>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(MintError::Cancelled { signature: None }),
            result = fut => result,
        }
    }
}

/// Count the storage payment once transaction 1 is known to have landed
fn record_storage_payment(state: &PipelineState) {
    if let Some(lamports) = state.payment_lamports {
        metrics().storage_lamports_paid.inc_by(lamports);
    }
}

/// Stage a run is working towards after completing `stage`
fn next_stage(stage: MintStage) -> MintStage {
    match stage {
        MintStage::Idle => MintStage::PaymentStaged,
        MintStage::PaymentStaged => MintStage::MintCreated,
        MintStage::MintCreated => MintStage::MetadataCreated,
        MintStage::MetadataCreated => MintStage::Broadcast1Confirmed,
        MintStage::Broadcast1Confirmed => MintStage::Uploaded,
        MintStage::Uploaded => MintStage::MetadataUpdated,
        MintStage::MetadataUpdated => MintStage::EditionFinalized,
        MintStage::EditionFinalized => MintStage::Broadcast2Confirmed,
        MintStage::Broadcast2Confirmed | MintStage::Failed => stage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_stage_walks_forward() {
        let mut stage = MintStage::Idle;
        let mut seen = vec![stage];
        while stage != MintStage::Broadcast2Confirmed {
            stage = next_stage(stage);
            seen.push(stage);
        }
        assert_eq!(seen.len(), 9);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }
}
