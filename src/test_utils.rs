//! Test Utilities Module
//!
//! In-memory stand-ins for the ledger, the pricing oracle and the storage
//! gateway. The ledger applies the effects of token-metadata instructions
//! so resume paths can be exercised against realistic account state.
//!
//! These utilities are only compiled when running tests or when the
//! `test_utils` feature is enabled.

#![cfg(any(test, feature = "test_utils"))]

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use solana_sdk::{
    account::Account,
    commitment_config::CommitmentConfig,
    hash::Hash,
    instruction::Instruction,
    pubkey::Pubkey,
    signature::Signature,
    transaction::Transaction,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::cost::{PricingOracle, UsdRates};
use crate::errors::MintError;
use crate::pda::{program_ids, ProgramAddressResolver};
use crate::rpc_manager::{ConfirmationStatus, LedgerRpc, RpcManagerError};
use crate::schema::{
    self, CreateMasterEditionArgs, CreateMetadataAccountArgsV2, Key, MasterEditionV2,
    MetadataAccount, UpdateMetadataAccountArgsV2,
};
use crate::uploader::{GatewayResponse, ManifestEntry, StorageGateway, UploadRequest};

/// Rent-exempt minimum reported by the mock ledger
pub const MOCK_RENT_LAMPORTS: u64 = 1_461_600;

/// Transaction id the mock gateway reports for the path manifest
pub const MOCK_MANIFEST_TX: &str = "mock-manifest-transaction-id";

/// In-memory ledger
///
/// Every accepted transaction is recorded. Unless configured otherwise it
/// confirms immediately and its token-metadata instructions are applied to
/// the account map.
pub struct MockLedger {
    accounts: DashMap<Pubkey, Account>,
    balances: DashMap<Pubkey, u64>,
    statuses: DashMap<Signature, ConfirmationStatus>,
    /// Statuses evicted from the recent cache, still visible to history lookups
    archived: DashMap<Signature, ConfirmationStatus>,
    sent: Mutex<Vec<Transaction>>,
    send_failures: Mutex<VecDeque<String>>,
    ledger_failures: Mutex<VecDeque<String>>,
    lost_answers: Mutex<VecDeque<String>>,
    never_confirm: AtomicBool,
    apply_effects: AtomicBool,
    blockhashes_served: AtomicUsize,
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLedger {
    pub fn new() -> Self {
        Self {
            accounts: DashMap::new(),
            balances: DashMap::new(),
            statuses: DashMap::new(),
            archived: DashMap::new(),
            sent: Mutex::new(Vec::new()),
            send_failures: Mutex::new(VecDeque::new()),
            ledger_failures: Mutex::new(VecDeque::new()),
            lost_answers: Mutex::new(VecDeque::new()),
            never_confirm: AtomicBool::new(false),
            apply_effects: AtomicBool::new(true),
            blockhashes_served: AtomicUsize::new(0),
        }
    }

    pub fn set_balance(&self, pubkey: Pubkey, lamports: u64) {
        self.balances.insert(pubkey, lamports);
    }

    /// Reject the next broadcast with `message` (classified like a node error)
    pub fn fail_next_send(&self, message: &str) {
        self.send_failures.lock().push_back(message.to_string());
    }

    /// Accept the next broadcast but report it as failed on the ledger
    pub fn fail_next_on_ledger(&self, message: &str) {
        self.ledger_failures.lock().push_back(message.to_string());
    }

    /// Process the next broadcast normally, then answer with `message`
    /// as if the response had been lost on the way back
    pub fn lose_next_answer(&self, message: &str) {
        self.lost_answers.lock().push_back(message.to_string());
    }

    /// Keep every signature pending; effects still land
    pub fn set_never_confirm(&self, never: bool) {
        self.never_confirm.store(never, Ordering::SeqCst);
    }

    /// Mark a previously sent signature as confirmed
    pub fn confirm(&self, signature: &Signature) {
        self.statuses.insert(*signature, ConfirmationStatus::Confirmed);
    }

    /// Record `status` for a signature the ledger never saw sent
    pub fn set_status(&self, signature: Signature, status: ConfirmationStatus) {
        self.statuses.insert(signature, status);
    }

    /// Move every known status out of the recent cache
    ///
    /// Afterwards only `historical_status` still finds them.
    pub fn expire_recent_statuses(&self) {
        let recent: Vec<Signature> = self.statuses.iter().map(|e| *e.key()).collect();
        for signature in recent {
            if let Some((signature, status)) = self.statuses.remove(&signature) {
                self.archived.insert(signature, status);
            }
        }
    }

    /// Accept transactions without applying their account changes
    pub fn set_apply_effects(&self, apply: bool) {
        self.apply_effects.store(apply, Ordering::SeqCst);
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn sent_transactions(&self) -> Vec<Transaction> {
        self.sent.lock().clone()
    }

    pub fn sent_signatures(&self) -> Vec<Signature> {
        self.sent.lock().iter().map(|tx| tx.signatures[0]).collect()
    }

    pub fn blockhashes_served(&self) -> usize {
        self.blockhashes_served.load(Ordering::SeqCst)
    }

    pub fn account(&self, pubkey: &Pubkey) -> Option<Account> {
        self.accounts.get(pubkey).map(|a| a.clone())
    }

    pub fn insert_account(&self, pubkey: Pubkey, account: Account) {
        self.accounts.insert(pubkey, account);
    }

    /// Decoded metadata for `mint`, if the ledger holds it
    pub fn metadata(&self, mint: &Pubkey) -> Option<MetadataAccount> {
        let address = ProgramAddressResolver::isolated().metadata(mint).ok()?.address;
        let account = self.account(&address)?;
        schema::decode_account(&account.data).ok()
    }

    /// Decoded master edition for `mint`, if the ledger holds it
    pub fn master_edition(&self, mint: &Pubkey) -> Option<MasterEditionV2> {
        let address = ProgramAddressResolver::isolated()
            .master_edition(mint)
            .ok()?
            .address;
        let account = self.account(&address)?;
        schema::decode_account(&account.data).ok()
    }

    /// Program errors the real ledger would raise for this transaction
    fn execution_error(&self, tx: &Transaction) -> Option<String> {
        for ix in decompile(tx) {
            if ix.program_id != program_ids::TOKEN_METADATA {
                continue;
            }
            let target = ix.accounts[0].pubkey;
            match ix.data.first() {
                Some(16) | Some(17) if self.accounts.contains_key(&target) => {
                    return Some(format!("account {} already in use", target));
                }
                Some(15) => match self
                    .account(&target)
                    .and_then(|a| schema::decode_account::<MetadataAccount>(&a.data).ok())
                {
                    None => return Some(format!("metadata {} not initialized", target)),
                    Some(m) if !m.is_mutable => {
                        return Some("Data is immutable".to_string());
                    }
                    Some(_) => {}
                },
                _ => {}
            }
        }
        None
    }

    fn apply(&self, tx: &Transaction) {
        for ix in decompile(tx) {
            if ix.program_id != program_ids::TOKEN_METADATA {
                continue;
            }
            match ix.data.first() {
                Some(16) => self.apply_create_metadata(&ix),
                Some(15) => self.apply_update_metadata(&ix),
                Some(17) => self.apply_master_edition(&ix),
                _ => {}
            }
        }
    }

    fn apply_create_metadata(&self, ix: &Instruction) {
        let Ok(args) = schema::decode_instruction::<CreateMetadataAccountArgsV2>(&ix.data) else {
            return;
        };
        let account = MetadataAccount {
            key: Key::MetadataV1,
            update_authority: ix.accounts[4].pubkey,
            mint: ix.accounts[1].pubkey,
            collection: args.data.collection.clone(),
            uses: args.data.uses.clone(),
            data: args.data.into(),
            primary_sale_happened: false,
            is_mutable: args.is_mutable,
            edition_nonce: None,
            token_standard: None,
        };
        self.write_program_account(ix.accounts[0].pubkey, &account);
    }

    fn apply_update_metadata(&self, ix: &Instruction) {
        let Ok(args) = schema::decode_instruction::<UpdateMetadataAccountArgsV2>(&ix.data) else {
            return;
        };
        let address = ix.accounts[0].pubkey;
        let Some(mut current) = self
            .account(&address)
            .and_then(|a| schema::decode_account::<MetadataAccount>(&a.data).ok())
        else {
            return;
        };
        if let Some(data) = args.data {
            current.collection = data.collection.clone();
            current.uses = data.uses.clone();
            current.data = data.into();
        }
        if let Some(authority) = args.update_authority {
            current.update_authority = authority;
        }
        if let Some(sold) = args.primary_sale_happened {
            current.primary_sale_happened = sold;
        }
        if let Some(mutable) = args.is_mutable {
            current.is_mutable = mutable;
        }
        self.write_program_account(address, &current);
    }

    fn apply_master_edition(&self, ix: &Instruction) {
        let Ok(args) = schema::decode_instruction::<CreateMasterEditionArgs>(&ix.data) else {
            return;
        };
        let edition = MasterEditionV2 {
            key: Key::MasterEditionV2,
            supply: 0,
            max_supply: args.max_supply,
        };
        self.write_program_account(ix.accounts[0].pubkey, &edition);
    }

    fn write_program_account<T: schema::Schema>(&self, address: Pubkey, value: &T) {
        if let Ok(data) = schema::encode(value) {
            self.accounts.insert(
                address,
                Account {
                    lamports: MOCK_RENT_LAMPORTS,
                    data,
                    owner: program_ids::TOKEN_METADATA,
                    executable: false,
                    rent_epoch: 0,
                },
            );
        }
    }
}

/// Rebuild instructions from a compiled legacy transaction
pub fn decompile(tx: &Transaction) -> Vec<Instruction> {
    let keys = &tx.message.account_keys;
    tx.message
        .instructions
        .iter()
        .map(|ix| Instruction {
            program_id: keys[ix.program_id_index as usize],
            accounts: ix
                .accounts
                .iter()
                .map(|&i| {
                    let i = i as usize;
                    solana_sdk::instruction::AccountMeta {
                        pubkey: keys[i],
                        is_signer: tx.message.is_signer(i),
                        // Same as `Message::is_writable_index`, which is
                        // `pub(super)` as of solana-message 2.4.
                        is_writable: {
                            let h = &tx.message.header;
                            i < (h.num_required_signatures as usize)
                                .saturating_sub(h.num_readonly_signed_accounts as usize)
                                || (i >= h.num_required_signatures as usize
                                    && i < tx.message.account_keys.len().saturating_sub(
                                        h.num_readonly_unsigned_accounts as usize,
                                    ))
                        },
                    }
                })
                .collect(),
            data: ix.data.clone(),
        })
        .collect()
}

#[async_trait]
impl LedgerRpc for MockLedger {
    fn endpoint(&self) -> &str {
        "mock://ledger"
    }

    async fn get_balance(&self, pubkey: &Pubkey) -> Result<u64, RpcManagerError> {
        Ok(self.balances.get(pubkey).map(|b| *b).unwrap_or(0))
    }

    async fn get_minimum_balance_for_rent_exemption(
        &self,
        _data_len: usize,
    ) -> Result<u64, RpcManagerError> {
        Ok(MOCK_RENT_LAMPORTS)
    }

    async fn get_latest_blockhash(&self) -> Result<Hash, RpcManagerError> {
        self.blockhashes_served.fetch_add(1, Ordering::SeqCst);
        Ok(Hash::new_unique())
    }

    async fn send_transaction(
        &self,
        transaction: &Transaction,
        _preflight: CommitmentConfig,
    ) -> Result<Signature, RpcManagerError> {
        if let Some(message) = self.send_failures.lock().pop_front() {
            return Err(RpcManagerError::classify(&message, self.endpoint()));
        }
        if transaction.verify().is_err() {
            return Err(RpcManagerError::TransactionRejected {
                endpoint: self.endpoint().to_string(),
                message: "signature verification failed".to_string(),
            });
        }

        let signature = transaction.signatures[0];
        self.sent.lock().push(transaction.clone());

        let rejection = self
            .ledger_failures
            .lock()
            .pop_front()
            .or_else(|| self.execution_error(transaction));
        let status = match rejection {
            Some(reason) => ConfirmationStatus::Failed(reason),
            None => {
                if self.apply_effects.load(Ordering::SeqCst) {
                    self.apply(transaction);
                }
                if self.never_confirm.load(Ordering::SeqCst) {
                    ConfirmationStatus::Pending
                } else {
                    ConfirmationStatus::Confirmed
                }
            }
        };
        self.statuses.insert(signature, status);

        if let Some(message) = self.lost_answers.lock().pop_front() {
            return Err(RpcManagerError::classify(&message, self.endpoint()));
        }
        Ok(signature)
    }

    async fn confirmation_status(
        &self,
        signature: &Signature,
        _commitment: CommitmentConfig,
    ) -> Result<ConfirmationStatus, RpcManagerError> {
        Ok(self
            .statuses
            .get(signature)
            .map(|s| s.clone())
            .unwrap_or(ConfirmationStatus::Pending))
    }

    async fn historical_status(
        &self,
        signature: &Signature,
        commitment: CommitmentConfig,
    ) -> Result<ConfirmationStatus, RpcManagerError> {
        match self.archived.get(signature) {
            Some(status) => Ok(status.clone()),
            None => self.confirmation_status(signature, commitment).await,
        }
    }

    async fn get_account(
        &self,
        pubkey: &Pubkey,
        _commitment: CommitmentConfig,
    ) -> Result<Option<Account>, RpcManagerError> {
        Ok(self.account(pubkey))
    }
}

/// Fixed-price oracle
pub struct MockOracle {
    winston: u64,
    rates: UsdRates,
    failure: Option<String>,
    last_bytes: Mutex<Option<u64>>,
    calls: AtomicUsize,
}

impl MockOracle {
    pub fn new(winston: u64, ar_usd: f64, sol_usd: f64) -> Self {
        Self {
            winston,
            rates: UsdRates { ar_usd, sol_usd },
            failure: None,
            last_bytes: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// Oracle whose every call fails with `message`
    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::new(0, 1.0, 1.0)
        }
    }

    pub fn last_quoted_bytes(&self) -> Option<u64> {
        *self.last_bytes.lock()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PricingOracle for MockOracle {
    async fn storage_price_winston(&self, total_bytes: u64) -> Result<u64, MintError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.failure {
            return Err(MintError::estimation(message.clone()));
        }
        *self.last_bytes.lock() = Some(total_bytes);
        Ok(self.winston)
    }

    async fn usd_rates(&self) -> Result<UsdRates, MintError> {
        if let Some(message) = &self.failure {
            return Err(MintError::estimation(message.clone()));
        }
        Ok(self.rates)
    }
}

/// What the mock gateway saw for one call
#[derive(Debug, Clone)]
pub struct RecordedUpload {
    pub transaction: Signature,
    pub env: String,
    pub tags_json: String,
    pub file_names: Vec<String>,
    pub total_bytes: u64,
}

/// Gateway answering from a queue of canned responses
///
/// With an empty queue every file gets the id `ar-<filename>` and a path
/// manifest entry with [`MOCK_MANIFEST_TX`] is added.
#[derive(Default)]
pub struct MockGateway {
    responses: Mutex<VecDeque<Result<GatewayResponse, String>>>,
    requests: Mutex<Vec<RecordedUpload>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the next call with `response`
    pub fn respond_with(&self, response: GatewayResponse) {
        self.responses.lock().push_back(Ok(response));
    }

    /// Fail the next call at the transport level
    pub fn fail_with(&self, message: &str) {
        self.responses.lock().push_back(Err(message.to_string()));
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<RecordedUpload> {
        self.requests.lock().clone()
    }

    fn default_response(request: &UploadRequest) -> GatewayResponse {
        let mut messages: Vec<ManifestEntry> = request
            .files
            .iter()
            .map(|f| ManifestEntry {
                filename: f.name.clone(),
                transaction_id: format!("ar-{}", f.name),
            })
            .collect();
        messages.push(ManifestEntry {
            filename: crate::uploader::MANIFEST_FILE_NAME.to_string(),
            transaction_id: MOCK_MANIFEST_TX.to_string(),
        });
        GatewayResponse {
            messages,
            error: None,
        }
    }
}

#[async_trait]
impl StorageGateway for MockGateway {
    async fn upload(&self, request: &UploadRequest) -> Result<GatewayResponse, MintError> {
        self.requests.lock().push(RecordedUpload {
            transaction: request.transaction,
            env: request.env.clone(),
            tags_json: request.tags_json()?,
            file_names: request.files.iter().map(|f| f.name.clone()).collect(),
            total_bytes: request.total_bytes(),
        });
        match self.responses.lock().pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(MintError::upload(message)),
            None => Ok(Self::default_response(request)),
        }
    }
}
