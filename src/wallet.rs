//! Wallet management module
//!
//! Keys come from a BIP-39 seed phrase derived along `m/44'/501'/0'/0'`, the
//! path used by common Solana wallets, or from a keypair file.

use anyhow::{Context, Result};
use bip39::{Language, Mnemonic, Seed};
use solana_sdk::{
    derivation_path::DerivationPath,
    native_token::LAMPORTS_PER_SOL,
    pubkey::Pubkey,
    signature::{Keypair, Signer},
    signer::keypair::keypair_from_seed_and_derivation_path,
};
use std::sync::Arc;

use crate::errors::MintError;
use crate::rpc_manager::LedgerRpc;

/// Derives a signing keypair from a seed phrase
#[derive(Debug, Clone)]
pub struct KeyDeriver {
    path: DerivationPath,
    passphrase: String,
}

impl Default for KeyDeriver {
    fn default() -> Self {
        Self {
            path: Self::default_path(),
            passphrase: String::new(),
        }
    }
}

impl KeyDeriver {
    /// `m/44'/501'/0'/0'`
    pub fn default_path() -> DerivationPath {
        DerivationPath::new_bip44(Some(0), Some(0))
    }

    /// Use an optional BIP-39 passphrase (empty by default)
    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = passphrase.into();
        self
    }

    pub fn path(&self) -> &DerivationPath {
        &self.path
    }

    /// Same phrase always yields the same keypair
    pub fn derive(&self, phrase: &str) -> Result<Keypair, MintError> {
        let normalized = normalize_phrase(phrase);
        let mnemonic = Mnemonic::from_phrase(&normalized, Language::English)
            .map_err(|e| MintError::InvalidPhrase(e.to_string()))?;
        let seed = Seed::new(&mnemonic, &self.passphrase);

        keypair_from_seed_and_derivation_path(seed.as_bytes(), Some(self.path.clone()))
            .map_err(|e| MintError::InvalidPhrase(e.to_string()))
    }
}

fn normalize_phrase(phrase: &str) -> String {
    phrase
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Address and balance of a wallet
#[derive(Debug, Clone, PartialEq)]
pub struct WalletSummary {
    pub address: Pubkey,
    pub lamports: u64,
}

impl WalletSummary {
    pub fn sol(&self) -> f64 {
        self.lamports as f64 / LAMPORTS_PER_SOL as f64
    }
}

/// Wallet manager holding the payer keypair
pub struct WalletManager {
    keypair: Arc<Keypair>,
}

impl WalletManager {
    /// Create a wallet manager from a seed phrase
    pub fn from_phrase(phrase: &str, deriver: &KeyDeriver) -> Result<Self, MintError> {
        Ok(Self::from_keypair(deriver.derive(phrase)?))
    }

    /// Create a new wallet manager from a keypair file (JSON byte array or raw 64 bytes)
    pub fn from_file(path: &str) -> Result<Self> {
        let keypair_bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read keypair file: {}", path))?;

        let bytes = if keypair_bytes.len() == 64 {
            keypair_bytes
        } else {
            serde_json::from_slice::<Vec<u8>>(&keypair_bytes)
                .context("Failed to parse keypair JSON")?
        };
        if bytes.len() != 64 {
            anyhow::bail!("Invalid keypair length: expected 64 bytes, got {}", bytes.len());
        }
        if bytes.iter().all(|&b| b == 0) {
            anyhow::bail!("Invalid keypair: all-zero key rejected");
        }
        let keypair = Keypair::try_from(bytes.as_slice()).context("Invalid keypair bytes")?;

        Ok(Self::from_keypair(keypair))
    }

    /// Create a new wallet manager from a keypair
    pub fn from_keypair(keypair: Keypair) -> Self {
        Self {
            keypair: Arc::new(keypair),
        }
    }

    /// Get the public key
    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    /// Get a reference to the keypair
    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    /// Get an Arc reference to the keypair
    pub fn keypair_arc(&self) -> Arc<Keypair> {
        Arc::clone(&self.keypair)
    }

    /// Fetch the wallet's current balance
    pub async fn summary(&self, rpc: &dyn LedgerRpc) -> Result<WalletSummary, MintError> {
        let lamports = rpc.get_balance(&self.pubkey()).await?;
        Ok(WalletSummary {
            address: self.pubkey(),
            lamports,
        })
    }
}

impl Clone for WalletManager {
    fn clone(&self) -> Self {
        Self {
            keypair: Arc::clone(&self.keypair),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PHRASE: &str =
        "struggle noble ocean glance december wreck problem cereal spoil menu way onion";

    #[test]
    fn test_derivation_is_deterministic() {
        let deriver = KeyDeriver::default();
        let a = deriver.derive(PHRASE).unwrap();
        let b = deriver.derive(PHRASE).unwrap();
        assert_eq!(a.pubkey(), b.pubkey());
    }

    #[test]
    fn test_whitespace_is_normalized() {
        let deriver = KeyDeriver::default();
        let spaced = format!("  {}  ", PHRASE.replace(' ', "   "));
        assert_eq!(
            deriver.derive(&spaced).unwrap().pubkey(),
            deriver.derive(PHRASE).unwrap().pubkey()
        );
    }

    #[test]
    fn test_passphrase_changes_key() {
        let plain = KeyDeriver::default().derive(PHRASE).unwrap();
        let salted = KeyDeriver::default()
            .with_passphrase("extra")
            .derive(PHRASE)
            .unwrap();
        assert_ne!(plain.pubkey(), salted.pubkey());
    }

    #[test]
    fn test_invalid_phrase() {
        let deriver = KeyDeriver::default();
        // Valid words, broken checksum (the valid form ends in "about")
        let err = deriver
            .derive(&vec!["abandon"; 12].join(" "))
            .unwrap_err();
        assert!(matches!(err, MintError::InvalidPhrase(_)));

        let err = deriver.derive("not a seed phrase").unwrap_err();
        assert!(matches!(err, MintError::InvalidPhrase(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_default_path() {
        assert_eq!(KeyDeriver::default_path().to_string(), "m/44'/501'/0'/0'");
    }

    #[tokio::test]
    async fn test_summary_reads_balance() {
        let ledger = crate::test_utils::MockLedger::new();
        let wallet = WalletManager::from_phrase(PHRASE, &KeyDeriver::default()).unwrap();
        ledger.set_balance(wallet.pubkey(), 2_250_000_000);

        let summary = wallet.summary(&ledger).await.unwrap();
        assert_eq!(summary.address, wallet.pubkey());
        assert_eq!(summary.lamports, 2_250_000_000);
        assert!((summary.sol() - 2.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_summary_sol() {
        let s = WalletSummary {
            address: Pubkey::new_unique(),
            lamports: 1_500_000_000,
        };
        assert!((s.sol() - 1.5).abs() < f64::EPSILON);
    }
}
