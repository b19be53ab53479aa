//! Wallet management and key generation

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signer},
};

/// Authority keypair that pays for, signs and owns what the engine creates
#[derive(Debug)]
pub struct WalletManager {
    keypair: Arc<Keypair>,
}

impl WalletManager {
    /// Load a keypair file: the Solana CLI JSON array, a base58 secret key
    /// string, or 64 raw bytes
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let keypair_bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read keypair file: {}", path.display()))?;

        let secret = if keypair_bytes.len() == 64 {
            keypair_bytes
        } else if keypair_bytes.trim_ascii_start().starts_with(b"[") {
            serde_json::from_slice::<Vec<u8>>(&keypair_bytes)
                .context("Failed to parse keypair JSON")?
        } else {
            let text = std::str::from_utf8(&keypair_bytes).context("Keypair file is not text")?;
            bs58::decode(text.trim())
                .into_vec()
                .context("Failed to decode base58 keypair")?
        };
        if secret.len() != 64 {
            anyhow::bail!("Invalid keypair length: expected 64 bytes, got {}", secret.len());
        }
        if secret.iter().all(|&b| b == 0) {
            anyhow::bail!("Invalid keypair: all-zero key rejected");
        }
        let keypair = Keypair::try_from(secret.as_slice()).context("Invalid keypair bytes")?;

        Ok(Self::from_keypair(keypair))
    }

    pub fn from_keypair(keypair: Keypair) -> Self {
        Self {
            keypair: Arc::new(keypair),
        }
    }

    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }
}

impl Clone for WalletManager {
    fn clone(&self) -> Self {
        Self {
            keypair: Arc::clone(&self.keypair),
        }
    }
}

/// Source of fresh mint keypairs
///
/// The instruction builder never creates keys; callers draw them from here.
pub trait KeyGenerator: Send + Sync {
    fn generate(&self) -> Keypair;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RandomKeyGenerator;

impl KeyGenerator for RandomKeyGenerator {
    fn generate(&self) -> Keypair {
        Keypair::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_from_json_file() {
        let keypair = Keypair::new();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let json = serde_json::to_string(&keypair.to_bytes().to_vec()).unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let wallet = WalletManager::from_file(file.path()).unwrap();
        assert_eq!(wallet.pubkey(), keypair.pubkey());
    }

    #[test]
    fn test_from_raw_file() {
        let keypair = Keypair::new();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&keypair.to_bytes()).unwrap();

        let wallet = WalletManager::from_file(file.path()).unwrap();
        assert_eq!(wallet.clone().pubkey(), keypair.pubkey());
    }

    #[test]
    fn test_from_base58_file() {
        let keypair = Keypair::new();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", keypair.to_base58_string()).unwrap();

        let wallet = WalletManager::from_file(file.path()).unwrap();
        assert_eq!(wallet.pubkey(), keypair.pubkey());
    }

    #[test]
    fn test_rejects_zero_and_short_keys() {
        let mut zero = tempfile::NamedTempFile::new().unwrap();
        zero.write_all(&[0u8; 64]).unwrap();
        assert!(WalletManager::from_file(zero.path()).is_err());

        let mut short = tempfile::NamedTempFile::new().unwrap();
        short.write_all(b"[1,2,3]").unwrap();
        let err = WalletManager::from_file(short.path()).unwrap_err();
        assert!(err.to_string().contains("expected 64 bytes"));

        assert!(WalletManager::from_file("/nonexistent/id.json").is_err());
    }

    #[test]
    fn test_random_keys_are_distinct() {
        let keys = RandomKeyGenerator;
        assert_ne!(keys.generate().pubkey(), keys.generate().pubkey());
    }
}
