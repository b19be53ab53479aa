//! Bundle submission seam
//!
//! A bundle is an ordered group of instructions that commits atomically: either
//! every instruction takes effect or none does. [`LedgerExecutor`] is the only
//! way the sequencer reaches a ledger, so production RPC and the in-memory
//! simulator are interchangeable.

use async_trait::async_trait;
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature};
use thiserror::Error;

/// A bundle rejected (or lost) by the ledger
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct RemoteFailure {
    /// Program-specific `Custom` error code, when the ledger reported one
    pub code: Option<u32>,
    /// Index of the failing instruction within the bundle
    pub instruction_index: Option<u8>,
    pub message: String,
    /// No confirmation arrived in time; the bundle may still land
    pub timed_out: bool,
}

impl RemoteFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            instruction_index: None,
            message: message.into(),
            timed_out: false,
        }
    }

    pub fn custom(instruction_index: u8, code: u32, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            instruction_index: Some(instruction_index),
            message: message.into(),
            timed_out: false,
        }
    }

    pub fn at_instruction(instruction_index: u8, message: impl Into<String>) -> Self {
        Self {
            code: None,
            instruction_index: Some(instruction_index),
            message: message.into(),
            timed_out: false,
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            code: None,
            instruction_index: None,
            message: message.into(),
            timed_out: true,
        }
    }
}

/// Ledger endpoint that submits bundles and answers account queries
#[async_trait]
pub trait LedgerExecutor: Send + Sync {
    /// Submit `instructions` as one atomic bundle
    ///
    /// Resolves only once the bundle is confirmed (or definitively failed).
    async fn submit_bundle(
        &self,
        instructions: &[Instruction],
        payer: &Pubkey,
        signers: &[&Keypair],
    ) -> Result<Signature, RemoteFailure>;

    async fn minimum_balance_for_rent_exemption(&self, data_len: usize)
        -> Result<u64, RemoteFailure>;

    /// Owning program of `address`, or None if the account does not exist
    async fn account_owner(&self, address: &Pubkey) -> Result<Option<Pubkey>, RemoteFailure>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors() {
        let failure = RemoteFailure::custom(1, 21, "already minted");
        assert_eq!(failure.code, Some(21));
        assert_eq!(failure.instruction_index, Some(1));
        assert!(!failure.timed_out);
        assert_eq!(failure.to_string(), "already minted");

        let lost = RemoteFailure::timeout("no confirmation after 30s");
        assert!(lost.timed_out);
        assert_eq!(lost.code, None);
    }
}
