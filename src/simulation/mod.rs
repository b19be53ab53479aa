//! In-memory ledger for simulation mode and tests
//!
//! Executes the subset of System, SPL Token, Associated Token Account and
//! Token Metadata semantics that the mint and print workflows rely on. Each
//! bundle runs against a copy of the account set and is committed only if
//! every instruction succeeds, so a failed bundle leaves no trace.
//!
//! Failures carry the same `Custom` codes and instruction indexes the real
//! programs report, so error classification is exercised end to end.
//!
//! - **accounts**: account states and instruction faults
//! - **execution**: program semantics over one bundle's working copy

mod accounts;
mod execution;

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::rent::Rent;
use solana_sdk::signature::{Keypair, Signature, Signer};
use solana_sdk::system_instruction::SystemInstruction;
use spl_token::instruction::TokenInstruction;

use crate::pda::AddressDeriver;
use crate::tx_builder::metadata::MetadataInstruction;
use crate::tx_builder::{LedgerExecutor, RemoteFailure, Step};
use accounts::{AccountData, SimAccount, LAMPORTS_PER_SIGNATURE};
use execution::{marker_bitmap, Execution};

#[derive(Debug, Default)]
struct LedgerState {
    accounts: HashMap<Pubkey, SimAccount>,
    committed: usize,
    signature_seq: u64,
    injected: Option<(Step, RemoteFailure)>,
}

impl LedgerState {
    fn data(&self, address: &Pubkey) -> Option<&AccountData> {
        self.accounts.get(address).map(|a| &a.data)
    }
}

/// In-memory `LedgerExecutor`
pub struct SimulatedLedger {
    deriver: AddressDeriver,
    rent: Rent,
    state: Mutex<LedgerState>,
}

impl SimulatedLedger {
    /// Ledger playing the programs at their default ids
    pub fn new() -> Self {
        Self::with_deriver(AddressDeriver::default())
    }

    /// Ledger playing the programs named by `deriver`, with its marker scheme
    pub fn with_deriver(deriver: AddressDeriver) -> Self {
        Self {
            deriver,
            rent: Rent::default(),
            state: Mutex::new(LedgerState::default()),
        }
    }

    pub fn airdrop(&self, address: &Pubkey, lamports: u64) {
        let system = self.deriver.programs().system;
        let mut state = self.state.lock();
        let account = state.accounts.entry(*address).or_insert(SimAccount {
            lamports: 0,
            owner: system,
            data: AccountData::Blank { space: 0 },
        });
        account.lamports = account.lamports.saturating_add(lamports);
    }

    /// Fail the next bundle containing `step`
    ///
    /// The failure is pinned to that instruction unless it is a timeout,
    /// which reports no instruction. Nothing in the bundle is committed.
    pub fn fail_next_bundle_at(&self, step: Step, failure: RemoteFailure) {
        self.state.lock().injected = Some((step, failure));
    }

    /// Hand an existing account to another program
    pub fn reassign_owner(&self, address: &Pubkey, owner: Pubkey) {
        if let Some(account) = self.state.lock().accounts.get_mut(address) {
            account.owner = owner;
        }
    }

    pub fn bundles_committed(&self) -> usize {
        self.state.lock().committed
    }

    pub fn lamports(&self, address: &Pubkey) -> Option<u64> {
        self.state.lock().accounts.get(address).map(|a| a.lamports)
    }

    pub fn token_balance(&self, token_account: &Pubkey) -> Option<u64> {
        let state = self.state.lock();
        state
            .data(token_account)
            .and_then(AccountData::as_token)
            .map(|token| token.amount)
    }

    pub fn mint_supply(&self, mint: &Pubkey) -> Option<u64> {
        let state = self.state.lock();
        state.data(mint).and_then(AccountData::as_mint).map(|m| m.supply)
    }

    pub fn mint_authority(&self, mint: &Pubkey) -> Option<Pubkey> {
        let state = self.state.lock();
        state
            .data(mint)
            .and_then(AccountData::as_mint)
            .and_then(|m| m.mint_authority)
    }

    /// Prints issued from the master edition at `address`
    pub fn master_edition_supply(&self, address: &Pubkey) -> Option<u64> {
        let state = self.state.lock();
        state
            .data(address)
            .and_then(AccountData::as_master_edition)
            .map(|edition| edition.supply)
    }

    /// Edition number recorded in the print edition account at `address`
    pub fn edition_number(&self, address: &Pubkey) -> Option<u64> {
        match self.state.lock().data(address) {
            Some(AccountData::Edition { edition, .. }) => Some(*edition),
            _ => None,
        }
    }

    pub fn metadata_name(&self, address: &Pubkey) -> Option<String> {
        let state = self.state.lock();
        state
            .data(address)
            .and_then(AccountData::as_metadata)
            .map(|metadata| metadata.data.name.clone())
    }

    /// Whether the marker account records `edition` of `master_mint` as printed
    pub fn edition_taken(&self, master_mint: &Pubkey, edition: u64) -> bool {
        let Ok(marker) = self.deriver.edition_marker(master_mint, edition) else {
            return false;
        };
        let Ok(offset) = self.deriver.marker_scheme().bit_offset(edition) else {
            return false;
        };
        marker_bitmap(&self.state.lock().accounts, &marker.address)
            .and_then(|bitmap| bitmap.is_taken(offset).ok())
            .unwrap_or(false)
    }

    fn step_of(&self, ix: &Instruction) -> Option<Step> {
        let programs = self.deriver.programs();
        if ix.program_id == programs.system {
            match bincode::deserialize::<SystemInstruction>(&ix.data).ok()? {
                SystemInstruction::CreateAccount { .. } => Some(Step::CreateMintAccount),
                _ => None,
            }
        } else if ix.program_id == programs.token {
            match TokenInstruction::unpack(&ix.data).ok()? {
                TokenInstruction::InitializeMint2 { .. } => Some(Step::InitializeMint),
                TokenInstruction::MintTo { .. } => Some(Step::MintTo),
                _ => None,
            }
        } else if ix.program_id == programs.associated_token {
            Some(Step::CreateTokenAccount)
        } else if ix.program_id == programs.token_metadata {
            match MetadataInstruction::unpack(&ix.data).ok()? {
                MetadataInstruction::CreateMetadataAccountV3(_) => Some(Step::CreateMetadata),
                MetadataInstruction::CreateMasterEditionV3(_) => Some(Step::CreateMasterEdition),
                MetadataInstruction::MintNewEditionFromMasterEditionViaToken(_) => {
                    Some(Step::PrintEdition)
                }
            }
        } else {
            None
        }
    }

    fn next_signature(state: &mut LedgerState, payer: &Pubkey) -> Signature {
        state.signature_seq += 1;
        let mut bytes = [0u8; 64];
        bytes[..8].copy_from_slice(&state.signature_seq.to_le_bytes());
        bytes[32..].copy_from_slice(payer.as_ref());
        Signature::from(bytes)
    }
}

impl Default for SimulatedLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerExecutor for SimulatedLedger {
    async fn submit_bundle(
        &self,
        instructions: &[Instruction],
        payer: &Pubkey,
        signers: &[&Keypair],
    ) -> Result<Signature, RemoteFailure> {
        if instructions.is_empty() {
            return Err(RemoteFailure::new("bundle has no instructions"));
        }
        let signed: HashSet<Pubkey> = signers.iter().map(|k| k.pubkey()).collect();
        if !signed.contains(payer) {
            return Err(RemoteFailure::new(format!("fee payer {payer} did not sign")));
        }
        for ix in instructions {
            if let Some(missing) = ix
                .accounts
                .iter()
                .find(|meta| meta.is_signer && !signed.contains(&meta.pubkey))
            {
                return Err(RemoteFailure::new(format!(
                    "missing signature for {}",
                    missing.pubkey
                )));
            }
        }

        let mut state = self.state.lock();

        let injected_at = state.injected.as_ref().and_then(|(step, _)| {
            instructions
                .iter()
                .position(|ix| self.step_of(ix) == Some(*step))
        });
        if let Some(index) = injected_at {
            if let Some((_, mut failure)) = state.injected.take() {
                if !failure.timed_out {
                    failure.instruction_index = Some(index as u8);
                }
                return Err(failure);
            }
        }

        let mut exec = Execution {
            deriver: &self.deriver,
            rent: &self.rent,
            signed: &signed,
            accounts: state.accounts.clone(),
        };
        let fee = LAMPORTS_PER_SIGNATURE * signed.len() as u64;
        exec.debit(payer, fee)
            .map_err(|fault| RemoteFailure::new(format!("fee payer: {}", fault.message)))?;

        for (index, ix) in instructions.iter().enumerate() {
            if let Err(fault) = exec.process(ix) {
                let message = format!("instruction {index}: {}", fault.message);
                tracing::debug!(%message, code = ?fault.code, "Simulated bundle rejected");
                return Err(RemoteFailure {
                    code: fault.code,
                    instruction_index: Some(index as u8),
                    message,
                    timed_out: false,
                });
            }
        }

        state.accounts = exec.accounts;
        state.committed += 1;
        Ok(Self::next_signature(&mut state, payer))
    }

    async fn minimum_balance_for_rent_exemption(
        &self,
        data_len: usize,
    ) -> Result<u64, RemoteFailure> {
        Ok(self.rent.minimum_balance(data_len))
    }

    async fn account_owner(&self, address: &Pubkey) -> Result<Option<Pubkey>, RemoteFailure> {
        Ok(self.state.lock().accounts.get(address).map(|a| a.owner))
    }
}
