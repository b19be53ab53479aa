//! Local view of master editions and their print numbering
//!
//! The on-chain program is authoritative for which edition numbers are taken.
//! This ledger only tracks what this process has attempted so that it can hand
//! out the next candidate number without repeating a confirmed one, and keep
//! failed numbers from being silently reused.

use parking_lot::Mutex;
use solana_sdk::pubkey::Pubkey;
use std::collections::{BTreeSet, HashMap};

use crate::pda::{DerivationError, EDITION_MARKER_BIT_SIZE};
use crate::tx_builder::errors::OrchestratorError;

/// Bytes in a marker account's bitmap (248 bits)
pub const EDITION_MARKER_LEDGER_LEN: usize = 31;

/// Bitmap stored in an edition marker account
///
/// Bit `offset` lives in byte `offset / 8`, counted from the most significant
/// bit, so offset 0 is `0b1000_0000` of byte 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EditionMarkBitmap {
    ledger: [u8; EDITION_MARKER_LEDGER_LEN],
}

impl EditionMarkBitmap {
    pub fn ledger(&self) -> &[u8; EDITION_MARKER_LEDGER_LEN] {
        &self.ledger
    }

    /// Byte index and mask addressing `offset`
    pub fn index_and_mask(offset: usize) -> Result<(usize, u8), DerivationError> {
        if offset as u64 >= EDITION_MARKER_BIT_SIZE {
            return Err(DerivationError::MarkerOffsetOutOfRange(offset));
        }
        Ok((offset / 8, 1u8 << (7 - (offset % 8))))
    }

    pub fn is_taken(&self, offset: usize) -> Result<bool, DerivationError> {
        let (index, mask) = Self::index_and_mask(offset)?;
        Ok(self.ledger[index] & mask != 0)
    }

    /// Set the bit for `offset`; returns `false` if it was already set
    pub fn mark(&mut self, offset: usize) -> Result<bool, DerivationError> {
        let (index, mask) = Self::index_and_mask(offset)?;
        let fresh = self.ledger[index] & mask == 0;
        self.ledger[index] |= mask;
        Ok(fresh)
    }

    pub fn taken_count(&self) -> u32 {
        self.ledger.iter().map(|byte| byte.count_ones()).sum()
    }
}

/// Why a print attempt did not confirm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptFailure {
    /// The program reported the number as already printed
    Collision,
    /// Any other failure of the print bundle
    Failed,
}

#[derive(Debug, Default)]
struct MasterRecord {
    confirmed: BTreeSet<u64>,
    failed: BTreeSet<u64>,
    taken_remotely: BTreeSet<u64>,
    in_flight: BTreeSet<u64>,
    highest_attempted: u64,
}

impl MasterRecord {
    fn is_taken(&self, edition: u64) -> bool {
        self.confirmed.contains(&edition) || self.taken_remotely.contains(&edition)
    }

    fn recompute_highest(&mut self) {
        self.highest_attempted = self
            .confirmed
            .iter()
            .chain(&self.failed)
            .chain(&self.taken_remotely)
            .chain(&self.in_flight)
            .copied()
            .max()
            .unwrap_or(0);
    }
}

/// Print numbering state per master mint
#[derive(Debug, Default)]
pub struct EditionLedger {
    masters: Mutex<HashMap<Pubkey, MasterRecord>>,
    max_supply: Option<u64>,
}

impl EditionLedger {
    /// `max_supply` of `None` means prints are unbounded
    pub fn new(max_supply: Option<u64>) -> Self {
        Self {
            masters: Mutex::new(HashMap::new()),
            max_supply,
        }
    }

    pub fn max_supply(&self) -> Option<u64> {
        self.max_supply
    }

    pub fn register_master(&self, master_mint: Pubkey) {
        self.masters.lock().entry(master_mint).or_default();
    }

    pub fn is_known(&self, master_mint: &Pubkey) -> bool {
        self.masters.lock().contains_key(master_mint)
    }

    /// Number the next print of `master_mint` would be attempted with
    pub fn next_candidate(&self, master_mint: &Pubkey) -> u64 {
        self.masters
            .lock()
            .get(master_mint)
            .map(|record| record.highest_attempted + 1)
            .unwrap_or(1)
    }

    /// Reserve an edition number for a print attempt
    ///
    /// `None` takes the next candidate. An explicit number may retry a failed
    /// attempt, but never a number known to be taken or already in flight.
    pub fn begin_attempt(
        &self,
        master_mint: &Pubkey,
        requested: Option<u64>,
    ) -> Result<u64, OrchestratorError> {
        let mut masters = self.masters.lock();
        let record = masters.entry(*master_mint).or_default();
        let edition = requested.unwrap_or(record.highest_attempted + 1);

        if edition == 0 {
            return Err(OrchestratorError::validation(
                "edition",
                "edition numbers start at 1",
            ));
        }
        if let Some(max) = self.max_supply {
            if edition > max {
                return Err(OrchestratorError::validation(
                    "edition",
                    format!("edition {} exceeds max supply {}", edition, max),
                ));
            }
        }
        if record.is_taken(edition) || record.in_flight.contains(&edition) {
            return Err(OrchestratorError::EditionCollision {
                master_mint: *master_mint,
                edition,
            });
        }

        record.failed.remove(&edition);
        record.in_flight.insert(edition);
        record.highest_attempted = record.highest_attempted.max(edition);
        Ok(edition)
    }

    /// Return a reserved number that was never submitted for printing
    pub fn release(&self, master_mint: &Pubkey, edition: u64) {
        if let Some(record) = self.masters.lock().get_mut(master_mint) {
            if record.in_flight.remove(&edition) {
                record.recompute_highest();
            }
        }
    }

    pub fn record_confirmed(&self, master_mint: &Pubkey, edition: u64) {
        let mut masters = self.masters.lock();
        let record = masters.entry(*master_mint).or_default();
        record.in_flight.remove(&edition);
        record.failed.remove(&edition);
        record.confirmed.insert(edition);
        record.highest_attempted = record.highest_attempted.max(edition);
    }

    pub fn record_failed(&self, master_mint: &Pubkey, edition: u64, failure: AttemptFailure) {
        let mut masters = self.masters.lock();
        let record = masters.entry(*master_mint).or_default();
        record.in_flight.remove(&edition);
        match failure {
            AttemptFailure::Collision => {
                record.taken_remotely.insert(edition);
            }
            AttemptFailure::Failed => {
                record.failed.insert(edition);
            }
        }
        record.highest_attempted = record.highest_attempted.max(edition);
    }

    /// Prints this process has seen confirmed for `master_mint`
    pub fn print_count(&self, master_mint: &Pubkey) -> u64 {
        self.masters
            .lock()
            .get(master_mint)
            .map(|record| record.confirmed.len() as u64)
            .unwrap_or(0)
    }

    pub fn is_confirmed(&self, master_mint: &Pubkey, edition: u64) -> bool {
        self.masters
            .lock()
            .get(master_mint)
            .map(|record| record.confirmed.contains(&edition))
            .unwrap_or(false)
    }

    /// Numbers whose print attempt failed and were not retried
    pub fn failed_editions(&self, master_mint: &Pubkey) -> Vec<u64> {
        self.masters
            .lock()
            .get(master_mint)
            .map(|record| record.failed.iter().copied().collect())
            .unwrap_or_default()
    }
}
