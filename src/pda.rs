//! Program-derived address derivation
//!
//! Every account the orchestrator touches, apart from fresh mint keys, is a
//! pure function of a seed tuple and an owning program. The seed layouts here
//! must match the owning program byte for byte: a wrong layout yields a valid
//! looking address that simply does not exist on chain.
//!
//! - Metadata:       `["metadata", metadata_program, mint]`
//! - Master edition: `["metadata", metadata_program, mint, "edition"]`
//! - Edition marker: `["metadata", metadata_program, master_mint, "edition", marker_seed(n)]`
//! - Token account:  `[owner, token_program, mint]` under the associated token program

use serde::{Deserialize, Serialize};
use solana_sdk::{pubkey::Pubkey, system_program};
use thiserror::Error;

/// Domain tag prefixed to every Token Metadata PDA
pub const METADATA_PREFIX: &[u8] = b"metadata";

/// Literal tag appended for edition and edition-marker accounts
pub const EDITION_SEED: &[u8] = b"edition";

/// Number of edition numbers tracked by one marker account on the deployed program
pub const EDITION_MARKER_BIT_SIZE: u64 = 248;

/// Deployed Token Metadata program
pub const TOKEN_METADATA_PROGRAM_ID: Pubkey =
    solana_sdk::pubkey!("metaqbxxUerdq28cj1RbAWkYQm3ybzjb6a8bt518x1s");

// Runtime limits: 16 seeds including the bump byte, 32 bytes per seed.
const MAX_SEEDS: usize = 16;
const MAX_SEED_LEN: usize = 32;
const MAX_CALLER_SEEDS: usize = MAX_SEEDS - 1;

/// Errors raised while deriving an address
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DerivationError {
    #[error("Too many seeds: {count} (max {max})")]
    TooManySeeds { count: usize, max: usize },

    #[error("Seed {index} is {len} bytes (max {max})", max = MAX_SEED_LEN)]
    SeedTooLong { index: usize, len: usize },

    /// No bump in 255..=0 produced an off-curve address for these seeds
    #[error("No viable bump for program {program}")]
    NoViableBump { program: Pubkey },

    #[error("Edition numbers start at 1, got {0}")]
    InvalidEditionNumber(u64),

    #[error(
        "Edition marker capacity must be within 1..={max}, got {0}",
        max = EDITION_MARKER_BIT_SIZE
    )]
    InvalidMarkerCapacity(u64),

    #[error(
        "Marker bit offset {0} is outside the {bits}-bit ledger",
        bits = EDITION_MARKER_BIT_SIZE
    )]
    MarkerOffsetOutOfRange(usize),
}

/// A derived address together with the bump that made it valid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DerivedAddress {
    pub address: Pubkey,
    pub bump: u8,
}

/// Derive a program address from `seeds` (used in the exact order given)
///
/// Deterministic and side-effect free. Exhausting every bump is reported as
/// [`DerivationError::NoViableBump`]; callers must not retry with altered seeds.
pub fn derive(seeds: &[&[u8]], program_id: &Pubkey) -> Result<DerivedAddress, DerivationError> {
    if seeds.len() > MAX_CALLER_SEEDS {
        return Err(DerivationError::TooManySeeds {
            count: seeds.len(),
            max: MAX_CALLER_SEEDS,
        });
    }

    if let Some((index, seed)) = seeds
        .iter()
        .enumerate()
        .find(|(_, seed)| seed.len() > MAX_SEED_LEN)
    {
        return Err(DerivationError::SeedTooLong {
            index,
            len: seed.len(),
        });
    }

    Pubkey::try_find_program_address(seeds, program_id)
        .map(|(address, bump)| DerivedAddress { address, bump })
        .ok_or(DerivationError::NoViableBump {
            program: *program_id,
        })
}

/// Identifiers of the on-chain programs the engine builds instructions for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramIds {
    pub token_metadata: Pubkey,
    pub token: Pubkey,
    pub associated_token: Pubkey,
    pub system: Pubkey,
}

impl Default for ProgramIds {
    fn default() -> Self {
        Self {
            token_metadata: TOKEN_METADATA_PROGRAM_ID,
            token: spl_token::id(),
            associated_token: spl_associated_token_account::id(),
            system: system_program::id(),
        }
    }
}

/// How an edition number maps onto its marker account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EditionMarkerScheme {
    /// Range `edition / 248`, seeded with its decimal string. This is what the
    /// deployed Token Metadata program derives.
    #[default]
    TokenMetadata,

    /// Range `(edition - 1) / capacity`, seeded with 8 big-endian bytes
    RangeIndex { capacity: u64 },
}

impl EditionMarkerScheme {
    /// Editions covered by one marker account
    pub fn capacity(&self) -> u64 {
        match self {
            Self::TokenMetadata => EDITION_MARKER_BIT_SIZE,
            Self::RangeIndex { capacity } => *capacity,
        }
    }

    pub fn validate(&self) -> Result<(), DerivationError> {
        let capacity = self.capacity();
        if capacity == 0 || capacity > EDITION_MARKER_BIT_SIZE {
            return Err(DerivationError::InvalidMarkerCapacity(capacity));
        }
        Ok(())
    }

    /// Index of the marker account that records `edition`
    pub fn range_index(&self, edition: u64) -> Result<u64, DerivationError> {
        self.validate()?;
        if edition == 0 {
            return Err(DerivationError::InvalidEditionNumber(edition));
        }
        Ok(match self {
            Self::TokenMetadata => edition / EDITION_MARKER_BIT_SIZE,
            Self::RangeIndex { capacity } => (edition - 1) / capacity,
        })
    }

    /// Bit position of `edition` within its marker account's ledger
    pub fn bit_offset(&self, edition: u64) -> Result<usize, DerivationError> {
        self.validate()?;
        if edition == 0 {
            return Err(DerivationError::InvalidEditionNumber(edition));
        }
        Ok(match self {
            Self::TokenMetadata => (edition % EDITION_MARKER_BIT_SIZE) as usize,
            Self::RangeIndex { capacity } => ((edition - 1) % capacity) as usize,
        })
    }

    /// Trailing seed of the marker account for `edition`
    pub fn seed(&self, edition: u64) -> Result<Vec<u8>, DerivationError> {
        let range = self.range_index(edition)?;
        Ok(match self {
            Self::TokenMetadata => range.to_string().into_bytes(),
            Self::RangeIndex { .. } => range.to_be_bytes().to_vec(),
        })
    }
}

/// Seed-layout aware deriver bound to a set of program ids
#[derive(Debug, Clone)]
pub struct AddressDeriver {
    programs: ProgramIds,
    marker_scheme: EditionMarkerScheme,
}

impl AddressDeriver {
    pub fn new(programs: ProgramIds, marker_scheme: EditionMarkerScheme) -> Self {
        Self {
            programs,
            marker_scheme,
        }
    }

    pub fn programs(&self) -> &ProgramIds {
        &self.programs
    }

    pub fn marker_scheme(&self) -> EditionMarkerScheme {
        self.marker_scheme
    }

    /// Metadata record of `mint`
    pub fn metadata(&self, mint: &Pubkey) -> Result<DerivedAddress, DerivationError> {
        let program = self.programs.token_metadata;
        derive(
            &[METADATA_PREFIX, program.as_ref(), mint.as_ref()],
            &program,
        )
    }

    /// Master edition record of `mint`; for a print mint this is its edition record
    pub fn master_edition(&self, mint: &Pubkey) -> Result<DerivedAddress, DerivationError> {
        let program = self.programs.token_metadata;
        derive(
            &[METADATA_PREFIX, program.as_ref(), mint.as_ref(), EDITION_SEED],
            &program,
        )
    }

    /// Marker account that records whether `edition` of `master_mint` was printed
    pub fn edition_marker(
        &self,
        master_mint: &Pubkey,
        edition: u64,
    ) -> Result<DerivedAddress, DerivationError> {
        let program = self.programs.token_metadata;
        let marker_seed = self.marker_scheme.seed(edition)?;
        derive(
            &[
                METADATA_PREFIX,
                program.as_ref(),
                master_mint.as_ref(),
                EDITION_SEED,
                &marker_seed,
            ],
            &program,
        )
    }

    /// Canonical token account holding `mint` for `owner`
    pub fn associated_token(
        &self,
        owner: &Pubkey,
        mint: &Pubkey,
    ) -> Result<DerivedAddress, DerivationError> {
        derive(
            &[owner.as_ref(), self.programs.token.as_ref(), mint.as_ref()],
            &self.programs.associated_token,
        )
    }
}

impl Default for AddressDeriver {
    fn default() -> Self {
        Self::new(ProgramIds::default(), EditionMarkerScheme::default())
    }
}
