//! Account state held by the in-memory ledger

use solana_sdk::pubkey::Pubkey;
use spl_token::error::TokenError;
use spl_token::solana_program::program_pack::Pack;

use crate::edition_ledger::EditionMarkBitmap;
use crate::tx_builder::metadata::{DataV2, MetadataErrorCode};

pub(super) const TOKEN_ACCOUNT_LEN: usize = spl_token::state::Account::LEN;
pub(super) const METADATA_ACCOUNT_LEN: usize = 679;
pub(super) const MASTER_EDITION_LEN: usize = 282;
pub(super) const EDITION_LEN: usize = 241;
pub(super) const EDITION_MARKER_LEN: usize = 32;
pub(super) const LAMPORTS_PER_SIGNATURE: u64 = 5_000;

// SystemError codes
pub(super) const ACCOUNT_ALREADY_IN_USE: u32 = 0;
pub(super) const RESULT_WITH_NEGATIVE_LAMPORTS: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct MintState {
    pub mint_authority: Option<Pubkey>,
    pub freeze_authority: Option<Pubkey>,
    pub supply: u64,
    pub decimals: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct TokenState {
    pub mint: Pubkey,
    pub owner: Pubkey,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct MetadataState {
    pub mint: Pubkey,
    pub update_authority: Pubkey,
    pub data: DataV2,
    pub is_mutable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct MasterEditionState {
    pub supply: u64,
    pub max_supply: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum AccountData {
    /// Wallet or freshly allocated space
    Blank { space: usize },
    Mint(MintState),
    Token(TokenState),
    Metadata(Box<MetadataState>),
    MasterEdition(MasterEditionState),
    Edition { parent: Pubkey, edition: u64 },
    EditionMarker(EditionMarkBitmap),
}

impl AccountData {
    pub fn as_mint(&self) -> Option<&MintState> {
        match self {
            Self::Mint(state) => Some(state),
            _ => None,
        }
    }

    pub fn as_token(&self) -> Option<&TokenState> {
        match self {
            Self::Token(state) => Some(state),
            _ => None,
        }
    }

    pub fn as_metadata(&self) -> Option<&MetadataState> {
        match self {
            Self::Metadata(state) => Some(state.as_ref()),
            _ => None,
        }
    }

    pub fn as_master_edition(&self) -> Option<&MasterEditionState> {
        match self {
            Self::MasterEdition(state) => Some(state),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct SimAccount {
    pub lamports: u64,
    pub owner: Pubkey,
    pub data: AccountData,
}

impl SimAccount {
    /// Anything beyond an empty, unfunded slot
    pub fn is_in_use(&self) -> bool {
        self.lamports > 0 || self.data != AccountData::Blank { space: 0 }
    }
}

/// Failure of a single instruction
pub(super) struct Fault {
    pub code: Option<u32>,
    pub message: String,
}

impl Fault {
    pub fn custom(code: u32, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }

    pub fn metadata(code: MetadataErrorCode, message: impl Into<String>) -> Self {
        Self::custom(code.code(), format!("{code:?}: {}", message.into()))
    }

    pub fn token(err: TokenError, message: impl Into<String>) -> Self {
        let message = format!("{err:?}: {}", message.into());
        Self::custom(err as u32, message)
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }
}

pub(super) type Exec<T = ()> = std::result::Result<T, Fault>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_unfunded_account_is_free() {
        let mut account = SimAccount {
            lamports: 0,
            owner: Pubkey::default(),
            data: AccountData::Blank { space: 0 },
        };
        assert!(!account.is_in_use());

        account.lamports = 1;
        assert!(account.is_in_use());
    }

    #[test]
    fn test_fault_codes() {
        let fault = Fault::metadata(MetadataErrorCode::IncorrectOwner, "mint");
        assert_eq!(fault.code, Some(57));
        assert_eq!(fault.message, "IncorrectOwner: mint");

        let fault = Fault::token(TokenError::MintMismatch, "destination");
        assert_eq!(fault.code, Some(TokenError::MintMismatch as u32));
        assert!(Fault::runtime("boom").code.is_none());
    }
}
