//! Token Metadata program instruction encoding
//!
//! Only the three instructions the mint and print workflows submit are
//! modelled. Each encodes as a one-byte discriminant followed by the borsh
//! serialization of its arguments.

use std::io;

use borsh::{BorshDeserialize, BorshSerialize};
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;

use crate::pda::ProgramIds;

/// Instruction discriminants on the deployed program
const CREATE_METADATA_ACCOUNT_V3: u8 = 33;
const CREATE_MASTER_EDITION_V3: u8 = 17;
const MINT_NEW_EDITION_FROM_MASTER_EDITION_VIA_TOKEN: u8 = 11;

#[derive(BorshSerialize, BorshDeserialize, PartialEq, Eq, Debug, Clone)]
pub struct Creator {
    pub address: [u8; 32],
    pub verified: bool,
    /// Percent of royalties, not basis points
    pub share: u8,
}

impl Creator {
    pub fn sole(address: &Pubkey) -> Self {
        Self {
            address: address.to_bytes(),
            verified: true,
            share: 100,
        }
    }

    pub fn pubkey(&self) -> Pubkey {
        Pubkey::new_from_array(self.address)
    }
}

#[derive(BorshSerialize, BorshDeserialize, PartialEq, Eq, Debug, Clone)]
pub struct Collection {
    pub verified: bool,
    pub key: [u8; 32],
}

#[derive(BorshSerialize, BorshDeserialize, PartialEq, Eq, Debug, Clone, Copy)]
pub enum UseMethod {
    Burn,
    Multiple,
    Single,
}

#[derive(BorshSerialize, BorshDeserialize, PartialEq, Eq, Debug, Clone)]
pub struct Uses {
    pub use_method: UseMethod,
    pub remaining: u64,
    pub total: u64,
}

#[derive(BorshSerialize, BorshDeserialize, PartialEq, Eq, Debug, Clone)]
pub enum CollectionDetails {
    V1 { size: u64 },
}

#[derive(BorshSerialize, BorshDeserialize, PartialEq, Eq, Debug, Clone)]
pub struct DataV2 {
    pub name: String,
    pub symbol: String,
    pub uri: String,
    pub seller_fee_basis_points: u16,
    pub creators: Option<Vec<Creator>>,
    pub collection: Option<Collection>,
    pub uses: Option<Uses>,
}

#[derive(BorshSerialize, BorshDeserialize, PartialEq, Eq, Debug, Clone)]
pub struct CreateMetadataAccountArgsV3 {
    pub data: DataV2,
    pub is_mutable: bool,
    pub collection_details: Option<CollectionDetails>,
}

#[derive(BorshSerialize, BorshDeserialize, PartialEq, Eq, Debug, Clone)]
pub struct CreateMasterEditionArgs {
    /// None means unlimited prints
    pub max_supply: Option<u64>,
}

#[derive(BorshSerialize, BorshDeserialize, PartialEq, Eq, Debug, Clone)]
pub struct MintNewEditionFromMasterEditionViaTokenArgs {
    pub edition: u64,
}

#[derive(PartialEq, Eq, Debug, Clone)]
pub enum MetadataInstruction {
    CreateMetadataAccountV3(CreateMetadataAccountArgsV3),
    CreateMasterEditionV3(CreateMasterEditionArgs),
    MintNewEditionFromMasterEditionViaToken(MintNewEditionFromMasterEditionViaTokenArgs),
}

impl MetadataInstruction {
    pub fn pack(&self) -> io::Result<Vec<u8>> {
        let mut data = Vec::new();
        match self {
            Self::CreateMetadataAccountV3(args) => {
                data.push(CREATE_METADATA_ACCOUNT_V3);
                borsh::to_writer(&mut data, args)?;
            }
            Self::CreateMasterEditionV3(args) => {
                data.push(CREATE_MASTER_EDITION_V3);
                borsh::to_writer(&mut data, args)?;
            }
            Self::MintNewEditionFromMasterEditionViaToken(args) => {
                data.push(MINT_NEW_EDITION_FROM_MASTER_EDITION_VIA_TOKEN);
                borsh::to_writer(&mut data, args)?;
            }
        }
        Ok(data)
    }

    pub fn unpack(data: &[u8]) -> io::Result<Self> {
        let (tag, rest) = data.split_first().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "empty instruction data")
        })?;
        match *tag {
            CREATE_METADATA_ACCOUNT_V3 => {
                Ok(Self::CreateMetadataAccountV3(borsh::from_slice(rest)?))
            }
            CREATE_MASTER_EDITION_V3 => Ok(Self::CreateMasterEditionV3(borsh::from_slice(rest)?)),
            MINT_NEW_EDITION_FROM_MASTER_EDITION_VIA_TOKEN => Ok(
                Self::MintNewEditionFromMasterEditionViaToken(borsh::from_slice(rest)?),
            ),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsupported metadata instruction {other}"),
            )),
        }
    }
}

/// Token Metadata program error codes returned as `Custom(code)`
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataErrorCode {
    AlreadyInitialized = 3,
    InvalidMetadataKey = 5,
    InvalidEditionKey = 6,
    UpdateAuthorityIncorrect = 7,
    NotMintAuthority = 9,
    InvalidMintAuthority = 10,
    NameTooLong = 11,
    SymbolTooLong = 12,
    UriTooLong = 13,
    MintMismatch = 15,
    EditionsMustHaveExactlyOneToken = 16,
    MaxEditionsMintedAlready = 17,
    EditionAlreadyMinted = 21,
    EditionMintDecimalsShouldBeZero = 24,
    DerivedKeyInvalid = 27,
    TokenAccountMintMismatch = 30,
    NotEnoughTokens = 32,
    IncorrectOwner = 57,
    InvalidOwner = 68,
    InvalidEditionIndex = 71,
}

impl MetadataErrorCode {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            3 => Self::AlreadyInitialized,
            5 => Self::InvalidMetadataKey,
            6 => Self::InvalidEditionKey,
            7 => Self::UpdateAuthorityIncorrect,
            9 => Self::NotMintAuthority,
            10 => Self::InvalidMintAuthority,
            11 => Self::NameTooLong,
            12 => Self::SymbolTooLong,
            13 => Self::UriTooLong,
            15 => Self::MintMismatch,
            16 => Self::EditionsMustHaveExactlyOneToken,
            17 => Self::MaxEditionsMintedAlready,
            21 => Self::EditionAlreadyMinted,
            24 => Self::EditionMintDecimalsShouldBeZero,
            27 => Self::DerivedKeyInvalid,
            30 => Self::TokenAccountMintMismatch,
            32 => Self::NotEnoughTokens,
            57 => Self::IncorrectOwner,
            68 => Self::InvalidOwner,
            71 => Self::InvalidEditionIndex,
            _ => return None,
        })
    }
}

/// Accounts for `CreateMetadataAccountV3`
pub struct CreateMetadataAccounts {
    pub metadata: Pubkey,
    pub mint: Pubkey,
    pub mint_authority: Pubkey,
    pub payer: Pubkey,
    pub update_authority: Pubkey,
}

pub fn create_metadata_accounts_v3(
    programs: &ProgramIds,
    accounts: CreateMetadataAccounts,
    args: CreateMetadataAccountArgsV3,
) -> io::Result<Instruction> {
    Ok(Instruction {
        program_id: programs.token_metadata,
        accounts: vec![
            AccountMeta::new(accounts.metadata, false),
            AccountMeta::new_readonly(accounts.mint, false),
            AccountMeta::new_readonly(accounts.mint_authority, true),
            AccountMeta::new(accounts.payer, true),
            AccountMeta::new_readonly(accounts.update_authority, true),
            AccountMeta::new_readonly(programs.system, false),
        ],
        data: MetadataInstruction::CreateMetadataAccountV3(args).pack()?,
    })
}

/// Accounts for `CreateMasterEditionV3`
pub struct CreateMasterEditionAccounts {
    pub edition: Pubkey,
    pub mint: Pubkey,
    pub update_authority: Pubkey,
    pub mint_authority: Pubkey,
    pub payer: Pubkey,
    pub metadata: Pubkey,
}

pub fn create_master_edition_v3(
    programs: &ProgramIds,
    accounts: CreateMasterEditionAccounts,
    max_supply: Option<u64>,
) -> io::Result<Instruction> {
    Ok(Instruction {
        program_id: programs.token_metadata,
        accounts: vec![
            AccountMeta::new(accounts.edition, false),
            AccountMeta::new(accounts.mint, false),
            AccountMeta::new_readonly(accounts.update_authority, true),
            AccountMeta::new_readonly(accounts.mint_authority, true),
            AccountMeta::new(accounts.payer, true),
            AccountMeta::new(accounts.metadata, false),
            AccountMeta::new_readonly(programs.token, false),
            AccountMeta::new_readonly(programs.system, false),
        ],
        data: MetadataInstruction::CreateMasterEditionV3(CreateMasterEditionArgs { max_supply })
            .pack()?,
    })
}

/// Accounts for `MintNewEditionFromMasterEditionViaToken`
pub struct MintNewEditionAccounts {
    pub new_metadata: Pubkey,
    pub new_edition: Pubkey,
    pub master_edition: Pubkey,
    pub new_mint: Pubkey,
    pub edition_marker: Pubkey,
    pub new_mint_authority: Pubkey,
    pub payer: Pubkey,
    pub token_account_owner: Pubkey,
    pub token_account: Pubkey,
    pub new_metadata_update_authority: Pubkey,
    pub master_metadata: Pubkey,
}

/// Position of the edition marker in the print instruction's account list
pub const PRINT_EDITION_MARKER_INDEX: usize = 4;

pub fn mint_new_edition_from_master_edition_via_token(
    programs: &ProgramIds,
    accounts: MintNewEditionAccounts,
    edition: u64,
) -> io::Result<Instruction> {
    Ok(Instruction {
        program_id: programs.token_metadata,
        accounts: vec![
            AccountMeta::new(accounts.new_metadata, false),
            AccountMeta::new(accounts.new_edition, false),
            AccountMeta::new(accounts.master_edition, false),
            AccountMeta::new(accounts.new_mint, false),
            AccountMeta::new(accounts.edition_marker, false),
            AccountMeta::new_readonly(accounts.new_mint_authority, true),
            AccountMeta::new(accounts.payer, true),
            AccountMeta::new_readonly(accounts.token_account_owner, true),
            AccountMeta::new_readonly(accounts.token_account, false),
            AccountMeta::new_readonly(accounts.new_metadata_update_authority, false),
            AccountMeta::new_readonly(accounts.master_metadata, false),
            AccountMeta::new_readonly(programs.token, false),
            AccountMeta::new_readonly(programs.system, false),
        ],
        data: MetadataInstruction::MintNewEditionFromMasterEditionViaToken(
            MintNewEditionFromMasterEditionViaTokenArgs { edition },
        )
        .pack()?,
    })
}
