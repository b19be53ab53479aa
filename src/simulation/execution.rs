//! Program semantics applied to one bundle's working copy of the accounts

use std::collections::{HashMap, HashSet};

use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::rent::Rent;
use solana_sdk::system_instruction::SystemInstruction;
use spl_token::error::TokenError;
use spl_token::instruction::TokenInstruction;
use spl_token::solana_program::program_option::COption;

use super::accounts::{
    AccountData, Exec, Fault, MasterEditionState, MetadataState, MintState, SimAccount,
    TokenState, ACCOUNT_ALREADY_IN_USE, EDITION_LEN, EDITION_MARKER_LEN, MASTER_EDITION_LEN,
    METADATA_ACCOUNT_LEN, RESULT_WITH_NEGATIVE_LAMPORTS, TOKEN_ACCOUNT_LEN,
};
use crate::edition_ledger::EditionMarkBitmap;
use crate::pda::{self, AddressDeriver};
use crate::tx_builder::instructions::{MAX_NAME_LENGTH, MAX_SYMBOL_LENGTH, MAX_URI_LENGTH};
use crate::tx_builder::metadata::{DataV2, MetadataErrorCode, MetadataInstruction};
use crate::tx_builder::MINT_ACCOUNT_LEN;

pub(super) struct Execution<'a> {
    pub deriver: &'a AddressDeriver,
    pub rent: &'a Rent,
    pub signed: &'a HashSet<Pubkey>,
    pub accounts: HashMap<Pubkey, SimAccount>,
}

impl Execution<'_> {
    pub fn process(&mut self, ix: &Instruction) -> Exec {
        let programs = *self.deriver.programs();
        if ix.program_id == programs.system {
            self.process_system(ix)
        } else if ix.program_id == programs.token {
            self.process_token(ix)
        } else if ix.program_id == programs.associated_token {
            self.process_associated_token(ix)
        } else if ix.program_id == programs.token_metadata {
            self.process_metadata(ix)
        } else {
            Err(Fault::runtime(format!("unknown program {}", ix.program_id)))
        }
    }

    pub fn debit(&mut self, key: &Pubkey, lamports: u64) -> Exec {
        let account = self.accounts.get_mut(key).ok_or_else(|| {
            Fault::custom(RESULT_WITH_NEGATIVE_LAMPORTS, format!("{key} has no lamports"))
        })?;
        account.lamports = account.lamports.checked_sub(lamports).ok_or_else(|| {
            Fault::custom(
                RESULT_WITH_NEGATIVE_LAMPORTS,
                format!("{key} cannot pay {lamports} lamports"),
            )
        })?;
        Ok(())
    }

    fn key(ix: &Instruction, index: usize) -> Exec<Pubkey> {
        ix.accounts
            .get(index)
            .map(|meta| meta.pubkey)
            .ok_or_else(|| Fault::runtime("not enough account keys"))
    }

    fn exists(&self, key: &Pubkey) -> bool {
        self.accounts.get(key).is_some_and(SimAccount::is_in_use)
    }

    fn owned_by(&self, key: &Pubkey, program: &Pubkey) -> bool {
        self.accounts.get(key).is_some_and(|a| a.owner == *program)
    }

    fn data(&self, key: &Pubkey) -> Option<&AccountData> {
        self.accounts.get(key).map(|a| &a.data)
    }

    fn mint_state(&self, key: &Pubkey) -> Option<MintState> {
        self.data(key).and_then(AccountData::as_mint).cloned()
    }

    fn mint_state_mut(&mut self, key: &Pubkey) -> Option<&mut MintState> {
        match self.accounts.get_mut(key).map(|a| &mut a.data) {
            Some(AccountData::Mint(state)) => Some(state),
            _ => None,
        }
    }

    fn token_state(&self, key: &Pubkey) -> Option<TokenState> {
        self.data(key).and_then(AccountData::as_token).cloned()
    }

    fn metadata_state(&self, key: &Pubkey) -> Option<MetadataState> {
        self.data(key).and_then(AccountData::as_metadata).cloned()
    }

    /// Fund and create a program-owned account
    fn create(
        &mut self,
        payer: &Pubkey,
        key: Pubkey,
        owner: Pubkey,
        space: usize,
        data: AccountData,
    ) -> Exec {
        let lamports = self.rent.minimum_balance(space);
        self.debit(payer, lamports)?;
        self.accounts.insert(
            key,
            SimAccount {
                lamports,
                owner,
                data,
            },
        );
        Ok(())
    }

    fn process_system(&mut self, ix: &Instruction) -> Exec {
        let instruction = bincode::deserialize::<SystemInstruction>(&ix.data)
            .map_err(|e| Fault::runtime(format!("invalid system instruction: {e}")))?;
        match instruction {
            SystemInstruction::CreateAccount {
                lamports,
                space,
                owner,
            } => {
                let from = Self::key(ix, 0)?;
                let to = Self::key(ix, 1)?;
                if self.exists(&to) {
                    return Err(Fault::custom(
                        ACCOUNT_ALREADY_IN_USE,
                        format!("account {to} already in use"),
                    ));
                }
                self.debit(&from, lamports)?;
                self.accounts.insert(
                    to,
                    SimAccount {
                        lamports,
                        owner,
                        data: AccountData::Blank {
                            space: space as usize,
                        },
                    },
                );
                Ok(())
            }
            other => Err(Fault::runtime(format!(
                "unsupported system instruction {other:?}"
            ))),
        }
    }

    fn process_token(&mut self, ix: &Instruction) -> Exec {
        let token_program = self.deriver.programs().token;
        let instruction = TokenInstruction::unpack(&ix.data)
            .map_err(|e| Fault::runtime(format!("invalid token instruction: {e}")))?;
        match instruction {
            TokenInstruction::InitializeMint2 {
                decimals,
                mint_authority,
                freeze_authority,
            } => {
                let mint = Self::key(ix, 0)?;
                let account = self
                    .accounts
                    .get(&mint)
                    .ok_or_else(|| Fault::runtime(format!("mint {mint} does not exist")))?;
                if account.owner != token_program {
                    return Err(Fault::runtime("incorrect program id for mint account"));
                }
                match account.data {
                    AccountData::Blank { space } if space == MINT_ACCOUNT_LEN => {}
                    AccountData::Blank { .. } => {
                        return Err(Fault::runtime("invalid mint account data length"))
                    }
                    _ => return Err(Fault::token(TokenError::AlreadyInUse, "mint initialized")),
                }
                if account.lamports < self.rent.minimum_balance(MINT_ACCOUNT_LEN) {
                    return Err(Fault::token(TokenError::NotRentExempt, "mint"));
                }
                let freeze_authority = match freeze_authority {
                    COption::Some(key) => Some(key),
                    COption::None => None,
                };
                if let Some(account) = self.accounts.get_mut(&mint) {
                    account.data = AccountData::Mint(MintState {
                        mint_authority: Some(mint_authority),
                        freeze_authority,
                        supply: 0,
                        decimals,
                    });
                }
                Ok(())
            }
            TokenInstruction::MintTo { amount } => {
                let mint = Self::key(ix, 0)?;
                let destination = Self::key(ix, 1)?;
                let authority = Self::key(ix, 2)?;

                let mint_state = self
                    .mint_state(&mint)
                    .ok_or_else(|| Fault::token(TokenError::InvalidMint, mint.to_string()))?;
                let token = self.token_state(&destination).ok_or_else(|| {
                    Fault::runtime(format!("{destination} is not a token account"))
                })?;
                if token.mint != mint {
                    return Err(Fault::token(
                        TokenError::MintMismatch,
                        destination.to_string(),
                    ));
                }
                match mint_state.mint_authority {
                    None => return Err(Fault::token(TokenError::FixedSupply, mint.to_string())),
                    Some(expected) if expected != authority => {
                        return Err(Fault::token(
                            TokenError::OwnerMismatch,
                            authority.to_string(),
                        ))
                    }
                    Some(_) => {}
                }
                let supply = mint_state
                    .supply
                    .checked_add(amount)
                    .ok_or_else(|| Fault::token(TokenError::Overflow, "supply"))?;

                if let Some(state) = self.mint_state_mut(&mint) {
                    state.supply = supply;
                }
                if let Some(AccountData::Token(state)) =
                    self.accounts.get_mut(&destination).map(|a| &mut a.data)
                {
                    state.amount += amount;
                }
                Ok(())
            }
            _ => Err(Fault::runtime("unsupported token instruction")),
        }
    }

    fn process_associated_token(&mut self, ix: &Instruction) -> Exec {
        let idempotent = match ix.data.as_slice() {
            [] | [0] => false,
            [1] => true,
            _ => return Err(Fault::runtime("unsupported associated token instruction")),
        };
        let payer = Self::key(ix, 0)?;
        let address = Self::key(ix, 1)?;
        let wallet = Self::key(ix, 2)?;
        let mint = Self::key(ix, 3)?;
        let token_program = Self::key(ix, 5)?;

        let expected = pda::derive(
            &[wallet.as_ref(), token_program.as_ref(), mint.as_ref()],
            &self.deriver.programs().associated_token,
        )
        .map_err(|e| Fault::runtime(e.to_string()))?;
        if expected.address != address {
            return Err(Fault::runtime("provided seeds do not result in a valid address"));
        }
        if !self.owned_by(&mint, &token_program) || self.mint_state(&mint).is_none() {
            return Err(Fault::runtime(format!("{mint} is not an initialized mint")));
        }

        if self.exists(&address) {
            return match self.token_state(&address) {
                Some(token) if idempotent && token.owner == wallet && token.mint == mint => Ok(()),
                _ => Err(Fault::custom(
                    ACCOUNT_ALREADY_IN_USE,
                    format!("account {address} already in use"),
                )),
            };
        }
        self.create(
            &payer,
            address,
            token_program,
            TOKEN_ACCOUNT_LEN,
            AccountData::Token(TokenState {
                mint,
                owner: wallet,
                amount: 0,
            }),
        )
    }

    fn process_metadata(&mut self, ix: &Instruction) -> Exec {
        let instruction = MetadataInstruction::unpack(&ix.data)
            .map_err(|e| Fault::runtime(format!("invalid metadata instruction: {e}")))?;
        match instruction {
            MetadataInstruction::CreateMetadataAccountV3(args) => {
                self.create_metadata(ix, args.data, args.is_mutable)
            }
            MetadataInstruction::CreateMasterEditionV3(args) => {
                self.create_master_edition(ix, args.max_supply)
            }
            MetadataInstruction::MintNewEditionFromMasterEditionViaToken(args) => {
                self.print_edition(ix, args.edition)
            }
        }
    }

    fn create_metadata(&mut self, ix: &Instruction, data: DataV2, is_mutable: bool) -> Exec {
        let programs = *self.deriver.programs();
        let metadata = Self::key(ix, 0)?;
        let mint = Self::key(ix, 1)?;
        let mint_authority = Self::key(ix, 2)?;
        let payer = Self::key(ix, 3)?;
        let update_authority = Self::key(ix, 4)?;

        let expected = self
            .deriver
            .metadata(&mint)
            .map_err(|e| Fault::runtime(e.to_string()))?;
        if expected.address != metadata {
            return Err(Fault::metadata(
                MetadataErrorCode::InvalidMetadataKey,
                metadata.to_string(),
            ));
        }
        if !self.owned_by(&mint, &programs.token) {
            return Err(Fault::metadata(MetadataErrorCode::IncorrectOwner, mint.to_string()));
        }
        let mint_state = self
            .mint_state(&mint)
            .ok_or_else(|| Fault::metadata(MetadataErrorCode::IncorrectOwner, mint.to_string()))?;
        if mint_state.mint_authority != Some(mint_authority) {
            return Err(Fault::metadata(
                MetadataErrorCode::InvalidMintAuthority,
                mint_authority.to_string(),
            ));
        }
        if self.exists(&metadata) {
            return Err(Fault::metadata(
                MetadataErrorCode::AlreadyInitialized,
                metadata.to_string(),
            ));
        }
        if data.name.len() > MAX_NAME_LENGTH {
            return Err(Fault::metadata(MetadataErrorCode::NameTooLong, data.name));
        }
        if data.symbol.len() > MAX_SYMBOL_LENGTH {
            return Err(Fault::metadata(MetadataErrorCode::SymbolTooLong, data.symbol));
        }
        if data.uri.len() > MAX_URI_LENGTH {
            return Err(Fault::metadata(MetadataErrorCode::UriTooLong, data.uri));
        }

        self.create(
            &payer,
            metadata,
            programs.token_metadata,
            METADATA_ACCOUNT_LEN,
            AccountData::Metadata(Box::new(MetadataState {
                mint,
                update_authority,
                data,
                is_mutable,
            })),
        )
    }

    fn create_master_edition(&mut self, ix: &Instruction, max_supply: Option<u64>) -> Exec {
        let programs = *self.deriver.programs();
        let edition = Self::key(ix, 0)?;
        let mint = Self::key(ix, 1)?;
        let update_authority = Self::key(ix, 2)?;
        let mint_authority = Self::key(ix, 3)?;
        let payer = Self::key(ix, 4)?;
        let metadata = Self::key(ix, 5)?;

        if !self.owned_by(&metadata, &programs.token_metadata) {
            return Err(Fault::metadata(
                MetadataErrorCode::IncorrectOwner,
                metadata.to_string(),
            ));
        }
        let metadata_state = self.metadata_state(&metadata).ok_or_else(|| {
            Fault::metadata(MetadataErrorCode::IncorrectOwner, metadata.to_string())
        })?;
        if metadata_state.mint != mint {
            return Err(Fault::metadata(MetadataErrorCode::MintMismatch, mint.to_string()));
        }
        if !self.owned_by(&mint, &programs.token) {
            return Err(Fault::metadata(MetadataErrorCode::IncorrectOwner, mint.to_string()));
        }
        let mint_state = self
            .mint_state(&mint)
            .ok_or_else(|| Fault::metadata(MetadataErrorCode::IncorrectOwner, mint.to_string()))?;

        let expected = self
            .deriver
            .master_edition(&mint)
            .map_err(|e| Fault::runtime(e.to_string()))?;
        if expected.address != edition {
            return Err(Fault::metadata(
                MetadataErrorCode::InvalidEditionKey,
                edition.to_string(),
            ));
        }
        if self.exists(&edition) {
            return Err(Fault::metadata(
                MetadataErrorCode::AlreadyInitialized,
                edition.to_string(),
            ));
        }
        if metadata_state.update_authority != update_authority {
            return Err(Fault::metadata(
                MetadataErrorCode::UpdateAuthorityIncorrect,
                update_authority.to_string(),
            ));
        }
        if mint_state.mint_authority != Some(mint_authority) {
            return Err(Fault::metadata(
                MetadataErrorCode::InvalidMintAuthority,
                mint_authority.to_string(),
            ));
        }
        if mint_state.decimals != 0 {
            return Err(Fault::metadata(
                MetadataErrorCode::EditionMintDecimalsShouldBeZero,
                mint.to_string(),
            ));
        }
        if mint_state.supply != 1 {
            return Err(Fault::metadata(
                MetadataErrorCode::EditionsMustHaveExactlyOneToken,
                format!("mint supply is {}", mint_state.supply),
            ));
        }

        self.create(
            &payer,
            edition,
            programs.token_metadata,
            MASTER_EDITION_LEN,
            AccountData::MasterEdition(MasterEditionState {
                supply: 0,
                max_supply,
            }),
        )?;
        // the edition takes over both authorities, freezing supply at 1
        if let Some(state) = self.mint_state_mut(&mint) {
            state.mint_authority = Some(edition);
            state.freeze_authority = Some(edition);
        }
        Ok(())
    }

    fn print_edition(&mut self, ix: &Instruction, edition: u64) -> Exec {
        let programs = *self.deriver.programs();
        let new_metadata = Self::key(ix, 0)?;
        let new_edition = Self::key(ix, 1)?;
        let master_edition = Self::key(ix, 2)?;
        let new_mint = Self::key(ix, 3)?;
        let marker = Self::key(ix, 4)?;
        let new_mint_authority = Self::key(ix, 5)?;
        let payer = Self::key(ix, 6)?;
        let owner = Self::key(ix, 7)?;
        let token_account = Self::key(ix, 8)?;
        let update_authority = Self::key(ix, 9)?;
        let master_metadata = Self::key(ix, 10)?;

        for (key, program) in [
            (&new_mint, &programs.token),
            (&token_account, &programs.token),
            (&master_edition, &programs.token_metadata),
            (&master_metadata, &programs.token_metadata),
        ] {
            if !self.owned_by(key, program) {
                return Err(Fault::metadata(MetadataErrorCode::IncorrectOwner, key.to_string()));
            }
        }
        if !self.signed.contains(&payer) || !self.signed.contains(&owner) {
            return Err(Fault::runtime("payer and token owner must sign"));
        }

        let master = self.metadata_state(&master_metadata).ok_or_else(|| {
            Fault::metadata(
                MetadataErrorCode::InvalidMetadataKey,
                master_metadata.to_string(),
            )
        })?;
        let token = self.token_state(&token_account).ok_or_else(|| {
            Fault::runtime(format!("{token_account} is not a token account"))
        })?;
        if token.owner != owner {
            return Err(Fault::metadata(MetadataErrorCode::InvalidOwner, owner.to_string()));
        }
        if token.mint != master.mint {
            return Err(Fault::metadata(
                MetadataErrorCode::TokenAccountMintMismatch,
                token_account.to_string(),
            ));
        }
        if token.amount < 1 {
            return Err(Fault::metadata(
                MetadataErrorCode::NotEnoughTokens,
                token_account.to_string(),
            ));
        }
        if self.exists(&new_metadata) || self.exists(&new_edition) {
            return Err(Fault::metadata(
                MetadataErrorCode::AlreadyInitialized,
                "print accounts already exist",
            ));
        }

        let expected_master = self
            .deriver
            .master_edition(&master.mint)
            .map_err(|e| Fault::runtime(e.to_string()))?;
        let master_state = self
            .data(&master_edition)
            .and_then(AccountData::as_master_edition)
            .filter(|_| expected_master.address == master_edition)
            .cloned()
            .ok_or_else(|| {
                Fault::metadata(
                    MetadataErrorCode::InvalidEditionKey,
                    master_edition.to_string(),
                )
            })?;

        let scheme = self.deriver.marker_scheme();
        let offset = scheme
            .bit_offset(edition)
            .map_err(|e| Fault::metadata(MetadataErrorCode::InvalidEditionIndex, e.to_string()))?;
        let expected_marker = self
            .deriver
            .edition_marker(&master.mint, edition)
            .map_err(|e| Fault::metadata(MetadataErrorCode::InvalidEditionIndex, e.to_string()))?;
        if expected_marker.address != marker {
            return Err(Fault::metadata(
                MetadataErrorCode::DerivedKeyInvalid,
                marker.to_string(),
            ));
        }
        let existing = match self.data(&marker) {
            Some(AccountData::EditionMarker(bitmap)) => Some(*bitmap),
            _ => None,
        };
        let marker_exists = existing.is_some();
        let mut bitmap = existing.unwrap_or_default();
        let fresh = bitmap
            .mark(offset)
            .map_err(|e| Fault::metadata(MetadataErrorCode::InvalidEditionIndex, e.to_string()))?;
        if !fresh {
            return Err(Fault::metadata(
                MetadataErrorCode::AlreadyInitialized,
                format!("edition {edition} already printed"),
            ));
        }

        if let Some(max) = master_state.max_supply {
            if edition > max || master_state.supply >= max {
                return Err(Fault::metadata(
                    MetadataErrorCode::MaxEditionsMintedAlready,
                    format!("max supply {max}"),
                ));
            }
        }

        let new_mint_state = self.mint_state(&new_mint).ok_or_else(|| {
            Fault::metadata(MetadataErrorCode::IncorrectOwner, new_mint.to_string())
        })?;
        if new_mint_state.mint_authority != Some(new_mint_authority) {
            return Err(Fault::metadata(
                MetadataErrorCode::InvalidMintAuthority,
                new_mint_authority.to_string(),
            ));
        }
        if new_mint_state.supply != 1 {
            return Err(Fault::metadata(
                MetadataErrorCode::EditionsMustHaveExactlyOneToken,
                format!("print mint supply is {}", new_mint_state.supply),
            ));
        }
        if new_mint_state.decimals != 0 {
            return Err(Fault::metadata(
                MetadataErrorCode::EditionMintDecimalsShouldBeZero,
                new_mint.to_string(),
            ));
        }
        let derived_metadata = self
            .deriver
            .metadata(&new_mint)
            .map_err(|e| Fault::runtime(e.to_string()))?;
        if derived_metadata.address != new_metadata {
            return Err(Fault::metadata(
                MetadataErrorCode::InvalidMetadataKey,
                new_metadata.to_string(),
            ));
        }
        let derived_edition = self
            .deriver
            .master_edition(&new_mint)
            .map_err(|e| Fault::runtime(e.to_string()))?;
        if derived_edition.address != new_edition {
            return Err(Fault::metadata(
                MetadataErrorCode::InvalidEditionKey,
                new_edition.to_string(),
            ));
        }

        if marker_exists {
            if let Some(account) = self.accounts.get_mut(&marker) {
                account.data = AccountData::EditionMarker(bitmap);
            }
        } else {
            self.create(
                &payer,
                marker,
                programs.token_metadata,
                EDITION_MARKER_LEN,
                AccountData::EditionMarker(bitmap),
            )?;
        }
        self.create(
            &payer,
            new_metadata,
            programs.token_metadata,
            METADATA_ACCOUNT_LEN,
            AccountData::Metadata(Box::new(MetadataState {
                mint: new_mint,
                update_authority,
                data: master.data.clone(),
                is_mutable: master.is_mutable,
            })),
        )?;
        self.create(
            &payer,
            new_edition,
            programs.token_metadata,
            EDITION_LEN,
            AccountData::Edition {
                parent: master_edition,
                edition,
            },
        )?;
        if let Some(AccountData::MasterEdition(state)) =
            self.accounts.get_mut(&master_edition).map(|a| &mut a.data)
        {
            state.supply += 1;
        }
        if let Some(state) = self.mint_state_mut(&new_mint) {
            state.mint_authority = Some(new_edition);
            state.freeze_authority = Some(new_edition);
        }
        Ok(())
    }
}

/// Bitmap of the marker account at `marker`, if one was created
pub(super) fn marker_bitmap(
    accounts: &HashMap<Pubkey, SimAccount>,
    marker: &Pubkey,
) -> Option<EditionMarkBitmap> {
    match accounts.get(marker).map(|a| &a.data) {
        Some(AccountData::EditionMarker(bitmap)) => Some(*bitmap),
        _ => None,
    }
}
