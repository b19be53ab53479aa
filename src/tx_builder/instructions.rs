//! Instruction planning and ordering validation
//!
//! Every instruction in a plan is tagged with the [`Step`] it performs, so a
//! failure reported at instruction index *i* of a bundle maps back to the
//! operation that caused it. Plans are built for a whole workflow and then
//! split into bundles at step boundaries.
//!
//! Canonical order:
//! 1. create mint account, initialize mint
//! 2. create associated token account, mint one token
//! 3. create metadata, create master edition (originals)
//! 4. print edition (copies)

use std::fmt;

use serde::{Deserialize, Serialize};
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::system_instruction;
use spl_token::solana_program::program_pack::Pack;

use crate::pda::AddressDeriver;
use crate::tx_builder::errors::OrchestratorError;
use crate::tx_builder::metadata::{
    self, CreateMasterEditionAccounts, CreateMetadataAccountArgsV3, CreateMetadataAccounts,
    Creator, DataV2, MintNewEditionAccounts,
};

pub const MAX_NAME_LENGTH: usize = 32;
pub const MAX_SYMBOL_LENGTH: usize = 10;
pub const MAX_URI_LENGTH: usize = 200;

/// Size of an SPL mint account
pub const MINT_ACCOUNT_LEN: usize = spl_token::state::Mint::LEN;

/// ATA program `CreateIdempotent` discriminant
const ATA_CREATE_IDEMPOTENT: u8 = 1;

/// Operation performed by one instruction of a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    CreateMintAccount,
    InitializeMint,
    CreateTokenAccount,
    MintTo,
    CreateMetadata,
    CreateMasterEdition,
    PrintEdition,
}

impl Step {
    fn rank(self) -> u8 {
        match self {
            Self::CreateMintAccount => 0,
            Self::InitializeMint => 1,
            Self::CreateTokenAccount => 2,
            Self::MintTo => 3,
            Self::CreateMetadata => 4,
            Self::CreateMasterEdition => 5,
            Self::PrintEdition => 6,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreateMintAccount => "create_mint_account",
            Self::InitializeMint => "initialize_mint",
            Self::CreateTokenAccount => "create_token_account",
            Self::MintTo => "mint_to",
            Self::CreateMetadata => "create_metadata",
            Self::CreateMasterEdition => "create_master_edition",
            Self::PrintEdition => "print_edition",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered instructions, each tagged with its step
#[derive(Debug, Clone, Default)]
pub struct InstructionPlan {
    pub instructions: Vec<Instruction>,
    pub steps: Vec<Step>,
}

impl InstructionPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: Step, instruction: Instruction) {
        self.instructions.push(instruction);
        self.steps.push(step);
    }

    pub fn extend(&mut self, other: InstructionPlan) {
        self.instructions.extend(other.instructions);
        self.steps.extend(other.steps);
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Step of the instruction at `index`, as reported by a failed submission
    pub fn step_at(&self, index: usize) -> Option<Step> {
        self.steps.get(index).copied()
    }

    /// Split off everything from the first instruction tagged `step` onwards
    ///
    /// Returns an empty plan if `step` is absent.
    pub fn split_off_at(&mut self, step: Step) -> InstructionPlan {
        match self.steps.iter().position(|s| *s == step) {
            Some(at) => InstructionPlan {
                instructions: self.instructions.split_off(at),
                steps: self.steps.split_off(at),
            },
            None => InstructionPlan::new(),
        }
    }
}

/// Validate that a plan follows the canonical step order (debug/test only)
///
/// Steps must appear at most once each and in strictly increasing order.
#[cfg(debug_assertions)]
pub fn sanity_check_plan_order(plan: &InstructionPlan) -> Result<(), OrchestratorError> {
    if plan.is_empty() {
        return Err(OrchestratorError::instruction_failed(
            "plan",
            "instruction list is empty",
        ));
    }
    if plan.instructions.len() != plan.steps.len() {
        return Err(OrchestratorError::instruction_failed(
            "plan",
            format!(
                "{} instructions but {} step tags",
                plan.instructions.len(),
                plan.steps.len()
            ),
        ));
    }
    for (idx, pair) in plan.steps.windows(2).enumerate() {
        if pair[0].rank() >= pair[1].rank() {
            return Err(OrchestratorError::instruction_failed(
                "plan",
                format!("{} at position {} follows {}", pair[1], idx + 1, pair[0]),
            ));
        }
    }
    Ok(())
}

/// No-op version of sanity_check_plan_order for release builds
#[cfg(not(debug_assertions))]
#[inline]
pub fn sanity_check_plan_order(_plan: &InstructionPlan) -> Result<(), OrchestratorError> {
    Ok(())
}

/// Human-facing metadata fields of an original
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataArgs {
    pub name: String,
    pub symbol: String,
    pub uri: String,
}

impl MetadataArgs {
    pub fn new(name: impl Into<String>, symbol: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            symbol: symbol.into(),
            uri: uri.into(),
        }
    }

    /// Length checks the metadata program enforces, done locally
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        check_length("name", &self.name, MAX_NAME_LENGTH)?;
        check_length("symbol", &self.symbol, MAX_SYMBOL_LENGTH)?;
        check_length("uri", &self.uri, MAX_URI_LENGTH)?;
        if self.name.is_empty() {
            return Err(OrchestratorError::validation("name", "must not be empty"));
        }
        if self.uri.is_empty() {
            return Err(OrchestratorError::validation("uri", "must not be empty"));
        }
        Ok(())
    }
}

fn check_length(field: &'static str, value: &str, max: usize) -> Result<(), OrchestratorError> {
    if value.len() > max {
        return Err(OrchestratorError::validation(
            field,
            format!("{} bytes exceeds {}", value.len(), max),
        ));
    }
    Ok(())
}

/// Knobs applied to every original
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataOptions {
    pub seller_fee_basis_points: u16,
    pub is_mutable: bool,
    /// None means unlimited prints
    pub max_supply: Option<u64>,
}

impl Default for MetadataOptions {
    fn default() -> Self {
        Self {
            seller_fee_basis_points: 0,
            is_mutable: true,
            max_supply: None,
        }
    }
}

/// Everything the print instruction references
#[derive(Debug, Clone)]
pub struct PrintEditionRequest {
    pub master_mint: Pubkey,
    pub master_token_account: Pubkey,
    pub master_metadata: Pubkey,
    pub master_edition: Pubkey,
    /// Holder of the master token; pays for and owns the print
    pub owner: Pubkey,
    pub new_mint: Pubkey,
    pub edition: u64,
    /// Rent for the new mint account
    pub rent_lamports: u64,
}

/// Builds instruction plans; never generates keys or talks to the network
#[derive(Debug, Clone, Default)]
pub struct InstructionBuilder {
    deriver: AddressDeriver,
    options: MetadataOptions,
}

impl InstructionBuilder {
    pub fn new(deriver: AddressDeriver, options: MetadataOptions) -> Self {
        Self { deriver, options }
    }

    pub fn deriver(&self) -> &AddressDeriver {
        &self.deriver
    }

    pub fn options(&self) -> &MetadataOptions {
        &self.options
    }

    /// `[create_account, initialize_mint2]` with decimals 0
    ///
    /// `authority` funds the account and becomes mint and freeze authority.
    pub fn build_create_and_initialize_mint(
        &self,
        authority: &Pubkey,
        new_mint: &Pubkey,
        rent_lamports: u64,
    ) -> Result<InstructionPlan, OrchestratorError> {
        if rent_lamports == 0 {
            return Err(OrchestratorError::validation(
                "rent_lamports",
                "mint account needs a rent-exempt balance",
            ));
        }
        let token_program = self.deriver.programs().token;

        let mut plan = InstructionPlan::new();
        plan.push(
            Step::CreateMintAccount,
            system_instruction::create_account(
                authority,
                new_mint,
                rent_lamports,
                MINT_ACCOUNT_LEN as u64,
                &token_program,
            ),
        );
        let init = spl_token::instruction::initialize_mint2(
            &token_program,
            new_mint,
            authority,
            Some(authority),
            0,
        )
        .map_err(|e| OrchestratorError::instruction_failed("spl-token", e.to_string()))?;
        plan.push(Step::InitializeMint, init);
        Ok(plan)
    }

    /// Create the associated token account of `owner` for `mint` if it does not exist
    pub fn build_create_token_account(
        &self,
        payer: &Pubkey,
        owner: &Pubkey,
        mint: &Pubkey,
    ) -> Result<Instruction, OrchestratorError> {
        let programs = self.deriver.programs();
        let token_account = self.deriver.associated_token(owner, mint)?.address;
        Ok(Instruction {
            program_id: programs.associated_token,
            accounts: vec![
                AccountMeta::new(*payer, true),
                AccountMeta::new(token_account, false),
                AccountMeta::new_readonly(*owner, false),
                AccountMeta::new_readonly(*mint, false),
                AccountMeta::new_readonly(programs.system, false),
                AccountMeta::new_readonly(programs.token, false),
            ],
            data: vec![ATA_CREATE_IDEMPOTENT],
        })
    }

    /// Mint exactly one token of `mint` into `token_account`
    pub fn build_mint_to(
        &self,
        authority: &Pubkey,
        mint: &Pubkey,
        token_account: &Pubkey,
    ) -> Result<Instruction, OrchestratorError> {
        spl_token::instruction::mint_to(
            &self.deriver.programs().token,
            mint,
            token_account,
            authority,
            &[],
            1,
        )
        .map_err(|e| OrchestratorError::instruction_failed("spl-token", e.to_string()))
    }

    /// `[mint_to(1), create_metadata_v3, create_master_edition_v3]`
    ///
    /// The passed addresses must equal the ones derived from `mint`.
    pub fn build_mint_original(
        &self,
        authority: &Pubkey,
        mint: &Pubkey,
        token_account: &Pubkey,
        metadata_addr: &Pubkey,
        edition_addr: &Pubkey,
        args: &MetadataArgs,
    ) -> Result<InstructionPlan, OrchestratorError> {
        args.validate()?;

        let expected_token = self.deriver.associated_token(authority, mint)?.address;
        ensure_address("token_account", expected_token, *token_account)?;
        let expected_metadata = self.deriver.metadata(mint)?.address;
        ensure_address("metadata", expected_metadata, *metadata_addr)?;
        let expected_edition = self.deriver.master_edition(mint)?.address;
        ensure_address("master_edition", expected_edition, *edition_addr)?;

        let programs = self.deriver.programs();
        let mut plan = InstructionPlan::new();
        plan.push(Step::MintTo, self.build_mint_to(authority, mint, token_account)?);

        let metadata_ix = metadata::create_metadata_accounts_v3(
            programs,
            CreateMetadataAccounts {
                metadata: *metadata_addr,
                mint: *mint,
                mint_authority: *authority,
                payer: *authority,
                update_authority: *authority,
            },
            CreateMetadataAccountArgsV3 {
                data: DataV2 {
                    name: args.name.clone(),
                    symbol: args.symbol.clone(),
                    uri: args.uri.clone(),
                    seller_fee_basis_points: self.options.seller_fee_basis_points,
                    creators: Some(vec![Creator::sole(authority)]),
                    collection: None,
                    uses: None,
                },
                is_mutable: self.options.is_mutable,
                collection_details: None,
            },
        )
        .map_err(|e| OrchestratorError::instruction_failed("token-metadata", e.to_string()))?;
        plan.push(Step::CreateMetadata, metadata_ix);

        let edition_ix = metadata::create_master_edition_v3(
            programs,
            CreateMasterEditionAccounts {
                edition: *edition_addr,
                mint: *mint,
                update_authority: *authority,
                mint_authority: *authority,
                payer: *authority,
                metadata: *metadata_addr,
            },
            self.options.max_supply,
        )
        .map_err(|e| OrchestratorError::instruction_failed("token-metadata", e.to_string()))?;
        plan.push(Step::CreateMasterEdition, edition_ix);

        Ok(plan)
    }

    /// `[create_account, initialize_mint2, create_token_account, mint_to(1)]` for a print mint
    pub fn build_print_mint(
        &self,
        owner: &Pubkey,
        new_mint: &Pubkey,
        rent_lamports: u64,
    ) -> Result<InstructionPlan, OrchestratorError> {
        let mut plan = self.build_create_and_initialize_mint(owner, new_mint, rent_lamports)?;
        plan.push(
            Step::CreateTokenAccount,
            self.build_create_token_account(owner, owner, new_mint)?,
        );
        let token_account = self.deriver.associated_token(owner, new_mint)?.address;
        plan.push(Step::MintTo, self.build_mint_to(owner, new_mint, &token_account)?);
        Ok(plan)
    }

    /// The print instruction alone
    pub fn build_print_instruction(
        &self,
        request: &PrintEditionRequest,
    ) -> Result<Instruction, OrchestratorError> {
        if request.edition == 0 {
            return Err(OrchestratorError::validation(
                "edition",
                "edition numbers start at 1",
            ));
        }
        if request.new_mint == request.master_mint {
            return Err(OrchestratorError::validation(
                "new_mint",
                "print mint must differ from the master mint",
            ));
        }

        let expected_metadata = self.deriver.metadata(&request.master_mint)?.address;
        ensure_address("master_metadata", expected_metadata, request.master_metadata)?;
        let expected_edition = self.deriver.master_edition(&request.master_mint)?.address;
        ensure_address("master_edition", expected_edition, request.master_edition)?;

        let marker = self
            .deriver
            .edition_marker(&request.master_mint, request.edition)?;
        let new_metadata = self.deriver.metadata(&request.new_mint)?.address;
        let new_edition = self.deriver.master_edition(&request.new_mint)?.address;

        metadata::mint_new_edition_from_master_edition_via_token(
            self.deriver.programs(),
            MintNewEditionAccounts {
                new_metadata,
                new_edition,
                master_edition: request.master_edition,
                new_mint: request.new_mint,
                edition_marker: marker.address,
                new_mint_authority: request.owner,
                payer: request.owner,
                token_account_owner: request.owner,
                token_account: request.master_token_account,
                new_metadata_update_authority: request.owner,
                master_metadata: request.master_metadata,
            },
            request.edition,
        )
        .map_err(|e| OrchestratorError::instruction_failed("token-metadata", e.to_string()))
    }

    /// `[create_account, initialize_mint2, create_token_account, mint_to(1), print]`
    pub fn build_print_edition(
        &self,
        request: &PrintEditionRequest,
    ) -> Result<InstructionPlan, OrchestratorError> {
        let print_ix = self.build_print_instruction(request)?;
        let mut plan =
            self.build_print_mint(&request.owner, &request.new_mint, request.rent_lamports)?;
        plan.push(Step::PrintEdition, print_ix);
        Ok(plan)
    }
}

fn ensure_address(
    account: &'static str,
    expected: Pubkey,
    actual: Pubkey,
) -> Result<(), OrchestratorError> {
    if expected != actual {
        return Err(OrchestratorError::mismatch(account, expected, actual));
    }
    Ok(())
}
