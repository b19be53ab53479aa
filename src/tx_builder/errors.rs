//! Error types for derivation, instruction building and bundle sequencing
//!
//! The taxonomy separates failures by who can fix them:
//! - Local validation: malformed input, rejected before any network call
//! - Derivation: address search failed, fatal for that operation
//! - Sequencing: a bundle was attempted before its dependency confirmed
//! - Remote: coded failures from the ledger, tagged with bundle and step
//! - Collision: the edition number is already taken
//!
//! Nothing here is retried automatically. Re-submitting a mint or print bundle
//! can duplicate supply, so the caller decides.

use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

use crate::pda::DerivationError;
use crate::sequencer::{Stage, WorkflowProgress};
use crate::tx_builder::bundle::RemoteFailure;
use crate::tx_builder::instructions::Step;
use crate::tx_builder::metadata::MetadataErrorCode;

/// Custom error codes of the original wrapper program
const WRAPPER_MINT_FAILED: u32 = 6000;
const WRAPPER_METADATA_CREATE_FAILED: u32 = 6001;
const WRAPPER_WRONG_METADATA_OWNER: u32 = 6002;
const WRAPPER_WRONG_MASTER_EDITION_OWNER: u32 = 6003;

/// Error type for all orchestrator operations
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Malformed caller input (oversize name, missing key material, ...)
    #[error("Invalid {field}: {reason}")]
    Validation {
        field: &'static str,
        reason: String,
    },

    /// A caller-supplied address differs from the one derived for it
    #[error("Address mismatch for {account}: expected {expected}, got {actual}")]
    AddressMismatch {
        account: &'static str,
        expected: Pubkey,
        actual: Pubkey,
    },

    #[error("Address derivation failed: {0}")]
    Derivation(#[from] DerivationError),

    /// Failed to build an instruction for a specific program
    #[error("Instruction build error (program={program}): {reason}")]
    InstructionBuild { program: String, reason: String },

    /// A bundle was attempted before the bundle it depends on confirmed
    #[error("Bundle {stage} cannot be submitted while the workflow is {state}")]
    Sequencing { stage: Stage, state: String },

    /// Coded failure reported by the ledger
    #[error("Bundle {stage} failed at {} ({kind:?}): {failure}", step_label(.step))]
    Remote {
        stage: Stage,
        step: Option<Step>,
        kind: RemoteErrorKind,
        #[source]
        failure: RemoteFailure,
    },

    /// The edition number is already printed (or being printed)
    #[error("Edition {edition} of master {master_mint} is already taken")]
    EditionCollision { master_mint: Pubkey, edition: u64 },

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A later bundle failed after earlier bundles confirmed
    ///
    /// The confirmed bundles are not rolled back; `progress` lists what
    /// already exists on chain so the caller can resume.
    #[error(
        "Workflow {} halted after {} confirmed bundle(s): {source}",
        .progress.workflow_id,
        .progress.receipts.len()
    )]
    Incomplete {
        progress: Box<WorkflowProgress>,
        #[source]
        source: Box<OrchestratorError>,
    },

    #[error("External error: {0}")]
    External(#[from] anyhow::Error),
}

fn step_label(step: &Option<Step>) -> &'static str {
    step.map(|step| step.as_str()).unwrap_or("pre-submission check")
}

/// Remote failure kinds, named after the operation that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    MintFailed,
    MetadataCreateFailed,
    WrongMetadataOwner,
    WrongMasterEditionOwner,
    PrintFailed,
    Unclassified,
}

impl RemoteErrorKind {
    /// Classify a failure from the step it hit and the program's error code
    pub fn classify(step: Option<Step>, code: Option<u32>) -> Self {
        match code {
            Some(WRAPPER_MINT_FAILED) => return Self::MintFailed,
            Some(WRAPPER_METADATA_CREATE_FAILED) => return Self::MetadataCreateFailed,
            Some(WRAPPER_WRONG_METADATA_OWNER) => return Self::WrongMetadataOwner,
            Some(WRAPPER_WRONG_MASTER_EDITION_OWNER) => return Self::WrongMasterEditionOwner,
            _ => {}
        }

        let incorrect_owner = code == Some(MetadataErrorCode::IncorrectOwner as u32);
        match step {
            Some(
                Step::CreateMintAccount
                | Step::InitializeMint
                | Step::CreateTokenAccount
                | Step::MintTo,
            ) => Self::MintFailed,
            Some(Step::CreateMetadata) if incorrect_owner => Self::WrongMetadataOwner,
            Some(Step::CreateMetadata) => Self::MetadataCreateFailed,
            Some(Step::CreateMasterEdition | Step::PrintEdition) if incorrect_owner => {
                Self::WrongMasterEditionOwner
            }
            Some(Step::CreateMasterEdition) => Self::MetadataCreateFailed,
            Some(Step::PrintEdition) => Self::PrintFailed,
            None => Self::Unclassified,
        }
    }
}

impl OrchestratorError {
    /// Innermost error, looking through `Incomplete`
    pub fn root(&self) -> &OrchestratorError {
        match self {
            Self::Incomplete { source, .. } => source.root(),
            other => other,
        }
    }

    /// The edition number was taken; pick another number instead of retrying
    pub fn is_collision(&self) -> bool {
        matches!(self.root(), Self::EditionCollision { .. })
    }

    /// Partial on-chain state left behind, if any bundle confirmed
    pub fn progress(&self) -> Option<&WorkflowProgress> {
        match self {
            Self::Incomplete { progress, .. } => Some(progress),
            _ => None,
        }
    }

    /// Remote failure kind, if this came from the ledger
    pub fn remote_kind(&self) -> Option<RemoteErrorKind> {
        match self.root() {
            Self::Remote { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Errors the caller fixes by changing input rather than by waiting
    pub fn is_caller_correctable(&self) -> bool {
        matches!(
            self.root(),
            Self::Validation { .. }
                | Self::AddressMismatch { .. }
                | Self::Configuration(_)
                | Self::EditionCollision { .. }
        )
    }

    /// Get the error category for metrics and observability
    pub fn category(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::AddressMismatch { .. } => "validation",
            Self::Derivation(_) => "derivation",
            Self::InstructionBuild { .. } => "instruction",
            Self::Sequencing { .. } => "sequencing",
            Self::Remote { .. } => "remote",
            Self::EditionCollision { .. } => "collision",
            Self::Configuration(_) => "config",
            Self::Incomplete { source, .. } => source.category(),
            Self::External(_) => "external",
        }
    }
}

// Convenience constructors for common error scenarios
impl OrchestratorError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }

    pub fn instruction_failed(program: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InstructionBuild {
            program: program.into(),
            reason: reason.into(),
        }
    }

    pub fn remote(stage: Stage, step: Option<Step>, failure: RemoteFailure) -> Self {
        Self::Remote {
            stage,
            step,
            kind: RemoteErrorKind::classify(step, failure.code),
            failure,
        }
    }

    pub fn mismatch(account: &'static str, expected: Pubkey, actual: Pubkey) -> Self {
        Self::AddressMismatch {
            account,
            expected,
            actual,
        }
    }
}
