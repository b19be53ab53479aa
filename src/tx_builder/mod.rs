//! Instruction building for the mint and print workflows
//!
//! The module is split into focused parts:
//! - **errors**: error taxonomy shared by the whole engine
//! - **metadata**: Token Metadata instruction wire format
//! - **instructions**: step-tagged instruction plans and the builder
//! - **bundle**: the ledger seam bundles are submitted through
//!
//! The builder is pure. It derives addresses, checks caller input and emits
//! instructions, but never generates keys or touches the network.

pub mod bundle;
pub mod errors;
pub mod instructions;
pub mod metadata;

pub use bundle::{LedgerExecutor, RemoteFailure};
pub use errors::{OrchestratorError, RemoteErrorKind};
pub use instructions::{
    sanity_check_plan_order, InstructionBuilder, InstructionPlan, MetadataArgs, MetadataOptions,
    PrintEditionRequest, Step, MINT_ACCOUNT_LEN,
};
pub use metadata::MetadataErrorCode;

pub type Result<T> = std::result::Result<T, OrchestratorError>;
