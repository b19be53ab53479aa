//! edition-forge: mint master NFTs and numbered print editions on Solana
//!
//! - [`pda`] derives every program address the workflows touch
//! - [`tx_builder`] assembles the ordered instruction plans
//! - [`sequencer`] submits them as two dependent bundles per workflow
//! - [`edition_ledger`] tracks print numbering per master
//!
//! Bundles reach a ledger only through [`tx_builder::LedgerExecutor`], which is
//! implemented by [`rpc::RpcLedger`] and the in-memory
//! [`simulation::SimulatedLedger`].

pub mod config;
pub mod edition_ledger;
pub mod metrics;
pub mod pda;
pub mod rpc;
pub mod sequencer;
pub mod simulation;
pub mod structured_logging;
pub mod tx_builder;
pub mod wallet;

pub use edition_ledger::EditionLedger;
pub use pda::{AddressDeriver, DerivedAddress, EditionMarkerScheme, ProgramIds};
pub use sequencer::{MasterRef, OriginalNft, PrintedEdition, Sequencer};
pub use tx_builder::{InstructionBuilder, LedgerExecutor, MetadataArgs, OrchestratorError};

// Re-export commonly used types
pub use solana_sdk::{pubkey::Pubkey, signature::Signature};
