//! Bundle sequencing for the mint and print workflows
//!
//! - **state**: stage ordering, workflow state machine and progress records
//! - **workflow**: the `Sequencer` that drives bundles through a `LedgerExecutor`

pub mod state;
pub mod workflow;

pub use state::{BundleReceipt, Stage, Workflow, WorkflowKind, WorkflowProgress, WorkflowState};
pub use workflow::{MasterRef, OriginalNft, PrintedEdition, Sequencer};
