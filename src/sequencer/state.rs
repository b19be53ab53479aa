//! Workflow state machine
//!
//! A workflow moves strictly forward, with each stage gated on the one before:
//! `Pending(s) -> Confirmed(s) -> Pending(next) -> ... -> Complete`. Any
//! pending stage may fail instead; `Complete` and `Failed` are terminal.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use uuid::Uuid;

use crate::tx_builder::errors::OrchestratorError;

/// One bundle of a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Create mint, initialize, create token account, mint 1
    MintAndSupply,
    /// Create metadata and master edition
    MetadataAndEdition,
    /// Same four mint operations for the print's fresh mint
    PrintMint,
    /// The print instruction itself
    PrintEdition,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MintAndSupply => "mint_and_supply",
            Self::MetadataAndEdition => "metadata_and_edition",
            Self::PrintMint => "print_mint",
            Self::PrintEdition => "print_edition",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    MintOriginal,
    PrintCopy,
}

impl WorkflowKind {
    pub fn stages(self) -> &'static [Stage] {
        match self {
            Self::MintOriginal => &[Stage::MintAndSupply, Stage::MetadataAndEdition],
            Self::PrintCopy => &[Stage::PrintMint, Stage::PrintEdition],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::MintOriginal => "mint_original",
            Self::PrintCopy => "print_copy",
        }
    }

    fn position(self, stage: Stage) -> Option<usize> {
        self.stages().iter().position(|s| *s == stage)
    }
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowState {
    Pending(Stage),
    Confirmed(Stage),
    Complete,
    Failed { stage: Stage, reason: String },
}

impl WorkflowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed { .. })
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending(stage) => write!(f, "pending({stage})"),
            Self::Confirmed(stage) => write!(f, "confirmed({stage})"),
            Self::Complete => f.write_str("complete"),
            Self::Failed { stage, .. } => write!(f, "failed({stage})"),
        }
    }
}

/// A confirmed bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleReceipt {
    pub stage: Stage,
    pub signature: Signature,
    pub instruction_count: usize,
    pub confirmed_at: DateTime<Utc>,
}

/// What a workflow has put on chain so far
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowProgress {
    pub workflow_id: Uuid,
    pub kind: WorkflowKind,
    /// Mint the workflow creates (the print mint for copies)
    pub mint: Pubkey,
    pub token_account: Pubkey,
    pub receipts: Vec<BundleReceipt>,
    pub failed_stage: Option<Stage>,
    /// Edition number, for prints
    pub edition: Option<u64>,
}

impl WorkflowProgress {
    pub fn new(kind: WorkflowKind, mint: Pubkey, token_account: Pubkey) -> Self {
        Self {
            workflow_id: Uuid::new_v4(),
            kind,
            mint,
            token_account,
            receipts: Vec::new(),
            failed_stage: None,
            edition: None,
        }
    }

    pub fn confirmed_stages(&self) -> Vec<Stage> {
        self.receipts.iter().map(|r| r.stage).collect()
    }

    pub fn signature_of(&self, stage: Stage) -> Option<Signature> {
        self.receipts
            .iter()
            .find(|r| r.stage == stage)
            .map(|r| r.signature)
    }
}

#[derive(Debug, Clone)]
pub struct Workflow {
    state: WorkflowState,
    progress: WorkflowProgress,
}

impl Workflow {
    pub fn new(kind: WorkflowKind, mint: Pubkey, token_account: Pubkey) -> Self {
        Self {
            state: WorkflowState::Pending(kind.stages()[0]),
            progress: WorkflowProgress::new(kind, mint, token_account),
        }
    }

    pub fn id(&self) -> Uuid {
        self.progress.workflow_id
    }

    pub fn kind(&self) -> WorkflowKind {
        self.progress.kind
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    pub fn progress(&self) -> &WorkflowProgress {
        &self.progress
    }

    pub fn set_edition(&mut self, edition: u64) {
        self.progress.edition = Some(edition);
    }

    fn out_of_order(&self, stage: Stage) -> OrchestratorError {
        OrchestratorError::Sequencing {
            stage,
            state: self.state.to_string(),
        }
    }

    /// Mark `stage` as submitted
    ///
    /// Allowed only when `stage` belongs to this workflow and its predecessor
    /// is confirmed (or it is the first stage and nothing was submitted yet).
    pub fn begin(&mut self, stage: Stage) -> Result<(), OrchestratorError> {
        let kind = self.kind();
        let position = kind
            .position(stage)
            .ok_or_else(|| self.out_of_order(stage))?;

        let ready = match (&self.state, position) {
            (WorkflowState::Pending(first), 0) => {
                *first == stage && self.progress.receipts.is_empty()
            }
            (WorkflowState::Confirmed(prev), n) if n > 0 => *prev == kind.stages()[n - 1],
            _ => false,
        };
        if !ready {
            return Err(self.out_of_order(stage));
        }
        self.state = WorkflowState::Pending(stage);
        Ok(())
    }

    /// Record confirmation of the pending `stage`
    pub fn confirm(
        &mut self,
        stage: Stage,
        signature: Signature,
        instruction_count: usize,
    ) -> Result<(), OrchestratorError> {
        if self.state != WorkflowState::Pending(stage) {
            return Err(self.out_of_order(stage));
        }
        self.progress.receipts.push(BundleReceipt {
            stage,
            signature,
            instruction_count,
            confirmed_at: Utc::now(),
        });

        let stages = self.kind().stages();
        self.state = if stages.last() == Some(&stage) {
            WorkflowState::Complete
        } else {
            WorkflowState::Confirmed(stage)
        };
        Ok(())
    }

    /// Record failure of the pending `stage`
    pub fn fail(
        &mut self,
        stage: Stage,
        reason: impl Into<String>,
    ) -> Result<(), OrchestratorError> {
        if self.state != WorkflowState::Pending(stage) {
            return Err(self.out_of_order(stage));
        }
        self.progress.failed_stage = Some(stage);
        self.state = WorkflowState::Failed {
            stage,
            reason: reason.into(),
        };
        Ok(())
    }

    /// Attach partial progress to `err` if any bundle already confirmed
    pub fn halt(&self, err: OrchestratorError) -> OrchestratorError {
        if self.progress.receipts.is_empty() {
            return err;
        }
        OrchestratorError::Incomplete {
            progress: Box::new(self.progress.clone()),
            source: Box::new(err),
        }
    }

    pub fn into_progress(self) -> WorkflowProgress {
        self.progress
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workflow(kind: WorkflowKind) -> Workflow {
        Workflow::new(kind, Pubkey::new_unique(), Pubkey::new_unique())
    }

    #[test]
    fn test_happy_path() {
        let mut wf = workflow(WorkflowKind::MintOriginal);
        wf.begin(Stage::MintAndSupply).unwrap();
        wf.confirm(Stage::MintAndSupply, Signature::default(), 4).unwrap();
        assert_eq!(wf.state(), &WorkflowState::Confirmed(Stage::MintAndSupply));

        wf.begin(Stage::MetadataAndEdition).unwrap();
        wf.confirm(Stage::MetadataAndEdition, Signature::default(), 2)
            .unwrap();
        assert_eq!(wf.state(), &WorkflowState::Complete);
        assert_eq!(
            wf.progress().confirmed_stages(),
            vec![Stage::MintAndSupply, Stage::MetadataAndEdition]
        );
    }

    #[test]
    fn test_second_bundle_requires_first_confirmed() {
        let mut wf = workflow(WorkflowKind::MintOriginal);
        let err = wf.begin(Stage::MetadataAndEdition).unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Sequencing { stage: Stage::MetadataAndEdition, .. }
        ));

        wf.begin(Stage::MintAndSupply).unwrap();
        // first bundle submitted but not confirmed yet
        assert!(wf.begin(Stage::MetadataAndEdition).is_err());
    }

    #[test]
    fn test_foreign_stage_rejected() {
        let mut wf = workflow(WorkflowKind::PrintCopy);
        assert!(wf.begin(Stage::MintAndSupply).is_err());
        wf.begin(Stage::PrintMint).unwrap();
        assert!(wf.confirm(Stage::PrintEdition, Signature::default(), 1).is_err());
    }

    #[test]
    fn test_terminal_states_reject_transitions() {
        let mut wf = workflow(WorkflowKind::PrintCopy);
        wf.begin(Stage::PrintMint).unwrap();
        wf.fail(Stage::PrintMint, "insufficient funds").unwrap();
        assert!(wf.state().is_terminal());
        assert!(wf.begin(Stage::PrintMint).is_err());
        assert!(wf.begin(Stage::PrintEdition).is_err());
        assert_eq!(wf.progress().failed_stage, Some(Stage::PrintMint));
    }

    #[test]
    fn test_halt_wraps_only_with_receipts() {
        let mut wf = workflow(WorkflowKind::MintOriginal);
        let plain = wf.halt(OrchestratorError::validation("name", "too long"));
        assert!(matches!(plain, OrchestratorError::Validation { .. }));

        wf.begin(Stage::MintAndSupply).unwrap();
        wf.confirm(Stage::MintAndSupply, Signature::default(), 4).unwrap();
        wf.begin(Stage::MetadataAndEdition).unwrap();
        wf.fail(Stage::MetadataAndEdition, "boom").unwrap();

        let wrapped = wf.halt(OrchestratorError::Configuration("boom".to_string()));
        let progress = wrapped.progress().expect("Should carry progress");
        assert_eq!(progress.confirmed_stages(), vec![Stage::MintAndSupply]);
        assert_eq!(progress.failed_stage, Some(Stage::MetadataAndEdition));
    }
}
