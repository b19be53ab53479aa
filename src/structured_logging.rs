//! Structured logging for mint and print workflows

use uuid::Uuid;

use crate::sequencer::{Stage, WorkflowKind};
use crate::tx_builder::Step;

/// Structured logger carrying the workflow correlation id
#[derive(Debug, Clone)]
pub struct WorkflowLogger {
    workflow_id: Uuid,
    kind: WorkflowKind,
}

impl WorkflowLogger {
    pub fn new(workflow_id: Uuid, kind: WorkflowKind) -> Self {
        Self { workflow_id, kind }
    }

    pub fn log_workflow_started(&self, mint: &str) {
        tracing::info!(
            workflow_id = %self.workflow_id,
            kind = %self.kind,
            mint = %mint,
            "Workflow started"
        );
    }

    pub fn log_bundle_submit(&self, stage: Stage, instruction_count: usize) {
        tracing::info!(
            workflow_id = %self.workflow_id,
            stage = %stage,
            instruction_count = %instruction_count,
            "Submitting bundle"
        );
    }

    pub fn log_bundle_confirmed(&self, stage: Stage, signature: &str, latency_ms: u64) {
        tracing::info!(
            workflow_id = %self.workflow_id,
            stage = %stage,
            signature = %signature,
            latency_ms = %latency_ms,
            "Bundle confirmed"
        );
    }

    pub fn log_bundle_failed(
        &self,
        stage: Stage,
        step: Option<Step>,
        error: &str,
        latency_ms: u64,
    ) {
        tracing::warn!(
            workflow_id = %self.workflow_id,
            stage = %stage,
            step = ?step,
            error = %error,
            latency_ms = %latency_ms,
            "Bundle failed"
        );
    }

    /// The bundle may still land after this
    pub fn log_bundle_timed_out(&self, stage: Stage, waited_ms: u64) {
        tracing::warn!(
            workflow_id = %self.workflow_id,
            stage = %stage,
            waited_ms = %waited_ms,
            "Bundle outcome unknown after timeout"
        );
    }

    pub fn log_collision(&self, master_mint: &str, edition: u64) {
        tracing::warn!(
            workflow_id = %self.workflow_id,
            master_mint = %master_mint,
            edition = %edition,
            "Edition number already taken"
        );
    }

    pub fn log_workflow_complete(&self, mint: &str) {
        tracing::info!(
            workflow_id = %self.workflow_id,
            kind = %self.kind,
            mint = %mint,
            "Workflow complete"
        );
    }

    pub fn log_workflow_incomplete(&self, confirmed_bundles: usize, error: &str) {
        tracing::error!(
            workflow_id = %self.workflow_id,
            kind = %self.kind,
            confirmed_bundles = %confirmed_bundles,
            error = %error,
            "Workflow halted with partial on-chain state"
        );
    }

    pub fn warn(&self, message: &str) {
        tracing::warn!(
            workflow_id = %self.workflow_id,
            message = %message,
            "Warning"
        );
    }
}
