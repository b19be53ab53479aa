//! Sequencer for the mint and print workflows
//!
//! Each workflow is two bundles. The second is only submitted once the first
//! is confirmed, and nothing is retried or rolled back: a failure after the
//! first bundle landed surfaces as `Incomplete` with the partial progress.

use std::sync::Arc;

use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature, Signer};
use tracing::instrument;

use crate::edition_ledger::{AttemptFailure, EditionLedger};
use crate::metrics::{metrics, Timer};
use crate::pda::AddressDeriver;
use crate::sequencer::state::{Stage, Workflow, WorkflowKind, WorkflowProgress};
use crate::structured_logging::WorkflowLogger;
use crate::tx_builder::{
    sanity_check_plan_order, InstructionBuilder, InstructionPlan, LedgerExecutor, MetadataArgs,
    MetadataErrorCode, OrchestratorError, PrintEditionRequest, RemoteErrorKind, RemoteFailure,
    Result, Step, MINT_ACCOUNT_LEN,
};

/// A minted original with its master edition
#[derive(Debug, Clone)]
pub struct OriginalNft {
    pub mint: Pubkey,
    pub token_account: Pubkey,
    pub metadata: Pubkey,
    pub master_edition: Pubkey,
    pub authority: Pubkey,
    pub progress: WorkflowProgress,
}

/// The accounts of a master that prints reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterRef {
    pub mint: Pubkey,
    /// Token account holding the master token, owned by the print signer
    pub token_account: Pubkey,
    pub metadata: Pubkey,
    pub master_edition: Pubkey,
}

impl MasterRef {
    /// Derive every account of a master held in `owner`'s associated token account
    pub fn derive(deriver: &AddressDeriver, owner: &Pubkey, mint: &Pubkey) -> Result<Self> {
        Ok(Self {
            mint: *mint,
            token_account: deriver.associated_token(owner, mint)?.address,
            metadata: deriver.metadata(mint)?.address,
            master_edition: deriver.master_edition(mint)?.address,
        })
    }
}

impl From<&OriginalNft> for MasterRef {
    fn from(original: &OriginalNft) -> Self {
        Self {
            mint: original.mint,
            token_account: original.token_account,
            metadata: original.metadata,
            master_edition: original.master_edition,
        }
    }
}

/// A confirmed numbered print
#[derive(Debug, Clone)]
pub struct PrintedEdition {
    pub master_mint: Pubkey,
    pub edition: u64,
    pub mint: Pubkey,
    pub token_account: Pubkey,
    pub metadata: Pubkey,
    /// The print's edition record
    pub edition_account: Pubkey,
    pub edition_marker: Pubkey,
    pub progress: WorkflowProgress,
}

pub struct Sequencer<L: LedgerExecutor + ?Sized> {
    ledger: Arc<L>,
    builder: InstructionBuilder,
    editions: Arc<EditionLedger>,
}

impl<L: LedgerExecutor + ?Sized> Sequencer<L> {
    pub fn new(ledger: Arc<L>, builder: InstructionBuilder, editions: Arc<EditionLedger>) -> Self {
        Self {
            ledger,
            builder,
            editions,
        }
    }

    pub fn builder(&self) -> &InstructionBuilder {
        &self.builder
    }

    pub fn deriver(&self) -> &AddressDeriver {
        self.builder.deriver()
    }

    pub fn editions(&self) -> &Arc<EditionLedger> {
        &self.editions
    }

    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    /// Mint an original: one token, its metadata and a master edition
    #[instrument(skip_all, fields(mint = %mint.pubkey()))]
    pub async fn mint_original(
        &self,
        authority: &Keypair,
        mint: &Keypair,
        args: &MetadataArgs,
    ) -> Result<OriginalNft> {
        args.validate()?;
        let authority_key = authority.pubkey();
        let mint_key = mint.pubkey();
        if mint_key == authority_key {
            return Err(OrchestratorError::validation(
                "mint",
                "mint keypair must differ from the authority",
            ));
        }

        let deriver = self.deriver();
        let token_account = deriver.associated_token(&authority_key, &mint_key)?.address;
        let metadata = deriver.metadata(&mint_key)?.address;
        let master_edition = deriver.master_edition(&mint_key)?.address;

        let rent = self.mint_rent(Stage::MintAndSupply).await?;

        let mut mint_and_supply = self
            .builder
            .build_create_and_initialize_mint(&authority_key, &mint_key, rent)?;
        mint_and_supply.push(
            Step::CreateTokenAccount,
            self.builder
                .build_create_token_account(&authority_key, &authority_key, &mint_key)?,
        );
        let mut original = self.builder.build_mint_original(
            &authority_key,
            &mint_key,
            &token_account,
            &metadata,
            &master_edition,
            args,
        )?;
        let metadata_and_edition = original.split_off_at(Step::CreateMetadata);
        mint_and_supply.extend(original);
        sanity_check_plan_order(&mint_and_supply)?;
        sanity_check_plan_order(&metadata_and_edition)?;

        let mut workflow = Workflow::new(WorkflowKind::MintOriginal, mint_key, token_account);
        let logger = WorkflowLogger::new(workflow.id(), workflow.kind());
        logger.log_workflow_started(&mint_key.to_string());
        let _in_flight = InFlight::start();

        let staged = [
            (Stage::MintAndSupply, &mint_and_supply, vec![authority, mint]),
            (Stage::MetadataAndEdition, &metadata_and_edition, vec![authority]),
        ];
        for (stage, plan, signers) in staged {
            if let Err(err) = self
                .run_stage(&mut workflow, &logger, stage, plan, &authority_key, &signers)
                .await
            {
                return Err(self.halt(&workflow, &logger, err));
            }
        }

        self.editions.register_master(mint_key);
        self.complete(&workflow, &logger);

        Ok(OriginalNft {
            mint: mint_key,
            token_account,
            metadata,
            master_edition,
            authority: authority_key,
            progress: workflow.into_progress(),
        })
    }

    /// Print a numbered copy of `master`
    ///
    /// `edition` of None takes the next candidate number for the master.
    /// `owner` must hold the master token in `master.token_account`.
    #[instrument(skip_all, fields(master = %master.mint, new_mint = %new_mint.pubkey()))]
    pub async fn print_edition(
        &self,
        owner: &Keypair,
        master: &MasterRef,
        new_mint: &Keypair,
        edition: Option<u64>,
    ) -> Result<PrintedEdition> {
        let owner_key = owner.pubkey();
        let new_mint_key = new_mint.pubkey();
        if new_mint_key == master.mint || new_mint_key == owner_key {
            return Err(OrchestratorError::validation(
                "new_mint",
                "print mint must be a fresh key",
            ));
        }

        let deriver = self.deriver();
        let expected_metadata = deriver.metadata(&master.mint)?.address;
        if expected_metadata != master.metadata {
            return Err(OrchestratorError::mismatch(
                "master_metadata",
                expected_metadata,
                master.metadata,
            ));
        }
        let expected_edition = deriver.master_edition(&master.mint)?.address;
        if expected_edition != master.master_edition {
            return Err(OrchestratorError::mismatch(
                "master_edition",
                expected_edition,
                master.master_edition,
            ));
        }
        let new_token_account = deriver.associated_token(&owner_key, &new_mint_key)?.address;
        let new_metadata = deriver.metadata(&new_mint_key)?.address;
        let new_edition = deriver.master_edition(&new_mint_key)?.address;

        self.editions.register_master(master.mint);
        let number = self.editions.begin_attempt(&master.mint, edition)?;
        let edition_marker = match deriver.edition_marker(&master.mint, number) {
            Ok(marker) => marker.address,
            Err(err) => {
                self.editions.release(&master.mint, number);
                return Err(err.into());
            }
        };

        let mut workflow = Workflow::new(WorkflowKind::PrintCopy, new_mint_key, new_token_account);
        workflow.set_edition(number);
        let logger = WorkflowLogger::new(workflow.id(), workflow.kind());
        logger.log_workflow_started(&new_mint_key.to_string());
        let _in_flight = InFlight::start();

        let (print_mint, print) = match self
            .prepare_print(master, &owner_key, &new_mint_key, number)
            .await
        {
            Ok(plans) => plans,
            Err(err) => {
                self.editions.release(&master.mint, number);
                return Err(self.halt(&workflow, &logger, err));
            }
        };

        if let Err(err) = self
            .run_stage(
                &mut workflow,
                &logger,
                Stage::PrintMint,
                &print_mint,
                &owner_key,
                &[owner, new_mint],
            )
            .await
        {
            self.editions.release(&master.mint, number);
            return Err(self.halt(&workflow, &logger, err));
        }

        if let Err(err) = self
            .run_stage(
                &mut workflow,
                &logger,
                Stage::PrintEdition,
                &print,
                &owner_key,
                &[owner],
            )
            .await
        {
            let err = if self
                .is_edition_taken(&err, &new_metadata, &new_edition, &edition_marker)
                .await
            {
                self.editions
                    .record_failed(&master.mint, number, AttemptFailure::Collision);
                logger.log_collision(&master.mint.to_string(), number);
                if let Some(m) = metrics() {
                    m.edition_collisions.inc();
                }
                OrchestratorError::EditionCollision {
                    master_mint: master.mint,
                    edition: number,
                }
            } else {
                self.editions
                    .record_failed(&master.mint, number, AttemptFailure::Failed);
                err
            };
            return Err(self.halt(&workflow, &logger, err));
        }

        self.editions.record_confirmed(&master.mint, number);
        self.complete(&workflow, &logger);

        Ok(PrintedEdition {
            master_mint: master.mint,
            edition: number,
            mint: new_mint_key,
            token_account: new_token_account,
            metadata: new_metadata,
            edition_account: new_edition,
            edition_marker,
            progress: workflow.into_progress(),
        })
    }

    /// Owner checks on the master accounts, then both print bundles
    async fn prepare_print(
        &self,
        master: &MasterRef,
        owner: &Pubkey,
        new_mint: &Pubkey,
        edition: u64,
    ) -> Result<(InstructionPlan, InstructionPlan)> {
        let metadata_program = self.deriver().programs().token_metadata;
        self.expect_owner(
            &master.metadata,
            &metadata_program,
            RemoteErrorKind::WrongMetadataOwner,
            "master metadata",
        )
        .await?;
        self.expect_owner(
            &master.master_edition,
            &metadata_program,
            RemoteErrorKind::WrongMasterEditionOwner,
            "master edition",
        )
        .await?;

        let rent = self.mint_rent(Stage::PrintMint).await?;
        let mut print_mint = self.builder.build_print_edition(&PrintEditionRequest {
            master_mint: master.mint,
            master_token_account: master.token_account,
            master_metadata: master.metadata,
            master_edition: master.master_edition,
            owner: *owner,
            new_mint: *new_mint,
            edition,
            rent_lamports: rent,
        })?;
        let print = print_mint.split_off_at(Step::PrintEdition);
        sanity_check_plan_order(&print_mint)?;
        sanity_check_plan_order(&print)?;
        Ok((print_mint, print))
    }

    async fn expect_owner(
        &self,
        address: &Pubkey,
        program: &Pubkey,
        kind: RemoteErrorKind,
        label: &str,
    ) -> Result<()> {
        let owner = self
            .ledger
            .account_owner(address)
            .await
            .map_err(|failure| OrchestratorError::remote(Stage::PrintMint, None, failure))?;

        let message = match owner {
            Some(found) if found == *program => return Ok(()),
            Some(found) => format!("{label} {address} is owned by {found}, expected {program}"),
            None => format!("{label} {address} does not exist"),
        };
        Err(OrchestratorError::Remote {
            stage: Stage::PrintMint,
            step: None,
            kind,
            failure: RemoteFailure::new(message),
        })
    }

    /// The print step reported the number as already printed
    ///
    /// `EditionAlreadyMinted` is definitive. `AlreadyInitialized` is also what
    /// the program returns when the print's own accounts exist, so it only
    /// counts once the ledger shows the marker and no print accounts.
    async fn is_edition_taken(
        &self,
        err: &OrchestratorError,
        new_metadata: &Pubkey,
        new_edition: &Pubkey,
        edition_marker: &Pubkey,
    ) -> bool {
        let OrchestratorError::Remote {
            step: Some(Step::PrintEdition),
            failure: RemoteFailure { code: Some(code), .. },
            ..
        } = err
        else {
            return false;
        };
        match MetadataErrorCode::from_code(*code) {
            Some(MetadataErrorCode::EditionAlreadyMinted) => true,
            Some(MetadataErrorCode::AlreadyInitialized) => {
                let metadata_program = self.deriver().programs().token_metadata;
                for address in [new_metadata, new_edition] {
                    if !matches!(self.ledger.account_owner(address).await, Ok(None)) {
                        return false;
                    }
                }
                matches!(
                    self.ledger.account_owner(edition_marker).await,
                    Ok(Some(owner)) if owner == metadata_program
                )
            }
            _ => false,
        }
    }

    async fn mint_rent(&self, stage: Stage) -> Result<u64> {
        self.ledger
            .minimum_balance_for_rent_exemption(MINT_ACCOUNT_LEN)
            .await
            .map_err(|failure| OrchestratorError::remote(stage, None, failure))
    }

    /// Submit one bundle and advance the workflow
    async fn run_stage(
        &self,
        workflow: &mut Workflow,
        logger: &WorkflowLogger,
        stage: Stage,
        plan: &InstructionPlan,
        payer: &Pubkey,
        signers: &[&Keypair],
    ) -> Result<Signature> {
        workflow.begin(stage)?;
        logger.log_bundle_submit(stage, plan.len());
        if let Some(m) = metrics() {
            m.bundles_submitted.with_label_values(&[stage.as_str()]).inc();
        }

        let timer = Timer::new();
        let outcome = self
            .ledger
            .submit_bundle(&plan.instructions, payer, signers)
            .await;
        if let Some(m) = metrics() {
            timer.observe_duration(&m.bundle_latency);
        }

        match outcome {
            Ok(signature) => {
                workflow.confirm(stage, signature, plan.len())?;
                logger.log_bundle_confirmed(stage, &signature.to_string(), timer.elapsed_ms());
                if let Some(m) = metrics() {
                    m.bundles_confirmed.with_label_values(&[stage.as_str()]).inc();
                }
                Ok(signature)
            }
            Err(failure) => {
                // a lone instruction is the only thing that can have failed
                let step = match failure.instruction_index {
                    Some(index) => plan.step_at(index as usize),
                    None if plan.len() == 1 => plan.step_at(0),
                    None => None,
                };
                if failure.timed_out {
                    logger.log_bundle_timed_out(stage, timer.elapsed_ms());
                }
                let err = OrchestratorError::remote(stage, step, failure);
                workflow.fail(stage, err.to_string())?;
                logger.log_bundle_failed(stage, step, &err.to_string(), timer.elapsed_ms());
                if let Some(m) = metrics() {
                    m.bundles_failed
                        .with_label_values(&[stage.as_str(), err.category()])
                        .inc();
                }
                Err(err)
            }
        }
    }

    fn halt(
        &self,
        workflow: &Workflow,
        logger: &WorkflowLogger,
        err: OrchestratorError,
    ) -> OrchestratorError {
        let err = workflow.halt(err);
        if let Some(progress) = err.progress() {
            logger.log_workflow_incomplete(progress.receipts.len(), &err.to_string());
            if let Some(m) = metrics() {
                m.workflows_incomplete
                    .with_label_values(&[workflow.kind().as_str()])
                    .inc();
            }
        } else {
            logger.warn(&err.to_string());
        }
        err
    }

    fn complete(&self, workflow: &Workflow, logger: &WorkflowLogger) {
        logger.log_workflow_complete(&workflow.progress().mint.to_string());
        if let Some(m) = metrics() {
            m.workflows_completed
                .with_label_values(&[workflow.kind().as_str()])
                .inc();
        }
    }
}

/// Keeps the in-flight gauge honest across early returns
struct InFlight;

impl InFlight {
    fn start() -> Self {
        if let Some(m) = metrics() {
            m.workflows_in_flight.inc();
        }
        Self
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if let Some(m) = metrics() {
            m.workflows_in_flight.dec();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::SimulatedLedger;

    fn setup() -> (Arc<SimulatedLedger>, Sequencer<SimulatedLedger>, Keypair) {
        let authority = Keypair::new();
        let ledger = Arc::new(SimulatedLedger::new());
        ledger.airdrop(&authority.pubkey(), 10_000_000_000);
        let sequencer = Sequencer::new(
            ledger.clone(),
            InstructionBuilder::default(),
            Arc::new(EditionLedger::new(None)),
        );
        (ledger, sequencer, authority)
    }

    fn args() -> MetadataArgs {
        MetadataArgs::new("Forge Original", "FRG", "https://example.com/original.json")
    }

    #[tokio::test]
    async fn test_mint_original_two_bundles() {
        let (ledger, sequencer, authority) = setup();
        let mint = Keypair::new();

        let original = sequencer
            .mint_original(&authority, &mint, &args())
            .await
            .expect("Should mint original");

        assert_eq!(
            original.progress.confirmed_stages(),
            vec![Stage::MintAndSupply, Stage::MetadataAndEdition]
        );
        assert_eq!(original.progress.receipts[0].instruction_count, 4);
        assert_eq!(original.progress.receipts[1].instruction_count, 2);
        assert_eq!(ledger.token_balance(&original.token_account), Some(1));
        assert!(sequencer.editions().is_known(&original.mint));
    }

    #[tokio::test]
    async fn test_invalid_name_never_submits() {
        let (ledger, sequencer, authority) = setup();
        let bad = MetadataArgs::new("n".repeat(33), "FRG", "https://example.com");

        let err = sequencer
            .mint_original(&authority, &Keypair::new(), &bad)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation { field: "name", .. }));
        assert_eq!(ledger.bundles_committed(), 0);
    }

    #[tokio::test]
    async fn test_metadata_failure_is_incomplete() {
        let (ledger, sequencer, authority) = setup();
        let mint = Keypair::new();
        ledger.fail_next_bundle_at(
            Step::CreateMetadata,
            RemoteFailure::custom(0, 6001, "rejected"),
        );

        let err = sequencer
            .mint_original(&authority, &mint, &args())
            .await
            .unwrap_err();

        let progress = err.progress().expect("Should report partial state");
        assert_eq!(progress.confirmed_stages(), vec![Stage::MintAndSupply]);
        assert_eq!(progress.failed_stage, Some(Stage::MetadataAndEdition));
        assert_eq!(progress.mint, mint.pubkey());
        assert_eq!(err.remote_kind(), Some(RemoteErrorKind::MetadataCreateFailed));
        assert!(!sequencer.editions().is_known(&mint.pubkey()));
    }

    #[tokio::test]
    async fn test_print_and_collision() {
        let (ledger, sequencer, authority) = setup();
        let original = sequencer
            .mint_original(&authority, &Keypair::new(), &args())
            .await
            .unwrap();
        let master = MasterRef::from(&original);

        let print = sequencer
            .print_edition(&authority, &master, &Keypair::new(), None)
            .await
            .expect("Should print edition 1");
        assert_eq!(print.edition, 1);
        assert_eq!(ledger.token_balance(&print.token_account), Some(1));
        assert_eq!(ledger.master_edition_supply(&master.master_edition), Some(1));

        let err = sequencer
            .print_edition(&authority, &master, &Keypair::new(), Some(1))
            .await
            .unwrap_err();
        assert!(err.is_collision());
        // rejected locally before any bundle
        assert!(err.progress().is_none());
        assert_eq!(sequencer.editions().print_count(&master.mint), 1);
        assert_eq!(sequencer.editions().next_candidate(&master.mint), 2);
    }

    #[tokio::test]
    async fn test_print_rejects_foreign_metadata_owner() {
        let (ledger, sequencer, authority) = setup();
        let original = sequencer
            .mint_original(&authority, &Keypair::new(), &args())
            .await
            .unwrap();
        let master = MasterRef::from(&original);
        ledger.reassign_owner(&master.metadata, Pubkey::new_unique());
        let committed = ledger.bundles_committed();

        let err = sequencer
            .print_edition(&authority, &master, &Keypair::new(), None)
            .await
            .unwrap_err();
        assert_eq!(err.remote_kind(), Some(RemoteErrorKind::WrongMetadataOwner));
        assert_eq!(ledger.bundles_committed(), committed);
        // reservation released
        assert_eq!(sequencer.editions().next_candidate(&master.mint), 1);
    }

    #[tokio::test]
    async fn test_print_rejects_reused_mint() {
        let (_ledger, sequencer, authority) = setup();
        let mint = Keypair::new();
        let original = sequencer
            .mint_original(&authority, &mint, &args())
            .await
            .unwrap();
        let master = MasterRef::from(&original);

        let err = sequencer
            .print_edition(&authority, &master, &mint, None)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation { field: "new_mint", .. }));
    }
}
