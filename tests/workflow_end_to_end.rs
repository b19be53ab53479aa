//! End-to-end mint and print workflows against the in-memory ledger
//!
//! This test validates:
//! - Original mint, print, and a refused reprint of the same number
//! - Remote collision detection when two engines share one ledger
//! - Partial state reporting when the second bundle fails
//! - Alternative marker schemes and capped supply
//! - Print timeouts and `AlreadyInitialized` failures that leave the number free

use std::sync::Arc;

use edition_forge::edition_ledger::EditionLedger;
use edition_forge::pda::{AddressDeriver, EditionMarkerScheme, ProgramIds};
use edition_forge::sequencer::{MasterRef, Sequencer, Stage};
use edition_forge::simulation::SimulatedLedger;
use edition_forge::tx_builder::{
    InstructionBuilder, MetadataArgs, MetadataOptions, OrchestratorError, RemoteErrorKind,
    RemoteFailure, Step,
};
use solana_sdk::native_token::LAMPORTS_PER_SOL;
use solana_sdk::signature::{Keypair, Signer};

fn funded_ledger(deriver: AddressDeriver, authority: &Keypair) -> Arc<SimulatedLedger> {
    let ledger = Arc::new(SimulatedLedger::with_deriver(deriver));
    ledger.airdrop(&authority.pubkey(), 20 * LAMPORTS_PER_SOL);
    ledger
}

fn sequencer(
    ledger: &Arc<SimulatedLedger>,
    deriver: AddressDeriver,
    options: MetadataOptions,
) -> Sequencer<SimulatedLedger> {
    let editions = Arc::new(EditionLedger::new(options.max_supply));
    Sequencer::new(ledger.clone(), InstructionBuilder::new(deriver, options), editions)
}

fn args() -> MetadataArgs {
    MetadataArgs::new("Forge Original", "FRG", "https://example.com/original.json")
}

#[tokio::test]
async fn test_mint_print_and_refused_reprint() {
    let authority = Keypair::new();
    let deriver = AddressDeriver::default();
    let ledger = funded_ledger(deriver.clone(), &authority);
    let engine = sequencer(&ledger, deriver, MetadataOptions::default());

    let original = engine
        .mint_original(&authority, &Keypair::new(), &args())
        .await
        .expect("Should mint original");
    assert_eq!(ledger.token_balance(&original.token_account), Some(1));
    assert_eq!(ledger.mint_supply(&original.mint), Some(1));
    // the master edition now controls the master mint
    assert_eq!(ledger.mint_authority(&original.mint), Some(original.master_edition));
    assert_eq!(ledger.master_edition_supply(&original.master_edition), Some(0));

    let master = MasterRef::from(&original);
    let print = engine
        .print_edition(&authority, &master, &Keypair::new(), Some(1))
        .await
        .expect("Should print edition 1");
    assert_eq!(print.edition, 1);
    assert_eq!(ledger.token_balance(&print.token_account), Some(1));
    assert_eq!(ledger.edition_number(&print.edition_account), Some(1));
    assert_eq!(
        ledger.metadata_name(&print.metadata).as_deref(),
        Some("Forge Original")
    );
    assert!(ledger.edition_taken(&original.mint, 1));
    assert_eq!(ledger.master_edition_supply(&original.master_edition), Some(1));
    assert_eq!(engine.editions().print_count(&original.mint), 1);
    let committed = ledger.bundles_committed();

    let err = engine
        .print_edition(&authority, &master, &Keypair::new(), Some(1))
        .await
        .unwrap_err();
    assert!(err.is_collision());
    assert_eq!(ledger.bundles_committed(), committed);
    assert_eq!(ledger.master_edition_supply(&original.master_edition), Some(1));
    assert_eq!(engine.editions().print_count(&original.mint), 1);
}

#[tokio::test]
async fn test_remote_collision_between_engines() {
    let authority = Keypair::new();
    let deriver = AddressDeriver::default();
    let ledger = funded_ledger(deriver.clone(), &authority);
    let first = sequencer(&ledger, deriver.clone(), MetadataOptions::default());
    // second engine shares the ledger but not the local numbering
    let second = sequencer(&ledger, deriver, MetadataOptions::default());

    let original = first
        .mint_original(&authority, &Keypair::new(), &args())
        .await
        .unwrap();
    let master = MasterRef::from(&original);
    first
        .print_edition(&authority, &master, &Keypair::new(), None)
        .await
        .unwrap();

    let new_mint = Keypair::new();
    let err = second
        .print_edition(&authority, &master, &new_mint, None)
        .await
        .unwrap_err();

    assert!(err.is_collision());
    assert!(matches!(
        err.root(),
        OrchestratorError::EditionCollision { edition: 1, .. }
    ));
    // the print mint bundle landed before the collision
    let progress = err.progress().expect("Should report orphaned print mint");
    assert_eq!(progress.confirmed_stages(), vec![Stage::PrintMint]);
    assert_eq!(progress.failed_stage, Some(Stage::PrintEdition));
    assert_eq!(progress.mint, new_mint.pubkey());
    assert_eq!(progress.edition, Some(1));
    assert_eq!(ledger.token_balance(&progress.token_account), Some(1));
    assert_eq!(ledger.master_edition_supply(&original.master_edition), Some(1));

    // the taken number is skipped from now on
    assert_eq!(second.editions().next_candidate(&master.mint), 2);
    let retry = second
        .print_edition(&authority, &master, &Keypair::new(), None)
        .await
        .expect("Should print edition 2");
    assert_eq!(retry.edition, 2);
    assert_eq!(ledger.master_edition_supply(&original.master_edition), Some(2));
}

#[tokio::test]
async fn test_master_edition_failure_leaves_orphaned_mint() {
    let authority = Keypair::new();
    let deriver = AddressDeriver::default();
    let ledger = funded_ledger(deriver.clone(), &authority);
    let engine = sequencer(&ledger, deriver, MetadataOptions::default());
    ledger.fail_next_bundle_at(
        Step::CreateMasterEdition,
        RemoteFailure::custom(0, 57, "IncorrectOwner"),
    );

    let mint = Keypair::new();
    let err = engine
        .mint_original(&authority, &mint, &args())
        .await
        .unwrap_err();

    let progress = err.progress().expect("Should carry partial progress");
    assert_eq!(progress.confirmed_stages(), vec![Stage::MintAndSupply]);
    assert!(progress.signature_of(Stage::MintAndSupply).is_some());
    assert_eq!(progress.failed_stage, Some(Stage::MetadataAndEdition));
    assert_eq!(err.remote_kind(), Some(RemoteErrorKind::WrongMasterEditionOwner));
    match err.root() {
        OrchestratorError::Remote { step, .. } => {
            assert_eq!(*step, Some(Step::CreateMasterEdition))
        }
        other => panic!("unexpected root error {other:?}"),
    }

    // the token from bundle 1 exists with nothing attached
    assert_eq!(ledger.token_balance(&progress.token_account), Some(1));
    let metadata = engine.deriver().metadata(&mint.pubkey()).unwrap().address;
    assert_eq!(ledger.metadata_name(&metadata), None);
    assert!(!engine.editions().is_known(&mint.pubkey()));
}

#[tokio::test]
async fn test_first_bundle_failure_is_not_incomplete() {
    let authority = Keypair::new();
    let deriver = AddressDeriver::default();
    let ledger = funded_ledger(deriver.clone(), &authority);
    let engine = sequencer(&ledger, deriver, MetadataOptions::default());
    ledger.fail_next_bundle_at(Step::MintTo, RemoteFailure::custom(0, 4, "owner mismatch"));

    let err = engine
        .mint_original(&authority, &Keypair::new(), &args())
        .await
        .unwrap_err();
    assert!(err.progress().is_none());
    assert_eq!(err.remote_kind(), Some(RemoteErrorKind::MintFailed));
    assert_eq!(ledger.bundles_committed(), 0);
}

#[tokio::test]
async fn test_range_index_scheme_end_to_end() {
    let authority = Keypair::new();
    let deriver = AddressDeriver::new(
        ProgramIds::default(),
        EditionMarkerScheme::RangeIndex { capacity: 2 },
    );
    let ledger = funded_ledger(deriver.clone(), &authority);
    let engine = sequencer(&ledger, deriver.clone(), MetadataOptions::default());

    let original = engine
        .mint_original(&authority, &Keypair::new(), &args())
        .await
        .unwrap();
    let master = MasterRef::from(&original);

    let mut markers = Vec::new();
    for expected in 1..=3 {
        let print = engine
            .print_edition(&authority, &master, &Keypair::new(), None)
            .await
            .unwrap();
        assert_eq!(print.edition, expected);
        markers.push(print.edition_marker);
    }
    // editions 1 and 2 share a marker, 3 starts the next range
    assert_eq!(markers[0], markers[1]);
    assert_ne!(markers[1], markers[2]);
    assert_eq!(
        markers[2],
        deriver.edition_marker(&original.mint, 3).unwrap().address
    );
    assert_eq!(ledger.master_edition_supply(&original.master_edition), Some(3));
}

#[tokio::test]
async fn test_capped_supply_rejects_locally() {
    let authority = Keypair::new();
    let deriver = AddressDeriver::default();
    let ledger = funded_ledger(deriver.clone(), &authority);
    let options = MetadataOptions {
        max_supply: Some(1),
        ..MetadataOptions::default()
    };
    let engine = sequencer(&ledger, deriver, options);

    let original = engine
        .mint_original(&authority, &Keypair::new(), &args())
        .await
        .unwrap();
    let master = MasterRef::from(&original);
    engine
        .print_edition(&authority, &master, &Keypair::new(), None)
        .await
        .unwrap();
    let committed = ledger.bundles_committed();

    let err = engine
        .print_edition(&authority, &master, &Keypair::new(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Validation { field: "edition", .. }));
    assert_eq!(ledger.bundles_committed(), committed);
}

#[tokio::test]
async fn test_print_requires_master_token_holder() {
    let authority = Keypair::new();
    let stranger = Keypair::new();
    let deriver = AddressDeriver::default();
    let ledger = funded_ledger(deriver.clone(), &authority);
    ledger.airdrop(&stranger.pubkey(), LAMPORTS_PER_SOL);
    let engine = sequencer(&ledger, deriver.clone(), MetadataOptions::default());

    let original = engine
        .mint_original(&authority, &Keypair::new(), &args())
        .await
        .unwrap();
    // the stranger's token account for the master mint does not exist
    let master = MasterRef::derive(&deriver, &stranger.pubkey(), &original.mint).unwrap();

    let err = engine
        .print_edition(&stranger, &master, &Keypair::new(), None)
        .await
        .unwrap_err();
    assert!(!err.is_collision());
    match err.root() {
        OrchestratorError::Remote { step, failure, .. } => {
            assert_eq!(*step, Some(Step::PrintEdition));
            assert_eq!(failure.code, Some(57));
        }
        other => panic!("unexpected root error {other:?}"),
    }
    let progress = err.progress().expect("Print mint landed first");
    assert_eq!(progress.confirmed_stages(), vec![Stage::PrintMint]);
    assert_eq!(engine.editions().failed_editions(&original.mint), vec![1]);
}

#[tokio::test]
async fn test_print_timeout_leaves_number_retryable() {
    let authority = Keypair::new();
    let deriver = AddressDeriver::default();
    let ledger = funded_ledger(deriver.clone(), &authority);
    let engine = sequencer(&ledger, deriver, MetadataOptions::default());

    let original = engine
        .mint_original(&authority, &Keypair::new(), &args())
        .await
        .unwrap();
    let master = MasterRef::from(&original);
    ledger.fail_next_bundle_at(
        Step::PrintEdition,
        RemoteFailure::timeout("no confirmation after 60s"),
    );

    let err = engine
        .print_edition(&authority, &master, &Keypair::new(), None)
        .await
        .unwrap_err();

    assert!(!err.is_collision());
    assert_eq!(err.remote_kind(), Some(RemoteErrorKind::PrintFailed));
    match err.root() {
        OrchestratorError::Remote { step, failure, .. } => {
            assert_eq!(*step, Some(Step::PrintEdition));
            assert!(failure.timed_out);
        }
        other => panic!("unexpected root error {other:?}"),
    }
    let progress = err.progress().expect("Print mint landed before the timeout");
    assert_eq!(progress.confirmed_stages(), vec![Stage::PrintMint]);
    assert_eq!(progress.failed_stage, Some(Stage::PrintEdition));
    assert_eq!(progress.edition, Some(1));

    // recorded as failed, not taken
    assert_eq!(engine.editions().failed_editions(&master.mint), vec![1]);
    assert!(!ledger.edition_taken(&master.mint, 1));
    assert_eq!(engine.editions().next_candidate(&master.mint), 2);

    let retry = engine
        .print_edition(&authority, &master, &Keypair::new(), Some(1))
        .await
        .expect("Should retry edition 1 explicitly");
    assert_eq!(retry.edition, 1);
    assert!(engine.editions().failed_editions(&master.mint).is_empty());
    assert!(ledger.edition_taken(&master.mint, 1));
    assert_eq!(ledger.master_edition_supply(&original.master_edition), Some(1));
}

#[tokio::test]
async fn test_existing_print_accounts_are_not_a_collision() {
    let authority = Keypair::new();
    let deriver = AddressDeriver::default();
    let ledger = funded_ledger(deriver.clone(), &authority);
    let engine = sequencer(&ledger, deriver.clone(), MetadataOptions::default());

    let original = engine
        .mint_original(&authority, &Keypair::new(), &args())
        .await
        .unwrap();
    let master = MasterRef::from(&original);

    // something already sits at the new print's metadata address
    let new_mint = Keypair::new();
    let squatted = deriver.metadata(&new_mint.pubkey()).unwrap().address;
    ledger.airdrop(&squatted, 1_000_000);

    let err = engine
        .print_edition(&authority, &master, &new_mint, None)
        .await
        .unwrap_err();

    assert!(!err.is_collision());
    match err.root() {
        OrchestratorError::Remote { step, failure, .. } => {
            assert_eq!(*step, Some(Step::PrintEdition));
            assert_eq!(failure.code, Some(3));
        }
        other => panic!("unexpected root error {other:?}"),
    }
    assert_eq!(engine.editions().failed_editions(&master.mint), vec![1]);
    assert!(!ledger.edition_taken(&master.mint, 1));

    let retry = engine
        .print_edition(&authority, &master, &Keypair::new(), Some(1))
        .await
        .expect("Number 1 was never taken");
    assert_eq!(retry.edition, 1);
}
