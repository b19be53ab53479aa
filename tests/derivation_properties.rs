//! Property tests for address derivation and marker addressing

use edition_forge::edition_ledger::EditionMarkBitmap;
use edition_forge::pda::{
    AddressDeriver, EditionMarkerScheme, ProgramIds, EDITION_MARKER_BIT_SIZE,
};
use edition_forge::tx_builder::metadata::{
    CreateMasterEditionArgs, CreateMetadataAccountArgsV3, Creator, DataV2, MetadataInstruction,
};
use edition_forge::tx_builder::{InstructionBuilder, MetadataArgs, Step};
use proptest::prelude::*;
use solana_sdk::instruction::AccountMeta;
use solana_sdk::pubkey::Pubkey;

fn pubkey() -> impl Strategy<Value = Pubkey> {
    any::<[u8; 32]>().prop_map(Pubkey::new_from_array)
}

fn scheme() -> impl Strategy<Value = EditionMarkerScheme> {
    prop_oneof![
        Just(EditionMarkerScheme::TokenMetadata),
        (1u64..=EDITION_MARKER_BIT_SIZE)
            .prop_map(|capacity| EditionMarkerScheme::RangeIndex { capacity }),
    ]
}

proptest! {
    #[test]
    fn prop_derivation_is_deterministic(
        mint in pubkey(),
        owner in pubkey(),
        edition in 1u64..100_000,
    ) {
        let a = AddressDeriver::default();
        let b = AddressDeriver::default();

        prop_assert_eq!(a.metadata(&mint).unwrap(), b.metadata(&mint).unwrap());
        prop_assert_eq!(a.master_edition(&mint).unwrap(), b.master_edition(&mint).unwrap());
        prop_assert_eq!(
            a.associated_token(&owner, &mint).unwrap(),
            b.associated_token(&owner, &mint).unwrap()
        );
        prop_assert_eq!(
            a.edition_marker(&mint, edition).unwrap(),
            b.edition_marker(&mint, edition).unwrap()
        );
    }

    #[test]
    fn prop_metadata_ignores_everything_but_mint_and_program(
        mint in pubkey(),
        token in pubkey(),
        associated_token in pubkey(),
        scheme in scheme(),
    ) {
        let base = AddressDeriver::default();
        let other = AddressDeriver::new(
            ProgramIds { token, associated_token, ..ProgramIds::default() },
            scheme,
        );
        prop_assert_eq!(base.metadata(&mint).unwrap(), other.metadata(&mint).unwrap());
        prop_assert_eq!(base.master_edition(&mint).unwrap(), other.master_edition(&mint).unwrap());
    }

    #[test]
    fn prop_marker_shared_within_range(
        mint in pubkey(),
        scheme in scheme(),
        a in 1u64..5_000,
        b in 1u64..5_000,
    ) {
        let deriver = AddressDeriver::new(ProgramIds::default(), scheme);
        let same_range = scheme.range_index(a).unwrap() == scheme.range_index(b).unwrap();
        let same_marker =
            deriver.edition_marker(&mint, a).unwrap() == deriver.edition_marker(&mint, b).unwrap();
        prop_assert_eq!(same_range, same_marker);

        // distinct editions never share a bit in the same marker
        if same_range && a != b {
            prop_assert_ne!(scheme.bit_offset(a).unwrap(), scheme.bit_offset(b).unwrap());
        }
    }

    #[test]
    fn prop_bitmap_marks_exactly(offsets in proptest::collection::btree_set(0usize..248, 0..64)) {
        let mut bitmap = EditionMarkBitmap::default();
        for offset in &offsets {
            prop_assert!(bitmap.mark(*offset).unwrap());
        }
        prop_assert_eq!(bitmap.taken_count() as usize, offsets.len());
        for offset in 0..248usize {
            prop_assert_eq!(bitmap.is_taken(offset).unwrap(), offsets.contains(&offset));
        }
    }
}

struct OriginalPlan {
    authority: Pubkey,
    mint: Pubkey,
    metadata: Pubkey,
    edition: Pubkey,
    plan: edition_forge::tx_builder::InstructionPlan,
}

/// Plan for a master minted with name "TEST", symbol "TT" and uri "SA"
fn test_original_plan(builder: &InstructionBuilder) -> OriginalPlan {
    let deriver = builder.deriver();
    let authority = Pubkey::new_from_array([7u8; 32]);
    let mint = Pubkey::new_unique();
    let token = deriver.associated_token(&authority, &mint).unwrap().address;
    let metadata = deriver.metadata(&mint).unwrap().address;
    let edition = deriver.master_edition(&mint).unwrap().address;

    let plan = builder
        .build_mint_original(
            &authority,
            &mint,
            &token,
            &metadata,
            &edition,
            &MetadataArgs::new("TEST", "TT", "SA"),
        )
        .unwrap();
    OriginalPlan {
        authority,
        mint,
        metadata,
        edition,
        plan,
    }
}

#[test]
fn test_mint_original_plan_flags() {
    let builder = InstructionBuilder::default();
    let programs = *builder.deriver().programs();
    let OriginalPlan {
        authority,
        mint,
        metadata,
        edition,
        plan,
    } = test_original_plan(&builder);

    assert_eq!(
        plan.steps,
        vec![Step::MintTo, Step::CreateMetadata, Step::CreateMasterEdition]
    );

    assert_eq!(
        plan.instructions[1].accounts,
        vec![
            AccountMeta::new(metadata, false),
            AccountMeta::new_readonly(mint, false),
            // mint authority
            AccountMeta::new_readonly(authority, true),
            // payer
            AccountMeta::new(authority, true),
            // update authority
            AccountMeta::new_readonly(authority, true),
            AccountMeta::new_readonly(programs.system, false),
        ]
    );

    let master = &plan.instructions[2].accounts;
    assert_eq!(
        *master,
        vec![
            AccountMeta::new(edition, false),
            AccountMeta::new(mint, false),
            // update authority
            AccountMeta::new_readonly(authority, true),
            // mint authority
            AccountMeta::new_readonly(authority, true),
            // payer
            AccountMeta::new(authority, true),
            AccountMeta::new(metadata, false),
            AccountMeta::new_readonly(programs.token, false),
            AccountMeta::new_readonly(programs.system, false),
        ]
    );
    for index in [2, 3] {
        assert!(master[index].is_signer, "slot {index} should sign");
        assert!(!master[index].is_writable, "slot {index} should be readonly");
    }
}

#[test]
fn test_mint_original_data_unpacks() {
    let builder = InstructionBuilder::default();
    let OriginalPlan { authority, plan, .. } = test_original_plan(&builder);
    let options = builder.options();

    let metadata = MetadataInstruction::unpack(&plan.instructions[1].data).unwrap();
    assert_eq!(
        metadata,
        MetadataInstruction::CreateMetadataAccountV3(CreateMetadataAccountArgsV3 {
            data: DataV2 {
                name: "TEST".to_string(),
                symbol: "TT".to_string(),
                uri: "SA".to_string(),
                seller_fee_basis_points: options.seller_fee_basis_points,
                creators: Some(vec![Creator::sole(&authority)]),
                collection: None,
                uses: None,
            },
            is_mutable: options.is_mutable,
            collection_details: None,
        })
    );
    assert_eq!(metadata.pack().unwrap(), plan.instructions[1].data);

    let master = MetadataInstruction::unpack(&plan.instructions[2].data).unwrap();
    assert_eq!(
        master,
        MetadataInstruction::CreateMasterEditionV3(CreateMasterEditionArgs {
            max_supply: options.max_supply,
        })
    );
}
