//! Smoke tests for the edition-forge command line
//!
//! This test validates:
//! - `demo` mints and prints against the in-memory ledger
//! - `mint` reports both bundle signatures in simulation mode
//! - `derive` prints the same addresses the library derives
//! - `demo` refuses to run in production mode

use std::path::Path;
use std::process::{Command, Output};

use edition_forge::pda::AddressDeriver;
use solana_sdk::pubkey::Pubkey;

fn run_cli(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_edition-forge"))
        .current_dir(dir)
        .args(["--config", "missing.toml"])
        .args(args)
        .env("RUST_LOG", "warn")
        .env_remove("EDITION_FORGE_RPC_URL")
        .env_remove("EDITION_FORGE_KEYPAIR")
        .output()
        .expect("Should launch edition-forge")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_demo_prints_in_memory() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_cli(dir.path(), &["demo", "--prints", "2"]);

    assert!(output.status.success(), "demo failed: {output:?}");
    let text = stdout(&output);
    assert!(text.contains("edition    1  mint "));
    assert!(text.contains("edition    2  mint "));
    assert!(text.contains("printed 2 of 2 requested (ledger supply Some(2))"));
}

#[test]
fn test_mint_reports_both_bundles() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_cli(
        dir.path(),
        &["--mode", "simulation", "mint", "--name", "TEST", "--symbol", "TT", "--uri", "SA"],
    );

    assert!(output.status.success(), "mint failed: {output:?}");
    let text = stdout(&output);
    assert!(text.contains("master edition  "));
    assert!(text.contains("mint_and_supply "));
    assert!(text.contains("metadata_and_edition"));
}

#[test]
fn test_derive_matches_library() {
    let dir = tempfile::tempdir().unwrap();
    let mint = Pubkey::new_unique();
    let owner = Pubkey::new_unique();
    let output = run_cli(
        dir.path(),
        &[
            "derive",
            "--mint",
            &mint.to_string(),
            "--owner",
            &owner.to_string(),
            "--edition",
            "249",
        ],
    );

    assert!(output.status.success(), "derive failed: {output:?}");
    let text = stdout(&output);
    let deriver = AddressDeriver::default();
    let metadata = deriver.metadata(&mint).unwrap();
    let marker = deriver.edition_marker(&mint, 249).unwrap();
    assert!(text.contains(&format!(
        "metadata        {} (bump {})",
        metadata.address, metadata.bump
    )));
    assert!(text.contains(&deriver.master_edition(&mint).unwrap().address.to_string()));
    assert!(text.contains(&deriver.associated_token(&owner, &mint).unwrap().address.to_string()));
    assert!(text.contains(&format!(
        "marker          {} (bump {}, range 1, bit 1)",
        marker.address, marker.bump
    )));
}

#[test]
fn test_demo_refused_in_production() {
    let dir = tempfile::tempdir().unwrap();
    let output = run_cli(dir.path(), &["--mode", "production", "demo"]);

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("demo only runs in simulation mode"));
}
