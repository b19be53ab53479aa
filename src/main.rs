//! edition-forge command line
//!
//! Derives addresses, mints originals and prints numbered editions, either
//! against an RPC node or an in-memory ledger.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use solana_sdk::native_token::LAMPORTS_PER_SOL;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use edition_forge::config::Config;
use edition_forge::metrics::metrics;
use edition_forge::rpc::RpcLedger;
use edition_forge::sequencer::{MasterRef, Sequencer};
use edition_forge::simulation::SimulatedLedger;
use edition_forge::tx_builder::{
    InstructionBuilder, LedgerExecutor, MetadataArgs, OrchestratorError,
};
use edition_forge::wallet::{KeyGenerator, RandomKeyGenerator, WalletManager};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "edition-forge.toml", global = true)]
    config: PathBuf,

    /// Operating mode
    #[arg(short, long, value_enum, default_value = "simulation", global = true)]
    mode: Mode,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Write Prometheus metrics in text format to this file on exit
    #[arg(long, global = true)]
    metrics_out: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Simulation,
    Production,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every address derived for a mint
    Derive {
        #[arg(long)]
        mint: String,
        /// Token account owner; defaults to the configured wallet
        #[arg(long)]
        owner: Option<String>,
        /// Also derive the marker account for this print number
        #[arg(long)]
        edition: Option<u64>,
    },
    /// Mint an original with a master edition
    Mint {
        #[arg(long)]
        name: String,
        #[arg(long)]
        symbol: String,
        #[arg(long)]
        uri: String,
    },
    /// Print a numbered copy of a master held by the wallet
    Print {
        #[arg(long)]
        master_mint: String,
        /// Print number; the next free one when omitted
        #[arg(long)]
        edition: Option<u64>,
    },
    /// Mint an original and print copies of it in memory
    Demo {
        #[arg(long, default_value_t = 3)]
        prints: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args.config)?;
    init_logging(args.verbose, &config)?;
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Operating mode: {:?}", args.mode);

    let outcome = run(&args, &config).await;

    if let Some(path) = &args.metrics_out {
        if config.monitoring.enable_metrics {
            write_metrics(path)?;
        }
    }
    outcome
}

async fn run(args: &Args, config: &Config) -> Result<()> {
    match &args.command {
        Command::Derive {
            mint,
            owner,
            edition,
        } => {
            let owner = match owner {
                Some(owner) => parse_pubkey("owner", owner)?,
                None => load_wallet(config, args.mode)?.pubkey(),
            };
            derive_addresses(config, &parse_pubkey("mint", mint)?, &owner, *edition)
        }
        Command::Mint { name, symbol, uri } => {
            let wallet = load_wallet(config, args.mode)?;
            let sequencer = build_sequencer(config, args.mode, &wallet)?;
            let mint = RandomKeyGenerator.generate();
            let args = MetadataArgs::new(name.as_str(), symbol.as_str(), uri.as_str());

            match sequencer.mint_original(wallet.keypair(), &mint, &args).await {
                Ok(original) => {
                    println!("mint            {}", original.mint);
                    println!("token account   {}", original.token_account);
                    println!("metadata        {}", original.metadata);
                    println!("master edition  {}", original.master_edition);
                    for receipt in &original.progress.receipts {
                        println!("{:<16}{}", receipt.stage.as_str(), receipt.signature);
                    }
                    Ok(())
                }
                Err(e) => Err(report_failure(e)),
            }
        }
        Command::Print {
            master_mint,
            edition,
        } => {
            if args.mode == Mode::Simulation {
                warn!(
                    "Simulation state does not persist between runs; use `demo` to print in memory"
                );
            }
            let wallet = load_wallet(config, args.mode)?;
            let sequencer = build_sequencer(config, args.mode, &wallet)?;
            let master = MasterRef::derive(
                sequencer.deriver(),
                &wallet.pubkey(),
                &parse_pubkey("master_mint", master_mint)?,
            )?;
            let new_mint = RandomKeyGenerator.generate();

            match sequencer
                .print_edition(wallet.keypair(), &master, &new_mint, *edition)
                .await
            {
                Ok(print) => {
                    println!("edition         {}", print.edition);
                    println!("mint            {}", print.mint);
                    println!("token account   {}", print.token_account);
                    println!("edition account {}", print.edition_account);
                    println!("marker          {}", print.edition_marker);
                    Ok(())
                }
                Err(e) => Err(report_failure(e)),
            }
        }
        Command::Demo { prints } => {
            if args.mode != Mode::Simulation {
                anyhow::bail!("demo only runs in simulation mode");
            }
            run_demo(config, *prints).await
        }
    }
}

/// Initialize logging subsystem
fn init_logging(verbose: bool, config: &Config) -> Result<()> {
    let default_filter = if verbose {
        "edition_forge=debug,info".to_string()
    } else {
        config.monitoring.log_level.clone()
    };
    let json = config.monitoring.json_logs;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json().with_target(true)))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_target(true)))
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(())
}

/// Load configuration from file with fallback to defaults
fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        Config::load(Some(path))
            .with_context(|| format!("Failed to load config from {}", path.display()))
    } else {
        // logging is not up yet
        eprintln!("Config file '{}' not found, using defaults", path.display());
        Config::load(None)
    }
}

fn load_wallet(config: &Config, mode: Mode) -> Result<WalletManager> {
    let path = config.keypair_path();
    match (WalletManager::from_file(&path), mode) {
        (Ok(wallet), _) => {
            info!("Wallet address: {}", wallet.pubkey());
            Ok(wallet)
        }
        (Err(e), Mode::Simulation) => {
            warn!("Using an ephemeral wallet: {:#}", e);
            Ok(WalletManager::from_keypair(Keypair::new()))
        }
        (Err(e), Mode::Production) => {
            Err(e).with_context(|| format!("Failed to load wallet from {}", path.display()))
        }
    }
}

fn build_sequencer(
    config: &Config,
    mode: Mode,
    wallet: &WalletManager,
) -> Result<Sequencer<dyn LedgerExecutor>> {
    let deriver = config.deriver()?;
    let ledger: Arc<dyn LedgerExecutor> = match mode {
        Mode::Production => {
            info!("Using RPC endpoint {}", config.rpc.url);
            Arc::new(RpcLedger::new(
                config.rpc.url.clone(),
                config.commitment()?,
                config.bundle_timeout(),
            ))
        }
        Mode::Simulation => {
            let ledger = SimulatedLedger::with_deriver(deriver.clone());
            ledger.airdrop(&wallet.pubkey(), 10 * LAMPORTS_PER_SOL);
            Arc::new(ledger)
        }
    };
    Ok(Sequencer::new(
        ledger,
        InstructionBuilder::new(deriver, config.metadata_options()),
        Arc::new(config.edition_ledger()),
    ))
}

fn derive_addresses(
    config: &Config,
    mint: &Pubkey,
    owner: &Pubkey,
    edition: Option<u64>,
) -> Result<()> {
    let deriver = config.deriver()?;
    let metadata = deriver.metadata(mint)?;
    let master_edition = deriver.master_edition(mint)?;
    let token_account = deriver.associated_token(owner, mint)?;

    println!("metadata        {} (bump {})", metadata.address, metadata.bump);
    println!("master edition  {} (bump {})", master_edition.address, master_edition.bump);
    println!("token account   {} (bump {})", token_account.address, token_account.bump);
    if let Some(edition) = edition {
        let scheme = deriver.marker_scheme();
        let marker = deriver.edition_marker(mint, edition)?;
        println!(
            "marker          {} (bump {}, range {}, bit {})",
            marker.address,
            marker.bump,
            scheme.range_index(edition)?,
            scheme.bit_offset(edition)?
        );
    }
    Ok(())
}

async fn run_demo(config: &Config, prints: u64) -> Result<()> {
    let wallet = WalletManager::from_keypair(Keypair::new());
    let ledger = Arc::new(SimulatedLedger::with_deriver(config.deriver()?));
    ledger.airdrop(&wallet.pubkey(), 100 * LAMPORTS_PER_SOL);
    let sequencer = Sequencer::new(
        ledger.clone(),
        InstructionBuilder::new(config.deriver()?, config.metadata_options()),
        Arc::new(config.edition_ledger()),
    );

    let args = MetadataArgs::new("Forge Demo", "FORGE", "https://example.com/forge-demo.json");
    let original = sequencer
        .mint_original(wallet.keypair(), &RandomKeyGenerator.generate(), &args)
        .await
        .map_err(report_failure)?;
    info!(mint = %original.mint, "Original minted");
    let master = MasterRef::from(&original);

    for _ in 0..prints {
        let print = sequencer
            .print_edition(wallet.keypair(), &master, &RandomKeyGenerator.generate(), None)
            .await
            .map_err(report_failure)?;
        println!("edition {:>4}  mint {}", print.edition, print.mint);
    }

    if prints > 0 {
        // asking for a taken number again is refused
        match sequencer
            .print_edition(wallet.keypair(), &master, &RandomKeyGenerator.generate(), Some(1))
            .await
        {
            Err(e) if e.is_collision() => info!("Reprint of edition 1 refused: {}", e),
            Err(e) => return Err(report_failure(e)),
            Ok(print) => warn!(edition = print.edition, "Duplicate print unexpectedly succeeded"),
        }
    }

    println!(
        "master {} printed {} of {} requested (ledger supply {:?})",
        original.mint,
        sequencer.editions().print_count(&original.mint),
        prints,
        ledger.master_edition_supply(&original.master_edition)
    );
    Ok(())
}

/// Log what reached the chain before `err` and hand it back for exit
fn report_failure(err: OrchestratorError) -> anyhow::Error {
    if let Some(progress) = err.progress() {
        error!(
            workflow_id = %progress.workflow_id,
            mint = %progress.mint,
            failed_stage = ?progress.failed_stage,
            "Workflow stopped after partial progress"
        );
        for receipt in &progress.receipts {
            error!(
                stage = %receipt.stage,
                signature = %receipt.signature,
                "Confirmed before failure"
            );
        }
    }
    error!(category = err.category(), "{}", err);
    anyhow::Error::new(err)
}

fn parse_pubkey(field: &str, value: &str) -> Result<Pubkey> {
    Pubkey::from_str(value).with_context(|| format!("Invalid {field} pubkey: {value}"))
}

fn write_metrics(path: &Path) -> Result<()> {
    let Some(m) = metrics() else {
        return Ok(());
    };
    let text = m.export_text()?;
    std::fs::write(path, text)
        .with_context(|| format!("Failed to write metrics to {}", path.display()))?;
    info!("Metrics written to {}", path.display());
    Ok(())
}
