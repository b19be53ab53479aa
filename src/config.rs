//! Configuration for the edition-forge engine
//!
//! Loaded from a TOML file, with `.env` support and environment overrides for
//! the endpoint and the keypair path.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;

use crate::edition_ledger::EditionLedger;
use crate::pda::{AddressDeriver, EditionMarkerScheme, ProgramIds};
use crate::tx_builder::MetadataOptions;

/// Overrides `rpc.url`
pub const ENV_RPC_URL: &str = "EDITION_FORGE_RPC_URL";
/// Overrides `wallet.keypair_path`
pub const ENV_KEYPAIR: &str = "EDITION_FORGE_KEYPAIR";

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub rpc: RpcConfig,

    #[serde(default)]
    pub wallet: WalletConfig,

    /// Program ids the engine derives under and builds instructions for
    #[serde(default)]
    pub programs: ProgramsConfig,

    #[serde(default)]
    pub editions: EditionsConfig,

    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_rpc_url")]
    pub url: String,

    /// processed, confirmed or finalized
    #[serde(default = "default_commitment")]
    pub commitment: String,

    /// Upper bound on send plus confirmation of one bundle
    #[serde(default = "default_rpc_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletConfig {
    /// Path to keypair file
    #[serde(default = "default_keypair_path")]
    pub keypair_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramsConfig {
    #[serde(default = "default_token_metadata_program")]
    pub token_metadata: String,

    #[serde(default = "default_token_program")]
    pub token: String,

    #[serde(default = "default_associated_token_program")]
    pub associated_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditionsConfig {
    /// Marker account layout for print numbering
    #[serde(default)]
    pub marker_scheme: EditionMarkerScheme,

    /// Cap on prints per master; unlimited when absent
    #[serde(default)]
    pub max_supply: Option<u64>,

    #[serde(default = "default_true")]
    pub is_mutable: bool,

    #[serde(default)]
    pub seller_fee_basis_points: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    /// Emit logs as JSON lines
    #[serde(default)]
    pub json_logs: bool,

    /// Default filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// Default value functions
fn default_rpc_url() -> String {
    "https://api.devnet.solana.com".to_string()
}

fn default_commitment() -> String {
    "confirmed".to_string()
}

fn default_rpc_timeout() -> u64 {
    60
}

fn default_keypair_path() -> String {
    "~/.config/solana/id.json".to_string()
}

fn default_token_metadata_program() -> String {
    crate::pda::TOKEN_METADATA_PROGRAM_ID.to_string()
}

fn default_token_program() -> String {
    spl_token::id().to_string()
}

fn default_associated_token_program() -> String {
    spl_associated_token_account::id().to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: default_rpc_url(),
            commitment: default_commitment(),
            timeout_secs: default_rpc_timeout(),
        }
    }
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            keypair_path: default_keypair_path(),
        }
    }
}

impl Default for ProgramsConfig {
    fn default() -> Self {
        Self {
            token_metadata: default_token_metadata_program(),
            token: default_token_program(),
            associated_token: default_associated_token_program(),
        }
    }
}

impl Default for EditionsConfig {
    fn default() -> Self {
        Self {
            marker_scheme: EditionMarkerScheme::default(),
            max_supply: None,
            is_mutable: true,
            seller_fee_basis_points: 0,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enable_metrics: true,
            json_logs: false,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Load `path` (or defaults when `None`), apply `.env` and environment
    /// overrides, then validate
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(
            std::env::var(ENV_RPC_URL).ok(),
            std::env::var(ENV_KEYPAIR).ok(),
        );
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides(&mut self, rpc_url: Option<String>, keypair_path: Option<String>) {
        if let Some(url) = rpc_url.filter(|u| !u.trim().is_empty()) {
            self.rpc.url = url;
        }
        if let Some(path) = keypair_path.filter(|p| !p.trim().is_empty()) {
            self.wallet.keypair_path = path;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.rpc.url.starts_with("http://") || self.rpc.url.starts_with("https://")) {
            bail!("rpc.url must be an http(s) URL, got {:?}", self.rpc.url);
        }
        if self.rpc.timeout_secs == 0 {
            bail!("rpc.timeout_secs must be greater than zero");
        }
        self.commitment()?;
        self.program_ids()?;
        self.editions
            .marker_scheme
            .validate()
            .context("Invalid editions.marker_scheme")?;
        if self.editions.max_supply == Some(0) {
            bail!("editions.max_supply must be at least 1 when set");
        }
        if self.editions.seller_fee_basis_points > 10_000 {
            bail!(
                "editions.seller_fee_basis_points must be at most 10000, got {}",
                self.editions.seller_fee_basis_points
            );
        }
        Ok(())
    }

    pub fn commitment(&self) -> anyhow::Result<CommitmentConfig> {
        CommitmentConfig::from_str(&self.rpc.commitment)
            .map_err(|_| anyhow::anyhow!("Unknown rpc.commitment {:?}", self.rpc.commitment))
    }

    pub fn bundle_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc.timeout_secs)
    }

    pub fn program_ids(&self) -> anyhow::Result<ProgramIds> {
        let parse = |field: &str, value: &str| {
            Pubkey::from_str(value).with_context(|| format!("Invalid programs.{field}: {value}"))
        };
        Ok(ProgramIds {
            token_metadata: parse("token_metadata", &self.programs.token_metadata)?,
            token: parse("token", &self.programs.token)?,
            associated_token: parse("associated_token", &self.programs.associated_token)?,
            ..ProgramIds::default()
        })
    }

    pub fn deriver(&self) -> anyhow::Result<AddressDeriver> {
        Ok(AddressDeriver::new(
            self.program_ids()?,
            self.editions.marker_scheme,
        ))
    }

    pub fn metadata_options(&self) -> MetadataOptions {
        MetadataOptions {
            seller_fee_basis_points: self.editions.seller_fee_basis_points,
            is_mutable: self.editions.is_mutable,
            max_supply: self.editions.max_supply,
        }
    }

    pub fn edition_ledger(&self) -> EditionLedger {
        EditionLedger::new(self.editions.max_supply)
    }

    /// Keypair path with a leading `~/` expanded
    pub fn keypair_path(&self) -> PathBuf {
        expand_home(&self.wallet.keypair_path)
    }
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(path),
    }
}
