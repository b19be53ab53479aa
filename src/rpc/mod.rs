//! Production ledger endpoint over JSON-RPC
//!
//! Each bundle becomes one legacy transaction signed against a fresh
//! blockhash, so the runtime commits it atomically.

pub mod errors;

pub use errors::RpcLedgerError;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature};
use solana_sdk::transaction::Transaction;
use tracing::{debug, warn};

use crate::metrics::{metrics, Timer};
use crate::tx_builder::{LedgerExecutor, RemoteFailure};

/// `LedgerExecutor` backed by a Solana RPC node
pub struct RpcLedger {
    client: Arc<RpcClient>,
    endpoint: String,
    commitment: CommitmentConfig,
    /// Upper bound on send plus confirmation of one bundle
    bundle_timeout: Duration,
}

impl RpcLedger {
    pub fn new(
        url: impl Into<String>,
        commitment: CommitmentConfig,
        bundle_timeout: Duration,
    ) -> Self {
        let endpoint = url.into();
        let client = RpcClient::new_with_timeout_and_commitment(
            endpoint.clone(),
            bundle_timeout,
            commitment,
        );
        Self {
            client: Arc::new(client),
            endpoint,
            commitment,
            bundle_timeout,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn client(&self) -> &Arc<RpcClient> {
        &self.client
    }

    fn classify(&self, err: &solana_client::client_error::ClientError) -> RpcLedgerError {
        let classified = RpcLedgerError::from_client_error(err, &self.endpoint);
        debug!(
            endpoint = %self.endpoint,
            category = classified.category(),
            retryable = classified.is_retryable(),
            "RPC call failed: {}",
            err
        );
        classified
    }

    async fn sign(
        &self,
        instructions: &[Instruction],
        payer: &Pubkey,
        signers: &[&Keypair],
    ) -> Result<Transaction, RpcLedgerError> {
        let timer = Timer::new();
        let blockhash = self
            .client
            .get_latest_blockhash()
            .await
            .map_err(|e| self.classify(&e))?;
        if let Some(m) = metrics() {
            timer.observe_duration(&m.rpc_latency);
        }

        let mut transaction = Transaction::new_with_payer(instructions, Some(payer));
        transaction
            .try_sign(signers, blockhash)
            .map_err(|e| RpcLedgerError::Configuration(format!("signing failed: {e}")))?;
        Ok(transaction)
    }
}

#[async_trait]
impl LedgerExecutor for RpcLedger {
    async fn submit_bundle(
        &self,
        instructions: &[Instruction],
        payer: &Pubkey,
        signers: &[&Keypair],
    ) -> Result<Signature, RemoteFailure> {
        let transaction = self.sign(instructions, payer, signers).await?;

        let submitted = tokio::time::timeout(
            self.bundle_timeout,
            self.client.send_and_confirm_transaction(&transaction),
        )
        .await;

        match submitted {
            Ok(Ok(signature)) => Ok(signature),
            Ok(Err(e)) => Err(self.classify(&e).into()),
            Err(_) => {
                warn!(
                    endpoint = %self.endpoint,
                    timeout_ms = self.bundle_timeout.as_millis() as u64,
                    "Bundle confirmation timed out; it may still land"
                );
                Err(RpcLedgerError::Timeout {
                    endpoint: self.endpoint.clone(),
                    timeout_ms: self.bundle_timeout.as_millis() as u64,
                }
                .into())
            }
        }
    }

    async fn minimum_balance_for_rent_exemption(
        &self,
        data_len: usize,
    ) -> Result<u64, RemoteFailure> {
        let timer = Timer::new();
        let lamports = self
            .client
            .get_minimum_balance_for_rent_exemption(data_len)
            .await
            .map_err(|e| RemoteFailure::from(self.classify(&e)))?;
        if let Some(m) = metrics() {
            timer.observe_duration(&m.rpc_latency);
        }
        Ok(lamports)
    }

    async fn account_owner(&self, address: &Pubkey) -> Result<Option<Pubkey>, RemoteFailure> {
        let timer = Timer::new();
        let response = self
            .client
            .get_account_with_commitment(address, self.commitment)
            .await
            .map_err(|e| RemoteFailure::from(self.classify(&e)))?;
        if let Some(m) = metrics() {
            timer.observe_duration(&m.rpc_latency);
        }
        Ok(response.value.map(|account| account.owner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_keeps_endpoint() {
        let ledger = RpcLedger::new(
            "http://127.0.0.1:8899",
            CommitmentConfig::confirmed(),
            Duration::from_secs(30),
        );
        assert_eq!(ledger.endpoint(), "http://127.0.0.1:8899");
        assert_eq!(ledger.client().commitment(), CommitmentConfig::confirmed());
    }
}
