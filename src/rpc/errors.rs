use solana_client::client_error::ClientError;
use solana_sdk::instruction::InstructionError;
use solana_sdk::transaction::TransactionError;
use thiserror::Error;

use crate::tx_builder::RemoteFailure;

/// RPC endpoint error types
#[derive(Debug, Clone, Error)]
pub enum RpcLedgerError {
    /// Transport-level errors (network, connection)
    #[error("Transport error: {message} (endpoint: {endpoint})")]
    Transport { endpoint: String, message: String },

    #[error("Timeout after {timeout_ms}ms (endpoint: {endpoint})")]
    Timeout { endpoint: String, timeout_ms: u64 },

    /// A transaction reached a validator and one of its instructions failed
    #[error("Instruction {index} failed: {error} (endpoint: {endpoint})")]
    InstructionFailed {
        endpoint: String,
        index: u8,
        code: Option<u32>,
        error: String,
    },

    /// Transaction rejected before execution
    #[error("Transaction rejected: {message} (endpoint: {endpoint})")]
    TransactionRejected { endpoint: String, message: String },

    #[error("RPC response error: {message} (endpoint: {endpoint}, code: {code:?})")]
    RpcResponse {
        endpoint: String,
        message: String,
        code: Option<i64>,
    },

    #[error("Blockhash not found (endpoint: {endpoint})")]
    BlockhashNotFound { endpoint: String },

    #[error("Transaction expired (endpoint: {endpoint})")]
    TransactionExpired { endpoint: String },

    #[error("Insufficient funds (endpoint: {endpoint})")]
    InsufficientFunds { endpoint: String },

    #[error("Rate limit exceeded (endpoint: {endpoint})")]
    RateLimitExceeded { endpoint: String },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl RpcLedgerError {
    /// Nothing landed and the same bundle may be resubmitted
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. }
            | Self::RateLimitExceeded { .. }
            | Self::BlockhashNotFound { .. } => true,
            Self::RpcResponse { code, .. } => matches!(code, Some(c) if (500..600).contains(c)),
            // a timed out or expired bundle may still have landed
            Self::Timeout { .. }
            | Self::TransactionExpired { .. }
            | Self::InstructionFailed { .. }
            | Self::TransactionRejected { .. }
            | Self::InsufficientFunds { .. }
            | Self::Configuration(_) => false,
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "transport",
            Self::Timeout { .. } | Self::TransactionExpired { .. } => "timeout",
            Self::InstructionFailed { .. } => "instruction",
            Self::TransactionRejected { .. } | Self::InsufficientFunds { .. } => "rejected",
            Self::RpcResponse { .. } | Self::BlockhashNotFound { .. } => "rpc",
            Self::RateLimitExceeded { .. } => "rate_limit",
            Self::Configuration(_) => "configuration",
        }
    }

    pub fn endpoint(&self) -> Option<&str> {
        match self {
            Self::Transport { endpoint, .. }
            | Self::Timeout { endpoint, .. }
            | Self::InstructionFailed { endpoint, .. }
            | Self::TransactionRejected { endpoint, .. }
            | Self::RpcResponse { endpoint, .. }
            | Self::BlockhashNotFound { endpoint }
            | Self::TransactionExpired { endpoint }
            | Self::InsufficientFunds { endpoint }
            | Self::RateLimitExceeded { endpoint } => Some(endpoint),
            Self::Configuration(_) => None,
        }
    }

    /// Classify a client error, preferring the structured transaction error
    pub fn from_client_error(err: &ClientError, endpoint: &str) -> Self {
        match err.get_transaction_error() {
            Some(tx_err) => Self::from_transaction_error(&tx_err, endpoint),
            None => Self::from_message(&err.to_string(), endpoint),
        }
    }

    pub fn from_transaction_error(err: &TransactionError, endpoint: &str) -> Self {
        let endpoint = endpoint.to_string();
        match err {
            TransactionError::InstructionError(index, InstructionError::Custom(code)) => {
                Self::InstructionFailed {
                    endpoint,
                    index: *index,
                    code: Some(*code),
                    error: err.to_string(),
                }
            }
            TransactionError::InstructionError(index, inner) => Self::InstructionFailed {
                endpoint,
                index: *index,
                code: None,
                error: inner.to_string(),
            },
            TransactionError::BlockhashNotFound => Self::BlockhashNotFound { endpoint },
            TransactionError::InsufficientFundsForFee
            | TransactionError::InsufficientFundsForRent { .. } => {
                Self::InsufficientFunds { endpoint }
            }
            other => Self::TransactionRejected {
                endpoint,
                message: other.to_string(),
            },
        }
    }

    /// Fallback classification on the rendered error text
    pub fn from_message(message: &str, endpoint: &str) -> Self {
        let lowered = message.to_lowercase();
        let endpoint = endpoint.to_string();

        if lowered.contains("blockhash not found") {
            Self::BlockhashNotFound { endpoint }
        } else if lowered.contains("transaction expired")
            || lowered.contains("block height exceeded")
        {
            Self::TransactionExpired { endpoint }
        } else if lowered.contains("insufficient funds")
            || lowered.contains("insufficient lamports")
        {
            Self::InsufficientFunds { endpoint }
        } else if lowered.contains("rate limit")
            || lowered.contains("too many requests")
            || lowered.contains("429")
        {
            Self::RateLimitExceeded { endpoint }
        } else if lowered.contains("timeout") || lowered.contains("timed out") {
            Self::Timeout {
                endpoint,
                timeout_ms: 0,
            }
        } else if lowered.contains("connection") || lowered.contains("dns") {
            Self::Transport {
                endpoint,
                message: message.to_string(),
            }
        } else {
            let code = lowered
                .split("code:")
                .nth(1)
                .and_then(|s| s.split_whitespace().next())
                .and_then(|s| s.trim_end_matches(',').parse::<i64>().ok());
            Self::RpcResponse {
                endpoint,
                message: message.to_string(),
                code,
            }
        }
    }
}

impl From<RpcLedgerError> for RemoteFailure {
    fn from(err: RpcLedgerError) -> Self {
        let message = err.to_string();
        match err {
            RpcLedgerError::InstructionFailed {
                index, code: Some(code), ..
            } => RemoteFailure::custom(index, code, message),
            RpcLedgerError::InstructionFailed { index, .. } => {
                RemoteFailure::at_instruction(index, message)
            }
            RpcLedgerError::Timeout { .. } | RpcLedgerError::TransactionExpired { .. } => {
                RemoteFailure::timeout(message)
            }
            _ => RemoteFailure::new(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_instruction_error_keeps_code_and_index() {
        let tx_err = TransactionError::InstructionError(4, InstructionError::Custom(3));
        let err = RpcLedgerError::from_transaction_error(&tx_err, "http://localhost:8899");

        assert!(matches!(
            err,
            RpcLedgerError::InstructionFailed { index: 4, code: Some(3), .. }
        ));
        assert!(!err.is_retryable());
        assert_eq!(err.category(), "instruction");

        let failure = RemoteFailure::from(err);
        assert_eq!(failure.code, Some(3));
        assert_eq!(failure.instruction_index, Some(4));
        assert!(!failure.timed_out);
    }

    #[test]
    fn test_non_custom_instruction_error() {
        let tx_err =
            TransactionError::InstructionError(1, InstructionError::MissingRequiredSignature);
        let failure = RemoteFailure::from(RpcLedgerError::from_transaction_error(&tx_err, "x"));
        assert_eq!(failure.code, None);
        assert_eq!(failure.instruction_index, Some(1));
    }

    #[test]
    fn test_message_classification() {
        let endpoint = "https://api.devnet.solana.com";
        assert!(matches!(
            RpcLedgerError::from_message("Blockhash not found", endpoint),
            RpcLedgerError::BlockhashNotFound { .. }
        ));
        assert!(matches!(
            RpcLedgerError::from_message(
                "HTTP status client error (429 Too Many Requests)",
                endpoint
            ),
            RpcLedgerError::RateLimitExceeded { .. }
        ));
        assert!(matches!(
            RpcLedgerError::from_message("block height exceeded", endpoint),
            RpcLedgerError::TransactionExpired { .. }
        ));
        match RpcLedgerError::from_message("RPC response error code: -32002 preflight", endpoint) {
            RpcLedgerError::RpcResponse { code, .. } => assert_eq!(code, Some(-32002)),
            other => panic!("unexpected classification {other:?}"),
        }
    }

    #[test]
    fn test_timeouts_become_timed_out_failures() {
        let err = RpcLedgerError::Timeout {
            endpoint: "test".to_string(),
            timeout_ms: 30_000,
        };
        assert!(!err.is_retryable());
        assert_eq!(err.endpoint(), Some("test"));
        assert!(RemoteFailure::from(err).timed_out);
        assert_eq!(RpcLedgerError::Configuration("bad".into()).endpoint(), None);
    }
}
