use solana_client::client_error::ClientError;
use thiserror::Error;

/// Ledger RPC error types
#[derive(Debug, Clone, Error)]
pub enum RpcManagerError {
    /// Transport-level errors (network, connection)
    #[error("Transport error: {message} (endpoint: {endpoint})")]
    Transport { endpoint: String, message: String },

    /// Timeout errors
    #[error("Timeout after {timeout_ms}ms (endpoint: {endpoint})")]
    Timeout { endpoint: String, timeout_ms: u64 },

    /// RPC response errors (from the RPC server)
    #[error("RPC response error: {message} (endpoint: {endpoint}, code: {code:?})")]
    RpcResponse {
        endpoint: String,
        message: String,
        code: Option<i64>,
    },

    /// Rate limit exceeded
    #[error("Rate limit exceeded (endpoint: {endpoint})")]
    RateLimitExceeded { endpoint: String },

    #[error("Blockhash not found (endpoint: {endpoint})")]
    BlockhashNotFound { endpoint: String },

    #[error("Transaction expired (endpoint: {endpoint})")]
    TransactionExpired { endpoint: String },

    #[error("Insufficient funds (endpoint: {endpoint})")]
    InsufficientFunds { endpoint: String },

    /// Preflight simulation or on-ledger execution failed
    #[error("Transaction rejected: {message} (endpoint: {endpoint})")]
    TransactionRejected { endpoint: String, message: String },

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RpcManagerError {
    /// Check if this error is retryable
    ///
    /// Expired and blockhash-not-found submissions are retryable only by
    /// rebuilding with a fresh blockhash, which is the caller's decision.
    pub fn is_retryable(&self) -> bool {
        match self {
            RpcManagerError::Transport { .. } => true,
            RpcManagerError::Timeout { .. } => true,
            RpcManagerError::RateLimitExceeded { .. } => true,
            RpcManagerError::BlockhashNotFound { .. } => true,
            RpcManagerError::TransactionExpired { .. } => true,

            RpcManagerError::InsufficientFunds { .. } => false,
            RpcManagerError::TransactionRejected { .. } => false,
            RpcManagerError::Internal(_) => false,

            // Retry on server errors (5xx)
            RpcManagerError::RpcResponse { code, .. } => {
                matches!(code, Some(c) if (500..600).contains(c))
            }
        }
    }

    /// Whether the failure is cured by re-signing against a fresh blockhash
    pub fn needs_fresh_blockhash(&self) -> bool {
        matches!(
            self,
            RpcManagerError::BlockhashNotFound { .. } | RpcManagerError::TransactionExpired { .. }
        )
    }

    /// Whether a failed broadcast may still have reached the leader
    ///
    /// The node answered with a rejection for every other variant. Transport
    /// failures, timeouts and server errors lose the answer, not necessarily
    /// the transaction.
    pub fn may_have_landed(&self) -> bool {
        match self {
            RpcManagerError::Transport { .. } => true,
            RpcManagerError::Timeout { .. } => true,
            RpcManagerError::Internal(_) => true,
            RpcManagerError::RpcResponse { code, .. } => {
                matches!(code, None | Some(500..=599))
            }

            RpcManagerError::RateLimitExceeded { .. }
            | RpcManagerError::BlockhashNotFound { .. }
            | RpcManagerError::TransactionExpired { .. }
            | RpcManagerError::InsufficientFunds { .. }
            | RpcManagerError::TransactionRejected { .. } => false,
        }
    }

    /// Get the endpoint associated with this error, if any
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            RpcManagerError::Transport { endpoint, .. } => Some(endpoint),
            RpcManagerError::Timeout { endpoint, .. } => Some(endpoint),
            RpcManagerError::RpcResponse { endpoint, .. } => Some(endpoint),
            RpcManagerError::RateLimitExceeded { endpoint } => Some(endpoint),
            RpcManagerError::BlockhashNotFound { endpoint } => Some(endpoint),
            RpcManagerError::TransactionExpired { endpoint } => Some(endpoint),
            RpcManagerError::InsufficientFunds { endpoint } => Some(endpoint),
            RpcManagerError::TransactionRejected { endpoint, .. } => Some(endpoint),
            RpcManagerError::Internal(_) => None,
        }
    }

    /// Create from ClientError with context
    pub fn from_client_error(err: ClientError, endpoint: &str) -> Self {
        Self::classify(&err.to_string(), endpoint)
    }

    /// Classify an error message from the RPC node
    pub fn classify(message: &str, endpoint: &str) -> Self {
        let err_str = message.to_lowercase();
        let endpoint = endpoint.to_string();

        if err_str.contains("blockhash not found") {
            RpcManagerError::BlockhashNotFound { endpoint }
        } else if err_str.contains("transaction expired")
            || err_str.contains("block height exceeded")
        {
            RpcManagerError::TransactionExpired { endpoint }
        } else if err_str.contains("insufficient funds")
            || err_str.contains("insufficient lamports")
        {
            RpcManagerError::InsufficientFunds { endpoint }
        } else if err_str.contains("rate limit")
            || err_str.contains("too many requests")
            || err_str.contains("429")
        {
            RpcManagerError::RateLimitExceeded { endpoint }
        } else if err_str.contains("timeout") || err_str.contains("timed out") {
            RpcManagerError::Timeout {
                endpoint,
                timeout_ms: 0,
            }
        } else if err_str.contains("simulation failed")
            || err_str.contains("custom program error")
            || err_str.contains("instruction error")
        {
            RpcManagerError::TransactionRejected {
                endpoint,
                message: message.to_string(),
            }
        } else if err_str.contains("error sending request")
            || err_str.contains("connection refused")
            || err_str.contains("dns error")
        {
            RpcManagerError::Transport {
                endpoint,
                message: message.to_string(),
            }
        } else {
            // Extract error code if available
            let code = err_str
                .split("code:")
                .nth(1)
                .and_then(|s| s.split_whitespace().next())
                .and_then(|s| s.trim_end_matches(',').parse::<i64>().ok());

            RpcManagerError::RpcResponse {
                endpoint,
                message: message.to_string(),
                code,
            }
        }
    }
}
