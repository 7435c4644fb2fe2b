//! # Centralized Error Handling
//!
//! This module defines the typed, hierarchical error enums for the routing
//! engine. Using a centralized error system keeps the registry's
//! try-next-candidate logic an explicit branch on a result value instead of
//! string matching, and preserves enough context for diagnostics when every
//! candidate has failed.

use ethers::types::Address;
use thiserror::Error;

/// The top-level error type for a routing operation.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Token not found: {0}")]
    TokenNotFound(String),
    #[error("No route available across {} adapter(s)", attempts.len())]
    NoRoute {
        /// Per-adapter failures, retained for logs and metrics only.
        attempts: Vec<(String, AdapterError)>,
    },
    #[error("Routing deadline of {0}ms exceeded")]
    DeadlineExceeded(u64),
    #[error("Approval flow error: {0}")]
    Approval(#[from] ApprovalError),
    #[error("Registry is shut down")]
    Shutdown,
}

/// Errors surfaced by a single protocol adapter. The registry treats these as
/// non-fatal and advances to the next candidate.
#[derive(Error, Debug, Clone)]
pub enum AdapterError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Chain {0} is not supported")]
    UnsupportedChain(u64),
    #[error("Token pair {from}/{to} is not supported")]
    UnsupportedTokenPair { from: String, to: String },
    #[error("Insufficient liquidity")]
    InsufficientLiquidity,
    #[error("Rate limited (limit: {limit:?}, resets in {reset_secs:?}s)")]
    RateLimited {
        limit: Option<u32>,
        reset_secs: Option<u64>,
    },
    #[error("Protocol API error (status {status}): {message}")]
    ProtocolApi { status: u16, message: String },
    #[error("Network error: {0}")]
    Network(String),
    #[error("Failed to build transaction: {0}")]
    BuildTransaction(String),
    #[error("Circuit breaker open for {endpoint}")]
    CircuitOpen { endpoint: String },
    #[error("Operation timed out after {0}ms")]
    Timeout(u64),
}

impl AdapterError {
    /// Whether retrying the *same* adapter could ever succeed. Validation and
    /// unsupported-chain/pair errors mean the request itself is unroutable for
    /// this adapter; the registry moves on and never retries it.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            AdapterError::Validation(_)
                | AdapterError::UnsupportedChain(_)
                | AdapterError::UnsupportedTokenPair { .. }
        )
    }
}

/// Errors from the RPC resilience layer.
#[derive(Error, Debug, Clone)]
pub enum RpcError {
    #[error("Chain {0} has no configured endpoints")]
    UnknownChain(u64),
    #[error("Circuit breaker open for endpoint {0}")]
    CircuitOpen(String),
    #[error("Rate limiter rejected call on {0}")]
    RateLimited(String),
    #[error("RPC call failed on {endpoint}: {message}")]
    CallFailed { endpoint: String, message: String },
    #[error("All {count} endpoint(s) for chain {chain_id} are unavailable")]
    AllEndpointsFailed { chain_id: u64, count: usize },
    #[error("RPC call timed out after {0}ms")]
    Timeout(u64),
    #[error("Call cancelled by caller")]
    Cancelled,
    #[error("Failed to decode RPC response: {0}")]
    Decode(String),
}

impl From<RpcError> for AdapterError {
    fn from(e: RpcError) -> Self {
        match e {
            RpcError::CircuitOpen(endpoint) => AdapterError::CircuitOpen { endpoint },
            RpcError::Timeout(ms) => AdapterError::Timeout(ms),
            RpcError::Cancelled => AdapterError::Timeout(0),
            other => AdapterError::Network(other.to_string()),
        }
    }
}

/// Errors from constant-product math. These are pure-computation failures;
/// no network context is attached.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmmError {
    #[error("Insufficient liquidity")]
    InsufficientLiquidity,
    #[error("Arithmetic overflow in {0}")]
    Overflow(&'static str),
    #[error("Division by zero in {0}")]
    DivisionByZero(&'static str),
    #[error("Amount out {amount_out} exceeds reserve {reserve_out}")]
    ExcessiveOutput { amount_out: String, reserve_out: String },
    #[error("Invalid fee schedule: {numerator}/{denominator}")]
    InvalidFee { numerator: u64, denominator: u64 },
    #[error("No pair found for {token_a}/{token_b} on chain {chain_id}")]
    PairNotFound {
        chain_id: u64,
        token_a: Address,
        token_b: Address,
    },
}

impl From<AmmError> for AdapterError {
    fn from(e: AmmError) -> Self {
        match e {
            AmmError::InsufficientLiquidity | AmmError::ExcessiveOutput { .. } => {
                AdapterError::InsufficientLiquidity
            }
            AmmError::PairNotFound {
                chain_id,
                token_a,
                token_b,
            } => AdapterError::UnsupportedTokenPair {
                from: format!("{token_a:#x}"),
                to: format!("{token_b:#x} (chain {chain_id})"),
            },
            other => AdapterError::Validation(other.to_string()),
        }
    }
}

/// Errors from the approval / Permit2 flow.
#[derive(Error, Debug, Clone)]
pub enum ApprovalError {
    #[error("Allowance check failed: {0}")]
    AllowanceCheck(String),
    #[error("Invalid Permit2 payload: missing {0}")]
    MissingPermitField(&'static str),
    #[error("Invalid Permit2 payload: {0}")]
    InvalidPermit(String),
    #[error("Failed to encode approval calldata: {0}")]
    Encoding(String),
}

impl From<RpcError> for ApprovalError {
    fn from(e: RpcError) -> Self {
        ApprovalError::AllowanceCheck(e.to_string())
    }
}

/// Errors from cross-chain bridge adapters and status polling.
#[derive(Error, Debug, Clone)]
pub enum BridgeError {
    #[error("Bridge route unsupported: {0}")]
    UnsupportedRoute(String),
    #[error("Attestation service error (status {status}): {message}")]
    Attestation { status: u16, message: String },
    #[error("Network error: {0}")]
    Network(String),
    #[error("Invalid bridge handle: {0}")]
    InvalidHandle(String),
}

impl From<BridgeError> for AdapterError {
    fn from(e: BridgeError) -> Self {
        match e {
            BridgeError::UnsupportedRoute(r) => AdapterError::Validation(r),
            BridgeError::Attestation { status, message } => {
                AdapterError::ProtocolApi { status, message }
            }
            BridgeError::Network(m) => AdapterError::Network(m),
            BridgeError::InvalidHandle(m) => AdapterError::Validation(m),
        }
    }
}

/// Errors from configuration loading and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
