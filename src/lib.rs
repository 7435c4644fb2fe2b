//! # crossroute
//!
//! Quote and transaction construction for on-chain swaps and bridges. The
//! registry queries competing liquidity protocols through one adapter
//! interface, picks the first usable route, and emits an ordered list of
//! transaction steps for a wallet to sign. It never signs or submits.
//!
//! Layering, leaves first:
//! - [`rpc`]: rate-limited, breaker-guarded multi-endpoint JSON-RPC access
//! - [`amm`]: constant-product math and the cached on-chain quote engine
//! - [`adapters`]: one implementation per aggregator API, AMM or bridge
//! - [`approval`]: allowance checks, approve steps and Permit2 payloads
//! - [`registry`]: candidate selection, sequential fallback, assembly

pub mod adapters;
pub mod amm;
pub mod approval;
pub mod circuit_breaker;
pub mod config;
pub mod errors;
pub mod rate_limiter;
pub mod registry;
pub mod rpc;
pub mod setup;
pub mod tokens;
pub mod types;

pub use adapters::{ProtocolAdapter, QuoteContext};
pub use approval::{ApprovalFlowBuilder, ApprovalState};
pub use config::Config;
pub use errors::{AdapterError, RegistryError};
pub use registry::ProtocolRegistry;
pub use rpc::RpcClient;
pub use setup::{bootstrap, AdapterCredentials, Engine};
pub use tokens::{StaticTokenResolver, TokenResolver};
pub use types::{
    BridgeHandle, BridgeStatus, Quote, QuoteRequest, RoutedQuote, StepKind, TokenInfo,
    TransactionStep,
};
