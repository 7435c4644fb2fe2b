//! # Protocol Adapters
//!
//! One adapter per external liquidity source. The registry only ever speaks
//! the `ProtocolAdapter` trait; everything protocol-specific (API contracts,
//! fee constants, router addresses) stays inside the implementation.

pub mod aggregator;
pub mod amm;
pub mod bridge;

use crate::errors::AdapterError;
use crate::types::{AdapterKind, Quote, TokenInfo, TransactionStep};
use async_trait::async_trait;
use ethers::types::Address;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use std::fmt;
use tokio_util::sync::CancellationToken;

pub use aggregator::{OneInchAdapter, ZeroExAdapter};
pub use amm::ConstantProductAdapter;
pub use bridge::CctpBridgeAdapter;

/// Everything an adapter needs to price one request. Tokens are already
/// resolved; `amount` is in human units and each adapter converts to base
/// units with the sell token's decimals.
#[derive(Debug, Clone)]
pub struct QuoteContext {
    pub from_token: TokenInfo,
    pub to_token: TokenInfo,
    pub amount: Decimal,
    pub chain_id: u64,
    pub dest_chain_id: Option<u64>,
    pub wallet: Address,
    pub slippage_bps: u32,
    pub cancel: CancellationToken,
}

impl QuoteContext {
    pub fn is_cross_chain(&self) -> bool {
        self.dest_chain_id.map_or(false, |d| d != self.chain_id)
    }
}

/// A single liquidity source: one aggregator API, one AMM deployment, or one
/// bridge protocol.
#[async_trait]
pub trait ProtocolAdapter: Send + Sync + fmt::Debug {
    /// Stable identifier used in config priority lists and quote results.
    fn name(&self) -> &'static str;

    /// Which family this adapter belongs to; drives candidate ordering.
    fn kind(&self) -> AdapterKind;

    fn supported_chains(&self) -> Vec<u64>;

    fn is_supported(&self, chain_id: u64) -> bool {
        self.supported_chains().contains(&chain_id)
    }

    /// Prices the request. Implementations must not have side effects beyond
    /// their own caches; the registry may discard the result.
    async fn get_quote(&self, ctx: &QuoteContext) -> Result<Quote, AdapterError>;

    /// Produces the executable swap/bridge step for a quote this adapter
    /// previously returned. Pure apart from protocol-mandated freshness
    /// (e.g. an AMM deadline of now + 30 minutes); never re-quotes.
    async fn build_transaction(
        &self,
        quote: &Quote,
        chain_id: u64,
    ) -> Result<TransactionStep, AdapterError>;

    /// Releases pooled HTTP/RPC connections. Idempotent.
    async fn close(&self) {}
}

/// Maps an aggregator HTTP response status into the adapter error taxonomy.
/// Shared by every HTTP-backed adapter so the registry sees one vocabulary.
pub(crate) fn map_http_status(
    status: StatusCode,
    body: &str,
    limit: Option<u32>,
    reset_secs: Option<u64>,
) -> AdapterError {
    if status == StatusCode::BAD_REQUEST {
        if body.to_ascii_lowercase().contains("insufficient liquidity") {
            return AdapterError::InsufficientLiquidity;
        }
        return AdapterError::Validation(truncate_body(body));
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return AdapterError::RateLimited { limit, reset_secs };
    }
    if status.is_server_error() {
        return AdapterError::ProtocolApi {
            status: status.as_u16(),
            message: truncate_body(body),
        };
    }
    AdapterError::ProtocolApi {
        status: status.as_u16(),
        message: truncate_body(body),
    }
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 300;
    if body.len() > MAX {
        let truncated: String = body.chars().take(MAX).collect();
        format!("{truncated}…")
    } else {
        body.to_string()
    }
}
