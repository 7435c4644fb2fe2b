//! HTTP aggregator adapters.
//!
//! Each adapter wraps one external swap-quote API, maps its response into the
//! unified `Quote`/`TransactionStep` shape verbatim, and surfaces HTTP status
//! codes through the shared error taxonomy. Clients are long-lived pooled
//! connections; a semaphore bounds concurrent requests per provider.

use crate::adapters::{map_http_status, ProtocolAdapter, QuoteContext};
use crate::approval;
use crate::errors::AdapterError;
use crate::types::{
    native_token_address, AdapterKind, Quote, QuoteMetadata, StepKind, TokenInfo, TransactionStep,
};
use async_trait::async_trait;
use ethers::types::{Address, Bytes, U256};
use reqwest::{header::HeaderMap, Client, Response};
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Timeout for aggregator HTTP requests.
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const USER_AGENT: &str = "crossroute/0.1";

fn pooled_client() -> Result<Client, AdapterError> {
    Client::builder()
        .timeout(HTTP_TIMEOUT)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| AdapterError::Network(format!("failed to build HTTP client: {e}")))
}

/// Token address as the aggregator APIs expect it: the `0xeeee…` sentinel for
/// the native asset, the ERC-20 address otherwise.
fn api_token_address(token: &TokenInfo, chain_id: u64) -> Result<Address, AdapterError> {
    if token.is_native() {
        return Ok(native_token_address());
    }
    token
        .address_on(chain_id)
        .ok_or_else(|| AdapterError::UnsupportedTokenPair {
            from: token.symbol.clone(),
            to: format!("chain {chain_id}"),
        })
}

fn parse_rate_limit_headers(headers: &HeaderMap) -> (Option<u32>, Option<u64>) {
    let limit = headers
        .get("x-ratelimit-limit")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok());
    let reset = headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok());
    (limit, reset)
}

/// Reads a response body, mapping transport failures and non-2xx statuses.
async fn read_success_body(response: Response) -> Result<String, AdapterError> {
    let status = response.status();
    let (limit, reset) = parse_rate_limit_headers(response.headers());
    let body = response
        .text()
        .await
        .map_err(|e| AdapterError::Network(format!("failed to read response body: {e}")))?;
    if !status.is_success() {
        return Err(map_http_status(status, &body, limit, reset));
    }
    Ok(body)
}

fn parse_u256_amount(raw: &str, field: &str) -> Result<U256, AdapterError> {
    U256::from_dec_str(raw).map_err(|e| {
        AdapterError::ProtocolApi {
            status: 200,
            message: format!("unparseable {field} {raw:?}: {e}"),
        }
    })
}

fn compute_rate(ctx: &QuoteContext, sell_amount: U256, buy_amount: U256) -> f64 {
    let sold = ctx.from_token.from_base_units(sell_amount);
    let bought = ctx.to_token.from_base_units(buy_amount);
    if sold <= 0.0 {
        0.0
    } else {
        bought / sold
    }
}

/// Finds the prebuilt swap step in a quote this adapter produced earlier.
fn prebuilt_swap_step(quote: &Quote, chain_id: u64) -> Result<TransactionStep, AdapterError> {
    quote
        .steps
        .iter()
        .find(|s| s.kind == StepKind::Swap && s.chain_id == chain_id)
        .cloned()
        .ok_or_else(|| {
            AdapterError::BuildTransaction(format!(
                "quote from {} carries no swap step for chain {chain_id}",
                quote.protocol
            ))
        })
}

// ==================================================================== //
//                              1inch                                   //
// ==================================================================== //

#[derive(Debug, Clone, Deserialize)]
struct OneInchTx {
    to: String,
    data: String,
    value: String,
    #[serde(default)]
    gas: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct OneInchSwapReply {
    #[serde(rename = "dstAmount")]
    dst_amount: String,
    tx: OneInchTx,
}

/// Adapter for the 1inch swap API (v6-style `swap` endpoint returning both
/// the priced amount and a ready-to-sign transaction).
#[derive(Debug)]
pub struct OneInchAdapter {
    client: Client,
    base_url: String,
    api_key: String,
    chains: Vec<u64>,
    rate_guard: Arc<Semaphore>,
}

impl OneInchAdapter {
    pub fn new(api_key: String, chains: Vec<u64>, rps_limit: u32) -> Result<Self, AdapterError> {
        Ok(Self {
            client: pooled_client()?,
            base_url: "https://api.1inch.dev/swap/v6.0".to_string(),
            api_key,
            chains,
            rate_guard: Arc::new(Semaphore::new(rps_limit.max(1) as usize)),
        })
    }

    /// Test seam: point the adapter at a mock server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl ProtocolAdapter for OneInchAdapter {
    fn name(&self) -> &'static str {
        "1inch"
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Aggregator
    }

    fn supported_chains(&self) -> Vec<u64> {
        self.chains.clone()
    }

    #[instrument(skip(self, ctx), fields(chain_id = ctx.chain_id, from = %ctx.from_token.symbol, to = %ctx.to_token.symbol))]
    async fn get_quote(&self, ctx: &QuoteContext) -> Result<Quote, AdapterError> {
        if !self.is_supported(ctx.chain_id) {
            return Err(AdapterError::UnsupportedChain(ctx.chain_id));
        }
        if ctx.is_cross_chain() {
            return Err(AdapterError::Validation(
                "1inch routes within a single chain only".into(),
            ));
        }

        let src = api_token_address(&ctx.from_token, ctx.chain_id)?;
        let dst = api_token_address(&ctx.to_token, ctx.chain_id)?;
        let sell_amount = ctx.from_token.to_base_units(ctx.amount).map_err(AdapterError::from)?;

        let _permit = self
            .rate_guard
            .acquire()
            .await
            .map_err(|_| AdapterError::Network("rate guard semaphore closed".into()))?;

        let url = format!(
            "{}/{}/swap?src={:#x}&dst={:#x}&amount={}&from={:#x}&slippage={}&disableEstimate=true",
            self.base_url,
            ctx.chain_id,
            src,
            dst,
            sell_amount,
            ctx.wallet,
            f64::from(ctx.slippage_bps) / 100.0,
        );

        let request = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send();
        let response = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(AdapterError::Timeout(0)),
            r = request => r.map_err(|e| AdapterError::Network(format!("1inch request failed: {e}")))?,
        };
        let body = read_success_body(response).await?;

        let reply: OneInchSwapReply = serde_json::from_str(&body).map_err(|e| {
            AdapterError::ProtocolApi {
                status: 200,
                message: format!("1inch JSON error: {e}"),
            }
        })?;

        let buy_amount = parse_u256_amount(&reply.dst_amount, "dstAmount")?;
        let router = Address::from_str(&reply.tx.to)
            .map_err(|e| AdapterError::ProtocolApi {
                status: 200,
                message: format!("bad router address {:?}: {e}", reply.tx.to),
            })?;
        let data = Bytes::from_str(&reply.tx.data).map_err(|e| AdapterError::ProtocolApi {
            status: 200,
            message: format!("bad calldata: {e}"),
        })?;
        let value = parse_u256_amount(&reply.tx.value, "tx.value")?;
        let gas = U256::from(reply.tx.gas.unwrap_or(200_000));

        let swap_step = TransactionStep {
            to: router,
            data,
            value,
            gas_limit: gas,
            chain_id: ctx.chain_id,
            kind: StepKind::Swap,
        };

        debug!(target: "aggregator", protocol = "1inch", %buy_amount, "Quote mapped");
        Ok(Quote {
            success: true,
            protocol: self.name().to_string(),
            chain_id: ctx.chain_id,
            sell_token: src,
            buy_token: dst,
            sell_amount,
            buy_amount,
            rate: compute_rate(ctx, sell_amount, buy_amount),
            estimated_gas: gas,
            steps: vec![swap_step],
            metadata: QuoteMetadata {
                // ERC-20 sells must approve the router before the swap.
                allowance_target: (!ctx.from_token.is_native()).then_some(router),
                ..QuoteMetadata::default()
            },
        })
    }

    async fn build_transaction(
        &self,
        quote: &Quote,
        chain_id: u64,
    ) -> Result<TransactionStep, AdapterError> {
        prebuilt_swap_step(quote, chain_id)
    }
}

// ==================================================================== //
//                                0x                                    //
// ==================================================================== //

#[derive(Debug, Clone, Deserialize)]
struct ZeroExTransaction {
    to: String,
    data: String,
    value: String,
    #[serde(default)]
    gas: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ZeroExIssues {
    #[serde(default)]
    allowance: Option<ZeroExAllowanceIssue>,
}

#[derive(Debug, Clone, Deserialize)]
struct ZeroExAllowanceIssue {
    spender: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ZeroExPermit2 {
    eip712: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
struct ZeroExQuoteReply {
    #[serde(rename = "buyAmount")]
    buy_amount: String,
    transaction: ZeroExTransaction,
    #[serde(default)]
    permit2: Option<ZeroExPermit2>,
    #[serde(default)]
    issues: Option<ZeroExIssues>,
}

/// Adapter for the 0x swap API (Permit2 flavor). When the API returns
/// `PermitTransferFrom` typed data, the payload is structurally validated
/// before it ever reaches a wallet; the signature is later spliced into the
/// prebuilt calldata by the approval flow, with no re-quote.
#[derive(Debug)]
pub struct ZeroExAdapter {
    client: Client,
    base_url: String,
    api_key: String,
    chains: Vec<u64>,
    rate_guard: Arc<Semaphore>,
}

impl ZeroExAdapter {
    pub fn new(api_key: String, chains: Vec<u64>, rps_limit: u32) -> Result<Self, AdapterError> {
        Ok(Self {
            client: pooled_client()?,
            base_url: "https://api.0x.org/swap/permit2".to_string(),
            api_key,
            chains,
            rate_guard: Arc::new(Semaphore::new(rps_limit.max(1) as usize)),
        })
    }

    /// Test seam: point the adapter at a mock server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl ProtocolAdapter for ZeroExAdapter {
    fn name(&self) -> &'static str {
        "0x"
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Aggregator
    }

    fn supported_chains(&self) -> Vec<u64> {
        self.chains.clone()
    }

    #[instrument(skip(self, ctx), fields(chain_id = ctx.chain_id, from = %ctx.from_token.symbol, to = %ctx.to_token.symbol))]
    async fn get_quote(&self, ctx: &QuoteContext) -> Result<Quote, AdapterError> {
        if !self.is_supported(ctx.chain_id) {
            return Err(AdapterError::UnsupportedChain(ctx.chain_id));
        }
        if ctx.is_cross_chain() {
            return Err(AdapterError::Validation(
                "0x routes within a single chain only".into(),
            ));
        }

        let sell = api_token_address(&ctx.from_token, ctx.chain_id)?;
        let buy = api_token_address(&ctx.to_token, ctx.chain_id)?;
        let sell_amount = ctx.from_token.to_base_units(ctx.amount).map_err(AdapterError::from)?;

        let _permit = self
            .rate_guard
            .acquire()
            .await
            .map_err(|_| AdapterError::Network("rate guard semaphore closed".into()))?;

        let url = format!(
            "{}/quote?chainId={}&sellToken={:#x}&buyToken={:#x}&sellAmount={}&taker={:#x}",
            self.base_url, ctx.chain_id, sell, buy, sell_amount, ctx.wallet,
        );

        let request = self
            .client
            .get(&url)
            .header("0x-api-key", &self.api_key)
            .header("0x-version", "v2")
            .send();
        let response = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(AdapterError::Timeout(0)),
            r = request => r.map_err(|e| AdapterError::Network(format!("0x request failed: {e}")))?,
        };
        let body = read_success_body(response).await?;

        let reply: ZeroExQuoteReply = serde_json::from_str(&body).map_err(|e| {
            AdapterError::ProtocolApi {
                status: 200,
                message: format!("0x JSON error: {e}"),
            }
        })?;

        let buy_amount = parse_u256_amount(&reply.buy_amount, "buyAmount")?;
        let to = Address::from_str(&reply.transaction.to).map_err(|e| AdapterError::ProtocolApi {
            status: 200,
            message: format!("bad settlement address {:?}: {e}", reply.transaction.to),
        })?;
        let data = Bytes::from_str(&reply.transaction.data).map_err(|e| {
            AdapterError::ProtocolApi {
                status: 200,
                message: format!("bad calldata: {e}"),
            }
        })?;
        let value = parse_u256_amount(&reply.transaction.value, "transaction.value")?;
        let gas = reply
            .transaction
            .gas
            .as_deref()
            .and_then(|g| g.parse::<u64>().ok())
            .map(U256::from)
            .unwrap_or_else(|| U256::from(250_000u64));

        // Validate the Permit2 payload up front: a malformed typed-data blob
        // must fail the quote, not the wallet.
        let permit2 = match reply.permit2 {
            Some(p) => Some(
                approval::validate_permit2(&p.eip712)
                    .map_err(|e| AdapterError::ProtocolApi {
                        status: 200,
                        message: format!("0x returned invalid Permit2 typed data: {e}"),
                    })?,
            ),
            None => None,
        };

        let allowance_target = reply
            .issues
            .and_then(|i| i.allowance)
            .and_then(|a| Address::from_str(&a.spender).ok());
        if allowance_target.is_none() && permit2.is_none() && !ctx.from_token.is_native() {
            warn!(target: "aggregator", protocol = "0x", "reply carries neither allowance target nor permit2");
        }

        let swap_step = TransactionStep {
            to,
            data,
            value,
            gas_limit: gas,
            chain_id: ctx.chain_id,
            kind: StepKind::Swap,
        };

        Ok(Quote {
            success: true,
            protocol: self.name().to_string(),
            chain_id: ctx.chain_id,
            sell_token: sell,
            buy_token: buy,
            sell_amount,
            buy_amount,
            rate: compute_rate(ctx, sell_amount, buy_amount),
            estimated_gas: gas,
            steps: vec![swap_step],
            metadata: QuoteMetadata {
                allowance_target,
                permit2,
                ..QuoteMetadata::default()
            },
        })
    }

    async fn build_transaction(
        &self,
        quote: &Quote,
        chain_id: u64,
    ) -> Result<TransactionStep, AdapterError> {
        prebuilt_swap_step(quote, chain_id)
    }
}
