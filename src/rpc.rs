//! # RPC Client
//!
//! A rate-limited, breaker-guarded interface to each chain's JSON-RPC
//! endpoints. Every chain carries an ordered endpoint list; calls walk the
//! list starting from a rotating cursor, skip endpoints whose breaker is
//! open, and fail fast once every endpoint is unavailable. Retries use
//! exponential backoff with jitter, bounded by the caller's cancellation
//! token and a per-call timeout.
//!
//! This module also owns the read-only `eth_call` helpers used by the AMM
//! engine and the approval flow (`getPair`, `getReserves`, `allowance`,
//! `balanceOf`, `decimals`, `symbol`), encoded as 4-byte selectors plus
//! ABI-encoded arguments.

use crate::circuit_breaker::{BreakerState, CircuitBreaker};
use crate::config::{Config, RpcSettings};
use crate::errors::RpcError;
use crate::rate_limiter::{EndpointRateLimiter, global_rate_limiter};
use ethers::abi::{self, ParamType, Token};
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::{transaction::eip2718::TypedTransaction, Address, Bytes, TransactionRequest, U256};
use ethers::utils::id;
use once_cell::sync::Lazy;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Process-wide default for the global request budget, requests per second.
const GLOBAL_RPS_LIMIT: u32 = 100;

static GET_PAIR_SELECTOR: Lazy<[u8; 4]> = Lazy::new(|| selector("getPair(address,address)"));
static GET_RESERVES_SELECTOR: Lazy<[u8; 4]> = Lazy::new(|| selector("getReserves()"));
static ALLOWANCE_SELECTOR: Lazy<[u8; 4]> = Lazy::new(|| selector("allowance(address,address)"));
static BALANCE_OF_SELECTOR: Lazy<[u8; 4]> = Lazy::new(|| selector("balanceOf(address)"));
static DECIMALS_SELECTOR: Lazy<[u8; 4]> = Lazy::new(|| selector("decimals()"));
static SYMBOL_SELECTOR: Lazy<[u8; 4]> = Lazy::new(|| selector("symbol()"));

fn selector(signature: &str) -> [u8; 4] {
    id(signature)
}

/// One RPC endpoint with its own limiter and breaker.
#[derive(Debug)]
struct Endpoint {
    url: String,
    provider: Arc<Provider<Http>>,
    limiter: EndpointRateLimiter,
    breaker: CircuitBreaker,
}

#[derive(Debug)]
struct ChainEndpoints {
    chain_id: u64,
    endpoints: Vec<Arc<Endpoint>>,
    /// Rotates the starting endpoint so load spreads across healthy nodes.
    cursor: AtomicUsize,
}

/// Diagnostic view of one endpoint's health.
#[derive(Debug, Clone)]
pub struct EndpointHealth {
    pub url: String,
    pub breaker_state: BreakerState,
}

/// Multi-endpoint failover client. Cheap to clone via `Arc`.
#[derive(Debug)]
pub struct RpcClient {
    chains: DashMap<u64, Arc<ChainEndpoints>>,
    settings: RpcSettings,
}

impl RpcClient {
    /// Builds endpoint pools for every configured chain. Endpoint URLs were
    /// already validated by `Config::validate`.
    pub fn from_config(config: &Config) -> Result<Self, RpcError> {
        let global = global_rate_limiter(GLOBAL_RPS_LIMIT);
        let chains = DashMap::new();
        for (chain_id, chain) in &config.chains {
            let mut endpoints = Vec::with_capacity(chain.endpoints.len());
            for url in &chain.endpoints {
                let provider = Provider::<Http>::try_from(url.as_str()).map_err(|e| {
                    RpcError::CallFailed {
                        endpoint: url.clone(),
                        message: format!("invalid endpoint URL: {e}"),
                    }
                })?;
                endpoints.push(Arc::new(Endpoint {
                    url: url.clone(),
                    provider: Arc::new(provider),
                    limiter: EndpointRateLimiter::new(
                        url.clone(),
                        chain.rps_limit,
                        Some(chain.max_concurrent),
                        global.clone(),
                    ),
                    breaker: CircuitBreaker::new(
                        url.clone(),
                        config.rpc.failure_threshold,
                        Duration::from_millis(config.rpc.breaker_cooldown_ms),
                    ),
                }));
            }
            chains.insert(
                *chain_id,
                Arc::new(ChainEndpoints {
                    chain_id: *chain_id,
                    endpoints,
                    cursor: AtomicUsize::new(0),
                }),
            );
        }
        Ok(Self {
            chains,
            settings: config.rpc.clone(),
        })
    }

    /// Read-only `eth_call` with failover, retries and cancellation.
    #[instrument(skip(self, data, cancel), fields(chain_id, to = %to))]
    pub async fn eth_call(
        &self,
        chain_id: u64,
        to: Address,
        data: Bytes,
        cancel: &CancellationToken,
    ) -> Result<Bytes, RpcError> {
        let chain = self
            .chains
            .get(&chain_id)
            .map(|entry| entry.clone())
            .ok_or(RpcError::UnknownChain(chain_id))?;

        let tx = TransactionRequest::new().to(to).data(data);
        let typed: TypedTransaction = tx.into();
        let mut last_error: Option<RpcError> = None;

        for attempt in 0..=self.settings.max_retries {
            if cancel.is_cancelled() {
                return Err(RpcError::Cancelled);
            }
            match self.try_endpoints(&chain, &typed, cancel).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    debug!(
                        target: "rpc",
                        chain_id = chain.chain_id,
                        attempt,
                        error = %e,
                        "Endpoint pass failed"
                    );
                    last_error = Some(e);
                }
            }
            if attempt < self.settings.max_retries {
                self.backoff(attempt, cancel).await?;
            }
        }

        Err(last_error.unwrap_or(RpcError::AllEndpointsFailed {
            chain_id,
            count: chain.endpoints.len(),
        }))
    }

    /// One pass over the endpoint list, starting at the rotating cursor.
    async fn try_endpoints(
        &self,
        chain: &ChainEndpoints,
        tx: &TypedTransaction,
        cancel: &CancellationToken,
    ) -> Result<Bytes, RpcError> {
        let count = chain.endpoints.len();
        let start = chain.cursor.fetch_add(1, Ordering::Relaxed) % count;
        let mut last_error: Option<RpcError> = None;

        for offset in 0..count {
            let endpoint = &chain.endpoints[(start + offset) % count];

            if !endpoint.breaker.try_acquire().await {
                last_error = Some(RpcError::CircuitOpen(endpoint.url.clone()));
                continue;
            }

            let _permit = endpoint.limiter.acquire().await;
            let call = endpoint.provider.call(tx, None);
            let outcome = tokio::select! {
                _ = cancel.cancelled() => {
                    // The parent deadline fired mid-call; this endpoint did
                    // not fail, so leave its breaker untouched.
                    return Err(RpcError::Cancelled);
                }
                result = tokio::time::timeout(
                    Duration::from_millis(self.settings.call_timeout_ms),
                    call,
                ) => result,
            };

            match outcome {
                Ok(Ok(bytes)) => {
                    endpoint.breaker.record_success().await;
                    return Ok(bytes);
                }
                Ok(Err(e)) => {
                    endpoint.breaker.record_failure().await;
                    endpoint.limiter.record_failure().await;
                    warn!(target: "rpc", endpoint = %endpoint.url, error = %e, "RPC call failed");
                    last_error = Some(RpcError::CallFailed {
                        endpoint: endpoint.url.clone(),
                        message: e.to_string(),
                    });
                }
                Err(_) => {
                    endpoint.breaker.record_failure().await;
                    endpoint.limiter.record_failure().await;
                    warn!(target: "rpc", endpoint = %endpoint.url, "RPC call timed out");
                    last_error = Some(RpcError::Timeout(self.settings.call_timeout_ms));
                }
            }
        }

        Err(last_error.unwrap_or(RpcError::AllEndpointsFailed {
            chain_id: chain.chain_id,
            count,
        }))
    }

    async fn backoff(&self, attempt: u32, cancel: &CancellationToken) -> Result<(), RpcError> {
        let base = self
            .settings
            .initial_backoff_ms
            .saturating_mul(1u64 << attempt.min(16))
            .min(self.settings.max_backoff_ms);
        let jitter = rand::thread_rng().gen_range(0..=base / 4 + 1);
        let delay = Duration::from_millis(base + jitter);
        tokio::select! {
            _ = cancel.cancelled() => Err(RpcError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    // -------------------------------------------------------------------- //
    //                        Read-only call helpers                         //
    // -------------------------------------------------------------------- //

    /// Factory `getPair(tokenA, tokenB)`. Returns `None` when the factory
    /// reports the zero address (pair does not exist yet).
    pub async fn get_pair(
        &self,
        chain_id: u64,
        factory: Address,
        token_a: Address,
        token_b: Address,
        cancel: &CancellationToken,
    ) -> Result<Option<Address>, RpcError> {
        let data = encode_call(
            *GET_PAIR_SELECTOR,
            &[Token::Address(token_a), Token::Address(token_b)],
        );
        let raw = self.eth_call(chain_id, factory, data, cancel).await?;
        let pair = decode_single_address(&raw)?;
        Ok((!pair.is_zero()).then_some(pair))
    }

    /// Pair `getReserves()` → `(reserve0, reserve1)` in token0/token1 order.
    pub async fn get_reserves(
        &self,
        chain_id: u64,
        pair: Address,
        cancel: &CancellationToken,
    ) -> Result<(U256, U256), RpcError> {
        let data = encode_call(*GET_RESERVES_SELECTOR, &[]);
        let raw = self.eth_call(chain_id, pair, data, cancel).await?;
        let tokens = abi::decode(
            &[
                ParamType::Uint(112),
                ParamType::Uint(112),
                ParamType::Uint(32),
            ],
            &raw,
        )
        .map_err(|e| RpcError::Decode(format!("getReserves: {e}")))?;
        match (tokens.first(), tokens.get(1)) {
            (Some(Token::Uint(r0)), Some(Token::Uint(r1))) => Ok((*r0, *r1)),
            _ => Err(RpcError::Decode("getReserves returned unexpected shape".into())),
        }
    }

    /// ERC-20 `allowance(owner, spender)`.
    pub async fn allowance(
        &self,
        chain_id: u64,
        token: Address,
        owner: Address,
        spender: Address,
        cancel: &CancellationToken,
    ) -> Result<U256, RpcError> {
        let data = encode_call(
            *ALLOWANCE_SELECTOR,
            &[Token::Address(owner), Token::Address(spender)],
        );
        let raw = self.eth_call(chain_id, token, data, cancel).await?;
        decode_single_uint(&raw)
    }

    /// ERC-20 `balanceOf(owner)`.
    pub async fn balance_of(
        &self,
        chain_id: u64,
        token: Address,
        owner: Address,
        cancel: &CancellationToken,
    ) -> Result<U256, RpcError> {
        let data = encode_call(*BALANCE_OF_SELECTOR, &[Token::Address(owner)]);
        let raw = self.eth_call(chain_id, token, data, cancel).await?;
        decode_single_uint(&raw)
    }

    /// ERC-20 `decimals()`.
    pub async fn erc20_decimals(
        &self,
        chain_id: u64,
        token: Address,
        cancel: &CancellationToken,
    ) -> Result<u8, RpcError> {
        let data = encode_call(*DECIMALS_SELECTOR, &[]);
        let raw = self.eth_call(chain_id, token, data, cancel).await?;
        let value = decode_single_uint(&raw)?;
        if value > U256::from(u8::MAX) {
            return Err(RpcError::Decode(format!("decimals {value} out of range")));
        }
        Ok(value.as_u32() as u8)
    }

    /// ERC-20 `symbol()`. Tolerates both string and bytes32 encodings.
    pub async fn erc20_symbol(
        &self,
        chain_id: u64,
        token: Address,
        cancel: &CancellationToken,
    ) -> Result<String, RpcError> {
        let data = encode_call(*SYMBOL_SELECTOR, &[]);
        let raw = self.eth_call(chain_id, token, data, cancel).await?;
        if let Ok(tokens) = abi::decode(&[ParamType::String], &raw) {
            if let Some(Token::String(s)) = tokens.into_iter().next() {
                return Ok(s);
            }
        }
        // Legacy tokens return a right-padded bytes32.
        let trimmed: Vec<u8> = raw.iter().copied().take_while(|b| *b != 0).collect();
        String::from_utf8(trimmed).map_err(|e| RpcError::Decode(format!("symbol: {e}")))
    }

    /// Breaker states for diagnostics.
    pub async fn endpoint_health(&self, chain_id: u64) -> Vec<EndpointHealth> {
        let Some(chain) = self.chains.get(&chain_id).map(|e| e.clone()) else {
            return Vec::new();
        };
        let mut out = Vec::with_capacity(chain.endpoints.len());
        for endpoint in &chain.endpoints {
            out.push(EndpointHealth {
                url: endpoint.url.clone(),
                breaker_state: endpoint.breaker.state().await,
            });
        }
        out
    }

    /// Drops all endpoint pools. Pooled HTTP connections close on drop.
    pub fn close(&self) {
        self.chains.clear();
    }
}

/// 4-byte selector plus ABI-encoded arguments.
pub fn encode_call(selector: [u8; 4], args: &[Token]) -> Bytes {
    let mut data = selector.to_vec();
    data.extend_from_slice(&abi::encode(args));
    Bytes::from(data)
}

fn decode_single_address(raw: &[u8]) -> Result<Address, RpcError> {
    let tokens = abi::decode(&[ParamType::Address], raw)
        .map_err(|e| RpcError::Decode(format!("address: {e}")))?;
    match tokens.into_iter().next() {
        Some(Token::Address(a)) => Ok(a),
        _ => Err(RpcError::Decode("expected a single address word".into())),
    }
}

fn decode_single_uint(raw: &[u8]) -> Result<U256, RpcError> {
    let tokens = abi::decode(&[ParamType::Uint(256)], raw)
        .map_err(|e| RpcError::Decode(format!("uint256: {e}")))?;
    match tokens.into_iter().next() {
        Some(Token::Uint(v)) => Ok(v),
        _ => Err(RpcError::Decode("expected a single uint word".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selectors_match_known_signatures() {
        assert_eq!(hex::encode(*GET_PAIR_SELECTOR), "e6a43905");
        assert_eq!(hex::encode(*GET_RESERVES_SELECTOR), "0902f1ac");
        assert_eq!(hex::encode(*ALLOWANCE_SELECTOR), "dd62ed3e");
        assert_eq!(hex::encode(*BALANCE_OF_SELECTOR), "70a08231");
        assert_eq!(hex::encode(*DECIMALS_SELECTOR), "313ce567");
    }

    #[test]
    fn encode_call_prefixes_selector() {
        let data = encode_call(*BALANCE_OF_SELECTOR, &[Token::Address(Address::repeat_byte(0xaa))]);
        assert_eq!(&data[0..4], BALANCE_OF_SELECTOR.as_slice());
        assert_eq!(data.len(), 4 + 32);
    }

    #[test]
    fn decodes_uint_word() {
        let encoded = abi::encode(&[Token::Uint(U256::from(42u64))]);
        assert_eq!(decode_single_uint(&encoded).unwrap(), U256::from(42u64));
    }
}
