//! Shared test harness: a scripted JSON-RPC mock server, configurable mock
//! adapters, and config builders.
#![allow(dead_code)]

use async_trait::async_trait;
use crossroute::adapters::{ProtocolAdapter, QuoteContext};
use crossroute::config::{ChainConfig, Config, RegistrySettings, RpcSettings};
use crossroute::errors::AdapterError;
use crossroute::types::{
    AdapterKind, Quote, QuoteMetadata, StepKind, TransactionStep,
};
use ethers::abi::{self, Token};
use ethers::types::{Address, U256};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub fn init_tracing() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "warn".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

// ==================================================================== //
//                        Scripted JSON-RPC server                      //
// ==================================================================== //

/// One scripted reply from the mock RPC server.
#[derive(Debug, Clone)]
pub enum RpcScript {
    /// HTTP 200 with a JSON-RPC result (`"0x…"` hex payload).
    Result(String),
    /// HTTP 200 with a verbatim body (for REST-style aggregator APIs).
    Raw(String),
    /// HTTP 500 with an empty body.
    Http500,
    /// HTTP 400 with the given body.
    Http400(String),
    /// HTTP 429 with rate-limit headers.
    Http429 { retry_after: u64 },
    /// HTTP 200 carrying a JSON-RPC error object.
    RpcError(String),
}

pub struct MockRpc {
    pub url: String,
    pub hits: Arc<AtomicUsize>,
}

/// Spawns a throwaway HTTP server answering JSON-RPC POSTs. Scripted
/// replies are consumed in order; once exhausted, `fallback` answers
/// everything.
pub async fn spawn_mock_rpc(script: Vec<RpcScript>, fallback: RpcScript) -> MockRpc {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock rpc");
    let addr = listener.local_addr().expect("local addr");
    let hits = Arc::new(AtomicUsize::new(0));
    let queue = Arc::new(Mutex::new(VecDeque::from(script)));

    let hits_server = hits.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let queue = queue.clone();
            let fallback = fallback.clone();
            let hits = hits_server.clone();
            tokio::spawn(async move {
                let Some(body) = read_http_request(&mut socket).await else {
                    return;
                };
                hits.fetch_add(1, Ordering::SeqCst);
                let request_id = serde_json::from_slice::<serde_json::Value>(&body)
                    .ok()
                    .and_then(|v| v.get("id").cloned())
                    .unwrap_or(serde_json::Value::from(1));

                let reply = queue
                    .lock()
                    .expect("script lock")
                    .pop_front()
                    .unwrap_or(fallback);
                let response = match reply {
                    RpcScript::Result(hex) => http_ok(&format!(
                        r#"{{"jsonrpc":"2.0","id":{request_id},"result":"{hex}"}}"#
                    )),
                    RpcScript::Raw(body) => http_ok(&body),
                    RpcScript::RpcError(message) => http_ok(&format!(
                        r#"{{"jsonrpc":"2.0","id":{request_id},"error":{{"code":-32000,"message":"{message}"}}}}"#
                    )),
                    RpcScript::Http500 => {
                        "HTTP/1.1 500 Internal Server Error\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                            .to_string()
                    }
                    RpcScript::Http400(body) => format!(
                        "HTTP/1.1 400 Bad Request\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                        body.len()
                    ),
                    RpcScript::Http429 { retry_after } => format!(
                        "HTTP/1.1 429 Too Many Requests\r\nx-ratelimit-limit: 10\r\nretry-after: {retry_after}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                    ),
                };
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    MockRpc {
        url: format!("http://{addr}"),
        hits,
    }
}

/// Spawns a mock RPC server that answers `eth_call` by calldata selector
/// instead of arrival order, for tests whose calls race concurrently.
/// Unmatched selectors get HTTP 500.
pub async fn spawn_selector_rpc(routes: Vec<(&'static str, String)>) -> MockRpc {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock rpc");
    let addr = listener.local_addr().expect("local addr");
    let hits = Arc::new(AtomicUsize::new(0));
    let routes = Arc::new(routes);

    let hits_server = hits.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let routes = routes.clone();
            let hits = hits_server.clone();
            tokio::spawn(async move {
                let Some(body) = read_http_request(&mut socket).await else {
                    return;
                };
                hits.fetch_add(1, Ordering::SeqCst);
                let parsed: Option<serde_json::Value> = serde_json::from_slice(&body).ok();
                let request_id = parsed
                    .as_ref()
                    .and_then(|v| v.get("id").cloned())
                    .unwrap_or(serde_json::Value::from(1));
                let calldata = parsed
                    .as_ref()
                    .and_then(|v| v.get("params"))
                    .and_then(|p| p.get(0))
                    .and_then(|c| c.get("data").or_else(|| c.get("input")))
                    .and_then(|d| d.as_str())
                    .unwrap_or("")
                    .to_lowercase();

                let matched = routes
                    .iter()
                    .find(|(sel, _)| calldata.starts_with(&format!("0x{sel}")))
                    .map(|(_, result)| result.clone());
                let response = match matched {
                    Some(result) => http_ok(&format!(
                        r#"{{"jsonrpc":"2.0","id":{request_id},"result":"{result}"}}"#
                    )),
                    None => {
                        "HTTP/1.1 500 Internal Server Error\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                            .to_string()
                    }
                };
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    MockRpc {
        url: format!("http://{addr}"),
        hits,
    }
}

async fn read_http_request(socket: &mut tokio::net::TcpStream) -> Option<Vec<u8>> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(header_end) = find_header_end(&buf) {
            let headers = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
            let content_length: usize = headers
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(0);
            let body_start = header_end + 4;
            while buf.len() < body_start + content_length {
                let n = socket.read(&mut chunk).await.ok()?;
                if n == 0 {
                    return None;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            return Some(buf[body_start..body_start + content_length].to_vec());
        }
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn http_ok(body: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
        body.len()
    )
}

/// ABI-encodes a single address result word as a hex string.
pub fn hex_address_result(address: Address) -> String {
    format!("0x{}", hex::encode(abi::encode(&[Token::Address(address)])))
}

/// ABI-encodes a single uint256 result word as a hex string.
pub fn hex_uint_result(value: U256) -> String {
    format!("0x{}", hex::encode(abi::encode(&[Token::Uint(value)])))
}

/// ABI-encodes a `getReserves()` reply as a hex string.
pub fn hex_reserves_result(reserve0: U256, reserve1: U256) -> String {
    let encoded = abi::encode(&[
        Token::Uint(reserve0),
        Token::Uint(reserve1),
        Token::Uint(U256::from(1_700_000_000u64)),
    ]);
    format!("0x{}", hex::encode(encoded))
}

// ==================================================================== //
//                             Config builders                          //
// ==================================================================== //

/// One-chain config pointing chain 1 at `endpoints`, with fast test timings.
pub fn test_config(endpoints: Vec<String>) -> Config {
    let mut config = Config::default();
    config.chains.insert(
        1,
        ChainConfig {
            name: "ethereum".into(),
            endpoints,
            wrapped_native: Address::from_low_u64_be(0xc0de),
            rps_limit: 1_000,
            max_concurrent: 16,
        },
    );
    config.rpc = RpcSettings {
        call_timeout_ms: 2_000,
        failure_threshold: 2,
        breaker_cooldown_ms: 100,
        max_retries: 0,
        initial_backoff_ms: 10,
        max_backoff_ms: 50,
        reserve_ttl_ms: 10_000,
    };
    config.registry = RegistrySettings {
        priority: Vec::new(),
        slippage_bps: 500,
        quote_ttl_ms: 10_000,
        deadline_ms: 5_000,
    };
    config
}

// ==================================================================== //
//                             Mock adapters                            //
// ==================================================================== //

/// An adapter with a scripted outcome and a call counter.
#[derive(Debug)]
pub struct MockAdapter {
    name: &'static str,
    kind: AdapterKind,
    chains: Vec<u64>,
    outcome: Result<U256, AdapterError>,
    delay: Option<Duration>,
    pub calls: AtomicUsize,
}

impl MockAdapter {
    pub fn succeeding(name: &'static str, kind: AdapterKind, chains: Vec<u64>, buy: U256) -> Self {
        Self {
            name,
            kind,
            chains,
            outcome: Ok(buy),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(
        name: &'static str,
        kind: AdapterKind,
        chains: Vec<u64>,
        error: AdapterError,
    ) -> Self {
        Self {
            name,
            kind,
            chains,
            outcome: Err(error),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProtocolAdapter for MockAdapter {
    fn name(&self) -> &'static str {
        self.name
    }

    fn kind(&self) -> AdapterKind {
        self.kind
    }

    fn supported_chains(&self) -> Vec<u64> {
        self.chains.clone()
    }

    async fn get_quote(&self, ctx: &QuoteContext) -> Result<Quote, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let buy_amount = self.outcome.clone()?;
        let sell_amount = ctx
            .from_token
            .to_base_units(ctx.amount)
            .map_err(AdapterError::from)?;
        let step_kind = if self.kind == AdapterKind::Bridge {
            StepKind::BurnAndMint
        } else {
            StepKind::Swap
        };
        Ok(Quote {
            success: true,
            protocol: self.name.to_string(),
            chain_id: ctx.chain_id,
            sell_token: ctx
                .from_token
                .address_on(ctx.chain_id)
                .unwrap_or_else(Address::zero),
            buy_token: ctx
                .to_token
                .address_on(ctx.dest_chain_id.unwrap_or(ctx.chain_id))
                .unwrap_or_else(Address::zero),
            sell_amount,
            buy_amount,
            rate: 1.0,
            estimated_gas: U256::from(100_000u64),
            steps: vec![TransactionStep {
                to: Address::from_low_u64_be(ethers::utils::keccak256(self.name)[0] as u64 + 1),
                data: Default::default(),
                value: U256::zero(),
                gas_limit: U256::from(100_000u64),
                chain_id: ctx.chain_id,
                kind: step_kind,
            }],
            metadata: QuoteMetadata {
                recipient: Some(ctx.wallet),
                estimated_time_secs: (self.kind == AdapterKind::Bridge).then_some(600),
                ..QuoteMetadata::default()
            },
        })
    }

    async fn build_transaction(
        &self,
        quote: &Quote,
        chain_id: u64,
    ) -> Result<TransactionStep, AdapterError> {
        quote
            .steps
            .iter()
            .find(|s| s.chain_id == chain_id)
            .cloned()
            .ok_or_else(|| AdapterError::BuildTransaction("no prebuilt step".into()))
    }
}

/// Builds wrapped-native maps for AMM adapter tests.
pub fn wrapped_native_map(chain_id: u64, wrapped: Address) -> HashMap<u64, Address> {
    HashMap::from([(chain_id, wrapped)])
}
