//! Token resolution: symbol or address in, canonical `TokenInfo` out.
//!
//! The static resolver ships a built-in table of majors and falls back to
//! on-chain `decimals()`/`symbol()` reads for unknown ERC-20 addresses.
//! Resolved records are cached for the process lifetime; `TokenInfo` is
//! immutable once created.

use crate::rpc::RpcClient;
use crate::types::{native_token_address, TokenInfo, TokenKind};
use async_trait::async_trait;
use dashmap::DashMap;
use ethers::types::Address;
use eyre::Result;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Maps a token identifier (symbol or `0x`-address) plus chain to a canonical
/// token record.
#[async_trait]
pub trait TokenResolver: Send + Sync + fmt::Debug {
    /// `Ok(None)` means the identifier is well-formed but unknown on this
    /// chain; `Err` means resolution itself failed (e.g. RPC trouble).
    async fn resolve(
        &self,
        identifier: &str,
        chain_id: u64,
        cancel: &CancellationToken,
    ) -> Result<Option<TokenInfo>>;
}

fn addr(s: &str) -> Address {
    Address::from_str(s).unwrap_or_else(|_| Address::zero())
}

/// Built-in table of majors. Addresses are canonical mainnet deployments;
/// decimals are uniform across the listed chains for each entry.
static BUILTIN_TOKENS: Lazy<Vec<TokenInfo>> = Lazy::new(|| {
    vec![
        TokenInfo {
            symbol: "ETH".into(),
            addresses: HashMap::from([
                (1u64, native_token_address()),
                (10, native_token_address()),
                (8453, native_token_address()),
                (42161, native_token_address()),
            ]),
            decimals: 18,
            kind: TokenKind::Native,
            verified: true,
        },
        TokenInfo {
            symbol: "BNB".into(),
            addresses: HashMap::from([(56u64, native_token_address())]),
            decimals: 18,
            kind: TokenKind::Native,
            verified: true,
        },
        TokenInfo {
            symbol: "WETH".into(),
            addresses: HashMap::from([
                (1u64, addr("0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2")),
                (10, addr("0x4200000000000000000000000000000000000006")),
                (8453, addr("0x4200000000000000000000000000000000000006")),
                (42161, addr("0x82aF49447D8a07e3bd95BD0d56f35241523fBab1")),
            ]),
            decimals: 18,
            kind: TokenKind::Erc20,
            verified: true,
        },
        TokenInfo {
            symbol: "WBNB".into(),
            addresses: HashMap::from([(56u64, addr("0xbb4CdB9CBd36B01bD1cBaEF60aF814a3f6F0Ee75"))]),
            decimals: 18,
            kind: TokenKind::Erc20,
            verified: true,
        },
        TokenInfo {
            symbol: "USDC".into(),
            addresses: HashMap::from([
                (1u64, addr("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48")),
                (10, addr("0x0b2C639c533813f4Aa9D7837CAf62653d097Ff85")),
                (8453, addr("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913")),
                (42161, addr("0xaf88d065e77c8cC2239327C5EDb3A432268e5831")),
            ]),
            decimals: 6,
            kind: TokenKind::Erc20,
            verified: true,
        },
        TokenInfo {
            symbol: "USDT".into(),
            addresses: HashMap::from([
                (1u64, addr("0xdAC17F958D2ee523a2206206994597C13D831ec7")),
                (42161, addr("0xFd086bC7CD5C481DCC9C85ebE478A1C0b69FCbb9")),
            ]),
            decimals: 6,
            kind: TokenKind::Erc20,
            verified: true,
        },
        TokenInfo {
            symbol: "DAI".into(),
            addresses: HashMap::from([
                (1u64, addr("0x6B175474E89094C44Da98b954EedeAC495271d0F")),
                (10, addr("0xDA10009cBd5D07dd0CeCc66161FC93D7c9000da1")),
                (42161, addr("0xDA10009cBd5D07dd0CeCc66161FC93D7c9000da1")),
            ]),
            decimals: 18,
            kind: TokenKind::Erc20,
            verified: true,
        },
        TokenInfo {
            symbol: "WBTC".into(),
            addresses: HashMap::from([
                (1u64, addr("0x2260FAC5E5542a773Aa44fBCfeDf7C193bc2C599")),
                (42161, addr("0x2f2a2543B76A4166549F7aaB2e75Bef0aefC5B0f")),
            ]),
            decimals: 8,
            kind: TokenKind::Erc20,
            verified: true,
        },
    ]
});

/// Resolver backed by the built-in table with an on-chain fallback for
/// unknown ERC-20 addresses.
#[derive(Debug)]
pub struct StaticTokenResolver {
    rpc: Arc<RpcClient>,
    /// Process-lifetime cache of on-chain lookups, keyed by (chain, address).
    discovered: DashMap<(u64, Address), TokenInfo>,
}

impl StaticTokenResolver {
    pub fn new(rpc: Arc<RpcClient>) -> Self {
        Self {
            rpc,
            discovered: DashMap::new(),
        }
    }

    fn builtin_by_symbol(symbol: &str, chain_id: u64) -> Option<TokenInfo> {
        BUILTIN_TOKENS
            .iter()
            .find(|t| t.symbol.eq_ignore_ascii_case(symbol) && t.addresses.contains_key(&chain_id))
            .cloned()
    }

    fn builtin_by_address(address: Address, chain_id: u64) -> Option<TokenInfo> {
        BUILTIN_TOKENS
            .iter()
            .find(|t| t.address_on(chain_id) == Some(address))
            .cloned()
    }

    async fn discover_on_chain(
        &self,
        address: Address,
        chain_id: u64,
        cancel: &CancellationToken,
    ) -> Result<Option<TokenInfo>> {
        if let Some(cached) = self.discovered.get(&(chain_id, address)) {
            return Ok(Some(cached.clone()));
        }

        let decimals = match self.rpc.erc20_decimals(chain_id, address, cancel).await {
            Ok(d) => d,
            Err(e) => {
                debug!(target: "tokens", %address, chain_id, error = %e, "decimals() lookup failed");
                return Ok(None);
            }
        };
        let symbol = self
            .rpc
            .erc20_symbol(chain_id, address, cancel)
            .await
            .unwrap_or_else(|_| format!("{address:#x}"));

        let info = TokenInfo {
            symbol,
            addresses: HashMap::from([(chain_id, address)]),
            decimals,
            kind: TokenKind::Erc20,
            verified: false,
        };
        self.discovered.insert((chain_id, address), info.clone());
        Ok(Some(info))
    }
}

#[async_trait]
impl TokenResolver for StaticTokenResolver {
    async fn resolve(
        &self,
        identifier: &str,
        chain_id: u64,
        cancel: &CancellationToken,
    ) -> Result<Option<TokenInfo>> {
        let identifier = identifier.trim();
        if let Ok(address) = Address::from_str(identifier) {
            if address == native_token_address() {
                return Ok(BUILTIN_TOKENS
                    .iter()
                    .find(|t| t.kind == TokenKind::Native && t.addresses.contains_key(&chain_id))
                    .cloned());
            }
            if let Some(builtin) = Self::builtin_by_address(address, chain_id) {
                return Ok(Some(builtin));
            }
            return self.discover_on_chain(address, chain_id, cancel).await;
        }
        Ok(Self::builtin_by_symbol(identifier, chain_id))
    }
}
