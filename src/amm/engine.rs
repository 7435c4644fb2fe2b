//! # AMM Quote Engine
//!
//! On-chain quoting against constant-product pools: factory pair lookup,
//! reserve fetches and output-amount computation, with layered caching so a
//! burst of identical requests costs one round of RPC calls.
//!
//! Cache policy: pair addresses never change, so positive lookups are cached
//! for the process lifetime; "no pair" results are cached only briefly (a
//! pair can be created at any block). Reserves drift block-to-block and get
//! a short TTL, as does the assembled quote.

use crate::errors::{AmmError, AdapterError};
use crate::rpc::RpcClient;
use crate::types::{FeeSchedule, PairReserves};
use crate::amm::math;
use dashmap::DashMap;
use ethers::types::{Address, U256};
use moka::future::Cache;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// How long a "pair does not exist" answer is trusted before re-asking the
/// factory.
const MISSING_PAIR_TTL: Duration = Duration::from_secs(30);
/// TTL for the assembled quote, matching the reserve TTL.
const QUOTE_TTL: Duration = Duration::from_secs(10);

type PairKey = (u64, Address, Address);

/// A priced constant-product quote plus the pool state it came from.
#[derive(Debug, Clone)]
pub struct AmmQuote {
    pub amount_out: U256,
    pub pair: Address,
    pub reserves: PairReserves,
}

#[derive(Debug)]
pub struct AmmQuoteEngine {
    rpc: Arc<RpcClient>,
    /// Factory contract per chain id.
    factories: HashMap<u64, Address>,
    pair_cache: DashMap<PairKey, Address>,
    missing_pairs: Cache<PairKey, ()>,
    reserves_cache: Cache<(u64, Address), (U256, U256)>,
    quote_cache: Cache<(u64, Address, Address, U256), AmmQuote>,
}

impl AmmQuoteEngine {
    pub fn new(rpc: Arc<RpcClient>, factories: HashMap<u64, Address>, reserve_ttl: Duration) -> Self {
        Self {
            rpc,
            factories,
            pair_cache: DashMap::new(),
            missing_pairs: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(MISSING_PAIR_TTL)
                .build(),
            reserves_cache: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(reserve_ttl)
                .build(),
            quote_cache: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(QUOTE_TTL)
                .build(),
        }
    }

    pub fn supports_chain(&self, chain_id: u64) -> bool {
        self.factories.contains_key(&chain_id)
    }

    pub fn chains(&self) -> Vec<u64> {
        let mut chains: Vec<u64> = self.factories.keys().copied().collect();
        chains.sort_unstable();
        chains
    }

    /// Canonical pair ordering: token0 is the lexicographically smaller
    /// address, exactly as the factory stores it.
    fn ordered(token_a: Address, token_b: Address) -> (Address, Address) {
        if token_a < token_b {
            (token_a, token_b)
        } else {
            (token_b, token_a)
        }
    }

    /// Resolves the pair contract for two tokens via `getPair`, cache-first.
    #[instrument(skip(self, cancel), fields(chain_id))]
    pub async fn pair_address(
        &self,
        chain_id: u64,
        token_a: Address,
        token_b: Address,
        cancel: &CancellationToken,
    ) -> Result<Address, AdapterError> {
        let factory = *self
            .factories
            .get(&chain_id)
            .ok_or(AdapterError::UnsupportedChain(chain_id))?;
        let (token0, token1) = Self::ordered(token_a, token_b);
        let key = (chain_id, token0, token1);

        if let Some(pair) = self.pair_cache.get(&key) {
            return Ok(*pair);
        }
        if self.missing_pairs.get(&key).await.is_some() {
            return Err(AmmError::PairNotFound {
                chain_id,
                token_a: token0,
                token_b: token1,
            }
            .into());
        }

        match self.rpc.get_pair(chain_id, factory, token0, token1, cancel).await? {
            Some(pair) => {
                self.pair_cache.insert(key, pair);
                Ok(pair)
            }
            None => {
                self.missing_pairs.insert(key, ()).await;
                debug!(target: "amm", chain_id, token0 = %token0, token1 = %token1, "Factory reports no pair");
                Err(AmmError::PairNotFound {
                    chain_id,
                    token_a: token0,
                    token_b: token1,
                }
                .into())
            }
        }
    }

    /// Raw `(reserve0, reserve1)` in token0/token1 storage order, TTL-cached.
    pub async fn reserves(
        &self,
        chain_id: u64,
        pair: Address,
        cancel: &CancellationToken,
    ) -> Result<(U256, U256), AdapterError> {
        let key = (chain_id, pair);
        if let Some(cached) = self.reserves_cache.get(&key).await {
            return Ok(cached);
        }
        let fetched = self.rpc.get_reserves(chain_id, pair, cancel).await?;
        self.reserves_cache.insert(key, fetched).await;
        Ok(fetched)
    }

    /// Full quote pipeline: pair lookup → reserves → constant-product output.
    /// `token_in`/`token_out` must already be pool tokens (the adapter
    /// substitutes wrapped native before calling in).
    #[instrument(skip(self, cancel), fields(chain_id, amount_in = %amount_in))]
    pub async fn quote(
        &self,
        chain_id: u64,
        token_in: Address,
        token_out: Address,
        amount_in: U256,
        fee: FeeSchedule,
        cancel: &CancellationToken,
    ) -> Result<AmmQuote, AdapterError> {
        if token_in == token_out {
            return Err(AdapterError::Validation("cannot swap a token for itself".into()));
        }

        let quote_key = (chain_id, token_in, token_out, amount_in);
        if let Some(cached) = self.quote_cache.get(&quote_key).await {
            return Ok(cached);
        }

        let pair = self.pair_address(chain_id, token_in, token_out, cancel).await?;
        let (reserve0, reserve1) = self.reserves(chain_id, pair, cancel).await?;

        let (token0, _) = Self::ordered(token_in, token_out);
        let reserves = PairReserves {
            reserve0,
            reserve1,
            from_is_token0: token_in == token0,
        };
        let (reserve_in, reserve_out) = reserves.oriented();
        let amount_out = math::get_amount_out(amount_in, reserve_in, reserve_out, fee)
            .map_err(AdapterError::from)?;

        let quote = AmmQuote {
            amount_out,
            pair,
            reserves,
        };
        self.quote_cache.insert(quote_key, quote.clone()).await;
        Ok(quote)
    }
}
