//! On-chain constant-product AMM adapters.
//!
//! These quote directly against factory/pair contracts through the
//! `AmmQuoteEngine` instead of an external API, which makes them the
//! reliability fallback when aggregators are down. Each deployment declares
//! its own fee schedule; Uniswap-style forks differ (0.3%, 0.25%, 0.17%)
//! and none of these constants is shared.

use crate::adapters::{ProtocolAdapter, QuoteContext};
use crate::amm::{math, AmmQuoteEngine};
use crate::errors::AdapterError;
use crate::rpc::{encode_call, RpcClient};
use crate::types::{
    native_token_address, AdapterKind, FeeSchedule, Quote, QuoteMetadata, StepKind, TokenInfo,
    TransactionStep,
};
use async_trait::async_trait;
use chrono::Utc;
use ethers::abi::Token;
use ethers::types::{Address, U256};
use ethers::utils::id;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Uniswap V2 and most mainline forks: 0.3%.
pub const UNISWAP_V2_FEE: FeeSchedule = FeeSchedule::new(997, 1_000);
/// PancakeSwap V2: 0.25%.
pub const PANCAKESWAP_FEE: FeeSchedule = FeeSchedule::new(9_975, 10_000);
/// ApeSwap-lineage forks running a 0.17% LP fee.
pub const APESWAP_FEE: FeeSchedule = FeeSchedule::new(9_983, 10_000);

/// Swap deadline attached at build time.
const DEADLINE_SECS: i64 = 1_800;

static SWAP_ETH_FOR_TOKENS: Lazy<[u8; 4]> =
    Lazy::new(|| id("swapExactETHForTokens(uint256,address[],address,uint256)"));
static SWAP_TOKENS_FOR_ETH: Lazy<[u8; 4]> =
    Lazy::new(|| id("swapExactTokensForETH(uint256,uint256,address[],address,uint256)"));
static SWAP_TOKENS_FOR_TOKENS: Lazy<[u8; 4]> =
    Lazy::new(|| id("swapExactTokensForTokens(uint256,uint256,address[],address,uint256)"));

fn addr(s: &str) -> Address {
    Address::from_str(s).unwrap_or_else(|_| Address::zero())
}

/// Factory and router for one chain.
#[derive(Debug, Clone, Copy)]
pub struct AmmDeployment {
    pub factory: Address,
    pub router: Address,
}

/// A constant-product AMM liquidity source (Uniswap V2 and its forks).
#[derive(Debug)]
pub struct ConstantProductAdapter {
    name: &'static str,
    fee: FeeSchedule,
    slippage_bps: u32,
    engine: AmmQuoteEngine,
    routers: HashMap<u64, Address>,
    wrapped_native: HashMap<u64, Address>,
    rpc: Arc<RpcClient>,
    gas_estimate: u64,
}

impl ConstantProductAdapter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &'static str,
        fee: FeeSchedule,
        slippage_bps: u32,
        deployments: HashMap<u64, AmmDeployment>,
        wrapped_native: HashMap<u64, Address>,
        rpc: Arc<RpcClient>,
        reserve_ttl: Duration,
        gas_estimate: u64,
    ) -> Self {
        let factories = deployments
            .iter()
            .map(|(chain, d)| (*chain, d.factory))
            .collect();
        let routers = deployments
            .iter()
            .map(|(chain, d)| (*chain, d.router))
            .collect();
        Self {
            name,
            fee,
            slippage_bps,
            engine: AmmQuoteEngine::new(rpc.clone(), factories, reserve_ttl),
            routers,
            wrapped_native,
            rpc,
            gas_estimate,
        }
    }

    /// Uniswap V2 on Ethereum mainnet.
    pub fn uniswap_v2(
        rpc: Arc<RpcClient>,
        wrapped_native: HashMap<u64, Address>,
        slippage_bps: u32,
        reserve_ttl: Duration,
    ) -> Self {
        let deployments = HashMap::from([(
            1u64,
            AmmDeployment {
                factory: addr("0x5C69bEe701ef814a2B6a3EDD4B1652CB9cc5aA6f"),
                router: addr("0x7a250d5630B4cF539739dF2C5dAcb4c659F2488D"),
            },
        )]);
        Self::new(
            "uniswap_v2",
            UNISWAP_V2_FEE,
            slippage_bps,
            deployments,
            wrapped_native,
            rpc,
            reserve_ttl,
            150_000,
        )
    }

    /// PancakeSwap V2 on BNB Chain.
    pub fn pancakeswap(
        rpc: Arc<RpcClient>,
        wrapped_native: HashMap<u64, Address>,
        slippage_bps: u32,
        reserve_ttl: Duration,
    ) -> Self {
        let deployments = HashMap::from([(
            56u64,
            AmmDeployment {
                factory: addr("0xcA143Ce32Fe78f1f7019d7d551a6402fC5350c73"),
                router: addr("0x10ED43C718714eb63d5aA57B78B54704E256024E"),
            },
        )]);
        Self::new(
            "pancakeswap",
            PANCAKESWAP_FEE,
            slippage_bps,
            deployments,
            wrapped_native,
            rpc,
            reserve_ttl,
            160_000,
        )
    }

    /// Address used for pair lookup: native sides map to the chain's wrapped
    /// native; the original address is kept for transaction value handling.
    fn pool_address_of(
        &self,
        token: &TokenInfo,
        chain_id: u64,
    ) -> Result<Address, AdapterError> {
        if token.is_native() {
            return self
                .wrapped_native
                .get(&chain_id)
                .copied()
                .ok_or(AdapterError::UnsupportedChain(chain_id));
        }
        token
            .address_on(chain_id)
            .ok_or_else(|| AdapterError::UnsupportedTokenPair {
                from: token.symbol.clone(),
                to: format!("chain {chain_id}"),
            })
    }

    fn router_for(&self, chain_id: u64) -> Result<Address, AdapterError> {
        self.routers
            .get(&chain_id)
            .copied()
            .ok_or(AdapterError::UnsupportedChain(chain_id))
    }
}

#[async_trait]
impl ProtocolAdapter for ConstantProductAdapter {
    fn name(&self) -> &'static str {
        self.name
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::OnChainAmm
    }

    fn supported_chains(&self) -> Vec<u64> {
        self.engine.chains()
    }

    #[instrument(skip(self, ctx), fields(adapter = self.name, chain_id = ctx.chain_id))]
    async fn get_quote(&self, ctx: &QuoteContext) -> Result<Quote, AdapterError> {
        if !self.is_supported(ctx.chain_id) {
            return Err(AdapterError::UnsupportedChain(ctx.chain_id));
        }
        if ctx.is_cross_chain() {
            return Err(AdapterError::Validation(
                "constant-product pools route within a single chain".into(),
            ));
        }

        let pool_in = self.pool_address_of(&ctx.from_token, ctx.chain_id)?;
        let pool_out = self.pool_address_of(&ctx.to_token, ctx.chain_id)?;
        if pool_in == pool_out {
            return Err(AdapterError::Validation(
                "from and to resolve to the same pool token".into(),
            ));
        }
        let amount_in = ctx
            .from_token
            .to_base_units(ctx.amount)
            .map_err(AdapterError::from)?;

        // Price the swap and check the wallet's balance concurrently; the
        // balance read is advisory and must not fail the quote.
        let quote_fut = self.engine.quote(
            ctx.chain_id,
            pool_in,
            pool_out,
            amount_in,
            self.fee,
            &ctx.cancel,
        );
        let balance_fut = async {
            if ctx.from_token.is_native() {
                None
            } else {
                self.rpc
                    .balance_of(ctx.chain_id, pool_in, ctx.wallet, &ctx.cancel)
                    .await
                    .ok()
            }
        };
        let (priced, balance) = tokio::join!(quote_fut, balance_fut);
        let priced = priced?;

        let router = self.router_for(ctx.chain_id)?;
        let sell_token = if ctx.from_token.is_native() {
            native_token_address()
        } else {
            pool_in
        };
        let buy_token = if ctx.to_token.is_native() {
            native_token_address()
        } else {
            pool_out
        };

        debug!(
            target: "amm",
            adapter = self.name,
            pair = %priced.pair,
            amount_out = %priced.amount_out,
            "Priced constant-product swap"
        );

        Ok(Quote {
            success: true,
            protocol: self.name.to_string(),
            chain_id: ctx.chain_id,
            sell_token,
            buy_token,
            sell_amount: amount_in,
            buy_amount: priced.amount_out,
            rate: {
                let sold = ctx.from_token.from_base_units(amount_in);
                let bought = ctx.to_token.from_base_units(priced.amount_out);
                if sold <= 0.0 { 0.0 } else { bought / sold }
            },
            estimated_gas: U256::from(self.gas_estimate),
            // The swap step is produced by build_transaction so the deadline
            // stays fresh.
            steps: Vec::new(),
            metadata: QuoteMetadata {
                allowance_target: (!ctx.from_token.is_native()).then_some(router),
                pair_address: Some(priced.pair),
                recipient: Some(ctx.wallet),
                sufficient_balance: balance.map(|b| b >= amount_in),
                ..QuoteMetadata::default()
            },
        })
    }

    /// Encodes the router call. Function choice follows the native sides:
    /// `swapExactETHForTokens`, `swapExactTokensForETH`, or
    /// `swapExactTokensForTokens`.
    async fn build_transaction(
        &self,
        quote: &Quote,
        chain_id: u64,
    ) -> Result<TransactionStep, AdapterError> {
        let router = self.router_for(chain_id)?;
        let recipient = quote
            .metadata
            .recipient
            .ok_or_else(|| AdapterError::BuildTransaction("quote carries no recipient".into()))?;
        let wrapped = self
            .wrapped_native
            .get(&chain_id)
            .copied()
            .ok_or(AdapterError::UnsupportedChain(chain_id))?;

        let native_in = quote.sell_token == native_token_address();
        let native_out = quote.buy_token == native_token_address();
        let path_in = if native_in { wrapped } else { quote.sell_token };
        let path_out = if native_out { wrapped } else { quote.buy_token };
        let path = Token::Array(vec![Token::Address(path_in), Token::Address(path_out)]);

        let amount_out_min = math::apply_slippage(quote.buy_amount, self.slippage_bps);
        let deadline = U256::from((Utc::now().timestamp() + DEADLINE_SECS) as u64);

        let (selector, args, value) = if native_in {
            (
                *SWAP_ETH_FOR_TOKENS,
                vec![
                    Token::Uint(amount_out_min),
                    path,
                    Token::Address(recipient),
                    Token::Uint(deadline),
                ],
                quote.sell_amount,
            )
        } else if native_out {
            (
                *SWAP_TOKENS_FOR_ETH,
                vec![
                    Token::Uint(quote.sell_amount),
                    Token::Uint(amount_out_min),
                    path,
                    Token::Address(recipient),
                    Token::Uint(deadline),
                ],
                U256::zero(),
            )
        } else {
            (
                *SWAP_TOKENS_FOR_TOKENS,
                vec![
                    Token::Uint(quote.sell_amount),
                    Token::Uint(amount_out_min),
                    path,
                    Token::Address(recipient),
                    Token::Uint(deadline),
                ],
                U256::zero(),
            )
        };

        Ok(TransactionStep {
            to: router,
            data: encode_call(selector, &args),
            value,
            gas_limit: quote.estimated_gas.max(U256::from(self.gas_estimate)),
            chain_id,
            kind: StepKind::Swap,
        })
    }
}
