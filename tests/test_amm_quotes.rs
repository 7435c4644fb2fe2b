//! End-to-end constant-product quoting against a scripted chain: pair
//! lookup, reserve fetch, caching, and router calldata construction.

mod common;

use anyhow::Result;
use common::{
    hex_address_result, hex_reserves_result, init_tracing, spawn_mock_rpc, test_config,
    wrapped_native_map, RpcScript,
};
use crossroute::adapters::amm::{AmmDeployment, ConstantProductAdapter, UNISWAP_V2_FEE};
use crossroute::adapters::{ProtocolAdapter, QuoteContext};
use crossroute::amm::{math, AmmQuoteEngine};
use crossroute::errors::AdapterError;
use crossroute::rpc::RpcClient;
use crossroute::types::{native_token_address, StepKind, TokenInfo, TokenKind};
use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, U256};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn e18(n: u64) -> U256 {
    U256::from(n) * U256::exp10(18)
}

fn token_a() -> Address {
    Address::repeat_byte(0x11)
}

fn token_b() -> Address {
    Address::repeat_byte(0x22)
}

fn pair() -> Address {
    Address::repeat_byte(0x33)
}

fn factory() -> Address {
    Address::repeat_byte(0x44)
}

#[tokio::test]
async fn engine_prices_the_worked_example_pool() -> Result<()> {
    init_tracing();
    let server = spawn_mock_rpc(
        vec![
            RpcScript::Result(hex_address_result(pair())),
            RpcScript::Result(hex_reserves_result(e18(1_000_000), e18(500_000))),
        ],
        RpcScript::Http500,
    )
    .await;
    let config = test_config(vec![server.url.clone()]);
    let rpc = Arc::new(RpcClient::from_config(&config)?);
    let engine = AmmQuoteEngine::new(
        rpc,
        HashMap::from([(1u64, factory())]),
        Duration::from_secs(10),
    );
    let cancel = CancellationToken::new();

    // token_a < token_b, so reserves are already oriented for a→b.
    let quote = engine
        .quote(1, token_a(), token_b(), e18(1_000), UNISWAP_V2_FEE, &cancel)
        .await?;
    let expected =
        math::get_amount_out(e18(1_000), e18(1_000_000), e18(500_000), UNISWAP_V2_FEE)?;
    assert_eq!(quote.amount_out, expected);
    assert_eq!(quote.pair, pair());
    assert!(quote.reserves.from_is_token0);
    Ok(())
}

#[tokio::test]
async fn reversed_direction_orients_reserves_by_token_order() -> Result<()> {
    init_tracing();
    let server = spawn_mock_rpc(
        vec![
            RpcScript::Result(hex_address_result(pair())),
            RpcScript::Result(hex_reserves_result(e18(1_000_000), e18(500_000))),
        ],
        RpcScript::Http500,
    )
    .await;
    let config = test_config(vec![server.url.clone()]);
    let rpc = Arc::new(RpcClient::from_config(&config)?);
    let engine = AmmQuoteEngine::new(
        rpc,
        HashMap::from([(1u64, factory())]),
        Duration::from_secs(10),
    );
    let cancel = CancellationToken::new();

    // Selling token_b: reserve_in must be reserve1.
    let quote = engine
        .quote(1, token_b(), token_a(), e18(1_000), UNISWAP_V2_FEE, &cancel)
        .await?;
    let expected =
        math::get_amount_out(e18(1_000), e18(500_000), e18(1_000_000), UNISWAP_V2_FEE)?;
    assert_eq!(quote.amount_out, expected);
    assert!(!quote.reserves.from_is_token0);
    Ok(())
}

#[tokio::test]
async fn repeated_quotes_within_ttl_issue_no_extra_rpc_calls() -> Result<()> {
    init_tracing();
    let server = spawn_mock_rpc(
        vec![
            RpcScript::Result(hex_address_result(pair())),
            RpcScript::Result(hex_reserves_result(e18(1_000_000), e18(500_000))),
        ],
        RpcScript::Http500,
    )
    .await;
    let config = test_config(vec![server.url.clone()]);
    let rpc = Arc::new(RpcClient::from_config(&config)?);
    let engine = AmmQuoteEngine::new(
        rpc,
        HashMap::from([(1u64, factory())]),
        Duration::from_secs(10),
    );
    let cancel = CancellationToken::new();

    let first = engine
        .quote(1, token_a(), token_b(), e18(1_000), UNISWAP_V2_FEE, &cancel)
        .await?;
    assert_eq!(server.hits.load(Ordering::SeqCst), 2);

    // Identical burst request: served from the quote cache.
    let second = engine
        .quote(1, token_a(), token_b(), e18(1_000), UNISWAP_V2_FEE, &cancel)
        .await?;
    assert_eq!(server.hits.load(Ordering::SeqCst), 2);
    assert_eq!(first.amount_out, second.amount_out);

    // New amount: pair and reserves stay cached, no further RPC traffic.
    let third = engine
        .quote(1, token_a(), token_b(), e18(2_000), UNISWAP_V2_FEE, &cancel)
        .await?;
    assert_eq!(server.hits.load(Ordering::SeqCst), 2);
    assert!(third.amount_out > second.amount_out);
    Ok(())
}

#[tokio::test]
async fn missing_pair_maps_to_unsupported_pair() -> Result<()> {
    init_tracing();
    let server = spawn_mock_rpc(
        vec![RpcScript::Result(hex_address_result(Address::zero()))],
        RpcScript::Http500,
    )
    .await;
    let config = test_config(vec![server.url.clone()]);
    let rpc = Arc::new(RpcClient::from_config(&config)?);
    let engine = AmmQuoteEngine::new(
        rpc,
        HashMap::from([(1u64, factory())]),
        Duration::from_secs(10),
    );
    let cancel = CancellationToken::new();

    let err = engine
        .quote(1, token_a(), token_b(), e18(1), UNISWAP_V2_FEE, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, AdapterError::UnsupportedTokenPair { .. }));

    // The negative result is cached: an immediate retry asks no factory.
    let _ = engine
        .quote(1, token_a(), token_b(), e18(1), UNISWAP_V2_FEE, &cancel)
        .await
        .unwrap_err();
    assert_eq!(server.hits.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn zero_reserves_are_insufficient_liquidity() -> Result<()> {
    init_tracing();
    let server = spawn_mock_rpc(
        vec![
            RpcScript::Result(hex_address_result(pair())),
            RpcScript::Result(hex_reserves_result(U256::zero(), e18(500_000))),
        ],
        RpcScript::Http500,
    )
    .await;
    let config = test_config(vec![server.url.clone()]);
    let rpc = Arc::new(RpcClient::from_config(&config)?);
    let engine = AmmQuoteEngine::new(
        rpc,
        HashMap::from([(1u64, factory())]),
        Duration::from_secs(10),
    );
    let cancel = CancellationToken::new();

    let err = engine
        .quote(1, token_a(), token_b(), e18(1), UNISWAP_V2_FEE, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, AdapterError::InsufficientLiquidity));
    Ok(())
}

// ==================================================================== //
//                  Adapter-level quoting and calldata                  //
// ==================================================================== //

fn native_eth() -> TokenInfo {
    TokenInfo {
        symbol: "ETH".into(),
        addresses: HashMap::from([(1u64, native_token_address())]),
        decimals: 18,
        kind: TokenKind::Native,
        verified: true,
    }
}

fn erc20_b() -> TokenInfo {
    TokenInfo {
        symbol: "TKB".into(),
        addresses: HashMap::from([(1u64, token_b())]),
        decimals: 18,
        kind: TokenKind::Erc20,
        verified: true,
    }
}

fn adapter_for(server_url: &str, wrapped: Address) -> Result<ConstantProductAdapter> {
    let config = test_config(vec![server_url.to_string()]);
    let rpc = Arc::new(RpcClient::from_config(&config)?);
    Ok(ConstantProductAdapter::new(
        "uniswap_v2",
        UNISWAP_V2_FEE,
        500,
        HashMap::from([(
            1u64,
            AmmDeployment {
                factory: factory(),
                router: Address::repeat_byte(0x55),
            },
        )]),
        wrapped_native_map(1, wrapped),
        rpc,
        Duration::from_secs(10),
        150_000,
    ))
}

#[tokio::test]
async fn native_sell_builds_swap_exact_eth_for_tokens() -> Result<()> {
    init_tracing();
    let wrapped = Address::repeat_byte(0x0c);
    let server = spawn_mock_rpc(
        vec![
            RpcScript::Result(hex_address_result(pair())),
            RpcScript::Result(hex_reserves_result(e18(1_000_000), e18(500_000))),
        ],
        // Balance probe and any stragglers.
        RpcScript::Result(common::hex_uint_result(e18(10))),
    )
    .await;
    let adapter = adapter_for(&server.url, wrapped)?;

    let ctx = QuoteContext {
        from_token: native_eth(),
        to_token: erc20_b(),
        amount: Decimal::new(2, 0),
        chain_id: 1,
        dest_chain_id: None,
        wallet: Address::repeat_byte(0xaa),
        slippage_bps: 500,
        cancel: CancellationToken::new(),
    };
    let quote = adapter.get_quote(&ctx).await?;
    assert_eq!(quote.sell_token, native_token_address());
    assert_eq!(quote.sell_amount, e18(2));
    // Native sells need no allowance.
    assert!(quote.metadata.allowance_target.is_none());

    let step = adapter.build_transaction(&quote, 1).await?;
    assert_eq!(step.kind, StepKind::Swap);
    assert_eq!(step.value, e18(2), "native input rides along as tx value");
    assert_eq!(
        &step.data[0..4],
        ethers::utils::id("swapExactETHForTokens(uint256,address[],address,uint256)").as_slice()
    );

    // Round-trip the ABI arguments.
    let decoded = abi::decode(
        &[
            ParamType::Uint(256),
            ParamType::Array(Box::new(ParamType::Address)),
            ParamType::Address,
            ParamType::Uint(256),
        ],
        &step.data[4..],
    )?;
    let expected_min = math::apply_slippage(quote.buy_amount, 500);
    assert_eq!(decoded[0], Token::Uint(expected_min));
    assert_eq!(
        decoded[1],
        Token::Array(vec![Token::Address(wrapped), Token::Address(token_b())])
    );
    assert_eq!(decoded[2], Token::Address(Address::repeat_byte(0xaa)));
    Ok(())
}

#[tokio::test]
async fn erc20_sell_builds_swap_exact_tokens_and_flags_allowance() -> Result<()> {
    init_tracing();
    let wrapped = Address::repeat_byte(0x0c);
    // The quote and the balance probe race, so route replies by selector.
    let server = common::spawn_selector_rpc(vec![
        ("e6a43905", hex_address_result(pair())),
        ("0902f1ac", hex_reserves_result(e18(1_000_000), e18(500_000))),
        ("70a08231", common::hex_uint_result(e18(100))),
    ])
    .await;
    let adapter = adapter_for(&server.url, wrapped)?;

    let token_a_info = TokenInfo {
        symbol: "TKA".into(),
        addresses: HashMap::from([(1u64, token_a())]),
        decimals: 18,
        kind: TokenKind::Erc20,
        verified: true,
    };
    let ctx = QuoteContext {
        from_token: token_a_info,
        to_token: erc20_b(),
        amount: Decimal::new(5, 0),
        chain_id: 1,
        dest_chain_id: None,
        wallet: Address::repeat_byte(0xaa),
        slippage_bps: 500,
        cancel: CancellationToken::new(),
    };
    let quote = adapter.get_quote(&ctx).await?;
    assert_eq!(
        quote.metadata.allowance_target,
        Some(Address::repeat_byte(0x55)),
        "ERC-20 sells must approve the router"
    );
    assert_eq!(quote.metadata.pair_address, Some(pair()));

    let step = adapter.build_transaction(&quote, 1).await?;
    assert_eq!(step.value, U256::zero());
    assert_eq!(
        &step.data[0..4],
        ethers::utils::id("swapExactTokensForTokens(uint256,uint256,address[],address,uint256)")
            .as_slice()
    );
    let decoded = abi::decode(
        &[
            ParamType::Uint(256),
            ParamType::Uint(256),
            ParamType::Array(Box::new(ParamType::Address)),
            ParamType::Address,
            ParamType::Uint(256),
        ],
        &step.data[4..],
    )?;
    assert_eq!(decoded[0], Token::Uint(e18(5)));
    Ok(())
}

#[tokio::test]
async fn cross_chain_context_is_rejected() -> Result<()> {
    init_tracing();
    let server = spawn_mock_rpc(vec![], RpcScript::Http500).await;
    let adapter = adapter_for(&server.url, Address::repeat_byte(0x0c))?;
    let ctx = QuoteContext {
        from_token: native_eth(),
        to_token: erc20_b(),
        amount: Decimal::ONE,
        chain_id: 1,
        dest_chain_id: Some(42161),
        wallet: Address::repeat_byte(0xaa),
        slippage_bps: 500,
        cancel: CancellationToken::new(),
    };
    assert!(matches!(
        adapter.get_quote(&ctx).await,
        Err(AdapterError::Validation(_))
    ));
    Ok(())
}
