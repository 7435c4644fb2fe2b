//! Wiring: builds the RPC layer, resolver, approval flow and the default
//! adapter set from a `Config`, in dependency order. Callers embedding the
//! engine with a custom adapter mix can skip this and assemble the
//! `ProtocolRegistry` by hand.

use crate::adapters::amm::ConstantProductAdapter;
use crate::adapters::{CctpBridgeAdapter, OneInchAdapter, ProtocolAdapter, ZeroExAdapter};
use crate::approval::ApprovalFlowBuilder;
use crate::config::Config;
use crate::errors::AdapterError;
use crate::registry::ProtocolRegistry;
use crate::rpc::RpcClient;
use crate::tokens::StaticTokenResolver;
use ethers::types::Address;
use eyre::{eyre, Result, WrapErr};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// API keys for the HTTP aggregators. An absent key skips that adapter.
#[derive(Debug, Clone, Default)]
pub struct AdapterCredentials {
    pub one_inch_api_key: Option<String>,
    pub zero_ex_api_key: Option<String>,
}

/// Everything a caller needs to route quotes and poll bridge transfers.
pub struct Engine {
    pub rpc: Arc<RpcClient>,
    pub registry: ProtocolRegistry,
}

/// Builds the default engine: aggregators (when credentialed), on-chain AMM
/// fallbacks, and the CCTP bridge, all sharing one RPC layer.
pub fn bootstrap(config: &Config, credentials: AdapterCredentials) -> Result<Engine> {
    config
        .validate()
        .wrap_err("configuration failed validation")?;

    let rpc = Arc::new(
        RpcClient::from_config(config).map_err(|e| eyre!("RPC layer setup failed: {e}"))?,
    );
    let resolver = Arc::new(StaticTokenResolver::new(rpc.clone()));
    let approval = ApprovalFlowBuilder::new(rpc.clone(), config.gas_estimates.approve);

    let chain_ids: Vec<u64> = config.chains.keys().copied().collect();
    let wrapped_native: HashMap<u64, Address> = config
        .chains
        .iter()
        .map(|(id, chain)| (*id, chain.wrapped_native))
        .collect();
    let reserve_ttl = Duration::from_millis(config.rpc.reserve_ttl_ms);
    let slippage_bps = config.registry.slippage_bps;

    let mut adapters: Vec<Arc<dyn ProtocolAdapter>> = Vec::new();
    if let Some(key) = credentials.one_inch_api_key {
        adapters.push(Arc::new(
            OneInchAdapter::new(key, chain_ids.clone(), 10).map_err(adapter_setup_err)?,
        ));
    }
    if let Some(key) = credentials.zero_ex_api_key {
        adapters.push(Arc::new(
            ZeroExAdapter::new(key, chain_ids.clone(), 10).map_err(adapter_setup_err)?,
        ));
    }
    adapters.push(Arc::new(ConstantProductAdapter::uniswap_v2(
        rpc.clone(),
        wrapped_native.clone(),
        slippage_bps,
        reserve_ttl,
    )));
    adapters.push(Arc::new(ConstantProductAdapter::pancakeswap(
        rpc.clone(),
        wrapped_native,
        slippage_bps,
        reserve_ttl,
    )));
    adapters.push(Arc::new(CctpBridgeAdapter::new().map_err(adapter_setup_err)?));

    info!(
        target: "setup",
        adapters = adapters.len(),
        chains = chain_ids.len(),
        "Engine assembled"
    );

    let registry = ProtocolRegistry::new(adapters, resolver, approval, config.registry.clone());
    Ok(Engine {
        rpc,
        registry,
    })
}

fn adapter_setup_err(e: AdapterError) -> eyre::Report {
    eyre!("adapter setup failed: {e}")
}
