//! # Modular Configuration System
//!
//! Settings for chains, RPC endpoints, adapters and the registry, loadable
//! from a single JSON file or built programmatically. The `Config` struct is
//! the single source of truth for system parameters; components receive the
//! slices they need at construction time and never read ambient state.

use crate::errors::ConfigError;
use crate::types::GasEstimates;
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Keyed by chain id (stringly in JSON, numeric in memory).
    pub chains: HashMap<u64, ChainConfig>,
    pub registry: RegistrySettings,
    pub rpc: RpcSettings,
    #[serde(default)]
    pub gas_estimates: GasEstimates,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub name: String,
    /// Ordered RPC endpoint URLs; earlier entries are preferred.
    pub endpoints: Vec<String>,
    /// Wrapped-native token (WETH, WBNB, ...) used for AMM pair lookups.
    pub wrapped_native: Address,
    /// Requests per second allowed against each endpoint.
    #[serde(default = "default_rps_limit")]
    pub rps_limit: u32,
    /// Maximum in-flight RPC calls per chain.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: u32,
}

fn default_rps_limit() -> u32 {
    10
}

fn default_max_concurrent() -> u32 {
    8
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySettings {
    /// Adapter names in trial order. Aggregators are still tried before AMMs
    /// regardless of interleaving here; within each family this order wins.
    pub priority: Vec<String>,
    /// Default slippage applied to AMM minimum-out amounts.
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: u32,
    /// Quote cache TTL in milliseconds.
    #[serde(default = "default_quote_ttl_ms")]
    pub quote_ttl_ms: u64,
    /// Overall routing deadline in milliseconds.
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,
}

fn default_slippage_bps() -> u32 {
    500
}

fn default_quote_ttl_ms() -> u64 {
    10_000
}

fn default_deadline_ms() -> u64 {
    12_000
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            priority: Vec::new(),
            slippage_bps: default_slippage_bps(),
            quote_ttl_ms: default_quote_ttl_ms(),
            deadline_ms: default_deadline_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcSettings {
    /// Per-call timeout in milliseconds.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    /// Consecutive failures before an endpoint's breaker opens.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Breaker cooldown before a half-open trial is allowed, milliseconds.
    #[serde(default = "default_cooldown_ms")]
    pub breaker_cooldown_ms: u64,
    /// Failover retry attempts across the endpoint list.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Initial backoff between retries, milliseconds. Doubles per attempt
    /// with jitter, capped at `max_backoff_ms`.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Reserve cache TTL in milliseconds.
    #[serde(default = "default_reserve_ttl_ms")]
    pub reserve_ttl_ms: u64,
}

fn default_call_timeout_ms() -> u64 {
    4_000
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    2
}

fn default_initial_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    2_000
}

fn default_reserve_ttl_ms() -> u64 {
    10_000
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            call_timeout_ms: default_call_timeout_ms(),
            failure_threshold: default_failure_threshold(),
            breaker_cooldown_ms: default_cooldown_ms(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            reserve_ttl_ms: default_reserve_ttl_ms(),
        }
    }
}

impl Config {
    /// Loads configuration from a JSON file and validates it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chains.is_empty() {
            return Err(ConfigError::Invalid("no chains configured".into()));
        }
        for (chain_id, chain) in &self.chains {
            if chain.endpoints.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "chain {chain_id} ({}) has no RPC endpoints",
                    chain.name
                )));
            }
            for endpoint in &chain.endpoints {
                url::Url::parse(endpoint).map_err(|e| {
                    ConfigError::Invalid(format!(
                        "chain {chain_id} endpoint {endpoint:?} is not a valid URL: {e}"
                    ))
                })?;
            }
            if chain.wrapped_native.is_zero() {
                return Err(ConfigError::Invalid(format!(
                    "chain {chain_id} ({}) has a zero wrapped-native address",
                    chain.name
                )));
            }
        }
        if self.registry.slippage_bps >= 10_000 {
            return Err(ConfigError::Invalid(format!(
                "slippage_bps {} must be below 10000",
                self.registry.slippage_bps
            )));
        }
        Ok(())
    }

    pub fn chain(&self, chain_id: u64) -> Option<&ChainConfig> {
        self.chains.get(&chain_id)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chains: HashMap::new(),
            registry: RegistrySettings::default(),
            rpc: RpcSettings::default(),
            gas_estimates: GasEstimates::default(),
        }
    }
}
