//! Core data model for the quote routing engine.
//!
//! Everything here is plain data: tokens, quotes, transaction steps and the
//! small value types shared between the registry, the adapters and the
//! approval flow. Network access and protocol logic live elsewhere.

use crate::errors::AmmError;
use ethers::types::{Address, Bytes, H256, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Whether a token is the chain's native asset or an ERC-20 contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Native,
    Erc20,
}

/// A canonical token record. Immutable once resolved; the resolver caches
/// instances for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub symbol: String,
    /// Per-chain deployment addresses. The native asset uses the conventional
    /// `0xeeee...eeee` sentinel on every chain it exists on.
    pub addresses: HashMap<u64, Address>,
    pub decimals: u8,
    pub kind: TokenKind,
    pub verified: bool,
}

/// Sentinel address for the native asset, shared by most aggregator APIs.
pub fn native_token_address() -> Address {
    Address::from_str("0xEeeeeEeeeEeEeeEeEeEeeEEEeeeeEeeeeeeeEEeE")
        .unwrap_or_else(|_| Address::repeat_byte(0xee))
}

impl TokenInfo {
    pub fn is_native(&self) -> bool {
        self.kind == TokenKind::Native
    }

    pub fn address_on(&self, chain_id: u64) -> Option<Address> {
        self.addresses.get(&chain_id).copied()
    }

    /// Converts a human-unit amount to integer base units using this token's
    /// decimals. Fractional dust beyond the token's precision is rejected
    /// rather than silently truncated.
    pub fn to_base_units(&self, amount: Decimal) -> Result<U256, AmmError> {
        if amount.is_sign_negative() {
            return Err(AmmError::Overflow("negative amount"));
        }
        let scale = Decimal::from(10u64.pow(u32::from(self.decimals.min(19))));
        let scaled = amount
            .checked_mul(scale)
            .ok_or(AmmError::Overflow("decimal scaling"))?;
        if !scaled.fract().is_zero() {
            return Err(AmmError::Overflow("amount has more precision than token decimals"));
        }
        U256::from_dec_str(&scaled.trunc().to_string())
            .map_err(|_| AmmError::Overflow("base unit conversion"))
    }

    /// Converts integer base units back to an approximate human-unit value.
    /// Lossy for amounts beyond f64 precision; used for rates and display.
    pub fn from_base_units(&self, amount: U256) -> f64 {
        let raw: f64 = amount.to_string().parse().unwrap_or(f64::MAX);
        raw / 10f64.powi(i32::from(self.decimals))
    }
}

/// The kind of on-chain action a transaction step performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Approve,
    Permit2Signature,
    Swap,
    Lock,
    BurnAndMint,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepKind::Approve => "approve",
            StepKind::Permit2Signature => "permit2_signature",
            StepKind::Swap => "swap",
            StepKind::Lock => "lock",
            StepKind::BurnAndMint => "burn_and_mint",
        };
        write!(f, "{s}")
    }
}

/// A single transaction (or signature request) for the wallet to execute.
/// Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionStep {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    pub gas_limit: U256,
    pub chain_id: u64,
    pub kind: StepKind,
}

/// EIP-712 domain of a Permit2 `PermitTransferFrom` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permit2Domain {
    pub name: String,
    #[serde(rename = "chainId")]
    pub chain_id: u64,
    #[serde(rename = "verifyingContract")]
    pub verifying_contract: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permit2Permitted {
    pub token: Address,
    pub amount: U256,
}

/// Message body of a Permit2 `PermitTransferFrom` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permit2Message {
    pub permitted: Permit2Permitted,
    pub spender: Address,
    pub nonce: U256,
    pub deadline: U256,
}

/// A validated Permit2 typed-data payload, ready for wallet signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permit2Payload {
    pub domain: Permit2Domain,
    pub message: Permit2Message,
}

/// Protocol-specific extras attached to a quote.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuoteMetadata {
    /// Spender that must be approved before the swap step is valid.
    pub allowance_target: Option<Address>,
    /// Permit2 typed data, when the protocol supports gasless approval.
    pub permit2: Option<Permit2Payload>,
    /// AMM pool the quote was priced against, when applicable.
    pub pair_address: Option<Address>,
    /// Wallet the output is delivered to; required by adapters that encode
    /// the recipient into calldata at build time.
    pub recipient: Option<Address>,
    /// Whether the wallet held enough balance at quote time, when checked.
    pub sufficient_balance: Option<bool>,
    /// Bridge transfers: rough wall-clock estimate until funds arrive.
    pub estimated_time_secs: Option<u64>,
}

/// A priced, time-bounded offer to convert `sell_amount` of one token into an
/// estimated `buy_amount` of another. Created per request; lives only as long
/// as its cache entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub success: bool,
    pub protocol: String,
    pub chain_id: u64,
    pub sell_token: Address,
    pub buy_token: Address,
    /// Integer base units.
    pub sell_amount: U256,
    /// Integer base units.
    pub buy_amount: U256,
    /// Human-unit buy per sell. Approximate; amounts are authoritative.
    pub rate: f64,
    pub estimated_gas: U256,
    pub steps: Vec<TransactionStep>,
    pub metadata: QuoteMetadata,
}

/// Reserves of a constant-product pair, oriented by contract storage order
/// (`token0` is always the lexicographically smaller address).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairReserves {
    pub reserve0: U256,
    pub reserve1: U256,
    /// True when the caller's input token is `token0`.
    pub from_is_token0: bool,
}

impl PairReserves {
    /// Maps storage order to (reserve_in, reserve_out) for the caller.
    pub fn oriented(&self) -> (U256, U256) {
        if self.from_is_token0 {
            (self.reserve0, self.reserve1)
        } else {
            (self.reserve1, self.reserve0)
        }
    }
}

/// A protocol's constant-product fee expressed as a ratio. Each adapter
/// declares its own; there is no universal fee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub numerator: u64,
    pub denominator: u64,
}

impl FeeSchedule {
    pub const fn new(numerator: u64, denominator: u64) -> Self {
        Self { numerator, denominator }
    }

    pub fn validate(&self) -> Result<(), AmmError> {
        if self.denominator == 0 || self.numerator == 0 || self.numerator > self.denominator {
            return Err(AmmError::InvalidFee {
                numerator: self.numerator,
                denominator: self.denominator,
            });
        }
        Ok(())
    }
}

/// What the upstream command layer asks for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteRequest {
    /// Symbol (`"USDC"`) or `0x`-address.
    pub from_token: String,
    /// Symbol or `0x`-address.
    pub to_token: String,
    /// Human units; converted internally using token decimals.
    pub amount: Decimal,
    pub chain_id: u64,
    pub dest_chain_id: Option<u64>,
    pub wallet: Address,
}

impl QuoteRequest {
    pub fn is_cross_chain(&self) -> bool {
        self.dest_chain_id.map_or(false, |d| d != self.chain_id)
    }
}

/// The registry's unified result: the winning quote plus the ordered steps
/// the wallet must execute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutedQuote {
    pub protocol: String,
    pub quote: Quote,
    pub steps: Vec<TransactionStep>,
    /// Present for cross-chain routes: poll the bridge adapter with this.
    pub bridge_handle: Option<BridgeHandle>,
}

/// Status handle for an in-flight cross-chain transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeHandle {
    pub protocol: String,
    pub ticket_id: String,
    pub source_tx_hash: Option<H256>,
    pub source_chain_id: u64,
    pub dest_chain_id: u64,
}

/// Lifecycle of a cross-chain transfer as reported by the attestation
/// service. Polled by the external caller; never blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeStatus {
    Pending,
    Confirmed,
    Failed,
}

/// Which family an adapter belongs to; drives registry candidate ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterKind {
    /// HTTP-API-backed aggregator. Tried first for same-chain requests.
    Aggregator,
    /// On-chain constant-product AMM. Reliability fallback.
    OnChainAmm,
    /// Cross-chain bridge. Only candidate family for cross-chain requests.
    Bridge,
}

/// Static per-protocol gas defaults, used when an upstream API omits gas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasEstimates {
    pub aggregator_swap: u64,
    pub amm_swap: u64,
    pub approve: u64,
    pub bridge_burn: u64,
}

impl Default for GasEstimates {
    fn default() -> Self {
        Self {
            aggregator_swap: 200_000,
            amm_swap: 150_000,
            approve: 60_000,
            bridge_burn: 180_000,
        }
    }
}
