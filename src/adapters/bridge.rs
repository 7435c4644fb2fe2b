//! Cross-chain bridge adapters and the multi-step flow builder.
//!
//! Bridge routes are burn-and-mint (or lock-and-mint) flows: the wallet
//! executes `[approve?, burn]` on the source chain, then the destination
//! mint is released once the bridge's attestation service signs off. Status
//! is polled by the external caller; `get_status` issues exactly one
//! bounded-timeout HTTP call per invocation and never loops.

use crate::adapters::{ProtocolAdapter, QuoteContext};
use crate::errors::{AdapterError, BridgeError};
use crate::rpc::encode_call;
use crate::types::{
    AdapterKind, BridgeHandle, BridgeStatus, Quote, QuoteMetadata, StepKind, TransactionStep,
};
use async_trait::async_trait;
use ethers::abi::Token;
use ethers::types::{Address, U256};
use ethers::utils::{id, keccak256};
use once_cell::sync::Lazy;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

const HTTP_TIMEOUT: Duration = Duration::from_secs(8);
/// Circle's documented soft-finality window for a CCTP transfer.
const CCTP_ESTIMATED_TIME_SECS: u64 = 900;

static DEPOSIT_FOR_BURN: Lazy<[u8; 4]> =
    Lazy::new(|| id("depositForBurn(uint256,uint32,bytes32,address)"));

fn addr(s: &str) -> Address {
    Address::from_str(s).unwrap_or_else(|_| Address::zero())
}

/// Ordered transaction steps plus the status handle for one bridge transfer.
#[derive(Debug, Clone)]
pub struct CrossChainFlow {
    pub steps: Vec<TransactionStep>,
    pub handle: BridgeHandle,
    pub estimated_time_secs: u64,
}

/// Assembles `[approve?, lock_or_burn]` step lists for bridge transfers.
#[derive(Debug, Clone, Copy, Default)]
pub struct CrossChainFlowBuilder;

impl CrossChainFlowBuilder {
    /// Orders the steps and mints the status handle. The ticket id is a
    /// deterministic digest of the transfer parameters; callers overwrite
    /// `source_tx_hash` once the burn is submitted.
    pub fn assemble(
        protocol: &str,
        source_chain_id: u64,
        dest_chain_id: u64,
        approval_steps: Vec<TransactionStep>,
        bridge_step: TransactionStep,
        estimated_time_secs: u64,
        wallet: Address,
        amount: U256,
    ) -> CrossChainFlow {
        let mut seed = Vec::with_capacity(20 + 32 + 16 + protocol.len());
        seed.extend_from_slice(wallet.as_bytes());
        let mut amount_bytes = [0u8; 32];
        amount.to_big_endian(&mut amount_bytes);
        seed.extend_from_slice(&amount_bytes);
        seed.extend_from_slice(&source_chain_id.to_be_bytes());
        seed.extend_from_slice(&dest_chain_id.to_be_bytes());
        seed.extend_from_slice(protocol.as_bytes());
        let ticket_id = format!("0x{}", hex::encode(keccak256(&seed)));

        let mut steps = approval_steps;
        steps.push(bridge_step);

        CrossChainFlow {
            steps,
            handle: BridgeHandle {
                protocol: protocol.to_string(),
                ticket_id,
                source_tx_hash: None,
                source_chain_id,
                dest_chain_id,
            },
            estimated_time_secs,
        }
    }
}

/// One chain's CCTP deployment.
#[derive(Debug, Clone, Copy)]
pub struct CctpDomain {
    pub token_messenger: Address,
    pub usdc: Address,
    /// Circle's numeric domain id (not the EVM chain id).
    pub domain: u32,
}

#[derive(Debug, Deserialize)]
struct AttestationReply {
    status: String,
}

/// Circle CCTP burn-and-mint adapter. Only routes native USDC between
/// chains Circle supports; output is 1:1 with the burned amount.
#[derive(Debug)]
pub struct CctpBridgeAdapter {
    client: Client,
    attestation_base: String,
    domains: HashMap<u64, CctpDomain>,
    rate_guard: Arc<Semaphore>,
}

impl CctpBridgeAdapter {
    pub fn new() -> Result<Self, AdapterError> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent("crossroute/0.1")
            .build()
            .map_err(|e| AdapterError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            attestation_base: "https://iris-api.circle.com/v1".to_string(),
            domains: Self::mainnet_domains(),
            rate_guard: Arc::new(Semaphore::new(4)),
        })
    }

    /// Test seam: custom attestation endpoint and deployments.
    pub fn with_domains(
        mut self,
        attestation_base: impl Into<String>,
        domains: HashMap<u64, CctpDomain>,
    ) -> Self {
        self.attestation_base = attestation_base.into();
        self.domains = domains;
        self
    }

    fn mainnet_domains() -> HashMap<u64, CctpDomain> {
        HashMap::from([
            (
                1u64,
                CctpDomain {
                    token_messenger: addr("0xBd3fa81B58Ba92a82136038B25aDec7066af3155"),
                    usdc: addr("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"),
                    domain: 0,
                },
            ),
            (
                10u64,
                CctpDomain {
                    token_messenger: addr("0x2B4069517957735bE00ceE0fadAE88a26365528f"),
                    usdc: addr("0x0b2C639c533813f4Aa9D7837CAf62653d097Ff85"),
                    domain: 2,
                },
            ),
            (
                42161u64,
                CctpDomain {
                    token_messenger: addr("0x19330d10D9Cc8751218eaf51E8885D058642E08A"),
                    usdc: addr("0xaf88d065e77c8cC2239327C5EDb3A432268e5831"),
                    domain: 3,
                },
            ),
            (
                8453u64,
                CctpDomain {
                    token_messenger: addr("0x1682Ae6375C4E4A97e4B583BC394c861A46D8962"),
                    usdc: addr("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"),
                    domain: 6,
                },
            ),
        ])
    }

    fn domain_for(&self, chain_id: u64) -> Result<&CctpDomain, AdapterError> {
        self.domains
            .get(&chain_id)
            .ok_or(AdapterError::UnsupportedChain(chain_id))
    }

    /// Single-shot attestation poll. `Pending` covers both "not yet seen"
    /// (404) and "pending_confirmations".
    #[instrument(skip(self, cancel), fields(ticket = %handle.ticket_id))]
    pub async fn get_status(
        &self,
        handle: &BridgeHandle,
        cancel: &CancellationToken,
    ) -> Result<BridgeStatus, BridgeError> {
        if handle.protocol != self.name() {
            return Err(BridgeError::InvalidHandle(format!(
                "handle belongs to {:?}",
                handle.protocol
            )));
        }
        let key = handle
            .source_tx_hash
            .map(|h| format!("{h:#x}"))
            .unwrap_or_else(|| handle.ticket_id.clone());
        let url = format!("{}/attestations/{key}", self.attestation_base);

        let _permit = self
            .rate_guard
            .acquire()
            .await
            .map_err(|_| BridgeError::Network("rate guard semaphore closed".into()))?;
        let request = self.client.get(&url).send();
        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(BridgeError::Network("status poll cancelled".into())),
            r = request => r.map_err(|e| BridgeError::Network(format!("attestation request failed: {e}")))?,
        };

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(BridgeStatus::Pending);
        }
        let body = response
            .text()
            .await
            .map_err(|e| BridgeError::Network(format!("failed to read attestation body: {e}")))?;
        if !status.is_success() {
            return Err(BridgeError::Attestation {
                status: status.as_u16(),
                message: body,
            });
        }

        let reply: AttestationReply = serde_json::from_str(&body).map_err(|e| {
            BridgeError::Attestation {
                status: status.as_u16(),
                message: format!("unparseable attestation reply: {e}"),
            }
        })?;
        Ok(match reply.status.as_str() {
            "complete" => BridgeStatus::Confirmed,
            "failed" => BridgeStatus::Failed,
            other => {
                debug!(target: "bridge", status = other, "Attestation still pending");
                BridgeStatus::Pending
            }
        })
    }
}

#[async_trait]
impl ProtocolAdapter for CctpBridgeAdapter {
    fn name(&self) -> &'static str {
        "cctp"
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Bridge
    }

    fn supported_chains(&self) -> Vec<u64> {
        let mut chains: Vec<u64> = self.domains.keys().copied().collect();
        chains.sort_unstable();
        chains
    }

    #[instrument(skip(self, ctx), fields(chain_id = ctx.chain_id, dest = ?ctx.dest_chain_id))]
    async fn get_quote(&self, ctx: &QuoteContext) -> Result<Quote, AdapterError> {
        let dest_chain_id = ctx
            .dest_chain_id
            .filter(|d| *d != ctx.chain_id)
            .ok_or_else(|| {
                AdapterError::Validation("cctp only routes cross-chain transfers".into())
            })?;
        let source = self.domain_for(ctx.chain_id)?;
        let dest = self.domain_for(dest_chain_id)?;

        // Burn-and-mint only moves native USDC.
        let from_address = ctx.from_token.address_on(ctx.chain_id);
        let to_address = ctx.to_token.address_on(dest_chain_id);
        if from_address != Some(source.usdc) || to_address != Some(dest.usdc) {
            return Err(AdapterError::UnsupportedTokenPair {
                from: ctx.from_token.symbol.clone(),
                to: ctx.to_token.symbol.clone(),
            });
        }

        let amount = ctx
            .from_token
            .to_base_units(ctx.amount)
            .map_err(AdapterError::from)?;
        if amount.is_zero() {
            return Err(AdapterError::Validation("amount must be positive".into()));
        }

        // mintRecipient is the wallet left-padded to 32 bytes.
        let mut recipient_word = [0u8; 32];
        recipient_word[12..].copy_from_slice(ctx.wallet.as_bytes());
        let data = encode_call(
            *DEPOSIT_FOR_BURN,
            &[
                Token::Uint(amount),
                Token::Uint(U256::from(dest.domain)),
                Token::FixedBytes(recipient_word.to_vec()),
                Token::Address(source.usdc),
            ],
        );

        let burn_step = TransactionStep {
            to: source.token_messenger,
            data,
            value: U256::zero(),
            gas_limit: U256::from(180_000u64),
            chain_id: ctx.chain_id,
            kind: StepKind::BurnAndMint,
        };

        Ok(Quote {
            success: true,
            protocol: self.name().to_string(),
            chain_id: ctx.chain_id,
            sell_token: source.usdc,
            buy_token: dest.usdc,
            sell_amount: amount,
            // Burn-and-mint is 1:1; Circle charges no protocol fee.
            buy_amount: amount,
            rate: 1.0,
            estimated_gas: U256::from(180_000u64),
            steps: vec![burn_step],
            metadata: QuoteMetadata {
                allowance_target: Some(source.token_messenger),
                recipient: Some(ctx.wallet),
                estimated_time_secs: Some(CCTP_ESTIMATED_TIME_SECS),
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
            .find(|s| s.kind == StepKind::BurnAndMint && s.chain_id == chain_id)
            .cloned()
            .ok_or_else(|| {
                warn!(target: "bridge", protocol = %quote.protocol, "quote carries no burn step");
                AdapterError::BuildTransaction("quote carries no burn step".into())
            })
    }
}
