//! # Approval Flow
//!
//! Decides whether a swap needs a preceding `approve` transaction, and
//! handles Permit2 typed-data payloads for protocols that support gasless
//! authorization.
//!
//! State machine: `NeedsApprovalCheck` → allowance ≥ amount → `ReadyToSwap`,
//! otherwise → `AwaitingApproval` (the caller must submit and confirm the
//! emitted approve step before the swap step is valid) → `ReadyToSwap`.

use crate::errors::ApprovalError;
use crate::rpc::{encode_call, RpcClient};
use crate::types::{
    Permit2Domain, Permit2Message, Permit2Payload, Permit2Permitted, StepKind, TransactionStep,
};
use ethers::abi::Token;
use ethers::types::{Address, Bytes, U256};
use ethers::utils::id;
use once_cell::sync::Lazy;
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

static APPROVE_SELECTOR: Lazy<[u8; 4]> = Lazy::new(|| id("approve(address,uint256)"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalState {
    NeedsApprovalCheck,
    AwaitingApproval,
    ReadyToSwap,
}

/// Outcome of an allowance check: the resulting state plus the approval
/// steps (empty when the allowance already covers the amount).
#[derive(Debug, Clone)]
pub struct ApprovalPlan {
    pub state: ApprovalState,
    pub steps: Vec<TransactionStep>,
    pub current_allowance: U256,
}

#[derive(Debug)]
pub struct ApprovalFlowBuilder {
    rpc: Arc<RpcClient>,
    approve_gas_limit: u64,
}

impl ApprovalFlowBuilder {
    pub fn new(rpc: Arc<RpcClient>, approve_gas_limit: u64) -> Self {
        Self {
            rpc,
            approve_gas_limit,
        }
    }

    /// Reads the on-chain allowance and emits an approve step iff it falls
    /// short of `amount`.
    #[instrument(skip(self, cancel), fields(chain_id, token = %token, spender = %spender))]
    pub async fn plan(
        &self,
        chain_id: u64,
        token: Address,
        owner: Address,
        spender: Address,
        amount: U256,
        cancel: &CancellationToken,
    ) -> Result<ApprovalPlan, ApprovalError> {
        let allowance = self
            .rpc
            .allowance(chain_id, token, owner, spender, cancel)
            .await?;

        if allowance >= amount {
            debug!(target: "approval", %allowance, %amount, "Allowance sufficient");
            return Ok(ApprovalPlan {
                state: ApprovalState::ReadyToSwap,
                steps: Vec::new(),
                current_allowance: allowance,
            });
        }

        debug!(target: "approval", %allowance, %amount, "Allowance short, emitting approve step");
        Ok(ApprovalPlan {
            state: ApprovalState::AwaitingApproval,
            steps: vec![self.approve_step(chain_id, token, spender, amount)],
            current_allowance: allowance,
        })
    }

    /// Builds an `approve(spender, amount)` transaction step.
    pub fn approve_step(
        &self,
        chain_id: u64,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> TransactionStep {
        let data = encode_call(
            *APPROVE_SELECTOR,
            &[Token::Address(spender), Token::Uint(amount)],
        );
        TransactionStep {
            to: token,
            data,
            value: U256::zero(),
            gas_limit: U256::from(self.approve_gas_limit),
            chain_id,
            kind: StepKind::Approve,
        }
    }
}

/// A signature-request step carrying the validated typed data as JSON, for
/// the wallet layer to render and sign.
pub fn permit2_signature_step(payload: &Permit2Payload, chain_id: u64) -> TransactionStep {
    let data = serde_json::to_vec(payload).unwrap_or_default();
    TransactionStep {
        to: payload.domain.verifying_contract,
        data: Bytes::from(data),
        value: U256::zero(),
        gas_limit: U256::zero(),
        chain_id,
        kind: StepKind::Permit2Signature,
    }
}

/// Structurally validates an EIP-712 `PermitTransferFrom` payload before it
/// is exposed for signature. Required domain fields: name, chainId,
/// verifyingContract. Required message fields: permitted.token,
/// permitted.amount, spender, nonce, deadline.
pub fn validate_permit2(value: &Value) -> Result<Permit2Payload, ApprovalError> {
    if let Some(primary) = value.get("primaryType").and_then(Value::as_str) {
        if primary != "PermitTransferFrom" {
            return Err(ApprovalError::InvalidPermit(format!(
                "unexpected primaryType {primary:?}"
            )));
        }
    }

    let domain = value
        .get("domain")
        .ok_or(ApprovalError::MissingPermitField("domain"))?;
    let name = domain
        .get("name")
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
        .ok_or(ApprovalError::MissingPermitField("domain.name"))?;
    let chain_id = json_u64(domain.get("chainId"))
        .ok_or(ApprovalError::MissingPermitField("domain.chainId"))?;
    let verifying_contract = json_address(domain.get("verifyingContract"))
        .ok_or(ApprovalError::MissingPermitField("domain.verifyingContract"))?;

    let message = value
        .get("message")
        .ok_or(ApprovalError::MissingPermitField("message"))?;
    let permitted = message
        .get("permitted")
        .ok_or(ApprovalError::MissingPermitField("message.permitted"))?;
    let token = json_address(permitted.get("token"))
        .ok_or(ApprovalError::MissingPermitField("message.permitted.token"))?;
    let amount = json_u256(permitted.get("amount"))
        .ok_or(ApprovalError::MissingPermitField("message.permitted.amount"))?;
    let spender = json_address(message.get("spender"))
        .ok_or(ApprovalError::MissingPermitField("message.spender"))?;
    let nonce = json_u256(message.get("nonce"))
        .ok_or(ApprovalError::MissingPermitField("message.nonce"))?;
    let deadline = json_u256(message.get("deadline"))
        .ok_or(ApprovalError::MissingPermitField("message.deadline"))?;

    if amount.is_zero() {
        return Err(ApprovalError::InvalidPermit("permitted amount is zero".into()));
    }

    Ok(Permit2Payload {
        domain: Permit2Domain {
            name: name.to_string(),
            chain_id,
            verifying_contract,
        },
        message: Permit2Message {
            permitted: Permit2Permitted { token, amount },
            spender,
            nonce,
            deadline,
        },
    })
}

/// Appends a wallet signature to prebuilt calldata as length-prefixed bytes
/// (32-byte big-endian length, then the raw signature). The quote is not
/// re-requested; the settlement contract reads the suffix.
pub fn attach_signature(data: &Bytes, signature: &[u8]) -> Bytes {
    let mut out = data.to_vec();
    let mut length_word = [0u8; 32];
    U256::from(signature.len()).to_big_endian(&mut length_word);
    out.extend_from_slice(&length_word);
    out.extend_from_slice(signature);
    Bytes::from(out)
}

fn json_address(value: Option<&Value>) -> Option<Address> {
    value
        .and_then(Value::as_str)
        .and_then(|s| Address::from_str(s).ok())
}

fn json_u64(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn json_u256(value: Option<&Value>) -> Option<U256> {
    match value? {
        Value::Number(n) => n.as_u64().map(U256::from),
        Value::String(s) => {
            if let Some(hex_part) = s.strip_prefix("0x") {
                U256::from_str_radix(hex_part, 16).ok()
            } else {
                U256::from_dec_str(s).ok()
            }
        }
        _ => None,
    }
}
