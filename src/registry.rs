//! # Protocol Registry
//!
//! Holds every configured adapter, selects candidates per request and tries
//! them strictly sequentially: the first success is built into an executable
//! step list and returned, later candidates are never touched. Sequential
//! trials are a correctness requirement (two live quotes against the same
//! nonce must never exist), so the loop is a plain `for`, not a join set.
//!
//! Per-adapter failures are logged and retained inside the aggregate
//! `NoRoute` error; the user-visible message stays a single coherent
//! failure.

use crate::adapters::bridge::CrossChainFlowBuilder;
use crate::adapters::{ProtocolAdapter, QuoteContext};
use crate::approval::{permit2_signature_step, ApprovalFlowBuilder};
use crate::config::RegistrySettings;
use crate::errors::{AdapterError, RegistryError};
use crate::tokens::TokenResolver;
use crate::types::{
    native_token_address, AdapterKind, Quote, QuoteRequest, RoutedQuote, TokenInfo,
    TransactionStep,
};
use ethers::types::{Address, U256};
use moka::future::Cache;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Cache key: (source chain, effective dest chain, from, to, base amount).
type QuoteKey = (u64, u64, Address, Address, U256);

pub struct ProtocolRegistry {
    adapters: Vec<Arc<dyn ProtocolAdapter>>,
    resolver: Arc<dyn TokenResolver>,
    approval: ApprovalFlowBuilder,
    settings: RegistrySettings,
    quote_cache: Cache<QuoteKey, RoutedQuote>,
    closed: AtomicBool,
}

impl ProtocolRegistry {
    pub fn new(
        adapters: Vec<Arc<dyn ProtocolAdapter>>,
        resolver: Arc<dyn TokenResolver>,
        approval: ApprovalFlowBuilder,
        settings: RegistrySettings,
    ) -> Self {
        let quote_cache = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(Duration::from_millis(settings.quote_ttl_ms))
            .build();
        Self {
            adapters,
            resolver,
            approval,
            settings,
            quote_cache,
            closed: AtomicBool::new(false),
        }
    }

    /// Routes one request end to end: resolve tokens, try candidates in
    /// order, finish the winner with approval / cross-chain steps. The whole
    /// operation runs under the configured deadline; on expiry in-flight
    /// calls are cancelled and a timeout error is returned instead of a late
    /// result.
    #[instrument(skip(self, request), fields(from = %request.from_token, to = %request.to_token, chain = request.chain_id))]
    pub async fn route(&self, request: QuoteRequest) -> Result<RoutedQuote, RegistryError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RegistryError::Shutdown);
        }
        self.validate(&request)?;

        let cancel = CancellationToken::new();
        let deadline = Duration::from_millis(self.settings.deadline_ms);
        match tokio::time::timeout(deadline, self.route_inner(&request, &cancel)).await {
            Ok(result) => result,
            Err(_) => {
                cancel.cancel();
                warn!(target: "registry", deadline_ms = self.settings.deadline_ms, "Routing deadline exceeded");
                Err(RegistryError::DeadlineExceeded(self.settings.deadline_ms))
            }
        }
    }

    fn validate(&self, request: &QuoteRequest) -> Result<(), RegistryError> {
        if request.amount.is_sign_negative() || request.amount.is_zero() {
            return Err(RegistryError::Validation("amount must be positive".into()));
        }
        if request.wallet.is_zero() {
            return Err(RegistryError::Validation("wallet address is zero".into()));
        }
        if !request.is_cross_chain()
            && request.from_token.eq_ignore_ascii_case(&request.to_token)
        {
            return Err(RegistryError::Validation(
                "cannot swap a token for itself".into(),
            ));
        }
        Ok(())
    }

    async fn route_inner(
        &self,
        request: &QuoteRequest,
        cancel: &CancellationToken,
    ) -> Result<RoutedQuote, RegistryError> {
        let dest_chain_id = request.dest_chain_id.unwrap_or(request.chain_id);
        let from_token = self
            .resolve_token(&request.from_token, request.chain_id, cancel)
            .await?;
        let to_token = self
            .resolve_token(&request.to_token, dest_chain_id, cancel)
            .await?;

        let amount_base = from_token
            .to_base_units(request.amount)
            .map_err(|e| RegistryError::Validation(e.to_string()))?;
        let key = self.cache_key(request, &from_token, &to_token, amount_base)?;
        if let Some(cached) = self.quote_cache.get(&key).await {
            info!(target: "registry", protocol = %cached.protocol, "Serving cached quote");
            return Ok(cached);
        }

        let candidates = self.candidates(request);
        if candidates.is_empty() {
            return Err(RegistryError::NoRoute { attempts: Vec::new() });
        }

        let ctx = QuoteContext {
            from_token,
            to_token,
            amount: request.amount,
            chain_id: request.chain_id,
            dest_chain_id: request.dest_chain_id,
            wallet: request.wallet,
            slippage_bps: self.settings.slippage_bps,
            cancel: cancel.clone(),
        };

        let mut attempts: Vec<(String, AdapterError)> = Vec::new();
        for adapter in candidates {
            let name = adapter.name();
            match adapter.get_quote(&ctx).await {
                Ok(quote) => match self.finish(adapter.as_ref(), quote, &ctx).await {
                    Ok(routed) => {
                        info!(
                            target: "registry",
                            protocol = name,
                            buy_amount = %routed.quote.buy_amount,
                            steps = routed.steps.len(),
                            "Route found"
                        );
                        self.quote_cache.insert(key, routed.clone()).await;
                        return Ok(routed);
                    }
                    Err(e) => {
                        warn!(target: "registry", adapter = name, error = %e, "Transaction build failed, trying next candidate");
                        attempts.push((name.to_string(), e));
                    }
                },
                Err(e) => {
                    warn!(target: "registry", adapter = name, error = %e, "Quote failed, trying next candidate");
                    attempts.push((name.to_string(), e));
                }
            }
        }

        Err(RegistryError::NoRoute { attempts })
    }

    async fn resolve_token(
        &self,
        identifier: &str,
        chain_id: u64,
        cancel: &CancellationToken,
    ) -> Result<TokenInfo, RegistryError> {
        match self.resolver.resolve(identifier, chain_id, cancel).await {
            Ok(Some(token)) => Ok(token),
            Ok(None) => Err(RegistryError::TokenNotFound(format!(
                "{identifier} on chain {chain_id}"
            ))),
            Err(e) => Err(RegistryError::TokenNotFound(format!(
                "{identifier} on chain {chain_id}: {e}"
            ))),
        }
    }

    fn cache_key(
        &self,
        request: &QuoteRequest,
        from_token: &TokenInfo,
        to_token: &TokenInfo,
        amount_base: U256,
    ) -> Result<QuoteKey, RegistryError> {
        let dest_chain_id = request.dest_chain_id.unwrap_or(request.chain_id);
        let from = if from_token.is_native() {
            native_token_address()
        } else {
            from_token.address_on(request.chain_id).ok_or_else(|| {
                RegistryError::TokenNotFound(format!(
                    "{} on chain {}",
                    from_token.symbol, request.chain_id
                ))
            })?
        };
        let to = if to_token.is_native() {
            native_token_address()
        } else {
            to_token.address_on(dest_chain_id).ok_or_else(|| {
                RegistryError::TokenNotFound(format!(
                    "{} on chain {dest_chain_id}",
                    to_token.symbol
                ))
            })?
        };
        Ok((request.chain_id, dest_chain_id, from, to, amount_base))
    }

    /// Candidate selection: cross-chain requests get bridge-capable adapters
    /// supporting both chains; same-chain requests get aggregators first
    /// (best price), then on-chain AMMs (reliability fallback). Within each
    /// family the configured priority order wins.
    fn candidates(&self, request: &QuoteRequest) -> Vec<Arc<dyn ProtocolAdapter>> {
        let mut selected: Vec<Arc<dyn ProtocolAdapter>> = if request.is_cross_chain() {
            let dest = request.dest_chain_id.unwrap_or(request.chain_id);
            self.adapters
                .iter()
                .filter(|a| a.kind() == AdapterKind::Bridge)
                .filter(|a| a.is_supported(request.chain_id) && a.is_supported(dest))
                .cloned()
                .collect()
        } else {
            self.adapters
                .iter()
                .filter(|a| a.kind() != AdapterKind::Bridge)
                .filter(|a| a.is_supported(request.chain_id))
                .cloned()
                .collect()
        };

        let family_rank = |kind: AdapterKind| match kind {
            AdapterKind::Aggregator => 0usize,
            AdapterKind::OnChainAmm => 1,
            AdapterKind::Bridge => 0,
        };
        selected.sort_by_key(|a| (family_rank(a.kind()), self.priority_index(a.name())));
        selected
    }

    fn priority_index(&self, name: &str) -> usize {
        self.settings
            .priority
            .iter()
            .position(|p| p == name)
            .unwrap_or(usize::MAX)
    }

    /// Turns a winning quote into the final ordered step list: allowance
    /// check (approve step iff the on-chain allowance falls short), Permit2
    /// signature step when typed data is present, then the swap or bridge
    /// step from the adapter.
    async fn finish(
        &self,
        adapter: &dyn ProtocolAdapter,
        quote: Quote,
        ctx: &QuoteContext,
    ) -> Result<RoutedQuote, AdapterError> {
        let main_step = adapter.build_transaction(&quote, ctx.chain_id).await?;

        let approval_steps = self.approval_steps(&quote, ctx).await?;
        let mut permit_steps: Vec<TransactionStep> = Vec::new();
        if let Some(permit2) = &quote.metadata.permit2 {
            permit_steps.push(permit2_signature_step(permit2, ctx.chain_id));
        }

        if adapter.kind() == AdapterKind::Bridge {
            let flow = CrossChainFlowBuilder::assemble(
                adapter.name(),
                ctx.chain_id,
                ctx.dest_chain_id.unwrap_or(ctx.chain_id),
                approval_steps,
                main_step,
                quote.metadata.estimated_time_secs.unwrap_or(0),
                ctx.wallet,
                quote.sell_amount,
            );
            return Ok(RoutedQuote {
                protocol: adapter.name().to_string(),
                quote,
                steps: flow.steps,
                bridge_handle: Some(flow.handle),
            });
        }

        let mut steps = approval_steps;
        steps.extend(permit_steps);
        steps.push(main_step);
        Ok(RoutedQuote {
            protocol: adapter.name().to_string(),
            quote,
            steps,
            bridge_handle: None,
        })
    }

    async fn approval_steps(
        &self,
        quote: &Quote,
        ctx: &QuoteContext,
    ) -> Result<Vec<TransactionStep>, AdapterError> {
        // Native sells never need allowance; adapters leave the target unset.
        let Some(spender) = quote.metadata.allowance_target else {
            return Ok(Vec::new());
        };
        if ctx.from_token.is_native() {
            return Ok(Vec::new());
        }
        let token = ctx
            .from_token
            .address_on(ctx.chain_id)
            .ok_or_else(|| AdapterError::UnsupportedTokenPair {
                from: ctx.from_token.symbol.clone(),
                to: format!("chain {}", ctx.chain_id),
            })?;
        let plan = self
            .approval
            .plan(
                ctx.chain_id,
                token,
                ctx.wallet,
                spender,
                quote.sell_amount,
                &ctx.cancel,
            )
            .await
            .map_err(|e| AdapterError::BuildTransaction(e.to_string()))?;
        Ok(plan.steps)
    }

    /// Two-phase shutdown: refuse new work, then release adapter resources.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for adapter in &self.adapters {
            adapter.close().await;
        }
        info!(target: "registry", adapters = self.adapters.len(), "Registry shut down");
    }
}

impl std::fmt::Debug for ProtocolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolRegistry")
            .field("adapters", &self.adapters.iter().map(|a| a.name()).collect::<Vec<_>>())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}
