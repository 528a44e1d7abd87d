use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use alloy::primitives::{Address, U256};
use rust_decimal::Decimal;
use tokio::sync::{Notify, watch};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use super::amounts::{calculate_minimum_output, parse_amount};
use super::machine::{Effect, FlowEvent, FlowMachine};
use super::plan::PlanBuilder;
use super::types::{FlowId, FlowRequest, FlowSnapshot, Step, StepKind, StepStatus};
use super::{FlowError, FlowResult};
use crate::context::AppContext;
use crate::registry::TokenInfo;
use crate::repository::RepositoryError;
use crate::wallet::WalletError;

/// Caller's view of one running or finished flow.
#[derive(Clone)]
pub struct FlowHandle {
    inner: Arc<FlowShared>,
}

struct FlowShared {
    id: FlowId,
    machine: Mutex<FlowMachine>,
    updates: watch::Sender<FlowSnapshot>,
    cancel: CancellationToken,
    recheck: Notify,
}

impl FlowHandle {
    fn new(machine: FlowMachine, cancel: CancellationToken) -> Self {
        let (updates, _) = watch::channel(machine.snapshot());
        Self {
            inner: Arc::new(FlowShared {
                id: machine.id(),
                machine: Mutex::new(machine),
                updates,
                cancel,
                recheck: Notify::new(),
            }),
        }
    }

    pub fn id(&self) -> FlowId {
        self.inner.id
    }

    pub fn snapshot(&self) -> FlowSnapshot {
        self.inner.updates.borrow().clone()
    }

    /// Receives a snapshot after every transition.
    pub fn subscribe(&self) -> watch::Receiver<FlowSnapshot> {
        self.inner.updates.subscribe()
    }

    /// Resolves once the flow is complete, failed or cancelled.
    pub async fn wait(&self) -> FlowSnapshot {
        let mut rx = self.subscribe();
        match rx.wait_for(|s| s.status.is_terminal()).await {
            Ok(snapshot) => snapshot.clone(),
            Err(_) => self.snapshot(),
        }
    }

    /// Cancels the flow if its active step has not been broadcast yet.
    ///
    /// # Errors
    /// `FlowError::InvalidState` once the active step is submitted or the flow has
    /// finished; nothing changes in that case.
    pub fn cancel(&self) -> FlowResult<()> {
        self.apply(FlowEvent::Cancel)?;
        self.inner.cancel.cancel();
        Ok(())
    }

    /// Polls a stalled confirmation again.
    ///
    /// # Errors
    /// `FlowError::InvalidState` unless the flow is stalled on a timed-out confirmation.
    pub fn recheck(&self) -> FlowResult<()> {
        self.apply(FlowEvent::Recheck)?;
        self.inner.recheck.notify_one();
        Ok(())
    }

    fn apply(&self, event: FlowEvent) -> FlowResult<Effect> {
        let mut machine = self
            .inner
            .machine
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let effect = machine.transition(event)?;
        self.inner.updates.send_replace(machine.snapshot());
        Ok(effect)
    }
}

type FlowTable = Arc<Mutex<HashMap<FlowId, FlowHandle>>>;

/// Validates requests, turns them into flows and drives each flow on its own task.
///
/// A flow leaves the table on its own once every step is confirmed. Failed and
/// cancelled flows stay listed until dismissed.
pub struct FlowEngine {
    ctx: Arc<AppContext>,
    flows: FlowTable,
    account_watcher: AbortHandle,
}

impl FlowEngine {
    /// Must be called within a Tokio runtime.
    pub fn new(ctx: Arc<AppContext>) -> Self {
        let account_watcher = tokio::spawn(watch_accounts(ctx.clone())).abort_handle();

        Self {
            ctx,
            flows: Arc::new(Mutex::new(HashMap::new())),
            account_watcher,
        }
    }

    pub fn context(&self) -> &Arc<AppContext> {
        &self.ctx
    }

    /// Validates `request`, plans its steps and starts the first one.
    ///
    /// Amounts and tokens are checked before the wallet is consulted.
    ///
    /// # Errors
    /// * `FlowError::Validation` - bad amount, unknown or identical tokens, no liquidity
    ///   to quote a swap
    /// * `FlowError::WalletNotConnected` - the request is valid but no account is connected
    /// * `FlowError::Configuration` - a planned call is not served by the registry
    #[instrument(skip(self), err)]
    pub async fn start_flow(&self, request: FlowRequest) -> FlowResult<FlowHandle> {
        let steps = self.plan(&request).await?;

        let machine = FlowMachine::new(FlowId::new(), request.kind(), steps);
        let handle = FlowHandle::new(machine, self.ctx.session_token().child_token());

        let first = handle.apply(FlowEvent::Begin)?;
        tracing::info!(
            "Started {} flow {} with {} steps",
            request.kind().as_str(),
            handle.id(),
            handle.snapshot().steps.len()
        );

        lock(&self.flows).insert(handle.id(), handle.clone());
        tokio::spawn(drive(
            self.ctx.clone(),
            self.flows.clone(),
            handle.clone(),
            first,
        ));

        Ok(handle)
    }

    pub fn get(&self, id: FlowId) -> FlowResult<FlowHandle> {
        lock(&self.flows)
            .get(&id)
            .cloned()
            .ok_or_else(|| FlowError::Validation(format!("unknown flow {id}")))
    }

    pub fn flows(&self) -> Vec<FlowSnapshot> {
        lock(&self.flows)
            .values()
            .map(FlowHandle::snapshot)
            .collect()
    }

    /// Forgets a failed or cancelled flow.
    pub fn dismiss(&self, id: FlowId) -> FlowResult<FlowSnapshot> {
        let mut flows = lock(&self.flows);
        let handle = flows
            .get(&id)
            .ok_or_else(|| FlowError::Validation(format!("unknown flow {id}")))?;

        let snapshot = handle.snapshot();
        if !snapshot.status.is_terminal() {
            return Err(FlowError::InvalidState(format!(
                "flow {id} is still running"
            )));
        }

        flows.remove(&id);
        Ok(snapshot)
    }

    async fn plan(&self, request: &FlowRequest) -> FlowResult<Vec<Step>> {
        let registry = self.ctx.registry();
        let settings = self.ctx.settings();
        let deadline = U256::from(chrono::Utc::now().timestamp() + settings.deadline_secs);

        match request {
            FlowRequest::AddLiquidity {
                token_a,
                token_b,
                amount_a,
                amount_b,
            } => {
                let (token_a, token_b) = (self.token(token_a)?, self.token(token_b)?);
                let amount_a = parse_amount(amount_a, token_a.decimals)?;
                let amount_b = parse_amount(amount_b, token_b.decimals)?;
                ensure_distinct(token_a, token_b)?;
                let account = self.account()?;

                Ok(PlanBuilder::new(registry)
                    .approve(StepKind::ApproveTokenA, token_a, amount_a)?
                    .approve(StepKind::ApproveTokenB, token_b, amount_b)?
                    .add_liquidity(token_a, token_b, amount_a, amount_b, account, deadline)?
                    .build())
            }

            FlowRequest::Swap {
                token_in,
                token_out,
                amount_in,
                min_amount_out,
                slippage,
            } => {
                let (token_in, token_out) = (self.token(token_in)?, self.token(token_out)?);
                let amount_in = parse_amount(amount_in, token_in.decimals)?;
                ensure_distinct(token_in, token_out)?;
                let account = self.account()?;

                let amount_out_min = match min_amount_out {
                    Some(minimum) => parse_minimum(minimum, token_out.decimals)?,
                    None => {
                        let slippage = slippage.unwrap_or(settings.default_slippage);
                        let quoted = self.quote(token_in, token_out, amount_in).await?;
                        calculate_minimum_output(quoted, slippage)?
                    }
                };

                Ok(PlanBuilder::new(registry)
                    .approve(StepKind::ApproveTokenA, token_in, amount_in)?
                    .swap(token_in, token_out, amount_in, amount_out_min, account, deadline)?
                    .build())
            }

            FlowRequest::Faucet { token, amount } => {
                let token = self.token(token)?;
                let amount = parse_amount(amount, token.decimals)?;
                let account = self.account()?;

                Ok(PlanBuilder::new(registry)
                    .faucet(token, account, amount)?
                    .build())
            }
        }
    }

    fn token(&self, symbol_or_address: &str) -> FlowResult<&TokenInfo> {
        let registry = self.ctx.registry();
        registry.resolve_token(symbol_or_address).ok_or_else(|| {
            FlowError::Validation(format!(
                "unknown token {symbol_or_address} (supported tokens: {})",
                registry.supported_tokens().join(", ")
            ))
        })
    }

    fn account(&self) -> FlowResult<Address> {
        self.ctx
            .wallet()
            .accounts()
            .first()
            .copied()
            .ok_or_else(|| FlowError::from(WalletError::NotConnected))
    }

    async fn quote(&self, token_in: &TokenInfo, token_out: &TokenInfo, amount_in: U256) -> FlowResult<U256> {
        let router = self.ctx.registry().router().address;
        let no_liquidity = || {
            FlowError::Validation(format!(
                "no liquidity to quote {} -> {}",
                token_in.symbol, token_out.symbol
            ))
        };

        let amounts = self
            .ctx
            .ledger()
            .amounts_out(router, amount_in, vec![token_in.address, token_out.address])
            .await
            .map_err(|e| {
                tracing::warn!("Swap quote failed: {}", e);
                no_liquidity()
            })?;

        amounts
            .last()
            .copied()
            .filter(|out| !out.is_zero())
            .ok_or_else(no_liquidity)
    }
}

fn lock(flows: &FlowTable) -> std::sync::MutexGuard<'_, HashMap<FlowId, FlowHandle>> {
    flows.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Drop for FlowEngine {
    fn drop(&mut self) {
        self.account_watcher.abort();
    }
}

fn ensure_distinct(a: &TokenInfo, b: &TokenInfo) -> FlowResult<()> {
    if a.address == b.address {
        return Err(FlowError::Validation(format!(
            "both sides of the pair are {}",
            a.symbol
        )));
    }
    Ok(())
}

/// An explicit zero minimum is allowed and disables slippage protection.
fn parse_minimum(minimum: &str, decimals: u8) -> FlowResult<U256> {
    match minimum.trim().parse::<Decimal>() {
        Ok(value) if value.is_zero() => Ok(U256::ZERO),
        _ => parse_amount(minimum, decimals),
    }
}

/// Runs `flow` from `effect` until it reaches a terminal state or parks on cancellation.
async fn drive(ctx: Arc<AppContext>, flows: FlowTable, flow: FlowHandle, mut effect: Effect) {
    let id = flow.id();
    let cancel = flow.inner.cancel.clone();

    loop {
        let next = match effect {
            Effect::AcquireSigner(index) => {
                tracing::debug!(flow = %id, step = index, "Waiting for signing session");

                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return cancelled(&flow),
                    permit = ctx.signer().clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return cancelled(&flow),
                    },
                };

                let step = match flow.apply(FlowEvent::SignatureRequested) {
                    Ok(Effect::RequestSignature(step)) => step,
                    Ok(other) => {
                        tracing::error!(flow = %id, "Unexpected effect {:?}", other);
                        return;
                    }
                    // Cancelled while waiting for the session
                    Err(e) => {
                        tracing::debug!(flow = %id, "Not requesting signature: {}", e);
                        return;
                    }
                };

                let signed = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return cancelled(&flow),
                    signed = ctx.wallet().sign_and_broadcast(&step) => signed,
                };

                let event = match signed {
                    Ok(handle) => FlowEvent::Broadcast(handle),
                    Err(WalletError::Rejected(reason)) => FlowEvent::SignatureRejected(reason),
                    Err(e) => FlowEvent::BroadcastFailed(e.to_string()),
                };
                let broadcast = match &event {
                    FlowEvent::Broadcast(handle) => Some(*handle),
                    _ => None,
                };

                let next = flow.apply(event);
                drop(permit);

                match (next, broadcast) {
                    (Ok(next), _) => next,
                    (Err(e), Some(handle)) => {
                        tracing::warn!(
                            flow = %id,
                            "Transaction {} was broadcast after the flow ended: {}",
                            handle.hash,
                            e
                        );
                        return;
                    }
                    (Err(e), None) => {
                        tracing::debug!(flow = %id, "Dropping wallet outcome: {}", e);
                        return;
                    }
                }
            }

            Effect::AwaitConfirmation(index, handle) => {
                tracing::debug!(flow = %id, step = index, "Awaiting confirmation of {}", handle.hash);

                let event = match ctx.ledger().wait_for_confirmation(&handle).await {
                    Ok(receipt) => FlowEvent::Confirmed(receipt),
                    Err(RepositoryError::Reverted(reason))
                    | Err(RepositoryError::Dropped(reason)) => FlowEvent::Reverted(reason),
                    Err(RepositoryError::Timeout(_)) => FlowEvent::ConfirmationTimedOut,
                    // The transaction is out there; a failed poll says nothing about it
                    Err(e) => {
                        tracing::warn!(flow = %id, "Confirmation poll failed: {}", e);
                        FlowEvent::ConfirmationTimedOut
                    }
                };

                match flow.apply(event) {
                    Ok(next) => next,
                    Err(e) => {
                        tracing::error!(flow = %id, "Confirmation outcome rejected: {}", e);
                        return;
                    }
                }
            }

            Effect::AwaitRecheck(index, handle) => {
                flow.inner.recheck.notified().await;
                tracing::info!(flow = %id, step = index, "Rechecking {}", handle.hash);
                Effect::AwaitConfirmation(index, handle)
            }

            Effect::RequestSignature(step) => {
                tracing::error!(flow = %id, step = step.index, "Signature requested outside the signing session");
                return;
            }

            Effect::Completed => {
                ctx.mark_flow_completed();
                lock(&flows).remove(&id);
                tracing::debug!(flow = %id, "Discarded completed flow");
                return;
            }

            Effect::Halted(e) => {
                tracing::warn!(flow = %id, "Flow halted: {}", e);
                // Confirmed approvals already moved the router allowance
                let snapshot = flow.snapshot();
                if snapshot.steps.iter().any(|s| s.status == StepStatus::Confirmed) {
                    ctx.balances().invalidate();
                }
                return;
            }

            Effect::Cancelled => return,
        };

        effect = next;
    }
}

/// The token fired; make sure the machine agrees even when a session reset, not the
/// caller, cancelled the flow.
fn cancelled(flow: &FlowHandle) {
    if let Err(e) = flow.apply(FlowEvent::Cancel) {
        tracing::debug!(flow = %flow.id(), "Cancellation already recorded: {}", e);
    }
}

/// Resets the session when the wallet disconnects and drops the balance view on
/// account switches.
async fn watch_accounts(ctx: Arc<AppContext>) {
    let mut accounts = ctx.wallet().subscribe_accounts();
    let mut last = accounts.borrow_and_update().clone();

    while accounts.changed().await.is_ok() {
        let current = accounts.borrow_and_update().clone();
        if current.is_empty() {
            tracing::info!("Wallet disconnected, resetting session");
            ctx.reset();
        } else if current != last {
            tracing::info!("Account changed to {:?}", current.first());
            ctx.balances().invalidate();
        }
        last = current;
    }
}
