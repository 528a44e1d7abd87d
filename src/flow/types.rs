use std::fmt;
use std::str::FromStr;

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol_types::SolCall;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::FlowError;
use crate::registry::FunctionSpec;
use crate::repository::contract::{IERC20, IUniswapV2Router02, IWBTC};
use crate::repository::{Receipt, TxHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    ApproveTokenA,
    ApproveTokenB,
    AddLiquidity,
    Swap,
    Mint,
    Deposit,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::ApproveTokenA => "approve_token_a",
            StepKind::ApproveTokenB => "approve_token_b",
            StepKind::AddLiquidity => "add_liquidity",
            StepKind::Swap => "swap",
            StepKind::Mint => "mint",
            StepKind::Deposit => "deposit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepStatus {
    Pending,
    AwaitingSignature,
    Submitted,
    Confirmed,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::AwaitingSignature => "awaiting_signature",
            StepStatus::Submitted => "submitted",
            StepStatus::Confirmed => "confirmed",
            StepStatus::Failed => "failed",
        }
    }
}

/// Typed arguments of the contract call a step makes.
#[derive(Clone)]
pub enum StepCall {
    Approve(IERC20::approveCall),
    AddLiquidity(IUniswapV2Router02::addLiquidityCall),
    Swap(IUniswapV2Router02::swapExactTokensForTokensCall),
    Mint(IERC20::mintCall),
    Deposit(IWBTC::depositCall),
}

impl StepCall {
    pub fn function(&self) -> FunctionSpec {
        match self {
            StepCall::Approve(_) => FunctionSpec::of::<IERC20::approveCall>(),
            StepCall::AddLiquidity(_) => FunctionSpec::of::<IUniswapV2Router02::addLiquidityCall>(),
            StepCall::Swap(_) => {
                FunctionSpec::of::<IUniswapV2Router02::swapExactTokensForTokensCall>()
            }
            StepCall::Mint(_) => FunctionSpec::of::<IERC20::mintCall>(),
            StepCall::Deposit(_) => FunctionSpec::of::<IWBTC::depositCall>(),
        }
    }

    /// ABI-encoded calldata, selector included.
    pub fn calldata(&self) -> Bytes {
        match self {
            StepCall::Approve(call) => call.abi_encode().into(),
            StepCall::AddLiquidity(call) => call.abi_encode().into(),
            StepCall::Swap(call) => call.abi_encode().into(),
            StepCall::Mint(call) => call.abi_encode().into(),
            StepCall::Deposit(call) => call.abi_encode().into(),
        }
    }
}

// sol! call structs carry no Debug impl
impl fmt::Debug for StepCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepCall::Approve(call) => f
                .debug_struct("Approve")
                .field("spender", &call.spender)
                .field("amount", &call.amount)
                .finish(),
            StepCall::AddLiquidity(call) => f
                .debug_struct("AddLiquidity")
                .field("token_a", &call.tokenA)
                .field("token_b", &call.tokenB)
                .field("amount_a", &call.amountADesired)
                .field("amount_b", &call.amountBDesired)
                .field("deadline", &call.deadline)
                .finish(),
            StepCall::Swap(call) => f
                .debug_struct("Swap")
                .field("amount_in", &call.amountIn)
                .field("amount_out_min", &call.amountOutMin)
                .field("path", &call.path)
                .field("deadline", &call.deadline)
                .finish(),
            StepCall::Mint(call) => f
                .debug_struct("Mint")
                .field("to", &call.to)
                .field("amount", &call.amount)
                .finish(),
            StepCall::Deposit(_) => f.write_str("Deposit"),
        }
    }
}

/// One signed contract call inside a flow.
///
/// Everything except `status`, `tx`, `receipt` and `error` is fixed at construction.
#[derive(Debug, Clone)]
pub struct Step {
    pub index: usize,
    pub kind: StepKind,
    pub target: Address,
    pub selector: [u8; 4],
    pub call: StepCall,
    /// Native value attached to the call (payable `deposit` only).
    pub value: Option<U256>,
    pub status: StepStatus,
    pub tx: Option<TxHandle>,
    pub receipt: Option<Receipt>,
    pub error: Option<FlowError>,
}

impl Step {
    pub fn new(index: usize, kind: StepKind, target: Address, call: StepCall) -> Self {
        Self {
            index,
            kind,
            target,
            selector: call.function().selector,
            call,
            value: None,
            status: StepStatus::Pending,
            tx: None,
            receipt: None,
            error: None,
        }
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = Some(value);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowKind {
    AddLiquidity,
    Swap,
    Faucet,
}

impl FlowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowKind::AddLiquidity => "add_liquidity",
            FlowKind::Swap => "swap",
            FlowKind::Faucet => "faucet",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowStatus {
    Running,
    Complete,
    Failed,
    Cancelled,
}

impl FlowStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, FlowStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FlowStatus::Running => "running",
            FlowStatus::Complete => "complete",
            FlowStatus::Failed => "failed",
            FlowStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlowId(Uuid);

impl FlowId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FlowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for FlowId {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| FlowError::Validation(format!("invalid flow id {s:?}: {e}")))
    }
}

/// Point-in-time copy of a flow, published after every transition.
#[derive(Debug, Clone)]
pub struct FlowSnapshot {
    pub id: FlowId,
    pub kind: FlowKind,
    pub status: FlowStatus,
    /// Set while the active step's confirmation wait has timed out and awaits a recheck.
    pub stalled: bool,
    pub steps: Vec<Step>,
    pub error: Option<FlowError>,
}

impl FlowSnapshot {
    /// The first step that has not confirmed yet.
    pub fn active_step(&self) -> Option<&Step> {
        self.steps
            .iter()
            .find(|s| s.status != StepStatus::Confirmed)
    }
}

/// What a caller asks the engine to do. Amounts are human-readable decimal strings;
/// tokens are registry symbols or registered token addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowRequest {
    AddLiquidity {
        token_a: String,
        token_b: String,
        amount_a: String,
        amount_b: String,
    },
    Swap {
        token_in: String,
        token_out: String,
        amount_in: String,
        /// Explicit minimum output; quoted with slippage when absent.
        min_amount_out: Option<String>,
        /// Percent; the configured default when absent.
        slippage: Option<Decimal>,
    },
    Faucet {
        token: String,
        amount: String,
    },
}

impl FlowRequest {
    pub fn kind(&self) -> FlowKind {
        match self {
            FlowRequest::AddLiquidity { .. } => FlowKind::AddLiquidity,
            FlowRequest::Swap { .. } => FlowKind::Swap,
            FlowRequest::Faucet { .. } => FlowKind::Faucet,
        }
    }
}
