//! Multi-step, wallet-signed DEX operations.
//!
//! A flow is an ordered list of contract calls (approve, approve, add liquidity; or
//! approve, swap; or a single faucet call). Each step is signed by the wallet,
//! broadcast, and confirmed on the ledger before the next one starts.

pub mod amounts;
pub mod balances;
mod engine;
pub mod error;
pub mod machine;
mod plan;
pub mod quote;
pub mod types;


pub use balances::{BalanceSnapshot, BalanceTracker, PoolView, TokenBalanceView};
pub use engine::{FlowEngine, FlowHandle};
pub use error::FlowError;
pub use machine::{Effect, FlowEvent, FlowMachine};
pub use quote::{QuoteRefresher, QuoteResult};
pub use types::{
    FlowId, FlowKind, FlowRequest, FlowSnapshot, FlowStatus, Step, StepCall, StepKind, StepStatus,
};

pub type FlowResult<T> = std::result::Result<T, FlowError>;
