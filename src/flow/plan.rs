use alloy::primitives::{Address, U256};

use super::types::{Step, StepCall, StepKind};
use super::FlowResult;
use crate::registry::{ContractRegistry, TokenInfo};
use crate::repository::contract::{IERC20, IUniswapV2Router02, IWBTC};

/// Builds the ordered call plan of a flow, checking each call against the registry.
pub(crate) struct PlanBuilder<'a> {
    registry: &'a ContractRegistry,
    steps: Vec<Step>,
}

impl<'a> PlanBuilder<'a> {
    pub(crate) fn new(registry: &'a ContractRegistry) -> Self {
        Self {
            registry,
            steps: Vec::new(),
        }
    }

    fn push(
        mut self,
        kind: StepKind,
        target: Address,
        call: StepCall,
        value: Option<U256>,
    ) -> FlowResult<Self> {
        self.registry.ensure_callable(target, call.function())?;

        let mut step = Step::new(self.steps.len(), kind, target, call);
        if let Some(value) = value {
            step = step.with_value(value);
        }
        self.steps.push(step);
        Ok(self)
    }

    /// Allow the router to pull exactly `amount` of `token`.
    pub(crate) fn approve(self, kind: StepKind, token: &TokenInfo, amount: U256) -> FlowResult<Self> {
        let spender = self.registry.router().address;
        self.push(
            kind,
            token.address,
            StepCall::Approve(IERC20::approveCall { spender, amount }),
            None,
        )
    }

    pub(crate) fn add_liquidity(
        self,
        token_a: &TokenInfo,
        token_b: &TokenInfo,
        amount_a: U256,
        amount_b: U256,
        to: Address,
        deadline: U256,
    ) -> FlowResult<Self> {
        let router = self.registry.router().address;
        self.push(
            StepKind::AddLiquidity,
            router,
            StepCall::AddLiquidity(IUniswapV2Router02::addLiquidityCall {
                tokenA: token_a.address,
                tokenB: token_b.address,
                amountADesired: amount_a,
                amountBDesired: amount_b,
                // The first deposit sets the price, so any ratio is accepted
                amountAMin: U256::ZERO,
                amountBMin: U256::ZERO,
                to,
                deadline,
            }),
            None,
        )
    }

    pub(crate) fn swap(
        self,
        token_in: &TokenInfo,
        token_out: &TokenInfo,
        amount_in: U256,
        amount_out_min: U256,
        to: Address,
        deadline: U256,
    ) -> FlowResult<Self> {
        let router = self.registry.router().address;
        self.push(
            StepKind::Swap,
            router,
            StepCall::Swap(IUniswapV2Router02::swapExactTokensForTokensCall {
                amountIn: amount_in,
                amountOutMin: amount_out_min,
                path: vec![token_in.address, token_out.address],
                to,
                deadline,
            }),
            None,
        )
    }

    /// Wrapped tokens are funded by depositing native coin; test tokens are minted.
    pub(crate) fn faucet(self, token: &TokenInfo, to: Address, amount: U256) -> FlowResult<Self> {
        if token.wrapped {
            self.push(
                StepKind::Deposit,
                token.address,
                StepCall::Deposit(IWBTC::depositCall {}),
                Some(amount),
            )
        } else {
            self.push(
                StepKind::Mint,
                token.address,
                StepCall::Mint(IERC20::mintCall { to, amount }),
                None,
            )
        }
    }

    pub(crate) fn build(self) -> Vec<Step> {
        self.steps
    }
}
