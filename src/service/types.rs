use rmcp::schemars::{self, JsonSchema};
use serde::{Deserialize, Serialize};

use crate::flow::amounts::format_balance;
use crate::flow::{BalanceSnapshot, FlowSnapshot, Step};
use crate::service::ServiceError;

/// Tool output: either the response or the error that prevented it.
#[derive(Debug, JsonSchema, Serialize)]
#[serde(untagged)]
pub enum ToolResult<T> {
    Success(T),
    Error { error: ServiceError },
}

impl<T> ToolResult<T> {
    pub fn into_result(self) -> Result<T, ServiceError> {
        match self {
            ToolResult::Success(response) => Ok(response),
            ToolResult::Error { error } => Err(error),
        }
    }
}

impl<T> From<Result<T, ServiceError>> for ToolResult<T> {
    fn from(result: Result<T, ServiceError>) -> Self {
        match result {
            Ok(response) => ToolResult::Success(response),
            Err(error) => ToolResult::Error { error },
        }
    }
}

// Requests

#[derive(Debug, Default, JsonSchema, Serialize, Deserialize)]
pub struct GetBalancesRequest {
    /// Read fresh balances even if the cached view is still current
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Debug, JsonSchema, Serialize, Deserialize)]
pub struct QuoteSwapRequest {
    /// Input token symbol or address (e.g., "WBTC")
    pub token_in: String,
    /// Output token symbol or address (e.g., "TBTC")
    pub token_out: String,
    /// Amount to sell in human-readable format (e.g., "0.01")
    pub amount_in: String,
    /// Slippage tolerance in percentage (e.g., "0.5" for 0.5%). Defaults to the configured value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slippage_tolerance: Option<String>,
}

#[derive(Debug, JsonSchema, Serialize, Deserialize)]
pub struct AddLiquidityRequest {
    /// First token symbol or address
    pub token_a: String,
    /// Second token symbol or address
    pub token_b: String,
    /// Amount of token A to deposit (e.g., "1.5")
    pub amount_a: String,
    /// Amount of token B to deposit (e.g., "100")
    pub amount_b: String,
}

#[derive(Debug, JsonSchema, Serialize, Deserialize)]
pub struct SwapTokensRequest {
    /// Input token symbol or address
    pub token_in: String,
    /// Output token symbol or address
    pub token_out: String,
    /// Exact amount to sell in human-readable format
    pub amount_in: String,
    /// Minimum output accepted, human-readable. When absent the router is quoted and
    /// the slippage tolerance applied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_amount_out: Option<String>,
    /// Slippage tolerance in percentage (e.g., "0.5" for 0.5%)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slippage_tolerance: Option<String>,
}

#[derive(Debug, JsonSchema, Serialize, Deserialize)]
pub struct FaucetRequest {
    /// Token to fund: test tokens are minted, the wrapped coin is deposited
    pub token: String,
    /// Amount in human-readable format
    pub amount: String,
}

#[derive(Debug, JsonSchema, Serialize, Deserialize)]
pub struct FlowIdRequest {
    /// Flow id returned when the flow was started
    pub flow_id: String,
}

// Responses

#[derive(Debug, JsonSchema, Serialize)]
pub struct TokenBalanceResponse {
    pub symbol: String,
    pub address: String,
    pub decimals: u8,
    /// Raw balance value
    pub balance: String,
    /// Balance formatted with proper decimals
    pub formatted_balance: String,
    /// Amount the router may currently spend, formatted
    pub router_allowance: String,
}

#[derive(Debug, JsonSchema, Serialize)]
pub struct PoolResponse {
    pub token_a: String,
    pub token_b: String,
    /// Pair contract, absent until the pool receives liquidity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pair: Option<String>,
    pub reserve_a: String,
    pub reserve_b: String,
    /// Token B per token A, "0" for an empty pool
    pub price: String,
}

#[derive(Debug, JsonSchema, Serialize)]
pub struct GetBalancesResponse {
    pub account: String,
    /// Native coin balance, formatted
    pub native_balance: String,
    pub tokens: Vec<TokenBalanceResponse>,
    pub pools: Vec<PoolResponse>,
    /// Number of completed flows when the balances were read
    pub epoch: u64,
    /// RFC 3339 timestamp of the read
    pub read_at: String,
}

impl GetBalancesResponse {
    pub fn from_snapshot(snapshot: &BalanceSnapshot, pool_decimals: impl Fn(&str) -> u8) -> Self {
        Self {
            account: snapshot.account.to_string(),
            native_balance: format_balance(snapshot.native, 18),
            tokens: snapshot
                .tokens
                .iter()
                .map(|t| TokenBalanceResponse {
                    symbol: t.symbol.clone(),
                    address: t.address.to_string(),
                    decimals: t.decimals,
                    balance: t.balance.to_string(),
                    formatted_balance: format_balance(t.balance, t.decimals),
                    router_allowance: format_balance(t.router_allowance, t.decimals),
                })
                .collect(),
            pools: snapshot
                .pools
                .iter()
                .map(|p| {
                    let (decimals_a, decimals_b) = (pool_decimals(&p.token_a), pool_decimals(&p.token_b));
                    PoolResponse {
                        token_a: p.token_a.clone(),
                        token_b: p.token_b.clone(),
                        pair: p.pair.map(|a| a.to_string()),
                        reserve_a: format_balance(p.reserve_a, decimals_a),
                        reserve_b: format_balance(p.reserve_b, decimals_b),
                        price: crate::flow::amounts::calculate_exchange_rate(
                            p.reserve_a,
                            p.reserve_b,
                            decimals_a,
                            decimals_b,
                        ),
                    }
                })
                .collect(),
            epoch: snapshot.epoch,
            read_at: snapshot.read_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, JsonSchema, Serialize)]
pub struct QuoteSwapResponse {
    /// Quote generation; later quotes supersede earlier ones
    pub generation: u64,
    pub amount_in: String,
    /// Estimated output amount (formatted with decimals)
    pub estimated_output: String,
    /// Estimated output amount (raw)
    pub estimated_output_raw: String,
    /// Minimum output amount after slippage (formatted)
    pub minimum_output: String,
    /// Exchange rate (output per input)
    pub exchange_rate: String,
    /// Price impact percentage
    pub price_impact: String,
}

#[derive(Debug, JsonSchema, Serialize)]
pub struct StepResponse {
    pub index: usize,
    /// approve_token_a, approve_token_b, add_liquidity, swap, mint or deposit
    pub kind: String,
    /// pending, awaiting_signature, submitted, confirmed or failed
    pub status: String,
    /// Contract the step calls
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ServiceError>,
}

impl From<&Step> for StepResponse {
    fn from(step: &Step) -> Self {
        Self {
            index: step.index,
            kind: step.kind.as_str().to_string(),
            status: step.status.as_str().to_string(),
            target: step.target.to_string(),
            tx_hash: step.tx.map(|tx| tx.hash.to_string()),
            block_number: step.receipt.as_ref().and_then(|r| r.block_number),
            error: step.error.clone().map(ServiceError::from),
        }
    }
}

#[derive(Debug, JsonSchema, Serialize)]
pub struct FlowResponse {
    pub flow_id: String,
    /// add_liquidity, swap or faucet
    pub kind: String,
    /// running, complete, failed or cancelled
    pub status: String,
    /// The active step's confirmation timed out; call recheck_flow to poll again
    pub stalled: bool,
    pub steps: Vec<StepResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ServiceError>,
}

impl From<&FlowSnapshot> for FlowResponse {
    fn from(snapshot: &FlowSnapshot) -> Self {
        Self {
            flow_id: snapshot.id.to_string(),
            kind: snapshot.kind.as_str().to_string(),
            status: snapshot.status.as_str().to_string(),
            stalled: snapshot.stalled,
            steps: snapshot.steps.iter().map(StepResponse::from).collect(),
            error: snapshot.error.clone().map(ServiceError::from),
        }
    }
}

#[derive(Debug, JsonSchema, Serialize)]
pub struct ListFlowsResponse {
    pub flows: Vec<FlowResponse>,
}

#[derive(Debug, JsonSchema, Serialize)]
pub struct WalletResponse {
    /// Connected accounts; empty when disconnected
    pub accounts: Vec<String>,
}
