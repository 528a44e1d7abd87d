use std::str::FromStr;
use std::sync::Arc;

use alloy::primitives::Address;
use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::{Json, ServerHandler, tool, tool_handler, tool_router};
use rust_decimal::Decimal;
use tracing::instrument;

use crate::flow::amounts::{
    calculate_exchange_rate, calculate_minimum_output, calculate_price_impact, format_balance,
    parse_amount,
};
use crate::flow::{FlowEngine, FlowError, FlowId, FlowRequest};
use crate::registry::TokenInfo;
use crate::service::types::{
    AddLiquidityRequest, FaucetRequest, FlowIdRequest, FlowResponse, GetBalancesRequest,
    GetBalancesResponse, ListFlowsResponse, QuoteSwapRequest, QuoteSwapResponse,
    SwapTokensRequest, ToolResult, WalletResponse,
};
use crate::service::{ServiceError, ServiceResult};

/// MCP front end of the flow engine. One instance per client session; all of them
/// share the engine and therefore the signing session.
#[derive(Clone)]
pub struct DexService {
    tool_router: ToolRouter<Self>,
    engine: Arc<FlowEngine>,
}

// MCP Tool Layer
#[tool_router]
impl DexService {
    pub fn new(engine: Arc<FlowEngine>) -> Self {
        Self {
            tool_router: Self::tool_router(),
            engine,
        }
    }

    #[instrument(skip(self))]
    #[tool(
        description = "Native, token and router allowance balances of the connected account, plus pool reserves"
    )]
    pub async fn get_balances(
        &self,
        Parameters(req): Parameters<GetBalancesRequest>,
    ) -> Json<ToolResult<GetBalancesResponse>> {
        let result = self.get_balances_impl(req).await;
        if let Err(e) = &result {
            tracing::error!("Failed to get balances: {e}");
        }
        Json(result.into())
    }

    #[instrument(skip(self))]
    #[tool(description = "Quote a swap through the router. A newer quote supersedes older ones")]
    pub async fn quote_swap(
        &self,
        Parameters(req): Parameters<QuoteSwapRequest>,
    ) -> Json<ToolResult<QuoteSwapResponse>> {
        let result = self.quote_swap_impl(req).await;
        if let Err(e) = &result {
            tracing::error!("Failed to quote swap: {e}");
        }
        Json(result.into())
    }

    #[instrument(skip(self))]
    #[tool(
        description = "Start an add-liquidity flow: approve token A, approve token B, add liquidity. Each step is signed and confirmed before the next"
    )]
    pub async fn add_liquidity(
        &self,
        Parameters(req): Parameters<AddLiquidityRequest>,
    ) -> Json<ToolResult<FlowResponse>> {
        let result = self
            .start(FlowRequest::AddLiquidity {
                token_a: req.token_a,
                token_b: req.token_b,
                amount_a: req.amount_a,
                amount_b: req.amount_b,
            })
            .await;
        if let Err(e) = &result {
            tracing::error!("Failed to start add-liquidity flow: {e}");
        }
        Json(result.into())
    }

    #[instrument(skip(self))]
    #[tool(
        description = "Start a swap flow: approve the input token, then swap an exact input amount for at least the minimum output"
    )]
    pub async fn swap_tokens(
        &self,
        Parameters(req): Parameters<SwapTokensRequest>,
    ) -> Json<ToolResult<FlowResponse>> {
        let result = self.swap_tokens_impl(req).await;
        if let Err(e) = &result {
            tracing::error!("Failed to start swap flow: {e}");
        }
        Json(result.into())
    }

    #[instrument(skip(self))]
    #[tool(description = "Mint a test token, or deposit native coin into the wrapped token")]
    pub async fn faucet(
        &self,
        Parameters(req): Parameters<FaucetRequest>,
    ) -> Json<ToolResult<FlowResponse>> {
        let result = self
            .start(FlowRequest::Faucet {
                token: req.token,
                amount: req.amount,
            })
            .await;
        if let Err(e) = &result {
            tracing::error!("Failed to start faucet flow: {e}");
        }
        Json(result.into())
    }

    #[instrument(skip(self))]
    #[tool(
        description = "Current state of a flow and each of its steps. Completed flows are discarded and no longer found"
    )]
    pub async fn get_flow(
        &self,
        Parameters(req): Parameters<FlowIdRequest>,
    ) -> Json<ToolResult<FlowResponse>> {
        Json(self.get_flow_impl(&req.flow_id).into())
    }

    #[instrument(skip(self))]
    #[tool(description = "Running flows, plus failed and cancelled flows not yet dismissed")]
    pub async fn list_flows(&self) -> Json<ListFlowsResponse> {
        let mut flows = self.engine.flows();
        flows.sort_by_key(|f| f.id.to_string());
        Json(ListFlowsResponse {
            flows: flows.iter().map(FlowResponse::from).collect(),
        })
    }

    #[instrument(skip(self))]
    #[tool(
        description = "Cancel a flow whose active step has not been broadcast yet. Submitted transactions cannot be recalled"
    )]
    pub async fn cancel_flow(
        &self,
        Parameters(req): Parameters<FlowIdRequest>,
    ) -> Json<ToolResult<FlowResponse>> {
        let result = self.cancel_flow_impl(&req.flow_id);
        if let Err(e) = &result {
            tracing::warn!("Failed to cancel flow: {e}");
        }
        Json(result.into())
    }

    #[instrument(skip(self))]
    #[tool(description = "Poll a stalled confirmation again after it timed out")]
    pub async fn recheck_flow(
        &self,
        Parameters(req): Parameters<FlowIdRequest>,
    ) -> Json<ToolResult<FlowResponse>> {
        let result = self.recheck_flow_impl(&req.flow_id);
        if let Err(e) = &result {
            tracing::warn!("Failed to recheck flow: {e}");
        }
        Json(result.into())
    }

    #[instrument(skip(self))]
    #[tool(description = "Forget a failed or cancelled flow")]
    pub async fn dismiss_flow(
        &self,
        Parameters(req): Parameters<FlowIdRequest>,
    ) -> Json<ToolResult<FlowResponse>> {
        let result = flow_id(&req.flow_id)
            .and_then(|id| self.engine.dismiss(id).map_err(ServiceError::from))
            .map(|snapshot| FlowResponse::from(&snapshot));
        Json(result.into())
    }

    #[instrument(skip(self))]
    #[tool(description = "Connect the configured wallet account")]
    pub async fn connect_wallet(&self) -> Json<ToolResult<WalletResponse>> {
        let result = self
            .engine
            .context()
            .wallet()
            .connect()
            .await
            .map(|accounts| WalletResponse {
                accounts: accounts.iter().map(Address::to_string).collect(),
            })
            .map_err(|e| ServiceError::from(FlowError::from(e)));
        if let Err(e) = &result {
            tracing::error!("Failed to connect wallet: {e}");
        }
        Json(result.into())
    }

    #[instrument(skip(self))]
    #[tool(
        description = "Disconnect the wallet. Flows that have not broadcast their active step are cancelled"
    )]
    pub async fn disconnect_wallet(&self) -> Json<WalletResponse> {
        self.engine.context().wallet().disconnect().await;
        Json(WalletResponse { accounts: vec![] })
    }
}

// Business Logic - Core implementation
impl DexService {
    #[instrument(skip(self), err)]
    async fn get_balances_impl(&self, req: GetBalancesRequest) -> ServiceResult<GetBalancesResponse> {
        let ctx = self.engine.context();
        let account = self.account()?;

        let snapshot = match ctx.balances().view(account) {
            Some(snapshot) if !req.refresh => snapshot,
            _ => {
                tracing::info!("Reading balances for {}", account);
                ctx.balances().refresh(account).await?
            }
        };

        let registry = ctx.registry();
        Ok(GetBalancesResponse::from_snapshot(&snapshot, |symbol| {
            registry.token(symbol).map_or(18, |t| t.decimals)
        }))
    }

    #[instrument(skip(self), err)]
    async fn quote_swap_impl(&self, req: QuoteSwapRequest) -> ServiceResult<QuoteSwapResponse> {
        let ctx = self.engine.context();
        let token_in = self.token(&req.token_in)?;
        let token_out = self.token(&req.token_out)?;
        if token_in.address == token_out.address {
            return Err(ServiceError::InvalidRequest(format!(
                "both sides of the pair are {}",
                token_in.symbol
            )));
        }

        let amount_in = parse_amount(&req.amount_in, token_in.decimals)?;
        let slippage = match req.slippage_tolerance.as_deref() {
            Some(raw) => parse_slippage(raw)?,
            None => ctx.settings().default_slippage,
        };

        let generation = ctx.quotes().request(token_in.address, token_out.address, amount_in);
        let quote = ctx.quotes().wait_for(generation).await;
        if quote.generation != generation {
            return Err(ServiceError::InvalidState(format!(
                "quote {generation} was superseded by quote {}",
                quote.generation
            )));
        }

        let amount_out = quote.amount_out.ok_or_else(|| {
            ServiceError::InvalidRequest(format!(
                "no liquidity to quote {} -> {}",
                token_in.symbol, token_out.symbol
            ))
        })?;
        let minimum_output = calculate_minimum_output(amount_out, slippage)?;

        let factory = ctx.registry().factory().address;
        let price_impact = match ctx
            .ledger()
            .pair_reserves(factory, token_in.address, token_out.address)
            .await?
        {
            Some(reserves) => {
                calculate_price_impact(amount_in, amount_out, reserves.reserve_a, reserves.reserve_b)
            }
            None => "0".to_string(),
        };

        let response = QuoteSwapResponse {
            generation,
            amount_in: format_balance(amount_in, token_in.decimals),
            estimated_output: format_balance(amount_out, token_out.decimals),
            estimated_output_raw: amount_out.to_string(),
            minimum_output: format_balance(minimum_output, token_out.decimals),
            exchange_rate: calculate_exchange_rate(
                amount_in,
                amount_out,
                token_in.decimals,
                token_out.decimals,
            ),
            price_impact,
        };

        tracing::info!(
            "Quote {}: {} {} -> {} {} (impact {}%)",
            generation,
            response.amount_in,
            token_in.symbol,
            response.estimated_output,
            token_out.symbol,
            response.price_impact
        );

        Ok(response)
    }

    #[instrument(skip(self), err)]
    async fn swap_tokens_impl(&self, req: SwapTokensRequest) -> ServiceResult<FlowResponse> {
        let slippage = req
            .slippage_tolerance
            .as_deref()
            .map(parse_slippage)
            .transpose()?;

        self.start(FlowRequest::Swap {
            token_in: req.token_in,
            token_out: req.token_out,
            amount_in: req.amount_in,
            min_amount_out: req.min_amount_out,
            slippage,
        })
        .await
    }

    fn get_flow_impl(&self, raw_id: &str) -> ServiceResult<FlowResponse> {
        let handle = self.engine.get(flow_id(raw_id)?)?;
        Ok(FlowResponse::from(&handle.snapshot()))
    }

    fn cancel_flow_impl(&self, raw_id: &str) -> ServiceResult<FlowResponse> {
        let handle = self.engine.get(flow_id(raw_id)?)?;
        handle.cancel()?;
        tracing::info!("Cancelled flow {}", handle.id());
        Ok(FlowResponse::from(&handle.snapshot()))
    }

    fn recheck_flow_impl(&self, raw_id: &str) -> ServiceResult<FlowResponse> {
        let handle = self.engine.get(flow_id(raw_id)?)?;
        handle.recheck()?;
        Ok(FlowResponse::from(&handle.snapshot()))
    }

    async fn start(&self, request: FlowRequest) -> ServiceResult<FlowResponse> {
        let handle = self.engine.start_flow(request).await?;
        Ok(FlowResponse::from(&handle.snapshot()))
    }

    fn account(&self) -> ServiceResult<Address> {
        self.engine
            .context()
            .wallet()
            .accounts()
            .first()
            .copied()
            .ok_or(ServiceError::WalletNotConnected)
    }

    fn token(&self, symbol_or_address: &str) -> ServiceResult<&TokenInfo> {
        let registry = self.engine.context().registry();
        registry.resolve_token(symbol_or_address).ok_or_else(|| {
            tracing::warn!("Token not found in registry: {}", symbol_or_address);
            ServiceError::InvalidRequest(format!(
                "unknown token {} (supported tokens: {})",
                symbol_or_address,
                registry.supported_tokens().join(", ")
            ))
        })
    }
}

#[tool_handler]
impl ServerHandler for DexService {}

fn flow_id(raw: &str) -> ServiceResult<FlowId> {
    Ok(FlowId::from_str(raw)?)
}

fn parse_slippage(raw: &str) -> ServiceResult<Decimal> {
    Decimal::from_str(raw.trim())
        .map_err(|e| ServiceError::InvalidRequest(format!("Invalid slippage: {e}")))
}
