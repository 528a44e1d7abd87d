pub mod app;
pub mod config;
pub mod context;
pub mod flow;
pub mod middleware;
pub mod registry;
pub mod repository;
pub mod service;
pub mod wallet;

pub use app::build_app;
pub use context::AppContext;
pub use flow::{FlowEngine, FlowHandle, FlowRequest, FlowSnapshot};

// Re-export commonly used types for tests
pub use service::{
    AddLiquidityRequest, DexService, FaucetRequest, FlowIdRequest, FlowResponse,
    GetBalancesRequest, QuoteSwapRequest, SwapTokensRequest,
};
