use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use rmcp::transport::SseServer;
use rmcp::transport::sse_server::SseServerConfig;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::context::AppContext;
use crate::flow::FlowEngine;
use crate::middleware::trace::http_trace_layer;
use crate::service::DexService;

/// Builds the HTTP router serving the DEX tools over SSE under `/dex`.
///
/// Every SSE session gets its own [`DexService`], but all of them drive the same
/// [`FlowEngine`], so flows and the signing session are shared across clients.
/// Must be called within a Tokio runtime.
pub fn build_app(
    cancellation_token: CancellationToken,
    config: &Config,
    ctx: Arc<AppContext>,
) -> anyhow::Result<Router> {
    let addr = config.server_uri().parse()?;

    let sse_config = SseServerConfig {
        bind: addr,
        sse_path: "/sse".to_string(),
        post_path: "/message".to_string(),
        ct: cancellation_token,
        sse_keep_alive: Some(Duration::from_secs(15)),
    };

    let (sse_server, sse_router) = SseServer::new(sse_config);

    let engine = Arc::new(FlowEngine::new(ctx));
    let dex_service = move || DexService::new(engine.clone());

    sse_server.with_service(dex_service);

    let app = Router::new()
        .route("/health", get(|| async move { StatusCode::OK }))
        .nest("/dex", sse_router)
        .layer(http_trace_layer());

    Ok(app)
}
