use std::sync::Arc;

use btc_dex_flows::build_app;
use btc_dex_flows::config::Config;
use btc_dex_flows::context::AppContext;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "debug,alloy=info,rmcp=info".into());

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::debug!("debug logging enabled");

    let config = Config::from_yaml("config/default.yaml")
        .await
        .expect("failed to load configuration");

    let ctx = AppContext::initialize(&config).expect("failed to initialize application context");

    let cancellation_token = CancellationToken::new();
    let addr = config.server_uri();

    let app = build_app(cancellation_token.clone(), &config, ctx.clone())
        .expect("failed to build app");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind TCP listener");

    tracing::info!("listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancellation_token, ctx))
        .await
        .expect("failed to start server")
}

/// Waits for Ctrl+C or SIGTERM, then ends the wallet session and stops the SSE server.
///
/// Flows still waiting for a signature are cancelled; transactions already broadcast
/// are left to the node.
async fn shutdown_signal(cancellation_token: CancellationToken, ctx: Arc<AppContext>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!(
        "shutdown signal received after {} completed flows, cancelling tasks...",
        ctx.completed_flows()
    );
    ctx.reset();
    cancellation_token.cancel();
}
