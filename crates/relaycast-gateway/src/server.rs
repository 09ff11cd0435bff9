//! HTTP server implementation using Axum.

use axum::Router;
use axum::routing::get;
use relaycast_core::config::GatewayConfig;
use relaycast_core::types::InboundMessage;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Shared state for the gateway server.
pub struct GatewayState {
    /// Expected `hub.verify_token` for the GET handshake.
    pub verify_token: String,
    /// Meta app secret; empty disables signature checks.
    pub app_secret: String,
    /// Parsed inbound messages go here.
    pub inbound: mpsc::Sender<InboundMessage>,
}

impl GatewayState {
    pub fn new(
        verify_token: impl Into<String>,
        app_secret: impl Into<String>,
        inbound: mpsc::Sender<InboundMessage>,
    ) -> Self {
        Self {
            verify_token: verify_token.into(),
            app_secret: app_secret.into(),
            inbound,
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route("/health", get(super::routes::health_check))
        .route(
            "/webhook/whatsapp",
            get(super::routes::whatsapp_webhook_verify).post(super::routes::whatsapp_webhook),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Start the HTTP server; returns once `cancel` fires and in-flight
/// requests have drained.
pub async fn start(
    config: &GatewayConfig,
    state: GatewayState,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let app = build_router(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("🌐 Gateway listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    tracing::info!("🌐 Gateway stopped");
    Ok(())
}
