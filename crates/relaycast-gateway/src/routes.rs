//! Webhook route handlers.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use relaycast_channels::whatsapp::{parse_webhook, verify_signature};
use std::collections::HashMap;
use std::sync::Arc;

use crate::server::GatewayState;

/// Health check endpoint.
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "relaycast",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// WhatsApp webhook verification (GET), the handshake Meta runs on setup.
pub async fn whatsapp_webhook_verify(
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<GatewayState>>,
) -> Response {
    let mode = params.get("hub.mode").map(|s| s.as_str()).unwrap_or("");
    let token = params
        .get("hub.verify_token")
        .map(|s| s.as_str())
        .unwrap_or("");
    let challenge = params
        .get("hub.challenge")
        .cloned()
        .unwrap_or_default();

    if mode == "subscribe" && !state.verify_token.is_empty() && token == state.verify_token {
        tracing::info!("✅ WhatsApp webhook verified");
        (StatusCode::OK, challenge).into_response()
    } else {
        tracing::warn!("⚠️ WhatsApp webhook verification rejected (mode={mode})");
        (StatusCode::FORBIDDEN, "Forbidden").into_response()
    }
}

/// WhatsApp webhook handler (POST) for incoming messages.
///
/// Messages are handed to the inbound channel in the background; Meta
/// expects a quick 200.
pub async fn whatsapp_webhook(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers
        .get("X-Hub-Signature-256")
        .and_then(|v| v.to_str().ok());
    if !verify_signature(&state.app_secret, &body, signature) {
        tracing::warn!("🔒 WhatsApp webhook signature mismatch");
        return (StatusCode::UNAUTHORIZED, "invalid signature").into_response();
    }

    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!("⚠️ WhatsApp webhook: invalid JSON: {e}");
            return (StatusCode::BAD_REQUEST, "invalid json").into_response();
        }
    };

    let messages = parse_webhook(&payload);
    let count = messages.len();
    if count > 0 {
        tracing::debug!("📥 WhatsApp webhook: {count} message(s)");
        let tx = state.inbound.clone();
        tokio::spawn(async move {
            for msg in messages {
                if tx.send(msg).await.is_err() {
                    tracing::warn!("⚠️ Inbound channel closed, dropping webhook messages");
                    break;
                }
            }
        });
    }

    Json(serde_json::json!({"status": "ok", "received": count})).into_response()
}
