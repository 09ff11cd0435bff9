//! # Relaycast Gateway
//! Inbound HTTP endpoint for transport webhooks.
//!
//! - `GET  /webhook/whatsapp`: Meta verification handshake
//! - `POST /webhook/whatsapp`: incoming messages, forwarded over an mpsc channel
//! - `GET  /health`

pub mod routes;
pub mod server;

pub use server::{GatewayState, build_router, start};
