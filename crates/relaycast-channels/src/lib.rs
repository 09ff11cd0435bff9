//! # Relaycast Channels
//! Delivery adapters: the only code that talks to a messaging transport.
//!
//! - `whatsapp`: WhatsApp Business Cloud API (send + webhook parsing)
//! - `console`: dry-run transport that only logs

pub mod console;
pub mod whatsapp;

pub use console::ConsoleAdapter;
pub use whatsapp::{WhatsAppCloudAdapter, parse_webhook, verify_signature};
