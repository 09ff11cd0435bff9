//! # Relaycast Core
//!
//! Shared building blocks for the sequence engine, the broadcast scheduler
//! and the transport adapters: the error taxonomy, configuration, the data
//! model and the collaborator traits every other crate plugs into.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use error::{RelayError, Result};
pub use traits::{CheckpointStore, DeliveryAdapter, EngagementCheck, LastSentStore, ResponseGuard};
