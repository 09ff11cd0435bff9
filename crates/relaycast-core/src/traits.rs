//! Collaborator traits: the seams between the engine, storage and transport.

use async_trait::async_trait;
use std::path::Path;

use crate::error::Result;
use crate::types::{Checkpoint, LinkPreview, MediaMessage, Presence};

/// The only component that touches the messaging transport.
#[async_trait]
pub trait DeliveryAdapter: Send + Sync {
    /// Adapter name for logs.
    fn name(&self) -> &str;

    async fn send_text(&self, to: &str, text: &str) -> Result<()>;

    async fn send_media(&self, to: &str, media: &MediaMessage) -> Result<()>;

    async fn send_audio(
        &self,
        to: &str,
        path: &Path,
        voice_note: bool,
        caption: Option<&str>,
    ) -> Result<()>;

    async fn send_contact(&self, to: &str, phone_number: &str, display_name: &str) -> Result<()>;

    async fn send_link_preview(&self, to: &str, link: &LinkPreview) -> Result<()>;

    /// Best-effort typing/recording indicator.
    async fn set_presence(&self, to: &str, presence: Presence) -> Result<()>;
}

/// Durable recipient → next-step mapping for in-flight sequences.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Snapshot of every in-flight recipient, read once at boot.
    async fn load(&self) -> Result<Vec<Checkpoint>>;

    async fn get(&self, recipient_id: &str) -> Result<Option<Checkpoint>>;

    /// Whole-record overwrite.
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()>;

    async fn clear(&self, recipient_id: &str) -> Result<()>;
}

/// Append-only set of recipients already routed into a sequence once.
#[async_trait]
pub trait ResponseGuard: Send + Sync {
    async fn is_responded(&self, recipient_id: &str) -> Result<bool>;

    /// Idempotent.
    async fn mark_responded(&self, recipient_id: &str) -> Result<()>;
}

/// Per-group timestamp of the last successful broadcast.
#[async_trait]
pub trait LastSentStore: Send + Sync {
    async fn last_sent_ms(&self, group_id: &str) -> Result<Option<i64>>;

    async fn record_sent(&self, group_id: &str, at_ms: i64) -> Result<()>;
}

/// "Already engaged via another channel" predicate, e.g. an active paying account.
#[async_trait]
pub trait EngagementCheck: Send + Sync {
    /// `Some(reason)` when the recipient must not enter a sequence.
    async fn engaged_reason(&self, recipient_id: &str) -> Result<Option<String>>;
}
