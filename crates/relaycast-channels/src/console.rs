//! Console adapter: dry-run transport that logs every send.
//!
//! Media and audio steps still fail when the file is missing, so a dry run
//! surfaces the same skips a live run would.

use async_trait::async_trait;
use relaycast_core::error::{RelayError, Result};
use relaycast_core::traits::DeliveryAdapter;
use relaycast_core::types::{LinkPreview, MediaMessage, Presence};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Default)]
pub struct ConsoleAdapter {
    sent: AtomicUsize,
}

impl ConsoleAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Successful sends so far.
    pub fn sent_count(&self) -> usize {
        self.sent.load(Ordering::Relaxed)
    }

    fn require_file(path: &Path) -> Result<()> {
        if path.is_file() {
            Ok(())
        } else {
            Err(RelayError::Delivery(format!("file not found: {}", path.display())))
        }
    }

    fn count(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl DeliveryAdapter for ConsoleAdapter {
    fn name(&self) -> &str {
        "console"
    }

    async fn send_text(&self, to: &str, text: &str) -> Result<()> {
        tracing::info!("💬 [dry-run] → {to}: {text}");
        self.count();
        Ok(())
    }

    async fn send_media(&self, to: &str, media: &MediaMessage) -> Result<()> {
        Self::require_file(&media.path)?;
        tracing::info!(
            "🖼️ [dry-run] → {to}: {} {} caption={:?}{}",
            media.kind,
            media.path.display(),
            media.caption.as_deref().unwrap_or(""),
            if media.quote.is_some() { " (quoted)" } else { "" }
        );
        self.count();
        Ok(())
    }

    async fn send_audio(
        &self,
        to: &str,
        path: &Path,
        voice_note: bool,
        _caption: Option<&str>,
    ) -> Result<()> {
        Self::require_file(path)?;
        let kind = if voice_note { "voice note" } else { "audio" };
        tracing::info!("🎙️ [dry-run] → {to}: {kind} {}", path.display());
        self.count();
        Ok(())
    }

    async fn send_contact(&self, to: &str, phone_number: &str, display_name: &str) -> Result<()> {
        tracing::info!("📇 [dry-run] → {to}: contact {display_name} ({phone_number})");
        self.count();
        Ok(())
    }

    async fn send_link_preview(&self, to: &str, link: &LinkPreview) -> Result<()> {
        tracing::info!("🔗 [dry-run] → {to}: {} [{}]", link.text, link.title);
        self.count();
        Ok(())
    }

    async fn set_presence(&self, to: &str, presence: Presence) -> Result<()> {
        tracing::debug!("[dry-run] {to} presence: {presence}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaycast_core::types::MediaKind;

    #[tokio::test]
    async fn test_missing_media_is_delivery_error() {
        let console = ConsoleAdapter::new();
        let media = MediaMessage {
            path: "/definitely/not/here.jpg".into(),
            kind: MediaKind::Image,
            caption: None,
            quote: None,
        };
        let err = console.send_media("x", &media).await.unwrap_err();
        assert!(matches!(err, RelayError::Delivery(_)));
        assert_eq!(console.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_existing_files_are_sent() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("hello.ogg");
        std::fs::write(&audio, b"ogg").unwrap();

        let console = ConsoleAdapter::new();
        console.send_text("x", "hi").await.unwrap();
        console.send_audio("x", &audio, true, None).await.unwrap();
        console.send_contact("x", "+5551", "Sales").await.unwrap();
        assert_eq!(console.sent_count(), 3);
    }
}
