//! Test doubles shared by the scheduler tests.

use async_trait::async_trait;
use relaycast_core::error::{RelayError, Result};
use relaycast_core::traits::{CheckpointStore, DeliveryAdapter, ResponseGuard};
use relaycast_core::types::{Checkpoint, LinkPreview, MediaKind, MediaMessage, Presence};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::time::Instant;

use crate::store::MemoryStateStore;

/// What reached the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Text(String),
    Media {
        path: PathBuf,
        kind: MediaKind,
        caption: Option<String>,
        quoted: bool,
    },
    Audio(PathBuf),
    Contact(String),
    Link(String),
}

#[derive(Debug, Clone)]
pub struct SentRecord {
    pub to: String,
    pub what: Sent,
    pub at: Instant,
}

/// Delivery fake recording every successful send with its (virtual) time.
#[derive(Default)]
pub struct RecordingDelivery {
    sent: Mutex<Vec<SentRecord>>,
    presence: Mutex<Vec<(String, Presence)>>,
    fail_texts: Mutex<HashSet<String>>,
    fail_all: AtomicBool,
    attempts: AtomicUsize,
}

impl RecordingDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text sends with this exact content fail.
    pub fn failing_on(self, text: &str) -> Self {
        self.fail_texts.lock().unwrap().insert(text.to_string());
        self
    }

    pub fn set_fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn records(&self) -> Vec<SentRecord> {
        self.sent.lock().unwrap().clone()
    }

    pub fn texts_to(&self, to: &str) -> Vec<String> {
        self.records()
            .into_iter()
            .filter(|r| r.to == to)
            .filter_map(|r| match r.what {
                Sent::Text(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    pub fn presence_log(&self) -> Vec<(String, Presence)> {
        self.presence.lock().unwrap().clone()
    }

    fn record(&self, to: &str, what: Sent, fails: bool) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if fails || self.fail_all.load(Ordering::SeqCst) {
            return Err(RelayError::Delivery(format!("forced failure for {to}")));
        }
        self.sent.lock().unwrap().push(SentRecord {
            to: to.to_string(),
            what,
            at: Instant::now(),
        });
        Ok(())
    }
}

#[async_trait]
impl DeliveryAdapter for RecordingDelivery {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send_text(&self, to: &str, text: &str) -> Result<()> {
        let fails = self.fail_texts.lock().unwrap().contains(text);
        self.record(to, Sent::Text(text.to_string()), fails)
    }

    async fn send_media(&self, to: &str, media: &MediaMessage) -> Result<()> {
        let what = Sent::Media {
            path: media.path.clone(),
            kind: media.kind,
            caption: media.caption.clone(),
            quoted: media.quote.is_some(),
        };
        self.record(to, what, false)
    }

    async fn send_audio(
        &self,
        to: &str,
        path: &Path,
        _voice_note: bool,
        _caption: Option<&str>,
    ) -> Result<()> {
        self.record(to, Sent::Audio(path.to_path_buf()), false)
    }

    async fn send_contact(&self, to: &str, phone_number: &str, _display_name: &str) -> Result<()> {
        self.record(to, Sent::Contact(phone_number.to_string()), false)
    }

    async fn send_link_preview(&self, to: &str, link: &LinkPreview) -> Result<()> {
        self.record(to, Sent::Link(link.text.clone()), false)
    }

    async fn set_presence(&self, to: &str, presence: Presence) -> Result<()> {
        self.presence.lock().unwrap().push((to.to_string(), presence));
        Err(RelayError::Presence("presence is never delivered in tests".into()))
    }
}

/// Checkpoint store that starts failing after a number of successful saves.
pub struct FlakyCheckpoints {
    inner: MemoryStateStore,
    saves_left: AtomicUsize,
}

impl FlakyCheckpoints {
    pub fn failing_after(saves: usize) -> Self {
        Self {
            inner: MemoryStateStore::new(),
            saves_left: AtomicUsize::new(saves),
        }
    }
}

#[async_trait]
impl CheckpointStore for FlakyCheckpoints {
    async fn load(&self) -> Result<Vec<Checkpoint>> {
        self.inner.load().await
    }

    async fn get(&self, recipient_id: &str) -> Result<Option<Checkpoint>> {
        self.inner.get(recipient_id).await
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let left = self.saves_left.load(Ordering::SeqCst);
        if left == 0 {
            return Err(RelayError::Persistence("store unreachable".into()));
        }
        self.saves_left.store(left - 1, Ordering::SeqCst);
        self.inner.save(checkpoint).await
    }

    async fn clear(&self, recipient_id: &str) -> Result<()> {
        self.inner.clear(recipient_id).await
    }
}

/// Response guard whose writes always fail.
pub struct BrokenGuard;

#[async_trait]
impl ResponseGuard for BrokenGuard {
    async fn is_responded(&self, _recipient_id: &str) -> Result<bool> {
        Ok(false)
    }

    async fn mark_responded(&self, _recipient_id: &str) -> Result<()> {
        Err(RelayError::Persistence("guard unreachable".into()))
    }
}
