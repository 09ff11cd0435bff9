//! Broadcast scheduler: one timer task per group.
//!
//! The first fire catches up from the persisted last-sent time (and may be
//! deferred by the quiet window). Later fires run on a fixed period from the
//! first one. `last_sent_ms` is only written after a successful send.

use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use relaycast_core::error::{RelayError, Result};
use relaycast_core::traits::{DeliveryAdapter, LastSentStore};
use relaycast_core::types::{BroadcastTarget, MediaMessage, QuoteDecoration};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::media::MediaPool;
use crate::quiet::QuietWindow;

/// Wall clock used for last-sent bookkeeping and the quiet window.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Milliseconds to wait before the first fire: `max(0, interval - elapsed)`.
/// A group that was never sent to fires immediately. A last send stamped in
/// the future waits at most one interval.
pub fn catch_up_delay_ms(now_ms: i64, last_sent_ms: Option<i64>, interval_ms: i64) -> i64 {
    match last_sent_ms {
        Some(last) => interval_ms
            .saturating_sub(now_ms.saturating_sub(last))
            .clamp(0, interval_ms.max(0)),
        None => 0,
    }
}

/// Message bodies, media and the quote decoration shared by every group.
#[derive(Debug)]
pub struct BroadcastContent {
    messages: Vec<String>,
    media: MediaPool,
    quote: Option<QuoteDecoration>,
}

impl BroadcastContent {
    pub fn new(messages: Vec<String>, media: MediaPool, quote: Option<QuoteDecoration>) -> Result<Self> {
        let messages: Vec<String> = messages
            .into_iter()
            .filter(|m| !m.trim().is_empty())
            .collect();
        if messages.is_empty() {
            return Err(RelayError::Config("broadcast needs at least one message".into()));
        }
        if media.is_empty() {
            return Err(RelayError::Config(
                "broadcast needs at least one image or video".into(),
            ));
        }
        Ok(Self {
            messages,
            media,
            quote,
        })
    }

    pub fn media(&self) -> &MediaPool {
        &self.media
    }

    /// Random body (newline-prefixed caption) on a random image or video.
    pub fn compose(&self, rng: &mut StdRng) -> Option<MediaMessage> {
        let body = self.messages.choose(rng)?;
        let (path, kind) = self.media.pick(rng)?;
        Some(MediaMessage {
            path,
            kind,
            caption: Some(format!("\n{body}")),
            quote: self.quote.clone(),
        })
    }
}

pub struct BroadcastScheduler {
    delivery: Arc<dyn DeliveryAdapter>,
    last_sent: Arc<dyn LastSentStore>,
    content: BroadcastContent,
    quiet: Option<QuietWindow>,
    clock: Clock,
    cancel: CancellationToken,
    rng: Mutex<StdRng>,
}

impl BroadcastScheduler {
    pub fn new(
        delivery: Arc<dyn DeliveryAdapter>,
        last_sent: Arc<dyn LastSentStore>,
        content: BroadcastContent,
    ) -> Self {
        Self {
            delivery,
            last_sent,
            content,
            quiet: None,
            clock: system_clock(),
            cancel: CancellationToken::new(),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_quiet_window(mut self, quiet: Option<QuietWindow>) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    /// First fire instant for a target, quiet window applied.
    pub async fn next_fire(&self, target: &BroadcastTarget) -> Result<DateTime<Utc>> {
        let now = (self.clock)();
        let last = self.last_sent.last_sent_ms(&target.group_id).await?;
        let raw = catch_up_delay_ms(now.timestamp_millis(), last, target.interval_ms());
        let naive = chrono::Duration::try_milliseconds(raw)
            .and_then(|delay| now.checked_add_signed(delay))
            .ok_or_else(|| {
                RelayError::Config(format!(
                    "broadcast '{}' fire time out of range (+{raw}ms)",
                    target.group_id
                ))
            })?;
        Ok(match &self.quiet {
            Some(quiet) => quiet.adjust(&target.name, naive),
            None => naive,
        })
    }

    /// Compose and send one broadcast, recording the send time on success.
    pub async fn send_once(&self, target: &BroadcastTarget) -> Result<()> {
        let message = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            self.content.compose(&mut rng)
        };
        let Some(message) = message else {
            return Err(RelayError::Config("nothing to broadcast".into()));
        };
        self.delivery.send_media(&target.group_id, &message).await?;
        let sent_at = (self.clock)().timestamp_millis();
        self.last_sent.record_sent(&target.group_id, sent_at).await?;
        tracing::info!(
            "📣 Broadcast sent to '{}' ({})",
            display_name(target),
            message.kind
        );
        Ok(())
    }

    /// One background task per target.
    pub fn spawn(self: &Arc<Self>, targets: Vec<BroadcastTarget>) -> Vec<JoinHandle<()>> {
        targets
            .into_iter()
            .map(|target| {
                let scheduler = self.clone();
                tokio::spawn(async move { scheduler.run_target(target).await })
            })
            .collect()
    }

    async fn run_target(&self, target: BroadcastTarget) {
        let fire = match self.next_fire(&target).await {
            Ok(fire) => fire,
            Err(e) => {
                tracing::error!("❌ Broadcast '{}' not scheduled: {e}", display_name(&target));
                return;
            }
        };
        let wait = (fire - (self.clock)()).to_std().unwrap_or(Duration::ZERO);
        tracing::info!(
            "⏰ Broadcast '{}' every {}h, first in {}s",
            display_name(&target),
            target.interval_hours,
            wait.as_secs()
        );

        tokio::select! {
            _ = self.cancel.cancelled() => return,
            _ = tokio::time::sleep(wait) => {}
        }

        let period = Duration::from_millis(target.interval_ms().max(1) as u64);
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.fire(&target).await;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => self.fire(&target).await,
            }
        }
        tracing::debug!("🛑 Broadcast '{}' stopped", display_name(&target));
    }

    async fn fire(&self, target: &BroadcastTarget) {
        if let Err(e) = self.send_once(target).await {
            if e.is_persistence() {
                tracing::error!("💥 Broadcast '{}' sent but not recorded: {e}", display_name(target));
            } else {
                tracing::warn!("⚠️ Broadcast '{}' failed: {e}", display_name(target));
            }
        }
    }
}

fn display_name(target: &BroadcastTarget) -> &str {
    if target.name.is_empty() {
        &target.group_id
    } else {
        &target.name
    }
}
