//! Sequence engine: runs one sequence against one recipient, step by step,
//! persisting the next step index after every step so a restart resumes
//! exactly where the previous process stopped.

use std::sync::Arc;
use std::time::Duration;

use relaycast_core::error::{RelayError, Result};
use relaycast_core::traits::{CheckpointStore, DeliveryAdapter};
use relaycast_core::types::{Checkpoint, MediaMessage, Presence, SequenceDefinition, Step, StepKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::catalog::SequenceCatalog;
use crate::gate::{Claim, InFlight};

/// Default pause after a composing/recording indicator.
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(2000);

/// Summary of one `run` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub recipient_id: String,
    pub sequence: String,
    /// Index the run started from (resume point).
    pub started_at: usize,
    pub sent: usize,
    pub skipped: usize,
    pub completed: bool,
    /// Stopped by shutdown; the checkpoint is left in place.
    pub cancelled: bool,
}

/// Resumable sequence executor.
pub struct SequenceEngine {
    delivery: Arc<dyn DeliveryAdapter>,
    checkpoints: Arc<dyn CheckpointStore>,
    in_flight: InFlight,
    settle: Duration,
    cancel: CancellationToken,
}

impl SequenceEngine {
    pub fn new(
        delivery: Arc<dyn DeliveryAdapter>,
        checkpoints: Arc<dyn CheckpointStore>,
        in_flight: InFlight,
    ) -> Self {
        Self {
            delivery,
            checkpoints,
            in_flight,
            settle: DEFAULT_SETTLE,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Sleeps end early when this token is cancelled.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    /// Run (or resume) `seq` for `recipient_id`.
    ///
    /// The caller must hold the recipient's [`Claim`]. Delivery failures skip
    /// the step; checkpoint write failures abort the run. A checkpoint left
    /// by a different sequence is replaced and `seq` starts from step 0.
    pub async fn run(&self, seq: &SequenceDefinition, recipient_id: &str) -> Result<RunReport> {
        let start = match self.checkpoints.get(recipient_id).await? {
            Some(Checkpoint {
                sequence: Some(stored),
                step_index,
                ..
            }) if stored != seq.name => {
                tracing::warn!(
                    "⚠️ {recipient_id} was at step {step_index} of '{stored}', restarting with '{}'",
                    seq.name
                );
                self.persist(recipient_id, seq, 0).await?;
                0
            }
            Some(cp) => cp.step_index,
            None => {
                self.persist(recipient_id, seq, 0).await?;
                0
            }
        };

        let mut report = RunReport {
            recipient_id: recipient_id.to_string(),
            sequence: seq.name.clone(),
            started_at: start,
            ..Default::default()
        };

        if start >= seq.len() {
            tracing::debug!("🧹 {recipient_id} already past the end of '{}'", seq.name);
            self.finish(recipient_id).await?;
            report.completed = true;
            return Ok(report);
        }

        if start > 0 {
            tracing::info!(
                "🔁 Resuming '{}' for {recipient_id} at step {}/{}",
                seq.name,
                start + 1,
                seq.len()
            );
        } else {
            tracing::info!("▶️ Starting '{}' for {recipient_id} ({} steps)", seq.name, seq.len());
        }

        for (i, step) in seq.steps.iter().enumerate().skip(start) {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                return Ok(report);
            }

            let presence = step.presence();
            self.show_presence(recipient_id, presence).await;
            if presence.needs_settle() && !self.pause(self.settle).await {
                report.cancelled = true;
                return Ok(report);
            }

            match self.dispatch(recipient_id, step).await {
                Ok(()) => {
                    tracing::debug!("📤 {recipient_id} step {i} ({}) sent", step.kind.label());
                    report.sent += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        "⚠️ {recipient_id} step {i} ({}) failed, skipping: {e}",
                        step.kind.label()
                    );
                    report.skipped += 1;
                }
            }

            self.show_presence(recipient_id, Presence::Available).await;
            self.persist(recipient_id, seq, i + 1).await?;

            if !self.pause(Duration::from_millis(step.delay_ms)).await {
                report.cancelled = true;
                return Ok(report);
            }
        }

        self.finish(recipient_id).await?;
        report.completed = true;
        Ok(report)
    }

    /// Run in a background task that owns the claim until the run ends.
    pub fn spawn(
        self: &Arc<Self>,
        seq: Arc<SequenceDefinition>,
        claim: Claim,
    ) -> JoinHandle<Result<RunReport>> {
        let engine = self.clone();
        tokio::spawn(async move {
            let recipient_id = claim.recipient_id().to_string();
            let result = engine.run(&seq, &recipient_id).await;
            match &result {
                Ok(r) if r.cancelled => tracing::info!(
                    "⏸️ '{}' for {recipient_id} paused by shutdown ({} sent)",
                    seq.name,
                    r.sent
                ),
                Ok(r) => tracing::info!(
                    "✅ '{}' finished for {recipient_id} ({} sent, {} skipped)",
                    seq.name,
                    r.sent,
                    r.skipped
                ),
                Err(e) => tracing::error!("❌ '{}' aborted for {recipient_id}: {e}", seq.name),
            }
            drop(claim);
            result
        })
    }

    /// Boot-time resume: one task per in-flight recipient, from a single
    /// snapshot of the checkpoint store.
    ///
    /// Checkpoints without a sequence name fall back to `default_sequence`.
    /// Unresolvable checkpoints are logged and left untouched.
    pub async fn resume_all(
        self: &Arc<Self>,
        catalog: &SequenceCatalog,
        default_sequence: Option<&str>,
    ) -> Result<Vec<JoinHandle<Result<RunReport>>>> {
        let snapshot = self.checkpoints.load().await?;
        if snapshot.is_empty() {
            return Ok(Vec::new());
        }
        tracing::info!("🔁 Resuming {} in-flight sequence(s)", snapshot.len());

        let mut handles = Vec::with_capacity(snapshot.len());
        for cp in snapshot {
            let Some(claim) = self.in_flight.try_claim(&cp.recipient_id) else {
                tracing::debug!("⏭️ {} already running, not resuming", cp.recipient_id);
                continue;
            };
            let name = cp.sequence.as_deref().or(default_sequence);
            let Some(seq) = name.and_then(|n| catalog.get(n)) else {
                let err = RelayError::Config(format!(
                    "no sequence '{}' to resume {} at step {}",
                    name.unwrap_or("<none>"),
                    cp.recipient_id,
                    cp.step_index
                ));
                tracing::error!("⚙️ {err}");
                continue;
            };
            handles.push(self.spawn(seq, claim));
        }
        Ok(handles)
    }

    async fn dispatch(&self, to: &str, step: &Step) -> Result<()> {
        match &step.kind {
            StepKind::Text { content } => self.delivery.send_text(to, content).await,
            StepKind::Media {
                path,
                media_kind,
                caption,
            } => {
                let media = MediaMessage {
                    path: path.clone(),
                    kind: *media_kind,
                    caption: caption.clone(),
                    quote: None,
                };
                self.delivery.send_media(to, &media).await
            }
            StepKind::Audio {
                path,
                voice_note,
                caption,
            } => {
                self.delivery
                    .send_audio(to, path, *voice_note, caption.as_deref())
                    .await
            }
            StepKind::Contact {
                phone_number,
                display_name,
            } => self.delivery.send_contact(to, phone_number, display_name).await,
            StepKind::Link(link) => self.delivery.send_link_preview(to, link).await,
        }
    }

    async fn show_presence(&self, to: &str, presence: Presence) {
        if let Err(e) = self.delivery.set_presence(to, presence).await {
            tracing::debug!("presence '{presence}' for {to} not shown: {e}");
        }
    }

    async fn persist(&self, recipient_id: &str, seq: &SequenceDefinition, index: usize) -> Result<()> {
        self.checkpoints
            .save(&Checkpoint::new(recipient_id, &seq.name, index))
            .await
            .map_err(|e| {
                tracing::error!("💥 Checkpoint write failed for {recipient_id} at index {index}: {e}");
                e
            })
    }

    async fn finish(&self, recipient_id: &str) -> Result<()> {
        self.checkpoints.clear(recipient_id).await.map_err(|e| {
            tracing::error!("💥 Checkpoint clear failed for {recipient_id}: {e}");
            e
        })
    }

    /// `false` when shutdown interrupted the pause.
    async fn pause(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            return !self.cancel.is_cancelled();
        }
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStateStore;
    use crate::testkit::{FlakyCheckpoints, RecordingDelivery, Sent};
    use tokio::time::Instant;

    const R: &str = "5511999990000@s.whatsapp.net";

    fn two_step() -> SequenceDefinition {
        SequenceDefinition::new("ab", vec![Step::text("A", 0), Step::text("B", 5000)])
    }

    fn engine(
        delivery: Arc<RecordingDelivery>,
        store: Arc<dyn CheckpointStore>,
    ) -> Arc<SequenceEngine> {
        Arc::new(SequenceEngine::new(delivery, store, InFlight::new()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_run_sends_in_order_and_clears() {
        let delivery = Arc::new(RecordingDelivery::new());
        let store = Arc::new(MemoryStateStore::new());
        let engine = engine(delivery.clone(), store.clone());

        let report = engine.run(&two_step(), R).await.unwrap();
        let finished = Instant::now();

        assert!(report.completed);
        assert_eq!(report.sent, 2);
        let records = delivery.records();
        let texts: Vec<_> = records.iter().map(|r| r.what.clone()).collect();
        assert_eq!(texts, vec![Sent::Text("A".into()), Sent::Text("B".into())]);
        assert!(records[1].at > records[0].at);
        // B's post-send delay keeps the run alive for 5s after B.
        assert!(finished - records[1].at >= Duration::from_millis(5000));
        assert!(finished - records[0].at >= Duration::from_millis(5000));
        assert!(store.get(R).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_post_delay_separates_sends() {
        let delivery = Arc::new(RecordingDelivery::new());
        let store = Arc::new(MemoryStateStore::new());
        let engine = engine(delivery.clone(), store);

        let seq = SequenceDefinition::new("ba", vec![Step::text("A", 5000), Step::text("B", 0)]);
        engine.run(&seq, R).await.unwrap();
        let records = delivery.records();
        assert!(records[1].at - records[0].at >= Duration::from_millis(5000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_from_stored_index_sends_only_rest() {
        let delivery = Arc::new(RecordingDelivery::new());
        let store = Arc::new(MemoryStateStore::new());
        store.save(&Checkpoint::new(R, "ab", 1)).await.unwrap();
        let engine = engine(delivery.clone(), store.clone());

        let report = engine.run(&two_step(), R).await.unwrap();
        assert_eq!(report.started_at, 1);
        assert_eq!(delivery.texts_to(R), vec!["B"]);
        assert!(store.get(R).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_checkpoint_of_other_sequence_restarts_from_zero() {
        let promo = SequenceDefinition::new(
            "promo",
            vec![Step::text("p0", 0), Step::text("p1", 0), Step::text("p2", 0)],
        );

        for stale_index in [2, 9] {
            let delivery = Arc::new(RecordingDelivery::new());
            let store = Arc::new(MemoryStateStore::new());
            store.save(&Checkpoint::new(R, "lead", stale_index)).await.unwrap();
            let engine = engine(delivery.clone(), store.clone());

            let report = engine.run(&promo, R).await.unwrap();
            assert_eq!(report.started_at, 0);
            assert_eq!(report.sent, 3);
            assert_eq!(delivery.texts_to(R), vec!["p0", "p1", "p2"]);
            assert!(store.get(R).await.unwrap().is_none());
        }

        // Unnamed checkpoints still resume at their index.
        let delivery = Arc::new(RecordingDelivery::new());
        let store = Arc::new(MemoryStateStore::new());
        store
            .save(&Checkpoint {
                recipient_id: R.into(),
                sequence: None,
                step_index: 2,
            })
            .await
            .unwrap();
        engine(delivery.clone(), store).run(&promo, R).await.unwrap();
        assert_eq!(delivery.texts_to(R), vec!["p2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_never_resends_earlier_steps() {
        let steps: Vec<_> = (0..5).map(|i| Step::text(&format!("s{i}"), 100)).collect();
        let seq = SequenceDefinition::new("five", steps);

        for k in 0..=5 {
            let delivery = Arc::new(RecordingDelivery::new());
            let store = Arc::new(MemoryStateStore::new());
            store.save(&Checkpoint::new(R, "five", k)).await.unwrap();
            let engine = engine(delivery.clone(), store);

            engine.run(&seq, R).await.unwrap();
            let expected: Vec<String> = (k..5).map(|i| format!("s{i}")).collect();
            assert_eq!(delivery.texts_to(R), expected, "resume from {k}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivery_failure_skips_but_advances() {
        let delivery = Arc::new(RecordingDelivery::new().failing_on("B"));
        let store = Arc::new(MemoryStateStore::new());
        let engine = Arc::new(
            SequenceEngine::new(delivery.clone(), store.clone(), InFlight::new())
                .with_settle(Duration::ZERO),
        );
        let seq = Arc::new(SequenceDefinition::new(
            "abc",
            vec![Step::text("A", 0), Step::text("B", 10_000), Step::text("C", 0)],
        ));

        let claim = engine.in_flight().try_claim(R).unwrap();
        let handle = engine.spawn(seq, claim);

        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert_eq!(store.get(R).await.unwrap().unwrap().step_index, 2);
        assert_eq!(delivery.texts_to(R), vec!["A"]);

        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(delivery.texts_to(R), vec!["A", "C"]);
        assert!(!engine.in_flight().contains(R));
    }

    #[tokio::test(start_paused = true)]
    async fn test_checkpoint_failure_aborts_run() {
        let delivery = Arc::new(RecordingDelivery::new());
        // Index 0 and index 1 persist, index 2 fails.
        let store = Arc::new(FlakyCheckpoints::failing_after(2));
        let engine = engine(delivery.clone(), store.clone());
        let seq = SequenceDefinition::new(
            "abc",
            vec![Step::text("A", 0), Step::text("B", 0), Step::text("C", 0)],
        );

        let err = engine.run(&seq, R).await.unwrap_err();
        assert!(err.is_persistence());
        assert_eq!(delivery.texts_to(R), vec!["A", "B"]);
        assert_eq!(store.get(R).await.unwrap().unwrap().step_index, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_keeps_checkpoint() {
        let delivery = Arc::new(RecordingDelivery::new());
        let store = Arc::new(MemoryStateStore::new());
        let cancel = CancellationToken::new();
        let engine = Arc::new(
            SequenceEngine::new(delivery.clone(), store.clone(), InFlight::new())
                .with_cancel(cancel.clone()),
        );
        let seq = Arc::new(SequenceDefinition::new(
            "slow",
            vec![Step::text("A", 60_000), Step::text("B", 0)],
        ));

        let claim = engine.in_flight().try_claim(R).unwrap();
        let handle = engine.spawn(seq, claim);
        tokio::time::sleep(Duration::from_millis(10_000)).await;
        cancel.cancel();

        let report = handle.await.unwrap().unwrap();
        assert!(report.cancelled);
        assert!(!report.completed);
        assert_eq!(delivery.texts_to(R), vec!["A"]);
        assert_eq!(store.get(R).await.unwrap().unwrap().step_index, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_index_past_end_only_clears() {
        let delivery = Arc::new(RecordingDelivery::new());
        let store = Arc::new(MemoryStateStore::new());
        store.save(&Checkpoint::new(R, "ab", 7)).await.unwrap();
        let engine = engine(delivery.clone(), store.clone());

        let report = engine.run(&two_step(), R).await.unwrap();
        assert!(report.completed);
        assert_eq!(delivery.attempts(), 0);
        assert!(store.get(R).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_presence_and_settle() {
        let delivery = Arc::new(RecordingDelivery::new());
        let store = Arc::new(MemoryStateStore::new());
        let engine = engine(delivery.clone(), store);
        let seq = SequenceDefinition::new(
            "voice",
            vec![
                Step::new(
                    StepKind::Audio {
                        path: "audio/hello.ogg".into(),
                        voice_note: true,
                        caption: None,
                    },
                    0,
                ),
                Step::new(
                    StepKind::Audio {
                        path: "audio/jingle.mp3".into(),
                        voice_note: false,
                        caption: None,
                    },
                    0,
                ),
            ],
        );

        let started = Instant::now();
        engine.run(&seq, R).await.unwrap();

        let presence: Vec<_> = delivery.presence_log().into_iter().map(|(_, p)| p).collect();
        assert_eq!(
            presence,
            vec![
                Presence::Recording,
                Presence::Available,
                Presence::Available,
                Presence::Available
            ]
        );
        let records = delivery.records();
        // Only the voice note waits for the settle delay.
        assert_eq!(records[0].at - started, DEFAULT_SETTLE);
        assert_eq!(records[1].at, records[0].at);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_all_resolves_sequences() {
        let delivery = Arc::new(RecordingDelivery::new());
        let store = Arc::new(MemoryStateStore::new());
        store.save(&Checkpoint::new("named", "ab", 1)).await.unwrap();
        store
            .save(&Checkpoint {
                recipient_id: "legacy".into(),
                sequence: None,
                step_index: 0,
            })
            .await
            .unwrap();
        store.save(&Checkpoint::new("orphan", "gone", 0)).await.unwrap();

        let catalog = SequenceCatalog::new(vec![two_step()]);
        let engine = engine(delivery.clone(), store.clone());

        let handles = engine.resume_all(&catalog, Some("ab")).await.unwrap();
        assert_eq!(handles.len(), 2);
        for h in handles {
            assert!(h.await.unwrap().unwrap().completed);
        }

        assert_eq!(delivery.texts_to("named"), vec!["B"]);
        assert_eq!(delivery.texts_to("legacy"), vec!["A", "B"]);
        assert!(delivery.texts_to("orphan").is_empty());
        assert_eq!(store.get("orphan").await.unwrap().unwrap().step_index, 0);
        assert!(engine.in_flight().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_all_skips_claimed_recipients() {
        let delivery = Arc::new(RecordingDelivery::new());
        let store = Arc::new(MemoryStateStore::new());
        store.save(&Checkpoint::new(R, "ab", 0)).await.unwrap();
        let catalog = SequenceCatalog::new(vec![two_step()]);
        let engine = engine(delivery.clone(), store);

        let _held = engine.in_flight().try_claim(R).unwrap();
        let handles = engine.resume_all(&catalog, None).await.unwrap();
        assert!(handles.is_empty());
        assert_eq!(delivery.attempts(), 0);
    }
}
