//! Recipient drip: walks a fixed recipient list, sending each one a random
//! sequence to completion before pausing for the global interval.

use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::catalog::SequenceCatalog;
use crate::engine::SequenceEngine;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DripSummary {
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: bool,
}

pub struct RecipientDrip {
    engine: Arc<SequenceEngine>,
    catalog: Arc<SequenceCatalog>,
    recipients: Vec<String>,
    interval: Duration,
    cancel: CancellationToken,
    seed: Option<u64>,
}

impl RecipientDrip {
    pub fn new(
        engine: Arc<SequenceEngine>,
        catalog: Arc<SequenceCatalog>,
        recipients: Vec<String>,
        interval: Duration,
    ) -> Self {
        Self {
            engine,
            catalog,
            recipients,
            interval,
            cancel: CancellationToken::new(),
            seed: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// One pass over the recipient list.
    pub async fn run(&self) -> DripSummary {
        let mut summary = DripSummary::default();
        if self.recipients.is_empty() {
            tracing::warn!("⚠️ Drip: no recipients configured");
            return summary;
        }
        if self.catalog.is_empty() {
            tracing::warn!("⚠️ Drip: no sequences configured");
            return summary;
        }

        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        tracing::info!("💧 Drip started for {} recipient(s)", self.recipients.len());

        for (n, recipient) in self.recipients.iter().enumerate() {
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            let Some(seq) = self.catalog.random(&mut rng) else {
                break;
            };
            let Some(claim) = self.engine.in_flight().try_claim(recipient) else {
                tracing::info!("⏭️ Drip: {recipient} already has a run in flight");
                summary.skipped += 1;
                continue;
            };

            tracing::info!("💧 Drip: '{}' → {recipient}", seq.name);
            match self.engine.run(&seq, recipient).await {
                Ok(report) if report.cancelled => {
                    summary.cancelled = true;
                    break;
                }
                Ok(_) => summary.completed += 1,
                Err(e) => {
                    tracing::error!("❌ Drip: '{}' for {recipient} aborted: {e}", seq.name);
                    summary.failed += 1;
                }
            }
            drop(claim);

            if n + 1 < self.recipients.len() {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        summary.cancelled = true;
                        break;
                    }
                    _ = tokio::time::sleep(self.interval) => {}
                }
            }
        }

        tracing::info!(
            "💧 Drip pass done: {} completed, {} failed, {} skipped",
            summary.completed,
            summary.failed,
            summary.skipped
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::InFlight;
    use crate::store::MemoryStateStore;
    use crate::testkit::RecordingDelivery;
    use relaycast_core::types::{SequenceDefinition, Step};

    fn engine_with(delivery: Arc<RecordingDelivery>, cancel: CancellationToken) -> Arc<SequenceEngine> {
        Arc::new(
            SequenceEngine::new(delivery, Arc::new(MemoryStateStore::new()), InFlight::new())
                .with_settle(Duration::ZERO)
                .with_cancel(cancel),
        )
    }

    fn catalog() -> Arc<SequenceCatalog> {
        Arc::new(SequenceCatalog::new(vec![
            SequenceDefinition::new("one", vec![Step::text("one", 0)]),
            SequenceDefinition::new("two", vec![Step::text("two", 0)]),
        ]))
    }

    #[tokio::test(start_paused = true)]
    async fn test_walks_recipients_with_interval() {
        let delivery = Arc::new(RecordingDelivery::new());
        let engine = engine_with(delivery.clone(), CancellationToken::new());
        let drip = RecipientDrip::new(
            engine,
            catalog(),
            vec!["a".into(), "b".into(), "c".into()],
            Duration::from_secs(3600),
        )
        .with_seed(1);

        let summary = drip.run().await;
        assert_eq!(summary.completed, 3);

        let records = delivery.records();
        assert_eq!(records.len(), 3);
        let order: Vec<_> = records.iter().map(|r| r.to.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert!(records[1].at - records[0].at >= Duration::from_secs(3600));
        assert!(records[2].at - records[1].at >= Duration::from_secs(3600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_skips_claimed_recipient() {
        let delivery = Arc::new(RecordingDelivery::new());
        let engine = engine_with(delivery.clone(), CancellationToken::new());
        let _busy = engine.in_flight().try_claim("a").unwrap();
        let drip = RecipientDrip::new(
            engine,
            catalog(),
            vec!["a".into(), "b".into()],
            Duration::from_secs(1),
        );

        let summary = drip.run().await;
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.completed, 1);
        assert!(delivery.texts_to("a").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_leftover_checkpoint_does_not_skip_steps() {
        use relaycast_core::traits::CheckpointStore;
        use relaycast_core::types::Checkpoint;

        let delivery = Arc::new(RecordingDelivery::new());
        let store = Arc::new(MemoryStateStore::new());
        store.save(&Checkpoint::new("a", "lead", 2)).await.unwrap();
        let engine = Arc::new(
            SequenceEngine::new(delivery.clone(), store.clone(), InFlight::new())
                .with_settle(Duration::ZERO),
        );
        let promo = SequenceDefinition::new(
            "promo",
            vec![Step::text("p0", 0), Step::text("p1", 0), Step::text("p2", 0)],
        );
        let drip = RecipientDrip::new(
            engine,
            Arc::new(SequenceCatalog::new(vec![promo])),
            vec!["a".into()],
            Duration::from_secs(1),
        );

        let summary = drip.run().await;
        assert_eq!(summary.completed, 1);
        assert_eq!(delivery.texts_to("a"), vec!["p0", "p1", "p2"]);
        assert!(store.get("a").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_between_recipients() {
        let delivery = Arc::new(RecordingDelivery::new());
        let cancel = CancellationToken::new();
        let engine = engine_with(delivery.clone(), cancel.clone());
        let drip = Arc::new(
            RecipientDrip::new(
                engine,
                catalog(),
                vec!["a".into(), "b".into()],
                Duration::from_secs(3600),
            )
            .with_cancel(cancel.clone()),
        );

        let task = {
            let drip = drip.clone();
            tokio::spawn(async move { drip.run().await })
        };
        tokio::time::sleep(Duration::from_secs(60)).await;
        cancel.cancel();

        let summary = task.await.unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.completed, 1);
        assert!(delivery.texts_to("b").is_empty());
    }
}
