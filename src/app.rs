//! Runtime wiring: builds stores, adapters and schedulers from a
//! [`RelayConfig`] and drives them until shutdown.

use anyhow::{Context, Result};
use relaycast_channels::{ConsoleAdapter, WhatsAppCloudAdapter};
use relaycast_core::config::{DripMode, RelayConfig, StorageBackend};
use relaycast_core::traits::{
    CheckpointStore, DeliveryAdapter, EngagementCheck, LastSentStore, ResponseGuard,
};
use relaycast_core::types::InboundMessage;
use relaycast_scheduler::{
    Admission, BroadcastContent, BroadcastScheduler, FileStateStore, InFlight, IntakeOutcome,
    KeywordOutcome, KeywordRouter, LeadIntake, MediaPool, MemoryStateStore, QuietWindow,
    RecipientDrip, SequenceCatalog, SequenceEngine, StateDb, TriggerGate,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// The configured state backend, kept concrete for operator commands.
pub enum StateBackend {
    Sqlite(Arc<StateDb>),
    Json(Arc<FileStateStore>),
    Memory(Arc<MemoryStateStore>),
}

impl StateBackend {
    pub fn open(config: &RelayConfig) -> Result<Self> {
        let data_dir = config.runtime.data_dir();
        let path = config.storage.resolve_path(&data_dir);
        let backend = match config.storage.backend {
            StorageBackend::Sqlite => Self::Sqlite(Arc::new(
                StateDb::open(&path).with_context(|| format!("opening {}", path.display()))?,
            )),
            StorageBackend::Json => Self::Json(Arc::new(
                FileStateStore::open(&path).with_context(|| format!("opening {}", path.display()))?,
            )),
            StorageBackend::Memory => Self::memory(),
        };
        tracing::info!("💾 State backend: {} ({})", backend.label(), path.display());
        Ok(backend)
    }

    pub fn memory() -> Self {
        Self::Memory(Arc::new(MemoryStateStore::new()))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Sqlite(_) => "sqlite",
            Self::Json(_) => "json",
            Self::Memory(_) => "memory",
        }
    }

    pub fn checkpoints(&self) -> Arc<dyn CheckpointStore> {
        match self {
            Self::Sqlite(db) => db.clone(),
            Self::Json(fs) => fs.clone(),
            Self::Memory(mem) => mem.clone(),
        }
    }

    pub fn guard(&self) -> Arc<dyn ResponseGuard> {
        match self {
            Self::Sqlite(db) => db.clone(),
            Self::Json(fs) => fs.clone(),
            Self::Memory(mem) => mem.clone(),
        }
    }

    pub fn last_sent(&self) -> Arc<dyn LastSentStore> {
        match self {
            Self::Sqlite(db) => db.clone(),
            Self::Json(fs) => fs.clone(),
            Self::Memory(mem) => mem.clone(),
        }
    }

    /// The JSON store has no engagement records.
    pub fn engagement(&self) -> Option<Arc<dyn EngagementCheck>> {
        match self {
            Self::Sqlite(db) => Some(db.clone()),
            Self::Json(_) => None,
            Self::Memory(mem) => Some(mem.clone()),
        }
    }

    pub fn forget_responded(&self, recipient_id: &str) -> Result<bool> {
        let removed = match self {
            Self::Sqlite(db) => db.forget_responded(recipient_id)?,
            Self::Json(fs) => fs.forget_responded(recipient_id)?,
            Self::Memory(mem) => mem.forget_responded(recipient_id)?,
        };
        Ok(removed)
    }

    pub fn all_last_sent(&self) -> Result<Vec<(String, i64)>> {
        let rows = match self {
            Self::Sqlite(db) => db.all_last_sent()?,
            Self::Json(fs) => fs.all_last_sent()?,
            Self::Memory(_) => Vec::new(),
        };
        Ok(rows)
    }
}

/// Pick the outbound transport. `dry_run` always logs to the console.
pub fn build_delivery(config: &RelayConfig, dry_run: bool) -> Result<Arc<dyn DeliveryAdapter>> {
    if dry_run {
        return Ok(Arc::new(ConsoleAdapter::new()));
    }
    match config.delivery.provider.trim().to_lowercase().as_str() {
        "console" => Ok(Arc::new(ConsoleAdapter::new())),
        "whatsapp" => {
            let wa = config
                .delivery
                .whatsapp
                .clone()
                .context("delivery.provider = \"whatsapp\" needs a [delivery.whatsapp] section")?;
            Ok(Arc::new(WhatsAppCloudAdapter::new(wa)?))
        }
        other => anyhow::bail!("unknown delivery provider '{other}'"),
    }
}

/// Everything that reacts to an inbound message.
#[derive(Default)]
struct InboundHandlers {
    intake: Option<LeadIntake>,
    keywords: Option<KeywordRouter>,
}

impl InboundHandlers {
    fn is_empty(&self) -> bool {
        self.intake.is_none() && self.keywords.is_none()
    }

    async fn dispatch(&self, msg: InboundMessage) {
        if let Some(intake) = &self.intake {
            match intake.on_inbound(&msg).await {
                Ok(IntakeOutcome::Started(_)) => {
                    tracing::info!("🧲 Lead sequence started for {}", msg.sender_id);
                }
                Ok(IntakeOutcome::NotAdmitted(Admission::Excluded(reason))) => {
                    tracing::debug!("{} excluded from intake: {reason}", msg.sender_id);
                }
                Ok(_) => {}
                Err(e) => tracing::error!("❌ Intake failed for {}: {e}", msg.sender_id),
            }
        }

        if let Some(router) = &self.keywords {
            match router
                .on_inbound_text(&msg.chat_id, &msg.text, msg.is_group)
                .await
            {
                Ok(KeywordOutcome::Started { keyword, sequence, .. }) => {
                    tracing::info!("🔑 '{keyword}' → '{sequence}' for {}", msg.chat_id);
                }
                Ok(KeywordOutcome::NotAdmitted { keyword, admission }) => {
                    tracing::debug!("🔑 '{keyword}' from {} not admitted: {}", msg.chat_id, admission.label());
                }
                Ok(_) => {}
                Err(e) => tracing::error!("❌ Keyword routing failed for {}: {e}", msg.chat_id),
            }
        }
    }
}

/// Run the whole service until `cancel` fires.
pub async fn run(config: RelayConfig, dry_run: bool, cancel: CancellationToken) -> Result<()> {
    let state = if dry_run {
        tracing::info!("🧪 Dry run: in-memory state, console delivery");
        StateBackend::memory()
    } else {
        StateBackend::open(&config)?
    };
    let delivery = build_delivery(&config, dry_run)?;
    tracing::info!("📡 Delivery adapter: {}", delivery.name());

    let catalog = Arc::new(SequenceCatalog::new(config.sequences()));
    tracing::info!(
        "📚 {} sequence(s), {} keyword(s)",
        catalog.len(),
        catalog.keyword_count()
    );

    let in_flight = InFlight::new();
    let engine = Arc::new(
        SequenceEngine::new(delivery.clone(), state.checkpoints(), in_flight.clone())
            .with_settle(Duration::from_millis(config.runtime.presence_settle_ms))
            .with_cancel(cancel.clone()),
    );

    let mut tasks: Vec<JoinHandle<()>> = Vec::new();
    let intake_sequence = if config.intake.enabled && !config.intake.sequence.is_empty() {
        Some(config.intake.sequence.as_str())
    } else {
        None
    };

    if config.runtime.resume_on_boot {
        let resumed = engine.resume_all(&catalog, intake_sequence).await?;
        if !resumed.is_empty() {
            tasks.push(tokio::spawn(async move {
                for handle in resumed {
                    let _ = handle.await;
                }
            }));
        }
    }

    let mut handlers = InboundHandlers::default();

    if config.intake.enabled {
        let seq = catalog.get(&config.intake.sequence).with_context(|| {
            format!("intake sequence '{}' is not defined", config.intake.sequence)
        })?;
        let mut gate = TriggerGate::new(in_flight.clone(), state.checkpoints())
            .with_guard(state.guard())
            .with_excluded(config.intake.exclude.iter().cloned());
        if let Some(engagement) = state.engagement() {
            gate = gate.with_engagement(engagement);
        }
        handlers.intake = Some(
            LeadIntake::new(Arc::new(gate), engine.clone(), seq)
                .with_trigger_phrase(&config.intake.trigger_phrase),
        );
        tracing::info!("🧲 Lead intake on: '{}'", config.intake.sequence);
    }

    match config.drip.mode()? {
        DripMode::Recipients => {
            if !config.drip.recipients.is_empty() {
                let drip = RecipientDrip::new(
                    engine.clone(),
                    catalog.clone(),
                    config.drip.recipients.clone(),
                    Duration::from_secs(config.drip.global_interval_secs),
                )
                .with_cancel(cancel.clone());
                tasks.push(tokio::spawn(async move {
                    let summary = drip.run().await;
                    tracing::info!(
                        "💧 Drip pass done: {} completed, {} failed, {} skipped{}",
                        summary.completed,
                        summary.failed,
                        summary.skipped,
                        if summary.cancelled { " (cancelled)" } else { "" }
                    );
                }));
            }
        }
        DripMode::Keyword => {
            let mut gate = TriggerGate::new(in_flight.clone(), state.checkpoints());
            if config.drip.respond_once {
                gate = gate.with_guard(state.guard());
            }
            handlers.keywords = Some(KeywordRouter::new(
                catalog.clone(),
                Arc::new(gate),
                engine.clone(),
            ));
            tracing::info!("🔑 Keyword drip on ({} keyword(s))", catalog.keyword_count());
        }
        DripMode::Off => {}
    }

    if config.broadcast.enabled {
        tasks.extend(start_broadcasts(&config, delivery.clone(), &state, cancel.clone())?);
    }

    if config.gateway.enabled {
        let (tx, mut rx) = mpsc::channel::<InboundMessage>(256);
        let wa = config.delivery.whatsapp.clone().unwrap_or_default();
        let gw_state = relaycast_gateway::GatewayState::new(wa.webhook_verify_token, wa.app_secret, tx);
        let gw_config = config.gateway.clone();
        let gw_cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = relaycast_gateway::start(&gw_config, gw_state, gw_cancel).await {
                tracing::error!("❌ Gateway failed: {e}");
            }
        }));

        if handlers.is_empty() {
            tracing::warn!("⚠️ Gateway is on but neither intake nor keyword drip is enabled");
        }
        let handlers = Arc::new(handlers);
        let inbound_cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = inbound_cancel.cancelled() => break,
                    msg = rx.recv() => match msg {
                        Some(msg) => handlers.dispatch(msg).await,
                        None => break,
                    },
                }
            }
        }));
    } else if !handlers.is_empty() {
        tracing::warn!("⚠️ Inbound triggers configured but the gateway is disabled");
    }

    tracing::info!("🚀 Relaycast running ({} task(s)); Ctrl+C to stop", tasks.len());
    cancel.cancelled().await;
    tracing::info!("🛑 Shutting down...");

    // Checkpoints are already on disk; wait for in-flight sends to settle.
    let drain = join_tasks(tasks);
    if tokio::time::timeout(Duration::from_secs(10), drain).await.is_err() {
        tracing::warn!("⚠️ Some tasks did not stop within 10s");
    }
    Ok(())
}

async fn join_tasks(tasks: Vec<JoinHandle<()>>) {
    for task in tasks {
        let _ = task.await;
    }
}

fn start_broadcasts(
    config: &RelayConfig,
    delivery: Arc<dyn DeliveryAdapter>,
    state: &StateBackend,
    cancel: CancellationToken,
) -> Result<Vec<JoinHandle<()>>> {
    let targets = config.broadcast.targets();
    if targets.is_empty() {
        tracing::warn!("⚠️ Broadcast enabled but no groups configured");
        return Ok(Vec::new());
    }

    let media = MediaPool::scan(
        &relaycast_core::config::expand_path(&config.broadcast.images_dir),
        &relaycast_core::config::expand_path(&config.broadcast.videos_dir),
    );
    let content = match BroadcastContent::new(
        config.broadcast.messages.clone(),
        media,
        Some(config.broadcast.quote.clone()),
    ) {
        Ok(content) => content,
        Err(e) => {
            tracing::error!("❌ Broadcast disabled: {e}");
            return Ok(Vec::new());
        }
    };
    let quiet = QuietWindow::from_config(&config.broadcast.quiet_window)?;

    let scheduler = Arc::new(
        BroadcastScheduler::new(delivery, state.last_sent(), content)
            .with_quiet_window(quiet)
            .with_cancel(cancel),
    );
    tracing::info!("📣 Broadcasting to {} group(s)", targets.len());
    Ok(scheduler.spawn(targets))
}
