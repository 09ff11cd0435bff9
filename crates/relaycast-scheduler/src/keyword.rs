//! Keyword router: starts a sequence when a private message contains a
//! configured keyword.
//!
//! Keywords are scanned in map order, so when a message contains two
//! keywords either may win. Scanning stops at the first match whatever the
//! admission result: one inbound message starts at most one run.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use relaycast_core::error::Result;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

use crate::catalog::SequenceCatalog;
use crate::engine::{RunReport, SequenceEngine};
use crate::gate::{Admission, TriggerGate};

/// What happened to one inbound message.
#[derive(Debug)]
pub enum KeywordOutcome {
    IgnoredGroup,
    NoMatch,
    NotAdmitted {
        keyword: String,
        admission: Admission,
    },
    Started {
        keyword: String,
        sequence: String,
        handle: JoinHandle<Result<RunReport>>,
    },
}

pub struct KeywordRouter {
    catalog: Arc<SequenceCatalog>,
    gate: Arc<TriggerGate>,
    engine: Arc<SequenceEngine>,
    rng: Mutex<StdRng>,
}

impl KeywordRouter {
    pub fn new(
        catalog: Arc<SequenceCatalog>,
        gate: Arc<TriggerGate>,
        engine: Arc<SequenceEngine>,
    ) -> Self {
        Self {
            catalog,
            gate,
            engine,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Fixed seed for reproducible sequence picks.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    pub fn keyword_count(&self) -> usize {
        self.catalog.keyword_count()
    }

    pub async fn on_inbound_text(
        &self,
        recipient_id: &str,
        raw_text: &str,
        is_group: bool,
    ) -> Result<KeywordOutcome> {
        if is_group {
            return Ok(KeywordOutcome::IgnoredGroup);
        }
        let text = raw_text.trim().to_lowercase();
        if text.is_empty() {
            return Ok(KeywordOutcome::NoMatch);
        }

        let Some((keyword, bound)) = self
            .catalog
            .keywords()
            .find(|(keyword, _)| text.contains(keyword))
        else {
            return Ok(KeywordOutcome::NoMatch);
        };
        let keyword = keyword.to_string();

        let picked = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            bound.choose(&mut *rng).cloned()
        };
        let Some(seq) = picked else {
            return Ok(KeywordOutcome::NoMatch);
        };

        tracing::info!("🔑 Keyword '{keyword}' from {recipient_id} → '{}'", seq.name);
        match self.gate.try_admit(recipient_id).await? {
            Admission::Admitted(claim) => {
                let sequence = seq.name.clone();
                let handle = self.engine.spawn(seq, claim);
                Ok(KeywordOutcome::Started {
                    keyword,
                    sequence,
                    handle,
                })
            }
            admission => {
                tracing::debug!("🚫 {recipient_id} not admitted: {}", admission.label());
                Ok(KeywordOutcome::NotAdmitted { keyword, admission })
            }
        }
    }
}
