//! Lead intake: every new private contact gets the lead sequence once.
//!
//! The operator can also start the lead sequence for a chat by sending the
//! configured trigger phrase from this account. That path only checks the
//! in-process claim: the operator decided, the guard does not apply.

use relaycast_core::error::Result;
use relaycast_core::types::{InboundMessage, SequenceDefinition};
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::engine::{RunReport, SequenceEngine};
use crate::gate::{Admission, TriggerGate};

#[derive(Debug)]
pub enum IntakeOutcome {
    Ignored,
    NotAdmitted(Admission),
    Started(JoinHandle<Result<RunReport>>),
}

pub struct LeadIntake {
    gate: Arc<TriggerGate>,
    engine: Arc<SequenceEngine>,
    sequence: Arc<SequenceDefinition>,
    trigger_phrase: Option<String>,
}

impl LeadIntake {
    pub fn new(
        gate: Arc<TriggerGate>,
        engine: Arc<SequenceEngine>,
        sequence: Arc<SequenceDefinition>,
    ) -> Self {
        Self {
            gate,
            engine,
            sequence,
            trigger_phrase: None,
        }
    }

    /// Exact (case-insensitive) text that starts the sequence when sent by
    /// this account.
    pub fn with_trigger_phrase(mut self, phrase: &str) -> Self {
        let phrase = phrase.trim().to_lowercase();
        self.trigger_phrase = if phrase.is_empty() { None } else { Some(phrase) };
        self
    }

    pub fn sequence_name(&self) -> &str {
        &self.sequence.name
    }

    pub async fn on_inbound(&self, msg: &InboundMessage) -> Result<IntakeOutcome> {
        if msg.is_group {
            return Ok(IntakeOutcome::Ignored);
        }

        if msg.from_me {
            return Ok(self.on_operator_message(msg));
        }

        match self.gate.try_admit(&msg.sender_id).await? {
            Admission::Admitted(claim) => {
                tracing::info!("👋 New lead {} → '{}'", msg.sender_id, self.sequence.name);
                Ok(IntakeOutcome::Started(
                    self.engine.spawn(self.sequence.clone(), claim),
                ))
            }
            admission => {
                tracing::debug!("🚫 Lead {} skipped: {}", msg.sender_id, admission.label());
                Ok(IntakeOutcome::NotAdmitted(admission))
            }
        }
    }

    fn on_operator_message(&self, msg: &InboundMessage) -> IntakeOutcome {
        let Some(phrase) = &self.trigger_phrase else {
            return IntakeOutcome::Ignored;
        };
        if msg.text.trim().to_lowercase() != *phrase {
            return IntakeOutcome::Ignored;
        }
        match self.gate.try_claim(&msg.chat_id) {
            Some(claim) => {
                tracing::info!("🎯 Operator trigger for {} → '{}'", msg.chat_id, self.sequence.name);
                IntakeOutcome::Started(self.engine.spawn(self.sequence.clone(), claim))
            }
            None => IntakeOutcome::NotAdmitted(Admission::AlreadyInFlight),
        }
    }
}
