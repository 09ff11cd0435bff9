//! Trigger gate: decides whether a recipient may start a new sequence.
//!
//! Check order, cheapest and most authoritative first:
//! 0. in-process claim set (a concurrent caller that loses the insert race
//!    sees `AlreadyInFlight`)
//! 1. persisted checkpoint present → `AlreadyInFlight`
//! 2. static exclusions and the engagement predicate → `Excluded`
//! 3. response guard → `AlreadyResponded`
//!
//! An admitted recipient is marked responded before the gate returns, while
//! the claim is still held, so admit + mark is atomic per recipient.

use relaycast_core::error::Result;
use relaycast_core::traits::{CheckpointStore, EngagementCheck, ResponseGuard};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

/// Recipients with a live run in this process. Shared by every gate, the
/// resume pass and the drip loop.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self) -> MutexGuard<'_, HashSet<String>> {
        // The set holds plain strings; a panicked holder cannot leave it torn.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim a recipient. `None` when someone else holds it.
    pub fn try_claim(&self, recipient_id: &str) -> Option<Claim> {
        if self.set().insert(recipient_id.to_string()) {
            Some(Claim {
                recipient_id: recipient_id.to_string(),
                owner: self.clone(),
            })
        } else {
            None
        }
    }

    pub fn contains(&self, recipient_id: &str) -> bool {
        self.set().contains(recipient_id)
    }

    pub fn len(&self) -> usize {
        self.set().len()
    }

    pub fn is_empty(&self) -> bool {
        self.set().is_empty()
    }
}

/// Exclusive right to run a sequence for one recipient. Released on drop.
#[derive(Debug)]
pub struct Claim {
    recipient_id: String,
    owner: InFlight,
}

impl Claim {
    pub fn recipient_id(&self) -> &str {
        &self.recipient_id
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.owner.set().remove(&self.recipient_id);
    }
}

/// Outcome of [`TriggerGate::try_admit`].
#[derive(Debug)]
pub enum Admission {
    Admitted(Claim),
    AlreadyInFlight,
    AlreadyResponded,
    Excluded(String),
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted(_))
    }

    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Admission::Admitted(_) => "admitted",
            Admission::AlreadyInFlight => "already in flight",
            Admission::AlreadyResponded => "already responded",
            Admission::Excluded(_) => "excluded",
        }
    }
}

/// Admission control in front of the sequence engine.
pub struct TriggerGate {
    in_flight: InFlight,
    checkpoints: Arc<dyn CheckpointStore>,
    guard: Option<Arc<dyn ResponseGuard>>,
    engagement: Option<Arc<dyn EngagementCheck>>,
    excluded: HashSet<String>,
}

impl TriggerGate {
    pub fn new(in_flight: InFlight, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self {
            in_flight,
            checkpoints,
            guard: None,
            engagement: None,
            excluded: HashSet::new(),
        }
    }

    /// Trigger each recipient at most once, ever.
    pub fn with_guard(mut self, guard: Arc<dyn ResponseGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn with_engagement(mut self, engagement: Arc<dyn EngagementCheck>) -> Self {
        self.engagement = Some(engagement);
        self
    }

    /// Recipients that are always excluded.
    pub fn with_excluded<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    /// Claim only. Used where the caller already decided the recipient must
    /// run (boot resume, recipient drip, operator trigger).
    pub fn try_claim(&self, recipient_id: &str) -> Option<Claim> {
        self.in_flight.try_claim(recipient_id)
    }

    /// Full admission check. On `Admitted` the recipient is already marked
    /// responded (when a guard is configured) and the claim is held.
    pub async fn try_admit(&self, recipient_id: &str) -> Result<Admission> {
        let Some(claim) = self.in_flight.try_claim(recipient_id) else {
            return Ok(Admission::AlreadyInFlight);
        };

        if self.checkpoints.get(recipient_id).await?.is_some() {
            return Ok(Admission::AlreadyInFlight);
        }

        if self.excluded.contains(recipient_id) {
            return Ok(Admission::Excluded("excluded by configuration".into()));
        }
        if let Some(engagement) = &self.engagement {
            if let Some(reason) = engagement.engaged_reason(recipient_id).await? {
                return Ok(Admission::Excluded(reason));
            }
        }

        if let Some(guard) = &self.guard {
            if guard.is_responded(recipient_id).await? {
                return Ok(Admission::AlreadyResponded);
            }
            if let Err(e) = guard.mark_responded(recipient_id).await {
                tracing::error!("❌ Failed to mark {recipient_id} as responded: {e}");
                return Err(e);
            }
        }

        Ok(Admission::Admitted(claim))
    }
}
