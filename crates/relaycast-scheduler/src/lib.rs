//! # Relaycast Scheduler
//!
//! Resumable outbound sequences and recurring group broadcasts.
//!
//! ## Design Principles
//! - Checkpoint after every step: a restart resumes, never restarts
//! - At most one run per recipient (claim set + checkpoint check)
//! - Tokio timers only, every sleep cancellable on shutdown
//! - Pluggable state: SQLite, JSON files or memory
//!
//! ## Architecture
//! ```text
//! Inbound message / boot / drip list
//!   ├── LeadIntake ─────┐
//!   ├── KeywordRouter ──┼── TriggerGate (claim → checkpoint → engaged → guard)
//!   ├── RecipientDrip ──┤        │
//!   └── resume_all ─────┘        └── SequenceEngine (per recipient task)
//!                                      presence → settle → send → checkpoint → delay
//!
//! BroadcastScheduler (per group task)
//!   └── catch-up delay → QuietWindow → send media + caption → record last_sent
//!                      → fixed-period interval
//! ```

pub mod broadcast;
pub mod catalog;
pub mod drip;
pub mod engine;
pub mod gate;
pub mod intake;
pub mod keyword;
pub mod media;
pub mod persistence;
pub mod quiet;
pub mod store;

#[cfg(test)]
mod testkit;

pub use broadcast::{BroadcastContent, BroadcastScheduler, Clock};
pub use catalog::SequenceCatalog;
pub use drip::{DripSummary, RecipientDrip};
pub use engine::{RunReport, SequenceEngine};
pub use gate::{Admission, Claim, InFlight, TriggerGate};
pub use intake::{IntakeOutcome, LeadIntake};
pub use keyword::{KeywordOutcome, KeywordRouter};
pub use media::MediaPool;
pub use persistence::StateDb;
pub use quiet::QuietWindow;
pub use store::{FileStateStore, MemoryStateStore};
