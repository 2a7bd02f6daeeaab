//! Participant-side round coordination
//!
//! - `participant` — the per-participant state machine (plain and secure rounds)
//! - `stats` — round reports and coordinator snapshots

mod participant;
mod stats;

pub use participant::{AggregationMode, ParticipantCoordinator, Phase};
pub use stats::{CoordinatorStats, RoundOutcome, RoundReport};
