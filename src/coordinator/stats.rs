//! Round statistics exposed by a coordinator

use super::AggregationMode;
use crate::protocol::{ParticipantId, Round, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a round ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RoundOutcome {
    Completed,
    Failed(String),
}

/// Record of one round from a participant's point of view
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundReport {
    pub round: Round,
    pub mode: AggregationMode,
    /// Participants in the published peer list, including this one
    pub peers: usize,
    /// Weights or shares that reached this participant, including its own
    pub contributions: usize,
    /// Partial sums that reached this participant (secure mode), including its own
    pub partial_sums: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: Option<RoundOutcome>,
}

impl RoundReport {
    pub(crate) fn start(round: Round, mode: AggregationMode) -> Self {
        Self {
            round,
            mode,
            peers: 0,
            contributions: 0,
            partial_sums: 0,
            started_at: Utc::now(),
            finished_at: None,
            outcome: None,
        }
    }

    pub(crate) fn finish(&mut self, outcome: RoundOutcome) {
        self.finished_at = Some(Utc::now());
        self.outcome = Some(outcome);
    }

    /// Wall-clock duration in milliseconds, once finished
    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}

/// Read-only snapshot of a coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorStats {
    pub participant_id: Option<ParticipantId>,
    pub task_id: Option<TaskId>,
    /// Next round this participant will declare readiness for
    pub round: Round,
    pub phase: String,
    pub rounds_completed: u64,
    pub rounds_failed: u64,
    pub last_report: Option<RoundReport>,
}

impl CoordinatorStats {
    pub fn summary(&self) -> String {
        format!(
            "Participant {} | task {} | round {} | phase {} | {} completed, {} failed",
            self.participant_id
                .map(|id| id.short())
                .unwrap_or_else(|| "-".to_string()),
            self.task_id
                .as_ref()
                .map(|t| t.to_string())
                .unwrap_or_else(|| "-".to_string()),
            self.round,
            self.phase,
            self.rounds_completed,
            self.rounds_failed
        )
    }
}
