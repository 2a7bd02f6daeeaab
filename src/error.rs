//! Error kinds shared by every component of the aggregation protocol.

use crate::protocol::{ParticipantId, Round, TaskId};
use crate::sharing::RngSecurity;

/// Errors raised by weight algebra, secret sharing, the registry and coordinators
#[derive(Debug, thiserror::Error)]
pub enum FedError {
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Unknown task: {0}")]
    UnknownTask(TaskId),

    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("Nothing to aggregate")]
    EmptyAggregation,

    #[error("Random generation mode not implemented: {0:?}")]
    NotImplemented(RngSecurity),

    #[error("Incomplete share set: received {received} of {expected}")]
    IncompleteShareSet { expected: usize, received: usize },

    #[error("Timed out while {0}")]
    Timeout(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Unknown participant: {0}")]
    UnknownParticipant(ParticipantId),

    #[error("Participant already connected: {0}")]
    ParticipantAlreadyConnected(ParticipantId),

    #[error("Stale round {round} for task {task}, last broadcast was {latest}")]
    StaleRound { task: TaskId, round: Round, latest: Round },

    #[error("Invalid state: expected {expected}, was {actual}")]
    InvalidState { expected: String, actual: String },

    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FedError>;
