//! Task catalog and task publication
//!
//! New tasks reach the registry through a bounded queue: publishers wait when
//! the registry falls behind, and either side may go away without the other
//! holding a reference to it.

use crate::error::{FedError, Result};
use crate::protocol::TaskId;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Training settings the registry needs from a task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingInformation {
    /// Ready participants required before a round starts (registry default if unset)
    pub min_participants: Option<usize>,
    /// Planned number of rounds, informational
    pub rounds: u64,
    pub description: String,
}

/// A learning task participants can join
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub training: TrainingInformation,
}

impl Task {
    pub fn new(task_id: TaskId, training: TrainingInformation) -> Self {
        Self { task_id, training }
    }

    /// Task whose rounds start once `min_participants` are ready
    pub fn with_threshold(task_id: TaskId, min_participants: usize) -> Self {
        Self::new(
            task_id,
            TrainingInformation {
                min_participants: Some(min_participants),
                ..TrainingInformation::default()
            },
        )
    }
}

/// Producer side of the task queue
#[derive(Debug, Clone)]
pub struct TaskPublisher {
    tx: mpsc::Sender<Task>,
}

impl TaskPublisher {
    /// Publish a task, waiting for queue capacity
    pub async fn publish(&self, task: Task) -> Result<()> {
        self.tx
            .send(task)
            .await
            .map_err(|e| FedError::ChannelClosed(format!("task feed dropped task {}", e.0.task_id)))
    }
}

/// Consumer side of the task queue, drained by the registry
#[derive(Debug)]
pub struct TaskFeed {
    rx: mpsc::Receiver<Task>,
}

impl TaskFeed {
    pub async fn next(&mut self) -> Option<Task> {
        self.rx.recv().await
    }
}

/// Create a bounded task queue
pub fn task_channel(capacity: usize) -> (TaskPublisher, TaskFeed) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (TaskPublisher { tx }, TaskFeed { rx })
}
