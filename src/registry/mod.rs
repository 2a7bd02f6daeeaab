//! Rendezvous registry — matches participants into rounds
//!
//! - **Rendezvous**: connections, per-round readiness, peer-list broadcast, routing
//! - **Tasks**: the task catalog and its bounded publication queue

mod rendezvous;
mod tasks;

pub use rendezvous::{Connection, Frame, ReadyOutcome, RegistryStats, RendezvousRegistry};
pub use tasks::{task_channel, Task, TaskFeed, TaskPublisher, TrainingInformation};
