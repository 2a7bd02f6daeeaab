//! FedShare — secure multi-party federated averaging
//!
//! Participants meet at a rendezvous registry, wait for a round's peer list and
//! then average their model weights, either in the clear or through additive
//! secret shares so that no single peer sees another's weights.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod sharing;
pub mod weights;

pub use config::{CoordinatorConfig, FedConfig, RegistryConfig};
pub use coordinator::{AggregationMode, CoordinatorStats, ParticipantCoordinator, Phase};
pub use error::{FedError, Result};
pub use protocol::{Message, ParticipantId, PeerMessage, Round, ServerMessage, TaskId};
pub use registry::{RendezvousRegistry, Task, TrainingInformation};
pub use sharing::{generate_all_shares, reconstruct_secret, RngSecurity};
pub use weights::{average, WeightVector};
