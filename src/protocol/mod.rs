//! Message protocol for round coordination
//!
//! Participants talk to the registry with server messages and to each other with
//! destination-routed peer messages. All inbound frames go through
//! [`Message::from_bytes`], which rejects anything that is not exactly one of
//! the defined variants.

mod ids;
mod messages;

pub use ids::{ParticipantId, Round, TaskId};
pub use messages::{
    is_message, is_peer_message, is_server_message, Message, PeerKind, PeerMessage,
    ServerMessage,
};
