//! Round-coordination protocol messages
//!
//! Defines every message exchanged between participants and the registry, and
//! the validating parser that turns untrusted JSON into typed messages.

use super::ids::{ParticipantId, Round, TaskId};
use crate::error::{FedError, Result};
use crate::weights::{is_valid_encoding, EncodedWeights};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

const SERVER_TAGS: &[&str] = &[
    "participantConnected",
    "assignedIdentity",
    "declareReady",
    "readyPeerList",
];

const PEER_TAGS: &[&str] = &["sendWeights", "sendShare", "sendPartialSum"];

/// Messages between the registry and a participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Connection acknowledged
    ParticipantConnected,
    /// Identity assigned to the new connection
    #[serde(rename_all = "camelCase")]
    AssignedIdentity { participant_id: ParticipantId },
    /// Participant is ready for `round` of `task_id`
    #[serde(rename_all = "camelCase")]
    DeclareReady {
        round: Round,
        participant_id: ParticipantId,
        task_id: TaskId,
    },
    /// Final list of peers for a round, including the receiver
    ReadyPeerList { peers: Vec<ParticipantId> },
}

/// Messages routed from one participant to another through `destination`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PeerMessage {
    /// Raw weights, plain averaging
    #[serde(rename_all = "camelCase")]
    SendWeights {
        participant_id: ParticipantId,
        weights: EncodedWeights,
        destination: ParticipantId,
    },
    /// One share of the sender's weights
    #[serde(rename_all = "camelCase")]
    SendShare {
        participant_id: ParticipantId,
        weights: EncodedWeights,
        destination: ParticipantId,
    },
    /// The sender's sum of the shares it received
    #[serde(rename_all = "camelCase")]
    SendPartialSum {
        participant_id: ParticipantId,
        weights: EncodedWeights,
        destination: ParticipantId,
    },
}

/// Payload kind of a peer message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerKind {
    Weights,
    Share,
    PartialSum,
}

impl PeerMessage {
    pub fn new(
        kind: PeerKind,
        participant_id: ParticipantId,
        weights: EncodedWeights,
        destination: ParticipantId,
    ) -> Self {
        match kind {
            PeerKind::Weights => Self::SendWeights { participant_id, weights, destination },
            PeerKind::Share => Self::SendShare { participant_id, weights, destination },
            PeerKind::PartialSum => Self::SendPartialSum { participant_id, weights, destination },
        }
    }

    pub fn kind(&self) -> PeerKind {
        match self {
            Self::SendWeights { .. } => PeerKind::Weights,
            Self::SendShare { .. } => PeerKind::Share,
            Self::SendPartialSum { .. } => PeerKind::PartialSum,
        }
    }

    pub fn sender(&self) -> ParticipantId {
        match self {
            Self::SendWeights { participant_id, .. }
            | Self::SendShare { participant_id, .. }
            | Self::SendPartialSum { participant_id, .. } => *participant_id,
        }
    }

    pub fn destination(&self) -> ParticipantId {
        match self {
            Self::SendWeights { destination, .. }
            | Self::SendShare { destination, .. }
            | Self::SendPartialSum { destination, .. } => *destination,
        }
    }

    pub fn weights(&self) -> &EncodedWeights {
        match self {
            Self::SendWeights { weights, .. }
            | Self::SendShare { weights, .. }
            | Self::SendPartialSum { weights, .. } => weights,
        }
    }
}

/// Any protocol message
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Message {
    Server(ServerMessage),
    Peer(PeerMessage),
}

impl Message {
    /// Parse and validate an untrusted JSON value
    pub fn from_value(raw: &Value) -> Result<Self> {
        let obj = raw
            .as_object()
            .ok_or_else(|| invalid("message is not an object"))?;
        let tag = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid("missing string discriminant 'type'"))?;

        if SERVER_TAGS.contains(&tag) {
            let msg: ServerMessage = serde_json::from_value(raw.clone())
                .map_err(|e| invalid(format!("malformed {}: {}", tag, e)))?;
            if let ServerMessage::ReadyPeerList { peers } = &msg {
                let unique: HashSet<&ParticipantId> = peers.iter().collect();
                if unique.len() != peers.len() {
                    return Err(invalid("peer list contains duplicates"));
                }
            }
            Ok(Self::Server(msg))
        } else if PEER_TAGS.contains(&tag) {
            let msg: PeerMessage = serde_json::from_value(raw.clone())
                .map_err(|e| invalid(format!("malformed {}: {}", tag, e)))?;
            if !is_valid_encoding(msg.weights()) {
                return Err(invalid(format!("{} carries an invalid weight encoding", tag)));
            }
            Ok(Self::Peer(msg))
        } else {
            Err(invalid(format!("unknown message type '{}'", tag)))
        }
    }

    /// Parse and validate a raw JSON frame
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let value: Value =
            serde_json::from_slice(data).map_err(|e| invalid(format!("not JSON: {}", e)))?;
        Self::from_value(&value)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl From<ServerMessage> for Message {
    fn from(msg: ServerMessage) -> Self {
        Self::Server(msg)
    }
}

impl From<PeerMessage> for Message {
    fn from(msg: PeerMessage) -> Self {
        Self::Peer(msg)
    }
}

pub fn is_server_message(raw: &Value) -> bool {
    matches!(Message::from_value(raw), Ok(Message::Server(_)))
}

pub fn is_peer_message(raw: &Value) -> bool {
    matches!(Message::from_value(raw), Ok(Message::Peer(_)))
}

pub fn is_message(raw: &Value) -> bool {
    Message::from_value(raw).is_ok()
}

fn invalid(reason: impl Into<String>) -> FedError {
    FedError::InvalidMessage(reason.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weights::{encode, WeightVector};
    use serde_json::json;

    fn encoded() -> Value {
        serde_json::to_value(encode(&WeightVector::from_columns(&[&[1.0, 2.0]]))).unwrap()
    }

    fn server_samples() -> Vec<Value> {
        let id = ParticipantId::new().to_string();
        vec![
            json!({ "type": "assignedIdentity", "participantId": id }),
            json!({ "type": "declareReady", "round": 0, "participantId": id, "taskId": "titanic" }),
            json!({ "type": "readyPeerList", "peers": [id] }),
        ]
    }

    fn peer_samples() -> Vec<Value> {
        let from = ParticipantId::new().to_string();
        let to = ParticipantId::new().to_string();
        ["sendWeights", "sendShare", "sendPartialSum"]
            .iter()
            .map(|tag| {
                json!({ "type": tag, "participantId": from, "weights": encoded(), "destination": to })
            })
            .collect()
    }

    #[test]
    fn test_minimal_messages_accepted() {
        assert!(is_server_message(&json!({ "type": "participantConnected" })));
        for sample in server_samples() {
            assert!(is_server_message(&sample), "rejected {}", sample);
            assert!(!is_peer_message(&sample));
        }
        for sample in peer_samples() {
            assert!(is_peer_message(&sample), "rejected {}", sample);
            assert!(!is_server_message(&sample));
            assert!(is_message(&sample));
        }
    }

    #[test]
    fn test_missing_field_rejected() {
        for sample in server_samples().into_iter().chain(peer_samples()) {
            let fields: Vec<String> = sample.as_object().unwrap().keys().cloned().collect();
            for field in fields {
                let mut broken = sample.clone();
                broken.as_object_mut().unwrap().remove(&field);
                assert!(!is_message(&broken), "accepted {} without {}", sample, field);
            }
        }
    }

    #[test]
    fn test_wrong_primitive_type_rejected() {
        for sample in server_samples().into_iter().chain(peer_samples()) {
            let fields: Vec<String> = sample.as_object().unwrap().keys().cloned().collect();
            for field in fields {
                let mut broken = sample.clone();
                broken[field.as_str()] = json!(true);
                assert!(!is_message(&broken), "accepted {} with boolean {}", sample, field);
            }
        }
    }

    #[test]
    fn test_well_typed_wrong_shape_rejected() {
        let id = ParticipantId::new().to_string();
        let bad = vec![
            json!(null),
            json!([1, 2, 3]),
            json!("declareReady"),
            json!({ "type": 3 }),
            json!({ "type": "noSuchMessage" }),
            json!({ "type": "declareReady", "round": -1, "participantId": id, "taskId": "t" }),
            json!({ "type": "declareReady", "round": 1.5, "participantId": id, "taskId": "t" }),
            json!({ "type": "declareReady", "round": 1, "participantId": "peer-1", "taskId": "t" }),
            json!({ "type": "declareReady", "round": 1, "participantId": id, "taskId": "" }),
            json!({ "type": "readyPeerList", "peers": [id, id] }),
            json!({ "type": "readyPeerList", "peers": [1] }),
            json!({ "type": "sendShare", "participantId": id, "weights": { "layers": [] }, "destination": id }),
        ];
        for raw in bad {
            assert!(!is_message(&raw), "accepted {}", raw);
        }
    }

    #[test]
    fn test_tampered_weights_rejected() {
        let mut sample = peer_samples().remove(1);
        sample["weights"]["checksum"] = json!("00");
        assert!(matches!(
            Message::from_value(&sample),
            Err(FedError::InvalidMessage(_))
        ));
    }

    #[test]
    fn test_bytes_roundtrip() {
        let from = ParticipantId::new();
        let to = ParticipantId::new();
        let msg = Message::Peer(PeerMessage::new(
            PeerKind::PartialSum,
            from,
            encode(&WeightVector::from_columns(&[&[3.0]])),
            to,
        ));
        let decoded = Message::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, msg);
        match decoded {
            Message::Peer(peer) => {
                assert_eq!(peer.kind(), PeerKind::PartialSum);
                assert_eq!(peer.sender(), from);
                assert_eq!(peer.destination(), to);
            }
            _ => panic!("Wrong message type"),
        }
        assert!(Message::from_bytes(b"{not json").is_err());
    }

    #[test]
    fn test_wire_names() {
        let msg = Message::Server(ServerMessage::DeclareReady {
            round: 4,
            participant_id: ParticipantId::new(),
            task_id: TaskId::new("mnist").unwrap(),
        });
        let value: Value = serde_json::from_slice(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(value["type"], "declareReady");
        assert_eq!(value["round"], 4);
        assert_eq!(value["taskId"], "mnist");
        assert!(value["participantId"].is_string());
    }
}
