//! RendezvousRegistry — assembles rounds of participants
//!
//! Tracks connected participants and, per (task, round), which of them declared
//! readiness. When a ready set reaches the task's threshold, the sorted peer
//! list is sent to every member and the key is retired. All state sits behind
//! one async mutex, so the threshold check and the broadcast happen as a single
//! step and a key can never be published twice.

use super::tasks::{Task, TaskFeed};
use crate::config::RegistryConfig;
use crate::error::{FedError, Result};
use crate::protocol::{Message, ParticipantId, PeerMessage, Round, ServerMessage, TaskId};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time;

/// A raw JSON frame delivered to a participant
pub type Frame = Vec<u8>;

/// Participant end of a registry connection
///
/// The inbox is unbounded; a participant that stops reading keeps its frames
/// buffered until it disconnects, which releases them.
#[derive(Debug)]
pub struct Connection {
    pub participant_id: ParticipantId,
    pub inbox: mpsc::UnboundedReceiver<Frame>,
}

/// Result of a readiness declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadyOutcome {
    /// Threshold not reached yet
    Waiting { ready: usize, needed: usize },
    /// Peer list published to every listed participant
    Broadcast { peers: Vec<ParticipantId> },
}

/// Read-only counters for observability tooling
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub connected: usize,
    pub pending_rounds: usize,
    pub tasks: usize,
    pub broadcasts: u64,
    pub dropped_frames: u64,
}

type RoundKey = (TaskId, Round);

struct ParticipantEntry {
    outbox: mpsc::UnboundedSender<Frame>,
    connected_at: DateTime<Utc>,
}

#[derive(Default)]
struct RegistryState {
    tasks: HashMap<TaskId, Task>,
    participants: HashMap<ParticipantId, ParticipantEntry>,
    pending: HashMap<RoundKey, BTreeMap<ParticipantId, DateTime<Utc>>>,
    last_broadcast: HashMap<TaskId, Round>,
    broadcasts: u64,
    dropped_frames: u64,
}

impl RegistryState {
    fn deliver(&mut self, to: &ParticipantId, frame: Frame) -> bool {
        let delivered = self
            .participants
            .get(to)
            .map(|entry| entry.outbox.send(frame).is_ok())
            .unwrap_or(false);
        if !delivered {
            self.drop_participant(to);
        }
        delivered
    }

    fn drop_participant(&mut self, id: &ParticipantId) -> bool {
        let removed = self.participants.remove(id).is_some();
        self.pending.retain(|_, ready| {
            ready.remove(id);
            !ready.is_empty()
        });
        removed
    }
}

/// The process-wide rendezvous service
pub struct RendezvousRegistry {
    config: RegistryConfig,
    state: Mutex<RegistryState>,
}

impl RendezvousRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            state: Mutex::new(RegistryState::default()),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Add or replace a task in the catalog; returns true if it was new
    pub async fn add_task(&self, task: Task) -> bool {
        let mut state = self.state.lock().await;
        let id = task.task_id.clone();
        let is_new = state.tasks.insert(id.clone(), task).is_none();
        info!("Task '{}' {}", id, if is_new { "registered" } else { "updated" });
        is_new
    }

    /// Training information lookup
    pub async fn task(&self, task_id: &TaskId) -> Option<Task> {
        self.state.lock().await.tasks.get(task_id).cloned()
    }

    pub async fn task_ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.state.lock().await.tasks.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Drain a task feed into the catalog until the feed or the registry closes
    pub fn listen_for_tasks(self: &Arc<Self>, mut feed: TaskFeed) -> JoinHandle<()> {
        let registry: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(task) = feed.next().await {
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                registry.add_task(task).await;
            }
            debug!("Task feed closed");
        })
    }

    /// Connect a new participant under a fresh identifier
    pub async fn connect(&self) -> Result<Connection> {
        let mut state = self.state.lock().await;
        let mut id = ParticipantId::new();
        while state.participants.contains_key(&id) {
            id = ParticipantId::new();
        }
        Self::attach(&mut state, id)
    }

    /// Reconnect under a previously held identifier
    pub async fn connect_as(&self, id: ParticipantId) -> Result<Connection> {
        let mut state = self.state.lock().await;
        if state.participants.contains_key(&id) {
            return Err(FedError::ParticipantAlreadyConnected(id));
        }
        Self::attach(&mut state, id)
    }

    fn attach(state: &mut RegistryState, id: ParticipantId) -> Result<Connection> {
        let (outbox, inbox) = mpsc::unbounded_channel();
        let greeting = Message::from(ServerMessage::ParticipantConnected).to_bytes()?;
        let identity =
            Message::from(ServerMessage::AssignedIdentity { participant_id: id }).to_bytes()?;
        // Receiver is alive in this scope, sends cannot fail
        let _ = outbox.send(greeting);
        let _ = outbox.send(identity);

        state.participants.insert(
            id,
            ParticipantEntry {
                outbox,
                connected_at: Utc::now(),
            },
        );
        info!("Participant {} connected ({} online)", id.short(), state.participants.len());
        Ok(Connection {
            participant_id: id,
            inbox,
        })
    }

    pub async fn is_connected(&self, id: &ParticipantId) -> bool {
        self.state.lock().await.participants.contains_key(id)
    }

    /// When a participant connected, if it still is
    pub async fn connected_at(&self, id: &ParticipantId) -> Option<DateTime<Utc>> {
        self.state
            .lock()
            .await
            .participants
            .get(id)
            .map(|entry| entry.connected_at)
    }

    /// Record readiness and publish the peer list once the threshold is met
    pub async fn mark_ready(
        &self,
        participant_id: ParticipantId,
        task_id: &TaskId,
        round: Round,
    ) -> Result<ReadyOutcome> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let task = state
            .tasks
            .get(task_id)
            .ok_or_else(|| FedError::UnknownTask(task_id.clone()))?;
        if !state.participants.contains_key(&participant_id) {
            return Err(FedError::UnknownParticipant(participant_id));
        }
        if let Some(&latest) = state.last_broadcast.get(task_id) {
            if round <= latest {
                return Err(FedError::StaleRound {
                    task: task_id.clone(),
                    round,
                    latest,
                });
            }
        }
        let needed = task
            .training
            .min_participants
            .unwrap_or(self.config.min_participants)
            .max(1);

        let key = (task_id.clone(), round);
        let ready = state.pending.entry(key.clone()).or_default();
        ready.entry(participant_id).or_insert_with(Utc::now);
        debug!(
            "Participant {} ready for {}#{} ({}/{})",
            participant_id.short(),
            task_id,
            round,
            ready.len(),
            needed
        );
        if ready.len() < needed {
            return Ok(ReadyOutcome::Waiting {
                ready: ready.len(),
                needed,
            });
        }

        let peers: Vec<ParticipantId> = state
            .pending
            .remove(&key)
            .map(|ready| ready.into_keys().collect())
            .unwrap_or_default();
        let frame = Message::from(ServerMessage::ReadyPeerList {
            peers: peers.clone(),
        })
        .to_bytes()?;
        for peer in &peers {
            if !state.deliver(peer, frame.clone()) {
                warn!("Participant {} left before its peer list arrived", peer.short());
            }
        }

        state.last_broadcast.insert(task_id.clone(), round);
        state.broadcasts += 1;
        state.pending.retain(|(task, pending_round), ready| {
            let stale = task == task_id && *pending_round < round;
            if stale {
                warn!(
                    "Discarding {} pending readiness for superseded round {}#{}",
                    ready.len(),
                    task,
                    pending_round
                );
            }
            !stale
        });
        info!("Round {}#{} starts with {} participants", task_id, round, peers.len());
        Ok(ReadyOutcome::Broadcast { peers })
    }

    /// Take back a readiness that was not answered in time
    pub async fn withdraw(&self, participant_id: &ParticipantId, task_id: &TaskId, round: Round) -> bool {
        let mut state = self.state.lock().await;
        let key = (task_id.clone(), round);
        let Some(ready) = state.pending.get_mut(&key) else {
            return false;
        };
        let removed = ready.remove(participant_id).is_some();
        if ready.is_empty() {
            state.pending.remove(&key);
        }
        removed
    }

    /// Drop a participant from every pending round and close its inbox
    pub async fn disconnect(&self, participant_id: &ParticipantId) -> bool {
        let mut state = self.state.lock().await;
        let removed = state.drop_participant(participant_id);
        if removed {
            info!(
                "Participant {} disconnected ({} online)",
                participant_id.short(),
                state.participants.len()
            );
        }
        removed
    }

    /// Participants currently waiting on a round
    pub async fn pending(&self, task_id: &TaskId, round: Round) -> Vec<ParticipantId> {
        self.state
            .lock()
            .await
            .pending
            .get(&(task_id.clone(), round))
            .map(|ready| ready.keys().copied().collect())
            .unwrap_or_default()
    }

    /// First round of a task a newcomer should declare readiness for
    pub async fn next_round(&self, task_id: &TaskId) -> Result<Round> {
        let state = self.state.lock().await;
        if !state.tasks.contains_key(task_id) {
            return Err(FedError::UnknownTask(task_id.clone()));
        }
        let waiting = state
            .pending
            .keys()
            .filter(|(task, _)| task == task_id)
            .map(|(_, round)| *round)
            .min();
        Ok(waiting.unwrap_or_else(|| {
            state
                .last_broadcast
                .get(task_id)
                .map(|latest| latest + 1)
                .unwrap_or(0)
        }))
    }

    /// Forward a peer message to its destination
    pub async fn route(&self, msg: PeerMessage) -> Result<()> {
        let mut state = self.state.lock().await;
        let sender = msg.sender();
        let destination = msg.destination();
        if !state.participants.contains_key(&sender) {
            return Err(FedError::UnknownParticipant(sender));
        }
        if !state.participants.contains_key(&destination) {
            return Err(FedError::UnknownParticipant(destination));
        }
        let frame = Message::from(msg).to_bytes()?;
        if !state.deliver(&destination, frame) {
            return Err(FedError::UnknownParticipant(destination));
        }
        Ok(())
    }

    /// Inbound boundary for frames sent by participants
    ///
    /// Invalid frames are counted and rejected without touching any state.
    pub async fn dispatch(&self, frame: &[u8]) -> Result<Option<ReadyOutcome>> {
        let msg = match Message::from_bytes(frame) {
            Ok(msg) => msg,
            Err(e) => {
                self.state.lock().await.dropped_frames += 1;
                warn!("Dropped inbound frame: {}", e);
                return Err(e);
            }
        };
        match msg {
            Message::Server(ServerMessage::DeclareReady {
                round,
                participant_id,
                task_id,
            }) => self.mark_ready(participant_id, &task_id, round).await.map(Some),
            Message::Peer(peer) => self.route(peer).await.map(|_| None),
            Message::Server(other) => {
                self.state.lock().await.dropped_frames += 1;
                warn!("Dropped registry-bound frame with outbound type: {:?}", other);
                Err(FedError::InvalidMessage(
                    "participants may only send declareReady or peer messages".into(),
                ))
            }
        }
    }

    /// Remove readiness older than `max_age`; returns how many were removed
    pub async fn prune_stale(&self, max_age: Duration) -> usize {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let mut pruned = 0;
        state.pending.retain(|_, ready| {
            let before = ready.len();
            ready.retain(|_, since| {
                (now - *since)
                    .to_std()
                    .map(|age| age <= max_age)
                    .unwrap_or(true)
            });
            pruned += before - ready.len();
            !ready.is_empty()
        });
        if pruned > 0 {
            info!("Pruned {} stale readiness declarations", pruned);
        }
        pruned
    }

    /// Periodically prune readiness older than the configured ready timeout
    pub fn spawn_pruner(self: &Arc<Self>) -> JoinHandle<()> {
        let registry: Weak<Self> = Arc::downgrade(self);
        let max_age = self.config.ready_timeout();
        tokio::spawn(async move {
            let mut interval = time::interval(max_age / 2 + Duration::from_millis(1));
            loop {
                interval.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                registry.prune_stale(max_age).await;
            }
        })
    }

    pub async fn stats(&self) -> RegistryStats {
        let state = self.state.lock().await;
        RegistryStats {
            connected: state.participants.len(),
            pending_rounds: state.pending.len(),
            tasks: state.tasks.len(),
            broadcasts: state.broadcasts,
            dropped_frames: state.dropped_frames,
        }
    }
}

impl Default for RendezvousRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weights::{encode, WeightVector};

    fn task_id(name: &str) -> TaskId {
        TaskId::new(name).unwrap()
    }

    async fn registry_with(name: &str, threshold: usize) -> RendezvousRegistry {
        let registry = RendezvousRegistry::default();
        registry.add_task(Task::with_threshold(task_id(name), threshold)).await;
        registry
    }

    fn drain(conn: &mut Connection) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(frame) = conn.inbox.try_recv() {
            out.push(Message::from_bytes(&frame).unwrap());
        }
        out
    }

    fn peer_lists(msgs: &[Message]) -> Vec<Vec<ParticipantId>> {
        msgs.iter()
            .filter_map(|m| match m {
                Message::Server(ServerMessage::ReadyPeerList { peers }) => Some(peers.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_connect_sends_identity() {
        let registry = RendezvousRegistry::default();
        let mut conn = registry.connect().await.unwrap();
        let msgs = drain(&mut conn);
        assert_eq!(msgs[0], Message::Server(ServerMessage::ParticipantConnected));
        assert_eq!(
            msgs[1],
            Message::Server(ServerMessage::AssignedIdentity {
                participant_id: conn.participant_id
            })
        );
        assert!(registry.is_connected(&conn.participant_id).await);
        assert!(registry.connected_at(&conn.participant_id).await.is_some());
    }

    #[tokio::test]
    async fn test_threshold_broadcasts_once() {
        let t = task_id("taskT");
        let registry = registry_with("taskT", 2).await;
        let mut a = registry.connect().await.unwrap();
        let mut b = registry.connect().await.unwrap();
        drain(&mut a);
        drain(&mut b);

        let first = registry.mark_ready(a.participant_id, &t, 0).await.unwrap();
        assert_eq!(first, ReadyOutcome::Waiting { ready: 1, needed: 2 });
        // Idempotent
        let again = registry.mark_ready(a.participant_id, &t, 0).await.unwrap();
        assert_eq!(again, ReadyOutcome::Waiting { ready: 1, needed: 2 });

        let second = registry.mark_ready(b.participant_id, &t, 0).await.unwrap();
        let mut expected = vec![a.participant_id, b.participant_id];
        expected.sort();
        assert_eq!(second, ReadyOutcome::Broadcast { peers: expected.clone() });

        assert_eq!(peer_lists(&drain(&mut a)), vec![expected.clone()]);
        assert_eq!(peer_lists(&drain(&mut b)), vec![expected]);

        // Key retired: re-declaring the same round is stale, nothing more is sent
        assert!(matches!(
            registry.mark_ready(a.participant_id, &t, 0).await,
            Err(FedError::StaleRound { round: 0, latest: 0, .. })
        ));
        assert!(drain(&mut a).is_empty());
        assert!(drain(&mut b).is_empty());
        assert_eq!(registry.stats().await.broadcasts, 1);
    }

    #[tokio::test]
    async fn test_unknown_task_and_participant() {
        let registry = registry_with("known", 2).await;
        let conn = registry.connect().await.unwrap();
        assert!(matches!(
            registry.mark_ready(conn.participant_id, &task_id("other"), 0).await,
            Err(FedError::UnknownTask(_))
        ));
        assert!(matches!(
            registry.mark_ready(ParticipantId::new(), &task_id("known"), 0).await,
            Err(FedError::UnknownParticipant(_))
        ));
        assert!(matches!(
            registry.next_round(&task_id("other")).await,
            Err(FedError::UnknownTask(_))
        ));
    }

    #[tokio::test]
    async fn test_disconnect_clears_pending() {
        let t = task_id("t");
        let registry = registry_with("t", 3).await;
        let a = registry.connect().await.unwrap();
        let b = registry.connect().await.unwrap();
        registry.mark_ready(a.participant_id, &t, 0).await.unwrap();
        registry.mark_ready(b.participant_id, &t, 0).await.unwrap();

        assert!(registry.disconnect(&a.participant_id).await);
        assert_eq!(registry.pending(&t, 0).await, vec![b.participant_id]);
        assert!(!registry.is_connected(&a.participant_id).await);
        assert!(!registry.disconnect(&a.participant_id).await);

        assert!(registry.withdraw(&b.participant_id, &t, 0).await);
        assert!(registry.pending(&t, 0).await.is_empty());
        assert_eq!(registry.stats().await.pending_rounds, 0);
    }

    #[tokio::test]
    async fn test_closed_inbox_counts_as_disconnect() {
        let t = task_id("t");
        let registry = registry_with("t", 2).await;
        let a = registry.connect().await.unwrap();
        let mut b = registry.connect().await.unwrap();
        let a_id = a.participant_id;
        drop(a);

        registry.mark_ready(a_id, &t, 0).await.unwrap();
        registry.mark_ready(b.participant_id, &t, 0).await.unwrap();
        assert!(!registry.is_connected(&a_id).await);
        assert_eq!(peer_lists(&drain(&mut b)).len(), 1);
    }

    #[tokio::test]
    async fn test_connect_as() {
        let registry = RendezvousRegistry::default();
        let conn = registry.connect().await.unwrap();
        let id = conn.participant_id;
        assert!(matches!(
            registry.connect_as(id).await,
            Err(FedError::ParticipantAlreadyConnected(_))
        ));
        registry.disconnect(&id).await;
        let again = registry.connect_as(id).await.unwrap();
        assert_eq!(again.participant_id, id);
    }

    #[tokio::test]
    async fn test_next_round_tracks_progress() {
        let t = task_id("t");
        let registry = registry_with("t", 1).await;
        let a = registry.connect().await.unwrap();
        assert_eq!(registry.next_round(&t).await.unwrap(), 0);
        registry.mark_ready(a.participant_id, &t, 0).await.unwrap();
        assert_eq!(registry.next_round(&t).await.unwrap(), 1);
        registry.mark_ready(a.participant_id, &t, 4).await.unwrap();
        assert_eq!(registry.next_round(&t).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_superseded_rounds_discarded() {
        let t = task_id("t");
        let registry = registry_with("t", 2).await;
        let a = registry.connect().await.unwrap();
        let b = registry.connect().await.unwrap();
        let c = registry.connect().await.unwrap();
        registry.mark_ready(a.participant_id, &t, 1).await.unwrap();
        registry.mark_ready(b.participant_id, &t, 2).await.unwrap();
        registry.mark_ready(c.participant_id, &t, 2).await.unwrap();
        assert!(registry.pending(&t, 1).await.is_empty());
        assert_eq!(registry.stats().await.pending_rounds, 0);
    }

    #[tokio::test]
    async fn test_route_and_dispatch() {
        let t = task_id("t");
        let registry = registry_with("t", 2).await;
        let a = registry.connect().await.unwrap();
        let mut b = registry.connect().await.unwrap();
        drain(&mut b);

        let msg = PeerMessage::new(
            crate::protocol::PeerKind::Share,
            a.participant_id,
            encode(&WeightVector::from_columns(&[&[1.0]])),
            b.participant_id,
        );
        let frame = Message::from(msg.clone()).to_bytes().unwrap();
        assert_eq!(registry.dispatch(&frame).await.unwrap(), None);
        assert_eq!(drain(&mut b), vec![Message::Peer(msg)]);

        let ready = Message::from(ServerMessage::DeclareReady {
            round: 0,
            participant_id: a.participant_id,
            task_id: t.clone(),
        })
        .to_bytes()
        .unwrap();
        assert_eq!(
            registry.dispatch(&ready).await.unwrap(),
            Some(ReadyOutcome::Waiting { ready: 1, needed: 2 })
        );

        assert!(matches!(
            registry.dispatch(b"{\"type\":\"sendShare\"}").await,
            Err(FedError::InvalidMessage(_))
        ));
        let outbound = Message::from(ServerMessage::ParticipantConnected).to_bytes().unwrap();
        assert!(registry.dispatch(&outbound).await.is_err());
        assert_eq!(registry.stats().await.dropped_frames, 2);
        // Invalid frames leave state alone
        assert_eq!(registry.pending(&t, 0).await, vec![a.participant_id]);
    }

    #[tokio::test]
    async fn test_route_unknown_destination() {
        let registry = RendezvousRegistry::default();
        let a = registry.connect().await.unwrap();
        let msg = PeerMessage::new(
            crate::protocol::PeerKind::Weights,
            a.participant_id,
            encode(&WeightVector::from_columns(&[&[1.0]])),
            ParticipantId::new(),
        );
        assert!(matches!(
            registry.route(msg).await,
            Err(FedError::UnknownParticipant(_))
        ));
    }

    #[tokio::test]
    async fn test_prune_stale() {
        let t = task_id("t");
        let registry = registry_with("t", 5).await;
        let a = registry.connect().await.unwrap();
        registry.mark_ready(a.participant_id, &t, 0).await.unwrap();
        assert_eq!(registry.prune_stale(Duration::from_secs(60)).await, 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(registry.prune_stale(Duration::from_millis(5)).await, 1);
        assert!(registry.pending(&t, 0).await.is_empty());
    }

    #[tokio::test]
    async fn test_pruner_runs_periodically() {
        let t = task_id("t");
        let config = RegistryConfig {
            ready_timeout_ms: 30,
            ..RegistryConfig::default()
        };
        let registry = Arc::new(RendezvousRegistry::new(config));
        registry.add_task(Task::with_threshold(t.clone(), 5)).await;
        let a = registry.connect().await.unwrap();
        registry.mark_ready(a.participant_id, &t, 0).await.unwrap();

        let pruner = registry.spawn_pruner();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(registry.pending(&t, 0).await.is_empty());
        assert_eq!(registry.stats().await.pending_rounds, 0);

        // The loop ends once the registry is gone
        drop(a);
        drop(registry);
        tokio::time::timeout(Duration::from_millis(200), pruner)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_disconnected_participants_leave_no_state() {
        let registry = RendezvousRegistry::default();
        let mut live = std::collections::HashSet::new();
        for _ in 0..50 {
            let conn = registry.connect().await.unwrap();
            assert!(live.insert(conn.participant_id));
        }
        for id in &live {
            registry.disconnect(id).await;
        }
        let state = registry.state.lock().await;
        assert!(state.participants.is_empty());
        assert!(state.pending.is_empty());
    }

    #[tokio::test]
    async fn test_task_listener() {
        let registry = Arc::new(RendezvousRegistry::default());
        let (publisher, feed) = crate::registry::task_channel(4);
        let handle = registry.listen_for_tasks(feed);
        publisher
            .publish(Task::with_threshold(task_id("late"), 2))
            .await
            .unwrap();
        drop(publisher);
        handle.await.unwrap();
        assert_eq!(registry.task_ids().await, vec![task_id("late")]);
        assert_eq!(
            registry.task(&task_id("late")).await.unwrap().training.min_participants,
            Some(2)
        );
    }

    #[tokio::test]
    async fn test_concurrent_readiness_single_broadcast() {
        let t = task_id("t");
        let registry = Arc::new(registry_with("t", 8).await);
        let mut conns = Vec::new();
        for _ in 0..8 {
            conns.push(registry.connect().await.unwrap());
        }
        let handles: Vec<_> = conns
            .iter()
            .map(|c| {
                let registry = registry.clone();
                let id = c.participant_id;
                let t = t.clone();
                tokio::spawn(async move { registry.mark_ready(id, &t, 0).await.unwrap() })
            })
            .collect();
        let mut broadcasts = 0;
        for h in handles {
            if let ReadyOutcome::Broadcast { peers } = h.await.unwrap() {
                assert_eq!(peers.len(), 8);
                broadcasts += 1;
            }
        }
        assert_eq!(broadcasts, 1);
        for conn in &mut conns {
            assert_eq!(peer_lists(&drain(conn)).len(), 1);
        }
    }
}
