//! ParticipantCoordinator — drives one participant through aggregation rounds
//!
//! Phases: Disconnected → Connecting → WaitingForPeers →
//! ExchangingWeightsOrShares → ExchangingPartialSums → RoundComplete, then back
//! to WaitingForPeers for the next round. Every wait is bounded; missing peers
//! degrade the round to whatever arrived, except that nothing at all is fatal.

use super::stats::{CoordinatorStats, RoundOutcome, RoundReport};
use crate::config::CoordinatorConfig;
use crate::error::{FedError, Result};
use crate::protocol::{
    Message, ParticipantId, PeerKind, PeerMessage, Round, ServerMessage, TaskId,
};
use crate::registry::{Frame, ReadyOutcome, RendezvousRegistry};
use crate::sharing::{generate_all_shares_with, share_rng, ShareRng, ShareSet};
use crate::weights::{decode, encode, WeightVector};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{self, Instant};

/// How participants combine their weights
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregationMode {
    /// Send raw weights to every peer and average them
    Plain,
    /// Send one additive share to every peer, then exchange partial sums
    Secure,
}

/// Coordinator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Disconnected,
    Connecting,
    WaitingForPeers,
    ExchangingWeightsOrShares,
    ExchangingPartialSums,
    RoundComplete,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Per-participant protocol driver; owns its state exclusively
pub struct ParticipantCoordinator {
    registry: Arc<RendezvousRegistry>,
    config: CoordinatorConfig,
    phase: Phase,
    participant_id: Option<ParticipantId>,
    task_id: Option<TaskId>,
    round: Round,
    inbox: Option<UnboundedReceiver<Frame>>,
    /// Peer messages that arrived ahead of their phase
    backlog: VecDeque<PeerMessage>,
    /// Round whose readiness is declared but unanswered
    pending_ready: Option<Round>,
    rounds_completed: u64,
    rounds_failed: u64,
    last_report: Option<RoundReport>,
}

impl ParticipantCoordinator {
    pub fn new(registry: Arc<RendezvousRegistry>, config: CoordinatorConfig) -> Self {
        Self {
            registry,
            config,
            phase: Phase::Disconnected,
            participant_id: None,
            task_id: None,
            round: 0,
            inbox: None,
            backlog: VecDeque::new(),
            pending_ready: None,
            rounds_completed: 0,
            rounds_failed: 0,
            last_report: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn participant_id(&self) -> Option<ParticipantId> {
        self.participant_id
    }

    pub fn round(&self) -> Round {
        self.round
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            participant_id: self.participant_id,
            task_id: self.task_id.clone(),
            round: self.round,
            phase: self.phase.to_string(),
            rounds_completed: self.rounds_completed,
            rounds_failed: self.rounds_failed,
            last_report: self.last_report.clone(),
        }
    }

    /// Join the registry for `task_id`, optionally reclaiming an earlier identity
    pub async fn connect(&mut self, participant_id: Option<ParticipantId>, task_id: TaskId) -> Result<()> {
        if self.phase != Phase::Disconnected {
            return Err(self.invalid_state("Disconnected"));
        }
        if self.registry.task(&task_id).await.is_none() {
            return Err(FedError::UnknownTask(task_id));
        }

        self.phase = Phase::Connecting;
        let connection = match participant_id {
            Some(id) => self.registry.connect_as(id).await,
            None => self.registry.connect().await,
        };
        let mut connection = match connection {
            Ok(connection) => connection,
            Err(e) => {
                self.phase = Phase::Disconnected;
                return Err(e);
            }
        };

        let id = connection.participant_id;
        let deadline = Instant::now() + self.config.identity_timeout();
        let joined = match await_identity(&mut connection.inbox, id, deadline).await {
            Ok(()) => self.registry.next_round(&task_id).await,
            Err(e) => Err(e),
        };
        let round = match joined {
            Ok(round) => round,
            Err(e) => {
                self.registry.disconnect(&id).await;
                self.phase = Phase::Disconnected;
                return Err(e);
            }
        };

        info!("Participant {} joined task '{}' at round {}", id.short(), task_id, round);
        self.participant_id = Some(id);
        self.task_id = Some(task_id);
        self.round = round;
        self.inbox = Some(connection.inbox);
        self.backlog.clear();
        self.pending_ready = None;
        Ok(())
    }

    /// Run one aggregation round and return the averaged weights
    pub async fn run_round(&mut self, local: &WeightVector) -> Result<WeightVector> {
        if self.phase == Phase::Disconnected {
            return Err(self.invalid_state("connected"));
        }
        let (Some(me), Some(task_id)) = (self.participant_id, self.task_id.clone()) else {
            return Err(self.invalid_state("connected"));
        };

        if let Some(abandoned) = self.pending_ready.take() {
            self.registry.withdraw(&me, &task_id, abandoned).await;
        }

        let round = self.round;
        self.round += 1;
        let mut report = RoundReport::start(round, self.config.mode);

        let result = self.execute_round(me, &task_id, round, local, &mut report).await;
        match &result {
            Ok(_) => {
                self.phase = Phase::RoundComplete;
                self.rounds_completed += 1;
                report.finish(RoundOutcome::Completed);
                info!(
                    "Participant {} completed round {}#{} with {} contributions",
                    me.short(),
                    task_id,
                    round,
                    report.contributions
                );
            }
            Err(e) => {
                self.rounds_failed += 1;
                report.finish(RoundOutcome::Failed(e.to_string()));
                warn!("Participant {} failed round {}#{}: {}", me.short(), task_id, round, e);
                match e {
                    FedError::StaleRound { latest, .. } => self.round = latest + 1,
                    FedError::ChannelClosed(_) => self.reset(),
                    _ => {}
                }
                if self.phase != Phase::Disconnected {
                    self.phase = Phase::Connecting;
                }
            }
        }
        self.last_report = Some(report);
        result
    }

    /// Leave the registry from any state and discard local state
    pub async fn disconnect(&mut self) -> Result<()> {
        if let Some(id) = self.participant_id {
            self.registry.disconnect(&id).await;
            info!("Participant {} disconnected", id.short());
        }
        self.reset();
        Ok(())
    }

    fn reset(&mut self) {
        self.phase = Phase::Disconnected;
        self.participant_id = None;
        self.task_id = None;
        self.round = 0;
        self.inbox = None;
        self.backlog.clear();
        self.pending_ready = None;
    }

    async fn execute_round(
        &mut self,
        me: ParticipantId,
        task_id: &TaskId,
        round: Round,
        local: &WeightVector,
        report: &mut RoundReport,
    ) -> Result<WeightVector> {
        // Fail on an unavailable security level before anyone waits on us
        let mut rng = match self.config.mode {
            AggregationMode::Secure => Some(share_rng(self.config.rng_security)?),
            AggregationMode::Plain => None,
        };

        // Nothing can belong to this round before its peer list exists
        if let Some(inbox) = self.inbox.as_mut() {
            while inbox.try_recv().is_ok() {}
        }
        self.backlog.clear();

        self.phase = Phase::WaitingForPeers;
        let peers = self.wait_for_peers(me, task_id, round).await?;
        report.peers = peers.len();

        let others: Vec<ParticipantId> = peers.iter().copied().filter(|p| *p != me).collect();
        if others.is_empty() {
            report.contributions = 1;
            return Ok(local.clone());
        }

        self.phase = Phase::ExchangingWeightsOrShares;
        match rng.as_mut() {
            None => self.plain_exchange(me, &peers, &others, local, report).await,
            Some(rng) => {
                self.secure_exchange(me, &peers, &others, local, rng.as_mut(), report)
                    .await
            }
        }
    }

    async fn wait_for_peers(
        &mut self,
        me: ParticipantId,
        task_id: &TaskId,
        round: Round,
    ) -> Result<Vec<ParticipantId>> {
        let declaration = ServerMessage::DeclareReady {
            round,
            participant_id: me,
            task_id: task_id.clone(),
        };
        if let Some(ReadyOutcome::Waiting { ready, needed }) = self.send(declaration.into()).await? {
            debug!("Participant {} waiting for peers ({}/{})", me.short(), ready, needed);
        }
        self.pending_ready = Some(round);

        let deadline = Instant::now() + self.config.ready_timeout();
        let inbox = self.inbox.as_mut().ok_or_else(closed_inbox)?;
        loop {
            match next_message(inbox, deadline).await? {
                Some(Message::Server(ServerMessage::ReadyPeerList { peers })) => {
                    if !peers.contains(&me) {
                        warn!("Ignoring a peer list that does not include {}", me.short());
                        continue;
                    }
                    self.pending_ready = None;
                    return Ok(peers);
                }
                // Peers only send after the peer list, so this is left over from an earlier round
                Some(Message::Peer(msg)) => debug!(
                    "Dropping late {:?} from {} while waiting for peers",
                    msg.kind(),
                    msg.sender().short()
                ),
                Some(other) => debug!("Waiting for peers: ignoring {:?}", other),
                None => {
                    self.pending_ready = None;
                    self.registry.withdraw(&me, task_id, round).await;
                    return Err(FedError::Timeout(format!(
                        "waiting for peers of round {}#{}",
                        task_id, round
                    )));
                }
            }
        }
    }

    async fn plain_exchange(
        &mut self,
        me: ParticipantId,
        peers: &[ParticipantId],
        others: &[ParticipantId],
        local: &WeightVector,
        report: &mut RoundReport,
    ) -> Result<WeightVector> {
        let encoded = encode(local);
        for peer in others {
            self.send_to_peer(PeerMessage::new(PeerKind::Weights, me, encoded.clone(), *peer))
                .await;
        }

        let mut received = ShareSet::new(peers.iter().copied());
        received.insert(me, local.clone());
        self.collect(me, PeerKind::Weights, &mut received).await?;
        report.contributions = received.received_count();

        if received.received_count() == 1 {
            return Err(FedError::EmptyAggregation);
        }
        if !received.is_complete() {
            warn!(
                "Averaging {} of {} weight vectors, missing {:?}",
                received.received_count(),
                received.expected_count(),
                received.missing().iter().map(|p| p.short()).collect::<Vec<_>>()
            );
        }
        let total = received.partial_sum()?;
        Ok(total.scale_down(received.received_count() as f64))
    }

    async fn secure_exchange(
        &mut self,
        me: ParticipantId,
        peers: &[ParticipantId],
        others: &[ParticipantId],
        local: &WeightVector,
        rng: &mut dyn ShareRng,
        report: &mut RoundReport,
    ) -> Result<WeightVector> {
        let shares =
            generate_all_shares_with(local, peers.len(), self.config.max_share_value, rng)?;
        let mut own_share = None;
        for (peer, share) in peers.iter().zip(shares) {
            if *peer == me {
                own_share = Some(share);
            } else {
                self.send_to_peer(PeerMessage::new(PeerKind::Share, me, encode(&share), *peer))
                    .await;
            }
        }

        let mut share_set = ShareSet::new(peers.iter().copied());
        if let Some(share) = own_share {
            share_set.insert(me, share);
        }
        self.collect(me, PeerKind::Share, &mut share_set).await?;
        report.contributions = share_set.received_count();
        if share_set.received_count() <= 1 {
            return Err(FedError::EmptyAggregation);
        }

        self.phase = Phase::ExchangingPartialSums;
        if !share_set.is_complete() {
            // An incomplete partial sum would silently corrupt every peer's total
            warn!(
                "Withholding partial sum: shares missing from {:?}",
                share_set.missing().iter().map(|p| p.short()).collect::<Vec<_>>()
            );
            return Err(FedError::IncompleteShareSet {
                expected: share_set.expected_count(),
                received: share_set.received_count(),
            });
        }
        let partial = share_set.partial_sum()?;
        let encoded = encode(&partial);
        for peer in others {
            self.send_to_peer(PeerMessage::new(PeerKind::PartialSum, me, encoded.clone(), *peer))
                .await;
        }

        let mut partial_set = ShareSet::new(peers.iter().copied());
        partial_set.insert(me, partial);
        self.collect(me, PeerKind::PartialSum, &mut partial_set).await?;
        report.partial_sums = partial_set.received_count();
        if partial_set.received_count() <= 1 {
            return Err(FedError::EmptyAggregation);
        }

        let total = partial_set.reconstruct()?;
        Ok(total.scale_down(peers.len() as f64))
    }

    /// Gather peer contributions of `kind` until complete or the exchange times out
    async fn collect(&mut self, me: ParticipantId, kind: PeerKind, set: &mut ShareSet) -> Result<()> {
        for msg in std::mem::take(&mut self.backlog) {
            if msg.kind() == kind {
                accept(me, msg, set);
            } else {
                self.backlog.push_back(msg);
            }
        }

        let deadline = Instant::now() + self.config.exchange_timeout();
        let inbox = self.inbox.as_mut().ok_or_else(closed_inbox)?;
        while !set.is_complete() {
            match next_message(inbox, deadline).await? {
                Some(Message::Peer(msg)) if msg.kind() == kind => accept(me, msg, set),
                Some(Message::Peer(msg)) => self.backlog.push_back(msg),
                Some(other) => debug!("Exchange: ignoring {:?}", other),
                None => {
                    debug!(
                        "Exchange of {:?} timed out with {}/{} contributions",
                        kind,
                        set.received_count(),
                        set.expected_count()
                    );
                    break;
                }
            }
        }
        Ok(())
    }

    async fn send(&self, msg: Message) -> Result<Option<ReadyOutcome>> {
        let frame = msg.to_bytes()?;
        self.registry.dispatch(&frame).await
    }

    /// Best-effort delivery; a vanished peer is only logged
    async fn send_to_peer(&self, msg: PeerMessage) {
        let destination = msg.destination();
        if let Err(e) = self.send(msg.into()).await {
            warn!("Could not reach peer {}: {}", destination.short(), e);
        }
    }

    fn invalid_state(&self, expected: &str) -> FedError {
        FedError::InvalidState {
            expected: expected.to_string(),
            actual: self.phase.to_string(),
        }
    }
}

fn accept(me: ParticipantId, msg: PeerMessage, set: &mut ShareSet) {
    let sender = msg.sender();
    if msg.destination() != me {
        warn!("Dropping {:?} from {} addressed to another participant", msg.kind(), sender.short());
        return;
    }
    match decode(msg.weights()) {
        Ok(weights) => {
            if !set.insert(sender, weights) {
                debug!("Dropping unexpected or duplicate {:?} from {}", msg.kind(), sender.short());
            }
        }
        Err(e) => warn!("Dropping {:?} from {}: {}", msg.kind(), sender.short(), e),
    }
}

fn closed_inbox() -> FedError {
    FedError::ChannelClosed("participant inbox is gone".into())
}

async fn await_identity(
    inbox: &mut UnboundedReceiver<Frame>,
    id: ParticipantId,
    deadline: Instant,
) -> Result<()> {
    loop {
        match next_message(inbox, deadline).await? {
            Some(Message::Server(ServerMessage::AssignedIdentity { participant_id })) => {
                if participant_id == id {
                    return Ok(());
                }
                warn!("Ignoring identity {} addressed to another connection", participant_id);
            }
            Some(other) => debug!("Connecting: ignoring {:?}", other),
            None => return Err(FedError::Timeout("waiting for an assigned identity".into())),
        }
    }
}

/// Next valid message before `deadline`; invalid frames are dropped
async fn next_message(
    inbox: &mut UnboundedReceiver<Frame>,
    deadline: Instant,
) -> Result<Option<Message>> {
    loop {
        match time::timeout_at(deadline, inbox.recv()).await {
            Err(_) => return Ok(None),
            Ok(None) => return Err(FedError::ChannelClosed("registry closed the inbox".into())),
            Ok(Some(frame)) => match Message::from_bytes(&frame) {
                Ok(msg) => return Ok(Some(msg)),
                Err(e) => warn!("Dropped inbound frame: {}", e),
            },
        }
    }
}
