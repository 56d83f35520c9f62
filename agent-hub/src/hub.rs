//! The Agent Hub (spec §4.6): one logical session per connected agent,
//! identified by the peer's `token`. Sans-io on purpose - this module owns
//! session lifecycle, the bounded send queue and sequence-number
//! bookkeeping; the actual framed socket loop lives in `wgmesh-controld`
//! (or the in-memory harness in [`crate::testing`]), so this crate's tests
//! can exercise the displacement/resume/TTL contracts without a network.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use uuid::Uuid;
use wgmesh_types::{MAX_MISSED_HEARTBEATS, SESSION_QUEUE_TTL_SECS};

use crate::protocol::{Payload, ServerMessage};

/// A session's lifecycle state (spec §4.6: "connected | draining | closed").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Draining,
    Closed,
}

#[derive(Clone, Debug)]
struct QueuedEntry {
    seq: u64,
    payload: Payload,
}

struct SessionInner {
    id: Uuid,
    state: SessionState,
    queue: VecDeque<QueuedEntry>,
    next_seq: u64,
    missed_heartbeats: u32,
    closed_at: Option<Instant>,
}

impl SessionInner {
    fn fresh() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SessionState::Connected,
            queue: VecDeque::new(),
            next_seq: 0,
            missed_heartbeats: 0,
            closed_at: None,
        }
    }

    fn ttl_expired(&self, queue_ttl: Duration) -> bool {
        self.state == SessionState::Closed && self.closed_at.map(|at| at.elapsed() > queue_ttl).unwrap_or(false)
    }
}

/// Bounded FIFO depth per session (spec §4.6). Generous relative to a
/// single network's compiled-artifact count: a peer has at most one
/// pending WireGuard config and, if it's a jump peer, one pending
/// iptables ruleset and one DNS set at a time under normal operation: this
/// only matters when a peer is offline long enough to accumulate several
/// recompiles.
pub const DEFAULT_QUEUE_CAPACITY: usize = 512;

/// Outcome of a `hello` handshake (spec §6: `welcome{session_id, last_seq}`
/// or `unauthorized` - authentication itself, i.e. whether `token` names a
/// real peer, is the caller's job; `connect` assumes the token already
/// authenticated).
#[derive(Clone, Copy, Debug)]
pub struct ConnectOutcome {
    pub session_id: Uuid,
    pub last_seq: u64,
    /// A prior live session for this token was displaced (spec §4.6,
    /// scenario S5): "the older one is closed with `displaced` and the
    /// newer takes over".
    pub displaced_previous: bool,
    /// The prior session's queue TTL had already expired; the agent should
    /// be driven through a full resync rather than an incremental resume.
    pub resync: bool,
}

/// One long-lived logical session per connected agent (spec §4.6). Cheap
/// to clone - an `Arc` over the session map - so every connection handler
/// task in the real transport can hold its own handle.
#[derive(Clone)]
pub struct AgentHub {
    sessions: Arc<Mutex<HashMap<String, SessionInner>>>,
    capacity: usize,
    queue_ttl: Duration,
}

impl Default for AgentHub {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_ttl(capacity, Duration::from_secs(SESSION_QUEUE_TTL_SECS))
    }

    /// Builds a hub whose closed-session queue retention (spec §4.6's
    /// 10-minute default) is an operator-configured value rather than the
    /// hardcoded constant - so `controld.toml`'s `session-ttl-secs` has an
    /// observable effect instead of being decorative.
    pub fn with_ttl(queue_ttl: Duration) -> Self {
        Self::with_capacity_and_ttl(DEFAULT_QUEUE_CAPACITY, queue_ttl)
    }

    pub fn with_capacity_and_ttl(capacity: usize, queue_ttl: Duration) -> Self {
        Self { sessions: Arc::new(Mutex::new(HashMap::new())), capacity, queue_ttl }
    }

    /// Authenticates and (re)establishes the logical session for `token`.
    /// This replacement is atomic from the perspective of outbound
    /// queuing (spec §4.6): the queue and sequence counter carry over
    /// unchanged under the new session id.
    pub fn connect(&self, token: &str) -> ConnectOutcome {
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(token) {
            Some(existing) if existing.ttl_expired(self.queue_ttl) => {
                log::warn!("agent session queue TTL expired for a reconnecting token; forcing resync");
                *existing = SessionInner::fresh();
                ConnectOutcome { session_id: existing.id, last_seq: 0, displaced_previous: false, resync: true }
            },
            Some(existing) => {
                let displaced_previous = existing.state == SessionState::Connected;
                if displaced_previous {
                    log::info!("agent session displaced by a newer connection for the same token");
                }
                existing.id = Uuid::new_v4();
                existing.state = SessionState::Connected;
                existing.missed_heartbeats = 0;
                existing.closed_at = None;
                let last_seq = existing.next_seq.saturating_sub(1);
                ConnectOutcome { session_id: existing.id, last_seq, displaced_previous, resync: false }
            },
            None => {
                let session = SessionInner::fresh();
                let id = session.id;
                sessions.insert(token.to_string(), session);
                ConnectOutcome { session_id: id, last_seq: 0, displaced_previous: false, resync: false }
            },
        }
    }

    /// Enqueues `payload` for delivery to `token`'s session, assigning the
    /// next monotonic sequence number. Works whether or not the agent is
    /// currently connected (spec §4.7: "non-connected agents simply
    /// receive on next reconnect").
    pub fn enqueue(&self, token: &str, payload: Payload) -> u64 {
        let mut sessions = self.sessions.lock();
        let session = sessions.entry(token.to_string()).or_insert_with(SessionInner::fresh);
        if session.queue.len() >= self.capacity {
            session.queue.pop_front();
            log::warn!("agent hub send queue full; dropped oldest queued artifact");
        }
        let seq = session.next_seq;
        session.next_seq += 1;
        session.queue.push_back(QueuedEntry { seq, payload });
        seq
    }

    /// Removes an acked message from the queue (spec §6: "the agent acks
    /// by sequence"). Also counts as session activity, resetting the
    /// missed-heartbeat counter.
    pub fn ack(&self, token: &str, seq: u64) {
        let mut sessions = self.sessions.lock();
        if let Some(session) = sessions.get_mut(token) {
            session.queue.retain(|e| e.seq != seq);
            session.missed_heartbeats = 0;
        }
    }

    /// Drops every queued message up to and including `tail_seq` without
    /// an ack (spec §5: Agent Hub `send` never blocks past its hard
    /// deadline - on timeout the message is dropped from the queue's tail
    /// and a resync is scheduled for that agent). Returns whether anything
    /// was actually dropped, so the caller knows whether a resync is
    /// warranted.
    pub fn drop_through(&self, token: &str, tail_seq: u64) -> bool {
        let mut sessions = self.sessions.lock();
        let Some(session) = sessions.get_mut(token) else { return false };
        let before = session.queue.len();
        session.queue.retain(|e| e.seq > tail_seq);
        before != session.queue.len()
    }

    /// Every message still queued for `token` with `seq` greater than
    /// `last_applied_seq` (spec §6: "the server replays any unacked
    /// messages with seq > last_applied_seq"). `None` replays the entire
    /// queue - the agent has no prior state to resume from.
    pub fn pending_since(&self, token: &str, last_applied_seq: Option<u64>) -> Vec<ServerMessage> {
        let sessions = self.sessions.lock();
        let Some(session) = sessions.get(token) else { return Vec::new() };
        session
            .queue
            .iter()
            .filter(|e| last_applied_seq.map_or(true, |floor| e.seq > floor))
            .map(|e| ServerMessage::from_payload(e.seq, &e.payload, 0))
            .collect()
    }

    /// Records a missed heartbeat (spec §4.6: "on 3 missed heartbeats the
    /// session transitions to closed"). Returns `true` if this call closed
    /// the session.
    pub fn missed_heartbeat(&self, token: &str) -> bool {
        let mut sessions = self.sessions.lock();
        let Some(session) = sessions.get_mut(token) else { return false };
        if session.state != SessionState::Connected {
            return false;
        }
        session.missed_heartbeats += 1;
        if session.missed_heartbeats >= MAX_MISSED_HEARTBEATS {
            session.state = SessionState::Closed;
            session.closed_at = Some(Instant::now());
            log::info!("agent session closed after {MAX_MISSED_HEARTBEATS} missed heartbeats");
            return true;
        }
        false
    }

    /// Any inbound traffic (ack, pong, hello) resets the missed-heartbeat
    /// counter.
    pub fn record_activity(&self, token: &str) {
        let mut sessions = self.sessions.lock();
        if let Some(session) = sessions.get_mut(token) {
            session.missed_heartbeats = 0;
        }
    }

    pub fn state_of(&self, token: &str) -> Option<SessionState> {
        self.sessions.lock().get(token).map(|s| s.state)
    }

    pub fn queue_len(&self, token: &str) -> usize {
        self.sessions.lock().get(token).map(|s| s.queue.len()).unwrap_or(0)
    }

    /// Drops closed sessions whose queue TTL has lapsed (spec §4.6: "after
    /// which queued messages are dropped and the next reconnect gets a
    /// full resync"). Returns the tokens that were dropped, so a caller
    /// (the Reconciler or a periodic sweep task in `wgmesh-controld`) can
    /// log or account for them; the *next connect* for a dropped token
    /// naturally starts fresh since `connect` falls into the `None` arm.
    pub fn sweep_expired(&self) -> Vec<String> {
        let queue_ttl = self.queue_ttl;
        let mut sessions = self.sessions.lock();
        let mut dropped = Vec::new();
        sessions.retain(|token, session| {
            let expired = session.ttl_expired(queue_ttl);
            if expired {
                dropped.push(token.clone());
            }
            !expired
        });
        dropped
    }
}
