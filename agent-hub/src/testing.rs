//! In-memory agent transport for tests (SPEC_FULL supplement #5): a
//! `FakeAgent` plays the agent side of the protocol against a live
//! [`AgentHub`] without sockets, so the Reconciler and controld crates can
//! exercise end-to-end delivery/dedup/resume behavior in a plain unit test.
//! Not `#[cfg(test)]`-gated, unlike `wgmesh_store::test_support`: other
//! crates in the workspace need it as a dev-dependency across the crate
//! boundary.

use std::collections::HashSet;

use wgmesh_types::ContentHash;

use crate::hub::AgentHub;
use crate::protocol::ServerMessage;

/// A simulated agent: tracks which messages it has applied and acks
/// through the hub as the real agent would over the wire.
#[derive(Default)]
pub struct FakeAgent {
    last_applied_seq: Option<u64>,
    applied_hashes: HashSet<ContentHash>,
    /// Every message this agent has ever applied, in delivery order - handy
    /// for asserting what a test scenario actually pushed to the agent.
    pub applied: Vec<ServerMessage>,
}

impl FakeAgent {
    pub fn new() -> Self {
        Self::default()
    }

    fn content_hash_of(message: &ServerMessage) -> Option<ContentHash> {
        match message {
            ServerMessage::ApplyWg { content_hash, .. }
            | ServerMessage::ApplyIptables { content_hash, .. }
            | ServerMessage::ApplyDns { content_hash, .. } => Some(*content_hash),
            ServerMessage::Ping { .. } => None,
        }
    }

    /// Pulls everything queued for `token` since this agent's last resume
    /// point, applies it (idempotently skipping any content hash it has
    /// already applied, per spec §6's agent-side idempotence contract) and
    /// acks every message regardless, matching a well-behaved agent that
    /// always acks what it receives whether or not the content was new.
    pub fn apply_and_ack(&mut self, hub: &AgentHub, token: &str) {
        let pending = hub.pending_since(token, self.last_applied_seq);
        for message in pending {
            let seq = message.seq();
            if let Some(hash) = Self::content_hash_of(&message) {
                if self.applied_hashes.insert(hash) {
                    self.applied.push(message);
                }
            } else {
                self.applied.push(message);
            }
            hub.ack(token, seq);
            self.last_applied_seq = Some(seq);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Payload;

    #[test]
    fn fake_agent_applies_and_acks_pending_messages() {
        let hub = AgentHub::new();
        hub.connect("tok-a");
        hub.enqueue("tok-a", Payload::ApplyWireGuardConfig { config_text: "cfg-1".into() });
        hub.enqueue("tok-a", Payload::ApplyWireGuardConfig { config_text: "cfg-2".into() });

        let mut agent = FakeAgent::new();
        agent.apply_and_ack(&hub, "tok-a");

        assert_eq!(agent.applied.len(), 2);
        assert_eq!(hub.queue_len("tok-a"), 0, "fully acked queue must drain");
    }

    #[test]
    fn fake_agent_skips_reapplying_identical_content_hash() {
        let hub = AgentHub::new();
        hub.connect("tok-a");
        hub.enqueue("tok-a", Payload::ApplyWireGuardConfig { config_text: "same".into() });

        let mut agent = FakeAgent::new();
        agent.apply_and_ack(&hub, "tok-a");
        assert_eq!(agent.applied.len(), 1);

        // A resend of byte-identical content (e.g. after a resync) must not
        // count as a second applied artifact.
        hub.enqueue("tok-a", Payload::ApplyWireGuardConfig { config_text: "same".into() });
        agent.apply_and_ack(&hub, "tok-a");
        assert_eq!(agent.applied.len(), 1);
    }

    #[test]
    fn fake_agent_resumes_from_its_last_applied_seq_after_displacement() {
        let hub = AgentHub::new();
        hub.connect("tok-a");
        hub.enqueue("tok-a", Payload::Ping);
        let mut agent = FakeAgent::new();
        agent.apply_and_ack(&hub, "tok-a");

        // Simulate a reconnect (scenario S5): the hub keeps the queue, the
        // agent keeps its own last_applied_seq.
        hub.connect("tok-a");
        hub.enqueue("tok-a", Payload::Ping);
        agent.apply_and_ack(&hub, "tok-a");

        assert_eq!(agent.applied.len(), 2);
    }
}
