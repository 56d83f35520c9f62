//! The agent wire protocol (spec §6): JSON frames over a persistent
//! bidirectional channel, the core as server. Kept as plain serde types
//! rather than the framed transport itself, so a real transport
//! (`tokio`-backed, in `wgmesh-controld`) and the in-memory test transport
//! share one definition of what a frame looks like.

use serde::{Deserialize, Serialize};
use wgmesh_types::ContentHash;

/// A single DNS record as delivered to an agent (spec §6 `apply_dns`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecord {
    pub name: String,
    pub ip: std::net::IpAddr,
    pub fqdn: String,
}

/// The content an `AgentHub` session queues and eventually frames onto the
/// wire. Distinct from [`ServerMessage`] because a queued entry does not
/// yet have a sequence number - that is assigned at enqueue time by the
/// session, not by the caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    ApplyWireGuardConfig { config_text: String },
    ApplyIpTables { rules: Vec<String> },
    ApplyDnsRecords { records: Vec<DnsRecord> },
    Ping,
}

impl Payload {
    /// The canonical serialization whose SHA-256 agents compare against
    /// their last-applied state (spec §6: "Hashes are lowercase hex
    /// SHA-256 of a canonical serialization of the payload body").
    pub fn content_hash(&self) -> ContentHash {
        // `Ping` carries no idempotence-relevant state; callers never skip
        // pings on hash match, so its hash is only there for a uniform
        // wire shape.
        let canonical = serde_json::to_vec(self).expect("Payload serializes infallibly");
        ContentHash::of(canonical)
    }
}

/// Server→agent frame (spec §6). `seq` is the session's monotonic
/// per-message sequence number agents ack by.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ApplyWg { seq: u64, content_hash: ContentHash, config_text: String },
    ApplyIptables { seq: u64, content_hash: ContentHash, rules: Vec<String> },
    ApplyDns { seq: u64, content_hash: ContentHash, records: Vec<DnsRecord> },
    Ping { seq: u64, ts: u64 },
}

impl ServerMessage {
    pub fn seq(&self) -> u64 {
        match self {
            ServerMessage::ApplyWg { seq, .. }
            | ServerMessage::ApplyIptables { seq, .. }
            | ServerMessage::ApplyDns { seq, .. }
            | ServerMessage::Ping { seq, .. } => *seq,
        }
    }

    pub fn from_payload(seq: u64, payload: &Payload, ts: u64) -> Self {
        match payload {
            Payload::ApplyWireGuardConfig { config_text } => {
                ServerMessage::ApplyWg { seq, content_hash: payload.content_hash(), config_text: config_text.clone() }
            },
            Payload::ApplyIpTables { rules } => {
                ServerMessage::ApplyIptables { seq, content_hash: payload.content_hash(), rules: rules.clone() }
            },
            Payload::ApplyDnsRecords { records } => {
                ServerMessage::ApplyDns { seq, content_hash: payload.content_hash(), records: records.clone() }
            },
            Payload::Ping => ServerMessage::Ping { seq, ts },
        }
    }
}

/// Agent→server frame (spec §6).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    Ack { seq: u64 },
    Hello {
        /// The connecting peer's token (spec §6: "agent presents its
        /// peer's `token` in the opening handshake"). Present on every
        /// `hello`, not just the first - the agent re-sends it on
        /// heartbeat hellos too, so a reconnect after a network blip
        /// re-authenticates the same way a fresh connection does.
        token: String,
        hostname: String,
        system_uptime: u64,
        wireguard_uptime: u64,
        #[serde(default)]
        peer_endpoints: Option<Vec<String>>,
        /// Carried on resume so the server knows which queued messages the
        /// agent already applied (spec §6: "the agent includes
        /// `last_applied_seq`"). Absent on a first-ever connection.
        #[serde(default)]
        last_applied_seq: Option<u64>,
    },
    Pong { seq: u64 },
}

/// The handshake response to a `hello` (spec §6): the opening exchange,
/// not a steady-state frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Welcome {
    Welcome { session_id: uuid::Uuid, last_seq: u64 },
    Unauthorized,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_payloads_hash_identically() {
        let a = Payload::ApplyWireGuardConfig { config_text: "[Interface]\n".into() };
        let b = Payload::ApplyWireGuardConfig { config_text: "[Interface]\n".into() };
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn different_payload_kinds_hash_differently() {
        let wg = Payload::ApplyWireGuardConfig { config_text: "same".into() };
        let iptables = Payload::ApplyIpTables { rules: vec!["same".into()] };
        assert_ne!(wg.content_hash(), iptables.content_hash());
    }

    #[test]
    fn server_message_round_trips_through_json() {
        let msg = ServerMessage::ApplyWg { seq: 3, content_hash: ContentHash::of("x"), config_text: "cfg".into() };
        let json = serde_json::to_string(&msg).unwrap();
        let back: ServerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, back);
    }
}
