//! Data model (spec §3), error taxonomy (spec §7), content hashing (spec
//! §6) and WireGuard key material shared by every crate in the mesh
//! control plane. Analogous to `innernet-shared`, scoped to the entity
//! graph instead of CLI/client concerns.

pub mod endpoint;
pub mod error;
pub mod hash;
pub mod ids;
pub mod key;
pub mod model;
pub mod templates;

pub use endpoint::Endpoint;
pub use error::{Error, ErrorKind, Result};
pub use hash::ContentHash;
pub use ids::{
    DnsMappingId, GroupId, NetworkId, PeerConnectionId, PeerId, PolicyId, RouteId, RuleId,
};
pub use key::{InvalidKey, Key, KeyPair};
pub use model::{
    fqdn, DnsMapping, DnsMappingContents, Group, GroupContents, Network, NetworkContents, Peer,
    PeerConnection, PeerContents, Policy, PolicyContents, Route, RouteContents, Rule,
    RuleAction, RuleDirection, TargetType,
};

/// The persistent keepalive interval applied to peers with no reachable
/// endpoint (spec §4.3 rule 5).
pub const PERSISTENT_KEEPALIVE_INTERVAL_SECS: u16 = 25;

/// Default debounce window the Reconciler coalesces rapid edits over
/// (spec §4.7).
pub const DEFAULT_DEBOUNCE_WINDOW_MS: u64 = 200;

/// Agent heartbeat cadence (spec §4.6).
pub const HEARTBEAT_INTERVAL_SECS: u64 = 20;

/// Missed heartbeats before a session is considered closed (spec §4.6).
pub const MAX_MISSED_HEARTBEATS: u32 = 3;

/// How long a closed session's queue is retained for the next connection
/// using the same token before being dropped (spec §4.6).
pub const SESSION_QUEUE_TTL_SECS: u64 = 10 * 60;

/// Ceiling for exponential backoff on transient failures (spec §7).
pub const MAX_RETRY_BACKOFF_SECS: u64 = 30;

/// Hard deadline for an Agent Hub `send` before the message is dropped and
/// a resync scheduled (spec §5).
pub const SEND_DEADLINE_SECS: u64 = 2;
