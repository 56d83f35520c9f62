use wgmesh_types::{DnsMappingId, GroupId, NetworkId, PeerId, PolicyId, RouteId};

/// One batched notification per committed Store transaction (spec §4.1/
/// §4.5): carries the ids touched, never payloads, so subscribers always
/// re-read from the Store before acting.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChangeEvent {
    PeerChanged { network_id: NetworkId, peer_ids: Vec<PeerId> },
    GroupChanged { network_id: NetworkId, group_ids: Vec<GroupId> },
    PolicyChanged { network_id: NetworkId, policy_ids: Vec<PolicyId> },
    RouteChanged { network_id: NetworkId, route_ids: Vec<RouteId> },
    DnsChanged { network_id: NetworkId, dns_mapping_ids: Vec<DnsMappingId> },
    NetworkChanged { network_id: NetworkId },
    /// Forces a full-network recompile. Raised explicitly by a publisher
    /// (e.g. Agent Hub after a TTL-expired queue) and implicitly whenever a
    /// subscriber's queue overflows and an event had to be dropped (spec
    /// §4.5): a unified variant so the Reconciler has exactly one code path
    /// for "stop trusting incremental state, recompute everything".
    Resync(NetworkId),
}

impl ChangeEvent {
    pub fn network_id(&self) -> NetworkId {
        match self {
            ChangeEvent::PeerChanged { network_id, .. }
            | ChangeEvent::GroupChanged { network_id, .. }
            | ChangeEvent::PolicyChanged { network_id, .. }
            | ChangeEvent::RouteChanged { network_id, .. }
            | ChangeEvent::DnsChanged { network_id, .. }
            | ChangeEvent::NetworkChanged { network_id }
            | ChangeEvent::Resync(network_id) => *network_id,
        }
    }
}
