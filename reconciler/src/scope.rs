//! Affected-peer-set computation (spec §4.7 step 1): turns a batch of
//! coalesced Change Bus events into the concrete set of peers and jump
//! peers that need recompiling, re-reading from the Store rather than
//! trusting anything about the events beyond the ids they name.

use std::collections::HashSet;

use rusqlite::Connection;
use wgmesh_bus::ChangeEvent;
use wgmesh_store::db;
use wgmesh_types::{NetworkId, Peer, PeerId, PolicyId, Result, RouteId};

/// Everything the compile stage needs to decide what to (re)compile,
/// computed once per debounce window under a single Store read.
pub struct CompileScope {
    pub all_peers: Vec<Peer>,
    /// Peers directly or transitively affected by this batch's events.
    pub affected_peers: HashSet<PeerId>,
    /// Routes named by a `RouteChanged` or `DnsChanged` event in this
    /// batch - used to decide which jump peers need an iptables/DNS
    /// recompile even when no regular peer's own artifact changed.
    pub affected_routes: HashSet<RouteId>,
    /// Every artifact in the network is stale (a `NetworkChanged` or
    /// `Resync` event was in the batch): recompile unconditionally rather
    /// than computing set membership.
    pub full_network: bool,
}

/// Computes [`CompileScope`] for `network_id` given the coalesced `events`
/// (spec §4.7 step 1: "union of directly-changed peers plus peers
/// reachable through changed groups/policies/routes/DNS/network fields").
pub fn compute(conn: &Connection, network_id: NetworkId, events: &[ChangeEvent]) -> Result<CompileScope> {
    let mut directly_changed_peers: HashSet<PeerId> = HashSet::new();
    let mut changed_policies: HashSet<PolicyId> = HashSet::new();
    let mut changed_routes: HashSet<RouteId> = HashSet::new();
    let mut full_network = false;

    for event in events {
        match event {
            ChangeEvent::PeerChanged { peer_ids, .. } => directly_changed_peers.extend(peer_ids),
            ChangeEvent::GroupChanged { group_ids, .. } => {
                for group_id in group_ids {
                    if let Ok(group) = db::group::get(conn, *group_id) {
                        directly_changed_peers.extend(&group.peer_ids);
                    }
                }
            },
            ChangeEvent::PolicyChanged { policy_ids, .. } => changed_policies.extend(policy_ids),
            ChangeEvent::RouteChanged { route_ids, .. } => changed_routes.extend(route_ids),
            ChangeEvent::DnsChanged { dns_mapping_ids, .. } => {
                for mapping_id in dns_mapping_ids {
                    if let Ok(mapping) = db::dns::get(conn, *mapping_id) {
                        changed_routes.insert(mapping.route_id);
                    }
                }
            },
            ChangeEvent::NetworkChanged { .. } | ChangeEvent::Resync(_) => full_network = true,
        }
    }

    let all_peers = db::peer::list_in_network(conn, network_id)?;

    let mut affected_peers = directly_changed_peers;
    if !full_network && (!changed_policies.is_empty() || !changed_routes.is_empty()) {
        for peer in &all_peers {
            if !changed_policies.is_empty() {
                let policy_ids = wgmesh_graph::policy_ids(conn, peer)?;
                if policy_ids.iter().any(|id| changed_policies.contains(id)) {
                    affected_peers.insert(peer.id);
                    continue;
                }
            }
            if !changed_routes.is_empty() {
                let route_ids = wgmesh_graph::route_ids(conn, peer)?;
                if route_ids.iter().any(|id| changed_routes.contains(id)) {
                    affected_peers.insert(peer.id);
                }
            }
        }
    }

    Ok(CompileScope { all_peers, affected_peers, affected_routes: changed_routes, full_network })
}

/// Whether jump peer `jump` needs its iptables/DNS artifacts recompiled
/// this window (spec §4.7 step 3: "`peersVia(J)` intersects S or whose
/// policy set changed").
pub fn jump_peer_needs_recompile(conn: &Connection, network_id: NetworkId, jump: &Peer, scope: &CompileScope) -> Result<bool> {
    if scope.full_network {
        return Ok(true);
    }
    if wgmesh_graph::peers_via(conn, network_id, jump)?.iter().any(|p| scope.affected_peers.contains(&p.id)) {
        return Ok(true);
    }
    if !scope.affected_routes.is_empty() {
        let routes = db::route::list_in_network(conn, network_id)?;
        if routes.iter().any(|r| r.jump_peer_id == jump.id && scope.affected_routes.contains(&r.id)) {
            return Ok(true);
        }
    }
    Ok(false)
}
