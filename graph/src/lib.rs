//! The Graph Resolver (spec §4.2): pure read-side projections over the
//! entity graph. Every function takes a live `&Connection` rather than a
//! `Store` handle, so it composes inside whatever transaction a caller
//! (the WG/Policy Compiler, an admin mutation) already has open - nothing
//! here opens its own transaction or mutates.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use rusqlite::Connection;
use wgmesh_store::{db, Store};
use wgmesh_types::{NetworkId, Peer, PeerId, Policy, PolicyId, Result, Route, RouteId};

/// Every group the peer belongs to, ordered by `created_at_seq` (spec
/// §4.2: "groups ordered by group creation time").
fn groups_of(conn: &Connection, peer: &Peer) -> Result<Vec<wgmesh_types::Group>> {
    let mut groups =
        peer.group_ids.iter().map(|id| db::group::get(conn, *id)).collect::<Result<Vec<_>>>()?;
    groups.sort_by_key(|g| g.created_at_seq);
    Ok(groups)
}

/// `policies(P)` (spec §4.2): ordered concatenation, over each group
/// containing P (groups ordered by creation time), of that group's
/// policies in attachment order, deduplicated by first occurrence.
pub fn policies(conn: &Connection, peer: &Peer) -> Result<Vec<Policy>> {
    let groups = groups_of(conn, peer)?;
    let mut seen = HashSet::new();
    let mut ordered_ids = Vec::new();
    for group in &groups {
        for policy_id in &group.policy_ids {
            if seen.insert(*policy_id) {
                ordered_ids.push(*policy_id);
            }
        }
    }
    ordered_ids.iter().map(|id| db::policy::get(conn, *id)).collect()
}

/// Like [`policies`] but returns only the ids, in the same deterministic
/// order - useful to callers (e.g. the Policy Compiler) that need the
/// ordering without paying for a full hydrate.
pub fn policy_ids(conn: &Connection, peer: &Peer) -> Result<Vec<PolicyId>> {
    Ok(policies(conn, peer)?.into_iter().map(|p| p.id).collect())
}

/// `routes(P)` (spec §4.2): union over each group containing P of that
/// group's routes; order is not load-bearing here.
pub fn routes(conn: &Connection, peer: &Peer) -> Result<Vec<Route>> {
    let groups = groups_of(conn, peer)?;
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for group in &groups {
        for route_id in &group.route_ids {
            if seen.insert(*route_id) {
                ids.push(*route_id);
            }
        }
    }
    ids.iter().map(|id| db::route::get(conn, *id)).collect()
}

pub fn route_ids(conn: &Connection, peer: &Peer) -> Result<Vec<RouteId>> {
    Ok(routes(conn, peer)?.into_iter().map(|r| r.id).collect())
}

/// `transitingJumps(P)` (spec §4.2): the jump peers P's routes transit,
/// plus - for a regular peer - every jump peer in the network, since
/// regular peers always tunnel through every jump peer they know about.
pub fn transiting_jumps(conn: &Connection, network_id: NetworkId, peer: &Peer) -> Result<Vec<PeerId>> {
    let mut ids: HashSet<PeerId> = routes(conn, peer)?.into_iter().map(|r| r.jump_peer_id).collect();

    if !peer.is_jump {
        let network_jumps = db::peer::list_in_network(conn, network_id)?
            .into_iter()
            .filter(|p| p.is_jump)
            .map(|p| p.id)
            .collect::<Vec<_>>();
        ids.extend(network_jumps);
    }

    let mut ids: Vec<_> = ids.into_iter().collect();
    ids.sort();
    Ok(ids)
}

/// `peersVia(J)` (spec §4.2): every peer in J's network for which J
/// appears in `transitingJumps`.
pub fn peers_via(conn: &Connection, network_id: NetworkId, jump: &Peer) -> Result<Vec<Peer>> {
    let peers = db::peer::list_in_network(conn, network_id)?;
    let mut result = Vec::new();
    for candidate in peers {
        if candidate.id == jump.id {
            continue;
        }
        if transiting_jumps(conn, network_id, &candidate)?.contains(&jump.id) {
            result.push(candidate);
        }
    }
    Ok(result)
}

/// Versioned cache keyed by `(network_id, version_stamp)` (spec §4.2): a
/// caller bumps the network's version via [`ProjectionCache::invalidate`]
/// whenever a Change Bus event touches it, and any projection computed
/// against a now-stale version is discarded rather than returned. This
/// wrapper is the only part of the Graph Resolver that needs a `Store`
/// handle rather than a bare connection, since it owns reads outside any
/// caller's transaction.
#[derive(Default)]
pub struct ProjectionCache {
    versions: Mutex<HashMap<NetworkId, u64>>,
    entries: Mutex<HashMap<(NetworkId, u64, PeerId), Vec<Policy>>>,
}

impl ProjectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(&self, network_id: NetworkId) -> u64 {
        *self.versions.lock().entry(network_id).or_insert(0)
    }

    /// Invalidates every cached projection for a network (call on any
    /// Change Bus event carrying that `network_id`).
    pub fn invalidate(&self, network_id: NetworkId) {
        let mut versions = self.versions.lock();
        let version = versions.entry(network_id).or_insert(0);
        *version += 1;
    }

    pub fn policies_for(&self, store: &Store, network_id: NetworkId, peer: &Peer) -> Result<Vec<Policy>> {
        let version = self.current_version(network_id);
        let key = (network_id, version, peer.id);
        if let Some(cached) = self.entries.lock().get(&key) {
            return Ok(cached.clone());
        }
        let computed = store.read(|conn| policies(conn, peer))?;
        self.entries.lock().insert(key, computed.clone());
        Ok(computed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wgmesh_types::{GroupContents, NetworkContents, PeerContents, PolicyContents};

    fn new_network(store: &Store) -> NetworkId {
        store
            .within(|conn| {
                let network = db::network::create(
                    conn,
                    NetworkContents {
                        name: "prod".into(),
                        cidr: "10.0.0.0/16".parse().unwrap(),
                        domain_suffix: "internal".into(),
                        dns: vec![],
                        default_group_ids: vec![],
                    },
                )?;
                Ok((network.id, vec![]))
            })
            .unwrap()
    }

    fn new_peer(store: &Store, network_id: NetworkId, name: &str, addr: &str, is_jump: bool) -> Peer {
        store
            .within(|conn| {
                let peer = db::peer::create(
                    conn,
                    PeerContents {
                        network_id,
                        name: name.into(),
                        public_key: "pub".into(),
                        private_key: "priv".into(),
                        address: addr.parse().unwrap(),
                        endpoint: None,
                        listen_port: if is_jump { Some(51820) } else { None },
                        is_jump,
                        use_agent: true,
                        owner_id: None,
                        group_ids: vec![],
                        additional_allowed_ips: vec![],
                        token: format!("tok-{name}"),
                    },
                )?;
                Ok((peer, vec![]))
            })
            .unwrap()
    }

    fn new_policy(store: &Store, network_id: NetworkId, name: &str) -> PolicyId {
        store
            .within(|conn| {
                let policy = db::policy::create(conn, PolicyContents { network_id, name: name.into(), rules: vec![] })?;
                Ok((policy.id, vec![]))
            })
            .unwrap()
    }

    fn new_group(
        store: &Store,
        network_id: NetworkId,
        name: &str,
        peer_ids: Vec<PeerId>,
        policy_ids: Vec<PolicyId>,
    ) -> wgmesh_types::Group {
        store
            .within(|conn| {
                let group = db::group::create(
                    conn,
                    GroupContents { network_id, name: name.into(), peer_ids, policy_ids, route_ids: vec![] },
                )?;
                Ok((group, vec![]))
            })
            .unwrap()
    }

    #[test]
    fn policies_are_deduplicated_by_first_occurrence_in_group_creation_order() {
        let store = Store::open_in_memory().unwrap();
        let network_id = new_network(&store);
        let peer = new_peer(&store, network_id, "p1", "10.0.0.2", false);

        let shared = new_policy(&store, network_id, "shared");
        let only_in_second = new_policy(&store, network_id, "only-second");

        new_group(&store, network_id, "first", vec![peer.id], vec![shared]);
        new_group(&store, network_id, "second", vec![peer.id], vec![only_in_second, shared]);

        let peer = store.read(|conn| db::peer::get(conn, peer.id)).unwrap();
        let ids = store.read(|conn| policy_ids(conn, &peer)).unwrap();
        assert_eq!(ids, vec![shared, only_in_second]);
    }

    #[test]
    fn transiting_jumps_includes_every_network_jump_for_regular_peers() {
        let store = Store::open_in_memory().unwrap();
        let network_id = new_network(&store);
        let jump1 = new_peer(&store, network_id, "jump1", "10.0.0.2", true);
        let jump2 = new_peer(&store, network_id, "jump2", "10.0.0.3", true);
        let regular = new_peer(&store, network_id, "regular", "10.0.0.4", false);

        let jumps = store.read(|conn| transiting_jumps(conn, network_id, &regular)).unwrap();
        assert!(jumps.contains(&jump1.id));
        assert!(jumps.contains(&jump2.id));
    }

    #[test]
    fn peers_via_finds_regular_peers_routed_through_a_jump() {
        let store = Store::open_in_memory().unwrap();
        let network_id = new_network(&store);
        let jump = new_peer(&store, network_id, "jump1", "10.0.0.2", true);
        let regular = new_peer(&store, network_id, "regular", "10.0.0.4", false);

        let via = store.read(|conn| peers_via(conn, network_id, &jump)).unwrap();
        assert!(via.iter().any(|p| p.id == regular.id));
    }

    #[test]
    fn cache_invalidation_forces_recompute() {
        let store = Store::open_in_memory().unwrap();
        let network_id = new_network(&store);
        let peer = new_peer(&store, network_id, "p1", "10.0.0.2", false);
        let cache = ProjectionCache::new();

        let before = cache.policies_for(&store, network_id, &peer).unwrap();
        assert!(before.is_empty());

        let policy_id = new_policy(&store, network_id, "new-policy");
        new_group(&store, network_id, "g", vec![peer.id], vec![policy_id]);
        cache.invalidate(network_id);

        let peer = store.read(|conn| db::peer::get(conn, peer.id)).unwrap();
        let after = cache.policies_for(&store, network_id, &peer).unwrap();
        assert_eq!(after.len(), 1);
    }
}
