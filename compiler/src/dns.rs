//! DNS record compilation for a jump peer (spec §4.6 `apply_dns`, §4.7 step
//! 3): every mapping on every route that transits the jump peer, resolved
//! to its FQDN. Grounded on the same read-only, re-query-on-compile shape
//! as [`crate::policy::compile`] - DNS records are pushed alongside
//! iptables rulesets to the same jump peer session.

use wgmesh_store::{db, Store};
use wgmesh_types::{fqdn, NetworkId, PeerId, Result};

/// One resolved DNS record ready to frame onto the wire as
/// `wgmesh_agent_hub::DnsRecord`. Kept free of any dependency on the agent
/// hub's wire types so this crate doesn't need to know about sessions or
/// protocol framing - the Reconciler does that conversion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompiledDnsRecord {
    pub name: String,
    pub ip: std::net::IpAddr,
    pub fqdn: String,
}

/// Every DNS record a jump peer's local resolver should serve: the union,
/// over every route whose `jump_peer_id` is `jump_id`, of that route's
/// mappings.
pub fn compile(store: &Store, network_id: NetworkId, jump_id: PeerId) -> Result<Vec<CompiledDnsRecord>> {
    store.read(|conn| {
        let network = db::network::get(conn, network_id)?;
        let routes: Vec<_> =
            db::route::list_in_network(conn, network_id)?.into_iter().filter(|r| r.jump_peer_id == jump_id).collect();

        let mut records = Vec::new();
        for route in &routes {
            for mapping in db::dns::list_for_route(conn, route.id)? {
                records.push(CompiledDnsRecord {
                    name: mapping.name.clone(),
                    ip: mapping.ip_address,
                    fqdn: fqdn(&mapping.name, &route.name, route.domain_suffix.as_deref(), &network.domain_suffix),
                });
            }
        }
        records.sort_by(|a, b| a.fqdn.cmp(&b.fqdn));
        Ok(records)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wgmesh_types::{DnsMappingContents, GroupContents, NetworkContents, PeerContents, RouteContents};

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

    fn new_peer(store: &Store, network_id: NetworkId, name: &str, addr: &str, is_jump: bool) -> wgmesh_types::Peer {
        store
            .within(|conn| {
                let peer = db::peer::create(
                    conn,
                    PeerContents {
                        network_id,
                        name: name.into(),
                        public_key: format!("pub-{name}"),
                        private_key: format!("priv-{name}"),
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

    /// Scenario S4 (spec §8): FQDN is exactly `name.route_name.suffix`, with
    /// an empty route suffix falling back to the network's.
    #[test]
    fn fqdn_uses_route_suffix_or_falls_back_to_network() {
        let store = Store::open_in_memory().unwrap();
        let network_id = new_network(&store);
        let jump = new_peer(&store, network_id, "jump1", "10.0.0.2", true);
        let regular = new_peer(&store, network_id, "regular", "10.0.1.5", false);

        store
            .within(|conn| {
                let route = db::route::create(
                    conn,
                    RouteContents {
                        network_id,
                        name: "backend".into(),
                        destination_cidr: "192.168.7.0/24".parse().unwrap(),
                        jump_peer_id: jump.id,
                        domain_suffix: Some("example.com".into()),
                    },
                )?;
                db::dns::create(
                    conn,
                    DnsMappingContents { route_id: route.id, name: "api".into(), ip_address: "192.168.7.10".parse().unwrap() },
                )?;
                let group = db::group::create(
                    conn,
                    GroupContents { network_id, name: "g".into(), peer_ids: vec![regular.id], policy_ids: vec![], route_ids: vec![route.id] },
                )?;
                Ok((group.id, vec![]))
            })
            .unwrap();

        let records = compile(&store, network_id, jump.id).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].fqdn, "api.backend.example.com");
    }

    #[test]
    fn jump_peer_with_no_transiting_routes_has_no_dns_records() {
        let store = Store::open_in_memory().unwrap();
        let network_id = new_network(&store);
        let jump = new_peer(&store, network_id, "jump1", "10.0.0.2", true);

        let records = compile(&store, network_id, jump.id).unwrap();
        assert!(records.is_empty());
    }
}
