//! WG Compiler (spec §4.3): produces a byte-stable WireGuard config for a
//! single peer. The only write this performs is lazily creating a
//! `PeerConnection` (preshared key) for a peer pair that has never needed
//! one before; that write happens in the same transaction as the reads, so
//! a compile never observes half of its own side effect.

use wgmesh_store::{db, Store};
use wgmesh_types::{Error, NetworkId, Peer, PeerId, Result, PERSISTENT_KEEPALIVE_INTERVAL_SECS};

/// NAT interface to bind jump-peer masquerade `PostUp`/`PostDown` rules to,
/// if the jump peer sits on a NAT gateway (spec §4.3 rule 1). `None` omits
/// the directives entirely.
pub struct CompileOptions<'a> {
    pub nat_interface: Option<&'a str>,
}

impl Default for CompileOptions<'_> {
    fn default() -> Self {
        Self { nat_interface: None }
    }
}

struct PeerBlock {
    id: PeerId,
    public_key: String,
    preshared_key: String,
    allowed_ips: Vec<String>,
    endpoint: Option<String>,
}

/// Compiles peer `peer_id`'s WireGuard config text. Fails with
/// `RefConflict` if a dependent peer no longer exists, matching spec
/// §4.3's "missing dependent peer -> RefConflict" failure rule.
pub fn compile(store: &Store, network_id: NetworkId, peer_id: PeerId, opts: &CompileOptions) -> Result<String> {
    store.within(|conn| {
        let peer = db::peer::get(conn, peer_id)?;
        let network = db::network::get(conn, network_id)?;

        let blocks = if peer.is_jump {
            jump_peer_blocks(conn, &peer)?
        } else {
            regular_peer_blocks(conn, network_id, &peer)?
        };

        let text = render(&peer, &network, blocks, opts);
        Ok((text, vec![]))
    })
}

fn regular_peer_blocks(conn: &rusqlite::Connection, network_id: NetworkId, peer: &Peer) -> Result<Vec<PeerBlock>> {
    let jump_ids = wgmesh_graph::transiting_jumps(conn, network_id, peer)?;
    let routes = wgmesh_graph::routes(conn, peer)?;

    let mut blocks = Vec::new();
    for jump_id in jump_ids {
        let jump = match db::peer::get(conn, jump_id) {
            Ok(p) => p,
            Err(e) if e.kind() == wgmesh_types::ErrorKind::NotFound => {
                return Err(Error::ref_conflict(format!("jump peer {jump_id} referenced by route no longer exists")))
            },
            Err(e) => return Err(e),
        };

        let mut allowed_ips: Vec<String> = vec![network_cidr_of(conn, network_id)?.to_string()];
        for route in &routes {
            if route.jump_peer_id == jump_id {
                allowed_ips.push(route.destination_cidr.to_string());
            }
        }
        allowed_ips.extend(jump.additional_allowed_ips.iter().map(|c| c.to_string()));
        allowed_ips.sort();
        allowed_ips.dedup();

        let connection = db::peer_connection::get_or_create(conn, peer.id, jump.id)?;
        blocks.push(PeerBlock {
            id: jump.id,
            public_key: jump.public_key.clone(),
            preshared_key: connection.preshared_key,
            allowed_ips,
            endpoint: jump.endpoint.as_ref().map(|e| e.to_string()),
        });
    }
    blocks.sort_by(|a, b| a.public_key.cmp(&b.public_key));
    Ok(blocks)
}

fn jump_peer_blocks(conn: &rusqlite::Connection, jump: &Peer) -> Result<Vec<PeerBlock>> {
    let peers = db::peer::list_in_network(conn, jump.network_id)?;
    let mut blocks = Vec::new();
    for peer in peers.into_iter().filter(|p| !p.is_jump) {
        let mut allowed_ips: Vec<String> = vec![format!("{}/32", peer.address)];
        allowed_ips.extend(peer.additional_allowed_ips.iter().map(|c| c.to_string()));
        allowed_ips.sort();
        allowed_ips.dedup();

        let connection = db::peer_connection::get_or_create(conn, jump.id, peer.id)?;
        blocks.push(PeerBlock {
            id: peer.id,
            public_key: peer.public_key.clone(),
            preshared_key: connection.preshared_key,
            allowed_ips,
            endpoint: peer.endpoint.as_ref().map(|e| e.to_string()),
        });
    }
    blocks.sort_by(|a, b| a.public_key.cmp(&b.public_key));
    Ok(blocks)
}

fn network_cidr_of(conn: &rusqlite::Connection, network_id: NetworkId) -> Result<ipnet::IpNet> {
    Ok(db::network::get(conn, network_id)?.cidr)
}

fn render(peer: &Peer, network: &wgmesh_types::Network, blocks: Vec<PeerBlock>, opts: &CompileOptions) -> String {
    let mut out = String::new();
    out.push_str("[Interface]\n");
    out.push_str(&format!("PrivateKey = {}\n", peer.private_key));
    if peer.is_jump {
        out.push_str(&format!("Address = {}\n", network.cidr));
        if let Some(port) = peer.listen_port {
            out.push_str(&format!("ListenPort = {port}\n"));
        }
        if let Some(iface) = opts.nat_interface {
            out.push_str(&format!("PostUp = iptables -t nat -A POSTROUTING -o {iface} -j MASQUERADE\n"));
            out.push_str(&format!("PostDown = iptables -t nat -D POSTROUTING -o {iface} -j MASQUERADE\n"));
        }
    } else {
        out.push_str(&format!("Address = {}/32\n", peer.address));
        if !network.dns.is_empty() {
            let dns = network.dns.iter().map(|ip| ip.to_string()).collect::<Vec<_>>().join(",");
            out.push_str(&format!("DNS = {dns}\n"));
        }
    }

    for block in blocks {
        out.push('\n');
        out.push_str("[Peer]\n");
        out.push_str(&format!("PublicKey = {}\n", block.public_key));
        out.push_str(&format!("PresharedKey = {}\n", block.preshared_key));
        out.push_str(&format!("AllowedIPs = {}\n", block.allowed_ips.join(",")));
        if let Some(endpoint) = &block.endpoint {
            out.push_str(&format!("Endpoint = {endpoint}\n"));
        } else {
            out.push_str(&format!("PersistentKeepalive = {PERSISTENT_KEEPALIVE_INTERVAL_SECS}\n"));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use wgmesh_store::db;
    use wgmesh_types::{GroupContents, NetworkContents, PeerContents, RouteContents};

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

    /// Scenario S3 (spec §8): a route gateway's destination CIDR appears
    /// only in the owning jump peer's `[Peer]` block, never in another's.
    #[test]
    fn route_gateway_cidr_appears_only_in_owning_jump_block() {
        let store = Store::open_in_memory().unwrap();
        let network_id = new_network(&store);
        let jump = new_peer(&store, network_id, "jump1", "10.0.0.2", true);
        let _other_jump = new_peer(&store, network_id, "jump2", "10.0.0.3", true);
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
                        domain_suffix: None,
                    },
                )?;
                let group = db::group::create(
                    conn,
                    GroupContents {
                        network_id,
                        name: "g".into(),
                        peer_ids: vec![regular.id],
                        policy_ids: vec![],
                        route_ids: vec![route.id],
                    },
                )?;
                Ok((group.id, vec![]))
            })
            .unwrap();

        let config = compile(&store, network_id, regular.id, &CompileOptions::default()).unwrap();
        let blocks: Vec<&str> = config.split("\n\n").collect();

        let jump_block = blocks.iter().find(|b| b.contains("PublicKey = pub-jump1")).unwrap();
        assert!(jump_block.contains("192.168.7.0/24"));
        assert!(jump_block.contains("10.0.0.0/16"));

        let other_block = blocks.iter().find(|b| b.contains("PublicKey = pub-jump2")).unwrap();
        assert!(!other_block.contains("192.168.7.0/24"));
    }

    #[test]
    fn peer_with_no_endpoint_gets_persistent_keepalive() {
        let store = Store::open_in_memory().unwrap();
        let network_id = new_network(&store);
        let jump = new_peer(&store, network_id, "jump1", "10.0.0.2", true);
        let _regular = new_peer(&store, network_id, "regular", "10.0.1.5", false);

        let config = compile(&store, network_id, jump.id, &CompileOptions::default()).unwrap();
        assert!(config.contains("PersistentKeepalive = 25"));
    }
}
