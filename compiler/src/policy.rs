//! Policy Compiler (spec §4.4): produces the ordered iptables rule list
//! for a jump peer's FORWARD chain, terminated by a default-deny. Output
//! is read-only over the Store - unlike the WG Compiler, compiling
//! policies creates nothing.

use rusqlite::Connection;
use wgmesh_store::{db, Store};
use wgmesh_types::{NetworkId, Peer, Result, Rule, RuleAction, RuleDirection, TargetType};

/// Compiles jump peer `jump_id`'s iptables rule list.
pub fn compile(store: &Store, network_id: NetworkId, jump_id: wgmesh_types::PeerId) -> Result<Vec<String>> {
    store.read(|conn| {
        let jump = db::peer::get(conn, jump_id)?;
        let mut routed = wgmesh_graph::peers_via(conn, network_id, &jump)?;
        routed.sort_by_key(|p| p.id);

        let mut lines = Vec::new();
        for peer in &routed {
            let policies = wgmesh_graph::policies(conn, peer)?;
            for policy in &policies {
                for rule in &policy.rules {
                    emit_rule(conn, network_id, peer, rule, &mut lines)?;
                }
            }
        }

        for peer in &routed {
            emit_control_plane_allow(&jump, peer, &mut lines)?;
        }

        lines.push("iptables -A FORWARD -j DROP".to_string());
        Ok(lines)
    })
}

fn emit_rule(conn: &Connection, network_id: NetworkId, peer: &Peer, rule: &Rule, out: &mut Vec<String>) -> Result<()> {
    let targets = resolve_targets(conn, network_id, rule)?;
    if targets.is_empty() {
        out.push(format!("# rule {} matched no peers for target {:?}:{}", rule.id, rule.target_type, rule.target));
        return Ok(());
    }

    let address = peer.address;
    for target in &targets {
        match (rule.direction, rule.action) {
            (RuleDirection::Input, RuleAction::Allow) | (RuleDirection::Output, RuleAction::Allow) => {
                out.push(format!("iptables -A FORWARD -s {address} -d {target} -j ACCEPT"));
                out.push(format!(
                    "iptables -A FORWARD -s {target} -d {address} -m state --state RELATED,ESTABLISHED -j ACCEPT"
                ));
            },
            (RuleDirection::Input, RuleAction::Deny) => {
                out.push(format!("iptables -A FORWARD -s {target} -d {address} -j DROP"));
            },
            (RuleDirection::Output, RuleAction::Deny) => {
                out.push(format!("iptables -A FORWARD -s {address} -d {target} -j DROP"));
            },
        }
    }
    Ok(())
}

/// Resolves a rule's target to the CIDR strings it matches (spec §4.4):
/// a literal CIDR passes through unchanged; `peer`/`group` targets expand
/// to the addresses of the peers they name, sorted for determinism.
fn resolve_targets(conn: &Connection, network_id: NetworkId, rule: &Rule) -> Result<Vec<String>> {
    match rule.target_type {
        TargetType::Cidr => Ok(vec![rule.target.clone()]),
        TargetType::Peer => {
            let peer_id: wgmesh_types::PeerId =
                rule.target.parse().map_err(|_| wgmesh_types::Error::internal("corrupt peer target in rule"))?;
            match db::peer::get(conn, peer_id) {
                Ok(peer) => Ok(vec![format!("{}/32", peer.address)]),
                Err(e) if e.kind() == wgmesh_types::ErrorKind::NotFound => Ok(vec![]),
                Err(e) => Err(e),
            }
        },
        TargetType::Group => {
            let group_id: wgmesh_types::GroupId =
                rule.target.parse().map_err(|_| wgmesh_types::Error::internal("corrupt group target in rule"))?;
            let group = match db::group::get(conn, group_id) {
                Ok(g) => g,
                Err(e) if e.kind() == wgmesh_types::ErrorKind::NotFound => return Ok(vec![]),
                Err(e) => return Err(e),
            };
            let _ = network_id;
            let mut addrs = group
                .peer_ids
                .iter()
                .map(|id| db::peer::get(conn, *id).map(|p| format!("{}/32", p.address)))
                .collect::<Result<Vec<_>>>()?;
            addrs.sort();
            Ok(addrs)
        },
    }
}

/// Bidirectional DNS (UDP 53) and WireGuard control-traffic (UDP to the
/// jump peer's listen port) allow rules between a routed peer and its
/// jump peer (spec §4.4 step 2).
fn emit_control_plane_allow(jump: &Peer, peer: &Peer, out: &mut Vec<String>) -> Result<()> {
    let listen_port = jump.listen_port.ok_or_else(|| wgmesh_types::Error::internal("jump peer missing listen_port"))?;
    let (jump_addr, peer_addr) = (jump.address, peer.address);

    out.push(format!("iptables -A FORWARD -p udp -s {peer_addr} -d {jump_addr} --dport 53 -j ACCEPT"));
    out.push(format!("iptables -A FORWARD -p udp -s {jump_addr} -d {peer_addr} --sport 53 -j ACCEPT"));
    out.push(format!("iptables -A FORWARD -p udp -s {peer_addr} -d {jump_addr} --dport {listen_port} -j ACCEPT"));
    out.push(format!("iptables -A FORWARD -p udp -s {jump_addr} -d {peer_addr} --sport {listen_port} -j ACCEPT"));
    Ok(())
}
