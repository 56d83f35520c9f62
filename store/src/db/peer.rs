use ipnet::IpNet;
use rusqlite::{params, Connection};
use wgmesh_types::{Endpoint, Error, GroupId, NetworkId, Peer, PeerContents, PeerId, Result};

use super::network;

// `query_map` closures only get a `&Row`, not the `&Connection` they were
// issued from, so `group_ids` can't be resolved inline here. `get`/`list`
// below backfill it via `hydrate` after mapping the row.
fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Peer> {
    let id: String = row.get(0)?;
    let network_id: String = row.get(1)?;
    let name = row.get(2)?;
    let public_key = row.get(3)?;
    let private_key = row.get(4)?;
    let address: String = row.get(5)?;
    let endpoint: Option<String> = row.get(6)?;
    let listen_port: Option<u16> = row.get(7)?;
    let is_jump: bool = row.get(8)?;
    let use_agent: bool = row.get(9)?;
    let owner_id: Option<String> = row.get(10)?;
    let additional_allowed_ips: String = row.get(11)?;
    let token = row.get(12)?;

    Ok(Peer {
        id: id
            .parse()
            .map_err(|_| rusqlite::Error::InvalidColumnType(0, "id".into(), rusqlite::types::Type::Text))?,
        contents: PeerContents {
            network_id: network_id
                .parse()
                .map_err(|_| rusqlite::Error::InvalidColumnType(1, "network_id".into(), rusqlite::types::Type::Text))?,
            name,
            public_key,
            private_key,
            address: address
                .parse()
                .map_err(|_| rusqlite::Error::InvalidColumnType(5, "address".into(), rusqlite::types::Type::Text))?,
            endpoint: endpoint.and_then(|e| e.parse().ok()),
            listen_port,
            is_jump,
            use_agent,
            owner_id,
            group_ids: vec![],
            additional_allowed_ips: serde_json::from_str(&additional_allowed_ips).unwrap_or_default(),
            token,
        },
    })
}

const SELECT_COLUMNS: &str = "id, network_id, name, public_key, private_key, address, endpoint, \
    listen_port, is_jump, use_agent, owner_id, additional_allowed_ips, token";

fn fetch_group_ids(conn: &Connection, peer_id: PeerId) -> Result<Vec<GroupId>> {
    let mut stmt = conn.prepare_cached("SELECT group_id FROM group_peers WHERE peer_id = ?1")?;
    let ids = stmt
        .query_map(params![peer_id.to_string()], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids.into_iter().filter_map(|s| s.parse().ok()).collect())
}

fn hydrate(conn: &Connection, mut peer: Peer) -> Result<Peer> {
    peer.contents.group_ids = fetch_group_ids(conn, peer.id)?;
    Ok(peer)
}

/// Validates spec §3 invariant 1 (address within network CIDR, unique) and
/// the jump-peer `listen_port` requirement before inserting.
fn validate_contents(conn: &Connection, contents: &PeerContents) -> Result<IpNet> {
    if contents.name.is_empty() || contents.name.len() >= 64 {
        return Err(Error::validation("peer name must be 1-63 characters"));
    }
    if contents.is_jump && contents.listen_port.is_none() {
        return Err(Error::validation("jump peers require a listen_port"));
    }

    let net = network::get(conn, contents.network_id)?;
    if !net.cidr.contains(&contents.address) {
        return Err(Error::validation(format!(
            "address {} is outside network cidr {}",
            contents.address, net.cidr
        )));
    }
    Ok(net.cidr)
}

pub fn create(conn: &Connection, contents: PeerContents) -> Result<Peer> {
    validate_contents(conn, &contents)?;

    let existing_name: i64 = conn.query_row(
        "SELECT COUNT(*) FROM peers WHERE network_id = ?1 AND name = ?2",
        params![contents.network_id.to_string(), contents.name],
        |r| r.get(0),
    )?;
    if existing_name > 0 {
        return Err(Error::duplicate_name(format!("peer {:?} already exists in network", contents.name)));
    }

    let existing_addr: i64 = conn.query_row(
        "SELECT COUNT(*) FROM peers WHERE network_id = ?1 AND address = ?2",
        params![contents.network_id.to_string(), contents.address.to_string()],
        |r| r.get(0),
    )?;
    if existing_addr > 0 {
        return Err(Error::validation(format!("address {} already assigned in network", contents.address)));
    }

    let id = PeerId::new();
    conn.execute(
        "INSERT INTO peers (id, network_id, name, public_key, private_key, address, endpoint, \
         listen_port, is_jump, use_agent, owner_id, additional_allowed_ips, token) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            id.to_string(),
            contents.network_id.to_string(),
            contents.name,
            contents.public_key,
            contents.private_key,
            contents.address.to_string(),
            contents.endpoint.as_ref().map(Endpoint::to_string),
            contents.listen_port,
            contents.is_jump,
            contents.use_agent,
            contents.owner_id,
            serde_json::to_string(&contents.additional_allowed_ips)?,
            contents.token,
        ],
    )?;

    for group_id in &contents.group_ids {
        conn.execute(
            "INSERT INTO group_peers (group_id, peer_id) VALUES (?1, ?2)",
            params![group_id.to_string(), id.to_string()],
        )?;
    }

    Ok(Peer { id, contents })
}

pub fn get(conn: &Connection, id: PeerId) -> Result<Peer> {
    let peer = conn.query_row(
        &format!("SELECT {SELECT_COLUMNS} FROM peers WHERE id = ?1"),
        params![id.to_string()],
        from_row,
    )?;
    hydrate(conn, peer)
}

pub fn get_by_token(conn: &Connection, token: &str) -> Result<Peer> {
    let peer = conn.query_row(
        &format!("SELECT {SELECT_COLUMNS} FROM peers WHERE token = ?1"),
        params![token],
        from_row,
    )?;
    hydrate(conn, peer)
}

pub fn list(conn: &Connection) -> Result<Vec<Peer>> {
    let mut stmt = conn.prepare_cached(&format!("SELECT {SELECT_COLUMNS} FROM peers"))?;
    let rows = stmt.query_map([], from_row)?.collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(|p| hydrate(conn, p)).collect()
}

pub fn list_in_network(conn: &Connection, network_id: NetworkId) -> Result<Vec<Peer>> {
    let mut stmt = conn.prepare_cached(&format!("SELECT {SELECT_COLUMNS} FROM peers WHERE network_id = ?1"))?;
    let rows = stmt
        .query_map(params![network_id.to_string()], from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(|p| hydrate(conn, p)).collect()
}

/// Updates the mutable subset of a peer's fields. Address, public key and
/// network assignment are immutable post-creation for the same reason
/// innernet's `DatabasePeer::update` disregards them: re-assigning a peer's
/// identity after the fact is a replace, not an update.
pub fn update(conn: &Connection, id: PeerId, contents: PeerContents) -> Result<Peer> {
    let mut current = get(conn, id)?;
    if contents.is_jump && contents.listen_port.is_none() {
        return Err(Error::validation("jump peers require a listen_port"));
    }

    conn.execute(
        "UPDATE peers SET name = ?1, endpoint = ?2, listen_port = ?3, is_jump = ?4, use_agent = ?5, \
         owner_id = ?6, additional_allowed_ips = ?7 WHERE id = ?8",
        params![
            contents.name,
            contents.endpoint.as_ref().map(Endpoint::to_string),
            contents.listen_port,
            contents.is_jump,
            contents.use_agent,
            contents.owner_id,
            serde_json::to_string(&contents.additional_allowed_ips)?,
            id.to_string(),
        ],
    )?;

    conn.execute("DELETE FROM group_peers WHERE peer_id = ?1", params![id.to_string()])?;
    for group_id in &contents.group_ids {
        conn.execute(
            "INSERT INTO group_peers (group_id, peer_id) VALUES (?1, ?2)",
            params![group_id.to_string(), id.to_string()],
        )?;
    }

    current.contents = PeerContents {
        network_id: current.contents.network_id,
        public_key: current.contents.public_key,
        private_key: current.contents.private_key,
        address: current.contents.address,
        ..contents
    };
    Ok(current)
}

/// Deleting a jump peer that routes still reference is rejected, not
/// cascaded (spec §9): the admin must reassign or delete those routes
/// first. Checked explicitly so the caller gets `RefConflict` instead of a
/// raw `RESTRICT` constraint failure.
pub fn delete(conn: &Connection, id: PeerId) -> Result<()> {
    let dependent_routes: i64 = conn.query_row(
        "SELECT COUNT(*) FROM routes WHERE jump_peer_id = ?1",
        params![id.to_string()],
        |r| r.get(0),
    )?;
    if dependent_routes > 0 {
        return Err(Error::ref_conflict(
            "jump peer has routes attached; reassign or delete them first",
        ));
    }

    conn.execute("DELETE FROM peer_connections WHERE peer1_id = ?1 OR peer2_id = ?1", params![id.to_string()])?;
    let deleted = conn.execute("DELETE FROM peers WHERE id = ?1", params![id.to_string()])?;
    if deleted == 0 {
        return Err(Error::not_found(format!("peer {id}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{memory_conn, seed_network};

    fn peer_contents(network_id: NetworkId, name: &str, addr: &str) -> PeerContents {
        PeerContents {
            network_id,
            name: name.to_string(),
            public_key: "pub".into(),
            private_key: "priv".into(),
            address: addr.parse().unwrap(),
            endpoint: None,
            listen_port: None,
            is_jump: false,
            use_agent: true,
            owner_id: None,
            group_ids: vec![],
            additional_allowed_ips: vec![],
            token: uuid::Uuid::new_v4().to_string(),
        }
    }

    #[test]
    fn rejects_address_outside_network_cidr() {
        let conn = memory_conn();
        let net = seed_network(&conn, "prod", "10.0.0.0/24");
        let err = create(&conn, peer_contents(net.id, "p1", "10.0.1.5")).unwrap_err();
        assert_eq!(err.kind(), wgmesh_types::ErrorKind::Validation);
    }

    #[test]
    fn rejects_jump_peer_without_listen_port() {
        let conn = memory_conn();
        let net = seed_network(&conn, "prod", "10.0.0.0/24");
        let mut contents = peer_contents(net.id, "jump1", "10.0.0.2");
        contents.is_jump = true;
        let err = create(&conn, contents).unwrap_err();
        assert_eq!(err.kind(), wgmesh_types::ErrorKind::Validation);
    }

    #[test]
    fn jump_peer_deletion_rejected_when_routes_depend_on_it() {
        let conn = memory_conn();
        let net = seed_network(&conn, "prod", "10.0.0.0/24");
        let mut jump_contents = peer_contents(net.id, "jump1", "10.0.0.2");
        jump_contents.is_jump = true;
        jump_contents.listen_port = Some(51820);
        let jump = create(&conn, jump_contents).unwrap();

        crate::db::route::create(
            &conn,
            wgmesh_types::RouteContents {
                network_id: net.id,
                name: "backend".into(),
                destination_cidr: "192.168.7.0/24".parse().unwrap(),
                jump_peer_id: jump.id,
                domain_suffix: None,
            },
        )
        .unwrap();

        let err = delete(&conn, jump.id).unwrap_err();
        assert_eq!(err.kind(), wgmesh_types::ErrorKind::RefConflict);
    }
}
