use rusqlite::{params, Connection};
use wgmesh_types::{Error, Key, PeerConnection, PeerConnectionId, PeerId, Result};

fn from_row(row: &rusqlite::Row) -> rusqlite::Result<PeerConnection> {
    let id: String = row.get(0)?;
    let peer1_id: String = row.get(1)?;
    let peer2_id: String = row.get(2)?;
    let preshared_key = row.get(3)?;

    Ok(PeerConnection {
        id: id.parse().map_err(|_| rusqlite::Error::InvalidColumnType(0, "id".into(), rusqlite::types::Type::Text))?,
        peer1_id: peer1_id
            .parse()
            .map_err(|_| rusqlite::Error::InvalidColumnType(1, "peer1_id".into(), rusqlite::types::Type::Text))?,
        peer2_id: peer2_id
            .parse()
            .map_err(|_| rusqlite::Error::InvalidColumnType(2, "peer2_id".into(), rusqlite::types::Type::Text))?,
        preshared_key,
    })
}

pub fn get(conn: &Connection, a: PeerId, b: PeerId) -> Result<Option<PeerConnection>> {
    let (peer1_id, peer2_id) = PeerConnection::canonical_pair(a, b);
    let result = conn.query_row(
        "SELECT id, peer1_id, peer2_id, preshared_key FROM peer_connections WHERE peer1_id = ?1 AND peer2_id = ?2",
        params![peer1_id.to_string(), peer2_id.to_string()],
        from_row,
    );
    match result {
        Ok(conn) => Ok(Some(conn)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Lazily creates the `peer_connections` row the first time two peers need
/// a shared preshared key (spec §6: every peer pair that will see each
/// other in a compiled `[Peer]` block shares one). Idempotent: a second
/// call for the same unordered pair returns the existing row rather than
/// minting a new key, since WG Compiler re-derives its peer set on every
/// recompile and must not rotate keys out from under a stable connection.
pub fn get_or_create(conn: &Connection, a: PeerId, b: PeerId) -> Result<PeerConnection> {
    if let Some(existing) = get(conn, a, b)? {
        return Ok(existing);
    }
    if a == b {
        return Err(Error::validation("a peer cannot connect to itself"));
    }

    let id = PeerConnectionId::new();
    let preshared_key = Key::generate_preshared().to_base64();
    let connection = PeerConnection::new(id, a, b, preshared_key);
    conn.execute(
        "INSERT INTO peer_connections (id, peer1_id, peer2_id, preshared_key) VALUES (?1, ?2, ?3, ?4)",
        params![
            connection.id.to_string(),
            connection.peer1_id.to_string(),
            connection.peer2_id.to_string(),
            connection.preshared_key,
        ],
    )?;
    Ok(connection)
}

pub fn list_for_peer(conn: &Connection, peer_id: PeerId) -> Result<Vec<PeerConnection>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, peer1_id, peer2_id, preshared_key FROM peer_connections WHERE peer1_id = ?1 OR peer2_id = ?1",
    )?;
    let rows = stmt.query_map(params![peer_id.to_string()], from_row)?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{memory_conn, seed_network};
    use wgmesh_types::PeerContents;

    fn seed_peer(conn: &Connection, network_id: wgmesh_types::NetworkId, name: &str, addr: &str) -> wgmesh_types::Peer {
        crate::db::peer::create(
            conn,
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
                token: format!("tok-{name}"),
            },
        )
        .unwrap()
    }

    #[test]
    fn get_or_create_is_idempotent_regardless_of_argument_order() {
        let conn = memory_conn();
        let net = seed_network(&conn, "prod", "10.0.0.0/24");
        let p1 = seed_peer(&conn, net.id, "a", "10.0.0.2");
        let p2 = seed_peer(&conn, net.id, "b", "10.0.0.3");

        let first = get_or_create(&conn, p1.id, p2.id).unwrap();
        let second = get_or_create(&conn, p2.id, p1.id).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.preshared_key, second.preshared_key);
    }

    #[test]
    fn rejects_self_connection() {
        let conn = memory_conn();
        let net = seed_network(&conn, "prod", "10.0.0.0/24");
        let p1 = seed_peer(&conn, net.id, "a", "10.0.0.2");
        let err = get_or_create(&conn, p1.id, p1.id).unwrap_err();
        assert_eq!(err.kind(), wgmesh_types::ErrorKind::Validation);
    }
}
