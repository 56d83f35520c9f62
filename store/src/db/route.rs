use rusqlite::{params, Connection};
use wgmesh_types::{Error, NetworkId, Result, Route, RouteContents, RouteId};

fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Route> {
    let id: String = row.get(0)?;
    let network_id: String = row.get(1)?;
    let name = row.get(2)?;
    let destination_cidr: String = row.get(3)?;
    let jump_peer_id: String = row.get(4)?;
    let domain_suffix = row.get(5)?;

    Ok(Route {
        id: id.parse().map_err(|_| rusqlite::Error::InvalidColumnType(0, "id".into(), rusqlite::types::Type::Text))?,
        contents: RouteContents {
            network_id: network_id
                .parse()
                .map_err(|_| rusqlite::Error::InvalidColumnType(1, "network_id".into(), rusqlite::types::Type::Text))?,
            name,
            destination_cidr: destination_cidr
                .parse()
                .map_err(|_| rusqlite::Error::InvalidColumnType(3, "destination_cidr".into(), rusqlite::types::Type::Text))?,
            jump_peer_id: jump_peer_id
                .parse()
                .map_err(|_| rusqlite::Error::InvalidColumnType(4, "jump_peer_id".into(), rusqlite::types::Type::Text))?,
            domain_suffix,
        },
    })
}

/// Spec §3 invariant 2: a route's jump peer must be a jump peer (`is_jump`)
/// in the same network the route belongs to.
fn validate_jump_peer(conn: &Connection, contents: &RouteContents) -> Result<()> {
    let is_valid_jump: i64 = conn.query_row(
        "SELECT COUNT(*) FROM peers WHERE id = ?1 AND network_id = ?2 AND is_jump = 1",
        params![contents.jump_peer_id.to_string(), contents.network_id.to_string()],
        |r| r.get(0),
    )?;
    if is_valid_jump == 0 {
        return Err(Error::validation("jump_peer_id must reference a jump peer in the same network"));
    }
    Ok(())
}

pub fn create(conn: &Connection, contents: RouteContents) -> Result<Route> {
    validate_jump_peer(conn, &contents)?;

    let existing: i64 = conn.query_row(
        "SELECT COUNT(*) FROM routes WHERE network_id = ?1 AND name = ?2",
        params![contents.network_id.to_string(), contents.name],
        |r| r.get(0),
    )?;
    if existing > 0 {
        return Err(Error::duplicate_name(format!("route {:?} already exists in network", contents.name)));
    }

    let id = RouteId::new();
    conn.execute(
        "INSERT INTO routes (id, network_id, name, destination_cidr, jump_peer_id, domain_suffix) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            id.to_string(),
            contents.network_id.to_string(),
            contents.name,
            contents.destination_cidr.to_string(),
            contents.jump_peer_id.to_string(),
            contents.domain_suffix,
        ],
    )?;
    Ok(Route { id, contents })
}

pub fn get(conn: &Connection, id: RouteId) -> Result<Route> {
    Ok(conn.query_row(
        "SELECT id, network_id, name, destination_cidr, jump_peer_id, domain_suffix FROM routes WHERE id = ?1",
        params![id.to_string()],
        from_row,
    )?)
}

pub fn list_in_network(conn: &Connection, network_id: NetworkId) -> Result<Vec<Route>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, network_id, name, destination_cidr, jump_peer_id, domain_suffix FROM routes WHERE network_id = ?1",
    )?;
    let rows = stmt.query_map(params![network_id.to_string()], from_row)?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

/// Narrowing a route's `destination_cidr` so that an existing DNS mapping's
/// `ip_address` falls outside it is rejected (Open Question in spec §3,
/// resolved in DESIGN.md): admins must remove or re-point the mapping
/// first, the same "fix dependents before the edit" posture `peer::delete`
/// takes for jump-peer/route conflicts.
pub fn update(conn: &Connection, id: RouteId, contents: RouteContents) -> Result<Route> {
    let current = get(conn, id)?;
    validate_jump_peer(conn, &contents)?;

    let mut stmt = conn.prepare_cached("SELECT ip_address FROM dns_mappings WHERE route_id = ?1")?;
    let mapped_ips = stmt
        .query_map(params![id.to_string()], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for ip in &mapped_ips {
        let addr: std::net::IpAddr = ip.parse().map_err(|_| Error::internal("corrupt ip_address in dns_mappings row"))?;
        if !contents.destination_cidr.contains(&addr) {
            return Err(Error::ref_conflict(format!(
                "cannot narrow route cidr to {}: existing dns mapping at {} would fall outside it",
                contents.destination_cidr, addr
            )));
        }
    }

    conn.execute(
        "UPDATE routes SET name = ?1, destination_cidr = ?2, jump_peer_id = ?3, domain_suffix = ?4 WHERE id = ?5",
        params![
            contents.name,
            contents.destination_cidr.to_string(),
            contents.jump_peer_id.to_string(),
            contents.domain_suffix,
            id.to_string(),
        ],
    )?;

    let _ = current;
    Ok(Route { id, contents })
}

/// Cascades to its DNS mappings (spec §3 Lifecycle: "route -> dns_mappings").
pub fn delete(conn: &Connection, id: RouteId) -> Result<()> {
    let deleted = conn.execute("DELETE FROM routes WHERE id = ?1", params![id.to_string()])?;
    if deleted == 0 {
        return Err(Error::not_found(format!("route {id}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{memory_conn, seed_network};
    use wgmesh_types::PeerContents;

    fn seed_jump_peer(conn: &Connection, network_id: NetworkId, addr: &str) -> wgmesh_types::Peer {
        crate::db::peer::create(
            conn,
            PeerContents {
                network_id,
                name: "jump1".into(),
                public_key: "pub".into(),
                private_key: "priv".into(),
                address: addr.parse().unwrap(),
                endpoint: None,
                listen_port: Some(51820),
                is_jump: true,
                use_agent: true,
                owner_id: None,
                group_ids: vec![],
                additional_allowed_ips: vec![],
                token: "tok".into(),
            },
        )
        .unwrap()
    }

    #[test]
    fn rejects_jump_peer_id_that_is_not_a_jump_peer() {
        let conn = memory_conn();
        let net = seed_network(&conn, "prod", "10.0.0.0/24");
        let peer = crate::db::peer::create(
            &conn,
            PeerContents {
                network_id: net.id,
                name: "regular".into(),
                public_key: "pub".into(),
                private_key: "priv".into(),
                address: "10.0.0.5".parse().unwrap(),
                endpoint: None,
                listen_port: None,
                is_jump: false,
                use_agent: true,
                owner_id: None,
                group_ids: vec![],
                additional_allowed_ips: vec![],
                token: "tok2".into(),
            },
        )
        .unwrap();

        let err = create(
            &conn,
            RouteContents {
                network_id: net.id,
                name: "backend".into(),
                destination_cidr: "192.168.7.0/24".parse().unwrap(),
                jump_peer_id: peer.id,
                domain_suffix: None,
            },
        )
        .unwrap_err();
        assert_eq!(err.kind(), wgmesh_types::ErrorKind::Validation);
    }

    #[test]
    fn update_rejects_narrowing_cidr_past_existing_dns_mapping() {
        let conn = memory_conn();
        let net = seed_network(&conn, "prod", "10.0.0.0/24");
        let jump = seed_jump_peer(&conn, net.id, "10.0.0.2");
        let route = create(
            &conn,
            RouteContents {
                network_id: net.id,
                name: "backend".into(),
                destination_cidr: "192.168.0.0/16".parse().unwrap(),
                jump_peer_id: jump.id,
                domain_suffix: None,
            },
        )
        .unwrap();

        crate::db::dns::create(
            &conn,
            wgmesh_types::DnsMappingContents { route_id: route.id, name: "api".into(), ip_address: "192.168.200.5".parse().unwrap() },
        )
        .unwrap();

        let err = update(
            &conn,
            route.id,
            RouteContents { destination_cidr: "192.168.0.0/24".parse().unwrap(), ..route.contents.clone() },
        )
        .unwrap_err();
        assert_eq!(err.kind(), wgmesh_types::ErrorKind::RefConflict);
    }
}
