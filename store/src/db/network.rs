use rusqlite::{params, Connection};
use wgmesh_types::{Error, GroupId, Network, NetworkContents, NetworkId, Result};

fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Network> {
    let id: String = row.get(0)?;
    let name = row.get(1)?;
    let cidr: String = row.get(2)?;
    let domain_suffix = row.get(3)?;
    let dns: String = row.get(4)?;
    let default_group_ids: String = row.get(5)?;

    Ok(Network {
        id: id.parse().map_err(|_| rusqlite::Error::InvalidColumnType(0, "id".into(), rusqlite::types::Type::Text))?,
        contents: NetworkContents {
            name,
            cidr: cidr.parse().map_err(|_| rusqlite::Error::InvalidColumnType(2, "cidr".into(), rusqlite::types::Type::Text))?,
            domain_suffix,
            dns: serde_json::from_str(&dns).unwrap_or_default(),
            default_group_ids: serde_json::from_str(&default_group_ids).unwrap_or_default(),
        },
    })
}

pub fn create(conn: &Connection, contents: NetworkContents) -> Result<Network> {
    let existing: i64 = conn.query_row(
        "SELECT COUNT(*) FROM networks WHERE name = ?1",
        params![contents.name],
        |r| r.get(0),
    )?;
    if existing > 0 {
        return Err(Error::duplicate_name(format!("network {:?} already exists", contents.name)));
    }

    let id = NetworkId::new();
    conn.execute(
        "INSERT INTO networks (id, name, cidr, domain_suffix, dns, default_group_ids)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            id.to_string(),
            contents.name,
            contents.cidr.to_string(),
            contents.domain_suffix,
            serde_json::to_string(&contents.dns)?,
            serde_json::to_string(&contents.default_group_ids)?,
        ],
    )?;
    Ok(Network { id, contents })
}

pub fn get(conn: &Connection, id: NetworkId) -> Result<Network> {
    Ok(conn.query_row(
        "SELECT id, name, cidr, domain_suffix, dns, default_group_ids FROM networks WHERE id = ?1",
        params![id.to_string()],
        from_row,
    )?)
}

pub fn list(conn: &Connection) -> Result<Vec<Network>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, name, cidr, domain_suffix, dns, default_group_ids FROM networks",
    )?;
    let rows = stmt.query_map([], from_row)?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

/// Updates only the fields an admin is allowed to change post-creation:
/// domain suffix, DNS resolvers and default group membership. The CIDR is
/// immutable after creation, mirroring how innernet's `DatabasePeer::update`
/// disregards changes to security-relevant identity fields.
pub fn update(
    conn: &Connection,
    id: NetworkId,
    domain_suffix: String,
    dns: Vec<std::net::IpAddr>,
    default_group_ids: Vec<GroupId>,
) -> Result<Network> {
    let mut network = get(conn, id)?;
    conn.execute(
        "UPDATE networks SET domain_suffix = ?1, dns = ?2, default_group_ids = ?3 WHERE id = ?4",
        params![
            domain_suffix,
            serde_json::to_string(&dns)?,
            serde_json::to_string(&default_group_ids)?,
            id.to_string(),
        ],
    )?;
    network.contents.domain_suffix = domain_suffix;
    network.contents.dns = dns;
    network.contents.default_group_ids = default_group_ids;
    Ok(network)
}

/// Cascades to every child entity via `ON DELETE CASCADE` (spec §3
/// Lifecycle: "network -> all children").
pub fn delete(conn: &Connection, id: NetworkId) -> Result<()> {
    let deleted = conn.execute("DELETE FROM networks WHERE id = ?1", params![id.to_string()])?;
    if deleted == 0 {
        return Err(Error::not_found(format!("network {id}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::memory_conn;

    fn contents(name: &str) -> NetworkContents {
        NetworkContents {
            name: name.to_string(),
            cidr: "10.0.0.0/16".parse().unwrap(),
            domain_suffix: "internal".to_string(),
            dns: vec![],
            default_group_ids: vec![],
        }
    }

    #[test]
    fn create_rejects_duplicate_name() {
        let conn = memory_conn();
        create(&conn, contents("prod")).unwrap();
        let err = create(&conn, contents("prod")).unwrap_err();
        assert_eq!(err.kind(), wgmesh_types::ErrorKind::Validation);
    }

    #[test]
    fn delete_cascades_to_peers() {
        let conn = memory_conn();
        let network = create(&conn, contents("prod")).unwrap();
        let peer = crate::db::peer::create(
            &conn,
            wgmesh_types::PeerContents {
                network_id: network.id,
                name: "p1".into(),
                public_key: "pub".into(),
                private_key: "priv".into(),
                address: "10.0.0.2".parse().unwrap(),
                endpoint: None,
                listen_port: None,
                is_jump: false,
                use_agent: true,
                owner_id: None,
                group_ids: vec![],
                additional_allowed_ips: vec![],
                token: "tok".into(),
            },
        )
        .unwrap();

        delete(&conn, network.id).unwrap();
        assert!(crate::db::peer::get(&conn, peer.id).is_err());
    }
}
