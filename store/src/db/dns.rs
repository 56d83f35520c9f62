use rusqlite::{params, Connection};
use wgmesh_types::{DnsMapping, DnsMappingContents, DnsMappingId, Error, Result, RouteId};

use super::route;

fn from_row(row: &rusqlite::Row) -> rusqlite::Result<DnsMapping> {
    let id: String = row.get(0)?;
    let route_id: String = row.get(1)?;
    let name = row.get(2)?;
    let ip_address: String = row.get(3)?;

    Ok(DnsMapping {
        id: id.parse().map_err(|_| rusqlite::Error::InvalidColumnType(0, "id".into(), rusqlite::types::Type::Text))?,
        contents: DnsMappingContents {
            route_id: route_id
                .parse()
                .map_err(|_| rusqlite::Error::InvalidColumnType(1, "route_id".into(), rusqlite::types::Type::Text))?,
            name,
            ip_address: ip_address
                .parse()
                .map_err(|_| rusqlite::Error::InvalidColumnType(3, "ip_address".into(), rusqlite::types::Type::Text))?,
        },
    })
}

/// Spec invariant 5: a mapping's `ip_address` must fall within its route's
/// `destination_cidr`.
fn validate_ip_in_route(conn: &Connection, contents: &DnsMappingContents) -> Result<()> {
    let r = route::get(conn, contents.route_id)?;
    if !r.destination_cidr.contains(&contents.ip_address) {
        return Err(Error::validation(format!(
            "ip_address {} is outside route cidr {}",
            contents.ip_address, r.destination_cidr
        )));
    }
    Ok(())
}

pub fn create(conn: &Connection, contents: DnsMappingContents) -> Result<DnsMapping> {
    validate_ip_in_route(conn, &contents)?;

    let existing: i64 = conn.query_row(
        "SELECT COUNT(*) FROM dns_mappings WHERE route_id = ?1 AND name = ?2",
        params![contents.route_id.to_string(), contents.name],
        |r| r.get(0),
    )?;
    if existing > 0 {
        return Err(Error::duplicate_name(format!("dns mapping {:?} already exists on this route", contents.name)));
    }

    let id = DnsMappingId::new();
    conn.execute(
        "INSERT INTO dns_mappings (id, route_id, name, ip_address) VALUES (?1, ?2, ?3, ?4)",
        params![id.to_string(), contents.route_id.to_string(), contents.name, contents.ip_address.to_string()],
    )?;
    Ok(DnsMapping { id, contents })
}

pub fn get(conn: &Connection, id: DnsMappingId) -> Result<DnsMapping> {
    Ok(conn.query_row(
        "SELECT id, route_id, name, ip_address FROM dns_mappings WHERE id = ?1",
        params![id.to_string()],
        from_row,
    )?)
}

pub fn list_for_route(conn: &Connection, route_id: RouteId) -> Result<Vec<DnsMapping>> {
    let mut stmt = conn.prepare_cached("SELECT id, route_id, name, ip_address FROM dns_mappings WHERE route_id = ?1")?;
    let rows = stmt.query_map(params![route_id.to_string()], from_row)?;
    Ok(rows.collect::<rusqlite::Result<_>>()?)
}

pub fn update(conn: &Connection, id: DnsMappingId, contents: DnsMappingContents) -> Result<DnsMapping> {
    get(conn, id)?;
    validate_ip_in_route(conn, &contents)?;
    conn.execute(
        "UPDATE dns_mappings SET name = ?1, ip_address = ?2 WHERE id = ?3",
        params![contents.name, contents.ip_address.to_string(), id.to_string()],
    )?;
    Ok(DnsMapping { id, contents })
}

pub fn delete(conn: &Connection, id: DnsMappingId) -> Result<()> {
    let deleted = conn.execute("DELETE FROM dns_mappings WHERE id = ?1", params![id.to_string()])?;
    if deleted == 0 {
        return Err(Error::not_found(format!("dns mapping {id}")));
    }
    Ok(())
}
