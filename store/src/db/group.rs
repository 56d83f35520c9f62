use rusqlite::{params, Connection};
use wgmesh_types::{Error, Group, GroupContents, NetworkId, GroupId, PolicyId, RouteId, PeerId, Result};

fn fetch_peer_ids(conn: &Connection, group_id: GroupId) -> Result<Vec<PeerId>> {
    let mut stmt = conn.prepare_cached("SELECT peer_id FROM group_peers WHERE group_id = ?1")?;
    let ids = stmt
        .query_map(params![group_id.to_string()], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids.into_iter().filter_map(|s| s.parse().ok()).collect())
}

/// Policy attachment order is precedence order (spec §3 invariant 4), so
/// unlike `group_peers`/`group_routes` this reads back sorted by
/// `policy_order` rather than arbitrary row order.
fn fetch_policy_ids(conn: &Connection, group_id: GroupId) -> Result<Vec<PolicyId>> {
    let mut stmt = conn.prepare_cached(
        "SELECT policy_id FROM group_policies WHERE group_id = ?1 ORDER BY policy_order",
    )?;
    let ids = stmt
        .query_map(params![group_id.to_string()], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids.into_iter().filter_map(|s| s.parse().ok()).collect())
}

fn fetch_route_ids(conn: &Connection, group_id: GroupId) -> Result<Vec<RouteId>> {
    let mut stmt = conn.prepare_cached("SELECT route_id FROM group_routes WHERE group_id = ?1")?;
    let ids = stmt
        .query_map(params![group_id.to_string()], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids.into_iter().filter_map(|s| s.parse().ok()).collect())
}

fn hydrate(conn: &Connection, mut group: Group) -> Result<Group> {
    group.contents.peer_ids = fetch_peer_ids(conn, group.id)?;
    group.contents.policy_ids = fetch_policy_ids(conn, group.id)?;
    group.contents.route_ids = fetch_route_ids(conn, group.id)?;
    Ok(group)
}

fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Group> {
    let id: String = row.get(0)?;
    let network_id: String = row.get(1)?;
    let name = row.get(2)?;
    let created_at_seq: i64 = row.get(3)?;

    Ok(Group {
        id: id.parse().map_err(|_| rusqlite::Error::InvalidColumnType(0, "id".into(), rusqlite::types::Type::Text))?,
        contents: GroupContents {
            network_id: network_id
                .parse()
                .map_err(|_| rusqlite::Error::InvalidColumnType(1, "network_id".into(), rusqlite::types::Type::Text))?,
            name,
            peer_ids: vec![],
            policy_ids: vec![],
            route_ids: vec![],
        },
        created_at_seq: created_at_seq as u64,
    })
}

fn next_created_at_seq(conn: &Connection, network_id: NetworkId) -> Result<u64> {
    let max: Option<i64> = conn.query_row(
        "SELECT MAX(created_at_seq) FROM groups WHERE network_id = ?1",
        params![network_id.to_string()],
        |r| r.get(0),
    )?;
    Ok(max.unwrap_or(-1) as u64 + 1)
}

pub fn create(conn: &Connection, contents: GroupContents) -> Result<Group> {
    let existing: i64 = conn.query_row(
        "SELECT COUNT(*) FROM groups WHERE network_id = ?1 AND name = ?2",
        params![contents.network_id.to_string(), contents.name],
        |r| r.get(0),
    )?;
    if existing > 0 {
        return Err(Error::duplicate_name(format!("group {:?} already exists in network", contents.name)));
    }

    let id = GroupId::new();
    let created_at_seq = next_created_at_seq(conn, contents.network_id)?;
    conn.execute(
        "INSERT INTO groups (id, network_id, name, created_at_seq) VALUES (?1, ?2, ?3, ?4)",
        params![id.to_string(), contents.network_id.to_string(), contents.name, created_at_seq as i64],
    )?;

    attach_peers(conn, id, &contents.peer_ids)?;
    attach_policies(conn, id, &contents.policy_ids)?;
    attach_routes(conn, id, &contents.route_ids)?;

    Ok(Group { id, contents, created_at_seq })
}

fn attach_peers(conn: &Connection, group_id: GroupId, peer_ids: &[PeerId]) -> Result<()> {
    conn.execute("DELETE FROM group_peers WHERE group_id = ?1", params![group_id.to_string()])?;
    for peer_id in peer_ids {
        conn.execute(
            "INSERT INTO group_peers (group_id, peer_id) VALUES (?1, ?2)",
            params![group_id.to_string(), peer_id.to_string()],
        )?;
    }
    Ok(())
}

fn attach_policies(conn: &Connection, group_id: GroupId, policy_ids: &[PolicyId]) -> Result<()> {
    conn.execute("DELETE FROM group_policies WHERE group_id = ?1", params![group_id.to_string()])?;
    for (order, policy_id) in policy_ids.iter().enumerate() {
        conn.execute(
            "INSERT INTO group_policies (group_id, policy_id, policy_order) VALUES (?1, ?2, ?3)",
            params![group_id.to_string(), policy_id.to_string(), order as i64],
        )?;
    }
    Ok(())
}

fn attach_routes(conn: &Connection, group_id: GroupId, route_ids: &[RouteId]) -> Result<()> {
    conn.execute("DELETE FROM group_routes WHERE group_id = ?1", params![group_id.to_string()])?;
    for route_id in route_ids {
        conn.execute(
            "INSERT INTO group_routes (group_id, route_id) VALUES (?1, ?2)",
            params![group_id.to_string(), route_id.to_string()],
        )?;
    }
    Ok(())
}

pub fn get(conn: &Connection, id: GroupId) -> Result<Group> {
    let group = conn.query_row(
        "SELECT id, network_id, name, created_at_seq FROM groups WHERE id = ?1",
        params![id.to_string()],
        from_row,
    )?;
    hydrate(conn, group)
}

pub fn list_in_network(conn: &Connection, network_id: NetworkId) -> Result<Vec<Group>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, network_id, name, created_at_seq FROM groups WHERE network_id = ?1 ORDER BY created_at_seq",
    )?;
    let rows = stmt
        .query_map(params![network_id.to_string()], from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(|g| hydrate(conn, g)).collect()
}

/// Updates membership and attachments. Name and `created_at_seq` are
/// immutable after creation: `created_at_seq` in particular must stay
/// stable since it's the documented policy-precedence tiebreaker (spec
/// §4.2/§4.4) and renaming it away from creation order would silently
/// reorder policy application for every peer in the group.
pub fn update(conn: &Connection, id: GroupId, contents: GroupContents) -> Result<Group> {
    let current = get(conn, id)?;
    attach_peers(conn, id, &contents.peer_ids)?;
    attach_policies(conn, id, &contents.policy_ids)?;
    attach_routes(conn, id, &contents.route_ids)?;
    Ok(Group {
        id,
        contents: GroupContents { network_id: current.contents.network_id, name: current.contents.name, ..contents },
        created_at_seq: current.created_at_seq,
    })
}

/// Deleting a group only removes its membership/attachment junction rows
/// (spec §3 Lifecycle); peers, policies and routes it referenced continue
/// to exist independently.
pub fn delete(conn: &Connection, id: GroupId) -> Result<()> {
    let deleted = conn.execute("DELETE FROM groups WHERE id = ?1", params![id.to_string()])?;
    if deleted == 0 {
        return Err(Error::not_found(format!("group {id}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{memory_conn, seed_network};

    fn group_contents(network_id: NetworkId, name: &str) -> GroupContents {
        GroupContents { network_id, name: name.to_string(), peer_ids: vec![], policy_ids: vec![], route_ids: vec![] }
    }

    #[test]
    fn create_rejects_duplicate_name() {
        let conn = memory_conn();
        let net = seed_network(&conn, "prod", "10.0.0.0/24");
        create(&conn, group_contents(net.id, "engineers")).unwrap();
        let err = create(&conn, group_contents(net.id, "engineers")).unwrap_err();
        assert_eq!(err.kind(), wgmesh_types::ErrorKind::Validation);
    }

    #[test]
    fn created_at_seq_increments_per_network() {
        let conn = memory_conn();
        let net = seed_network(&conn, "prod", "10.0.0.0/24");
        let first = create(&conn, group_contents(net.id, "a")).unwrap();
        let second = create(&conn, group_contents(net.id, "b")).unwrap();
        assert_eq!(first.created_at_seq, 0);
        assert_eq!(second.created_at_seq, 1);
    }

    fn seed_policy(conn: &Connection, network_id: NetworkId, name: &str) -> PolicyId {
        let id = PolicyId::new();
        conn.execute(
            "INSERT INTO policies (id, network_id, name) VALUES (?1, ?2, ?3)",
            params![id.to_string(), network_id.to_string(), name],
        )
        .unwrap();
        id
    }

    #[test]
    fn policy_ids_round_trip_in_attachment_order() {
        let conn = memory_conn();
        let net = seed_network(&conn, "prod", "10.0.0.0/24");
        let p1 = seed_policy(&conn, net.id, "allow-dns");
        let p2 = seed_policy(&conn, net.id, "deny-all");
        let mut contents = group_contents(net.id, "engineers");
        contents.policy_ids = vec![p1, p2];
        let group = create(&conn, contents).unwrap();
        assert_eq!(group.contents.policy_ids, vec![p1, p2]);
        let fetched = get(&conn, group.id).unwrap();
        assert_eq!(fetched.contents.policy_ids, vec![p1, p2]);
    }
}
