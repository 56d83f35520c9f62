//! In-memory fixtures shared by the `db` module's unit tests, in the spirit
//! of innernet's `server/src/test.rs::Server` fixture but scoped to just a
//! connection: nothing here talks to the network or a transport layer.
#![cfg(test)]

use rusqlite::Connection;
use wgmesh_types::{Network, NetworkContents};

pub fn memory_conn() -> Connection {
    let conn = Connection::open_in_memory().expect("open in-memory sqlite");
    conn.execute("PRAGMA foreign_keys = ON", []).expect("enable foreign_keys");
    crate::schema::auto_migrate(&conn).expect("auto_migrate");
    conn
}

pub fn seed_network(conn: &Connection, name: &str, cidr: &str) -> Network {
    crate::db::network::create(
        conn,
        NetworkContents {
            name: name.to_string(),
            cidr: cidr.parse().unwrap(),
            domain_suffix: "internal".to_string(),
            dns: vec![],
            default_group_ids: vec![],
        },
    )
    .expect("seed_network")
}
