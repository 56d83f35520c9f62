//! Schema DDL. Foreign keys implement the cascades spec §3's "Lifecycle"
//! paragraph describes: deleting a network cascades to all its children;
//! deleting a route cascades to its DNS mappings; deleting a group
//! cascades only to its membership/attachment junction rows, never to the
//! peers/policies/routes themselves. A jump peer referenced by a route is
//! intentionally `RESTRICT`ed (spec §9: "rejected, not cascaded") - the
//! Store layer checks for this up front so it can return a friendly
//! `RefConflict` instead of a raw constraint violation.

pub const CREATE_NETWORKS_SQL: &str = "CREATE TABLE IF NOT EXISTS networks (
    id                  TEXT PRIMARY KEY,
    name                TEXT NOT NULL UNIQUE,
    cidr                TEXT NOT NULL,
    domain_suffix       TEXT NOT NULL,
    dns                 TEXT NOT NULL,
    default_group_ids   TEXT NOT NULL
)";

pub const CREATE_PEERS_SQL: &str = "CREATE TABLE IF NOT EXISTS peers (
    id                      TEXT PRIMARY KEY,
    network_id              TEXT NOT NULL REFERENCES networks(id) ON DELETE CASCADE,
    name                    TEXT NOT NULL,
    public_key              TEXT NOT NULL,
    private_key             TEXT NOT NULL,
    address                 TEXT NOT NULL,
    endpoint                TEXT,
    listen_port             INTEGER,
    is_jump                 INTEGER NOT NULL,
    use_agent               INTEGER NOT NULL,
    owner_id                TEXT,
    additional_allowed_ips  TEXT NOT NULL,
    token                   TEXT NOT NULL UNIQUE,
    UNIQUE(network_id, name),
    UNIQUE(network_id, address)
)";

pub const CREATE_GROUPS_SQL: &str = "CREATE TABLE IF NOT EXISTS groups (
    id              TEXT PRIMARY KEY,
    network_id      TEXT NOT NULL REFERENCES networks(id) ON DELETE CASCADE,
    name            TEXT NOT NULL,
    created_at_seq  INTEGER NOT NULL,
    UNIQUE(network_id, name)
)";

pub const CREATE_GROUP_PEERS_SQL: &str = "CREATE TABLE IF NOT EXISTS group_peers (
    group_id  TEXT NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
    peer_id   TEXT NOT NULL REFERENCES peers(id) ON DELETE CASCADE,
    PRIMARY KEY (group_id, peer_id)
)";

pub const CREATE_POLICIES_SQL: &str = "CREATE TABLE IF NOT EXISTS policies (
    id          TEXT PRIMARY KEY,
    network_id  TEXT NOT NULL REFERENCES networks(id) ON DELETE CASCADE,
    name        TEXT NOT NULL,
    UNIQUE(network_id, name)
)";

pub const CREATE_POLICY_RULES_SQL: &str = "CREATE TABLE IF NOT EXISTS policy_rules (
    id              TEXT PRIMARY KEY,
    policy_id       TEXT NOT NULL REFERENCES policies(id) ON DELETE CASCADE,
    rule_order      INTEGER NOT NULL,
    direction       TEXT NOT NULL,
    action          TEXT NOT NULL,
    target          TEXT NOT NULL,
    target_type     TEXT NOT NULL,
    description     TEXT
)";

pub const CREATE_GROUP_POLICIES_SQL: &str = "CREATE TABLE IF NOT EXISTS group_policies (
    group_id      TEXT NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
    policy_id     TEXT NOT NULL REFERENCES policies(id) ON DELETE CASCADE,
    policy_order  INTEGER NOT NULL,
    PRIMARY KEY (group_id, policy_id)
)";

pub const CREATE_ROUTES_SQL: &str = "CREATE TABLE IF NOT EXISTS routes (
    id                  TEXT PRIMARY KEY,
    network_id          TEXT NOT NULL REFERENCES networks(id) ON DELETE CASCADE,
    name                TEXT NOT NULL,
    destination_cidr    TEXT NOT NULL,
    jump_peer_id        TEXT NOT NULL REFERENCES peers(id) ON DELETE RESTRICT,
    domain_suffix       TEXT,
    UNIQUE(network_id, name)
)";

pub const CREATE_GROUP_ROUTES_SQL: &str = "CREATE TABLE IF NOT EXISTS group_routes (
    group_id  TEXT NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
    route_id  TEXT NOT NULL REFERENCES routes(id) ON DELETE CASCADE,
    PRIMARY KEY (group_id, route_id)
)";

pub const CREATE_DNS_MAPPINGS_SQL: &str = "CREATE TABLE IF NOT EXISTS dns_mappings (
    id          TEXT PRIMARY KEY,
    route_id    TEXT NOT NULL REFERENCES routes(id) ON DELETE CASCADE,
    name        TEXT NOT NULL,
    ip_address  TEXT NOT NULL,
    UNIQUE(route_id, name)
)";

pub const CREATE_PEER_CONNECTIONS_SQL: &str = "CREATE TABLE IF NOT EXISTS peer_connections (
    id              TEXT PRIMARY KEY,
    peer1_id        TEXT NOT NULL REFERENCES peers(id) ON DELETE CASCADE,
    peer2_id        TEXT NOT NULL REFERENCES peers(id) ON DELETE CASCADE,
    preshared_key   TEXT NOT NULL,
    UNIQUE(peer1_id, peer2_id)
)";

pub const ALL_TABLES: &[&str] = &[
    CREATE_NETWORKS_SQL,
    CREATE_PEERS_SQL,
    CREATE_GROUPS_SQL,
    CREATE_GROUP_PEERS_SQL,
    CREATE_POLICIES_SQL,
    CREATE_POLICY_RULES_SQL,
    CREATE_GROUP_POLICIES_SQL,
    CREATE_ROUTES_SQL,
    CREATE_GROUP_ROUTES_SQL,
    CREATE_DNS_MAPPINGS_SQL,
    CREATE_PEER_CONNECTIONS_SQL,
];

/// Creates all tables if they don't already exist. Called on every
/// connection open, matching `server/src/db/mod.rs::auto_migrate`'s role
/// in innernet - there's no migration framework because the schema only
/// ever grows new optional columns, which `CREATE TABLE IF NOT EXISTS`
/// alone doesn't need help with yet.
pub fn auto_migrate(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    for sql in ALL_TABLES {
        conn.execute(sql, [])?;
    }
    Ok(())
}
