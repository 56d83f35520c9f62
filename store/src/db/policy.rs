use rusqlite::{params, Connection};
use wgmesh_types::{Error, NetworkId, Policy, PolicyContents, PolicyId, Result, Rule, RuleAction, RuleDirection, RuleId, TargetType};

fn direction_str(d: RuleDirection) -> &'static str {
    match d {
        RuleDirection::Input => "input",
        RuleDirection::Output => "output",
    }
}

fn parse_direction(s: &str) -> rusqlite::Result<RuleDirection> {
    match s {
        "input" => Ok(RuleDirection::Input),
        "output" => Ok(RuleDirection::Output),
        _ => Err(rusqlite::Error::InvalidColumnType(0, "direction".into(), rusqlite::types::Type::Text)),
    }
}

fn action_str(a: RuleAction) -> &'static str {
    match a {
        RuleAction::Allow => "allow",
        RuleAction::Deny => "deny",
    }
}

fn parse_action(s: &str) -> rusqlite::Result<RuleAction> {
    match s {
        "allow" => Ok(RuleAction::Allow),
        "deny" => Ok(RuleAction::Deny),
        _ => Err(rusqlite::Error::InvalidColumnType(0, "action".into(), rusqlite::types::Type::Text)),
    }
}

fn target_type_str(t: TargetType) -> &'static str {
    match t {
        TargetType::Cidr => "cidr",
        TargetType::Peer => "peer",
        TargetType::Group => "group",
    }
}

fn parse_target_type(s: &str) -> rusqlite::Result<TargetType> {
    match s {
        "cidr" => Ok(TargetType::Cidr),
        "peer" => Ok(TargetType::Peer),
        "group" => Ok(TargetType::Group),
        _ => Err(rusqlite::Error::InvalidColumnType(0, "target_type".into(), rusqlite::types::Type::Text)),
    }
}

/// Rule order is iptables match order (spec §4.4), so rules are always
/// read back `ORDER BY rule_order` rather than relying on sqlite's
/// incidental row order.
fn fetch_rules(conn: &Connection, policy_id: PolicyId) -> Result<Vec<Rule>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, direction, action, target, target_type, description \
         FROM policy_rules WHERE policy_id = ?1 ORDER BY rule_order",
    )?;
    let rules = stmt
        .query_map(params![policy_id.to_string()], |row| {
            let id: String = row.get(0)?;
            let direction: String = row.get(1)?;
            let action: String = row.get(2)?;
            let target = row.get(3)?;
            let target_type: String = row.get(4)?;
            let description = row.get(5)?;
            Ok(Rule {
                id: id.parse().map_err(|_| rusqlite::Error::InvalidColumnType(0, "id".into(), rusqlite::types::Type::Text))?,
                direction: parse_direction(&direction)?,
                action: parse_action(&action)?,
                target,
                target_type: parse_target_type(&target_type)?,
                description,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rules)
}

fn replace_rules(conn: &Connection, policy_id: PolicyId, rules: &[Rule]) -> Result<()> {
    conn.execute("DELETE FROM policy_rules WHERE policy_id = ?1", params![policy_id.to_string()])?;
    for (order, rule) in rules.iter().enumerate() {
        conn.execute(
            "INSERT INTO policy_rules (id, policy_id, rule_order, direction, action, target, target_type, description) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                rule.id.to_string(),
                policy_id.to_string(),
                order as i64,
                direction_str(rule.direction),
                action_str(rule.action),
                rule.target,
                target_type_str(rule.target_type),
                rule.description,
            ],
        )?;
    }
    Ok(())
}

pub fn create(conn: &Connection, contents: PolicyContents) -> Result<Policy> {
    let existing: i64 = conn.query_row(
        "SELECT COUNT(*) FROM policies WHERE network_id = ?1 AND name = ?2",
        params![contents.network_id.to_string(), contents.name],
        |r| r.get(0),
    )?;
    if existing > 0 {
        return Err(Error::duplicate_name(format!("policy {:?} already exists in network", contents.name)));
    }

    let id = PolicyId::new();
    conn.execute(
        "INSERT INTO policies (id, network_id, name) VALUES (?1, ?2, ?3)",
        params![id.to_string(), contents.network_id.to_string(), contents.name],
    )?;
    replace_rules(conn, id, &contents.rules)?;
    Ok(Policy { id, contents })
}

/// Instantiates a new policy from a read-only template (spec §9 design
/// note; SPEC_FULL supplement #1): deep-copies the template's rules into
/// freshly-generated, owned `Rule`s so later catalog edits - there are
/// none, the catalog is `const` - can never retroactively mutate a policy
/// already created from it.
pub fn create_from_template(conn: &Connection, network_id: NetworkId, name: String, template_name: &str) -> Result<Policy> {
    let template = wgmesh_types::templates::find(template_name)
        .ok_or_else(|| Error::validation(format!("no such policy template {template_name:?}")))?;
    create(conn, PolicyContents { network_id, name, rules: template.instantiate() })
}

pub fn get(conn: &Connection, id: PolicyId) -> Result<Policy> {
    let (network_id, name): (String, String) = conn.query_row(
        "SELECT network_id, name FROM policies WHERE id = ?1",
        params![id.to_string()],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    let rules = fetch_rules(conn, id)?;
    Ok(Policy {
        id,
        contents: PolicyContents {
            network_id: network_id.parse().map_err(|_| Error::internal("corrupt network_id in policies row"))?,
            name,
            rules,
        },
    })
}

pub fn list_in_network(conn: &Connection, network_id: NetworkId) -> Result<Vec<Policy>> {
    let mut stmt = conn.prepare_cached("SELECT id FROM policies WHERE network_id = ?1")?;
    let ids = stmt
        .query_map(params![network_id.to_string()], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    ids.into_iter()
        .filter_map(|s| s.parse::<PolicyId>().ok())
        .map(|id| get(conn, id))
        .collect()
}

/// Replaces the rule list wholesale; this is the one mutation a policy
/// admits post-creation (spec §3 invariant 4 treats the rule list as the
/// unit of change, not individual rules).
pub fn update_rules(conn: &Connection, id: PolicyId, rules: Vec<Rule>) -> Result<Policy> {
    let mut policy = get(conn, id)?;
    replace_rules(conn, id, &rules)?;
    policy.contents.rules = rules;
    Ok(policy)
}

pub fn delete(conn: &Connection, id: PolicyId) -> Result<()> {
    let deleted = conn.execute("DELETE FROM policies WHERE id = ?1", params![id.to_string()])?;
    if deleted == 0 {
        return Err(Error::not_found(format!("policy {id}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{memory_conn, seed_network};

    fn rule(order_tag: &str) -> Rule {
        Rule {
            id: RuleId::new(),
            direction: RuleDirection::Input,
            action: RuleAction::Allow,
            target: order_tag.to_string(),
            target_type: TargetType::Cidr,
            description: None,
        }
    }

    #[test]
    fn rules_round_trip_in_order() {
        let conn = memory_conn();
        let net = seed_network(&conn, "prod", "10.0.0.0/24");
        let contents = PolicyContents {
            network_id: net.id,
            name: "allow-dns".into(),
            rules: vec![rule("10.0.0.1/32"), rule("10.0.0.2/32"), rule("10.0.0.3/32")],
        };
        let policy = create(&conn, contents).unwrap();
        let fetched = get(&conn, policy.id).unwrap();
        let targets: Vec<_> = fetched.contents.rules.iter().map(|r| r.target.clone()).collect();
        assert_eq!(targets, vec!["10.0.0.1/32", "10.0.0.2/32", "10.0.0.3/32"]);
    }

    #[test]
    fn create_rejects_duplicate_name() {
        let conn = memory_conn();
        let net = seed_network(&conn, "prod", "10.0.0.0/24");
        create(&conn, PolicyContents { network_id: net.id, name: "p".into(), rules: vec![] }).unwrap();
        let err = create(&conn, PolicyContents { network_id: net.id, name: "p".into(), rules: vec![] }).unwrap_err();
        assert_eq!(err.kind(), wgmesh_types::ErrorKind::Validation);
    }

    #[test]
    fn create_from_template_deep_copies_catalog_rules() {
        let conn = memory_conn();
        let net = seed_network(&conn, "prod", "10.0.0.0/24");
        let policy = create_from_template(&conn, net.id, "default".into(), "default-network").unwrap();
        assert_eq!(policy.contents.rules.len(), 1);

        // Instantiating again must mint a fresh rule id, not share the
        // catalog's: mutating one policy's rules can never be observed by
        // another policy created from the same template.
        let other = create_from_template(&conn, net.id, "default-2".into(), "default-network").unwrap();
        assert_ne!(policy.contents.rules[0].id, other.contents.rules[0].id);
    }

    #[test]
    fn create_from_template_rejects_unknown_name() {
        let conn = memory_conn();
        let net = seed_network(&conn, "prod", "10.0.0.0/24");
        let err = create_from_template(&conn, net.id, "x".into(), "nonexistent").unwrap_err();
        assert_eq!(err.kind(), wgmesh_types::ErrorKind::Validation);
    }
}
