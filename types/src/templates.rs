//! Policy templates are pure data: a read-only catalog built once at
//! process init (spec §9). Instantiating from a template deep-copies the
//! rules so later catalog changes - there are none, the catalog is a
//! `const` slice - can never mutate a policy that was already created from
//! it. Grounded on the same "named preset, deep-copied into a fresh owned
//! struct" shape as `shared::prompts` building a `PeerContents` from a
//! selected CIDR.

use crate::{
    ids::RuleId,
    model::{Rule, RuleAction, RuleDirection, TargetType},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PolicyTemplate {
    pub name: &'static str,
    pub description: &'static str,
    rules: &'static [TemplateRule],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct TemplateRule {
    direction: RuleDirection,
    action: RuleAction,
    target: &'static str,
    target_type: TargetType,
    description: &'static str,
}

pub const FULLY_ENCAPSULATED: PolicyTemplate = PolicyTemplate {
    name: "fully-encapsulated",
    description: "Peer can only reach other peers in its own group; everything else is denied.",
    rules: &[TemplateRule {
        direction: RuleDirection::Output,
        action: RuleAction::Allow,
        target: "self",
        target_type: TargetType::Group,
        description: "allow traffic to groupmates",
    }],
};

pub const ISOLATED: PolicyTemplate = PolicyTemplate {
    name: "isolated",
    description: "Peer cannot reach anything beyond DNS and WireGuard control traffic.",
    rules: &[],
};

pub const DEFAULT_NETWORK: PolicyTemplate = PolicyTemplate {
    name: "default-network",
    description: "Peer can reach the entire network CIDR.",
    rules: &[TemplateRule {
        direction: RuleDirection::Output,
        action: RuleAction::Allow,
        target: "0.0.0.0/0",
        target_type: TargetType::Cidr,
        description: "allow all outbound traffic",
    }],
};

pub const CATALOG: &[PolicyTemplate] = &[FULLY_ENCAPSULATED, ISOLATED, DEFAULT_NETWORK];

pub fn find(name: &str) -> Option<&'static PolicyTemplate> {
    CATALOG.iter().find(|t| t.name == name)
}

impl PolicyTemplate {
    /// Deep-copies this template's rules into freshly-generated, owned
    /// `Rule`s, each with a new id.
    pub fn instantiate(&self) -> Vec<Rule> {
        self.rules
            .iter()
            .map(|r| Rule {
                id: RuleId::new(),
                direction: r.direction,
                action: r.action,
                target: r.target.to_string(),
                target_type: r.target_type,
                description: Some(r.description.to_string()),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_lookup_by_name() {
        assert_eq!(find("isolated").unwrap().name, "isolated");
        assert!(find("nonexistent").is_none());
    }

    #[test]
    fn instantiate_gives_independent_rules_each_time() {
        let a = DEFAULT_NETWORK.instantiate();
        let b = DEFAULT_NETWORK.instantiate();
        assert_eq!(a.len(), b.len());
        assert_ne!(a[0].id, b[0].id);
    }
}
