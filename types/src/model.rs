//! The entity graph (spec §3). Each entity is an arena member: a small
//! `...Contents` struct (the mutable fields) paired with its stable id, the
//! same split innernet uses for `Peer { id, contents: PeerContents }` and
//! `Cidr { id, contents: CidrContents }`. Relations between entities are
//! always id-sets, never direct references - per spec §9's design note,
//! nothing threads a reference to another entity across a component
//! boundary, so every compiler re-queries the Store inside its transaction.

use std::net::IpAddr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::{
    endpoint::Endpoint,
    ids::{DnsMappingId, GroupId, NetworkId, PeerConnectionId, PeerId, PolicyId, RouteId, RuleId},
};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkContents {
    pub name: String,
    pub cidr: IpNet,
    #[serde(default = "default_domain_suffix")]
    pub domain_suffix: String,
    #[serde(default)]
    pub dns: Vec<IpAddr>,
    #[serde(default)]
    pub default_group_ids: Vec<GroupId>,
}

fn default_domain_suffix() -> String {
    "internal".to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Network {
    pub id: NetworkId,
    #[serde(flatten)]
    pub contents: NetworkContents,
}

impl std::ops::Deref for Network {
    type Target = NetworkContents;
    fn deref(&self) -> &Self::Target {
        &self.contents
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeerContents {
    pub network_id: NetworkId,
    pub name: String,
    pub public_key: String,
    /// Never serialized outside of WG Compiler's own artifact construction;
    /// the Store strips it from any external projection.
    #[serde(skip_serializing)]
    pub private_key: String,
    pub address: IpAddr,
    pub endpoint: Option<Endpoint>,
    pub listen_port: Option<u16>,
    pub is_jump: bool,
    #[serde(default = "default_true")]
    pub use_agent: bool,
    pub owner_id: Option<String>,
    #[serde(default)]
    pub group_ids: Vec<GroupId>,
    #[serde(default)]
    pub additional_allowed_ips: Vec<IpNet>,
    #[serde(skip_serializing)]
    pub token: String,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Peer {
    pub id: PeerId,
    #[serde(flatten)]
    pub contents: PeerContents,
}

impl std::ops::Deref for Peer {
    type Target = PeerContents;
    fn deref(&self) -> &Self::Target {
        &self.contents
    }
}

impl Peer {
    /// Required for jump peers per spec §3 invariant that `listen_port` is
    /// mandatory for them; callers validate this before persisting.
    pub fn is_valid_jump_peer(&self) -> bool {
        !self.is_jump || self.listen_port.is_some()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GroupContents {
    pub network_id: NetworkId,
    pub name: String,
    #[serde(default)]
    pub peer_ids: Vec<PeerId>,
    /// Ordered - attachment order is precedence order (spec §3 invariant 4).
    #[serde(default)]
    pub policy_ids: Vec<PolicyId>,
    #[serde(default)]
    pub route_ids: Vec<RouteId>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    #[serde(flatten)]
    pub contents: GroupContents,
    /// Creation order is a documented tiebreaker for policy precedence
    /// (spec §4.2/§4.4): peers in several groups apply their earliest-
    /// created group's policies first.
    pub created_at_seq: u64,
}

impl std::ops::Deref for Group {
    type Target = GroupContents;
    fn deref(&self) -> &Self::Target {
        &self.contents
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleDirection {
    Input,
    Output,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    Allow,
    Deny,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Cidr,
    Peer,
    Group,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    pub direction: RuleDirection,
    pub action: RuleAction,
    /// A CIDR string, peer id, or group id, depending on `target_type`.
    pub target: String,
    pub target_type: TargetType,
    pub description: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyContents {
    pub network_id: NetworkId,
    pub name: String,
    /// Ordered - rule order is iptables match order (spec §4.4).
    pub rules: Vec<Rule>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Policy {
    pub id: PolicyId,
    #[serde(flatten)]
    pub contents: PolicyContents,
}

impl std::ops::Deref for Policy {
    type Target = PolicyContents;
    fn deref(&self) -> &Self::Target {
        &self.contents
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RouteContents {
    pub network_id: NetworkId,
    pub name: String,
    pub destination_cidr: IpNet,
    pub jump_peer_id: PeerId,
    pub domain_suffix: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Route {
    pub id: RouteId,
    #[serde(flatten)]
    pub contents: RouteContents,
}

impl std::ops::Deref for Route {
    type Target = RouteContents;
    fn deref(&self) -> &Self::Target {
        &self.contents
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DnsMappingContents {
    pub route_id: RouteId,
    pub name: String,
    pub ip_address: IpAddr,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DnsMapping {
    pub id: DnsMappingId,
    #[serde(flatten)]
    pub contents: DnsMappingContents,
}

impl std::ops::Deref for DnsMapping {
    type Target = DnsMappingContents;
    fn deref(&self) -> &Self::Target {
        &self.contents
    }
}

/// FQDN is `name.route_name.domain_suffix` (GLOSSARY). An empty/absent
/// route `domain_suffix` falls back to the network's, per scenario S4.
pub fn fqdn(mapping_name: &str, route_name: &str, route_domain_suffix: Option<&str>, network_domain_suffix: &str) -> String {
    let suffix = match route_domain_suffix {
        Some(s) if !s.is_empty() => s,
        _ => network_domain_suffix,
    };
    format!("{mapping_name}.{route_name}.{suffix}")
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeerConnection {
    pub id: PeerConnectionId,
    pub peer1_id: PeerId,
    pub peer2_id: PeerId,
    pub preshared_key: String,
}

impl PeerConnection {
    /// Constructs a connection with peers canonically ordered (smaller id
    /// first, per spec §6's `peer_connections` table contract), so the same
    /// unordered pair always maps to one row regardless of lookup order.
    pub fn new(id: PeerConnectionId, a: PeerId, b: PeerId, preshared_key: String) -> Self {
        let (peer1_id, peer2_id) = if a <= b { (a, b) } else { (b, a) };
        Self { id, peer1_id, peer2_id, preshared_key }
    }

    pub fn canonical_pair(a: PeerId, b: PeerId) -> (PeerId, PeerId) {
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }
}
