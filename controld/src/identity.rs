//! Stand-ins for the identity/IPAM collaborators spec §1 names as out of
//! scope ("Identity of peers (keypairs) and IP allocation are assumed to
//! be provided by collaborators when the core asks for a new peer"). These
//! traits are the seam a real auth/IPAM system would implement;
//! `StaticIdentityProvider`/`SequentialAllocator` exist only so this
//! binary can provision a peer end-to-end without one, exactly as
//! `SPEC_FULL.md` §0 describes. Not a production identity or IPAM system.

use std::net::IpAddr;

use ipnet::IpNet;
use wgmesh_types::{Error, KeyPair, Result};

/// Supplies a freshly generated WireGuard keypair and session token for a
/// newly provisioned peer.
pub trait PeerIdentityProvider: Send + Sync {
    fn issue_keypair(&self) -> KeyPair;
    fn issue_token(&self) -> String;
}

/// Chooses the next address to assign a new peer within a network's CIDR.
pub trait AddressAllocator: Send + Sync {
    /// `taken` is every address already assigned in the network, as read
    /// from the Store at call time - the allocator is given no memory of
    /// its own so there's exactly one source of truth for "what's free".
    fn allocate(&self, cidr: IpNet, taken: &[IpAddr]) -> Result<IpAddr>;
}

/// Generates real WireGuard keys and random tokens via the same RNG path
/// the compiler crates already trust (`wgmesh_types::KeyPair::generate`).
/// "Static" refers to there being one fixed strategy, not to the key
/// material itself.
#[derive(Default)]
pub struct StaticIdentityProvider;

impl PeerIdentityProvider for StaticIdentityProvider {
    fn issue_keypair(&self) -> KeyPair {
        KeyPair::generate()
    }

    fn issue_token(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Walks a network's CIDR host by host, skipping the network/broadcast
/// addresses and anything already taken, and returns the first free one.
#[derive(Default)]
pub struct SequentialAllocator;

impl AddressAllocator for SequentialAllocator {
    fn allocate(&self, cidr: IpNet, taken: &[IpAddr]) -> Result<IpAddr> {
        for addr in cidr.hosts() {
            if !taken.contains(&addr) {
                return Ok(addr);
            }
        }
        Err(Error::ref_conflict(format!("no free address remaining in {cidr}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_identity_provider_issues_distinct_keypairs() {
        let provider = StaticIdentityProvider;
        let a = provider.issue_keypair();
        let b = provider.issue_keypair();
        assert_ne!(a.private, b.private);
    }

    #[test]
    fn sequential_allocator_skips_taken_addresses() {
        let allocator = SequentialAllocator;
        let cidr: IpNet = "10.0.0.0/30".parse().unwrap();
        let taken = vec!["10.0.0.1".parse().unwrap()];
        let allocated = allocator.allocate(cidr, &taken).unwrap();
        assert_eq!(allocated, "10.0.0.2".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn sequential_allocator_errors_when_exhausted() {
        let allocator = SequentialAllocator;
        let cidr: IpNet = "10.0.0.0/30".parse().unwrap();
        let taken = vec!["10.0.0.1".parse().unwrap(), "10.0.0.2".parse().unwrap()];
        let err = allocator.allocate(cidr, &taken).unwrap_err();
        assert_eq!(err.kind(), wgmesh_types::ErrorKind::RefConflict);
    }
}
