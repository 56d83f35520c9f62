//! Named advisory locks (spec §4.1/§5): a process-wide serialization
//! primitive for operations that must not interleave even across logical
//! "replicas" of a single control-plane process - e.g. the Reconciler's
//! config rollout for a network racing an admin's concurrent jump-peer
//! deletion targeting the same network (spec §5, "(network_id, "topology")
//! key"). Unlike a real distributed advisory lock (e.g. Postgres
//! `pg_advisory_lock`), there's one sqlite connection guarded by one
//! process here, so an in-process named mutex gives the same guarantee:
//! released on call (the guard's `Drop`), and released "on connection
//! loss" trivially, since there's no separate connection to lose - a
//! panicking holder still unwinds and drops the guard.

use std::{collections::HashMap, sync::Arc};

use parking_lot::{lock_api::ArcMutexGuard, Mutex, RawMutex};

#[derive(Clone, Default)]
pub struct AdvisoryLocks {
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

pub struct AdvisoryGuard {
    _guard: ArcMutexGuard<RawMutex, ()>,
}

impl AdvisoryLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until the named lock is acquired. The returned guard
    /// releases the lock when dropped.
    pub fn acquire(&self, key: &str) -> AdvisoryGuard {
        let mutex = {
            let mut locks = self.locks.lock();
            locks.entry(key.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        let guard = Mutex::lock_arc(mutex);
        AdvisoryGuard { _guard: guard }
    }

    pub fn topology_key(network_id: &wgmesh_types::NetworkId) -> String {
        format!("{network_id}:topology")
    }
}
