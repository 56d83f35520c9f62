//! The Store (spec §4.1): transactional sqlite persistence over the mesh
//! entity graph, plus the advisory locking and Change Bus publication that
//! make multi-row mutations safe to interleave with concurrent admin
//! requests and the Reconciler. Analogous to innernet's `server/src/db`
//! module plus the `Arc<Mutex<Connection>>` the rest of `server` shares as
//! its `Db` type alias.

pub mod advisory;
pub mod db;
pub mod schema;
#[cfg(test)]
mod test_support;

use std::{path::Path, sync::Arc};

use parking_lot::Mutex;
use rusqlite::Connection;
use wgmesh_bus::{ChangeBus, ChangeEvent};
use wgmesh_types::Result;

pub use advisory::{AdvisoryGuard, AdvisoryLocks};

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    advisory: AdvisoryLocks,
    bus: ChangeBus,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        schema::auto_migrate(&conn)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)), advisory: AdvisoryLocks::new(), bus: ChangeBus::new() })
    }

    pub fn advisory(&self) -> &AdvisoryLocks {
        &self.advisory
    }

    pub fn change_bus(&self) -> &ChangeBus {
        &self.bus
    }

    /// Runs `f` against a transactional connection handle (spec §4.1
    /// `Within(tx, fn)`): commits on `Ok`, rolls back on `Err` (sqlite's
    /// default behavior for a `Transaction` dropped without `commit()`).
    /// `f` returns the events the mutation touched; they're published to
    /// the Change Bus only after the commit succeeds, so subscribers never
    /// observe a change that a later error in the same transaction undid.
    pub fn within<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<(T, Vec<ChangeEvent>)>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let (value, events) = f(&tx)?;
        tx.commit()?;
        drop(conn);

        for event in events {
            self.bus.publish(event);
        }
        Ok(value)
    }

    /// Read-only helper for projection queries that don't need a
    /// transaction or Change Bus publication.
    pub fn read<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wgmesh_types::NetworkContents;

    #[test]
    fn within_commits_on_ok_and_publishes_events() {
        let store = Store::open_in_memory().unwrap();
        let sub = store.change_bus().subscribe();

        let network = store
            .within(|conn| {
                let network = db::network::create(
                    conn,
                    NetworkContents {
                        name: "prod".into(),
                        cidr: "10.0.0.0/16".parse().unwrap(),
                        domain_suffix: "internal".into(),
                        dns: vec![],
                        default_group_ids: vec![],
                    },
                )?;
                let event = ChangeEvent::NetworkChanged { network_id: network.id };
                Ok((network, vec![event]))
            })
            .unwrap();

        assert_eq!(sub.recv(), ChangeEvent::NetworkChanged { network_id: network.id });
        assert_eq!(store.read(|conn| db::network::get(conn, network.id)).unwrap().name, "prod");
    }

    #[test]
    fn within_rolls_back_on_err_and_publishes_nothing() {
        let store = Store::open_in_memory().unwrap();
        let sub = store.change_bus().subscribe();

        let network_id = store
            .within(|conn| {
                let network = db::network::create(
                    conn,
                    NetworkContents {
                        name: "prod".into(),
                        cidr: "10.0.0.0/16".parse().unwrap(),
                        domain_suffix: "internal".into(),
                        dns: vec![],
                        default_group_ids: vec![],
                    },
                )?;
                Ok((network.id, vec![]))
            })
            .unwrap();

        let result: Result<((), Vec<ChangeEvent>)> = store.within(|conn| {
            db::network::delete(conn, network_id)?;
            Err(wgmesh_types::Error::internal("simulated failure after delete"))
        });
        assert!(result.is_err());
        assert!(sub.try_recv().is_none());

        // The delete inside the failed transaction must have rolled back.
        assert!(store.read(|conn| db::network::get(conn, network_id)).is_ok());
    }
}
