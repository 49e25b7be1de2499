//! Server-side key → `Connection` registry with duplicate-key replacement.
//!
//! Grounded on `conns.go`'s `conns` type, with "replace-wins" duplicate-key
//! handling: a second successful handshake for a key that already has a
//! *live* entry reuses the existing `Connection` object
//! and calls `refresh` on it rather than erroring or creating a second
//! object for the same key. `conns.go`'s `Put` only takes this reuse path
//! when the existing entry `isConnected()`; an entry that exists but isn't
//! (it auto-closed after a fatal pump error, per `fail()` in
//! `mq-conn::connection`) gets a brand new `Connection` instead, since
//! `refresh` permanently refuses a `Closed` connection. The map mutation
//! and the `refresh` call happen under the same registry entry, so two
//! concurrent admissions for one key can never race to create two
//! `Connection`s.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::net::TcpStream;

use mq_conn::{Connection, Operator};
use mq_core::{Chunk, CoreError};

#[derive(Default)]
pub struct ConnRegistry {
    conns: DashMap<Chunk, Arc<Connection>>,
}

impl ConnRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &Chunk) -> Option<Arc<Connection>> {
        self.conns.get(key).map(|c| Arc::clone(&c))
    }

    /// Admit `stream` under `key`: reuse and `refresh` the existing
    /// `Connection` if one is already registered and still connected,
    /// otherwise install a fresh `Connection` (overwriting a stale/closed
    /// entry if one exists). Never creates two `Connection`s for the same
    /// key concurrently.
    pub async fn put(
        &self,
        key: Chunk,
        stream: TcpStream,
        op: Arc<dyn Operator>,
        queue_cap: usize,
    ) -> Result<(), CoreError> {
        // Held across the reuse-or-replace decision and the map write so
        // two concurrent admissions for the same key can't both decide
        // "not connected, make a new one" and race to insert.
        let conn = match self.conns.entry(key) {
            Entry::Occupied(e) if e.get().is_connected() => Arc::clone(e.get()),
            Entry::Occupied(mut e) => {
                let c = Connection::new(op, queue_cap);
                e.insert(Arc::clone(&c));
                c
            }
            Entry::Vacant(e) => {
                let c = Connection::new(op, queue_cap);
                e.insert(Arc::clone(&c));
                c
            }
        };
        conn.refresh(key, stream).await
    }

    pub fn delete(&self, key: &Chunk) {
        self.conns.remove(key);
    }

    /// Snapshot of every registered key.
    pub fn list(&self) -> Vec<Chunk> {
        self.conns.iter().map(|e| *e.key()).collect()
    }

    /// Invoke `f` for every registered connection, collecting the errors
    /// it returns. Used to build `statement_all`/`request_all`.
    pub fn for_each<F>(&self, mut f: F) -> Vec<CoreError>
    where
        F: FnMut(Chunk, &Arc<Connection>) -> Option<CoreError>,
    {
        self.conns
            .iter()
            .filter_map(|e| f(*e.key(), e.value()))
            .collect()
    }
}
