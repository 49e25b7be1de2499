//! Pending-request correlation table.
//!
//! Mirrors `reqWait.go`: a `Request` registers a callback keyed by the
//! message id it sent; the matching `Response`'s arrival looks the callback
//! up and invokes it exactly once (`get` removes the entry). `dump` is used
//! by `Connection::close` to release every still-pending caller with an
//! empty body rather than leaving them blocked forever.

use std::collections::HashMap;

use tokio::sync::Mutex;
use uuid::Uuid;

pub type ReqFunc = Box<dyn FnOnce(Vec<u8>) + Send>;

pub struct ReqWait {
    inner: Mutex<HashMap<Uuid, ReqFunc>>,
}

impl Default for ReqWait {
    fn default() -> Self {
        Self::new()
    }
}

impl ReqWait {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub async fn put(&self, id: Uuid, f: ReqFunc) {
        self.inner.lock().await.insert(id, f);
    }

    /// Remove and return the callback for `id`, if one is still pending.
    pub async fn get(&self, id: Uuid) -> Option<ReqFunc> {
        self.inner.lock().await.remove(&id)
    }

    /// Release every pending callback with an empty body and clear the
    /// table. Called once, from `Connection::close`.
    pub async fn dump(&self) {
        let mut table = self.inner.lock().await;
        for (_, f) in table.drain() {
            f(Vec::new());
        }
    }
}
