//! Accept loop, handshake/admission, and the per-key dispatch API.
//!
//! Grounded on `server.go`'s `Server`. The accept loop there reuses a single
//! `[32]byte` handshake buffer across connections, a data race under
//! concurrent accepts; this implementation reads the handshake into a
//! stack-local buffer per connection instead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};

use mq_conn::{Connection, ErrChan, Operator, Receiver};
use mq_core::message::{MsgType, Status};
use mq_core::wire::{self, HANDSHAKE_LEN};
use mq_core::{Chunk, CoreError};

use crate::auth::{AuthStore, Handshake};
use crate::registry::ConnRegistry;

pub struct Server {
    listener: TcpListener,
    id: Chunk,
    auth: Arc<AuthStore>,
    conns: Arc<ConnRegistry>,
    op: Arc<dyn Operator>,
    err_chan: Arc<ErrChan>,
    queue_cap: usize,
    closed: AtomicBool,
}

impl Server {
    /// Bind `location` and start the server. The caller is responsible for
    /// spawning `serve`/`run` (kept separate from construction so tests can
    /// inspect the bound address before the accept loop starts).
    pub async fn bind(
        location: &str,
        id: Chunk,
        op: Arc<dyn Operator>,
        clients: &[(Chunk, Chunk)],
    ) -> std::io::Result<Arc<Self>> {
        let listener = TcpListener::bind(location).await?;
        let auth = Arc::new(AuthStore::new());
        for (key, token) in clients {
            auth.put(*key, *token);
        }

        Ok(Arc::new(Self {
            listener,
            id,
            auth,
            conns: Arc::new(ConnRegistry::new()),
            op,
            err_chan: Arc::new(ErrChan::default()),
            queue_cap: mq_conn::DEFAULT_QUEUE_CAP,
            closed: AtomicBool::new(false),
        }))
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    pub fn err_chan(&self) -> Arc<ErrChan> {
        Arc::clone(&self.err_chan)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Accept loop. Runs until `close()` is called or the listener errors;
    /// intended to be driven from a spawned task.
    pub async fn run(self: &Arc<Self>) {
        while !self.is_closed() {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    continue;
                }
            };
            tracing::debug!(%peer_addr, "accepted connection");
            let this = Arc::clone(self);
            tokio::spawn(async move { this.admit(stream).await });
        }
    }

    async fn admit(self: &Arc<Self>, mut stream: TcpStream) {
        let hs = match read_handshake(&mut stream).await {
            Some(hs) => hs,
            None => {
                let _ = wire::send_message_plain(
                    &mut stream,
                    MsgType::Statement,
                    Status::Invalid,
                    Vec::new(),
                )
                .await;
                return;
            }
        };

        if !self.auth.is_valid(&hs) {
            tracing::info!(key = %hs.key, "handshake rejected: forbidden");
            let _ = wire::send_message_plain(
                &mut stream,
                MsgType::Statement,
                Status::Forbidden,
                Vec::new(),
            )
            .await;
            return;
        }

        if let Err(e) = self
            .conns
            .put(hs.key, stream, Arc::clone(&self.op) as Arc<dyn Operator>, self.queue_cap)
            .await
        {
            tracing::warn!(key = %hs.key, error = %e, "admission failed");
            return;
        }

        tracing::info!(key = %hs.key, "client admitted");
        if let Some(conn) = self.conns.get(&hs.key) {
            let _ = conn.statement(self.id.as_bytes().to_vec()).await;
        }
    }

    // -- Auth surface (supplemented from server.go's GetAuth/PutAuth/DeleteAuth) --

    pub fn get_auth(&self, key: &str) -> Option<Chunk> {
        let (key, _) = Chunk::from_str(key);
        self.auth.get(&key)
    }

    pub fn put_auth(&self, key: &str, token: &str) {
        let (key, _) = Chunk::from_str(key);
        let (token, _) = Chunk::from_str(token);
        self.auth.put(key, token);
    }

    pub fn delete_auth(&self, key: &str) {
        let (key, _) = Chunk::from_str(key);
        self.auth.delete(&key);
    }

    // -- Per-key dispatch --

    fn conn_for(&self, key: &str) -> Result<Arc<Connection>, CoreError> {
        let (key, _) = Chunk::from_str(key);
        self.conns.get(&key).ok_or(CoreError::ConnDoesNotExist)
    }

    pub async fn statement(&self, key: &str, body: Vec<u8>) -> Result<(), CoreError> {
        self.conn_for(key)?.statement(body).await
    }

    pub async fn request(
        &self,
        key: &str,
        body: Vec<u8>,
        cb: mq_conn::ReqFunc,
    ) -> Result<(), CoreError> {
        self.conn_for(key)?.request(body, cb).await
    }

    pub async fn receive(&self, key: &str, receiver: &dyn Receiver) -> Result<(), CoreError> {
        self.conn_for(key)?.receive(receiver).await
    }

    pub fn is_connected(&self, key: &str) -> bool {
        let (key, _) = Chunk::from_str(key);
        self.conns
            .get(&key)
            .map(|c| c.is_connected())
            .unwrap_or(false)
    }

    pub fn list_conns(&self) -> Vec<Chunk> {
        self.conns.list()
    }

    /// Fan a Statement out to every registered connection, collecting
    /// per-peer errors.
    pub async fn statement_all(&self, body: Vec<u8>) -> Vec<CoreError> {
        let keys = self.conns.list();
        let mut errors = Vec::new();
        for key in keys {
            if let Some(conn) = self.conns.get(&key) {
                if let Err(e) = conn.statement(body.clone()).await {
                    errors.push(e);
                }
            }
        }
        errors
    }

    /// Fan a Request out to every registered connection. `make_cb` builds a
    /// fresh callback per peer since each Request needs its own.
    pub async fn request_all<F>(&self, body: Vec<u8>, mut make_cb: F) -> Vec<CoreError>
    where
        F: FnMut(Chunk) -> mq_conn::ReqFunc,
    {
        let keys = self.conns.list();
        let mut errors = Vec::new();
        for key in keys {
            if let Some(conn) = self.conns.get(&key) {
                if let Err(e) = conn.request(body.clone(), make_cb(key)).await {
                    errors.push(e);
                }
            }
        }
        errors
    }

    /// Shut the listener down and close every registered connection.
    /// Idempotent: a second call reports `ServerClosed`.
    pub async fn close(self: &Arc<Self>) -> Result<(), CoreError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(CoreError::ServerClosed);
        }
        for key in self.conns.list() {
            if let Some(conn) = self.conns.get(&key) {
                conn.close().await;
            }
        }
        Ok(())
    }
}

/// Read the 32-byte `key || token` handshake into a stack-local buffer.
/// Returns `None` on a short read or I/O error, matching `Server.handshake`'s
/// `ok` return in the original.
async fn read_handshake(stream: &mut TcpStream) -> Option<Handshake> {
    use tokio::io::AsyncReadExt;
    let mut buf = [0u8; HANDSHAKE_LEN];
    stream.read_exact(&mut buf).await.ok()?;
    Some(Handshake {
        key: Chunk::from(<[u8; 16]>::try_from(&buf[0..16]).unwrap()),
        token: Chunk::from(<[u8; 16]>::try_from(&buf[16..32]).unwrap()),
    })
}
