//! Dial/handshake loop with capped backoff and automatic reconnection.
//!
//! Grounded on `client.go`'s `Client`: a `Connection` wrapped with a
//! dial loop that retries forever (backoff between attempts), performs the
//! client-side handshake, and on disconnect fires the caller's
//! `OnDisconnect` before redialing. The caller's `Operator` is wrapped so
//! the reconnect trigger can run `on_disconnect` internally without the
//! caller having to know about the dial loop at all — same trick as
//! `client.go`'s `cl.onDisconnect` being installed as the inner `conn`'s
//! `OnDisconnect` instead of the caller's own.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tokio::net::TcpStream;

use mq_conn::{Connection, ErrChan, Operator, Receiver};
use mq_core::dialback::Dialback;
use mq_core::message::Status;
use mq_core::wire::{self, HANDSHAKE_LEN};
use mq_core::{Chunk, CoreError};

/// Wraps the caller's `Operator` so a disconnect can trigger a redial
/// internally. Holds only a `Weak` reference back to the `Connection` it's
/// installed on — the `Connection` owns this operator via a strong `Arc`,
/// so a strong back-reference here would leak both forever.
struct ReconnectOperator {
    inner: Arc<dyn Operator>,
    closed: Arc<AtomicBool>,
    location: String,
    key: Chunk,
    token: Chunk,
    dialback: Arc<Dialback>,
    conn: std::sync::OnceLock<Weak<Connection>>,
}

impl Operator for ReconnectOperator {
    fn on_connect(&self, id: Chunk) {
        self.inner.on_connect(id);
    }

    fn on_disconnect(&self, id: Chunk) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.on_disconnect(id) });

        let closed = Arc::clone(&self.closed);
        let location = self.location.clone();
        let key = self.key;
        let token = self.token;
        let dialback = Arc::clone(&self.dialback);
        let conn = self.conn.get().and_then(Weak::upgrade);
        tokio::spawn(async move {
            if let Some(conn) = conn {
                dial_loop(conn, &location, key, token, &dialback, &closed).await;
            }
        });
    }
}

/// A persistent, auto-reconnecting connection to a `Server`.
pub struct Client {
    conn: Arc<Connection>,
    closed: Arc<AtomicBool>,
}

impl Client {
    /// Spawns the initial dial loop in the background; construction itself
    /// never blocks on network I/O, matching `NewClient`'s `go func`.
    pub fn connect(location: String, name: &str, token: &str, op: Arc<dyn Operator>) -> Arc<Self> {
        let (key, _) = Chunk::from_str(name);
        let (token, _) = Chunk::from_str(token);
        let closed = Arc::new(AtomicBool::new(false));
        let dialback = Arc::new(Dialback::client_default());

        let reconnect_op = Arc::new(ReconnectOperator {
            inner: op,
            closed: Arc::clone(&closed),
            location: location.clone(),
            key,
            token,
            dialback: Arc::clone(&dialback),
            conn: std::sync::OnceLock::new(),
        });

        let conn = Connection::new(reconnect_op.clone() as Arc<dyn Operator>, mq_conn::DEFAULT_QUEUE_CAP);
        let _ = reconnect_op.conn.set(Arc::downgrade(&conn));

        let dial_conn = Arc::clone(&conn);
        let dial_closed = Arc::clone(&closed);
        tokio::spawn(async move {
            dial_loop(dial_conn, &location, key, token, &dialback, &dial_closed).await;
        });

        Arc::new(Self { conn, closed })
    }

    pub fn id(&self) -> Chunk {
        self.conn.id()
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    pub fn err_chan(&self) -> Arc<ErrChan> {
        self.conn.err_chan()
    }

    pub async fn statement(&self, body: Vec<u8>) -> Result<(), CoreError> {
        self.conn.statement(body).await
    }

    pub async fn request(&self, body: Vec<u8>, cb: mq_conn::ReqFunc) -> Result<(), CoreError> {
        self.conn.request(body, cb).await
    }

    pub async fn receive(&self, receiver: &dyn Receiver) -> Result<(), CoreError> {
        self.conn.receive(receiver).await
    }

    /// Idempotent: a second call reports `ClientClosed`.
    pub async fn close(&self) -> Result<(), CoreError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(CoreError::ClientClosed);
        }
        self.conn.close().await;
        Ok(())
    }
}

/// Dial forever (backoff between attempts) until a handshake succeeds or
/// the client has been closed.
async fn dial_loop(
    conn: Arc<Connection>,
    location: &str,
    key: Chunk,
    token: Chunk,
    dialback: &Dialback,
    closed: &AtomicBool,
) {
    loop {
        if closed.load(Ordering::SeqCst) {
            return;
        }

        let stream = match TcpStream::connect(location).await {
            Ok(s) => s,
            Err(e) => {
                tracing::debug!(error = %e, location, "dial failed, backing off");
                dialback.wait().await;
                continue;
            }
        };

        match client_handshake(stream, key, token).await {
            Ok((id, stream)) => {
                if conn.refresh(id, stream).await.is_ok() {
                    dialback.reset();
                    return;
                }
                // Connection already closed out from under us; nothing more
                // to do.
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, location, "handshake failed, backing off");
                dialback.wait().await;
            }
        }
    }
}

/// Write the 32-byte `key || token` handshake, then read the server's
/// framed response: `Ok` (body is the server's id), `Forbidden`, or
/// anything else is an error.
async fn client_handshake(
    mut stream: TcpStream,
    key: Chunk,
    token: Chunk,
) -> Result<(Chunk, TcpStream), CoreError> {
    use tokio::io::AsyncWriteExt;

    let mut hs = [0u8; HANDSHAKE_LEN];
    hs[0..16].copy_from_slice(key.as_bytes());
    hs[16..32].copy_from_slice(token.as_bytes());
    stream
        .write_all(&hs)
        .await
        .map_err(|e| CoreError::Io(e.to_string()))?;

    let msg = wire::read_message_plain(&mut stream)
        .await
        .map_err(CoreError::from)?;

    match msg.s {
        Status::Ok => {
            let (id, err) = Chunk::from_bytes(&msg.body);
            if let Some(e) = err {
                return Err(e);
            }
            Ok((id, stream))
        }
        Status::Forbidden => Err(CoreError::Forbidden),
        Status::Invalid => Err(CoreError::InvalidHeader),
        _ => Err(CoreError::InvalidStatus),
    }
}
