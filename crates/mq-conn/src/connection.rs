//! The per-peer connection state machine: socket ownership, reader/writer
//! pumps, and the public statement/request/receive/close/refresh contract.
//!
//! Grounded on `conn.go`'s `Conn` type. The biggest departure from the
//! original is cancellation: Go relies on closing a `net.Conn` to unblock a
//! concurrently-blocking `Read` on the same fd. Tokio's split halves don't
//! give us that for free, so each generation of the reader pump races its
//! `read_message` call against a dedicated `Notify` that `refresh`/`close`
//! fire to force it to give up the fd promptly.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex as TokioMutex, Notify};

use mq_core::message::{Message, MsgType};
use mq_core::queue::BoundedQueue;
use mq_core::wire;
use mq_core::{Chunk, CoreError};

use crate::errchan::ErrChan;
use crate::operator::{Operator, Receiver};
use crate::reqwait::{ReqFunc, ReqWait};

const STATE_READY: u8 = 0;
const STATE_CONNECTED: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// Default queue depth for both in- and out-queues when a caller doesn't
/// override it.
pub const DEFAULT_QUEUE_CAP: usize = 64;

type SharedWriteHalf = Arc<TokioMutex<OwnedWriteHalf>>;

pub struct Connection {
    id: StdMutex<Chunk>,
    state: AtomicU8,

    read_half: TokioMutex<Option<OwnedReadHalf>>,
    write_half: TokioMutex<Option<SharedWriteHalf>>,

    /// Guards the installed socket halves and, more importantly, serializes
    /// `refresh` and `close` against each other: both take this for their
    /// entire body (not just the socket-swap step), so one always runs to
    /// completion — including `refresh`'s transition to `Connected` — before
    /// the other is let past its own state check. Acquisition order is
    /// always socket → sender → listener.
    socket_mutex: TokioMutex<()>,
    /// Held for the writer pump's whole lifetime.
    sender_mutex: Arc<TokioMutex<()>>,
    /// Held for the reader pump's whole lifetime.
    listener_mutex: Arc<TokioMutex<()>>,

    in_q: Arc<BoundedQueue<Message>>,
    out_q: TokioMutex<Arc<BoundedQueue<Message>>>,
    queue_cap: usize,

    rw: Arc<ReqWait>,
    pool: Arc<mq_core::pool::Pool>,
    err_chan: Arc<ErrChan>,
    op: Arc<dyn Operator>,

    /// Per-generation cancellation signal for the reader pump, swapped out
    /// on every `refresh`.
    cancel: TokioMutex<Arc<Notify>>,
}

impl Connection {
    /// A dormant connection: `Ready`, no socket attached, no pumps running.
    pub fn new(op: Arc<dyn Operator>, queue_cap: usize) -> Arc<Self> {
        Arc::new(Self {
            id: StdMutex::new(Chunk::default()),
            state: AtomicU8::new(STATE_READY),
            read_half: TokioMutex::new(None),
            write_half: TokioMutex::new(None),
            socket_mutex: TokioMutex::new(()),
            sender_mutex: Arc::new(TokioMutex::new(())),
            listener_mutex: Arc::new(TokioMutex::new(())),
            in_q: Arc::new(BoundedQueue::new(queue_cap)),
            out_q: TokioMutex::new(Arc::new(BoundedQueue::new(queue_cap))),
            queue_cap,
            rw: Arc::new(ReqWait::new()),
            pool: Arc::new(mq_core::pool::Pool::new()),
            err_chan: Arc::new(ErrChan::default()),
            op,
            cancel: TokioMutex::new(Arc::new(Notify::new())),
        })
    }

    pub fn id(&self) -> Chunk {
        *self.id.lock().unwrap()
    }

    pub fn is_connected(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STATE_CONNECTED
    }

    pub fn is_closed(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STATE_CLOSED
    }

    pub fn err_chan(&self) -> Arc<ErrChan> {
        Arc::clone(&self.err_chan)
    }

    /// Enqueue a fire-and-forget Statement.
    pub async fn statement(&self, body: Vec<u8>) -> Result<(), CoreError> {
        if self.is_closed() {
            return Err(CoreError::ConnClosed);
        }
        let out_q = self.out_q.lock().await.clone();
        out_q.put(Message::statement(body)).await
    }

    /// Enqueue a Request, registering `cb` to be invoked exactly once: with
    /// the correlated Response body, or with an empty body if the
    /// connection closes first.
    ///
    /// Diverges from the original, which silently discards the out-queue's
    /// `put` error here: once `cb` is registered it will always fire via
    /// `close`'s `ReqWait::dump`, but a closed out-queue still means the
    /// request itself never reached the wire, which is worth surfacing to
    /// the caller.
    pub async fn request(&self, body: Vec<u8>, cb: ReqFunc) -> Result<(), CoreError> {
        if self.is_closed() {
            return Err(CoreError::ConnClosed);
        }
        let msg = Message::request(body);
        self.rw.put(msg.id, cb).await;
        let out_q = self.out_q.lock().await.clone();
        out_q.put(msg).await
    }

    /// Block until one inbound Request/Statement arrives and dispatch it to
    /// `receiver`. Body ownership transfers to the receiver; it is never
    /// returned to the pool by this call.
    pub async fn receive(&self, receiver: &dyn Receiver) -> Result<(), CoreError> {
        let msg = self.in_q.get().await?;
        match msg.t {
            MsgType::Statement => receiver.statement(msg.body),
            MsgType::Request => {
                let resp_body = receiver.response(msg.body);
                let resp = Message::response_to(msg.id, resp_body);
                let out_q = self.out_q.lock().await.clone();
                let _ = out_q.put(resp).await;
            }
            MsgType::Response => {
                unreachable!("responses are routed through ReqWait, never the in-queue")
            }
        }
        Ok(())
    }

    /// Dispatch a just-decoded message from the reader pump.
    async fn process(&self, msg: Message) {
        match msg.t {
            MsgType::Request | MsgType::Statement => {
                let _ = self.in_q.put(msg).await;
            }
            MsgType::Response => match self.rw.get(msg.id).await {
                Some(f) => f(msg.body),
                None => {
                    self.err_chan.push(CoreError::ReqFuncMissing).await;
                    self.pool.put(msg.body);
                }
            },
        }
    }

    /// Install a new socket, tearing down any previous one, and start fresh
    /// reader/writer pumps. Used by the server on (re)admission and by the
    /// client on every successful dial.
    ///
    /// `socket_mutex` is held for this entire call, including the transition
    /// to `Connected` at the end — not just the socket-swap in the middle —
    /// so that `refresh` and `close` form one logical critical section
    /// against each other, per spec §4.H/§5. Without that, a `close()` on
    /// another task could interleave between this function's `Ready` store
    /// and its `set_connected()` call, flip the state to `Closed`, tear down
    /// `in_q` (never recreated by `refresh`), and then watch this call
    /// clobber `Closed` back to `Connected` with fresh pumps — a connection
    /// that reports connected forever while `receive()` can never succeed
    /// again.
    pub async fn refresh(self: &Arc<Self>, id: Chunk, stream: TcpStream) -> Result<(), CoreError> {
        let _socket_guard = self.socket_mutex.lock().await;
        if self.is_closed() {
            return Err(CoreError::ConnClosed);
        }

        // Force the current writer to exit (no-op, and ignorable, on the
        // very first refresh since the out-queue hasn't been closed yet).
        let _ = self.out_q.lock().await.close(false).await;

        let _sender_guard = self.sender_mutex.lock().await;

        // Force the current reader to give up its blocking read. notify_one
        // (not notify_waiters) so that a cancellation fired before the
        // reader re-enters its select! still leaves a permit behind for it
        // to consume immediately, rather than being lost.
        self.cancel.lock().await.notify_one();
        let _listener_guard = self.listener_mutex.lock().await;

        // Both pumps have now provably exited. Tear down the old socket.
        if let Some(old) = self.write_half.lock().await.take() {
            let _ = old.lock().await.shutdown().await;
        }
        self.read_half.lock().await.take();

        let (read_half, write_half) = stream.into_split();
        *self.id.lock().unwrap() = id;
        *self.cancel.lock().await = Arc::new(Notify::new());
        *self.read_half.lock().await = Some(read_half);
        *self.write_half.lock().await = Some(Arc::new(TokioMutex::new(write_half)));
        *self.out_q.lock().await = Arc::new(BoundedQueue::new(self.queue_cap));

        drop(_listener_guard);
        drop(_sender_guard);

        // A CAS rather than a plain store: holding `socket_mutex` across
        // this whole call already rules out a concurrent `close()` flipping
        // the state out from under us, but this turns any future violation
        // of that invariant into a clean `ConnClosed` instead of silently
        // clobbering it.
        if self
            .state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |cur| {
                if cur == STATE_CLOSED {
                    None
                } else {
                    Some(STATE_READY)
                }
            })
            .is_err()
        {
            return Err(CoreError::ConnClosed);
        }

        self.set_connected().await
        // _socket_guard is still held here, released only once this
        // function returns — i.e. after set_connected() has transitioned
        // the state to Connected and spawned the new pumps.
    }

    /// Ready → Connected: fires `OnConnect` and spawns the reader and
    /// writer pumps, each of which takes its own pump mutex for its
    /// lifetime.
    async fn set_connected(self: &Arc<Self>) -> Result<(), CoreError> {
        self.state
            .compare_exchange(
                STATE_READY,
                STATE_CONNECTED,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .map_err(|_| CoreError::CannotSetConnected)?;

        let read_half = self
            .read_half
            .lock()
            .await
            .take()
            .ok_or(CoreError::NotInitialized)?;
        let write_half = self
            .write_half
            .lock()
            .await
            .clone()
            .ok_or(CoreError::NotInitialized)?;

        self.op.on_connect(self.id());

        let reader_self = Arc::clone(self);
        tokio::spawn(async move { reader_self.run_reader(read_half).await });

        let writer_self = Arc::clone(self);
        tokio::spawn(async move { writer_self.run_writer(write_half).await });

        Ok(())
    }

    async fn run_reader(self: Arc<Self>, mut read_half: OwnedReadHalf) {
        let _guard = Arc::clone(&self.listener_mutex).lock_owned().await;
        loop {
            let cancel = self.cancel.lock().await.clone();
            tokio::select! {
                _ = cancel.notified() => {
                    tracing::debug!("reader pump cancelled");
                    break;
                }
                res = wire::read_message(&mut read_half, &self.pool) => {
                    match res {
                        Ok(msg) => self.process(msg).await,
                        Err(e) => {
                            if self.is_connected() {
                                tracing::warn!(error = %e, "reader pump error");
                                self.err_chan.push(e.into()).await;
                                self.fail();
                            } else {
                                tracing::debug!("reader pump exiting: connection no longer live");
                            }
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn run_writer(self: Arc<Self>, write_half: SharedWriteHalf) {
        let _guard = Arc::clone(&self.sender_mutex).lock_owned().await;
        loop {
            let out_q = self.out_q.lock().await.clone();
            let msg = match out_q.get().await {
                Ok(msg) => msg,
                Err(_) => {
                    tracing::debug!("writer pump exiting: out-queue closed");
                    break;
                }
            };

            let scratch = self.pool.get(wire::HEADER_LEN + msg.body.len());
            let mut w = write_half.lock().await;
            match wire::write_message(&mut *w, &msg, scratch).await {
                Ok(buf) => {
                    drop(w);
                    self.pool.put(buf);
                }
                Err(e) => {
                    drop(w);
                    tracing::warn!(error = %e, "writer pump error");
                    self.err_chan.push(e.into()).await;
                    self.fail();
                    break;
                }
            }
        }
    }

    /// A fatal pump error terminates the connection, same as an explicit
    /// `close()`: the peer is unreachable over this socket and there is no
    /// way to recover it in place. This is what lets the client's dial loop
    /// (installed as its `OnDisconnect`) notice a dead socket and redial;
    /// without it, a fatal read/write error would otherwise strand the
    /// connection Connected forever with no pumps left running. `close()`
    /// itself is idempotent, so a reader and writer racing to report the
    /// same dead socket both calling this is harmless.
    fn fail(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.close().await;
        });
    }

    /// Terminal close. Idempotent: a second call returns `[ConnClosed]`.
    ///
    /// Takes `socket_mutex` first, same as `refresh`, so the two can never
    /// interleave: whichever of `close`/`refresh` arrives first runs to
    /// completion (including `refresh`'s `Ready`→`Connected` transition)
    /// before the other is even let past its state check.
    pub async fn close(self: &Arc<Self>) -> Vec<CoreError> {
        let mut errors = Vec::new();
        let _socket_guard = self.socket_mutex.lock().await;

        let prev = self.state.swap(STATE_CLOSED, Ordering::SeqCst);
        if prev == STATE_CLOSED {
            errors.push(CoreError::ConnClosed);
            return errors;
        }

        if let Err(e) = self.out_q.lock().await.close(false).await {
            errors.push(e);
        }
        let _sender_guard = self.sender_mutex.lock().await;

        if let Some(old) = self.write_half.lock().await.take() {
            let _ = old.lock().await.shutdown().await;
        }
        self.cancel.lock().await.notify_one();

        if let Err(e) = self.in_q.close(false).await {
            errors.push(e);
        }
        let _listener_guard = self.listener_mutex.lock().await;

        self.rw.dump().await;
        self.op.on_disconnect(self.id());

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::FnOperator;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;
    use tokio::net::TcpListener;

    async fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (server_side, _) = listener.accept().await.unwrap();
        let client_side = connect.await.unwrap();
        (server_side, client_side)
    }

    #[tokio::test]
    async fn statement_before_refresh_is_closed_error() {
        let conn = Connection::new(Arc::new(FnOperator::default()), DEFAULT_QUEUE_CAP);
        // A Ready-state connection isn't Closed, but its out-queue also
        // isn't attached to any writer yet; statement() should still
        // succeed at the queue level (it just buffers until a pump drains
        // it), so assert the more fundamental contract: after close, every
        // call surfaces ConnClosed.
        let errs = conn.close().await;
        assert!(errs.is_empty());
        assert!(matches!(
            conn.statement(b"hi".to_vec()).await,
            Err(CoreError::ConnClosed)
        ));
    }

    #[tokio::test]
    async fn double_close_reports_already_closed() {
        let conn = Connection::new(Arc::new(FnOperator::default()), DEFAULT_QUEUE_CAP);
        assert!(conn.close().await.is_empty());
        assert_eq!(conn.close().await, vec![CoreError::ConnClosed]);
    }

    #[tokio::test]
    async fn refresh_transitions_to_connected_and_fires_on_connect() {
        let connected = Arc::new(AtomicBool::new(false));
        let connected2 = Arc::clone(&connected);
        let op = FnOperator::new(
            Some(Box::new(move |_| connected2.store(true, Ordering::SeqCst))),
            None,
        );
        let conn = Connection::new(Arc::new(op), DEFAULT_QUEUE_CAP);
        let (server_side, _client_side) = loopback_pair().await;

        let (id, _) = Chunk::from_str("peer-a");
        conn.refresh(id, server_side).await.unwrap();

        assert!(conn.is_connected());
        assert!(connected.load(Ordering::SeqCst));
        assert_eq!(conn.id(), id);
    }

    #[tokio::test]
    async fn statement_is_written_to_the_peer_socket() {
        let conn = Connection::new(Arc::new(FnOperator::default()), DEFAULT_QUEUE_CAP);
        let (server_side, mut client_side) = loopback_pair().await;
        let (id, _) = Chunk::from_str("peer-b");
        conn.refresh(id, server_side).await.unwrap();

        conn.statement(b"hello".to_vec()).await.unwrap();

        let got = wire::read_message_plain(&mut client_side).await.unwrap();
        assert_eq!(got.body, b"hello");
        assert_eq!(got.t, MsgType::Statement);
    }

    #[tokio::test]
    async fn request_callback_fires_with_empty_body_on_close() {
        let conn = Connection::new(Arc::new(FnOperator::default()), DEFAULT_QUEUE_CAP);
        let (server_side, _client_side) = loopback_pair().await;
        let (id, _) = Chunk::from_str("peer-c");
        conn.refresh(id, server_side).await.unwrap();

        let got_body = Arc::new(StdMutex::new(None));
        let got_body2 = Arc::clone(&got_body);
        conn.request(
            b"ping".to_vec(),
            Box::new(move |body| {
                *got_body2.lock().unwrap() = Some(body);
            }),
        )
        .await
        .unwrap();

        conn.close().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*got_body.lock().unwrap(), Some(Vec::new()));
    }

    #[tokio::test]
    async fn receive_dispatches_inbound_statement_to_receiver() {
        use crate::operator::FnReceiver;

        let conn = Connection::new(Arc::new(FnOperator::default()), DEFAULT_QUEUE_CAP);
        let (server_side, mut client_side) = loopback_pair().await;
        let (id, _) = Chunk::from_str("peer-d");
        conn.refresh(id, server_side).await.unwrap();

        wire::send_message_plain(
            &mut client_side,
            MsgType::Statement,
            mq_core::message::Status::Ok,
            b"knock knock".to_vec(),
        )
        .await
        .unwrap();

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        let receiver = FnReceiver::new(
            None,
            Some(Box::new(move |b| *seen2.lock().unwrap() = b)),
        );

        conn.receive(&receiver).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), b"knock knock");
    }
}
