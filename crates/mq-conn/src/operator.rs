//! Peer-lifecycle and inbound-message capability interfaces.
//!
//! Both traits are kept object-safe and type-erased (`Arc<dyn Operator>`,
//! `&dyn Receiver`) rather than generic parameters on `Connection`, per the
//! "type-erased receiver/operator" redesign note: the connection holds only
//! the peer's `Chunk` and never a reference back to the caller's state, so
//! no `Connection <-> Server/Client` cycle can form.

use mq_core::Chunk;

/// Peer lifecycle hook, consumed by both `Server` and `Client`.
pub trait Operator: Send + Sync {
    /// Called once, synchronously, right after a socket is installed and
    /// the pumps are spawned.
    fn on_connect(&self, _id: Chunk) {}
    /// Called once, synchronously, during `close()` after the pumps have
    /// exited and `ReqWait` has been dumped.
    fn on_disconnect(&self, _id: Chunk) {}
}

/// Capability for producing a response to an inbound Request and for
/// handling an inbound Statement.
pub trait Receiver: Send + Sync {
    /// Produce the response body for an inbound Request.
    fn response(&self, _body: Vec<u8>) -> Vec<u8> {
        Vec::new()
    }
    /// Handle an inbound Statement. No response is sent.
    fn statement(&self, _body: Vec<u8>) {}
}

type OnConnectFn = Box<dyn Fn(Chunk) + Send + Sync>;
type OnDisconnectFn = Box<dyn Fn(Chunk) + Send + Sync>;

/// An `Operator` built from plain closures, either of which may be absent —
/// the Rust counterpart of `opts.go`'s `Op`.
#[derive(Default)]
pub struct FnOperator {
    on_connect: Option<OnConnectFn>,
    on_disconnect: Option<OnDisconnectFn>,
}

impl FnOperator {
    pub fn new(on_connect: Option<OnConnectFn>, on_disconnect: Option<OnDisconnectFn>) -> Self {
        Self {
            on_connect,
            on_disconnect,
        }
    }
}

impl Operator for FnOperator {
    fn on_connect(&self, id: Chunk) {
        if let Some(f) = &self.on_connect {
            f(id);
        }
    }

    fn on_disconnect(&self, id: Chunk) {
        if let Some(f) = &self.on_disconnect {
            f(id);
        }
    }
}

type ResponseFn = Box<dyn Fn(Vec<u8>) -> Vec<u8> + Send + Sync>;
type StatementFn = Box<dyn Fn(Vec<u8>) + Send + Sync>;

/// A `Receiver` built from plain closures, either of which may be absent —
/// the Rust counterpart of `opts.go`'s `Rec`.
#[derive(Default)]
pub struct FnReceiver {
    response: Option<ResponseFn>,
    statement: Option<StatementFn>,
}

impl FnReceiver {
    pub fn new(response: Option<ResponseFn>, statement: Option<StatementFn>) -> Self {
        Self { response, statement }
    }
}

impl Receiver for FnReceiver {
    fn response(&self, body: Vec<u8>) -> Vec<u8> {
        self.response.as_ref().map(|f| f(body)).unwrap_or_default()
    }

    fn statement(&self, body: Vec<u8>) {
        if let Some(f) = &self.statement {
            f(body);
        }
    }
}
