//! mq-conn — the per-peer `Connection` state machine: socket ownership,
//! reader/writer pumps, request correlation, and the peer-lifecycle and
//! inbound-message capability traits that `mq-services` builds on.

pub mod connection;
pub mod errchan;
pub mod operator;
pub mod reqwait;

pub use connection::{Connection, DEFAULT_QUEUE_CAP};
pub use errchan::ErrChan;
pub use operator::{FnOperator, FnReceiver, Operator, Receiver};
pub use reqwait::{ReqFunc, ReqWait};
