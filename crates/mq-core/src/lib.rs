//! mq-core — shared types, wire format, and concurrency primitives for the
//! message-queue substrate. Every other `mq-*` crate depends on this one.

pub mod chunk;
pub mod config;
pub mod dialback;
pub mod error;
pub mod message;
pub mod pool;
pub mod queue;
pub mod wire;

pub use chunk::Chunk;
pub use error::CoreError;
pub use message::{Message, MsgType, Status};
