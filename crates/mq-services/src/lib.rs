//! mq-services — the `Server` and `Client` built on top of `mq-conn`'s
//! per-peer `Connection`: auth store, connection registry, accept loop,
//! and the auto-reconnecting dial loop.

pub mod auth;
pub mod client;
pub mod registry;
pub mod server;

pub use auth::{AuthStore, Handshake};
pub use client::Client;
pub use registry::ConnRegistry;
pub use server::Server;
