//! Pre-shared key/token store consulted during the handshake.
//!
//! Grounded on `auth.go`'s `auth` type: a key→token map with a single
//! locked lookup for validation. `trust.rs`'s `TrustRegistry` is the closest
//! thing in this workspace's own conventions — a `DashMap`-backed registry
//! mutated by an admin surface and consulted on the hot path — so this
//! follows that shape rather than a hand-rolled `Mutex<HashMap<..>>`.

use dashmap::DashMap;

use mq_core::Chunk;

/// Handshake credentials presented by a connecting client: `key || token`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    pub key: Chunk,
    pub token: Chunk,
}

/// key → token. Created with the server, mutated by `put`/`delete`.
#[derive(Default)]
pub struct AuthStore {
    tokens: DashMap<Chunk, Chunk>,
}

impl AuthStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &Chunk) -> Option<Chunk> {
        self.tokens.get(key).map(|v| *v)
    }

    pub fn put(&self, key: Chunk, token: Chunk) {
        self.tokens.insert(key, token);
    }

    pub fn delete(&self, key: &Chunk) {
        self.tokens.remove(key);
    }

    /// True iff a token is registered for `handshake.key` and matches
    /// `handshake.token`. Missing key is false, never an error.
    pub fn is_valid(&self, handshake: &Handshake) -> bool {
        self.tokens
            .get(&handshake.key)
            .is_some_and(|tkn| *tkn == handshake.token)
    }
}
