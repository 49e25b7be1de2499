//! Capped backoff for the client's reconnect loop.
//!
//! `next()` increments the internal counter before multiplying, so the
//! first call after construction or `reset()` returns `multiplier` seconds,
//! not zero — a client that can't reach its server at all still waits
//! before the very first retry.

use std::sync::Mutex;
use std::time::Duration;

struct State {
    n: u32,
}

pub struct Dialback {
    capacity: u32,
    multiplier: u32,
    state: Mutex<State>,
}

impl Dialback {
    pub fn new(capacity: u32, multiplier: u32) -> Self {
        Self {
            capacity,
            multiplier,
            state: Mutex::new(State { n: 0 }),
        }
    }

    /// Default client backoff: capacity 6, multiplier 5 (max 30s).
    pub fn client_default() -> Self {
        Self::new(6, 5)
    }

    /// Advance the counter (capped at `capacity`) and return the next wait,
    /// in seconds.
    pub fn next(&self) -> u32 {
        let mut state = self.state.lock().unwrap();
        if state.n < self.capacity {
            state.n += 1;
        }
        state.n * self.multiplier
    }

    pub fn reset(&self) {
        self.state.lock().unwrap().n = 0;
    }

    pub async fn wait(&self) {
        tokio::time::sleep(Duration::from_secs(self.next() as u64)).await;
    }
}
