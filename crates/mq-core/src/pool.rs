//! Byte-slice pool with fixed size classes.
//!
//! The original pool grows its size classes dynamically (32, 64, then *4 as
//! needed). This one fixes the classes at {32, 64, 128, 256} per the wire
//! payload sizes we actually see in practice; anything larger is allocated
//! fresh and not returned to any class on `put`.

use std::sync::Mutex;

const CLASSES: [usize; 4] = [32, 64, 128, 256];

struct Class {
    cap: usize,
    free: Mutex<Vec<Vec<u8>>>,
}

/// A fixed size-class byte-slice pool.
///
/// `get(n)` returns a zeroed buffer of length ≥ `n`, drawn from the smallest
/// class that fits (its length is the class's, not `n` — callers that need
/// an exact-length slice truncate it themselves), or freshly allocated at
/// exactly length `n` if it exceeds every class. `put(b)` returns `b` to its
/// class by capacity after zeroing it, or drops it if its capacity doesn't
/// match any class exactly (oversized buffers are never pooled).
pub struct Pool {
    classes: Vec<Class>,
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}

impl Pool {
    pub fn new() -> Self {
        Self {
            classes: CLASSES
                .iter()
                .map(|&cap| Class {
                    cap,
                    free: Mutex::new(Vec::new()),
                })
                .collect(),
        }
    }

    pub fn get(&self, n: usize) -> Vec<u8> {
        for class in &self.classes {
            if n > class.cap {
                continue;
            }
            let mut free = class.free.lock().unwrap();
            if let Some(buf) = free.pop() {
                return buf;
            }
            return vec![0u8; class.cap];
        }
        vec![0u8; n]
    }

    pub fn put(&self, mut buf: Vec<u8>) {
        // Match by capacity, not length: a buffer that was truncated down
        // (e.g. a decoded message body sliced to its exact payload length)
        // still carries its original class capacity and should still be
        // reclaimed by it.
        let cap = buf.capacity();
        for class in &self.classes {
            if class.cap == cap {
                buf.clear();
                buf.resize(class.cap, 0);
                class.free.lock().unwrap().push(buf);
                return;
            }
        }
        // Oversized or non-class-sized buffer: drop it.
    }
}
