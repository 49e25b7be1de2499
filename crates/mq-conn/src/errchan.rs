//! Bounded, drop-oldest channel for non-fatal pump errors.
//!
//! The reader/writer pumps hit errors (a malformed frame, a transient write
//! failure) that don't themselves warrant tearing the connection down; they
//! get pushed here instead so a caller who wants visibility can drain them
//! with `recv`. Capacity is small and the channel favors newest-wins: once
//! full, the oldest queued error is dropped to make room rather than
//! blocking the pump that's reporting it.

use std::collections::VecDeque;

use tokio::sync::{Mutex, Notify};

use mq_core::CoreError;

const DEFAULT_CAPACITY: usize = 12;

pub struct ErrChan {
    inner: Mutex<VecDeque<CoreError>>,
    notify: Notify,
    cap: usize,
}

impl Default for ErrChan {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ErrChan {
    pub fn new(cap: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(cap)),
            notify: Notify::new(),
            cap,
        }
    }

    /// Push a new error, evicting the oldest entry if already at capacity.
    pub async fn push(&self, e: CoreError) {
        let mut q = self.inner.lock().await;
        if q.len() >= self.cap {
            q.pop_front();
        }
        q.push_back(e);
        drop(q);
        self.notify.notify_one();
    }

    /// Wait for and take the oldest queued error.
    pub async fn recv(&self) -> CoreError {
        loop {
            let notified = self.notify.notified();
            {
                let mut q = self.inner.lock().await;
                if let Some(e) = q.pop_front() {
                    return e;
                }
            }
            notified.await;
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_then_recv_is_fifo() {
        let ch = ErrChan::new(4);
        ch.push(CoreError::InvalidHeader).await;
        ch.push(CoreError::InvalidLength).await;
        assert_eq!(ch.recv().await, CoreError::InvalidHeader);
        assert_eq!(ch.recv().await, CoreError::InvalidLength);
    }

    #[tokio::test]
    async fn over_capacity_drops_the_oldest() {
        let ch = ErrChan::new(2);
        ch.push(CoreError::InvalidHeader).await;
        ch.push(CoreError::InvalidLength).await;
        ch.push(CoreError::InvalidMsgType).await;

        assert_eq!(ch.len().await, 2);
        assert_eq!(ch.recv().await, CoreError::InvalidLength);
        assert_eq!(ch.recv().await, CoreError::InvalidMsgType);
    }
}
