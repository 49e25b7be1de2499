//! Bounded FIFO queue with blocking put/get and idempotent close.
//!
//! Backs both the inbound and outbound side of every `Connection`. `close`
//! takes a `wait_drain` flag: when true, a receiver may keep draining
//! whatever was already buffered before it starts observing the closed
//! state; when false, buffered items are evicted immediately and the next
//! `get` sees the queue as closed-and-empty right away.

use std::collections::VecDeque;

use tokio::sync::{Mutex, Notify};

use crate::error::CoreError;

struct Inner<T> {
    buf: VecDeque<T>,
    cap: usize,
    closed: bool,
}

pub struct BoundedQueue<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Notify,
    not_full: Notify,
}

impl<T> BoundedQueue<T> {
    pub fn new(cap: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                buf: VecDeque::with_capacity(cap.min(64)),
                cap,
                closed: false,
            }),
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    /// Blocks until there is room or the queue is closed.
    pub async fn put(&self, item: T) -> Result<(), CoreError> {
        loop {
            let full_notified = self.not_full.notified();
            {
                let mut inner = self.inner.lock().await;
                if inner.closed {
                    return Err(CoreError::QueueClosed);
                }
                if inner.buf.len() < inner.cap {
                    inner.buf.push_back(item);
                    drop(inner);
                    self.not_empty.notify_one();
                    return Ok(());
                }
            }
            full_notified.await;
        }
    }

    /// Blocks until an element is available or the queue is closed and
    /// drained.
    pub async fn get(&self) -> Result<T, CoreError> {
        loop {
            let empty_notified = self.not_empty.notified();
            {
                let mut inner = self.inner.lock().await;
                if let Some(item) = inner.buf.pop_front() {
                    drop(inner);
                    self.not_full.notify_one();
                    return Ok(item);
                }
                if inner.closed {
                    return Err(CoreError::QueueClosed);
                }
            }
            empty_notified.await;
        }
    }

    pub async fn close(&self, wait_drain: bool) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(CoreError::QueueClosed);
        }
        inner.closed = true;
        if !wait_drain {
            inner.buf.clear();
        }
        drop(inner);
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.buf.len()
    }
}
