//! Unbounded FIFO hand-off queue between pipeline stages.
//!
//! Each stage owns one [`WorkQueue`] that the previous stage pushes into and the stage's
//! worker pops from. Pops block while the queue is empty and return `None` as soon as the
//! queue is stopped, so `stop()` reaches a worker parked on an empty queue.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// Thread-safe FIFO with a cancellable blocking pop.
///
/// ## Design
/// - **Multiple producers / multiple consumers**: safe to call from many threads.
/// - **Unbounded**: pushes never block.
/// - Uses a single [`Condvar`] as a general "state changed" signal.
/// - The `stopped` flag lives *under the same mutex* as the items to avoid lost wakeups.
pub struct WorkQueue<T> {
    inner: Mutex<QueueInner<T>>,
    cv: Condvar,
}

struct QueueInner<T> {
    items: VecDeque<T>,
    stopped: bool,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::new(),
                stopped: false,
            }),
            cv: Condvar::new(),
        }
    }

    /// Append `item` at the tail and wake one waiter.
    ///
    /// Items pushed after [`WorkQueue::stop`] are kept but never handed out by `pop`.
    pub fn push(&self, item: T) {
        let mut g = self.inner.lock().unwrap();
        g.items.push_back(item);
        drop(g);
        self.cv.notify_one();
    }

    /// Block until an item is available or the queue is stopped.
    ///
    /// Returns `None` once stopped, even if items remain queued.
    pub fn pop(&self) -> Option<T> {
        let mut g = self.inner.lock().unwrap();
        loop {
            if g.stopped {
                return None;
            }
            if let Some(item) = g.items.pop_front() {
                return Some(item);
            }
            g = self.cv.wait(g).unwrap();
        }
    }

    /// Mark the queue as stopped and wake all waiters.
    ///
    /// This is idempotent and safe to call multiple times.
    pub fn stop(&self) {
        let mut g = self.inner.lock().unwrap();
        g.stopped = true;
        drop(g);
        self.cv.notify_all();
    }

    /// Number of queued items (best-effort snapshot).
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return every queued item, oldest first.
    pub fn drain(&self) -> Vec<T> {
        let mut g = self.inner.lock().unwrap();
        g.items.drain(..).collect()
    }
}
