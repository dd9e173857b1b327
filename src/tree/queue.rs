//! Self-terminating work queue
//!
//! Workers are both the consumers and the only producers of this queue, so
//! there is no outside signal telling them when the crawl is over. Instead
//! the queue counts how many workers currently hold an order (`awake`).
//! When every worker is simultaneously waiting on an empty queue, nobody can
//! push again and the queue closes itself.
//!
//! ```text
//!   pop():  lock ── awake -= 1 ──┬── empty & awake == 0 ──► close, wake all ──► None
//!                                ├── empty ──► wait ──┘
//!                                ├── closed ──────────────────────────────────► None
//!                                └── item ──► awake += 1 ────────────────────► Some
//! ```
//!
//! The decrement at the start of `pop` is undone under the same lock
//! acquisition whenever an item is available, so a concurrent termination
//! check never observes the transient dip.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
struct QueueState<T> {
    orders: VecDeque<T>,

    /// Workers currently holding an order
    awake: usize,

    closed: bool,
}

/// FIFO queue with quiescence detection
#[derive(Debug)]
pub struct WorkQueue<T> {
    state: Mutex<QueueState<T>>,
    available: Condvar,

    /// Total orders accepted
    pushed: AtomicU64,

    /// Total orders handed out
    popped: AtomicU64,
}

impl<T> WorkQueue<T> {
    /// Create a queue shared by `workers` consumers
    pub fn new(workers: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                orders: VecDeque::new(),
                awake: workers,
                closed: false,
            }),
            available: Condvar::new(),
            pushed: AtomicU64::new(0),
            popped: AtomicU64::new(0),
        }
    }

    /// Take the next order, blocking until one arrives
    ///
    /// Returns `None` once the queue is closed, either explicitly or because
    /// every worker is idle with nothing left to do.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        debug_assert!(state.awake > 0, "pop called by a worker that was not awake");
        state.awake = state.awake.saturating_sub(1);

        while state.orders.is_empty() && !state.closed {
            if state.awake == 0 {
                state.closed = true;
                self.available.notify_all();
                break;
            }
            self.available.wait(&mut state);
        }

        if state.closed {
            return None;
        }

        state.awake += 1;
        let order = state.orders.pop_front();
        if order.is_some() {
            self.popped.fetch_add(1, Ordering::Relaxed);
        }
        order
    }

    /// Append an order and wake one waiting worker
    ///
    /// Returns `false` if the queue is already closed and the order was
    /// dropped.
    pub fn push(&self, order: T) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }

        state.orders.push_back(order);
        self.pushed.fetch_add(1, Ordering::Relaxed);
        drop(state);

        self.available.notify_one();
        true
    }

    /// Force the queue closed and release every waiting worker
    pub fn close(&self) {
        let mut state = self.state.lock();
        if !state.closed {
            state.closed = true;
            self.available.notify_all();
        }
    }

    /// Number of queued orders
    pub fn len(&self) -> usize {
        self.state.lock().orders.len()
    }

    /// Check if no orders are queued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of workers currently holding an order
    pub fn awake(&self) -> usize {
        self.state.lock().awake
    }

    pub fn pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    pub fn popped(&self) -> u64 {
        self.popped.load(Ordering::Relaxed)
    }
}
