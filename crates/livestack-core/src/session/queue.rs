//! Bounded frame queue between the scanner and the worker pool.
//!
//! Producers block while the queue is full and consumers block while it is
//! empty, both on condition variables. Holding the queue keeps consumers
//! waiting with items still queued; closing it lets consumers drain what is
//! left and then stop.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
    held: bool,
    admitting: bool,
    high_water_mark: usize,
}

#[derive(Debug)]
pub struct BoundedQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    /// `capacity` is clamped to at least one slot.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                closed: false,
                held: false,
                admitting: true,
                high_water_mark: 0,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue `item`, waiting for a free slot. The item is handed back when
    /// the queue is closed or admission is suspended, before or while waiting.
    pub fn push(&self, item: T) -> Result<(), T> {
        let mut state = self.lock();
        loop {
            if state.closed || !state.admitting {
                return Err(item);
            }
            if state.items.len() < self.capacity {
                state.items.push_back(item);
                state.high_water_mark = state.high_water_mark.max(state.items.len());
                self.not_empty.notify_one();
                return Ok(());
            }
            state = self
                .not_full
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Dequeue the oldest item, waiting while the queue is empty or held.
    /// Returns `None` once the queue is closed and empty.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.lock();
        loop {
            if !state.held || state.closed {
                if let Some(item) = state.items.pop_front() {
                    self.not_full.notify_one();
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }
            state = self
                .not_empty
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Keep queued items where they are until [`release`](Self::release).
    pub fn hold(&self) {
        self.lock().held = true;
    }

    pub fn release(&self) {
        self.lock().held = false;
        self.not_empty.notify_all();
    }

    /// Reject new items, waking any producer blocked on a full queue.
    pub fn suspend_admission(&self) {
        self.lock().admitting = false;
        self.not_full.notify_all();
    }

    pub fn resume_admission(&self) {
        self.lock().admitting = true;
    }

    /// No further items are accepted; consumers drain the rest, held or not.
    pub fn close(&self) {
        self.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Largest depth observed since creation.
    pub fn high_water_mark(&self) -> usize {
        self.lock().high_water_mark
    }
}
