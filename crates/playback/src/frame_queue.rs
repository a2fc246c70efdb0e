//! Bounded blocking FIFO between a decode thread and a consumer
//!
//! Share it with `Arc<FrameQueue<T>>` or scoped threads. Elements are moved
//! in and out, never copied.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

struct State<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> State<T> {
    fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }
}

/// Thread-safe bounded queue with blocking and non-blocking access
pub struct FrameQueue<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> FrameQueue<T> {
    /// Queue without a practical bound (`usize::MAX`)
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(usize::MAX)
    }

    /// Queue holding at most `capacity` elements (at least 1)
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::new(),
                capacity: capacity.max(1),
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Append `value`, blocking while the queue is full
    pub fn put(&self, value: T) {
        let mut state = self.state.lock();
        while state.is_full() {
            self.not_full.wait(&mut state);
        }
        state.items.push_back(value);
        drop(state);
        self.not_empty.notify_one();
    }

    /// Append `value` unless the queue is full, in which case it is handed back
    pub fn try_put(&self, value: T) -> Result<(), T> {
        let mut state = self.state.lock();
        if state.is_full() {
            return Err(value);
        }
        state.items.push_back(value);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Like [`put`](Self::put), giving `value` back if no slot frees up within `timeout`
    pub fn put_timeout(&self, value: T, timeout: Duration) -> Result<(), T> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();
        while state.is_full() {
            if wait(&self.not_full, &mut state, deadline) && state.is_full() {
                return Err(value);
            }
        }
        state.items.push_back(value);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Remove the oldest element, blocking while the queue is empty
    pub fn get(&self) -> T {
        let mut state = self.state.lock();
        loop {
            if let Some(value) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return value;
            }
            self.not_empty.wait(&mut state);
        }
    }

    pub fn try_get(&self) -> Option<T> {
        let value = self.state.lock().items.pop_front();
        if value.is_some() {
            self.not_full.notify_one();
        }
        value
    }

    /// Like [`get`](Self::get), returning `None` if nothing arrives within `timeout`
    pub fn get_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();
        loop {
            if let Some(value) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Some(value);
            }
            if wait(&self.not_empty, &mut state, deadline) {
                let value = state.items.pop_front();
                drop(state);
                if value.is_some() {
                    self.not_full.notify_one();
                }
                return value;
            }
        }
    }

    /// Drop every queued element and wake blocked producers
    pub fn clear(&self) {
        let drained: Vec<T> = self.state.lock().items.drain(..).collect();
        self.not_full.notify_all();
        drop(drained);
    }

    /// Change the bound (clamped to at least 1)
    ///
    /// Elements already queued beyond a smaller bound stay until consumed.
    pub fn set_capacity(&self, capacity: usize) {
        self.state.lock().capacity = capacity.max(1);
        self.not_full.notify_all();
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }
}

/// Block on `condvar` until notified or `deadline`; true when it timed out
///
/// A deadline past what `Instant` can represent waits without a limit.
fn wait<T>(
    condvar: &Condvar,
    state: &mut MutexGuard<'_, State<T>>,
    deadline: Option<Instant>,
) -> bool {
    match deadline {
        Some(deadline) => condvar.wait_until(state, deadline).timed_out(),
        None => {
            condvar.wait(state);
            false
        }
    }
}

impl<T> Default for FrameQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
