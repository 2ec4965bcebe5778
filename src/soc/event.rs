//! Deferred-closure queue coupling the host threads to the CPU thread.
//!
//! Host-side events (key presses, accelerometer samples, frame-start
//! pulses) and device-internal deferred work are packaged as closures and
//! enqueued here; the CPU thread drains the queue once per instruction
//! step. This is the only mechanism by which anything outside the CPU
//! thread mutates guest-visible state.
//!
//! The queue is FIFO. A closure runs once its remaining delay has reached
//! zero; after each drain every remaining delay is decremented by one
//! instruction quantum (1 ns of guest time).

use std::collections::VecDeque;
use std::sync::Mutex;

/// Queued closure, parameterized over the context it mutates.
pub type Event<C> = Box<dyn FnOnce(&mut C) + Send + 'static>;

struct Entry<C> {
    remaining_ns: i64,
    event: Event<C>,
}

/// FIFO of `(remaining delay, closure)` pairs.
pub struct EventQueue<C> {
    inner: Mutex<VecDeque<Entry<C>>>,
}

impl<C> EventQueue<C> {
    pub fn new() -> Self {
        Self { inner: Mutex::new(VecDeque::new()) }
    }

    /// Enqueue with the default one-quantum delay.
    pub fn post(&self, event: impl FnOnce(&mut C) + Send + 'static) {
        self.post_delayed(event, 1);
    }

    /// Enqueue with an explicit delay in nanoseconds of guest time. A delay
    /// of zero runs at the next drain.
    pub fn post_delayed(&self, event: impl FnOnce(&mut C) + Send + 'static, delay_ns: u64) {
        let mut q = self.inner.lock().unwrap();
        q.push_back(Entry { remaining_ns: delay_ns as i64, event: Box::new(event) });
    }

    /// Remove every due closure in enqueue order, then age the rest by one
    /// quantum. The caller invokes the closures outside the lock, so a
    /// running closure may enqueue follow-ups without deadlocking.
    pub fn take_due(&self) -> Vec<Event<C>> {
        let mut q = self.inner.lock().unwrap();
        let mut due = Vec::new();
        let mut rest = VecDeque::with_capacity(q.len());
        for mut entry in q.drain(..) {
            if entry.remaining_ns <= 0 {
                due.push(entry.event);
            } else {
                entry.remaining_ns -= 1;
                rest.push_back(entry);
            }
        }
        *q = rest;
        due
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<C> Default for EventQueue<C> {
    fn default() -> Self {
        Self::new()
    }
}
