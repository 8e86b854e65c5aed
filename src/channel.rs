use crate::permit::Permit;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

#[derive(Debug)]
struct ChannelState<T> {
    queue: VecDeque<T>,
    producer_finished: bool,
    exhausted: bool,
}

/// A FIFO channel whose capacity is enforced through a [`Permit`].
///
/// Producers take a credit (via [`reserve`](Self::reserve), [`send`](Self::send)
/// or the raw [`permit`](Self::permit)) before pushing; every pop returns one.
/// Once the producer has announced it is done and every credit is back, the
/// channel flips to exhausted and [`pop`](Self::pop) returns `None` forever.
#[derive(Debug)]
pub struct BoundedChannel<T> {
    state: Mutex<ChannelState<T>>,
    readable: Condvar,
    permit: Permit,
}

impl<T> BoundedChannel<T> {
    /// Create a channel holding at most `capacity` items (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(ChannelState {
                queue: VecDeque::with_capacity(capacity),
                producer_finished: false,
                exhausted: false,
            }),
            readable: Condvar::new(),
            permit: Permit::new(capacity),
        }
    }

    /// The credit pool gating pushes into this channel
    pub fn permit(&self) -> &Permit {
        &self.permit
    }

    /// Append an item. The caller must already hold one credit.
    pub fn push(&self, item: T) {
        let mut state = self.state.lock();
        if state.exhausted {
            // The credit taken for this item has nothing left to pair with.
            warn!("push into exhausted channel, item dropped");
            drop(state);
            self.permit.release();
            return;
        }
        state.queue.push_back(item);
        drop(state);
        self.readable.notify_one();
    }

    /// Take a credit, blocking while the channel is full, then push
    pub fn send(&self, item: T) {
        self.permit.acquire();
        self.push(item);
    }

    /// Remove the head item, blocking while the channel is empty.
    ///
    /// Returns `None` once the channel is exhausted.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        loop {
            if state.exhausted {
                return None;
            }
            if let Some(item) = self.take(&mut state) {
                return Some(item);
            }
            if self.settle(&mut state) {
                return None;
            }
            self.readable.wait(&mut state);
        }
    }

    /// Like [`pop`](Self::pop), but gives up after `timeout`.
    ///
    /// `None` means either exhausted or timed out; check
    /// [`is_exhausted`](Self::is_exhausted) to tell them apart.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if state.exhausted {
                return None;
            }
            if let Some(item) = self.take(&mut state) {
                return Some(item);
            }
            if self.settle(&mut state) {
                return None;
            }
            if self.readable.wait_until(&mut state, deadline).timed_out() {
                return self.take(&mut state);
            }
        }
    }

    /// Remove the head item if one is resident right now
    pub fn try_pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        if state.exhausted {
            return None;
        }
        self.take(&mut state)
    }

    /// Announce that the producer will never push again. Call once.
    pub fn mark_producer_finished(&self) {
        let mut state = self.state.lock();
        state.producer_finished = true;
        self.settle(&mut state);
        drop(state);
        self.readable.notify_all();
    }

    /// Whether no further item will ever be delivered
    pub fn is_exhausted(&self) -> bool {
        self.state.lock().exhausted
    }

    /// Number of resident items
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Whether no item is resident
    pub fn is_empty(&self) -> bool {
        self.state.lock().queue.is_empty()
    }

    /// Maximum number of resident items
    pub fn capacity(&self) -> usize {
        self.permit.max()
    }

    /// Credits currently available to producers
    pub fn free_permits(&self) -> usize {
        self.permit.value()
    }

    /// Pop the head, return its credit and re-check the drain condition
    fn take(&self, state: &mut ChannelState<T>) -> Option<T> {
        let item = state.queue.pop_front()?;
        self.permit.release();
        self.settle(state);
        Some(item)
    }

    /// Give back a credit that was taken but never used for a push
    fn cancel_reservation(&self) {
        let mut state = self.state.lock();
        self.permit.release();
        self.settle(&mut state);
    }

    /// Flip to exhausted when the producer is done and every credit is back.
    /// Returns true only for the call that performs the transition.
    fn settle(&self, state: &mut ChannelState<T>) -> bool {
        if state.exhausted || !state.producer_finished || !state.queue.is_empty() {
            return false;
        }
        if self.permit.value() != self.permit.max() {
            return false;
        }
        state.exhausted = true;
        trace!(capacity = self.permit.max(), "channel exhausted");
        self.readable.notify_all();
        true
    }
}

impl<T> BoundedChannel<T> {
    /// Take a credit, blocking while the channel is full.
    ///
    /// The returned [`Reservation`] pushes exactly one item; dropping it
    /// unused gives the credit back.
    pub fn reserve(self: &Arc<Self>) -> Reservation<T> {
        self.permit.acquire();
        Reservation {
            channel: Some(Arc::clone(self)),
        }
    }
}

/// One credit taken from a [`BoundedChannel`], redeemable for a single push
#[derive(Debug)]
pub struct Reservation<T> {
    channel: Option<Arc<BoundedChannel<T>>>,
}

impl<T> Reservation<T> {
    /// Push the item using the held credit
    pub fn push(mut self, item: T) {
        if let Some(channel) = self.channel.take() {
            channel.push(item);
        }
    }
}

impl<T> Drop for Reservation<T> {
    fn drop(&mut self) {
        if let Some(channel) = self.channel.take() {
            channel.cancel_reservation();
        }
    }
}
