use parking_lot::{Condvar, Mutex};

/// Counting semaphore handing out capacity credits.
///
/// The count starts at `max` (every credit available) and never exceeds it.
/// Producers take a credit before pushing into a channel and consumers give
/// it back when they pop, so the count doubles as "free slots left".
#[derive(Debug)]
pub struct Permit {
    count: Mutex<usize>,
    available: Condvar,
    max: usize,
}

impl Permit {
    /// Create a permit with every credit available
    pub fn new(max: usize) -> Self {
        Self::with_count(max, max)
    }

    /// Create a permit with `count` of `max` credits available
    pub fn with_count(count: usize, max: usize) -> Self {
        Self {
            count: Mutex::new(count.min(max)),
            available: Condvar::new(),
            max,
        }
    }

    /// Block until a credit is available, then take it
    pub fn acquire(&self) {
        let mut count = self.count.lock();
        while *count == 0 {
            self.available.wait(&mut count);
        }
        *count -= 1;
    }

    /// Take a credit if one is available right now
    pub fn try_acquire(&self) -> bool {
        let mut count = self.count.lock();
        if *count == 0 {
            return false;
        }
        *count -= 1;
        true
    }

    /// Give a credit back and wake one blocked acquirer
    pub fn release(&self) {
        let mut count = self.count.lock();
        if *count < self.max {
            *count += 1;
        }
        drop(count);
        self.available.notify_one();
    }

    /// Current number of free credits.
    ///
    /// Stale as soon as it is returned; only use it for heuristics or under a
    /// lock that excludes concurrent acquirers.
    pub fn value(&self) -> usize {
        *self.count.lock()
    }

    /// Total number of credits
    pub fn max(&self) -> usize {
        self.max
    }

    /// Whether every credit has been returned
    pub fn is_full(&self) -> bool {
        self.value() == self.max
    }
}
