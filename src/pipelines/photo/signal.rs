// SPDX-License-Identifier: GPL-3.0-only

//! Counting handoff signal between the two harvesters

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;
use tracing::trace;

/// Counting semaphore with a ceiling.
///
/// `give` never blocks; `wait` consumes one count or gives up after the
/// timeout. The photo pipeline uses a ceiling of 1: a second "photo staged"
/// notification before the first is consumed carries no extra meaning.
#[derive(Debug)]
pub struct HandoffSignal {
    count: Mutex<u32>,
    available: Condvar,
    max: u32,
}

impl HandoffSignal {
    pub fn new(initial: u32, max: u32) -> Self {
        Self {
            count: Mutex::new(initial.min(max)),
            available: Condvar::new(),
            max,
        }
    }

    /// Increment the counter, saturating at the ceiling
    pub fn give(&self) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        if *count < self.max {
            *count += 1;
        }
        trace!(count = *count, "Handoff signal given");
        drop(count);
        self.available.notify_one();
    }

    /// Consume one count, waiting up to `timeout` for it.
    ///
    /// Returns `false` on timeout.
    pub fn wait(&self, timeout: Duration) -> bool {
        let count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut count, result) = self
            .available
            .wait_timeout_while(count, timeout, |count| *count == 0)
            .unwrap_or_else(PoisonError::into_inner);
        if result.timed_out() && *count == 0 {
            return false;
        }
        *count -= 1;
        true
    }

    /// Current counter value
    pub fn count(&self) -> u32 {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_saturates_at_ceiling() {
        let signal = HandoffSignal::new(0, 1);
        signal.give();
        signal.give();
        signal.give();
        assert_eq!(signal.count(), 1);
        assert!(signal.wait(Duration::from_millis(10)));
        assert!(!signal.wait(Duration::from_millis(10)));
    }

    #[test]
    fn test_initial_clamped() {
        let signal = HandoffSignal::new(5, 2);
        assert_eq!(signal.count(), 2);
    }

    #[test]
    fn test_wait_times_out() {
        let signal = HandoffSignal::new(0, 1);
        let start = Instant::now();
        assert!(!signal.wait(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_give_wakes_waiter() {
        let signal = Arc::new(HandoffSignal::new(0, 1));
        let waiter = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || signal.wait(Duration::from_secs(5)))
        };

        thread::sleep(Duration::from_millis(20));
        signal.give();
        assert!(waiter.join().unwrap());
        assert_eq!(signal.count(), 0);
    }
}
