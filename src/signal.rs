//! Set-once, multi-waiter completion signal.
//!
//! [`CompletionSignal`] couples a write-once value cell with a condition
//! variable. Publishing the value *is* setting the signal, so any thread
//! that observes the signal as set also observes the fully-written value.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A one-way flag carrying a value, set at most once and never reset.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use bound_task::signal::CompletionSignal;
///
/// let signal = Arc::new(CompletionSignal::new());
/// let writer = Arc::clone(&signal);
/// std::thread::spawn(move || {
///     writer.publish(7u32).unwrap();
/// });
/// assert_eq!(*signal.wait(), 7);
/// assert!(signal.publish(8).is_err());
/// ```
#[derive(Debug)]
pub struct CompletionSignal<T> {
    value: OnceLock<T>,
    lock: Mutex<()>,
    cond: Condvar,
}

impl<T> Default for CompletionSignal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CompletionSignal<T> {
    /// Creates an unset signal.
    pub fn new() -> Self {
        Self {
            value: OnceLock::new(),
            lock: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    /// Stores `value` and wakes every waiter.
    ///
    /// Returns the value back as `Err` if the signal was already set; the
    /// stored value is left untouched.
    pub fn publish(&self, value: T) -> Result<(), T> {
        self.value.set(value)?;
        // Taking the lock orders this notify after any waiter that checked
        // the cell and is about to park.
        let _guard = self.lock.lock();
        self.cond.notify_all();
        Ok(())
    }

    /// Returns `true` once a value has been published.
    pub fn is_set(&self) -> bool {
        self.value.get().is_some()
    }

    /// Returns the published value without blocking.
    pub fn get(&self) -> Option<&T> {
        self.value.get()
    }

    /// Blocks until the signal is set.
    pub fn wait(&self) -> &T {
        if let Some(value) = self.value.get() {
            return value;
        }
        let mut guard = self.lock.lock();
        loop {
            if let Some(value) = self.value.get() {
                return value;
            }
            self.cond.wait(&mut guard);
        }
    }

    /// Blocks until the signal is set or `timeout` elapses.
    ///
    /// Returns `None` on timeout. A timed-out wait has no effect on the
    /// signal; a later publish still succeeds.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<&T> {
        if let Some(value) = self.value.get() {
            return Some(value);
        }
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return Some(self.wait());
        };
        let mut guard = self.lock.lock();
        loop {
            if let Some(value) = self.value.get() {
                return Some(value);
            }
            if self.cond.wait_until(&mut guard, deadline).timed_out() {
                return self.value.get();
            }
        }
    }
}
