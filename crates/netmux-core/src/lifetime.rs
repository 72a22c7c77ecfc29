//! Lifetime primitives shared by bindings and virtual interfaces.
//!
//! - [`RefCount`]: explicit reference count whose zero transition happens
//!   exactly once
//! - [`Outstanding`]: in-flight operation counter that doubles as a drain latch
//! - [`Event`]: one-shot completion used when a control path has to block on
//!   an asynchronous lower or upper layer operation

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, trace};

/// Error type for reference count misuse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifetimeError {
    #[error("reference count underflow on {owner} (releasing '{reason}')")]
    Underflow { owner: String, reason: &'static str },
}

/// Outcome of [`RefCount::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Other holders remain; carries the remaining count.
    Retained(usize),
    /// This call dropped the last reference. Returned exactly once.
    Freed,
}

/// Reference count for an engine object.
///
/// A new count starts at one, the allocation reference. Every `acquire` must
/// be matched by exactly one `release`, and only the release that brings the
/// count to zero observes [`Release::Freed`].
#[derive(Debug)]
pub struct RefCount {
    owner: String,
    count: AtomicUsize,
    acquires: AtomicU64,
    releases: AtomicU64,
    frees: AtomicU64,
}

/// Totals of a [`RefCount`] at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RefSnapshot {
    pub count: usize,
    pub acquires: u64,
    pub releases: u64,
    /// Releases that observed [`Release::Freed`]; never more than one.
    pub frees: u64,
}

impl RefCount {
    /// Creates a count holding the allocation reference.
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            count: AtomicUsize::new(1),
            acquires: AtomicU64::new(1),
            releases: AtomicU64::new(0),
            frees: AtomicU64::new(0),
        }
    }

    /// Takes a reference and returns the new count.
    pub fn acquire(&self, reason: &'static str) -> usize {
        let previous = self.count.fetch_add(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "{} acquired after it was freed", self.owner);
        self.acquires.fetch_add(1, Ordering::Relaxed);
        trace!(owner = %self.owner, reason, count = previous + 1, "reference acquired");
        previous + 1
    }

    /// Takes a reference unless the count already reached zero.
    pub fn try_acquire(&self, reason: &'static str) -> bool {
        let mut current = self.count.load(Ordering::Acquire);
        loop {
            if current == 0 {
                debug!(owner = %self.owner, reason, "refusing reference on freed object");
                return false;
            }
            match self.count.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        self.acquires.fetch_add(1, Ordering::Relaxed);
        trace!(owner = %self.owner, reason, count = current + 1, "reference acquired");
        true
    }

    /// Drops a reference.
    ///
    /// # Errors
    ///
    /// Returns [`LifetimeError::Underflow`] if the count is already zero; the
    /// count is left untouched in that case.
    pub fn release(&self, reason: &'static str) -> Result<Release, LifetimeError> {
        let mut current = self.count.load(Ordering::Acquire);
        loop {
            if current == 0 {
                error!(owner = %self.owner, reason, "reference count underflow");
                return Err(LifetimeError::Underflow {
                    owner: self.owner.clone(),
                    reason,
                });
            }
            match self.count.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        self.releases.fetch_add(1, Ordering::Relaxed);
        trace!(owner = %self.owner, reason, count = current - 1, "reference released");

        if current == 1 {
            self.frees.fetch_add(1, Ordering::Relaxed);
            Ok(Release::Freed)
        } else {
            Ok(Release::Retained(current - 1))
        }
    }

    /// Returns the current count.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Returns true once the last reference has been released.
    pub fn is_freed(&self) -> bool {
        self.count() == 0
    }

    /// Total references taken, including the allocation reference.
    pub fn acquires(&self) -> u64 {
        self.acquires.load(Ordering::Relaxed)
    }

    /// Total references released.
    pub fn releases(&self) -> u64 {
        self.releases.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> RefSnapshot {
        RefSnapshot {
            count: self.count(),
            acquires: self.acquires(),
            releases: self.releases(),
            frees: self.frees.load(Ordering::Relaxed),
        }
    }
}

/// Counter of in-flight operations that waiters can block on until it drains.
#[derive(Debug, Default)]
pub struct Outstanding {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Outstanding {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one more in-flight operation.
    pub fn increment(&self) -> usize {
        let mut count = self.count.lock();
        *count += 1;
        *count
    }

    /// Records the completion of an in-flight operation, waking drain waiters
    /// when the count reaches zero.
    pub fn decrement(&self) -> usize {
        let mut count = self.count.lock();
        if *count == 0 {
            error!("outstanding operation count underflow");
            return 0;
        }
        *count -= 1;
        if *count == 0 {
            self.idle.notify_all();
        }
        *count
    }

    /// Returns the number of in-flight operations.
    pub fn count(&self) -> usize {
        *self.count.lock()
    }

    /// Blocks until the count is zero or `deadline` passes. Returns true if
    /// the counter drained.
    pub fn wait_idle_until(&self, deadline: Instant) -> bool {
        let mut count = self.count.lock();
        while *count != 0 {
            if self.idle.wait_until(&mut count, deadline).timed_out() {
                return *count == 0;
            }
        }
        true
    }
}

#[derive(Debug)]
struct EventSlot<T> {
    signaled: bool,
    value: Option<T>,
}

/// One-shot completion event carrying a value from the completing side to a
/// single blocked waiter.
#[derive(Debug)]
pub struct Event<T> {
    slot: Mutex<EventSlot<T>>,
    cv: Condvar,
}

impl<T> Default for Event<T> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(EventSlot {
                signaled: false,
                value: None,
            }),
            cv: Condvar::new(),
        }
    }
}

impl<T> Event<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals the event. Only the first signal is kept; later ones return
    /// false and drop their value.
    pub fn signal(&self, value: T) -> bool {
        let mut slot = self.slot.lock();
        if slot.signaled {
            return false;
        }
        slot.signaled = true;
        slot.value = Some(value);
        self.cv.notify_all();
        true
    }

    /// Returns true once the event has been signaled.
    pub fn is_signaled(&self) -> bool {
        self.slot.lock().signaled
    }

    /// Blocks until the event is signaled and takes its value.
    ///
    /// Returns `None` if another waiter already took the value.
    pub fn wait(&self) -> Option<T> {
        let mut slot = self.slot.lock();
        while !slot.signaled {
            self.cv.wait(&mut slot);
        }
        slot.value.take()
    }

    /// Like [`Event::wait`] but gives up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock();
        while !slot.signaled {
            if self.cv.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }
        slot.value.take()
    }
}
