//! Scheduling Primitives - Wait/Wakeup on Events
//!
//! Based on Mach4 kern/sched_prim.h/c
//!
//! A thread that must sleep for a condition first asserts a wait on an
//! event, then drops whatever lock protects the condition, then blocks.
//! Wakers change the condition and post a wakeup on the same event. Asserting
//! before dropping the lock is what prevents lost wakeups: a wakeup posted
//! between the assert and the block makes the block return immediately.
//!
//! Events hash into a fixed table of generation counters, like Mach's
//! `wait_hash`. Unrelated events that share a bucket cause spurious wakeups,
//! so every sleeper must re-check its condition after waking.
//!
//! With the `std` feature (and in tests) blocked threads park on a
//! `std::sync::Condvar`. Without it there is no scheduler to hand the CPU
//! to, so `thread_block` polls the generation counter with a spin hint; the
//! host kernel is expected to enable a real blocking backend.

use core::sync::atomic::{AtomicU64, Ordering};

#[cfg(any(test, feature = "std"))]
use std::sync::{Condvar, Mutex, PoisonError};

/// Event that threads can wait on
/// In Mach, this is typically a pointer cast to an integer
pub type WaitEvent = u64;

/// Special value indicating no event
pub const EVENT_NULL: WaitEvent = 0;

/// Number of wait buckets (prime, as in Mach)
pub const NUMQUEUES: usize = 59;

/// Create an event from a pointer/address
pub fn event_from_addr<T>(addr: &T) -> WaitEvent {
    addr as *const T as usize as WaitEvent
}

/// Proof that a wait was asserted
///
/// Returned by [`WaitQueue::assert_wait`] and consumed by
/// [`WaitQueue::thread_block`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "an asserted wait does nothing until thread_block is called"]
pub struct WaitTicket {
    bucket: usize,
    generation: u64,
}

// ============================================================================
// Wait Queue
// ============================================================================

/// Hashed table of waitable events
pub struct WaitQueue {
    generations: [AtomicU64; NUMQUEUES],
    #[cfg(any(test, feature = "std"))]
    lock: Mutex<()>,
    #[cfg(any(test, feature = "std"))]
    cond: Condvar,
}

impl core::fmt::Debug for WaitQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WaitQueue")
            .field("buckets", &NUMQUEUES)
            .finish()
    }
}

impl WaitQueue {
    /// Create a new wait queue
    pub fn new() -> Self {
        Self {
            generations: [const { AtomicU64::new(0) }; NUMQUEUES],
            #[cfg(any(test, feature = "std"))]
            lock: Mutex::new(()),
            #[cfg(any(test, feature = "std"))]
            cond: Condvar::new(),
        }
    }

    fn bucket(event: WaitEvent) -> usize {
        (event % NUMQUEUES as u64) as usize
    }

    /// Assert that the current thread will wait on an event
    ///
    /// This records the wait but doesn't block. Call [`Self::thread_block`]
    /// after releasing the lock protecting the awaited condition.
    pub fn assert_wait(&self, event: WaitEvent) -> WaitTicket {
        let bucket = Self::bucket(event);
        WaitTicket {
            bucket,
            generation: self.generations[bucket].load(Ordering::SeqCst),
        }
    }

    /// Block until a wakeup is posted on the bucket of the asserted event
    ///
    /// Returns immediately if a wakeup was posted after the assert.
    pub fn thread_block(&self, ticket: WaitTicket) {
        let generation = &self.generations[ticket.bucket];

        #[cfg(any(test, feature = "std"))]
        {
            let mut guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
            while generation.load(Ordering::SeqCst) == ticket.generation {
                guard = self
                    .cond
                    .wait(guard)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }

        #[cfg(not(any(test, feature = "std")))]
        while generation.load(Ordering::SeqCst) == ticket.generation {
            core::hint::spin_loop();
        }
    }

    /// Wake up all threads waiting on an event
    pub fn thread_wakeup(&self, event: WaitEvent) {
        self.generations[Self::bucket(event)].fetch_add(1, Ordering::SeqCst);

        #[cfg(any(test, feature = "std"))]
        {
            // Serialize with sleepers between their check and their wait.
            drop(self.lock.lock().unwrap_or_else(PoisonError::into_inner));
            self.cond.notify_all();
        }
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_wakeup_before_block_is_not_lost() {
        let wq = WaitQueue::new();
        let event: WaitEvent = 0x1000;

        let ticket = wq.assert_wait(event);
        wq.thread_wakeup(event);

        // Must return at once
        wq.thread_block(ticket);
    }

    #[test]
    fn test_wakeup_other_thread() {
        let wq = Arc::new(WaitQueue::new());
        let event: WaitEvent = 0x2000;
        let ticket = wq.assert_wait(event);

        let waker = {
            let wq = Arc::clone(&wq);
            thread::spawn(move || wq.thread_wakeup(event))
        };

        wq.thread_block(ticket);
        waker.join().unwrap();
    }

    #[test]
    fn test_event_buckets() {
        let wq = WaitQueue::new();
        let a = wq.assert_wait(1);
        let b = wq.assert_wait(1 + NUMQUEUES as u64);
        assert_eq!(a, b);
        assert_ne!(wq.assert_wait(2), a);
    }
}
