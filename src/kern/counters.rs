//! Kernel Performance Counters
//!
//! Based on Mach4 kern/counters.h/c by CMU (1987-1991)
//!
//! Relaxed atomic event counters for the resident page subsystem. They are
//! statistics only; nothing reads them to make a decision.

use core::sync::atomic::{AtomicU64, Ordering};

/// Whether counters are enabled (compile-time switch)
pub const MACH_COUNTERS_ENABLED: bool = true;

/// Increment counter (only if counters enabled)
#[macro_export]
macro_rules! counter {
    ($counter:expr) => {
        if $crate::kern::counters::MACH_COUNTERS_ENABLED {
            $counter.inc();
        }
    };
}

// ============================================================================
// Counter Type
// ============================================================================

/// Mach counter type (atomically updated)
#[derive(Debug)]
pub struct MachCounter {
    value: AtomicU64,
    name: &'static str,
}

impl MachCounter {
    /// Create a new counter
    pub const fn new(name: &'static str) -> Self {
        Self {
            value: AtomicU64::new(0),
            name,
        }
    }

    /// Increment counter by 1
    #[inline]
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment counter by n
    #[inline]
    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    /// Get current value
    #[inline]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Reset to zero
    #[inline]
    pub fn reset(&self) {
        self.value.store(0, Ordering::Relaxed);
    }

    /// Get counter name
    pub fn name(&self) -> &'static str {
        self.name
    }
}

// ============================================================================
// VM Page Counters
// ============================================================================

/// Event counters kept by the page manager
#[derive(Debug)]
pub struct VmPageCounters {
    /// Successful page allocations
    pub allocs: MachCounter,
    /// Allocations that found every eligible freelist empty
    pub alloc_failures: MachCounter,
    /// Allocations that dipped into the reserve
    pub reserve_allocs: MachCounter,
    /// Pages returned to a freelist
    pub frees: MachCounter,
    /// Frames zeroed through pmap
    pub zero_fills: MachCounter,
    /// ZERO allocations satisfied by a known-zero page
    pub zero_hits: MachCounter,
    /// Frame copies through pmap
    pub copies: MachCounter,
    /// Lookups that found a page
    pub lookup_hits: MachCounter,
    /// Lookups that found nothing
    pub lookup_misses: MachCounter,
    /// Sleeps waiting for a busy page
    pub busy_sleeps: MachCounter,
    /// Sleeps waiting for a free page
    pub page_waits: MachCounter,
}

/// Point-in-time copy of [`VmPageCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub allocs: u64,
    pub alloc_failures: u64,
    pub reserve_allocs: u64,
    pub frees: u64,
    pub zero_fills: u64,
    pub zero_hits: u64,
    pub copies: u64,
    pub lookup_hits: u64,
    pub lookup_misses: u64,
    pub busy_sleeps: u64,
    pub page_waits: u64,
}

impl VmPageCounters {
    /// Create a zeroed counter set
    pub const fn new() -> Self {
        Self {
            allocs: MachCounter::new("vm_page_allocs"),
            alloc_failures: MachCounter::new("vm_page_alloc_failures"),
            reserve_allocs: MachCounter::new("vm_page_reserve_allocs"),
            frees: MachCounter::new("vm_page_frees"),
            zero_fills: MachCounter::new("vm_page_zero_fills"),
            zero_hits: MachCounter::new("vm_page_zero_hits"),
            copies: MachCounter::new("vm_page_copies"),
            lookup_hits: MachCounter::new("vm_page_lookup_hits"),
            lookup_misses: MachCounter::new("vm_page_lookup_misses"),
            busy_sleeps: MachCounter::new("vm_page_busy_sleeps"),
            page_waits: MachCounter::new("vm_page_waits"),
        }
    }

    /// Snapshot all counters
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            allocs: self.allocs.get(),
            alloc_failures: self.alloc_failures.get(),
            reserve_allocs: self.reserve_allocs.get(),
            frees: self.frees.get(),
            zero_fills: self.zero_fills.get(),
            zero_hits: self.zero_hits.get(),
            copies: self.copies.get(),
            lookup_hits: self.lookup_hits.get(),
            lookup_misses: self.lookup_misses.get(),
            busy_sleeps: self.busy_sleeps.get(),
            page_waits: self.page_waits.get(),
        }
    }

    /// Reset all counters
    pub fn reset(&self) {
        for counter in [
            &self.allocs,
            &self.alloc_failures,
            &self.reserve_allocs,
            &self.frees,
            &self.zero_fills,
            &self.zero_hits,
            &self.copies,
            &self.lookup_hits,
            &self.lookup_misses,
            &self.busy_sleeps,
            &self.page_waits,
        ] {
            counter.reset();
        }
    }
}

impl Default for VmPageCounters {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_basic() {
        let counter = MachCounter::new("test");
        assert_eq!(counter.get(), 0);
        assert_eq!(counter.name(), "test");

        counter.inc();
        counter.add(4);
        assert_eq!(counter.get(), 5);

        counter.reset();
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn test_counter_macro_and_snapshot() {
        let counters = VmPageCounters::new();
        counter!(counters.allocs);
        counter!(counters.allocs);
        counter!(counters.frees);

        let snap = counters.snapshot();
        assert_eq!(snap.allocs, 2);
        assert_eq!(snap.frees, 1);
        assert_eq!(snap.copies, 0);

        counters.reset();
        assert_eq!(counters.snapshot(), CounterSnapshot::default());
    }
}
