//! Paging Queues
//!
//! Based on Mach4 vm/vm_resident.c (vm_page_activate, vm_page_deactivate,
//! vm_page_wire, vm_page_unwire, VM_PAGE_QUEUES_REMOVE)
//!
//! [`PageQueues`] is everything protected by the page-queue lock: the
//! per-page queue state, the index linkage shared by every list, the active
//! and inactive queues, the freelist partitions and the wired count. It is
//! only ever reached through the page manager's `spin::Mutex`, so holding a
//! `&mut PageQueues` *is* holding the lock.
//!
//! State machine for one page:
//!
//! ```text
//!            alloc              activate / unwire(last)
//!   Free ----------> Unqueued -------------------------> Active
//!    ^                  |  ^                              |  ^
//!    |      free        |  |  dequeue          deactivate |  | activate
//!    +------------------+  +---------- Inactive <---------+--+
//!                          |
//!                 wire     v
//!   {Active, Inactive, Unqueued} -----> Wired  (wire_count > 0)
//! ```
//!
//! Insertion onto Active and Inactive is always at the tail. Wired pages
//! ignore activate, deactivate and dequeue.

use alloc::vec::Vec;

use crate::kern::queue::{QueueChain, QueueHead, QueueIndex};
use crate::mach_vm::vm_freelist::{FreeLists, Strategy};
use crate::mach_vm::vm_page::{PageQueueType, VmPage};

/// State protected by the page-queue lock
#[derive(Debug, Default)]
pub struct PageQueues {
    /// Queue state of each page, by arena index
    states: Vec<PageQueueType>,
    /// Linkage of each page, by arena index
    chains: Vec<QueueChain>,
    /// Active queue
    active: QueueHead,
    /// Inactive queue
    inactive: QueueHead,
    /// Freelist partitions
    free: FreeLists,
    /// Pages with `wire_count > 0`
    wired_count: u32,
}

impl PageQueues {
    /// Create empty queues
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pages known to the queues
    pub fn page_count(&self) -> usize {
        self.states.len()
    }

    /// Add a freshly registered page to its freelist
    ///
    /// Returns false if the page's partition is out of range.
    pub fn register(&mut self, page: &VmPage) -> bool {
        debug_assert_eq!(page.index() as usize, self.states.len());
        if !self.free.ensure_partition(page.freelist()) {
            return false;
        }
        self.states.push(PageQueueType::Free);
        self.chains.push(QueueChain::new());
        self.free
            .insert_boot(&mut self.chains, page.index(), page.freelist());
        true
    }

    /// Queue state of a page
    pub fn state(&self, page: &VmPage) -> PageQueueType {
        self.states[page.index() as usize]
    }

    fn set_state(&mut self, page: &VmPage, state: PageQueueType) {
        self.states[page.index() as usize] = state;
    }

    /// Freelist partitions
    pub fn free_lists(&self) -> &FreeLists {
        &self.free
    }

    /// Active queue length
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Inactive queue length
    pub fn inactive_count(&self) -> usize {
        self.inactive.len()
    }

    /// Number of wired pages
    pub fn wired_count(&self) -> u32 {
        self.wired_count
    }

    fn queue_head(&self, queue: PageQueueType) -> &QueueHead {
        match queue {
            PageQueueType::Active => &self.active,
            PageQueueType::Inactive => &self.inactive,
            other => panic!("vm_page_queue: {:?} is not a paging queue", other),
        }
    }

    /// First page index on Active or Inactive
    pub fn first(&self, queue: PageQueueType) -> Option<QueueIndex> {
        self.queue_head(queue).first()
    }

    /// Successor of `index` if it is still on `queue`
    pub fn next_on(&self, queue: PageQueueType, index: QueueIndex) -> Option<QueueIndex> {
        if self.states[index as usize] != queue {
            return None;
        }
        self.chains[index as usize].next()
    }

    /// Page indices of Active or Inactive, head to tail
    pub fn iter(&self, queue: PageQueueType) -> impl Iterator<Item = QueueIndex> + '_ {
        self.queue_head(queue).iter(&self.chains)
    }

    // ========================================================================
    // Free list transitions
    // ========================================================================

    /// Take a free page: `Free -> Unqueued`
    pub fn alloc(&mut self, strategy: Strategy, keep: u32) -> Option<QueueIndex> {
        let index = self.free.take(&mut self.chains, strategy, keep)?;
        debug_assert_eq!(self.states[index as usize], PageQueueType::Free);
        self.states[index as usize] = PageQueueType::Unqueued;
        Some(index)
    }

    /// Take a specific free page: `Free -> Unqueued`
    pub fn alloc_specific(&mut self, page: &VmPage) {
        assert_eq!(
            self.state(page),
            PageQueueType::Free,
            "vm_page_alloc_specific: page {:#x} not free",
            page.phys_addr()
        );
        self.free
            .remove(&mut self.chains, page.index(), page.freelist());
        self.set_state(page, PageQueueType::Unqueued);
    }

    /// Return a page to its partition: `Unqueued -> Free`
    pub fn free(&mut self, page: &VmPage) {
        let state = self.state(page);
        assert!(
            state != PageQueueType::Free,
            "vm_page_free: page {:#x} freed twice",
            page.phys_addr()
        );
        assert!(
            !page.is_wired() && state != PageQueueType::Wired,
            "vm_page_free: page {:#x} is wired",
            page.phys_addr()
        );
        assert_eq!(
            state,
            PageQueueType::Unqueued,
            "vm_page_free: page {:#x} still queued",
            page.phys_addr()
        );
        self.free
            .insert(&mut self.chains, page.index(), page.freelist());
        self.set_state(page, PageQueueType::Free);
    }

    // ========================================================================
    // Paging queue transitions
    // ========================================================================

    fn unlink(&mut self, page: &VmPage) {
        let index = page.index();
        match self.state(page) {
            PageQueueType::Active => self.active.remove(&mut self.chains, index),
            PageQueueType::Inactive => self.inactive.remove(&mut self.chains, index),
            _ => return,
        }
        self.set_state(page, PageQueueType::Unqueued);
    }

    fn assert_allocated(&self, page: &VmPage, op: &str) {
        assert!(
            self.state(page) != PageQueueType::Free,
            "{}: page {:#x} is free",
            op,
            page.phys_addr()
        );
    }

    /// `{Inactive, Unqueued} -> Active`
    ///
    /// No-op on Active pages and on wired pages. Returns whether the page
    /// moved.
    pub fn activate(&mut self, page: &VmPage) -> bool {
        self.assert_allocated(page, "vm_page_activate");
        match self.state(page) {
            PageQueueType::Active | PageQueueType::Wired => false,
            _ => {
                self.unlink(page);
                self.active.enqueue_tail(&mut self.chains, page.index());
                self.set_state(page, PageQueueType::Active);
                true
            }
        }
    }

    /// `{Active, Unqueued} -> Inactive`
    ///
    /// No-op on Inactive pages and on wired pages. Returns whether the page
    /// moved.
    pub fn deactivate(&mut self, page: &VmPage) -> bool {
        self.assert_allocated(page, "vm_page_deactivate");
        match self.state(page) {
            PageQueueType::Inactive | PageQueueType::Wired => false,
            _ => {
                self.unlink(page);
                self.inactive.enqueue_tail(&mut self.chains, page.index());
                self.set_state(page, PageQueueType::Inactive);
                true
            }
        }
    }

    /// `{Active, Inactive} -> Unqueued`; no-op otherwise
    pub fn dequeue(&mut self, page: &VmPage) {
        self.assert_allocated(page, "vm_page_dequeue");
        self.unlink(page);
    }

    /// `{Active, Inactive, Unqueued} -> Wired`, or one more wiring
    pub fn wire(&mut self, page: &VmPage) {
        self.assert_allocated(page, "vm_page_wire");
        if self.state(page) == PageQueueType::Wired {
            debug_assert!(page.is_wired());
            page.store_wire_count(page.wire_count() + 1);
            return;
        }
        self.unlink(page);
        page.store_wire_count(1);
        self.set_state(page, PageQueueType::Wired);
        self.wired_count += 1;
    }

    /// Drop one wiring; the last one moves the page to the Active tail
    pub fn unwire(&mut self, page: &VmPage) {
        assert!(
            self.state(page) == PageQueueType::Wired && page.is_wired(),
            "vm_page_unwire: page {:#x} not wired",
            page.phys_addr()
        );
        let count = page.wire_count() - 1;
        page.store_wire_count(count);
        if count == 0 {
            self.wired_count -= 1;
            self.active.enqueue_tail(&mut self.chains, page.index());
            self.set_state(page, PageQueueType::Active);
        }
    }

    // ========================================================================
    // Consistency
    // ========================================================================

    /// Assert that queue states, lists and wire counts agree
    pub fn check(&self, pages: &[VmPage]) {
        assert_eq!(pages.len(), self.states.len(), "page arena size mismatch");

        for (queue, head) in [
            (PageQueueType::Active, &self.active),
            (PageQueueType::Inactive, &self.inactive),
        ] {
            let members = head.iter(&self.chains).inspect(|&i| {
                assert_eq!(self.states[i as usize], queue, "page {} on wrong list", i);
            });
            assert_eq!(members.count(), head.len(), "{:?} count mismatch", queue);
        }

        let mut free = 0;
        for freelist in 0..self.free.partitions() {
            for i in self.free.iter(&self.chains, freelist) {
                assert_eq!(self.states[i as usize], PageQueueType::Free);
                assert_eq!(pages[i as usize].freelist(), freelist, "page {} on foreign freelist", i);
                free += 1;
            }
        }
        assert_eq!(free, self.free.free_count(), "free count mismatch");

        let mut counted = [0usize; 5];
        for (page, &state) in pages.iter().zip(&self.states) {
            counted[state as usize] += 1;
            assert_eq!(
                page.is_wired(),
                state == PageQueueType::Wired,
                "page {:#x}: wire_count {} in state {:?}",
                page.phys_addr(),
                page.wire_count(),
                state
            );
            let linked = self.chains[page.index() as usize].is_linked();
            let listed = matches!(
                state,
                PageQueueType::Free | PageQueueType::Active | PageQueueType::Inactive
            );
            assert_eq!(linked, listed, "page {:#x} linkage in state {:?}", page.phys_addr(), state);
        }
        assert_eq!(counted[PageQueueType::Free as usize], free as usize);
        assert_eq!(counted[PageQueueType::Active as usize], self.active.len());
        assert_eq!(counted[PageQueueType::Inactive as usize], self.inactive.len());
        assert_eq!(counted[PageQueueType::Wired as usize], self.wired_count as usize);
    }
}
