//! Resident Page Management
//!
//! Based on Mach4 vm/vm_resident.c
//!
//! [`PageManager`] owns the page arena and glues together the freelists,
//! the object/offset lookup table and the paging queues. It is created
//! once, loaded with frames at boot, and then shared by reference with the
//! fault handler, pagers, I/O code and the pageout daemon.
//!
//! ## Locking
//!
//! - The page-queue lock (a `spin::Mutex<PageQueues>`) covers every queue
//!   membership change, every `wire_count` change and the freelists. It is
//!   held only for O(1) work and never across a sleep or a pmap call.
//! - The object lock ([`VmObjectLock`]) is passed in by the caller for
//!   every operation that reads or changes which page backs an
//!   object/offset.
//! - The busy flag, represented by a [`BusyPage`] token, gives exclusive
//!   use of a page's contents and may be held across blocking work. A
//!   thread that finds a page busy calls [`PageManager::page_sleep`], which
//!   drops the object lock and sleeps; it must then relock and start over,
//!   since the page may have been freed or renamed meanwhile.
//!
//! Lock order is object lock, then page-queue lock, then lookup bucket.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use bitflags::bitflags;
use core::sync::atomic::{AtomicBool, Ordering};
use spin::Mutex;

use crate::config::VmPageConfig;
use crate::counter;
use crate::error::{VmPageError, VmPageResult};
use crate::kern::counters::{CounterSnapshot, VmPageCounters};
use crate::kern::queue::QueueIndex;
use crate::kern::sched_prim::{event_from_addr, WaitQueue};
use crate::mach_vm::pmap::PhysOps;
use crate::mach_vm::vm_freelist::{Strategy, VM_NFREELIST};
use crate::mach_vm::vm_object::VmObjectLock;
use crate::mach_vm::vm_page::{
    atop, page_aligned, ptoa, round_page, PageFlags, PageOwner, PageQueueType, VmPage, PAGE_SIZE,
};
use crate::mach_vm::vm_page_hash::PageHashTable;
use crate::mach_vm::vm_page_queue::PageQueues;

// ============================================================================
// Allocation Flags
// ============================================================================

bitflags! {
    /// Page allocation flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AllocFlags: u32 {
        /// Return a zero-filled frame
        const ZERO        = 0x0001;
        /// May take pages held back in the reserve
        const USE_RESERVE = 0x0002;
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Page counts by state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VmPageStats {
    /// Registered frames
    pub total: usize,
    /// Frames on a freelist
    pub free: usize,
    /// Free frames per partition
    pub free_by_list: [usize; VM_NFREELIST],
    /// Pages on the active queue
    pub active: usize,
    /// Pages on the inactive queue
    pub inactive: usize,
    /// Wired pages
    pub wired: usize,
    /// Allocated pages on no queue
    pub unqueued: usize,
    /// Pages held back for `USE_RESERVE`
    pub reserve: usize,
    /// Low-memory threshold
    pub free_target: usize,
    /// Critical-memory threshold
    pub free_min: usize,
}

// ============================================================================
// Busy Page Token
// ============================================================================

/// Exclusive hold on a page's busy flag
///
/// Returned by every allocation and by [`PageManager::try_busy`]. Dropping
/// the token clears busy and wakes sleepers; [`PageManager::page_free`]
/// consumes it instead.
///
/// A page released while busy is freed when the token goes away. Dropping
/// frees an anonymous page directly; an owned page needs the object lock,
/// so its holder must use [`BusyPage::wakeup_done`], and dropping it is a
/// fatal error.
#[must_use = "dropping a BusyPage immediately clears busy"]
pub struct BusyPage<'a> {
    page: &'a VmPage,
    manager: &'a PageManager,
}

impl<'a> BusyPage<'a> {
    /// The page held busy
    pub fn page(&self) -> &'a VmPage {
        self.page
    }

    /// Clear busy, honoring a deferred release
    ///
    /// If another thread called [`PageManager::page_release`] while the
    /// page was busy, the page is freed here. Returns whether it was.
    pub fn wakeup_done(self, object: &mut VmObjectLock<'_>) -> bool {
        if self.page.is_released() {
            let manager = self.manager;
            manager.page_free(object, self);
            true
        } else {
            drop(self);
            false
        }
    }

    /// Give up the token without touching the flags
    fn leak(self) -> &'a VmPage {
        let page = self.page;
        core::mem::forget(self);
        page
    }
}

impl core::ops::Deref for BusyPage<'_> {
    type Target = VmPage;

    fn deref(&self) -> &VmPage {
        self.page
    }
}

impl Drop for BusyPage<'_> {
    fn drop(&mut self) {
        if self.page.is_released() {
            if self.page.owner().is_none() {
                self.manager.release_page(self.page);
                return;
            }
            self.manager.page_unbusy(self.page);
            panic!(
                "vm_page: released page {:#x} owned by {:?} dropped without wakeup_done",
                self.page.phys_addr(),
                self.page.object()
            );
        }
        self.manager.page_unbusy(self.page);
    }
}

impl core::fmt::Debug for BusyPage<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("BusyPage").field(&self.page).finish()
    }
}

// ============================================================================
// Page Manager
// ============================================================================

/// The resident page manager
pub struct PageManager {
    config: VmPageConfig,

    /// All pages in the system (indexed by arena index)
    pages: Vec<VmPage>,

    /// Frame number to arena index
    frames: BTreeMap<u64, u32>,

    /// Page-queue lock and the state it protects
    queues: Mutex<PageQueues>,

    /// Object/offset lookup table
    hash: PageHashTable,

    /// Frame zero/copy
    pmap: Arc<dyn PhysOps>,

    /// Busy and free-page sleeps
    waitq: WaitQueue,

    /// Someone is in `page_wait`
    free_wanted: AtomicBool,

    counters: VmPageCounters,
}

impl core::fmt::Debug for PageManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PageManager")
            .field("pages", &self.pages.len())
            .field("hash", &self.hash)
            .finish()
    }
}

impl PageManager {
    /// Create a page manager with no frames
    pub fn new(config: VmPageConfig, pmap: Arc<dyn PhysOps>) -> Self {
        Self {
            hash: PageHashTable::new(config.bucket_count(0), config.hash_fn),
            config,
            pages: Vec::new(),
            frames: BTreeMap::new(),
            queues: Mutex::new(PageQueues::new()),
            pmap,
            waitq: WaitQueue::new(),
            free_wanted: AtomicBool::new(false),
            counters: VmPageCounters::new(),
        }
    }

    // ========================================================================
    // Bootstrap
    // ========================================================================

    /// Register one physical frame on a freelist partition
    ///
    /// Only possible before the manager is shared.
    pub fn register_frame(&mut self, phys_addr: u64, freelist: usize) -> VmPageResult<()> {
        if !page_aligned(phys_addr) {
            return Err(VmPageError::UnalignedFrame(phys_addr));
        }
        if freelist >= VM_NFREELIST {
            return Err(VmPageError::FreelistOutOfRange {
                index: freelist,
                max: VM_NFREELIST,
            });
        }
        let frame = atop(phys_addr);
        if self.frames.contains_key(&frame) {
            return Err(VmPageError::FrameAlreadyRegistered(phys_addr));
        }

        let index = self.pages.len() as u32;
        let page = VmPage::new(index, phys_addr, freelist as u8);
        if !self.queues.get_mut().register(&page) {
            return Err(VmPageError::FreelistOutOfRange {
                index: freelist,
                max: VM_NFREELIST,
            });
        }
        self.pages.push(page);
        self.frames.insert(frame, index);
        Ok(())
    }

    /// Register every frame in `[start, end)`
    ///
    /// Returns the number of frames added.
    pub fn register_range(&mut self, start: u64, end: u64, freelist: usize) -> VmPageResult<usize> {
        for addr in [start, end] {
            if !page_aligned(addr) {
                return Err(VmPageError::UnalignedFrame(addr));
            }
        }
        let mut added = 0;
        for frame in atop(start)..atop(end) {
            self.register_frame(ptoa(frame), freelist)?;
            added += 1;
        }
        log::debug!(
            "vm_page: loaded {:#x}-{:#x} ({} frames) on freelist {}",
            start,
            end,
            added,
            freelist
        );
        Ok(added)
    }

    /// Size the lookup table for the registered frames
    ///
    /// Called once after the last registration, before pages are handed out.
    pub fn finish_bootstrap(&mut self) {
        assert!(
            self.pages.iter().all(|p| p.owner().is_none()),
            "vm_page_bootstrap: pages already entered in the lookup table"
        );
        let buckets = self.config.bucket_count(self.pages.len());
        self.hash = PageHashTable::new(buckets, self.config.hash_fn);

        let stats = self.stats();
        log::info!(
            "vm_page: {} frames ({} KiB), {} hash buckets, reserve {}, free by list {:?}",
            stats.total,
            stats.total * PAGE_SIZE / 1024,
            buckets,
            stats.reserve,
            stats.free_by_list
        );
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Configuration in use
    pub fn config(&self) -> &VmPageConfig {
        &self.config
    }

    /// Number of registered frames
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Page by arena index
    pub fn page(&self, index: u32) -> Option<&VmPage> {
        self.pages.get(index as usize)
    }

    /// Page backing a physical address
    pub fn phys_to_page(&self, phys_addr: u64) -> Option<&VmPage> {
        let index = *self.frames.get(&atop(phys_addr))?;
        self.page(index)
    }

    /// Queue state of a page
    pub fn queue_state(&self, page: &VmPage) -> PageQueueType {
        self.queues.lock().state(page)
    }

    /// Page counts by state
    pub fn stats(&self) -> VmPageStats {
        let queues = self.queues.lock();
        let free_lists = queues.free_lists();
        let mut free_by_list = [0; VM_NFREELIST];
        for (i, count) in free_by_list.iter_mut().enumerate() {
            *count = free_lists.len(i);
        }

        let total = self.pages.len();
        let free = free_lists.free_count() as usize;
        let active = queues.active_count();
        let inactive = queues.inactive_count();
        let wired = queues.wired_count() as usize;
        VmPageStats {
            total,
            free,
            free_by_list,
            active,
            inactive,
            wired,
            unqueued: total - free - active - inactive - wired,
            reserve: self.config.reserve_pages as usize,
            free_target: total * self.config.free_target_percent as usize / 100,
            free_min: total * self.config.free_min_percent as usize / 100,
        }
    }

    /// Free memory is below the target
    pub fn memory_low(&self) -> bool {
        let stats = self.stats();
        stats.free < stats.free_target
    }

    /// Free memory is below the critical minimum
    pub fn memory_critical(&self) -> bool {
        let stats = self.stats();
        stats.free < stats.free_min
    }

    /// Event counters
    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    // ========================================================================
    // Busy protocol
    // ========================================================================

    /// Take the busy flag without waiting
    ///
    /// Fails with [`VmPageError::Busy`] if someone else holds it.
    pub fn try_busy<'a>(&'a self, page: &'a VmPage) -> VmPageResult<BusyPage<'a>> {
        match self.busy_unless_free(page) {
            Some(busy) => busy,
            None => panic!("vm_page_busy: page {:#x} is free", page.phys_addr()),
        }
    }

    /// Like `try_busy`, but `None` for a free page
    fn busy_unless_free<'a>(&'a self, page: &'a VmPage) -> Option<VmPageResult<BusyPage<'a>>> {
        let queues = self.queues.lock();
        if queues.state(page) == PageQueueType::Free {
            return None;
        }
        if !page.try_set_busy() {
            return Some(Err(VmPageError::Busy));
        }
        drop(queues);
        Some(Ok(BusyPage {
            page,
            manager: self,
        }))
    }

    /// Sleep until `page` is no longer busy
    ///
    /// Consumes the object lock; it is released before sleeping. On return
    /// the caller must relock the object and redo its lookup, because the
    /// page may have been freed or moved while this thread slept.
    pub fn page_sleep(&self, object: VmObjectLock<'_>, page: &VmPage) {
        let ticket = self.waitq.assert_wait(event_from_addr(page));
        page.set_flags(PageFlags::WANTED);
        if !page.is_busy() {
            return;
        }
        drop(object);

        counter!(self.counters.busy_sleeps);
        log::trace!("vm_page: sleeping on busy page {:#x}", page.phys_addr());
        self.waitq.thread_block(ticket);
    }

    fn page_unbusy(&self, page: &VmPage) {
        if page.clear_busy() {
            self.waitq.thread_wakeup(event_from_addr(page));
        }
    }

    /// Ask for a page to be freed
    ///
    /// An idle page is freed at once. A busy page is marked released and
    /// freed by its busy holder in [`BusyPage::wakeup_done`]. Returns whether
    /// the page was freed now.
    pub fn page_release(&self, object: &mut VmObjectLock<'_>, page: &VmPage) -> bool {
        match self.try_busy(page) {
            Ok(busy) => {
                self.page_free(object, busy);
                true
            }
            Err(_) => {
                page.set_flags(PageFlags::RELEASED);
                // The holder may have finished in between, freeing the page
                // itself or leaving it idle.
                match self.busy_unless_free(page) {
                    None => true,
                    Some(Ok(busy)) if busy.is_released() => {
                        self.page_free(object, busy);
                        true
                    }
                    Some(_) => false,
                }
            }
        }
    }

    // ========================================================================
    // Allocation
    // ========================================================================

    /// Allocate an anonymous page, preferring partition `freelist_hint`
    pub fn alloc_page(&self, freelist_hint: usize) -> VmPageResult<BusyPage<'_>> {
        self.alloc_page_strat(Strategy::Fallback(freelist_hint), AllocFlags::empty())
    }

    /// Allocate an anonymous page
    ///
    /// The page comes back busy, unqueued, unwired and without an owner.
    pub fn alloc_page_strat(
        &self,
        strategy: Strategy,
        flags: AllocFlags,
    ) -> VmPageResult<BusyPage<'_>> {
        let use_reserve = flags.contains(AllocFlags::USE_RESERVE);
        let keep = if use_reserve { 0 } else { self.config.reserve_pages };

        let (page, remaining) = {
            let mut queues = self.queues.lock();
            let Some(index) = queues.alloc(strategy, keep) else {
                drop(queues);
                counter!(self.counters.alloc_failures);
                log::warn!("vm_page_alloc: out of memory ({:?})", strategy);
                return Err(VmPageError::OutOfMemory);
            };
            let page = &self.pages[index as usize];
            assert!(
                page.try_set_busy(),
                "vm_page_alloc: free page {:#x} was busy",
                page.phys_addr()
            );
            (page, queues.free_lists().free_count())
        };

        counter!(self.counters.allocs);
        if use_reserve && remaining < self.config.reserve_pages {
            counter!(self.counters.reserve_allocs);
            log::debug!("vm_page_alloc: page {:#x} from reserve", page.phys_addr());
        }

        if flags.contains(AllocFlags::ZERO) {
            if page.is_zeroed() {
                counter!(self.counters.zero_hits);
                page.set_clean();
            } else {
                self.zero_frame(page);
            }
        }
        page.clear_flags(PageFlags::ZERO);

        log::trace!("vm_page_alloc: page {:#x}", page.phys_addr());
        Ok(BusyPage {
            page,
            manager: self,
        })
    }

    /// Allocate a page and enter it at `(object, offset)`
    pub fn page_alloc_for<'a>(
        &'a self,
        object: &mut VmObjectLock<'_>,
        offset: u64,
    ) -> VmPageResult<BusyPage<'a>> {
        self.page_alloc_for_strat(object, offset, Strategy::Normal, AllocFlags::empty())
    }

    /// Allocate a page with explicit strategy and flags and enter it at
    /// `(object, offset)`
    pub fn page_alloc_for_strat<'a>(
        &'a self,
        object: &mut VmObjectLock<'_>,
        offset: u64,
        strategy: Strategy,
        flags: AllocFlags,
    ) -> VmPageResult<BusyPage<'a>> {
        let page = self.alloc_page_strat(strategy, flags)?;
        self.page_insert(object, &page, offset);
        Ok(page)
    }

    /// Allocate `npages` physically contiguous frames in `[low, high)`
    ///
    /// The first frame is aligned to `align` bytes (0 means page
    /// alignment). All pages come back busy and anonymous.
    pub fn alloc_contig(
        &self,
        npages: usize,
        low: u64,
        high: u64,
        align: u64,
    ) -> VmPageResult<Vec<BusyPage<'_>>> {
        if npages == 0 {
            return Ok(Vec::new());
        }
        let align = align.max(PAGE_SIZE as u64);
        assert!(
            align.is_power_of_two(),
            "vm_page_alloc_contig: alignment {:#x} not a power of two",
            align
        );

        let mut queues = self.queues.lock();
        let free = queues.free_lists().free_count() as usize;
        if free < npages + self.config.reserve_pages as usize {
            drop(queues);
            counter!(self.counters.alloc_failures);
            return Err(VmPageError::OutOfMemory);
        }

        let run_free = |queues: &PageQueues, first: u64| {
            (first..first + npages as u64).all(|frame| {
                self.frames
                    .get(&frame)
                    .is_some_and(|&i| queues.state(&self.pages[i as usize]) == PageQueueType::Free)
            })
        };
        let start = self
            .frames
            .range(atop(round_page(low))..)
            .map(|(&frame, _)| frame)
            .filter(|&frame| ptoa(frame) % align == 0)
            .take_while(|&frame| ptoa(frame + npages as u64) <= high)
            .find(|&frame| run_free(&*queues, frame));

        let Some(start) = start else {
            drop(queues);
            counter!(self.counters.alloc_failures);
            log::warn!(
                "vm_page_alloc_contig: no run of {} pages in {:#x}-{:#x} aligned {:#x}",
                npages,
                low,
                high,
                align
            );
            return Err(VmPageError::OutOfMemory);
        };

        let mut run = Vec::with_capacity(npages);
        for frame in start..start + npages as u64 {
            let page = &self.pages[self.frames[&frame] as usize];
            queues.alloc_specific(page);
            assert!(page.try_set_busy());
            page.clear_flags(PageFlags::ZERO);
            run.push(BusyPage {
                page,
                manager: self,
            });
        }
        drop(queues);

        self.counters.allocs.add(npages as u64);
        log::debug!(
            "vm_page_alloc_contig: {} pages at {:#x}",
            npages,
            ptoa(start)
        );
        Ok(run)
    }

    /// Free pages from [`Self::alloc_contig`]
    pub fn free_contig(&self, pages: Vec<BusyPage<'_>>) {
        for page in pages {
            self.page_free_anonymous(page);
        }
    }

    /// Sleep until a page has been freed
    ///
    /// For callers that got [`VmPageError::OutOfMemory`]; retry the
    /// allocation afterwards, it may still fail.
    pub fn page_wait(&self) {
        let ticket = self.waitq.assert_wait(event_from_addr(&self.free_wanted));
        self.free_wanted.store(true, Ordering::SeqCst);
        if self.queues.lock().free_lists().free_count() > self.config.reserve_pages {
            return;
        }
        counter!(self.counters.page_waits);
        log::debug!("vm_page_wait: waiting for free pages");
        self.waitq.thread_block(ticket);
    }

    // ========================================================================
    // Freeing
    // ========================================================================

    /// Free a page owned by `object`
    ///
    /// Removes it from its paging queue and the lookup table and returns it
    /// to its freelist partition. The page must not be wired.
    pub fn page_free(&self, object: &mut VmObjectLock<'_>, page: BusyPage<'_>) {
        Self::assert_unwired(&page);
        if let Some(owner) = page.owner() {
            assert_eq!(
                owner.object,
                object.id(),
                "vm_page_free: page {:#x} not owned by the locked object",
                page.phys_addr()
            );
            self.page_remove(object, &page);
        }
        self.release(page);
    }

    /// Free a page that has no owner
    pub fn page_free_anonymous(&self, page: BusyPage<'_>) {
        assert!(
            page.owner().is_none(),
            "vm_page_free: page {:#x} still owned by {:?}",
            page.phys_addr(),
            page.owner()
        );
        self.release(page);
    }

    fn assert_unwired(page: &VmPage) {
        assert!(
            !page.is_wired(),
            "vm_page_free: page {:#x} is wired",
            page.phys_addr()
        );
    }

    fn release(&self, page: BusyPage<'_>) {
        self.release_page(page.leak());
    }

    /// Return a busy, anonymous page to its freelist
    fn release_page(&self, page: &VmPage) {
        Self::assert_unwired(page);
        let wanted = {
            let mut queues = self.queues.lock();
            queues.dequeue(page);
            let wanted = page.flags().contains(PageFlags::WANTED);
            page.reinit();
            queues.free(page);
            wanted
        };

        counter!(self.counters.frees);
        log::trace!("vm_page_free: page {:#x}", page.phys_addr());

        if wanted {
            self.waitq.thread_wakeup(event_from_addr(page));
        }
        if self.free_wanted.swap(false, Ordering::SeqCst) {
            self.waitq.thread_wakeup(event_from_addr(&self.free_wanted));
        }
    }

    // ========================================================================
    // Lookup table
    // ========================================================================

    /// Find the page at `(object, offset)`
    ///
    /// Never allocates. The page returned may be busy.
    pub fn page_lookup(&self, object: &VmObjectLock<'_>, offset: u64) -> Option<&VmPage> {
        let found = self.hash.lookup(&self.pages, object.id(), offset);
        if found.is_some() {
            counter!(self.counters.lookup_hits);
        } else {
            counter!(self.counters.lookup_misses);
        }
        found
    }

    /// Enter an anonymous busy page at `(object, offset)`
    pub fn page_insert(&self, object: &mut VmObjectLock<'_>, page: &BusyPage<'_>, offset: u64) {
        self.hash.insert(&self.pages, page, object.id(), offset);
        object.page_inserted();
    }

    /// Remove a busy page from its object, leaving it anonymous
    pub fn page_remove(&self, object: &mut VmObjectLock<'_>, page: &BusyPage<'_>) -> PageOwner {
        assert_eq!(
            page.object(),
            Some(object.id()),
            "vm_page_remove: page {:#x} not owned by the locked object",
            page.phys_addr()
        );
        let owner = self.hash.remove(page);
        object.page_removed();
        owner
    }

    /// Move a busy page to `(new, offset)`
    ///
    /// `old` is the locked current owner, or `None` if the page is
    /// anonymous or already belongs to `new`.
    pub fn page_rename(
        &self,
        page: &BusyPage<'_>,
        old: Option<&mut VmObjectLock<'_>>,
        new: &mut VmObjectLock<'_>,
        offset: u64,
    ) {
        match (page.owner(), old) {
            (None, None) => {}
            (Some(owner), Some(old)) if owner.object == old.id() => {
                self.page_remove(old, page);
            }
            (Some(owner), None) if owner.object == new.id() => {
                self.page_remove(new, page);
            }
            (owner, _) => panic!(
                "vm_page_rename: page {:#x} owner {:?} is not the locked object",
                page.phys_addr(),
                owner
            ),
        }
        self.page_insert(new, page, offset);
        log::debug!(
            "vm_page_rename: page {:#x} -> {:?} offset {:#x}",
            page.phys_addr(),
            new.id(),
            offset
        );
    }

    /// Pages owned by an object, in arena order
    ///
    /// Walks every descriptor; meant for audits and teardown.
    pub fn object_pages(&self, object: &VmObjectLock<'_>) -> Vec<&VmPage> {
        self.pages
            .iter()
            .filter(|p| p.object() == Some(object.id()))
            .collect()
    }

    // ========================================================================
    // Paging queues
    // ========================================================================

    /// Move a page to the tail of the active queue
    ///
    /// No-op if it is already active or wired. Returns whether it moved.
    pub fn activate(&self, page: &VmPage) -> bool {
        self.queues.lock().activate(page)
    }

    /// Move a page to the tail of the inactive queue
    ///
    /// No-op if it is already inactive or wired. Returns whether it moved.
    pub fn deactivate(&self, page: &VmPage) -> bool {
        self.queues.lock().deactivate(page)
    }

    /// Take a page off the active or inactive queue
    pub fn dequeue(&self, page: &VmPage) {
        self.queues.lock().dequeue(page);
    }

    /// Wire a page; it leaves the paging queues until the last unwire
    pub fn page_wire(&self, page: &VmPage) {
        self.queues.lock().wire(page);
    }

    /// Drop one wiring; the last one puts the page on the active queue
    pub fn page_unwire(&self, page: &VmPage) {
        self.queues.lock().unwire(page);
    }

    /// Copy of the active or inactive queue, head to tail
    pub fn queue_snapshot(&self, queue: PageQueueType) -> Vec<&VmPage> {
        let queues = self.queues.lock();
        let pages = queues.iter(queue).map(|i| &self.pages[i as usize]).collect();
        pages
    }

    /// Walk the active or inactive queue head to tail
    ///
    /// The page-queue lock is taken only inside each step, so the caller
    /// may activate, deactivate, wire or free the pages it is handed. See
    /// [`QueueCursor`].
    ///
    /// A page handed out is only a candidate: other threads may free or
    /// move it before the caller acts. Lock the owning object and check
    /// with [`Self::page_lookup`] (or take busy on a page known to be
    /// allocated) before using it.
    pub fn queue_cursor(&self, queue: PageQueueType) -> QueueCursor<'_> {
        assert!(
            matches!(queue, PageQueueType::Active | PageQueueType::Inactive),
            "vm_page_queue_cursor: {:?} is not a paging queue",
            queue
        );
        QueueCursor {
            manager: self,
            queue,
            pending: None,
            started: false,
        }
    }

    // ========================================================================
    // Contents
    // ========================================================================

    fn zero_frame(&self, page: &VmPage) {
        self.pmap.zero_frame(page.phys_addr());
        page.set_clean();
        counter!(self.counters.zero_fills);
    }

    /// Zero the frame of a busy page; the page becomes clean
    pub fn page_zero(&self, page: &BusyPage<'_>) {
        self.zero_frame(page);
    }

    /// Copy `src`'s frame into busy page `dst`; `dst` becomes dirty
    ///
    /// The caller keeps `src` stable for the duration, normally by holding
    /// it busy as well.
    pub fn page_copy(&self, src: &VmPage, dst: &BusyPage<'_>) {
        assert!(
            src.index() != dst.index(),
            "vm_page_copy: page {:#x} copied onto itself",
            src.phys_addr()
        );
        self.pmap.copy_frame(src.phys_addr(), dst.phys_addr());
        dst.set_dirty();
        counter!(self.counters.copies);
    }

    // ========================================================================
    // Consistency
    // ========================================================================

    /// Assert every invariant of the arena, queues and lookup table
    ///
    /// Walks everything under the page-queue lock; for tests and debugging.
    pub fn check_invariants(&self) {
        let queues = self.queues.lock();
        queues.check(&self.pages);
        for page in &self.pages {
            if queues.state(page) == PageQueueType::Free {
                assert!(page.owner().is_none(), "free page {:#x} has an owner", page.phys_addr());
                assert!(!page.is_busy(), "free page {:#x} is busy", page.phys_addr());
                assert!(!page.is_tabled(), "free page {:#x} is tabled", page.phys_addr());
            }
        }
        drop(queues);
        self.hash.check(&self.pages);
    }
}

// ============================================================================
// Queue Cursor
// ============================================================================

/// Head-to-tail walk over a paging queue
///
/// The successor of each page is remembered when the page is handed out,
/// so moving the current page elsewhere does not end the walk. The walk
/// ends when the remembered successor has itself left the queue.
pub struct QueueCursor<'a> {
    manager: &'a PageManager,
    queue: PageQueueType,
    pending: Option<QueueIndex>,
    started: bool,
}

impl<'a> Iterator for QueueCursor<'a> {
    type Item = &'a VmPage;

    fn next(&mut self) -> Option<Self::Item> {
        let queues = self.manager.queues.lock();
        let index = if self.started {
            let index = self.pending?;
            let page = &self.manager.pages[index as usize];
            if queues.state(page) != self.queue {
                self.pending = None;
                return None;
            }
            index
        } else {
            self.started = true;
            queues.first(self.queue)?
        };
        self.pending = queues.next_on(self.queue, index);
        Some(&self.manager.pages[index as usize])
    }
}
