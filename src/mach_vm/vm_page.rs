//! VM Page - Resident Page Descriptor
//!
//! Based on Mach4 vm/vm_page.h
//!
//! One [`VmPage`] exists for every physical frame registered at boot. The
//! descriptors live in a fixed arena owned by the page manager and are
//! never deallocated; freeing a page only resets its state.
//!
//! Fields are protected by three different mechanisms:
//!
//! - queue membership and `wire_count` change only under the page-queue lock
//! - the owner back-reference changes only while the owning object is
//!   locked, and only together with the lookup table entry
//! - the content flags (busy, clean, zero) follow the busy protocol: the
//!   holder of BUSY owns the page contents

use bitflags::bitflags;
use core::sync::atomic::{AtomicU32, Ordering};
use spin::Mutex;

use crate::mach_vm::vm_object::VmObjectId;

// ============================================================================
// Constants
// ============================================================================

/// Page size (4KB on most platforms)
pub const PAGE_SIZE: usize = 4096;

/// Page shift (log2 of PAGE_SIZE)
pub const PAGE_SHIFT: usize = 12;

/// Page mask
pub const PAGE_MASK: u64 = PAGE_SIZE as u64 - 1;

/// Convert address to page number
pub const fn atop(addr: u64) -> u64 {
    addr >> PAGE_SHIFT
}

/// Convert page number to address
pub const fn ptoa(page: u64) -> u64 {
    page << PAGE_SHIFT
}

/// Round address down to page boundary
pub const fn trunc_page(addr: u64) -> u64 {
    addr & !PAGE_MASK
}

/// Round address up to page boundary
pub const fn round_page(addr: u64) -> u64 {
    (addr + PAGE_MASK) & !PAGE_MASK
}

/// Check page alignment
pub const fn page_aligned(addr: u64) -> bool {
    addr & PAGE_MASK == 0
}

// ============================================================================
// Page Flags
// ============================================================================

bitflags! {
    /// Page content flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u32 {
        /// Page is mid-transition; only the busy holder may touch it
        const BUSY     = 0x0001;
        /// Someone is sleeping until BUSY clears
        const WANTED   = 0x0002;
        /// Free the page when the busy holder is done
        const RELEASED = 0x0004;
        /// Contents match backing store
        const CLEAN    = 0x0008;
        /// Page is in the object/offset lookup table
        const TABLED   = 0x0010;
        /// Frame is known to contain only zeroes
        const ZERO     = 0x0020;
    }
}

// ============================================================================
// Page Queue State
// ============================================================================

/// Queue membership of a page
///
/// A page is in exactly one of these states. Wired pages are on no list;
/// the wired set is only counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageQueueType {
    /// Allocated or just removed from a queue, not yet placed
    Unqueued = 0,
    /// On its freelist partition
    Free = 1,
    /// On the active queue
    Active = 2,
    /// On the inactive queue
    Inactive = 3,
    /// Pinned by `wire_count > 0`
    Wired = 4,
}

/// Weak back-reference from a page to the object holding it
///
/// The object is authoritative for this relationship; clearing the owner
/// never affects the object's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageOwner {
    pub object: VmObjectId,
    pub offset: u64,
}

// ============================================================================
// VM Page Structure
// ============================================================================

/// Resident page descriptor
#[derive(Debug)]
pub struct VmPage {
    /// Index in the page arena
    index: u32,

    /// Physical address of the frame
    phys_addr: u64,

    /// Freelist partition, fixed at registration
    freelist: u8,

    /// Object and offset this page backs (if any)
    owner: Mutex<Option<PageOwner>>,

    /// Page flags
    flags: AtomicU32,

    /// Wire count; changed only under the page-queue lock
    wire_count: AtomicU32,
}

impl VmPage {
    /// Create a descriptor for a freshly discovered frame
    pub(crate) fn new(index: u32, phys_addr: u64, freelist: u8) -> Self {
        Self {
            index,
            phys_addr,
            freelist,
            owner: Mutex::new(None),
            flags: AtomicU32::new(0),
            wire_count: AtomicU32::new(0),
        }
    }

    /// Arena index of this descriptor
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Physical address of the frame
    pub fn phys_addr(&self) -> u64 {
        self.phys_addr
    }

    /// Physical frame number
    pub fn frame_number(&self) -> u64 {
        atop(self.phys_addr)
    }

    /// Freelist partition this frame returns to
    pub fn freelist(&self) -> usize {
        self.freelist as usize
    }

    /// Get page flags
    pub fn flags(&self) -> PageFlags {
        PageFlags::from_bits_truncate(self.flags.load(Ordering::SeqCst))
    }

    fn has_flags(&self, flags: PageFlags) -> bool {
        self.flags().contains(flags)
    }

    /// Set page flags, returning the previous flags
    pub(crate) fn set_flags(&self, flags: PageFlags) -> PageFlags {
        PageFlags::from_bits_truncate(self.flags.fetch_or(flags.bits(), Ordering::SeqCst))
    }

    /// Clear page flags, returning the previous flags
    pub(crate) fn clear_flags(&self, flags: PageFlags) -> PageFlags {
        PageFlags::from_bits_truncate(self.flags.fetch_and(!flags.bits(), Ordering::SeqCst))
    }

    pub fn is_busy(&self) -> bool {
        self.has_flags(PageFlags::BUSY)
    }

    pub fn is_released(&self) -> bool {
        self.has_flags(PageFlags::RELEASED)
    }

    pub fn is_tabled(&self) -> bool {
        self.has_flags(PageFlags::TABLED)
    }

    /// Check if contents match backing store
    pub fn is_clean(&self) -> bool {
        self.has_flags(PageFlags::CLEAN)
    }

    /// Check if contents differ from backing store
    pub fn is_dirty(&self) -> bool {
        !self.is_clean()
    }

    /// Mark page clean (e.g. after a pageout completed)
    pub fn set_clean(&self) {
        self.set_flags(PageFlags::CLEAN);
    }

    /// Mark page dirty
    pub fn set_dirty(&self) {
        self.clear_flags(PageFlags::CLEAN | PageFlags::ZERO);
    }

    /// Check if the frame is known to be zero-filled
    pub fn is_zeroed(&self) -> bool {
        self.has_flags(PageFlags::ZERO)
    }

    /// Record that the frame holds only zeroes
    ///
    /// Typically done right before freeing a page the caller cleared, so
    /// the next zero-fill allocation can skip pmap.
    pub fn mark_zeroed(&self) {
        self.set_flags(PageFlags::ZERO);
    }

    /// Try to take the busy flag
    pub(crate) fn try_set_busy(&self) -> bool {
        !self.set_flags(PageFlags::BUSY).contains(PageFlags::BUSY)
    }

    /// Drop the busy flag, returning whether anyone was waiting
    pub(crate) fn clear_busy(&self) -> bool {
        let prev = self.clear_flags(PageFlags::BUSY);
        debug_assert!(prev.contains(PageFlags::BUSY), "page was not busy");
        self.clear_flags(PageFlags::WANTED).contains(PageFlags::WANTED)
    }

    /// Check if page is wired
    pub fn is_wired(&self) -> bool {
        self.wire_count() > 0
    }

    /// Current wire count
    pub fn wire_count(&self) -> u32 {
        self.wire_count.load(Ordering::SeqCst)
    }

    /// Adjust the wire count; caller holds the page-queue lock
    pub(crate) fn store_wire_count(&self, count: u32) {
        self.wire_count.store(count, Ordering::SeqCst);
    }

    /// Object and offset this page backs
    pub fn owner(&self) -> Option<PageOwner> {
        *self.owner.lock()
    }

    /// Owning object, if any
    pub fn object(&self) -> Option<VmObjectId> {
        self.owner().map(|o| o.object)
    }

    /// Set the weak back-reference
    ///
    /// The caller holds the lock of `object`. Moving a wired page to a
    /// different owner without clearing the old one first is a violation.
    pub(crate) fn set_owner(&self, object: VmObjectId, offset: u64) {
        let mut owner = self.owner.lock();
        let new = PageOwner { object, offset };
        if let Some(prev) = *owner {
            assert!(
                prev == new || !self.is_wired(),
                "vm_page_set_owner: wired page {:#x} reassigned from {:?} to {:?}",
                self.phys_addr,
                prev,
                new
            );
        }
        *owner = Some(new);
    }

    /// Remove the back-reference
    ///
    /// The lookup table entry must already be gone.
    pub(crate) fn clear_owner(&self) {
        assert!(
            !self.is_tabled(),
            "vm_page_clear_owner: page {:#x} still in lookup table",
            self.phys_addr
        );
        *self.owner.lock() = None;
    }

    /// Reset to the anonymous free state, keeping a known-zero mark
    pub(crate) fn reinit(&self) {
        *self.owner.lock() = None;
        self.flags.fetch_and(PageFlags::ZERO.bits(), Ordering::SeqCst);
        self.wire_count.store(0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_flags() {
        let page = VmPage::new(0, 0x1000, 0);
        assert!(page.is_dirty());

        page.set_clean();
        assert!(page.is_clean());

        page.set_dirty();
        assert!(page.is_dirty());
    }

    #[test]
    fn test_busy_and_wanted() {
        let page = VmPage::new(0, 0x1000, 0);
        assert!(page.try_set_busy());
        assert!(!page.try_set_busy());

        page.set_flags(PageFlags::WANTED);
        assert!(page.clear_busy());
        assert!(!page.is_busy());

        assert!(page.try_set_busy());
        assert!(!page.clear_busy());
    }

    #[test]
    fn test_owner() {
        let page = VmPage::new(3, 0x4000, 1);
        assert_eq!(page.owner(), None);
        assert_eq!(page.freelist(), 1);
        assert_eq!(page.frame_number(), 4);

        page.set_owner(VmObjectId(7), 0x2000);
        assert_eq!(page.object(), Some(VmObjectId(7)));
        assert_eq!(page.owner().map(|o| o.offset), Some(0x2000));

        page.clear_owner();
        assert_eq!(page.owner(), None);
    }

    #[test]
    #[should_panic(expected = "reassigned")]
    fn test_wired_owner_reassignment_panics() {
        let page = VmPage::new(0, 0x1000, 0);
        page.set_owner(VmObjectId(1), 0);
        page.store_wire_count(1);
        page.set_owner(VmObjectId(2), 0);
    }

    #[test]
    #[should_panic(expected = "still in lookup table")]
    fn test_clear_owner_while_tabled_panics() {
        let page = VmPage::new(0, 0x1000, 0);
        page.set_owner(VmObjectId(1), 0);
        page.set_flags(PageFlags::TABLED);
        page.clear_owner();
    }

    #[test]
    fn test_reinit_keeps_zero() {
        let page = VmPage::new(0, 0x1000, 0);
        page.set_flags(PageFlags::BUSY | PageFlags::CLEAN | PageFlags::ZERO);
        page.set_owner(VmObjectId(1), 0);
        page.reinit();
        assert_eq!(page.flags(), PageFlags::ZERO);
        assert_eq!(page.owner(), None);
    }

    #[test]
    fn test_page_utils() {
        assert_eq!(atop(0x5000), 5);
        assert_eq!(ptoa(5), 0x5000);
        assert_eq!(trunc_page(0x5678), 0x5000);
        assert_eq!(round_page(0x5001), 0x6000);
        assert!(page_aligned(0x6000));
        assert!(!page_aligned(0x6001));
    }
}
