//! VM Object - Page Owner Handle
//!
//! Based on Mach4 vm/vm_object.h/c
//!
//! The resident page manager only needs three things from an object: a
//! stable identity for the lookup key, a lock that serializes lookup,
//! insert and remove for that object's pages, and the object's count of
//! resident pages. Everything else about objects (pagers, shadow chains,
//! copy strategies) lives above this layer.
//!
//! Page manager calls that touch an object's pages take a [`VmObjectLock`],
//! the guard returned by [`VmObject::lock`], as proof the caller holds the
//! object lock.

use core::sync::atomic::{AtomicU64, Ordering};
use spin::{Mutex, MutexGuard};

// ============================================================================
// VM Object Types
// ============================================================================

/// VM Object ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VmObjectId(pub u64);

impl VmObjectId {
    /// Null object ID
    pub const NULL: Self = Self(0);

    /// Allocate a fresh, never-reused object ID
    pub fn allocate() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Page accounting protected by the object lock
#[derive(Debug, Default)]
pub struct ObjectPages {
    /// Pages currently owned by the object
    resident_page_count: u32,
}

// ============================================================================
// VM Object Structure
// ============================================================================

/// VM Object - owner of resident pages
#[derive(Debug)]
pub struct VmObject {
    /// Object ID
    id: VmObjectId,

    /// Object lock and the state it protects
    pages: Mutex<ObjectPages>,
}

impl VmObject {
    /// Create a new VM object
    pub fn new(id: VmObjectId) -> Self {
        Self {
            id,
            pages: Mutex::new(ObjectPages::default()),
        }
    }

    /// Create an object with a freshly allocated ID
    pub fn anonymous() -> Self {
        Self::new(VmObjectId::allocate())
    }

    /// Object ID
    pub fn id(&self) -> VmObjectId {
        self.id
    }

    /// Acquire the object lock
    pub fn lock(&self) -> VmObjectLock<'_> {
        VmObjectLock {
            id: self.id,
            pages: self.pages.lock(),
        }
    }

    /// Try to acquire the object lock without spinning
    pub fn try_lock(&self) -> Option<VmObjectLock<'_>> {
        self.pages.try_lock().map(|pages| VmObjectLock { id: self.id, pages })
    }

    /// Resident page count (takes the object lock)
    pub fn resident_page_count(&self) -> u32 {
        self.lock().resident_page_count()
    }
}

// ============================================================================
// Object Lock Guard
// ============================================================================

/// Held object lock
///
/// Dropping the guard releases the lock.
pub struct VmObjectLock<'a> {
    id: VmObjectId,
    pages: MutexGuard<'a, ObjectPages>,
}

impl VmObjectLock<'_> {
    /// ID of the locked object
    pub fn id(&self) -> VmObjectId {
        self.id
    }

    /// Pages currently owned by the object
    pub fn resident_page_count(&self) -> u32 {
        self.pages.resident_page_count
    }

    pub(crate) fn page_inserted(&mut self) {
        self.pages.resident_page_count += 1;
    }

    pub(crate) fn page_removed(&mut self) {
        assert!(
            self.pages.resident_page_count > 0,
            "vm_object {:?}: resident page count underflow",
            self.id
        );
        self.pages.resident_page_count -= 1;
    }
}

impl core::fmt::Debug for VmObjectLock<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("VmObjectLock")
            .field("id", &self.id)
            .field("resident_page_count", &self.pages.resident_page_count)
            .finish()
    }
}
