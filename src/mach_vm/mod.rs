//! Mach Virtual Memory Subsystem - Resident Pages
//!
//! Based on Mach4 vm/ subsystem.
//! Provides physical page management:
//! - vm_page: Page descriptors and flags
//! - vm_object: Owning objects and their locks
//! - vm_freelist: Partitioned free page lists
//! - vm_page_hash: Object/offset lookup table
//! - vm_page_queue: Active, inactive and wired page queues
//! - vm_resident: The page manager tying these together
//! - pmap: Frame zero/copy collaborator

pub mod pmap;
pub mod vm_freelist;
pub mod vm_object;
pub mod vm_page;
pub mod vm_page_hash;
pub mod vm_page_queue;
pub mod vm_resident;

pub use pmap::{DirectMapPmap, PhysOps};
pub use vm_freelist::{Strategy, VM_FREELIST_DEFAULT, VM_NFREELIST};
pub use vm_object::{VmObject, VmObjectId, VmObjectLock};
pub use vm_page::{PageFlags, PageOwner, PageQueueType, VmPage, PAGE_SIZE};
pub use vm_resident::{AllocFlags, BusyPage, PageManager, QueueCursor, VmPageStats};
