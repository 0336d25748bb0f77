//! Mach VM Page - Resident page management for a Mach-style kernel
//!
//! This crate tracks every physical frame through its life: partitioned
//! free lists, the object/offset lookup table, the active/inactive/wired
//! paging queues and the busy protocol that serializes page contents.

#![no_std]
// Kernel-appropriate clippy configuration
// Many kernel types have specialized initialization that doesn't fit Default
#![allow(clippy::new_without_default)]
// Page counts are kept as u32 and widened at the API edge
#![allow(clippy::unnecessary_cast)]

// Standard library replacement for no_std
extern crate alloc;

// Condvar-backed sleeps
#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod config;
pub mod error;
pub mod kern;
pub mod mach_vm;

pub use config::{mach_page_hash, PageHashFn, VmPageConfig};
pub use error::{VmPageError, VmPageResult};
pub use mach_vm::{
    AllocFlags, BusyPage, PageFlags, PageManager, PageQueueType, PhysOps, Strategy, VmObject,
    VmObjectId, VmObjectLock, VmPage, VmPageStats, PAGE_SIZE,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = "mach_vm_page";
