//! Physical Map (pmap) - Frame Operations
//!
//! Based on Mach4 vm/pmap.h (pmap_zero_page, pmap_copy_page)
//!
//! The resident page manager never touches physical memory itself. The two
//! operations it needs are delegated to the architecture pmap layer through
//! [`PhysOps`]; both are synchronous and cannot fail.

/// Frame-level operations supplied by the architecture pmap
pub trait PhysOps: Send + Sync {
    /// Zero the frame at `phys_addr`
    fn zero_frame(&self, phys_addr: u64);

    /// Copy the frame at `src` into the frame at `dst`
    fn copy_frame(&self, src: u64, dst: u64);
}

/// Pmap for frames reachable through a fixed linear mapping
///
/// Physical address `pa` is accessible at virtual address `base + pa`, as
/// with the direct maps most 64-bit kernels set up at boot.
#[derive(Debug, Clone, Copy)]
pub struct DirectMapPmap {
    base: usize,
}

impl DirectMapPmap {
    /// Create a pmap over a direct map starting at `base`
    ///
    /// # Safety
    ///
    /// Every frame later handed to the page manager must be mapped
    /// read-write at `base + phys_addr` for the lifetime of this value.
    pub const unsafe fn new(base: usize) -> Self {
        Self { base }
    }

    fn frame_ptr(&self, phys_addr: u64) -> *mut u8 {
        (self.base + phys_addr as usize) as *mut u8
    }
}

impl PhysOps for DirectMapPmap {
    fn zero_frame(&self, phys_addr: u64) {
        // SAFETY: the constructor contract guarantees the frame is mapped.
        unsafe {
            core::ptr::write_bytes(self.frame_ptr(phys_addr), 0, super::vm_page::PAGE_SIZE);
        }
    }

    fn copy_frame(&self, src: u64, dst: u64) {
        // SAFETY: both frames are mapped; distinct frames never overlap.
        unsafe {
            core::ptr::copy_nonoverlapping(
                self.frame_ptr(src),
                self.frame_ptr(dst),
                super::vm_page::PAGE_SIZE,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mach_vm::vm_page::PAGE_SIZE;
    use alloc::vec;

    #[test]
    fn test_direct_map_zero_and_copy() {
        // Two "frames" at physical 0 and PAGE_SIZE inside one buffer
        let mut memory = vec![0xAAu8; 2 * PAGE_SIZE];
        let pmap = unsafe { DirectMapPmap::new(memory.as_mut_ptr() as usize) };

        memory[..PAGE_SIZE].fill(0x5C);
        pmap.copy_frame(0, PAGE_SIZE as u64);
        assert!(memory[PAGE_SIZE..].iter().all(|&b| b == 0x5C));

        pmap.zero_frame(0);
        assert!(memory[..PAGE_SIZE].iter().all(|&b| b == 0));
        assert!(memory[PAGE_SIZE..].iter().all(|&b| b == 0x5C));
    }
}
