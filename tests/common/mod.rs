//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use mach_vm_page::{PageManager, PhysOps, VmPageConfig, PAGE_SIZE};

/// Byte a frame reads as before anything writes it
pub const GARBAGE: u8 = 0xEE;

/// Pmap that models each frame as a single repeated byte
#[derive(Debug, Default)]
pub struct PatternPmap {
    frames: Mutex<HashMap<u64, u8>>,
}

impl PatternPmap {
    /// Write `byte` over the whole frame
    pub fn fill(&self, phys_addr: u64, byte: u8) {
        self.frames.lock().unwrap().insert(phys_addr, byte);
    }

    /// Byte the frame is filled with
    pub fn read(&self, phys_addr: u64) -> u8 {
        self.frames
            .lock()
            .unwrap()
            .get(&phys_addr)
            .copied()
            .unwrap_or(GARBAGE)
    }
}

impl PhysOps for PatternPmap {
    fn zero_frame(&self, phys_addr: u64) {
        self.fill(phys_addr, 0);
    }

    fn copy_frame(&self, src: u64, dst: u64) {
        let byte = self.read(src);
        self.fill(dst, byte);
    }
}

/// Base of the first test frame
pub const RAM_BASE: u64 = 0x8000_0000;

/// Manager with `frames` frames split evenly over `freelists` partitions
pub fn boot(frames: u64, freelists: u64, config: VmPageConfig) -> (PageManager, Arc<PatternPmap>) {
    let pmap = Arc::new(PatternPmap::default());
    let mut mgr = PageManager::new(config, pmap.clone());
    let per_list = frames / freelists;
    for list in 0..freelists {
        let start = RAM_BASE + list * per_list * PAGE_SIZE as u64;
        mgr.register_range(start, start + per_list * PAGE_SIZE as u64, list as usize)
            .unwrap();
    }
    mgr.finish_bootstrap();
    (mgr, pmap)
}
