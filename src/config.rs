//! Page manager tunables

use crate::mach_vm::vm_object::VmObjectId;
use crate::mach_vm::vm_page::PAGE_SHIFT;

/// Bucket hash for the object/offset lookup table
///
/// The table masks the result, so the hash need not be bounded.
pub type PageHashFn = fn(VmObjectId, u64) -> usize;

/// Default bucket hash: `object + atop(offset)`, as in Mach's vm_page_hash
pub fn mach_page_hash(object: VmObjectId, offset: u64) -> usize {
    object.0.wrapping_add(offset >> PAGE_SHIFT) as usize
}

/// Smallest lookup table
pub const MIN_HASH_BUCKETS: usize = 16;

/// Page manager configuration
#[derive(Debug, Clone, Copy)]
pub struct VmPageConfig {
    /// Lookup table buckets; 0 derives the count from the frame count
    pub hash_buckets: usize,
    /// Bucket hash function
    pub hash_fn: PageHashFn,
    /// Pages only `USE_RESERVE` allocations may take
    pub reserve_pages: u32,
    /// Free memory below this percentage of all frames is "low"
    pub free_target_percent: u32,
    /// Free memory below this percentage of all frames is "critical"
    pub free_min_percent: u32,
}

impl VmPageConfig {
    pub fn with_hash_buckets(mut self, buckets: usize) -> Self {
        self.hash_buckets = buckets;
        self
    }

    pub fn with_hash_fn(mut self, hash_fn: PageHashFn) -> Self {
        self.hash_fn = hash_fn;
        self
    }

    pub fn with_reserve_pages(mut self, pages: u32) -> Self {
        self.reserve_pages = pages;
        self
    }

    pub fn with_free_thresholds(mut self, target_percent: u32, min_percent: u32) -> Self {
        self.free_target_percent = target_percent;
        self.free_min_percent = min_percent;
        self
    }

    /// Bucket count actually used for `frames` descriptors
    ///
    /// Always a power of two so the hash can be masked.
    pub fn bucket_count(&self, frames: usize) -> usize {
        let wanted = if self.hash_buckets == 0 {
            frames / 2
        } else {
            self.hash_buckets
        };
        wanted.max(MIN_HASH_BUCKETS).next_power_of_two()
    }
}

impl Default for VmPageConfig {
    fn default() -> Self {
        Self {
            hash_buckets: 0,
            hash_fn: mach_page_hash,
            reserve_pages: 0,
            free_target_percent: 5,
            free_min_percent: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_count() {
        let config = VmPageConfig::default();
        assert_eq!(config.bucket_count(0), MIN_HASH_BUCKETS);
        assert_eq!(config.bucket_count(1000), 512);

        let config = config.with_hash_buckets(100);
        assert_eq!(config.bucket_count(1000), 128);
    }

    #[test]
    fn test_mach_page_hash() {
        assert_eq!(mach_page_hash(VmObjectId(3), 0x2000), 5);
        assert_eq!(mach_page_hash(VmObjectId(3), 0x2fff), 5);
    }
}
