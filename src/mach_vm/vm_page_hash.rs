//! Object/Offset Lookup Table
//!
//! Based on Mach4 vm/vm_resident.c (vm_page_bucket, vm_page_insert,
//! vm_page_remove, vm_page_lookup)
//!
//! Maps `(object, offset)` to the resident page backing it. Buckets are
//! chosen by an externally supplied hash masked to the table size and each
//! bucket has its own spin lock, so unrelated objects rarely contend.
//! Callers additionally hold the owning object's lock, which serializes all
//! operations on one object's keys.
//!
//! A bucket entry and the page's back-reference are published together
//! under the bucket lock: a concurrent lookup sees either no entry or a
//! page whose owner is already set.

use alloc::vec::Vec;
use spin::Mutex;

use crate::config::PageHashFn;
use crate::mach_vm::vm_object::VmObjectId;
use crate::mach_vm::vm_page::{PageFlags, PageOwner, VmPage};

/// Lookup table from object/offset to page
pub struct PageHashTable {
    /// Buckets of page arena indices
    buckets: Vec<Mutex<Vec<u32>>>,
    /// `buckets.len() - 1`
    mask: usize,
    /// Bucket hash
    hash_fn: PageHashFn,
}

impl core::fmt::Debug for PageHashTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PageHashTable")
            .field("buckets", &self.buckets.len())
            .finish()
    }
}

impl PageHashTable {
    /// Create a table with `buckets` buckets (a power of two)
    pub fn new(buckets: usize, hash_fn: PageHashFn) -> Self {
        debug_assert!(buckets.is_power_of_two());
        Self {
            buckets: (0..buckets).map(|_| Mutex::new(Vec::new())).collect(),
            mask: buckets - 1,
            hash_fn,
        }
    }

    /// Number of buckets
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    fn bucket(&self, object: VmObjectId, offset: u64) -> &Mutex<Vec<u32>> {
        &self.buckets[(self.hash_fn)(object, offset) & self.mask]
    }

    /// Find the page at `(object, offset)`
    pub fn lookup<'a>(
        &self,
        pages: &'a [VmPage],
        object: VmObjectId,
        offset: u64,
    ) -> Option<&'a VmPage> {
        let key = PageOwner { object, offset };
        let bucket = self.bucket(object, offset).lock();
        bucket
            .iter()
            .map(|&i| &pages[i as usize])
            .find(|page| page.owner() == Some(key))
    }

    /// Enter `page` under `(object, offset)` and set its owner
    ///
    /// The page must be busy and anonymous, and the key must be unused.
    pub fn insert(&self, pages: &[VmPage], page: &VmPage, object: VmObjectId, offset: u64) {
        assert!(
            page.is_busy(),
            "vm_page_insert: page {:#x} not busy",
            page.phys_addr()
        );
        assert!(
            page.owner().is_none() && !page.is_tabled(),
            "vm_page_insert: page {:#x} already owned by {:?}",
            page.phys_addr(),
            page.owner()
        );

        let key = PageOwner { object, offset };
        let mut bucket = self.bucket(object, offset).lock();
        if let Some(&dup) = bucket.iter().find(|&&i| pages[i as usize].owner() == Some(key)) {
            panic!(
                "vm_page_insert: {:?} offset {:#x} already maps page {:#x}",
                object,
                offset,
                pages[dup as usize].phys_addr()
            );
        }

        page.set_owner(object, offset);
        page.set_flags(PageFlags::TABLED);
        bucket.push(page.index());
    }

    /// Remove `page` from the table and clear its owner
    ///
    /// Returns the key the page was entered under.
    pub fn remove(&self, page: &VmPage) -> PageOwner {
        let Some(owner) = page.owner() else {
            panic!("vm_page_remove: page {:#x} has no owner", page.phys_addr());
        };

        let mut bucket = self.bucket(owner.object, owner.offset).lock();
        let Some(pos) = bucket.iter().position(|&i| i == page.index()) else {
            panic!(
                "vm_page_remove: page {:#x} missing from bucket for {:?}",
                page.phys_addr(),
                owner
            );
        };
        bucket.swap_remove(pos);
        page.clear_flags(PageFlags::TABLED);
        page.clear_owner();
        owner
    }

    /// Assert that the table holds exactly the owned pages
    pub fn check(&self, pages: &[VmPage]) {
        let mut entries = 0;
        for (b, bucket) in self.buckets.iter().enumerate() {
            for &i in bucket.lock().iter() {
                let page = &pages[i as usize];
                let Some(owner) = page.owner() else {
                    panic!("tabled page {:#x} has no owner", page.phys_addr());
                };
                assert!(page.is_tabled());
                assert_eq!(
                    (self.hash_fn)(owner.object, owner.offset) & self.mask,
                    b,
                    "page {:#x} in wrong bucket",
                    page.phys_addr()
                );
                entries += 1;
            }
        }
        let owned = pages.iter().filter(|p| p.owner().is_some()).count();
        assert_eq!(entries, owned, "lookup table entries vs owned pages");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::mach_page_hash;
    use alloc::vec::Vec;

    fn pages(n: u32) -> Vec<VmPage> {
        (0..n).map(|i| VmPage::new(i, 0x1000 * i as u64, 0)).collect()
    }

    fn busy(page: &VmPage) -> &VmPage {
        assert!(page.try_set_busy());
        page
    }

    #[test]
    fn test_insert_lookup_remove() {
        let pages = pages(4);
        let table = PageHashTable::new(16, mach_page_hash);
        let obj = VmObjectId(5);

        table.insert(&pages, busy(&pages[2]), obj, 0x3000);
        let found = table.lookup(&pages, obj, 0x3000).unwrap();
        assert_eq!(found.index(), 2);
        assert!(found.is_tabled());
        assert!(table.lookup(&pages, obj, 0x4000).is_none());
        assert!(table.lookup(&pages, VmObjectId(6), 0x3000).is_none());
        table.check(&pages);

        let owner = table.remove(&pages[2]);
        assert_eq!(owner, PageOwner { object: obj, offset: 0x3000 });
        assert!(table.lookup(&pages, obj, 0x3000).is_none());
        assert_eq!(pages[2].owner(), None);
        table.check(&pages);
    }

    #[test]
    fn test_colliding_keys() {
        // Every key lands in one bucket
        fn collide(_: VmObjectId, _: u64) -> usize {
            3
        }
        let pages = pages(3);
        let table = PageHashTable::new(16, collide);

        table.insert(&pages, busy(&pages[0]), VmObjectId(1), 0);
        table.insert(&pages, busy(&pages[1]), VmObjectId(2), 0);
        table.insert(&pages, busy(&pages[2]), VmObjectId(1), 0x1000);

        assert_eq!(table.lookup(&pages, VmObjectId(1), 0).unwrap().index(), 0);
        assert_eq!(table.lookup(&pages, VmObjectId(2), 0).unwrap().index(), 1);
        assert_eq!(table.lookup(&pages, VmObjectId(1), 0x1000).unwrap().index(), 2);

        table.remove(&pages[0]);
        assert_eq!(table.lookup(&pages, VmObjectId(1), 0x1000).unwrap().index(), 2);
        table.check(&pages);
    }

    #[test]
    #[should_panic(expected = "already maps")]
    fn test_duplicate_key_panics() {
        let pages = pages(2);
        let table = PageHashTable::new(16, mach_page_hash);
        table.insert(&pages, busy(&pages[0]), VmObjectId(1), 0);
        table.insert(&pages, busy(&pages[1]), VmObjectId(1), 0);
    }

    #[test]
    #[should_panic(expected = "not busy")]
    fn test_insert_requires_busy() {
        let pages = pages(1);
        let table = PageHashTable::new(16, mach_page_hash);
        table.insert(&pages, &pages[0], VmObjectId(1), 0);
    }

    #[test]
    #[should_panic(expected = "has no owner")]
    fn test_remove_anonymous_panics() {
        let pages = pages(1);
        let table = PageHashTable::new(16, mach_page_hash);
        table.remove(&pages[0]);
    }
}
