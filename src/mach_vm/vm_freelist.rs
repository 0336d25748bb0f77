//! Free Page Lists
//!
//! Based on Mach4 vm/vm_resident.c (vm_page_queue_free) and the
//! partitioned freelists of the BSD physical segment layer.
//!
//! Free frames are split into a small, fixed number of partitions chosen at
//! boot from the frame's physical address (for example DMA-capable low
//! memory versus everything else). A frame always returns to the partition
//! it was registered in.
//!
//! Registration appends to the tail so boot order is preserved; frees push
//! at the head, so an allocate/free pair leaves a partition exactly as it
//! found it. Allocation always takes the head.
//!
//! All of this is protected by the page-queue lock; see `vm_page_queue`.

use heapless::Vec as FixedVec;

use crate::kern::queue::{QueueChain, QueueHead, QueueIndex};

/// Maximum number of freelist partitions
pub const VM_NFREELIST: usize = 4;

/// Default partition for frames with no placement constraint
pub const VM_FREELIST_DEFAULT: usize = 0;

/// Which partitions an allocation may draw from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Lowest-numbered non-empty partition
    Normal,
    /// Only the given partition
    Only(usize),
    /// The given partition first, then lowest-numbered non-empty
    Fallback(usize),
}

/// The set of freelist partitions
#[derive(Debug, Default)]
pub struct FreeLists {
    lists: FixedVec<QueueHead, VM_NFREELIST>,
    free_count: u32,
}

impl FreeLists {
    /// Create with no partitions
    pub const fn new() -> Self {
        Self {
            lists: FixedVec::new(),
            free_count: 0,
        }
    }

    /// Number of partitions that have ever held a frame
    pub fn partitions(&self) -> usize {
        self.lists.len()
    }

    /// Make sure partition `freelist` exists
    ///
    /// Returns false if it is beyond [`VM_NFREELIST`].
    pub fn ensure_partition(&mut self, freelist: usize) -> bool {
        while self.lists.len() <= freelist {
            if self.lists.push(QueueHead::new()).is_err() {
                return false;
            }
        }
        true
    }

    /// Total free frames
    pub fn free_count(&self) -> u32 {
        self.free_count
    }

    /// Free frames in one partition
    pub fn len(&self, freelist: usize) -> usize {
        self.lists.get(freelist).map_or(0, QueueHead::len)
    }

    /// Frames of a partition, head first
    pub fn iter<'a>(
        &self,
        chains: &'a [QueueChain],
        freelist: usize,
    ) -> impl Iterator<Item = QueueIndex> + 'a {
        let head = self.lists.get(freelist).copied().unwrap_or_default();
        head.iter(chains)
    }

    /// Add a frame during bootstrap (tail)
    pub fn insert_boot(&mut self, chains: &mut [QueueChain], elt: QueueIndex, freelist: usize) {
        self.lists[freelist].enqueue_tail(chains, elt);
        self.free_count += 1;
    }

    /// Return a frame (head)
    pub fn insert(&mut self, chains: &mut [QueueChain], elt: QueueIndex, freelist: usize) {
        self.lists[freelist].enqueue_head(chains, elt);
        self.free_count += 1;
    }

    /// Remove a specific frame from its partition
    pub fn remove(&mut self, chains: &mut [QueueChain], elt: QueueIndex, freelist: usize) {
        self.lists[freelist].remove(chains, elt);
        self.free_count -= 1;
    }

    /// Pick the partition a request would be served from
    pub fn select(&self, strategy: Strategy) -> Option<usize> {
        let non_empty = |i: usize| self.lists.get(i).is_some_and(|l| !l.is_empty());
        let lowest = || (0..self.lists.len()).find(|&i| non_empty(i));

        match strategy {
            Strategy::Normal => lowest(),
            Strategy::Only(i) => non_empty(i).then_some(i),
            Strategy::Fallback(i) => {
                if non_empty(i) {
                    Some(i)
                } else {
                    lowest()
                }
            }
        }
    }

    /// Take the head frame of the partition chosen by `strategy`
    ///
    /// Fails when the chosen partition set is empty or when taking a frame
    /// would leave fewer than `keep` frames free.
    pub fn take(
        &mut self,
        chains: &mut [QueueChain],
        strategy: Strategy,
        keep: u32,
    ) -> Option<QueueIndex> {
        if self.free_count <= keep {
            return None;
        }
        let freelist = self.select(strategy)?;
        let elt = self.lists[freelist].dequeue_head(chains)?;
        self.free_count -= 1;
        Some(elt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;

    fn setup(layout: &[usize]) -> (FreeLists, Vec<QueueChain>) {
        let mut lists = FreeLists::new();
        let mut chains = vec![QueueChain::new(); layout.len()];
        for (i, &fl) in layout.iter().enumerate() {
            assert!(lists.ensure_partition(fl));
            lists.insert_boot(&mut chains, i as u32, fl);
        }
        (lists, chains)
    }

    #[test]
    fn test_partitions_bounded() {
        let mut lists = FreeLists::new();
        assert!(lists.ensure_partition(VM_NFREELIST - 1));
        assert_eq!(lists.partitions(), VM_NFREELIST);
        assert!(!lists.ensure_partition(VM_NFREELIST));
    }

    #[test]
    fn test_strategy_selection() {
        // frames 0,1 in list 1; frame 2 in list 2; list 0 empty
        let (mut lists, mut chains) = setup(&[1, 1, 2]);
        lists.ensure_partition(0);

        assert_eq!(lists.select(Strategy::Normal), Some(1));
        assert_eq!(lists.select(Strategy::Only(0)), None);
        assert_eq!(lists.select(Strategy::Only(2)), Some(2));
        assert_eq!(lists.select(Strategy::Fallback(0)), Some(1));
        assert_eq!(lists.select(Strategy::Fallback(2)), Some(2));
        assert_eq!(lists.select(Strategy::Only(3)), None);

        assert_eq!(lists.take(&mut chains, Strategy::Normal, 0), Some(0));
        assert_eq!(lists.take(&mut chains, Strategy::Normal, 0), Some(1));
        assert_eq!(lists.take(&mut chains, Strategy::Normal, 0), Some(2));
        assert_eq!(lists.take(&mut chains, Strategy::Normal, 0), None);
        assert_eq!(lists.free_count(), 0);
    }

    #[test]
    fn test_take_then_insert_restores_order() {
        let (mut lists, mut chains) = setup(&[0, 0, 0]);
        let before: Vec<_> = lists.iter(&chains, 0).collect();

        let elt = lists.take(&mut chains, Strategy::Only(0), 0).unwrap();
        lists.insert(&mut chains, elt, 0);

        let after: Vec<_> = lists.iter(&chains, 0).collect();
        assert_eq!(before, after);
        assert_eq!(lists.free_count(), 3);
    }

    #[test]
    fn test_reserve_keep() {
        let (mut lists, mut chains) = setup(&[0, 0]);
        assert!(lists.take(&mut chains, Strategy::Normal, 1).is_some());
        assert!(lists.take(&mut chains, Strategy::Normal, 1).is_none());
        assert!(lists.take(&mut chains, Strategy::Normal, 0).is_some());
    }

    #[test]
    fn test_remove_specific() {
        let (mut lists, mut chains) = setup(&[0, 0, 0]);
        lists.remove(&mut chains, 1, 0);
        assert_eq!(lists.iter(&chains, 0).collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(lists.len(0), 2);
    }
}
