//! Index-linked Queues
//!
//! Based on Mach4 kern/queue.h by Avadis Tevanian Jr. (1985)
//!
//! Mach queues embed their linkage in the structures being queued, which
//! gives O(1) removal from anywhere in the queue without knowing which queue
//! holds the element. The resident page arena never moves or frees its
//! descriptors, so the linkage here is expressed as arena indices rather
//! than raw pointers:
//!
//! - every element owns one [`QueueChain`] in a side table (`&mut [QueueChain]`)
//! - a [`QueueHead`] records the first and last index and the element count
//!
//! Several heads may share one chain table as long as an element is linked
//! into at most one of them at a time.
//!
//! ## Usage Pattern
//!
//! ```ignore
//! let mut chains = vec![QueueChain::new(); 8];
//! let mut queue = QueueHead::new();
//! queue.enqueue_tail(&mut chains, 3);
//! assert_eq!(queue.dequeue_head(&mut chains), Some(3));
//! ```

/// Index of an element in the chain table
pub type QueueIndex = u32;

// ============================================================================
// Queue Entry
// ============================================================================

/// Queue linkage for one element
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueChain {
    next: Option<QueueIndex>,
    prev: Option<QueueIndex>,
    linked: bool,
}

impl QueueChain {
    /// Create a new unlinked queue chain
    pub const fn new() -> Self {
        Self {
            next: None,
            prev: None,
            linked: false,
        }
    }

    /// Check if this entry is linked into a queue
    pub fn is_linked(&self) -> bool {
        self.linked
    }

    /// Index of the next element, if any
    pub fn next(&self) -> Option<QueueIndex> {
        self.next
    }

    /// Index of the previous element, if any
    pub fn prev(&self) -> Option<QueueIndex> {
        self.prev
    }

    fn unlink(&mut self) {
        *self = Self::new();
    }
}

// ============================================================================
// Queue Head
// ============================================================================

/// A queue head - represents the queue itself
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueHead {
    first: Option<QueueIndex>,
    last: Option<QueueIndex>,
    count: usize,
}

impl QueueHead {
    /// Create a new empty queue
    pub const fn new() -> Self {
        Self {
            first: None,
            last: None,
            count: 0,
        }
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.first.is_none()
    }

    /// Number of elements on the queue
    pub fn len(&self) -> usize {
        self.count
    }

    /// Index at the head of the queue
    pub fn first(&self) -> Option<QueueIndex> {
        self.first
    }

    /// Index at the tail of the queue
    pub fn last(&self) -> Option<QueueIndex> {
        self.last
    }

    /// Add an element at the tail
    pub fn enqueue_tail(&mut self, chains: &mut [QueueChain], elt: QueueIndex) {
        debug_assert!(!chains[elt as usize].is_linked(), "Element already in a queue");

        chains[elt as usize] = QueueChain {
            next: None,
            prev: self.last,
            linked: true,
        };
        match self.last {
            Some(last) => chains[last as usize].next = Some(elt),
            None => self.first = Some(elt),
        }
        self.last = Some(elt);
        self.count += 1;
    }

    /// Add an element at the head
    pub fn enqueue_head(&mut self, chains: &mut [QueueChain], elt: QueueIndex) {
        debug_assert!(!chains[elt as usize].is_linked(), "Element already in a queue");

        chains[elt as usize] = QueueChain {
            next: self.first,
            prev: None,
            linked: true,
        };
        match self.first {
            Some(first) => chains[first as usize].prev = Some(elt),
            None => self.last = Some(elt),
        }
        self.first = Some(elt);
        self.count += 1;
    }

    /// Remove and return the element at the head
    pub fn dequeue_head(&mut self, chains: &mut [QueueChain]) -> Option<QueueIndex> {
        let elt = self.first?;
        self.remove(chains, elt);
        Some(elt)
    }

    /// Remove an arbitrary element
    ///
    /// The element must be linked into this queue.
    pub fn remove(&mut self, chains: &mut [QueueChain], elt: QueueIndex) {
        let chain = chains[elt as usize];
        debug_assert!(chain.is_linked(), "Element not in a queue");

        match chain.prev {
            Some(prev) => chains[prev as usize].next = chain.next,
            None => self.first = chain.next,
        }
        match chain.next {
            Some(next) => chains[next as usize].prev = chain.prev,
            None => self.last = chain.prev,
        }
        chains[elt as usize].unlink();
        self.count -= 1;
    }

    /// Iterate head to tail
    pub fn iter<'a>(&self, chains: &'a [QueueChain]) -> QueueIter<'a> {
        QueueIter {
            chains,
            cursor: self.first,
        }
    }
}

// ============================================================================
// Queue Iterator
// ============================================================================

/// Head-to-tail iterator over a queue
pub struct QueueIter<'a> {
    chains: &'a [QueueChain],
    cursor: Option<QueueIndex>,
}

impl Iterator for QueueIter<'_> {
    type Item = QueueIndex;

    fn next(&mut self) -> Option<Self::Item> {
        let elt = self.cursor?;
        self.cursor = self.chains[elt as usize].next;
        Some(elt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use alloc::vec::Vec;

    #[test]
    fn test_enqueue_dequeue_tail() {
        let mut chains = vec![QueueChain::new(); 4];
        let mut queue = QueueHead::new();
        assert!(queue.is_empty());

        queue.enqueue_tail(&mut chains, 0);
        queue.enqueue_tail(&mut chains, 1);
        queue.enqueue_tail(&mut chains, 2);

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.first(), Some(0));
        assert_eq!(queue.last(), Some(2));
        assert_eq!(queue.dequeue_head(&mut chains), Some(0));
        assert_eq!(queue.dequeue_head(&mut chains), Some(1));
        assert_eq!(queue.dequeue_head(&mut chains), Some(2));
        assert_eq!(queue.dequeue_head(&mut chains), None);
        assert!(!chains[1].is_linked());
    }

    #[test]
    fn test_enqueue_head() {
        let mut chains = vec![QueueChain::new(); 4];
        let mut queue = QueueHead::new();

        queue.enqueue_tail(&mut chains, 1);
        queue.enqueue_head(&mut chains, 3);

        let order: Vec<_> = queue.iter(&chains).collect();
        assert_eq!(order, vec![3, 1]);
    }

    #[test]
    fn test_remove_middle() {
        let mut chains = vec![QueueChain::new(); 5];
        let mut queue = QueueHead::new();
        for i in 0..5 {
            queue.enqueue_tail(&mut chains, i);
        }

        queue.remove(&mut chains, 2);
        queue.remove(&mut chains, 4);
        queue.remove(&mut chains, 0);

        let order: Vec<_> = queue.iter(&chains).collect();
        assert_eq!(order, vec![1, 3]);
        assert_eq!(queue.first(), Some(1));
        assert_eq!(queue.last(), Some(3));
        assert_eq!(chains[1].next(), Some(3));
        assert_eq!(chains[3].prev(), Some(1));
    }

    #[test]
    fn test_shared_chain_table() {
        let mut chains = vec![QueueChain::new(); 4];
        let mut a = QueueHead::new();
        let mut b = QueueHead::new();

        a.enqueue_tail(&mut chains, 0);
        b.enqueue_tail(&mut chains, 1);
        a.enqueue_tail(&mut chains, 2);
        b.enqueue_tail(&mut chains, 3);

        a.remove(&mut chains, 0);
        b.enqueue_tail(&mut chains, 0);

        assert_eq!(a.iter(&chains).collect::<Vec<_>>(), vec![2]);
        assert_eq!(b.iter(&chains).collect::<Vec<_>>(), vec![1, 3, 0]);
    }
}
