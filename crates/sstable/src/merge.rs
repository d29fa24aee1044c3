//! K-way merge over sorted child iterators.
//!
//! Children are a closed set of concrete variants rather than trait objects:
//! the merge loop costs one heap comparison per level, and nothing in the
//! hot path dispatches through a vtable.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use crate::block::BlockIterator;
use crate::cmp::KeyComparator;
use crate::error::Result;
use crate::iter::{ItemsIterator, TableIterator};

/// One sorted input of a merge.
pub enum MergeChild {
    /// A full table (two-level iterator).
    Table(TableIterator),
    /// A single decoded block.
    Block(BlockIterator),
    /// Sorted in-memory entries.
    Items(ItemsIterator),
}

impl MergeChild {
    fn valid(&self) -> bool {
        match self {
            MergeChild::Table(it) => it.valid(),
            MergeChild::Block(it) => it.valid(),
            MergeChild::Items(it) => it.valid(),
        }
    }

    fn key(&self) -> &[u8] {
        match self {
            MergeChild::Table(it) => it.key(),
            MergeChild::Block(it) => it.key(),
            MergeChild::Items(it) => it.key(),
        }
    }

    fn value(&self) -> &[u8] {
        match self {
            MergeChild::Table(it) => it.value(),
            MergeChild::Block(it) => it.value(),
            MergeChild::Items(it) => it.value(),
        }
    }

    fn next(&mut self) -> Result<()> {
        match self {
            MergeChild::Table(it) => it.next(),
            MergeChild::Block(it) => it.next().map(|_| ()),
            MergeChild::Items(it) => {
                it.next();
                Ok(())
            }
        }
    }

    fn seek_to_first(&mut self) -> Result<()> {
        match self {
            MergeChild::Table(it) => it.seek_to_first(),
            MergeChild::Block(it) => it.seek_to_first(),
            MergeChild::Items(it) => {
                it.seek_to_first();
                Ok(())
            }
        }
    }

    fn seek(&mut self, target: &[u8]) -> Result<()> {
        match self {
            MergeChild::Table(it) => it.seek(target),
            MergeChild::Block(it) => it.seek(target),
            MergeChild::Items(it) => {
                it.seek(target);
                Ok(())
            }
        }
    }
}

impl From<TableIterator> for MergeChild {
    fn from(it: TableIterator) -> Self {
        MergeChild::Table(it)
    }
}

impl From<BlockIterator> for MergeChild {
    fn from(it: BlockIterator) -> Self {
        MergeChild::Block(it)
    }
}

impl From<ItemsIterator> for MergeChild {
    fn from(it: ItemsIterator) -> Self {
        MergeChild::Items(it)
    }
}

/// A child currently ahead in the merge, keyed by its peeked key.
///
/// `BinaryHeap` is a max-heap, so the comparison is reversed to surface the
/// smallest key first. Ties go to the lower child index; callers order
/// children newest-first, which makes the newest version of a duplicate key
/// win.
struct HeapEntry {
    key: Vec<u8>,
    child: usize,
    comparator: Arc<dyn KeyComparator>,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.child == other.child
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.comparator
            .compare(&other.key, &self.key)
            .then_with(|| other.child.cmp(&self.child))
    }
}

/// Merges an ordered list of sorted children into one globally sorted
/// stream.
///
/// `seek_to_first`/`seek` reposition every child and rebuild the queue in
/// `O(n log n)` for `n` children; `next_entry` pops the minimum, advances
/// that child and reinserts it in `O(log n)`.
pub struct MergingIterator {
    children: Vec<MergeChild>,
    heap: BinaryHeap<HeapEntry>,
    comparator: Arc<dyn KeyComparator>,
}

impl MergingIterator {
    /// Builds a merge over `children`, queueing whatever positions they
    /// currently hold. Fresh iterators start unpositioned, so callers
    /// normally follow up with `seek_to_first` or `seek`.
    #[must_use]
    pub fn new(children: Vec<MergeChild>, comparator: Arc<dyn KeyComparator>) -> MergingIterator {
        let mut merger = MergingIterator {
            children,
            heap: BinaryHeap::new(),
            comparator,
        };
        merger.rebuild_heap();
        merger
    }

    /// Repositions every child at its first entry.
    pub fn seek_to_first(&mut self) -> Result<()> {
        for child in &mut self.children {
            child.seek_to_first()?;
        }
        self.rebuild_heap();
        Ok(())
    }

    /// Repositions every child at its first entry with key `>= target`.
    pub fn seek(&mut self, target: &[u8]) -> Result<()> {
        for child in &mut self.children {
            child.seek(target)?;
        }
        self.rebuild_heap();
        Ok(())
    }

    /// Returns `true` while at least one child still has entries.
    #[must_use]
    pub fn has_next(&self) -> bool {
        !self.heap.is_empty()
    }

    /// The next `(key, value)` without advancing.
    #[must_use]
    pub fn peek(&self) -> Option<(&[u8], &[u8])> {
        self.heap.peek().map(|entry| {
            let child = &self.children[entry.child];
            (child.key(), child.value())
        })
    }

    /// Pops the globally smallest entry and advances the child it came from.
    pub fn next_entry(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let Some(top) = self.heap.pop() else {
            return Ok(None);
        };
        let child = &mut self.children[top.child];
        let value = child.value().to_vec();
        child.next()?;
        if child.valid() {
            self.heap.push(HeapEntry {
                key: child.key().to_vec(),
                child: top.child,
                comparator: self.comparator.clone(),
            });
        }
        Ok(Some((top.key, value)))
    }

    fn rebuild_heap(&mut self) {
        self.heap.clear();
        for (index, child) in self.children.iter().enumerate() {
            if child.valid() {
                self.heap.push(HeapEntry {
                    key: child.key().to_vec(),
                    child: index,
                    comparator: self.comparator.clone(),
                });
            }
        }
    }
}
