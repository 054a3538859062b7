use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap};

/// Hands out dense internal slot numbers. Released slots are reused lowest first,
/// so slot numbers stay close to zero and spread evenly over downstream lanes.
#[derive(Debug, Default)]
pub struct SlotAllocator {
    next: usize,
    free: BinaryHeap<Reverse<usize>>,
    in_use: BTreeSet<usize>,
}

impl SlotAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self) -> usize {
        let slot = match self.free.pop() {
            Some(Reverse(slot)) => slot,
            None => {
                let slot = self.next;
                self.next += 1;
                slot
            }
        };
        self.in_use.insert(slot);
        slot
    }

    /// Returns `slot` to the free list. Releasing a slot that is not in use is ignored
    /// and reported as false.
    pub fn release(&mut self, slot: usize) -> bool {
        if !self.in_use.remove(&slot) {
            log::warn!("slot {} released twice", slot);
            return false;
        }
        self.free.push(Reverse(slot));
        true
    }

    pub fn is_in_use(&self, slot: usize) -> bool {
        self.in_use.contains(&slot)
    }

    pub fn in_use(&self) -> impl Iterator<Item = usize> + '_ {
        self.in_use.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.in_use.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_use.is_empty()
    }
}

#[cfg(test)]
#[path = "slot_test.rs"]
mod slot_test;
