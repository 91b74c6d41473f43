use alloc::{vec, vec::Vec};

/// Keeps track of a fixed pool of numbered slots, each either free or in use.
///
/// Used for swap slots, but nothing in here knows about swapping.
///
/// Fast operations are:
///   - Take some free slot and mark it in use
///   - Return a slot that was in use
///   - Ask whether a given slot is free
///
/// A set bit in `bitmap` means the slot is free. `groups` lists the indices
/// of the bitmap words that still have a set bit.
#[derive(Debug, Clone)]
pub struct FreeSet {
    bitmap: Vec<u64>,
    groups: Vec<u32>,
    capacity: usize,
    free: usize,
}

impl FreeSet {
    /// Creates a set of `capacity` slots, all of them free.
    pub fn new_all_free(capacity: usize) -> Self {
        let group_count = capacity.div_ceil(64);
        let mut bitmap = vec![u64::MAX; group_count];
        let tail = capacity % 64;
        if tail != 0 {
            if let Some(last) = bitmap.last_mut() {
                *last = (1 << tail) - 1;
            }
        }

        // Reversed, so popping hands out the low slots first.
        let groups = (0..group_count as u32).rev().collect();

        Self {
            bitmap,
            groups,
            capacity,
            free: capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn free_count(&self) -> usize {
        self.free
    }

    pub fn is_free(&self, index: usize) -> bool {
        index < self.capacity && self.bitmap[index / 64] & (1 << (index % 64)) != 0
    }

    /// Takes a free slot.
    ///
    /// Returns `None` if every slot is in use. *O(1)*.
    pub fn allocate(&mut self) -> Option<usize> {
        let group_index = *self.groups.last()?;
        let group = &mut self.bitmap[group_index as usize];
        debug_assert_ne!(*group, 0, "FreeSet consistency error");
        let index_in_group = group.trailing_zeros();
        *group &= !(1 << index_in_group);
        if *group == 0 {
            self.groups.pop();
        }
        self.free -= 1;
        Some(group_index as usize * 64 + index_in_group as usize)
    }

    /// Returns a slot to the set.
    ///
    /// Returns `false` and changes nothing if the slot was already free or is
    /// out of range. *O(1)*.
    pub fn free(&mut self, index: usize) -> bool {
        if index >= self.capacity || self.is_free(index) {
            return false;
        }
        let group_index = index / 64;
        let group = &mut self.bitmap[group_index];
        if *group == 0 {
            self.groups.push(group_index as u32);
        }
        *group |= 1 << (index % 64);
        self.free += 1;
        true
    }
}
