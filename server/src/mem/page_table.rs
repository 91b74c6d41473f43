//! Per address space record of where every touched page lives.
//!
//! This is the server's own table, not the hardware one. A 32-bit virtual
//! address is split as
//!
//! ```text
//! | first level index (12) | second level index (8) | offset (12) |
//! ```
//!
//! Second-level tables are created on first use and dropped when their last
//! entry is cleared, so a sparse address space stays cheap.

use super::{FrameNumber, Vpn, MAX_INDEX};
use crate::swap::SlotNumber;
use alloc::{boxed::Box, vec::Vec};
use arbitrary_int::{u12, u20};
use bitbybit::bitfield;
use pagesrv_shared::mem::PAGE_SHIFT;

const FIRST_LEVEL_ENTRIES: usize = 1 << 12;
const SECOND_LEVEL_ENTRIES: usize = 1 << 8;

#[bitfield(u32, default = 0)]
pub struct PageEntry {
    #[bit(0, rw)]
    present: bool,
    #[bit(1, rw)]
    swapped: bool,
    /// Frame number when present, swap slot when swapped.
    #[bits(12..=31, rw)]
    index: u20,
}

#[bitfield(u32)]
pub struct VirtualAddress {
    #[bits(20..=31, r)]
    first_level_index: u12,
    #[bits(12..=19, r)]
    second_level_index: u8,
    #[bits(0..=11, r)]
    offset: u12,
}

impl VirtualAddress {
    fn of_page(vpn: Vpn) -> Self {
        Self::new_with_raw_value(vpn << PAGE_SHIFT)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageLocation {
    /// Never touched, or a clean zero page that was dropped.
    Unbacked,
    Resident(FrameNumber),
    Swapped(SlotNumber),
}

impl PageEntry {
    fn location(self) -> PageLocation {
        let index = self.index().value() as usize;
        if self.present() {
            PageLocation::Resident(index)
        } else if self.swapped() {
            PageLocation::Swapped(index)
        } else {
            PageLocation::Unbacked
        }
    }

    fn from_location(location: PageLocation) -> Self {
        match location {
            PageLocation::Unbacked => Self::DEFAULT,
            PageLocation::Resident(frame) => Self::DEFAULT
                .with_present(true)
                .with_index(Self::encode(frame)),
            PageLocation::Swapped(slot) => Self::DEFAULT
                .with_swapped(true)
                .with_index(Self::encode(slot)),
        }
    }

    fn encode(index: usize) -> u20 {
        assert!(index < MAX_INDEX, "index {index} does not fit a page entry");
        u20::new(index as u32)
    }
}

struct SecondLevelTable {
    entries: [PageEntry; SECOND_LEVEL_ENTRIES],
    used: usize,
}

pub struct PageTable {
    first_level: Box<[Option<Box<SecondLevelTable>>]>,
    len: usize,
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PageTable {
    pub fn new() -> Self {
        let mut first_level = Vec::with_capacity(FIRST_LEVEL_ENTRIES);
        first_level.resize_with(FIRST_LEVEL_ENTRIES, || None);
        Self {
            first_level: first_level.into_boxed_slice(),
            len: 0,
        }
    }

    /// Number of pages that are resident or swapped.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn lookup(&self, vpn: Vpn) -> PageLocation {
        let addr = VirtualAddress::of_page(vpn);
        match &self.first_level[addr.first_level_index().value() as usize] {
            Some(table) => table.entries[addr.second_level_index() as usize].location(),
            None => PageLocation::Unbacked,
        }
    }

    pub fn set(&mut self, vpn: Vpn, location: PageLocation) {
        let addr = VirtualAddress::of_page(vpn);
        let first = addr.first_level_index().value() as usize;
        let second = addr.second_level_index() as usize;
        let entry = PageEntry::from_location(location);

        let slot = &mut self.first_level[first];
        if slot.is_none() {
            if location == PageLocation::Unbacked {
                return;
            }
            *slot = Some(Box::new(SecondLevelTable {
                entries: [PageEntry::DEFAULT; SECOND_LEVEL_ENTRIES],
                used: 0,
            }));
        }
        let Some(table) = slot.as_mut() else {
            return;
        };

        let was_used = table.entries[second].location() != PageLocation::Unbacked;
        let now_used = location != PageLocation::Unbacked;
        table.entries[second] = entry;

        match (was_used, now_used) {
            (false, true) => {
                table.used += 1;
                self.len += 1;
            }
            (true, false) => {
                table.used -= 1;
                self.len -= 1;
                if table.used == 0 {
                    *slot = None;
                }
            }
            _ => {}
        }
    }

    pub fn clear(&mut self, vpn: Vpn) {
        self.set(vpn, PageLocation::Unbacked);
    }

    /// Every resident or swapped page, in address order.
    pub fn iter(&self) -> impl Iterator<Item = (Vpn, PageLocation)> + '_ {
        self.first_level
            .iter()
            .enumerate()
            .filter_map(|(first, table)| Some((first, table.as_ref()?)))
            .flat_map(|(first, table)| {
                table
                    .entries
                    .iter()
                    .enumerate()
                    .map(move |(second, entry)| {
                        let vpn = ((first << 8) | second) as Vpn;
                        (vpn, entry.location())
                    })
            })
            .filter(|(_, location)| *location != PageLocation::Unbacked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    #[test]
    fn test_untouched_is_unbacked() {
        let table = PageTable::new();
        assert_eq!(table.lookup(0x40000), PageLocation::Unbacked);
        assert!(table.is_empty());
    }

    #[test]
    fn test_set_and_lookup() {
        let mut table = PageTable::new();
        table.set(0x40000, PageLocation::Resident(3));
        table.set(0xBFFFF, PageLocation::Swapped(12));
        assert_eq!(table.lookup(0x40000), PageLocation::Resident(3));
        assert_eq!(table.lookup(0xBFFFF), PageLocation::Swapped(12));
        assert_eq!(table.lookup(0x40001), PageLocation::Unbacked);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_frame_zero_and_slot_zero_are_distinct_from_unbacked() {
        let mut table = PageTable::new();
        table.set(1, PageLocation::Resident(0));
        table.set(2, PageLocation::Swapped(0));
        assert_eq!(table.lookup(1), PageLocation::Resident(0));
        assert_eq!(table.lookup(2), PageLocation::Swapped(0));
    }

    #[test]
    fn test_overwrite_does_not_double_count() {
        let mut table = PageTable::new();
        table.set(7, PageLocation::Resident(1));
        table.set(7, PageLocation::Swapped(1));
        assert_eq!(table.len(), 1);
        table.clear(7);
        assert_eq!(table.len(), 0);
        assert_eq!(table.lookup(7), PageLocation::Unbacked);
    }

    #[test]
    fn test_second_level_dropped_when_empty() {
        let mut table = PageTable::new();
        table.set(0x40000, PageLocation::Resident(1));
        table.clear(0x40000);
        assert!(table.first_level.iter().all(Option::is_none));
        // clearing an absent entry allocates nothing
        table.clear(0x12345);
        assert!(table.first_level.iter().all(Option::is_none));
    }

    #[test]
    fn test_iter_in_address_order() {
        let mut table = PageTable::new();
        table.set(0xBFFFF, PageLocation::Swapped(2));
        table.set(0x02000, PageLocation::Resident(0));
        table.set(0x02001, PageLocation::Resident(1));
        let all: Vec<_> = table.iter().collect();
        assert_eq!(
            all,
            [
                (0x02000, PageLocation::Resident(0)),
                (0x02001, PageLocation::Resident(1)),
                (0xBFFFF, PageLocation::Swapped(2)),
            ]
        );
    }
}
