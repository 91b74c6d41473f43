use super::rights::Rights;
use alloc::collections::BTreeMap;
use core::fmt;
use lazy_static::lazy_static;
use pagesrv_shared::{mem::PAGE_SIZE, sizes::MB};

pub const TEXT_START: u32 = 0x0200_0000;
pub const TEXT_SIZE: u32 = 4 * MB as u32;
pub const DATA_START: u32 = TEXT_START + TEXT_SIZE;
pub const DATA_SIZE: u32 = 4 * MB as u32;
pub const HEAP_START: u32 = 0x4000_0000;
pub const HEAP_SIZE: u32 = 4 * MB as u32;
pub const IPC_BUFFER_START: u32 = 0x6000_0000;
pub const STACK_TOP: u32 = 0xC000_0000;
pub const STACK_SIZE: u32 = MB as u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegionKind {
    Text,
    Data,
    Heap,
    IpcBuffer,
    Stack,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region {
    kind: RegionKind,
    size: u32,
    rights: Rights,
}

impl Region {
    pub const fn new(kind: RegionKind, size: u32, rights: Rights) -> Self {
        Self { kind, size, rights }
    }

    pub fn kind(&self) -> RegionKind {
        self.kind
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn rights(&self) -> Rights {
        self.rights
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayoutError {
    Overlap { start: u32 },
    Unaligned { start: u32 },
    NullPage,
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overlap { start } => write!(f, "region at {start:#010x} overlaps another"),
            Self::Unaligned { start } => write!(f, "region at {start:#010x} is not page aligned"),
            Self::NullPage => write!(f, "the first page cannot be part of a region"),
        }
    }
}

impl core::error::Error for LayoutError {}

/// Which parts of an address space a process may touch, and how.
///
/// Regions are keyed by start address. Anything outside every region,
/// including the first page, has no rights at all.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Layout(BTreeMap<u32, Region>);

lazy_static! {
    pub static ref DEFAULT_LAYOUT: Layout = {
        let mut layout = Layout::empty();
        let regions = [
            (TEXT_START, Region::new(RegionKind::Text, TEXT_SIZE, Rights::READ_EXECUTE)),
            (DATA_START, Region::new(RegionKind::Data, DATA_SIZE, Rights::READ_WRITE)),
            (HEAP_START, Region::new(RegionKind::Heap, HEAP_SIZE, Rights::READ_WRITE)),
            (
                IPC_BUFFER_START,
                Region::new(RegionKind::IpcBuffer, PAGE_SIZE as u32, Rights::READ_WRITE),
            ),
            (
                STACK_TOP - STACK_SIZE,
                Region::new(RegionKind::Stack, STACK_SIZE, Rights::READ_WRITE),
            ),
        ];
        for (start, region) in regions {
            let added = layout.add_region(start, region);
            debug_assert!(added.is_ok(), "default region at {start:#x}: {added:?}");
        }
        layout
    };
}

impl Layout {
    /// A layout with no regions: every access is invalid.
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    /// The standard process layout.
    pub fn standard() -> Self {
        DEFAULT_LAYOUT.clone()
    }

    pub fn add_region(&mut self, start: u32, region: Region) -> Result<(), LayoutError> {
        if start as usize % PAGE_SIZE != 0 {
            return Err(LayoutError::Unaligned { start });
        }
        if start < PAGE_SIZE as u32 {
            return Err(LayoutError::NullPage);
        }
        let end = start as u64 + region.size as u64;
        if self.region_at(start).is_some()
            || self
                .0
                .range(start..)
                .next()
                .is_some_and(|(&next, _)| (next as u64) < end)
        {
            return Err(LayoutError::Overlap { start });
        }
        self.0.insert(start, region);
        Ok(())
    }

    pub fn region_at(&self, addr: u32) -> Option<(u32, &Region)> {
        let (&start, region) = self.0.range(..=addr).next_back()?;
        if (addr as u64) < start as u64 + region.size as u64 {
            Some((start, region))
        } else {
            None
        }
    }

    pub fn rights_at(&self, addr: u32) -> Rights {
        self.region_at(addr)
            .map_or(Rights::NONE, |(_, region)| region.rights)
    }

    /// Whether an access of kind `access` at `addr` is allowed.
    pub fn permits(&self, addr: u32, access: Rights) -> bool {
        let rights = self.rights_at(addr);
        !rights.is_empty() && rights.contains(access)
    }

    pub fn regions(&self) -> impl Iterator<Item = (u32, &Region)> + '_ {
        self.0.iter().map(|(&start, region)| (start, region))
    }
}
