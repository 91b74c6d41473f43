//! Bookkeeping for every physical frame: its state, who owns it, and the
//! software reference/dirty bits the clock reads.
//!
//! The free frames form a stack, so allocation and release are both *O(1)*.
//! The stack is seeded in reverse so the first allocation returns frame 0.

use super::{rights::Rights, FrameNumber, Page, Pid};
use alloc::{boxed::Box, vec, vec::Vec};
use bitbybit::bitfield;
use pagesrv_shared::eprintln;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    /// On the free stack.
    Free,
    /// Holds a mapped page and sits in the eviction ring.
    Resident,
    /// Held by an in-progress operation; cannot be evicted or reused.
    Pinned,
    /// Mid swap transfer.
    InTransit,
}

#[bitfield(u8, default = 0)]
pub struct FrameFlags {
    #[bit(0, rw)]
    referenced: bool,
    #[bit(1, rw)]
    dirty: bool,
    /// Claimed by the image loader, not yet handed to a process.
    #[bit(2, rw)]
    loader: bool,
}

#[derive(Clone, Copy)]
struct FrameEntry {
    state: FrameState,
    owner: Option<Page>,
    flags: FrameFlags,
    /// Union of the rights faulted for since `owner` was last fully
    /// unmapped. Write is only granted once the page is dirty.
    requested: Rights,
}

impl FrameEntry {
    const FREE: Self = Self {
        state: FrameState::Free,
        owner: None,
        flags: FrameFlags::DEFAULT,
        requested: Rights::NONE,
    };
}

pub struct FrameTable {
    entries: Box<[FrameEntry]>,
    free_stack: Vec<FrameNumber>,
    resident: usize,
}

impl FrameTable {
    pub fn new(frame_count: usize) -> Self {
        Self {
            entries: vec![FrameEntry::FREE; frame_count].into_boxed_slice(),
            free_stack: (0..frame_count).rev().collect(),
            resident: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn free_count(&self) -> usize {
        self.free_stack.len()
    }

    pub fn resident_count(&self) -> usize {
        self.resident
    }

    pub fn state(&self, frame: FrameNumber) -> FrameState {
        self.entries[frame].state
    }

    pub fn owner_of(&self, frame: FrameNumber) -> Option<Page> {
        self.entries[frame].owner
    }

    /// Pops a free frame. It comes back Pinned and unowned; the caller decides
    /// what it will hold.
    ///
    /// Returns `None` when every frame is in use, in which case the caller
    /// has to evict something.
    pub fn allocate_free(&mut self) -> Option<FrameNumber> {
        let frame = self.free_stack.pop()?;
        debug_assert_eq!(self.entries[frame].state, FrameState::Free);
        self.entries[frame] = FrameEntry {
            state: FrameState::Pinned,
            ..FrameEntry::FREE
        };
        Some(frame)
    }

    /// Records which page a pinned frame is being prepared for.
    pub fn assign(&mut self, frame: FrameNumber, page: Page) {
        debug_assert_eq!(self.entries[frame].state, FrameState::Pinned);
        self.entries[frame].owner = Some(page);
    }

    /// Pinned -> Resident, owned by `page`, which faulted for `requested`.
    pub fn mark_resident(&mut self, frame: FrameNumber, page: Page, requested: Rights) {
        let entry = &mut self.entries[frame];
        debug_assert_eq!(entry.state, FrameState::Pinned);
        entry.state = FrameState::Resident;
        entry.owner = Some(page);
        entry.requested = requested;
        entry.flags = entry.flags.with_loader(false);
        self.resident += 1;
    }

    /// Resident -> Pinned. The owner is kept.
    pub fn mark_pinned(&mut self, frame: FrameNumber) {
        let entry = &mut self.entries[frame];
        debug_assert_eq!(entry.state, FrameState::Resident);
        entry.state = FrameState::Pinned;
        self.resident -= 1;
    }

    /// Pinned -> Resident for a frame that already has an owner, e.g. an
    /// eviction victim that could not be written out.
    pub fn unpin(&mut self, frame: FrameNumber) {
        let entry = &mut self.entries[frame];
        debug_assert_eq!(entry.state, FrameState::Pinned);
        debug_assert!(entry.owner.is_some(), "unpinning unowned frame {frame}");
        entry.state = FrameState::Resident;
        self.resident += 1;
    }

    /// Clears owner and bits of a Pinned frame so it can be reused without a
    /// trip through the free stack.
    pub fn recycle(&mut self, frame: FrameNumber) {
        debug_assert_eq!(self.entries[frame].state, FrameState::Pinned);
        self.entries[frame] = FrameEntry {
            state: FrameState::Pinned,
            ..FrameEntry::FREE
        };
    }

    pub fn mark_in_transit(&mut self, frame: FrameNumber) {
        debug_assert_eq!(self.entries[frame].state, FrameState::Pinned);
        self.entries[frame].state = FrameState::InTransit;
    }

    /// InTransit -> Pinned, once the transfer completed or was abandoned.
    pub fn end_transit(&mut self, frame: FrameNumber) {
        debug_assert_eq!(self.entries[frame].state, FrameState::InTransit);
        self.entries[frame].state = FrameState::Pinned;
    }

    /// Returns a frame to the free stack, dropping owner and bits.
    ///
    /// Freeing a free frame does nothing and returns `false`.
    pub fn mark_free(&mut self, frame: FrameNumber) -> bool {
        let entry = &mut self.entries[frame];
        match entry.state {
            FrameState::Free => {
                eprintln!("frame_table: frame {} is already free", frame);
                return false;
            }
            FrameState::Resident => self.resident -= 1,
            FrameState::InTransit => {
                debug_assert!(false, "freeing frame {frame} mid transfer");
            }
            FrameState::Pinned => {}
        }
        *entry = FrameEntry::FREE;
        self.free_stack.push(frame);
        true
    }

    /// Allocates a frame for the image loader. It stays Pinned, unowned and
    /// outside the clock until [`Self::mark_resident`] adopts it.
    pub fn claim_for_loader(&mut self) -> Option<FrameNumber> {
        let frame = self.allocate_free()?;
        self.entries[frame].flags = self.entries[frame].flags.with_loader(true);
        Some(frame)
    }

    pub fn is_loader_frame(&self, frame: FrameNumber) -> bool {
        frame < self.len()
            && self.entries[frame].state == FrameState::Pinned
            && self.entries[frame].flags.loader()
    }

    pub fn is_referenced(&self, frame: FrameNumber) -> bool {
        self.entries[frame].flags.referenced()
    }

    pub fn set_referenced(&mut self, frame: FrameNumber, referenced: bool) {
        let flags = &mut self.entries[frame].flags;
        *flags = flags.with_referenced(referenced);
    }

    pub fn is_dirty(&self, frame: FrameNumber) -> bool {
        self.entries[frame].flags.dirty()
    }

    pub fn set_dirty(&mut self, frame: FrameNumber, dirty: bool) {
        let flags = &mut self.entries[frame].flags;
        *flags = flags.with_dirty(dirty);
    }

    pub fn requested_rights(&self, frame: FrameNumber) -> Rights {
        self.entries[frame].requested
    }

    pub fn set_requested_rights(&mut self, frame: FrameNumber, rights: Rights) {
        self.entries[frame].requested = rights;
    }

    /// Frames currently owned by a page of `pid`, in any state.
    pub fn owned_by(&self, pid: Pid) -> impl Iterator<Item = FrameNumber> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(move |(_, e)| e.owner.is_some_and(|page| page.asid == pid))
            .map(|(frame, _)| frame)
    }
}
