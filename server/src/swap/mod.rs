//! Swap slots on the backing store, and the page transfers in and out of
//! them.
//!
//! A slot is one page worth of consecutive sectors. Slot `n` starts at sector
//! `swap_start + n * SECTORS_PER_PAGE`. A page transfer is issued as one
//! device request per sector and completes when the last of them does. If any
//! sector fails the whole transfer fails, and a failed read leaves the frame
//! untouched.

use crate::block::{BlockDevice, BlockError, BlockSector, IoCompletion, IoToken, SECTOR_SIZE};
use crate::error::PagerError;
use crate::mem::{frame_table::FrameTable, phys::PhysMem, FrameNumber, Page};
use alloc::{boxed::Box, collections::BTreeMap, vec, vec::Vec};
use pagesrv_shared::{
    eprintln,
    free_set::FreeSet,
    mem::{PAGE_SIZE, SECTORS_PER_PAGE},
};

pub type SlotNumber = usize;

/// Names one page transfer.
pub type SwapToken = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transfer {
    /// Slot to frame.
    Read,
    /// Frame to slot.
    Write,
}

/// A finished page transfer. The frame is back to Pinned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapCompletion {
    pub token: SwapToken,
    pub frame: FrameNumber,
    pub slot: SlotNumber,
    pub kind: Transfer,
    pub status: Result<(), BlockError>,
}

struct Pending {
    frame: FrameNumber,
    slot: SlotNumber,
    kind: Transfer,
    outstanding: usize,
    failed: Option<BlockError>,
    /// Read data collects here and reaches the frame only if every sector
    /// arrived.
    staging: Vec<u8>,
}

pub struct SwapStore<D: BlockDevice> {
    device: D,
    swap_start: BlockSector,
    slots: FreeSet,
    owners: Box<[Option<Page>]>,
    transfers: BTreeMap<SwapToken, Pending>,
    sectors: BTreeMap<IoToken, (SwapToken, usize)>,
    next_token: SwapToken,
}

impl<D: BlockDevice> SwapStore<D> {
    /// Sets up `slot_count` slots starting at sector `swap_start`, or as many
    /// as the device has room for.
    pub fn new(device: D, swap_start: BlockSector, slot_count: usize) -> Self {
        let room = device.sector_count().saturating_sub(swap_start) as usize / SECTORS_PER_PAGE;
        let slot_count = if slot_count > room {
            eprintln!(
                "swap: device only holds {} slots past sector {}, {} requested",
                room, swap_start, slot_count
            );
            room
        } else {
            slot_count
        };

        Self {
            device,
            swap_start,
            slots: FreeSet::new_all_free(slot_count),
            owners: vec![None; slot_count].into_boxed_slice(),
            transfers: BTreeMap::new(),
            sectors: BTreeMap::new(),
            next_token: 1,
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.capacity()
    }

    pub fn free_slot_count(&self) -> usize {
        self.slots.free_count()
    }

    /// Page transfers issued and not yet completed or abandoned.
    pub fn in_flight(&self) -> usize {
        self.transfers.len()
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Takes a free slot for `page`. Running out is final; there is nothing
    /// to wait for.
    pub fn allocate_slot(&mut self, page: Page) -> Result<SlotNumber, PagerError> {
        let slot = self.slots.allocate().ok_or(PagerError::OutOfSwap)?;
        self.owners[slot] = Some(page);
        Ok(slot)
    }

    pub fn free_slot(&mut self, slot: SlotNumber) -> bool {
        if !self.slots.free(slot) {
            eprintln!("swap: slot {} is not in use", slot);
            return false;
        }
        self.owners[slot] = None;
        true
    }

    pub fn owner_of_slot(&self, slot: SlotNumber) -> Option<Page> {
        self.owners.get(slot).copied().flatten()
    }

    fn sector_of(&self, slot: SlotNumber, index: usize) -> BlockSector {
        self.swap_start + (slot * SECTORS_PER_PAGE + index) as BlockSector
    }

    fn begin(&mut self, frame: FrameNumber, slot: SlotNumber, kind: Transfer) -> SwapToken {
        let token = self.next_token;
        self.next_token += 1;
        let staging = match kind {
            Transfer::Read => vec![0; PAGE_SIZE],
            Transfer::Write => Vec::new(),
        };
        self.transfers.insert(
            token,
            Pending {
                frame,
                slot,
                kind,
                outstanding: SECTORS_PER_PAGE,
                failed: None,
                staging,
            },
        );
        token
    }

    fn forget(&mut self, token: SwapToken) -> Option<Pending> {
        let pending = self.transfers.remove(&token)?;
        self.sectors.retain(|_, (owner, _)| *owner != token);
        Some(pending)
    }

    /// Starts copying `frame` into `slot`. The frame must be Pinned and is
    /// InTransit until the transfer completes or is abandoned.
    ///
    /// If the device refuses a request nothing stays queued on our side and
    /// the frame is Pinned again.
    pub fn write_out(
        &mut self,
        frames: &mut FrameTable,
        mem: &PhysMem,
        frame: FrameNumber,
        slot: SlotNumber,
    ) -> Result<SwapToken, BlockError> {
        frames.mark_in_transit(frame);
        let token = self.begin(frame, slot, Transfer::Write);

        let contents = mem.frame(frame);
        for (index, chunk) in contents.chunks_exact(SECTOR_SIZE).enumerate() {
            let sector = self.sector_of(slot, index);
            match self.device.submit_write(sector, chunk) {
                Ok(io) => {
                    self.sectors.insert(io, (token, index));
                }
                Err(err) => {
                    self.forget(token);
                    frames.end_transit(frame);
                    return Err(err);
                }
            }
        }
        Ok(token)
    }

    /// Starts copying `slot` into `frame`. Same frame rules as
    /// [`Self::write_out`].
    pub fn read_in(
        &mut self,
        frames: &mut FrameTable,
        slot: SlotNumber,
        frame: FrameNumber,
    ) -> Result<SwapToken, BlockError> {
        frames.mark_in_transit(frame);
        let token = self.begin(frame, slot, Transfer::Read);

        for index in 0..SECTORS_PER_PAGE {
            let sector = self.sector_of(slot, index);
            match self.device.submit_read(sector) {
                Ok(io) => {
                    self.sectors.insert(io, (token, index));
                }
                Err(err) => {
                    self.forget(token);
                    frames.end_transit(frame);
                    return Err(err);
                }
            }
        }
        Ok(token)
    }

    /// Accounts for one finished sector request.
    ///
    /// Returns the page transfer once its last sector is in. Completions for
    /// requests we never issued, or for abandoned transfers, give `None`.
    pub fn complete(
        &mut self,
        frames: &mut FrameTable,
        mem: &mut PhysMem,
        completion: IoCompletion,
    ) -> Option<SwapCompletion> {
        let (token, index) = self.sectors.remove(&completion.token)?;
        let pending = self.transfers.get_mut(&token)?;
        pending.outstanding -= 1;

        match completion.status {
            Err(err) => {
                pending.failed.get_or_insert(err);
            }
            Ok(()) if pending.kind == Transfer::Read => {
                if completion.data.len() == SECTOR_SIZE {
                    let start = index * SECTOR_SIZE;
                    pending.staging[start..start + SECTOR_SIZE].copy_from_slice(&completion.data);
                } else {
                    pending.failed.get_or_insert(BlockError::BufferInvalid);
                }
            }
            Ok(()) => {}
        }

        if pending.outstanding > 0 {
            return None;
        }

        let pending = self.transfers.remove(&token)?;
        frames.end_transit(pending.frame);
        let status = match pending.failed {
            Some(err) => Err(err),
            None => Ok(()),
        };
        if status.is_ok() && pending.kind == Transfer::Read {
            mem.frame_mut(pending.frame).copy_from_slice(&pending.staging);
        }

        Some(SwapCompletion {
            token,
            frame: pending.frame,
            slot: pending.slot,
            kind: pending.kind,
            status,
        })
    }

    /// Gives up on a transfer that stalled. Its remaining sector completions
    /// will be ignored and its frame is Pinned again.
    pub fn abandon(&mut self, frames: &mut FrameTable, token: SwapToken) -> Option<FrameNumber> {
        let pending = self.forget(token)?;
        frames.end_transit(pending.frame);
        Some(pending.frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::RamDisk;
    use crate::mem::frame_table::FrameState;

    const PAGE: Page = Page::new(1, 0x40000);

    struct Rig {
        swap: SwapStore<RamDisk>,
        frames: FrameTable,
        mem: PhysMem,
    }

    impl Rig {
        fn new(slots: usize) -> Self {
            let bytes = Box::leak(vec![0u8; 2 * PAGE_SIZE].into_boxed_slice());
            Self {
                swap: SwapStore::new(RamDisk::new(64), 8, slots),
                frames: FrameTable::new(2),
                mem: PhysMem::new(bytes),
            }
        }

        /// Completes every queued sector and returns the page transfers
        /// that finished.
        fn settle(&mut self) -> Vec<SwapCompletion> {
            let completions = self.swap.device_mut().complete_all();
            completions
                .into_iter()
                .filter_map(|c| self.swap.complete(&mut self.frames, &mut self.mem, c))
                .collect()
        }
    }

    #[test]
    fn test_slot_count_clamped_to_device() {
        // 64 sectors minus 8 reserved leaves room for 7 slots.
        let rig = Rig::new(100);
        assert_eq!(rig.swap.slot_count(), 7);
    }

    #[test]
    fn test_out_of_swap() {
        let mut rig = Rig::new(1);
        assert_eq!(rig.swap.allocate_slot(PAGE), Ok(0));
        assert_eq!(rig.swap.owner_of_slot(0), Some(PAGE));
        assert_eq!(rig.swap.allocate_slot(PAGE), Err(PagerError::OutOfSwap));
        assert!(rig.swap.free_slot(0));
        assert!(!rig.swap.free_slot(0));
        assert_eq!(rig.swap.owner_of_slot(0), None);
    }

    #[test]
    fn test_write_then_read_restores_bytes() {
        let mut rig = Rig::new(4);
        let frame = rig.frames.allocate_free().unwrap();
        for (i, byte) in rig.mem.frame_mut(frame).iter_mut().enumerate() {
            *byte = (i % 251) as u8;
        }
        let slot = rig.swap.allocate_slot(PAGE).unwrap();

        let token = rig
            .swap
            .write_out(&mut rig.frames, &rig.mem, frame, slot)
            .unwrap();
        assert_eq!(rig.frames.state(frame), FrameState::InTransit);
        assert_eq!(rig.swap.device().pending_count(), SECTORS_PER_PAGE);

        let done = rig.settle();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].token, token);
        assert_eq!(done[0].kind, Transfer::Write);
        assert_eq!(done[0].status, Ok(()));
        assert_eq!(rig.frames.state(frame), FrameState::Pinned);
        // slot 0 starts at sector 8
        assert_eq!(rig.swap.device().sector(8)[1], 1);

        rig.mem.zero(frame);
        rig.swap.read_in(&mut rig.frames, slot, frame).unwrap();
        let done = rig.settle();
        assert_eq!(done[0].kind, Transfer::Read);
        assert_eq!(done[0].status, Ok(()));
        assert!(rig
            .mem
            .frame(frame)
            .iter()
            .enumerate()
            .all(|(i, &byte)| byte == (i % 251) as u8));
        assert_eq!(rig.swap.in_flight(), 0);
    }

    #[test]
    fn test_failed_sector_fails_transfer_and_leaves_frame() {
        let mut rig = Rig::new(4);
        let frame = rig.frames.allocate_free().unwrap();
        rig.mem.frame_mut(frame).fill(0x5A);
        let slot = rig.swap.allocate_slot(PAGE).unwrap();

        rig.swap.read_in(&mut rig.frames, slot, frame).unwrap();
        rig.swap.device_mut().fail_next(1);
        let done = rig.settle();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].status, Err(BlockError::ReadError));
        assert!(rig.mem.frame(frame).iter().all(|&b| b == 0x5A));
        assert_eq!(rig.frames.state(frame), FrameState::Pinned);
    }

    #[test]
    fn test_abandoned_transfer_ignores_late_sectors() {
        let mut rig = Rig::new(4);
        let frame = rig.frames.allocate_free().unwrap();
        let slot = rig.swap.allocate_slot(PAGE).unwrap();

        let token = rig
            .swap
            .write_out(&mut rig.frames, &rig.mem, frame, slot)
            .unwrap();
        assert_eq!(rig.swap.abandon(&mut rig.frames, token), Some(frame));
        assert_eq!(rig.frames.state(frame), FrameState::Pinned);
        assert!(rig.settle().is_empty());
        assert_eq!(rig.swap.abandon(&mut rig.frames, token), None);
    }

    #[test]
    fn test_unknown_completion_ignored() {
        let mut rig = Rig::new(1);
        let stray = IoCompletion {
            token: 999,
            status: Ok(()),
            data: Vec::new(),
        };
        assert!(rig
            .swap
            .complete(&mut rig.frames, &mut rig.mem, stray)
            .is_none());
    }
}
