use crate::block::{BlockDevice, BlockError, BlockSector, IoCompletion, IoToken, SECTOR_SIZE};
use alloc::{collections::VecDeque, vec, vec::Vec};

enum Op {
    Read(BlockSector),
    Write(BlockSector, Vec<u8>),
}

/// A block device backed by memory.
///
/// Requests queue up until the owner completes them with
/// [`RamDisk::complete_next`] or [`RamDisk::complete_all`], which lets a
/// caller decide when, and whether, each sector request finishes. Writes only
/// reach the disk contents when they complete.
pub struct RamDisk {
    sectors: Vec<u8>,
    pending: VecDeque<(IoToken, Op)>,
    next_token: IoToken,
    fail_next: usize,
}

impl RamDisk {
    pub fn new(sector_count: BlockSector) -> Self {
        Self {
            sectors: vec![0; sector_count as usize * SECTOR_SIZE],
            pending: VecDeque::new(),
            next_token: 1,
            fail_next: 0,
        }
    }

    /// Makes the next `count` completions report an I/O error.
    pub fn fail_next(&mut self, count: usize) {
        self.fail_next = count;
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Finishes the oldest queued request.
    pub fn complete_next(&mut self) -> Option<IoCompletion> {
        let (token, op) = self.pending.pop_front()?;

        if self.fail_next > 0 {
            self.fail_next -= 1;
            let status = match op {
                Op::Read(_) => Err(BlockError::ReadError),
                Op::Write(..) => Err(BlockError::WriteError),
            };
            return Some(IoCompletion {
                token,
                status,
                data: Vec::new(),
            });
        }

        let data = match op {
            Op::Read(sector) => self.sector(sector).to_vec(),
            Op::Write(sector, buf) => {
                self.sector_mut(sector).copy_from_slice(&buf);
                Vec::new()
            }
        };
        Some(IoCompletion {
            token,
            status: Ok(()),
            data,
        })
    }

    pub fn complete_all(&mut self) -> Vec<IoCompletion> {
        let mut done = Vec::with_capacity(self.pending.len());
        while let Some(completion) = self.complete_next() {
            done.push(completion);
        }
        done
    }

    /// Loses every queued request, as a hung controller would.
    pub fn drop_pending(&mut self) -> usize {
        let count = self.pending.len();
        self.pending.clear();
        count
    }

    pub fn sector(&self, sector: BlockSector) -> &[u8] {
        let start = sector as usize * SECTOR_SIZE;
        &self.sectors[start..start + SECTOR_SIZE]
    }

    fn sector_mut(&mut self, sector: BlockSector) -> &mut [u8] {
        let start = sector as usize * SECTOR_SIZE;
        &mut self.sectors[start..start + SECTOR_SIZE]
    }

    fn queue(&mut self, op: Op) -> IoToken {
        let token = self.next_token;
        self.next_token += 1;
        self.pending.push_back((token, op));
        token
    }
}

impl BlockDevice for RamDisk {
    fn sector_count(&self) -> BlockSector {
        (self.sectors.len() / SECTOR_SIZE) as BlockSector
    }

    fn submit_read(&mut self, sector: BlockSector) -> Result<IoToken, BlockError> {
        if sector >= self.sector_count() {
            return Err(BlockError::SectorOutOfBounds);
        }
        Ok(self.queue(Op::Read(sector)))
    }

    fn submit_write(&mut self, sector: BlockSector, buf: &[u8]) -> Result<IoToken, BlockError> {
        if sector >= self.sector_count() {
            return Err(BlockError::SectorOutOfBounds);
        }
        if buf.len() != SECTOR_SIZE {
            return Err(BlockError::BufferInvalid);
        }
        Ok(self.queue(Op::Write(sector, buf.to_vec())))
    }
}
