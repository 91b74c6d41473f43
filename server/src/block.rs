//! Interface to the backing-store driver.
//!
//! Requests are asynchronous: a submit only queues the operation and returns
//! a token. The driver reports the outcome later as an [`IoCompletion`],
//! delivered to the pager as [`crate::Event::Io`].

use alloc::vec::Vec;
use core::error::Error;
use core::fmt::{Debug, Display, Formatter};
pub use pagesrv_shared::sizes::SECTOR_SIZE;

/// Index of a block device sector.
///
/// Good enough for devices up to 2 TB.
pub type BlockSector = u32;

/// Names one submitted sector request.
pub type IoToken = u64;

/// Error type for block operations
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum BlockError {
    /// The sector is out of bounds (greater than the device size)
    SectorOutOfBounds,
    /// The buffer has an invalid size (not `SECTOR_SIZE`)
    BufferInvalid,
    /// Error reading from the disk
    ReadError,
    /// Error writing to the disk
    WriteError,
}

impl Debug for BlockError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            BlockError::SectorOutOfBounds => write!(f, "SectorOutOfBounds"),
            BlockError::BufferInvalid => write!(f, "BufferInvalid"),
            BlockError::ReadError => write!(f, "ReadError"),
            BlockError::WriteError => write!(f, "WriteError"),
        }
    }
}

impl Display for BlockError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            BlockError::SectorOutOfBounds => write!(f, "sector out of bounds"),
            BlockError::BufferInvalid => write!(f, "invalid buffer size"),
            BlockError::ReadError => write!(f, "error reading from the block device"),
            BlockError::WriteError => write!(f, "error writing to the block device"),
        }
    }
}

impl Error for BlockError {}

/// Lower-level interface to block device drivers
pub trait BlockDevice {
    /// Size of the device in sectors.
    fn sector_count(&self) -> BlockSector;

    /// Queue a read of one sector.
    fn submit_read(&mut self, sector: BlockSector) -> Result<IoToken, BlockError>;

    /// Queue a write of one sector. `buf` is copied before this returns.
    fn submit_write(&mut self, sector: BlockSector, buf: &[u8]) -> Result<IoToken, BlockError>;
}

/// The outcome of one sector request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IoCompletion {
    pub token: IoToken,
    pub status: Result<(), BlockError>,
    /// The sector contents for a successful read, empty otherwise.
    pub data: Vec<u8>,
}
