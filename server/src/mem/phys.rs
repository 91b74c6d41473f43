use super::FrameNumber;
use pagesrv_shared::mem::PAGE_SIZE;

/// The physical memory handed to the server, viewed as an array of frames.
///
/// The server's own address space maps this region one-to-one, so frame
/// contents are read and written directly.
pub struct PhysMem {
    bytes: &'static mut [u8],
}

impl PhysMem {
    /// Wraps `region`. A trailing partial frame is ignored.
    pub fn new(region: &'static mut [u8]) -> Self {
        let usable = region.len() - region.len() % PAGE_SIZE;
        Self {
            bytes: &mut region[..usable],
        }
    }

    pub fn frame_count(&self) -> usize {
        self.bytes.len() / PAGE_SIZE
    }

    pub fn frame(&self, frame: FrameNumber) -> &[u8] {
        let start = frame * PAGE_SIZE;
        &self.bytes[start..start + PAGE_SIZE]
    }

    pub fn frame_mut(&mut self, frame: FrameNumber) -> &mut [u8] {
        let start = frame * PAGE_SIZE;
        &mut self.bytes[start..start + PAGE_SIZE]
    }

    /// Clears a frame so nothing leaks from its previous owner.
    pub fn zero(&mut self, frame: FrameNumber) {
        self.frame_mut(frame).fill(0);
    }
}
