pub mod eviction_ring;
pub mod frame_table;
pub mod layout;
pub mod page_table;
pub mod phys;
pub mod rights;

use core::fmt;
use pagesrv_shared::mem::{page_address, page_number};

/// Index of a physical frame in the pool the server manages.
pub type FrameNumber = usize;

/// Process id. Every process has exactly one address space, so this also
/// names the address space.
pub type Pid = u32;

/// Virtual page number: a 32-bit virtual address without its 12 offset bits.
pub type Vpn = u32;

/// Largest frame or swap slot count a page table entry can refer to.
pub const MAX_INDEX: usize = 1 << 20;

/// One virtual page of one address space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Page {
    pub asid: Pid,
    pub vpn: Vpn,
}

impl Page {
    pub const fn new(asid: Pid, vpn: Vpn) -> Self {
        Self { asid, vpn }
    }

    /// The page containing virtual address `addr`.
    pub const fn containing(asid: Pid, addr: u32) -> Self {
        Self {
            asid,
            vpn: page_number(addr as usize) as Vpn,
        }
    }

    pub const fn address(&self) -> u32 {
        page_address(self.vpn as usize) as u32
    }
}

impl fmt::Display for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:#010x}", self.asid, self.address())
    }
}
