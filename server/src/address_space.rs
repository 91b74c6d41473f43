//! What the pager needs from the kernel's address-space service.

use crate::mem::{rights::Rights, FrameNumber, Pid, Vpn};
use core::error::Error;
use core::fmt::{self, Display, Formatter};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapError {
    /// The address space was destroyed underneath us.
    NoSuchSpace,
    /// The kernel refused the mapping.
    Rejected,
}

impl Display for MapError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSuchSpace => write!(f, "no such address space"),
            Self::Rejected => write!(f, "mapping rejected"),
        }
    }
}

impl Error for MapError {}

/// Hardware page-table maintenance, done by the kernel on our behalf.
pub trait AddressSpaceOps {
    /// Maps `vpn` of `asid` to `frame`, replacing any existing mapping.
    /// Either the whole mapping is installed or nothing is.
    fn install(
        &mut self,
        asid: Pid,
        vpn: Vpn,
        frame: FrameNumber,
        rights: Rights,
    ) -> Result<(), MapError>;

    /// Removes the mapping of `vpn`, if any. The next access faults.
    fn revoke(&mut self, asid: Pid, vpn: Vpn);
}
