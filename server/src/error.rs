use crate::block::BlockError;
use crate::mem::rights::Rights;
use core::error::Error;
use core::fmt::{self, Display, Formatter};

pub type Result<T> = core::result::Result<T, PagerError>;

/// Why a fault could not be resolved.
///
/// Only [`PagerError::OutOfSwap`], exhausted [`PagerError::SwapIo`] and
/// [`PagerError::InvalidFault`] ever reach a client, as the reason its
/// process was terminated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PagerError {
    /// No free frame and nothing evictable right now. The request waits.
    OutOfFrames,
    /// Every swap slot is taken.
    OutOfSwap,
    /// The backing store kept failing.
    SwapIo(BlockError),
    /// Access to an address the process has no rights to.
    InvalidFault { addr: u32, access: Rights },
    /// The faulting process is already gone.
    ProcessGone,
}

impl PagerError {
    /// Whether this ends the faulting process.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::OutOfSwap | Self::SwapIo(_) | Self::InvalidFault { .. }
        )
    }
}

impl Display for PagerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfFrames => write!(f, "out of physical frames"),
            Self::OutOfSwap => write!(f, "out of swap space"),
            Self::SwapIo(err) => write!(f, "swap I/O failed: {err}"),
            Self::InvalidFault { addr, access } => {
                write!(f, "invalid {access} access at {addr:#010x}")
            }
            Self::ProcessGone => write!(f, "process no longer exists"),
        }
    }
}

impl Error for PagerError {}
