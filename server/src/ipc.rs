//! Messages the pager receives.
//!
//! Page faults arrive from the kernel as IPC messages on behalf of the
//! faulting thread. Everything else (swap completions, alarms, process
//! teardown) is delivered by the surrounding server as an [`Event`] directly.

use crate::block::IoCompletion;
use crate::kernel::AlarmCookie;
use crate::mem::{rights::Rights, Pid};
use arbitrary_int::{u12, u14, u18, u4, u6};
use bitbybit::bitfield;
use core::error::Error;
use core::fmt::{self, Display, Formatter};
// These are little-endian unaligned integer types
use zerocopy::little_endian::U32;
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

/// Label the kernel puts in the upper 12 bits of a page fault message.
pub const PAGE_FAULT_LABEL: u12 = u12::new(0xFFE);

/// A global thread id: thread number plus a version that changes every time
/// the number is reused.
#[bitfield(u32)]
pub struct ThreadId {
    #[bits(14..=31, rw)]
    thread_no: u18,
    #[bits(0..=13, rw)]
    version: u14,
}

impl ThreadId {
    pub fn new(thread_no: u32, version: u16) -> Self {
        Self::new_with_raw_value(0)
            .with_thread_no(u18::new(thread_no & 0x3_FFFF))
            .with_version(u14::new(version & 0x3FFF))
    }
}

impl PartialEq for ThreadId {
    fn eq(&self, other: &Self) -> bool {
        self.raw_value() == other.raw_value()
    }
}

impl Eq for ThreadId {}

impl fmt::Debug for ThreadId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ThreadId({}.{})",
            self.thread_no().value(),
            self.version().value()
        )
    }
}

#[bitfield(u32)]
pub struct MessageTag {
    #[bits(20..=31, rw)]
    label: u12,
    /// For page faults, the rwx bits of the faulting access.
    #[bits(16..=19, rw)]
    access: u4,
    #[bits(0..=5, rw)]
    untyped_words: u6,
}

/// A page fault as the kernel delivers it.
#[repr(C)]
#[derive(FromZeroes, FromBytes, AsBytes, Unaligned)]
pub struct FaultMessage {
    tag: U32,
    fault_addr: U32,
    fault_ip: U32,
    sender: U32,
}

impl FaultMessage {
    pub fn new(sender: ThreadId, fault_addr: u32, fault_ip: u32, access: Rights) -> Self {
        let tag = MessageTag::new_with_raw_value(0)
            .with_label(PAGE_FAULT_LABEL)
            .with_access(u4::new(access.bits()))
            .with_untyped_words(u6::new(2));
        Self {
            tag: tag.raw_value().into(),
            fault_addr: fault_addr.into(),
            fault_ip: fault_ip.into(),
            sender: sender.raw_value().into(),
        }
    }

    pub fn tag(&self) -> MessageTag {
        MessageTag::new_with_raw_value(self.tag.get())
    }

    pub fn fault_addr(&self) -> u32 {
        self.fault_addr.get()
    }

    pub fn fault_ip(&self) -> u32 {
        self.fault_ip.get()
    }

    pub fn sender(&self) -> ThreadId {
        ThreadId::new_with_raw_value(self.sender.get())
    }

    pub fn access(&self) -> Rights {
        Rights::from_bits(self.tag().access().value())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IpcError {
    Truncated,
    NotAPageFault { label: u16 },
}

impl Display for IpcError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "message too short"),
            Self::NotAPageFault { label } => write!(f, "unexpected label {label:#x}"),
        }
    }
}

impl Error for IpcError {}

/// Everything that can make the pager do something.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// `client` faulted at `addr` asking for `access`.
    Fault {
        client: ThreadId,
        addr: u32,
        access: Rights,
    },
    /// A sector request finished.
    Io(IoCompletion),
    /// An alarm registered by the pager went off.
    Alarm(AlarmCookie),
    /// The kernel saw an access to a mapped page. Only sets reference and
    /// dirty bits; no reply is sent.
    Access { asid: Pid, addr: u32, access: Rights },
    /// The process lifecycle layer created a process with the standard
    /// layout.
    ProcessCreated(Pid),
    /// The process lifecycle layer tore down a process.
    ProcessDestroyed(Pid),
}

impl Event {
    /// Decodes a raw page fault message.
    pub fn decode(bytes: &[u8]) -> Result<Self, IpcError> {
        let msg = FaultMessage::read_from_prefix(bytes).ok_or(IpcError::Truncated)?;
        let label = msg.tag().label();
        if label != PAGE_FAULT_LABEL {
            return Err(IpcError::NotAPageFault {
                label: label.value(),
            });
        }
        Ok(Self::Fault {
            client: msg.sender(),
            addr: msg.fault_addr(),
            access: msg.access(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_id_fields() {
        let tid = ThreadId::new(0x2_0001, 3);
        assert_eq!(tid.thread_no().value(), 0x2_0001);
        assert_eq!(tid.version().value(), 3);
        assert_eq!(tid.raw_value(), (0x2_0001 << 14) | 3);
    }

    #[test]
    fn test_decode_fault() {
        let client = ThreadId::new(5, 1);
        let msg = FaultMessage::new(client, 0x4000_0010, 0x0200_0400, Rights::WRITE);
        assert_eq!(msg.fault_ip(), 0x0200_0400);
        assert_eq!(
            Event::decode(msg.as_bytes()),
            Ok(Event::Fault {
                client,
                addr: 0x4000_0010,
                access: Rights::WRITE,
            })
        );
    }

    #[test]
    fn test_label_layout() {
        let msg = FaultMessage::new(ThreadId::new(1, 1), 0, 0, Rights::READ);
        // label 0xFFE in the top 12 bits, rwx = 0b100 below it
        assert_eq!(msg.tag().raw_value() >> 16, 0xFFE4);
    }

    #[test]
    fn test_decode_rejects() {
        let msg = FaultMessage::new(ThreadId::new(1, 1), 0, 0, Rights::READ);
        assert_eq!(
            Event::decode(&msg.as_bytes()[..15]),
            Err(IpcError::Truncated)
        );

        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(msg.as_bytes());
        bytes[3] = 0x12;
        assert_eq!(
            Event::decode(&bytes),
            Err(IpcError::NotAPageFault { label: 0x12E })
        );
    }
}
