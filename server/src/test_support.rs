//! Stand-ins for the kernel services the pager talks to, and a harness that
//! wires them to a [`Pager`] over a [`RamDisk`].

use crate::address_space::{AddressSpaceOps, MapError};
use crate::config::PagerConfig;
use crate::drivers::RamDisk;
use crate::error::PagerError;
use crate::ipc::{Event, ThreadId};
use crate::kernel::{AlarmClock, AlarmCookie, ProcessControl};
use crate::mem::{layout::Layout, page_table::PageLocation, phys::PhysMem, rights::Rights};
use crate::mem::{FrameNumber, Page, Pid, Vpn};
use crate::pager::Pager;
use alloc::{boxed::Box, collections::BTreeMap, vec, vec::Vec};
use pagesrv_shared::mem::{PAGE_SIZE, SECTORS_PER_PAGE};

#[derive(Default)]
pub struct MockMmu {
    pub mappings: BTreeMap<(Pid, Vpn), (FrameNumber, Rights)>,
    pub installs: usize,
    pub revokes: usize,
    /// Every install fails with this while set.
    pub fail_with: Option<MapError>,
}

impl AddressSpaceOps for MockMmu {
    fn install(
        &mut self,
        asid: Pid,
        vpn: Vpn,
        frame: FrameNumber,
        rights: Rights,
    ) -> Result<(), MapError> {
        if let Some(err) = self.fail_with {
            return Err(err);
        }
        self.installs += 1;
        self.mappings.insert((asid, vpn), (frame, rights));
        Ok(())
    }

    fn revoke(&mut self, asid: Pid, vpn: Vpn) {
        self.revokes += 1;
        self.mappings.remove(&(asid, vpn));
    }
}

/// Thread `n` belongs to process `n`; thread number 0 belongs to nobody.
#[derive(Default)]
pub struct MockKernel {
    pub replies: Vec<ThreadId>,
    pub terminated: Vec<(Pid, PagerError)>,
}

impl ProcessControl for MockKernel {
    fn process_of(&self, thread: ThreadId) -> Option<Pid> {
        match thread.thread_no().value() {
            0 => None,
            pid => Some(pid),
        }
    }

    fn reply(&mut self, thread: ThreadId) {
        self.replies.push(thread);
    }

    fn terminate(&mut self, pid: Pid, reason: PagerError) {
        self.terminated.push((pid, reason));
    }
}

#[derive(Default)]
pub struct MockClock {
    pub now: u64,
    pub alarms: Vec<(u64, AlarmCookie)>,
}

impl AlarmClock for MockClock {
    fn register_delay(&mut self, micros: u64, cookie: AlarmCookie) {
        self.alarms.push((micros, cookie));
    }

    fn now(&self) -> u64 {
        self.now
    }
}

pub type TestPager = Pager<MockMmu, RamDisk, MockKernel, MockClock>;

pub struct Harness {
    pub pager: TestPager,
}

pub fn client(pid: Pid) -> ThreadId {
    ThreadId::new(pid, 1)
}

impl Harness {
    /// `frames` frames and a swap device with room for exactly `slots`
    /// slots.
    pub fn new(frames: usize, slots: usize) -> Self {
        let config = PagerConfig {
            swap_slots: slots,
            ..PagerConfig::default()
        };
        Self::with_config(frames, config)
    }

    pub fn with_config(frames: usize, config: PagerConfig) -> Self {
        let bytes = Box::leak(vec![0xEEu8; frames * PAGE_SIZE].into_boxed_slice());
        let sectors = config.swap_start as usize + config.swap_slots * SECTORS_PER_PAGE;
        Self {
            pager: Pager::new(
                config,
                PhysMem::new(bytes),
                RamDisk::new(sectors as u32),
                MockMmu::default(),
                MockKernel::default(),
                MockClock::default(),
            ),
        }
    }

    pub fn spawn(&mut self, pid: Pid) {
        assert!(self.pager.register_process(pid, Layout::standard()));
    }

    pub fn fault(&mut self, pid: Pid, addr: u32, access: Rights) {
        self.pager.dispatch(Event::Fault {
            client: client(pid),
            addr,
            access,
        });
    }

    /// Completes the oldest queued sector request.
    pub fn complete_one(&mut self) -> bool {
        let Some(completion) = self.pager.device_mut().complete_next() else {
            return false;
        };
        self.pager.dispatch(Event::Io(completion));
        true
    }

    /// Completes sector requests, including ones issued along the way,
    /// until the disk is idle.
    pub fn settle_io(&mut self) -> usize {
        let mut count = 0;
        while self.complete_one() {
            count += 1;
        }
        count
    }

    pub fn take_alarms(&mut self) -> Vec<(u64, AlarmCookie)> {
        core::mem::take(&mut self.pager.clock_mut().alarms)
    }

    /// Delivers every alarm registered so far.
    pub fn fire_alarms(&mut self) {
        for (_, cookie) in self.take_alarms() {
            self.pager.dispatch(Event::Alarm(cookie));
        }
    }

    /// Faults `addr` in for writing and fills the page with `byte`, as the
    /// process would.
    pub fn write_page(&mut self, pid: Pid, addr: u32, byte: u8) {
        self.fault(pid, addr, Rights::WRITE);
        self.settle_io();
        let frame = self.frame_of(pid, addr).expect("page not resident");
        self.pager.memory_mut().frame_mut(frame).fill(byte);
    }

    pub fn frame_of(&self, pid: Pid, addr: u32) -> Option<FrameNumber> {
        match self.pager.lookup(Page::containing(pid, addr)) {
            PageLocation::Resident(frame) => Some(frame),
            _ => None,
        }
    }

    pub fn page_bytes(&self, pid: Pid, addr: u32) -> &[u8] {
        let frame = self.frame_of(pid, addr).expect("page not resident");
        self.pager.memory().frame(frame)
    }

    pub fn replies(&self) -> usize {
        self.pager.kernel().replies.len()
    }

    pub fn terminated(&self) -> &[(Pid, PagerError)] {
        &self.pager.kernel().terminated
    }

    pub fn mapping(&self, pid: Pid, addr: u32) -> Option<(FrameNumber, Rights)> {
        let page = Page::containing(pid, addr);
        self.pager.mmu().mappings.get(&(pid, page.vpn)).copied()
    }
}
