//! Fault resolution.
//!
//! Every fault becomes a fault request that walks
//!
//! ```text
//! Start -> Allocating -> [Evicting ->] Loading -> Mapping
//!                                  \-> Failed
//! ```
//!
//! A request runs until it has to wait for a swap transfer (or for a frame,
//! or for another request on the same page), then parks. The [`Event`] that
//! ends the wait picks it up again. All of this happens inside
//! [`Pager::dispatch`], one event at a time.

mod request;

pub use request::{FaultState, RequestId};

use crate::address_space::{AddressSpaceOps, MapError};
use crate::block::{BlockDevice, BlockError, IoCompletion};
use crate::config::PagerConfig;
use crate::error::PagerError;
use crate::ipc::{Event, ThreadId};
use crate::kernel::{AlarmClock, AlarmCookie, ProcessControl};
use crate::mem::{
    eviction_ring::EvictionRing,
    frame_table::{FrameState, FrameTable},
    layout::Layout,
    page_table::{PageLocation, PageTable},
    phys::PhysMem,
    rights::Rights,
    FrameNumber, Page, Pid, Vpn, MAX_INDEX,
};
use crate::swap::{SlotNumber, SwapStore, SwapToken, Transfer};
use alloc::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    vec::Vec,
};
use pagesrv_shared::{eprintln, println};
use request::{split_cookie, FaultRequest, PageBusy};

/// Longest retry delay, as a power of two of the base backoff.
const MAX_BACKOFF_SHIFT: u32 = 16;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PagerStats {
    pub faults: u64,
    pub zero_fills: u64,
    pub swap_ins: u64,
    pub swap_outs: u64,
    pub clean_evictions: u64,
    pub retries: u64,
    pub terminations: u64,
}

struct AddressSpace {
    table: PageTable,
    layout: Layout,
}

/// Rights to map a page with, given what its process has faulted for.
/// Clean pages are mapped without write so the first write faults and marks
/// them dirty.
fn mapping_rights(requested: Rights, dirty: bool) -> Rights {
    if dirty {
        requested
    } else {
        requested.without(Rights::WRITE)
    }
}

pub struct Pager<M, D, K, C>
where
    M: AddressSpaceOps,
    D: BlockDevice,
    K: ProcessControl,
    C: AlarmClock,
{
    config: PagerConfig,
    frames: FrameTable,
    ring: EvictionRing,
    swap: SwapStore<D>,
    mem: PhysMem,
    spaces: BTreeMap<Pid, AddressSpace>,

    requests: BTreeMap<RequestId, FaultRequest>,
    next_request: RequestId,
    /// Pages with a request in progress, or being evicted.
    busy: BTreeMap<Page, PageBusy>,
    /// Which request issued each page transfer.
    transfers: BTreeMap<SwapToken, RequestId>,
    /// Requests that found no free frame and nothing to evict.
    frame_waiters: VecDeque<RequestId>,
    /// Requests to resume before the current dispatch returns.
    ready: VecDeque<RequestId>,

    mmu: M,
    kernel: K,
    clock: C,
    stats: PagerStats,
}

impl<M, D, K, C> Pager<M, D, K, C>
where
    M: AddressSpaceOps,
    D: BlockDevice,
    K: ProcessControl,
    C: AlarmClock,
{
    pub fn new(config: PagerConfig, mem: PhysMem, device: D, mmu: M, kernel: K, clock: C) -> Self {
        let frame_count = mem
            .frame_count()
            .min(config.frames.unwrap_or(usize::MAX))
            .min(MAX_INDEX);
        let swap = SwapStore::new(
            device,
            config.swap_start,
            config.swap_slots.min(MAX_INDEX),
        );
        println!(
            "pager: managing {} frames, {} swap slots",
            frame_count,
            swap.slot_count()
        );

        Self {
            config,
            frames: FrameTable::new(frame_count),
            ring: EvictionRing::new(frame_count),
            swap,
            mem,
            spaces: BTreeMap::new(),
            requests: BTreeMap::new(),
            next_request: 1,
            busy: BTreeMap::new(),
            transfers: BTreeMap::new(),
            frame_waiters: VecDeque::new(),
            ready: VecDeque::new(),
            mmu,
            kernel,
            clock,
            stats: PagerStats::default(),
        }
    }

    pub fn config(&self) -> &PagerConfig {
        &self.config
    }

    pub fn stats(&self) -> PagerStats {
        self.stats
    }

    pub fn frames(&self) -> &FrameTable {
        &self.frames
    }

    pub fn ring(&self) -> &EvictionRing {
        &self.ring
    }

    pub fn swap(&self) -> &SwapStore<D> {
        &self.swap
    }

    pub fn memory(&self) -> &PhysMem {
        &self.mem
    }

    /// The managed frames. The server maps them one-to-one, so this is also
    /// how it inspects and patches page contents.
    pub fn memory_mut(&mut self) -> &mut PhysMem {
        &mut self.mem
    }

    pub fn mmu(&self) -> &M {
        &self.mmu
    }

    pub fn mmu_mut(&mut self) -> &mut M {
        &mut self.mmu
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    pub fn device_mut(&mut self) -> &mut D {
        self.swap.device_mut()
    }

    /// Number of faults not yet resolved.
    pub fn pending_requests(&self) -> usize {
        self.requests.len()
    }

    /// State of the request currently resolving `page`, if any.
    pub fn request_state(&self, page: Page) -> Option<FaultState> {
        self.requests
            .values()
            .find(|req| req.page == page && req.holds_page)
            .map(|req| req.state)
    }

    pub fn is_busy(&self, page: Page) -> bool {
        self.busy.contains_key(&page)
    }

    /// Starts paging for a new process. Returns `false` if `pid` is already
    /// known.
    pub fn register_process(&mut self, pid: Pid, layout: Layout) -> bool {
        if self.spaces.contains_key(&pid) {
            return false;
        }
        self.spaces.insert(
            pid,
            AddressSpace {
                table: PageTable::new(),
                layout,
            },
        );
        true
    }

    pub fn is_registered(&self, pid: Pid) -> bool {
        self.spaces.contains_key(&pid)
    }

    /// Where `page` currently lives.
    pub fn lookup(&self, page: Page) -> PageLocation {
        self.spaces
            .get(&page.asid)
            .map_or(PageLocation::Unbacked, |space| space.table.lookup(page.vpn))
    }

    /// Handles one event, and everything it makes runnable.
    pub fn dispatch(&mut self, event: Event) {
        match event {
            Event::Fault {
                client,
                addr,
                access,
            } => self.on_fault(client, addr, access),
            Event::Io(completion) => self.on_io(completion),
            Event::Alarm(cookie) => self.on_alarm(cookie),
            Event::Access { asid, addr, access } => self.record_access(asid, addr, access),
            Event::ProcessCreated(pid) => {
                if !self.register_process(pid, Layout::standard()) {
                    eprintln!("pager: process {} created twice", pid);
                }
            }
            Event::ProcessDestroyed(pid) => self.on_process_destroyed(pid),
        }
        self.run_ready();
    }

    fn on_fault(&mut self, client: ThreadId, addr: u32, access: Rights) {
        let Some(pid) = self.kernel.process_of(client) else {
            eprintln!("pager: fault at {:#010x} from unknown thread {:?}", addr, client);
            return;
        };
        if !self.spaces.contains_key(&pid) {
            eprintln!("pager: fault from unregistered process {}", pid);
            return;
        }
        self.submit(Page::containing(pid, addr), addr, access, Some(client));
    }

    /// Starts resolving a fault by `client` on `page`.
    pub fn handle_fault(&mut self, page: Page, access: Rights, client: ThreadId) {
        self.submit(page, page.address(), access, Some(client));
        self.run_ready();
    }

    fn submit(&mut self, page: Page, addr: u32, access: Rights, client: Option<ThreadId>) {
        self.stats.faults += 1;
        let id = self.next_request_id();
        self.requests
            .insert(id, FaultRequest::new(id, page, addr, access, client));
        trace!("pager: request {} for {} {}", id, page, access);
        self.start(id);
    }

    /// Ids wrap, skipping 0 and any still in use.
    fn next_request_id(&mut self) -> RequestId {
        loop {
            let id = self.next_request;
            self.next_request = self.next_request.wrapping_add(1);
            if id != 0 && !self.requests.contains_key(&id) {
                return id;
            }
        }
    }

    fn run_ready(&mut self) {
        while let Some(id) = self.ready.pop_front() {
            let Some(req) = self.requests.get(&id) else {
                continue;
            };
            match req.state {
                FaultState::Start => self.start(id),
                FaultState::Allocating => self.allocate(id),
                _ => {}
            }
        }
    }

    fn set_state(&mut self, id: RequestId, state: FaultState) {
        if let Some(req) = self.requests.get_mut(&id) {
            trace!("pager: request {} {:?} -> {:?}", id, req.state, state);
            req.state = state;
        }
    }

    fn start(&mut self, id: RequestId) {
        let Some(req) = self.requests.get(&id).copied() else {
            return;
        };
        let page = req.page;
        let Some(space) = self.spaces.get(&page.asid) else {
            self.requests.remove(&id);
            return;
        };

        if !space.layout.permits(req.addr, req.access) {
            self.fail(
                id,
                PagerError::InvalidFault {
                    addr: req.addr,
                    access: req.access,
                },
            );
            return;
        }

        if let Some(busy) = self.busy.get_mut(&page) {
            trace!("pager: request {} waits for {}", id, page);
            busy.waiters.push_back(id);
            return;
        }

        if let PageLocation::Resident(frame) = space.table.lookup(page.vpn) {
            self.serve_resident(id, frame);
            return;
        }

        self.busy.insert(page, PageBusy::default());
        if let Some(req) = self.requests.get_mut(&id) {
            req.holds_page = true;
        }
        self.set_state(id, FaultState::Allocating);
        self.allocate(id);
    }

    /// The page is already in memory; its mapping was revoked or lacked a
    /// right.
    fn serve_resident(&mut self, id: RequestId, frame: FrameNumber) {
        let Some(req) = self.requests.remove(&id) else {
            return;
        };
        let page = req.page;
        debug_assert_eq!(self.frames.state(frame), FrameState::Resident);

        self.frames.set_referenced(frame, true);
        if req.access.write() {
            self.frames.set_dirty(frame, true);
        }
        let requested = self.frames.requested_rights(frame).union(req.access);
        let rights = mapping_rights(requested, self.frames.is_dirty(frame));

        match self.mmu.install(page.asid, page.vpn, frame, rights) {
            Ok(()) => {
                self.frames.set_requested_rights(frame, requested);
                if let Some(client) = req.client {
                    self.kernel.reply(client);
                }
            }
            Err(MapError::NoSuchSpace) => {}
            Err(MapError::Rejected) => {
                self.requests.insert(id, req);
                self.fail(
                    id,
                    PagerError::InvalidFault {
                        addr: req.addr,
                        access: req.access,
                    },
                );
            }
        }
    }

    fn allocate(&mut self, id: RequestId) {
        if let Some(frame) = self.frames.allocate_free() {
            self.begin_loading(id, frame);
        } else if !self.ring.is_empty() {
            self.begin_eviction(id);
        } else {
            trace!("pager: request {} {}", id, PagerError::OutOfFrames);
            self.set_state(id, FaultState::Allocating);
            self.frame_waiters.push_back(id);
        }
    }

    fn begin_eviction(&mut self, id: RequestId) {
        let mmu = &mut self.mmu;
        let Some(victim) = self.ring.select_victim(&mut self.frames, |_, owner| {
            if let Some(owner) = owner {
                mmu.revoke(owner.asid, owner.vpn);
            }
        }) else {
            self.frame_waiters.push_back(id);
            return;
        };
        let frame = victim.frame;
        let Some(victim_page) = self.frames.owner_of(frame) else {
            debug_assert!(false, "resident frame {frame} without owner");
            self.frame_waiters.push_back(id);
            return;
        };

        self.ring.remove(frame);
        self.frames.mark_pinned(frame);
        self.mmu.revoke(victim_page.asid, victim_page.vpn);
        self.frames.set_requested_rights(frame, Rights::NONE);
        debug_assert!(!self.busy.contains_key(&victim_page));
        self.busy.insert(victim_page, PageBusy::default());
        trace!("pager: request {} evicts {} from frame {}", id, victim_page, frame);

        if !self.frames.is_dirty(frame) {
            self.stats.clean_evictions += 1;
            if let Some(space) = self.spaces.get_mut(&victim_page.asid) {
                space.table.clear(victim_page.vpn);
            }
            self.frames.recycle(frame);
            self.release_page(victim_page);
            self.begin_loading(id, frame);
            return;
        }

        match self.swap.allocate_slot(victim_page) {
            Ok(slot) => {
                self.reset_attempts(id);
                self.set_state(
                    id,
                    FaultState::Evicting {
                        victim: frame,
                        victim_page,
                        slot,
                        token: None,
                    },
                );
                self.issue(id);
            }
            Err(err) => {
                self.restore_victim(frame, victim_page);
                self.fail(id, err);
            }
        }
    }

    /// Puts an eviction victim back the way it was: Resident, still dirty,
    /// in the ring. If its process is gone meanwhile the frame is freed.
    fn restore_victim(&mut self, frame: FrameNumber, page: Page) {
        if self.spaces.contains_key(&page.asid) {
            self.frames.unpin(frame);
            self.ring.insert(frame);
        } else {
            self.frames.mark_free(frame);
        }
        self.release_page(page);
        self.wake_frame_waiters();
    }

    fn begin_loading(&mut self, id: RequestId, frame: FrameNumber) {
        let Some(req) = self.requests.get(&id).copied() else {
            self.frames.mark_free(frame);
            return;
        };
        let page = req.page;
        let Some(space) = self.spaces.get(&page.asid) else {
            self.frames.mark_free(frame);
            self.requests.remove(&id);
            self.release_page(page);
            self.wake_frame_waiters();
            return;
        };
        self.frames.assign(frame, page);

        match space.table.lookup(page.vpn) {
            PageLocation::Swapped(slot) => {
                self.reset_attempts(id);
                self.set_state(
                    id,
                    FaultState::Loading {
                        frame,
                        slot: Some(slot),
                        token: None,
                    },
                );
                self.issue(id);
            }
            _ => {
                self.mem.zero(frame);
                self.stats.zero_fills += 1;
                if req.access.write() {
                    self.frames.set_dirty(frame, true);
                }
                self.finish_mapping(id, frame, None);
            }
        }
    }

    fn reset_attempts(&mut self, id: RequestId) {
        if let Some(req) = self.requests.get_mut(&id) {
            req.attempts = 0;
        }
    }

    /// Starts (or restarts) the transfer the request is waiting on.
    fn issue(&mut self, id: RequestId) {
        let Some(req) = self.requests.get(&id).copied() else {
            return;
        };
        let issued = match req.state {
            FaultState::Evicting { victim, slot, .. } => {
                self.swap.write_out(&mut self.frames, &self.mem, victim, slot)
            }
            FaultState::Loading {
                frame,
                slot: Some(slot),
                ..
            } => self.swap.read_in(&mut self.frames, slot, frame),
            _ => return,
        };

        match issued {
            Ok(token) => {
                self.transfers.insert(token, id);
                let timeout = self.config.io_timeout_us;
                if let Some(req) = self.requests.get_mut(&id) {
                    req.set_token(Some(token));
                    let cookie = req.next_alarm();
                    self.clock.register_delay(timeout, cookie);
                }
            }
            Err(err) => self.transfer_failed(id, err),
        }
    }

    fn on_io(&mut self, completion: IoCompletion) {
        let Some(done) = self.swap.complete(&mut self.frames, &mut self.mem, completion) else {
            return;
        };
        let Some(id) = self.transfers.remove(&done.token) else {
            eprintln!("pager: completion for unknown transfer {}", done.token);
            return;
        };
        let Some(req) = self.requests.get_mut(&id) else {
            return;
        };
        req.set_token(None);
        if req.cancelled {
            self.settle_cancelled(id, done.status);
            return;
        }
        match done.status {
            Ok(()) => self.transfer_done(id),
            Err(err) => self.transfer_failed(id, err),
        }
    }

    fn on_alarm(&mut self, cookie: AlarmCookie) {
        let (id, generation) = split_cookie(cookie);
        let Some(req) = self.requests.get_mut(&id) else {
            return;
        };
        if req.generation != generation {
            return;
        }

        let Some(token) = req.state.token() else {
            // Retry delay is over.
            if req.cancelled {
                self.settle_cancelled(id, Err(BlockError::ReadError));
            } else {
                self.issue(id);
            }
            return;
        };

        req.set_token(None);
        let cancelled = req.cancelled;
        self.transfers.remove(&token);
        let kind = match self.swap.abandon(&mut self.frames, token) {
            Some(_) => req_kind(req.state),
            None => return,
        };
        eprintln!(
            "pager: [{}us] swap transfer {} for request {} stalled",
            self.clock.now(),
            token,
            id
        );
        let err = match kind {
            Transfer::Read => BlockError::ReadError,
            Transfer::Write => BlockError::WriteError,
        };
        if cancelled {
            self.settle_cancelled(id, Err(err));
        } else {
            self.transfer_failed(id, err);
        }
    }

    fn transfer_failed(&mut self, id: RequestId, err: BlockError) {
        let retries = self.config.io_retries;
        let backoff = self.config.retry_backoff_us;
        let Some(req) = self.requests.get_mut(&id) else {
            return;
        };
        req.attempts += 1;

        if req.attempts <= retries {
            let delay = backoff.saturating_mul(1 << (req.attempts - 1).min(MAX_BACKOFF_SHIFT));
            eprintln!(
                "pager: swap I/O for {} failed ({}), retry {} of {} in {}us",
                req.page, err, req.attempts, retries, delay
            );
            req.set_token(None);
            let cookie = req.next_alarm();
            self.clock.register_delay(delay, cookie);
            self.stats.retries += 1;
            return;
        }

        let state = req.state;
        match state {
            FaultState::Evicting {
                victim,
                victim_page,
                slot,
                ..
            } => {
                self.swap.free_slot(slot);
                self.restore_victim(victim, victim_page);
            }
            FaultState::Loading { frame, .. } => {
                self.frames.mark_free(frame);
                self.wake_frame_waiters();
            }
            _ => {}
        }
        self.fail(id, PagerError::SwapIo(err));
    }

    fn transfer_done(&mut self, id: RequestId) {
        let Some(req) = self.requests.get(&id).copied() else {
            return;
        };
        match req.state {
            FaultState::Evicting {
                victim,
                victim_page,
                slot,
                ..
            } => {
                self.stats.swap_outs += 1;
                match self.spaces.get_mut(&victim_page.asid) {
                    Some(space) => space.table.set(victim_page.vpn, PageLocation::Swapped(slot)),
                    None => {
                        self.swap.free_slot(slot);
                    }
                }
                self.frames.recycle(victim);
                self.release_page(victim_page);
                self.begin_loading(id, victim);
            }
            FaultState::Loading {
                frame,
                slot: Some(slot),
                ..
            } => {
                self.stats.swap_ins += 1;
                self.finish_mapping(id, frame, Some(slot));
            }
            _ => {}
        }
    }

    /// Installs the mapping and makes the frame Resident. `restored` is the
    /// slot the contents came from, released once the page is in.
    fn finish_mapping(&mut self, id: RequestId, frame: FrameNumber, restored: Option<SlotNumber>) {
        self.set_state(id, FaultState::Mapping { frame });
        let Some(req) = self.requests.get(&id).copied() else {
            return;
        };
        let page = req.page;
        let Some(space) = self.spaces.get(&page.asid) else {
            self.frames.mark_free(frame);
            self.requests.remove(&id);
            self.release_page(page);
            self.wake_frame_waiters();
            return;
        };

        if restored.is_some() {
            // The slot is released below, so the frame is the only copy.
            self.frames.set_dirty(frame, true);
        }
        let rights = mapping_rights(req.access, self.frames.is_dirty(frame));

        match self.mmu.install(page.asid, page.vpn, frame, rights) {
            Ok(()) => {}
            Err(MapError::NoSuchSpace) => {
                self.frames.mark_free(frame);
                self.requests.remove(&id);
                self.release_page(page);
                self.wake_frame_waiters();
                return;
            }
            Err(MapError::Rejected) => {
                self.frames.mark_free(frame);
                self.wake_frame_waiters();
                self.fail(
                    id,
                    PagerError::InvalidFault {
                        addr: req.addr,
                        access: req.access,
                    },
                );
                return;
            }
        }

        if let Some(slot) = restored {
            self.swap.free_slot(slot);
        }
        self.frames.mark_resident(frame, page, req.access);
        self.frames.set_referenced(frame, true);
        self.ring.insert(frame);
        if let Some(space) = self.spaces.get_mut(&page.asid) {
            space.table.set(page.vpn, PageLocation::Resident(frame));
        }

        self.requests.remove(&id);
        self.release_page(page);
        if let Some(client) = req.client {
            self.kernel.reply(client);
        }
        trace!("pager: {} resident in frame {} as {}", page, frame, rights);
        self.wake_frame_waiters();
    }

    /// Ends a request that cannot be resolved, and its process with it.
    fn fail(&mut self, id: RequestId, reason: PagerError) {
        self.set_state(id, FaultState::Failed(reason));
        let Some(req) = self.requests.remove(&id) else {
            return;
        };
        if req.holds_page {
            self.release_page(req.page);
        }

        let pid = req.page.asid;
        if !reason.is_fatal() || !self.spaces.contains_key(&pid) {
            return;
        }
        eprintln!(
            "pager: [{}us] terminating process {} at {:#010x}: {}",
            self.clock.now(),
            pid,
            req.addr,
            reason
        );
        self.stats.terminations += 1;
        self.kernel.terminate(pid, reason);
        self.reclaim(pid);
    }

    /// A transfer of a cancelled request settled; undo what it held.
    fn settle_cancelled(&mut self, id: RequestId, status: Result<(), BlockError>) {
        let Some(req) = self.requests.remove(&id) else {
            return;
        };
        match req.state {
            FaultState::Loading { frame, slot, .. } => {
                self.frames.mark_free(frame);
                if let Some(slot) = slot {
                    self.swap.free_slot(slot);
                }
            }
            FaultState::Evicting {
                victim,
                victim_page,
                slot,
                ..
            } => {
                let alive = self.spaces.contains_key(&victim_page.asid);
                if status.is_ok() && alive {
                    if let Some(space) = self.spaces.get_mut(&victim_page.asid) {
                        space.table.set(victim_page.vpn, PageLocation::Swapped(slot));
                    }
                    self.stats.swap_outs += 1;
                    self.frames.mark_free(victim);
                    self.release_page(victim_page);
                } else {
                    self.swap.free_slot(slot);
                    // frees the frame instead if the owner is gone too
                    self.restore_victim(victim, victim_page);
                }
            }
            _ => {}
        }
        if req.holds_page {
            self.release_page(req.page);
        }
        self.wake_frame_waiters();
    }

    fn release_page(&mut self, page: Page) {
        if let Some(busy) = self.busy.remove(&page) {
            self.ready.extend(busy.waiters);
        }
    }

    fn wake_frame_waiters(&mut self) {
        self.ready.extend(self.frame_waiters.drain(..));
    }

    /// Notes an access the kernel observed on a mapped page.
    pub fn record_access(&mut self, asid: Pid, addr: u32, access: Rights) {
        let page = Page::containing(asid, addr);
        let PageLocation::Resident(frame) = self.lookup(page) else {
            return;
        };
        if self.frames.state(frame) != FrameState::Resident {
            return;
        }
        self.frames.set_referenced(frame, true);
        if access.write() {
            self.frames.set_dirty(frame, true);
        }
    }

    /// Revokes every mapping of `pid`. The pages stay resident; touching
    /// them again faults and is served from memory.
    pub fn unmap_all(&mut self, pid: Pid) {
        let Some(space) = self.spaces.get(&pid) else {
            return;
        };
        for (vpn, location) in space.table.iter() {
            if let PageLocation::Resident(frame) = location {
                self.mmu.revoke(pid, vpn);
                self.frames.set_requested_rights(frame, Rights::NONE);
            }
        }
    }

    /// Called by the process lifecycle layer once `pid` is gone.
    pub fn on_process_destroyed(&mut self, pid: Pid) {
        if !self.spaces.contains_key(&pid) {
            return;
        }
        self.reclaim(pid);
        self.run_ready();
    }

    /// Releases everything `pid` holds. Frames and slots still under
    /// transfer are released when the transfer settles.
    fn reclaim(&mut self, pid: Pid) {
        let mut doomed = BTreeSet::new();
        let mut reading = BTreeSet::new();
        let ids: Vec<RequestId> = self
            .requests
            .values()
            .filter(|req| req.page.asid == pid)
            .map(|req| req.id)
            .collect();

        for id in ids {
            let Some(req) = self.requests.get(&id).copied() else {
                continue;
            };
            match req.state {
                FaultState::Evicting { token: Some(_), .. } => {
                    self.cancel(id);
                }
                FaultState::Loading {
                    token: Some(_),
                    slot,
                    ..
                } => {
                    reading.extend(slot);
                    self.cancel(id);
                }
                FaultState::Evicting {
                    victim,
                    victim_page,
                    slot,
                    token: None,
                } => {
                    self.requests.remove(&id);
                    self.swap.free_slot(slot);
                    self.restore_victim(victim, victim_page);
                    doomed.insert(id);
                }
                FaultState::Loading {
                    frame, token: None, ..
                } => {
                    self.requests.remove(&id);
                    self.frames.mark_free(frame);
                    doomed.insert(id);
                }
                _ => {
                    self.requests.remove(&id);
                    doomed.insert(id);
                }
            }
            if doomed.contains(&id) && req.holds_page {
                self.release_page(req.page);
            }
        }

        self.frame_waiters.retain(|id| !doomed.contains(id));
        self.ready.retain(|id| !doomed.contains(id));
        for busy in self.busy.values_mut() {
            busy.waiters.retain(|id| !doomed.contains(id));
        }

        let resident: Vec<FrameNumber> = self
            .frames
            .owned_by(pid)
            .filter(|&frame| self.frames.state(frame) == FrameState::Resident)
            .collect();
        for frame in resident {
            self.ring.remove(frame);
            self.frames.mark_free(frame);
        }

        if let Some(space) = self.spaces.remove(&pid) {
            for (_, location) in space.table.iter() {
                if let PageLocation::Swapped(slot) = location {
                    if !reading.contains(&slot) {
                        self.swap.free_slot(slot);
                    }
                }
            }
        }
        trace!("pager: reclaimed process {}", pid);
        self.wake_frame_waiters();
    }

    fn cancel(&mut self, id: RequestId) {
        if let Some(req) = self.requests.get_mut(&id) {
            req.cancelled = true;
        }
    }

    /// Takes a zeroed frame for the image loader. It is not evictable and
    /// belongs to nobody until [`Self::adopt_loaded_page`].
    pub fn claim_loader_frame(&mut self) -> Option<FrameNumber> {
        let frame = self.frames.claim_for_loader()?;
        self.mem.zero(frame);
        Some(frame)
    }

    pub fn loader_frame_mut(&mut self, frame: FrameNumber) -> Option<&mut [u8]> {
        if !self.frames.is_loader_frame(frame) {
            return None;
        }
        Some(self.mem.frame_mut(frame))
    }

    /// Maps a loader frame into `pid` at `vpn`. From then on it is an
    /// ordinary dirty resident page.
    pub fn adopt_loaded_page(
        &mut self,
        pid: Pid,
        vpn: Vpn,
        frame: FrameNumber,
        rights: Rights,
    ) -> Result<(), PagerError> {
        let page = Page::new(pid, vpn);
        let invalid = PagerError::InvalidFault {
            addr: page.address(),
            access: rights,
        };
        if !self.frames.is_loader_frame(frame) {
            return Err(invalid);
        }
        let space = self.spaces.get(&pid).ok_or(PagerError::ProcessGone)?;
        if !space.layout.permits(page.address(), rights)
            || space.table.lookup(vpn) != PageLocation::Unbacked
            || self.busy.contains_key(&page)
        {
            return Err(invalid);
        }

        self.mmu
            .install(pid, vpn, frame, rights)
            .map_err(|err| match err {
                MapError::NoSuchSpace => PagerError::ProcessGone,
                MapError::Rejected => invalid,
            })?;
        self.frames.mark_resident(frame, page, rights);
        self.frames.set_dirty(frame, true);
        self.frames.set_referenced(frame, true);
        self.ring.insert(frame);
        if let Some(space) = self.spaces.get_mut(&pid) {
            space.table.set(vpn, PageLocation::Resident(frame));
        }
        self.wake_frame_waiters();
        self.run_ready();
        Ok(())
    }

    /// Gives back a loader frame that was not adopted.
    pub fn release_loader_frame(&mut self, frame: FrameNumber) -> bool {
        if !self.frames.is_loader_frame(frame) {
            return false;
        }
        self.frames.mark_free(frame);
        self.wake_frame_waiters();
        self.run_ready();
        true
    }
}

fn req_kind(state: FaultState) -> Transfer {
    match state {
        FaultState::Evicting { .. } => Transfer::Write,
        _ => Transfer::Read,
    }
}
