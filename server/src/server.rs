use crate::address_space::AddressSpaceOps;
use crate::block::BlockDevice;
use crate::config::{ConfigError, PagerConfig};
use crate::ipc::Event;
use crate::kernel::{AlarmClock, ProcessControl};
use crate::mem::phys::PhysMem;
use crate::pager::Pager;
use pagesrv_shared::console::{self, ConsoleSink};
use pagesrv_shared::{eprintln, println};

/// Where the server's events come from: the IPC endpoint, the block driver's
/// completion queue and the timer, merged.
pub trait RequestChannel {
    /// Blocks for the next event. `None` once the channel is shut down.
    fn receive(&mut self) -> Option<Event>;
}

/// What the root task hands the server at boot.
pub struct Platform<M, D, K, C> {
    /// Where `println!` output goes. Left alone if a sink is already
    /// installed.
    pub console: Option<&'static dyn ConsoleSink>,
    pub mem: PhysMem,
    pub device: D,
    pub mmu: M,
    pub kernel: K,
    pub clock: C,
}

pub struct Server<M, D, K, C>
where
    M: AddressSpaceOps,
    D: BlockDevice,
    K: ProcessControl,
    C: AlarmClock,
{
    pager: Pager<M, D, K, C>,
}

impl<M, D, K, C> Server<M, D, K, C>
where
    M: AddressSpaceOps,
    D: BlockDevice,
    K: ProcessControl,
    C: AlarmClock,
{
    pub fn new(pager: Pager<M, D, K, C>) -> Self {
        Self { pager }
    }

    /// Installs the console, reads the command line and sets up the pager.
    pub fn boot(cmdline: &str, platform: Platform<M, D, K, C>) -> Result<Self, ConfigError> {
        if let Some(sink) = platform.console {
            console::install(sink);
        }

        println!("pager: reading command line `{}`", cmdline);
        let config = match PagerConfig::parse(cmdline) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("pager: bad command line: {}", err);
                return Err(err);
            }
        };

        let pager = Pager::new(
            config,
            platform.mem,
            platform.device,
            platform.mmu,
            platform.kernel,
            platform.clock,
        );
        Ok(Self::new(pager))
    }

    pub fn pager(&self) -> &Pager<M, D, K, C> {
        &self.pager
    }

    pub fn pager_mut(&mut self) -> &mut Pager<M, D, K, C> {
        &mut self.pager
    }

    /// Serves events until the channel closes. Returns how many were handled.
    pub fn run(&mut self, channel: &mut impl RequestChannel) -> usize {
        let mut handled = 0;
        while let Some(event) = channel.receive() {
            self.pager.dispatch(event);
            handled += 1;
        }
        let stats = self.pager.stats();
        println!(
            "pager: channel closed after {} events ({} faults, {} swap-ins, {} swap-outs)",
            handled, stats.faults, stats.swap_ins, stats.swap_outs
        );
        handled
    }

    pub fn into_pager(self) -> Pager<M, D, K, C> {
        self.pager
    }
}

/// Boots the server and serves `channel` until it closes. Processes are
/// announced on the channel with [`Event::ProcessCreated`].
pub fn start<M, D, K, C>(
    cmdline: &str,
    platform: Platform<M, D, K, C>,
    channel: &mut impl RequestChannel,
) -> Result<Server<M, D, K, C>, ConfigError>
where
    M: AddressSpaceOps,
    D: BlockDevice,
    K: ProcessControl,
    C: AlarmClock,
{
    let mut server = Server::boot(cmdline, platform)?;
    server.run(channel);
    Ok(server)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::RamDisk;
    use crate::ipc::FaultMessage;
    use crate::mem::{layout::HEAP_START, page_table::PageLocation, rights::Rights, Page};
    use crate::test_support::{client, Harness, MockClock, MockKernel, MockMmu};
    use alloc::collections::VecDeque;
    use pagesrv_shared::mem::PAGE_SIZE;
    use std::string::String;
    use std::sync::Mutex;
    use zerocopy::AsBytes;

    struct Script(VecDeque<Event>);

    impl RequestChannel for Script {
        fn receive(&mut self) -> Option<Event> {
            self.0.pop_front()
        }
    }

    struct Capture(Mutex<String>);

    impl ConsoleSink for Capture {
        fn write_str(&self, s: &str) {
            if let Ok(mut out) = self.0.lock() {
                out.push_str(s);
            }
        }
    }

    static CAPTURE: Capture = Capture(Mutex::new(String::new()));

    fn platform(
        console: Option<&'static dyn ConsoleSink>,
        frames: usize,
    ) -> Platform<MockMmu, RamDisk, MockKernel, MockClock> {
        let bytes = Box::leak(vec![0u8; frames * PAGE_SIZE].into_boxed_slice());
        Platform {
            console,
            mem: PhysMem::new(bytes),
            device: RamDisk::new(64),
            mmu: MockMmu::default(),
            kernel: MockKernel::default(),
            clock: MockClock::default(),
        }
    }

    #[test]
    fn test_start_boots_from_command_line() {
        let fault = |addr| Event::Fault {
            client: client(1),
            addr,
            access: Rights::READ,
        };
        let events: VecDeque<Event> = [
            Event::ProcessCreated(1),
            fault(HEAP_START),
            fault(HEAP_START + 0x1000),
            Event::ProcessCreated(1),
        ]
        .into_iter()
        .collect();

        let server = start(
            "frames=1 swap_slots=4",
            platform(Some(&CAPTURE), 2),
            &mut Script(events),
        )
        .unwrap();
        let pager = server.into_pager();
        assert_eq!(pager.frames().len(), 1);
        assert_eq!(pager.swap().slot_count(), 4);
        assert!(pager.is_registered(1));
        assert_eq!(pager.kernel().replies.len(), 2);
        // one frame, so the second page displaced the first
        assert_eq!(pager.stats().clean_evictions, 1);

        let out = CAPTURE.0.lock().unwrap();
        assert!(out.contains("pager: managing 1 frames, 4 swap slots"));
        assert!(out.contains("pager: process 1 created twice"));
    }

    #[test]
    fn test_boot_rejects_bad_command_line() {
        let unknown = Server::boot("frames=2 colour=3", platform(None, 2));
        assert!(matches!(unknown, Err(ConfigError::UnknownKey(ref key)) if key == "colour"));

        let zero = Server::boot("frames=0", platform(None, 2));
        assert!(matches!(zero, Err(ConfigError::OutOfRange("frames"))));
    }

    #[test]
    fn test_run_drains_channel() {
        let mut h = Harness::new(2, 4);
        h.spawn(1);
        let raw = FaultMessage::new(client(1), HEAP_START, 0x0200_0000, Rights::READ);
        let events: VecDeque<Event> = [
            Event::decode(raw.as_bytes()).unwrap(),
            Event::Fault {
                client: client(1),
                addr: HEAP_START + 0x1000,
                access: Rights::WRITE,
            },
        ]
        .into_iter()
        .collect();

        let mut server = Server::new(h.pager);
        assert_eq!(server.run(&mut Script(events)), 2);

        let pager = server.into_pager();
        assert_eq!(
            pager.lookup(Page::containing(1, HEAP_START)),
            PageLocation::Resident(0)
        );
        assert_eq!(pager.kernel().replies.len(), 2);
        assert_eq!(pager.stats().faults, 2);
    }
}
