use crate::error::PagerError;
use crate::ipc::ThreadId;
use crate::kernel::AlarmCookie;
use crate::mem::{rights::Rights, FrameNumber, Page};
use crate::swap::{SlotNumber, SwapToken};
use alloc::collections::VecDeque;

pub type RequestId = u32;

/// Where a fault resolution is. A request only rests in `Start` (queued
/// behind another request for the same page), `Allocating` (waiting for a
/// frame), `Evicting` or `Loading`; `Mapping` and `Failed` are passed
/// through within one dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultState {
    Start,
    Allocating,
    /// Writing `victim_page` out of `victim` into `slot`. `token` is `None`
    /// while waiting out a retry delay.
    Evicting {
        victim: FrameNumber,
        victim_page: Page,
        slot: SlotNumber,
        token: Option<SwapToken>,
    },
    /// Filling `frame`, from `slot` if the page has one.
    Loading {
        frame: FrameNumber,
        slot: Option<SlotNumber>,
        token: Option<SwapToken>,
    },
    Mapping {
        frame: FrameNumber,
    },
    Failed(PagerError),
}

impl FaultState {
    pub fn token(&self) -> Option<SwapToken> {
        match self {
            Self::Evicting { token, .. } | Self::Loading { token, .. } => *token,
            _ => None,
        }
    }

    fn with_token(self, new: Option<SwapToken>) -> Self {
        match self {
            Self::Evicting {
                victim,
                victim_page,
                slot,
                ..
            } => Self::Evicting {
                victim,
                victim_page,
                slot,
                token: new,
            },
            Self::Loading { frame, slot, .. } => Self::Loading {
                frame,
                slot,
                token: new,
            },
            other => other,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FaultRequest {
    pub id: RequestId,
    pub page: Page,
    pub addr: u32,
    pub access: Rights,
    /// Thread to wake once the page is mapped. `None` for internal requests.
    pub client: Option<ThreadId>,
    pub state: FaultState,
    /// Failed tries of the current transfer.
    pub attempts: u32,
    /// Bumped whenever an alarm is armed, so only the latest one counts.
    pub generation: u32,
    /// Whether this request is the one resolving `page`.
    pub holds_page: bool,
    /// Its process went away while a transfer was in flight.
    pub cancelled: bool,
}

impl FaultRequest {
    pub fn new(id: RequestId, page: Page, addr: u32, access: Rights, client: Option<ThreadId>) -> Self {
        Self {
            id,
            page,
            addr,
            access,
            client,
            state: FaultState::Start,
            attempts: 0,
            generation: 0,
            holds_page: false,
            cancelled: false,
        }
    }

    pub fn set_token(&mut self, token: Option<SwapToken>) {
        self.state = self.state.with_token(token);
    }

    /// Arms a new generation and returns the cookie for its alarm.
    pub fn next_alarm(&mut self) -> AlarmCookie {
        self.generation = self.generation.wrapping_add(1);
        cookie(self.id, self.generation)
    }
}

pub fn cookie(id: RequestId, generation: u32) -> AlarmCookie {
    AlarmCookie(((id as u64) << 32) | generation as u64)
}

pub fn split_cookie(cookie: AlarmCookie) -> (RequestId, u32) {
    ((cookie.0 >> 32) as RequestId, cookie.0 as u32)
}

/// Requests queued behind the one resolving a page, or behind the eviction
/// of that page.
#[derive(Debug, Default)]
pub struct PageBusy {
    pub waiters: VecDeque<RequestId>,
}
