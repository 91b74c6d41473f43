//! Demand-paging memory server.
//!
//! Clients fault, the [`Pager`] finds them a frame (evicting a resident page
//! with a second-chance clock if it has to), fills it from swap or with zeroes
//! and asks the kernel to map it. Everything runs on one logical thread: the
//! only places a fault resolution can pause are swap transfers, and those are
//! resumed by [`Event`]s fed back into [`Pager::dispatch`].

#![cfg_attr(target_os = "none", no_std)]

extern crate alloc;

#[macro_use]
mod macros;

pub mod address_space;
pub mod block;
pub mod config;
pub mod drivers;
pub mod error;
pub mod ipc;
pub mod kernel;
pub mod mem;
pub mod pager;
pub mod server;
pub mod swap;

#[cfg(test)]
mod test_support;

pub use config::PagerConfig;
pub use error::PagerError;
pub use ipc::Event;
pub use pager::Pager;
pub use server::{start, Platform, Server};
