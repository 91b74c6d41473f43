#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod console;
pub mod free_set;
pub mod macros;
pub mod mem;
pub mod sizes;
