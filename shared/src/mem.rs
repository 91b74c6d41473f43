use crate::sizes::{KB, SECTOR_SIZE};

// Page size is 4KB on every platform the server runs on. Swap slots have the
// same size.
pub const PAGE_SIZE: usize = 4 * KB;
pub const PAGE_SHIFT: u32 = 12;

pub const SECTORS_PER_PAGE: usize = PAGE_SIZE / SECTOR_SIZE;

const _: () = assert!(PAGE_SIZE % SECTOR_SIZE == 0);
const _: () = assert!(1 << PAGE_SHIFT == PAGE_SIZE);

#[inline]
pub const fn page_align_down(addr: usize) -> usize {
    addr & !(PAGE_SIZE - 1)
}

#[inline]
pub const fn page_number(addr: usize) -> usize {
    addr >> PAGE_SHIFT
}

#[inline]
pub const fn page_address(page_number: usize) -> usize {
    page_number << PAGE_SHIFT
}
