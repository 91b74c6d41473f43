pub const KB: usize = 1024;
pub const MB: usize = KB * KB;
pub const GB: usize = MB * KB;

/// Size of one backing-store sector. Swap transfers are issued in units of this.
pub const SECTOR_SIZE: usize = 512;
