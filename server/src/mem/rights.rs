use bitbybit::bitfield;
use core::fmt;

/// Read/write/execute bits, in the order the microkernel encodes them in a
/// fault label: execute is bit 0, write bit 1, read bit 2.
///
/// Used both for what a fault asked for and for what a mapping grants.
#[bitfield(u8, default = 0)]
pub struct Rights {
    #[bit(0, rw)]
    execute: bool,
    #[bit(1, rw)]
    write: bool,
    #[bit(2, rw)]
    read: bool,
}

impl Rights {
    pub const NONE: Self = Self::new_with_raw_value(0b000);
    pub const READ: Self = Self::new_with_raw_value(0b100);
    pub const WRITE: Self = Self::new_with_raw_value(0b010);
    pub const EXECUTE: Self = Self::new_with_raw_value(0b001);
    pub const READ_WRITE: Self = Self::new_with_raw_value(0b110);
    pub const READ_EXECUTE: Self = Self::new_with_raw_value(0b101);
    pub const ALL: Self = Self::new_with_raw_value(0b111);

    /// Builds rights from the low three bits of `bits`; higher bits are ignored.
    pub const fn from_bits(bits: u8) -> Self {
        Self::new_with_raw_value(bits & 0b111)
    }

    pub const fn bits(self) -> u8 {
        self.raw_value()
    }

    pub const fn is_empty(self) -> bool {
        self.raw_value() == 0
    }

    /// Whether every right in `other` is also in `self`.
    pub const fn contains(self, other: Self) -> bool {
        other.raw_value() & !self.raw_value() == 0
    }

    pub const fn union(self, other: Self) -> Self {
        Self::new_with_raw_value(self.raw_value() | other.raw_value())
    }

    pub const fn without(self, other: Self) -> Self {
        Self::new_with_raw_value(self.raw_value() & !other.raw_value())
    }
}

impl PartialEq for Rights {
    fn eq(&self, other: &Self) -> bool {
        self.raw_value() == other.raw_value()
    }
}

impl Eq for Rights {}

impl fmt::Display for Rights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = |set: bool, c: char| if set { c } else { '-' };
        write!(
            f,
            "{}{}{}",
            flag(self.read(), 'r'),
            flag(self.write(), 'w'),
            flag(self.execute(), 'x')
        )
    }
}

impl fmt::Debug for Rights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rights({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::format;

    #[test]
    fn test_contains() {
        assert!(Rights::READ_WRITE.contains(Rights::READ));
        assert!(Rights::READ_WRITE.contains(Rights::NONE));
        assert!(!Rights::READ_EXECUTE.contains(Rights::WRITE));
        assert!(!Rights::NONE.contains(Rights::READ));
    }

    #[test]
    fn test_bits_match_fault_label_encoding() {
        assert!(Rights::from_bits(0b1100).read());
        assert!(!Rights::from_bits(0b1100).write());
        assert_eq!(Rights::from_bits(0xff), Rights::ALL);
        assert_eq!(Rights::READ.union(Rights::WRITE), Rights::READ_WRITE);
        assert_eq!(Rights::ALL.without(Rights::WRITE), Rights::READ_EXECUTE);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Rights::READ_EXECUTE), "r-x");
        assert_eq!(format!("{}", Rights::NONE), "---");
    }
}
