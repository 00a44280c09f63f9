// vim: tw=80
//! Small numeric helpers

use crate::types::*;

/// Divide two integers, rounding up
pub fn div_roundup(dividend: u64, divisor: u64) -> u64 {
    (dividend + divisor - 1) / divisor
}

/// Round `lba` up to the next multiple of `alignment`
pub fn roundup(lba: LbaT, alignment: u64) -> LbaT {
    div_roundup(lba, alignment) * alignment
}

// LCOV_EXCL_START
#[cfg(test)]
mod t {
    use pretty_assertions::assert_eq;
    use super::*;

    #[test]
    fn div_roundup_exact() {
        assert_eq!(div_roundup(128, 64), 2);
    }

    #[test]
    fn div_roundup_inexact() {
        assert_eq!(div_roundup(129, 64), 3);
    }

    #[test]
    fn roundup_basic() {
        assert_eq!(roundup(0x101, 0x40), 0x140);
        assert_eq!(roundup(0x100, 0x40), 0x100);
    }
}
// LCOV_EXCL_STOP
