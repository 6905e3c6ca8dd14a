//! 3-D Morton (Z-order) codes on 10 bits per axis.

/// Cells per axis a code can address.
pub const AXIS_CELLS: u32 = 1 << 10;

/// Spread the 10 low bits of `x` so that two zero bits separate each of them.
#[inline]
fn part1by2(mut x: u32) -> u32 {
    x &= 0x0000_03ff;
    x = (x | (x << 16)) & 0x0300_00ff;
    x = (x | (x << 8)) & 0x0300_f00f;
    x = (x | (x << 4)) & 0x030c_30c3;
    x = (x | (x << 2)) & 0x0924_9249;
    x
}

/// Inverse of [`part1by2`].
#[inline]
fn compact1by2(mut x: u32) -> u32 {
    x &= 0x0924_9249;
    x = (x ^ (x >> 2)) & 0x030c_30c3;
    x = (x ^ (x >> 4)) & 0x0300_f00f;
    x = (x ^ (x >> 8)) & 0xff00_00ff;
    x = (x ^ (x >> 16)) & 0x0000_03ff;
    x
}

/// Interleave three cell coordinates; `x` takes the lowest bit.
pub fn morton_encode(x: u32, y: u32, z: u32) -> u32 {
    part1by2(x) | (part1by2(y) << 1) | (part1by2(z) << 2)
}

pub fn morton_decode(code: u32) -> [u32; 3] {
    [
        compact1by2(code),
        compact1by2(code >> 1),
        compact1by2(code >> 2),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn small_codes() {
        assert_eq!(morton_encode(0, 0, 0), 0);
        assert_eq!(morton_encode(1, 0, 0), 1);
        assert_eq!(morton_encode(0, 1, 0), 2);
        assert_eq!(morton_encode(0, 0, 1), 4);
        assert_eq!(morton_encode(7, 7, 7), 511);
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(x in 0u32..1024, y in 0u32..1024, z in 0u32..1024) {
            prop_assert_eq!(morton_decode(morton_encode(x, y, z)), [x, y, z]);
        }
    }
}
