//! 3D Morton (Z-order) codes, 10 bits per axis.

/// Largest cell coordinate per axis.
pub const MAX_CELL: u32 = (1 << 10) - 1;

fn spread(v: u32) -> u32 {
    let mut x = v & 0x3FF;
    x = (x | (x << 16)) & 0x0300_00FF;
    x = (x | (x << 8)) & 0x0300_F00F;
    x = (x | (x << 4)) & 0x030C_30C3;
    x = (x | (x << 2)) & 0x0924_9249;
    x
}

fn compact(v: u32) -> u32 {
    let mut x = v & 0x0924_9249;
    x = (x ^ (x >> 2)) & 0x030C_30C3;
    x = (x ^ (x >> 4)) & 0x0300_F00F;
    x = (x ^ (x >> 8)) & 0x0300_00FF;
    x = (x ^ (x >> 16)) & 0x0000_03FF;
    x
}

/// Interleaves three 10-bit coordinates, x in the lowest bit.
pub fn encode(x: u32, y: u32, z: u32) -> u32 {
    spread(x) | (spread(y) << 1) | (spread(z) << 2)
}

/// Splits a code back into its coordinates.
pub fn decode(code: u32) -> (u32, u32, u32) {
    (compact(code), compact(code >> 1), compact(code >> 2))
}
