//! Morton encoding (Z-order curve) for lattice coordinates
//!
//! Bit order is x in bit 0, y in bit 1, z in bit 2 of every triple, which
//! matches the octant numbering used by the octree (`x | y << 1 | z << 2`).
//! Walking an octree depth-first with children in octant order therefore
//! visits leaves in ascending Morton order.

/// Bits per axis supported by [`encode`]
pub const AXIS_BITS: u32 = 21;

/// Spread the low 21 bits of `x` into every third bit of a u64
fn spread_bits(x: u32) -> u64 {
    let mut x = x as u64 & 0x1fffff;
    x = (x | (x << 32)) & 0x1f00000000ffff;
    x = (x | (x << 16)) & 0x1f0000ff0000ff;
    x = (x | (x << 8)) & 0x100f00f00f00f00f;
    x = (x | (x << 4)) & 0x10c30c30c30c30c3;
    x = (x | (x << 2)) & 0x1249249249249249;
    x
}

/// Inverse of [`spread_bits`]
fn compact_bits(x: u64) -> u32 {
    let mut x = x & 0x1249249249249249;
    x = (x | (x >> 2)) & 0x10c30c30c30c30c3;
    x = (x | (x >> 4)) & 0x100f00f00f00f00f;
    x = (x | (x >> 8)) & 0x1f0000ff0000ff;
    x = (x | (x >> 16)) & 0x1f00000000ffff;
    x = (x | (x >> 32)) & 0x1fffff;
    x as u32
}

/// Interleave three unsigned coordinates into a Morton code
pub fn encode(x: u32, y: u32, z: u32) -> u64 {
    spread_bits(x) | (spread_bits(y) << 1) | (spread_bits(z) << 2)
}

/// Split a Morton code back into its coordinates
pub fn decode(code: u64) -> (u32, u32, u32) {
    (
        compact_bits(code),
        compact_bits(code >> 1),
        compact_bits(code >> 2),
    )
}

/// Octant (0..8) selected by `code` at tree level `level` (0 = finest bit)
#[inline]
pub fn octant_at(code: u64, level: u32) -> u8 {
    ((code >> (3 * level)) & 0b111) as u8
}
