//! The packed 32-bit cell format of a [`CompiledNavMesh`](crate::CompiledNavMesh).
//!
//! ```text
//! 0xFF00_0000  number of floors in the cell
//! 0x00FF_FFFF  one floor: blocked directions (8 bits) and encoded height (16 bits)
//!              several floors: byte offset of their 3-byte entries in the overflow buffer
//! ```
//!
//! An entry in the overflow buffer is `(blocked directions, height low byte, height high byte)`.

use crate::direction::Directions;

/// The word stored for a cell without floors.
pub const EMPTY_WORD: u32 = 0x00FF_0000;

/// The largest offset into the overflow buffer a cell can address.
pub const MAX_MULTI_OFFSET: usize = 0x00FF_FFFF;

/// The size of one floor entry in the overflow buffer.
pub const ENTRY_SIZE: usize = 3;

/// One compiled floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct FloorEntry {
    /// The directions movement is blocked in.
    pub blocked: Directions,
    /// The height, see [`encode_height`].
    pub encoded_z: u16,
}

impl FloorEntry {
    /// Reads an entry from the overflow buffer.
    #[inline]
    pub fn from_bytes([blocked, low, high]: [u8; ENTRY_SIZE]) -> Self {
        Self {
            blocked: Directions::from_bits_retain(blocked),
            encoded_z: u16::from_le_bytes([low, high]),
        }
    }

    /// The entry as stored in the overflow buffer.
    #[inline]
    pub fn to_bytes(self) -> [u8; ENTRY_SIZE] {
        let [low, high] = self.encoded_z.to_le_bytes();
        [self.blocked.bits(), low, high]
    }

    /// The world-space height for a mesh spanning `z1..z2`.
    #[inline]
    pub fn height(&self, z1: i32, z2: i32) -> f32 {
        decode_height(z1, z2, self.encoded_z)
    }
}

/// A decoded grid word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridCell {
    /// No walkable floor.
    Empty,
    /// Exactly one floor, stored inline.
    Single(FloorEntry),
    /// Several floors stored in the overflow buffer.
    Multi {
        /// The byte offset of the first entry.
        offset: u32,
        /// The number of entries. Always at least 2.
        count: u8,
    },
}

impl GridCell {
    /// Decodes a grid word.
    pub fn from_word(word: u32) -> Self {
        match word >> 24 {
            0 => Self::Empty,
            1 => Self::Single(FloorEntry {
                blocked: Directions::from_bits_retain((word >> 16) as u8),
                encoded_z: word as u16,
            }),
            count => Self::Multi {
                offset: word & MAX_MULTI_OFFSET as u32,
                count: count as u8,
            },
        }
    }

    /// Encodes the cell as a grid word.
    pub fn to_word(self) -> u32 {
        match self {
            Self::Empty => EMPTY_WORD,
            Self::Single(entry) => {
                (1 << 24) | (u32::from(entry.blocked.bits()) << 16) | u32::from(entry.encoded_z)
            }
            Self::Multi { offset, count } => {
                (u32::from(count) << 24) | (offset & MAX_MULTI_OFFSET as u32)
            }
        }
    }

    /// The number of floors in the cell.
    pub fn count(self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Single(_) => 1,
            Self::Multi { count, .. } => count.into(),
        }
    }
}

/// Quantizes a height in `z1..=z2` to 16 bits. Heights outside the range are clamped.
pub fn encode_height(z1: i32, z2: i32, z: f32) -> u16 {
    let range = (z2 - z1) as f32;
    let encoded = ((z - z1 as f32) * f32::from(u16::MAX) / range).round();
    encoded.clamp(0.0, f32::from(u16::MAX)) as u16
}

/// The inverse of [`encode_height`], up to `(z2 - z1) / 65535` of quantization error.
pub fn decode_height(z1: i32, z2: i32, encoded: u16) -> f32 {
    z1 as f32 + f32::from(encoded) * (z2 - z1) as f32 / f32::from(u16::MAX)
}
