//! The eight compass directions a floor can connect to its neighbors in.

use std::f32::consts::TAU;

use glam::{IVec2, Vec3};

bitflags::bitflags! {
    /// A set of compass directions on the XY grid, +Y being [`Directions::TOP`].
    ///
    /// On a floor, a set bit means movement in that direction is blocked.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
    #[repr(transparent)]
    pub struct Directions: u8 {
        /// +Y
        const TOP = 1 << 0;
        /// +X +Y
        const TOP_RIGHT = 1 << 1;
        /// +X
        const RIGHT = 1 << 2;
        /// +X -Y
        const BOTTOM_RIGHT = 1 << 3;
        /// -Y
        const BOTTOM = 1 << 4;
        /// -X -Y
        const BOTTOM_LEFT = 1 << 5;
        /// -X
        const LEFT = 1 << 6;
        /// -X +Y
        const TOP_LEFT = 1 << 7;

        /// The four diagonal directions.
        const DIAGONALS = Self::TOP_RIGHT.bits()
            | Self::BOTTOM_RIGHT.bits()
            | Self::BOTTOM_LEFT.bits()
            | Self::TOP_LEFT.bits();
    }
}

impl Directions {
    /// Every single direction, clockwise starting at [`Directions::TOP`].
    pub const COMPASS: [Self; 8] = [
        Self::TOP,
        Self::TOP_RIGHT,
        Self::RIGHT,
        Self::BOTTOM_RIGHT,
        Self::BOTTOM,
        Self::BOTTOM_LEFT,
        Self::LEFT,
        Self::TOP_LEFT,
    ];

    /// Grid offsets of [`Directions::COMPASS`], index for index.
    const OFFSETS: [IVec2; 8] = [
        IVec2::new(0, 1),
        IVec2::new(1, 1),
        IVec2::new(1, 0),
        IVec2::new(1, -1),
        IVec2::new(0, -1),
        IVec2::new(-1, -1),
        IVec2::new(-1, 0),
        IVec2::new(-1, 1),
    ];

    /// The grid offset of a single direction. `None` if `self` is not exactly one direction.
    pub fn offset(self) -> Option<IVec2> {
        let index = Self::COMPASS.iter().position(|d| *d == self)?;
        Some(Self::OFFSETS[index])
    }

    /// The single direction pointing from a cell to the cell at `(dx, dy)` away.
    /// `None` unless the offset is to one of the eight neighbors.
    pub fn from_offset(dx: i32, dy: i32) -> Option<Self> {
        let offset = IVec2::new(dx, dy);
        let index = Self::OFFSETS.iter().position(|o| *o == offset)?;
        Some(Self::COMPASS[index])
    }

    /// The nearest of the eight directions from `start` towards `end`, ignoring height.
    pub fn from_world(start: Vec3, end: Vec3) -> Self {
        let angle = (end.y - start.y).atan2(end.x - start.x);
        // Counter-clockwise octants starting at +X.
        let octant = ((angle / (TAU / 8.0)).round() as i32).rem_euclid(8) as usize;
        // COMPASS runs clockwise from +Y, which is octant 2.
        Self::COMPASS[(10 - octant) % 8]
    }

    /// Rotates every direction in the set by 180 degrees.
    #[inline]
    pub fn inverse(self) -> Self {
        let bits = self.bits();
        Self::from_bits_retain(bits.rotate_left(4))
    }

    /// The directions 45 degrees clockwise and counter-clockwise of every direction in the set.
    #[inline]
    pub fn adjacent(self) -> Self {
        let bits = self.bits();
        Self::from_bits_retain(bits.rotate_left(1) | bits.rotate_right(1))
    }

    /// Whether any direction in `other` is 45 degrees away from a direction in `self`.
    #[inline]
    pub fn is_adjacent(self, other: Self) -> bool {
        self.adjacent().intersects(other)
    }

    /// Whether the set contains a diagonal direction.
    #[inline]
    pub fn is_diagonal(self) -> bool {
        self.intersects(Self::DIAGONALS)
    }

    /// The number of directions in the set.
    #[inline]
    pub fn count(self) -> u32 {
        self.bits().count_ones()
    }
}
