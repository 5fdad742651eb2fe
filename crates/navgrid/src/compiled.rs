//! The compact, immutable navmesh of one island, and its binary format.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use glam::Vec3;
use thiserror::Error;

use crate::{
    direction::Directions,
    grid_cell::{ENTRY_SIZE, FloorEntry, GridCell, decode_height},
};

/// Identifies a [`CompiledNavMesh`] in a binary stream.
pub const MESH_MAGIC: u32 = 0x4D76_614E;

/// How far the height of a neighbor may deviate from [`CompiledNavMesh::max_z_step`] when
/// following a connection, to absorb quantization and sampling error.
const NEIGHBOR_TOLERANCE: f32 = 0.5;

/// Like [`NEIGHBOR_TOLERANCE`], for [`CompiledNavMesh::edge_height`].
const EDGE_TOLERANCE: f32 = 0.1;

/// A floor of a [`CompiledNavMesh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeId {
    /// The row-major index of the cell.
    pub block_index: usize,
    /// The quantized height of the floor.
    pub encoded_z: u16,
    /// The directions movement is blocked in.
    pub blocked: Directions,
}

/// A walkable island compiled into a grid of packed cells.
///
/// Every cell is a 32-bit word, see [`GridCell`]. Cells with more than one floor point into a
/// shared overflow buffer.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct CompiledNavMesh {
    block_width: u16,
    block_height: u16,
    step: f32,
    max_z_step: f32,
    x1: f32,
    y1: f32,
    z1: i32,
    z2: i32,
    grid: Vec<u32>,
    multiheights: Vec<u8>,
}

impl CompiledNavMesh {
    /// Assembles a mesh from its parts without validating them. See [`CompiledNavMesh::validate`].
    pub fn new(
        block_width: u16,
        block_height: u16,
        step: f32,
        max_z_step: f32,
        x1: f32,
        y1: f32,
        z1: i32,
        z2: i32,
        grid: Vec<u32>,
        multiheights: Vec<u8>,
    ) -> Self {
        Self {
            block_width,
            block_height,
            step,
            max_z_step,
            x1,
            y1,
            z1,
            z2,
            grid,
            multiheights,
        }
    }

    /// The number of columns.
    #[inline]
    pub fn block_width(&self) -> usize {
        self.block_width.into()
    }

    /// The number of rows.
    #[inline]
    pub fn block_height(&self) -> usize {
        self.block_height.into()
    }

    /// The edge length of a cell.
    #[inline]
    pub fn step(&self) -> f32 {
        self.step
    }

    /// The maximum height difference between connected floors.
    #[inline]
    pub fn max_z_step(&self) -> f32 {
        self.max_z_step
    }

    /// The world-space x coordinate of the first column.
    #[inline]
    pub fn x1(&self) -> f32 {
        self.x1
    }

    /// The world-space y coordinate of the first row.
    #[inline]
    pub fn y1(&self) -> f32 {
        self.y1
    }

    /// The exclusive upper x bound.
    #[inline]
    pub fn x2(&self) -> f32 {
        self.x1 + f32::from(self.block_width) * self.step
    }

    /// The exclusive upper y bound.
    #[inline]
    pub fn y2(&self) -> f32 {
        self.y1 + f32::from(self.block_height) * self.step
    }

    /// The bottom of the height range used for quantization.
    #[inline]
    pub fn z1(&self) -> i32 {
        self.z1
    }

    /// The top of the height range used for quantization.
    #[inline]
    pub fn z2(&self) -> i32 {
        self.z2
    }

    /// The packed cells in row-major order.
    #[inline]
    pub fn grid(&self) -> &[u32] {
        &self.grid
    }

    /// The overflow buffer of cells with several floors.
    #[inline]
    pub fn multiheights(&self) -> &[u8] {
        &self.multiheights
    }

    /// Whether the XY position lies within the mesh's rectangle.
    pub fn bounds_contains_xy(&self, x: f32, y: f32) -> bool {
        x >= self.x1 && x < self.x2() && y >= self.y1 && y < self.y2()
    }

    /// The decoded cell at `block_index`, or `None` if the index is outside the grid.
    pub fn cell(&self, block_index: usize) -> Option<GridCell> {
        self.grid.get(block_index).map(|word| GridCell::from_word(*word))
    }

    /// The floors of a cell, in the order they were compiled.
    pub fn floors_in_cell(&self, block_index: usize) -> FloorEntries<'_> {
        match self.cell(block_index) {
            Some(GridCell::Single(entry)) => FloorEntries::new(Some(entry), &[]),
            Some(GridCell::Multi { offset, count }) => {
                let start = offset as usize;
                let end = start + usize::from(count) * ENTRY_SIZE;
                FloorEntries::new(None, self.multiheights.get(start..end).unwrap_or_default())
            }
            Some(GridCell::Empty) | None => FloorEntries::new(None, &[]),
        }
    }

    /// The blocked directions and world-space height of every floor in a cell.
    /// `None` if the cell is outside the grid.
    pub fn floors_at(
        &self,
        block_x: usize,
        block_y: usize,
    ) -> Option<impl Iterator<Item = (Directions, f32)> + '_> {
        if block_x >= self.block_width() || block_y >= self.block_height() {
            return None;
        }
        let block_index = block_y * self.block_width() + block_x;
        Some(
            self.floors_in_cell(block_index)
                .map(|entry| (entry.blocked, entry.height(self.z1, self.z2))),
        )
    }

    /// The cell containing a world-space XY position, treating every cell as centered on its
    /// [`CompiledNavMesh::world_from_block_index`]. `None` if outside the grid.
    pub fn block_index_from_world(&self, x: f32, y: f32) -> Option<usize> {
        let half_step = self.step / 2.0;
        let block_x = ((x + half_step - self.x1) / self.step).floor();
        let block_y = ((y + half_step - self.y1) / self.step).floor();
        if block_x < 0.0
            || block_y < 0.0
            || block_x >= f32::from(self.block_width)
            || block_y >= f32::from(self.block_height)
        {
            return None;
        }
        Some(block_y as usize * self.block_width() + block_x as usize)
    }

    /// The column and row of a cell index.
    #[inline]
    pub fn block_xy_from_index(&self, block_index: usize) -> (usize, usize) {
        let width = self.block_width().max(1);
        (block_index % width, block_index / width)
    }

    /// The world-space position of a cell, at height `z`.
    pub fn world_from_block_index(&self, block_index: usize, z: f32) -> Vec3 {
        let (block_x, block_y) = self.block_xy_from_index(block_index);
        Vec3::new(
            self.x1 + block_x as f32 * self.step,
            self.y1 + block_y as f32 * self.step,
            z,
        )
    }

    /// The world-space height of a node.
    #[inline]
    pub fn node_height(&self, node: NodeId) -> f32 {
        decode_height(self.z1, self.z2, node.encoded_z)
    }

    /// The world-space position of a node.
    pub fn world_point_from_node(&self, node: NodeId) -> Vec3 {
        self.world_from_block_index(node.block_index, self.node_height(node))
    }

    /// The highest floor at or below `point` that is at most `max_fall` below it.
    pub fn find_floor_under_point(&self, point: Vec3, max_fall: f32) -> Option<NodeId> {
        let block_index = self.block_index_from_world(point.x, point.y)?;
        let (entry, height) = self
            .floors_in_cell(block_index)
            .map(|entry| (entry, entry.height(self.z1, self.z2)))
            .filter(|(_, height)| *height <= point.z)
            .max_by(|(_, a), (_, b)| a.total_cmp(b))?;
        (point.z - height <= max_fall).then_some(NodeId {
            block_index,
            encoded_z: entry.encoded_z,
            blocked: entry.blocked,
        })
    }

    /// The index of the cell next to `block_index` in `direction`, if it is inside the grid.
    pub fn neighbor_index(&self, block_index: usize, direction: Directions) -> Option<usize> {
        let offset = direction.offset()?;
        let (block_x, block_y) = self.block_xy_from_index(block_index);
        let x = block_x.checked_add_signed(offset.x as isize)?;
        let y = block_y.checked_add_signed(offset.y as isize)?;
        if x >= self.block_width() || y >= self.block_height() {
            return None;
        }
        Some(y * self.block_width() + x)
    }

    /// Follows the connection of `node` in `direction`.
    ///
    /// Returns `Ok(None)` if the direction is blocked. If it is open, the neighboring floor closest
    /// in height to `node` is returned; an open direction without such a floor means the mesh is
    /// corrupt and yields an error.
    pub fn neighbor(
        &self,
        node: NodeId,
        direction: Directions,
    ) -> Result<Option<NodeId>, MissingNeighborError> {
        if node.blocked.contains(direction) {
            return Ok(None);
        }
        let missing = MissingNeighborError {
            block_index: node.block_index,
            direction,
        };
        let Some(block_index) = self.neighbor_index(node.block_index, direction) else {
            return Err(missing);
        };
        let entry = self.closest_floor(
            block_index,
            self.node_height(node),
            self.max_z_step + NEIGHBOR_TOLERANCE,
        );
        match entry {
            Some(entry) => Ok(Some(NodeId {
                block_index,
                encoded_z: entry.encoded_z,
                blocked: entry.blocked,
            })),
            None => Err(missing),
        }
    }

    /// The height of the floor reached by leaving a floor at `height` in `direction`.
    ///
    /// Returns `Ok(None)` if `blocked` contains the direction, and an error if the direction is
    /// open but no floor is there.
    pub fn edge_height(
        &self,
        block_x: usize,
        block_y: usize,
        height: f32,
        blocked: Directions,
        direction: Directions,
    ) -> Result<Option<f32>, MissingNeighborError> {
        if blocked.contains(direction) {
            return Ok(None);
        }
        let block_index = block_y * self.block_width() + block_x;
        let missing = MissingNeighborError {
            block_index,
            direction,
        };
        let neighbor = self
            .neighbor_index(block_index, direction)
            .ok_or(missing.clone())?;
        self.closest_floor(neighbor, height, self.max_z_step + EDGE_TOLERANCE)
            .map(|entry| Some(entry.height(self.z1, self.z2)))
            .ok_or(missing)
    }

    fn closest_floor(&self, block_index: usize, height: f32, tolerance: f32) -> Option<FloorEntry> {
        self.floors_in_cell(block_index)
            .map(|entry| (entry, (entry.height(self.z1, self.z2) - height).abs()))
            .filter(|(_, distance)| *distance <= tolerance)
            .min_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(entry, _)| entry)
    }

    /// The direction from one cell to another if they are neighbors. Does not check whether
    /// the direction is open.
    pub fn direction_to_neighbor_by_index(
        &self,
        start_index: usize,
        end_index: usize,
    ) -> Option<Directions> {
        Directions::COMPASS
            .into_iter()
            .find(|direction| self.neighbor_index(start_index, *direction) == Some(end_index))
    }

    /// The size of the mesh when saved, in bytes.
    pub fn estimated_file_size_in_bytes(&self) -> usize {
        9 * 4 + self.grid.len() * 4 + self.multiheights.len()
    }

    /// Checks that the grid is well-formed and that every open direction leads to a neighbor
    /// that is open in the opposite direction.
    pub fn validate(&self) -> Result<(), NavMeshValidationError> {
        self.validate_layout()?;
        for block_index in 0..self.grid.len() {
            for entry in self.floors_in_cell(block_index) {
                let node = NodeId {
                    block_index,
                    encoded_z: entry.encoded_z,
                    blocked: entry.blocked,
                };
                for direction in Directions::COMPASS {
                    let Some(neighbor) = self.neighbor(node, direction)? else {
                        continue;
                    };
                    if neighbor.blocked.contains(direction.inverse()) {
                        return Err(NavMeshValidationError::Asymmetric {
                            block_index,
                            direction,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn validate_layout(&self) -> Result<(), NavMeshValidationError> {
        let expected = self.block_width() * self.block_height();
        if self.grid.len() != expected {
            return Err(NavMeshValidationError::GridSizeMismatch {
                expected,
                actual: self.grid.len(),
            });
        }
        for (block_index, word) in self.grid.iter().enumerate() {
            if let GridCell::Multi { offset, count } = GridCell::from_word(*word) {
                let end = offset as usize + usize::from(count) * ENTRY_SIZE;
                if end > self.multiheights.len() {
                    return Err(NavMeshValidationError::MultiheightsOutOfBounds {
                        block_index,
                        end,
                        len: self.multiheights.len(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Writes the mesh in its little-endian binary format.
    pub fn save<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(MESH_MAGIC)?;
        writer.write_u16::<LittleEndian>(self.block_width)?;
        writer.write_u16::<LittleEndian>(self.block_height)?;
        writer.write_f32::<LittleEndian>(self.step)?;
        writer.write_f32::<LittleEndian>(self.max_z_step)?;
        writer.write_f32::<LittleEndian>(self.x1)?;
        writer.write_f32::<LittleEndian>(self.y1)?;
        writer.write_i32::<LittleEndian>(self.z1)?;
        writer.write_i32::<LittleEndian>(self.z2)?;
        for word in &self.grid {
            writer.write_u32::<LittleEndian>(*word)?;
        }
        let len = i32::try_from(self.multiheights.len())
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
        writer.write_i32::<LittleEndian>(len)?;
        writer.write_all(&self.multiheights)
    }

    /// Reads a mesh written by [`CompiledNavMesh::save`], rejecting any inconsistent header field.
    pub fn load<R: Read>(reader: &mut R) -> Result<Self, NavMeshFormatError> {
        let magic = reader.read_u32::<LittleEndian>()?;
        if magic != MESH_MAGIC {
            return Err(NavMeshFormatError::BadMagic {
                expected: MESH_MAGIC,
                found: magic,
            });
        }
        let block_width = reader.read_u16::<LittleEndian>()?;
        let block_height = reader.read_u16::<LittleEndian>()?;
        if block_width == 0 || block_height == 0 {
            return Err(NavMeshFormatError::BadBlockSize {
                width: block_width,
                height: block_height,
            });
        }
        let step = reader.read_f32::<LittleEndian>()?;
        if step.is_nan() || step < 0.1 {
            return Err(NavMeshFormatError::BadStep { step });
        }
        let max_z_step = reader.read_f32::<LittleEndian>()?;
        if !(0.0..=16.0).contains(&max_z_step) {
            return Err(NavMeshFormatError::BadZStep { max_z_step });
        }
        let x1 = reader.read_f32::<LittleEndian>()?;
        let y1 = reader.read_f32::<LittleEndian>()?;
        if x1.is_nan() || y1.is_nan() || x1 < 0.0 || y1 < 0.0 {
            return Err(NavMeshFormatError::BadXyMin { x1, y1 });
        }
        let z1 = reader.read_i32::<LittleEndian>()?;
        let z2 = reader.read_i32::<LittleEndian>()?;
        if z2 <= z1 {
            return Err(NavMeshFormatError::BadZRange { z1, z2 });
        }

        let mut grid = vec![0; usize::from(block_width) * usize::from(block_height)];
        reader.read_u32_into::<LittleEndian>(&mut grid)?;

        let len = reader.read_i32::<LittleEndian>()?;
        let len = u64::try_from(len).map_err(|_| NavMeshFormatError::NegativeLength { len })?;
        let mut multiheights = Vec::new();
        reader.take(len).read_to_end(&mut multiheights)?;
        if multiheights.len() as u64 != len {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }

        let mesh = Self::new(
            block_width,
            block_height,
            step,
            max_z_step,
            x1,
            y1,
            z1,
            z2,
            grid,
            multiheights,
        );
        mesh.validate_layout()?;
        Ok(mesh)
    }
}

/// An iterator over the floors of one cell of a [`CompiledNavMesh`].
#[derive(Debug, Clone)]
pub struct FloorEntries<'a> {
    single: Option<FloorEntry>,
    multi: std::slice::ChunksExact<'a, u8>,
}

impl<'a> FloorEntries<'a> {
    fn new(single: Option<FloorEntry>, multi: &'a [u8]) -> Self {
        Self {
            single,
            multi: multi.chunks_exact(ENTRY_SIZE),
        }
    }
}

impl Iterator for FloorEntries<'_> {
    type Item = FloorEntry;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(entry) = self.single.take() {
            return Some(entry);
        }
        let bytes = self.multi.next()?;
        Some(FloorEntry::from_bytes([bytes[0], bytes[1], bytes[2]]))
    }
}

/// A connection claimed by a floor's flags leads nowhere.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("expected a neighbor of cell {block_index} towards {direction:?}")]
pub struct MissingNeighborError {
    /// The cell the connection starts in
    pub block_index: usize,
    /// The open direction
    pub direction: Directions,
}

/// Errors reported by [`CompiledNavMesh::validate`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NavMeshValidationError {
    /// The grid does not hold one word per cell.
    #[error("grid holds {actual} cells but the dimensions need {expected}")]
    GridSizeMismatch {
        /// `block_width * block_height`
        expected: usize,
        /// The actual number of words
        actual: usize,
    },
    /// A cell points past the end of the overflow buffer.
    #[error("cell {block_index} reads up to byte {end} of an overflow buffer of {len} bytes")]
    MultiheightsOutOfBounds {
        /// The offending cell
        block_index: usize,
        /// The end of the cell's entries
        end: usize,
        /// The length of the overflow buffer
        len: usize,
    },
    /// An open direction has no matching floor.
    #[error(transparent)]
    MissingNeighbor(#[from] MissingNeighborError),
    /// A floor is open towards a neighbor that is blocked in the opposite direction.
    #[error("cell {block_index} is open towards {direction:?} but its neighbor is blocked back")]
    Asymmetric {
        /// The cell of the open floor
        block_index: usize,
        /// The open direction
        direction: Directions,
    },
}

/// Errors that can occur when loading a [`CompiledNavMesh`] or
/// [`CompiledNavMeshSet`](crate::CompiledNavMeshSet).
#[derive(Error, Debug)]
pub enum NavMeshFormatError {
    /// Reading from the underlying stream failed.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// The stream does not start with the expected header.
    #[error("invalid file format: expected magic {expected:#010x}, found {found:#010x}")]
    BadMagic {
        /// The expected magic number
        expected: u32,
        /// The magic number read
        found: u32,
    },
    /// A grid dimension is zero.
    #[error("bad block size {width}x{height}")]
    BadBlockSize {
        /// The number of columns read
        width: u16,
        /// The number of rows read
        height: u16,
    },
    /// The cell size is below 0.1.
    #[error("bad step {step}")]
    BadStep {
        /// The step read
        step: f32,
    },
    /// The maximum height step is outside `0..=16`.
    #[error("bad z step {max_z_step}")]
    BadZStep {
        /// The maximum height step read
        max_z_step: f32,
    },
    /// The minimum corner is negative.
    #[error("bad xy min ({x1}, {y1})")]
    BadXyMin {
        /// The minimum x read
        x1: f32,
        /// The minimum y read
        y1: f32,
    },
    /// The height range is empty.
    #[error("bad z range {z1}..{z2}")]
    BadZRange {
        /// The minimum height read
        z1: i32,
        /// The maximum height read
        z2: i32,
    },
    /// A length field is negative.
    #[error("negative length {len}")]
    NegativeLength {
        /// The length read
        len: i32,
    },
    /// The cells reference data that is not there.
    #[error(transparent)]
    Invalid(#[from] NavMeshValidationError),
}
