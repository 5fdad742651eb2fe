//! Build-time floor data: every walkable height found in every grid cell.

use crate::direction::Directions;

/// One walkable height in a grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct FloorDesc {
    /// The height multiplied by 100.
    pub z100i: i32,
    /// The directions movement is blocked in.
    pub blocked: Directions,
}

impl FloorDesc {
    /// Creates a floor that is blocked in every direction.
    #[inline]
    pub fn new(z100i: i32) -> Self {
        Self {
            z100i,
            blocked: Directions::all(),
        }
    }

    /// Creates a floor from a world-space height.
    #[inline]
    pub fn from_height(z: f32) -> Self {
        Self::new(z100i_from_height(z))
    }

    /// The world-space height.
    #[inline]
    pub fn height(&self) -> f32 {
        self.z100i as f32 / 100.0
    }
}

/// Converts a world-space height to the centi-unit integer used to key floors.
#[inline]
pub fn z100i_from_height(z: f32) -> i32 {
    (z * 100.0).round() as i32
}

/// Identifies a floor while building the connectivity graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct EdgeVertex {
    /// The column of the cell.
    pub block_x: u16,
    /// The row of the cell.
    pub block_y: u16,
    /// See [`FloorDesc::z100i`].
    pub z100i: i32,
}

impl EdgeVertex {
    /// Creates a new vertex.
    #[inline]
    pub fn new(block_x: u16, block_y: u16, z100i: i32) -> Self {
        Self {
            block_x,
            block_y,
            z100i,
        }
    }
}

/// The floors of every cell of a grid, in row-major order.
///
/// Floors of a cell are kept in the order they were found, which for scanned geometry is top to bottom.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct FloorGrid {
    width: usize,
    height: usize,
    cells: Vec<Vec<FloorDesc>>,
}

impl FloorGrid {
    /// Creates a grid without any floors.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            cells: vec![Vec::new(); width * height],
        }
    }

    /// The number of columns.
    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    /// The number of rows.
    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    fn index(&self, x: i32, y: i32) -> Option<usize> {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            return None;
        }
        Some(y as usize * self.width + x as usize)
    }

    /// The floors of a cell. `None` if the cell is outside the grid.
    #[inline]
    pub fn cell(&self, x: i32, y: i32) -> Option<&[FloorDesc]> {
        let index = self.index(x, y)?;
        Some(&self.cells[index])
    }

    /// Mutable access to the floors of a cell. `None` if the cell is outside the grid.
    #[inline]
    pub fn cell_mut(&mut self, x: i32, y: i32) -> Option<&mut Vec<FloorDesc>> {
        let index = self.index(x, y)?;
        Some(&mut self.cells[index])
    }

    /// The floor a vertex refers to, if it exists.
    pub fn find(&self, vertex: EdgeVertex) -> Option<&FloorDesc> {
        self.cell(vertex.block_x.into(), vertex.block_y.into())?
            .iter()
            .find(|floor| floor.z100i == vertex.z100i)
    }

    /// Mutable access to the floor a vertex refers to, if it exists.
    pub fn find_mut(&mut self, vertex: EdgeVertex) -> Option<&mut FloorDesc> {
        self.cell_mut(vertex.block_x.into(), vertex.block_y.into())?
            .iter_mut()
            .find(|floor| floor.z100i == vertex.z100i)
    }

    /// All rows, each holding `width` cells.
    pub fn rows(&self) -> std::slice::Chunks<'_, Vec<FloorDesc>> {
        self.cells.chunks(self.width.max(1))
    }

    /// All rows, mutably.
    pub fn rows_mut(&mut self) -> std::slice::ChunksMut<'_, Vec<FloorDesc>> {
        self.cells.chunks_mut(self.width.max(1))
    }

    pub(crate) fn cells_mut(&mut self) -> &mut [Vec<FloorDesc>] {
        &mut self.cells
    }

    /// Every floor with its cell coordinates.
    pub fn iter(&self) -> impl Iterator<Item = (EdgeVertex, &FloorDesc)> + '_ {
        self.cells.iter().enumerate().flat_map(move |(i, cell)| {
            let x = (i % self.width) as u16;
            let y = (i / self.width) as u16;
            cell.iter()
                .map(move |floor| (EdgeVertex::new(x, y, floor.z100i), floor))
        })
    }

    /// The total number of floors.
    pub fn floor_count(&self) -> usize {
        self.cells.iter().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_floors_are_blocked() {
        let floor = FloorDesc::from_height(1.234);
        assert_eq!(floor.z100i, 123);
        assert_eq!(floor.blocked, Directions::all());
        assert_eq!(FloorDesc::from_height(-0.5).z100i, -50);
    }

    #[test]
    fn cells_outside_the_grid_are_none() {
        let grid = FloorGrid::new(3, 2);
        assert!(grid.cell(0, 0).is_some());
        assert!(grid.cell(2, 1).is_some());
        assert!(grid.cell(3, 0).is_none());
        assert!(grid.cell(0, 2).is_none());
        assert!(grid.cell(-1, 0).is_none());
    }

    #[test]
    fn find_matches_height() {
        let mut grid = FloorGrid::new(3, 2);
        let cell = grid.cell_mut(2, 1).unwrap();
        cell.push(FloorDesc::new(500));
        cell.push(FloorDesc::new(100));

        assert_eq!(grid.find(EdgeVertex::new(2, 1, 100)).unwrap().z100i, 100);
        assert!(grid.find(EdgeVertex::new(2, 1, 101)).is_none());
        assert!(grid.find(EdgeVertex::new(1, 1, 100)).is_none());

        grid.find_mut(EdgeVertex::new(2, 1, 500)).unwrap().blocked = Directions::TOP;
        let vertices: Vec<_> = grid.iter().map(|(v, f)| (v, f.blocked)).collect();
        assert_eq!(
            vertices,
            vec![
                (EdgeVertex::new(2, 1, 500), Directions::TOP),
                (EdgeVertex::new(2, 1, 100), Directions::all()),
            ]
        );
        assert_eq!(grid.floor_count(), 2);
        assert_eq!(grid.rows().count(), 2);
    }
}
