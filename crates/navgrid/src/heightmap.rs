//! Terrain heightfields as collision geometry.

use glam::Vec3A;
use thiserror::Error;

use crate::geo_space::GeoSpace;

/// The horizontal distance between neighboring samples unless configured otherwise.
pub const DEFAULT_UNIT_SIZE: f32 = 2.0;

/// Cells are grouped into sectors of this many cells per side, one triangle batch each.
const SECTOR_SIZE: usize = 8;

/// Cells whose height changes by at least this much towards a neighbor are too steep to keep.
const STEEP_HEIGHT_DIFFERENCE: f32 = 2.0;

/// A square grid of terrain height samples.
///
/// Sample `(x, y)` lies at world position `(y * unit_size, x * unit_size, height)`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Heightmap {
    width: usize,
    unit_size: f32,
    heights: Vec<f32>,
    cutouts: Vec<bool>,
}

impl Heightmap {
    /// Creates a heightmap from `width * width` samples in row-major order.
    pub fn new(width: usize, heights: Vec<f32>) -> Result<Self, HeightmapError> {
        if heights.len() != width * width {
            return Err(HeightmapError::SampleCountMismatch {
                width,
                actual: heights.len(),
            });
        }
        Ok(Self {
            width,
            unit_size: DEFAULT_UNIT_SIZE,
            cutouts: vec![false; heights.len()],
            heights,
        })
    }

    /// Sets the horizontal distance between neighboring samples.
    pub fn with_unit_size(mut self, unit_size: f32) -> Self {
        self.unit_size = unit_size;
        self
    }

    /// The number of samples per side.
    pub fn width(&self) -> usize {
        self.width
    }

    /// The horizontal distance between neighboring samples.
    pub fn unit_size(&self) -> f32 {
        self.unit_size
    }

    /// Terrain whose heights are all zero has no collision.
    pub fn is_empty(&self) -> bool {
        self.heights.iter().all(|height| *height == 0.0)
    }

    /// Marks a sample as a cutout. Sectors containing cutouts are never simplified.
    /// Samples outside the grid are ignored.
    pub fn set_cutout(&mut self, x: usize, y: usize, cutout: bool) {
        if x < self.width && y < self.width {
            self.cutouts[y * self.width + x] = cutout;
        }
    }

    /// Whether a sample is marked as a cutout.
    pub fn is_cutout(&self, x: usize, y: usize) -> bool {
        x < self.width && y < self.width && self.cutouts[y * self.width + x]
    }

    /// The world-space position of a sample. `x` and `y` must be less than [`Heightmap::width`].
    pub fn vertex(&self, x: usize, y: usize) -> Vec3A {
        Vec3A::new(
            y as f32 * self.unit_size,
            x as f32 * self.unit_size,
            self.heights[y * self.width + x],
        )
    }

    /// Adds the terrain to `geo_space` as one triangle batch per sector and returns the number
    /// of triangles added.
    ///
    /// Cells that are too steep are left out. A sector that is entirely flat, without cutouts or
    /// steep cells, is replaced by two triangles spanning it.
    pub fn insert_into(&self, geo_space: &mut GeoSpace) -> usize {
        if self.is_empty() || self.width < 2 {
            return 0;
        }
        let last = self.width - 1;
        let mut triangles = 0;
        for sector_y in (0..last).step_by(SECTOR_SIZE) {
            for sector_x in (0..last).step_by(SECTOR_SIZE) {
                let end_x = last.min(sector_x + SECTOR_SIZE);
                let end_y = last.min(sector_y + SECTOR_SIZE);
                let Some(vertices) = self.sector_triangles(sector_x, sector_y, end_x, end_y) else {
                    continue;
                };
                triangles += vertices.len() / 3;
                geo_space.add_triangles(vertices);
            }
        }
        tracing::debug!("Inserted {triangles} terrain triangles");
        triangles
    }

    fn sector_triangles(
        &self,
        sector_x: usize,
        sector_y: usize,
        end_x: usize,
        end_y: usize,
    ) -> Option<Vec<Vec3A>> {
        let mut vertices = Vec::new();
        let mut skipped = false;
        for y in sector_y..end_y {
            for x in sector_x..end_x {
                let p1 = self.vertex(x, y);
                let p2 = self.vertex(x, y + 1);
                let p3 = self.vertex(x + 1, y);
                let p4 = self.vertex(x + 1, y + 1);
                if (p1.z - p2.z).abs() >= STEEP_HEIGHT_DIFFERENCE
                    || (p1.z - p3.z).abs() >= STEEP_HEIGHT_DIFFERENCE
                {
                    skipped = true;
                    continue;
                }
                vertices.extend([p1, p3, p2, p2, p4, p3]);
            }
        }
        let first = vertices.first()?.z;

        let flat = vertices.iter().all(|vertex| vertex.z == first);
        let has_cutout = (sector_y..end_y).any(|y| (sector_x..end_x).any(|x| self.is_cutout(x, y)));
        if !skipped && flat && !has_cutout {
            let p1 = self.vertex(sector_x, sector_y);
            let p2 = self.vertex(sector_x, end_y);
            let p3 = self.vertex(end_x, sector_y);
            let p4 = self.vertex(end_x, end_y);
            return Some(vec![p1, p3, p2, p2, p4, p3]);
        }
        Some(vertices)
    }
}

/// Errors that can occur when creating a [`Heightmap`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeightmapError {
    /// Happens when the number of samples is not the square of the width.
    #[error("a heightmap of width {width} needs {} samples, got {actual}", width * width)]
    SampleCountMismatch {
        /// The number of samples per side
        width: usize,
        /// The number of samples passed
        actual: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::BoundedRay;

    fn flat(width: usize, height: f32) -> Heightmap {
        Heightmap::new(width, vec![height; width * width]).unwrap()
    }

    fn ground_below(geo_space: &GeoSpace, x: f32, y: f32) -> Option<f32> {
        let ray = BoundedRay::new(Vec3A::new(x, y, 100.0), Vec3A::NEG_Z, 200.0);
        geo_space.nearest_hit(&ray).map(|distance| 100.0 - distance)
    }

    #[test]
    fn rejects_non_square_sample_counts() {
        assert_eq!(
            Heightmap::new(3, vec![0.0; 8]),
            Err(HeightmapError::SampleCountMismatch {
                width: 3,
                actual: 8
            })
        );
    }

    #[test]
    fn flat_sectors_collapse_to_two_triangles() {
        let heightmap = flat(17, 5.0);
        let mut geo_space = GeoSpace::new();
        // 16 cells per side make 2x2 sectors.
        assert_eq!(heightmap.insert_into(&mut geo_space), 4 * 2);
        geo_space.build_tree();
        assert_eq!(geo_space.batch_count(), 4);
        assert_eq!(ground_below(&geo_space, 3.0, 27.0), Some(5.0));
        assert_eq!(ground_below(&geo_space, 33.0, 3.0), None);
    }

    #[test]
    fn cutouts_keep_every_cell() {
        let mut heightmap = flat(9, 5.0);
        heightmap.set_cutout(3, 4, true);
        assert!(heightmap.is_cutout(3, 4));
        let mut geo_space = GeoSpace::new();
        assert_eq!(heightmap.insert_into(&mut geo_space), 8 * 8 * 2);
    }

    #[test]
    fn steep_cells_are_skipped() {
        // A cliff between the first and second column of samples.
        let width = 4;
        let heights = (0..width * width)
            .map(|i| if i % width == 0 { 10.0 } else { 1.0 })
            .collect();
        let heightmap = Heightmap::new(width, heights).unwrap();
        let mut geo_space = GeoSpace::new();
        assert_eq!(heightmap.insert_into(&mut geo_space), 3 * 2 * 2);
        geo_space.build_tree();

        // Sample (x, y) lies at world (2y, 2x): the cliff runs along world y in 0..2.
        assert_eq!(ground_below(&geo_space, 3.0, 1.0), None);
        assert_eq!(ground_below(&geo_space, 2.5, 3.0), Some(1.0));
    }

    #[test]
    fn sample_axes_are_swapped_in_world_space() {
        let mut heights = vec![0.0; 9];
        heights[2] = 7.0;
        let heightmap = Heightmap::new(3, heights).unwrap();
        assert_eq!(heightmap.vertex(2, 0), Vec3A::new(0.0, 4.0, 7.0));
        assert_eq!(heightmap.with_unit_size(1.0).vertex(1, 2), Vec3A::new(2.0, 1.0, 0.0));
    }

    #[test]
    fn all_zero_terrain_is_empty() {
        let heightmap = flat(9, 0.0);
        assert!(heightmap.is_empty());
        let mut geo_space = GeoSpace::new();
        assert_eq!(heightmap.insert_into(&mut geo_space), 0);
        assert!(geo_space.is_empty());
    }
}
