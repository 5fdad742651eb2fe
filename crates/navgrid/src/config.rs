use thiserror::Error;

use crate::math::Aabb3d;

/// The settings of a navmesh build. Usually built using [`NavMeshConfigBuilder`].
///
/// The builder samples the world on a regular XY grid of [`NavMeshConfig::step`] sized cells,
/// descending from [`NavMeshConfig::z2`] to [`NavMeshConfig::z1`] in every cell. Z is up.
/// Units are world units (wu) unless noted otherwise.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct NavMeshConfig {
    /// The world-space x coordinate of the first grid column. `[Limit: >= 0]`
    pub x1: f32,
    /// The world-space y coordinate of the first grid row. `[Limit: >= 0]`
    pub y1: f32,
    /// The lowest height that is scanned. `[Limit: >= 0]`
    pub z1: i32,
    /// The exclusive upper x bound of the scanned area.
    pub x2: f32,
    /// The exclusive upper y bound of the scanned area.
    pub y2: f32,
    /// The height every scan starts at. `[Limit: > z1]`
    pub z2: i32,
    /// The edge length of a grid cell. `[Limit: > 0]`
    pub step: f32,
    /// The number of grid columns, derived as `ceil((x2 - x1) / step)`. `[Units: cells]`
    pub block_width: usize,
    /// The number of grid rows, derived as `ceil((y2 - y1) / step)`. `[Units: cells]`
    pub block_height: usize,
    /// The maximum height difference between two connected neighboring floors.
    pub max_z_step: f32,
    /// The free vertical space a floor needs above it to be walkable.
    pub required_space_above_floor: f32,
    /// Islands with fewer floors than this are discarded when
    /// [`NavMeshConfig::remove_small_subgraphs`] is set. `[Units: floors]`
    pub min_subgraph_size: usize,
    /// Whether to discard islands smaller than [`NavMeshConfig::min_subgraph_size`].
    pub remove_small_subgraphs: bool,
    /// The number of worker threads used for the parallel phases.
    /// `None` uses one thread per logical CPU.
    pub parallelism: Option<usize>,
}

/// A builder for [`NavMeshConfig`]. Derives the grid dimensions and validates the bounds.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct NavMeshConfigBuilder {
    /// See [`NavMeshConfig::x1`]
    pub x1: f32,
    /// See [`NavMeshConfig::y1`]
    pub y1: f32,
    /// See [`NavMeshConfig::z1`]
    pub z1: i32,
    /// See [`NavMeshConfig::x2`]
    pub x2: f32,
    /// See [`NavMeshConfig::y2`]
    pub y2: f32,
    /// See [`NavMeshConfig::z2`]
    pub z2: i32,
    /// See [`NavMeshConfig::step`]
    pub step: f32,
    /// See [`NavMeshConfig::max_z_step`]
    ///
    /// Coarse grids need a larger value than fine ones: at a step of 4 a slope rises about
    /// 4 units between neighbors, while tiny values on a fine grid reject stairs.
    pub max_z_step: f32,
    /// See [`NavMeshConfig::required_space_above_floor`]
    pub required_space_above_floor: f32,
    /// See [`NavMeshConfig::min_subgraph_size`]
    pub min_subgraph_size: usize,
    /// See [`NavMeshConfig::remove_small_subgraphs`]
    pub remove_small_subgraphs: bool,
    /// See [`NavMeshConfig::parallelism`]
    pub parallelism: Option<usize>,
}

impl Default for NavMeshConfigBuilder {
    fn default() -> Self {
        Self {
            x1: 0.0,
            y1: 0.0,
            z1: 0,
            x2: 0.0,
            y2: 0.0,
            z2: 0,
            step: 1.0,
            max_z_step: 0.8,
            required_space_above_floor: 2.0,
            min_subgraph_size: 100,
            remove_small_subgraphs: true,
            parallelism: None,
        }
    }
}

impl NavMeshConfigBuilder {
    /// Creates a builder scanning the area covered by `aabb`, for example a
    /// [`GeoSpace::bounding_box`](crate::GeoSpace::bounding_box).
    ///
    /// Negative minimum coordinates are clamped to 0 and the height range is widened to whole units.
    pub fn from_geo_bounds(aabb: &Aabb3d, step: f32) -> Self {
        Self {
            x1: aabb.min.x.max(0.0),
            y1: aabb.min.y.max(0.0),
            z1: (aabb.min.z as i32).max(0),
            x2: aabb.max.x,
            y2: aabb.max.y,
            z2: aabb.max.z.ceil() as i32,
            step,
            ..Default::default()
        }
    }

    /// Validates the settings and derives the grid dimensions.
    pub fn build(self) -> Result<NavMeshConfig, NavMeshConfigError> {
        if !(self.x1 < self.x2 && self.y1 < self.y2 && self.z1 < self.z2) {
            return Err(NavMeshConfigError::EmptyBounds {
                min: [self.x1, self.y1, self.z1 as f32],
                max: [self.x2, self.y2, self.z2 as f32],
            });
        }
        if self.x1 < 0.0 || self.y1 < 0.0 || self.z1 < 0 {
            return Err(NavMeshConfigError::NegativeBounds {
                min: [self.x1, self.y1, self.z1 as f32],
            });
        }
        if self.step.is_nan() || self.step <= 0.0 {
            return Err(NavMeshConfigError::InvalidStep { step: self.step });
        }
        let width = ((self.x2 - self.x1) / self.step).ceil();
        let height = ((self.y2 - self.y1) / self.step).ceil();
        let max = u16::MAX as f32;
        if width > max || height > max {
            return Err(NavMeshConfigError::GridTooLarge { width, height });
        }

        Ok(NavMeshConfig {
            x1: self.x1,
            y1: self.y1,
            z1: self.z1,
            x2: self.x2,
            y2: self.y2,
            z2: self.z2,
            step: self.step,
            block_width: width as usize,
            block_height: height as usize,
            max_z_step: self.max_z_step,
            required_space_above_floor: self.required_space_above_floor,
            min_subgraph_size: self.min_subgraph_size,
            remove_small_subgraphs: self.remove_small_subgraphs,
            parallelism: self.parallelism,
        })
    }
}

impl NavMeshConfig {
    /// The world-space XY position of a grid cell.
    #[inline]
    pub fn world_xy(&self, block_x: usize, block_y: usize) -> (f32, f32) {
        (
            self.x1 + block_x as f32 * self.step,
            self.y1 + block_y as f32 * self.step,
        )
    }

    /// The grid cell containing a world-space XY position, treating every cell as centered on
    /// its [`NavMeshConfig::world_xy`]. `None` if the position lies outside the grid.
    pub fn block_from_world(&self, x: f32, y: f32) -> Option<(usize, usize)> {
        let half_step = self.step / 2.0;
        let block_x = ((x + half_step - self.x1) / self.step).floor();
        let block_y = ((y + half_step - self.y1) / self.step).floor();
        if block_x < 0.0
            || block_y < 0.0
            || block_x >= self.block_width as f32
            || block_y >= self.block_height as f32
        {
            return None;
        }
        Some((block_x as usize, block_y as usize))
    }
}

/// Errors that can occur when building a [`NavMeshConfig`] with [`NavMeshConfigBuilder::build`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NavMeshConfigError {
    /// Happens when a minimum bound is not strictly less than its maximum.
    #[error("world bounds are empty: min {min:?} must be less than max {max:?} on every axis")]
    EmptyBounds {
        /// The minimum corner
        min: [f32; 3],
        /// The maximum corner
        max: [f32; 3],
    },
    /// Happens when the minimum corner lies below zero.
    #[error("world bounds must be positive, got min {min:?}")]
    NegativeBounds {
        /// The minimum corner
        min: [f32; 3],
    },
    /// Happens when the cell size is not a positive number.
    #[error("step must be positive, got {step}")]
    InvalidStep {
        /// The configured step
        step: f32,
    },
    /// Happens when the grid has more columns or rows than fit in a `u16`.
    #[error("grid of {width}x{height} cells is too large, max is {max} per side", max = u16::MAX)]
    GridTooLarge {
        /// The number of columns
        width: f32,
        /// The number of rows
        height: f32,
    },
}
