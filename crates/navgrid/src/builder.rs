//! Turns a [`GeoSpace`] into a [`CompiledNavMeshSet`].
//!
//! The build runs in phases: scanning finds the floors of every cell, connectivity decides which
//! neighbors each floor can walk to, and compilation splits the floors into islands and packs
//! each island into a [`CompiledNavMesh`].

use std::time::Instant;

use glam::Vec3;
use thiserror::Error;

use crate::{
    compiled::{CompiledNavMesh, NavMeshValidationError},
    compiled_set::CompiledNavMeshSet,
    compiler::{CompileArea, NavMeshCompiler},
    config::NavMeshConfig,
    connectivity,
    direction::Directions,
    floor::{EdgeVertex, FloorDesc, FloorGrid},
    geo_space::GeoSpace,
    scan,
    subgraph::{self, Subgraph},
};

/// Builds the navmesh of a [`GeoSpace`] with the settings of a [`NavMeshConfig`].
///
/// [`NavMeshBuilder::build`] runs every phase. The phases are also exposed individually so floor
/// data can be inspected or extended, for example with [`NavMeshBuilder::add_floor_point`],
/// before compiling.
#[derive(Debug, Clone)]
pub struct NavMeshBuilder {
    config: NavMeshConfig,
    floors: FloorGrid,
}

impl NavMeshBuilder {
    /// Creates a builder with an empty floor grid sized for `config`.
    pub fn new(config: NavMeshConfig) -> Self {
        let floors = FloorGrid::new(config.block_width, config.block_height);
        Self { config, floors }
    }

    /// The settings of this build.
    pub fn config(&self) -> &NavMeshConfig {
        &self.config
    }

    /// The floors found so far.
    pub fn floors(&self) -> &FloorGrid {
        &self.floors
    }

    /// Runs every phase on a dedicated pool of [`NavMeshConfig::parallelism`] threads.
    pub fn build(mut self, geo_space: &GeoSpace) -> Result<CompiledNavMeshSet, NavMeshBuildError> {
        let start = Instant::now();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.parallelism.unwrap_or(0))
            .build()?;
        pool.install(|| {
            self.scan_floors(geo_space);
            self.compute_direction_flags(geo_space)
        })?;
        let set = self.compile_floors()?;
        tracing::info!(
            "Built {} navmesh islands in {:?}",
            set.subgraphs.len(),
            start.elapsed()
        );
        Ok(set)
    }

    /// Finds the floors of every cell. Runs on the current rayon pool.
    pub fn scan_floors(&mut self, geo_space: &GeoSpace) {
        let start = Instant::now();
        scan::scan_floors(&self.config, geo_space, &mut self.floors);
        tracing::debug!(
            "Scanned {} floors in {:?}",
            self.floors.floor_count(),
            start.elapsed()
        );
    }

    /// Recomputes the blocked directions of every floor. Runs on the current rayon pool.
    pub fn compute_direction_flags(&mut self, geo_space: &GeoSpace) -> Result<(), NavMeshBuildError> {
        let start = Instant::now();
        connectivity::compute_direction_flags(&self.config, geo_space, &mut self.floors)?;
        tracing::debug!("Computed direction flags in {:?}", start.elapsed());
        Ok(())
    }

    /// Adds a floor with every direction blocked at a world position.
    ///
    /// Direction flags are only assigned to it by a later [`NavMeshBuilder::compute_direction_flags`].
    /// Adding a floor that already exists is a no-op.
    pub fn add_floor_point(&mut self, point: Vec3) -> Result<(), NavMeshBuildError> {
        let out_of_bounds = NavMeshBuildError::PointOutOfBounds {
            x: point.x,
            y: point.y,
        };
        let Some((block_x, block_y)) = self.config.block_from_world(point.x, point.y) else {
            return Err(out_of_bounds);
        };
        let Some(cell) = self.floors.cell_mut(block_x as i32, block_y as i32) else {
            return Err(out_of_bounds);
        };
        let floor = FloorDesc::from_height(point.z);
        if cell.iter().all(|existing| existing.z100i != floor.z100i) {
            cell.push(floor);
        }
        Ok(())
    }

    /// Splits the floors into islands, makes their flags consistent and compiles every island.
    ///
    /// Islands with fewer than [`NavMeshConfig::min_subgraph_size`] floors are dropped if
    /// [`NavMeshConfig::remove_small_subgraphs`] is set.
    pub fn compile_floors(&mut self) -> Result<CompiledNavMeshSet, NavMeshBuildError> {
        let start = Instant::now();
        let edges = subgraph::gather_edges(&self.floors, self.config.max_z_step);
        tracing::debug!("Gathered edges of {} floors in {:?}", edges.len(), start.elapsed());

        let start = Instant::now();
        let mut subgraphs = subgraph::compute_subgraphs(&edges);
        tracing::debug!("Found {} subgraphs in {:?}", subgraphs.len(), start.elapsed());

        if self.config.remove_small_subgraphs {
            let before = subgraphs.len();
            subgraphs.retain(|subgraph| subgraph.len() >= self.config.min_subgraph_size);
            tracing::debug!(
                "Removed {} subgraphs smaller than {} floors",
                before - subgraphs.len(),
                self.config.min_subgraph_size
            );
        } else {
            tracing::info!("Not removing small subgraphs");
        }

        let start = Instant::now();
        subgraph::fix_direction_flags(&mut self.floors, &edges, &subgraphs)?;
        subgraph::validate_vertices_exist(&self.floors, &subgraphs)?;
        subgraph::validate_boundaries_blocked(&self.floors, &subgraphs)?;
        tracing::debug!("Fixed direction flags in {:?}", start.elapsed());

        let start = Instant::now();
        let compiled = subgraphs
            .iter()
            .filter_map(|subgraph| self.compile_subgraph(subgraph).transpose())
            .collect::<Result<Vec<_>, _>>()?;
        tracing::debug!("Compiled {} subgraphs in {:?}", compiled.len(), start.elapsed());
        Ok(CompiledNavMeshSet::new(compiled))
    }

    /// Compiles the bounding rectangle of one island. `None` for an empty island.
    fn compile_subgraph(
        &self,
        subgraph: &Subgraph,
    ) -> Result<Option<CompiledNavMesh>, NavMeshBuildError> {
        let Some((min_x, min_y, max_x, max_y)) = subgraph::block_bounds(subgraph) else {
            return Ok(None);
        };
        let (min_z100, max_z100) = z100_range(subgraph);
        let (x1, y1) = self.config.world_xy(min_x.into(), min_y.into());
        let area = CompileArea {
            start_x: min_x.into(),
            start_y: min_y.into(),
            width: usize::from(max_x - min_x) + 1,
            height: usize::from(max_y - min_y) + 1,
            x1,
            y1,
            z1: (min_z100 as f32 / 100.0) as i32,
            z2: (max_z100 as f32 / 100.0) as i32 + 1,
        };
        NavMeshCompiler::new(&self.floors, self.config.step, self.config.max_z_step)
            .build(subgraph, area)
            .map(Some)
    }
}

fn z100_range(subgraph: &Subgraph) -> (i32, i32) {
    subgraph
        .iter()
        .map(|vertex| vertex.z100i)
        .fold((i32::MAX, i32::MIN), |(min, max), z| (min.min(z), max.max(z)))
}

/// Errors that can occur while building a navmesh.
#[derive(Error, Debug)]
pub enum NavMeshBuildError {
    /// The worker pool could not be started.
    #[error("failed to build the thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    /// A floor was added outside the grid.
    #[error("point ({x}, {y}) lies outside the grid")]
    PointOutOfBounds {
        /// The x coordinate of the point
        x: f32,
        /// The y coordinate of the point
        y: f32,
    },
    /// More than one floor of a neighboring cell is reachable in the same direction.
    #[error("multiple candidate steps from cell ({block_x}, {block_y}) towards {direction:?}")]
    MultipleCandidateSteps {
        /// The column of the floor
        block_x: usize,
        /// The row of the floor
        block_y: usize,
        /// The ambiguous direction
        direction: Directions,
    },
    /// A floor referenced by a connection does not exist.
    #[error("vertex {vertex:?} not found in the floor data")]
    VertexNotFound {
        /// The missing floor
        vertex: EdgeVertex,
    },
    /// A floor on the border of its island's rectangle is open towards the outside.
    #[error("vertex {vertex:?} on the border of its island is open towards {open:?}")]
    BoundaryNotBlocked {
        /// The offending floor
        vertex: EdgeVertex,
        /// The directions that should be blocked
        open: Directions,
    },
    /// The rectangle to compile does not fit the floor grid.
    #[error("compile range of {width}x{height} cells at ({start_x}, {start_y}) is out of bounds")]
    InvalidCompileRange {
        /// The first column
        start_x: usize,
        /// The first row
        start_y: usize,
        /// The number of columns
        width: usize,
        /// The number of rows
        height: usize,
    },
    /// The height range used for quantization is negative or empty.
    #[error("invalid height range {z1}..{z2}")]
    InvalidHeightRange {
        /// The bottom of the range
        z1: i32,
        /// The top of the range
        z2: i32,
    },
    /// A cell holds more floors than fit in its count byte.
    #[error("too many heights ({count}) in cell ({block_x}, {block_y}), max is 255")]
    TooManyHeights {
        /// The column of the cell
        block_x: usize,
        /// The row of the cell
        block_y: usize,
        /// The number of floors
        count: usize,
    },
    /// The overflow buffer grew past what a cell can address.
    #[error("overflow buffer of {len} bytes exceeds the 24-bit addressable range")]
    MultiheightsOverflow {
        /// The size of the buffer
        len: usize,
    },
    /// A compiled island failed validation.
    #[error("compiled navmesh is invalid: {0}")]
    InvalidMesh(#[from] NavMeshValidationError),
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;

    use super::*;
    use crate::config::NavMeshConfigBuilder;

    fn quad(min: [f32; 2], max: [f32; 2], z: f32) -> Vec<Vec3A> {
        let a = Vec3A::new(min[0], min[1], z);
        let b = Vec3A::new(max[0], min[1], z);
        let c = Vec3A::new(max[0], max[1], z);
        let d = Vec3A::new(min[0], max[1], z);
        vec![a, b, c, a, c, d]
    }

    fn config(remove_small_subgraphs: bool) -> NavMeshConfig {
        NavMeshConfigBuilder {
            x2: 8.0,
            y2: 4.0,
            z2: 10,
            min_subgraph_size: 10,
            remove_small_subgraphs,
            parallelism: Some(2),
            ..Default::default()
        }
        .build()
        .unwrap()
    }

    /// A 4x4 floor at height 1 next to a 4x4 floor at height 4.
    fn two_levels() -> GeoSpace {
        let mut geo_space = GeoSpace::new();
        geo_space.add_triangles(quad([-1.0, -1.0], [3.5, 5.0], 1.0));
        geo_space.add_triangles(quad([3.5, -1.0], [9.0, 5.0], 4.0));
        geo_space.build_tree();
        geo_space
    }

    #[test]
    fn builds_one_mesh_per_island() -> anyhow::Result<()> {
        let set = NavMeshBuilder::new(config(false)).build(&two_levels())?;
        assert_eq!(set.subgraphs.len(), 2);
        let mut origins: Vec<_> = set
            .subgraphs
            .iter()
            .map(|mesh| (mesh.x1(), mesh.block_width(), mesh.z1(), mesh.z2()))
            .collect();
        origins.sort_by(|a, b| a.0.total_cmp(&b.0));
        assert_eq!(origins, vec![(0.0, 4, 1, 2), (4.0, 4, 4, 5)]);
        Ok(())
    }

    #[test]
    fn small_islands_are_removed() -> anyhow::Result<()> {
        let mut geo_space = two_levels();
        // A 2x2 pad far above both levels.
        geo_space.add_triangles(quad([0.5, 0.5], [2.4, 2.4], 8.0));
        geo_space.build_tree();

        let kept = NavMeshBuilder::new(config(false)).build(&geo_space)?;
        assert_eq!(kept.subgraphs.len(), 3);
        let removed = NavMeshBuilder::new(config(true)).build(&geo_space)?;
        assert_eq!(removed.subgraphs.len(), 2);
        Ok(())
    }

    #[test]
    fn floor_points_are_added_once() -> anyhow::Result<()> {
        let mut builder = NavMeshBuilder::new(config(false));
        builder.add_floor_point(Vec3::new(2.2, 1.9, 3.0))?;
        builder.add_floor_point(Vec3::new(2.2, 1.9, 3.0))?;
        assert_eq!(builder.floors().cell(2, 2).unwrap(), &[FloorDesc::new(300)]);
        assert!(matches!(
            builder.add_floor_point(Vec3::new(-3.0, 1.0, 3.0)),
            Err(NavMeshBuildError::PointOutOfBounds { .. })
        ));
        Ok(())
    }

    #[test]
    fn phases_can_run_individually() -> anyhow::Result<()> {
        let geo_space = two_levels();
        let mut builder = NavMeshBuilder::new(config(false));
        builder.scan_floors(&geo_space);
        assert_eq!(builder.floors().floor_count(), 32);
        builder.compute_direction_flags(&geo_space)?;
        let set = builder.compile_floors()?;
        assert_eq!(set, NavMeshBuilder::new(config(false)).build(&geo_space)?);
        Ok(())
    }
}
