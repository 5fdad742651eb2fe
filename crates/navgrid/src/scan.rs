//! Finds every walkable height in every grid cell by casting rays downwards.

use glam::Vec3A;
use rayon::prelude::*;

use crate::{
    config::NavMeshConfig,
    floor::{FloorDesc, FloorGrid},
    geo_space::GeoSpace,
    math::BoundedRay,
};

/// The headroom ray starts this far above a floor so it does not hit the floor itself.
const HEADROOM_RAY_OFFSET: f32 = 0.01;

/// After a hit, scanning resumes this far below it to skip the solid below the surface.
const SOLID_SKIP: f32 = 1.0;

/// Scans every cell of `floors` in parallel, one task per row, appending the floors found.
///
/// Runs on the current rayon pool.
pub(crate) fn scan_floors(config: &NavMeshConfig, geo_space: &GeoSpace, floors: &mut FloorGrid) {
    let width = floors.width().max(1);
    floors
        .cells_mut()
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(block_y, row)| {
            for (block_x, cell) in row.iter_mut().enumerate() {
                let (x, y) = config.world_xy(block_x, block_y);
                scan_column(config, geo_space, x, y, cell);
            }
        });
}

/// Descends from `z2` to `z1`, recording every surface hit that has enough free space above it.
///
/// A surface exactly at `z1` is not recorded.
pub(crate) fn scan_column(
    config: &NavMeshConfig,
    geo_space: &GeoSpace,
    x: f32,
    y: f32,
    cell: &mut Vec<FloorDesc>,
) {
    let bottom = config.z1 as f32;
    let mut top = config.z2 as f32;
    while top > bottom {
        let ray = BoundedRay::new(Vec3A::new(x, y, top), Vec3A::NEG_Z, top - bottom);
        let Some(distance) = geo_space.nearest_hit(&ray) else {
            break;
        };
        let z = top - distance;

        let headroom = BoundedRay::new(
            Vec3A::new(x, y, z + HEADROOM_RAY_OFFSET),
            Vec3A::Z,
            config.required_space_above_floor,
        );
        if !geo_space.has_collision(&headroom) {
            cell.push(FloorDesc::from_height(z));
        }

        top -= distance + SOLID_SKIP;
    }
}
