//! Decides for every floor which of its eight neighbors it can walk to.

use glam::Vec3A;
use rayon::prelude::*;

use crate::{
    builder::NavMeshBuildError,
    config::NavMeshConfig,
    direction::Directions,
    floor::FloorGrid,
    geo_space::GeoSpace,
    math::BoundedRay,
};

/// Line-of-sight rays run this far above the floors to step over small bumps.
const SIGHT_OFFSET: f32 = 0.3;

/// Height differences at least this large are checked for a continuous slope.
const DROP_CHECK_THRESHOLD: f32 = 0.6;

/// The order directions are tested in.
const TEST_ORDER: [Directions; 8] = [
    Directions::LEFT,
    Directions::TOP_LEFT,
    Directions::TOP,
    Directions::TOP_RIGHT,
    Directions::RIGHT,
    Directions::BOTTOM_RIGHT,
    Directions::BOTTOM,
    Directions::BOTTOM_LEFT,
];

/// Recomputes the blocked directions of every floor.
///
/// Rows are processed in parallel in two passes, odd rows first, then even rows. Each pass
/// only reads the grid and the results are written back after the pass finished.
///
/// Runs on the current rayon pool.
pub(crate) fn compute_direction_flags(
    config: &NavMeshConfig,
    geo_space: &GeoSpace,
    floors: &mut FloorGrid,
) -> Result<(), NavMeshBuildError> {
    for interleave in 0..2 {
        let grid: &FloorGrid = floors;
        let rows = (0..grid.height())
            .into_par_iter()
            .filter(|block_y| block_y % 2 != interleave)
            .map(|block_y| {
                row_flags(config, geo_space, grid, block_y).map(|flags| (block_y, flags))
            })
            .collect::<Result<Vec<_>, _>>()?;

        for (block_y, row) in rows {
            for (block_x, cell_flags) in row.into_iter().enumerate() {
                let Some(cell) = floors.cell_mut(block_x as i32, block_y as i32) else {
                    continue;
                };
                for (floor, blocked) in cell.iter_mut().zip(cell_flags) {
                    floor.blocked = blocked;
                }
            }
        }
    }
    Ok(())
}

fn row_flags(
    config: &NavMeshConfig,
    geo_space: &GeoSpace,
    floors: &FloorGrid,
    block_y: usize,
) -> Result<Vec<Vec<Directions>>, NavMeshBuildError> {
    (0..floors.width())
        .map(|block_x| {
            let Some(cell) = floors.cell(block_x as i32, block_y as i32) else {
                return Ok(Vec::new());
            };
            cell.iter()
                .map(|floor| {
                    blocked_directions(config, geo_space, floors, block_x, block_y, floor.height())
                })
                .collect()
        })
        .collect()
}

/// The directions a floor at height `z` in the given cell cannot move in.
pub(crate) fn blocked_directions(
    config: &NavMeshConfig,
    geo_space: &GeoSpace,
    floors: &FloorGrid,
    block_x: usize,
    block_y: usize,
    z: f32,
) -> Result<Directions, NavMeshBuildError> {
    let (x, y) = config.world_xy(block_x, block_y);
    let me = Vec3A::new(x, y, z);
    let mut blocked = Directions::empty();
    for direction in TEST_ORDER {
        if is_direction_blocked(config, geo_space, floors, me, block_x, block_y, direction)? {
            blocked |= direction;
        }
    }
    Ok(blocked)
}

fn is_direction_blocked(
    config: &NavMeshConfig,
    geo_space: &GeoSpace,
    floors: &FloorGrid,
    me: Vec3A,
    block_x: usize,
    block_y: usize,
    direction: Directions,
) -> Result<bool, NavMeshBuildError> {
    let Some(offset) = direction.offset() else {
        return Ok(true);
    };
    // Leaving the grid is never allowed.
    let Some(neighbors) = floors.cell(block_x as i32 + offset.x, block_y as i32 + offset.y)
    else {
        return Ok(true);
    };

    let step = config.step;
    let max_z_step = config.max_z_step;
    let horizontal = Vec3A::new(offset.x as f32 * step, offset.y as f32 * step, 0.0);

    let mut found = false;
    for neighbor in neighbors {
        let dz = me.z - neighbor.height();
        if dz.abs() > max_z_step {
            continue;
        }

        // Diagonal moves need ground under the midpoint so they cannot cut through corners.
        if direction.is_diagonal() {
            let mid = me + horizontal * 0.5;
            let ray = BoundedRay::new(mid + Vec3A::Z * max_z_step, Vec3A::NEG_Z, 2.0 * max_z_step);
            if !geo_space.has_collision(&ray) {
                continue;
            }
        }

        let to_neighbor = horizontal - Vec3A::Z * dz;
        let length = to_neighbor.length();
        let lift = Vec3A::Z * SIGHT_OFFSET;
        if geo_space.has_collision(&BoundedRay::new(me + lift, to_neighbor, length)) {
            continue;
        }
        if geo_space.has_collision(&BoundedRay::new(
            me + to_neighbor + lift,
            -to_neighbor,
            length,
        )) {
            continue;
        }

        // Big height differences need a surface between the floors, not a ledge.
        if dz.abs() >= DROP_CHECK_THRESHOLD {
            let highest = me.z.max(me.z - dz);
            let has_slope = (1..4).any(|i| {
                let sample = me + horizontal * (i as f32 / 4.0);
                let ray = BoundedRay::new(
                    Vec3A::new(sample.x, sample.y, highest),
                    Vec3A::NEG_Z,
                    0.8 * dz.abs(),
                );
                geo_space.has_collision(&ray)
            });
            if !has_slope {
                continue;
            }
        }

        if found {
            return Err(NavMeshBuildError::MultipleCandidateSteps {
                block_x,
                block_y,
                direction,
            });
        }
        found = true;
    }
    Ok(!found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::NavMeshConfigBuilder, floor::FloorDesc, scan::scan_floors};

    fn quad(min: [f32; 2], max: [f32; 2], z: f32) -> Vec<Vec3A> {
        let a = Vec3A::new(min[0], min[1], z);
        let b = Vec3A::new(max[0], min[1], z);
        let c = Vec3A::new(max[0], max[1], z);
        let d = Vec3A::new(min[0], max[1], z);
        vec![a, b, c, a, c, d]
    }

    fn wall(x: f32, y1: f32, y2: f32, z1: f32, z2: f32) -> Vec<Vec3A> {
        let a = Vec3A::new(x, y1, z1);
        let b = Vec3A::new(x, y2, z1);
        let c = Vec3A::new(x, y2, z2);
        let d = Vec3A::new(x, y1, z2);
        vec![a, b, c, a, c, d]
    }

    fn build(geo_space: &GeoSpace, size: f32) -> FloorGrid {
        let config = config(size);
        let mut floors = FloorGrid::new(config.block_width, config.block_height);
        scan_floors(&config, geo_space, &mut floors);
        compute_direction_flags(&config, geo_space, &mut floors).unwrap();
        floors
    }

    fn config(size: f32) -> NavMeshConfig {
        NavMeshConfigBuilder {
            x2: size,
            y2: size,
            z2: 10,
            ..Default::default()
        }
        .build()
        .unwrap()
    }

    #[track_caller]
    fn blocked_at(floors: &FloorGrid, x: i32, y: i32) -> Directions {
        floors.cell(x, y).unwrap()[0].blocked
    }

    #[test]
    fn flat_floor_is_open_inside_and_blocked_at_the_border() {
        let mut geo_space = GeoSpace::new();
        geo_space.add_triangles(quad([-1.0, -1.0], [5.0, 5.0], 1.0));
        geo_space.build_tree();
        let floors = build(&geo_space, 5.0);

        assert_eq!(blocked_at(&floors, 2, 2), Directions::empty());
        assert_eq!(
            blocked_at(&floors, 0, 2),
            Directions::LEFT | Directions::TOP_LEFT | Directions::BOTTOM_LEFT
        );
        assert_eq!(
            blocked_at(&floors, 4, 4),
            Directions::RIGHT
                | Directions::TOP_RIGHT
                | Directions::BOTTOM_RIGHT
                | Directions::TOP
                | Directions::TOP_LEFT
        );
    }

    #[test]
    fn walls_block_line_of_sight() {
        let mut geo_space = GeoSpace::new();
        geo_space.add_triangles(quad([-1.0, -1.0], [5.0, 5.0], 1.0));
        geo_space.add_triangles(wall(2.5, -1.0, 5.0, 0.0, 4.0));
        geo_space.build_tree();
        let floors = build(&geo_space, 5.0);

        let towards_wall = Directions::RIGHT | Directions::TOP_RIGHT | Directions::BOTTOM_RIGHT;
        let left_of_wall = blocked_at(&floors, 2, 2);
        assert!(left_of_wall.contains(towards_wall));
        assert!(!left_of_wall.intersects(Directions::LEFT | Directions::TOP | Directions::BOTTOM));
        let right_of_wall = blocked_at(&floors, 3, 2);
        assert!(right_of_wall.contains(towards_wall.inverse()));
    }

    #[test]
    fn ledges_are_blocked() {
        let mut geo_space = GeoSpace::new();
        geo_space.add_triangles(quad([-1.0, -1.0], [2.5, 5.0], 3.0));
        geo_space.add_triangles(quad([2.5, -1.0], [5.0, 5.0], 1.0));
        geo_space.build_tree();
        let floors = build(&geo_space, 5.0);

        assert!(blocked_at(&floors, 2, 2).contains(Directions::RIGHT));
        assert!(blocked_at(&floors, 3, 2).contains(Directions::LEFT));
    }

    #[test]
    fn small_steps_are_open_both_ways() {
        let mut geo_space = GeoSpace::new();
        geo_space.add_triangles(quad([-1.0, -1.0], [2.5, 5.0], 1.3));
        geo_space.add_triangles(quad([2.5, -1.0], [5.0, 5.0], 1.0));
        geo_space.build_tree();
        let floors = build(&geo_space, 5.0);

        assert!(!blocked_at(&floors, 2, 2).contains(Directions::RIGHT));
        assert!(!blocked_at(&floors, 3, 2).contains(Directions::LEFT));
    }

    #[test]
    fn missing_neighbors_block() {
        let geo_space = GeoSpace::new();
        let config = config(3.0);
        let mut floors = FloorGrid::new(3, 3);
        floors.cell_mut(1, 1).unwrap().push(FloorDesc::new(100));
        let blocked = blocked_directions(&config, &geo_space, &floors, 1, 1, 1.0).unwrap();
        assert_eq!(blocked, Directions::all());
    }
}
