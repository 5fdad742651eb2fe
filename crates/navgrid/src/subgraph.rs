//! Splits the floors into connected islands and makes their direction flags consistent.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::{
    builder::NavMeshBuildError,
    direction::Directions,
    floor::{EdgeVertex, FloorGrid},
};

/// Every floor mapped to the floors it connects to.
pub type EdgeMap = BTreeMap<EdgeVertex, Vec<EdgeVertex>>;

/// A connected set of floors.
pub type Subgraph = BTreeSet<EdgeVertex>;

/// Collects the connections between neighboring floors.
///
/// A floor connects to the first floor of a neighboring cell when neither blocks the direction
/// towards the other and their heights differ by at most `max_z_step`. Every connection is
/// recorded in both directions.
pub fn gather_edges(floors: &FloorGrid, max_z_step: f32) -> EdgeMap {
    let mut edges = EdgeMap::new();
    for block_y in 0..floors.height() as i32 {
        for block_x in 0..floors.width() as i32 {
            let Some(center) = floors.cell(block_x, block_y) else {
                continue;
            };
            if center.is_empty() {
                continue;
            }
            for direction in Directions::COMPASS {
                let Some(offset) = direction.offset() else {
                    continue;
                };
                let (neighbor_x, neighbor_y) = (block_x + offset.x, block_y + offset.y);
                let Some(neighbors) = floors.cell(neighbor_x, neighbor_y) else {
                    continue;
                };
                let inverse = direction.inverse();

                for floor in center {
                    if floor.blocked.contains(direction) {
                        continue;
                    }
                    let Some(target) = neighbors.iter().find(|neighbor| {
                        !neighbor.blocked.contains(inverse)
                            && (floor.z100i - neighbor.z100i).abs() as f32 / 100.0 <= max_z_step
                    }) else {
                        continue;
                    };
                    let from = EdgeVertex::new(block_x as u16, block_y as u16, floor.z100i);
                    let to = EdgeVertex::new(neighbor_x as u16, neighbor_y as u16, target.z100i);
                    link(&mut edges, from, to);
                    link(&mut edges, to, from);
                }
            }
        }
    }
    edges
}

fn link(edges: &mut EdgeMap, from: EdgeVertex, to: EdgeVertex) {
    let targets = edges.entry(from).or_default();
    if !targets.contains(&to) {
        targets.push(to);
    }
}

/// Partitions the vertices of `edges` into connected components with a breadth-first flood fill.
pub fn compute_subgraphs(edges: &EdgeMap) -> Vec<Subgraph> {
    let mut subgraphs = Vec::new();
    let mut visited = BTreeSet::new();
    let mut queue = VecDeque::new();

    for start in edges.keys() {
        if visited.contains(start) {
            continue;
        }
        let mut subgraph = Subgraph::new();
        queue.push_back(*start);
        while let Some(current) = queue.pop_front() {
            if !subgraph.insert(current) {
                continue;
            }
            visited.insert(current);
            queue.extend(edges.get(&current).into_iter().flatten().copied());
        }
        subgraphs.push(subgraph);
    }
    subgraphs
}

/// Blocks every direction of every floor, then opens both ends of each connection inside the
/// surviving `subgraphs`.
///
/// Afterwards the flags are symmetric: if a floor is open towards a neighbor, that neighbor is
/// open towards it.
pub fn fix_direction_flags(
    floors: &mut FloorGrid,
    edges: &EdgeMap,
    subgraphs: &[Subgraph],
) -> Result<(), NavMeshBuildError> {
    for row in floors.rows_mut() {
        for floor in row.iter_mut().flatten() {
            floor.blocked = Directions::all();
        }
    }

    for vertex in subgraphs.iter().flatten() {
        for neighbor in edges.get(vertex).into_iter().flatten() {
            let Some(direction) = Directions::from_offset(
                i32::from(neighbor.block_x) - i32::from(vertex.block_x),
                i32::from(neighbor.block_y) - i32::from(vertex.block_y),
            ) else {
                continue;
            };

            let Some(floor) = floors.find_mut(*vertex) else {
                return Err(NavMeshBuildError::VertexNotFound { vertex: *vertex });
            };
            floor.blocked.remove(direction);

            let Some(floor) = floors.find_mut(*neighbor) else {
                return Err(NavMeshBuildError::VertexNotFound { vertex: *neighbor });
            };
            floor.blocked.remove(direction.inverse());
        }
    }
    Ok(())
}

/// Checks that every vertex of every subgraph exists in the floor data.
pub fn validate_vertices_exist(
    floors: &FloorGrid,
    subgraphs: &[Subgraph],
) -> Result<(), NavMeshBuildError> {
    for vertex in subgraphs.iter().flatten() {
        if floors.find(*vertex).is_none() {
            return Err(NavMeshBuildError::VertexNotFound { vertex: *vertex });
        }
    }
    Ok(())
}

/// The cell range covered by a subgraph: `(min_x, min_y, max_x, max_y)`, all inclusive.
pub fn block_bounds(subgraph: &Subgraph) -> Option<(u16, u16, u16, u16)> {
    subgraph.iter().fold(None, |bounds, v| {
        let (min_x, min_y, max_x, max_y) =
            bounds.unwrap_or((v.block_x, v.block_y, v.block_x, v.block_y));
        Some((
            min_x.min(v.block_x),
            min_y.min(v.block_y),
            max_x.max(v.block_x),
            max_y.max(v.block_y),
        ))
    })
}

/// Checks that every vertex on the edge of its subgraph's bounding rectangle is blocked towards
/// the outside.
pub fn validate_boundaries_blocked(
    floors: &FloorGrid,
    subgraphs: &[Subgraph],
) -> Result<(), NavMeshBuildError> {
    let left = Directions::LEFT | Directions::TOP_LEFT | Directions::BOTTOM_LEFT;
    let right = Directions::RIGHT | Directions::TOP_RIGHT | Directions::BOTTOM_RIGHT;
    let bottom = Directions::BOTTOM | Directions::BOTTOM_LEFT | Directions::BOTTOM_RIGHT;
    let top = Directions::TOP | Directions::TOP_LEFT | Directions::TOP_RIGHT;

    for subgraph in subgraphs {
        let Some((min_x, min_y, max_x, max_y)) = block_bounds(subgraph) else {
            continue;
        };
        for vertex in subgraph {
            let Some(floor) = floors.find(*vertex) else {
                return Err(NavMeshBuildError::VertexNotFound { vertex: *vertex });
            };
            let sides = [
                (vertex.block_x == min_x, left),
                (vertex.block_x == max_x, right),
                (vertex.block_y == min_y, bottom),
                (vertex.block_y == max_y, top),
            ];
            for (on_side, outward) in sides {
                if on_side && !floor.blocked.contains(outward) {
                    return Err(NavMeshBuildError::BoundaryNotBlocked {
                        vertex: *vertex,
                        open: outward.difference(floor.blocked),
                    });
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::floor::FloorDesc;

    /// A grid where every cell holds one floor at `z100i` connected to all in-grid neighbors.
    fn open_grid(width: usize, height: usize, z100i: i32) -> FloorGrid {
        let mut floors = FloorGrid::new(width, height);
        for y in 0..height as i32 {
            for x in 0..width as i32 {
                let mut blocked = Directions::empty();
                for direction in Directions::COMPASS {
                    let offset = direction.offset().unwrap();
                    if floors.cell(x + offset.x, y + offset.y).is_none() {
                        blocked |= direction;
                    }
                }
                floors.cell_mut(x, y).unwrap().push(FloorDesc { z100i, blocked });
            }
        }
        floors
    }

    #[test]
    fn open_grid_is_one_subgraph() {
        let floors = open_grid(5, 4, 100);
        let edges = gather_edges(&floors, 0.8);
        assert_eq!(edges.len(), 20);
        assert_eq!(edges[&EdgeVertex::new(2, 2, 100)].len(), 8);
        assert_eq!(edges[&EdgeVertex::new(0, 0, 100)].len(), 3);

        let subgraphs = compute_subgraphs(&edges);
        assert_eq!(subgraphs.len(), 1);
        assert_eq!(subgraphs[0].len(), 20);
        assert_eq!(block_bounds(&subgraphs[0]), Some((0, 0, 4, 3)));
    }

    #[test]
    fn height_gaps_split_subgraphs() {
        let mut floors = open_grid(6, 3, 100);
        for y in 0..3 {
            for x in 3..6 {
                floors.cell_mut(x, y).unwrap()[0].z100i = 300;
            }
        }
        let edges = gather_edges(&floors, 0.8);
        let subgraphs = compute_subgraphs(&edges);
        assert_eq!(subgraphs.len(), 2);

        // Every vertex lands in exactly one subgraph.
        let mut seen = BTreeSet::new();
        for subgraph in &subgraphs {
            assert_eq!(subgraph.len(), 9);
            for vertex in subgraph {
                assert!(seen.insert(*vertex));
                for neighbor in &edges[vertex] {
                    assert!(subgraph.contains(neighbor));
                }
            }
        }
        assert_eq!(seen.len(), edges.len());
    }

    #[test]
    fn one_sided_blocks_prevent_links() {
        let mut floors = open_grid(2, 1, 100);
        floors.cell_mut(1, 0).unwrap()[0].blocked |= Directions::LEFT;
        let edges = gather_edges(&floors, 0.8);
        assert!(edges.is_empty());
    }

    #[test]
    fn fixing_flags_makes_them_symmetric_and_closes_borders() -> anyhow::Result<()> {
        let mut floors = open_grid(6, 3, 100);
        for y in 0..3 {
            for x in 3..6 {
                floors.cell_mut(x, y).unwrap()[0].z100i = 300;
            }
        }
        // A dangling open direction with nothing behind it.
        floors.cell_mut(2, 1).unwrap()[0].blocked = Directions::empty();

        let edges = gather_edges(&floors, 0.8);
        let mut subgraphs = compute_subgraphs(&edges);
        // Drop the upper island.
        subgraphs.retain(|subgraph| subgraph.iter().all(|v| v.z100i == 100));
        assert_eq!(subgraphs.len(), 1);

        fix_direction_flags(&mut floors, &edges, &subgraphs)?;
        validate_vertices_exist(&floors, &subgraphs)?;
        validate_boundaries_blocked(&floors, &subgraphs)?;

        assert_eq!(
            floors.cell(2, 1).unwrap()[0].blocked,
            Directions::RIGHT | Directions::TOP_RIGHT | Directions::BOTTOM_RIGHT
        );
        assert_eq!(floors.cell(1, 1).unwrap()[0].blocked, Directions::empty());
        assert_eq!(floors.cell(4, 1).unwrap()[0].blocked, Directions::all());

        for (vertex, floor) in floors.iter() {
            for direction in Directions::COMPASS {
                if floor.blocked.contains(direction) {
                    continue;
                }
                let offset = direction.offset().unwrap();
                let neighbor = floors
                    .cell(i32::from(vertex.block_x) + offset.x, i32::from(vertex.block_y) + offset.y)
                    .unwrap();
                assert!(neighbor.iter().any(|n| !n.blocked.contains(direction.inverse())));
            }
        }
        Ok(())
    }

    #[test]
    fn validation_reports_missing_vertices_and_open_borders() {
        let floors = open_grid(3, 3, 100);
        let missing: Subgraph = [EdgeVertex::new(1, 1, 150)].into();
        assert!(matches!(
            validate_vertices_exist(&floors, &[missing]),
            Err(NavMeshBuildError::VertexNotFound { .. })
        ));

        // The center alone is its own bounding rectangle, but it is open everywhere.
        let center: Subgraph = [EdgeVertex::new(1, 1, 100)].into();
        assert!(matches!(
            validate_boundaries_blocked(&floors, &[center]),
            Err(NavMeshBuildError::BoundaryNotBlocked { .. })
        ));
    }
}
