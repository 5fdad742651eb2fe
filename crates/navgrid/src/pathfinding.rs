//! A* search over a [`CompiledNavMesh`] and reduction of the resulting paths.

use std::collections::HashMap;

use glam::{Vec2, Vec3};

use crate::{
    compiled::{CompiledNavMesh, MissingNeighborError, NodeId},
    direction::Directions,
    priority_queue::BucketQueue,
};

/// The order neighbors are expanded in.
const SEARCH_ORDER: [Directions; 8] = [
    Directions::TOP,
    Directions::TOP_LEFT,
    Directions::RIGHT,
    Directions::BOTTOM_RIGHT,
    Directions::BOTTOM,
    Directions::BOTTOM_LEFT,
    Directions::LEFT,
    Directions::TOP_RIGHT,
];

const DIAGONAL_COST: f32 = 1.4142;

/// Consecutive segments whose height changes differ by less than this count as the same slope.
const SLOPE_TOLERANCE: f32 = 0.2;

impl CompiledNavMesh {
    /// Searches from `start` towards `goal`, returning the predecessor of every node reached.
    /// `start` maps to `None`.
    ///
    /// Moving into a cell costs 1, or 1.4142 diagonally, plus half the number of directions the
    /// target floor is blocked in, so paths keep away from walls. The search stops as soon as
    /// `goal` is dequeued. If `goal` is not in the returned map, it is unreachable.
    pub fn a_star(
        &self,
        start: NodeId,
        goal: NodeId,
    ) -> Result<HashMap<NodeId, Option<NodeId>>, MissingNeighborError> {
        let (goal_x, goal_y) = self.block_xy_from_index(goal.block_index);
        let goal_xy = Vec2::new(goal_x as f32, goal_y as f32);

        let mut frontier = BucketQueue::new();
        frontier.push(start, 0);
        let mut came_from = HashMap::from([(start, None)]);
        let mut cost_so_far = HashMap::from([(start, 0.0_f32)]);
        let mut iterations = 0_usize;

        while let Some(current) = frontier.pop() {
            if current == goal {
                break;
            }
            iterations += 1;
            let current_cost = cost_so_far.get(&current).copied().unwrap_or_default();

            for direction in SEARCH_ORDER {
                let Some(next) = self.neighbor(current, direction)? else {
                    continue;
                };
                let mut step_cost = if direction.is_diagonal() {
                    DIAGONAL_COST
                } else {
                    1.0
                };
                step_cost += next.blocked.count() as f32 / 2.0;
                let new_cost = current_cost + step_cost;

                if cost_so_far.get(&next).is_none_or(|cost| new_cost < *cost) {
                    cost_so_far.insert(next, new_cost);
                    let priority = ((new_cost + self.heuristic(goal_xy, next)) * 10.0).round();
                    frontier.push(next, priority as i32);
                    came_from.insert(next, Some(current));
                }
            }
        }
        tracing::trace!("A* expanded {iterations} nodes");
        Ok(came_from)
    }

    /// Distance in cells to the goal, plus the number of blocked directions of `node`.
    fn heuristic(&self, goal: Vec2, node: NodeId) -> f32 {
        let (x, y) = self.block_xy_from_index(node.block_index);
        goal.distance(Vec2::new(x as f32, y as f32)) + node.blocked.count() as f32
    }

    /// Finds a reduced path from `start` to `goal`.
    ///
    /// The path begins at the position of `start` and ends at `exact_end` instead of the cell
    /// position of `goal`. Returns `Ok(None)` if `goal` is unreachable.
    pub fn find_path(
        &self,
        start: NodeId,
        goal: NodeId,
        exact_end: Vec3,
    ) -> Result<Option<Vec<Vec3>>, MissingNeighborError> {
        let came_from = self.a_star(start, goal)?;
        if !came_from.contains_key(&goal) {
            return Ok(None);
        }

        let mut raw = vec![self.world_point_from_node(goal)];
        let mut current = goal;
        while current != start {
            let Some(previous) = came_from.get(&current).copied().flatten() else {
                tracing::warn!("Path reconstruction lost its predecessor, truncating the path");
                break;
            };
            raw.push(self.world_point_from_node(previous));
            current = previous;
        }
        raw.reverse();

        let mut path = reduce_path(&raw);
        path.pop();
        path.push(exact_end);
        path.insert(0, self.world_point_from_node(start));
        Ok(Some(path))
    }
}

/// Drops the intermediate points of straight runs and of regular zig-zags between two adjacent
/// directions, keeping the points where the course or the slope changes.
///
/// The first point of `raw` is never part of the result. The last one always is, unless
/// `raw` has fewer than two points.
pub fn reduce_path(raw: &[Vec3]) -> Vec<Vec3> {
    let [first, second, ..] = raw else {
        return Vec::new();
    };

    let mut result = Vec::new();
    let mut last = Directions::empty();
    let mut primary = Directions::empty();
    let mut secondary = Directions::empty();
    let mut major = Directions::empty();
    let mut previous_dz = (first.z - second.z).abs();

    for window in raw.windows(2).skip(1) {
        let [previous, current] = [window[0], window[1]];
        let direction = Directions::from_world(previous, current);
        let dz = (current.z - previous.z).abs();

        let mut emit = true;
        if (dz - previous_dz).abs() < SLOPE_TOLERANCE {
            emit = false;
            if last.is_empty() {
                primary = direction;
            } else if secondary.is_empty() && last.is_adjacent(direction) {
                secondary = direction;
            } else if major.is_empty() && last == direction {
                major = direction;
            } else if direction == major
                || (direction == primary && last == secondary)
                || (direction == secondary && last == primary)
            {
                // Still on course.
            } else {
                emit = true;
            }
        }
        last = direction;
        previous_dz = dz;

        if emit {
            result.push(previous);
            primary = Directions::empty();
            secondary = Directions::empty();
            major = Directions::empty();
        }
    }
    result.extend(raw.last());
    result
}
