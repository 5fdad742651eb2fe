//! World collision geometry, indexed for ray queries.

use std::ops::ControlFlow;

use glam::Vec3A;

use crate::{
    bvh::{Bvh, BvhValidationError},
    math::{Aabb3d, BoundedRay, TriangleVertices as _},
};

/// All collidable triangles of a world, stored as batches in a [`Bvh`].
///
/// Insert every batch, call [`GeoSpace::build_tree`], then query from as many threads as you like.
#[derive(Debug, Clone, Default)]
pub struct GeoSpace {
    tree: Bvh<Vec<Vec3A>>,
}

impl GeoSpace {
    /// Batches with more vertices than this are inserted one triangle at a time to keep the
    /// tree's boxes tight.
    pub const SPLIT_VERTEX_COUNT: usize = 8000;

    /// Creates an empty space.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a triangle list (three vertices per triangle) as one collidable batch.
    ///
    /// Trailing vertices that do not form a full triangle are ignored.
    pub fn add_triangles(&mut self, mut vertices: Vec<Vec3A>) {
        vertices.truncate(vertices.len() - vertices.len() % 3);
        if vertices.is_empty() {
            return;
        }
        if vertices.len() > Self::SPLIT_VERTEX_COUNT {
            for triangle in vertices.chunks_exact(3) {
                let triangle = [triangle[0], triangle[1], triangle[2]];
                self.tree.insert(triangle.aabb(), triangle.to_vec());
            }
            return;
        }
        let Some(aabb) = Aabb3d::from_verts(&vertices) else {
            return;
        };
        self.tree.insert(aabb, vertices);
    }

    /// Builds the spatial hierarchy. Call once after all geometry is added.
    pub fn build_tree(&mut self) {
        self.tree.build_tree();
    }

    /// See [`Bvh::validate`].
    pub fn validate(&self) -> Result<(), BvhValidationError> {
        self.tree.validate()
    }

    /// The box around all geometry, or `None` if nothing was added.
    pub fn bounding_box(&self) -> Option<Aabb3d> {
        self.tree.bounding_box()
    }

    /// The number of batches stored.
    pub fn batch_count(&self) -> usize {
        self.tree.len()
    }

    /// Whether no geometry was added.
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Calls `visitor` with every batch whose box intersects `aabb` until it breaks.
    pub fn query<F>(&self, aabb: &Aabb3d, mut visitor: F) -> ControlFlow<()>
    where
        F: FnMut(&[Vec3A]) -> ControlFlow<()>,
    {
        self.tree.query(aabb, |batch| visitor(batch.as_slice()))
    }

    /// Whether the ray hits any triangle within its limit.
    pub fn has_collision(&self, ray: &BoundedRay) -> bool {
        let flow = self.query(&ray.aabb(), |batch| {
            for triangle in batch.chunks_exact(3) {
                let hit = ray.intersect_triangle([triangle[0], triangle[1], triangle[2]]);
                if hit.is_some_and(|t| t <= ray.limit) {
                    return ControlFlow::Break(());
                }
            }
            ControlFlow::Continue(())
        });
        flow.is_break()
    }

    /// The distance to the closest triangle hit strictly within the ray's limit.
    pub fn nearest_hit(&self, ray: &BoundedRay) -> Option<f32> {
        let mut nearest: Option<f32> = None;
        let _ = self.query(&ray.aabb(), |batch| {
            for triangle in batch.chunks_exact(3) {
                let Some(t) = ray.intersect_triangle([triangle[0], triangle[1], triangle[2]]) else {
                    continue;
                };
                if t < nearest.unwrap_or(ray.limit) {
                    nearest = Some(t);
                }
            }
            ControlFlow::Continue(())
        });
        nearest
    }
}
