//! Geometric primitives: axis-aligned boxes and rays with a length limit.

use glam::Vec3A;

/// An axis-aligned bounding box in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct Aabb3d {
    /// The minimum corner.
    pub min: Vec3A,
    /// The maximum corner.
    pub max: Vec3A,
}

impl Default for Aabb3d {
    fn default() -> Self {
        Self {
            min: Vec3A::ZERO,
            max: Vec3A::ZERO,
        }
    }
}

impl Aabb3d {
    /// An inverted box that contains nothing. Merging anything into it yields the other box.
    pub const EMPTY: Self = Self {
        min: Vec3A::INFINITY,
        max: Vec3A::NEG_INFINITY,
    };

    /// Creates a box from its center and half extents.
    #[inline]
    pub fn new(center: impl Into<Vec3A>, half_size: impl Into<Vec3A>) -> Self {
        let center = center.into();
        let half_size = half_size.into();
        Self {
            min: center - half_size,
            max: center + half_size,
        }
    }

    /// Creates a box from its corners.
    #[inline]
    pub fn from_min_max(min: impl Into<Vec3A>, max: impl Into<Vec3A>) -> Self {
        Self {
            min: min.into(),
            max: max.into(),
        }
    }

    /// Computes the box enclosing all given points.
    /// Returns `None` if `verts` is empty.
    pub fn from_verts(verts: &[Vec3A]) -> Option<Self> {
        let (first, rest) = verts.split_first()?;
        let (min, max) = rest
            .iter()
            .fold((*first, *first), |(min, max), v| (min.min(*v), max.max(*v)));
        Some(Self { min, max })
    }

    /// The center of the box.
    #[inline]
    pub fn center(&self) -> Vec3A {
        (self.min + self.max) * 0.5
    }

    /// The extents of the box along each axis.
    #[inline]
    pub fn size(&self) -> Vec3A {
        self.max - self.min
    }

    /// Returns the smallest box containing both `self` and `other`.
    #[inline]
    pub fn merged(&self, other: &Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Whether the boxes overlap. Touching faces count as overlapping.
    #[inline]
    pub fn intersects(&self, other: &Self) -> bool {
        self.min.cmple(other.max).all() && other.min.cmple(self.max).all()
    }

    /// Whether `other` lies completely inside `self`, boundaries included.
    #[inline]
    pub fn contains(&self, other: &Self) -> bool {
        self.min.cmple(other.min).all() && other.max.cmple(self.max).all()
    }

    /// Whether `min <= max` holds on every axis.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.min.cmple(self.max).all()
    }

    /// The index of the longest axis. Ties prefer x, then y.
    pub fn longest_axis(&self) -> usize {
        let size = self.size();
        if size.x >= size.y && size.x >= size.z {
            0
        } else if size.y >= size.z {
            1
        } else {
            2
        }
    }
}

/// A ray that only reports hits up to [`BoundedRay::limit`] units from its origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundedRay {
    origin: Vec3A,
    direction: Vec3A,
    /// The maximum distance along the ray that counts as a hit.
    pub limit: f32,
}

impl BoundedRay {
    /// Creates a new ray. `direction` is normalized.
    #[inline]
    pub fn new(origin: impl Into<Vec3A>, direction: impl Into<Vec3A>, limit: f32) -> Self {
        Self {
            origin: origin.into(),
            direction: direction.into().normalize_or_zero(),
            limit,
        }
    }

    /// The start of the ray.
    #[inline]
    pub fn origin(&self) -> Vec3A {
        self.origin
    }

    /// The normalized direction of the ray.
    #[inline]
    pub fn direction(&self) -> Vec3A {
        self.direction
    }

    /// The box spanned by the ray's origin and its end point at [`BoundedRay::limit`].
    pub fn aabb(&self) -> Aabb3d {
        let end = self.origin + self.direction * self.limit;
        Aabb3d {
            min: self.origin.min(end),
            max: self.origin.max(end),
        }
    }

    /// Returns the distance along the ray at which it crosses the triangle, ignoring [`BoundedRay::limit`].
    ///
    /// Both faces of the triangle are hit. Returns `None` if the ray misses or runs parallel to the triangle.
    pub fn intersect_triangle(&self, [v0, v1, v2]: [Vec3A; 3]) -> Option<f32> {
        let edge1 = v1 - v0;
        let edge2 = v2 - v0;
        let normal = edge1.cross(edge2);
        let diff = self.origin - v0;

        let mut dir_dot_norm = self.direction.dot(normal);
        let sign = if dir_dot_norm > f32::MIN_POSITIVE {
            1.0
        } else if dir_dot_norm < -f32::MIN_POSITIVE {
            dir_dot_norm = -dir_dot_norm;
            -1.0
        } else {
            return None;
        };

        let dir_dot_diff_x_edge2 = sign * self.direction.dot(diff.cross(edge2));
        if dir_dot_diff_x_edge2 < 0.0 {
            return None;
        }
        let dir_dot_edge1_x_diff = sign * self.direction.dot(edge1.cross(diff));
        if dir_dot_edge1_x_diff < 0.0 {
            return None;
        }
        if dir_dot_diff_x_edge2 + dir_dot_edge1_x_diff > dir_dot_norm {
            return None;
        }
        let diff_dot_norm = -sign * diff.dot(normal);
        if diff_dot_norm < 0.0 {
            return None;
        }
        Some(diff_dot_norm / dir_dot_norm)
    }
}

pub(crate) trait TriangleVertices {
    fn aabb(&self) -> Aabb3d;
}

impl TriangleVertices for [Vec3A; 3] {
    #[inline]
    fn aabb(&self) -> Aabb3d {
        let min = self[0].min(self[1]).min(self[2]);
        let max = self[0].max(self[1]).max(self[2]);
        Aabb3d { min, max }
    }
}
