//! All islands of a build, and queries that pick the right island for a point.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use glam::Vec3;

use crate::compiled::{CompiledNavMesh, MissingNeighborError, NavMeshFormatError, NodeId};

/// Identifies a [`CompiledNavMeshSet`] in a binary stream.
pub const SET_MAGIC: u32 = 0x3034_4C41;

/// The default distance a query point may be above the floor it resolves to.
pub const DEFAULT_MAX_FALL: f32 = 20.0;

/// How far snapping queries look sideways when a point is not directly above a floor.
pub const SNAP_OFFSET: f32 = 0.5;

/// The compiled islands of a navmesh build, one [`CompiledNavMesh`] per connected subgraph.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct CompiledNavMeshSet {
    /// The islands, in the order they were built.
    pub subgraphs: Vec<CompiledNavMesh>,
}

impl CompiledNavMeshSet {
    /// Creates a set from compiled islands.
    pub fn new(subgraphs: Vec<CompiledNavMesh>) -> Self {
        Self { subgraphs }
    }

    /// The island with the closest floor at or below `point`, if it is less than `max_fall` below.
    pub fn find_subgraph_under_point(&self, point: Vec3, max_fall: f32) -> Option<&CompiledNavMesh> {
        let mut best = None;
        let mut best_distance = max_fall;
        for mesh in &self.subgraphs {
            if !mesh.bounds_contains_xy(point.x, point.y) {
                continue;
            }
            let Some(node) = mesh.find_floor_under_point(point, max_fall) else {
                continue;
            };
            let distance = point.z - mesh.node_height(node);
            if distance < best_distance {
                best_distance = distance;
                best = Some(mesh);
            }
        }
        best
    }

    /// Like [`CompiledNavMeshSet::find_subgraph_under_point`], also trying points [`SNAP_OFFSET`]
    /// away along X and Y when nothing is directly below.
    pub fn find_subgraph_under_point_with_snap(
        &self,
        point: Vec3,
        max_fall: f32,
    ) -> Option<&CompiledNavMesh> {
        snap_candidates(point).find_map(|point| self.find_subgraph_under_point(point, max_fall))
    }

    /// Finds a path between two world positions on the same island.
    ///
    /// Both ends are resolved with snapping. Returns `Ok(None)` if either end is not above a floor
    /// of the island under `start`, or the island does not connect them.
    pub fn find_path(
        &self,
        start: Vec3,
        end: Vec3,
        max_fall: f32,
    ) -> Result<Option<Vec<Vec3>>, MissingNeighborError> {
        let Some(mesh) = self.find_subgraph_under_point_with_snap(start, max_fall) else {
            return Ok(None);
        };
        let (Some(start_node), Some(goal)) = (
            find_floor_with_snap(mesh, start, max_fall),
            find_floor_with_snap(mesh, end, max_fall),
        ) else {
            return Ok(None);
        };
        mesh.find_path(start_node, goal, end)
    }

    /// The size of the set when saved, in bytes.
    pub fn estimated_file_size_in_bytes(&self) -> usize {
        8 + self
            .subgraphs
            .iter()
            .map(CompiledNavMesh::estimated_file_size_in_bytes)
            .sum::<usize>()
    }

    /// Writes the set header followed by every island.
    pub fn save<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u32::<LittleEndian>(SET_MAGIC)?;
        let count = i32::try_from(self.subgraphs.len())
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
        writer.write_i32::<LittleEndian>(count)?;
        for mesh in &self.subgraphs {
            mesh.save(writer)?;
        }
        Ok(())
    }

    /// Reads a set written by [`CompiledNavMeshSet::save`].
    pub fn load<R: Read>(reader: &mut R) -> Result<Self, NavMeshFormatError> {
        let magic = reader.read_u32::<LittleEndian>()?;
        if magic != SET_MAGIC {
            return Err(NavMeshFormatError::BadMagic {
                expected: SET_MAGIC,
                found: magic,
            });
        }
        let count = reader.read_i32::<LittleEndian>()?;
        let count =
            usize::try_from(count).map_err(|_| NavMeshFormatError::NegativeLength { len: count })?;
        // The count is untrusted, every island is read before it is stored.
        let mut subgraphs = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            subgraphs.push(CompiledNavMesh::load(reader)?);
        }
        Ok(Self { subgraphs })
    }
}

fn snap_candidates(point: Vec3) -> impl Iterator<Item = Vec3> {
    [
        Vec3::ZERO,
        Vec3::X * SNAP_OFFSET,
        Vec3::NEG_X * SNAP_OFFSET,
        Vec3::Y * SNAP_OFFSET,
        Vec3::NEG_Y * SNAP_OFFSET,
    ]
    .into_iter()
    .map(move |offset| point + offset)
}

fn find_floor_with_snap(mesh: &CompiledNavMesh, point: Vec3, max_fall: f32) -> Option<NodeId> {
    snap_candidates(point).find_map(|point| mesh.find_floor_under_point(point, max_fall))
}
