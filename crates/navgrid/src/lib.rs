#![doc = include_str!("../../../readme.md")]

mod builder;
mod bvh;
mod compiled;
mod compiled_set;
mod compiler;
mod config;
mod connectivity;
mod direction;
mod floor;
mod geo_space;
mod grid_cell;
mod heightmap;
pub(crate) mod math;
mod pathfinding;
mod priority_queue;
mod scan;
mod subgraph;

pub use builder::{NavMeshBuildError, NavMeshBuilder};
pub use bvh::{Bvh, BvhNode, BvhNodeKey, BvhNodeKind, BvhValidationError};
pub use compiled::{
    CompiledNavMesh, FloorEntries, MESH_MAGIC, MissingNeighborError, NavMeshFormatError,
    NavMeshValidationError, NodeId,
};
pub use compiled_set::{CompiledNavMeshSet, DEFAULT_MAX_FALL, SET_MAGIC, SNAP_OFFSET};
pub use compiler::{CompileArea, NavMeshCompiler};
pub use config::{NavMeshConfig, NavMeshConfigBuilder, NavMeshConfigError};
pub use direction::Directions;
pub use floor::{EdgeVertex, FloorDesc, FloorGrid, z100i_from_height};
pub use geo_space::GeoSpace;
pub use grid_cell::{EMPTY_WORD, FloorEntry, GridCell, decode_height, encode_height};
pub use heightmap::{DEFAULT_UNIT_SIZE, Heightmap, HeightmapError};
pub use math::{Aabb3d, BoundedRay};
pub use pathfinding::reduce_path;
pub use priority_queue::BucketQueue;
pub use subgraph::{EdgeMap, Subgraph};
