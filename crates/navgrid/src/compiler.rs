//! Packs the floors of one island into a [`CompiledNavMesh`].

use crate::{
    builder::NavMeshBuildError,
    compiled::CompiledNavMesh,
    direction::Directions,
    floor::{EdgeVertex, FloorGrid},
    grid_cell::{FloorEntry, GridCell, MAX_MULTI_OFFSET, encode_height},
    subgraph::Subgraph,
};

/// Compiles rectangles of a [`FloorGrid`] into [`CompiledNavMesh`]es.
#[derive(Debug, Clone, Copy)]
pub struct NavMeshCompiler<'a> {
    floors: &'a FloorGrid,
    step: f32,
    max_z_step: f32,
}

/// The part of a [`FloorGrid`] a [`NavMeshCompiler`] packs, and where it lies in the world.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompileArea {
    /// The first column
    pub start_x: usize,
    /// The first row
    pub start_y: usize,
    /// The number of columns
    pub width: usize,
    /// The number of rows
    pub height: usize,
    /// The world-space x coordinate of `start_x`
    pub x1: f32,
    /// The world-space y coordinate of `start_y`
    pub y1: f32,
    /// The height range used to quantize floors
    pub z1: i32,
    /// See [`CompileArea::z1`]
    pub z2: i32,
}

impl<'a> NavMeshCompiler<'a> {
    /// Creates a compiler for floors sampled every `step` units.
    pub fn new(floors: &'a FloorGrid, step: f32, max_z_step: f32) -> Self {
        Self {
            floors,
            step,
            max_z_step,
        }
    }

    /// Packs every floor inside `area` that belongs to `subgraph` and is not blocked in every
    /// direction. The result is validated before it is returned.
    pub fn build(
        &self,
        subgraph: &Subgraph,
        area: CompileArea,
    ) -> Result<CompiledNavMesh, NavMeshBuildError> {
        let CompileArea {
            start_x,
            start_y,
            width,
            height,
            x1,
            y1,
            z1,
            z2,
        } = area;
        let out_of_range = NavMeshBuildError::InvalidCompileRange {
            start_x,
            start_y,
            width,
            height,
        };
        if width == 0
            || height == 0
            || start_x + width > self.floors.width()
            || start_y + height > self.floors.height()
        {
            return Err(out_of_range);
        }
        let (Ok(block_width), Ok(block_height)) = (u16::try_from(width), u16::try_from(height))
        else {
            return Err(out_of_range);
        };
        if z1 < 0 || z2 <= z1 {
            return Err(NavMeshBuildError::InvalidHeightRange { z1, z2 });
        }

        let mut grid = Vec::with_capacity(width * height);
        let mut multiheights = Vec::new();
        let mut entries = Vec::new();
        for block_y in start_y..start_y + height {
            for block_x in start_x..start_x + width {
                let cell = self
                    .floors
                    .cell(block_x as i32, block_y as i32)
                    .unwrap_or_default();
                entries.clear();
                entries.extend(
                    cell.iter()
                        .filter(|floor| floor.blocked != Directions::all())
                        .filter(|floor| {
                            subgraph.contains(&EdgeVertex::new(
                                block_x as u16,
                                block_y as u16,
                                floor.z100i,
                            ))
                        })
                        .map(|floor| FloorEntry {
                            blocked: floor.blocked,
                            encoded_z: encode_height(z1, z2, floor.height()),
                        }),
                );

                let cell = match entries.as_slice() {
                    [] => GridCell::Empty,
                    [entry] => GridCell::Single(*entry),
                    _ => {
                        let count = u8::try_from(entries.len()).map_err(|_| {
                            NavMeshBuildError::TooManyHeights {
                                block_x,
                                block_y,
                                count: entries.len(),
                            }
                        })?;
                        let offset = multiheights.len();
                        if offset > MAX_MULTI_OFFSET {
                            return Err(NavMeshBuildError::MultiheightsOverflow { len: offset });
                        }
                        multiheights.extend(entries.iter().flat_map(|entry| entry.to_bytes()));
                        GridCell::Multi {
                            offset: offset as u32,
                            count,
                        }
                    }
                };
                grid.push(cell.to_word());
            }
        }
        if multiheights.len() > MAX_MULTI_OFFSET {
            return Err(NavMeshBuildError::MultiheightsOverflow {
                len: multiheights.len(),
            });
        }

        tracing::debug!(
            "Compiled navmesh {width}x{height}x{} bytes: grid: {}, multiheights: {}",
            z2 - z1,
            grid.len() * 4,
            multiheights.len()
        );

        let mesh = CompiledNavMesh::new(
            block_width,
            block_height,
            self.step,
            self.max_z_step,
            x1,
            y1,
            z1,
            z2,
            grid,
            multiheights,
        );
        mesh.validate()?;
        Ok(mesh)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::{
        floor::FloorDesc,
        subgraph::{compute_subgraphs, fix_direction_flags, gather_edges},
    };

    /// Two stacked, fully open 3x3 floors at 1 and 4, each its own subgraph.
    fn stacked() -> (FloorGrid, Vec<Subgraph>) {
        let mut floors = FloorGrid::new(3, 3);
        for y in 0..3 {
            for x in 0..3 {
                let cell = floors.cell_mut(x, y).unwrap();
                cell.push(FloorDesc {
                    z100i: 400,
                    blocked: Directions::empty(),
                });
                cell.push(FloorDesc {
                    z100i: 100,
                    blocked: Directions::empty(),
                });
            }
        }
        let edges = gather_edges(&floors, 0.8);
        let subgraphs = compute_subgraphs(&edges);
        fix_direction_flags(&mut floors, &edges, &subgraphs).unwrap();
        (floors, subgraphs)
    }

    fn area(z1: i32, z2: i32) -> CompileArea {
        CompileArea {
            start_x: 0,
            start_y: 0,
            width: 3,
            height: 3,
            x1: 0.0,
            y1: 0.0,
            z1,
            z2,
        }
    }

    #[test]
    fn compiles_one_island_at_a_time() -> anyhow::Result<()> {
        let (floors, subgraphs) = stacked();
        assert_eq!(subgraphs.len(), 2);
        let compiler = NavMeshCompiler::new(&floors, 1.0, 0.8);

        for subgraph in &subgraphs {
            let mesh = compiler.build(subgraph, area(1, 5))?;
            assert!(mesh.multiheights().is_empty());
            let z = subgraph.first().unwrap().z100i as f32 / 100.0;
            for block_index in 0..9 {
                let floors: Vec<_> = mesh.floors_in_cell(block_index).collect();
                assert_eq!(floors.len(), 1);
                assert_relative_eq!(floors[0].height(1, 5), z, epsilon = 1e-3);
            }
        }
        Ok(())
    }

    #[test]
    fn multiple_floors_go_to_the_overflow_buffer() -> anyhow::Result<()> {
        let (floors, subgraphs) = stacked();
        let both: Subgraph = subgraphs.into_iter().flatten().collect();
        let mesh = NavMeshCompiler::new(&floors, 1.0, 0.8).build(&both, area(0, 5))?;
        assert_eq!(mesh.multiheights().len(), 9 * 2 * 3);
        assert_eq!(
            mesh.cell(4),
            Some(GridCell::Multi {
                offset: 4 * 6,
                count: 2
            })
        );
        let heights: Vec<_> = mesh.floors_at(1, 1).unwrap().map(|(_, z)| z).collect();
        assert_relative_eq!(heights[0], 4.0, epsilon = 1e-3);
        assert_relative_eq!(heights[1], 1.0, epsilon = 1e-3);
        Ok(())
    }

    #[test]
    fn sub_rectangles_are_validated() -> anyhow::Result<()> {
        let (floors, subgraphs) = stacked();
        let compiler = NavMeshCompiler::new(&floors, 1.0, 0.8);
        let area = CompileArea {
            start_x: 1,
            width: 2,
            ..area(0, 5)
        };
        // The island reaches past the rectangle, so the left column points outside.
        assert!(matches!(
            compiler.build(&subgraphs[0], area),
            Err(NavMeshBuildError::InvalidMesh(_))
        ));
        Ok(())
    }

    #[test]
    fn rejects_bad_ranges() {
        let (floors, subgraphs) = stacked();
        let compiler = NavMeshCompiler::new(&floors, 1.0, 0.8);
        let too_wide = CompileArea {
            width: 4,
            ..area(0, 5)
        };
        assert!(matches!(
            compiler.build(&subgraphs[0], too_wide),
            Err(NavMeshBuildError::InvalidCompileRange { .. })
        ));
        assert!(matches!(
            compiler.build(&subgraphs[0], area(5, 5)),
            Err(NavMeshBuildError::InvalidHeightRange { z1: 5, z2: 5 })
        ));
        assert!(matches!(
            compiler.build(&subgraphs[0], area(-1, 5)),
            Err(NavMeshBuildError::InvalidHeightRange { .. })
        ));
    }

    #[test]
    fn fully_blocked_floors_are_skipped() -> anyhow::Result<()> {
        let mut floors = FloorGrid::new(1, 1);
        floors.cell_mut(0, 0).unwrap().push(FloorDesc::new(100));
        let subgraph: Subgraph = [EdgeVertex::new(0, 0, 100)].into();
        let mesh = NavMeshCompiler::new(&floors, 1.0, 0.8).build(
            &subgraph,
            CompileArea {
                width: 1,
                height: 1,
                ..area(1, 2)
            },
        )?;
        assert_eq!(mesh.cell(0), Some(GridCell::Empty));
        Ok(())
    }
}
