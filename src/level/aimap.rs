//! `AIMP` block: navigation meshes for AI actors.
//!
//! ```text
//! u32 kind, u32 map_count, maps:
//!   u32 n, n × 4 f32 vertices
//!   u32 n, cells:
//!     u32 block, u32 edge_count,
//!     edge_count × { u32 a, u32 b, [u32 block if kind & 2], 4 f32 plane, u32 neighbour }
//! ```
//!
//! Cells and half-edges each carry a 2-bit block state. Two cells sharing an
//! edge store it twice, so a wall can block from one side only.

use crate::error::{Diagnostics, Result, Warning};
use crate::io::{ByteReader, ByteWriter};
use crate::level::pvs::edge_loop;
use crate::math::centroid;

/// Map kind bit: edges carry their own block state.
pub const EDGE_BLOCKS: u32 = 2;

const BLOCK_MASK: u32 = 0x3;

/// Advance the block state held in the low two bits: 0 → 1 → 2 → 0.
pub fn next_block_state(value: u32) -> u32 {
    (value & !BLOCK_MASK) | ((value & BLOCK_MASK) + 1) % 3
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AiEdge {
    pub vertices: [u32; 2],
    pub block: u32,
    pub plane: [f32; 4],
    pub neighbour: u32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AiCell {
    pub block: u32,
    pub edges: Vec<AiEdge>,
}

impl AiCell {
    pub fn cycle_block(&mut self) {
        self.block = next_block_state(self.block);
    }

    pub fn cycle_edge_block(&mut self, edge: usize) {
        if let Some(e) = self.edges.get_mut(edge) {
            e.block = next_block_state(e.block);
        }
    }
}

/// One cell recovered as a polygon.
#[derive(Debug, Clone, PartialEq)]
pub struct AiPolygon {
    pub cell: usize,
    pub vertices: Vec<u32>,
    /// Block state of the edge leaving each polygon vertex
    pub edge_blocks: Vec<u32>,
    /// Per vertex: (outgoing edge block, incoming edge block)
    pub corner_blocks: Vec<[u32; 2]>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AiMap {
    pub vertices: Vec<[f32; 4]>,
    pub cells: Vec<AiCell>,
}

impl AiMap {
    fn decode(reader: &mut ByteReader, kind: u32) -> Result<Self> {
        let count = reader.u32()? as usize;
        let vertices = (0..count).map(|_| reader.vec4()).collect::<Result<Vec<_>>>()?;
        let count = reader.u32()? as usize;
        let mut cells = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            let block = reader.u32()?;
            let edge_count = reader.u32()? as usize;
            let mut edges = Vec::with_capacity(edge_count.min(256));
            for _ in 0..edge_count {
                let vertices = [reader.u32()?, reader.u32()?];
                let block = if kind & EDGE_BLOCKS != 0 { reader.u32()? } else { 0 };
                edges.push(AiEdge {
                    vertices,
                    block,
                    plane: reader.vec4()?,
                    neighbour: reader.u32()?,
                });
            }
            cells.push(AiCell { block, edges });
        }
        Ok(AiMap { vertices, cells })
    }

    fn encode(&self, w: &mut ByteWriter, kind: u32) {
        w.u32(self.vertices.len() as u32);
        self.vertices.iter().for_each(|v| w.vec4(*v));
        w.u32(self.cells.len() as u32);
        for cell in &self.cells {
            w.u32(cell.block);
            w.u32(cell.edges.len() as u32);
            for edge in &cell.edges {
                w.u32(edge.vertices[0]);
                w.u32(edge.vertices[1]);
                if kind & EDGE_BLOCKS != 0 {
                    w.u32(edge.block);
                }
                w.vec4(edge.plane);
                w.u32(edge.neighbour);
            }
        }
    }

    /// Mean vertex position, the origin the map is edited around.
    pub fn centroid(&self) -> [f32; 3] {
        let points: Vec<[f32; 3]> = self.vertices.iter().map(|v| [v[0], v[1], v[2]]).collect();
        centroid(&points)
    }

    /// Every cell as a polygon loop. Cells touching fewer than three
    /// distinct vertices are dropped with a warning.
    pub fn polygons(&self, map: usize, diagnostics: &mut Diagnostics) -> Vec<AiPolygon> {
        let mut out = Vec::with_capacity(self.cells.len());
        for (c, cell) in self.cells.iter().enumerate() {
            let pairs: Vec<[u32; 2]> = cell.edges.iter().map(|e| e.vertices).collect();
            let Some(chain) = edge_loop(&pairs) else {
                diagnostics.warn(Warning::DegenerateAiCell { map, cell: c });
                continue;
            };
            let vertices: Vec<u32> = chain.iter().map(|(_, [a, _])| *a).collect();
            let edge_blocks: Vec<u32> = chain.iter().map(|(i, _)| cell.edges[*i].block).collect();
            let n = edge_blocks.len();
            let corner_blocks = (0..n)
                .map(|i| [edge_blocks[i], edge_blocks[(i + n - 1) % n]])
                .collect();
            out.push(AiPolygon {
                cell: c,
                vertices,
                edge_blocks,
                corner_blocks,
            });
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AiMapList {
    pub kind: u32,
    pub maps: Vec<AiMap>,
}

impl AiMapList {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(payload);
        let kind = reader.u32()?;
        let count = reader.u32()? as usize;
        let maps = (0..count)
            .map(|_| AiMap::decode(&mut reader, kind))
            .collect::<Result<Vec<_>>>()?;
        log::debug!("AIMP: kind {}, {} maps", kind, maps.len());
        Ok(AiMapList { kind, maps })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.u32(self.kind);
        w.u32(self.maps.len() as u32);
        self.maps.iter().for_each(|m| m.encode(&mut w, self.kind));
        w.into_inner()
    }

    /// Append a map. Authored maps always carry per-edge block states.
    pub fn add_map(&mut self, map: AiMap) -> usize {
        self.kind |= EDGE_BLOCKS;
        self.maps.push(map);
        self.maps.len() - 1
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(a: u32, b: u32, block: u32) -> AiEdge {
        AiEdge {
            vertices: [a, b],
            block,
            plane: [1.0, 0.0, 0.0, 0.0],
            neighbour: 0xFFFF_FFFF,
        }
    }

    fn square_map() -> AiMap {
        AiMap {
            vertices: vec![
                [0.0, 0.0, 0.0, 1.0],
                [2.0, 0.0, 0.0, 1.0],
                [2.0, 0.0, 2.0, 1.0],
                [0.0, 0.0, 2.0, 1.0],
            ],
            cells: vec![
                AiCell {
                    block: 0,
                    edges: vec![edge(0, 1, 1), edge(3, 0, 0), edge(2, 1, 2), edge(2, 3, 0)],
                },
                AiCell {
                    block: 1,
                    edges: vec![edge(0, 1, 0), edge(1, 0, 0)],
                },
            ],
        }
    }

    #[test]
    fn block_states_cycle_through_three_values() {
        assert_eq!(next_block_state(0), 1);
        assert_eq!(next_block_state(1), 2);
        assert_eq!(next_block_state(2), 0);
        assert_eq!(next_block_state(0x10 | 2), 0x10);

        let mut cell = square_map().cells.remove(0);
        cell.cycle_block();
        cell.cycle_edge_block(2);
        assert_eq!(cell.block, 1);
        assert_eq!(cell.edges[2].block, 0);
    }

    #[test]
    fn polygons_follow_the_edge_chain_and_drop_degenerates() {
        let map = square_map();
        let mut diagnostics = Diagnostics::new();
        let polygons = map.polygons(3, &mut diagnostics);
        assert_eq!(polygons.len(), 1);
        assert_eq!(polygons[0].vertices, vec![0, 1, 2, 3]);
        assert_eq!(polygons[0].edge_blocks, vec![1, 2, 0, 0]);
        assert_eq!(polygons[0].corner_blocks[1], [2, 1]);
        assert!(matches!(
            diagnostics.warnings(),
            [Warning::DegenerateAiCell { map: 3, cell: 1 }]
        ));
        assert_eq!(map.centroid(), [1.0, 0.0, 1.0]);
    }

    #[test]
    fn edge_blocks_are_only_stored_for_kind_two() {
        let mut list = AiMapList {
            kind: 0,
            maps: vec![square_map()],
        };
        let plain = list.encode();
        let decoded = AiMapList::decode(&plain).unwrap();
        assert!(decoded.maps[0].cells[0].edges.iter().all(|e| e.block == 0));

        list.add_map(AiMap::default());
        assert_eq!(list.kind, EDGE_BLOCKS);
        let blocked = list.encode();
        // six edges gain a block word each
        assert_eq!(blocked.len(), plain.len() + 6 * 4 + 8);
        assert_eq!(AiMapList::decode(&blocked).unwrap(), list);
    }
}
