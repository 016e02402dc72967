//! `GRID` block: a coarse 2D bucket grid over the level.
//!
//! ```text
//! u32 width, u32 depth, f32 scale, f32, f32
//! depth rows × width cells × {
//!     u32 n, n × { u16 model, u16 instance },
//!     u32 m, m × u32
//! }
//! ```
//!
//! Rows are stored far-to-near; [`Grid::cells`] holds them near-to-far.

use crate::error::Result;
use crate::io::{ByteReader, ByteWriter};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GridCell {
    pub sections: Vec<(u16, u16)>,
    pub values: Vec<u32>,
}

impl GridCell {
    /// Bit 0: has sections, bit 1: has values.
    pub fn occupancy(&self) -> u8 {
        (!self.sections.is_empty()) as u8 | ((!self.values.is_empty()) as u8) << 1
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    pub width: u32,
    pub depth: u32,
    pub scale: f32,
    pub unknown: [f32; 2],
    /// `depth × width` cells, row-major, rows in reverse storage order
    pub cells: Vec<GridCell>,
}

impl Default for Grid {
    fn default() -> Self {
        Grid {
            width: 0,
            depth: 0,
            scale: 1.0,
            unknown: [0.0; 2],
            cells: Vec::new(),
        }
    }
}

impl Grid {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(payload);
        let width = reader.u32()?;
        let depth = reader.u32()?;
        let scale = reader.f32()?;
        let unknown = [reader.f32()?, reader.f32()?];

        let mut rows: Vec<Vec<GridCell>> = Vec::with_capacity(depth.min(1024) as usize);
        for _ in 0..depth {
            let mut row = Vec::with_capacity(width.min(1024) as usize);
            for _ in 0..width {
                let n = reader.u32()? as usize;
                let sections = (0..n)
                    .map(|_| Ok((reader.u16()?, reader.u16()?)))
                    .collect::<Result<Vec<_>>>()?;
                let m = reader.u32()? as usize;
                let values = (0..m).map(|_| reader.u32()).collect::<Result<Vec<_>>>()?;
                row.push(GridCell { sections, values });
            }
            rows.push(row);
        }
        rows.reverse();
        log::debug!("GRID: {}x{} cells at scale {}", width, depth, scale);

        Ok(Grid {
            width,
            depth,
            scale,
            unknown,
            cells: rows.into_iter().flatten().collect(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.u32(self.width);
        w.u32(self.depth);
        w.f32(self.scale);
        w.f32(self.unknown[0]);
        w.f32(self.unknown[1]);
        let width = (self.width as usize).max(1);
        for row in self.cells.chunks(width).rev() {
            for cell in row {
                w.u32(cell.sections.len() as u32);
                for &(model, instance) in &cell.sections {
                    w.u16(model);
                    w.u16(instance);
                }
                w.u32(cell.values.len() as u32);
                cell.values.iter().for_each(|&v| w.u32(v));
            }
        }
        w.into_inner()
    }

    pub fn cell(&self, x: u32, z: u32) -> Option<&GridCell> {
        if x >= self.width || z >= self.depth {
            return None;
        }
        self.cells.get((z * self.width + x) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_reversed_and_restored() {
        let mut w = ByteWriter::new();
        w.u32(2);
        w.u32(2);
        w.f32(8.0);
        w.f32(0.0);
        w.f32(0.0);
        // stored row 0
        for value in [10u32, 11] {
            w.u32(0);
            w.u32(1);
            w.u32(value);
        }
        // stored row 1: one cell with a section, one empty
        w.u32(1);
        w.u16(3);
        w.u16(4);
        w.u32(0);
        w.u32(0);
        w.u32(0);
        let bytes = w.into_inner();

        let grid = Grid::decode(&bytes).unwrap();
        assert_eq!(grid.cell(0, 0).unwrap().sections, vec![(3, 4)]);
        assert_eq!(grid.cell(0, 0).unwrap().occupancy(), 1);
        assert_eq!(grid.cell(1, 0).unwrap().occupancy(), 0);
        assert_eq!(grid.cell(1, 1).unwrap().values, vec![11]);
        assert_eq!(grid.cell(1, 1).unwrap().occupancy(), 2);
        assert!(grid.cell(2, 0).is_none());
        assert_eq!(grid.encode(), bytes);
    }
}
