//! `SPLN` block.
//!
//! ```text
//! u32 count, count × { s32 looping, u32 n, n × 3 f32 }
//! ```
//!
//! Points are held relative to their centroid; `origin` carries the
//! centroid so an edited spline can be moved as one piece.

use crate::error::Result;
use crate::io::{ByteReader, ByteWriter};
use crate::math::centroid;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Spline {
    pub looping: bool,
    pub origin: [f32; 3],
    pub points: Vec<[f32; 3]>,
}

impl Spline {
    /// Build a spline from world-space points.
    pub fn from_world(points: &[[f32; 3]], looping: bool) -> Self {
        let origin = centroid(points);
        Spline {
            looping,
            origin,
            points: points.iter().map(|p| sub(*p, origin)).collect(),
        }
    }

    pub fn world_points(&self) -> Vec<[f32; 3]> {
        self.points.iter().map(|p| add(*p, self.origin)).collect()
    }
}

fn add(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

fn sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SplineList {
    pub splines: Vec<Spline>,
}

impl SplineList {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(payload);
        let count = reader.u32()? as usize;
        let mut splines = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let looping = reader.i32()? != 0;
            let n = reader.u32()? as usize;
            let points = (0..n).map(|_| reader.vec3()).collect::<Result<Vec<_>>>()?;
            splines.push(Spline::from_world(&points, looping));
        }
        log::debug!("SPLN: {} splines", splines.len());
        Ok(SplineList { splines })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.u32(self.splines.len() as u32);
        for spline in &self.splines {
            w.i32(spline.looping as i32);
            w.u32(spline.points.len() as u32);
            spline.world_points().into_iter().for_each(|p| w.vec3(p));
        }
        w.into_inner()
    }

    /// Append a spline through world-space `points`; returns its index.
    pub fn add_spline(&mut self, points: &[[f32; 3]], cyclic: bool) -> usize {
        self.splines.push(Spline::from_world(points, cyclic));
        self.splines.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<&Spline> {
        self.splines.get(index)
    }

    pub fn len(&self) -> usize {
        self.splines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.splines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn points_are_centred_and_restored() {
        let mut list = SplineList::default();
        let index = list.add_spline(&[[0.0, 0.0, 0.0], [4.0, 2.0, 0.0], [8.0, 4.0, 0.0]], true);
        let spline = list.get(index).unwrap();
        assert_eq!(spline.origin, [4.0, 2.0, 0.0]);
        assert_eq!(spline.points[0], [-4.0, -2.0, 0.0]);

        let bytes = list.encode();
        assert_eq!(&bytes[4..8], &1i32.to_le_bytes());
        let decoded = SplineList::decode(&bytes).unwrap();
        assert_eq!(decoded, list);
        assert_eq!(decoded.splines[0].world_points()[2], [8.0, 4.0, 0.0]);
    }
}
