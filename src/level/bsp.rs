//! Collision BSP trees.
//!
//! Stored pre-order: `u32 count, count × u16 triangle, u32 has_front,
//! u32 has_back`, then the front subtree, then the back subtree. Nodes live
//! in an arena and refer to their children by index.
//!
//! Rebuilt trees split without clipping: a triangle whose vertices lie on
//! both sides of the plane stays in the node. The shipped trees were built
//! by an unknown heuristic, so a rebuild is functionally equivalent but
//! never byte-identical.

use crate::error::{AssetError, Result};
use crate::io::{ByteReader, ByteWriter};
use crate::math::{triangle_centroid, Aabb, Plane};

/// Split-plane choice for rebuilt trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BspHeuristic {
    /// Plane `x = c` through the median triangle centroid
    #[default]
    MedianX,
    /// Cheapest of the three mid-box axis planes, costed by child surface area
    SurfaceArea,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BspNode {
    pub triangles: Vec<u16>,
    pub front: Option<usize>,
    pub back: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BspTree {
    /// `nodes[0]` is the root
    pub nodes: Vec<BspNode>,
}

impl Default for BspTree {
    /// A lone empty root, as stored for geometry without triangles.
    fn default() -> Self {
        BspTree {
            nodes: vec![BspNode::default()],
        }
    }
}

impl BspTree {
    pub fn decode(reader: &mut ByteReader) -> Result<Self> {
        let mut nodes: Vec<BspNode> = Vec::new();
        // (parent, is_back); the front child is pushed last so it pops first.
        let mut pending: Vec<Option<(usize, bool)>> = vec![None];
        while let Some(link) = pending.pop() {
            let at = reader.position();
            let count = reader.u32()? as usize;
            if count * 2 > reader.remaining() {
                return Err(AssetError::corrupt(at, format!("BSP node claims {} triangles", count)));
            }
            let triangles = (0..count).map(|_| reader.u16()).collect::<Result<Vec<_>>>()?;
            let has_front = reader.u32()? != 0;
            let has_back = reader.u32()? != 0;

            let index = nodes.len();
            nodes.push(BspNode {
                triangles,
                front: None,
                back: None,
            });
            match link {
                Some((parent, false)) => nodes[parent].front = Some(index),
                Some((parent, true)) => nodes[parent].back = Some(index),
                None => {}
            }
            if has_back {
                pending.push(Some((index, true)));
            }
            if has_front {
                pending.push(Some((index, false)));
            }
        }
        Ok(BspTree { nodes })
    }

    pub fn encode(&self, w: &mut ByteWriter) {
        let mut pending = vec![0usize];
        while let Some(index) = pending.pop() {
            let Some(node) = self.nodes.get(index) else {
                continue;
            };
            w.u32(node.triangles.len() as u32);
            node.triangles.iter().for_each(|&t| w.u16(t));
            w.u32(node.front.is_some() as u32);
            w.u32(node.back.is_some() as u32);
            if let Some(back) = node.back {
                pending.push(back);
            }
            if let Some(front) = node.front {
                pending.push(front);
            }
        }
    }

    /// Build a tree over `triangles`, each triangle index ending up in
    /// exactly one node.
    pub fn build(triangles: &[[[f32; 3]; 3]], heuristic: BspHeuristic) -> Self {
        let all: Vec<u16> = (0..triangles.len() as u16).collect();
        if all.is_empty() {
            return BspTree::default();
        }
        // Nodes are allocated in storage order so a decoded rebuild compares
        // equal to the tree it came from.
        let mut nodes: Vec<BspNode> = Vec::new();
        let mut work: Vec<(Option<(usize, bool)>, Vec<u16>)> = vec![(None, all)];
        while let Some((link, set)) = work.pop() {
            let index = nodes.len();
            let split = split(triangles, &set, heuristic);
            nodes.push(BspNode {
                triangles: split.on,
                front: None,
                back: None,
            });
            match link {
                Some((parent, false)) => nodes[parent].front = Some(index),
                Some((parent, true)) => nodes[parent].back = Some(index),
                None => {}
            }
            if !split.back.is_empty() {
                work.push((Some((index, true)), split.back));
            }
            if !split.front.is_empty() {
                work.push((Some((index, false)), split.front));
            }
        }
        BspTree { nodes }
    }

    /// Every triangle index in the tree, in storage order.
    pub fn triangle_indices(&self) -> Vec<u16> {
        let mut out = Vec::new();
        let mut pending = vec![0usize];
        while let Some(index) = pending.pop() {
            let Some(node) = self.nodes.get(index) else {
                continue;
            };
            out.extend_from_slice(&node.triangles);
            pending.extend(node.back);
            pending.extend(node.front);
        }
        out
    }

    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut pending = vec![(0usize, 1usize)];
        while let Some((index, depth)) = pending.pop() {
            let Some(node) = self.nodes.get(index) else {
                continue;
            };
            deepest = deepest.max(depth);
            pending.extend(node.front.map(|c| (c, depth + 1)));
            pending.extend(node.back.map(|c| (c, depth + 1)));
        }
        deepest
    }
}

#[derive(Debug, Default)]
struct Split {
    on: Vec<u16>,
    front: Vec<u16>,
    back: Vec<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    On,
    Front,
    Back,
}

fn classify(plane: &Plane, tri: &[[f32; 3]; 3]) -> Side {
    let d = tri.map(|v| plane.signed_distance(v));
    if d.iter().all(|&x| x == 0.0) {
        Side::On
    } else if d.iter().all(|&x| x >= 0.0) {
        Side::Front
    } else if d.iter().all(|&x| x <= 0.0) {
        Side::Back
    } else {
        Side::On
    }
}

fn partition(triangles: &[[[f32; 3]; 3]], set: &[u16], plane: &Plane) -> Split {
    let mut split = Split::default();
    for &t in set {
        match classify(plane, &triangles[t as usize]) {
            Side::On => split.on.push(t),
            Side::Front => split.front.push(t),
            Side::Back => split.back.push(t),
        }
    }
    split
}

fn bounds_of(triangles: &[[[f32; 3]; 3]], set: &[u16]) -> Option<Aabb> {
    Aabb::from_points(set.iter().flat_map(|&t| triangles[t as usize].iter()))
}

fn split(triangles: &[[[f32; 3]; 3]], set: &[u16], heuristic: BspHeuristic) -> Split {
    let plane = match heuristic {
        BspHeuristic::MedianX => {
            let mut xs: Vec<f32> = set
                .iter()
                .map(|&t| triangle_centroid(&triangles[t as usize])[0])
                .collect();
            xs.sort_by(|a, b| a.total_cmp(b));
            Plane::axis(0, xs[xs.len() / 2])
        }
        BspHeuristic::SurfaceArea => surface_area_plane(triangles, set),
    };
    let mut split = partition(triangles, set, &plane);

    // Everything on one side would recurse forever: pin the triangle
    // nearest the plane to this node.
    if split.on.is_empty() && (split.front.is_empty() || split.back.is_empty()) {
        let side = if split.front.is_empty() {
            &mut split.back
        } else {
            &mut split.front
        };
        let distance =
            |t: u16| plane.signed_distance(triangle_centroid(&triangles[t as usize])).abs();
        let nearest = side
            .iter()
            .enumerate()
            .min_by(|a, b| distance(*a.1).total_cmp(&distance(*b.1)))
            .map(|(i, _)| i);
        if let Some(i) = nearest {
            split.on.push(side.remove(i));
        }
    }
    split
}

fn surface_area_plane(triangles: &[[[f32; 3]; 3]], set: &[u16]) -> Plane {
    let bounds = bounds_of(triangles, set).unwrap_or_default();
    let center = bounds.center();
    let total = bounds.surface_area();
    let mut best: Option<(f32, Plane)> = None;
    for axis in 0..3 {
        let plane = Plane::axis(axis, center[axis]);
        let split = partition(triangles, set, &plane);
        let area = |s: &[u16]| bounds_of(triangles, s).map_or(0.0, |b| b.surface_area());
        let cost = area(&split.front) * split.front.len() as f32
            + area(&split.back) * split.back.len() as f32
            + total * split.on.len() as f32;
        if best.map_or(true, |(c, _)| cost < c) {
            best = Some((cost, plane));
        }
    }
    best.map_or(Plane::axis(0, center[0]), |(_, plane)| plane)
}
