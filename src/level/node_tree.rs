//! `NODE` block: the binary tree portal cells index visible render
//! instances through.
//!
//! ```text
//! [u32 node_count]                      version > 3
//! node:  u32 exists; if 1:
//!        [u16 index]                    version > 3, else assigned in order
//!        4 × f32, u32 model, u32 instance, node A, node B
//! ```
//!
//! A node whose model or instance is `0xFFFFFFFF` is a branch; any other
//! node is a leaf naming one static render instance.

use crate::error::{AssetError, Result};
use crate::io::{ByteReader, ByteWriter};
use crate::level::geometry::GeometrySection;

pub const BRANCH: u32 = 0xFFFF_FFFF;

#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    pub index: u16,
    pub vector: [f32; 4],
    pub model: u32,
    pub instance: u32,
    /// Global render-instance id, `None` for branches
    pub global_instance: Option<u32>,
    pub child_a: Option<usize>,
    pub child_b: Option<usize>,
}

impl TreeNode {
    pub fn is_branch(&self) -> bool {
        self.model == BRANCH || self.instance == BRANCH
    }

    /// `(model, instance)` for leaves.
    pub fn section(&self) -> Option<(u32, u32)> {
        (!self.is_branch()).then_some((self.model, self.instance))
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeTree {
    /// Pre-order arena; `nodes[0]` is the root when present
    pub nodes: Vec<TreeNode>,
}

impl NodeTree {
    pub fn decode(payload: &[u8], version: u32, geometry: &GeometrySection) -> Result<Self> {
        let mut reader = ByteReader::new(payload);
        let declared = if version > 3 { Some(reader.u32()?) } else { None };

        let mut nodes: Vec<TreeNode> = Vec::new();
        // (parent, is_b); child A is pushed last so it decodes first.
        let mut pending: Vec<Option<(usize, bool)>> = vec![None];
        while let Some(link) = pending.pop() {
            let at = reader.position();
            if reader.u32()? == 0 {
                continue;
            }
            let index = if version > 3 {
                reader.u16()?
            } else {
                nodes.len() as u16
            };
            let vector = reader.vec4()?;
            let model = reader.u32()?;
            let instance = reader.u32()?;
            let mut node = TreeNode {
                index,
                vector,
                model,
                instance,
                global_instance: None,
                child_a: None,
                child_b: None,
            };
            if let Some((m, i)) = node.section() {
                node.global_instance = Some(geometry.global_render_index(m, i).ok_or_else(|| {
                    AssetError::corrupt(at, format!("node leaf names missing render instance ({}, {})", m, i))
                })?);
            }

            let slot = nodes.len();
            nodes.push(node);
            match link {
                Some((parent, false)) => nodes[parent].child_a = Some(slot),
                Some((parent, true)) => nodes[parent].child_b = Some(slot),
                None => {}
            }
            // Every decoded node stores two child slots, present or not.
            pending.push(Some((slot, true)));
            pending.push(Some((slot, false)));
        }

        if let Some(declared) = declared.filter(|&d| d as usize != nodes.len()) {
            log::debug!("NODE: header says {} nodes, tree holds {}", declared, nodes.len());
        }
        log::debug!(
            "NODE: {} nodes, {} leaves",
            nodes.len(),
            nodes.iter().filter(|n| !n.is_branch()).count()
        );
        Ok(NodeTree { nodes })
    }

    pub fn encode(&self, version: u32) -> Vec<u8> {
        let mut w = ByteWriter::new();
        if version > 3 {
            w.u32(self.nodes.len() as u32);
        }
        let mut pending: Vec<Option<usize>> = vec![(!self.nodes.is_empty()).then_some(0)];
        while let Some(slot) = pending.pop() {
            let Some(node) = slot.and_then(|s| self.nodes.get(s)) else {
                w.u32(0);
                continue;
            };
            w.u32(1);
            if version > 3 {
                w.u16(node.index);
            }
            w.vec4(node.vector);
            w.u32(node.model);
            w.u32(node.instance);
            pending.push(node.child_b);
            pending.push(node.child_a);
        }
        w.into_inner()
    }

    pub fn root(&self) -> Option<usize> {
        (!self.nodes.is_empty()).then_some(0)
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| !n.is_branch()).count()
    }
}
