//! `PVS ` block: portal cells and the node lists they make visible.
//!
//! ```text
//! u32 vertex_count, vertex_count × 4 f32
//! u32 cell_count, cells:
//!   u32 flags, u32 edge_count,
//!   edge_count × { u32 a, u32 b, 4 f32 plane, u32 neighbour }
//!   u32 n, n × { u16 model, u16 instance }             visible sections
//!   [u32 n, n × u16 node id]                            version > 3
//!   [u32 n, n × u16 grid cell id]                       version > 3
//! ```
//!
//! Older levels carry no node lists; they are derived from the node tree.
//! Newer ones store them, and the derived list is cross-checked against the
//! stored one. A mismatch is reported, never fatal.

use std::collections::{BTreeSet, HashSet};

use crate::error::{AssetError, Diagnostics, Result, Warning};
use crate::io::{ByteReader, ByteWriter};
use crate::level::geometry::GeometrySection;
use crate::level::node_tree::NodeTree;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellEdge {
    pub vertices: [u32; 2],
    /// Tangent direction xyz and placement w
    pub plane: [f32; 4],
    pub neighbour: u32,
}

impl CellEdge {
    fn decode(reader: &mut ByteReader) -> Result<Self> {
        Ok(CellEdge {
            vertices: [reader.u32()?, reader.u32()?],
            plane: reader.vec4()?,
            neighbour: reader.u32()?,
        })
    }

    fn encode(&self, w: &mut ByteWriter) {
        w.u32(self.vertices[0]);
        w.u32(self.vertices[1]);
        w.vec4(self.plane);
        w.u32(self.neighbour);
    }
}

/// A render instance visible from a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellSection {
    pub model: u16,
    pub instance: u16,
    pub global_instance: u32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PortalCell {
    pub flags: u32,
    pub edges: Vec<CellEdge>,
    pub sections: Vec<CellSection>,
    pub node_ids: Vec<u16>,
    pub grid_cell_ids: Vec<u16>,
}

impl PortalCell {
    /// Node ids whose leaf matches one of this cell's sections.
    ///
    /// Search order per node: the node itself, then its B subtree, then its
    /// A subtree. A node is recorded when it or its B subtree matched, so
    /// the ancestors along a B path land in the list too.
    pub fn build_node_list(&self, tree: &NodeTree) -> Vec<u16> {
        let mut found = Vec::new();
        let Some(root) = tree.root() else {
            return found;
        };
        for section in &self.sections {
            find_nodes(tree, root, (section.model as u32, section.instance as u32), &mut found);
        }
        found
    }

    /// Vertex loop of the cell outline, if it has at least three corners.
    pub fn polygon(&self) -> Option<Vec<u32>> {
        let pairs: Vec<[u32; 2]> = self.edges.iter().map(|e| e.vertices).collect();
        edge_loop(&pairs).map(|chain| chain.iter().map(|(_, [a, _])| *a).collect())
    }
}

#[derive(Clone, Copy)]
enum Visit {
    Enter,
    AfterB,
    AfterA,
}

/// Depth-first search with an explicit stack; node trees can be far deeper
/// than the call stack allows. `hit` carries the result of the subtree that
/// just finished back to its parent frame.
fn find_nodes(tree: &NodeTree, root: usize, section: (u32, u32), found: &mut Vec<u16>) {
    let mut seen: HashSet<u16> = found.iter().copied().collect();
    let mut stack = vec![(root, Visit::Enter)];
    let mut hit = false;
    while let Some((slot, visit)) = stack.pop() {
        let node = &tree.nodes[slot];
        match visit {
            Visit::Enter if node.section() == Some(section) => hit = true,
            Visit::Enter => match node.child_b {
                Some(b) => {
                    stack.push((slot, Visit::AfterB));
                    stack.push((b, Visit::Enter));
                    continue;
                }
                None => hit = false,
            },
            Visit::AfterB => {}
            // the A subtree's result is this node's result
            Visit::AfterA => continue,
        }
        if hit {
            if seen.insert(node.index) {
                found.push(node.index);
            } else {
                hit = false;
            }
        }
        if !hit {
            if let Some(a) = node.child_a {
                stack.push((slot, Visit::AfterA));
                stack.push((a, Visit::Enter));
            }
        }
    }
}

/// Walk an unordered edge list into a closed chain, starting from the first
/// edge and each time taking the first unvisited edge that touches the
/// current end vertex. Returns `(edge index, oriented pair)` in walk order,
/// or `None` when the edges touch fewer than three distinct vertices.
pub(crate) fn edge_loop(edges: &[[u32; 2]]) -> Option<Vec<(usize, [u32; 2])>> {
    let distinct: BTreeSet<u32> = edges.iter().flatten().copied().collect();
    if distinct.len() < 3 {
        return None;
    }
    let same = |p: &[u32; 2], q: &[u32; 2]| p == q || (p[0] == q[1] && p[1] == q[0]);
    let mut chain = vec![(0usize, edges[0])];
    loop {
        let end = chain[chain.len() - 1].1[1];
        let next = edges.iter().enumerate().find(|(_, p)| {
            p.contains(&end) && !chain.iter().any(|(_, visited)| same(visited, p))
        });
        let Some((i, &p)) = next else {
            break;
        };
        let oriented = if p[0] == end { p } else { [p[1], p[0]] };
        chain.push((i, oriented));
    }
    Some(chain)
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Pvs {
    pub vertices: Vec<[f32; 4]>,
    pub cells: Vec<PortalCell>,
}

impl Pvs {
    /// Decode and resolve node lists. Version <= 3 levels get their lists
    /// derived; newer ones are cross-checked.
    pub fn decode(
        payload: &[u8],
        version: u32,
        geometry: &GeometrySection,
        tree: &NodeTree,
        diagnostics: &mut Diagnostics,
    ) -> Result<Self> {
        let mut reader = ByteReader::new(payload);
        let count = reader.u32()? as usize;
        let vertices = (0..count).map(|_| reader.vec4()).collect::<Result<Vec<_>>>()?;

        let count = reader.u32()? as usize;
        let mut cells = Vec::with_capacity(count.min(4096));
        for c in 0..count {
            let flags = reader.u32()?;
            if flags > 0xFF {
                diagnostics.warn(Warning::CellFlagsOutOfRange { cell: c, flags });
            }
            let edge_count = reader.u32()? as usize;
            let edges = (0..edge_count)
                .map(|_| CellEdge::decode(&mut reader))
                .collect::<Result<Vec<_>>>()?;

            let at = reader.position();
            let section_count = reader.u32()? as usize;
            let mut sections = Vec::with_capacity(section_count.min(4096));
            for _ in 0..section_count {
                let model = reader.u16()?;
                let instance = reader.u16()?;
                let global_instance = geometry
                    .global_render_index(model as u32, instance as u32)
                    .ok_or_else(|| {
                        AssetError::corrupt(
                            at,
                            format!("portal cell {} names missing render instance ({}, {})", c, model, instance),
                        )
                    })?;
                sections.push(CellSection {
                    model,
                    instance,
                    global_instance,
                });
            }

            let mut cell = PortalCell {
                flags,
                edges,
                sections,
                node_ids: Vec::new(),
                grid_cell_ids: Vec::new(),
            };
            let derived = cell.build_node_list(tree);
            if version > 3 {
                let n = reader.u32()? as usize;
                cell.node_ids = (0..n).map(|_| reader.u16()).collect::<Result<Vec<_>>>()?;
                let n = reader.u32()? as usize;
                cell.grid_cell_ids = (0..n).map(|_| reader.u16()).collect::<Result<Vec<_>>>()?;

                let stored_set: BTreeSet<u16> = cell.node_ids.iter().copied().collect();
                let derived_set: BTreeSet<u16> = derived.iter().copied().collect();
                if stored_set != derived_set {
                    diagnostics.warn(Warning::NodeListMismatch {
                        cell: c,
                        stored: cell.node_ids.clone(),
                        derived,
                    });
                }
            } else {
                cell.node_ids = derived;
            }
            cells.push(cell);
        }
        log::debug!("PVS: {} vertices, {} cells", vertices.len(), cells.len());
        Ok(Pvs { vertices, cells })
    }

    pub fn encode(&self, version: u32) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.u32(self.vertices.len() as u32);
        self.vertices.iter().for_each(|v| w.vec4(*v));
        w.u32(self.cells.len() as u32);
        for cell in &self.cells {
            w.u32(cell.flags);
            w.u32(cell.edges.len() as u32);
            cell.edges.iter().for_each(|e| e.encode(&mut w));
            w.u32(cell.sections.len() as u32);
            for section in &cell.sections {
                w.u16(section.model);
                w.u16(section.instance);
            }
            if version > 3 {
                w.u32(cell.node_ids.len() as u32);
                cell.node_ids.iter().for_each(|&id| w.u16(id));
                w.u32(cell.grid_cell_ids.len() as u32);
                cell.grid_cell_ids.iter().for_each(|&id| w.u16(id));
            }
        }
        w.into_inner()
    }

    /// Recompute every cell's node list from `tree`.
    pub fn rebuild_node_lists(&mut self, tree: &NodeTree) {
        for cell in &mut self.cells {
            cell.node_ids = cell.build_node_list(tree);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::node_tree::tests::{geometry_with_instances, sample_tree};
    use crate::level::node_tree::{TreeNode, BRANCH};

    fn cell_showing(instances: &[u16]) -> PortalCell {
        PortalCell {
            flags: 0,
            edges: vec![
                CellEdge {
                    vertices: [0, 1],
                    plane: [0.0; 4],
                    neighbour: 0xFFFF_FFFF,
                },
                CellEdge {
                    vertices: [2, 0],
                    plane: [0.0; 4],
                    neighbour: 1,
                },
                CellEdge {
                    vertices: [1, 2],
                    plane: [0.0; 4],
                    neighbour: 0xFFFF_FFFF,
                },
            ],
            sections: instances
                .iter()
                .map(|&i| CellSection {
                    model: 0,
                    instance: i,
                    global_instance: i as u32,
                })
                .collect(),
            node_ids: Vec::new(),
            grid_cell_ids: Vec::new(),
        }
    }

    #[test]
    fn node_list_follows_b_before_a() {
        let tree = sample_tree();
        // Leaf 0 sits at node 4 (via B, B) and node 1 (via A). The B path
        // records node 4 and its ancestors 2 and 0 before A is tried.
        assert_eq!(cell_showing(&[0]).build_node_list(&tree), vec![4, 2, 0]);
        // Leaf 1 sits at node 3 on 2's A side: 2 is skipped, but 0 reached
        // it through its B child and is recorded.
        assert_eq!(cell_showing(&[1]).build_node_list(&tree), vec![3, 0]);
        assert!(cell_showing(&[]).build_node_list(&tree).is_empty());
    }

    /// `depth` branch nodes, each linking the next through A or B, ending
    /// in a leaf for instance 0.
    fn chain(depth: usize, through_b: bool) -> NodeTree {
        let mut nodes: Vec<TreeNode> = (0..=depth)
            .map(|i| TreeNode {
                index: (i % 0x1_0000) as u16,
                vector: [0.0; 4],
                model: BRANCH,
                instance: BRANCH,
                global_instance: None,
                child_a: None,
                child_b: None,
            })
            .collect();
        for i in 0..depth {
            if through_b {
                nodes[i].child_b = Some(i + 1);
            } else {
                nodes[i].child_a = Some(i + 1);
            }
        }
        let leaf = &mut nodes[depth];
        leaf.index = 7;
        leaf.model = 0;
        leaf.instance = 0;
        leaf.global_instance = Some(0);
        NodeTree { nodes }
    }

    #[test]
    fn deep_chains_are_searched_without_recursion() {
        let depth = 100_000;
        // A-side ancestors are never recorded
        let tree = chain(depth, false);
        assert_eq!(cell_showing(&[0]).build_node_list(&tree), vec![7]);
        assert!(cell_showing(&[1]).build_node_list(&tree).is_empty());

        // B-side ancestors are, until an index repeats and stops the climb
        let tree = chain(depth, true);
        let found = cell_showing(&[0]).build_node_list(&tree);
        assert_eq!(found[0], 7);
        assert_eq!(found[1], (depth - 1) as u16);
        let unique: BTreeSet<u16> = found.iter().copied().collect();
        assert_eq!(unique.len(), found.len());
        assert!(cell_showing(&[1]).build_node_list(&tree).is_empty());
    }

    #[test]
    fn old_levels_derive_lists_new_levels_cross_check() {
        let geometry = geometry_with_instances(2);
        let tree = sample_tree();
        let mut pvs = Pvs {
            vertices: vec![[0.0, 0.0, 0.0, 1.0]; 3],
            cells: vec![cell_showing(&[1])],
        };

        let mut diagnostics = Diagnostics::new();
        let old = Pvs::decode(&pvs.encode(3), 3, &geometry, &tree, &mut diagnostics).unwrap();
        assert_eq!(old.cells[0].node_ids, vec![3, 0]);
        assert!(diagnostics.is_empty());

        pvs.cells[0].node_ids = vec![3, 1];
        let new = Pvs::decode(&pvs.encode(4), 4, &geometry, &tree, &mut diagnostics).unwrap();
        assert_eq!(new.cells[0].node_ids, vec![3, 1]);
        assert!(matches!(
            diagnostics.warnings(),
            [Warning::NodeListMismatch { cell: 0, .. }]
        ));
        assert_eq!(new.encode(4), pvs.encode(4));
    }

    #[test]
    fn out_of_range_flags_warn() {
        let geometry = geometry_with_instances(2);
        let mut pvs = Pvs::default();
        let mut cell = cell_showing(&[]);
        cell.flags = 0x100;
        pvs.cells.push(cell);
        let mut diagnostics = Diagnostics::new();
        Pvs::decode(&pvs.encode(4), 4, &geometry, &NodeTree::default(), &mut diagnostics).unwrap();
        assert!(matches!(
            diagnostics.warnings(),
            [Warning::CellFlagsOutOfRange { cell: 0, flags: 0x100 }]
        ));
    }

    #[test]
    fn polygon_walks_the_edge_chain() {
        assert_eq!(cell_showing(&[]).polygon(), Some(vec![0, 1, 2]));
        let degenerate = edge_loop(&[[0, 1], [1, 0]]);
        assert!(degenerate.is_none());
    }
}
