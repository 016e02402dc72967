//! Octree colour quantizer with alpha as a fourth axis (16-way branching).
//!
//! Each level looks at one bit of every channel, most significant first:
//! red selects bit 3 of the child index, green bit 2, blue bit 1, alpha bit 0.
//! Leaves sit at [`MAX_DEPTH`]; reducing a palette folds the deepest
//! branches into their parents until the leaf count fits.

pub const MAX_DEPTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Color {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub alpha: u8,
}

impl Color {
    pub const fn new(red: u8, green: u8, blue: u8, alpha: u8) -> Self {
        Color {
            red,
            green,
            blue,
            alpha,
        }
    }

    pub fn to_array(self) -> [u8; 4] {
        [self.red, self.green, self.blue, self.alpha]
    }

    fn child_index(self, level: usize) -> usize {
        let mask = 0x80u8 >> level;
        let bit = |channel: u8, shift: usize| ((channel & mask != 0) as usize) << shift;
        bit(self.red, 3) | bit(self.green, 2) | bit(self.blue, 1) | bit(self.alpha, 0)
    }
}

impl From<[u8; 4]> for Color {
    fn from(c: [u8; 4]) -> Self {
        Color::new(c[0], c[1], c[2], c[3])
    }
}

#[derive(Debug, Default)]
struct OctreeNode {
    sum: [u64; 4],
    pixel_count: u64,
    palette_index: usize,
    children: [Option<usize>; 16],
}

impl OctreeNode {
    fn is_leaf(&self) -> bool {
        self.pixel_count > 0
    }

    fn average(&self) -> Color {
        let avg = |i: usize| (self.sum[i] / self.pixel_count.max(1)) as u8;
        Color::new(avg(0), avg(1), avg(2), avg(3))
    }
}

#[derive(Debug)]
pub struct OctreeQuantizer {
    nodes: Vec<OctreeNode>,
    /// Reducible nodes per level, in creation order
    levels: Vec<Vec<usize>>,
}

impl Default for OctreeQuantizer {
    fn default() -> Self {
        Self::new()
    }
}

impl OctreeQuantizer {
    pub fn new() -> Self {
        let mut levels = vec![Vec::new(); MAX_DEPTH];
        levels[0].push(0);
        OctreeQuantizer {
            nodes: vec![OctreeNode::default()],
            levels,
        }
    }

    pub fn add_color(&mut self, color: Color) {
        let mut node = 0;
        for level in 0..MAX_DEPTH {
            let index = color.child_index(level);
            node = match self.nodes[node].children[index] {
                Some(child) => child,
                None => {
                    let child = self.nodes.len();
                    self.nodes.push(OctreeNode::default());
                    self.nodes[node].children[index] = Some(child);
                    if level < MAX_DEPTH - 1 {
                        self.levels[level].push(child);
                    }
                    child
                }
            };
        }
        let leaf = &mut self.nodes[node];
        for (sum, channel) in leaf.sum.iter_mut().zip(color.to_array()) {
            *sum += channel as u64;
        }
        leaf.pixel_count += 1;
    }

    fn leaves(&self) -> Vec<usize> {
        let mut out = Vec::new();
        let mut pending: Vec<usize> = self.nodes[0].children.iter().rev().flatten().copied().collect();
        while let Some(node) = pending.pop() {
            if self.nodes[node].is_leaf() {
                out.push(node);
            } else {
                pending.extend(self.nodes[node].children.iter().rev().flatten());
            }
        }
        out
    }

    /// Fold the children of `node` into it. Returns how many leaves the
    /// fold removed (children minus the node that replaces them).
    fn fold_children(&mut self, node: usize) -> i64 {
        let children: Vec<usize> = self.nodes[node].children.iter().flatten().copied().collect();
        for &child in &children {
            let (sum, count) = (self.nodes[child].sum, self.nodes[child].pixel_count);
            let parent = &mut self.nodes[node];
            for (acc, s) in parent.sum.iter_mut().zip(sum) {
                *acc += s;
            }
            parent.pixel_count += count;
        }
        children.len() as i64 - 1
    }

    /// Reduce the tree to at most `color_count` leaves and assign palette
    /// indices. Consumes the reducible-node lists, so call it once.
    pub fn make_palette(&mut self, color_count: usize) -> Vec<Color> {
        let mut leaf_count = self.leaves().len() as i64;
        let target = color_count as i64;
        'reduce: for level in (0..MAX_DEPTH).rev() {
            if leaf_count <= target {
                break;
            }
            if self.levels[level].is_empty() {
                continue;
            }
            for node in self.levels[level].clone() {
                leaf_count -= self.fold_children(node);
                if leaf_count <= target {
                    break 'reduce;
                }
            }
            self.levels[level].clear();
        }

        let mut palette = Vec::new();
        for leaf in self.leaves() {
            if palette.len() >= color_count {
                break;
            }
            self.nodes[leaf].palette_index = palette.len();
            palette.push(self.nodes[leaf].average());
        }
        palette
    }

    /// Palette slot for `color`; colours never added follow the nearest
    /// existing branch.
    pub fn palette_index(&self, color: Color) -> usize {
        let mut node = 0;
        for level in 0..=MAX_DEPTH {
            let current = &self.nodes[node];
            if current.is_leaf() {
                return current.palette_index;
            }
            if level == MAX_DEPTH {
                break;
            }
            let next = current.children[color.child_index(level)]
                .or_else(|| current.children.iter().flatten().next().copied());
            match next {
                Some(child) => node = child,
                None => break,
            }
        }
        self.nodes[node].palette_index
    }
}
