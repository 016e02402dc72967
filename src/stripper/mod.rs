//! Cache-aware greedy triangle stripifier.
//!
//! Triangles are seeded from an indexed min-heap keyed by the number of
//! still-free neighbours, so lonely triangles are consumed first. Each seed
//! is extended in all three rotations (and optionally backwards), scored by a
//! FIFO vertex-cache simulation, and the winner is built for real. Anything
//! that never joins a strip is returned as a final triangle list.

mod heap;

use std::collections::VecDeque;

use crate::error::{AssetError, Result};
use heap::IndexedHeap;

/// Tuning knobs. The defaults are the hardware-derived values the game's
/// exporters used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StripifierConfig {
    /// Simulated vertex cache entries; 0 disables the simulation
    pub cache_size: usize,
    /// Strips shorter than this many triangles are left as a triangle list
    pub min_strip_size: usize,
    /// Longest strip, in triangles
    pub max_strip_size: usize,
    pub backward_search: bool,
    /// Whether a cache hit still moves the index to the front of the FIFO
    pub push_cache_hits: bool,
}

impl Default for StripifierConfig {
    fn default() -> Self {
        StripifierConfig {
            cache_size: 256,
            min_strip_size: 2,
            max_strip_size: 64,
            backward_search: false,
            push_cache_hits: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveKind {
    TriangleList,
    TriangleStrip,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimitiveGroup {
    pub kind: PrimitiveKind,
    pub indices: Vec<u32>,
}

impl PrimitiveGroup {
    pub fn triangles(&self) -> Vec<[u32; 3]> {
        match self.kind {
            PrimitiveKind::TriangleStrip => triangle_strip_to_triangle_list(&self.indices),
            PrimitiveKind::TriangleList => self
                .indices
                .chunks_exact(3)
                .map(|t| [t[0], t[1], t[2]])
                .collect(),
        }
    }

    /// Vertex runs as the geometry encoders consume them: a strip is one
    /// run, a triangle list is one three-vertex run per triangle.
    pub fn runs(&self) -> Vec<Vec<u32>> {
        match self.kind {
            PrimitiveKind::TriangleStrip => vec![self.indices.clone()],
            PrimitiveKind::TriangleList => {
                self.indices.chunks_exact(3).map(|t| t.to_vec()).collect()
            }
        }
    }
}

/// Triangle closed by strip vertex `index` (>= 2), alternating winding.
pub fn strip_triangle(strip: &[u32], index: usize) -> [u32; 3] {
    if index % 2 == 0 {
        [strip[index - 2], strip[index - 1], strip[index]]
    } else {
        [strip[index - 1], strip[index - 2], strip[index]]
    }
}

pub fn triangle_strip_to_triangle_list(strip: &[u32]) -> Vec<[u32; 3]> {
    (2..strip.len()).map(|i| strip_triangle(strip, i)).collect()
}

/// Stripify a flat triangle index list.
pub fn stripify(indices: &[u32], config: &StripifierConfig) -> Result<Vec<PrimitiveGroup>> {
    if indices.len() % 3 != 0 {
        return Err(AssetError::InvalidInput(format!(
            "triangle index count {} is not a multiple of 3",
            indices.len()
        )));
    }
    let mut stripper = TriangleStripper::new(indices, config);
    let primitives = stripper.strip();
    let strips = primitives
        .iter()
        .filter(|p| p.kind == PrimitiveKind::TriangleStrip)
        .count();
    log::debug!(
        "stripified {} triangles into {} strips",
        indices.len() / 3,
        strips
    );
    Ok(primitives)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TriangleOrder {
    Abc,
    Bca,
    Cab,
}

impl TriangleOrder {
    const ALL: [TriangleOrder; 3] = [TriangleOrder::Abc, TriangleOrder::Bca, TriangleOrder::Cab];
}

#[derive(Debug, Clone, Copy)]
struct Triangle {
    a: u32,
    b: u32,
    c: u32,
    strip_id: usize,
    marked: bool,
}

impl Triangle {
    fn first_edge(&self, order: TriangleOrder) -> (u32, u32) {
        match order {
            TriangleOrder::Abc => (self.a, self.b),
            TriangleOrder::Bca => (self.b, self.c),
            TriangleOrder::Cab => (self.c, self.a),
        }
    }

    fn last_edge(&self, order: TriangleOrder) -> (u32, u32) {
        match order {
            TriangleOrder::Abc => (self.b, self.c),
            TriangleOrder::Bca => (self.c, self.a),
            TriangleOrder::Cab => (self.a, self.b),
        }
    }

    fn ordered(&self, order: TriangleOrder) -> [u32; 3] {
        match order {
            TriangleOrder::Abc => [self.a, self.b, self.c],
            TriangleOrder::Bca => [self.b, self.c, self.a],
            TriangleOrder::Cab => [self.c, self.a, self.b],
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Strip {
    start: usize,
    order: TriangleOrder,
    size: usize,
}

impl Default for Strip {
    fn default() -> Self {
        Strip {
            start: 0,
            order: TriangleOrder::Abc,
            size: 0,
        }
    }
}

struct Policy {
    strip: Strip,
    degree: usize,
    cache_hits: usize,
    min_strip_size: usize,
    max_strip_size: usize,
    use_cache: bool,
}

impl Policy {
    fn challenge(&mut self, strip: Strip, degree: usize, cache_hits: usize) {
        if strip.size < self.min_strip_size || strip.size > self.max_strip_size {
            return;
        }
        if !self.use_cache {
            if strip.size > self.strip.size {
                self.strip = strip;
            }
        } else if cache_hits > self.cache_hits {
            self.strip = strip;
            self.degree = degree;
            self.cache_hits = cache_hits;
        } else if cache_hits == self.cache_hits {
            if self.strip.size != 0 && degree < self.degree {
                self.strip = strip;
                self.degree = degree;
            } else if strip.size > self.strip.size {
                self.strip = strip;
                self.degree = degree;
            }
        }
    }
}

/// FIFO vertex cache pre-filled with sentinels.
#[derive(Debug, Clone)]
struct CacheSimulator {
    cache: VecDeque<u32>,
    hits: usize,
    push_hits: bool,
}

const EMPTY_SLOT: u32 = u32::MAX;

impl CacheSimulator {
    fn new(size: usize, push_hits: bool) -> Self {
        CacheSimulator {
            cache: std::iter::repeat(EMPTY_SLOT).take(size).collect(),
            hits: 0,
            push_hits,
        }
    }

    fn size(&self) -> usize {
        self.cache.len()
    }

    fn reset(&mut self) {
        self.hits = 0;
        self.cache.iter_mut().for_each(|slot| *slot = EMPTY_SLOT);
    }

    fn push(&mut self, index: u32, count_hit: bool) {
        if self.cache.is_empty() {
            return;
        }
        if (count_hit || self.push_hits) && self.cache.contains(&index) {
            if count_hit {
                self.hits += 1;
            }
            if !self.push_hits {
                return;
            }
        }
        self.cache.push_front(index);
        self.cache.pop_back();
    }

    fn merge(&mut self, backward: &CacheSimulator, possible_overlap: usize) {
        let overlap = possible_overlap.min(self.size());
        for i in 0..overlap {
            self.push(backward.cache[i], true);
        }
        self.hits += backward.hits;
    }
}

struct TriangleStripper {
    triangles: Vec<Triangle>,
    /// Outgoing adjacency per triangle, in link order
    links: Vec<Vec<usize>>,
    heap: IndexedHeap,
    candidates: Vec<usize>,
    cache: CacheSimulator,
    back_cache: CacheSimulator,
    strip_id: usize,
    config: StripifierConfig,
    primitives: Vec<PrimitiveGroup>,
}

impl TriangleStripper {
    fn new(indices: &[u32], config: &StripifierConfig) -> Self {
        let triangles: Vec<Triangle> = indices
            .chunks_exact(3)
            .map(|t| Triangle {
                a: t[0],
                b: t[1],
                c: t[2],
                strip_id: 0,
                marked: false,
            })
            .collect();
        let links = connectivity(&triangles);
        TriangleStripper {
            triangles,
            links,
            heap: IndexedHeap::new(),
            candidates: Vec::new(),
            cache: CacheSimulator::new(config.cache_size, config.push_cache_hits),
            back_cache: CacheSimulator::new(config.cache_size, config.push_cache_hits),
            strip_id: 0,
            config: StripifierConfig {
                min_strip_size: config.min_strip_size.max(1),
                ..*config
            },
            primitives: Vec::new(),
        }
    }

    fn use_cache(&self) -> bool {
        self.cache.size() != 0
    }

    /// True while a strip of `size` triangles may grow by one more.
    fn may_extend(&self, size: usize) -> bool {
        (!self.use_cache() || size + 2 < self.cache.size()) && size < self.config.max_strip_size
    }

    fn strip(&mut self) -> Vec<PrimitiveGroup> {
        for links in &self.links {
            self.heap.push(links.len());
        }
        self.heap.lock();
        while self.heap.top() == Some(0) {
            self.heap.pop();
        }
        self.stripify();
        self.add_left_triangles();
        std::mem::take(&mut self.primitives)
    }

    fn stripify(&mut self) {
        while let Some(heap_top) = self.heap.id_at(0) {
            self.candidates.push(heap_top);
            while !self.candidates.is_empty() {
                let best = self.find_best_strip();
                if best.size >= self.config.min_strip_size && best.size <= self.config.max_strip_size
                {
                    self.build_strip(best);
                }
            }
            if !self.heap.removed(heap_top) {
                self.heap.erase(heap_top);
            }
            while self.heap.top() == Some(0) {
                self.heap.pop();
            }
        }
    }

    fn add_left_triangles(&mut self) {
        let indices: Vec<u32> = self
            .triangles
            .iter()
            .filter(|t| !t.marked)
            .flat_map(|t| [t.a, t.b, t.c])
            .collect();
        if !indices.is_empty() {
            self.primitives.push(PrimitiveGroup {
                kind: PrimitiveKind::TriangleList,
                indices,
            });
        }
    }

    fn add_index(&mut self, index: u32, not_simulation: bool) {
        if self.use_cache() {
            self.cache.push(index, !not_simulation);
        }
        if not_simulation {
            if let Some(group) = self.primitives.last_mut() {
                group.indices.push(index);
            }
        }
    }

    fn back_add_index(&mut self, index: u32) {
        if self.use_cache() {
            self.back_cache.push(index, true);
        }
    }

    fn add_triangle(&mut self, tri: usize, order: TriangleOrder, not_simulation: bool) {
        for index in self.triangles[tri].ordered(order) {
            self.add_index(index, not_simulation);
        }
    }

    fn mark_taken(&mut self, i: usize) {
        self.triangles[i].marked = true;
        if !self.heap.removed(i) {
            self.heap.erase(i);
        }
        for l in 0..self.links[i].len() {
            let j = self.links[i][l];
            if self.triangles[j].marked || self.heap.removed(j) {
                continue;
            }
            if let Some(degree) = self.heap.peek(j) {
                let degree = degree.saturating_sub(1);
                self.heap.update(j, degree);
                if self.use_cache() && degree > 0 {
                    self.candidates.push(j);
                }
            }
        }
    }

    /// Next triangle continuing the strip past `node`, updating `order`.
    fn link_to_neighbour(
        &mut self,
        node: usize,
        clockwise: bool,
        order: &mut TriangleOrder,
        not_simulation: bool,
    ) -> Option<usize> {
        let (ea, eb) = self.triangles[node].last_edge(*order);
        for l in 0..self.links[node].len() {
            let next = self.links[node][l];
            let tri = self.triangles[next];
            if (!not_simulation && tri.strip_id == self.strip_id) || tri.marked {
                continue;
            }
            let (new_order, index) = if eb == tri.a && ea == tri.b {
                (if clockwise { TriangleOrder::Abc } else { TriangleOrder::Bca }, tri.c)
            } else if eb == tri.b && ea == tri.c {
                (if clockwise { TriangleOrder::Bca } else { TriangleOrder::Cab }, tri.a)
            } else if eb == tri.c && ea == tri.a {
                (if clockwise { TriangleOrder::Cab } else { TriangleOrder::Abc }, tri.b)
            } else {
                continue;
            };
            *order = new_order;
            self.add_index(index, not_simulation);
            return Some(next);
        }
        None
    }

    fn back_link_to_neighbour(
        &mut self,
        node: usize,
        clockwise: bool,
        order: &mut TriangleOrder,
    ) -> Option<usize> {
        let (ea, eb) = self.triangles[node].first_edge(*order);
        for l in 0..self.links[node].len() {
            let next = self.links[node][l];
            let tri = self.triangles[next];
            if tri.strip_id == self.strip_id || tri.marked {
                continue;
            }
            let (new_order, index) = if eb == tri.a && ea == tri.b {
                (if clockwise { TriangleOrder::Cab } else { TriangleOrder::Bca }, tri.c)
            } else if eb == tri.b && ea == tri.c {
                (if clockwise { TriangleOrder::Abc } else { TriangleOrder::Cab }, tri.a)
            } else if eb == tri.c && ea == tri.a {
                (if clockwise { TriangleOrder::Bca } else { TriangleOrder::Abc }, tri.b)
            } else {
                continue;
            };
            *order = new_order;
            self.back_add_index(index);
            return Some(next);
        }
        None
    }

    fn extend_to_strip(&mut self, start: usize, start_order: TriangleOrder) -> Strip {
        self.strip_id += 1;
        self.triangles[start].strip_id = self.strip_id;
        self.add_triangle(start, start_order, false);

        let mut order = start_order;
        let mut clockwise = false;
        let mut size = 1;
        let mut node = start;
        while self.may_extend(size) {
            match self.link_to_neighbour(node, clockwise, &mut order, false) {
                Some(next) => {
                    node = next;
                    self.triangles[next].strip_id = self.strip_id;
                    clockwise = !clockwise;
                    size += 1;
                }
                None => break,
            }
        }
        Strip {
            start,
            order: start_order,
            size,
        }
    }

    fn back_extend_to_strip(
        &mut self,
        start: usize,
        start_order: TriangleOrder,
        mut clockwise: bool,
    ) -> Strip {
        self.strip_id += 1;
        self.triangles[start].strip_id = self.strip_id;
        let (_, last) = self.triangles[start].last_edge(start_order);
        self.back_add_index(last);

        let mut order = start_order;
        let mut size = 1;
        let mut node = start;
        while self.may_extend(size) {
            match self.back_link_to_neighbour(node, clockwise, &mut order) {
                Some(next) => {
                    node = next;
                    self.triangles[next].strip_id = self.strip_id;
                    clockwise = !clockwise;
                    size += 1;
                }
                None => break,
            }
        }
        // Strips must start on a counter-clockwise triangle.
        if clockwise {
            return Strip::default();
        }
        if self.use_cache() {
            let back = self.back_cache.clone();
            self.cache.merge(&back, size);
            self.back_cache.reset();
        }
        Strip {
            start: node,
            order,
            size,
        }
    }

    fn find_best_strip(&mut self) -> Strip {
        let backup = self.cache.clone();
        let mut policy = Policy {
            strip: Strip::default(),
            degree: 0,
            cache_hits: 0,
            min_strip_size: self.config.min_strip_size,
            max_strip_size: self.config.max_strip_size,
            use_cache: self.use_cache(),
        };

        while let Some(candidate) = self.candidates.pop() {
            if self.triangles[candidate].marked || self.heap.peek(candidate).unwrap_or(0) == 0 {
                continue;
            }
            for order in TriangleOrder::ALL {
                let strip = self.extend_to_strip(candidate, order);
                let degree = self.heap.peek(strip.start).unwrap_or(0);
                policy.challenge(strip, degree, self.cache.hits.saturating_sub(backup.hits));
                self.cache = backup.clone();
            }
            if self.config.backward_search {
                for clockwise in [false, true] {
                    for order in TriangleOrder::ALL {
                        let strip = self.back_extend_to_strip(candidate, order, clockwise);
                        let degree = self.heap.peek(strip.start).unwrap_or(0);
                        policy.challenge(strip, degree, self.cache.hits.saturating_sub(backup.hits));
                        self.cache = backup.clone();
                    }
                }
            }
        }
        policy.strip
    }

    fn build_strip(&mut self, strip: Strip) {
        self.primitives.push(PrimitiveGroup {
            kind: PrimitiveKind::TriangleStrip,
            indices: Vec::with_capacity(strip.size + 2),
        });
        let mut order = strip.order;
        let mut clockwise = false;
        self.add_triangle(strip.start, order, true);
        self.mark_taken(strip.start);

        let mut node = strip.start;
        for _ in 1..strip.size {
            match self.link_to_neighbour(node, clockwise, &mut order, true) {
                Some(next) => {
                    node = next;
                    self.mark_taken(next);
                    clockwise = !clockwise;
                }
                None => break,
            }
        }
    }
}

/// Triangle adjacency: `t` links to every triangle owning one of its edges
/// in the opposite direction.
fn connectivity(triangles: &[Triangle]) -> Vec<Vec<usize>> {
    let mut edges: Vec<(u32, u32, usize)> = Vec::with_capacity(triangles.len() * 3);
    for (t, tri) in triangles.iter().enumerate() {
        edges.push((tri.a, tri.b, t));
        edges.push((tri.b, tri.c, t));
        edges.push((tri.c, tri.a, t));
    }
    edges.sort_by_key(|&(a, b, _)| (a, b));

    let mut links = vec![Vec::new(); triangles.len()];
    for (t, tri) in triangles.iter().enumerate() {
        for (a, b) in [(tri.b, tri.a), (tri.c, tri.b), (tri.a, tri.c)] {
            let first = edges.partition_point(|&(ea, eb, _)| (ea, eb) < (a, b));
            for &(ea, eb, owner) in &edges[first..] {
                if (ea, eb) != (a, b) {
                    break;
                }
                links[t].push(owner);
            }
        }
    }
    links
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_winding_alternates() {
        let tris = triangle_strip_to_triangle_list(&[0, 1, 2, 3, 4]);
        assert_eq!(tris, vec![[0, 1, 2], [2, 1, 3], [2, 3, 4]]);
    }

    #[test]
    fn quad_becomes_one_strip() {
        let groups = stripify(&[0, 1, 2, 2, 1, 3], &StripifierConfig::default()).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].kind, PrimitiveKind::TriangleStrip);
        assert_eq!(groups[0].indices.len(), 4);
    }

    #[test]
    fn isolated_triangle_is_left_over() {
        let groups = stripify(&[0, 1, 2], &StripifierConfig::default()).unwrap();
        assert_eq!(
            groups,
            vec![PrimitiveGroup {
                kind: PrimitiveKind::TriangleList,
                indices: vec![0, 1, 2]
            }]
        );
    }

    #[test]
    fn closed_mesh_keeps_its_triangle_set() {
        #[rustfmt::skip]
        let cube = [
            0, 2, 3, 0, 3, 1, 4, 5, 7, 4, 7, 6, 0, 1, 5, 0, 5, 4,
            2, 6, 7, 2, 7, 3, 0, 4, 6, 0, 6, 2, 1, 3, 7, 1, 7, 5,
        ];
        let sorted = |mut t: [u32; 3]| {
            t.sort();
            t
        };
        let mut expected: Vec<_> = cube.chunks_exact(3).map(|t| sorted([t[0], t[1], t[2]])).collect();
        expected.sort();

        let config = StripifierConfig {
            max_strip_size: 4,
            ..StripifierConfig::default()
        };
        let groups = stripify(&cube, &config).unwrap();
        let mut found: Vec<_> = groups.iter().flat_map(|g| g.triangles()).map(sorted).collect();
        found.sort();
        assert_eq!(found, expected);
        for group in groups.iter().filter(|g| g.kind == PrimitiveKind::TriangleStrip) {
            assert!(group.indices.len() <= config.max_strip_size + 2);
        }
    }

    #[test]
    fn ragged_index_list_is_rejected() {
        assert!(stripify(&[0, 1], &StripifierConfig::default()).is_err());
    }

    #[test]
    fn cache_counts_hits_only_when_asked() {
        let mut cache = CacheSimulator::new(4, true);
        cache.push(1, false);
        cache.push(1, true);
        cache.push(2, true);
        assert_eq!(cache.hits, 1);
        assert_eq!(cache.cache.front(), Some(&2));
    }
}
