//! Binary min-heap whose elements stay addressable by insertion id, so a
//! triangle's degree can be looked up, lowered or erased in place.

#[derive(Debug, Default)]
pub(crate) struct IndexedHeap {
    /// (value, id) in heap order
    heap: Vec<(usize, usize)>,
    /// id → heap position; `>= heap.len()` once removed
    finder: Vec<usize>,
    locked: bool,
}

impl IndexedHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Freeze the id space; only pop/erase/update are allowed afterwards.
    pub fn lock(&mut self) {
        self.locked = true;
    }

    pub fn push(&mut self, value: usize) -> usize {
        debug_assert!(!self.locked);
        let id = self.heap.len();
        self.finder.push(id);
        self.heap.push((value, id));
        self.adjust(id);
        id
    }

    pub fn top(&self) -> Option<usize> {
        self.heap.first().map(|&(value, _)| value)
    }

    /// Id of the element at heap position `pos`.
    pub fn id_at(&self, pos: usize) -> Option<usize> {
        self.heap.get(pos).map(|&(_, id)| id)
    }

    pub fn removed(&self, id: usize) -> bool {
        self.finder.get(id).map_or(true, |&pos| pos >= self.len())
    }

    pub fn peek(&self, id: usize) -> Option<usize> {
        if self.removed(id) {
            return None;
        }
        Some(self.heap[self.finder[id]].0)
    }

    pub fn pop(&mut self) {
        if self.heap.is_empty() {
            return;
        }
        let last = self.len() - 1;
        self.swap(0, last);
        self.heap.pop();
        if !self.heap.is_empty() {
            self.adjust(0);
        }
    }

    pub fn erase(&mut self, id: usize) {
        if self.removed(id) {
            return;
        }
        let pos = self.finder[id];
        let last = self.len() - 1;
        self.swap(pos, last);
        self.heap.pop();
        if pos != self.len() {
            self.adjust(pos);
        }
    }

    pub fn update(&mut self, id: usize, value: usize) {
        if self.removed(id) {
            return;
        }
        let pos = self.finder[id];
        self.heap[pos].0 = value;
        self.adjust(pos);
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.finder[self.heap[a].1] = a;
        self.finder[self.heap[b].1] = b;
    }

    fn greater(&self, a: usize, b: usize) -> bool {
        self.heap[a].0 > self.heap[b].0
    }

    fn adjust(&mut self, mut i: usize) {
        let mut j = i;
        while j > 0 && self.greater((j - 1) / 2, j) {
            self.swap(j, (j - 1) / 2);
            j = (j - 1) / 2;
        }
        i = j;
        loop {
            let mut child = 2 * i + 1;
            if child >= self.len() {
                return;
            }
            if child + 1 < self.len() && self.greater(child, child + 1) {
                child += 1;
            }
            if self.greater(child, i) {
                return;
            }
            self.swap(i, child);
            i = child;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smallest_value_on_top_and_ids_track_moves() {
        let mut heap = IndexedHeap::new();
        for value in [5, 2, 7, 3] {
            heap.push(value);
        }
        heap.lock();
        assert_eq!(heap.top(), Some(2));
        assert_eq!(heap.id_at(0), Some(1));

        heap.update(2, 1);
        assert_eq!(heap.id_at(0), Some(2));
        heap.erase(2);
        assert!(heap.removed(2));
        assert_eq!(heap.peek(2), None);
        assert_eq!(heap.top(), Some(2));
        heap.pop();
        assert_eq!(heap.top(), Some(3));
        assert_eq!(heap.peek(0), Some(5));
    }
}
