use std::fmt;

/// Arenas smaller than this are never compacted.
const COMPACT_MIN_SLOTS: usize = 64;

/// One link in a [`Sequence`]. Neighbours are slot indices into the owning
/// sequence's arena rather than pointers.
struct Node {
    value: Vec<u8>,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Doubly-linked list of byte strings backed by a slot arena.
///
/// Pushes and pops at either end are O(1); freed slots are recycled so a
/// list that churns at a steady size stops allocating.
#[derive(Default)]
pub struct Sequence {
    slots: Vec<Option<Node>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl Sequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push_front(&mut self, value: Vec<u8>) {
        let idx = self.alloc(Node {
            value,
            prev: None,
            next: self.head,
        });
        match self.head {
            Some(old) => self.node_mut(old).prev = Some(idx),
            None => self.tail = Some(idx),
        }
        self.head = Some(idx);
        self.len += 1;
    }

    pub fn push_back(&mut self, value: Vec<u8>) {
        let idx = self.alloc(Node {
            value,
            prev: self.tail,
            next: None,
        });
        match self.tail {
            Some(old) => self.node_mut(old).next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
        self.len += 1;
    }

    pub fn pop_front(&mut self) -> Option<Vec<u8>> {
        let idx = self.head?;
        let node = self.release(idx);
        self.head = node.next;
        match node.next {
            Some(next) => self.node_mut(next).prev = None,
            None => self.tail = None,
        }
        self.maybe_compact();
        Some(node.value)
    }

    pub fn pop_back(&mut self) -> Option<Vec<u8>> {
        let idx = self.tail?;
        let node = self.release(idx);
        self.tail = node.prev;
        match node.prev {
            Some(prev) => self.node_mut(prev).next = None,
            None => self.head = None,
        }
        self.maybe_compact();
        Some(node.value)
    }

    /// Elements between `start` and `end` inclusive, front to back.
    ///
    /// Negative indices count from the tail (`-1` is the last element). A
    /// start that still lands before the head is clamped to 0 and an end past
    /// the tail is clamped to the last element; an inverted or out-of-range
    /// window yields an empty vector.
    pub fn range(&self, start: i64, end: i64) -> Vec<Vec<u8>> {
        let len = i64::try_from(self.len).unwrap_or(i64::MAX);
        let start = if start < 0 { len.saturating_add(start) } else { start }.max(0);
        let end = if end < 0 { len.saturating_add(end) } else { end };
        if start > end || start >= len {
            return Vec::new();
        }
        let end = end.min(len - 1);
        // Both bounds are now within 0..len.
        let (skip, take) = (start as usize, (end - start + 1) as usize);
        self.iter().skip(skip).take(take).map(<[u8]>::to_vec).collect()
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            seq: self,
            cursor: self.head,
            remaining: self.len,
        }
    }

    fn alloc(&mut self, node: Node) -> usize {
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(node);
                idx
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        }
    }

    fn release(&mut self, idx: usize) -> Node {
        let node = self.slots[idx]
            .take()
            .unwrap_or_else(|| unreachable!("linked slot {idx} is vacant"));
        self.free.push(idx);
        self.len -= 1;
        if self.len == 0 {
            // Nothing is linked any more; drop the arena instead of keeping
            // a free list as long as the list's high-water mark.
            self.slots.clear();
            self.free.clear();
        }
        node
    }

    /// Rebuild the arena densely once three quarters of its slots are vacant,
    /// so a list that drains from a high-water mark gives the memory back.
    fn maybe_compact(&mut self) {
        if self.slots.len() < COMPACT_MIN_SLOTS || self.len * 4 > self.slots.len() {
            return;
        }
        let old = std::mem::take(self);
        let mut slots = old.slots;
        self.slots.reserve_exact(old.len);
        let mut cursor = old.head;
        while let Some(idx) = cursor {
            let node = slots[idx]
                .take()
                .unwrap_or_else(|| unreachable!("linked slot {idx} is vacant"));
            cursor = node.next;
            self.push_back(node.value);
        }
    }

    fn node(&self, idx: usize) -> &Node {
        self.slots[idx]
            .as_ref()
            .unwrap_or_else(|| unreachable!("linked slot {idx} is vacant"))
    }

    fn node_mut(&mut self, idx: usize) -> &mut Node {
        self.slots[idx]
            .as_mut()
            .unwrap_or_else(|| unreachable!("linked slot {idx} is vacant"))
    }
}

pub struct Iter<'a> {
    seq: &'a Sequence,
    cursor: Option<usize>,
    remaining: usize,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.seq.node(self.cursor?);
        self.cursor = node.next;
        self.remaining -= 1;
        Some(&node.value)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Iter<'_> {}

impl<'a> IntoIterator for &'a Sequence {
    type Item = &'a [u8];
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<V: Into<Vec<u8>>> FromIterator<V> for Sequence {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        let mut seq = Sequence::new();
        for value in iter {
            seq.push_back(value.into());
        }
        seq
    }
}

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.iter().map(String::from_utf8_lossy))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abcde() -> Sequence {
        ["a", "b", "c", "d", "e"].into_iter().collect()
    }

    fn strs(items: Vec<Vec<u8>>) -> Vec<String> {
        items
            .into_iter()
            .map(|v| String::from_utf8(v).unwrap())
            .collect()
    }

    // ── Push / pop ────────────────────────────────────────────────────────────

    #[test]
    fn new_sequence_is_empty() {
        let mut seq = Sequence::new();
        assert_eq!(seq.len(), 0);
        assert!(seq.is_empty());
        assert_eq!(seq.pop_front(), None);
        assert_eq!(seq.pop_back(), None);
    }

    #[test]
    fn push_back_keeps_insertion_order() {
        let mut seq = Sequence::new();
        seq.push_back(b"a".to_vec());
        seq.push_back(b"b".to_vec());
        seq.push_back(b"c".to_vec());
        assert_eq!(seq.len(), 3);
        assert_eq!(strs(seq.range(0, -1)), ["a", "b", "c"]);
    }

    #[test]
    fn push_front_reverses_insertion_order() {
        let mut seq = Sequence::new();
        seq.push_front(b"a".to_vec());
        seq.push_front(b"b".to_vec());
        seq.push_front(b"c".to_vec());
        assert_eq!(strs(seq.range(0, -1)), ["c", "b", "a"]);
    }

    #[test]
    fn pops_take_from_both_ends() {
        let mut seq = abcde();
        assert_eq!(seq.pop_front().as_deref(), Some(&b"a"[..]));
        assert_eq!(seq.pop_back().as_deref(), Some(&b"e"[..]));
        assert_eq!(seq.len(), 3);
        assert_eq!(strs(seq.range(0, -1)), ["b", "c", "d"]);
    }

    #[test]
    fn pop_back_on_single_element_empties_list() {
        let mut seq: Sequence = ["only"].into_iter().collect();
        assert_eq!(seq.pop_back().as_deref(), Some(&b"only"[..]));
        assert!(seq.is_empty());
        // The list is usable again after draining from the tail.
        seq.push_front(b"x".to_vec());
        assert_eq!(strs(seq.range(0, -1)), ["x"]);
    }

    #[test]
    fn mixed_ends_stay_consistent_after_draining() {
        let mut seq = Sequence::new();
        for i in 0..10 {
            if i % 2 == 0 {
                seq.push_back(i.to_string().into_bytes());
            } else {
                seq.push_front(i.to_string().into_bytes());
            }
        }
        assert_eq!(
            strs(seq.range(0, -1)),
            ["9", "7", "5", "3", "1", "0", "2", "4", "6", "8"]
        );
        while seq.pop_front().is_some() {}
        assert_eq!(seq.len(), 0);
        assert!(seq.range(0, -1).is_empty());
    }

    #[test]
    fn freed_slots_are_reused() {
        let mut seq = abcde();
        seq.pop_front();
        seq.pop_front();
        seq.push_back(b"f".to_vec());
        seq.push_back(b"g".to_vec());
        assert_eq!(seq.slots.len(), 5);
        assert_eq!(strs(seq.range(0, -1)), ["c", "d", "e", "f", "g"]);
    }

    #[test]
    fn drained_arena_is_compacted() {
        let mut seq: Sequence = (0..1000).map(|i| i.to_string()).collect();
        for _ in 0..495 {
            seq.pop_front();
            seq.pop_back();
        }
        assert_eq!(seq.len(), 10);
        assert!(seq.slots.len() < COMPACT_MIN_SLOTS, "arena kept {} slots", seq.slots.len());
        let expected: Vec<String> = (495..505).map(|i| i.to_string()).collect();
        assert_eq!(strs(seq.range(0, -1)), expected);

        seq.push_front(b"head".to_vec());
        seq.push_back(b"tail".to_vec());
        assert_eq!(seq.pop_front().as_deref(), Some(&b"head"[..]));
        assert_eq!(seq.pop_back().as_deref(), Some(&b"tail"[..]));
        assert_eq!(seq.len(), 10);
    }

    #[test]
    fn small_arena_keeps_vacant_slots() {
        let mut seq: Sequence = (0..40).map(|i| i.to_string()).collect();
        for _ in 0..38 {
            seq.pop_front();
        }
        assert_eq!(seq.slots.len(), 40);
        assert_eq!(strs(seq.range(0, -1)), ["38", "39"]);
    }

    #[test]
    fn iter_reports_exact_length() {
        let seq = abcde();
        assert_eq!(seq.iter().len(), 5);
        assert_eq!(seq.iter().next(), Some(&b"a"[..]));
    }

    // ── Range ─────────────────────────────────────────────────────────────────

    #[test]
    fn range_negative_tail_window() {
        assert_eq!(strs(abcde().range(-3, -1)), ["c", "d", "e"]);
    }

    #[test]
    fn range_zero_to_minus_one_is_whole_list() {
        assert_eq!(strs(abcde().range(0, -1)), ["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn range_past_end_is_empty() {
        assert!(abcde().range(10, 20).is_empty());
    }

    #[test]
    fn range_end_past_tail_is_clamped() {
        assert_eq!(strs(abcde().range(1, 100)), ["b", "c", "d", "e"]);
    }

    #[test]
    fn range_inclusive_single_element() {
        assert_eq!(strs(abcde().range(2, 2)), ["c"]);
    }

    #[test]
    fn range_inverted_bounds_is_empty() {
        assert!(abcde().range(3, 1).is_empty());
        assert!(abcde().range(-1, -3).is_empty());
    }

    #[test]
    fn range_start_before_head_is_clamped() {
        assert_eq!(strs(abcde().range(-10, 1)), ["a", "b"]);
        assert_eq!(strs(abcde().range(-10, -1)), ["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn range_end_before_head_is_empty() {
        assert!(abcde().range(0, -10).is_empty());
    }

    #[test]
    fn range_on_empty_sequence_is_empty() {
        assert!(Sequence::new().range(0, -1).is_empty());
        assert!(Sequence::new().range(-1, 0).is_empty());
    }

    #[test]
    fn range_handles_extreme_bounds() {
        assert_eq!(strs(abcde().range(i64::MIN, i64::MAX)).len(), 5);
        assert!(abcde().range(i64::MAX, i64::MIN).is_empty());
    }
}
