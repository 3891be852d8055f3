//! In-memory index search tree
//!
//! A multiway (B-tree) search tree keyed by key hash, with a configurable
//! minimum branching degree `t`: every node except the root holds between
//! `t - 1` and `2t - 1` keys. Lookup, insert and remove are O(log n).
//!
//! The tree lives only in memory; `IndexStore` rebuilds it from the record
//! file at load time.

use super::Index;

/// Ordered multiway search tree mapping key hash → index entry
pub struct SearchTree {
    root: Node,
    min_degree: usize,
    len: usize,
}

struct Node {
    keys: Vec<i32>,
    entries: Vec<Index>,
    children: Vec<Node>,
}

impl SearchTree {
    /// Create an empty tree with the given minimum branching degree (≥ 2)
    pub fn new(min_degree: usize) -> Self {
        Self {
            root: Node::new(),
            min_degree: min_degree.max(2),
            len: 0,
        }
    }

    /// Number of entries in the tree
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Look up the entry for `key`
    pub fn get(&self, key: i32) -> Option<&Index> {
        let mut node = &self.root;
        loop {
            match node.keys.binary_search(&key) {
                Ok(i) => return Some(&node.entries[i]),
                Err(i) => {
                    if node.is_leaf() {
                        return None;
                    }
                    node = &node.children[i];
                }
            }
        }
    }

    /// Mutable lookup
    pub fn get_mut(&mut self, key: i32) -> Option<&mut Index> {
        self.root.get_mut(key)
    }

    /// Insert an entry, returning the previous entry for `key` if present
    pub fn insert(&mut self, key: i32, entry: Index) -> Option<Index> {
        let max_keys = 2 * self.min_degree - 1;
        if self.root.keys.len() == max_keys {
            // Root is full: grow the tree by one level
            let old_root = std::mem::replace(&mut self.root, Node::new());
            self.root.children.push(old_root);
            self.root.split_child(0, self.min_degree);
        }

        let replaced = self.root.insert_nonfull(self.min_degree, key, entry);
        if replaced.is_none() {
            self.len += 1;
        }
        replaced
    }

    /// Remove the entry for `key`, returning it if present
    pub fn remove(&mut self, key: i32) -> Option<Index> {
        let removed = self.root.remove(self.min_degree, key);
        if removed.is_some() {
            self.len -= 1;
        }
        // Shrink the tree when the root was emptied by a merge
        if self.root.keys.is_empty() && !self.root.is_leaf() {
            let child = self.root.children.remove(0);
            self.root = child;
        }
        removed
    }

    /// All entries in ascending key order (debug/test helper)
    pub fn entries(&self) -> Vec<(i32, Index)> {
        let mut out = Vec::with_capacity(self.len);
        self.root.collect_into(&mut out);
        out
    }
}

impl Node {
    fn new() -> Self {
        Self {
            keys: Vec::new(),
            entries: Vec::new(),
            children: Vec::new(),
        }
    }

    fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    fn get_mut(&mut self, key: i32) -> Option<&mut Index> {
        match self.keys.binary_search(&key) {
            Ok(i) => Some(&mut self.entries[i]),
            Err(i) => {
                if self.is_leaf() {
                    None
                } else {
                    self.children[i].get_mut(key)
                }
            }
        }
    }

    /// Split the full child at `i`; its median key moves up into `self`
    fn split_child(&mut self, i: usize, t: usize) {
        let child = &mut self.children[i];
        let mut right = Node::new();
        right.keys = child.keys.split_off(t);
        right.entries = child.entries.split_off(t);
        if !child.is_leaf() {
            right.children = child.children.split_off(t);
        }
        let up_key = child.keys.pop().unwrap();
        let up_entry = child.entries.pop().unwrap();

        self.keys.insert(i, up_key);
        self.entries.insert(i, up_entry);
        self.children.insert(i + 1, right);
    }

    fn insert_nonfull(&mut self, t: usize, key: i32, entry: Index) -> Option<Index> {
        match self.keys.binary_search(&key) {
            Ok(i) => Some(std::mem::replace(&mut self.entries[i], entry)),
            Err(i) => {
                if self.is_leaf() {
                    self.keys.insert(i, key);
                    self.entries.insert(i, entry);
                    None
                } else {
                    let mut i = i;
                    if self.children[i].keys.len() == 2 * t - 1 {
                        self.split_child(i, t);
                        // The promoted key may change which child to descend into
                        match key.cmp(&self.keys[i]) {
                            std::cmp::Ordering::Greater => i += 1,
                            std::cmp::Ordering::Equal => {
                                return Some(std::mem::replace(&mut self.entries[i], entry));
                            }
                            std::cmp::Ordering::Less => {}
                        }
                    }
                    self.children[i].insert_nonfull(t, key, entry)
                }
            }
        }
    }

    fn remove(&mut self, t: usize, key: i32) -> Option<Index> {
        match self.keys.binary_search(&key) {
            Ok(i) => {
                if self.is_leaf() {
                    self.keys.remove(i);
                    Some(self.entries.remove(i))
                } else if self.children[i].keys.len() >= t {
                    // Replace with the in-order predecessor
                    let (pred_key, pred_entry) = self.children[i].take_max(t);
                    self.keys[i] = pred_key;
                    Some(std::mem::replace(&mut self.entries[i], pred_entry))
                } else if self.children[i + 1].keys.len() >= t {
                    // Replace with the in-order successor
                    let (succ_key, succ_entry) = self.children[i + 1].take_min(t);
                    self.keys[i] = succ_key;
                    Some(std::mem::replace(&mut self.entries[i], succ_entry))
                } else {
                    // Both neighbors are minimal: merge and retry below
                    self.merge_children(i);
                    self.children[i].remove(t, key)
                }
            }
            Err(i) => {
                if self.is_leaf() {
                    return None;
                }
                let i = self.ensure_child_capacity(t, i);
                self.children[i].remove(t, key)
            }
        }
    }

    /// Remove and return the maximum entry of this subtree
    fn take_max(&mut self, t: usize) -> (i32, Index) {
        if self.is_leaf() {
            let key = self.keys.pop().unwrap();
            let entry = self.entries.pop().unwrap();
            (key, entry)
        } else {
            let last = self.children.len() - 1;
            let i = self.ensure_child_capacity(t, last);
            self.children[i].take_max(t)
        }
    }

    /// Remove and return the minimum entry of this subtree
    fn take_min(&mut self, t: usize) -> (i32, Index) {
        if self.is_leaf() {
            let key = self.keys.remove(0);
            let entry = self.entries.remove(0);
            (key, entry)
        } else {
            let i = self.ensure_child_capacity(t, 0);
            self.children[i].take_min(t)
        }
    }

    /// Make sure the child at `i` has at least `t` keys before descending,
    /// borrowing from a sibling or merging. Returns the (possibly shifted)
    /// index of the child to descend into.
    fn ensure_child_capacity(&mut self, t: usize, i: usize) -> usize {
        if self.children[i].keys.len() >= t {
            return i;
        }

        if i > 0 && self.children[i - 1].keys.len() >= t {
            // Rotate right: left sibling's max moves up, separator moves down
            let left = &mut self.children[i - 1];
            let sib_key = left.keys.pop().unwrap();
            let sib_entry = left.entries.pop().unwrap();
            let sib_child = if left.is_leaf() {
                None
            } else {
                left.children.pop()
            };

            let down_key = std::mem::replace(&mut self.keys[i - 1], sib_key);
            let down_entry = std::mem::replace(&mut self.entries[i - 1], sib_entry);

            let child = &mut self.children[i];
            child.keys.insert(0, down_key);
            child.entries.insert(0, down_entry);
            if let Some(c) = sib_child {
                child.children.insert(0, c);
            }
            i
        } else if i + 1 < self.children.len() && self.children[i + 1].keys.len() >= t {
            // Rotate left: right sibling's min moves up, separator moves down
            let right = &mut self.children[i + 1];
            let sib_key = right.keys.remove(0);
            let sib_entry = right.entries.remove(0);
            let sib_child = if right.is_leaf() {
                None
            } else {
                Some(right.children.remove(0))
            };

            let down_key = std::mem::replace(&mut self.keys[i], sib_key);
            let down_entry = std::mem::replace(&mut self.entries[i], sib_entry);

            let child = &mut self.children[i];
            child.keys.push(down_key);
            child.entries.push(down_entry);
            if let Some(c) = sib_child {
                child.children.push(c);
            }
            i
        } else if i > 0 {
            self.merge_children(i - 1);
            i - 1
        } else {
            self.merge_children(i);
            i
        }
    }

    /// Merge key `i` and child `i + 1` into child `i`
    fn merge_children(&mut self, i: usize) {
        let key = self.keys.remove(i);
        let entry = self.entries.remove(i);
        let mut right = self.children.remove(i + 1);

        let left = &mut self.children[i];
        left.keys.push(key);
        left.entries.push(entry);
        left.keys.append(&mut right.keys);
        left.entries.append(&mut right.entries);
        left.children.append(&mut right.children);
    }

    fn collect_into(&self, out: &mut Vec<(i32, Index)>) {
        if self.is_leaf() {
            for i in 0..self.keys.len() {
                out.push((self.keys[i], self.entries[i]));
            }
        } else {
            for i in 0..self.keys.len() {
                self.children[i].collect_into(out);
                out.push((self.keys[i], self.entries[i]));
            }
            if let Some(last) = self.children.last() {
                last.collect_into(out);
            }
        }
    }
}
