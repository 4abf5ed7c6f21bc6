// SPDX-License-Identifier: AGPL-3.0-or-later
// Stridex - Hybrid Learned String Index
// Copyright (C) 2026 Sushanth Reddy Vanagala (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Embedded radix trie
//!
//! The trie-shaped leaf substructure: a compressed radix trie over full
//! keys whose root handle is a single pointer word, so it embeds directly in
//! a tagged item. It is a complete ordered string map of its own (lookup,
//! insert, upsert, remove, sorted bulk construction, in-order draining, and
//! cursors) and the rest of the index treats it as opaque.
//!
//! Structure: every node carries a compressed edge label, an optional
//! terminal entry (a key ending exactly at the node), and children sorted by
//! the first byte of their labels. Nodes without a terminal entry always
//! have at least two children (one for the root); removal re-merges
//! pass-through nodes to keep that invariant.

use std::ptr;

use smallvec::SmallVec;

use crate::entry::KvEntry;
use crate::key::common_prefix_len;

pub(crate) struct TrieNode {
    label: Box<[u8]>,
    /// Entry whose key ends exactly at this node; null if none.
    entry: *mut KvEntry,
    /// Children ordered by the first byte of their (non-empty) labels.
    children: SmallVec<[*mut TrieNode; 4]>,
}

/// Handle to a trie: one pointer word, null when empty.
pub(crate) struct Trie {
    root: *mut TrieNode,
}

#[inline]
unsafe fn child_search(children: &[*mut TrieNode], byte: u8) -> Result<usize, usize> {
    children.binary_search_by(|&c| unsafe { (*c).label[0].cmp(&byte) })
}

impl Trie {
    #[inline]
    pub(crate) fn empty() -> Self {
        Trie { root: ptr::null_mut() }
    }

    #[inline]
    pub(crate) fn from_root(root: *mut TrieNode) -> Self {
        Trie { root }
    }

    #[inline]
    pub(crate) fn root_ptr(&self) -> *mut TrieNode {
        self.root
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.root.is_null()
    }

    /// Build directly from a sorted, unique entry range.
    ///
    /// # Safety
    /// Every pointer must reference a live entry; ownership of all entries
    /// transfers to the trie.
    pub(crate) unsafe fn bulk_load(entries: &[*mut KvEntry]) -> Self {
        if entries.is_empty() {
            return Trie::empty();
        }
        Trie { root: unsafe { build_range(entries, 0) } }
    }

    /// # Safety
    /// The trie's entries must be live.
    pub(crate) unsafe fn lookup(&self, key: &[u8]) -> Option<*mut KvEntry> {
        let mut node = self.root;
        let mut pos = 0usize;
        while !node.is_null() {
            let n = unsafe { &*node };
            let end = pos + n.label.len();
            if key.len() < end || key[pos..end] != *n.label {
                return None;
            }
            pos = end;
            if pos == key.len() {
                return if n.entry.is_null() { None } else { Some(n.entry) };
            }
            match unsafe { child_search(&n.children, key[pos]) } {
                Ok(i) => node = n.children[i],
                Err(_) => return None,
            }
        }
        None
    }

    /// Insert a new key; false if it already exists.
    ///
    /// # Safety
    /// The trie's entries must be live.
    pub(crate) unsafe fn insert(&mut self, key: &[u8], value: u64) -> bool {
        if self.is_empty() {
            self.root = leaf(key, 0, value);
            return true;
        }
        unsafe { insert_at(&mut self.root, 0, key, value) }
    }

    /// Update an existing key in place returning its old value, or insert
    /// and return 0.
    ///
    /// # Safety
    /// The trie's entries must be live.
    pub(crate) unsafe fn upsert(&mut self, key: &[u8], value: u64) -> u64 {
        if self.is_empty() {
            self.root = leaf(key, 0, value);
            return 0;
        }
        unsafe { upsert_at(&mut self.root, 0, key, value) }
    }

    /// Remove a key, freeing its entry; false if absent. An emptied trie
    /// collapses back to the null handle.
    ///
    /// # Safety
    /// The trie's entries must be live.
    pub(crate) unsafe fn remove(&mut self, key: &[u8]) -> bool {
        if self.is_empty() {
            return false;
        }
        let removed = unsafe { remove_at(&mut self.root, 0, key) };
        if removed {
            let r = unsafe { &*self.root };
            if r.entry.is_null() && r.children.is_empty() {
                unsafe { drop(Box::from_raw(self.root)) };
                self.root = ptr::null_mut();
            }
        }
        removed
    }

    /// Drain all entries in ascending key order, freeing every node.
    ///
    /// # Safety
    /// The trie's entries must be live; ownership of all entries transfers
    /// to `out`.
    pub(crate) unsafe fn extract_into(self, out: &mut Vec<*mut KvEntry>) {
        unsafe { extract_node(self.root, out) };
    }
}

#[inline]
fn leaf(key: &[u8], from: usize, value: u64) -> *mut TrieNode {
    Box::into_raw(Box::new(TrieNode {
        label: key[from..].into(),
        entry: KvEntry::new_raw(key, value),
        children: SmallVec::new(),
    }))
}

/// Recursive sorted construction: the node's label covers the range's common
/// prefix past `depth`, an exact-length key becomes the terminal entry, and
/// the remainder groups by the byte after the prefix.
unsafe fn build_range(entries: &[*mut KvEntry], depth: usize) -> *mut TrieNode {
    let first = unsafe { (*entries[0]).key() };
    let last = unsafe { (*entries[entries.len() - 1]).key() };
    let lcp = common_prefix_len(first, last);
    debug_assert!(lcp >= depth);

    let mut node = Box::new(TrieNode {
        label: first[depth..lcp].into(),
        entry: ptr::null_mut(),
        children: SmallVec::new(),
    });

    let mut i = 0usize;
    if first.len() == lcp {
        // the shortest key ends exactly at this node
        node.entry = entries[0];
        i = 1;
    }
    while i < entries.len() {
        let byte = unsafe { (*entries[i]).key()[lcp] };
        let mut j = i + 1;
        while j < entries.len() && unsafe { (*entries[j]).key()[lcp] } == byte {
            j += 1;
        }
        node.children.push(unsafe { build_range(&entries[i..j], lcp) });
        i = j;
    }
    Box::into_raw(node)
}

unsafe fn insert_at(slot: &mut *mut TrieNode, pos: usize, key: &[u8], value: u64) -> bool {
    let node_ptr = *slot;
    let node = unsafe { &mut *node_ptr };
    let suffix = &key[pos..];
    let m = common_prefix_len(&node.label, suffix);

    if m < node.label.len() {
        unsafe { split_edge(slot, pos, m, key, value) };
        return true;
    }

    let pos = pos + m;
    if pos == key.len() {
        if !node.entry.is_null() {
            return false;
        }
        node.entry = KvEntry::new_raw(key, value);
        return true;
    }
    match unsafe { child_search(&node.children, key[pos]) } {
        Ok(i) => unsafe { insert_at(&mut node.children[i], pos, key, value) },
        Err(i) => {
            node.children.insert(i, leaf(key, pos, value));
            true
        }
    }
}

unsafe fn upsert_at(slot: &mut *mut TrieNode, pos: usize, key: &[u8], value: u64) -> u64 {
    let node_ptr = *slot;
    let node = unsafe { &mut *node_ptr };
    let suffix = &key[pos..];
    let m = common_prefix_len(&node.label, suffix);

    if m < node.label.len() {
        unsafe { split_edge(slot, pos, m, key, value) };
        return 0;
    }

    let pos = pos + m;
    if pos == key.len() {
        if node.entry.is_null() {
            node.entry = KvEntry::new_raw(key, value);
            return 0;
        }
        let entry = unsafe { &mut *node.entry };
        let old = entry.value();
        entry.set_value(value);
        return old;
    }
    match unsafe { child_search(&node.children, key[pos]) } {
        Ok(i) => unsafe { upsert_at(&mut node.children[i], pos, key, value) },
        Err(i) => {
            node.children.insert(i, leaf(key, pos, value));
            0
        }
    }
}

/// The key diverges `m` bytes into this node's label (`pos` is the key
/// offset where the label starts): interpose a new node owning the shared
/// `label[..m]`, with the trimmed original and (unless the key ends at the
/// split point) a fresh leaf as its ordered children.
unsafe fn split_edge(slot: &mut *mut TrieNode, pos: usize, m: usize, key: &[u8], value: u64) {
    let node_ptr = *slot;
    let node = unsafe { &mut *node_ptr };

    let upper_label: Box<[u8]> = node.label[..m].into();
    let lower_label: Box<[u8]> = node.label[m..].into();
    node.label = lower_label;

    let mut upper = Box::new(TrieNode {
        label: upper_label,
        entry: ptr::null_mut(),
        children: SmallVec::new(),
    });

    let split = pos + m;
    if split == key.len() {
        // the key is a strict prefix of the old path
        upper.entry = KvEntry::new_raw(key, value);
        upper.children.push(node_ptr);
    } else {
        let new_leaf = leaf(key, split, value);
        if node.label[0] < key[split] {
            upper.children.push(node_ptr);
            upper.children.push(new_leaf);
        } else {
            upper.children.push(new_leaf);
            upper.children.push(node_ptr);
        }
    }
    *slot = Box::into_raw(upper);
}

unsafe fn remove_at(slot: &mut *mut TrieNode, pos: usize, key: &[u8]) -> bool {
    let node_ptr = *slot;
    let node = unsafe { &mut *node_ptr };
    let suffix = &key[pos..];
    let m = common_prefix_len(&node.label, suffix);
    if m < node.label.len() {
        return false;
    }

    let pos = pos + m;
    let removed = if pos == key.len() {
        if node.entry.is_null() {
            return false;
        }
        unsafe { drop(Box::from_raw(node.entry)) };
        node.entry = ptr::null_mut();
        true
    } else {
        match unsafe { child_search(&node.children, key[pos]) } {
            Ok(i) => {
                let ok = unsafe { remove_at(&mut node.children[i], pos, key) };
                if ok {
                    let child = node.children[i];
                    let c = unsafe { &*child };
                    if c.entry.is_null() && c.children.is_empty() {
                        unsafe { drop(Box::from_raw(child)) };
                        node.children.remove(i);
                    }
                }
                ok
            }
            Err(_) => false,
        }
    };

    if removed && node.entry.is_null() && node.children.len() == 1 {
        // pass-through node: fold its label into the surviving child
        let child_ptr = node.children[0];
        let child = unsafe { &mut *child_ptr };
        let mut merged = Vec::with_capacity(node.label.len() + child.label.len());
        merged.extend_from_slice(&node.label);
        merged.extend_from_slice(&child.label);
        child.label = merged.into_boxed_slice();
        node.children.clear();
        unsafe { drop(Box::from_raw(node_ptr)) };
        *slot = child_ptr;
    }
    removed
}

unsafe fn extract_node(node: *mut TrieNode, out: &mut Vec<*mut KvEntry>) {
    if node.is_null() {
        return;
    }
    let node = unsafe { Box::from_raw(node) };
    if !node.entry.is_null() {
        out.push(node.entry);
    }
    for &child in node.children.iter() {
        unsafe { extract_node(child, out) };
    }
}

/// In-order cursor over a trie. The stack records, per node on the current
/// path, the next child index to visit; the terminal entry of a node is
/// emitted before any of its children (shorter keys sort first).
pub(crate) struct TrieCursor {
    stack: SmallVec<[(*mut TrieNode, usize); 8]>,
    current: *mut KvEntry,
}

impl TrieCursor {
    pub(crate) fn end() -> Self {
        TrieCursor { stack: SmallVec::new(), current: ptr::null_mut() }
    }

    /// Cursor at the smallest key, or END for an empty trie.
    ///
    /// # Safety
    /// The trie must be live for the cursor's lifetime.
    pub(crate) unsafe fn first(root: *mut TrieNode) -> Self {
        let mut cur = Self::end();
        if !root.is_null() {
            unsafe { cur.descend_first(root) };
        }
        cur
    }

    /// Cursor positioned exactly at `key`, or END if the key is absent.
    ///
    /// # Safety
    /// The trie must be live for the cursor's lifetime.
    pub(crate) unsafe fn find(root: *mut TrieNode, key: &[u8]) -> Self {
        let mut cur = Self::end();
        let mut node = root;
        let mut pos = 0usize;
        while !node.is_null() {
            let n = unsafe { &*node };
            let end = pos + n.label.len();
            if key.len() < end || key[pos..end] != *n.label {
                return Self::end();
            }
            pos = end;
            if pos == key.len() {
                if n.entry.is_null() {
                    return Self::end();
                }
                cur.stack.push((node, 0));
                cur.current = n.entry;
                return cur;
            }
            match unsafe { child_search(&n.children, key[pos]) } {
                Ok(i) => {
                    cur.stack.push((node, i + 1));
                    node = n.children[i];
                }
                Err(_) => return Self::end(),
            }
        }
        Self::end()
    }

    #[inline]
    pub(crate) fn at_end(&self) -> bool {
        self.current.is_null()
    }

    #[inline]
    pub(crate) fn current(&self) -> *mut KvEntry {
        self.current
    }

    /// Step to the next key in order, or to END.
    ///
    /// # Safety
    /// The trie must not have been structurally mutated since the cursor was
    /// created.
    pub(crate) unsafe fn advance(&mut self) {
        while let Some(top) = self.stack.last_mut() {
            let n = unsafe { &*top.0 };
            if top.1 < n.children.len() {
                let child = n.children[top.1];
                top.1 += 1;
                unsafe { self.descend_first(child) };
                return;
            }
            self.stack.pop();
        }
        self.current = ptr::null_mut();
    }

    /// Walk down the leftmost path from `node`, stopping at the first
    /// terminal entry. Entry-less nodes always have children, so this
    /// terminates at an entry.
    unsafe fn descend_first(&mut self, mut node: *mut TrieNode) {
        loop {
            self.stack.push((node, 0));
            let n = unsafe { &*node };
            if !n.entry.is_null() {
                self.current = n.entry;
                return;
            }
            self.stack.last_mut().expect("frame just pushed").1 = 1;
            node = n.children[0];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(keys: &[&[u8]]) -> Trie {
        let entries: Vec<*mut KvEntry> = keys
            .iter()
            .enumerate()
            .map(|(i, k)| KvEntry::new_raw(k, i as u64))
            .collect();
        unsafe { Trie::bulk_load(&entries) }
    }

    fn drain_and_free(trie: Trie) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        unsafe { trie.extract_into(&mut out) };
        let keys = out
            .iter()
            .map(|&e| unsafe { (*e).key().to_vec() })
            .collect();
        for e in out {
            unsafe { drop(Box::from_raw(e)) };
        }
        keys
    }

    #[test]
    fn bulk_load_and_lookup() {
        let trie = load(&[b"romane", b"romanus", b"romulus", b"rubens", b"ruber"]);
        unsafe {
            assert_eq!((*trie.lookup(b"romanus").unwrap()).value(), 1);
            assert_eq!((*trie.lookup(b"ruber").unwrap()).value(), 4);
            assert!(trie.lookup(b"roman").is_none());
            assert!(trie.lookup(b"romanes").is_none());
            assert!(trie.lookup(b"z").is_none());
        }
        drain_and_free(trie);
    }

    #[test]
    fn prefix_keys_coexist() {
        let trie = load(&[b"a", b"ab", b"abc"]);
        unsafe {
            assert!(trie.lookup(b"a").is_some());
            assert!(trie.lookup(b"ab").is_some());
            assert!(trie.lookup(b"abc").is_some());
        }
        assert_eq!(
            drain_and_free(trie),
            vec![b"a".to_vec(), b"ab".to_vec(), b"abc".to_vec()]
        );
    }

    #[test]
    fn insert_splits_edges() {
        let mut trie = load(&[b"roman", b"romulus"]);
        unsafe {
            assert!(trie.insert(b"rom", 10));
            assert!(trie.insert(b"rome", 11));
            assert!(!trie.insert(b"roman", 12), "duplicate must fail");
            assert_eq!((*trie.lookup(b"rom").unwrap()).value(), 10);
            assert_eq!((*trie.lookup(b"rome").unwrap()).value(), 11);
            assert_eq!((*trie.lookup(b"roman").unwrap()).value(), 0);
        }
        assert_eq!(
            drain_and_free(trie),
            vec![
                b"rom".to_vec(),
                b"roman".to_vec(),
                b"rome".to_vec(),
                b"romulus".to_vec()
            ]
        );
    }

    #[test]
    fn upsert_protocol() {
        let mut trie = load(&[b"left", b"right"]);
        unsafe {
            assert_eq!(trie.upsert(b"left", 42), 0);
            assert_eq!(trie.upsert(b"left", 43), 42);
            assert_eq!(trie.upsert(b"middle", 7), 0);
            assert_eq!((*trie.lookup(b"middle").unwrap()).value(), 7);
        }
        drain_and_free(trie);
    }

    #[test]
    fn remove_merges_pass_through_nodes() {
        let mut trie = load(&[b"team", b"test", b"toast"]);
        unsafe {
            assert!(trie.remove(b"team"));
            assert!(!trie.remove(b"team"));
            assert!(trie.lookup(b"test").is_some());
            assert!(trie.lookup(b"toast").is_some());
            assert!(trie.remove(b"test"));
            assert!(trie.remove(b"toast"));
            assert!(trie.is_empty());
            assert!(!trie.remove(b"toast"));
        }
    }

    #[test]
    fn remove_keeps_prefix_entries() {
        let mut trie = load(&[b"ab", b"abc", b"abd"]);
        unsafe {
            assert!(trie.remove(b"ab"));
            assert!(trie.lookup(b"abc").is_some());
            assert!(trie.lookup(b"abd").is_some());
        }
        assert_eq!(drain_and_free(trie), vec![b"abc".to_vec(), b"abd".to_vec()]);
    }

    #[test]
    fn cursor_walks_in_order() {
        let keys: &[&[u8]] = &[b"a", b"ab", b"abc", b"b", b"ba", b"c"];
        let trie = load(keys);
        let mut cur = unsafe { TrieCursor::first(trie.root_ptr()) };
        let mut seen = Vec::new();
        while !cur.at_end() {
            seen.push(unsafe { (*cur.current()).key().to_vec() });
            unsafe { cur.advance() };
        }
        let expected: Vec<Vec<u8>> = keys.iter().map(|k| k.to_vec()).collect();
        assert_eq!(seen, expected);
        drain_and_free(trie);
    }

    #[test]
    fn cursor_find_is_exact_anchor() {
        let trie = load(&[b"alpha", b"beta", b"gamma"]);
        let mut cur = unsafe { TrieCursor::find(trie.root_ptr(), b"beta") };
        assert!(!cur.at_end());
        unsafe {
            assert_eq!((*cur.current()).key(), b"beta");
            cur.advance();
            assert_eq!((*cur.current()).key(), b"gamma");
            cur.advance();
        }
        assert!(cur.at_end());

        let missing = unsafe { TrieCursor::find(trie.root_ptr(), b"delta") };
        assert!(missing.at_end());
        drain_and_free(trie);
    }

    #[test]
    fn extraction_is_sorted_after_mutation() {
        let mut trie = load(&[b"m", b"q"]);
        unsafe {
            trie.insert(b"a", 1);
            trie.insert(b"z", 2);
            trie.insert(b"ma", 3);
            trie.remove(b"q");
        }
        assert_eq!(
            drain_and_free(trie),
            vec![b"a".to_vec(), b"m".to_vec(), b"ma".to_vec(), b"z".to_vec()]
        );
    }
}
