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

//! Compact node
//!
//! A densely packed sorted array of up to sixteen hash-annotated entry
//! references sharing a confirmed common prefix. Probes scan linearly,
//! rejecting slots on the 16-bit hash before paying for a suffix compare.
//!
//! The node keeps an immutable shape: any size change produces a freshly
//! built node and retires the old one, so a node's entry array is never
//! resized in place.

use std::cmp::Ordering;

use smallvec::SmallVec;

use crate::entry::{HashedRef, KvEntry, SortedSource};
use crate::key::hash_key;

/// Maximum entries in a compact node; one over this re-bulks the group.
pub(crate) const CNODE_CAPACITY: usize = 16;

#[derive(Debug)]
pub(crate) struct CompactNode {
    ccpl: u32,
    entries: SmallVec<[HashedRef; CNODE_CAPACITY]>,
}

impl CompactNode {
    /// Build from a sorted source range. `ccpl` is the prefix length the
    /// enclosing context has already confirmed for every key in the range.
    pub(crate) fn build<S: SortedSource>(kvs: &S, l: usize, r: usize, ccpl: usize) -> Box<Self> {
        let mut entries = SmallVec::with_capacity(r - l);
        for i in l..r {
            let e = kvs.make_entry(i);
            entries.push(unsafe { HashedRef::new(e) });
        }
        Box::new(CompactNode { ccpl: ccpl as u32, entries })
    }

    /// Promote a single entry plus a new key into a two-entry node.
    /// `lo` must sort before `hi`.
    ///
    /// # Safety
    /// Both pointers must reference live entries.
    pub(crate) unsafe fn from_pair(lo: *mut KvEntry, hi: *mut KvEntry, ccpl: usize) -> Box<Self> {
        let mut entries = SmallVec::new();
        entries.push(unsafe { HashedRef::new(lo) });
        entries.push(unsafe { HashedRef::new(hi) });
        Box::new(CompactNode { ccpl: ccpl as u32, entries })
    }

    #[inline]
    pub(crate) fn key_cnt(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub(crate) fn ccpl(&self) -> usize {
        self.ccpl as usize
    }

    #[inline]
    pub(crate) fn has_room(&self) -> bool {
        self.entries.len() < CNODE_CAPACITY
    }

    #[inline]
    pub(crate) fn more_than_two(&self) -> bool {
        self.entries.len() > 2
    }

    #[inline]
    pub(crate) fn entry_at(&self, i: usize) -> *mut KvEntry {
        self.entries[i].entry()
    }

    /// Hash-probe for `key`; a hash hit is confirmed by a suffix compare.
    ///
    /// # Safety
    /// All referenced entries must be live.
    pub(crate) unsafe fn search(&self, key: &[u8]) -> Option<*mut KvEntry> {
        unsafe { self.find_slot(key).map(|i| self.entries[i].entry()) }
    }

    /// As [`Self::search`], but reports the slot index (for cursors).
    ///
    /// # Safety
    /// All referenced entries must be live.
    pub(crate) unsafe fn find_slot(&self, key: &[u8]) -> Option<usize> {
        let hv = hash_key(key);
        for (i, r) in self.entries.iter().enumerate() {
            if r.hash() != hv {
                continue;
            }
            let entry = unsafe { &*r.entry() };
            if entry.suffix_matches(key, self.ccpl as usize) {
                return Some(i);
            }
        }
        None
    }

    /// Insert into a node with spare capacity. On success the old node is
    /// consumed and a one-larger replacement is returned with the new entry
    /// spliced in sorted position; on a duplicate key the node is returned
    /// unchanged.
    ///
    /// # Safety
    /// All referenced entries must be live.
    pub(crate) unsafe fn insert_with_room(
        self: Box<Self>,
        key: &[u8],
        value: u64,
    ) -> (Box<Self>, bool) {
        debug_assert!(self.has_room());
        let cut = match unsafe { self.splice_position(key) } {
            Some(cut) => cut,
            None => return (self, false),
        };
        (unsafe { self.rebuild_with(cut, key, value) }, true)
    }

    /// Update in place on a hash-confirmed match (returning the old value),
    /// otherwise insert as [`Self::insert_with_room`] and return 0.
    ///
    /// # Safety
    /// All referenced entries must be live.
    pub(crate) unsafe fn upsert_with_room(
        self: Box<Self>,
        key: &[u8],
        value: u64,
    ) -> (Box<Self>, u64) {
        if let Some(i) = unsafe { self.find_slot(key) } {
            let entry = unsafe { &mut *self.entries[i].entry() };
            let old = entry.value();
            entry.set_value(value);
            return (self, old);
        }
        let cut = unsafe { self.splice_position(key) }
            .expect("hash probe found no match, key cannot be present");
        (unsafe { self.rebuild_with(cut, key, value) }, 0)
    }

    /// Remove from a node that keeps at least two entries afterwards.
    /// On a match the entry is freed and a one-smaller node returned.
    ///
    /// # Safety
    /// All referenced entries must be live.
    pub(crate) unsafe fn remove_with_room(self: Box<Self>, key: &[u8]) -> (Box<Self>, bool) {
        debug_assert!(self.more_than_two());
        let hit = match unsafe { self.find_slot(key) } {
            Some(i) => i,
            None => return (self, false),
        };
        unsafe { drop(Box::from_raw(self.entries[hit].entry())) };
        let mut entries = SmallVec::with_capacity(self.entries.len() - 1);
        for (i, r) in self.entries.iter().enumerate() {
            if i != hit {
                entries.push(*r);
            }
        }
        (Box::new(CompactNode { ccpl: self.ccpl, entries }), true)
    }

    /// Remove from a two-entry node. On a match the matched entry is freed,
    /// the node retired, and the survivor returned for the caller to install
    /// as a single item; on a miss the node is returned unchanged.
    ///
    /// # Safety
    /// All referenced entries must be live.
    pub(crate) unsafe fn degrade(self: Box<Self>, key: &[u8]) -> Result<*mut KvEntry, Box<Self>> {
        debug_assert_eq!(self.entries.len(), 2);
        match unsafe { self.find_slot(key) } {
            Some(hit) => {
                unsafe { drop(Box::from_raw(self.entries[hit].entry())) };
                Ok(self.entries[1 - hit].entry())
            }
            None => Err(self),
        }
    }

    /// Overflow path: drain all entries plus a fresh one for `key` into a
    /// sorted vector, retiring the node, so the caller can re-bulk the
    /// group. A duplicate key returns the node unchanged instead.
    ///
    /// # Safety
    /// All referenced entries must be live.
    pub(crate) unsafe fn extract_with_new(
        self: Box<Self>,
        key: &[u8],
        value: u64,
    ) -> Result<(Vec<*mut KvEntry>, usize), Box<Self>> {
        let cut = match unsafe { self.splice_position(key) } {
            Some(cut) => cut,
            None => return Err(self),
        };
        let ccpl = self.ccpl as usize;
        let mut out = Vec::with_capacity(self.entries.len() + 1);
        out.extend(self.entries[..cut].iter().map(|r| r.entry()));
        out.push(KvEntry::new_raw(key, value));
        out.extend(self.entries[cut..].iter().map(|r| r.entry()));
        Ok((out, ccpl))
    }

    /// Drain the entries in sorted order, retiring the node.
    pub(crate) fn extract_into(self: Box<Self>, out: &mut Vec<*mut KvEntry>) {
        out.extend(self.entries.iter().map(|r| r.entry()));
    }

    /// Sorted insertion position for `key`, or `None` if the key is already
    /// present. Uses full suffix compares (not the hash) so duplicates are
    /// detected exactly.
    unsafe fn splice_position(&self, key: &[u8]) -> Option<usize> {
        let ccpl = self.ccpl as usize;
        for (i, r) in self.entries.iter().enumerate() {
            let entry = unsafe { &*r.entry() };
            match entry.keycmp(key, ccpl) {
                Ordering::Equal => return None,
                // probe sorts before this entry
                Ordering::Less => return Some(i),
                Ordering::Greater => {}
            }
        }
        Some(self.entries.len())
    }

    unsafe fn rebuild_with(self: Box<Self>, cut: usize, key: &[u8], value: u64) -> Box<Self> {
        let mut entries = SmallVec::with_capacity(self.entries.len() + 1);
        entries.extend_from_slice(&self.entries[..cut]);
        entries.push(unsafe { HashedRef::new(KvEntry::new_raw(key, value)) });
        entries.extend_from_slice(&self.entries[cut..]);
        Box::new(CompactNode { ccpl: self.ccpl, entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::OwnedEntries;

    fn make(keys: &[&[u8]]) -> Box<CompactNode> {
        let entries: Vec<*mut KvEntry> = keys
            .iter()
            .enumerate()
            .map(|(i, k)| KvEntry::new_raw(k, i as u64))
            .collect();
        CompactNode::build(&OwnedEntries(entries), 0, keys.len(), 0)
    }

    fn teardown(node: Box<CompactNode>) {
        let mut out = Vec::new();
        node.extract_into(&mut out);
        for e in out {
            unsafe { drop(Box::from_raw(e)) };
        }
    }

    #[test]
    fn search_hits_and_misses() {
        let node = make(&[b"alpha", b"beta", b"gamma"]);
        unsafe {
            assert!(node.search(b"beta").is_some());
            assert_eq!((*node.search(b"gamma").unwrap()).value(), 2);
            assert!(node.search(b"delta").is_none());
        }
        teardown(node);
    }

    #[test]
    fn insert_keeps_sorted_order() {
        let node = make(&[b"b", b"d", b"f"]);
        let (node, ok) = unsafe { node.insert_with_room(b"c", 9) };
        assert!(ok);
        assert_eq!(node.key_cnt(), 4);
        let keys: Vec<&[u8]> = (0..4).map(|i| unsafe { (*node.entry_at(i)).key() }).collect();
        assert_eq!(keys, vec![&b"b"[..], b"c", b"d", b"f"]);
        let (node, ok) = unsafe { node.insert_with_room(b"c", 10) };
        assert!(!ok, "duplicate insert must fail");
        teardown(node);
    }

    #[test]
    fn upsert_updates_in_place() {
        let node = make(&[b"b", b"d"]);
        let (node, old) = unsafe { node.upsert_with_room(b"d", 42) };
        assert_eq!(old, 1);
        unsafe { assert_eq!((*node.search(b"d").unwrap()).value(), 42) };
        let (node, old) = unsafe { node.upsert_with_room(b"e", 5) };
        assert_eq!(old, 0);
        assert_eq!(node.key_cnt(), 3);
        teardown(node);
    }

    #[test]
    fn remove_hits_and_misses() {
        let node = make(&[b"b", b"d", b"f"]);
        let (node, ok) = unsafe { node.remove_with_room(b"d") };
        assert!(ok);
        assert_eq!(node.key_cnt(), 2);
        unsafe { assert!(node.search(b"d").is_none()) };
        let missing = unsafe { node.degrade(b"zz") };
        let node = missing.expect_err("absent key must leave the node intact");
        assert_eq!(node.key_cnt(), 2);
        teardown(node);
    }

    #[test]
    fn degrade_returns_survivor() {
        let node = make(&[b"b", b"d"]);
        let survivor = unsafe { node.degrade(b"b") }.expect("key present");
        unsafe {
            assert_eq!((*survivor).key(), b"d");
            drop(Box::from_raw(survivor));
        }
    }

    #[test]
    fn overflow_extraction_splices_new_key() {
        let node = make(&[b"b", b"d", b"f"]);
        let (entries, ccpl) = unsafe { node.extract_with_new(b"e", 7) }.expect("not a duplicate");
        assert_eq!(ccpl, 0);
        let keys: Vec<&[u8]> = entries.iter().map(|&e| unsafe { (*e).key() }).collect();
        assert_eq!(keys, vec![&b"b"[..], b"d", b"e", b"f"]);
        for e in entries {
            unsafe { drop(Box::from_raw(e)) };
        }
    }
}
