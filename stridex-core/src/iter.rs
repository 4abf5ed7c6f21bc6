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

//! Ordered traversal
//!
//! A [`Cursor`] walks the tree in ascending key order across all leaf
//! shapes: inner-node slots left to right, compact-node entries in place,
//! singletons, and embedded tries through their own cursors. The cursor
//! borrows the index shared, so the borrow checker rejects structural
//! mutation while any cursor is live; the invalidation hazard of iterating
//! a self-reorganising structure is unrepresentable instead of documented.

use std::marker::PhantomData;
use std::ptr;

use smallvec::SmallVec;

use crate::cnode::CompactNode;
use crate::entry::KvEntry;
use crate::index::StringIndex;
use crate::item::{Item, ItemTag};
use crate::node::{InnerNode, predict_pos};
use crate::trie::TrieCursor;

/// One level of the cursor's position: an inner node with the current slot
/// index, or a compact node with the current entry index.
#[derive(Clone, Copy)]
enum Frame {
    Inner { node: *const InnerNode, idx: usize },
    CNode { node: *const CompactNode, idx: usize },
}

/// A position in the index, created by [`StringIndex::find`] (exact-anchor)
/// or [`StringIndex::begin`]. Also a standard [`Iterator`] over
/// `(&[u8], u64)` pairs starting at its position.
pub struct Cursor<'a> {
    frames: SmallVec<[Frame; 16]>,
    trie: Option<TrieCursor>,
    current: *mut KvEntry,
    valid: bool,
    finished: bool,
    _index: PhantomData<&'a StringIndex>,
}

impl<'a> Cursor<'a> {
    fn new() -> Self {
        Cursor {
            frames: SmallVec::new(),
            trie: None,
            current: ptr::null_mut(),
            valid: true,
            finished: false,
            _index: PhantomData,
        }
    }

    fn invalid() -> Self {
        let mut cur = Self::new();
        cur.valid = false;
        cur.finished = true;
        cur
    }

    /// Exact-anchor construction: descend like a lookup, recording every
    /// inner-node level so the scan can continue past the anchor's subtree.
    /// No exact match means an invalid cursor.
    pub(crate) fn find(index: &'a StringIndex, key: &[u8]) -> Self {
        if key.is_empty() {
            return Self::invalid();
        }
        let mut cur = Self::new();
        let model = index.model();
        let mut ccpl = 0usize;
        let mut item = index.root_item();
        loop {
            match item.tag() {
                ItemTag::Empty => return Self::invalid(),
                ItemTag::Single => {
                    let entry = item.entry_ptr();
                    if unsafe { (*entry).suffix_matches(key, ccpl) } {
                        cur.current = entry;
                        return cur;
                    }
                    return Self::invalid();
                }
                ItemTag::CNode => {
                    let node = item.cnode_ptr();
                    match unsafe { (*node).find_slot(key) } {
                        Some(i) => {
                            cur.frames.push(Frame::CNode { node, idx: i });
                            cur.current = unsafe { (*node).entry_at(i) };
                            return cur;
                        }
                        None => return Self::invalid(),
                    }
                }
                ItemTag::Trie => {
                    let tc = unsafe { TrieCursor::find(item.trie().root_ptr(), key) };
                    if tc.at_end() {
                        return Self::invalid();
                    }
                    cur.current = tc.current();
                    cur.trie = Some(tc);
                    return cur;
                }
                ItemTag::Inner => {
                    let node = item.inner_ptr();
                    let pos = predict_pos(unsafe { &*node }, key, &mut ccpl, model);
                    cur.frames.push(Frame::Inner { node, idx: pos });
                    item = unsafe { (*node).items[pos] };
                }
            }
        }
    }

    /// Cursor at the smallest key; exhausted immediately on an empty index.
    pub(crate) fn first(index: &'a StringIndex) -> Self {
        let mut cur = Self::new();
        if !unsafe { cur.descend_first(index.root_item()) } {
            cur.finished = true;
        }
        cur
    }

    /// The cursor points at a real entry. A `find` miss yields an invalid
    /// cursor that stays invalid.
    #[inline]
    pub fn valid(&self) -> bool {
        self.valid
    }

    /// The cursor has walked off the last entry.
    #[inline]
    pub fn at_end(&self) -> bool {
        self.finished
    }

    /// The current key/value pair, if the cursor is on an entry.
    #[inline]
    pub fn entry(&self) -> Option<(&'a [u8], u64)> {
        if !self.valid || self.finished || self.current.is_null() {
            return None;
        }
        let entry = unsafe { &*self.current };
        Some((entry.key(), entry.value()))
    }

    /// The current key, if any.
    #[inline]
    pub fn key(&self) -> Option<&'a [u8]> {
        self.entry().map(|(k, _)| k)
    }

    /// The current value, if any.
    #[inline]
    pub fn value(&self) -> Option<u64> {
        self.entry().map(|(_, v)| v)
    }

    /// Step to the next entry in ascending key order.
    pub fn advance(&mut self) {
        if !self.valid || self.finished {
            return;
        }

        // inside an embedded trie the trie cursor leads; the frame stack
        // resumes once the trie is exhausted
        if let Some(tc) = self.trie.as_mut() {
            unsafe { tc.advance() };
            if !tc.at_end() {
                self.current = tc.current();
                return;
            }
            self.trie = None;
        }

        loop {
            let Some(&top) = self.frames.last() else {
                self.finished = true;
                self.current = ptr::null_mut();
                return;
            };
            match top {
                Frame::CNode { node, idx } => {
                    let n = unsafe { &*node };
                    let next = idx + 1;
                    if next < n.key_cnt() {
                        self.set_top_idx(next);
                        self.current = n.entry_at(next);
                        return;
                    }
                    self.frames.pop();
                }
                Frame::Inner { node, idx } => {
                    let n = unsafe { &*node };
                    let len = n.items.len();
                    let mut i = idx + 1;
                    let mut descended = false;
                    while i < len {
                        let child = n.items[i];
                        if !child.is_empty() {
                            self.set_top_idx(i);
                            if unsafe { self.descend_first(child) } {
                                descended = true;
                                break;
                            }
                            // an emptied trie produced nothing; keep scanning
                        }
                        i += 1;
                    }
                    if descended {
                        return;
                    }
                    self.frames.pop();
                }
            }
        }
    }

    #[inline]
    fn set_top_idx(&mut self, new_idx: usize) {
        match self.frames.last_mut() {
            Some(Frame::Inner { idx, .. }) | Some(Frame::CNode { idx, .. }) => *idx = new_idx,
            None => unreachable!("set_top_idx on empty stack"),
        }
    }

    /// Position on the smallest entry under `item`, recording frames on the
    /// way down. Returns false when the subtree holds no entries (an empty
    /// slot or an emptied trie), leaving the stack as it was.
    unsafe fn descend_first(&mut self, item: Item) -> bool {
        match item.tag() {
            ItemTag::Empty => false,
            ItemTag::Single => {
                self.current = item.entry_ptr();
                true
            }
            ItemTag::CNode => {
                let node = item.cnode_ptr();
                self.frames.push(Frame::CNode { node, idx: 0 });
                self.current = unsafe { (*node).entry_at(0) };
                true
            }
            ItemTag::Trie => {
                let tc = unsafe { TrieCursor::first(item.trie().root_ptr()) };
                if tc.at_end() {
                    return false;
                }
                self.current = tc.current();
                self.trie = Some(tc);
                true
            }
            ItemTag::Inner => {
                let node = item.inner_ptr();
                let len = unsafe { (&(*node).items).len() };
                for i in 0..len {
                    let child = unsafe { (*node).items[i] };
                    if child.is_empty() {
                        continue;
                    }
                    self.frames.push(Frame::Inner { node, idx: i });
                    if unsafe { self.descend_first(child) } {
                        return true;
                    }
                    self.frames.pop();
                }
                false
            }
        }
    }
}

impl<'a> Iterator for Cursor<'a> {
    type Item = (&'a [u8], u64);

    fn next(&mut self) -> Option<Self::Item> {
        let out = self.entry()?;
        self.advance();
        Some(out)
    }
}

impl std::fmt::Debug for Cursor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("valid", &self.valid)
            .field("at_end", &self.finished)
            .field("key", &self.key())
            .finish()
    }
}
