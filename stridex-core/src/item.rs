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

//! Tagged item words
//!
//! Every slot in the tree is one 64-bit word: a 3-bit type tag in the top
//! bits and a 48-bit pointer payload in the low bits. The five tags cover an
//! empty slot, a single entry, a model node, an embedded trie (the payload
//! is the trie's root handle, not a box around it), and a compact node.
//! Keeping slots at eight bytes keeps inner-node item arrays dense, which is
//! what the learned placement is paying for.

use crate::cnode::CompactNode;
use crate::entry::{KvEntry, PTR_MASK};
use crate::node::InnerNode;
use crate::trie::{Trie, TrieNode};

const TAG_SHIFT: u32 = 61;
const TAG_EMPTY: u64 = 0b000;
const TAG_SINGLE: u64 = 0b001;
const TAG_INNER: u64 = 0b010;
const TAG_TRIE: u64 = 0b011;
const TAG_CNODE: u64 = 0b100;

/// Decoded item type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ItemTag {
    Empty,
    Single,
    Inner,
    Trie,
    CNode,
}

/// One tree slot. `Item(0)` is the empty slot; an emptied trie keeps its
/// tag with a null payload, which is distinct from empty.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct Item(u64);

const _: () = assert!(std::mem::size_of::<Item>() == 8);

impl Item {
    #[inline]
    pub(crate) const fn empty() -> Self {
        Item(0)
    }

    #[inline]
    fn pack(ptr: u64, tag: u64) -> Self {
        Item((ptr & PTR_MASK) | (tag << TAG_SHIFT))
    }

    #[inline]
    pub(crate) fn from_entry(entry: *mut KvEntry) -> Self {
        Self::pack(entry as u64, TAG_SINGLE)
    }

    #[inline]
    pub(crate) fn from_inner(node: *mut InnerNode) -> Self {
        Self::pack(node as u64, TAG_INNER)
    }

    #[inline]
    pub(crate) fn from_cnode(node: *mut CompactNode) -> Self {
        Self::pack(node as u64, TAG_CNODE)
    }

    #[inline]
    pub(crate) fn from_trie(trie: Trie) -> Self {
        Self::pack(trie.root_ptr() as u64, TAG_TRIE)
    }

    #[inline]
    pub(crate) fn tag(self) -> ItemTag {
        match self.0 >> TAG_SHIFT {
            TAG_EMPTY => ItemTag::Empty,
            TAG_SINGLE => ItemTag::Single,
            TAG_INNER => ItemTag::Inner,
            TAG_TRIE => ItemTag::Trie,
            TAG_CNODE => ItemTag::CNode,
            tag => unreachable!("corrupt item tag {tag}"),
        }
    }

    #[inline]
    pub(crate) fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    fn payload(self) -> u64 {
        self.0 & PTR_MASK
    }

    #[inline]
    pub(crate) fn entry_ptr(self) -> *mut KvEntry {
        debug_assert_eq!(self.tag(), ItemTag::Single);
        self.payload() as *mut KvEntry
    }

    #[inline]
    pub(crate) fn inner_ptr(self) -> *mut InnerNode {
        debug_assert_eq!(self.tag(), ItemTag::Inner);
        self.payload() as *mut InnerNode
    }

    #[inline]
    pub(crate) fn cnode_ptr(self) -> *mut CompactNode {
        debug_assert_eq!(self.tag(), ItemTag::CNode);
        self.payload() as *mut CompactNode
    }

    /// Rehydrate the embedded trie handle. The caller re-embeds the handle
    /// after mutating it, since mutations may move the root.
    #[inline]
    pub(crate) fn trie(self) -> Trie {
        debug_assert_eq!(self.tag(), ItemTag::Trie);
        Trie::from_root(self.payload() as *mut TrieNode)
    }
}

impl std::fmt::Debug for Item {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Item({:?}@{:#x})", self.tag(), self.payload())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_all_zero() {
        assert!(Item::empty().is_empty());
        assert_eq!(Item::empty().tag(), ItemTag::Empty);
    }

    #[test]
    fn tags_round_trip() {
        let e = KvEntry::new_raw(b"k", 1);
        let item = Item::from_entry(e);
        assert_eq!(item.tag(), ItemTag::Single);
        assert!(!item.is_empty());
        assert_eq!(item.entry_ptr(), e);
        unsafe { drop(Box::from_raw(e)) };
    }

    #[test]
    fn empty_trie_keeps_its_tag() {
        let item = Item::from_trie(Trie::empty());
        assert_eq!(item.tag(), ItemTag::Trie);
        assert!(!item.is_empty());
        assert!(item.trie().is_empty());
    }
}
