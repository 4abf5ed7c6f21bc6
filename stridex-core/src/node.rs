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

//! Model nodes and the bulk builder
//!
//! An inner node is a learned router: a cached prefix fragment, a local
//! linear calibration over the prefix model's scalar, and a sparse item
//! array twice the size of the key group it was built from. Slots `0` and
//! `len - 1` are boundary slots, reached only by keys that do not share the
//! node's prefix; model predictions are clamped to the interior.
//!
//! [`pmss_bulk`] is the recursive constructor: singles and compact leaves
//! for small groups, then a structure-selection decision between a model
//! node and an embedded trie. Model-node construction is speculative: if
//! the trained model cannot discriminate the group's endpoints or predicts a
//! position inversion, the group falls through to a trie.
//!
//! Mutations repair the structure on the way out: the descent records every
//! inner node it passes, and after a successful leaf change the recorded
//! path is walked from the root, adjusting key counts and re-bulk-loading
//! the first subtree whose occupancy crosses a resize threshold.

use std::cmp::Ordering;

use smallvec::SmallVec;
use tracing::debug;

use crate::cnode::{CNODE_CAPACITY, CompactNode};
use crate::cost_model::{CostModel, Substructure, group_partial_key_length};
use crate::entry::{KvEntry, OwnedEntries, SortedSource};
use crate::item::{Item, ItemTag};
use crate::key::common_prefix_len;
use crate::prefix_model::PrefixModel;
use crate::trie::Trie;

/// Item arrays are built at twice the group size.
pub(crate) const SCALE_FACTOR: usize = 2;

/// A learned inner node. The C layout (header, inline prefix, inline item
/// array in one allocation) is realised as owned buffers behind one node
/// box; the prefix length is `prefix.len()`.
pub(crate) struct InnerNode {
    /// Live entries in this subtree.
    pub(crate) num_keys: usize,
    /// Local linear calibration over the model's scalar.
    pub(crate) k: f64,
    pub(crate) b: f64,
    /// Prefix bytes shared by the whole group beyond the inherited ccpl.
    pub(crate) prefix: Box<[u8]>,
    pub(crate) items: Box<[Item]>,
}

/// Predict the slot for `key` in `node`, advancing `ccpl` past the node's
/// cached prefix. Keys that sort outside the prefix go to the boundary
/// slots without consuming prefix bytes; everything else is model-predicted
/// and clamped to the interior `[1, len - 2]`.
pub(crate) fn predict_pos(
    node: &InnerNode,
    key: &[u8],
    ccpl: &mut usize,
    model: &PrefixModel,
) -> usize {
    let icpl = node.prefix.len();
    if icpl > 0 {
        let avail = key.len().saturating_sub(*ccpl);
        let n = icpl.min(avail);
        match node.prefix[..n].cmp(&key[*ccpl..*ccpl + n]) {
            Ordering::Less => return node.items.len() - 1,
            Ordering::Greater => return 0,
            Ordering::Equal => {
                if n < icpl {
                    // key exhausted inside the prefix, so it sorts below
                    return 0;
                }
            }
        }
    }

    let size = node.items.len() - 2;
    let skip = *ccpl + icpl;
    let raw = if skip > 0 {
        model.predict_slot(key, size, skip, node.k, node.b)
    } else {
        model.predict_slot_from_start(key, size, node.k, node.b)
    };
    *ccpl += icpl;
    (raw + 1).clamp(1, size as i64) as usize
}

/// Build the item for a sorted unique range `[l, r)` whose keys all share
/// `ccpl` confirmed bytes: a single entry, a compact node, a model node, or
/// an embedded trie, recursing per predicted-slot group.
pub(crate) fn pmss_bulk<S: SortedSource>(
    kvs: &S,
    l: usize,
    r: usize,
    ccpl: usize,
    model: &PrefixModel,
    cost: &CostModel,
) -> Item {
    let size = r - l;
    if size == 0 {
        return Item::empty();
    }
    if size == 1 {
        return Item::from_entry(kvs.make_entry(l));
    }
    if size <= CNODE_CAPACITY {
        return Item::from_cnode(Box::into_raw(CompactNode::build(kvs, l, r, ccpl)));
    }

    if cost.select(size, group_partial_key_length(kvs, l, r)) == Substructure::ModelNode {
        if let Some(node) = try_build_model_node(kvs, l, r, ccpl, model, cost) {
            return Item::from_inner(Box::into_raw(node));
        }
    }

    let entries: Vec<*mut KvEntry> = (l..r).map(|i| kvs.make_entry(i)).collect();
    Item::from_trie(unsafe { Trie::bulk_load(&entries) })
}

/// Speculative model-node construction. Fails (before creating any entry or
/// child) when the model cannot separate the endpoints or predicts slots out
/// of order; the caller then falls back to a trie.
fn try_build_model_node<S: SortedSource>(
    kvs: &S,
    l: usize,
    r: usize,
    ccpl: usize,
    model: &PrefixModel,
    cost: &CostModel,
) -> Option<Box<InnerNode>> {
    let size = r - l;
    let first = kvs.key(l);
    let last = kvs.key(r - 1);
    let gcpl = common_prefix_len(first, last);
    let icpl = gcpl - ccpl;
    let item_len = size * SCALE_FACTOR;

    let min_cdf = model.cdf(first, gcpl);
    let max_cdf = model.cdf(last, gcpl);
    if max_cdf <= min_cdf {
        return None;
    }
    let k = 1.0 / (max_cdf - min_cdf);
    let b = min_cdf / (min_cdf - max_cdf);

    let mut node = Box::new(InnerNode {
        num_keys: size,
        k,
        b,
        prefix: first[ccpl..gcpl].into(),
        items: vec![Item::empty(); item_len].into_boxed_slice(),
    });

    // the calibrated model must put the endpoints in distinct slots
    let mut c_first = ccpl;
    let mut c_last = ccpl;
    if predict_pos(&node, first, &mut c_first, model) >= predict_pos(&node, last, &mut c_last, model)
    {
        return None;
    }

    // group the range into runs of equal predicted slot; predictions must be
    // non-decreasing or the model is lying about the order
    let mut runs: Vec<(usize, usize, usize)> = Vec::new();
    let mut prev_slot: Option<usize> = None;
    let mut run_start = l;
    for i in l..r {
        let mut c = ccpl;
        let slot = predict_pos(&node, kvs.key(i), &mut c, model);
        match prev_slot {
            None => run_start = i,
            Some(p) if slot < p => return None,
            Some(p) if slot > p => {
                runs.push((p, run_start, i));
                run_start = i;
            }
            Some(_) => {}
        }
        prev_slot = Some(slot);
    }
    runs.push((prev_slot.expect("group is non-empty"), run_start, r));

    for (slot, s, e) in runs {
        node.items[slot] = pmss_bulk(kvs, s, e, gcpl, model, cost);
    }
    Some(node)
}

/// Drain a subtree's entries in ascending key order, destroying every inner
/// node, compact node, and trie on the way. Entry ownership moves to `out`.
///
/// # Safety
/// `item` must be the sole reference to a live subtree; it must not be used
/// afterwards.
pub(crate) unsafe fn extract_item(item: Item, out: &mut Vec<*mut KvEntry>) {
    match item.tag() {
        ItemTag::Empty => {}
        ItemTag::Single => out.push(item.entry_ptr()),
        ItemTag::CNode => {
            let node = unsafe { Box::from_raw(item.cnode_ptr()) };
            node.extract_into(out);
        }
        ItemTag::Trie => unsafe { item.trie().extract_into(out) },
        ItemTag::Inner => {
            let node = unsafe { Box::from_raw(item.inner_ptr()) };
            for &child in node.items.iter() {
                unsafe { extract_item(child, out) };
            }
        }
    }
}

/// One recorded level of a write's descent.
#[derive(Clone, Copy)]
struct PathFrame {
    node: *mut InnerNode,
    /// The parent slot holding `node`, for reinstalling a rebuilt subtree.
    slot: *mut Item,
    /// Confirmed prefix length on arrival at `slot`.
    ccpl: usize,
}

/// The ancestor path of a write, walked after the leaf mutation to adjust
/// key counts and to trigger subtree rebuilds.
pub(crate) struct PathStack {
    frames: SmallVec<[PathFrame; 32]>,
}

impl PathStack {
    pub(crate) fn new() -> Self {
        PathStack { frames: SmallVec::new() }
    }

    /// Record an inner-node level. `slot` must currently hold an Inner item.
    ///
    /// # Safety
    /// `slot` must be valid until [`Self::apply`].
    pub(crate) unsafe fn record(&mut self, slot: *mut Item, ccpl: usize) {
        let node = unsafe { (*slot).inner_ptr() };
        self.frames.push(PathFrame { node, slot, ccpl });
    }

    /// After a leaf mutation that changed the key count by `delta` (±1):
    /// adjust every recorded ancestor, and at the first level whose
    /// occupancy crosses a resize threshold, extract the whole subtree and
    /// re-bulk-load it in place. The rebuild subsumes any deeper repairs, so
    /// the walk stops there.
    ///
    /// # Safety
    /// All recorded frames must still be live, which holds because rebuilds
    /// stop the walk.
    pub(crate) unsafe fn apply(self, delta: i64, model: &PrefixModel, cost: &CostModel) {
        debug_assert!(delta == 1 || delta == -1);
        for frame in self.frames {
            let node = unsafe { &mut *frame.node };
            if delta > 0 {
                node.num_keys += 1;
            } else {
                node.num_keys -= 1;
            }

            let len = node.items.len();
            let over_full = node.num_keys >= 2 * len;
            let under_full = 4 * node.num_keys <= len;
            if over_full || under_full {
                let expected = node.num_keys;
                // the extraction frees `node` along with the whole subtree
                let mut entries = Vec::with_capacity(expected);
                unsafe { extract_item(*frame.slot, &mut entries) };
                debug_assert_eq!(entries.len(), expected);
                let count = entries.len();
                debug!(keys = count, over_full, "re-bulk-loading subtree");
                let src = OwnedEntries(entries);
                unsafe {
                    *frame.slot = pmss_bulk(&src, 0, count, frame.ccpl, model, cost);
                }
                return;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Leaf mutation handlers. Each resolves a write at its item and reports
// whether the key count changed (insert/remove: bool; upsert: 0 for a fresh
// insert, else the previous value).
// ---------------------------------------------------------------------------

pub(crate) unsafe fn single_search(item: Item, key: &[u8], ccpl: usize) -> Option<*mut KvEntry> {
    let entry = item.entry_ptr();
    unsafe { (*entry).suffix_matches(key, ccpl) }.then_some(entry)
}

pub(crate) unsafe fn single_insert(item: &mut Item, key: &[u8], value: u64, ccpl: usize) -> bool {
    let old = item.entry_ptr();
    match unsafe { (*old).keycmp(key, ccpl) } {
        Ordering::Equal => false,
        Ordering::Greater => {
            // probe sorts after the resident entry
            let node = unsafe { CompactNode::from_pair(old, KvEntry::new_raw(key, value), ccpl) };
            *item = Item::from_cnode(Box::into_raw(node));
            true
        }
        Ordering::Less => {
            let node = unsafe { CompactNode::from_pair(KvEntry::new_raw(key, value), old, ccpl) };
            *item = Item::from_cnode(Box::into_raw(node));
            true
        }
    }
}

pub(crate) unsafe fn single_upsert(item: &mut Item, key: &[u8], value: u64, ccpl: usize) -> u64 {
    let old = item.entry_ptr();
    if unsafe { (*old).suffix_matches(key, ccpl) } {
        let entry = unsafe { &mut *old };
        let prev = entry.value();
        entry.set_value(value);
        prev
    } else {
        unsafe { single_insert(item, key, value, ccpl) };
        0
    }
}

pub(crate) unsafe fn single_remove(item: &mut Item, key: &[u8], ccpl: usize) -> bool {
    let old = item.entry_ptr();
    if unsafe { (*old).suffix_matches(key, ccpl) } {
        unsafe { drop(Box::from_raw(old)) };
        *item = Item::empty();
        true
    } else {
        false
    }
}

pub(crate) unsafe fn cnode_insert(
    item: &mut Item,
    key: &[u8],
    value: u64,
    model: &PrefixModel,
    cost: &CostModel,
) -> bool {
    let node = unsafe { Box::from_raw(item.cnode_ptr()) };
    if node.has_room() {
        let (node, inserted) = unsafe { node.insert_with_room(key, value) };
        *item = Item::from_cnode(Box::into_raw(node));
        inserted
    } else {
        match unsafe { node.extract_with_new(key, value) } {
            Ok((entries, ccpl)) => {
                let count = entries.len();
                let src = OwnedEntries(entries);
                *item = pmss_bulk(&src, 0, count, ccpl, model, cost);
                true
            }
            Err(node) => {
                *item = Item::from_cnode(Box::into_raw(node));
                false
            }
        }
    }
}

pub(crate) unsafe fn cnode_upsert(
    item: &mut Item,
    key: &[u8],
    value: u64,
    model: &PrefixModel,
    cost: &CostModel,
) -> u64 {
    let node = unsafe { Box::from_raw(item.cnode_ptr()) };
    if node.has_room() {
        let (node, previous) = unsafe { node.upsert_with_room(key, value) };
        *item = Item::from_cnode(Box::into_raw(node));
        return previous;
    }
    // a full node can still satisfy a pure update in place
    if let Some(i) = unsafe { node.find_slot(key) } {
        let entry = unsafe { &mut *node.entry_at(i) };
        let previous = entry.value();
        entry.set_value(value);
        *item = Item::from_cnode(Box::into_raw(node));
        return previous;
    }
    match unsafe { node.extract_with_new(key, value) } {
        Ok((entries, ccpl)) => {
            let count = entries.len();
            let src = OwnedEntries(entries);
            *item = pmss_bulk(&src, 0, count, ccpl, model, cost);
            0
        }
        Err(node) => {
            // unreachable in practice: the slot scan above found no match
            *item = Item::from_cnode(Box::into_raw(node));
            0
        }
    }
}

pub(crate) unsafe fn cnode_remove(item: &mut Item, key: &[u8]) -> bool {
    let node = unsafe { Box::from_raw(item.cnode_ptr()) };
    if node.more_than_two() {
        let (node, removed) = unsafe { node.remove_with_room(key) };
        *item = Item::from_cnode(Box::into_raw(node));
        removed
    } else {
        match unsafe { node.degrade(key) } {
            Ok(survivor) => {
                *item = Item::from_entry(survivor);
                true
            }
            Err(node) => {
                *item = Item::from_cnode(Box::into_raw(node));
                false
            }
        }
    }
}

pub(crate) unsafe fn trie_insert(item: &mut Item, key: &[u8], value: u64) -> bool {
    let mut trie = item.trie();
    let inserted = unsafe { trie.insert(key, value) };
    *item = Item::from_trie(trie);
    inserted
}

pub(crate) unsafe fn trie_upsert(item: &mut Item, key: &[u8], value: u64) -> u64 {
    let mut trie = item.trie();
    let previous = unsafe { trie.upsert(key, value) };
    *item = Item::from_trie(trie);
    previous
}

pub(crate) unsafe fn trie_remove(item: &mut Item, key: &[u8]) -> bool {
    let mut trie = item.trie();
    let removed = unsafe { trie.remove(key) };
    *item = Item::from_trie(trie);
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus(n: usize) -> Vec<Vec<u8>> {
        (0..n).map(|i| format!("key{i:04}").into_bytes()).collect()
    }

    fn sources(keys: &[Vec<u8>]) -> (Vec<&[u8]>, Vec<u64>) {
        let refs: Vec<&[u8]> = keys.iter().map(|k| k.as_slice()).collect();
        let values: Vec<u64> = (0..keys.len() as u64).collect();
        (refs, values)
    }

    fn teardown(item: Item) {
        let mut out = Vec::new();
        unsafe { extract_item(item, &mut out) };
        for e in out {
            unsafe { drop(Box::from_raw(e)) };
        }
    }

    #[test]
    fn bulk_of_one_is_single() {
        let keys = corpus(1000);
        let (refs, values) = sources(&keys);
        let model = PrefixModel::train(&refs);
        let src = crate::entry::BorrowedPairs { keys: &refs, values: &values };
        let item = pmss_bulk(&src, 5, 6, 0, &model, &CostModel);
        assert_eq!(item.tag(), ItemTag::Single);
        unsafe { assert_eq!((*item.entry_ptr()).key(), b"key0005") };
        teardown(item);
    }

    #[test]
    fn small_groups_become_compact_nodes() {
        let keys = corpus(1000);
        let (refs, values) = sources(&keys);
        let model = PrefixModel::train(&refs);
        let src = crate::entry::BorrowedPairs { keys: &refs, values: &values };
        let item = pmss_bulk(&src, 0, 12, 3, &model, &CostModel);
        assert_eq!(item.tag(), ItemTag::CNode);
        let node = unsafe { &*item.cnode_ptr() };
        assert_eq!(node.key_cnt(), 12);
        assert_eq!(node.ccpl(), 3);
        teardown(item);
    }

    #[test]
    fn full_bulk_extracts_back_in_order() {
        let keys = corpus(1000);
        let (refs, values) = sources(&keys);
        let model = PrefixModel::train(&refs);
        let src = crate::entry::BorrowedPairs { keys: &refs, values: &values };
        let item = pmss_bulk(&src, 0, refs.len(), 0, &model, &CostModel);
        assert!(matches!(item.tag(), ItemTag::Inner | ItemTag::Trie));

        let mut out = Vec::new();
        unsafe { extract_item(item, &mut out) };
        assert_eq!(out.len(), refs.len());
        for (i, &e) in out.iter().enumerate() {
            unsafe {
                assert_eq!((*e).key(), refs[i], "extraction must preserve order");
                assert_eq!((*e).value(), i as u64);
            }
        }
        for e in out {
            unsafe { drop(Box::from_raw(e)) };
        }
    }

    #[test]
    fn predict_pos_boundary_slots() {
        let keys = corpus(1000);
        let (refs, _) = sources(&keys);
        let model = PrefixModel::train(&refs);
        let node = InnerNode {
            num_keys: 100,
            k: 1.0,
            b: 0.0,
            prefix: b"key0".as_slice().into(),
            items: vec![Item::empty(); 200].into_boxed_slice(),
        };
        // sorts below the prefix: boundary slot 0
        let mut ccpl = 0;
        assert_eq!(predict_pos(&node, b"aaa", &mut ccpl, &model), 0);
        assert_eq!(ccpl, 0, "boundary paths must not consume prefix bytes");
        // sorts above the prefix: last slot
        let mut ccpl = 0;
        assert_eq!(predict_pos(&node, b"zzz", &mut ccpl, &model), 199);
        // a strict prefix of the cached prefix sorts below
        let mut ccpl = 0;
        assert_eq!(predict_pos(&node, b"ke", &mut ccpl, &model), 0);
        // interior keys advance ccpl and stay inside the clamp
        let mut ccpl = 0;
        let pos = predict_pos(&node, b"key0500", &mut ccpl, &model);
        assert_eq!(ccpl, 4);
        assert!((1..=198).contains(&pos));
    }

    #[test]
    fn single_leaf_state_machine() {
        let mut item = Item::from_entry(KvEntry::new_raw(b"key0500", 1));
        unsafe {
            assert!(!single_insert(&mut item, b"key0500", 2, 0));
            assert!(single_insert(&mut item, b"key0400", 2, 0));
            assert_eq!(item.tag(), ItemTag::CNode);
            let node = &*item.cnode_ptr();
            assert_eq!((*node.entry_at(0)).key(), b"key0400");
            assert_eq!((*node.entry_at(1)).key(), b"key0500");

            assert!(cnode_remove(&mut item, b"key0400"));
            assert_eq!(item.tag(), ItemTag::Single);
            assert!(single_remove(&mut item, b"key0500", 0));
            assert!(item.is_empty());
        }
    }

    #[test]
    fn cnode_overflow_rebulks_the_group() {
        let keys: Vec<Vec<u8>> = (0..CNODE_CAPACITY)
            .map(|i| format!("node{i:02}").into_bytes())
            .collect();
        let entries: Vec<*mut KvEntry> = keys
            .iter()
            .enumerate()
            .map(|(i, k)| KvEntry::new_raw(k, i as u64))
            .collect();
        let mut item =
            Item::from_cnode(Box::into_raw(CompactNode::build(&OwnedEntries(entries), 0, CNODE_CAPACITY, 0)));

        let train = corpus(1000);
        let (refs, _) = sources(&train);
        let model = PrefixModel::train(&refs);

        let inserted = unsafe { cnode_insert(&mut item, b"node085", 99, &model, &CostModel) };
        assert!(inserted);
        assert_ne!(item.tag(), ItemTag::CNode, "overflow must change shape");

        let mut out = Vec::new();
        unsafe { extract_item(item, &mut out) };
        assert_eq!(out.len(), CNODE_CAPACITY + 1);
        let mut prev: Option<Vec<u8>> = None;
        for &e in &out {
            let k = unsafe { (*e).key().to_vec() };
            if let Some(p) = &prev {
                assert!(*p < k);
            }
            prev = Some(k);
        }
        for e in out {
            unsafe { drop(Box::from_raw(e)) };
        }
    }
}
