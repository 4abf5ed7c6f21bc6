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

//! The index object
//!
//! [`StringIndex`] owns the root item, the trained prefix model, and the
//! structure-selection cost model. It is built once from a sorted corpus and
//! then serves point reads, writes, and ordered scans. Construction returns
//! the index by value, so "operation before build" is unrepresentable; all
//! interior allocations are reclaimed on drop.
//!
//! The core is single-threaded: operations run to completion on the
//! caller's thread, hold no locks, and never suspend.

use tracing::debug;

use crate::cost_model::CostModel;
use crate::entry::{BorrowedPairs, KvEntry};
use crate::error::{Result, StridexError};
use crate::item::{Item, ItemTag};
use crate::iter::Cursor;
use crate::node::{
    PathStack, cnode_insert, cnode_remove, cnode_upsert, extract_item, pmss_bulk, predict_pos,
    single_insert, single_remove, single_search, single_upsert, trie_insert, trie_remove,
    trie_upsert,
};
use crate::prefix_model::PrefixModel;

/// Bulk loading needs at least this many keys to train the prefix model.
pub const MIN_BULK_LOAD_SIZE: usize = 1000;

/// An ordered map from 7-bit byte-string keys to `u64` values with a hybrid
/// learned structure: model nodes route probes by predicted position,
/// leaves are singletons, compact nodes, or embedded radix tries, and
/// write-path accounting re-bulk-loads any subtree whose occupancy drifts
/// out of band.
pub struct StringIndex {
    root: Item,
    model: Box<PrefixModel>,
    cost: CostModel,
    key_count: usize,
}

impl StringIndex {
    /// Build an index from strictly increasing unique keys and their values,
    /// training the prefix model on the keys.
    ///
    /// Fails without building anything if the input is too small, of
    /// mismatched lengths, unsorted, duplicated, or outside the key
    /// alphabet.
    pub fn bulk_load(keys: &[&[u8]], values: &[u64]) -> Result<Self> {
        Self::validate(keys, values)?;
        let model = Box::new(PrefixModel::train(keys));
        Ok(Self::build(keys, values, model))
    }

    /// As [`Self::bulk_load`], reusing a previously trained model instead of
    /// training on this corpus.
    pub fn bulk_load_with_model(
        keys: &[&[u8]],
        values: &[u64],
        model: PrefixModel,
    ) -> Result<Self> {
        Self::validate(keys, values)?;
        Ok(Self::build(keys, values, Box::new(model)))
    }

    fn validate(keys: &[&[u8]], values: &[u64]) -> Result<()> {
        if keys.len() != values.len() {
            return Err(StridexError::LengthMismatch {
                keys: keys.len(),
                values: values.len(),
            });
        }
        if keys.len() < MIN_BULK_LOAD_SIZE {
            return Err(StridexError::TooFewKeys {
                min: MIN_BULK_LOAD_SIZE,
                got: keys.len(),
            });
        }
        for (pos, key) in keys.iter().enumerate() {
            if key.is_empty() {
                return Err(StridexError::EmptyKey(pos));
            }
            if let Some(&byte) = key.iter().find(|&&b| b == 0 || b >= 0x80) {
                return Err(StridexError::InvalidKeyByte { pos, byte });
            }
        }
        for i in 1..keys.len() {
            match keys[i - 1].cmp(keys[i]) {
                std::cmp::Ordering::Less => {}
                std::cmp::Ordering::Equal => return Err(StridexError::DuplicateKey(i)),
                std::cmp::Ordering::Greater => return Err(StridexError::UnsortedKeys(i)),
            }
        }
        Ok(())
    }

    fn build(keys: &[&[u8]], values: &[u64], model: Box<PrefixModel>) -> Self {
        let cost = CostModel;
        let src = BorrowedPairs { keys, values };
        let root = pmss_bulk(&src, 0, keys.len(), 0, &model, &cost);
        debug!(keys = keys.len(), "bulk load complete");
        StringIndex { root, model, cost, key_count: keys.len() }
    }

    /// Point lookup.
    pub fn lookup(&self, key: &[u8]) -> Option<u64> {
        if key.is_empty() {
            return None;
        }
        let mut ccpl = 0usize;
        let mut item = self.root;
        loop {
            match item.tag() {
                ItemTag::Empty => return None,
                ItemTag::Single => {
                    return unsafe { single_search(item, key, ccpl) }
                        .map(|e| unsafe { (*e).value() });
                }
                ItemTag::CNode => {
                    return unsafe { (*item.cnode_ptr()).search(key) }
                        .map(|e| unsafe { (*e).value() });
                }
                ItemTag::Trie => {
                    return unsafe { item.trie().lookup(key) }.map(|e| unsafe { (*e).value() });
                }
                ItemTag::Inner => {
                    let node = unsafe { &*item.inner_ptr() };
                    let pos = predict_pos(node, key, &mut ccpl, &self.model);
                    item = node.items[pos];
                }
            }
        }
    }

    /// Insert a new key. Returns false (and changes nothing) if the key
    /// already exists.
    pub fn insert(&mut self, key: &[u8], value: u64) -> bool {
        if key.is_empty() {
            return false;
        }
        debug_assert!(
            key.iter().all(|&b| b != 0 && b < 0x80),
            "key bytes must be in the 7-bit alphabet"
        );
        let mut ccpl = 0usize;
        let mut stack = PathStack::new();
        let mut item: *mut Item = &mut self.root;
        let inserted = loop {
            match unsafe { (*item).tag() } {
                ItemTag::Empty => {
                    unsafe { *item = Item::from_entry(KvEntry::new_raw(key, value)) };
                    break true;
                }
                ItemTag::Single => {
                    break unsafe { single_insert(&mut *item, key, value, ccpl) };
                }
                ItemTag::CNode => {
                    break unsafe { cnode_insert(&mut *item, key, value, &self.model, &self.cost) };
                }
                ItemTag::Trie => break unsafe { trie_insert(&mut *item, key, value) },
                ItemTag::Inner => {
                    unsafe { stack.record(item, ccpl) };
                    let node = unsafe { &mut *(*item).inner_ptr() };
                    let pos = predict_pos(node, key, &mut ccpl, &self.model);
                    item = &mut node.items[pos];
                }
            }
        };
        if inserted {
            unsafe { stack.apply(1, &self.model, &self.cost) };
            self.key_count += 1;
        }
        inserted
    }

    /// Insert or update. Returns the previous value, or 0 for a fresh
    /// insert; callers that store 0 as a live value cannot distinguish the
    /// two cases from the return alone.
    pub fn upsert(&mut self, key: &[u8], value: u64) -> u64 {
        if key.is_empty() {
            return 0;
        }
        debug_assert!(
            key.iter().all(|&b| b != 0 && b < 0x80),
            "key bytes must be in the 7-bit alphabet"
        );
        let mut ccpl = 0usize;
        let mut stack = PathStack::new();
        let mut item: *mut Item = &mut self.root;
        let previous = loop {
            match unsafe { (*item).tag() } {
                ItemTag::Empty => {
                    unsafe { *item = Item::from_entry(KvEntry::new_raw(key, value)) };
                    break 0;
                }
                ItemTag::Single => {
                    break unsafe { single_upsert(&mut *item, key, value, ccpl) };
                }
                ItemTag::CNode => {
                    break unsafe { cnode_upsert(&mut *item, key, value, &self.model, &self.cost) };
                }
                ItemTag::Trie => break unsafe { trie_upsert(&mut *item, key, value) },
                ItemTag::Inner => {
                    unsafe { stack.record(item, ccpl) };
                    let node = unsafe { &mut *(*item).inner_ptr() };
                    let pos = predict_pos(node, key, &mut ccpl, &self.model);
                    item = &mut node.items[pos];
                }
            }
        };
        if previous == 0 {
            unsafe { stack.apply(1, &self.model, &self.cost) };
            self.key_count += 1;
        }
        previous
    }

    /// Remove a key, freeing its entry. Returns false if absent.
    pub fn remove(&mut self, key: &[u8]) -> bool {
        if key.is_empty() {
            return false;
        }
        let mut ccpl = 0usize;
        let mut stack = PathStack::new();
        let mut item: *mut Item = &mut self.root;
        let removed = loop {
            match unsafe { (*item).tag() } {
                ItemTag::Empty => break false,
                ItemTag::Single => break unsafe { single_remove(&mut *item, key, ccpl) },
                ItemTag::CNode => break unsafe { cnode_remove(&mut *item, key) },
                ItemTag::Trie => break unsafe { trie_remove(&mut *item, key) },
                ItemTag::Inner => {
                    unsafe { stack.record(item, ccpl) };
                    let node = unsafe { &mut *(*item).inner_ptr() };
                    let pos = predict_pos(node, key, &mut ccpl, &self.model);
                    item = &mut node.items[pos];
                }
            }
        };
        if removed {
            unsafe { stack.apply(-1, &self.model, &self.cost) };
            self.key_count -= 1;
        }
        removed
    }

    /// Cursor anchored exactly at `key`; invalid if the key is absent.
    /// The cursor borrows the index, so writes are rejected while it lives.
    pub fn find(&self, key: &[u8]) -> Cursor<'_> {
        Cursor::find(self, key)
    }

    /// Cursor at the smallest key.
    pub fn begin(&self) -> Cursor<'_> {
        Cursor::first(self)
    }

    /// Live key count.
    #[inline]
    pub fn len(&self) -> usize {
        self.key_count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.key_count == 0
    }

    /// The trained prefix model, e.g. for reuse via
    /// [`Self::bulk_load_with_model`].
    #[inline]
    pub fn model(&self) -> &PrefixModel {
        &self.model
    }

    #[inline]
    pub(crate) fn root_item(&self) -> Item {
        self.root
    }
}

impl Drop for StringIndex {
    fn drop(&mut self) {
        let mut entries = Vec::with_capacity(self.key_count);
        unsafe { extract_item(self.root, &mut entries) };
        for entry in entries {
            unsafe { drop(Box::from_raw(entry)) };
        }
        self.root = Item::empty();
    }
}

impl std::fmt::Debug for StringIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StringIndex")
            .field("keys", &self.key_count)
            .field("model_bytes", &self.model.memory_bytes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus(n: usize) -> (Vec<Vec<u8>>, Vec<u64>) {
        let keys: Vec<Vec<u8>> = (0..n).map(|i| format!("key{i:04}").into_bytes()).collect();
        let values: Vec<u64> = (0..n as u64).collect();
        (keys, values)
    }

    fn build(n: usize) -> StringIndex {
        let (keys, values) = corpus(n);
        let refs: Vec<&[u8]> = keys.iter().map(|k| k.as_slice()).collect();
        StringIndex::bulk_load(&refs, &values).expect("valid corpus")
    }

    #[test]
    fn bulk_load_rejects_small_input() {
        let (keys, values) = corpus(999);
        let refs: Vec<&[u8]> = keys.iter().map(|k| k.as_slice()).collect();
        assert_eq!(
            StringIndex::bulk_load(&refs, &values).unwrap_err(),
            StridexError::TooFewKeys { min: MIN_BULK_LOAD_SIZE, got: 999 }
        );
    }

    #[test]
    fn bulk_load_rejects_unsorted_and_duplicate_input() {
        let (mut keys, values) = corpus(1000);
        keys.swap(10, 11);
        let refs: Vec<&[u8]> = keys.iter().map(|k| k.as_slice()).collect();
        assert_eq!(
            StringIndex::bulk_load(&refs, &values).unwrap_err(),
            StridexError::UnsortedKeys(11)
        );

        let (mut keys, values) = corpus(1000);
        keys[11] = keys[10].clone();
        let refs: Vec<&[u8]> = keys.iter().map(|k| k.as_slice()).collect();
        assert_eq!(
            StringIndex::bulk_load(&refs, &values).unwrap_err(),
            StridexError::DuplicateKey(11)
        );
    }

    #[test]
    fn bulk_load_rejects_bad_alphabet() {
        let (mut keys, values) = corpus(1000);
        keys[5] = vec![b'k', 0x80];
        let refs: Vec<&[u8]> = keys.iter().map(|k| k.as_slice()).collect();
        assert_eq!(
            StringIndex::bulk_load(&refs, &values).unwrap_err(),
            StridexError::InvalidKeyByte { pos: 5, byte: 0x80 }
        );
    }

    #[test]
    fn lookup_hits_every_loaded_key() {
        let index = build(1000);
        assert_eq!(index.lookup(b"key0500"), Some(500));
        assert_eq!(index.lookup(b"key0000"), Some(0));
        assert_eq!(index.lookup(b"key0999"), Some(999));
        assert_eq!(index.lookup(b"key1000"), None);
        assert_eq!(index.lookup(b"key"), None);
        assert_eq!(index.lookup(b""), None);
    }

    #[test]
    fn pretrained_model_reuse() {
        let (keys, values) = corpus(1000);
        let refs: Vec<&[u8]> = keys.iter().map(|k| k.as_slice()).collect();
        let first = StringIndex::bulk_load(&refs, &values).unwrap();
        let second =
            StringIndex::bulk_load_with_model(&refs, &values, first.model().clone()).unwrap();
        assert_eq!(second.lookup(b"key0123"), Some(123));
    }
}
