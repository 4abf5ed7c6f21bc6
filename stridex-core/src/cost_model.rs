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

//! Structure selection
//!
//! The bulk builder has two substructures available for a key group that is
//! too large for a compact leaf: a model node (learned sparse slot array) or
//! an embedded radix trie. [`CostModel`] picks between them from two group
//! statistics: the group size, and the group partial key length (gpkl),
//! which is the average per-key distinguishing-prefix length minus the
//! group's common prefix, i.e. how many bytes of discriminating information
//! a probe has to consume inside the group.
//!
//! The decision compares estimated probe costs. A model-node probe pays the
//! prefix-table walk over roughly `gpkl` bytes plus one slot access; a trie
//! descent pays one pointer hop per distinguishing level, with a compressed
//! radix node resolving about [`CostModel::TRIE_FANOUT_BITS`] bits of
//! discrimination per hop. Groups with long discriminating suffixes (URLs,
//! paths, shared-template keys) therefore go to the trie; short-suffix
//! groups (identifiers, fixed-width numerics) stay on model nodes.

use crate::entry::SortedSource;
use crate::key::{common_prefix_len, distinguishing_prefix_len, distinguishing_prefix_len3};

/// Which substructure to build for a key group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Substructure {
    ModelNode,
    TrieNode,
}

/// Closed-form probe-cost comparison. Total and deterministic: every
/// `(size, gpkl)` pair maps to exactly one choice, and growing `gpkl` at a
/// fixed size eventually flips the choice to the trie.
#[derive(Debug, Clone, Copy, Default)]
pub struct CostModel;

impl CostModel {
    /// Prefix-table math per discriminating key byte, in probe-cost units.
    const MODEL_BYTE_COST: f64 = 1.0;
    /// Slot access and leaf verification, in probe-cost units.
    const MODEL_PROBE_BASE: f64 = 1.0;
    /// One trie node hop (child search plus pointer chase).
    const TRIE_HOP_COST: f64 = 2.0;
    /// Discrimination resolved per compressed radix hop.
    const TRIE_FANOUT_BITS: f64 = 3.0;

    pub fn select(&self, group_size: usize, gpkl: f64) -> Substructure {
        let model = Self::MODEL_PROBE_BASE + Self::MODEL_BYTE_COST * gpkl;
        let trie = Self::TRIE_HOP_COST * (group_size as f64).log2() / Self::TRIE_FANOUT_BITS;
        if model <= trie {
            Substructure::ModelNode
        } else {
            Substructure::TrieNode
        }
    }
}

/// Group partial key length: average distinguishing-prefix length of each
/// key against its sorted neighbours, minus the group common prefix length.
/// Callers guarantee `r - l >= 2`.
pub(crate) fn group_partial_key_length<S: SortedSource>(kvs: &S, l: usize, r: usize) -> f64 {
    let len = r - l;
    let gcpl = common_prefix_len(kvs.key(l), kvs.key(r - 1)) as f64;
    let mut dpl_sum = 0.0f64;
    for i in l..r {
        let d = if i == l {
            distinguishing_prefix_len(kvs.key(l), kvs.key(l + 1))
        } else if i == r - 1 {
            distinguishing_prefix_len(kvs.key(r - 2), kvs.key(r - 1))
        } else {
            distinguishing_prefix_len3(kvs.key(i - 1), kvs.key(i), kvs.key(i + 1))
        };
        dpl_sum += d as f64;
    }
    dpl_sum / len as f64 - gcpl
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::BorrowedPairs;

    #[test]
    fn short_suffix_groups_use_model_nodes() {
        let cost = CostModel;
        // fixed-width numeric identifiers: a few discriminating bytes
        assert_eq!(cost.select(2_000_000, 4.0), Substructure::ModelNode);
        assert_eq!(cost.select(1000, 3.0), Substructure::ModelNode);
    }

    #[test]
    fn long_suffix_groups_use_tries() {
        let cost = CostModel;
        assert_eq!(cost.select(1_000_000, 40.0), Substructure::TrieNode);
        assert_eq!(cost.select(10_000, 20.0), Substructure::TrieNode);
    }

    #[test]
    fn gpkl_flip_is_monotone() {
        let cost = CostModel;
        for size in [32usize, 1024, 1 << 20] {
            let mut seen_trie = false;
            for tenths in 0..400 {
                let gpkl = tenths as f64 / 10.0;
                match cost.select(size, gpkl) {
                    Substructure::TrieNode => seen_trie = true,
                    Substructure::ModelNode => {
                        assert!(!seen_trie, "choice must not flip back to model");
                    }
                }
            }
            assert!(seen_trie, "high gpkl must eventually select the trie");
        }
    }

    #[test]
    fn gpkl_of_dense_run() {
        let keys: Vec<Vec<u8>> = (0..100).map(|i| format!("id{i:03}").into_bytes()).collect();
        let refs: Vec<&[u8]> = keys.iter().map(|k| k.as_slice()).collect();
        let values = vec![0u64; refs.len()];
        let src = BorrowedPairs { keys: &refs, values: &values };
        let g = group_partial_key_length(&src, 0, refs.len());
        // keys share "id0" only pairwise; group prefix is "id", so the
        // discriminating region is the digit block
        assert!(g > 0.0 && g < 6.0, "gpkl {g} out of expected band");
    }
}
