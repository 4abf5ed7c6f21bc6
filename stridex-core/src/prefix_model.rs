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

//! Hash-enhanced prefix table
//!
//! A trained byte-distribution model that maps a key to a scalar in `[0, 1)`
//! monotone in the key's sort order, used as the position predictor inside
//! model nodes.
//!
//! ## Model
//!
//! A 3-D table indexed by `(position hash, previous-byte hash, current byte)`
//! where each cell holds the cumulative lower bound (`CDF`) and the
//! conditional mass (`PRO`) of the current byte within its row. Scoring is
//! arithmetic-coding style interval refinement:
//!
//! ```text
//! cdf ← cdf + pro · CDF[b]
//! pro ← pro · PRO[b]
//! ```
//!
//! Because each row is a proper distribution, two keys refine through
//! identical rows until their first differing byte and land in disjoint
//! ordered intervals there, so the score is non-decreasing in key order,
//! including for keys never seen during training. Collapsing position and
//! previous byte to 5-bit hashes keeps the table at
//! `32 × 32 × 128 × 16 B ≈ 2 MiB`.

use serde::{Deserialize, Serialize};

use crate::key::{ALPHABET, common_prefix_len, distinguishing_prefix_len};

const POS_SLOTS: usize = 32;
const POS_MASK: usize = POS_SLOTS - 1;
const PREV_SLOTS: usize = 32;
const PREV_MASK: usize = PREV_SLOTS - 1;
const TABLE_CELLS: usize = POS_SLOTS * PREV_SLOTS * ALPHABET;

/// Deeper bytes contribute exponentially less to the trained distribution.
const ATTENUATION: f64 = 0.5;

/// Attenuation underflows to a denormal dead zone past this depth.
const MAX_TRAINED_DEPTH: usize = 256;

/// Scoring cutoff for the unscaled CDF walk.
const MIN_PRO: f64 = 1.0 / (1u64 << 52) as f64;

#[inline]
fn cell(pos: usize, prev: u8, ch: u8) -> usize {
    ((pos & POS_MASK) * PREV_SLOTS + (prev as usize & PREV_MASK)) * ALPHABET
        + (ch as usize & (ALPHABET - 1))
}

/// The trained prefix table. Serialisable so a model trained on one corpus
/// can be reused for further bulk loads over like-distributed keys.
#[derive(Clone, Serialize, Deserialize)]
pub struct PrefixModel {
    cdf: Vec<f64>,
    pro: Vec<f64>,
}

impl PrefixModel {
    /// Train the table on a sorted, unique key corpus.
    ///
    /// Only the distinguishing prefix of each key (relative to its sorted
    /// neighbours) is walked, and bytes below the corpus-wide common prefix
    /// are skipped entirely. Training always yields a usable model: rows the
    /// corpus never touches are left at zero mass, which flattens scores to
    /// ties and lets structure selection fall back to tries.
    pub fn train(keys: &[&[u8]]) -> Self {
        debug_assert!(keys.len() >= 2);

        let n = keys.len();
        let gcpl = common_prefix_len(keys[0], keys[n - 1]);

        let mut weight = [0.0f64; MAX_TRAINED_DEPTH];
        weight[0] = 1.0;
        for i in 1..MAX_TRAINED_DEPTH {
            weight[i] = weight[i - 1] * ATTENUATION;
        }

        let mut freq = vec![0.0f64; TABLE_CELLS];
        for (i, key) in keys.iter().enumerate() {
            let max_len = if i == 0 {
                distinguishing_prefix_len(keys[0], keys[1])
            } else if i == n - 1 {
                distinguishing_prefix_len(keys[n - 1], keys[n - 2])
            } else {
                common_prefix_len(key, keys[i - 1])
                    .max(common_prefix_len(key, keys[i + 1]))
                    + 1
            };
            let stop = key.len().min(max_len).min(gcpl + MAX_TRAINED_DEPTH);
            for b in gcpl..stop {
                let prev = if b == 0 { 0 } else { key[b - 1] };
                freq[cell(b, prev, key[b])] += weight[b - gcpl];
            }
        }

        // Per row: normalise the frequencies into PRO, then prefix-sum into
        // a true CDF with CDF[0] = 0.
        let mut pro = vec![0.0f64; TABLE_CELLS];
        let mut cdf = vec![0.0f64; TABLE_CELLS];
        for row in 0..POS_SLOTS * PREV_SLOTS {
            let base = row * ALPHABET;
            let total: f64 = freq[base..base + ALPHABET].iter().sum();
            if total <= 0.0 {
                continue;
            }
            let mut acc = 0.0;
            for j in 0..ALPHABET {
                let p = freq[base + j] / total;
                pro[base + j] = p;
                cdf[base + j] = acc;
                acc += p;
            }
        }

        PrefixModel { cdf, pro }
    }

    /// Predict an item-array slot for `key`, skipping `skip` confirmed prefix
    /// bytes and applying the node's local linear calibration `(k, b)`.
    /// The walk stops once the interval width drops below one slot.
    ///
    /// Callers with `skip == 0` use [`Self::predict_slot_from_start`].
    #[inline]
    pub(crate) fn predict_slot(&self, key: &[u8], size: usize, skip: usize, k: f64, b: f64) -> i64 {
        debug_assert!(skip >= 1);
        let mut pro = size as f64 * k;
        let mut cdf = size as f64 * b;
        let mut i = skip;
        while i < key.len() && pro >= 1.0 {
            let c = cell(i, key[i - 1], key[i]);
            cdf += pro * self.cdf[c];
            pro *= self.pro[c];
            i += 1;
        }
        cdf as i64
    }

    /// [`Self::predict_slot`] for nodes with no confirmed prefix: the first
    /// byte has no predecessor and scores through the `(0, 0)` row.
    #[inline]
    pub(crate) fn predict_slot_from_start(&self, key: &[u8], size: usize, k: f64, b: f64) -> i64 {
        let mut pro = size as f64 * k;
        let mut cdf = size as f64 * b;
        if key.is_empty() {
            return cdf as i64;
        }
        let c = cell(0, 0, key[0]);
        cdf += pro * self.cdf[c];
        pro *= self.pro[c];
        let mut i = 1;
        while i < key.len() && pro >= 1.0 {
            let c = cell(i, key[i - 1], key[i]);
            cdf += pro * self.cdf[c];
            pro *= self.pro[c];
            i += 1;
        }
        cdf as i64
    }

    /// The raw scalar for `key` past `skip` bytes, without any local
    /// calibration. Runs until the interval width underflows `2⁻⁵²`.
    pub(crate) fn cdf(&self, key: &[u8], skip: usize) -> f64 {
        let mut pro = 1.0f64;
        let mut cdf = 0.0f64;
        let mut i = skip;
        while i < key.len() && pro >= MIN_PRO {
            let prev = if i == 0 { 0 } else { key[i - 1] };
            let c = cell(i, prev, key[i]);
            cdf += pro * self.cdf[c];
            pro *= self.pro[c];
            i += 1;
        }
        cdf
    }

    /// Table footprint in bytes.
    pub fn memory_bytes(&self) -> usize {
        (self.cdf.len() + self.pro.len()) * std::mem::size_of::<f64>()
    }
}

impl std::fmt::Debug for PrefixModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrefixModel")
            .field("cells", &TABLE_CELLS)
            .field("memory_bytes", &self.memory_bytes())
            .finish()
    }
}
