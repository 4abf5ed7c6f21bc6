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

//! Stridex Core
//!
//! An ordered, in-memory map from byte-string keys to `u64` values built
//! around a *learned* structural core: instead of comparison-routing through
//! a B-tree, inner nodes predict each key's slot from a trained model of the
//! corpus's byte distribution.
//!
//! # Structure
//!
//! - **Prefix model** ([`PrefixModel`]): a hash-enhanced prefix table of
//!   per (byte position, previous byte) rows of byte CDFs that maps a key
//!   to a scalar in `[0, 1)` monotone in sort order.
//! - **Model nodes**: sparse item arrays addressed by the calibrated model
//!   scalar; each slot is one tagged 64-bit word.
//! - **Leaves**: single entries, compact nodes (≤ 16 hash-annotated
//!   entries), or embedded compressed radix tries, chosen per group by a
//!   cost model ([`CostModel`]).
//! - **Adaptive repair**: writes account key counts along their descent
//!   path and re-bulk-load any subtree whose occupancy crosses a resize
//!   threshold.
//!
//! # Keys
//!
//! Keys are non-empty byte strings over the 7-bit alphabet `{0x01..0x7F}`,
//! unique within the index, ordered byte-wise unsigned. Values are `u64`;
//! note that [`StringIndex::upsert`] uses 0 as its "no previous value"
//! sentinel.
//!
//! # Example
//!
//! ```
//! use stridex_core::StringIndex;
//!
//! let keys: Vec<Vec<u8>> = (0..1000).map(|i| format!("user{i:05}").into_bytes()).collect();
//! let refs: Vec<&[u8]> = keys.iter().map(|k| k.as_slice()).collect();
//! let values: Vec<u64> = (0..1000).collect();
//!
//! let mut index = StringIndex::bulk_load(&refs, &values).unwrap();
//! assert_eq!(index.lookup(b"user00042"), Some(42));
//!
//! assert!(index.insert(b"user00042a", 7));
//! let mut cursor = index.find(b"user00042");
//! assert_eq!(cursor.next(), Some((&b"user00042"[..], 42)));
//! assert_eq!(cursor.next(), Some((&b"user00042a"[..], 7)));
//! ```
//!
//! # Concurrency
//!
//! The core is single-threaded cooperative: every operation runs to
//! completion on the caller's thread with no locks and no suspension
//! points. Cursors borrow the index shared, so structural mutation while a
//! cursor is live is a compile error, not a runtime hazard.

mod cnode;
mod entry;
mod item;
mod node;
mod trie;

pub mod cost_model;
pub mod error;
pub mod index;
pub mod iter;
pub mod key;
pub mod prefix_model;

pub use cost_model::{CostModel, Substructure};
pub use error::{Result, StridexError};
pub use index::{MIN_BULK_LOAD_SIZE, StringIndex};
pub use iter::Cursor;
pub use prefix_model::PrefixModel;

/// Crate version.
pub const STRIDEX_VERSION: &str = env!("CARGO_PKG_VERSION");
