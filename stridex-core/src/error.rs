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

//! Error types for Stridex

use thiserror::Error;

/// Errors reported by [`crate::StringIndex::bulk_load`] and its variants.
///
/// Bulk loading is the only fallible surface of the index. Point operations
/// report absence and duplication through their return values (`Option`,
/// `bool`, or the upsert sentinel), not through errors. When any of these
/// errors is returned no index has been built and no input was consumed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StridexError {
    #[error("bulk load requires at least {min} keys, got {got}")]
    TooFewKeys { min: usize, got: usize },

    #[error("bulk load key and value counts differ: {keys} keys, {values} values")]
    LengthMismatch { keys: usize, values: usize },

    #[error("bulk load keys are not strictly sorted at position {0}")]
    UnsortedKeys(usize),

    #[error("duplicate key at position {0}")]
    DuplicateKey(usize),

    #[error("empty key at position {0}")]
    EmptyKey(usize),

    #[error("key at position {pos} contains byte {byte:#04x} outside the 7-bit alphabet")]
    InvalidKeyByte { pos: usize, byte: u8 },
}

pub type Result<T> = std::result::Result<T, StridexError>;
