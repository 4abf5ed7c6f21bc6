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

//! Key-value entries
//!
//! A [`KvEntry`] is the heap record for one live key: the owned key bytes
//! plus the 64-bit value. Entries are referenced by exactly one item in the
//! structure at any time and move between substructures by pointer during
//! re-bulk-loading, never by copying.

use std::cmp::Ordering;

use crate::key::hash_key;

/// Low 48 bits of a packed pointer word.
pub(crate) const PTR_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

/// One key's heap record: the value and the owned key bytes.
pub struct KvEntry {
    value: u64,
    key: Box<[u8]>,
}

impl KvEntry {
    /// Allocate a new entry and leak it to a raw pointer. Ownership is
    /// transferred to the structure; the pointer is reclaimed with
    /// `Box::from_raw` exactly once, on removal or index drop.
    pub(crate) fn new_raw(key: &[u8], value: u64) -> *mut KvEntry {
        Box::into_raw(Box::new(KvEntry {
            value,
            key: key.into(),
        }))
    }

    #[inline]
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    #[inline]
    pub fn value(&self) -> u64 {
        self.value
    }

    #[inline]
    pub(crate) fn set_value(&mut self, value: u64) {
        self.value = value;
    }

    /// True when `probe` equals this entry's key. Both sides are known to
    /// share `from` leading bytes, so only the suffixes are compared.
    #[inline]
    pub(crate) fn suffix_matches(&self, probe: &[u8], from: usize) -> bool {
        match (probe.get(from..), self.key.get(from..)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Order of `probe` relative to this entry's key, comparing the suffixes
    /// past `from` confirmed bytes.
    #[inline]
    pub(crate) fn keycmp(&self, probe: &[u8], from: usize) -> Ordering {
        let a = probe.get(from..).unwrap_or(&[]);
        let b = self.key.get(from..).unwrap_or(&[]);
        a.cmp(b)
    }
}

/// A packed 64-bit entry reference: the low 48 bits hold the entry pointer,
/// the high 16 bits the key hash. Lets compact-node scans reject most
/// non-matching slots without touching the entry's cache line.
#[derive(Clone, Copy, Debug)]
pub(crate) struct HashedRef(u64);

impl HashedRef {
    /// # Safety
    /// `entry` must point to a live [`KvEntry`].
    #[inline]
    pub(crate) unsafe fn new(entry: *mut KvEntry) -> Self {
        let hash = unsafe { hash_key((*entry).key()) };
        HashedRef((entry as u64 & PTR_MASK) | ((hash as u64) << 48))
    }

    #[inline]
    pub(crate) fn hash(self) -> u16 {
        (self.0 >> 48) as u16
    }

    #[inline]
    pub(crate) fn entry(self) -> *mut KvEntry {
        (self.0 & PTR_MASK) as *mut KvEntry
    }
}

/// A sorted run of key-value records that the bulk builder can consume.
///
/// Two shapes exist: borrowed caller input at initial bulk load (entries are
/// materialised on demand) and vectors of extracted entry pointers during a
/// subtree rebuild (entries already exist and are handed over). The builder
/// calls [`SortedSource::make_entry`] exactly once per index.
pub(crate) trait SortedSource {
    /// The key at `i`, for prediction and prefix arithmetic.
    fn key(&self, i: usize) -> &[u8];

    /// Produce the owned entry for position `i`, transferring ownership to
    /// the caller.
    fn make_entry(&self, i: usize) -> *mut KvEntry;
}

/// Caller-supplied parallel key/value slices (initial bulk load).
pub(crate) struct BorrowedPairs<'a> {
    pub keys: &'a [&'a [u8]],
    pub values: &'a [u64],
}

impl SortedSource for BorrowedPairs<'_> {
    #[inline]
    fn key(&self, i: usize) -> &[u8] {
        self.keys[i]
    }

    #[inline]
    fn make_entry(&self, i: usize) -> *mut KvEntry {
        KvEntry::new_raw(self.keys[i], self.values[i])
    }
}

/// Entries reclaimed from a dismantled subtree, in sorted order.
pub(crate) struct OwnedEntries(pub Vec<*mut KvEntry>);

impl SortedSource for OwnedEntries {
    #[inline]
    fn key(&self, i: usize) -> &[u8] {
        unsafe { (*self.0[i]).key() }
    }

    #[inline]
    fn make_entry(&self, i: usize) -> *mut KvEntry {
        self.0[i]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe fn free(p: *mut KvEntry) {
        unsafe { drop(Box::from_raw(p)) };
    }

    #[test]
    fn entry_roundtrip() {
        let p = KvEntry::new_raw(b"hello", 7);
        unsafe {
            assert_eq!((*p).key(), b"hello");
            assert_eq!((*p).value(), 7);
            (*p).set_value(9);
            assert_eq!((*p).value(), 9);
            free(p);
        }
    }

    #[test]
    fn suffix_compare() {
        let p = KvEntry::new_raw(b"key0500", 1);
        unsafe {
            assert!((*p).suffix_matches(b"key0500", 0));
            assert!((*p).suffix_matches(b"key0500", 4));
            assert!(!(*p).suffix_matches(b"key0501", 4));
            assert!(!(*p).suffix_matches(b"key05", 4));
            assert_eq!((*p).keycmp(b"key0501", 4), Ordering::Greater);
            assert_eq!((*p).keycmp(b"key0499", 4), Ordering::Less);
            assert_eq!((*p).keycmp(b"key0500", 4), Ordering::Equal);
            free(p);
        }
    }

    #[test]
    fn hashed_ref_packs_hash_and_pointer() {
        let p = KvEntry::new_raw(b"abcdef", 42);
        unsafe {
            let r = HashedRef::new(p);
            assert_eq!(r.entry(), p);
            assert_eq!(r.hash(), crate::key::hash_key(b"abcdef"));
            free(p);
        }
    }
}
