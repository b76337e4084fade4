// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! The code cache: a flat, reserved arena holding every compiled block,
//! its method nodes and their private data records.
//! Allocations are never freed individually; the whole arena is reset at once.

pub mod lut;

use alloc::vec::Vec;
use core::{mem, ptr, slice};

use crate::error::{CacheFull, JitError};

/// Byte pattern written over free cache space.
pub const POISON: u8 = 0xFD;

const ALIGN: usize = 32;

#[repr(C, align(32))]
#[derive(Clone, Copy)]
struct Line([u8; ALIGN]);

/// Offset of a record inside a [CodeCache].
/// Only meaningful for the cache (and generation) that produced it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct DataRef(pub(crate) u32);

pub struct CodeCache {
    lines: Vec<Line>,
    capacity: usize,
    used: usize,
    generation: u32,
}

impl CodeCache {
    /// Reserve a cache of the given size, filled with poison.
    pub fn reserve(capacity: usize) -> Result<Self, JitError> {
        let count = capacity.div_ceil(ALIGN);
        let mut lines = Vec::new();
        lines
            .try_reserve_exact(count)
            .map_err(|_| JitError::Reserve { bytes: capacity })?;
        lines.resize(count, Line([POISON; ALIGN]));
        Ok(Self {
            lines,
            capacity,
            used: 0,
            generation: 0,
        })
    }

    /// Bump-allocate `size` bytes, returning their offset.
    pub fn alloc(&mut self, size: usize) -> Result<usize, CacheFull> {
        if self.used + size >= self.capacity {
            return Err(CacheFull);
        }
        let offset = self.used;
        self.used += size;
        Ok(offset)
    }

    /// Allocate `size` bytes starting on a 32 byte boundary.
    pub fn alloc_aligned32(&mut self, size: usize) -> Result<DataRef, CacheFull> {
        let offset = self.alloc(size + (ALIGN - 1))?;
        let aligned = (offset + (ALIGN - 1)) & !(ALIGN - 1);
        Ok(DataRef(aligned as u32))
    }

    /// Space left in bytes.
    pub fn remaining(&self) -> usize {
        self.capacity - self.used
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Counter bumped on every reset; references from an older
    /// generation are stale.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Poison the whole arena and start over.
    /// Every [DataRef] handed out before is invalid afterwards.
    pub fn reset(&mut self) {
        self.lines.fill(Line([POISON; ALIGN]));
        self.used = 0;
        self.generation = self.generation.wrapping_add(1);
    }

    /// Allocate and write a record.
    pub fn put<T: Copy>(&mut self, value: T) -> Result<DataRef, CacheFull> {
        let at = self.alloc_aligned32(mem::size_of::<T>())?;
        self.write(at, 0, value);
        Ok(at)
    }

    /// Allocate room for `count` records of type T, filled with `fill`.
    pub fn put_array<T: Copy>(&mut self, count: usize, fill: T) -> Result<DataRef, CacheFull> {
        let at = self.alloc_aligned32(mem::size_of::<T>() * count)?;
        for i in 0..count {
            self.write(at, i, fill);
        }
        Ok(at)
    }

    /// Read the record at index `idx` of the array at `at`.
    /// The record must have been written as a T.
    #[inline]
    pub fn get<T: Copy>(&self, at: DataRef, idx: usize) -> T {
        let bytes = self.record::<T>(at, idx);
        // SAFETY: The range is in bounds (checked by slicing), and methods
        // are only ever paired with records of the type they were compiled
        // with, so the bytes hold a valid T.
        unsafe { ptr::read_unaligned(bytes.as_ptr().cast::<T>()) }
    }

    /// Overwrite the record at index `idx` of the array at `at`.
    #[inline]
    pub fn write<T: Copy>(&mut self, at: DataRef, idx: usize, value: T) {
        let size = mem::size_of::<T>();
        let start = at.0 as usize + idx * size;
        debug_assert!(start + size <= self.used, "Write past the allocated area!");
        let bytes = &mut self.bytes_mut()[start..start + size];
        // SAFETY: The range is in bounds (checked by slicing) and u8 has no
        // alignment requirement thanks to write_unaligned.
        unsafe { ptr::write_unaligned(bytes.as_mut_ptr().cast::<T>(), value) }
    }

    fn record<T>(&self, at: DataRef, idx: usize) -> &[u8] {
        let size = mem::size_of::<T>();
        let start = at.0 as usize + idx * size;
        debug_assert!(start + size <= self.used, "Read past the allocated area!");
        &self.bytes()[start..start + size]
    }

    fn bytes(&self) -> &[u8] {
        // SAFETY: Line is repr(C) around a byte array, so the vector is
        // a contiguous run of initialized bytes.
        unsafe { slice::from_raw_parts(self.lines.as_ptr().cast::<u8>(), self.lines.len() * ALIGN) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: See above.
        unsafe {
            slice::from_raw_parts_mut(
                self.lines.as_mut_ptr().cast::<u8>(),
                self.lines.len() * ALIGN,
            )
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bump_and_align() {
        let mut cache = CodeCache::reserve(1024).unwrap();
        assert_eq!(cache.alloc(3), Ok(0));
        let aligned = cache.alloc_aligned32(8).unwrap();
        assert_eq!(aligned.0 % 32, 0);
        assert_eq!(aligned.0, 32);
        assert_eq!(cache.used(), 3 + 8 + 31);
        assert_eq!(cache.remaining(), 1024 - 42);
    }

    #[test]
    fn alloc_fails_instead_of_growing() {
        let mut cache = CodeCache::reserve(64).unwrap();
        assert!(cache.alloc(63).is_ok());
        assert_eq!(cache.alloc(1), Err(CacheFull));
        assert_eq!(cache.used(), 63);

        let mut cache = CodeCache::reserve(64).unwrap();
        assert_eq!(cache.alloc(64), Err(CacheFull));
        assert_eq!(cache.alloc_aligned32(33), Err(CacheFull));
    }

    #[test]
    fn records_round_trip_and_reset_poisons() {
        #[derive(Debug, Copy, Clone, PartialEq)]
        struct Rec {
            a: u8,
            b: u32,
        }

        let mut cache = CodeCache::reserve(256).unwrap();
        let one = cache.put(Rec { a: 1, b: 0xDEAD_BEEF }).unwrap();
        let arr = cache.put_array(3, 7u16).unwrap();
        cache.write(arr, 1, 9u16);
        assert_eq!(cache.get::<Rec>(one, 0), Rec { a: 1, b: 0xDEAD_BEEF });
        assert_eq!(cache.get::<u16>(arr, 0), 7);
        assert_eq!(cache.get::<u16>(arr, 1), 9);

        let generation = cache.generation();
        cache.reset();
        assert_eq!(cache.used(), 0);
        assert_ne!(cache.generation(), generation);
        assert!(cache.bytes().iter().all(|b| *b == POISON));
    }
}
