// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! Bit access and conversion helpers for the integer types used by decoders.

use core::ops::{BitAnd, Shr};

pub trait NumExt: BitAnd<Output = Self> + Shr<u32, Output = Self> + Copy + PartialEq {
    /// Is the given bit set?
    fn is_bit(&self, bit: u32) -> bool;
    /// Copy of `self` with the given bit set to `state`.
    fn set_bit(self, bit: u32, state: bool) -> Self;
    /// `len` bits starting at `start`, shifted down. Out of range bits read as 0.
    fn bits(self, start: u32, len: u32) -> Self;

    fn u32(self) -> u32;
    fn us(self) -> usize;
}

macro_rules! impl_num_ext {
    ($($ty:ident),*) => {$(
        impl NumExt for $ty {
            #[inline(always)]
            fn is_bit(&self, bit: u32) -> bool {
                self.checked_shr(bit).unwrap_or(0) & 1 == 1
            }

            #[inline(always)]
            fn set_bit(self, bit: u32, state: bool) -> $ty {
                let mask = 1 << bit;
                if state { self | mask } else { self & !mask }
            }

            #[inline(always)]
            fn bits(self, start: u32, len: u32) -> $ty {
                let shifted = self.checked_shr(start).unwrap_or(0);
                match $ty::MAX.checked_shr($ty::BITS.saturating_sub(len)) {
                    Some(mask) if len != 0 => shifted & mask,
                    _ => 0,
                }
            }

            #[inline(always)]
            fn u32(self) -> u32 {
                self as u32
            }

            #[inline(always)]
            fn us(self) -> usize {
                self as usize
            }
        }
    )*};
}

impl_num_ext!(u8, u16, u32, u64);

pub trait U16Ext {
    fn low(self) -> u8;
    /// Sign-extend the lower 11 bits.
    fn i11(self) -> i16;
}

impl U16Ext for u16 {
    fn low(self) -> u8 {
        self as u8
    }

    fn i11(self) -> i16 {
        (self as i16) << 5 >> 5
    }
}

pub trait U32Ext {
    /// Sign-extend the lower 24 bits.
    fn i24(self) -> i32;
}

impl U32Ext for u32 {
    fn i24(self) -> i32 {
        (self as i32) << 8 >> 8
    }
}
