// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! Barrel shifter and flag-setting arithmetic shared by the compiled methods.
//! Shifts take the amount with register semantics (0-255) and the incoming
//! carry, and return the result together with the carry out.

use common::numutil::NumExt;

use crate::state::{CpuState, Flag};

/// Logical shift left
#[inline]
pub fn lsl(value: u32, by: u32, carry: bool) -> (u32, bool) {
    match by {
        0 => (value, carry),
        1..=31 => (value << by, value.is_bit(32 - by)),
        32 => (0, value.is_bit(0)),
        _ => (0, false),
    }
}

/// Logical shift right
#[inline]
pub fn lsr(value: u32, by: u32, carry: bool) -> (u32, bool) {
    match by {
        0 => (value, carry),
        1..=31 => (value >> by, value.is_bit(by - 1)),
        32 => (0, value.is_bit(31)),
        _ => (0, false),
    }
}

/// Arithmetic shift right
#[inline]
pub fn asr(value: u32, by: u32, carry: bool) -> (u32, bool) {
    match by {
        0 => (value, carry),
        1..=31 => (((value as i32) >> by) as u32, value.is_bit(by - 1)),
        _ => (((value as i32) >> 31) as u32, value.is_bit(31)),
    }
}

/// Rotate right
#[inline]
pub fn ror(value: u32, by: u32, carry: bool) -> (u32, bool) {
    if by == 0 {
        (value, carry)
    } else if by & 31 == 0 {
        (value, value.is_bit(31))
    } else {
        let res = value.rotate_right(by & 31);
        (res, res.is_bit(31))
    }
}

/// Rotate right extended, shifting the carry into bit 31
#[inline]
pub fn rrx(value: u32, carry: bool) -> (u32, bool) {
    ((value >> 1).set_bit(31, carry), value.is_bit(0))
}

impl CpuState {
    #[inline]
    pub(crate) fn set_nz<const SET_CPSR: bool>(&mut self, value: u32) {
        if SET_CPSR {
            self.set_flag(Flag::Neg, value.is_bit(31));
            self.set_flag(Flag::Zero, value == 0);
        }
    }

    #[inline]
    pub(crate) fn set_nzc<const SET_CPSR: bool>(&mut self, value: u32, carry: bool) {
        if SET_CPSR {
            self.set_nz::<true>(value);
            self.set_flag(Flag::Carry, carry);
        }
    }

    #[inline]
    fn set_nzcv<const SET_CPSR: bool>(&mut self, value: u32, carry: bool, overflow: bool) {
        if SET_CPSR {
            self.set_nzc::<true>(value, carry);
            self.set_flag(Flag::Overflow, overflow);
        }
    }

    /// Addition
    pub(crate) fn add<const SET_CPSR: bool>(&mut self, a: u32, b: u32) -> u32 {
        self.adc::<SET_CPSR>(a, b, 0)
    }

    /// Subtraction
    pub(crate) fn sub<const SET_CPSR: bool>(&mut self, a: u32, b: u32) -> u32 {
        self.adc::<SET_CPSR>(a, !b, 1)
    }

    /// Addition (c -> Carry)
    pub(crate) fn adc<const SET_CPSR: bool>(&mut self, a: u32, b: u32, c: u32) -> u32 {
        let wide = (a as u64) + (b as u64) + (c as u64);
        let res = wide as u32;
        self.set_nzcv::<SET_CPSR>(res, wide > 0xFFFF_FFFF, (!(a ^ b) & (a ^ res)).is_bit(31));
        res
    }

    /// Subtraction (c -> Carry)
    pub(crate) fn sbc<const SET_CPSR: bool>(&mut self, a: u32, b: u32, c: u32) -> u32 {
        self.adc::<SET_CPSR>(a, !b, c)
    }

    /// Carry flag as a number, for ADC/SBC
    #[inline]
    pub(crate) fn carry(&self) -> u32 {
        self.is_flag(Flag::Carry) as u32
    }
}

/// Signed saturating addition, returning if the result was clamped.
pub fn qadd(a: u32, b: u32) -> (u32, bool) {
    match (a as i32).checked_add(b as i32) {
        Some(res) => (res as u32, false),
        None if (a as i32) < 0 => (i32::MIN as u32, true),
        None => (i32::MAX as u32, true),
    }
}

/// Signed saturating subtraction, returning if the result was clamped.
pub fn qsub(a: u32, b: u32) -> (u32, bool) {
    match (a as i32).checked_sub(b as i32) {
        Some(res) => (res as u32, false),
        None if (a as i32) < 0 => (i32::MIN as u32, true),
        None => (i32::MAX as u32, true),
    }
}
