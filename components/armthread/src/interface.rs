// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

use core::fmt::Display;

use common::numutil::NumExt;

use crate::{
    memory::{Access, Address},
    state::CpuState,
    Exception,
};

/// The two guest CPUs an engine can drive.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum CpuId {
    /// ARM946E-S, ARMv5TE.
    Arm9 = 0,
    /// ARM7TDMI, ARMv4T.
    Arm7 = 1,
}

impl CpuId {
    pub const ALL: [CpuId; 2] = [CpuId::Arm9, CpuId::Arm7];

    /// If this CPU exhibits ARMv5 behavior.
    #[inline]
    pub fn is_v5(self) -> bool {
        self == CpuId::Arm9
    }

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

impl Display for CpuId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CpuId::Arm9 => write!(f, "ARM9"),
            CpuId::Arm7 => write!(f, "ARM7"),
        }
    }
}

/// A region of executable guest memory, as seen by the lookup table.
/// `start` and `end` must be aligned to 16KiB; the backing store
/// is `mirror` bytes large (a power of two) and repeats across the region.
///
/// The lookup table only sees the low 28 bits of an address, so regions
/// lie below `0x1000_0000` and code above is found at its masked address.
/// ARM9 high vectors at `0xFFFF_0000` are declared as the region
/// `0x0FFF_0000..0x1000_0000`, which then no other region may overlap.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CodeRegion {
    pub start: u32,
    pub end: u32,
    pub mirror: u32,
}

impl CodeRegion {
    pub const fn new(start: u32, end: u32, mirror: u32) -> Self {
        Self { start, end, mirror }
    }
}

/// Trait for a system that contains the CPUs driven by the engine.
pub trait Bus: Sized + 'static {
    /// Get the value at the given memory address.
    /// `None` means there is no backing store and the access aborts.
    fn get<T: RwType>(&mut self, cpu: CpuId, addr: Address) -> Option<T>;
    /// Set the value at the given memory address.
    /// Returns false if there is no backing store and the access aborts.
    fn set<T: RwType>(&mut self, cpu: CpuId, addr: Address, value: T) -> bool;
    /// Get the access time in cycles for the given memory address.
    fn wait_time<T: RwType>(&mut self, cpu: CpuId, addr: Address, access: Access) -> u16;

    /// Layout of executable memory for the given CPU.
    /// An empty slice makes the engine use a flat lookup table instead.
    fn code_regions(&self, _cpu: CpuId) -> &'static [CodeRegion] {
        &[]
    }

    /// Base address for exception vectors.
    fn exception_vector_base(&self, _cpu: CpuId) -> Address {
        Address(0)
    }

    /// Callback to perform any system-specific behavior on an exception.
    fn exception_happened(&mut self, _cpu: &mut CpuState, _kind: Exception) {}

    /// Callback after the CPSR was written by an instruction, for any
    /// cached decode of it the system keeps.
    fn status_changed(&mut self, _cpu: &mut CpuState) {}

    /// High-level emulation of a software interrupt.
    /// Return the cycles taken if it was handled, or `None` to take the
    /// exception on the guest.
    fn software_interrupt(&mut self, _cpu: &mut CpuState, _comment: u32) -> Option<u16> {
        None
    }

    /// Callback for setting a CP15 register.
    fn cp15_write(&mut self, _cpu: CpuId, _value: u32, _cn: u32, _cm: u32, _op1: u32, _op2: u32) {}
    /// Callback for getting a CP15 register.
    fn cp15_read(&mut self, _cpu: CpuId, _cn: u32, _cm: u32, _op1: u32, _op2: u32) -> u32 {
        0
    }

    /// Read a value, returning it together with its wait time.
    /// The address is aligned to the width of the type.
    fn read<T: RwType>(&mut self, cpu: CpuId, addr: Address, access: Access) -> Option<(u32, u16)> {
        let addr = addr.align(T::WIDTH);
        let value = self.get::<T>(cpu, addr)?.u32();
        Some((value, self.wait_time::<T>(cpu, addr, access)))
    }

    /// Write a value, returning its wait time.
    /// The address is aligned to the width of the type.
    fn write<T: RwType>(
        &mut self,
        cpu: CpuId,
        addr: Address,
        value: T,
        access: Access,
    ) -> Option<u16> {
        let addr = addr.align(T::WIDTH);
        if self.set::<T>(cpu, addr, value) {
            Some(self.wait_time::<T>(cpu, addr, access))
        } else {
            None
        }
    }
}

/// Trait for a type that the CPU can read/write memory with.
/// On this ARM CPU, it is u8, u16, u32.
pub trait RwType: NumExt + 'static {
    /// Width in bytes.
    const WIDTH: u32;

    fn from_u32(value: u32) -> Self;
}

impl RwType for u8 {
    const WIDTH: u32 = 1;

    fn from_u32(value: u32) -> Self {
        value as u8
    }
}

impl RwType for u16 {
    const WIDTH: u32 = 2;

    fn from_u32(value: u32) -> Self {
        value as u16
    }
}

impl RwType for u32 {
    const WIDTH: u32 = 4;

    fn from_u32(value: u32) -> Self {
        value
    }
}
