// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

use bitmatch::bitmatch;
use common::numutil::NumExt;

use crate::interface::CpuId;

/// Macro for creating accessors for mode-dependent registers.
macro_rules! mode_reg {
    ($reg:ident, $get:ident, $set:ident) => {
        pub fn $get(&self) -> u32 {
            self.$reg[self.mode().bank()]
        }

        pub(crate) fn $set(&mut self, val: u32) {
            let bank = self.mode().bank();
            self.$reg[bank] = val;
        }
    };
}

/// A register with values for FIQ and all other modes
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct FiqReg {
    pub reg: u32,
    pub fiq: u32,
}

/// A register with different values for the different CPU modes
type ModeReg = [u32; 6];

/// Architectural state of one guest CPU.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct CpuState {
    /// Visible registers. r15 holds the pipeline-visible PC
    /// (instruction + 2 * width) while a block runs, and the
    /// target of a PC write right after one.
    pub registers: [u32; 16],
    fiqs: [FiqReg; 5],
    sp: ModeReg,
    lr: ModeReg,
    cpsr: u32,
    spsr: ModeReg,

    /// Address of the next instruction to execute.
    pub next_instruction: u32,
    /// Set when the CPU tried to execute unmapped memory.
    pub halted: bool,
    pub cpu: CpuId,
}

impl CpuState {
    pub fn new(cpu: CpuId) -> Self {
        Self {
            registers: [0; 16],
            fiqs: Default::default(),
            sp: Default::default(),
            lr: Default::default(),
            cpsr: 0xD3,
            spsr: Default::default(),
            next_instruction: 0,
            halted: false,
            cpu,
        }
    }

    #[inline]
    pub fn cpsr(&self) -> u32 {
        self.cpsr
    }

    mode_reg!(sp, cpsr_sp, set_cpsr_sp);
    mode_reg!(lr, cpsr_lr, set_cpsr_lr);
    mode_reg!(spsr, spsr, set_spsr);

    #[inline]
    pub fn is_flag(&self, flag: Flag) -> bool {
        self.cpsr.is_bit(flag as u32)
    }

    #[inline]
    pub(crate) fn set_flag(&mut self, flag: Flag, en: bool) {
        self.cpsr = self.cpsr.set_bit(flag as u32, en);
    }

    /// Get the current CPU mode.
    pub fn mode(&self) -> Mode {
        Mode::get(self.cpsr).unwrap_or(Mode::User)
    }

    /// Set the mode bits inside CPSR. Returns the previous mode.
    pub(crate) fn set_mode(&mut self, mode: Mode) -> Mode {
        self.set_cpsr((self.cpsr & !0x1F) | mode.to_u32())
    }

    /// Set the CPSR without considering a mode switch.
    /// Only use this if the mode bits stay the same.
    pub(crate) fn set_cpsr_flags(&mut self, value: u32) {
        debug_assert_eq!(value & 0x1F, self.cpsr & 0x1F);
        self.cpsr = value;
    }

    /// Replace the CPSR, swapping register banks when the mode changes.
    /// Returns the mode that was active before.
    pub fn set_cpsr(&mut self, value: u32) -> Mode {
        let previous = self.mode();
        self.store_bank(previous);
        self.cpsr = value;
        self.load_bank(self.mode());
        previous
    }

    fn store_bank(&mut self, mode: Mode) {
        let fiq = mode == Mode::Fiq;
        for (slot, &value) in self.fiqs.iter_mut().zip(&self.registers[8..13]) {
            *if fiq { &mut slot.fiq } else { &mut slot.reg } = value;
        }
        self.set_cpsr_sp(self.registers[13]);
        self.set_cpsr_lr(self.registers[14]);
    }

    fn load_bank(&mut self, mode: Mode) {
        let fiq = mode == Mode::Fiq;
        for (reg, slot) in self.registers[8..13].iter_mut().zip(&self.fiqs) {
            *reg = if fiq { slot.fiq } else { slot.reg };
        }
        self.registers[13] = self.cpsr_sp();
        self.registers[14] = self.cpsr_lr();
    }

    /// Evaluate a 4-bit condition code against the current flags.
    /// NV is always false here; ARMv5 decodes it as its own space.
    pub fn eval_condition(&self, cond: u8) -> bool {
        let n = self.is_flag(Flag::Neg);
        let z = self.is_flag(Flag::Zero);
        let c = self.is_flag(Flag::Carry);
        let v = self.is_flag(Flag::Overflow);
        let holds = match cond >> 1 & 7 {
            0 => z,
            1 => c,
            2 => n,
            3 => v,
            4 => c && !z,
            5 => n == v,
            6 => !z && n == v,
            _ => return cond & 1 == 0,
        };
        holds != (cond & 1 == 1)
    }

    /// 4 on ARM, 2 on THUMB
    #[inline]
    pub fn instruction_width(&self) -> u32 {
        4 - ((self.is_flag(Flag::Thumb) as u32) << 1)
    }

    /// Make r15 hold the pipeline-visible PC for the next instruction,
    /// for debuggers and other outside observers.
    pub fn sync(&mut self) {
        self.registers[15] = self
            .next_instruction
            .wrapping_add(self.instruction_width() * 2);
    }
}

/// Execution context of the CPU.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Mode {
    User,
    Fiq,
    Supervisor,
    Abort,
    Irq,
    Undefined,
    System,
}

impl Mode {
    #[bitmatch]
    pub fn get(n: u32) -> Option<Self> {
        #[bitmatch]
        match n & 0x1F {
            "10000" => Some(Self::User),
            "10001" => Some(Self::Fiq),
            "10010" => Some(Self::Irq),
            "10011" => Some(Self::Supervisor),
            "10111" => Some(Self::Abort),
            "11011" => Some(Self::Undefined),
            "11111" => Some(Self::System),
            _ => None,
        }
    }

    pub fn to_u32(self) -> u32 {
        match self {
            Self::User => 0b10000,
            Self::Fiq => 0b10001,
            Self::Irq => 0b10010,
            Self::Supervisor => 0b10011,
            Self::Abort => 0b10111,
            Self::Undefined => 0b11011,
            Self::System => 0b11111,
        }
    }

    /// Index into the banked register arrays. User and System share one.
    fn bank(self) -> usize {
        match self {
            Self::System => 0,
            mode => mode as usize,
        }
    }

    /// If this mode has a saved program status register.
    pub fn has_spsr(self) -> bool {
        !matches!(self, Self::User | Self::System)
    }
}

/// Flags inside CPSR.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Flag {
    Neg = 31,
    Zero = 30,
    Carry = 29,
    Overflow = 28,
    QClamped = 27,
    IrqDisable = 7,
    FiqDisable = 6,
    Thumb = 5,
}

impl Flag {
    pub fn mask(self) -> u32 {
        1 << self as u32
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn banked_registers_swap() {
        let mut state = CpuState::new(CpuId::Arm9);
        state.registers[13] = 0x100;
        state.registers[14] = 0x200;
        state.registers[8] = 8;

        let prev = state.set_cpsr(0x11);
        assert_eq!(prev, Mode::Supervisor);
        assert_eq!(state.mode(), Mode::Fiq);
        assert_eq!(state.registers[13], 0);
        assert_eq!(state.registers[8], 0);
        state.registers[8] = 0x88;

        state.set_cpsr(0xD3);
        assert_eq!(state.registers[13], 0x100);
        assert_eq!(state.registers[14], 0x200);
        assert_eq!(state.registers[8], 8);

        state.set_cpsr(0x11);
        assert_eq!(state.registers[8], 0x88);
    }

    #[test]
    fn user_and_system_share_bank() {
        let mut state = CpuState::new(CpuId::Arm7);
        state.set_cpsr(0x1F);
        state.registers[13] = 0x0300_7F00;
        state.set_cpsr(0x10);
        assert_eq!(state.registers[13], 0x0300_7F00);
        assert!(!state.mode().has_spsr());
    }

    #[test]
    fn conditions() {
        let mut state = CpuState::new(CpuId::Arm9);
        state.set_cpsr_flags(0x6000_00D3); // Z, C
        assert!(state.eval_condition(0x0)); // EQ
        assert!(!state.eval_condition(0x1)); // NE
        assert!(state.eval_condition(0x2)); // CS
        assert!(!state.eval_condition(0x8)); // HI
        assert!(state.eval_condition(0x9)); // LS
        assert!(state.eval_condition(0xE));
        assert!(!state.eval_condition(0xF));
    }
}
