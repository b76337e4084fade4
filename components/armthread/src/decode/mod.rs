// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! Decoded-instruction model and the decoders producing it.

pub mod arm;
pub mod thumb;

use alloc::boxed::Box;

use arrayvec::ArrayVec;
use bitflags::bitflags;
use common::numutil::NumExt;
use num_derive::FromPrimitive;

use self::{arm::ArmDecoder, thumb::ThumbDecoder};
use crate::{
    config::MAX_BLOCK_INSTRUCTIONS,
    interface::{Bus, CpuId},
    memory::Address,
};

/// Condition code for "always".
pub const COND_AL: u8 = 0xE;
/// Condition code for "never" (ARMv4) or the unconditional space (ARMv5).
pub const COND_NV: u8 = 0xF;

pub type Register = u8;
pub const PC: Register = 15;
pub const LR: Register = 14;
pub const SP: Register = 13;

bitflags! {
    /// Condition flags, as tracked by the liveness pass.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
    pub struct FlagMask: u8 {
        const N = 1 << 3;
        const Z = 1 << 2;
        const C = 1 << 1;
        const V = 1 << 0;
    }
}

impl FlagMask {
    /// Flags a condition code reads.
    pub fn read_by_condition(cond: u8) -> Self {
        match cond {
            0x0 | 0x1 => Self::Z,
            0x2 | 0x3 => Self::C,
            0x4 | 0x5 => Self::N,
            0x6 | 0x7 => Self::V,
            0x8 | 0x9 => Self::C | Self::Z,
            0xA | 0xB => Self::N | Self::V,
            0xC | 0xD => Self::N | Self::Z | Self::V,
            _ => Self::empty(),
        }
    }
}

#[derive(FromPrimitive, Debug, Copy, Clone, PartialEq, Eq, PartialOrd)]
pub enum AluOp {
    And,
    Eor,
    Sub,
    Rsb,
    Add,
    Adc,
    Sbc,
    Rsc,
    Tst,
    Teq,
    Cmp,
    Cmn,
    Orr,
    Mov,
    Bic,
    Mvn,
}

impl AluOp {
    pub fn should_write(self) -> bool {
        self < Self::Tst || self > Self::Cmn
    }

    /// Logical operations take the carry from the shifter and leave V alone.
    pub fn is_logical(self) -> bool {
        matches!(
            self,
            Self::And | Self::Eor | Self::Tst | Self::Teq | Self::Orr | Self::Mov | Self::Bic | Self::Mvn
        )
    }

    pub fn uses_rn(self) -> bool {
        !matches!(self, Self::Mov | Self::Mvn)
    }
}

#[derive(FromPrimitive, Debug, Copy, Clone, PartialEq, Eq)]
pub enum ShiftType {
    Lsl,
    Lsr,
    Asr,
    Ror,
}

/// Second operand of a data processing instruction.
/// Immediate shift amounts are normalized: LSR/ASR #0 mean #32 and
/// ROR #0 becomes RRX.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Operand {
    /// A rotated immediate. Carries the shifter carry out if the
    /// rotation was not zero.
    Imm { value: u32, carry: Option<bool> },
    ShiftImm { rm: Register, shift: ShiftType, amount: u8 },
    Rrx { rm: Register },
    ShiftReg { rm: Register, shift: ShiftType, rs: Register },
}

impl Operand {
    /// Plain register operand.
    pub fn reg(rm: Register) -> Self {
        Self::ShiftImm {
            rm,
            shift: ShiftType::Lsl,
            amount: 0,
        }
    }

    pub fn imm(value: u32) -> Self {
        Self::Imm { value, carry: None }
    }

    /// Decode an immediate shift, normalizing the amount.
    pub fn shift_imm(rm: Register, shift: ShiftType, amount: u8) -> Self {
        match (shift, amount) {
            (ShiftType::Ror, 0) => Self::Rrx { rm },
            (ShiftType::Lsr | ShiftType::Asr, 0) => Self::ShiftImm {
                rm,
                shift,
                amount: 32,
            },
            _ => Self::ShiftImm { rm, shift, amount },
        }
    }

    fn registers(self) -> u16 {
        match self {
            Self::Imm { .. } => 0,
            Self::ShiftImm { rm, .. } | Self::Rrx { rm } => bit(rm),
            Self::ShiftReg { rm, rs, .. } => bit(rm) | bit(rs),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MulOp {
    Mul,
    Mla,
    Umull,
    Umlal,
    Smull,
    Smlal,
}

impl MulOp {
    pub fn is_long(self) -> bool {
        !matches!(self, Self::Mul | Self::Mla)
    }

    pub fn accumulates(self) -> bool {
        matches!(self, Self::Mla | Self::Umlal | Self::Smlal)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HalfMulOp {
    SmlaXy,
    SmlawY,
    SmulwY,
    SmlalXy,
    SmulXy,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SatOp {
    Qadd,
    Qsub,
    QdAdd,
    QdSub,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MsrSource {
    Imm(u32),
    Reg(Register),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd)]
pub enum TransferKind {
    LoadWord,
    LoadByte,
    StoreWord,
    StoreByte,
    LoadHalfword,
    StoreHalfword,
    LoadSignedByte,
    LoadSignedHalfword,
    LoadDoubleWord,
    StoreDoubleWord,
}

impl TransferKind {
    pub fn is_load(self) -> bool {
        matches!(
            self,
            Self::LoadWord
                | Self::LoadByte
                | Self::LoadHalfword
                | Self::LoadSignedByte
                | Self::LoadSignedHalfword
                | Self::LoadDoubleWord
        )
    }

    pub fn is_double(self) -> bool {
        matches!(self, Self::LoadDoubleWord | Self::StoreDoubleWord)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Offset {
    Imm(u32),
    Reg {
        rm: Register,
        shift: ShiftType,
        amount: u8,
    },
    /// Register offset shifted by RRX
    Rrx { rm: Register },
}

/// Addressing mode of a single data transfer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IndexMode {
    /// Access at base, then write back base +- offset.
    Post,
    /// Access at base +- offset.
    Pre,
    /// Access at base +- offset and write it back.
    PreWriteback,
}

/// One decoded operation, with every PC-relative value the
/// decoder could resolve already baked in.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Op {
    Alu {
        op: AluOp,
        s: bool,
        rd: Register,
        rn: Register,
        operand: Operand,
    },
    /// Multiplies; the long forms use `rd` for the high
    /// and `rn` for the low word.
    Mul {
        op: MulOp,
        s: bool,
        rd: Register,
        rn: Register,
        rs: Register,
        rm: Register,
    },
    HalfMul {
        op: HalfMulOp,
        rd: Register,
        rn: Register,
        rs: Register,
        rm: Register,
        x_top: bool,
        y_top: bool,
    },
    Clz {
        rd: Register,
        rm: Register,
    },
    Sat {
        op: SatOp,
        rd: Register,
        rn: Register,
        rm: Register,
    },
    Mrs {
        rd: Register,
        spsr: bool,
    },
    /// `mask` holds the written field bits (f, s, x, c) as bits 3-0.
    Msr {
        spsr: bool,
        mask: u8,
        source: MsrSource,
    },
    Transfer {
        kind: TransferKind,
        rd: Register,
        rn: Register,
        offset: Offset,
        index: IndexMode,
        up: bool,
    },
    Block {
        load: bool,
        pre: bool,
        up: bool,
        writeback: bool,
        user: bool,
        rn: Register,
        list: u16,
        cycles: u8,
        pc_cycles: u8,
    },
    Swap {
        byte: bool,
        rd: Register,
        rn: Register,
        rm: Register,
    },
    /// B and BL; `exchange` makes it BLX to THUMB.
    Branch {
        link: bool,
        exchange: bool,
        target: u32,
    },
    BranchExchange {
        link: bool,
        rm: Register,
    },
    /// First half of a THUMB long branch: LR = PC + offset.
    LinkPrefix {
        value: u32,
    },
    /// Second half of a THUMB long branch.
    LinkSuffix {
        offset: u32,
        exchange: bool,
    },
    Coproc {
        load: bool,
        cp: u8,
        opc1: u8,
        crn: u8,
        crm: u8,
        opc2: u8,
        rd: Register,
    },
    Swi {
        comment: u32,
    },
    Bkpt,
    Undefined,
    /// An instruction without any effect, keeping the given cost.
    Nop {
        cycles: u8,
    },
}

#[inline]
fn bit(reg: Register) -> u16 {
    1 << (reg & 0xF)
}

impl Op {
    /// Registers read and written by this operation.
    pub fn registers(&self) -> (u16, u16) {
        match *self {
            Op::Alu {
                op, rd, rn, operand, ..
            } => {
                let read = operand.registers() | if op.uses_rn() { bit(rn) } else { 0 };
                (read, if op.should_write() { bit(rd) } else { 0 })
            }
            Op::Mul {
                op, rd, rn, rs, rm, ..
            } => {
                let mut read = bit(rs) | bit(rm);
                if op.accumulates() {
                    read |= bit(rn);
                    if op.is_long() {
                        read |= bit(rd);
                    }
                }
                let write = if op.is_long() { bit(rd) | bit(rn) } else { bit(rd) };
                (read, write)
            }
            Op::HalfMul {
                op, rd, rn, rs, rm, ..
            } => match op {
                HalfMulOp::SmlaXy | HalfMulOp::SmlawY => (bit(rn) | bit(rs) | bit(rm), bit(rd)),
                HalfMulOp::SmlalXy => (bit(rd) | bit(rn) | bit(rs) | bit(rm), bit(rd) | bit(rn)),
                HalfMulOp::SmulwY | HalfMulOp::SmulXy => (bit(rs) | bit(rm), bit(rd)),
            },
            Op::Clz { rd, rm } => (bit(rm), bit(rd)),
            Op::Sat { rd, rn, rm, .. } => (bit(rn) | bit(rm), bit(rd)),
            Op::Mrs { rd, .. } => (0, bit(rd)),
            Op::Msr { source, .. } => match source {
                MsrSource::Reg(rm) => (bit(rm), 0),
                MsrSource::Imm(_) => (0, 0),
            },
            Op::Transfer {
                kind,
                rd,
                rn,
                offset,
                index,
                ..
            } => {
                let mut read = bit(rn);
                if let Offset::Reg { rm, .. } | Offset::Rrx { rm } = offset {
                    read |= bit(rm);
                }
                let mut write = 0;
                if kind.is_load() {
                    write |= bit(rd);
                    if kind.is_double() {
                        write |= bit(rd + 1);
                    }
                } else {
                    read |= bit(rd);
                    if kind.is_double() {
                        read |= bit(rd + 1);
                    }
                }
                if index != IndexMode::Pre && rn != PC {
                    write |= bit(rn);
                }
                (read, write)
            }
            Op::Block {
                load,
                rn,
                list,
                writeback,
                ..
            } => {
                let base = bit(rn);
                let wb = if writeback { base } else { 0 };
                if load {
                    (base, list | wb)
                } else {
                    (base | list, wb)
                }
            }
            Op::Swap { rd, rn, rm, .. } => (bit(rn) | bit(rm), bit(rd)),
            Op::Branch { link, .. } => (0, bit(PC) | if link { bit(LR) } else { 0 }),
            Op::BranchExchange { link, rm } => (bit(rm), bit(PC) | if link { bit(LR) } else { 0 }),
            Op::LinkPrefix { .. } => (0, bit(LR)),
            Op::LinkSuffix { .. } => (bit(LR), bit(PC) | bit(LR)),
            Op::Coproc { load, rd, .. } => {
                if load && rd != PC {
                    (0, bit(rd))
                } else if load {
                    (0, 0)
                } else {
                    (bit(rd), 0)
                }
            }
            Op::Swi { .. } => (0, bit(PC)),
            Op::Bkpt | Op::Undefined | Op::Nop { .. } => (0, 0),
        }
    }

    /// Flags read and written by this operation.
    pub fn flags(&self) -> (FlagMask, FlagMask) {
        match *self {
            Op::Alu {
                op, s, operand, rd, ..
            } => {
                let mut read = FlagMask::empty();
                if matches!(op, AluOp::Adc | AluOp::Sbc | AluOp::Rsc) || matches!(operand, Operand::Rrx { .. }) {
                    read |= FlagMask::C;
                }
                // With Rd = PC, S restores the CPSR from the SPSR instead.
                let write = if !s || (rd == PC && op.should_write()) {
                    FlagMask::empty()
                } else if op.is_logical() {
                    match operand {
                        // Carry is left alone
                        Operand::Imm { carry: None, .. } | Operand::ShiftImm { amount: 0, .. } => {
                            FlagMask::N | FlagMask::Z
                        }
                        // Carry is left alone only when Rs is 0
                        Operand::ShiftReg { .. } => {
                            read |= FlagMask::C;
                            FlagMask::N | FlagMask::Z | FlagMask::C
                        }
                        _ => FlagMask::N | FlagMask::Z | FlagMask::C,
                    }
                } else {
                    FlagMask::all()
                };
                (read, write)
            }
            Op::Mul { s: true, .. } => (FlagMask::empty(), FlagMask::N | FlagMask::Z),
            Op::Mrs { .. } => (FlagMask::all(), FlagMask::empty()),
            Op::Coproc {
                load: true, rd: PC, ..
            } => (FlagMask::empty(), FlagMask::all()),
            _ => (FlagMask::empty(), FlagMask::empty()),
        }
    }

    /// If executing this may leave the block early: PC writes, memory
    /// accesses that may abort, traps and status register accesses.
    pub fn may_exit(&self) -> bool {
        matches!(
            self,
            Op::Transfer { .. }
                | Op::Block { .. }
                | Op::Swap { .. }
                | Op::Swi { .. }
                | Op::Undefined
                | Op::Mrs { .. }
                | Op::Msr { .. }
                | Op::Coproc { .. }
        ) || self.registers().1.is_bit(PC as u32)
    }
}

/// One decoded guest instruction, plus analysis metadata.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub addr: u32,
    pub raw: u32,
    pub thumb: bool,
    pub cond: u8,
    pub op: Op,
    pub flags_read: FlagMask,
    pub flags_written: FlagMask,
    pub reads_pc: bool,
    pub writes_pc: bool,
    pub sub_block: u16,
    pub cpu: CpuId,
}

impl Instruction {
    pub fn new(cpu: CpuId, addr: u32, raw: u32, thumb: bool, cond: u8, op: Op) -> Self {
        let mut inst = Self {
            addr,
            raw,
            thumb,
            cond,
            op,
            flags_read: FlagMask::empty(),
            flags_written: FlagMask::empty(),
            reads_pc: false,
            writes_pc: false,
            sub_block: 0,
            cpu,
        };
        inst.refresh();
        inst
    }

    /// Recompute the metadata derived from the operation.
    pub fn refresh(&mut self) {
        let (read, write) = self.op.registers();
        let (flags_read, flags_written) = self.op.flags();
        self.reads_pc = read.is_bit(PC as u32);
        self.writes_pc = write.is_bit(PC as u32);
        self.flags_read = flags_read | FlagMask::read_by_condition(self.cond);
        self.flags_written = flags_written;
    }

    pub fn width(&self) -> u32 {
        if self.thumb {
            2
        } else {
            4
        }
    }

    /// The value reading r15 yields in this instruction.
    pub fn r15(&self) -> u32 {
        self.addr.wrapping_add(self.width() * 2)
    }

    /// Address following this instruction.
    pub fn next(&self) -> u32 {
        self.addr.wrapping_add(self.width())
    }

    pub fn is_unconditional(&self) -> bool {
        self.cond == COND_AL
    }

    /// If this instruction can never execute.
    pub fn is_never(&self) -> bool {
        self.cond == COND_NV
    }

    /// If decoding needs to stop after this instruction.
    fn ends_run(&self) -> bool {
        matches!(self.op, Op::Undefined) || (self.writes_pc && self.is_unconditional())
    }
}

pub type DecodedRun = ArrayVec<Instruction, MAX_BLOCK_INSTRUCTIONS>;

/// Decode lookup tables of both instruction sets for both architecture
/// versions. Built once per engine.
pub struct Decoder {
    arm_v5: Box<[ArmDecoder]>,
    arm_v4: Box<[ArmDecoder]>,
    thumb_v5: Box<[ThumbDecoder]>,
    thumb_v4: Box<[ThumbDecoder]>,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            arm_v5: arm::get_lut_table::<true>(),
            arm_v4: arm::get_lut_table::<false>(),
            thumb_v5: thumb::get_lut_table::<true>(),
            thumb_v4: thumb::get_lut_table::<false>(),
        }
    }

    pub fn arm(&self, cpu: CpuId, addr: u32, raw: u32) -> Instruction {
        let lut = if cpu.is_v5() { &self.arm_v5 } else { &self.arm_v4 };
        arm::decode(lut, cpu, addr, raw)
    }

    pub fn thumb(&self, cpu: CpuId, addr: u32, raw: u16) -> Instruction {
        let lut = if cpu.is_v5() { &self.thumb_v5 } else { &self.thumb_v4 };
        thumb::decode(lut, cpu, addr, raw)
    }

    /// Decode a run of instructions starting at `start`. Stops after an
    /// unconditional PC write, an undefined instruction or `max` instructions,
    /// at a page boundary, and before an instruction that cannot be fetched.
    pub fn decode_run<S: Bus>(&self, bus: &mut S, cpu: CpuId, start: u32, thumb: bool, max: usize) -> DecodedRun {
        let mut run = DecodedRun::new();
        let max = max.min(run.capacity());
        let mut addr = start;

        while run.len() < max {
            let inst = if thumb {
                let Some(raw) = bus.get::<u16>(cpu, Address(addr)) else { break };
                self.thumb(cpu, addr, raw)
            } else {
                let Some(raw) = bus.get::<u32>(cpu, Address(addr)) else { break };
                self.arm(cpu, addr, raw)
            };

            let ends = inst.ends_run();
            run.push(inst);
            addr = inst.next();
            if ends || Address(addr).on_page_boundary() {
                break;
            }
        }
        run
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
