// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

use alloc::boxed::Box;

use bitmatch::bitmatch;
use common::numutil::{NumExt, U32Ext};
use num_traits::FromPrimitive;

use super::{
    AluOp, HalfMulOp, IndexMode, Instruction, MsrSource, MulOp, Offset, Op, Operand, Register,
    SatOp, ShiftType, TransferKind, COND_AL, COND_NV,
};
use crate::interface::CpuId;

#[derive(Copy, Clone)]
pub struct ArmInst(pub u32);

impl ArmInst {
    pub fn reg(self, idx: u32) -> Register {
        self.0.bits(idx, 4) as Register
    }

    pub fn is_bit(self, bit: u32) -> bool {
        self.0.is_bit(bit)
    }

    pub fn condition_code(self) -> u8 {
        (self.0 >> 28) as u8
    }

    fn shift_type(self) -> ShiftType {
        ShiftType::from_bits(self.0.bits(5, 2))
    }

    fn alu(self, operand: Operand) -> Op {
        Op::Alu {
            op: AluOp::from_bits(self.0.bits(21, 4)),
            s: self.is_bit(20),
            rd: self.reg(12),
            rn: self.reg(16),
            operand,
        }
    }

    fn rotated_imm(self) -> u32 {
        (self.0 & 0xFF).rotate_right(self.0.bits(8, 4) * 2)
    }

    fn index_mode(self) -> IndexMode {
        match (self.is_bit(24), self.is_bit(21)) {
            (false, _) => IndexMode::Post,
            (true, false) => IndexMode::Pre,
            (true, true) => IndexMode::PreWriteback,
        }
    }

    fn transfer(self, kind: TransferKind, offset: Offset) -> Op {
        Op::Transfer {
            kind,
            rd: self.reg(12),
            rn: self.reg(16),
            offset,
            index: self.index_mode(),
            up: self.is_bit(23),
        }
    }

    fn shifted_offset(self) -> Offset {
        let rm = self.reg(0);
        let amount = self.0.bits(7, 5) as u8;
        match (self.shift_type(), amount) {
            (ShiftType::Ror, 0) => Offset::Rrx { rm },
            (shift @ (ShiftType::Lsr | ShiftType::Asr), 0) => Offset::Reg {
                rm,
                shift,
                amount: 32,
            },
            (shift, amount) => Offset::Reg { rm, shift, amount },
        }
    }

    fn split_imm(self) -> u32 {
        (self.0 & 0xF) | ((self.0 >> 4) & 0xF0)
    }
}

impl AluOp {
    pub fn from_bits(bits: u32) -> Self {
        Self::from_u32(bits & 0xF).unwrap_or(Self::And)
    }
}

impl ShiftType {
    pub fn from_bits(bits: u32) -> Self {
        Self::from_u32(bits & 3).unwrap_or(Self::Lsl)
    }
}

/// Decoders get the instruction and its address, to bake in
/// PC-relative values.
pub type ArmDecoder = fn(ArmInst, u32) -> Op;

/// Decode an ARM instruction at the given address, using the
/// table built for the architecture of `cpu`.
pub fn decode(lut: &[ArmDecoder], cpu: CpuId, addr: u32, raw: u32) -> Instruction {
    let inst = ArmInst(raw);
    let mut cond = inst.condition_code();
    let op = if cond == COND_NV && cpu.is_v5() {
        cond = COND_AL;
        unconditional(inst, addr)
    } else {
        lut[arm_inst_to_lookup_idx(raw)](inst, addr)
    };
    Instruction::new(cpu, addr, raw, false, cond, op)
}

pub const fn arm_inst_to_lookup_idx(inst: u32) -> usize {
    (((inst >> 16) & 0xFF0) | ((inst >> 4) & 0xF)) as usize
}

fn branch_target(i: ArmInst, addr: u32) -> u32 {
    addr.wrapping_add(8).wrapping_add_signed(i.0.i24() << 2)
}

/// The ARMv5 unconditional instruction space (condition NV).
#[bitmatch]
fn unconditional(i: ArmInst, addr: u32) -> Op {
    #[bitmatch]
    match arm_inst_to_lookup_idx(i.0) {
        // BLX immediate, with the H bit selecting the halfword
        "101?????_????" => Op::Branch {
            link: true,
            exchange: true,
            target: branch_target(i, addr).wrapping_add((i.is_bit(24) as u32) << 1),
        },
        // PLD
        "01?1?101_????" => Op::Nop { cycles: 1 },
        _ => Op::Undefined,
    }
}

fn undefined(_: ArmInst, _: u32) -> Op {
    Op::Undefined
}

pub fn get_lut_table<const V5: bool>() -> Box<[ArmDecoder]> {
    (0..4096).map(get_decoder::<V5>).collect()
}

#[bitmatch]
fn get_decoder<const V5: bool>(code: usize) -> ArmDecoder {
    // Divided by GBATEK:
    #[bitmatch]
    match code {
        // Branch and Branch with Link (B, BL, BX, BLX, SWI, BKPT)
        "101?????_????" => |i, addr| Op::Branch {
            link: i.is_bit(24),
            exchange: false,
            target: branch_target(i, addr),
        },
        "00010010_0001" => |i, _| {
            if i.0.bits(8, 12) == 0xFFF {
                Op::BranchExchange {
                    link: false,
                    rm: i.reg(0),
                }
            } else {
                Op::Undefined
            }
        },
        "00010010_0011" if V5 => |i, _| {
            if i.0.bits(8, 12) == 0xFFF {
                Op::BranchExchange {
                    link: true,
                    rm: i.reg(0),
                }
            } else {
                Op::Undefined
            }
        },
        "00010010_0111" if V5 => |_, _| Op::Bkpt,
        "1111????_????" => |i, _| Op::Swi {
            comment: i.0.bits(0, 24),
        },

        // Special ARM9 Instructions (CLZ, QADD/QSUB)
        "00010110_0001" if V5 => |i, _| Op::Clz {
            rd: i.reg(12),
            rm: i.reg(0),
        },
        "00010??0_0101" if V5 => |i, _| Op::Sat {
            op: match i.0.bits(21, 2) {
                0 => SatOp::Qadd,
                1 => SatOp::Qsub,
                2 => SatOp::QdAdd,
                _ => SatOp::QdSub,
            },
            rd: i.reg(12),
            rn: i.reg(16),
            rm: i.reg(0),
        },

        // Multiply and Multiply-Accumulate
        // Halfword Multiplies
        "00010??0_1??0" if V5 => |i, _| Op::HalfMul {
            op: match i.0.bits(21, 2) {
                0 => HalfMulOp::SmlaXy,
                1 if i.is_bit(5) => HalfMulOp::SmulwY,
                1 => HalfMulOp::SmlawY,
                2 => HalfMulOp::SmlalXy,
                _ => HalfMulOp::SmulXy,
            },
            rd: i.reg(16),
            rn: i.reg(12),
            rs: i.reg(8),
            rm: i.reg(0),
            x_top: i.is_bit(5),
            y_top: i.is_bit(6),
        },
        // Word Multiplies
        "0000000?_1001" => |i, _| mul(i, MulOp::Mul),
        "0000001?_1001" => |i, _| mul(i, MulOp::Mla),
        "0000100?_1001" => |i, _| mul(i, MulOp::Umull),
        "0000101?_1001" => |i, _| mul(i, MulOp::Umlal),
        "0000110?_1001" => |i, _| mul(i, MulOp::Smull),
        "0000111?_1001" => |i, _| mul(i, MulOp::Smlal),

        // Memory: Single Data Swap (SWP)
        "00010?00_1001" => |i, _| Op::Swap {
            byte: i.is_bit(22),
            rd: i.reg(12),
            rn: i.reg(16),
            rm: i.reg(0),
        },

        // Memory: Halfword, Doubleword, and Signed Data Transfer
        "000?????_1011" => |i, _| {
            let kind = if i.is_bit(20) {
                TransferKind::LoadHalfword
            } else {
                TransferKind::StoreHalfword
            };
            i.transfer(kind, halfword_offset(i))
        },
        "000????1_1101" => |i, _| i.transfer(TransferKind::LoadSignedByte, halfword_offset(i)),
        "000????1_1111" => |i, _| i.transfer(TransferKind::LoadSignedHalfword, halfword_offset(i)),
        "000????0_11?1" if V5 => |i, _| {
            if i.reg(12) & 1 == 1 {
                return Op::Undefined;
            }
            let kind = if i.is_bit(5) {
                TransferKind::StoreDoubleWord
            } else {
                TransferKind::LoadDoubleWord
            };
            i.transfer(kind, halfword_offset(i))
        },

        // PSR Transfer (MRS, MSR)
        "00010?00_0000" => |i, _| Op::Mrs {
            rd: i.reg(12),
            spsr: i.is_bit(22),
        },
        "00010?10_0000" => |i, _| Op::Msr {
            spsr: i.is_bit(22),
            mask: i.0.bits(16, 4) as u8,
            source: MsrSource::Reg(i.reg(0)),
        },
        "00110?10_????" => |i, _| Op::Msr {
            spsr: i.is_bit(22),
            mask: i.0.bits(16, 4) as u8,
            source: MsrSource::Imm(i.rotated_imm()),
        },
        // Rest of the miscellaneous space
        "00010??0_????" => undefined,
        "00110?00_????" => undefined,

        // ALU
        "000?????_???0" => |i, _| i.alu(Operand::shift_imm(i.reg(0), i.shift_type(), i.0.bits(7, 5) as u8)),
        "000?????_0??1" => |i, _| {
            i.alu(Operand::ShiftReg {
                rm: i.reg(0),
                shift: i.shift_type(),
                rs: i.reg(8),
            })
        },
        "001?????_????" => |i, _| {
            let value = i.rotated_imm();
            let carry = if i.0.bits(8, 4) != 0 {
                Some(value.is_bit(31))
            } else {
                None
            };
            i.alu(Operand::Imm { value, carry })
        },

        // Memory: Single Data Transfer (LDR, STR)
        "010?????_????" => |i, _| i.transfer(word_byte_kind(i), Offset::Imm(i.0 & 0xFFF)),
        "011?????_???0" => |i, _| i.transfer(word_byte_kind(i), i.shifted_offset()),

        // Memory: Block Data Transfer (LDM, STM)
        "100?????_????" => |i, _| {
            let load = i.is_bit(20);
            Op::Block {
                load,
                pre: i.is_bit(24),
                up: i.is_bit(23),
                writeback: i.is_bit(21),
                user: i.is_bit(22),
                rn: i.reg(16),
                list: i.0.bits(0, 16) as u16,
                cycles: if load { 2 } else { 1 },
                pc_cycles: if load { 4 } else { 1 },
            }
        },

        // Co-Processor Register Transfer (MRC, MCR)
        "1110????_???1" => |i, _| Op::Coproc {
            load: i.is_bit(20),
            cp: i.0.bits(8, 4) as u8,
            opc1: i.0.bits(21, 3) as u8,
            crn: i.reg(16),
            crm: i.reg(0),
            opc2: i.0.bits(5, 3) as u8,
            rd: i.reg(12),
        },

        // CDP, LDC, STC and everything else
        _ => undefined,
    }
}

fn mul(i: ArmInst, op: MulOp) -> Op {
    Op::Mul {
        op,
        s: i.is_bit(20),
        rd: i.reg(16),
        rn: i.reg(12),
        rs: i.reg(8),
        rm: i.reg(0),
    }
}

fn word_byte_kind(i: ArmInst) -> TransferKind {
    match (i.is_bit(20), i.is_bit(22)) {
        (true, false) => TransferKind::LoadWord,
        (true, true) => TransferKind::LoadByte,
        (false, false) => TransferKind::StoreWord,
        (false, true) => TransferKind::StoreByte,
    }
}

fn halfword_offset(i: ArmInst) -> Offset {
    if i.is_bit(22) {
        Offset::Imm(i.split_imm())
    } else {
        Offset::Reg {
            rm: i.reg(0),
            shift: ShiftType::Lsl,
            amount: 0,
        }
    }
}
