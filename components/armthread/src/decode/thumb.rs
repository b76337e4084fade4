// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

use alloc::boxed::Box;

use bitmatch::bitmatch;
use common::numutil::{NumExt, U16Ext};

use super::{
    AluOp, IndexMode, Instruction, Offset, Op, Operand, Register, ShiftType, TransferKind,
    COND_AL, LR, PC, SP,
};
use crate::interface::CpuId;

#[derive(Copy, Clone)]
pub struct ThumbInst(pub u16);

impl ThumbInst {
    /// A low register (3 bits) at the given position.
    pub fn reg(self, idx: u16) -> Register {
        ((self.0 >> idx) & 7) as Register
    }

    pub fn is_bit(self, bit: u16) -> bool {
        self.0.is_bit(bit as u32)
    }

    fn imm5(self) -> u32 {
        self.0.bits(6, 5) as u32
    }

    fn imm8(self) -> u32 {
        self.0.low() as u32
    }

    fn alu(op: AluOp, s: bool, rd: Register, rn: Register, operand: Operand) -> Op {
        Op::Alu {
            op,
            s,
            rd,
            rn,
            operand,
        }
    }

    fn transfer(self, kind: TransferKind, offset: Offset) -> Op {
        Op::Transfer {
            kind,
            rd: self.reg(0),
            rn: self.reg(3),
            offset,
            index: IndexMode::Pre,
            up: true,
        }
    }

    /// The conditional branch condition; 0xE and 0xF are other
    /// instructions in that space.
    fn branch_condition(self) -> Option<u8> {
        let cond = self.0.bits(8, 4) as u8;
        (self.0 >> 12 == 0xD && cond < COND_AL).then_some(cond)
    }
}

pub type ThumbDecoder = fn(ThumbInst, u32) -> Op;

/// Decode a THUMB instruction at the given address.
pub fn decode(lut: &[ThumbDecoder], cpu: CpuId, addr: u32, raw: u16) -> Instruction {
    let inst = ThumbInst(raw);
    let op = lut[(raw >> 6) as usize](inst, addr);
    let cond = inst.branch_condition().unwrap_or(COND_AL);
    Instruction::new(cpu, addr, raw as u32, true, cond, op)
}

fn undefined(_: ThumbInst, _: u32) -> Op {
    Op::Undefined
}

pub fn get_lut_table<const V5: bool>() -> Box<[ThumbDecoder]> {
    (0..1024u16).map(get_decoder::<V5>).collect()
}

#[bitmatch]
fn get_decoder<const V5: bool>(code: u16) -> ThumbDecoder {
    #[bitmatch]
    match code {
        // THUMB.1: move shifted register
        "00000?????" => |i, _| shift_imm(i, ShiftType::Lsl),
        "00001?????" => |i, _| shift_imm(i, ShiftType::Lsr),
        "00010?????" => |i, _| shift_imm(i, ShiftType::Asr),

        // THUMB.2: add/subtract
        "0001100???" => |i, _| ThumbInst::alu(AluOp::Add, true, i.reg(0), i.reg(3), Operand::reg(i.reg(6))),
        "0001101???" => |i, _| ThumbInst::alu(AluOp::Sub, true, i.reg(0), i.reg(3), Operand::reg(i.reg(6))),
        "0001110???" => |i, _| ThumbInst::alu(AluOp::Add, true, i.reg(0), i.reg(3), Operand::imm(i.reg(6) as u32)),
        "0001111???" => |i, _| ThumbInst::alu(AluOp::Sub, true, i.reg(0), i.reg(3), Operand::imm(i.reg(6) as u32)),

        // THUMB.3: move/compare/add/subtract immediate
        "00100?????" => |i, _| ThumbInst::alu(AluOp::Mov, true, i.reg(8), 0, Operand::imm(i.imm8())),
        "00101?????" => |i, _| ThumbInst::alu(AluOp::Cmp, true, i.reg(8), i.reg(8), Operand::imm(i.imm8())),
        "00110?????" => |i, _| ThumbInst::alu(AluOp::Add, true, i.reg(8), i.reg(8), Operand::imm(i.imm8())),
        "00111?????" => |i, _| ThumbInst::alu(AluOp::Sub, true, i.reg(8), i.reg(8), Operand::imm(i.imm8())),

        // THUMB.4: ALU operations
        "010000????" => |i, _| alu_operation(i),

        // THUMB.5: Hi register operations/branch exchange
        "01000100??" => |i, _| {
            let (rd, rs) = hi_regs(i);
            ThumbInst::alu(AluOp::Add, false, rd, rd, Operand::reg(rs))
        },
        "01000101??" => |i, _| {
            let (rd, rs) = hi_regs(i);
            ThumbInst::alu(AluOp::Cmp, true, rd, rd, Operand::reg(rs))
        },
        "01000110??" => |i, _| {
            let (rd, rs) = hi_regs(i);
            ThumbInst::alu(AluOp::Mov, false, rd, 0, Operand::reg(rs))
        },
        "010001110?" => |i, _| Op::BranchExchange {
            link: false,
            rm: hi_regs(i).1,
        },
        "010001111?" if V5 => |i, _| Op::BranchExchange {
            link: true,
            rm: hi_regs(i).1,
        },

        // THUMB.6: load PC-relative
        "01001?????" => |i, addr| {
            // Relative to r15 with bit 1 cleared
            let adjust = addr.wrapping_add(4) & 2;
            let imm = i.imm8() << 2;
            let (offset, up) = if imm >= adjust {
                (imm - adjust, true)
            } else {
                (adjust - imm, false)
            };
            Op::Transfer {
                kind: TransferKind::LoadWord,
                rd: i.reg(8),
                rn: PC,
                offset: Offset::Imm(offset),
                index: IndexMode::Pre,
                up,
            }
        },

        // THUMB.7/8: load/store with register offset
        "0101000???" => |i, _| i.transfer(TransferKind::StoreWord, reg_offset(i)),
        "0101010???" => |i, _| i.transfer(TransferKind::StoreByte, reg_offset(i)),
        "0101100???" => |i, _| i.transfer(TransferKind::LoadWord, reg_offset(i)),
        "0101110???" => |i, _| i.transfer(TransferKind::LoadByte, reg_offset(i)),
        "0101001???" => |i, _| i.transfer(TransferKind::StoreHalfword, reg_offset(i)),
        "0101011???" => |i, _| i.transfer(TransferKind::LoadSignedByte, reg_offset(i)),
        "0101101???" => |i, _| i.transfer(TransferKind::LoadHalfword, reg_offset(i)),
        "0101111???" => |i, _| i.transfer(TransferKind::LoadSignedHalfword, reg_offset(i)),

        // THUMB.9: load/store with immediate offset
        "01100?????" => |i, _| i.transfer(TransferKind::StoreWord, Offset::Imm(i.imm5() << 2)),
        "01101?????" => |i, _| i.transfer(TransferKind::LoadWord, Offset::Imm(i.imm5() << 2)),
        "01110?????" => |i, _| i.transfer(TransferKind::StoreByte, Offset::Imm(i.imm5())),
        "01111?????" => |i, _| i.transfer(TransferKind::LoadByte, Offset::Imm(i.imm5())),

        // THUMB.10: load/store halfword
        "10000?????" => |i, _| i.transfer(TransferKind::StoreHalfword, Offset::Imm(i.imm5() << 1)),
        "10001?????" => |i, _| i.transfer(TransferKind::LoadHalfword, Offset::Imm(i.imm5() << 1)),

        // THUMB.11: load/store SP-relative
        "1001??????" => |i, _| {
            let kind = if i.is_bit(11) {
                TransferKind::LoadWord
            } else {
                TransferKind::StoreWord
            };
            Op::Transfer {
                kind,
                rd: i.reg(8),
                rn: SP,
                offset: Offset::Imm(i.imm8() << 2),
                index: IndexMode::Pre,
                up: true,
            }
        },

        // THUMB.12: get relative address
        "10100?????" => |i, addr| {
            let base = addr.wrapping_add(4) & !2;
            ThumbInst::alu(AluOp::Mov, false, i.reg(8), 0, Operand::imm(base.wrapping_add(i.imm8() << 2)))
        },
        "10101?????" => |i, _| ThumbInst::alu(AluOp::Add, false, i.reg(8), SP, Operand::imm(i.imm8() << 2)),

        // THUMB.13: add offset to stack pointer
        "10110000??" => |i, _| {
            let op = if i.is_bit(7) { AluOp::Sub } else { AluOp::Add };
            ThumbInst::alu(op, false, SP, SP, Operand::imm((i.0 as u32 & 0x7F) << 2))
        },

        // THUMB.14: push/pop registers
        "1011010???" => |i, _| {
            let lr = i.is_bit(8);
            let cycles = if lr { 4 } else { 3 };
            Op::Block {
                load: false,
                pre: true,
                up: false,
                writeback: true,
                user: false,
                rn: SP,
                list: i.imm8() as u16 | ((lr as u16) << LR),
                cycles,
                pc_cycles: cycles,
            }
        },
        "1011110???" => |i, _| Op::Block {
            load: true,
            pre: false,
            up: true,
            writeback: true,
            user: false,
            rn: SP,
            list: i.imm8() as u16 | ((i.is_bit(8) as u16) << PC),
            cycles: 2,
            pc_cycles: 5,
        },
        "10111110??" if V5 => |_, _| Op::Bkpt,

        // THUMB.15: multiple load/store
        "1100??????" => |i, _| {
            let load = i.is_bit(11);
            let rn = i.reg(8);
            let list = i.imm8() as u16;
            let cycles = if load { 3 } else { 2 };
            Op::Block {
                load,
                pre: false,
                up: true,
                writeback: !(load && list.is_bit(rn as u32)),
                user: false,
                rn,
                list,
                cycles,
                pc_cycles: cycles,
            }
        },

        // THUMB.16: conditional branch, with UDF and SWI in its space
        "11011110??" => undefined,
        "11011111??" => |i, _| Op::Swi {
            comment: i.imm8(),
        },
        "1101??????" => |i, addr| Op::Branch {
            link: false,
            exchange: false,
            target: addr.wrapping_add(4).wrapping_add_signed((i.0.low() as i8 as i32) << 1),
        },

        // THUMB.18: unconditional branch
        "11100?????" => |i, addr| Op::Branch {
            link: false,
            exchange: false,
            target: addr.wrapping_add(4).wrapping_add_signed((i.0.i11() as i32) << 1),
        },

        // THUMB.19: long branch with link
        "11110?????" => |i, addr| Op::LinkPrefix {
            value: addr.wrapping_add(4).wrapping_add_signed((i.0.i11() as i32) << 12),
        },
        "11111?????" => |i, _| Op::LinkSuffix {
            offset: (i.0 as u32 & 0x7FF) << 1,
            exchange: false,
        },
        "11101?????" if V5 => |i, _| Op::LinkSuffix {
            offset: (i.0 as u32 & 0x7FF) << 1,
            exchange: true,
        },

        _ => undefined,
    }
}

fn shift_imm(i: ThumbInst, shift: ShiftType) -> Op {
    let operand = Operand::shift_imm(i.reg(3), shift, i.imm5() as u8);
    ThumbInst::alu(AluOp::Mov, true, i.reg(0), 0, operand)
}

fn hi_regs(i: ThumbInst) -> (Register, Register) {
    let rd = i.reg(0) | ((i.is_bit(7) as Register) << 3);
    let rs = i.0.bits(3, 4) as Register;
    (rd, rs)
}

fn reg_offset(i: ThumbInst) -> Offset {
    Offset::Reg {
        rm: i.reg(6),
        shift: ShiftType::Lsl,
        amount: 0,
    }
}

fn alu_operation(i: ThumbInst) -> Op {
    let rd = i.reg(0);
    let rs = i.reg(3);
    let shift = |shift| Operand::ShiftReg { rm: rd, shift, rs };
    let (op, rn, operand) = match i.0.bits(6, 4) {
        0x0 => (AluOp::And, rd, Operand::reg(rs)),
        0x1 => (AluOp::Eor, rd, Operand::reg(rs)),
        0x2 => (AluOp::Mov, 0, shift(ShiftType::Lsl)),
        0x3 => (AluOp::Mov, 0, shift(ShiftType::Lsr)),
        0x4 => (AluOp::Mov, 0, shift(ShiftType::Asr)),
        0x5 => (AluOp::Adc, rd, Operand::reg(rs)),
        0x6 => (AluOp::Sbc, rd, Operand::reg(rs)),
        0x7 => (AluOp::Mov, 0, shift(ShiftType::Ror)),
        0x8 => (AluOp::Tst, rd, Operand::reg(rs)),
        0x9 => (AluOp::Rsb, rs, Operand::imm(0)),
        0xA => (AluOp::Cmp, rd, Operand::reg(rs)),
        0xB => (AluOp::Cmn, rd, Operand::reg(rs)),
        0xC => (AluOp::Orr, rd, Operand::reg(rs)),
        0xD => {
            // Rd = Rs * Rd, with Rd as the multiplier
            return Op::Mul {
                op: super::MulOp::Mul,
                s: true,
                rd,
                rn: 0,
                rs: rd,
                rm: rs,
            };
        }
        0xE => (AluOp::Bic, rd, Operand::reg(rs)),
        _ => (AluOp::Mvn, 0, Operand::reg(rs)),
    };
    ThumbInst::alu(op, true, rd, rn, operand)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::decode::{Decoder, COND_AL};

    fn v5(addr: u32, raw: u16) -> Op {
        Decoder::new().thumb(CpuId::Arm9, addr, raw).op
    }

    #[test]
    fn decode_data_processing() {
        assert_eq!(
            v5(0x100, 0x2005),
            Op::Alu {
                op: AluOp::Mov,
                s: true,
                rd: 0,
                rn: 0,
                operand: Operand::imm(5)
            }
        );
        assert_eq!(
            v5(0x100, 0x4248),
            Op::Alu {
                op: AluOp::Rsb,
                s: true,
                rd: 0,
                rn: 1,
                operand: Operand::imm(0)
            }
        );
        // LSRS r0, r1, #0 is LSR #32
        let Op::Alu { operand, .. } = v5(0x100, 0x0808) else { panic!() };
        assert_eq!(
            operand,
            Operand::ShiftImm {
                rm: 1,
                shift: ShiftType::Lsr,
                amount: 32
            }
        );
        // ADD r0, pc, #4 is resolved at decode time
        assert_eq!(
            v5(0x102, 0xA001),
            Op::Alu {
                op: AluOp::Mov,
                s: false,
                rd: 0,
                rn: 0,
                operand: Operand::imm(0x108)
            }
        );
        // MOV pc, lr
        let inst = Decoder::new().thumb(CpuId::Arm9, 0x100, 0x46F7);
        assert!(inst.writes_pc);
    }

    #[test]
    fn decode_memory() {
        assert_eq!(
            v5(0x102, 0x4801),
            Op::Transfer {
                kind: TransferKind::LoadWord,
                rd: 0,
                rn: PC,
                offset: Offset::Imm(2),
                index: IndexMode::Pre,
                up: true
            }
        );
        assert_eq!(
            v5(0x100, 0xB510),
            Op::Block {
                load: false,
                pre: true,
                up: false,
                writeback: true,
                user: false,
                rn: SP,
                list: 0x4010,
                cycles: 4,
                pc_cycles: 4
            }
        );
        let Op::Block { load, list, pc_cycles, .. } = v5(0x100, 0xBD00) else { panic!() };
        assert!(load);
        assert_eq!((list, pc_cycles), (0x8000, 5));
        // LDMIA r0, {r0, r1} does not write back
        let Op::Block { writeback, .. } = v5(0x100, 0xC803) else { panic!() };
        assert!(!writeback);
    }

    #[test]
    fn decode_branches() {
        let beq = Decoder::new().thumb(CpuId::Arm9, 0x100, 0xD0FE);
        assert_eq!(beq.cond, 0);
        assert_eq!(
            beq.op,
            Op::Branch {
                link: false,
                exchange: false,
                target: 0x100
            }
        );
        assert_eq!(
            v5(0x100, 0xE7FE),
            Op::Branch {
                link: false,
                exchange: false,
                target: 0x100
            }
        );
        assert_eq!(v5(0x100, 0xF000), Op::LinkPrefix { value: 0x104 });
        assert_eq!(
            v5(0x102, 0xF801),
            Op::LinkSuffix {
                offset: 2,
                exchange: false
            }
        );
        assert_eq!(v5(0x100, 0x4770), Op::BranchExchange { link: false, rm: LR });
        assert_eq!(v5(0x100, 0x47F0), Op::BranchExchange { link: true, rm: LR });
        assert_eq!(Decoder::new().thumb(CpuId::Arm7, 0x100, 0x47F0).op, Op::Undefined);
        assert_eq!(Decoder::new().thumb(CpuId::Arm7, 0x100, 0xE800).op, Op::Undefined);
    }

    #[test]
    fn decode_traps() {
        let swi = Decoder::new().thumb(CpuId::Arm7, 0x100, 0xDF05);
        assert_eq!(swi.cond, COND_AL);
        assert_eq!(swi.op, Op::Swi { comment: 5 });
        assert_eq!(v5(0x100, 0xDE00), Op::Undefined);
        assert_eq!(v5(0x100, 0xBE00), Op::Bkpt);
    }
}
