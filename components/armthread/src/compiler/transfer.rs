// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! Single data transfers and swaps.
//! Shape = kind x offset type x index mode x direction, plus SWP/SWPB.

use super::{Exec, Flow, Method, Node};
use crate::{
    alu::{asr, lsl, lsr, ror, rrx},
    cache::{CodeCache, DataRef},
    decode::{IndexMode, Instruction, Offset, Op, Register, ShiftType, TransferKind, PC},
    error::CacheFull,
    interface::Bus,
    memory::access::{NONSEQ, SEQ},
    state::Flag,
};

const KINDS: usize = 10;
const TRANSFER_SHAPES: usize = KINDS * 2 * 3 * 2;
pub const SHAPES: usize = TRANSFER_SHAPES + 2;

const LDR: u8 = TransferKind::LoadWord as u8;
const LDRB: u8 = TransferKind::LoadByte as u8;
const STR: u8 = TransferKind::StoreWord as u8;
const STRB: u8 = TransferKind::StoreByte as u8;
const LDRH: u8 = TransferKind::LoadHalfword as u8;
const STRH: u8 = TransferKind::StoreHalfword as u8;
const LDRSB: u8 = TransferKind::LoadSignedByte as u8;
const LDRSH: u8 = TransferKind::LoadSignedHalfword as u8;
const LDRD: u8 = TransferKind::LoadDoubleWord as u8;
const STRD: u8 = TransferKind::StoreDoubleWord as u8;

const POST: u8 = 0;
const PRE: u8 = 1;
const PRE_WB: u8 = 2;

/// Shift value of a register offset shifted with RRX.
const SHIFT_RRX: u8 = 4;

#[derive(Debug, Copy, Clone)]
pub struct TransferData {
    pub rd: Register,
    pub rn: Register,
    pub rm: Register,
    pub shift: u8,
    pub amount: u8,
    pub imm: u32,
    pub cycles: u8,
}

pub fn shape_of(inst: &Instruction) -> Option<usize> {
    match inst.op {
        Op::Transfer {
            kind,
            offset,
            index,
            up,
            ..
        } => {
            let reg = !matches!(offset, Offset::Imm(_));
            let index = match index {
                IndexMode::Post => POST,
                IndexMode::Pre => PRE,
                IndexMode::PreWriteback => PRE_WB,
            };
            Some((((kind as usize * 2) + reg as usize) * 3 + index as usize) * 2 + up as usize)
        }
        Op::Swap { byte, .. } => Some(TRANSFER_SHAPES + byte as usize),
        _ => None,
    }
}

fn cycles(kind: TransferKind, rd: Register) -> u8 {
    match kind {
        TransferKind::LoadWord if rd == PC => 5,
        TransferKind::StoreWord | TransferKind::StoreByte | TransferKind::StoreHalfword => 2,
        _ => 3,
    }
}

pub fn compile<S: Bus>(
    cache: &mut CodeCache,
    table: &[Method<S>],
    inst: &Instruction,
) -> Result<(Method<S>, DataRef), CacheFull> {
    let Some(shape) = shape_of(inst) else {
        unreachable!("Not a data transfer");
    };
    let data = match inst.op {
        Op::Transfer {
            kind, rd, rn, offset, ..
        } => {
            let mut data = TransferData {
                rd,
                rn,
                rm: 0,
                shift: 0,
                amount: 0,
                imm: 0,
                cycles: cycles(kind, rd),
            };
            match offset {
                Offset::Imm(imm) => data.imm = imm,
                Offset::Reg { rm, shift, amount } => {
                    data.rm = rm;
                    data.shift = shift as u8;
                    data.amount = amount;
                }
                Offset::Rrx { rm } => {
                    data.rm = rm;
                    data.shift = SHIFT_RRX;
                }
            }
            data
        }
        Op::Swap { rd, rn, rm, .. } => TransferData {
            rd,
            rn,
            rm,
            shift: 0,
            amount: 0,
            imm: 0,
            cycles: 4,
        },
        _ => unreachable!(),
    };
    Ok((table[shape], cache.put(data)?))
}

pub fn method_for<S: Bus>(shape: usize) -> Method<S> {
    if shape >= TRANSFER_SHAPES {
        return if shape == TRANSFER_SHAPES {
            swap::<S, false>
        } else {
            swap::<S, true>
        };
    }
    let up = shape & 1 == 1;
    let index = ((shape >> 1) % 3) as u8;
    let reg = (shape >> 1) / 3 % 2 == 1;
    match (shape >> 1) / 6 {
        0 => pick_mode::<S, LDR>(reg, index, up),
        1 => pick_mode::<S, LDRB>(reg, index, up),
        2 => pick_mode::<S, STR>(reg, index, up),
        3 => pick_mode::<S, STRB>(reg, index, up),
        4 => pick_mode::<S, LDRH>(reg, index, up),
        5 => pick_mode::<S, STRH>(reg, index, up),
        6 => pick_mode::<S, LDRSB>(reg, index, up),
        7 => pick_mode::<S, LDRSH>(reg, index, up),
        8 => pick_mode::<S, LDRD>(reg, index, up),
        _ => pick_mode::<S, STRD>(reg, index, up),
    }
}

fn pick_mode<S: Bus, const KIND: u8>(reg: bool, index: u8, up: bool) -> Method<S> {
    match (reg, index, up) {
        (false, POST, false) => transfer::<S, KIND, false, POST, false>,
        (false, POST, true) => transfer::<S, KIND, false, POST, true>,
        (false, PRE, false) => transfer::<S, KIND, false, PRE, false>,
        (false, PRE, true) => transfer::<S, KIND, false, PRE, true>,
        (false, _, false) => transfer::<S, KIND, false, PRE_WB, false>,
        (false, _, true) => transfer::<S, KIND, false, PRE_WB, true>,
        (true, POST, false) => transfer::<S, KIND, true, POST, false>,
        (true, POST, true) => transfer::<S, KIND, true, POST, true>,
        (true, PRE, false) => transfer::<S, KIND, true, PRE, false>,
        (true, PRE, true) => transfer::<S, KIND, true, PRE, true>,
        (true, _, false) => transfer::<S, KIND, true, PRE_WB, false>,
        (true, _, true) => transfer::<S, KIND, true, PRE_WB, true>,
    }
}

/// Value of a register offset.
fn register_offset<S: Bus>(node: &Node<S>, exec: &Exec<'_, S>, d: &TransferData) -> u32 {
    let value = exec.reg(node, d.rm);
    let carry = exec.state.is_flag(Flag::Carry);
    let by = d.amount as u32;
    let (offset, _) = match d.shift {
        s if s == ShiftType::Lsl as u8 => lsl(value, by, carry),
        s if s == ShiftType::Lsr as u8 => lsr(value, by, carry),
        s if s == ShiftType::Asr as u8 => asr(value, by, carry),
        s if s == ShiftType::Ror as u8 => ror(value, by, carry),
        _ => rrx(value, carry),
    };
    offset
}

/// Perform a load of the given kind. ARMv4 has some odd behavior
/// on misaligned halfword loads.
#[inline(always)]
fn load<S: Bus, const KIND: u8>(exec: &mut Exec<'_, S>, addr: u32) -> Option<(u32, u16)> {
    let v4 = !exec.state.cpu.is_v5();
    match KIND {
        LDR => exec
            .load::<u32>(addr, NONSEQ)
            .map(|(value, wait)| (value.rotate_right((addr & 3) * 8), wait)),
        LDRB => exec.load::<u8>(addr, NONSEQ),
        LDRH if v4 && addr & 1 != 0 => exec
            .load::<u16>(addr, NONSEQ)
            .map(|(value, wait)| (value.rotate_right(8), wait)),
        LDRH => exec.load::<u16>(addr, NONSEQ),
        LDRSH if !(v4 && addr & 1 != 0) => exec
            .load::<u16>(addr, NONSEQ)
            .map(|(value, wait)| (value as u16 as i16 as u32, wait)),
        // LDRSB, and LDRSH on odd addresses on ARMv4
        _ => exec
            .load::<u8>(addr, NONSEQ)
            .map(|(value, wait)| (value as u8 as i8 as u32, wait)),
    }
}

fn transfer<S: Bus, const KIND: u8, const REG: bool, const INDEX: u8, const UP: bool>(
    node: &Node<S>,
    exec: &mut Exec<'_, S>,
) -> Flow {
    let d: TransferData = exec.data(node);
    let base = exec.reg(node, d.rn);
    let offset = if REG {
        register_offset(node, exec, &d)
    } else {
        d.imm
    };
    let moved = if UP {
        base.wrapping_add(offset)
    } else {
        base.wrapping_sub(offset)
    };
    let addr = if INDEX == POST { base } else { moved };
    let writeback = INDEX != PRE && d.rn != PC;

    let wait = match KIND {
        LDRD => {
            let Some((low, first)) = exec.load::<u32>(addr, NONSEQ) else {
                return exec.data_abort(node);
            };
            let Some((high, second)) = exec.load::<u32>(addr.wrapping_add(4), SEQ) else {
                return exec.data_abort(node);
            };
            if writeback {
                exec.set_reg(d.rn, moved);
            }
            exec.set_reg(d.rd, low);
            exec.set_reg(d.rd + 1, high);
            first + second
        }
        STR | STRB | STRH | STRD => {
            let value = exec.reg_shifted(node, d.rd);
            let wait = match KIND {
                STR => exec.store::<u32>(addr, value, NONSEQ),
                STRB => exec.store::<u8>(addr, value, NONSEQ),
                STRH => exec.store::<u16>(addr, value, NONSEQ),
                _ => exec.store::<u32>(addr, value, NONSEQ).and_then(|first| {
                    let high = exec.reg(node, d.rd + 1);
                    let second = exec.store::<u32>(addr.wrapping_add(4), high, SEQ)?;
                    Some(first + second)
                }),
            };
            let Some(wait) = wait else {
                return exec.data_abort(node);
            };
            if writeback {
                exec.set_reg(d.rn, moved);
            }
            wait
        }
        _ => {
            let Some((value, wait)) = load::<S, KIND>(exec, addr) else {
                return exec.data_abort(node);
            };
            // When loading into the base, the loaded value wins
            if writeback {
                exec.set_reg(d.rn, moved);
            }
            if d.rd == PC {
                exec.load_pc(value);
            } else {
                exec.set_reg(d.rd, value);
            }
            wait
        }
    };

    exec.alu_mem(d.cycles as u32, wait as u32);
    Flow::Next
}

fn swap<S: Bus, const BYTE: bool>(node: &Node<S>, exec: &mut Exec<'_, S>) -> Flow {
    let d: TransferData = exec.data(node);
    let addr = exec.reg(node, d.rn);
    let loaded = if BYTE {
        exec.load::<u8>(addr, NONSEQ)
    } else {
        load::<S, LDR>(exec, addr)
    };
    let Some((old, read)) = loaded else {
        return exec.data_abort(node);
    };

    let value = exec.reg(node, d.rm);
    let stored = if BYTE {
        exec.store::<u8>(addr, value, NONSEQ)
    } else {
        exec.store::<u32>(addr, value, NONSEQ)
    };
    let Some(write) = stored else {
        return exec.data_abort(node);
    };

    exec.set_reg(d.rd, old);
    exec.alu_mem(d.cycles as u32, (read + write) as u32);
    Flow::Next
}
