// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! Data processing instructions.
//! Shape = operation x operand kind x S bit x PC destination.

use super::{Exec, Flow, Method, Node};
use crate::{
    alu::{asr, lsl, lsr, ror, rrx},
    cache::{CodeCache, DataRef},
    decode::{Instruction, Op, Operand, Register, PC},
    error::CacheFull,
    interface::Bus,
    state::Flag,
};

const KINDS: usize = 10;
pub const SHAPES: usize = 16 * KINDS * 2 * 2;

mod kind {
    pub const IMM: u8 = 0;
    pub const LSL_IMM: u8 = 1;
    pub const LSR_IMM: u8 = 2;
    pub const ASR_IMM: u8 = 3;
    pub const ROR_IMM: u8 = 4;
    pub const RRX: u8 = 5;
    pub const LSL_REG: u8 = 6;
    pub const LSR_REG: u8 = 7;
    pub const ASR_REG: u8 = 8;
    pub const ROR_REG: u8 = 9;
}

#[derive(Debug, Copy, Clone)]
pub struct AluData {
    pub rd: Register,
    pub rn: Register,
    pub rm: Register,
    pub rs: Register,
    pub amount: u8,
    pub imm: u32,
    pub imm_carry: Option<bool>,
    pub cycles: u8,
}

pub fn shape_of(inst: &Instruction) -> Option<usize> {
    let Op::Alu {
        op, s, rd, operand, ..
    } = inst.op
    else {
        return None;
    };
    let kind = match operand {
        Operand::Imm { .. } => kind::IMM,
        Operand::ShiftImm { shift, .. } => kind::LSL_IMM + shift as u8,
        Operand::Rrx { .. } => kind::RRX,
        Operand::ShiftReg { shift, .. } => kind::LSL_REG + shift as u8,
    };
    let pc = rd == PC && op.should_write();
    Some((((op as usize * KINDS) + kind as usize) * 2 + s as usize) * 2 + pc as usize)
}

pub fn compile<S: Bus>(
    cache: &mut CodeCache,
    table: &[Method<S>],
    inst: &Instruction,
) -> Result<(Method<S>, DataRef), CacheFull> {
    let (Some(shape), Op::Alu { op, rd, rn, operand, .. }) = (shape_of(inst), inst.op) else {
        unreachable!("Not a data processing instruction");
    };

    let mut data = AluData {
        rd,
        rn,
        rm: 0,
        rs: 0,
        amount: 0,
        imm: 0,
        imm_carry: None,
        cycles: 1,
    };
    match operand {
        Operand::Imm { value, carry } => {
            data.imm = value;
            data.imm_carry = carry;
        }
        Operand::ShiftImm { rm, amount, .. } => {
            data.rm = rm;
            data.amount = amount;
        }
        Operand::Rrx { rm } => data.rm = rm,
        Operand::ShiftReg { rm, rs, .. } => {
            data.rm = rm;
            data.rs = rs;
            data.cycles = 2;
        }
    }
    if rd == PC && op.should_write() {
        data.cycles += 2;
    }

    Ok((table[shape], cache.put(data)?))
}

pub fn method_for<S: Bus>(shape: usize) -> Method<S> {
    let pc = shape & 1 == 1;
    let set = (shape >> 1) & 1 == 1;
    let kind = (shape >> 2) % KINDS;
    let op = (shape >> 2) / KINDS;
    match op {
        0 => pick_kind::<S, 0>(kind, set, pc),
        1 => pick_kind::<S, 1>(kind, set, pc),
        2 => pick_kind::<S, 2>(kind, set, pc),
        3 => pick_kind::<S, 3>(kind, set, pc),
        4 => pick_kind::<S, 4>(kind, set, pc),
        5 => pick_kind::<S, 5>(kind, set, pc),
        6 => pick_kind::<S, 6>(kind, set, pc),
        7 => pick_kind::<S, 7>(kind, set, pc),
        8 => pick_kind::<S, 8>(kind, set, pc),
        9 => pick_kind::<S, 9>(kind, set, pc),
        10 => pick_kind::<S, 10>(kind, set, pc),
        11 => pick_kind::<S, 11>(kind, set, pc),
        12 => pick_kind::<S, 12>(kind, set, pc),
        13 => pick_kind::<S, 13>(kind, set, pc),
        14 => pick_kind::<S, 14>(kind, set, pc),
        _ => pick_kind::<S, 15>(kind, set, pc),
    }
}

fn pick_kind<S: Bus, const OP: u8>(kind: usize, set: bool, pc: bool) -> Method<S> {
    match kind as u8 {
        kind::IMM => pick_set::<S, OP, { kind::IMM }>(set, pc),
        kind::LSL_IMM => pick_set::<S, OP, { kind::LSL_IMM }>(set, pc),
        kind::LSR_IMM => pick_set::<S, OP, { kind::LSR_IMM }>(set, pc),
        kind::ASR_IMM => pick_set::<S, OP, { kind::ASR_IMM }>(set, pc),
        kind::ROR_IMM => pick_set::<S, OP, { kind::ROR_IMM }>(set, pc),
        kind::RRX => pick_set::<S, OP, { kind::RRX }>(set, pc),
        kind::LSL_REG => pick_set::<S, OP, { kind::LSL_REG }>(set, pc),
        kind::LSR_REG => pick_set::<S, OP, { kind::LSR_REG }>(set, pc),
        kind::ASR_REG => pick_set::<S, OP, { kind::ASR_REG }>(set, pc),
        _ => pick_set::<S, OP, { kind::ROR_REG }>(set, pc),
    }
}

fn pick_set<S: Bus, const OP: u8, const KIND: u8>(set: bool, pc: bool) -> Method<S> {
    match (set, pc) {
        (false, false) => data_processing::<S, OP, KIND, false, false>,
        (false, true) => data_processing::<S, OP, KIND, false, true>,
        (true, false) => data_processing::<S, OP, KIND, true, false>,
        (true, true) => data_processing::<S, OP, KIND, true, true>,
    }
}

/// Evaluate the second operand, giving it and the shifter carry out.
#[inline(always)]
fn operand<S: Bus, const KIND: u8>(node: &Node<S>, exec: &Exec<'_, S>, d: &AluData, carry: bool) -> (u32, bool) {
    match KIND {
        kind::IMM => (d.imm, d.imm_carry.unwrap_or(carry)),
        kind::LSL_IMM => lsl(exec.reg(node, d.rm), d.amount as u32, carry),
        kind::LSR_IMM => lsr(exec.reg(node, d.rm), d.amount as u32, carry),
        kind::ASR_IMM => asr(exec.reg(node, d.rm), d.amount as u32, carry),
        kind::ROR_IMM => ror(exec.reg(node, d.rm), d.amount as u32, carry),
        kind::RRX => rrx(exec.reg(node, d.rm), carry),
        kind::LSL_REG => lsl(exec.reg_shifted(node, d.rm), shift_by(node, exec, d), carry),
        kind::LSR_REG => lsr(exec.reg_shifted(node, d.rm), shift_by(node, exec, d), carry),
        kind::ASR_REG => asr(exec.reg_shifted(node, d.rm), shift_by(node, exec, d), carry),
        _ => ror(exec.reg_shifted(node, d.rm), shift_by(node, exec, d), carry),
    }
}

/// Shift amount of a shift by register; only the bottom byte counts.
#[inline(always)]
fn shift_by<S: Bus>(node: &Node<S>, exec: &Exec<'_, S>, d: &AluData) -> u32 {
    exec.reg(node, d.rs) & 0xFF
}

macro_rules! arith {
    ($exec:ident, $flags:ident, $fn:ident, $($arg:expr),*) => {
        if $flags {
            $exec.state.$fn::<true>($($arg),*)
        } else {
            $exec.state.$fn::<false>($($arg),*)
        }
    };
}

fn data_processing<S: Bus, const OP: u8, const KIND: u8, const SET: bool, const PC_DEST: bool>(
    node: &Node<S>,
    exec: &mut Exec<'_, S>,
) -> Flow {
    let d: AluData = exec.data(node);
    let carry_in = exec.state.is_flag(Flag::Carry);
    let (b, carry) = operand::<S, KIND>(node, exec, &d, carry_in);
    let a = if KIND >= kind::LSL_REG {
        exec.reg_shifted(node, d.rn)
    } else {
        exec.reg(node, d.rn)
    };

    // With PC as destination, S restores the CPSR instead
    let flags = SET && !PC_DEST;
    let c = exec.state.carry();
    let result = match OP {
        0 | 8 => a & b,
        1 | 9 => a ^ b,
        2 | 10 => arith!(exec, flags, sub, a, b),
        3 => arith!(exec, flags, sub, b, a),
        4 | 11 => arith!(exec, flags, add, a, b),
        5 => arith!(exec, flags, adc, a, b, c),
        6 => arith!(exec, flags, sbc, a, b, c),
        7 => arith!(exec, flags, sbc, b, a, c),
        12 => a | b,
        13 => b,
        14 => a & !b,
        _ => !b,
    };
    let logical = matches!(OP, 0 | 1 | 8 | 9 | 12..=15);
    if flags && logical {
        exec.state.set_nzc::<true>(result, carry);
    }

    exec.add_cycles(d.cycles as u32);
    if (8..=11).contains(&OP) {
        return Flow::Next;
    }

    if PC_DEST {
        if SET && exec.state.mode().has_spsr() {
            let spsr = exec.state.spsr();
            exec.state.set_cpsr(spsr);
            exec.bus.status_changed(exec.state);
        }
        exec.set_reg(PC, result);
    } else {
        exec.set_reg(d.rd, result);
    }
    Flow::Next
}
