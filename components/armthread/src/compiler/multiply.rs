// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! Multiplies, count leading zeros and saturating arithmetic.

use common::numutil::NumExt;

use super::{Exec, Flow, Method, Node};
use crate::{
    alu::{qadd, qsub},
    cache::{CodeCache, DataRef},
    decode::{HalfMulOp, Instruction, MulOp, Op, Register, SatOp},
    error::CacheFull,
    interface::Bus,
    state::Flag,
};

pub const SHAPES: usize = 22;

const HALFMUL: usize = 12;
const CLZ: usize = 17;
const SATURATE: usize = 18;

/// Cycles of MUL, MLA, UMULL, UMLAL, SMULL and SMLAL before
/// the multiplier-dependent part.
const MUL_CYCLES: [u32; 6] = [1, 2, 2, 3, 2, 3];

#[derive(Debug, Copy, Clone)]
pub struct MulData {
    pub rd: Register,
    pub rn: Register,
    pub rs: Register,
    pub rm: Register,
    pub x_top: bool,
    pub y_top: bool,
    pub cycles: u8,
}

pub fn shape_of(inst: &Instruction) -> Option<usize> {
    Some(match inst.op {
        Op::Mul { op, s, .. } => mul_index(op) * 2 + s as usize,
        Op::HalfMul { op, .. } => HALFMUL + op as usize,
        Op::Clz { .. } => CLZ,
        Op::Sat { op, .. } => SATURATE + op as usize,
        _ => return None,
    })
}

fn mul_index(op: MulOp) -> usize {
    match op {
        MulOp::Mul => 0,
        MulOp::Mla => 1,
        MulOp::Umull => 2,
        MulOp::Umlal => 3,
        MulOp::Smull => 4,
        MulOp::Smlal => 5,
    }
}

pub fn compile<S: Bus>(
    cache: &mut CodeCache,
    table: &[Method<S>],
    inst: &Instruction,
) -> Result<(Method<S>, DataRef), CacheFull> {
    let Some(shape) = shape_of(inst) else {
        unreachable!("Not a multiply instruction");
    };
    let mut data = MulData {
        rd: 0,
        rn: 0,
        rs: 0,
        rm: 0,
        x_top: false,
        y_top: false,
        cycles: 2,
    };
    match inst.op {
        Op::Mul { rd, rn, rs, rm, .. } => {
            data = MulData {
                rd,
                rn,
                rs,
                rm,
                ..data
            }
        }
        Op::HalfMul {
            rd,
            rn,
            rs,
            rm,
            x_top,
            y_top,
            ..
        } => {
            data = MulData {
                rd,
                rn,
                rs,
                rm,
                x_top,
                y_top,
                ..data
            }
        }
        Op::Clz { rd, rm } => {
            data.rd = rd;
            data.rm = rm;
        }
        Op::Sat { rd, rn, rm, .. } => {
            data.rd = rd;
            data.rn = rn;
            data.rm = rm;
        }
        _ => (),
    }
    Ok((table[shape], cache.put(data)?))
}

pub fn method_for<S: Bus>(shape: usize) -> Method<S> {
    match shape {
        0 => multiply::<S, 0, false>,
        1 => multiply::<S, 0, true>,
        2 => multiply::<S, 1, false>,
        3 => multiply::<S, 1, true>,
        4 => multiply::<S, 2, false>,
        5 => multiply::<S, 2, true>,
        6 => multiply::<S, 3, false>,
        7 => multiply::<S, 3, true>,
        8 => multiply::<S, 4, false>,
        9 => multiply::<S, 4, true>,
        10 => multiply::<S, 5, false>,
        11 => multiply::<S, 5, true>,
        12 => halfword_multiply::<S, { HalfMulOp::SmlaXy as u8 }>,
        13 => halfword_multiply::<S, { HalfMulOp::SmlawY as u8 }>,
        14 => halfword_multiply::<S, { HalfMulOp::SmulwY as u8 }>,
        15 => halfword_multiply::<S, { HalfMulOp::SmlalXy as u8 }>,
        16 => halfword_multiply::<S, { HalfMulOp::SmulXy as u8 }>,
        CLZ => count_leading_zeros::<S>,
        18 => saturate::<S, { SatOp::Qadd as u8 }>,
        19 => saturate::<S, { SatOp::Qsub as u8 }>,
        20 => saturate::<S, { SatOp::QdAdd as u8 }>,
        _ => saturate::<S, { SatOp::QdSub as u8 }>,
    }
}

/// Extra cycles taken by the multiplier array, depending on how many
/// bytes of the multiplier are significant. Signed multiplies also
/// terminate early on leading ones.
fn multiplier_cycles(value: u32, signed: bool) -> u32 {
    let value = if signed && value.is_bit(31) { !value } else { value };
    match value {
        0..=0xFF => 1,
        0x100..=0xFFFF => 2,
        0x1_0000..=0xFF_FFFF => 3,
        _ => 4,
    }
}

fn multiply<S: Bus, const OP: u8, const SET: bool>(node: &Node<S>, exec: &mut Exec<'_, S>) -> Flow {
    let d: MulData = exec.data(node);
    let rm = exec.reg(node, d.rm);
    let rs = exec.reg(node, d.rs);
    let signed = !matches!(OP, 2 | 3);
    exec.add_cycles(MUL_CYCLES[OP as usize] + multiplier_cycles(rs, signed));

    match OP {
        0 | 1 => {
            let mut res = rm.wrapping_mul(rs);
            if OP == 1 {
                res = res.wrapping_add(exec.reg(node, d.rn));
            }
            exec.set_reg(d.rd, res);
            exec.state.set_nz::<SET>(res);
        }
        _ => {
            let mut res = if OP < 4 {
                (rm as u64).wrapping_mul(rs as u64)
            } else {
                (rm as i32 as i64).wrapping_mul(rs as i32 as i64) as u64
            };
            if OP & 1 == 1 {
                let acc = ((exec.reg(node, d.rd) as u64) << 32) | exec.reg(node, d.rn) as u64;
                res = res.wrapping_add(acc);
            }
            exec.set_reg(d.rn, res as u32);
            exec.set_reg(d.rd, (res >> 32) as u32);
            if SET {
                exec.state.set_flag(Flag::Neg, res.is_bit(63));
                exec.state.set_flag(Flag::Zero, res == 0);
            }
        }
    }
    Flow::Next
}

fn halfword_multiply<S: Bus, const OP: u8>(node: &Node<S>, exec: &mut Exec<'_, S>) -> Flow {
    let d: MulData = exec.data(node);
    let rm = exec.reg(node, d.rm);
    let rs = exec.reg(node, d.rs);
    let half = |value: u32, top: bool| (if top { value >> 16 } else { value }) as i16 as i32;
    let x = half(rm, d.x_top);
    let y = half(rs, d.y_top);

    const SMLA: u8 = HalfMulOp::SmlaXy as u8;
    const SMLAW: u8 = HalfMulOp::SmlawY as u8;
    const SMULW: u8 = HalfMulOp::SmulwY as u8;
    const SMLAL: u8 = HalfMulOp::SmlalXy as u8;
    match OP {
        SMLA | SMLAW => {
            let product = if OP == SMLA {
                x * y
            } else {
                ((rm as i32 as i64 * y as i64) >> 16) as i32
            };
            let acc = exec.reg(node, d.rn) as i32;
            let (res, overflow) = product.overflowing_add(acc);
            if overflow {
                exec.state.set_flag(Flag::QClamped, true);
            }
            exec.set_reg(d.rd, res as u32);
        }
        SMULW => {
            let res = (rm as i32 as i64 * y as i64) >> 16;
            exec.set_reg(d.rd, res as u32);
        }
        SMLAL => {
            let acc = ((exec.reg(node, d.rd) as u64) << 32) | exec.reg(node, d.rn) as u64;
            let res = acc.wrapping_add((x * y) as i64 as u64);
            exec.set_reg(d.rn, res as u32);
            exec.set_reg(d.rd, (res >> 32) as u32);
        }
        _ => exec.set_reg(d.rd, (x * y) as u32),
    }
    exec.add_cycles(d.cycles as u32);
    Flow::Next
}

fn count_leading_zeros<S: Bus>(node: &Node<S>, exec: &mut Exec<'_, S>) -> Flow {
    let d: MulData = exec.data(node);
    let value = exec.reg(node, d.rm);
    exec.set_reg(d.rd, value.leading_zeros());
    exec.add_cycles(d.cycles as u32);
    Flow::Next
}

fn saturate<S: Bus, const OP: u8>(node: &Node<S>, exec: &mut Exec<'_, S>) -> Flow {
    let d: MulData = exec.data(node);
    let rm = exec.reg(node, d.rm);
    let mut rn = exec.reg(node, d.rn);
    let mut clamped = false;
    if OP == SatOp::QdAdd as u8 || OP == SatOp::QdSub as u8 {
        (rn, clamped) = qadd(rn, rn);
    }
    let (res, clamped_op) = if OP == SatOp::Qadd as u8 || OP == SatOp::QdAdd as u8 {
        qadd(rm, rn)
    } else {
        qsub(rm, rn)
    };
    if clamped || clamped_op {
        exec.state.set_flag(Flag::QClamped, true);
    }
    exec.set_reg(d.rd, res);
    exec.add_cycles(d.cycles as u32);
    Flow::Next
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{decode::Decoder, interface::CpuId, tests::TestBus};

    #[test]
    fn multiplier_significance() {
        assert_eq!(multiplier_cycles(0x12, true), 1);
        assert_eq!(multiplier_cycles(0xFFFF_FF00, true), 1);
        assert_eq!(multiplier_cycles(0xFFFF_FF00, false), 4);
        assert_eq!(multiplier_cycles(0x1234, false), 2);
        assert_eq!(multiplier_cycles(0x12_3456, true), 3);
    }

    #[test]
    fn shapes() {
        for shape in 0..SHAPES {
            let _ = method_for::<TestBus>(shape);
        }
        // UMULLS r0, r1, r2, r3
        let inst = Decoder::new().arm(CpuId::Arm9, 0, 0xE091_0392);
        assert_eq!(shape_of(&inst), Some(5));
        let inst = Decoder::new().arm(CpuId::Arm9, 0, 0xE16F_0F11);
        assert_eq!(shape_of(&inst), Some(CLZ));
    }
}
