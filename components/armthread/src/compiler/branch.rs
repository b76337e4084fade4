// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! Branches, including the THUMB long branch halves.

use common::numutil::NumExt;

use super::{Exec, Flow, Method, Node};
use crate::{
    cache::{CodeCache, DataRef},
    decode::{Instruction, Op, Register, LR, PC},
    error::CacheFull,
    interface::Bus,
    state::Flag,
};

pub const SHAPES: usize = 8;

const B: usize = 0;
const BL: usize = 1;
const BLX_IMM: usize = 2;
const BX: usize = 3;
const BLX_REG: usize = 4;
const LINK_PREFIX: usize = 5;
const LINK_SUFFIX: usize = 6;
const LINK_SUFFIX_EXCHANGE: usize = 7;

#[derive(Debug, Copy, Clone)]
pub struct BranchData {
    /// Branch target, or LR value of a long branch prefix.
    pub target: u32,
    pub rm: Register,
    /// Value written to LR.
    pub link: u32,
    pub cycles: u8,
}

pub fn shape_of(inst: &Instruction) -> Option<usize> {
    Some(match inst.op {
        Op::Branch {
            link: false,
            exchange: false,
            ..
        } => B,
        Op::Branch { exchange: false, .. } => BL,
        Op::Branch { .. } => BLX_IMM,
        Op::BranchExchange { link: false, .. } => BX,
        Op::BranchExchange { .. } => BLX_REG,
        Op::LinkPrefix { .. } => LINK_PREFIX,
        Op::LinkSuffix { exchange: false, .. } => LINK_SUFFIX,
        Op::LinkSuffix { .. } => LINK_SUFFIX_EXCHANGE,
        _ => return None,
    })
}

pub fn compile<S: Bus>(
    cache: &mut CodeCache,
    table: &[Method<S>],
    inst: &Instruction,
) -> Result<(Method<S>, DataRef), CacheFull> {
    let Some(shape) = shape_of(inst) else {
        unreachable!("Not a branch");
    };
    // Return address, with bit 0 marking THUMB code
    let link = if inst.thumb {
        inst.next() | 1
    } else {
        inst.next()
    };
    let mut data = BranchData {
        target: 0,
        rm: 0,
        link,
        cycles: 3,
    };
    match inst.op {
        Op::Branch { target, .. } => data.target = target,
        Op::BranchExchange { rm, link } => {
            data.rm = rm;
            if link && inst.thumb {
                data.cycles = 4;
            }
        }
        Op::LinkPrefix { value } => {
            data.target = value;
            data.cycles = 1;
        }
        Op::LinkSuffix { offset, .. } => {
            data.target = offset;
            data.cycles = 4;
        }
        _ => (),
    }
    Ok((table[shape], cache.put(data)?))
}

pub fn method_for<S: Bus>(shape: usize) -> Method<S> {
    match shape {
        B => branch::<S, false, false>,
        BL => branch::<S, true, false>,
        BLX_IMM => branch::<S, true, true>,
        BX => branch_exchange::<S, false>,
        BLX_REG => branch_exchange::<S, true>,
        LINK_PREFIX => link_prefix::<S>,
        LINK_SUFFIX => link_suffix::<S, false>,
        _ => link_suffix::<S, true>,
    }
}

fn branch<S: Bus, const LINK: bool, const EXCHANGE: bool>(node: &Node<S>, exec: &mut Exec<'_, S>) -> Flow {
    let d: BranchData = exec.data(node);
    if LINK {
        exec.set_reg(LR, d.link);
    }
    if EXCHANGE {
        exec.state.set_flag(Flag::Thumb, true);
    }
    exec.set_reg(PC, d.target);
    exec.add_cycles(d.cycles as u32);
    Flow::Next
}

fn branch_exchange<S: Bus, const LINK: bool>(node: &Node<S>, exec: &mut Exec<'_, S>) -> Flow {
    let d: BranchData = exec.data(node);
    let target = exec.reg(node, d.rm);
    if LINK {
        exec.set_reg(LR, d.link);
    }
    exec.state.set_flag(Flag::Thumb, target.is_bit(0));
    exec.set_reg(PC, target);
    exec.add_cycles(d.cycles as u32);
    Flow::Next
}

fn link_prefix<S: Bus>(node: &Node<S>, exec: &mut Exec<'_, S>) -> Flow {
    let d: BranchData = exec.data(node);
    exec.set_reg(LR, d.target);
    exec.add_cycles(d.cycles as u32);
    Flow::Next
}

fn link_suffix<S: Bus, const EXCHANGE: bool>(node: &Node<S>, exec: &mut Exec<'_, S>) -> Flow {
    let d: BranchData = exec.data(node);
    let mut target = exec.reg(node, LR).wrapping_add(d.target);
    exec.set_reg(LR, d.link);
    if EXCHANGE {
        target &= !3;
        exec.state.set_flag(Flag::Thumb, false);
    }
    exec.set_reg(PC, target);
    exec.add_cycles(d.cycles as u32);
    Flow::Next
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        decode::Decoder,
        interface::CpuId,
    };

    #[test]
    fn shapes() {
        assert_eq!(shape_of(&Decoder::new().arm(CpuId::Arm9, 0, 0xEB00_0000)), Some(BL));
        assert_eq!(shape_of(&Decoder::new().arm(CpuId::Arm9, 0, 0xFA00_0000)), Some(BLX_IMM));
        assert_eq!(shape_of(&Decoder::new().arm(CpuId::Arm9, 0, 0xE12F_FF11)), Some(BX));
        assert_eq!(shape_of(&Decoder::new().thumb(CpuId::Arm9, 0, 0xF000)), Some(LINK_PREFIX));
        assert_eq!(shape_of(&Decoder::new().thumb(CpuId::Arm9, 0, 0xE800)), Some(LINK_SUFFIX_EXCHANGE));
        assert_eq!(shape_of(&Decoder::new().thumb(CpuId::Arm9, 0, 0xE7FE)), Some(B));
    }
}
