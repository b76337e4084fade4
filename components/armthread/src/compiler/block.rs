// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! Block data transfers (LDM, STM, PUSH, POP).

use arrayvec::ArrayVec;
use common::numutil::NumExt;

use super::{Exec, Flow, Method, Node};
use crate::{
    cache::{CodeCache, DataRef},
    decode::{Instruction, Op, Register, PC},
    error::CacheFull,
    interface::Bus,
    memory::access::{NONSEQ, SEQ},
    state::Mode,
};

pub const SHAPES: usize = 64;

#[derive(Debug, Copy, Clone)]
pub struct BlockData {
    pub rn: Register,
    pub list: u16,
    /// Registers in the list.
    pub count: u8,
    pub cycles: u8,
    /// Cycles if the PC is loaded.
    pub pc_cycles: u8,
}

pub fn shape_of(inst: &Instruction) -> Option<usize> {
    let Op::Block {
        load,
        pre,
        up,
        writeback,
        user,
        list,
        ..
    } = inst.op
    else {
        return None;
    };
    let bits = [load, pre, up, writeback, user, list.is_bit(PC as u32)];
    Some(bits.iter().fold(0, |shape, bit| (shape << 1) | *bit as usize))
}

pub fn compile<S: Bus>(
    cache: &mut CodeCache,
    table: &[Method<S>],
    inst: &Instruction,
) -> Result<(Method<S>, DataRef), CacheFull> {
    let (
        Some(shape),
        Op::Block {
            rn,
            list,
            cycles,
            pc_cycles,
            ..
        },
    ) = (shape_of(inst), inst.op)
    else {
        unreachable!("Not a block transfer");
    };
    let data = BlockData {
        rn,
        list,
        count: list.count_ones() as u8,
        cycles,
        pc_cycles,
    };
    Ok((table[shape], cache.put(data)?))
}

pub fn method_for<S: Bus>(shape: usize) -> Method<S> {
    let bit = |n: usize| (shape >> (5 - n)) & 1 == 1;
    match (bit(0), bit(1), bit(2)) {
        (false, false, false) => pick_flags::<S, false, false, false>(bit(3), bit(4), bit(5)),
        (false, false, true) => pick_flags::<S, false, false, true>(bit(3), bit(4), bit(5)),
        (false, true, false) => pick_flags::<S, false, true, false>(bit(3), bit(4), bit(5)),
        (false, true, true) => pick_flags::<S, false, true, true>(bit(3), bit(4), bit(5)),
        (true, false, false) => pick_flags::<S, true, false, false>(bit(3), bit(4), bit(5)),
        (true, false, true) => pick_flags::<S, true, false, true>(bit(3), bit(4), bit(5)),
        (true, true, false) => pick_flags::<S, true, true, false>(bit(3), bit(4), bit(5)),
        (true, true, true) => pick_flags::<S, true, true, true>(bit(3), bit(4), bit(5)),
    }
}

fn pick_flags<S: Bus, const LOAD: bool, const PRE: bool, const UP: bool>(
    writeback: bool,
    user: bool,
    pc: bool,
) -> Method<S> {
    match (writeback, user, pc) {
        (false, false, false) => block_transfer::<S, LOAD, PRE, UP, false, false, false>,
        (false, false, true) => block_transfer::<S, LOAD, PRE, UP, false, false, true>,
        (false, true, false) => block_transfer::<S, LOAD, PRE, UP, false, true, false>,
        (false, true, true) => block_transfer::<S, LOAD, PRE, UP, false, true, true>,
        (true, false, false) => block_transfer::<S, LOAD, PRE, UP, true, false, false>,
        (true, false, true) => block_transfer::<S, LOAD, PRE, UP, true, false, true>,
        (true, true, false) => block_transfer::<S, LOAD, PRE, UP, true, true, false>,
        (true, true, true) => block_transfer::<S, LOAD, PRE, UP, true, true, true>,
    }
}

/// LDM/STM. `USER` is the S bit: with PC loaded it restores the CPSR,
/// otherwise the user bank gets transferred.
fn block_transfer<
    S: Bus,
    const LOAD: bool,
    const PRE: bool,
    const UP: bool,
    const WRITEBACK: bool,
    const USER: bool,
    const PC_LOADED: bool,
>(
    node: &Node<S>,
    exec: &mut Exec<'_, S>,
) -> Flow {
    let d: BlockData = exec.data(node);
    let base = exec.reg(node, d.rn);
    // An empty list transfers nothing, but moves the base as if
    // all 16 registers were transferred
    let bytes = if d.list == 0 { 0x40 } else { d.count as u32 * 4 };
    let start = match (PRE, UP) {
        (false, true) => base,
        (true, true) => base.wrapping_add(4),
        (false, false) => base.wrapping_sub(bytes).wrapping_add(4),
        (true, false) => base.wrapping_sub(bytes),
    };
    let new_base = if UP {
        base.wrapping_add(bytes)
    } else {
        base.wrapping_sub(bytes)
    };

    let user_bank = USER && !(LOAD && PC_LOADED);
    let cpsr = exec.state.cpsr();
    if user_bank {
        exec.state.set_mode(Mode::System);
    }

    let mut addr = start;
    let mut access = NONSEQ;
    let mut wait = 0;
    if LOAD {
        let mut values = ArrayVec::<u32, 16>::new();
        for _ in 0..d.count {
            let Some((value, time)) = exec.load::<u32>(addr, access) else {
                return abort(node, exec, user_bank, cpsr);
            };
            values.push(value);
            wait += time as u32;
            addr = addr.wrapping_add(4);
            access = SEQ;
        }

        if WRITEBACK {
            exec.set_reg(d.rn, new_base);
        }
        let regs = (0..16u32).filter(|r| d.list.is_bit(*r));
        let mut pc_value = None;
        for (reg, value) in regs.zip(values) {
            if reg == PC as u32 {
                pc_value = Some(value);
            } else {
                exec.state.registers[reg.us()] = value;
            }
        }

        if user_bank {
            exec.state.set_cpsr(cpsr);
        }
        if let Some(value) = pc_value {
            if USER {
                if exec.state.mode().has_spsr() {
                    let spsr = exec.state.spsr();
                    exec.state.set_cpsr(spsr);
                }
                exec.bus.status_changed(exec.state);
                exec.set_reg(PC, value);
            } else {
                exec.load_pc(value);
            }
        }
    } else {
        // ARMv4 stores the written back base if it is not the first
        // register in the list
        let first = d.list.trailing_zeros();
        let new_base_stored = WRITEBACK && !exec.state.cpu.is_v5() && first != d.rn as u32;
        for reg in (0..16u32).filter(|r| d.list.is_bit(*r)) {
            let value = if reg == d.rn as u32 && new_base_stored {
                new_base
            } else {
                exec.reg_shifted(node, reg as Register)
            };
            let Some(time) = exec.store::<u32>(addr, value, access) else {
                return abort(node, exec, user_bank, cpsr);
            };
            wait += time as u32;
            addr = addr.wrapping_add(4);
            access = SEQ;
        }

        if user_bank {
            exec.state.set_cpsr(cpsr);
        }
        if WRITEBACK {
            exec.set_reg(d.rn, new_base);
        }
    }

    let cycles = if PC_LOADED { d.pc_cycles } else { d.cycles };
    exec.alu_mem(cycles as u32, wait);
    Flow::Next
}

/// Abort a block transfer, leaving the user bank first.
fn abort<S: Bus>(node: &Node<S>, exec: &mut Exec<'_, S>, user_bank: bool, cpsr: u32) -> Flow {
    if user_bank {
        exec.state.set_cpsr(cpsr);
    }
    exec.data_abort(node)
}
