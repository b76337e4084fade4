// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! Traps, coprocessor transfers and no-ops.

use super::{Exec, Flow, Method, Node};
use crate::{
    cache::{CodeCache, DataRef},
    decode::{Instruction, Op, Register, PC},
    error::CacheFull,
    exceptions::Exception,
    interface::Bus,
};

pub const SHAPES: usize = 7;

const SWI: usize = 0;
const BKPT: usize = 1;
const UNDEFINED: usize = 2;
const NOP: usize = 3;
const MCR: usize = 4;
const MRC: usize = 5;
const OTHER_COPROCESSOR: usize = 6;

/// The system control coprocessor, the only one forwarded to the bus.
const CP15: u8 = 15;

#[derive(Debug, Copy, Clone)]
pub struct SystemData {
    pub comment: u32,
    pub rd: Register,
    pub crn: u8,
    pub crm: u8,
    pub opc1: u8,
    pub opc2: u8,
    pub cycles: u8,
}

pub fn shape_of(inst: &Instruction) -> Option<usize> {
    Some(match inst.op {
        Op::Swi { .. } => SWI,
        Op::Bkpt => BKPT,
        Op::Undefined => UNDEFINED,
        Op::Nop { .. } => NOP,
        Op::Coproc { cp, .. } if cp != CP15 => OTHER_COPROCESSOR,
        Op::Coproc { load: false, .. } => MCR,
        Op::Coproc { .. } => MRC,
        _ => return None,
    })
}

pub fn compile<S: Bus>(
    cache: &mut CodeCache,
    table: &[Method<S>],
    inst: &Instruction,
) -> Result<(Method<S>, DataRef), CacheFull> {
    let Some(shape) = shape_of(inst) else {
        unreachable!("Not a system instruction");
    };
    let mut data = SystemData {
        comment: 0,
        rd: 0,
        crn: 0,
        crm: 0,
        opc1: 0,
        opc2: 0,
        cycles: 1,
    };
    match inst.op {
        Op::Swi { comment } => {
            data.comment = comment;
            data.cycles = 3;
        }
        Op::Bkpt => data.cycles = if inst.thumb { 1 } else { 4 },
        Op::Nop { cycles } => data.cycles = cycles,
        Op::Coproc {
            load,
            cp,
            opc1,
            crn,
            crm,
            opc2,
            rd,
        } => {
            data = SystemData {
                rd,
                crn,
                crm,
                opc1,
                opc2,
                cycles: if load && cp == CP15 { 4 } else { 2 },
                ..data
            };
        }
        _ => (),
    }
    Ok((table[shape], cache.put(data)?))
}

pub fn method_for<S: Bus>(shape: usize) -> Method<S> {
    match shape {
        SWI => software_interrupt::<S>,
        BKPT => breakpoint::<S>,
        UNDEFINED => undefined::<S>,
        MCR => move_to_coprocessor::<S>,
        MRC => move_from_coprocessor::<S>,
        // Other coprocessors do not exist; only spend the time
        _ => nop::<S>,
    }
}

fn software_interrupt<S: Bus>(node: &Node<S>, exec: &mut Exec<'_, S>) -> Flow {
    let d: SystemData = exec.data(node);
    match exec.bus.software_interrupt(exec.state, d.comment) {
        Some(cycles) => {
            exec.add_cycles(cycles as u32 + d.cycles as u32);
            exec.swi_trapped = false;
        }
        None => {
            exec.add_cycles(d.cycles as u32);
            let lr = exec
                .instruction_addr(node)
                .wrapping_add(exec.state.instruction_width());
            exec.state.enter_exception(exec.bus, Exception::Swi, lr);
            exec.swi_trapped = true;
        }
    }
    Flow::Next
}

fn breakpoint<S: Bus>(node: &Node<S>, exec: &mut Exec<'_, S>) -> Flow {
    let d: SystemData = exec.data(node);
    log::warn!(
        "{} hit a breakpoint at 0x{:08X}, ignoring",
        exec.state.cpu,
        exec.instruction_addr(node)
    );
    exec.add_cycles(d.cycles as u32);
    Flow::Next
}

fn undefined<S: Bus>(node: &Node<S>, exec: &mut Exec<'_, S>) -> Flow {
    let d: SystemData = exec.data(node);
    exec.add_cycles(d.cycles as u32);
    exec.undefined(node)
}

fn nop<S: Bus>(node: &Node<S>, exec: &mut Exec<'_, S>) -> Flow {
    let d: SystemData = exec.data(node);
    exec.add_cycles(d.cycles as u32);
    Flow::Next
}

fn move_to_coprocessor<S: Bus>(node: &Node<S>, exec: &mut Exec<'_, S>) -> Flow {
    let d: SystemData = exec.data(node);
    let value = exec.reg_shifted(node, d.rd);
    exec.bus.cp15_write(
        exec.state.cpu,
        value,
        d.crn as u32,
        d.crm as u32,
        d.opc1 as u32,
        d.opc2 as u32,
    );
    exec.add_cycles(d.cycles as u32);
    Flow::Next
}

fn move_from_coprocessor<S: Bus>(node: &Node<S>, exec: &mut Exec<'_, S>) -> Flow {
    let d: SystemData = exec.data(node);
    let value = exec.bus.cp15_read(
        exec.state.cpu,
        d.crn as u32,
        d.crm as u32,
        d.opc1 as u32,
        d.opc2 as u32,
    );
    if d.rd == PC {
        // Only the condition flags get written
        let cpsr = (exec.state.cpsr() & 0x0FFF_FFFF) | (value & 0xF000_0000);
        exec.state.set_cpsr_flags(cpsr);
    } else {
        exec.set_reg(d.rd, value);
    }
    exec.add_cycles(d.cycles as u32);
    Flow::Next
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{decode::Decoder, interface::CpuId};

    #[test]
    fn coprocessor_shapes() {
        // MRC p15, 0, r0, c1, c0, 0
        assert_eq!(shape_of(&Decoder::new().arm(CpuId::Arm9, 0, 0xEE11_0F10)), Some(MRC));
        // MCR p15, 0, r0, c7, c5, 0
        assert_eq!(shape_of(&Decoder::new().arm(CpuId::Arm9, 0, 0xEE07_0F15)), Some(MCR));
        // MRC p14, 0, r0, c0, c0, 0
        assert_eq!(
            shape_of(&Decoder::new().arm(CpuId::Arm9, 0, 0xEE10_0E10)),
            Some(OTHER_COPROCESSOR)
        );
        assert_eq!(shape_of(&Decoder::new().arm(CpuId::Arm9, 0, 0xEF00_0000)), Some(SWI));
    }
}
