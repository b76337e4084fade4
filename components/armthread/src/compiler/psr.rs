// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! Status register transfers (MRS, MSR).

use common::numutil::NumExt;

use super::{Exec, Flow, Method, Node};
use crate::{
    cache::{CodeCache, DataRef},
    decode::{Instruction, MsrSource, Op, Register},
    error::CacheFull,
    interface::Bus,
    state::{Flag, Mode},
};

pub const SHAPES: usize = 6;

#[derive(Debug, Copy, Clone)]
pub struct PsrData {
    pub rd: Register,
    pub rm: Register,
    pub imm: u32,
    /// Bits of the status register that get written.
    pub mask: u32,
}

pub fn shape_of(inst: &Instruction) -> Option<usize> {
    match inst.op {
        Op::Mrs { spsr, .. } => Some(spsr as usize),
        Op::Msr { spsr, source, .. } => Some(2 + (spsr as usize) * 2 + matches!(source, MsrSource::Imm(_)) as usize),
        _ => None,
    }
}

/// Expand the field bits (f, s, x, c) into a mask of the bytes they cover.
fn field_mask(fields: u8) -> u32 {
    (0..4)
        .filter(|field| fields.is_bit(*field))
        .fold(0, |mask, field| mask | (0xFF << (field * 8)))
}

pub fn compile<S: Bus>(
    cache: &mut CodeCache,
    table: &[Method<S>],
    inst: &Instruction,
) -> Result<(Method<S>, DataRef), CacheFull> {
    let Some(shape) = shape_of(inst) else {
        unreachable!("Not a status register transfer");
    };
    let data = match inst.op {
        Op::Msr { mask, source, .. } => {
            let (rm, imm) = match source {
                MsrSource::Reg(rm) => (rm, 0),
                MsrSource::Imm(imm) => (0, imm),
            };
            PsrData {
                rd: 0,
                rm,
                imm,
                mask: field_mask(mask),
            }
        }
        Op::Mrs { rd, .. } => PsrData {
            rd,
            rm: 0,
            imm: 0,
            mask: 0,
        },
        _ => unreachable!(),
    };
    Ok((table[shape], cache.put(data)?))
}

pub fn method_for<S: Bus>(shape: usize) -> Method<S> {
    match shape {
        0 => mrs::<S, false>,
        1 => mrs::<S, true>,
        2 => msr::<S, false, false>,
        3 => msr::<S, false, true>,
        4 => msr::<S, true, false>,
        _ => msr::<S, true, true>,
    }
}

fn mrs<S: Bus, const SPSR: bool>(node: &Node<S>, exec: &mut Exec<'_, S>) -> Flow {
    let d: PsrData = exec.data(node);
    let value = if SPSR && exec.state.mode().has_spsr() {
        exec.state.spsr()
    } else {
        exec.state.cpsr()
    };
    exec.set_reg(d.rd, value);
    exec.add_cycles(1);
    Flow::Next
}

fn msr<S: Bus, const SPSR: bool, const IMM: bool>(node: &Node<S>, exec: &mut Exec<'_, S>) -> Flow {
    let d: PsrData = exec.data(node);
    let value = if IMM { d.imm } else { exec.reg(node, d.rm) };
    let mode = exec.state.mode();
    exec.add_cycles(1);

    if SPSR {
        if mode.has_spsr() {
            let spsr = exec.state.spsr();
            exec.state.set_spsr((spsr & !d.mask) | (value & d.mask));
        }
        return Flow::Next;
    }

    let mask = if mode == Mode::User {
        d.mask & 0xFF00_0000
    } else {
        d.mask
    };
    let old = exec.state.cpsr();
    let new = ((old & !mask) | (value & mask)).set_bit(Flag::Thumb as u32, old.is_bit(Flag::Thumb as u32));
    if (old ^ new) & 0xFF != 0 {
        exec.state.set_cpsr(new);
    } else {
        exec.state.set_cpsr_flags(new);
    }
    exec.bus.status_changed(exec.state);
    Flow::Next
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn masks() {
        assert_eq!(field_mask(0b1001), 0xFF00_00FF);
        assert_eq!(field_mask(0b1000), 0xFF00_0000);
        assert_eq!(field_mask(0b0111), 0x00FF_FFFF);
    }
}
