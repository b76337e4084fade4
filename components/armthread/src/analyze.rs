// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! Passes over a decoded run before it gets compiled.

use crate::decode::{FlagMask, Instruction, Op, Operand, PC};

/// Removes condition flag computations whose results are never observed.
/// This is a backwards liveness pass; anything that may leave the block
/// makes every flag live, since the following code is unknown.
pub fn optimize_flags(run: &mut [Instruction]) {
    let mut live = FlagMask::all();
    for inst in run.iter_mut().rev() {
        if inst.writes_pc {
            live = FlagMask::all();
        }

        let dead = !inst.flags_written.is_empty() && (inst.flags_written & live).is_empty();
        if inst.is_unconditional() && dead && strip_flags(inst) {
            inst.refresh();
        }

        if inst.is_unconditional() {
            live.remove(inst.flags_written);
        }
        live |= inst.flags_read;
        if inst.op.may_exit() {
            live = FlagMask::all();
        }
    }
}

/// Turn an instruction into its flag-less form. Returns false
/// if it has none.
fn strip_flags(inst: &mut Instruction) -> bool {
    match &mut inst.op {
        Op::Alu {
            op, s, rd, operand, ..
        } if *s && !(*rd == PC && op.should_write()) => {
            if op.should_write() {
                *s = false;
            } else {
                let cycles = if matches!(operand, Operand::ShiftReg { .. }) { 2 } else { 1 };
                inst.op = Op::Nop { cycles };
            }
            true
        }
        Op::Mul { s, .. } if *s => {
            *s = false;
            true
        }
        _ => false,
    }
}

/// Group the run into sub-blocks: runs of instructions sharing
/// a condition. A conditional instruction that changes the flags
/// ends its sub-block, since the condition needs to be re-evaluated.
pub fn partition_sub_blocks(run: &mut [Instruction]) {
    let mut id = 0;
    let mut prev: Option<(u8, bool)> = None;
    for inst in run.iter_mut() {
        let class = inst.cond;
        if let Some((prev_class, prev_splits)) = prev {
            if prev_class != class || prev_splits {
                id += 1;
            }
        }
        inst.sub_block = id;
        let splits = !inst.is_unconditional() && !inst.flags_written.is_empty();
        prev = Some((class, splits));
    }
}
