// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! Nodes that are not guest instructions: condition checks,
//! PC synchronization and block exits.

use super::{Exec, Flow, Node};
use crate::interface::Bus;

/// Start of a conditional sub-block.
#[derive(Debug, Copy, Clone)]
pub struct CondStart {
    pub cond: u8,
    /// Node following the sub-block.
    pub target: u16,
    /// Instructions in the sub-block, each costing a cycle when skipped.
    pub instructions: u16,
}

#[derive(Debug, Copy, Clone)]
pub struct Skip {
    pub cycles: u16,
}

#[derive(Debug, Copy, Clone)]
pub struct Stop {
    /// Address following the last instruction of the block.
    pub next: u32,
}

pub fn cond_start<S: Bus>(node: &Node<S>, exec: &mut Exec<'_, S>) -> Flow {
    let data: CondStart = exec.data(node);
    if exec.state.eval_condition(data.cond) {
        Flow::Next
    } else {
        exec.add_cycles(data.instructions as u32);
        Flow::Jump(data.target)
    }
}

/// A sub-block that can never execute.
pub fn skip<S: Bus>(node: &Node<S>, exec: &mut Exec<'_, S>) -> Flow {
    let data: Skip = exec.data(node);
    exec.add_cycles(data.cycles as u32);
    Flow::Next
}

/// Make r15 visible in the register file before an instruction
/// that reads and writes it.
pub fn sync_before<S: Bus>(node: &Node<S>, exec: &mut Exec<'_, S>) -> Flow {
    exec.state.registers[15] = node.r15;
    Flow::Next
}

/// Publish a PC an instruction wrote and leave the block.
pub fn sync_after<S: Bus>(_node: &Node<S>, exec: &mut Exec<'_, S>) -> Flow {
    exec.state.next_instruction = exec.state.registers[15];
    Flow::Stop
}

/// Like [sync_after], but only if the SWI before entered the guest
/// handler. A high-level SWI returns to the next instruction.
pub fn sync_after_swi<S: Bus>(node: &Node<S>, exec: &mut Exec<'_, S>) -> Flow {
    if exec.swi_trapped {
        sync_after(node, exec)
    } else {
        Flow::Next
    }
}

/// Terminal node of every block.
pub fn stop<S: Bus>(node: &Node<S>, exec: &mut Exec<'_, S>) -> Flow {
    let data: Stop = exec.data(node);
    exec.state.next_instruction = data.next;
    Flow::Stop
}

/// Fill of a node array before the block compiler wrote it.
pub fn unfilled<S: Bus>(_node: &Node<S>, _exec: &mut Exec<'_, S>) -> Flow {
    debug_assert!(false, "Executed a node that was never compiled");
    Flow::Stop
}
