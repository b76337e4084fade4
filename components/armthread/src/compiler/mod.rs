// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! Threaded code: every guest instruction is compiled into a node holding
//! a method specialized for its shape and a private data record in the
//! code cache. A block is an array of nodes the dispatcher walks, with
//! control nodes for conditions and for keeping the PC in sync.

pub mod alu;
pub mod block;
pub mod branch;
pub mod control;
pub mod multiply;
pub mod psr;
pub mod system;
pub mod transfer;

use alloc::vec::Vec;

use common::numutil::NumExt;

use crate::{
    cache::{CodeCache, DataRef},
    decode::{Instruction, Op, Register, PC},
    error::CacheFull,
    exceptions::Exception,
    interface::{Bus, RwType},
    memory::{Access, Address},
    state::{CpuState, Flag},
};

/// What the dispatcher does after a method returned.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Flow {
    /// Continue with the following node.
    Next,
    /// Continue at the given node of the block.
    Jump(u16),
    /// Leave the block.
    Stop,
}

pub type Method<S> = fn(&Node<S>, &mut Exec<'_, S>) -> Flow;

/// One link of a compiled block.
pub struct Node<S: Bus> {
    pub method: Method<S>,
    pub data: DataRef,
    /// Value of r15 while this node's instruction executes.
    pub r15: u32,
}

impl<S: Bus> Clone for Node<S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S: Bus> Copy for Node<S> {}

/// Header of a compiled block, stored in the cache.
#[derive(Debug, Copy, Clone)]
pub struct BlockHeader {
    pub nodes: DataRef,
    pub len: u16,
    pub thumb: bool,
    /// Guest address of the first instruction.
    pub start: u32,
    /// Guest address after the last instruction.
    pub end: u32,
}

/// Execution context of one dispatcher call.
pub struct Exec<'c, S: Bus> {
    pub cache: &'c CodeCache,
    pub state: &'c mut CpuState,
    pub bus: &'c mut S,
    /// Cycles taken so far.
    pub cycles: u32,
    /// Set by SWI when it entered the guest handler.
    pub swi_trapped: bool,
}

impl<'c, S: Bus> Exec<'c, S> {
    pub fn new(cache: &'c CodeCache, state: &'c mut CpuState, bus: &'c mut S) -> Self {
        Self {
            cache,
            state,
            bus,
            cycles: 0,
            swi_trapped: false,
        }
    }

    /// The private data record of a node.
    #[inline]
    pub fn data<T: Copy>(&self, node: &Node<S>) -> T {
        self.cache.get(node.data, 0)
    }

    /// Read a register, with r15 being the pipeline-visible PC.
    #[inline]
    pub fn reg(&self, node: &Node<S>, reg: Register) -> u32 {
        if reg == PC {
            node.r15
        } else {
            self.state.registers[reg.us()]
        }
    }

    /// Read a register for a shift by register or a stored value;
    /// the pipeline has advanced another word then.
    #[inline]
    pub fn reg_shifted(&self, node: &Node<S>, reg: Register) -> u32 {
        if reg == PC {
            node.r15.wrapping_add(4)
        } else {
            self.state.registers[reg.us()]
        }
    }

    /// Write a register. Writes to r15 get aligned to the current
    /// instruction width.
    #[inline]
    pub fn set_reg(&mut self, reg: Register, value: u32) {
        if reg == PC {
            let mask = if self.state.is_flag(Flag::Thumb) { !1 } else { !3 };
            self.state.registers[15] = value & mask;
        } else {
            self.state.registers[reg.us()] = value;
        }
    }

    /// Load a value into the PC. ARMv5 switches to THUMB on bit 0.
    pub fn load_pc(&mut self, value: u32) {
        if self.state.cpu.is_v5() {
            self.state.set_flag(Flag::Thumb, value.is_bit(0));
        }
        self.set_reg(PC, value);
    }

    #[inline]
    pub fn add_cycles(&mut self, cycles: u32) {
        self.cycles += cycles;
    }

    /// Add the cost of an instruction that also accessed memory.
    /// The ARM9 overlaps both, the ARM7 does not.
    #[inline]
    pub fn alu_mem(&mut self, alu: u32, mem: u32) {
        self.cycles += if self.state.cpu.is_v5() {
            alu.max(mem)
        } else {
            alu + mem
        };
    }

    #[inline]
    pub fn load<T: RwType>(&mut self, addr: u32, access: Access) -> Option<(u32, u16)> {
        self.bus.read::<T>(self.state.cpu, Address(addr), access)
    }

    #[inline]
    pub fn store<T: RwType>(&mut self, addr: u32, value: u32, access: Access) -> Option<u16> {
        self.bus
            .write::<T>(self.state.cpu, Address(addr), T::from_u32(value), access)
    }

    /// Address of the instruction a node belongs to.
    pub fn instruction_addr(&self, node: &Node<S>) -> u32 {
        node.r15.wrapping_sub(self.state.instruction_width() * 2)
    }

    /// Raise a data abort for the instruction of this node.
    pub fn data_abort(&mut self, node: &Node<S>) -> Flow {
        let lr = self.instruction_addr(node).wrapping_add(8);
        self.state.enter_exception(self.bus, Exception::DataAbort, lr);
        Flow::Stop
    }

    /// Raise an undefined instruction exception for the instruction of this node.
    pub fn undefined(&mut self, node: &Node<S>) -> Flow {
        let lr = self
            .instruction_addr(node)
            .wrapping_add(self.state.instruction_width());
        self.state.enter_exception(self.bus, Exception::Undefined, lr);
        Flow::Stop
    }
}

/// Methods of every instruction shape, built once for a bus type.
pub struct MethodTables<S: Bus> {
    alu: Vec<Method<S>>,
    multiply: Vec<Method<S>>,
    psr: Vec<Method<S>>,
    transfer: Vec<Method<S>>,
    block: Vec<Method<S>>,
    branch: Vec<Method<S>>,
    system: Vec<Method<S>>,
}

impl<S: Bus> MethodTables<S> {
    pub fn new() -> Self {
        Self {
            alu: (0..alu::SHAPES).map(alu::method_for::<S>).collect(),
            multiply: (0..multiply::SHAPES).map(multiply::method_for::<S>).collect(),
            psr: (0..psr::SHAPES).map(psr::method_for::<S>).collect(),
            transfer: (0..transfer::SHAPES).map(transfer::method_for::<S>).collect(),
            block: (0..block::SHAPES).map(block::method_for::<S>).collect(),
            branch: (0..branch::SHAPES).map(branch::method_for::<S>).collect(),
            system: (0..system::SHAPES).map(system::method_for::<S>).collect(),
        }
    }

    /// Compile one instruction into its method and data record.
    pub fn compile(
        &self,
        cache: &mut CodeCache,
        inst: &Instruction,
    ) -> Result<(Method<S>, DataRef), CacheFull> {
        match inst.op {
            Op::Alu { .. } => alu::compile(cache, &self.alu, inst),
            Op::Mul { .. } | Op::HalfMul { .. } | Op::Clz { .. } | Op::Sat { .. } => {
                multiply::compile(cache, &self.multiply, inst)
            }
            Op::Mrs { .. } | Op::Msr { .. } => psr::compile(cache, &self.psr, inst),
            Op::Transfer { .. } | Op::Swap { .. } => transfer::compile(cache, &self.transfer, inst),
            Op::Block { .. } => block::compile(cache, &self.block, inst),
            Op::Branch { .. }
            | Op::BranchExchange { .. }
            | Op::LinkPrefix { .. }
            | Op::LinkSuffix { .. } => branch::compile(cache, &self.branch, inst),
            Op::Coproc { .. } | Op::Swi { .. } | Op::Bkpt | Op::Undefined | Op::Nop { .. } => {
                system::compile(cache, &self.system, inst)
            }
        }
    }
}

impl<S: Bus> Default for MethodTables<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Amount of nodes a run compiles into.
fn node_count(run: &[Instruction]) -> usize {
    let mut count = 1;
    let mut sub_block = None;
    for inst in run {
        if sub_block != Some(inst.sub_block) {
            sub_block = Some(inst.sub_block);
            if !inst.is_unconditional() {
                // Condition check, or the skip of a never-executed sub-block
                count += 1;
            }
        }
        if inst.is_never() {
            continue;
        }
        count += 1 + (inst.reads_pc && inst.writes_pc) as usize + inst.writes_pc as usize;
    }
    count
}

/// A conditional sub-block whose skip target is not known yet.
struct PendingCondition {
    node: usize,
    cond: u8,
    r15: u32,
    instructions: u16,
}

/// Compile a decoded run into a block, returning its header.
pub fn emit_block<S: Bus>(
    cache: &mut CodeCache,
    tables: &MethodTables<S>,
    run: &[Instruction],
) -> Result<DataRef, CacheFull> {
    let (Some(first), Some(last)) = (run.first(), run.last()) else {
        return Err(CacheFull);
    };
    let len = node_count(run);
    let unfilled = Node::<S> {
        method: control::unfilled::<S>,
        data: DataRef(0),
        r15: 0,
    };
    let nodes = cache.put_array(len, unfilled)?;

    let mut n = 0;
    let mut pending: Option<PendingCondition> = None;
    let mut sub_block = None;
    for (idx, inst) in run.iter().enumerate() {
        if sub_block != Some(inst.sub_block) {
            sub_block = Some(inst.sub_block);
            if let Some(cond) = pending.take() {
                close_condition::<S>(cache, nodes, cond, n)?;
            }

            if inst.is_never() {
                let skipped = run[idx..]
                    .iter()
                    .take_while(|i| i.sub_block == inst.sub_block)
                    .count();
                let data = cache.put(control::Skip {
                    cycles: skipped as u16,
                })?;
                let node = Node {
                    method: control::skip::<S>,
                    data,
                    r15: inst.r15(),
                };
                cache.write(nodes, n, node);
                n += 1;
            } else if !inst.is_unconditional() {
                pending = Some(PendingCondition {
                    node: n,
                    cond: inst.cond,
                    r15: inst.r15(),
                    instructions: 0,
                });
                n += 1;
            }
        }
        if inst.is_never() {
            continue;
        }
        if let Some(cond) = pending.as_mut() {
            cond.instructions += 1;
        }

        let r15 = inst.r15();
        if inst.reads_pc && inst.writes_pc {
            let sync = Node {
                method: control::sync_before::<S>,
                data: DataRef(0),
                r15,
            };
            cache.write(nodes, n, sync);
            n += 1;
        }

        let (method, data) = tables.compile(cache, inst)?;
        cache.write(nodes, n, Node { method, data, r15 });
        n += 1;

        if inst.writes_pc {
            let method = if matches!(inst.op, Op::Swi { .. }) {
                control::sync_after_swi::<S>
            } else {
                control::sync_after::<S>
            };
            let sync = Node {
                method,
                data: DataRef(0),
                r15,
            };
            cache.write(nodes, n, sync);
            n += 1;
        }
    }
    if let Some(cond) = pending.take() {
        close_condition::<S>(cache, nodes, cond, n)?;
    }

    let data = cache.put(control::Stop { next: last.next() })?;
    let terminal = Node {
        method: control::stop::<S>,
        data,
        r15: last.r15(),
    };
    cache.write(nodes, n, terminal);
    debug_assert_eq!(n + 1, len, "Node count mismatch");

    cache.put(BlockHeader {
        nodes,
        len: len as u16,
        thumb: first.thumb,
        start: first.addr,
        end: last.next(),
    })
}

/// Patch the condition node of a sub-block now that its end is known.
fn close_condition<S: Bus>(
    cache: &mut CodeCache,
    nodes: DataRef,
    cond: PendingCondition,
    target: usize,
) -> Result<(), CacheFull> {
    let data = cache.put(control::CondStart {
        cond: cond.cond,
        target: target as u16,
        instructions: cond.instructions,
    })?;
    let node = Node::<S> {
        method: control::cond_start::<S>,
        data,
        r15: cond.r15,
    };
    cache.write(nodes, cond.node, node);
    Ok(())
}

/// Run a compiled block until one of its nodes stops.
pub fn run_block<S: Bus>(exec: &mut Exec<'_, S>, header: &BlockHeader) {
    let cache = exec.cache;
    let mut idx = 0;
    while idx < header.len as usize {
        let node: Node<S> = cache.get(header.nodes, idx);
        match (node.method)(&node, exec) {
            Flow::Next => idx += 1,
            Flow::Jump(target) => idx = target as usize,
            Flow::Stop => return,
        }
    }
    debug_assert!(false, "Block ran past its terminal node");
}

#[cfg(test)]
mod test {
    use alloc::vec::Vec;

    use super::*;
    use crate::{
        analyze::partition_sub_blocks,
        decode::Decoder,
        interface::CpuId,
    };

    fn arm_run(cpu: CpuId, code: &[u32]) -> Vec<Instruction> {
        let decoder = Decoder::new();
        let mut run: Vec<_> = code
            .iter()
            .enumerate()
            .map(|(i, raw)| decoder.arm(cpu, i as u32 * 4, *raw))
            .collect();
        partition_sub_blocks(&mut run);
        run
    }

    #[test]
    fn node_counts() {
        // MOV r0, #0; ADD r0, r0, #5
        assert_eq!(node_count(&arm_run(CpuId::Arm9, &[0xE3A0_0000, 0xE280_0005])), 3);
        // MOVEQ r0, #0; MOVEQ r1, #0; MOVNE r0, #1
        let run = arm_run(CpuId::Arm9, &[0x03A0_0000, 0x03A0_1000, 0x13A0_0001]);
        assert_eq!(node_count(&run), 6);
        // ADD pc, pc, r0: sync before and after
        assert_eq!(node_count(&arm_run(CpuId::Arm9, &[0xE08F_F000])), 4);
        // BL: only sync after
        assert_eq!(node_count(&arm_run(CpuId::Arm9, &[0xEB00_0000])), 3);
        // ARM7 never-executed instructions collapse into one skip node
        let run = arm_run(CpuId::Arm7, &[0xF3A0_0000, 0xF3A0_0000, 0xE3A0_0000]);
        assert_eq!(node_count(&run), 3);
    }

    #[test]
    fn emitted_block_layout() {
        let tables = MethodTables::<crate::tests::TestBus>::new();
        let mut cache = CodeCache::reserve(0x4000).unwrap();
        let run = arm_run(CpuId::Arm9, &[0x03A0_0000, 0x03A0_1000, 0xE3A0_0001]);
        let header = emit_block(&mut cache, &tables, &run).unwrap();
        let header: BlockHeader = cache.get(header, 0);
        assert_eq!(header.len, 5);
        assert_eq!((header.start, header.end), (0, 12));
        assert!(!header.thumb);

        let cond: Node<crate::tests::TestBus> = cache.get(header.nodes, 0);
        let cond: control::CondStart = cache.get(cond.data, 0);
        assert_eq!((cond.target, cond.instructions), (3, 2));
    }

    #[test]
    fn thumb_block_header() {
        let tables = MethodTables::<crate::tests::TestBus>::new();
        let mut cache = CodeCache::reserve(0x4000).unwrap();
        let run = [Decoder::new().thumb(CpuId::Arm7, 0x100, 0x2005)];
        let header = emit_block(&mut cache, &tables, &run).unwrap();
        let header: BlockHeader = cache.get(header, 0);
        assert!(header.thumb);
        assert_eq!(header.end, 0x102);
    }

    #[test]
    fn full_cache_fails() {
        let tables = MethodTables::<crate::tests::TestBus>::new();
        let mut cache = CodeCache::reserve(64).unwrap();
        let run = arm_run(CpuId::Arm9, &[0xE3A0_0000, 0xE280_0005]);
        assert_eq!(emit_block(&mut cache, &tables, &run).unwrap_err(), CacheFull);
    }
}
