// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! A translator for the ARM946E-S (ARMv5TE) and ARM7TDMI (ARMv4T) that
//! compiles runs of guest instructions into chains of specialized
//! function pointers ("threaded code") and executes them from a code cache.
//!
//! The embedder owns the guest memory and CPU state and drives the
//! engine through [`Engine::execute`], calling [`Engine::invalidate`]
//! whenever a guest write may hit code.
//! All state is owned by the [`Engine`]; it provides no synchronization
//! of its own, so embedders calling it from more than one thread need to
//! add their own locking around it.

#![no_std]

extern crate alloc;

mod alu;
mod analyze;
mod cache;
mod compiler;
mod config;
mod decode;
mod error;
mod exceptions;
mod interface;
mod jit;
mod memory;
mod state;
#[cfg(test)]
mod tests;

use core::ops::Range;

pub use config::JitConfig;
pub use error::JitError;
pub use exceptions::Exception;
pub use interface::{Bus, CodeRegion, CpuId, RwType};
pub use jit::JitStats;
pub use memory::{access, Access, Address};
pub use state::{CpuState, Flag, Mode};

use crate::{
    analyze::partition_sub_blocks,
    cache::{lut::BlockRef, CodeCache},
    compiler::{emit_block, run_block, BlockHeader, Exec, MethodTables},
    decode::Decoder,
    jit::CpuJit,
};

const MB: usize = 1024 * 1024;
/// Arena of the uncached path; it only ever holds one instruction.
const SCRATCH_SIZE: usize = 0x1000;

/// The translation engine, holding a code cache and lookup table
/// for each of the two CPUs.
pub struct Engine<S: Bus> {
    config: JitConfig,
    decoder: Decoder,
    tables: MethodTables<S>,
    jits: [Option<CpuJit>; 2],
    scratch: Option<CodeCache>,
}

impl<S: Bus> Engine<S> {
    /// Create an engine. No memory is reserved until [`Engine::init`].
    pub fn new(config: JitConfig) -> Self {
        Self {
            config: config.sanitized(),
            decoder: Decoder::new(),
            tables: MethodTables::new(),
            jits: [None, None],
            scratch: None,
        }
    }

    /// Reserve the code caches and build the lookup tables for the
    /// code regions the bus reports.
    pub fn init(&mut self, bus: &S) -> Result<(), JitError> {
        for cpu in CpuId::ALL {
            let jit = CpuJit::new(cpu, &self.config, bus.code_regions(cpu))?;
            self.jits[cpu.index()] = Some(jit);
        }
        self.scratch = Some(CodeCache::reserve(SCRATCH_SIZE)?);
        log::info!(
            "{} initialized with {} MiB of code cache per CPU",
            self.description(),
            self.cache_reserve_mb()
        );
        Ok(())
    }

    /// Release all memory. [`Engine::execute`] fails until the next init.
    pub fn shutdown(&mut self) {
        self.jits = [None, None];
        self.scratch = None;
        log::info!("{} shut down", self.description());
    }

    /// Drop all compiled code of a CPU, for when it is reset.
    /// A changed cache size is applied here.
    pub fn reset(&mut self, cpu: CpuId) -> Result<(), JitError> {
        let jit = self.jits[cpu.index()]
            .as_mut()
            .ok_or(JitError::NotInitialized)?;
        if jit.cache.capacity() != self.config.cache_reserve {
            *jit = jit.resized(&self.config)?;
        } else {
            jit.reset();
        }
        Ok(())
    }

    pub fn reset_all(&mut self) -> Result<(), JitError> {
        for cpu in CpuId::ALL {
            self.reset(cpu)?;
        }
        Ok(())
    }

    /// Run the block at the CPU's next instruction, compiling it first
    /// if needed. Returns the cycles taken.
    pub fn execute(&mut self, state: &mut CpuState, bus: &mut S) -> Result<u32, JitError> {
        let jit = self.jits[state.cpu.index()]
            .as_mut()
            .ok_or(JitError::NotInitialized)?;
        let addr = state.next_instruction;
        log::trace!("{} executing at {}", state.cpu, Address(addr));

        // A block found through a mirror was compiled for another address
        let block = match jit.lookup(addr) {
            Some(BlockRef::Compiled { header, .. })
                if jit.cache.get::<BlockHeader>(header, 0).start != addr =>
            {
                None
            }
            block => block,
        };
        let block = match block {
            Some(block) => block,
            None => jit.compile(&self.decoder, &self.tables, &self.config, state, bus)?,
        };

        match block {
            BlockRef::Compiled { header, .. } => {
                let header: BlockHeader = jit.cache.get(header, 0);
                if header.thumb != state.is_flag(Flag::Thumb) {
                    return Self::run_uncached(&self.decoder, &self.tables, self.scratch.as_mut(), state, bus);
                }
                let mut exec = Exec::new(&jit.cache, state, bus);
                run_block(&mut exec, &header);
                Ok(exec.cycles)
            }
            BlockRef::Interpret => Self::run_uncached(&self.decoder, &self.tables, self.scratch.as_mut(), state, bus),
        }
    }

    /// Decode and run only the CPU's next instruction, without touching
    /// the code cache or lookup table.
    pub fn execute_uncached(&mut self, state: &mut CpuState, bus: &mut S) -> Result<u32, JitError> {
        Self::run_uncached(&self.decoder, &self.tables, self.scratch.as_mut(), state, bus)
    }

    fn run_uncached(
        decoder: &Decoder,
        tables: &MethodTables<S>,
        scratch: Option<&mut CodeCache>,
        state: &mut CpuState,
        bus: &mut S,
    ) -> Result<u32, JitError> {
        let scratch = scratch.ok_or(JitError::NotInitialized)?;
        let (cpu, addr) = (state.cpu, state.next_instruction);
        let mut run = decoder.decode_run(bus, cpu, addr, state.is_flag(Flag::Thumb), 1);
        if run.is_empty() {
            log::info!("{} tried to execute unmapped code at {}, halting", cpu, Address(addr));
            state.halted = true;
            return Err(JitError::UnmappedCode { cpu, addr });
        }
        partition_sub_blocks(&mut run);

        scratch.reset();
        let header = emit_block(scratch, tables, &run).map_err(|_| JitError::Reserve {
            bytes: SCRATCH_SIZE,
        })?;
        let header: BlockHeader = scratch.get(header, 0);
        let mut exec = Exec::new(scratch, state, bus);
        run_block(&mut exec, &header);
        Ok(exec.cycles)
    }

    /// Guest memory at the given address was written.
    pub fn invalidate(&mut self, addr: u32, cpu: CpuId) {
        if let Some(jit) = self.jits[cpu.index()].as_mut() {
            jit.invalidate(addr);
        }
    }

    /// Guest memory in the given range was written.
    pub fn invalidate_range(&mut self, range: Range<u32>, cpu: CpuId) {
        if let Some(jit) = self.jits[cpu.index()].as_mut() {
            for addr in range.step_by(2) {
                jit.invalidate(addr);
            }
        }
    }

    pub fn cache_reserve_mb(&self) -> usize {
        self.config.cache_reserve / MB
    }

    /// Set the size of each code cache. Takes effect on the next reset.
    pub fn set_cache_reserve_mb(&mut self, mb: usize) {
        self.config.cache_reserve = mb.saturating_mul(MB);
    }

    pub fn description(&self) -> &'static str {
        "Threaded code translator"
    }

    pub fn stats(&self, cpu: CpuId) -> Option<JitStats> {
        self.jits[cpu.index()].as_ref().map(CpuJit::stats)
    }

    pub fn config(&self) -> &JitConfig {
        &self.config
    }
}
