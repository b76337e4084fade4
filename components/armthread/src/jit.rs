// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! Per-CPU cache governance: compiling blocks on lookup misses,
//! invalidation with thrash detection, and full resets.

use alloc::vec::Vec;
use core::ops::RangeInclusive;

use hashbrown::HashMap;

use crate::{
    analyze::{optimize_flags, partition_sub_blocks},
    cache::{
        lut::{BlockRef, LookupTable},
        CodeCache,
    },
    compiler::{emit_block, MethodTables},
    config::JitConfig,
    decode::Decoder,
    error::JitError,
    interface::{Bus, CodeRegion, CpuId},
    memory::Address,
    state::{CpuState, Flag},
};

/// Lookup table slots per coverage chunk (256 bytes of code).
const COVERAGE_SHIFT: usize = 7;
/// Lookup table slots per thrash granule (16 bytes of code).
const GRANULE_SHIFT: usize = 3;

/// Statistics of one CPU's code cache, for debugger views.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct JitStats {
    pub bytes_used: usize,
    pub capacity: usize,
    pub blocks_compiled: u64,
    /// Full resets of the cache, from running out of space or CPU resets.
    pub resets: u64,
}

/// Guest code range a compiled block was built from.
#[derive(Debug, Copy, Clone)]
struct Coverage {
    first_slot: usize,
    end_slot: usize,
    start: u32,
}

impl Coverage {
    fn contains(&self, slot: usize) -> bool {
        (self.first_slot..self.end_slot).contains(&slot)
    }

    /// Coverage chunks this range is recorded in.
    fn chunks(&self) -> RangeInclusive<usize> {
        (self.first_slot >> COVERAGE_SHIFT)..=((self.end_slot - 1) >> COVERAGE_SHIFT)
    }
}

/// Code cache, lookup table and bookkeeping of one CPU.
pub struct CpuJit {
    cpu: CpuId,
    regions: &'static [CodeRegion],
    pub(crate) cache: CodeCache,
    lut: LookupTable,
    coverage: HashMap<usize, Vec<Coverage>>,
    thrash: HashMap<usize, u8>,
    blocks_compiled: u64,
    resets: u64,
}

impl CpuJit {
    pub fn new(cpu: CpuId, config: &JitConfig, regions: &'static [CodeRegion]) -> Result<Self, JitError> {
        Ok(Self {
            cpu,
            regions,
            cache: CodeCache::reserve(config.cache_reserve)?,
            lut: LookupTable::new(regions)?,
            coverage: HashMap::new(),
            thrash: HashMap::new(),
            blocks_compiled: 0,
            resets: 0,
        })
    }

    /// A fresh instance with the cache size of `config`. Statistics
    /// carry over, counting the switch as a reset.
    pub fn resized(&self, config: &JitConfig) -> Result<Self, JitError> {
        let mut jit = Self::new(self.cpu, config, self.regions)?;
        jit.blocks_compiled = self.blocks_compiled;
        jit.resets = self.resets + 1;
        Ok(jit)
    }

    /// Find the block at an address. Blocks from before the last
    /// reset are misses.
    pub fn lookup(&self, addr: u32) -> Option<BlockRef> {
        match self.lut.lookup(addr)? {
            BlockRef::Compiled { generation, .. } if generation != self.cache.generation() => None,
            block => Some(block),
        }
    }

    /// Compile the block at the CPU's next instruction and install it.
    /// `BlockRef::Interpret` means the instruction has to be run uncached.
    pub fn compile<S: Bus>(
        &mut self,
        decoder: &Decoder,
        tables: &MethodTables<S>,
        config: &JitConfig,
        state: &mut CpuState,
        bus: &mut S,
    ) -> Result<BlockRef, JitError> {
        let addr = state.next_instruction;
        if !self.lut.is_mapped(addr) {
            log::info!("{} tried to execute unmapped code at {}, halting", self.cpu, Address(addr));
            state.halted = true;
            return Err(JitError::UnmappedCode { cpu: self.cpu, addr });
        }

        if self.is_thrashing(addr, config) {
            log::info!(
                "Code at {} on {} keeps getting rewritten, interpreting it instead",
                Address(addr),
                self.cpu
            );
            self.lut.install(addr, BlockRef::Interpret);
            return Ok(BlockRef::Interpret);
        }

        if self.cache.remaining() < config.reset_threshold() {
            log::info!(
                "Code cache of {} is down to {} bytes, resetting",
                self.cpu,
                self.cache.remaining()
            );
            self.reset_full();
        }

        let thumb = state.is_flag(Flag::Thumb);
        let mut run = decoder.decode_run(bus, self.cpu, addr, thumb, config.max_block_instructions);
        if run.is_empty() {
            return Ok(BlockRef::Interpret);
        }
        if config.optimize_flags {
            optimize_flags(&mut run);
        }
        partition_sub_blocks(&mut run);

        let Ok(header) = emit_block(&mut self.cache, tables, &run) else {
            // The half-built block is garbage; start over on the next compile
            log::info!(
                "Code cache of {} ran out while compiling {}, resetting",
                self.cpu,
                Address(addr)
            );
            self.reset_full();
            return Ok(BlockRef::Interpret);
        };
        let block = BlockRef::Compiled {
            header,
            generation: self.cache.generation(),
        };
        self.lut.install(addr, block);
        self.record_coverage(addr, run.len() as u32 * run[0].width());
        self.blocks_compiled += 1;

        log::debug!(
            "Compiled {} instructions at {} on {}, {} bytes of cache used",
            run.len(),
            Address(addr),
            self.cpu,
            self.cache.used()
        );
        Ok(block)
    }

    fn is_thrashing(&self, addr: u32, config: &JitConfig) -> bool {
        self.lut
            .slot_index(addr)
            .and_then(|slot| self.thrash.get(&(slot >> GRANULE_SHIFT)))
            .is_some_and(|count| *count > config.recompile_threshold)
    }

    fn record_coverage(&mut self, start: u32, len: u32) {
        let Some(first_slot) = self.lut.slot_index(start) else {
            return;
        };
        let entry = Coverage {
            first_slot,
            end_slot: first_slot + (len as usize >> 1),
            start,
        };
        for chunk in entry.chunks() {
            self.coverage.entry(chunk).or_default().push(entry);
        }
    }

    /// Guest memory at the address changed; drop every block covering it.
    pub fn invalidate(&mut self, addr: u32) {
        let Some(slot) = self.lut.slot_index(addr) else {
            return;
        };

        let hits: Vec<Coverage> = self
            .coverage
            .get(&(slot >> COVERAGE_SHIFT))
            .map(|entries| entries.iter().filter(|e| e.contains(slot)).copied().collect())
            .unwrap_or_default();
        for hit in &hits {
            for chunk in hit.chunks() {
                let emptied = match self.coverage.get_mut(&chunk) {
                    Some(entries) => {
                        entries.retain(|e| e.first_slot != hit.first_slot);
                        entries.is_empty()
                    }
                    None => false,
                };
                if emptied {
                    self.coverage.remove(&chunk);
                }
            }
        }

        let mut starts: Vec<u32> = hits.iter().map(|hit| hit.start).collect();
        starts.push(addr);

        for start in starts {
            if let Some(BlockRef::Compiled { .. }) = self.lut.invalidate(start) {
                log::debug!("Invalidated block at {} on {}", Address(start), self.cpu);
                if let Some(start_slot) = self.lut.slot_index(start) {
                    let count = self.thrash.entry(start_slot >> GRANULE_SHIFT).or_insert(0);
                    *count = count.saturating_add(1);
                }
            }
        }
    }

    /// Drop all compiled code. Thrash counts survive.
    pub fn reset_full(&mut self) {
        self.cache.reset();
        self.lut.reset();
        self.coverage.clear();
        self.resets += 1;
    }

    /// Reset for a CPU reset, forgetting everything.
    pub fn reset(&mut self) {
        self.reset_full();
        self.thrash.clear();
    }

    pub fn stats(&self) -> JitStats {
        JitStats {
            bytes_used: self.cache.used(),
            capacity: self.cache.capacity(),
            blocks_compiled: self.blocks_compiled,
            resets: self.resets,
        }
    }
}
