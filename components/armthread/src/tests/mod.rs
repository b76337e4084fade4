// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! System-level tests driving the engine against an in-memory bus.

use alloc::vec::Vec;

use common::{numutil::NumExt, testing::Testable};

use crate::{
    memory::{Access, Address},
    Bus, CodeRegion, CpuId, CpuState, Engine, JitConfig, RwType,
};

mod arm;
mod thumb;

/// Size of the test bus memory; it repeats up to [UNMAPPED].
const MEMORY: usize = 0x1_0000;
/// Accesses from here on have no backing store.
pub const UNMAPPED: u32 = 0x0100_0000;

/// A bus with a small, mirrored block of memory.
pub struct TestBus {
    pub memory: Vec<u8>,
    pub regions: &'static [CodeRegion],
    /// Cycles taken by a high-level SWI, or `None` to trap.
    pub hle_swi: Option<u16>,
    pub swi_calls: Vec<u32>,
    pub cp15_writes: Vec<(u32, u32, u32)>,
}

impl TestBus {
    pub fn new() -> Self {
        Self {
            memory: alloc::vec![0; MEMORY],
            regions: &[],
            hle_swi: None,
            swi_calls: Vec::new(),
            cp15_writes: Vec::new(),
        }
    }

    pub fn with_regions(regions: &'static [CodeRegion]) -> Self {
        Self {
            regions,
            ..Self::new()
        }
    }

    pub fn arm(&mut self, addr: u32, code: &[u32]) {
        for (i, inst) in code.iter().enumerate() {
            self.set::<u32>(CpuId::Arm9, Address(addr + i as u32 * 4), *inst);
        }
    }

    pub fn thumb(&mut self, addr: u32, code: &[u16]) {
        for (i, inst) in code.iter().enumerate() {
            self.set::<u16>(CpuId::Arm9, Address(addr + i as u32 * 2), *inst);
        }
    }

    pub fn word(&mut self, addr: u32) -> u32 {
        self.get::<u32>(CpuId::Arm9, Address(addr)).unwrap()
    }

    fn range<T: RwType>(addr: Address) -> Option<core::ops::Range<usize>> {
        if addr.0 >= UNMAPPED {
            return None;
        }
        let start = addr.0.us() & (MEMORY - 1);
        Some(start..start + T::WIDTH.us())
    }
}

impl Bus for TestBus {
    fn get<T: RwType>(&mut self, _cpu: CpuId, addr: Address) -> Option<T> {
        let bytes = self.memory.get(Self::range::<T>(addr)?)?;
        let value = bytes.iter().rev().fold(0, |acc, b| (acc << 8) | *b as u32);
        Some(T::from_u32(value))
    }

    fn set<T: RwType>(&mut self, _cpu: CpuId, addr: Address, value: T) -> bool {
        let Some(bytes) = Self::range::<T>(addr).and_then(|r| self.memory.get_mut(r)) else {
            return false;
        };
        let value = value.u32();
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = (value >> (i * 8)) as u8;
        }
        true
    }

    fn wait_time<T: RwType>(&mut self, _cpu: CpuId, _addr: Address, _access: Access) -> u16 {
        1
    }

    fn code_regions(&self, _cpu: CpuId) -> &'static [CodeRegion] {
        self.regions
    }

    fn software_interrupt(&mut self, _cpu: &mut CpuState, comment: u32) -> Option<u16> {
        self.swi_calls.push(comment);
        self.hle_swi
    }

    fn cp15_write(&mut self, _cpu: CpuId, value: u32, cn: u32, cm: u32, _op1: u32, _op2: u32) {
        self.cp15_writes.push((value, cn, cm));
    }

    fn cp15_read(&mut self, _cpu: CpuId, cn: u32, _cm: u32, _op1: u32, _op2: u32) -> u32 {
        // Main ID register; flags of the rest are all set
        if cn == 0 {
            0x4105_9461
        } else {
            0xF000_0000
        }
    }
}

/// An engine, a CPU and a bus, stepped one block at a time.
pub struct TestSystem {
    pub engine: Engine<TestBus>,
    pub state: CpuState,
    pub bus: TestBus,
    pub cycles: u64,
}

impl TestSystem {
    pub fn new(cpu: CpuId, config: JitConfig, bus: TestBus) -> Self {
        let mut engine = Engine::new(config);
        engine.init(&bus).unwrap();
        Self {
            engine,
            state: CpuState::new(cpu),
            bus,
            cycles: 0,
        }
    }

    /// A system with blocks of at most `max` instructions.
    pub fn blocks_of(cpu: CpuId, max: usize) -> Self {
        Self::new(cpu, config(max), TestBus::new())
    }

    pub fn step(&mut self) -> u32 {
        let cycles = self.engine.execute(&mut self.state, &mut self.bus).unwrap();
        self.cycles += cycles as u64;
        cycles
    }

    pub fn step_uncached(&mut self) -> u32 {
        let cycles = self
            .engine
            .execute_uncached(&mut self.state, &mut self.bus)
            .unwrap();
        self.cycles += cycles as u64;
        cycles
    }

    pub fn jump(&mut self, addr: u32) {
        self.state.next_instruction = addr;
    }

    pub fn set_flags(&mut self, flags: u32) {
        let cpsr = (self.state.cpsr() & 0x0FFF_FFFF) | flags;
        self.state.set_cpsr(cpsr);
    }

    pub fn set_thumb(&mut self, thumb: bool) {
        let cpsr = self.state.cpsr() & !crate::Flag::Thumb.mask();
        self.state.set_cpsr(cpsr | ((thumb as u32) << 5));
    }
}

impl Testable for TestSystem {
    fn advance(&mut self) {
        self.step();
    }
}

/// Small caches, so that tests do not spend their time poisoning memory.
pub fn config(max_block_instructions: usize) -> JitConfig {
    JitConfig {
        cache_reserve: 0x10_0000,
        low_water_mark: 0x1000,
        max_block_instructions,
        ..JitConfig::default()
    }
}

/// Run straight-line ARM code once as a block and once instruction by
/// instruction, and check both agree on everything the guest can see.
pub fn assert_equivalent(cpu: CpuId, code: &[u32], setup: impl Fn(&mut TestSystem)) -> TestSystem {
    compare(cpu, code.len(), |sys| {
        sys.bus.arm(0, code);
        setup(sys);
    })
}

/// [assert_equivalent], for THUMB code.
pub fn assert_equivalent_thumb(
    cpu: CpuId,
    code: &[u16],
    setup: impl Fn(&mut TestSystem),
) -> TestSystem {
    compare(cpu, code.len(), |sys| {
        sys.bus.thumb(0, code);
        sys.set_thumb(true);
        setup(sys);
    })
}

fn compare(cpu: CpuId, len: usize, setup: impl Fn(&mut TestSystem)) -> TestSystem {
    let mut compiled = TestSystem::blocks_of(cpu, len);
    setup(&mut compiled);
    compiled.step();

    let mut uncached = TestSystem::blocks_of(cpu, len);
    setup(&mut uncached);
    for _ in 0..len {
        uncached.step_uncached();
    }

    assert_eq!(compiled.state.registers, uncached.state.registers);
    assert_eq!(compiled.state.cpsr(), uncached.state.cpsr());
    assert_eq!(compiled.state.next_instruction, uncached.state.next_instruction);
    assert_eq!(compiled.cycles, uncached.cycles);
    assert!(compiled.bus.memory == uncached.bus.memory);
    compiled
}
