// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

use alloc::format;

use common::testing::{run_test, TestStatus};

use super::{assert_equivalent, TestSystem, UNMAPPED};
use crate::{CpuId, Flag, Mode};

const C: u32 = 1 << 29;
const Z: u32 = 1 << 30;

#[test]
fn mov_add_immediate() {
    let mut sys = TestSystem::blocks_of(CpuId::Arm9, 2);
    // MOV r0, #0; ADD r0, r0, #5
    sys.bus.arm(0, &[0xE3A0_0000, 0xE280_0005]);
    sys.set_flags(C);

    assert_eq!(sys.step(), 2);
    assert_eq!(sys.state.registers[0], 5);
    assert!(sys.state.is_flag(Flag::Carry));
    assert_eq!(sys.state.next_instruction, 8);
}

#[test]
fn lsl_by_register() {
    let cases = [(0, 0x8000_0001, true), (1, 2, true), (32, 0, true), (33, 0, false)];
    for (amount, result, carry) in cases {
        // MOVS r1, r0, LSL r2
        let sys = assert_equivalent(CpuId::Arm9, &[0xE1B0_1210], |sys| {
            sys.state.registers[0] = 0x8000_0001;
            sys.state.registers[2] = amount;
            sys.set_flags(C);
        });
        assert_eq!(sys.state.registers[1], result, "LSL by {amount}");
        assert_eq!(sys.state.is_flag(Flag::Carry), carry, "LSL by {amount}");
        assert_eq!(sys.cycles, 2);
    }
}

#[test]
fn skipped_sub_block() {
    // MOVEQ r0, #1; MOVEQ r1, #2; MOV r2, #3
    let code = [0x03A0_0001, 0x03A0_1002, 0xE3A0_2003];
    let mut sys = TestSystem::blocks_of(CpuId::Arm9, 3);
    sys.bus.arm(0, &code);
    sys.set_flags(C);
    let cpsr = sys.state.cpsr();

    assert_eq!(sys.step(), 3);
    assert_eq!(&sys.state.registers[..3], &[0, 0, 3]);
    assert_eq!(sys.state.cpsr(), cpsr);

    sys.jump(0);
    sys.set_flags(Z);
    assert_eq!(sys.step(), 3);
    assert_eq!(&sys.state.registers[..3], &[1, 2, 3]);

    assert_equivalent(CpuId::Arm9, &code, |_| ());
}

#[test]
fn never_on_armv4() {
    let mut sys = TestSystem::blocks_of(CpuId::Arm7, 2);
    // MOVNV r0, #1; MOV r1, #1
    sys.bus.arm(0, &[0xF3A0_0001, 0xE3A0_1001]);
    assert_eq!(sys.step(), 2);
    assert_eq!(&sys.state.registers[..2], &[0, 1]);
}

#[test]
fn branch_with_link() {
    let mut sys = TestSystem::blocks_of(CpuId::Arm9, 8);
    // MOV r0, #1; BL 0x14
    sys.bus.arm(0, &[0xE3A0_0001, 0xEB00_0002]);
    assert_eq!(sys.step(), 4);
    assert_eq!(sys.state.registers[14], 8);
    assert_eq!(sys.state.next_instruction, 0x14);
    assert_eq!(sys.state.registers[15], 0x14);
}

#[test]
fn pc_relative_writes() {
    // MOV lr, pc; ADD pc, pc, r0
    let sys = assert_equivalent(CpuId::Arm9, &[0xE1A0_E00F, 0xE08F_F000], |sys| {
        sys.state.registers[0] = 8;
    });
    assert_eq!(sys.state.registers[14], 8);
    assert_eq!(sys.state.next_instruction, 0x14);
    assert_eq!(sys.cycles, 4);
}

#[test]
fn return_from_exception() {
    let mut sys = TestSystem::blocks_of(CpuId::Arm9, 1);
    // MOVS pc, lr
    sys.bus.arm(0, &[0xE1B0_F00E]);
    sys.state.registers[14] = 0x200;
    sys.state.set_spsr(0x1F);

    assert_eq!(sys.step(), 3);
    assert_eq!(sys.state.mode(), Mode::System);
    assert_eq!(sys.state.next_instruction, 0x200);
}

#[test]
fn load_into_pc() {
    for (cpu, thumb, cycles) in [(CpuId::Arm9, true, 5), (CpuId::Arm7, false, 6)] {
        let mut sys = TestSystem::blocks_of(cpu, 4);
        // LDR pc, [r1]
        sys.bus.arm(0, &[0xE591_F000]);
        sys.bus.arm(0x100, &[0x201]);
        sys.state.registers[1] = 0x100;

        assert_eq!(sys.step(), cycles);
        assert_eq!(sys.state.next_instruction, 0x200);
        assert_eq!(sys.state.is_flag(Flag::Thumb), thumb);
    }
}

#[test]
fn memory_timing() {
    // LDR r0, [r1]; STRB r0, [r2], #1; LDRH r3, [r1, #2]
    let code = [0xE591_0000, 0xE4C2_0001, 0xE1D1_30B2];
    for cpu in [CpuId::Arm9, CpuId::Arm7] {
        let sys = assert_equivalent(cpu, &code, |sys| {
            sys.bus.arm(0x100, &[0x1234_5678]);
            sys.state.registers[1] = 0x100;
            sys.state.registers[2] = 0x200;
        });
        assert_eq!(sys.state.registers[0], 0x1234_5678);
        assert_eq!(sys.state.registers[2], 0x201);
        assert_eq!(sys.state.registers[3], 0x1234);
        // ARM9 overlaps ALU and memory time, ARM7 adds them
        let expected = if cpu == CpuId::Arm9 { 3 + 2 + 3 } else { 4 + 3 + 4 };
        assert_eq!(sys.cycles, expected);
    }
}

#[test]
fn block_transfers() {
    // STMDB sp!, {r0-r3}; LDMIA sp!, {r4-r7}
    let mut sys = assert_equivalent(CpuId::Arm7, &[0xE92D_000F, 0xE8BD_00F0], |sys| {
        sys.state.registers[..4].copy_from_slice(&[1, 2, 3, 4]);
        sys.state.registers[13] = 0x8000;
    });
    assert_eq!(&sys.state.registers[4..8], &[1, 2, 3, 4]);
    assert_eq!(sys.state.registers[13], 0x8000);
    assert_eq!(sys.bus.word(0x7FF0), 1);
    assert_eq!(sys.bus.word(0x7FFC), 4);
}

#[test]
fn multiplies() {
    // UMULL r0, r1, r2, r3; CLZ r4, r1
    let sys = assert_equivalent(CpuId::Arm9, &[0xE081_0392, 0xE16F_4F11], |sys| {
        sys.state.registers[2] = 0xFFFF_FFFF;
        sys.state.registers[3] = 2;
    });
    assert_eq!(&sys.state.registers[..2], &[0xFFFF_FFFE, 1]);
    assert_eq!(sys.state.registers[4], 31);
}

#[test]
fn saturating_add() {
    // QADD r0, r1, r2
    let sys = assert_equivalent(CpuId::Arm9, &[0xE102_0051], |sys| {
        sys.state.registers[1] = 0x7FFF_FFFF;
        sys.state.registers[2] = 1;
    });
    assert_eq!(sys.state.registers[0], 0x7FFF_FFFF);
    assert!(sys.state.is_flag(Flag::QClamped));
}

#[test]
fn status_registers() {
    // MSR CPSR_f, #0xF0000000; MRS r0, CPSR
    let sys = assert_equivalent(CpuId::Arm9, &[0xE328_F4F0, 0xE10F_0000], |_| ());
    assert_eq!(sys.state.registers[0], 0xF000_00D3);
    assert_eq!(sys.cycles, 2);
}

#[test]
fn coprocessor() {
    // MRC p15, 0, r0, c0, c0, 0; MCR p15, 0, r0, c7, c5, 0
    let sys = assert_equivalent(CpuId::Arm9, &[0xEE10_0F10, 0xEE07_0F15], |_| ());
    assert_eq!(sys.state.registers[0], 0x4105_9461);
    assert_eq!(sys.bus.cp15_writes, &[(0x4105_9461, 7, 5)]);
    assert_eq!(sys.cycles, 4 + 2);
}

#[test]
fn unmapped_load_aborts() {
    let run = |uncached: bool| {
        let mut sys = TestSystem::blocks_of(CpuId::Arm9, 4);
        // MOV r2, #1; LDR r0, [r1]
        sys.bus.arm(0, &[0xE3A0_2001, 0xE591_0000]);
        sys.state.registers[1] = UNMAPPED;
        sys.state.registers[0] = 0x55;
        if uncached {
            sys.step_uncached();
            sys.step_uncached();
        } else {
            sys.step();
        }
        sys
    };
    let compiled = run(false);
    let uncached = run(true);

    assert_eq!(compiled.state.mode(), Mode::Abort);
    assert_eq!(compiled.state.registers[0], 0x55);
    assert_eq!(compiled.state.registers[14], 4 + 8);
    assert_eq!(compiled.state.next_instruction, 0x10);
    assert_eq!(compiled.state.registers, uncached.state.registers);
    assert_eq!(compiled.state.cpsr(), uncached.state.cpsr());
    assert_eq!(compiled.cycles, uncached.cycles);
}

#[test]
fn undefined_instruction() {
    let mut sys = TestSystem::blocks_of(CpuId::Arm9, 4);
    sys.bus.arm(0x100, &[0xE7F0_00F0]);
    sys.jump(0x100);
    sys.step();
    assert_eq!(sys.state.mode(), Mode::Undefined);
    assert_eq!(sys.state.registers[14], 0x104);
    assert_eq!(sys.state.next_instruction, 0x04);

    // CLZ does not exist on the ARM7
    let mut sys = TestSystem::blocks_of(CpuId::Arm7, 4);
    sys.bus.arm(0x100, &[0xE16F_4F11]);
    sys.jump(0x100);
    sys.step();
    assert_eq!(sys.state.mode(), Mode::Undefined);
}

#[test]
fn software_interrupts() {
    // High-level emulation continues after the SWI
    let mut sys = TestSystem::blocks_of(CpuId::Arm9, 4);
    sys.bus.arm(0, &[0xEF00_0005]);
    sys.bus.hle_swi = Some(10);
    assert_eq!(sys.step(), 13);
    assert_eq!(sys.bus.swi_calls, &[5]);
    assert_eq!(sys.state.next_instruction, 4);

    // Otherwise the guest handler is entered
    let mut sys = TestSystem::blocks_of(CpuId::Arm9, 4);
    sys.bus.arm(0, &[0xEF00_0005]);
    sys.state.set_cpsr(0x1F);
    assert_eq!(sys.step(), 3);
    assert_eq!(sys.state.mode(), Mode::Supervisor);
    assert_eq!(sys.state.spsr(), 0x1F);
    assert_eq!(sys.state.registers[14], 4);
    assert_eq!(sys.state.next_instruction, 8);
}

#[test]
fn counting_loop() {
    let code = [
        0xE3A0_0000, // MOV r0, #0
        0xE280_0001, // ADD r0, r0, #1
        0xE350_000A, // CMP r0, #10
        0x1AFF_FFFC, // BNE 4
        0xEAFF_FFFE, // B .
    ];
    let mut sys = TestSystem::blocks_of(CpuId::Arm9, 16);
    sys.bus.arm(0, &code);
    run_test(&mut sys, 32, |sys| {
        if sys.state.next_instruction != 0x10 {
            TestStatus::Running
        } else if sys.state.registers[0] == 10 {
            TestStatus::Success
        } else {
            TestStatus::FailedAt(format!("r0 is {}", sys.state.registers[0]))
        }
    });
    assert_eq!(sys.cycles, 6 + 8 * 5 + 6);

    // One instruction at a time, until the B . ran once
    let mut uncached = TestSystem::blocks_of(CpuId::Arm9, 16);
    uncached.bus.arm(0, &code);
    while uncached.state.next_instruction != 0x10 {
        uncached.step_uncached();
    }
    uncached.step_uncached();
    assert_eq!(uncached.cycles, sys.cycles);
    assert_eq!(uncached.state.registers, sys.state.registers);
}
