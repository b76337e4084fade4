// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

use super::{assert_equivalent_thumb, TestSystem};
use crate::{CpuId, Flag, Mode};

fn thumb_system(cpu: CpuId, max: usize, addr: u32, code: &[u16]) -> TestSystem {
    let mut sys = TestSystem::blocks_of(cpu, max);
    sys.bus.thumb(addr, code);
    sys.set_thumb(true);
    sys.jump(addr);
    sys
}

#[test]
fn immediates() {
    // MOV r0, #5; ADD r0, #3
    let mut sys = thumb_system(CpuId::Arm7, 2, 0x100, &[0x2005, 0x3003]);
    assert_eq!(sys.step(), 2);
    assert_eq!(sys.state.registers[0], 8);
    assert_eq!(sys.state.next_instruction, 0x104);
}

#[test]
fn long_branch_with_link() {
    // BL 0x208
    let mut sys = thumb_system(CpuId::Arm7, 8, 0x200, &[0xF000, 0xF802]);
    assert_eq!(sys.step(), 5);
    assert_eq!(sys.state.next_instruction, 0x208);
    assert_eq!(sys.state.registers[14], 0x205);
}

#[test]
fn exchange_to_arm() {
    // BX r1
    let mut sys = thumb_system(CpuId::Arm9, 8, 0x100, &[0x4708]);
    sys.state.registers[1] = 0x300;
    assert_eq!(sys.step(), 3);
    assert!(!sys.state.is_flag(Flag::Thumb));
    assert_eq!(sys.state.next_instruction, 0x300);
}

#[test]
fn conditional_branch() {
    // CMP r0, #0; BEQ 0xA; MOV r1, #1; B .
    let code = [0x2800, 0xD002, 0x2101, 0xE7FE];

    let mut sys = thumb_system(CpuId::Arm7, 8, 0, &code);
    assert_eq!(sys.step(), 4);
    assert_eq!(sys.state.next_instruction, 0xA);

    sys.jump(0);
    sys.state.registers[0] = 1;
    assert_eq!(sys.step(), 6);
    assert_eq!(sys.state.next_instruction, 6);
    assert_eq!(sys.state.registers[1], 1);
}

#[test]
fn push_and_pop() {
    // PUSH {r0, lr}; MOV r0, #0; POP {r0, pc}
    for cpu in [CpuId::Arm9, CpuId::Arm7] {
        let sys = assert_equivalent_thumb(cpu, &[0xB501, 0x2000, 0xBD01], |sys| {
            sys.state.registers[0] = 7;
            sys.state.registers[13] = 0x8000;
            sys.state.registers[14] = 0x181;
        });
        assert_eq!(sys.state.registers[0], 7);
        assert_eq!(sys.state.registers[13], 0x8000);
        assert_eq!(sys.state.next_instruction, 0x180);
        assert!(sys.state.is_flag(Flag::Thumb));
    }
}

#[test]
fn pc_relative_load() {
    // LDR r0, [pc, #4]; LDRH r1, [r2, #2]
    let sys = assert_equivalent_thumb(CpuId::Arm9, &[0x4801, 0x8851], |sys| {
        sys.bus.arm(8, &[0xCAFE_BABE]);
        sys.state.registers[2] = 8;
    });
    assert_eq!(sys.state.registers[0], 0xCAFE_BABE);
    assert_eq!(sys.state.registers[1], 0xCAFE);
}

#[test]
fn software_interrupts() {
    let mut sys = thumb_system(CpuId::Arm7, 8, 0x100, &[0xDF05]);
    sys.bus.hle_swi = Some(10);
    assert_eq!(sys.step(), 13);
    assert_eq!(sys.state.next_instruction, 0x102);

    let mut sys = thumb_system(CpuId::Arm7, 8, 0x100, &[0xDF05]);
    sys.step();
    assert_eq!(sys.state.mode(), Mode::Supervisor);
    assert!(!sys.state.is_flag(Flag::Thumb));
    assert_eq!(sys.state.registers[14], 0x102);
    assert_eq!(sys.state.next_instruction, 8);
}

#[test]
fn block_of_other_state() {
    let mut sys = TestSystem::blocks_of(CpuId::Arm9, 1);
    // MOV r2, #5 as ARM, MOV r0, #5 as THUMB
    sys.bus.thumb(0x100, &[0x2005, 0xE3A0]);
    sys.jump(0x100);
    sys.step();
    assert_eq!(sys.state.registers[2], 5);

    sys.set_thumb(true);
    sys.jump(0x100);
    assert_eq!(sys.step(), 1);
    assert_eq!(sys.state.registers[0], 5);
    assert_eq!(sys.state.next_instruction, 0x102);
    assert_eq!(sys.engine.stats(CpuId::Arm9).unwrap().blocks_compiled, 1);
}
