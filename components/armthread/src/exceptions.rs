// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! Exception entry.

use crate::{
    interface::Bus,
    state::{CpuState, Flag, Mode},
};

/// Exceptions guest code can trigger while running translated code.
/// Interrupts and prefetch aborts are the host system's business.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Exception {
    Undefined,
    Swi,
    DataAbort,
}

impl Exception {
    /// Offset of the handler from the vector base.
    pub fn vector(self) -> u32 {
        match self {
            Self::Undefined => 0x04,
            Self::Swi => 0x08,
            Self::DataAbort => 0x10,
        }
    }

    pub fn mode(self) -> Mode {
        match self {
            Self::Undefined => Mode::Undefined,
            Self::Swi => Mode::Supervisor,
            Self::DataAbort => Mode::Abort,
        }
    }
}

impl CpuState {
    /// Switch into the handler of `kind`. The handler returns to `lr`.
    pub(crate) fn enter_exception<S: Bus>(&mut self, bus: &mut S, kind: Exception, lr: u32) {
        bus.exception_happened(self, kind);

        // Mode and Thumb bits are replaced, IRQs get masked.
        let saved = self.cpsr();
        let entered = (saved & !0x3F) | kind.mode().to_u32() | Flag::IrqDisable.mask();
        self.set_cpsr(entered);
        self.set_spsr(saved);
        self.registers[14] = lr;

        let handler = bus.exception_vector_base(self.cpu).0.wrapping_add(kind.vector());
        self.registers[15] = handler;
        self.next_instruction = handler;
        bus.status_changed(self);
    }
}
