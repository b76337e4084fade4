// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

use crate::interface::CpuId;

/// Errors the engine reports to its embedder.
/// Guest-visible faults are never reported here; they are delivered
/// to the guest as exceptions instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JitError {
    #[error("could not reserve {bytes} bytes for the code cache")]
    Reserve { bytes: usize },
    #[error("code region {start:#010X}..{end:#010X} is not 16KiB aligned or has a bad mirror size")]
    InvalidRegion { start: u32, end: u32 },
    #[error("engine was used before init or after shutdown")]
    NotInitialized,
    #[error("{cpu} tried to execute unmapped memory at {addr:#010X}")]
    UnmappedCode { cpu: CpuId, addr: u32 },
}

/// The code cache ran out of space while compiling.
/// Never leaves the engine; the block compiler falls back instead.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CacheFull;
