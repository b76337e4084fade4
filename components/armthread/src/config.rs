// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

/// Largest block the compiler will ever build.
pub const MAX_BLOCK_INSTRUCTIONS: usize = 256;
/// Generous bound on the cache space one instruction compiles into:
/// up to three nodes, a data record and a condition record, each rounded
/// up to the arena alignment.
const BYTES_PER_INSTRUCTION: usize = 192;

/// Configuration of the translation engine.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct JitConfig {
    /// Size of the code cache of each CPU in bytes.
    /// Changes take effect on the next reset.
    pub cache_reserve: usize,
    /// When less than this many bytes are left in a code cache before
    /// compiling a block, the whole cache of that CPU is reset.
    /// Raised to the size of the largest possible block when lower.
    pub low_water_mark: usize,
    /// Maximum amount of instructions in one block.
    pub max_block_instructions: usize,
    /// Invalidations of compiled code inside one 16 byte granule after
    /// which that code is no longer compiled but interpreted.
    pub recompile_threshold: u8,
    /// Remove flag calculations that are never observed.
    pub optimize_flags: bool,
}

impl JitConfig {
    /// Clamp values that would make the engine misbehave.
    pub(crate) fn sanitized(mut self) -> Self {
        if self.max_block_instructions == 0 || self.max_block_instructions > MAX_BLOCK_INSTRUCTIONS {
            log::warn!(
                "Block size of {} instructions is out of range, clamping",
                self.max_block_instructions
            );
            self.max_block_instructions = self.max_block_instructions.clamp(1, MAX_BLOCK_INSTRUCTIONS);
        }
        self
    }

    /// Free space below which a code cache is reset before compiling.
    /// At least one block of the largest size, at most half the cache.
    pub(crate) fn reset_threshold(&self) -> usize {
        let largest_block = self.max_block_instructions * BYTES_PER_INSTRUCTION;
        self.low_water_mark
            .max(largest_block)
            .min(self.cache_reserve / 2)
    }
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            cache_reserve: 16 * 1024 * 1024,
            low_water_mark: 128 * 1024,
            max_block_instructions: 100,
            recompile_threshold: 8,
            optimize_flags: true,
        }
    }
}
