// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

use core::fmt;

/// A guest address. Displays as `$0x` followed by 8 hex digits in logs.
#[derive(Default, Debug, Copy, Clone, PartialEq, PartialOrd, Eq, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Address(pub u32);

impl Address {
    /// Translation granularity of the lookup table. A block ends at
    /// the first instruction that starts a page.
    pub const PAGE: u32 = 0x4000;

    /// Round down to a multiple of `width`, which must be a power of two.
    pub fn align(self, width: u32) -> Self {
        Self(self.0 & width.wrapping_neg())
    }

    pub fn on_page_boundary(self) -> bool {
        self.0 % Self::PAGE == 0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "$0x{:08X}", self.0)
    }
}

/// Bus timing hint for data accesses, one of the constants in [`access`].
pub type Access = u8;

pub mod access {
    use super::Access;

    pub const NONSEQ: Access = 0;
    /// Follows the previous access of the same instruction.
    pub const SEQ: Access = 1;
}
