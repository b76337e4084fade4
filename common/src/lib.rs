// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! Small helpers shared between the crates of this workspace:
//! bit-twiddling extension traits and, with `std`, a test harness.

#![no_std]

#[cfg(feature = "std")]
extern crate std;

pub mod numutil;
#[cfg(feature = "std")]
pub mod testing;
