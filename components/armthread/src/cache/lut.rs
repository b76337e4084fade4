// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! Address to block lookup table of one CPU.
//!
//! With code regions, a top table of 16KiB pages points into one
//! concatenated store of slots per region; pages without backing
//! store point at a shared placeholder that stays empty forever.
//! Without regions, a flat table of lazily created pages covers
//! the low 128MiB of the address space.

use alloc::{boxed::Box, vec, vec::Vec};

use common::numutil::NumExt;

use super::DataRef;
use crate::{error::JitError, interface::CodeRegion, memory::Address};

/// Slots in one 16KiB page; one per halfword.
const PAGE_SLOTS: usize = 0x2000;
/// Entries in the top table; one per 16KiB page of the low 256MiB.
const TOP_ENTRIES: usize = 0x4000;
/// Pages of the flat fallback table.
const FLAT_PAGES: usize = 0x0800_0000 / Address::PAGE as usize;

/// What the lookup table knows about an address.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BlockRef {
    /// A compiled block, valid while the cache is still at `generation`.
    Compiled { header: DataRef, generation: u32 },
    /// This address keeps getting invalidated; do not compile it.
    Interpret,
}

enum Layout {
    Regions {
        top: Vec<u32>,
        slots: Vec<Option<BlockRef>>,
    },
    Flat {
        pages: Vec<Option<Box<[Option<BlockRef>]>>>,
    },
}

pub struct LookupTable {
    layout: Layout,
}

impl LookupTable {
    /// Create a lookup table for the given regions.
    /// An empty region list selects the flat fallback table.
    pub fn new(regions: &[CodeRegion]) -> Result<Self, JitError> {
        if regions.is_empty() {
            let mut pages = Vec::new();
            pages.resize_with(FLAT_PAGES, || None);
            return Ok(Self {
                layout: Layout::Flat { pages },
            });
        }

        let mut top = vec![0u32; TOP_ENTRIES];
        let mut store_len = PAGE_SLOTS;
        for region in regions {
            let bad_bounds = region.start.us() & (Address::PAGE.us() - 1) != 0
                || region.end.us() & (Address::PAGE.us() - 1) != 0
                || region.end <= region.start
                || (region.end - 1) > 0x0FFF_FFFF;
            let bad_mirror = !region.mirror.is_power_of_two() || region.mirror < Address::PAGE;
            if bad_bounds || bad_mirror {
                return Err(JitError::InvalidRegion {
                    start: region.start,
                    end: region.end,
                });
            }

            let base = store_len as u32;
            for page in (region.start >> 14)..(region.end >> 14) {
                top[page.us()] = base + (((page << 14) & (region.mirror - 1)) >> 1);
            }
            store_len += (region.mirror >> 1).us();
        }

        Ok(Self {
            layout: Layout::Regions {
                top,
                slots: vec![None; store_len],
            },
        })
    }

    /// If the address lies in executable memory.
    pub fn is_mapped(&self, addr: u32) -> bool {
        match &self.layout {
            Layout::Regions { top, .. } => top[Self::top_index(addr)].us() >= PAGE_SLOTS,
            Layout::Flat { .. } => true,
        }
    }

    /// A dense index for the address; equal for all mirrors of it.
    pub fn slot_index(&self, addr: u32) -> Option<usize> {
        match &self.layout {
            Layout::Regions { top, .. } => {
                let base = top[Self::top_index(addr)].us();
                (base >= PAGE_SLOTS).then(|| base + ((addr.us() & 0x3FFE) >> 1))
            }
            Layout::Flat { .. } => Some((addr.us() & 0x07FF_FFFE) >> 1),
        }
    }

    pub fn lookup(&self, addr: u32) -> Option<BlockRef> {
        match &self.layout {
            Layout::Regions { top, slots } => {
                let base = top[Self::top_index(addr)].us();
                slots[base + ((addr.us() & 0x3FFE) >> 1)]
            }
            Layout::Flat { pages } => {
                let slot = (addr.us() & 0x07FF_FFFE) >> 1;
                pages[slot / PAGE_SLOTS]
                    .as_ref()
                    .and_then(|page| page[slot % PAGE_SLOTS])
            }
        }
    }

    /// Install a block. Returns false if the address is not mapped,
    /// in which case nothing is written.
    pub fn install(&mut self, addr: u32, block: BlockRef) -> bool {
        match self.slot_mut(addr, true) {
            Some(slot) => {
                *slot = Some(block);
                true
            }
            None => {
                log::warn!("Tried to install a block into unmapped {}", Address(addr));
                false
            }
        }
    }

    /// Clear the slot of an address, returning what was there.
    pub fn invalidate(&mut self, addr: u32) -> Option<BlockRef> {
        self.slot_mut(addr, false).and_then(Option::take)
    }

    /// Clear every slot.
    pub fn reset(&mut self) {
        match &mut self.layout {
            Layout::Regions { slots, .. } => slots.fill(None),
            Layout::Flat { pages } => pages.fill_with(|| None),
        }
    }

    fn slot_mut(&mut self, addr: u32, create: bool) -> Option<&mut Option<BlockRef>> {
        match &mut self.layout {
            Layout::Regions { top, slots } => {
                let base = top[Self::top_index(addr)].us();
                if base < PAGE_SLOTS {
                    return None;
                }
                slots.get_mut(base + ((addr.us() & 0x3FFE) >> 1))
            }
            Layout::Flat { pages } => {
                let slot = (addr.us() & 0x07FF_FFFE) >> 1;
                let page = &mut pages[slot / PAGE_SLOTS];
                if page.is_none() && create {
                    *page = Some(vec![None; PAGE_SLOTS].into_boxed_slice());
                }
                page.as_mut().map(|page| &mut page[slot % PAGE_SLOTS])
            }
        }
    }

    fn top_index(addr: u32) -> usize {
        ((addr & 0x0FFF_FFFF) >> 14).us()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const BLOCK: BlockRef = BlockRef::Compiled {
        header: DataRef(64),
        generation: 0,
    };

    #[test]
    fn regions_and_mirrors() {
        // 32KiB of memory mirrored across 64KiB
        let regions = [CodeRegion::new(0x0200_0000, 0x0201_0000, 0x8000)];
        let mut lut = LookupTable::new(&regions).unwrap();

        assert!(lut.is_mapped(0x0200_0000));
        assert!(!lut.is_mapped(0x0300_0000));
        assert!(lut.install(0x0200_0100, BLOCK));
        assert_eq!(lut.lookup(0x0200_0100), Some(BLOCK));
        assert_eq!(lut.lookup(0x0200_8100), Some(BLOCK));
        assert_eq!(lut.slot_index(0x0200_0100), lut.slot_index(0x0200_8100));
        assert_eq!(lut.lookup(0x0200_0102), None);

        assert_eq!(lut.invalidate(0x0200_8100), Some(BLOCK));
        assert_eq!(lut.lookup(0x0200_0100), None);
    }

    #[test]
    fn high_vectors_use_masked_address() {
        let regions = [CodeRegion::new(0x0FFF_0000, 0x1000_0000, 0x8000)];
        let mut lut = LookupTable::new(&regions).unwrap();

        assert!(lut.is_mapped(0xFFFF_0000));
        assert!(lut.install(0xFFFF_0010, BLOCK));
        assert_eq!(lut.lookup(0x0FFF_0010), Some(BLOCK));
        assert_eq!(lut.slot_index(0xFFFF_0010), lut.slot_index(0x0FFF_0010));
        assert_eq!(lut.lookup(0xFFFF_0012), None);
        assert!(!lut.is_mapped(0xFFFE_0000));
    }

    #[test]
    fn unmapped_uses_placeholder() {
        let regions = [CodeRegion::new(0x0200_0000, 0x0200_4000, 0x4000)];
        let mut lut = LookupTable::new(&regions).unwrap();
        assert!(!lut.install(0x0000_0000, BLOCK));
        assert_eq!(lut.lookup(0x0000_0000), None);
        assert_eq!(lut.lookup(0x0F00_0000), None);
        assert_eq!(lut.slot_index(0x0000_0000), None);
    }

    #[test]
    fn flat_fallback_and_reset() {
        let mut lut = LookupTable::new(&[]).unwrap();
        assert_eq!(lut.lookup(0x0800_0000), None);
        assert!(lut.install(0x0000_1000, BlockRef::Interpret));
        assert_eq!(lut.lookup(0x0000_1000), Some(BlockRef::Interpret));
        lut.reset();
        assert_eq!(lut.lookup(0x0000_1000), None);
    }

    #[test]
    fn bad_regions_are_rejected() {
        let unaligned = [CodeRegion::new(0x0200_0100, 0x0200_4000, 0x4000)];
        assert!(LookupTable::new(&unaligned).is_err());
        let mirror = [CodeRegion::new(0x0200_0000, 0x0200_4000, 0x5000)];
        assert_eq!(
            LookupTable::new(&mirror).err(),
            Some(JitError::InvalidRegion {
                start: 0x0200_0000,
                end: 0x0200_4000
            })
        );
    }
}
