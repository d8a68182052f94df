// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::{Error, Result};
use core::fmt;
use core::ops::Range;
use serde::{Deserialize, Serialize};

/// A Liobn is a logical I/O bus number: the 32-bit name by
/// which the guest refers to a TCE table.
///
/// VIO devices are numbered from zero.  PCI host bridges
/// set the top bit and encode the bridge index and the DMA
/// window number beneath it.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Serialize, Deserialize)]
#[serde(transparent)]
pub struct Liobn(u32);

impl Liobn {
    const PCI: u32 = 0x8000_0000;
    const VIO_BASE: u32 = 0x0000_0000;

    /// Returns a Liobn for the given raw 32-bit value.
    pub const fn new(raw: u32) -> Liobn {
        Liobn(raw)
    }

    /// Returns the Liobn of the n'th VIO device.
    pub const fn vio(n: u32) -> Liobn {
        Liobn(Self::VIO_BASE + n)
    }

    /// Returns the Liobn for DMA window `window` of PCI host
    /// bridge `index`.
    pub const fn pci(index: u32, window: u8) -> Liobn {
        Liobn(Self::PCI | (index << 8) | window as u32)
    }

    /// Returns true IFF this names a PCI host bridge window.
    pub const fn is_pci(self) -> bool {
        self.0 & Self::PCI != 0
    }

    /// Returns the DMA window number of a PCI Liobn.
    pub const fn dma_window_num(self) -> u8 {
        (self.0 & 0xff) as u8
    }

    /// Returns the raw value.
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// Guests pass LIOBNs in 64-bit registers.  Anything with bits
/// set above bit 31 names no table at all; we never truncate.
impl TryFrom<u64> for Liobn {
    type Error = Error;

    fn try_from(raw: u64) -> Result<Liobn> {
        u32::try_from(raw).map(Liobn).map_err(|_| Error::LiobnOutOfBounds(raw))
    }
}

impl fmt::LowerHex for Liobn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// The shape of a DMA window: where it starts on the I/O bus,
/// how large each translated page is, and how many pages it
/// spans.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub page_shift: u32,
    pub bus_offset: u64,
    pub nb_table: u32,
}

impl Geometry {
    /// Returns a new geometry, provided the resulting window
    /// is representable in the 64-bit bus address space.
    pub fn new(
        page_shift: u32,
        bus_offset: u64,
        nb_table: u32,
    ) -> Result<Geometry> {
        if page_shift >= u64::BITS {
            return Err(Error::InvalidGeometry("page shift too large"));
        }
        let geometry = Geometry { page_shift, bus_offset, nb_table };
        let size = geometry
            .checked_window_size()
            .ok_or(Error::InvalidGeometry("window size overflows"))?;
        if size != 0 && bus_offset.checked_add(size - 1).is_none() {
            return Err(Error::InvalidGeometry("window wraps the bus"));
        }
        Ok(geometry)
    }

    /// Returns the translation page size.
    pub const fn page_size(&self) -> u64 {
        1 << self.page_shift
    }

    /// Returns a mask that clears the offset within a page.
    pub const fn page_mask(&self) -> u64 {
        !(self.page_size() - 1)
    }

    fn checked_window_size(&self) -> Option<u64> {
        let size = (self.nb_table as u64).checked_shl(self.page_shift)?;
        (size >> self.page_shift == self.nb_table as u64).then_some(size)
    }

    /// Returns the size of the window in bytes.
    pub fn window_size(&self) -> u64 {
        (self.nb_table as u64) << self.page_shift
    }

    /// Returns the bus address range covered by the window.
    pub fn window(&self) -> Range<u64> {
        self.bus_offset..self.bus_offset.wrapping_add(self.window_size())
    }

    /// Returns the table index for the given I/O bus address,
    /// or None if the address lies outside of the window.
    ///
    /// Addresses below the bus offset wrap around to very large
    /// indices and are rejected along with those above it.
    pub fn index(&self, ioba: u64) -> Option<usize> {
        self.offset_index(ioba.wrapping_sub(self.bus_offset))
    }

    /// Returns the table index for an address relative to the
    /// start of the window.
    pub fn offset_index(&self, offset: u64) -> Option<usize> {
        let index = offset >> self.page_shift;
        if index < self.nb_table as u64 {
            usize::try_from(index).ok()
        } else {
            None
        }
    }
}

/// Guest physical memory, as seen by the hypercall layer.
pub trait GuestMemory {
    /// Reads one big-endian 64-bit word at the given guest
    /// physical address.
    fn read_u64(&self, addr: u64) -> Result<u64>;
}
