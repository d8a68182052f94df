// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The description of a DMA window given to guest firmware.
//!
//! Firmware learns of each device's window from a property of
//! five 32-bit big-endian cells: the LIOBN, the 64-bit window
//! base as two cells, and the 64-bit window size as two cells.
//! The window size is limited to 32 bits, so its high cell is
//! always zero.

use crate::mem::Liobn;
use crate::table::TceTable;
use crate::{Error, Result};

/// The value of `ibm,#dma-address-cells`.
pub const DMA_ADDRESS_CELLS: u32 = 2;
/// The value of `ibm,#dma-size-cells`.
pub const DMA_SIZE_CELLS: u32 = 2;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DmaWindowProperty {
    pub liobn: Liobn,
    pub window_base: u64,
    pub window_size: u32,
}

impl DmaWindowProperty {
    /// Describes the current window of the given table.
    pub fn from_table(table: &TceTable) -> Result<DmaWindowProperty> {
        let geometry = table.geometry();
        let window_size = u32::try_from(geometry.window_size())
            .map_err(|_| Error::InvalidGeometry("DMA window exceeds 4GiB"))?;
        Ok(DmaWindowProperty {
            liobn: table.liobn(),
            window_base: geometry.bus_offset,
            window_size,
        })
    }

    /// Returns the property cells, in CPU byte order.
    pub fn cells(&self) -> [u32; 5] {
        [
            self.liobn.raw(),
            (self.window_base >> 32) as u32,
            self.window_base as u32,
            0,
            self.window_size,
        ]
    }

    /// Returns the property value as stored in the device tree.
    pub fn to_bytes(&self) -> [u8; 20] {
        let mut bytes = [0; 20];
        for (chunk, cell) in bytes.chunks_exact_mut(4).zip(self.cells()) {
            chunk.copy_from_slice(&cell.to_be_bytes());
        }
        bytes
    }
}
