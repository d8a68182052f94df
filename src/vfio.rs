// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The default DMA window of a PCI host bridge whose devices
//! are assigned to the guest via VFIO.
//!
//! The host IOMMU dictates where the 32-bit window lies; the
//! VFIO container reports it.  The window's table is created
//! enabled, with 4KiB pages, and asks for accelerated storage so
//! that the kernel can program the hardware IOMMU directly.

use crate::mem::{Geometry, Liobn};
use crate::registry::Registry;
use crate::table::{TceOwner, TceTable};
use crate::{Error, Result, TCE_PAGE_SHIFT};
use std::sync::{Arc, Weak};

/// The 32-bit DMA window reported by a VFIO container.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Dma32WindowInfo {
    pub start: u64,
    pub size: u64,
}

impl Dma32WindowInfo {
    /// Returns the geometry of a 4KiB-page table covering the
    /// window.
    pub fn geometry(&self) -> Result<Geometry> {
        let nb_table = u32::try_from(self.size >> TCE_PAGE_SHIFT)
            .map_err(|_| Error::InvalidGeometry("DMA32 window too large"))?;
        Geometry::new(TCE_PAGE_SHIFT, self.start, nb_table)
    }
}

/// Creates, registers, and enables the table for a host
/// bridge's default DMA window.  The table is removed again if
/// it cannot be enabled.
pub fn create_default_window(
    registry: &Registry,
    liobn: Liobn,
    owner: Option<Weak<dyn TceOwner>>,
    info: &Dma32WindowInfo,
) -> Result<Arc<TceTable>> {
    let geometry = info.geometry()?;
    let table = registry.create_table(liobn, owner)?;
    if let Err(e) = table.enable(geometry, true) {
        registry.remove(liobn);
        return Err(e);
    }
    Ok(table)
}
