// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The interface between a TCE table and the host DMA path.
//!
//! DMA engines (emulated devices, or a VFIO container mirroring
//! mappings into a hardware IOMMU) translate addresses through
//! `IommuOps` and learn of changes via `IommuNotifier`.

use crate::table::TceTable;
use crate::tce::Access;
use crate::Result;

/// The result of translating one address; also the payload of
/// a change notification.
///
/// `iova` and `translated_addr` are the page-aligned input and
/// output addresses; `addr_mask` covers the offset within the
/// page, so a consumer may cache the translation for every
/// address `a` with `a & !addr_mask == iova`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct IommuTlbEntry {
    pub iova: u64,
    pub translated_addr: u64,
    pub addr_mask: u64,
    pub perm: Access,
}

impl IommuTlbEntry {
    /// Returns an entry denying all access to the entire address
    /// space.
    pub const fn fault() -> IommuTlbEntry {
        IommuTlbEntry {
            iova: 0,
            translated_addr: 0,
            addr_mask: !0,
            perm: Access::Fault,
        }
    }

    /// Returns the translation of `addr`, or None if the entry
    /// does not cover it or does not permit the access.
    pub fn apply(&self, addr: u64, is_write: bool) -> Option<u64> {
        let covered = addr & !self.addr_mask == self.iova;
        (covered && self.perm.permits(is_write))
            .then(|| self.translated_addr | (addr & self.addr_mask))
    }
}

/// A consumer interested in entry changes.  Notifiers run
/// synchronously, in registration order, on the mutating thread.
pub trait IommuNotifier: Send + Sync {
    fn notify(&self, entry: &IommuTlbEntry);
}

/// The operations a DMA consumer may perform on a translation
/// window.
pub trait IommuOps {
    /// Translates an address relative to the start of the
    /// window.  Addresses outside of the window fault.
    fn translate(&self, addr: u64, is_write: bool) -> IommuTlbEntry;

    /// Tells the window that a consumer needing accelerated
    /// storage has attached or detached.
    fn notify_accelerator_attach(&self, attached: bool) -> Result<()>;

    /// Returns the translation page size.
    fn page_sizes(&self) -> u64;

    /// Returns an identifier the accelerator can use to match
    /// its own state to this window.
    fn stable_id(&self) -> u64;
}

impl IommuOps for TceTable {
    fn translate(&self, addr: u64, is_write: bool) -> IommuTlbEntry {
        TceTable::translate(self, addr, is_write)
    }

    fn notify_accelerator_attach(&self, attached: bool) -> Result<()> {
        self.set_accelerated(attached)
    }

    fn page_sizes(&self) -> u64 {
        self.geometry().page_size()
    }

    fn stable_id(&self) -> u64 {
        self.liobn().raw().into()
    }
}
