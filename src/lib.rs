// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # sPAPR I/O translation tables.
//!
//! A paravirtualized PowerPC guest programs DMA translations for
//! its devices through a per-device table of translation control
//! entries (TCEs).  Each entry maps one page of I/O bus address
//! space onto a page of guest physical memory, along with a two
//! bit access right.  The guest names a table by its logical I/O
//! bus number (LIOBN) and manipulates it via a small set of
//! hypercalls; the host DMA path consults it via a translation
//! callback.
//!
//! The pieces are:
//!
//! * `tce` --- the packed entry format and access rights.
//! * `allocator` --- entry storage, either a plain array or a
//!   table handed to us by a kernel accelerator.
//! * `table` --- the `TceTable` itself: lifecycle, translation,
//!   and mutation.
//! * `registry` --- the set of tables belonging to one machine,
//!   keyed by LIOBN.
//! * `iommu` --- the interface the DMA path consumes.
//! * `hcall` --- the guest-facing hypercalls.
//! * `migration` --- saving and restoring table contents across
//!   a checkpoint.
//! * `dt` --- the window description handed to guest firmware.
//! * `vfio` --- default windows for host bridges with assigned
//!   devices.
//!
//! Mutation is serialized by the embedding machine; translation
//! may run concurrently with itself from any thread.

pub mod allocator;
pub mod dt;
pub mod error;
pub mod hcall;
pub mod iommu;
pub mod mem;
pub mod migration;
pub mod registry;
pub mod table;
pub mod tce;
pub mod vfio;

#[cfg(test)]
mod fakes;

use static_assertions::const_assert;

pub use error::Error;
pub use mem::{Geometry, Liobn};
pub use registry::Registry;
pub use table::TceTable;
pub use tce::{Access, Tce};

pub type Result<T> = core::result::Result<T, Error>;

/// The page shift of the TCE list and of the default DMA
/// windows.
pub const TCE_PAGE_SHIFT: u32 = 12;
pub const TCE_PAGE_SIZE: u64 = 1 << TCE_PAGE_SHIFT;
pub const TCE_PAGE_MASK: u64 = TCE_PAGE_SIZE - 1;

/// The most entries a single H_PUT_TCE_INDIRECT may carry: one
/// page worth of 64-bit TCEs.
pub const MAX_INDIRECT_PAGES: u64 = 512;

const_assert!(MAX_INDIRECT_PAGES * 8 == TCE_PAGE_SIZE);
