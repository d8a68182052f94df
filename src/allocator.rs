// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Backing storage for TCE tables.
//!
//! A table's entries live either in a plain heap array that only
//! we can see, or in a table created by a kernel accelerator.
//! The latter is visible to the host kernel, which may then
//! service hypercalls and program hardware IOMMUs for directly
//! assigned devices without exiting to us.  Both present the same
//! interface: a fixed-length run of 64-bit slots, each read and
//! written indivisibly.

use crate::mem::{Geometry, Liobn};
use crate::{Error, Result};
use core::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Entry slots.  Each load or store of a slot is a single atomic
/// access, so readers never see a torn entry.  Ordering between
/// slots and the storage that holds them is provided by the
/// table's lock, so slot accesses themselves are relaxed.
pub type Entries = Box<[AtomicU64]>;

/// Allocates `nb_table` zeroed entry slots, failing rather than
/// aborting if memory is exhausted.
pub fn zeroed(nb_table: u32) -> Option<Entries> {
    let len = usize::try_from(nb_table).ok()?;
    let mut entries = Vec::new();
    entries.try_reserve_exact(len).ok()?;
    entries.extend((0..len).map(|_| AtomicU64::new(0)));
    Some(entries.into_boxed_slice())
}

/// An opaque name for a table owned by an accelerator; for a
/// kernel this is the file descriptor through which the table
/// was mapped.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct AccelHandle(pub i32);

/// A table created by an accelerator, along with the entry
/// slots it shares with us.
#[derive(Debug)]
pub struct AcceleratedTable {
    handle: AccelHandle,
    entries: Entries,
}

impl AcceleratedTable {
    /// Wraps storage produced by an accelerator.
    pub fn new(handle: AccelHandle, entries: Entries) -> AcceleratedTable {
        AcceleratedTable { handle, entries }
    }

    /// Returns the accelerator's name for this table.
    pub fn handle(&self) -> AccelHandle {
        self.handle
    }
}

/// A source of accelerated tables, such as an in-kernel TCE
/// implementation.
///
/// Creation may fail at any time, for any reason; callers fall
/// back to plain storage.  Tables handed back via
/// `remove_table` are no longer referenced by the caller.
pub trait Accelerator: Send + Sync {
    /// Creates a zero-filled table with the given geometry.
    fn create_table(
        &self,
        liobn: Liobn,
        geometry: &Geometry,
    ) -> Result<AcceleratedTable>;

    /// Releases a table previously returned by `create_table`.
    fn remove_table(&self, table: AcceleratedTable) -> Result<()>;
}

/// The storage behind an enabled table.
#[derive(Debug)]
pub enum Backing {
    Plain(Entries),
    Accelerated(AcceleratedTable),
}

impl Backing {
    fn entries(&self) -> &[AtomicU64] {
        match self {
            Backing::Plain(entries) => entries,
            Backing::Accelerated(table) => &table.entries,
        }
    }

    /// Returns true IFF the storage belongs to an accelerator.
    pub fn is_accelerated(&self) -> bool {
        matches!(self, Backing::Accelerated(_))
    }

    /// Returns the accelerator handle, if any.
    pub fn handle(&self) -> Option<AccelHandle> {
        match self {
            Backing::Plain(_) => None,
            Backing::Accelerated(table) => Some(table.handle),
        }
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Returns true IFF there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Returns the entry at the given index.
    pub fn get(&self, index: usize) -> Option<u64> {
        self.entries().get(index).map(|slot| slot.load(Ordering::Relaxed))
    }

    /// Stores an entry at the given index.  Returns false if the
    /// index is out of range.
    pub fn set(&self, index: usize, tce: u64) -> bool {
        match self.entries().get(index) {
            Some(slot) => {
                slot.store(tce, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Sets every entry to the given value.
    pub fn fill(&self, tce: u64) {
        for slot in self.entries() {
            slot.store(tce, Ordering::Relaxed);
        }
    }

    /// Copies entries from `src`, up to the shorter of the two.
    pub fn copy_from(&self, src: &Backing) {
        for (dst, src) in self.entries().iter().zip(src.entries()) {
            dst.store(src.load(Ordering::Relaxed), Ordering::Relaxed);
        }
    }

    /// Copies entries from a plain slice, as when restoring
    /// migrated state.
    pub fn copy_from_slice(&self, src: &[u64]) {
        for (dst, &tce) in self.entries().iter().zip(src) {
            dst.store(tce, Ordering::Relaxed);
        }
    }

    /// Returns a copy of all entries.
    pub fn to_vec(&self) -> Vec<u64> {
        self.entries().iter().map(|slot| slot.load(Ordering::Relaxed)).collect()
    }
}

/// The table allocator.  Holds the accelerator for the machine,
/// if there is one.
#[derive(Clone, Default)]
pub struct TableAlloc {
    accel: Option<Arc<dyn Accelerator>>,
}

impl TableAlloc {
    /// Returns a new allocator drawing on the given accelerator.
    pub fn new(accel: Option<Arc<dyn Accelerator>>) -> TableAlloc {
        TableAlloc { accel }
    }

    /// Returns true IFF accelerated storage may be requested.
    pub fn can_accelerate(&self) -> bool {
        self.accel.is_some()
    }

    /// Allocates zeroed storage for a table of the given
    /// geometry.  If `accelerate` is set, tries the accelerator
    /// first and falls back to plain storage if that fails.  Only
    /// exhaustion of plain storage is an error.
    pub fn alloc(
        &self,
        liobn: Liobn,
        geometry: &Geometry,
        accelerate: bool,
    ) -> Result<Backing> {
        let wanted = geometry.nb_table as usize;
        if accelerate {
            if let Some(accel) = &self.accel {
                match accel.create_table(liobn, geometry) {
                    Ok(table) if table.entries.len() == wanted => {
                        log::trace!(
                            "new TCE table liobn={liobn:#x} handle={:?}",
                            table.handle
                        );
                        return Ok(Backing::Accelerated(table));
                    }
                    Ok(table) => {
                        log::warn!(
                            "accelerator gave {} entries for liobn {liobn:#x}, \
                             wanted {wanted}",
                            table.entries.len(),
                        );
                        self.release(liobn, Backing::Accelerated(table));
                    }
                    Err(e) => {
                        log::warn!("falling back to plain TCE table: {e}");
                    }
                }
            }
        }
        let entries = zeroed(geometry.nb_table).ok_or_else(|| {
            log::error!(
                "cannot allocate {} TCEs for liobn {liobn:#x}",
                geometry.nb_table
            );
            Error::Exhausted { liobn: liobn.raw(), nb_table: geometry.nb_table }
        })?;
        log::trace!(
            "new TCE table liobn={liobn:#x} plain entries={}",
            entries.len()
        );
        Ok(Backing::Plain(entries))
    }

    /// Releases storage.  Accelerated tables go back to the
    /// accelerator; if it refuses them, they are simply dropped.
    pub fn release(&self, liobn: Liobn, backing: Backing) {
        match (backing, &self.accel) {
            (Backing::Accelerated(table), Some(accel)) => {
                let handle = table.handle;
                if let Err(e) = accel.remove_table(table) {
                    log::warn!(
                        "accelerator refused to remove table {handle:?} \
                         for liobn {liobn:#x}: {e}"
                    );
                }
            }
            (backing, _) => drop(backing),
        }
    }
}

impl core::fmt::Debug for TableAlloc {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TableAlloc")
            .field("accelerated", &self.can_accelerate())
            .finish()
    }
}
