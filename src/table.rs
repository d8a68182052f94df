// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # TCE tables.
//!
//! A `TceTable` is created disabled, with no storage and an
//! empty window.  Enabling it fixes the window geometry and
//! allocates zeroed entries; disabling it frees the entries and
//! clears the geometry.  While enabled, the table translates I/O
//! bus addresses for the DMA path and accepts entry updates from
//! the guest.
//!
//! Two kinds of access run against an enabled table:
//!
//! * Translation, from any number of DMA threads at once.
//!   Translations take a shared lock and never block one
//!   another.
//! * Mutation: entry updates, lifecycle transitions, and storage
//!   swaps.  The embedding machine serializes these; we only
//!   guarantee that a translation running alongside one sees
//!   either the old or the new state of any single entry.
//!
//! Entries are updated in place with single atomic stores, so
//! updates need only the shared lock.  Swapping storage between
//! plain and accelerated modes copies the entries under an
//! upgradable lock, which admits readers, and only takes the
//! exclusive lock to publish the new storage.

use crate::allocator::{Backing, TableAlloc};
use crate::iommu::{IommuNotifier, IommuTlbEntry};
use crate::mem::{Geometry, Liobn};
use crate::tce;
use crate::{Error, Result};
use core::ops::Range;
use parking_lot::{Mutex, RwLock, RwLockUpgradableReadGuard};
use std::sync::{Arc, Weak};

/// The device a table belongs to.  The table holds only a weak
/// reference to it.
pub trait TceOwner: Send + Sync {
    /// Enables or disables translation bypass for the device.
    fn set_bypass(&self, bypass: bool);
}

/// Mutable table state.  `backing` is Some IFF `enabled`, and
/// `geometry` is zero whenever the table is disabled, except
/// between the release of storage for a migration load and the
/// load itself.
#[derive(Debug, Default)]
struct State {
    geometry: Geometry,
    backing: Option<Backing>,
    enabled: bool,
    bypass: bool,
}

pub struct TceTable {
    liobn: Liobn,
    owner: Option<Weak<dyn TceOwner>>,
    alloc: TableAlloc,
    state: RwLock<State>,
    notifiers: Mutex<Vec<Arc<dyn IommuNotifier>>>,
}

impl TceTable {
    /// Returns a new, disabled table.  Tables are created via
    /// the registry, which guarantees LIOBN uniqueness.
    pub(crate) fn new(
        liobn: Liobn,
        owner: Option<Weak<dyn TceOwner>>,
        alloc: TableAlloc,
    ) -> TceTable {
        TceTable {
            liobn,
            owner,
            alloc,
            state: RwLock::new(State::default()),
            notifiers: Mutex::new(Vec::new()),
        }
    }

    /// Returns the table's LIOBN.
    pub fn liobn(&self) -> Liobn {
        self.liobn
    }

    /// Returns the current window geometry.  All zero while the
    /// table is disabled.
    pub fn geometry(&self) -> Geometry {
        self.state.read().geometry
    }

    /// Returns true IFF the table is enabled.
    pub fn is_enabled(&self) -> bool {
        self.state.read().enabled
    }

    /// Returns true IFF the table's storage belongs to an
    /// accelerator.
    pub fn is_accelerated(&self) -> bool {
        self.state.read().backing.as_ref().is_some_and(Backing::is_accelerated)
    }

    /// Returns the bus address range the table translates, if
    /// enabled.
    pub fn window(&self) -> Option<Range<u64>> {
        let state = self.state.read();
        state.enabled.then(|| state.geometry.window())
    }

    /// Returns true IFF translation is bypassed for the owning
    /// device.
    pub fn bypass(&self) -> bool {
        self.state.read().bypass
    }

    /// Records whether the owning device bypasses translation.
    /// The device calls this itself, so it is not called back.
    pub fn set_bypass(&self, bypass: bool) {
        self.state.write().bypass = bypass;
    }

    /// Returns the owning device, if it still exists.
    pub fn owner(&self) -> Option<Arc<dyn TceOwner>> {
        self.owner.as_ref().and_then(Weak::upgrade)
    }

    /// Enables the table with the given geometry, allocating
    /// zeroed storage and attaching the translation window.  If
    /// `accelerate` is set, storage is first sought from the
    /// accelerator.  Does nothing if the table is already
    /// enabled.  A table with no entries stays disabled.
    pub fn enable(&self, geometry: Geometry, accelerate: bool) -> Result<()> {
        let mut state = self.state.write();
        if state.enabled {
            return Ok(());
        }
        state.geometry = geometry;
        self.do_enable(&mut state, accelerate)
    }

    fn do_enable(&self, state: &mut State, accelerate: bool) -> Result<()> {
        if state.geometry.nb_table == 0 {
            return Ok(());
        }
        let backing =
            match self.alloc.alloc(self.liobn, &state.geometry, accelerate) {
                Ok(backing) => backing,
                Err(e) => {
                    state.geometry = Geometry::default();
                    return Err(e);
                }
            };
        state.backing = Some(backing);
        state.enabled = true;
        log::debug!(
            "liobn {:#x}: window {:#x?} enabled, page shift {}",
            self.liobn,
            state.geometry.window(),
            state.geometry.page_shift
        );
        Ok(())
    }

    /// Disables the table: detaches the window, releases the
    /// storage, and clears the geometry.  Does nothing if the
    /// table is already disabled.
    pub fn disable(&self) {
        let backing = {
            let mut state = self.state.write();
            if !state.enabled {
                return;
            }
            state.enabled = false;
            state.geometry = Geometry::default();
            state.backing.take()
        };
        if let Some(backing) = backing {
            self.alloc.release(self.liobn, backing);
        }
        log::debug!("liobn {:#x}: disabled", self.liobn);
    }

    /// Clears every entry, leaving geometry and enablement
    /// alone.
    pub fn reset(&self) {
        if let Some(backing) = &self.state.read().backing {
            backing.fill(0);
        }
    }

    /// Moves the table's entries into accelerated or plain
    /// storage, as requested.  Does nothing if the table is
    /// disabled or already in the requested mode.  If the
    /// accelerator cannot provide storage, the table stays as it
    /// is.
    ///
    /// Translations running concurrently observe either the old
    /// or the new storage in its entirety.
    pub fn set_accelerated(&self, accelerate: bool) -> Result<()> {
        let state = self.state.upgradable_read();
        let Some(old) = state.backing.as_ref() else {
            return Ok(());
        };
        if old.is_accelerated() == accelerate {
            return Ok(());
        }
        let new = self.alloc.alloc(self.liobn, &state.geometry, accelerate)?;
        if new.is_accelerated() != accelerate {
            log::warn!(
                "liobn {:#x}: no accelerated storage, keeping plain table",
                self.liobn
            );
            drop(state);
            self.alloc.release(self.liobn, new);
            return Ok(());
        }
        new.copy_from(old);
        let mut state = RwLockUpgradableReadGuard::upgrade(state);
        let old = state.backing.replace(new);
        drop(state);
        if let Some(old) = old {
            self.alloc.release(self.liobn, old);
        }
        log::debug!("liobn {:#x}: accelerated={accelerate}", self.liobn);
        Ok(())
    }

    /// Translates an address relative to the start of the
    /// window.  Addresses beyond the window, and all addresses
    /// while the table is disabled, fault with a mask covering
    /// the entire address space.
    pub fn translate(&self, addr: u64, is_write: bool) -> IommuTlbEntry {
        let state = self.state.read();
        let geometry = state.geometry;
        let entry = state
            .backing
            .as_ref()
            .zip(geometry.offset_index(addr))
            .and_then(|(backing, index)| backing.get(index))
            .map_or(IommuTlbEntry::fault(), |tce| {
                let page_mask = geometry.page_mask();
                IommuTlbEntry {
                    iova: addr & page_mask,
                    translated_addr: tce & page_mask,
                    addr_mask: !page_mask,
                    perm: tce::decode(tce),
                }
            });
        log::trace!(
            "liobn {:#x}: translate {addr:#x} write={is_write} \
             -> iova={:#x} perm={:?} mask={:#x}",
            self.liobn,
            entry.iova,
            entry.perm,
            entry.addr_mask
        );
        entry
    }

    /// Stores a TCE for the page containing the given I/O bus
    /// address, then notifies consumers of the change.
    /// Notifiers run synchronously and in registration order,
    /// but outside of the table lock: a translation racing the
    /// update may see the new entry before consumers are told.
    pub fn write_entry(&self, ioba: u64, tce: u64) -> Result<()> {
        let entry = {
            let state = self.state.read();
            let geometry = state.geometry;
            let Some((backing, index)) =
                state.backing.as_ref().zip(geometry.index(ioba))
            else {
                log::debug!("put TCE on out-of-bounds IOBA {ioba:#x}");
                return Err(Error::OutOfBounds {
                    liobn: self.liobn.raw(),
                    ioba,
                });
            };
            backing.set(index, tce);
            let page_mask = geometry.page_mask();
            IommuTlbEntry {
                iova: ioba.wrapping_sub(geometry.bus_offset) & page_mask,
                translated_addr: tce & page_mask,
                addr_mask: !page_mask,
                perm: tce::decode(tce),
            }
        };
        self.notify(&entry);
        Ok(())
    }

    /// Returns the TCE for the page containing the given I/O bus
    /// address.
    pub fn read_entry(&self, ioba: u64) -> Result<u64> {
        let state = self.state.read();
        state
            .backing
            .as_ref()
            .zip(state.geometry.index(ioba))
            .and_then(|(backing, index)| backing.get(index))
            .ok_or_else(|| {
                log::debug!("get TCE on out-of-bounds IOBA {ioba:#x}");
                Error::OutOfBounds { liobn: self.liobn.raw(), ioba }
            })
    }

    /// Returns a copy of every entry, or None if disabled.
    pub fn entries(&self) -> Option<Vec<u64>> {
        self.state.read().backing.as_ref().map(Backing::to_vec)
    }

    /// Adds a consumer to be told of every entry change.
    pub fn register_notifier(&self, notifier: Arc<dyn IommuNotifier>) {
        self.notifiers.lock().push(notifier);
    }

    fn notify(&self, entry: &IommuTlbEntry) {
        for notifier in self.notifiers.lock().iter() {
            notifier.notify(entry);
        }
    }

    /// Disables the table ahead of loading migrated state,
    /// releasing its storage.  The geometry is kept: older state
    /// versions take their window from the destination.
    pub(crate) fn release_for_load(&self) {
        let backing = {
            let mut state = self.state.write();
            state.enabled = false;
            state.backing.take()
        };
        if let Some(backing) = backing {
            self.alloc.release(self.liobn, backing);
        }
    }

    /// Installs migrated state.  If the state is enabled, fresh
    /// plain storage is allocated and the entries copied into
    /// it; accelerator state does not survive migration.  The
    /// owner is then told of the bypass setting.
    pub(crate) fn load(
        &self,
        enabled: bool,
        geometry: Geometry,
        bypass: bool,
        entries: &[u64],
    ) -> Result<()> {
        let (old, enabled) = {
            let mut state = self.state.write();
            let old = state.backing.take();
            state.enabled = false;
            state.geometry = geometry;
            state.bypass = bypass;
            let enabled = if enabled {
                self.do_enable(&mut state, false).map(|()| {
                    if let Some(backing) = &state.backing {
                        backing.copy_from_slice(entries);
                    }
                })
            } else {
                Ok(())
            };
            (old, enabled)
        };
        if let Some(old) = old {
            self.alloc.release(self.liobn, old);
        }
        enabled?;
        if let Some(owner) = self.owner() {
            owner.set_bypass(bypass);
        }
        Ok(())
    }

    /// Returns the fields saved by migration, read under one
    /// lock so they are mutually consistent.
    pub(crate) fn snapshot(&self) -> (bool, Geometry, bool, Vec<u64>) {
        let state = self.state.read();
        let entries = state
            .backing
            .as_ref()
            .map(Backing::to_vec)
            .unwrap_or_default();
        (state.enabled, state.geometry, state.bypass, entries)
    }
}

impl Drop for TceTable {
    fn drop(&mut self) {
        if let Some(backing) = self.state.get_mut().backing.take() {
            self.alloc.release(self.liobn, backing);
        }
    }
}

impl core::fmt::Debug for TceTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.state.read();
        f.debug_struct("TceTable")
            .field("liobn", &format_args!("{:#x}", self.liobn))
            .field("geometry", &state.geometry)
            .field("enabled", &state.enabled)
            .field("bypass", &state.bypass)
            .field(
                "accelerated",
                &state.backing.as_ref().is_some_and(Backing::is_accelerated),
            )
            .finish()
    }
}
