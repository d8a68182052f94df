// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # Migration of TCE tables.
//!
//! Each table's contents move across a checkpoint as a
//! `TableState`.  On the source we take the state of the live
//! table (`pre_save`).  On the destination, a table with the same
//! LIOBN must already exist; we release whatever storage it has
//! (`pre_load`), then install the saved geometry and bypass
//! setting and, if the source table was enabled, allocate fresh
//! storage and copy the entries in (`post_load`).
//!
//! Destination storage is always plain: accelerator state
//! belongs to the source host.  A consumer that needs acceleration
//! asks for it again once it has attached on the destination.
//!
//! Version 2 of the state predates the saving of `enabled`,
//! `bus_offset` and `page_shift`.  Such a stream always describes
//! an enabled table whose window is the one the destination was
//! configured with.

use crate::mem::{Geometry, Liobn};
use crate::table::TceTable;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// The current state version.
pub const VERSION: u32 = 3;
/// The oldest state version we can load.
pub const MIN_VERSION: u32 = 2;

/// The saved state of one table.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TableState {
    pub version: u32,
    pub liobn: Liobn,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub bus_offset: Option<u64>,
    #[serde(default)]
    pub page_shift: Option<u32>,
    pub nb_table: u32,
    pub bypass: bool,
    pub entries: Vec<u64>,
}

impl TableState {
    /// Encodes the state for transmission.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes state received from the source.
    pub fn decode(bytes: &[u8]) -> Result<TableState> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Captures the state of a table on the source.
pub fn pre_save(table: &TceTable) -> TableState {
    let (enabled, geometry, bypass, entries) = table.snapshot();
    TableState {
        version: VERSION,
        liobn: table.liobn(),
        enabled: Some(enabled),
        bus_offset: Some(geometry.bus_offset),
        page_shift: Some(geometry.page_shift),
        nb_table: geometry.nb_table,
        bypass,
        entries,
    }
}

/// Prepares a destination table to receive state by releasing
/// its storage.
pub fn pre_load(table: &TceTable) {
    table.release_for_load();
}

/// Installs received state into a destination table prepared
/// with `pre_load`.
pub fn post_load(table: &TceTable, state: &TableState) -> Result<()> {
    let (enabled, geometry) = validate(table, state)?;
    table.load(enabled, geometry, state.bypass, &state.entries)
}

/// Checks that received state is loadable into a table and
/// returns the enablement and geometry it describes.
fn validate(table: &TceTable, state: &TableState) -> Result<(bool, Geometry)> {
    if !(MIN_VERSION..=VERSION).contains(&state.version) {
        return Err(Error::UnsupportedVersion(state.version));
    }
    if state.liobn != table.liobn() {
        return Err(Error::LiobnMismatch {
            expected: table.liobn().raw(),
            found: state.liobn.raw(),
        });
    }
    let (enabled, page_shift, bus_offset) = if state.version < 3 {
        let current = table.geometry();
        if current.nb_table == 0 && state.nb_table != 0 {
            return Err(Error::MalformedState("no window to load into"));
        }
        (true, current.page_shift, current.bus_offset)
    } else {
        match (state.enabled, state.page_shift, state.bus_offset) {
            (Some(enabled), Some(page_shift), Some(bus_offset)) => {
                (enabled, page_shift, bus_offset)
            }
            _ => return Err(Error::MalformedState("missing window fields")),
        }
    };
    if state.entries.len() != state.nb_table as usize {
        return Err(Error::MalformedState("entry count differs from size"));
    }
    let geometry = Geometry::new(page_shift, bus_offset, state.nb_table)?;
    Ok((enabled, geometry))
}

/// Loads received state into a destination table: validates
/// it, then runs `pre_load` and `post_load`.  A table is left
/// untouched if the state is not loadable.
pub fn restore(table: &TceTable, state: &TableState) -> Result<()> {
    validate(table, state)?;
    pre_load(table);
    post_load(table, state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeAccelerator, FakeOwner};
    use crate::registry::Registry;
    use crate::table::TceOwner;
    use crate::tce::Access;
    use std::sync::Arc;

    const RW: u64 = Access::ReadWrite as u64;
    const RO: u64 = Access::ReadOnly as u64;

    #[test]
    fn round_trip_into_fresh_table() {
        let liobn = Liobn::vio(0x1000);
        let geometry = Geometry::new(12, 0, 4).unwrap();
        let saved = {
            let accel = Arc::new(FakeAccelerator::new());
            let source = Registry::new(Some(accel));
            let a = source.create_table(liobn, None).unwrap();
            a.enable(geometry, true).unwrap();
            assert!(a.is_accelerated());
            a.write_entry(0x0000, 0x1000 | RW).unwrap();
            a.write_entry(0x2000, 0x3000 | RO).unwrap();
            a.set_bypass(true);
            let saved = pre_save(&a).encode().unwrap();
            a.disable();
            drop(source.remove(liobn));
            saved
        };

        let destination = Registry::new(None);
        let owner = Arc::new(FakeOwner::new());
        let weak = Arc::downgrade(&(owner.clone() as Arc<dyn TceOwner>));
        let b = destination.create_table(liobn, Some(weak)).unwrap();
        assert!(!b.is_enabled());

        let state = TableState::decode(&saved).unwrap();
        restore(&b, &state).unwrap();
        assert!(b.is_enabled());
        assert!(!b.is_accelerated());
        assert_eq!(b.geometry(), geometry);
        assert_eq!(b.entries(), Some(vec![0x1000 | RW, 0, 0x3000 | RO, 0]));
        assert!(b.bypass());
        assert_eq!(owner.bypass(), Some(true));
    }

    #[test]
    fn replaces_stale_destination() {
        let liobn = Liobn::vio(3);
        let registry = Registry::new(None);
        let source = registry.create_table(liobn, None).unwrap();
        source.enable(Geometry::new(12, 0x8000, 2).unwrap(), false).unwrap();
        source.write_entry(0x9000, 0x5000 | RW).unwrap();
        let state = pre_save(&source);

        let other = Registry::new(None);
        let dest = other.create_table(liobn, None).unwrap();
        dest.enable(Geometry::new(16, 0, 8).unwrap(), false).unwrap();
        dest.write_entry(0x10000, 0xFFFF_0000 | RW).unwrap();

        restore(&dest, &state).unwrap();
        assert_eq!(dest.geometry(), Geometry::new(12, 0x8000, 2).unwrap());
        assert_eq!(dest.entries(), Some(vec![0, 0x5000 | RW]));
    }

    #[test]
    fn disabled_state_disables() {
        let liobn = Liobn::vio(3);
        let registry = Registry::new(None);
        let source = registry.create_table(liobn, None).unwrap();
        let state = pre_save(&source);
        assert_eq!(state.enabled, Some(false));
        assert!(state.entries.is_empty());

        let other = Registry::new(None);
        let dest = other.create_table(liobn, None).unwrap();
        dest.enable(Geometry::new(12, 0, 8).unwrap(), false).unwrap();
        restore(&dest, &state).unwrap();
        assert!(!dest.is_enabled());
        assert_eq!(dest.entries(), None);
    }

    #[test]
    fn version_2_keeps_destination_window() {
        let liobn = Liobn::vio(5);
        let registry = Registry::new(None);
        let dest = registry.create_table(liobn, None).unwrap();
        dest.enable(Geometry::new(12, 0x4000_0000, 2).unwrap(), false).unwrap();
        let bytes = br#"{
            "version": 2,
            "liobn": 5,
            "nb_table": 2,
            "bypass": false,
            "entries": [0, 12291]
        }"#;
        let state = TableState::decode(bytes).unwrap();
        assert_eq!(state.enabled, None);
        restore(&dest, &state).unwrap();
        assert!(dest.is_enabled());
        assert_eq!(dest.geometry(), Geometry::new(12, 0x4000_0000, 2).unwrap());
        assert_eq!(dest.read_entry(0x4000_1000).unwrap(), 0x3003);
    }

    #[test]
    fn rejects_bad_state() {
        let liobn = Liobn::vio(9);
        let registry = Registry::new(None);
        let dest = registry.create_table(liobn, None).unwrap();
        let geometry = Geometry::new(12, 0, 2).unwrap();
        dest.enable(geometry, false).unwrap();
        dest.write_entry(0x1000, 0x7000 | RW).unwrap();

        let good = pre_save(&dest);

        let mut state = good.clone();
        state.liobn = Liobn::vio(10);
        assert!(matches!(
            restore(&dest, &state),
            Err(Error::LiobnMismatch { expected: 9, found: 10 })
        ));

        let mut state = good.clone();
        state.version = 4;
        assert!(matches!(
            restore(&dest, &state),
            Err(Error::UnsupportedVersion(4))
        ));

        let mut state = good.clone();
        state.entries.pop();
        let result = restore(&dest, &state);
        assert!(matches!(result, Err(Error::MalformedState(_))));

        let mut state = good;
        state.page_shift = None;
        let result = restore(&dest, &state);
        assert!(matches!(result, Err(Error::MalformedState(_))));

        // None of the above disturbed the table.
        assert_eq!(dest.geometry(), geometry);
        assert_eq!(dest.entries(), Some(vec![0, 0x7000 | RW]));

        assert!(matches!(TableState::decode(b"{"), Err(Error::Codec(_))));
    }

    #[test]
    fn version_2_needs_destination_window() {
        let liobn = Liobn::vio(5);
        let registry = Registry::new(None);
        let dest = registry.create_table(liobn, None).unwrap();
        let bytes = br#"{
            "version": 2,
            "liobn": 5,
            "nb_table": 2,
            "bypass": false,
            "entries": [0, 12291]
        }"#;
        let state = TableState::decode(bytes).unwrap();
        let result = restore(&dest, &state);
        assert!(matches!(result, Err(Error::MalformedState(_))));
        assert!(!dest.is_enabled());
        assert_eq!(dest.geometry(), Geometry::default());
        assert_eq!(dest.window(), None);

        // An empty table is all a windowless destination can take.
        let bytes = br#"{
            "version": 2,
            "liobn": 5,
            "nb_table": 0,
            "bypass": true,
            "entries": []
        }"#;
        let state = TableState::decode(bytes).unwrap();
        restore(&dest, &state).unwrap();
        assert!(!dest.is_enabled());
        assert!(dest.bypass());
    }

    #[test]
    fn failed_load_leaves_table_usable() {
        let liobn = Liobn::vio(11);
        let geometry = Geometry::new(12, 0, 4).unwrap();
        let registry = Registry::new(None);
        let dest = registry.create_table(liobn, None).unwrap();
        dest.enable(geometry, false).unwrap();
        dest.write_entry(0x1000, 0x9000 | RW).unwrap();

        let mut state = pre_save(&dest);
        state.liobn = Liobn::vio(12);
        pre_load(&dest);
        assert!(!dest.is_enabled());
        assert!(matches!(
            post_load(&dest, &state),
            Err(Error::LiobnMismatch { expected: 11, found: 12 })
        ));
        assert!(!dest.is_enabled());
        assert_eq!(dest.entries(), None);

        dest.enable(geometry, false).unwrap();
        assert!(dest.is_enabled());
        dest.write_entry(0x2000, 0xA000 | RW).unwrap();
        assert_eq!(dest.read_entry(0x2000).unwrap(), 0xA000 | RW);
        assert_eq!(dest.entries(), Some(vec![0, 0, 0xA000 | RW, 0]));
    }
}
