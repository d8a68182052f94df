// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The TCE tables of one machine, keyed by LIOBN.

use crate::allocator::{Accelerator, TableAlloc};
use crate::mem::Liobn;
use crate::table::{TceOwner, TceTable};
use crate::{Error, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

/// The set of tables belonging to a machine.  At most one table
/// exists per LIOBN.
#[derive(Debug, Default)]
pub struct Registry {
    alloc: TableAlloc,
    tables: RwLock<BTreeMap<Liobn, Arc<TceTable>>>,
}

impl Registry {
    /// Returns an empty registry.  Tables created through it
    /// draw accelerated storage from `accel`, if given.
    pub fn new(accel: Option<Arc<dyn Accelerator>>) -> Registry {
        Registry {
            alloc: TableAlloc::new(accel),
            tables: RwLock::new(BTreeMap::new()),
        }
    }

    /// Creates and registers a new, disabled table.  Fails if a
    /// table with the same LIOBN exists.
    pub fn create_table(
        &self,
        liobn: Liobn,
        owner: Option<Weak<dyn TceOwner>>,
    ) -> Result<Arc<TceTable>> {
        let mut tables = self.tables.write();
        if tables.contains_key(&liobn) {
            log::warn!("TCE table with duplicate LIOBN {liobn:#x}");
            return Err(Error::DuplicateRegistration(liobn.raw()));
        }
        let table = Arc::new(TceTable::new(liobn, owner, self.alloc.clone()));
        tables.insert(liobn, Arc::clone(&table));
        Ok(table)
    }

    /// Looks up a table by a LIOBN as passed by the guest.
    /// Values that do not fit in 32 bits match nothing.
    pub fn lookup(&self, liobn: u64) -> Option<Arc<TceTable>> {
        match Liobn::try_from(liobn) {
            Ok(liobn) => self.get(liobn),
            Err(_) => {
                log::debug!("request for out-of-bounds LIOBN {liobn:#x}");
                None
            }
        }
    }

    /// Looks up a table.
    pub fn get(&self, liobn: Liobn) -> Option<Arc<TceTable>> {
        self.tables.read().get(&liobn).cloned()
    }

    /// Like `lookup`, but reports a missing table as an error.
    pub fn find(&self, liobn: u64) -> Result<Arc<TceTable>> {
        self.lookup(liobn).ok_or(Error::NotFound(liobn))
    }

    /// Unregisters and disables a table.  Returns it, if it
    /// existed, so that the caller may drop the last reference.
    pub fn remove(&self, liobn: Liobn) -> Option<Arc<TceTable>> {
        let table = self.tables.write().remove(&liobn)?;
        table.disable();
        Some(table)
    }

    /// Clears the entries of every table, as on machine reset.
    pub fn reset(&self) {
        for table in self.tables.read().values() {
            table.reset();
        }
    }

    /// Returns the registered LIOBNs, in ascending order.
    pub fn liobns(&self) -> Vec<Liobn> {
        self.tables.read().keys().copied().collect()
    }

    /// Returns the number of registered tables.
    pub fn len(&self) -> usize {
        self.tables.read().len()
    }

    /// Returns true IFF no tables are registered.
    pub fn is_empty(&self) -> bool {
        self.tables.read().is_empty()
    }
}
