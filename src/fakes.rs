// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Stand-ins for the collaborators of a TCE table: the kernel
//! accelerator, guest memory, DMA consumers, and owning devices.

use crate::allocator::{self, AccelHandle, AcceleratedTable, Accelerator};
use crate::iommu::{IommuNotifier, IommuTlbEntry};
use crate::mem::{Geometry, GuestMemory, Liobn};
use crate::table::TceOwner;
use crate::{Error, Result};
use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicUsize};
use core::sync::atomic::Ordering;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};

/// An accelerator that hands out heap tables and tracks which
/// are outstanding.
pub struct FakeAccelerator {
    fail: AtomicBool,
    next: AtomicI32,
    created: AtomicUsize,
    live: Mutex<BTreeSet<i32>>,
}

impl FakeAccelerator {
    pub fn new() -> FakeAccelerator {
        FakeAccelerator {
            fail: AtomicBool::new(false),
            next: AtomicI32::new(3),
            created: AtomicUsize::new(0),
            live: Mutex::new(BTreeSet::new()),
        }
    }

    /// Makes subsequent creates fail, or succeed again.
    pub fn fail_creates(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Returns the number of tables created and not removed.
    pub fn live(&self) -> usize {
        self.live.lock().len()
    }

    /// Returns the number of tables ever created.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl Accelerator for FakeAccelerator {
    fn create_table(
        &self,
        liobn: Liobn,
        geometry: &Geometry,
    ) -> Result<AcceleratedTable> {
        let liobn = liobn.raw();
        if self.fail.load(Ordering::SeqCst) {
            let reason = "injected".into();
            return Err(Error::Accelerator { liobn, reason });
        }
        let nb_table = geometry.nb_table;
        let entries = allocator::zeroed(nb_table)
            .ok_or(Error::Exhausted { liobn, nb_table })?;
        let fd = self.next.fetch_add(1, Ordering::SeqCst);
        self.live.lock().insert(fd);
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(AcceleratedTable::new(AccelHandle(fd), entries))
    }

    fn remove_table(&self, table: AcceleratedTable) -> Result<()> {
        let AccelHandle(fd) = table.handle();
        if self.live.lock().remove(&fd) {
            Ok(())
        } else {
            let reason = format!("unknown table {fd}");
            Err(Error::Accelerator { liobn: 0, reason })
        }
    }
}

/// Sparse guest memory holding 64-bit big-endian words.  Reads
/// of words never written fail.
pub struct FakeGuestMemory {
    words: Mutex<BTreeMap<u64, [u8; 8]>>,
}

impl FakeGuestMemory {
    pub fn new() -> FakeGuestMemory {
        FakeGuestMemory { words: Mutex::new(BTreeMap::new()) }
    }

    /// Stores a list of TCEs starting at `addr`.
    pub fn write_tces(&self, addr: u64, tces: &[u64]) {
        let mut words = self.words.lock();
        for (k, tce) in tces.iter().enumerate() {
            words.insert(addr + k as u64 * 8, tce.to_be_bytes());
        }
    }
}

impl GuestMemory for FakeGuestMemory {
    fn read_u64(&self, addr: u64) -> Result<u64> {
        self.words
            .lock()
            .get(&addr)
            .map(|&bytes| u64::from_be_bytes(bytes))
            .ok_or(Error::GuestMemory(addr))
    }
}

/// Records every notification in the order received, along with
/// a global sequence number so that ordering across notifiers
/// can be checked.
pub struct RecordingNotifier {
    seen: Mutex<Vec<(u64, IommuTlbEntry)>>,
}

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

impl RecordingNotifier {
    pub fn new() -> RecordingNotifier {
        RecordingNotifier { seen: Mutex::new(Vec::new()) }
    }

    pub fn seen(&self) -> Vec<IommuTlbEntry> {
        self.seen.lock().iter().map(|&(_, entry)| entry).collect()
    }

    /// Returns the sequence number of the most recent
    /// notification.
    pub fn sequence(&self) -> u64 {
        self.seen.lock().last().map_or(0, |&(seq, _)| seq)
    }
}

impl IommuNotifier for RecordingNotifier {
    fn notify(&self, entry: &IommuTlbEntry) {
        let seq = SEQUENCE.fetch_add(1, Ordering::SeqCst) + 1;
        self.seen.lock().push((seq, *entry));
    }
}

/// A device that remembers the last bypass setting it was given.
pub struct FakeOwner {
    bypass: Mutex<Option<bool>>,
}

impl FakeOwner {
    pub fn new() -> FakeOwner {
        FakeOwner { bypass: Mutex::new(None) }
    }

    pub fn bypass(&self) -> Option<bool> {
        *self.bypass.lock()
    }
}

impl TceOwner for FakeOwner {
    fn set_bypass(&self, bypass: bool) {
        *self.bypass.lock() = Some(bypass);
    }
}
