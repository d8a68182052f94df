// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # TCE hypercalls.
//!
//! The guest reads and writes its translation tables with four
//! hypercalls:
//!
//! * `H_GET_TCE(liobn, ioba)` returns the entry for one page.
//! * `H_PUT_TCE(liobn, ioba, tce)` sets the entry for one page.
//! * `H_PUT_TCE_INDIRECT(liobn, ioba, list, npages)` sets the
//!   entries for `npages` consecutive pages from a list of TCEs
//!   in guest memory.  The list is at most one 4KiB page long.
//! * `H_STUFF_TCE(liobn, ioba, tce, npages)` sets the entries
//!   for `npages` consecutive pages to the same value.
//!
//! I/O bus addresses are truncated to the table's page size.
//! Every failure is reported to the guest as `H_PARAMETER`.
//!
//! The multi-page calls stop at the first entry that cannot be
//! written, leaving the entries before it in place.  The guest
//! sees only the status of the last write attempted.

use crate::mem::GuestMemory;
use crate::registry::Registry;
use crate::{Error, Result, MAX_INDIRECT_PAGES, TCE_PAGE_MASK};

pub const H_GET_TCE: u64 = 0x1c;
pub const H_PUT_TCE: u64 = 0x20;
pub const H_STUFF_TCE: u64 = 0x138;
pub const H_PUT_TCE_INDIRECT: u64 = 0x13c;

/// The status returned to the guest.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(i64)]
pub enum HStatus {
    Success = 0,
    Parameter = -4,
}

impl HStatus {
    /// Returns the value placed in the guest's return register.
    pub fn code(self) -> i64 {
        self as i64
    }
}

impl<T> From<&Result<T>> for HStatus {
    fn from(result: &Result<T>) -> HStatus {
        match result {
            Ok(_) => HStatus::Success,
            Err(_) => HStatus::Parameter,
        }
    }
}

/// Names the kind of bus a LIOBN belongs to, for logging.
fn bus(liobn: u64) -> &'static str {
    if liobn & 0x8000_0000 != 0 {
        "pci"
    } else {
        "vio"
    }
}

/// Reads one entry.
pub fn get_tce(registry: &Registry, liobn: u64, ioba: u64) -> Result<u64> {
    let table = registry.find(liobn)?;
    let ioba = ioba & table.geometry().page_mask();
    table.read_entry(ioba)
}

/// Writes one entry.
pub fn put_tce(
    registry: &Registry,
    liobn: u64,
    ioba: u64,
    tce: u64,
) -> Result<()> {
    let table = registry.find(liobn)?;
    let ioba = ioba & table.geometry().page_mask();
    table.write_entry(ioba, tce)
}

/// Writes `npages` entries read from the big-endian TCE list at
/// `tce_list` in guest memory.  Returns the number of entries
/// written alongside the outcome of the last attempt.
pub fn put_tce_indirect<M: GuestMemory + ?Sized>(
    registry: &Registry,
    memory: &M,
    liobn: u64,
    ioba: u64,
    tce_list: u64,
    npages: u64,
) -> (u64, Result<()>) {
    let table = match registry.find(liobn) {
        Ok(table) => table,
        Err(e) => return (0, Err(e)),
    };
    if npages > MAX_INDIRECT_PAGES {
        let limit = MAX_INDIRECT_PAGES;
        return (0, Err(Error::BatchTooLarge { npages, limit }));
    }
    if tce_list & TCE_PAGE_MASK != 0 {
        return (0, Err(Error::MisalignedSource(tce_list)));
    }
    let geometry = table.geometry();
    let mut ioba = ioba & geometry.page_mask();
    let mut result = Err(Error::EmptyBatch);
    let mut written = 0;
    for k in 0..npages {
        result = memory
            .read_u64(tce_list + k * 8)
            .and_then(|tce| table.write_entry(ioba, tce));
        if result.is_err() {
            break;
        }
        written += 1;
        ioba = ioba.wrapping_add(geometry.page_size());
    }
    (written, result)
}

/// Writes `tce` into `npages` consecutive entries.  Returns the
/// number of entries written alongside the outcome of the last
/// attempt.
pub fn stuff_tce(
    registry: &Registry,
    liobn: u64,
    ioba: u64,
    tce: u64,
    npages: u64,
) -> (u64, Result<()>) {
    let table = match registry.find(liobn) {
        Ok(table) => table,
        Err(e) => return (0, Err(e)),
    };
    let geometry = table.geometry();
    let limit = u64::from(geometry.nb_table);
    if npages > limit {
        return (0, Err(Error::BatchTooLarge { npages, limit }));
    }
    let mut ioba = ioba & geometry.page_mask();
    let mut result = Err(Error::EmptyBatch);
    let mut written = 0;
    for _ in 0..npages {
        result = table.write_entry(ioba, tce);
        if result.is_err() {
            break;
        }
        written += 1;
        ioba = ioba.wrapping_add(geometry.page_size());
    }
    (written, result)
}

/// Handles H_GET_TCE, returning the status and, on success, the
/// entry.
pub fn h_get_tce(registry: &Registry, liobn: u64, ioba: u64) -> (HStatus, u64) {
    let result = get_tce(registry, liobn, ioba);
    let status = HStatus::from(&result);
    let tce = result.unwrap_or(0);
    log::trace!(
        "{} get_tce liobn={liobn:#x} ioba={ioba:#x} \
         ret={status:?} tce={tce:#x}",
        bus(liobn)
    );
    (status, tce)
}

/// Handles H_PUT_TCE.
pub fn h_put_tce(
    registry: &Registry,
    liobn: u64,
    ioba: u64,
    tce: u64,
) -> HStatus {
    let status = HStatus::from(&put_tce(registry, liobn, ioba, tce));
    log::trace!(
        "{} put_tce liobn={liobn:#x} ioba={ioba:#x} \
         tce={tce:#x} ret={status:?}",
        bus(liobn)
    );
    status
}

/// Handles H_PUT_TCE_INDIRECT.
pub fn h_put_tce_indirect<M: GuestMemory + ?Sized>(
    registry: &Registry,
    memory: &M,
    liobn: u64,
    ioba: u64,
    tce_list: u64,
    npages: u64,
) -> HStatus {
    let (written, result) =
        put_tce_indirect(registry, memory, liobn, ioba, tce_list, npages);
    let status = HStatus::from(&result);
    // Report the last entry written, or the first that failed.
    let last = written.saturating_sub(u64::from(result.is_ok()));
    log::trace!(
        "{} put_tce_indirect liobn={liobn:#x} ioba={ioba:#x} \
         list={tce_list:#x} entry={last} ret={status:?}",
        bus(liobn)
    );
    status
}

/// Handles H_STUFF_TCE.
pub fn h_stuff_tce(
    registry: &Registry,
    liobn: u64,
    ioba: u64,
    tce: u64,
    npages: u64,
) -> HStatus {
    let (_, result) = stuff_tce(registry, liobn, ioba, tce, npages);
    let status = HStatus::from(&result);
    log::trace!(
        "{} stuff_tce liobn={liobn:#x} ioba={ioba:#x} tce={tce:#x} \
         npages={npages} ret={status:?}",
        bus(liobn)
    );
    status
}

/// Returns the first `N` hypercall arguments.
fn args<const N: usize>(args: &[u64]) -> Result<[u64; N]> {
    args.get(..N)
        .and_then(|args| args.try_into().ok())
        .ok_or(Error::BadArguments { needed: N, got: args.len() })
}

/// Routes a hypercall, given its opcode and argument registers,
/// to its handler.  Returns None for opcodes that are not TCE
/// hypercalls.  H_GET_TCE returns its entry in `args[0]`.
pub fn dispatch<M: GuestMemory + ?Sized>(
    registry: &Registry,
    memory: &M,
    opcode: u64,
    regs: &mut [u64],
) -> Option<HStatus> {
    let status = match opcode {
        H_GET_TCE => args::<2>(regs).map(|[liobn, ioba]| {
            let (status, tce) = h_get_tce(registry, liobn, ioba);
            if status == HStatus::Success {
                regs[0] = tce;
            }
            status
        }),
        H_PUT_TCE => args::<3>(regs)
            .map(|[liobn, ioba, tce]| h_put_tce(registry, liobn, ioba, tce)),
        H_PUT_TCE_INDIRECT => {
            args::<4>(regs).map(|[liobn, ioba, list, npages]| {
                h_put_tce_indirect(registry, memory, liobn, ioba, list, npages)
            })
        }
        H_STUFF_TCE => args::<4>(regs).map(|[liobn, ioba, tce, npages]| {
            h_stuff_tce(registry, liobn, ioba, tce, npages)
        }),
        _ => return None,
    };
    Some(status.unwrap_or_else(|e| {
        log::debug!("hypercall {opcode:#x}: {e}");
        HStatus::Parameter
    }))
}
