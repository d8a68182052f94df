// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Translation control entries.
//!
//! A TCE is a single 64-bit word.  The high bits hold the page
//! aligned guest physical address the entry translates to; the
//! two lowest bits hold the access right granted to the device.
//! Everything in between is ignored.  Since the translation page
//! size is a property of the table rather than the entry, the
//! address is extracted with the table's page mask.

use bitstruct::bitstruct;

/// The access rights a TCE may grant.  Every two-bit pattern is
/// a valid right, so decoding is total.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum Access {
    Fault = 0b00,
    ReadOnly = 0b01,
    WriteOnly = 0b10,
    ReadWrite = 0b11,
}

impl Access {
    /// Returns true IFF a device may read through the entry.
    pub fn readable(self) -> bool {
        matches!(self, Access::ReadOnly | Access::ReadWrite)
    }

    /// Returns true IFF a device may write through the entry.
    pub fn writable(self) -> bool {
        matches!(self, Access::WriteOnly | Access::ReadWrite)
    }

    /// Returns true IFF the entry permits the given direction.
    pub fn permits(self, is_write: bool) -> bool {
        if is_write {
            self.writable()
        } else {
            self.readable()
        }
    }
}

bitstruct! {
    /// A translation control entry.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct Tce(u64) {
        pub access: Access = 0..2;
    }
}

impl bitstruct::FromRaw<u8, Access> for Tce {
    fn from_raw(raw: u8) -> Access {
        match raw {
            0b00 => Access::Fault,
            0b01 => Access::ReadOnly,
            0b10 => Access::WriteOnly,
            0b11 => Access::ReadWrite,
            _ => unreachable!("two-bit field holds {raw:#x}"),
        }
    }
}

impl bitstruct::IntoRaw<u8, Access> for Tce {
    fn into_raw(access: Access) -> u8 {
        access as u8
    }
}

impl Tce {
    /// Returns an empty TCE; it grants no access.
    pub const fn empty() -> Tce {
        Tce(0)
    }

    /// Wraps a raw entry as written by the guest.
    pub const fn from_bits(bits: u64) -> Tce {
        Tce(bits)
    }

    /// Creates a new TCE mapping the given page-aligned
    /// address with the given rights.
    pub fn new(addr: u64, access: Access) -> Tce {
        Tce(addr).with_access(access)
    }

    /// Returns the raw 64-bit value.
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Returns the translated address for a table with the
    /// given page mask.
    pub const fn addr(self, page_mask: u64) -> u64 {
        self.0 & page_mask
    }
}

/// Decodes the access right held in the low bits of a raw entry.
pub fn decode(raw: u64) -> Access {
    Tce::from_bits(raw).access()
}

#[cfg(test)]
mod tests {
    use super::{decode, Access, Tce};

    #[test]
    fn every_pattern_decodes() {
        assert_eq!(decode(0x1000), Access::Fault);
        assert_eq!(decode(0x1001), Access::ReadOnly);
        assert_eq!(decode(0x1002), Access::WriteOnly);
        assert_eq!(decode(0x1003), Access::ReadWrite);
        // Bits above the access field don't matter.
        assert_eq!(decode(!0), Access::ReadWrite);
        assert_eq!(decode(!0b11), Access::Fault);
    }

    #[test]
    fn constructed() {
        let tce = Tce::new(0xF00D_F000, Access::ReadWrite);
        assert_eq!(tce.bits(), 0xF00D_F003);
        let tce = tce.with_access(Access::ReadOnly);
        assert_eq!(tce.bits(), 0xF00D_F001);
        assert_eq!(tce.addr(!0xFFF), 0xF00D_F000);
        // Large pages mask more of the address.
        assert_eq!(tce.addr(!0xFFFF), 0xF00D_0000);
    }

    #[test]
    fn directions() {
        assert!(!Access::Fault.permits(false));
        assert!(!Access::Fault.permits(true));
        assert!(Access::ReadOnly.permits(false));
        assert!(!Access::ReadOnly.permits(true));
        assert!(!Access::WriteOnly.permits(false));
        assert!(Access::WriteOnly.permits(true));
        assert!(Access::ReadWrite.permits(false));
        assert!(Access::ReadWrite.permits(true));
    }
}
