// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use thiserror::Error;

/// Errors raised by TCE table operations.
///
/// With the exception of `Exhausted`, every error here is the
/// consequence of a bad guest or collaborator request and is
/// recoverable: the hypercall layer reports all of them to the
/// guest as `H_PARAMETER`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("no TCE table registered for LIOBN {0:#x}")]
    NotFound(u64),
    #[error("LIOBN {0:#x} does not fit in 32 bits")]
    LiobnOutOfBounds(u64),
    #[error("IOBA {ioba:#x} is outside the window of LIOBN {liobn:#x}")]
    OutOfBounds { liobn: u32, ioba: u64 },
    #[error("batch of {npages} pages exceeds the limit of {limit}")]
    BatchTooLarge { npages: u64, limit: u64 },
    #[error("batch of zero pages")]
    EmptyBatch,
    #[error("TCE list address {0:#x} is not page aligned")]
    MisalignedSource(u64),
    #[error("accelerator failed for LIOBN {liobn:#x}: {reason}")]
    Accelerator { liobn: u32, reason: String },
    #[error("cannot allocate {nb_table} TCEs for LIOBN {liobn:#x}")]
    Exhausted { liobn: u32, nb_table: u32 },
    #[error("a TCE table for LIOBN {0:#x} already exists")]
    DuplicateRegistration(u32),
    #[error("invalid window geometry: {0}")]
    InvalidGeometry(&'static str),
    #[error("cannot read guest memory at {0:#x}")]
    GuestMemory(u64),
    #[error("hypercall needs {needed} arguments, got {got}")]
    BadArguments { needed: usize, got: usize },
    #[error("migration stream is for LIOBN {found:#x}, not {expected:#x}")]
    LiobnMismatch { expected: u32, found: u32 },
    #[error("unsupported migration state version {0}")]
    UnsupportedVersion(u32),
    #[error("malformed migration state: {0}")]
    MalformedState(&'static str),
    #[error("migration state encoding")]
    Codec(#[from] serde_json::Error),
}
