//! # Patcher
//!
//! Writing a descriptor's replacement bytes to its patch site, and writing the captured original bytes back

pub mod mem;

use thiserror::Error;
use tracing::{debug, warn};

use crate::address::AddressResolver;
use crate::memory::{AddressSpace, MemoryError};
use crate::patch::{PatchDescriptor, PatchState};
use crate::pattern::{self, PatternError};

pub use mem::ProtectionGuard;

/// Which bytes to write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Decoded replacement pattern, at the search site plus the relocation offset
    Replace,
    /// Captured original bytes, at the search site itself
    Revert,
}

/// Why a write did not happen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The descriptor has no address
    Unresolved,
    /// The descriptor has an address but no captured original bytes
    NotCaptured,
}

/// Result of a write that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Bytes were written
    Written {
        /// Runtime address written to
        address: usize,
        /// Number of bytes written
        len: usize,
    },
    /// Nothing was touched
    Skipped(SkipReason),
}

impl WriteOutcome {
    /// Whether memory was changed
    pub fn is_written(&self) -> bool {
        matches!(self, Self::Written { .. })
    }
}

/// Errors when writing a patch
#[derive(Debug, Error)]
pub enum WriteError {
    /// Replacement pattern does not decode
    #[error("replacement pattern of `{name}` is invalid")]
    Pattern {
        /// Descriptor name
        name: String,
        /// Decode failure
        #[source]
        source: PatternError,
    },
    /// Patch site could not be made writable; nothing was written
    #[error("Error setting memory protections at {address:#x}")]
    Protection {
        /// Runtime address of the write
        address: usize,
        /// Underlying failure
        #[source]
        source: MemoryError,
    },
    /// The write itself failed
    #[error("writing at {address:#x} failed")]
    Write {
        /// Runtime address of the write
        address: usize,
        /// Underlying failure
        #[source]
        source: MemoryError,
    },
}

/// Writes one descriptor in `mode`.
///
/// Descriptors that are not captured are skipped and reported as such. Replacing writes the decoded replacement at
/// the search site shifted by the relocation offset; reverting writes the captured bytes at the unshifted search
/// site. The two sites differ whenever the offset is non-zero.
///
/// # Safety
///
/// The bytes at the target are overwritten while the process may be running them. The caller must ensure nothing
/// executes or reads the range during the write and that the result is valid code or data.
pub unsafe fn write<S, R>(
    space: &S,
    resolver: &R,
    descriptor: &PatchDescriptor,
    mode: WriteMode,
) -> Result<WriteOutcome, WriteError>
where
    S: AddressSpace + ?Sized,
    R: AddressResolver + ?Sized,
{
    let (address, original) = match descriptor.state() {
        PatchState::Unresolved => return Ok(WriteOutcome::Skipped(SkipReason::Unresolved)),
        PatchState::Resolved { .. } => return Ok(WriteOutcome::Skipped(SkipReason::NotCaptured)),
        PatchState::Captured { address, original } => (*address, original),
    };
    let runtime = resolver.to_runtime(address);

    // decoded replacement lives only for this write
    let replacement;
    let (target, bytes): (usize, &[u8]) = match mode {
        WriteMode::Replace => {
            replacement =
                pattern::decode(descriptor.replace()).map_err(|source| WriteError::Pattern {
                    name: descriptor.name().to_owned(),
                    source,
                })?;
            if replacement.len() != original.len() {
                warn!(
                    name = descriptor.name(),
                    search = original.len(),
                    replace = replacement.len(),
                    "replacement and search patterns differ in length"
                );
            }
            (
                runtime.wrapping_add_signed(descriptor.relocation_offset()),
                replacement.as_slice(),
            )
        }
        WriteMode::Revert => (runtime, original.as_slice()),
    };

    debug!(
        name = descriptor.name(),
        ?mode,
        address = format_args!("{target:#x}"),
        static_address = format_args!("{address:#x}"),
        len = bytes.len(),
        "writing patch"
    );

    let guard = ProtectionGuard::unlock(space, target, bytes.len()).map_err(|source| {
        WriteError::Protection {
            address: target,
            source,
        }
    })?;
    guard.write(bytes).map_err(|source| WriteError::Write {
        address: target,
        source,
    })?;
    drop(guard);

    Ok(WriteOutcome::Written {
        address: target,
        len: bytes.len(),
    })
}
