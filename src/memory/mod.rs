//! # Memory
//!
//! The address space a patch engine works on, passed in explicitly so the process's own memory and an in-memory
//! simulation are interchangeable

pub mod chunk;
pub mod local;
pub mod sim;

use region::Protection;
use thiserror::Error;

pub use chunk::ChunkReader;
pub use local::LocalSpace;
pub use sim::SimulatedSpace;

/// Errors when accessing an address space
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Part of the range is not mapped readable
    #[error("{len} bytes at {address:#x} are not readable")]
    Unreadable {
        /// Start of the rejected range
        address: usize,
        /// Length of the rejected range
        len: usize,
    },
    /// The range is outside the address space
    #[error("{len} bytes at {address:#x} are outside the address space")]
    OutOfBounds {
        /// Start of the rejected range
        address: usize,
        /// Length of the rejected range
        len: usize,
    },
    /// Error when querying or setting memory protections
    #[error("Error setting memory protections")]
    Protection(#[from] region::Error),
    /// Fault injected into a [`SimulatedSpace`]
    #[error("injected fault at {0:#x}")]
    Injected(usize),
}

/// Capability to read, write and re-protect one address space.
///
/// Addresses are runtime addresses. Implementations do no locking; the engine relies on callers to serialize
/// operations touching the same memory.
pub trait AddressSpace {
    /// Fills `buf` with the bytes starting at `address`, failing without a partial read if any byte is unreadable
    fn read(&self, address: usize, buf: &mut [u8]) -> Result<(), MemoryError>;

    /// Writes `data` at `address`. The range must already be writable.
    ///
    /// # Safety
    ///
    /// Writing arbitrary bytes over live code or data can break the process. The caller must ensure nothing is
    /// executing or reading the range while it changes.
    unsafe fn write(&self, address: usize, data: &[u8]) -> Result<(), MemoryError>;

    /// Sets the protection of every page overlapping `address..address + len`
    fn protect(
        &self,
        address: usize,
        len: usize,
        protection: Protection,
    ) -> Result<(), MemoryError>;
}

impl<S: AddressSpace + ?Sized> AddressSpace for &S {
    fn read(&self, address: usize, buf: &mut [u8]) -> Result<(), MemoryError> {
        (**self).read(address, buf)
    }

    unsafe fn write(&self, address: usize, data: &[u8]) -> Result<(), MemoryError> {
        (**self).write(address, data)
    }

    fn protect(
        &self,
        address: usize,
        len: usize,
        protection: Protection,
    ) -> Result<(), MemoryError> {
        (**self).protect(address, len, protection)
    }
}
