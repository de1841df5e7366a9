//! The current process's own address space

use std::ptr;

use region::Protection;

use super::{AddressSpace, MemoryError};

/// Address space of the calling process.
///
/// Reads are checked against the page map first, so an unmapped or unreadable address yields
/// [`MemoryError::Unreadable`] instead of a fault.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalSpace;

impl LocalSpace {
    /// Creates a handle to the current process's memory
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks that every page overlapping `address..address + len` is mapped readable
    fn check_readable(address: usize, len: usize) -> Result<(), MemoryError> {
        let unreadable = || MemoryError::Unreadable { address, len };
        let end = address.checked_add(len).ok_or(MemoryError::OutOfBounds { address, len })?;

        let regions = region::query_range(address as *const u8, len).map_err(|e| match e {
            region::Error::UnmappedRegion => unreadable(),
            e => MemoryError::Protection(e),
        })?;

        // regions come back in ascending order; a gap between them is unmapped memory
        let mut cursor = address;
        for region in regions {
            let region = region.map_err(|e| match e {
                region::Error::UnmappedRegion => unreadable(),
                e => MemoryError::Protection(e),
            })?;
            let range = region.as_range();
            if range.start > cursor || !region.is_readable() || region.is_guarded() {
                return Err(unreadable());
            }
            cursor = range.end;
            if cursor >= end {
                return Ok(());
            }
        }
        Err(unreadable())
    }
}

impl AddressSpace for LocalSpace {
    fn read(&self, address: usize, buf: &mut [u8]) -> Result<(), MemoryError> {
        if buf.is_empty() {
            return Ok(());
        }
        Self::check_readable(address, buf.len())?;

        // Safety: every page in the range was just confirmed readable
        unsafe {
            ptr::copy_nonoverlapping(address as *const u8, buf.as_mut_ptr(), buf.len());
        }
        Ok(())
    }

    unsafe fn write(&self, address: usize, data: &[u8]) -> Result<(), MemoryError> {
        // Safety: caller guarantees the range is writable and not in use
        ptr::copy_nonoverlapping(data.as_ptr(), address as *mut u8, data.len());
        Ok(())
    }

    fn protect(
        &self,
        address: usize,
        len: usize,
        protection: Protection,
    ) -> Result<(), MemoryError> {
        // Safety: changing protections does not touch the bytes themselves
        unsafe { region::protect(address as *const u8, len, protection)? };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use region::Protection;

    use crate::memory::{AddressSpace, LocalSpace, MemoryError};

    #[test]
    fn test_read() {
        let data = [0x11u8, 0x22, 0x33, 0x44];
        let mut buf = [0u8; 3];
        LocalSpace::new()
            .read(data.as_ptr() as usize + 1, &mut buf)
            .unwrap();
        assert_eq!(buf, [0x22, 0x33, 0x44]);
    }

    #[test]
    /// Reading unmapped memory must fail cleanly
    fn test_read_unmapped() {
        let mut buf = [0u8; 4];
        let err = LocalSpace::new().read(0x10, &mut buf).unwrap_err();
        assert!(matches!(err, MemoryError::Unreadable { address: 0x10, .. }));
    }

    #[test]
    /// Pages without read permission are rejected rather than faulting
    fn test_read_no_access() {
        let page = region::alloc(region::page::size(), Protection::NONE).unwrap();
        let mut buf = [0u8; 8];
        let err = LocalSpace::new()
            .read(page.as_ptr::<u8>() as usize, &mut buf)
            .unwrap_err();
        assert!(matches!(err, MemoryError::Unreadable { .. }));
    }

    #[test]
    fn test_protect_and_write() {
        let page = region::alloc(region::page::size(), Protection::READ).unwrap();
        let address = page.as_ptr::<u8>() as usize;
        let space = LocalSpace::new();

        space.protect(address, 4, Protection::READ_WRITE).unwrap();
        unsafe { space.write(address, &[1, 2, 3, 4]).unwrap() };
        space.protect(address, 4, Protection::READ).unwrap();

        let mut buf = [0u8; 4];
        space.read(address, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(
            region::query(address as *const u8).unwrap().protection(),
            Protection::READ
        );
    }
}
