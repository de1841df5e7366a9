//! This module contains the guard that makes read-only memory writable for the duration of a patch

use region::Protection;
use tracing::warn;

use crate::memory::{AddressSpace, MemoryError};

/// Protection applied while writing
pub const WRITABLE: Protection = Protection::READ_WRITE;

/// Protection put back once the write is done; patch sites live in code
pub const RESTORED: Protection = Protection::READ_EXECUTE;

/// Keeps `address..address + len` writable until dropped.
///
/// Widening happens in [`ProtectionGuard::unlock`]; if it fails no guard exists and nothing must be written.
/// Narrowing back to [`RESTORED`] happens on drop and is best effort: a failure is logged, never surfaced.
///
/// # Safety
///
/// Protections are changed per page, so everything sharing a page with the range is affected too, and the change
/// is not atomic with respect to other threads touching those pages.
pub struct ProtectionGuard<'s, S: AddressSpace + ?Sized> {
    /// Space whose protection was changed
    space: &'s S,
    /// Start of the unlocked range
    address: usize,
    /// Length of the unlocked range
    len: usize,
}

impl<'s, S: AddressSpace + ?Sized> ProtectionGuard<'s, S> {
    /// Makes `address..address + len` writable
    pub fn unlock(space: &'s S, address: usize, len: usize) -> Result<Self, MemoryError> {
        space.protect(address, len, WRITABLE)?;
        Ok(Self {
            space,
            address,
            len,
        })
    }

    /// Start of the unlocked range
    pub fn address(&self) -> usize {
        self.address
    }

    /// Writes `data` at the start of the unlocked range
    ///
    /// # Safety
    ///
    /// See [`AddressSpace::write`].
    pub unsafe fn write(&self, data: &[u8]) -> Result<(), MemoryError> {
        debug_assert!(data.len() <= self.len);
        self.space.write(self.address, data)
    }
}

impl<S: AddressSpace + ?Sized> Drop for ProtectionGuard<'_, S> {
    fn drop(&mut self) {
        if let Err(e) = self.space.protect(self.address, self.len, RESTORED) {
            warn!(
                address = format_args!("{:#x}", self.address),
                len = self.len,
                error = %e,
                "failed to restore memory protection"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use region::Protection;

    use crate::memory::{AddressSpace, LocalSpace, SimulatedSpace};
    use crate::patcher::mem::{ProtectionGuard, RESTORED, WRITABLE};

    #[test]
    /// Protection is widened for the guard's lifetime and narrowed afterwards
    fn test_guard() {
        let space = SimulatedSpace::new(0x1000, vec![0; 8]);
        {
            let guard = ProtectionGuard::unlock(&space, 0x1002, 2).unwrap();
            assert_eq!(space.protection_at(0x1002), Some(WRITABLE));
            unsafe { guard.write(&[7, 7]).unwrap() };
        }
        assert_eq!(space.protection_at(0x1002), Some(RESTORED));
        assert_eq!(space.slice(0x1000, 4), vec![0, 0, 7, 7]);
        assert_eq!(
            space.protects(),
            vec![(0x1002, 2, WRITABLE), (0x1002, 2, RESTORED)]
        );
    }

    #[test]
    fn test_unlock_failure() {
        let space = SimulatedSpace::new(0x1000, vec![0; 8]).fail_protect(WRITABLE);
        assert!(ProtectionGuard::unlock(&space, 0x1000, 4).is_err());
        // nothing to restore when nothing was widened
        assert_eq!(space.protects().len(), 1);
    }

    #[test]
    /// A failed restore is swallowed
    fn test_restore_failure() {
        let space = SimulatedSpace::new(0x1000, vec![0; 8]).fail_protect(RESTORED);
        {
            let guard = ProtectionGuard::unlock(&space, 0x1000, 1).unwrap();
            unsafe { guard.write(&[1]).unwrap() };
        }
        assert_eq!(space.bytes()[0], 1);
        assert_eq!(space.protection_at(0x1000), Some(WRITABLE));
    }

    #[test]
    /// Tests to ensure permissions are actually set on real pages
    fn test_local_perms() {
        let page = region::alloc(region::page::size(), Protection::READ_EXECUTE).unwrap();
        let address = page.as_ptr::<u8>() as usize;
        let space = LocalSpace::new();

        {
            let guard = ProtectionGuard::unlock(&space, address, 4).unwrap();
            let region = region::query(address as *const u8).unwrap();
            assert_eq!(region.protection(), Protection::READ_WRITE);
            unsafe { guard.write(&[0xc3, 0x90, 0x90, 0x90]).unwrap() };
        }

        let region = region::query(address as *const u8).unwrap();
        assert_eq!(region.protection(), Protection::READ_EXECUTE);
        let mut buf = [0u8; 4];
        space.read(address, &mut buf).unwrap();
        assert_eq!(buf, [0xc3, 0x90, 0x90, 0x90]);
    }
}
