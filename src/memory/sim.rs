//! In-memory address space for exercising scans and patches without touching real memory

use std::cell::RefCell;
use std::ops::Range;

use region::Protection;

use super::{AddressSpace, MemoryError};

/// A flat block of bytes mapped at a fixed base address.
///
/// Every byte carries its own protection (initially read/execute, like a text segment) and writes are refused
/// unless the target is writable. Reads are recorded so callers can check exactly what a scan touched, and
/// faults can be injected for reads and protection changes.
#[derive(Debug)]
pub struct SimulatedSpace {
    /// Runtime address of the first byte
    base: usize,
    /// Contents of the space
    bytes: RefCell<Vec<u8>>,
    /// Protection of each byte in `bytes`
    protections: RefCell<Vec<Protection>>,
    /// Every successful or failed read, as `(address, len)`
    reads: RefCell<Vec<(usize, usize)>>,
    /// Every protection change that was requested, as `(address, len, protection)`
    protects: RefCell<Vec<(usize, usize, Protection)>>,
    /// Reads overlapping this range fail
    read_fault: Option<Range<usize>>,
    /// Protection changes to any of these protections fail
    protect_faults: Vec<Protection>,
}

impl SimulatedSpace {
    /// Maps `bytes` at `base`
    pub fn new(base: usize, bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        let protections = vec![Protection::READ_EXECUTE; bytes.len()];
        Self {
            base,
            bytes: RefCell::new(bytes),
            protections: RefCell::new(protections),
            reads: RefCell::default(),
            protects: RefCell::default(),
            read_fault: None,
            protect_faults: Vec::new(),
        }
    }

    /// Makes every read overlapping `range` fail
    pub fn fail_reads(mut self, range: Range<usize>) -> Self {
        self.read_fault = Some(range);
        self
    }

    /// Makes every request to change protection to `protection` fail
    pub fn fail_protect(mut self, protection: Protection) -> Self {
        self.protect_faults.push(protection);
        self
    }

    /// Runtime address range covered by the space
    pub fn range(&self) -> Range<usize> {
        self.base..self.base + self.bytes.borrow().len()
    }

    /// Snapshot of the current contents
    pub fn bytes(&self) -> Vec<u8> {
        self.bytes.borrow().clone()
    }

    /// Copy of `len` bytes at `address`, panicking when out of range
    pub fn slice(&self, address: usize, len: usize) -> Vec<u8> {
        let start = address - self.base;
        self.bytes.borrow()[start..start + len].to_vec()
    }

    /// Protection currently applied to the byte at `address`
    pub fn protection_at(&self, address: usize) -> Option<Protection> {
        let index = address.checked_sub(self.base)?;
        self.protections.borrow().get(index).copied()
    }

    /// Reads issued so far, in order
    pub fn reads(&self) -> Vec<(usize, usize)> {
        self.reads.borrow().clone()
    }

    /// Protection changes requested so far, in order
    pub fn protects(&self) -> Vec<(usize, usize, Protection)> {
        self.protects.borrow().clone()
    }

    /// Translates `address..address + len` into an index range of `bytes`
    fn index_range(&self, address: usize, len: usize) -> Result<Range<usize>, MemoryError> {
        let out_of_bounds = || MemoryError::OutOfBounds { address, len };
        let start = address.checked_sub(self.base).ok_or_else(out_of_bounds)?;
        let end = start.checked_add(len).ok_or_else(out_of_bounds)?;
        if end > self.bytes.borrow().len() {
            return Err(out_of_bounds());
        }
        Ok(start..end)
    }
}

impl AddressSpace for SimulatedSpace {
    fn read(&self, address: usize, buf: &mut [u8]) -> Result<(), MemoryError> {
        self.reads.borrow_mut().push((address, buf.len()));

        if let Some(fault) = &self.read_fault {
            if address < fault.end && fault.start < address + buf.len() {
                return Err(MemoryError::Injected(address));
            }
        }

        let range = self.index_range(address, buf.len())?;
        let readable = self.protections.borrow()[range.clone()]
            .iter()
            .all(|p| p.contains(Protection::READ));
        if !readable {
            return Err(MemoryError::Unreadable {
                address,
                len: buf.len(),
            });
        }
        buf.copy_from_slice(&self.bytes.borrow()[range]);
        Ok(())
    }

    unsafe fn write(&self, address: usize, data: &[u8]) -> Result<(), MemoryError> {
        let range = self.index_range(address, data.len())?;
        let writable = self.protections.borrow()[range.clone()]
            .iter()
            .all(|p| p.contains(Protection::WRITE));
        if !writable {
            // the real thing would fault here
            return Err(MemoryError::Injected(address));
        }
        self.bytes.borrow_mut()[range].copy_from_slice(data);
        Ok(())
    }

    fn protect(
        &self,
        address: usize,
        len: usize,
        protection: Protection,
    ) -> Result<(), MemoryError> {
        self.protects.borrow_mut().push((address, len, protection));
        if self.protect_faults.contains(&protection) {
            return Err(MemoryError::Injected(address));
        }
        let range = self.index_range(address, len)?;
        self.protections.borrow_mut()[range].fill(protection);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use region::Protection;

    use crate::memory::{AddressSpace, MemoryError, SimulatedSpace};

    #[test]
    fn test_read_records() {
        let space = SimulatedSpace::new(0x1000, vec![1, 2, 3, 4, 5]);
        let mut buf = [0u8; 2];
        space.read(0x1002, &mut buf).unwrap();
        assert_eq!(buf, [3, 4]);
        assert_eq!(space.reads(), vec![(0x1002, 2)]);

        let mut buf = [0u8; 4];
        assert!(matches!(
            space.read(0x1003, &mut buf),
            Err(MemoryError::OutOfBounds { .. })
        ));
    }

    #[test]
    /// Writes only land on bytes that were made writable
    fn test_write_requires_protection() {
        let space = SimulatedSpace::new(0x1000, vec![0; 8]);
        assert!(unsafe { space.write(0x1000, &[9]) }.is_err());
        assert_eq!(space.bytes(), vec![0; 8]);

        space.protect(0x1000, 2, Protection::READ_WRITE).unwrap();
        unsafe { space.write(0x1000, &[9, 9]).unwrap() };
        assert_eq!(space.slice(0x1000, 3), vec![9, 9, 0]);
        assert_eq!(space.protection_at(0x1002), Some(Protection::READ_EXECUTE));
    }

    #[test]
    fn test_injected_faults() {
        let space = SimulatedSpace::new(0x1000, vec![0; 16])
            .fail_reads(0x1008..0x1009)
            .fail_protect(Protection::READ_WRITE);

        let mut buf = [0u8; 8];
        assert!(space.read(0x1000, &mut buf).is_ok());
        assert!(matches!(
            space.read(0x1004, &mut buf),
            Err(MemoryError::Injected(0x1004))
        ));
        assert!(space.protect(0x1000, 1, Protection::READ_WRITE).is_err());
        assert!(space.protect(0x1000, 1, Protection::READ).is_ok());
    }
}
