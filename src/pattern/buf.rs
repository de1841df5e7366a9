//! Fixed-capacity byte buffer used for decoded patterns and captured bytes

use std::fmt;
use std::ops::Deref;

use thiserror::Error;

/// Returned when a [`BoundedBuf`] would grow past its capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{len} bytes do not fit in a buffer of capacity {capacity}")]
pub struct CapacityError {
    /// Number of bytes that were offered
    pub len: usize,
    /// Capacity of the buffer
    pub capacity: usize,
}

/// Inline byte buffer holding at most `N` bytes.
///
/// Construction fails instead of truncating, so a `BoundedBuf` always holds exactly the bytes it was given.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BoundedBuf<const N: usize> {
    /// Backing storage, only `..len` is meaningful
    data: [u8; N],
    /// Number of initialized bytes
    len: usize,
}

impl<const N: usize> BoundedBuf<N> {
    /// Capacity of this buffer type
    pub const CAPACITY: usize = N;

    /// Creates an empty buffer
    pub const fn new() -> Self {
        Self {
            data: [0; N],
            len: 0,
        }
    }

    /// Copies `bytes` into a new buffer
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CapacityError> {
        let mut buf = Self::new();
        buf.extend_from_slice(bytes)?;
        Ok(buf)
    }

    /// Creates a buffer of `len` zero bytes, to be filled in through [`BoundedBuf::as_mut_slice`]
    pub fn zeroed(len: usize) -> Result<Self, CapacityError> {
        if len > N {
            return Err(CapacityError { len, capacity: N });
        }
        Ok(Self { data: [0; N], len })
    }

    /// Appends `bytes`, leaving the buffer untouched if they do not fit
    pub fn extend_from_slice(&mut self, bytes: &[u8]) -> Result<(), CapacityError> {
        let new_len = self.len + bytes.len();
        if new_len > N {
            return Err(CapacityError {
                len: new_len,
                capacity: N,
            });
        }
        self.data[self.len..new_len].copy_from_slice(bytes);
        self.len = new_len;
        Ok(())
    }

    /// Mutable view of the initialized bytes
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[..self.len]
    }

    /// Immutable view of the initialized bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

impl<const N: usize> Default for BoundedBuf<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Deref for BoundedBuf<N> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl<const N: usize> AsRef<[u8]> for BoundedBuf<N> {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl<const N: usize> TryFrom<&[u8]> for BoundedBuf<N> {
    type Error = CapacityError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        Self::from_slice(bytes)
    }
}

impl<const N: usize> fmt::Debug for BoundedBuf<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BoundedBuf<{N}>({:02x?})", self.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::{BoundedBuf, CapacityError};

    #[test]
    fn test_from_slice() {
        let buf = BoundedBuf::<4>::from_slice(&[1, 2, 3]).unwrap();
        assert_eq!(buf.len(), 3);
        assert_eq!(&buf[..], &[1, 2, 3]);
    }

    #[test]
    /// Overflow must fail instead of truncating
    fn test_overflow() {
        let err = BoundedBuf::<4>::from_slice(&[0; 5]).unwrap_err();
        assert_eq!(
            err,
            CapacityError {
                len: 5,
                capacity: 4
            }
        );

        let mut buf = BoundedBuf::<4>::from_slice(&[9, 9, 9]).unwrap();
        assert!(buf.extend_from_slice(&[1, 2]).is_err());
        // failed extend leaves the contents alone
        assert_eq!(&buf[..], &[9, 9, 9]);
        assert!(buf.extend_from_slice(&[1]).is_ok());
        assert_eq!(&buf[..], &[9, 9, 9, 1]);
    }

    #[test]
    fn test_zeroed() {
        let mut buf = BoundedBuf::<8>::zeroed(3).unwrap();
        assert_eq!(&buf[..], &[0, 0, 0]);
        buf.as_mut_slice()[1] = 7;
        assert_eq!(&buf[..], &[0, 7, 0]);
        assert!(BoundedBuf::<8>::zeroed(9).is_err());
    }
}
