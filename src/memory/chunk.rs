//! Bounded, chunked reads over an address range with carry-over between chunks

use std::num::NonZeroUsize;
use std::ops::Range;

use thiserror::Error;

use super::{AddressSpace, MemoryError};

/// A chunk could not be read
#[derive(Debug, Error)]
#[error("reading {len} bytes at {address:#x} failed")]
pub struct ChunkReadError {
    /// Start of the chunk
    pub address: usize,
    /// Length of the chunk
    pub len: usize,
    /// Underlying failure
    #[source]
    pub source: MemoryError,
}

/// Bytes visible after reading one chunk: the tail carried over from earlier chunks followed by the chunk itself
#[derive(Debug, Clone, Copy)]
pub struct Window<'a> {
    /// Runtime address of `bytes[0]`
    pub base: usize,
    /// Carried tail followed by freshly read bytes
    pub bytes: &'a [u8],
    /// Number of leading bytes carried over from earlier windows
    pub carried: usize,
}

impl Window<'_> {
    /// Whether a `len`-byte match starting at `offset` was already visible in an earlier window
    pub fn seen_before(&self, offset: usize, len: usize) -> bool {
        offset + len <= self.carried
    }
}

/// Reads `range` front to back, `chunk_size` bytes at a time.
///
/// The last `carry` bytes of each window are kept in front of the next chunk, so a pattern up to `carry + 1` bytes
/// long is visible in one window even when it straddles a chunk edge, whatever the chunk size.
pub struct ChunkReader<'s, S: AddressSpace + ?Sized> {
    /// Space being read
    space: &'s S,
    /// Next address to read
    next: usize,
    /// End of the range (exclusive)
    end: usize,
    /// Bytes per read
    chunk_size: usize,
    /// Bytes kept from the previous window
    carry: usize,
    /// Current window contents
    buf: Vec<u8>,
    /// Runtime address of `buf[0]`
    base: usize,
    /// Number of reads issued
    chunks: usize,
    /// Number of bytes read
    bytes: usize,
}

impl<'s, S: AddressSpace + ?Sized> ChunkReader<'s, S> {
    /// Creates a reader over `range`, carrying `carry` bytes between windows
    pub fn new(space: &'s S, range: Range<usize>, chunk_size: NonZeroUsize, carry: usize) -> Self {
        Self {
            space,
            next: range.start,
            end: range.end.max(range.start),
            chunk_size: chunk_size.get(),
            carry,
            buf: Vec::with_capacity(chunk_size.get() + carry),
            base: range.start,
            chunks: 0,
            bytes: 0,
        }
    }

    /// Reads the next chunk and returns the resulting window, or `None` once the range is exhausted.
    ///
    /// A failed read ends the iteration: later calls return `None`.
    pub fn next_window(&mut self) -> Result<Option<Window<'_>>, ChunkReadError> {
        if self.next >= self.end {
            return Ok(None);
        }
        let address = self.next;
        let len = self.chunk_size.min(self.end - address);

        // keep the tail of the previous window in front
        let keep = self.carry.min(self.buf.len());
        let dropped = self.buf.len() - keep;
        self.buf.drain(..dropped);
        self.base += dropped;
        if keep == 0 {
            self.base = address;
        }
        self.buf.resize(keep + len, 0);

        self.chunks += 1;
        if let Err(source) = self.space.read(address, &mut self.buf[keep..]) {
            self.next = self.end;
            self.buf.clear();
            return Err(ChunkReadError {
                address,
                len,
                source,
            });
        }
        self.bytes += len;
        self.next = address + len;

        Ok(Some(Window {
            base: self.base,
            bytes: &self.buf,
            carried: keep,
        }))
    }

    /// Number of reads issued so far, including a failed one
    pub fn chunks_read(&self) -> usize {
        self.chunks
    }

    /// Number of bytes successfully read so far
    pub fn bytes_read(&self) -> usize {
        self.bytes
    }
}
