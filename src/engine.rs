//! # Engine
//!
//! Drives search, capture, apply and revert over a batch of patch descriptors

use std::num::NonZeroUsize;
use std::ops::Range;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::address::AddressResolver;
use crate::memory::chunk::{ChunkReadError, ChunkReader};
use crate::memory::{AddressSpace, MemoryError};
use crate::patch::{PatchDescriptor, PatchState};
use crate::patcher::{self, WriteError, WriteMode, WriteOutcome};
use crate::pattern::{self, PatternBytes};
use crate::scan::Matcher;

/// Default number of bytes read per chunk
pub const DEFAULT_CHUNK_SIZE: NonZeroUsize = match NonZeroUsize::new(0x10000) {
    Some(size) => size,
    None => panic!("chunk size must be non-zero"),
};

/// Errors from engine operations
#[derive(Debug, Error)]
pub enum Error {
    /// A chunk read failed and the scan was aborted
    #[error("scan aborted")]
    Scan(#[from] ChunkReadError),
    /// Reading back original bytes failed and the rest of the batch was abandoned
    #[error("reading original bytes of `{name}` at {address:#x} failed")]
    Read {
        /// Descriptor name
        name: String,
        /// Runtime address of the read
        address: usize,
        /// Underlying failure
        #[source]
        source: MemoryError,
    },
    /// Writing one descriptor failed
    #[error(transparent)]
    Write(#[from] WriteError),
}

/// Tunables of a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    /// Bytes read per chunk. Patterns longer than a chunk are still found thanks to carry-over.
    pub chunk_size: NonZeroUsize,
    /// Keep descriptors that are already captured instead of searching for them again
    pub reuse_resolved: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            reuse_resolved: false,
        }
    }
}

impl ScanOptions {
    /// Sets the chunk size
    pub fn with_chunk_size(mut self, chunk_size: NonZeroUsize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Keeps captured descriptors across scans
    pub fn with_reuse_resolved(mut self, reuse_resolved: bool) -> Self {
        self.reuse_resolved = reuse_resolved;
        self
    }
}

/// Half-open range of runtime addresses to scan; `start <= end` always holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanRange {
    /// First address
    start: usize,
    /// One past the last address
    end: usize,
}

impl ScanRange {
    /// Creates a range, empty if `end <= start`
    pub fn new(start: usize, end: usize) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    /// The first `size` bytes of the image `resolver` describes, at its runtime location
    pub fn image<R: AddressResolver + ?Sized>(resolver: &R, size: usize) -> Self {
        let start = resolver.to_runtime(resolver.image_base());
        Self::new(start, start.saturating_add(size))
    }

    /// First address
    pub fn start(&self) -> usize {
        self.start
    }

    /// One past the last address
    pub fn end(&self) -> usize {
        self.end
    }

    /// Number of bytes in the range
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Whether the range holds no bytes
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

impl From<Range<usize>> for ScanRange {
    fn from(range: Range<usize>) -> Self {
        Self::new(range.start, range.end)
    }
}

impl From<ScanRange> for Range<usize> {
    fn from(range: ScanRange) -> Self {
        range.start..range.end
    }
}

/// What a completed scan did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Descriptors resolved by this scan
    pub resolved: usize,
    /// Descriptors kept from an earlier scan
    pub reused: usize,
    /// Descriptors with a caller-supplied address, not searched for
    pub known: usize,
    /// Descriptors still unresolved that took part in the scan
    pub missing: usize,
    /// Indices of descriptors whose search pattern does not decode
    pub skipped: Vec<usize>,
    /// Number of chunk reads issued
    pub chunks_read: usize,
    /// Number of bytes read
    pub bytes_read: usize,
    /// Whether the scan stopped before the end of the range because everything was found
    pub early_exit: bool,
}

/// Searches for and patches descriptors in one address space.
///
/// Addresses stored in descriptors are static; `resolver` turns them into runtime addresses of `space`.
pub struct PatchEngine<S, R> {
    /// Memory being searched and patched
    space: S,
    /// Layout of the image being searched
    resolver: R,
    /// Scan tunables
    options: ScanOptions,
}

impl<S: AddressSpace, R: AddressResolver> PatchEngine<S, R> {
    /// Creates an engine with default options
    pub fn new(space: S, resolver: R) -> Self {
        Self {
            space,
            resolver,
            options: ScanOptions::default(),
        }
    }

    /// Replaces the scan options
    pub fn with_options(mut self, options: ScanOptions) -> Self {
        self.options = options;
        self
    }

    /// Memory being patched
    pub fn space(&self) -> &S {
        &self.space
    }

    /// Image layout in use
    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    /// Scan options in use
    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Searches the first `size` bytes of the image for every descriptor.
    ///
    /// See [`PatchEngine::search_range`].
    pub fn search(
        &self,
        descriptors: &mut [PatchDescriptor],
        size: usize,
    ) -> Result<ScanReport, Error> {
        self.search_range(descriptors, ScanRange::image(&self.resolver, size))
    }

    /// Searches `range` for every descriptor's search pattern.
    ///
    /// Each descriptor resolves to its first match and captures the matched bytes. Descriptors whose pattern does
    /// not decode are skipped without affecting the others. The scan stops reading as soon as every searchable
    /// descriptor is resolved. A failed read aborts the scan; descriptors resolved before it keep their result.
    ///
    /// Unless [`ScanOptions::reuse_resolved`] is set, every descriptor is reset and searched again, losing any
    /// captured bytes. Revert applied patches before rescanning. Descriptors with a known address (see
    /// [`PatchDescriptor::with_address`]) keep it and are never searched for.
    pub fn search_range(
        &self,
        descriptors: &mut [PatchDescriptor],
        range: ScanRange,
    ) -> Result<ScanReport, Error> {
        let mut report = ScanReport::default();

        let mut slots = Vec::with_capacity(descriptors.len());
        for (index, descriptor) in descriptors.iter_mut().enumerate() {
            if self.options.reuse_resolved && descriptor.is_captured() {
                report.reused += 1;
                slots.push(None);
                continue;
            }
            descriptor.reset();
            if descriptor.address().is_some() {
                report.known += 1;
                slots.push(None);
                continue;
            }
            match pattern::decode(descriptor.search()) {
                Ok(pattern) => slots.push(Some(pattern)),
                Err(e) => {
                    warn!(name = descriptor.name(), error = %e, "skipping invalid search pattern");
                    report.skipped.push(index);
                    slots.push(None);
                }
            }
        }

        let mut matcher = Matcher::new(slots);
        if matcher.is_done() {
            debug!("nothing to search for");
            return Ok(report);
        }

        info!(
            start = format_args!("{:#x}", range.start),
            end = format_args!("{:#x}", range.end),
            chunk_size = format_args!("{:#x}", self.options.chunk_size),
            patterns = matcher.pending(),
            "scanning"
        );

        let mut reader = ChunkReader::new(
            &self.space,
            range.into(),
            self.options.chunk_size,
            matcher.carry(),
        );
        while !matcher.is_done() {
            let window = match reader.next_window() {
                Ok(Some(window)) => window,
                Ok(None) => break,
                Err(e) => {
                    warn!(
                        address = format_args!("{:#x}", e.address),
                        error = %e.source,
                        "read failed, aborting scan"
                    );
                    return Err(e.into());
                }
            };
            report.resolved += matcher.scan(&window, descriptors, &self.resolver);
        }

        report.missing = matcher.pending();
        report.chunks_read = reader.chunks_read();
        report.bytes_read = reader.bytes_read();
        report.early_exit = matcher.is_done() && report.bytes_read < range.len();

        if report.missing > 0 {
            let missing = descriptors
                .iter()
                .enumerate()
                .filter(|(i, d)| d.address().is_none() && !report.skipped.contains(i))
                .map(|(_, d)| d.name());
            for name in missing {
                warn!(name, "search pattern not found");
            }
        }
        Ok(report)
    }

    /// Captures the current bytes at every descriptor's address.
    ///
    /// The length read is that of the decoded search pattern. Unresolved descriptors and descriptors with an
    /// invalid search pattern are skipped. A failed read abandons the rest of the batch; descriptors captured
    /// before it keep their bytes. Returns the number of descriptors captured.
    pub fn read_original(&self, descriptors: &mut [PatchDescriptor]) -> Result<usize, Error> {
        let mut captured = 0;

        for descriptor in descriptors.iter_mut() {
            let address = match descriptor.state() {
                PatchState::Unresolved => {
                    debug!(name = descriptor.name(), "address not set, skipping");
                    continue;
                }
                PatchState::Resolved { address } | PatchState::Captured { address, .. } => *address,
            };
            let len = match pattern::decoded_len(descriptor.search()) {
                Some(len) => len,
                None => {
                    warn!(name = descriptor.name(), "search pattern is not valid, skipping");
                    continue;
                }
            };

            let runtime = self.resolver.to_runtime(address);
            let mut original = PatternBytes::zeroed(len).unwrap_or_default();
            if let Err(source) = self.space.read(runtime, original.as_mut_slice()) {
                warn!(
                    name = descriptor.name(),
                    address = format_args!("{runtime:#x}"),
                    error = %source,
                    "read failed, abandoning batch"
                );
                return Err(Error::Read {
                    name: descriptor.name().to_owned(),
                    address: runtime,
                    source,
                });
            }
            descriptor.capture(original);
            captured += 1;
        }

        Ok(captured)
    }

    /// Writes one descriptor in `mode`; see [`patcher::write`]
    ///
    /// # Safety
    ///
    /// See [`patcher::write`].
    pub unsafe fn write(
        &self,
        descriptor: &PatchDescriptor,
        mode: WriteMode,
    ) -> Result<WriteOutcome, Error> {
        Ok(patcher::write(&self.space, &self.resolver, descriptor, mode)?)
    }

    /// Writes the replacement bytes of one descriptor
    ///
    /// # Safety
    ///
    /// See [`patcher::write`].
    pub unsafe fn apply(&self, descriptor: &PatchDescriptor) -> Result<WriteOutcome, Error> {
        self.write(descriptor, WriteMode::Replace)
    }

    /// Writes the captured original bytes of one descriptor back
    ///
    /// # Safety
    ///
    /// See [`patcher::write`].
    pub unsafe fn revert(&self, descriptor: &PatchDescriptor) -> Result<WriteOutcome, Error> {
        self.write(descriptor, WriteMode::Revert)
    }

    /// Writes every descriptor in `mode`; one failure does not stop the others
    ///
    /// # Safety
    ///
    /// See [`patcher::write`].
    pub unsafe fn write_all(
        &self,
        descriptors: &[PatchDescriptor],
        mode: WriteMode,
    ) -> Vec<Result<WriteOutcome, Error>> {
        descriptors
            .iter()
            .map(|descriptor| {
                let result = self.write(descriptor, mode);
                if let Err(e) = &result {
                    warn!(name = descriptor.name(), ?mode, error = %e, "patch write failed");
                }
                result
            })
            .collect()
    }

    /// Applies every descriptor
    ///
    /// # Safety
    ///
    /// See [`patcher::write`].
    pub unsafe fn apply_all(
        &self,
        descriptors: &[PatchDescriptor],
    ) -> Vec<Result<WriteOutcome, Error>> {
        self.write_all(descriptors, WriteMode::Replace)
    }

    /// Reverts every descriptor
    ///
    /// # Safety
    ///
    /// See [`patcher::write`].
    pub unsafe fn revert_all(
        &self,
        descriptors: &[PatchDescriptor],
    ) -> Vec<Result<WriteOutcome, Error>> {
        self.write_all(descriptors, WriteMode::Revert)
    }
}
