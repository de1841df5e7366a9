//! # Scan
//!
//! Matching of decoded search patterns against windows of memory

use tracing::{info, trace};

use crate::address::AddressResolver;
use crate::memory::chunk::Window;
use crate::patch::{PatchDescriptor, UNRESOLVED};
use crate::pattern::PatternBytes;

/// Search patterns of one batch of descriptors, indexed like the batch.
///
/// A slot is `None` when its descriptor does not take part in the scan (bad pattern, or already resolved) or has
/// been found.
pub struct Matcher {
    /// Patterns still being searched for
    slots: Vec<Option<PatternBytes>>,
    /// Number of `Some` slots
    pending: usize,
    /// Length of the longest pattern in the batch
    longest: usize,
}

impl Matcher {
    /// Creates a matcher over one pattern slot per descriptor
    pub fn new(slots: Vec<Option<PatternBytes>>) -> Self {
        let pending = slots.iter().filter(|slot| slot.is_some()).count();
        let longest = slots.iter().flatten().map(|p| p.len()).max().unwrap_or(0);
        Self {
            slots,
            pending,
            longest,
        }
    }

    /// Number of patterns not found yet
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Whether every pattern has been found
    pub fn is_done(&self) -> bool {
        self.pending == 0
    }

    /// Bytes a reader has to carry between windows so no match straddling a chunk edge is lost
    pub fn carry(&self) -> usize {
        self.longest.saturating_sub(1)
    }

    /// Searches one window, resolving `descriptors[n]` on the first hit of pattern `n`.
    ///
    /// Only the first byte is compared at most offsets; the rest of a pattern is compared only when its first byte
    /// matches. Matches lying entirely in bytes carried from an earlier window were already considered there and
    /// are skipped. Returns the number of descriptors resolved by this window.
    pub fn scan<R: AddressResolver + ?Sized>(
        &mut self,
        window: &Window<'_>,
        descriptors: &mut [PatchDescriptor],
        resolver: &R,
    ) -> usize {
        let bytes = window.bytes;
        let mut resolved = 0;

        for (offset, &byte) in bytes.iter().enumerate() {
            for (index, slot) in self.slots.iter_mut().enumerate() {
                let Some(pattern) = slot else {
                    continue;
                };
                if pattern[0] != byte {
                    continue;
                }
                let len = pattern.len();
                // an incomplete tail is carried into the next window
                if offset + len > bytes.len() || window.seen_before(offset, len) {
                    continue;
                }
                if bytes[offset + 1..offset + len] != pattern[1..] {
                    continue;
                }

                let runtime = window.base + offset;
                let address = resolver.to_static(runtime);
                if address == UNRESOLVED {
                    trace!(index, "ignoring match at the sentinel address");
                    continue;
                }

                let descriptor = &mut descriptors[index];
                descriptor.resolve(address, *pattern);
                info!(
                    name = descriptor.name(),
                    address = format_args!("{address:#x}"),
                    runtime = format_args!("{runtime:#x}"),
                    "found patch site"
                );

                *slot = None;
                self.pending -= 1;
                resolved += 1;
                if self.pending == 0 {
                    return resolved;
                }
            }
        }

        resolved
    }
}
