//! # Patch
//!
//! Named patch descriptors and the resolution state the engine moves them through

use crate::pattern::PatternBytes;

/// Static address meaning "not resolved"; never a legitimate target
pub const UNRESOLVED: usize = 0;

/// Where a descriptor stands.
///
/// Only the engine moves a descriptor forward: a scan takes it straight from `Unresolved` to `Captured`,
/// [`crate::engine::PatchEngine::read_original`] takes it from `Resolved` to `Captured`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PatchState {
    /// No address known
    #[default]
    Unresolved,
    /// Static address known, original bytes not captured yet
    Resolved {
        /// Static address of the search site
        address: usize,
    },
    /// Static address known and the bytes there captured
    Captured {
        /// Static address of the search site
        address: usize,
        /// Bytes found at the search site; written back on revert
        original: PatternBytes,
    },
}

/// One named patch: what to search for, what to write and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchDescriptor {
    /// Name used in diagnostics
    name: String,
    /// Hex text of the bytes to search for
    search: String,
    /// Hex text of the bytes to write
    replace: String,
    /// Added to the search site to get the write site, on replace only
    relocation_offset: isize,
    /// Caller-supplied static address; survives a reset
    known_address: Option<usize>,
    /// Resolution state
    state: PatchState,
}

impl PatchDescriptor {
    /// Creates an unresolved descriptor.
    ///
    /// Patterns are hex text of at most 128 characters. They are only validated when used, so one bad pattern
    /// never keeps the others in a batch from resolving.
    pub fn new(
        name: impl Into<String>,
        search: impl Into<String>,
        replace: impl Into<String>,
        relocation_offset: isize,
    ) -> Self {
        Self {
            name: name.into(),
            search: search.into(),
            replace: replace.into(),
            relocation_offset,
            known_address: None,
            state: PatchState::Unresolved,
        }
    }

    /// Sets a known static address (e.g. taken from a disassembler), skipping the search.
    ///
    /// Scans never search for or overwrite a known address. [`UNRESOLVED`] leaves the descriptor unresolved.
    pub fn with_address(mut self, address: usize) -> Self {
        self.known_address = (address != UNRESOLVED).then_some(address);
        self.state = Self::initial_state(self.known_address);
        self
    }

    /// State before any scan or capture
    fn initial_state(known_address: Option<usize>) -> PatchState {
        match known_address {
            Some(address) => PatchState::Resolved { address },
            None => PatchState::Unresolved,
        }
    }

    /// Name of the patch
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hex text searched for
    pub fn search(&self) -> &str {
        &self.search
    }

    /// Hex text written on replace
    pub fn replace(&self) -> &str {
        &self.replace
    }

    /// Offset from the search site to the write site
    pub fn relocation_offset(&self) -> isize {
        self.relocation_offset
    }

    /// Address set with [`PatchDescriptor::with_address`]
    pub fn known_address(&self) -> Option<usize> {
        self.known_address
    }

    /// Current resolution state
    pub fn state(&self) -> &PatchState {
        &self.state
    }

    /// Static address of the search site, if resolved
    pub fn address(&self) -> Option<usize> {
        match self.state {
            PatchState::Unresolved => None,
            PatchState::Resolved { address } | PatchState::Captured { address, .. } => {
                Some(address)
            }
        }
    }

    /// Bytes captured at the search site
    pub fn original(&self) -> Option<&[u8]> {
        match &self.state {
            PatchState::Captured { original, .. } => Some(original),
            _ => None,
        }
    }

    /// Whether both address and original bytes are known
    pub fn is_captured(&self) -> bool {
        matches!(self.state, PatchState::Captured { .. })
    }

    /// Records a search hit
    pub(crate) fn resolve(&mut self, address: usize, original: PatternBytes) {
        debug_assert_ne!(address, UNRESOLVED);
        self.state = PatchState::Captured { address, original };
    }

    /// Replaces the captured bytes, keeping the address. Does nothing while unresolved.
    pub(crate) fn capture(&mut self, original: PatternBytes) {
        if let Some(address) = self.address() {
            self.state = PatchState::Captured { address, original };
        }
    }

    /// Forgets the captured bytes and any address found by a scan. A known address is kept.
    pub(crate) fn reset(&mut self) {
        self.state = Self::initial_state(self.known_address);
    }
}

/// Patch description as it appears in configuration
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PatchSpec {
    /// Name of the patch
    pub name: String,
    /// Hex text to search for
    pub search: String,
    /// Hex text to write
    pub replace: String,
    /// Offset from the search site to the write site
    #[cfg_attr(feature = "serde", serde(default))]
    pub offset: isize,
    /// Known static address, skipping the search
    #[cfg_attr(feature = "serde", serde(default))]
    pub address: Option<usize>,
}

impl From<PatchSpec> for PatchDescriptor {
    fn from(spec: PatchSpec) -> Self {
        let descriptor = PatchDescriptor::new(spec.name, spec.search, spec.replace, spec.offset);
        match spec.address {
            Some(address) => descriptor.with_address(address),
            None => descriptor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{PatchDescriptor, PatchSpec, PatchState, UNRESOLVED};
    use crate::pattern::PatternBytes;

    #[test]
    fn test_lifecycle() {
        let mut patch = PatchDescriptor::new("nop", "9090", "cccc", 2);
        assert_eq!(patch.state(), &PatchState::Unresolved);
        assert_eq!(patch.address(), None);
        assert_eq!(patch.original(), None);

        patch.resolve(0x4000, PatternBytes::from_slice(&[0x90, 0x90]).unwrap());
        assert!(patch.is_captured());
        assert_eq!(patch.address(), Some(0x4000));
        assert_eq!(patch.original(), Some(&[0x90u8, 0x90][..]));

        patch.reset();
        assert_eq!(patch.state(), &PatchState::Unresolved);
    }

    #[test]
    fn test_known_address() {
        let patch = PatchDescriptor::new("a", "00", "01", 0).with_address(0x1234);
        assert_eq!(patch.state(), &PatchState::Resolved { address: 0x1234 });
        assert!(!patch.is_captured());

        // the sentinel never counts as an address
        let patch = PatchDescriptor::new("b", "00", "01", 0).with_address(UNRESOLVED);
        assert_eq!(patch.address(), None);
    }

    #[test]
    /// Resetting drops captured bytes but keeps an address the caller supplied
    fn test_reset_keeps_known_address() {
        let bytes = PatternBytes::from_slice(&[7]).unwrap();

        let mut patch = PatchDescriptor::new("a", "07", "00", 0).with_address(0x80);
        patch.capture(bytes);
        assert!(patch.is_captured());
        patch.reset();
        assert_eq!(patch.state(), &PatchState::Resolved { address: 0x80 });
        assert_eq!(patch.known_address(), Some(0x80));

        let mut patch = PatchDescriptor::new("b", "07", "00", 0);
        patch.resolve(0x90, bytes);
        patch.reset();
        assert_eq!(patch.state(), &PatchState::Unresolved);
        assert_eq!(patch.known_address(), None);
    }

    #[test]
    /// Capturing needs a known address
    fn test_capture() {
        let bytes = PatternBytes::from_slice(&[1, 2]).unwrap();

        let mut patch = PatchDescriptor::new("a", "0102", "0000", 0);
        patch.capture(bytes);
        assert_eq!(patch.state(), &PatchState::Unresolved);

        let mut patch = patch.with_address(0x10);
        patch.capture(bytes);
        assert_eq!(patch.original(), Some(&[1u8, 2][..]));
    }

    #[test]
    fn test_from_spec() {
        let spec = PatchSpec {
            name: "ret".into(),
            search: "c3".into(),
            replace: "90".into(),
            offset: -4,
            address: Some(0x2000),
        };
        let patch = PatchDescriptor::from(spec);
        assert_eq!(patch.name(), "ret");
        assert_eq!(patch.relocation_offset(), -4);
        assert_eq!(patch.address(), Some(0x2000));
    }

    #[test]
    #[cfg(feature = "serde")]
    fn test_spec_from_json() {
        let specs: Vec<PatchSpec> = serde_json::from_str(
            r#"[{"name": "a", "search": "0a1b", "replace": "0000"},
                {"name": "b", "search": "ff", "replace": "00", "offset": 8}]"#,
        )
        .unwrap();
        assert_eq!(specs[0].offset, 0);
        assert_eq!(specs[0].address, None);
        assert_eq!(specs[1].offset, 8);
    }
}
