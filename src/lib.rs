#![warn(clippy::missing_docs_in_private_items)]
#![warn(rustdoc::missing_crate_level_docs)]
#![doc = include_str!("../README.md")]

pub mod address;
pub mod engine;
pub mod memory;
pub mod patch;
pub mod patcher;
pub mod pattern;
pub mod scan;

pub use address::{AddressResolver, FixedImage, ProcessImage};
pub use engine::{PatchEngine, ScanOptions, ScanRange, ScanReport};
pub use memory::{AddressSpace, LocalSpace, SimulatedSpace};
pub use patch::{PatchDescriptor, PatchSpec, PatchState};
pub use patcher::{SkipReason, WriteMode, WriteOutcome};
