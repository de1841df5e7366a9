//! # Address
//!
//! Translation between static addresses (as a disassembler shows them) and runtime addresses (where the
//! loaded image actually lives once ASLR has slid it)

pub mod process;

use thiserror::Error;

pub use process::ProcessImage;

/// Errors when locating the primary loaded image
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    /// The loader did not report any image
    #[error("no loaded image found")]
    NoImage,
    /// Locating the image is not implemented for this platform
    #[error("locating the loaded image is not supported on this platform")]
    Unsupported,
}

/// Resolves addresses of one loaded image.
///
/// Every address stored in a [`crate::patch::PatchDescriptor`] is static; it goes through
/// [`AddressResolver::to_runtime`] right before memory is touched.
pub trait AddressResolver {
    /// Whether the image is position independent and was loaded with a bias
    fn has_bias(&self) -> bool;
    /// Runtime load offset of the image
    fn bias(&self) -> usize;
    /// Static (link-time) address of the start of the image
    fn image_base(&self) -> usize;

    /// Adds the bias to a static address when the image is biased
    fn to_runtime(&self, address: usize) -> usize {
        if self.has_bias() {
            address.wrapping_add(self.bias())
        } else {
            address
        }
    }

    /// Inverse of [`AddressResolver::to_runtime`]
    fn to_static(&self, address: usize) -> usize {
        if self.has_bias() {
            address.wrapping_sub(self.bias())
        } else {
            address
        }
    }
}

impl<R: AddressResolver + ?Sized> AddressResolver for &R {
    fn has_bias(&self) -> bool {
        (**self).has_bias()
    }

    fn bias(&self) -> usize {
        (**self).bias()
    }

    fn image_base(&self) -> usize {
        (**self).image_base()
    }
}

/// Image with a layout known up front.
///
/// Useful when the layout comes from somewhere other than the loader, and for driving a
/// [`crate::memory::SimulatedSpace`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedImage {
    /// Static base of the image
    image_base: usize,
    /// Load bias, `None` for images that are not position independent
    bias: Option<usize>,
}

impl FixedImage {
    /// Creates an image loaded at its link address
    pub fn new(image_base: usize) -> Self {
        Self {
            image_base,
            bias: None,
        }
    }

    /// Sets the load bias of the image
    pub fn with_bias(mut self, bias: usize) -> Self {
        self.bias = Some(bias);
        self
    }
}

impl AddressResolver for FixedImage {
    fn has_bias(&self) -> bool {
        self.bias.is_some()
    }

    fn bias(&self) -> usize {
        self.bias.unwrap_or(0)
    }

    fn image_base(&self) -> usize {
        self.image_base
    }
}

#[cfg(test)]
mod tests {
    use super::{AddressResolver, FixedImage, ProcessImage};

    #[test]
    fn test_unbiased() {
        let image = FixedImage::new(0x1_0000_0000);
        assert!(!image.has_bias());
        assert_eq!(image.bias(), 0);
        assert_eq!(image.to_runtime(0x1_0000_4000), 0x1_0000_4000);
        assert_eq!(image.to_static(0x1_0000_4000), 0x1_0000_4000);
    }

    #[test]
    fn test_biased() {
        let image = FixedImage::new(0x1_0000_0000).with_bias(0x4c000);
        assert!(image.has_bias());
        assert_eq!(image.to_runtime(0x1_0000_4000), 0x1_0005_0000);
        assert_eq!(image.to_static(0x1_0005_0000), 0x1_0000_4000);
    }

    #[test]
    /// Resolvers are usable through references
    fn test_by_ref() {
        let image = FixedImage::new(0).with_bias(0x10);
        let by_ref = &image;
        assert_eq!(by_ref.to_runtime(1), 0x11);
    }

    #[test]
    #[cfg(any(target_os = "linux", target_os = "macos"))]
    /// The test binary itself is a loaded image, so its layout must round-trip
    fn test_current_process() {
        let image = ProcessImage::current().unwrap();
        let runtime = image.to_runtime(image.image_base());
        assert_eq!(image.to_static(runtime), image.image_base());

        // the start of the image is mapped and readable
        let region = region::query(runtime as *const u8).unwrap();
        assert!(region.is_readable());
    }
}
