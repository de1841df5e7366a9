//! Layout of the current process's primary image, as reported by the platform loader

use lazy_static::lazy_static;
use tracing::debug;

use super::{AddressResolver, ImageError};

lazy_static! {
    /// The primary image never moves once loaded, so the loader is only asked once
    static ref CURRENT: Result<ProcessImage, ImageError> = ProcessImage::query();
}

/// Primary image (the main executable) of the current process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessImage {
    /// Static base address of the image
    image_base: usize,
    /// Load bias applied by the loader
    bias: usize,
    /// Whether the image is position independent
    pie: bool,
}

impl ProcessImage {
    /// Returns the layout of the current process's primary image
    pub fn current() -> Result<Self, ImageError> {
        CURRENT.clone()
    }

    /// Asks the loader for the primary image
    fn query() -> Result<Self, ImageError> {
        let image = platform::primary_image()?;
        debug!(
            image_base = format_args!("{:#x}", image.image_base),
            bias = format_args!("{:#x}", image.bias),
            pie = image.pie,
            "located primary image"
        );
        Ok(image)
    }
}

impl AddressResolver for ProcessImage {
    fn has_bias(&self) -> bool {
        self.pie
    }

    fn bias(&self) -> usize {
        self.bias
    }

    fn image_base(&self) -> usize {
        self.image_base
    }
}

#[cfg(target_os = "linux")]
mod platform {
    use std::{ptr, slice};

    use super::{ImageError, ProcessImage};

    /// `e_type` of a position independent ELF image
    const ET_DYN: u16 = 3;
    /// Offset of `e_type` within the ELF header
    const E_TYPE_OFFSET: usize = 16;

    /// Collects the layout of the first object `dl_iterate_phdr` reports, which is always the executable
    unsafe extern "C" fn first_object(
        info: *mut libc::dl_phdr_info,
        _size: libc::size_t,
        data: *mut libc::c_void,
    ) -> libc::c_int {
        let out = &mut *(data as *mut Option<ProcessImage>);
        let info = &*info;
        let phdrs = slice::from_raw_parts(info.dlpi_phdr, info.dlpi_phnum as usize);
        let bias = info.dlpi_addr as usize;

        let first_load = phdrs
            .iter()
            .filter(|phdr| phdr.p_type == libc::PT_LOAD)
            .min_by_key(|phdr| phdr.p_vaddr);
        let Some(first_load) = first_load else {
            return 1;
        };

        let page_size = region::page::size();
        let image_base = (first_load.p_vaddr as usize) & !(page_size - 1);

        // The ELF header is mapped at the start of the first segment when that segment begins at file offset 0
        let pie = if first_load.p_offset == 0 {
            let header = bias.wrapping_add(image_base) as *const u8;
            ptr::read_unaligned(header.add(E_TYPE_OFFSET) as *const u16) == ET_DYN
        } else {
            bias != 0
        };

        *out = Some(ProcessImage {
            image_base,
            bias,
            pie,
        });
        // stop after the executable
        1
    }

    /// Layout of the executable, from the loader's program header list
    pub(super) fn primary_image() -> Result<ProcessImage, ImageError> {
        let mut image: Option<ProcessImage> = None;
        // Safety: the callback only touches loader-provided headers and `image`, which outlives the call
        unsafe {
            libc::dl_iterate_phdr(Some(first_object), &mut image as *mut _ as *mut libc::c_void);
        }
        image.ok_or(ImageError::NoImage)
    }
}

#[cfg(target_os = "macos")]
mod platform {
    use super::{ImageError, ProcessImage};

    /// `MH_PIE` flag of a Mach-O header
    const MH_PIE: u32 = 0x0020_0000;

    /// Leading fields shared by the 32 and 64 bit Mach-O headers
    #[repr(C)]
    #[allow(dead_code)]
    struct MachHeader {
        /// Magic number
        magic: u32,
        /// CPU type
        cputype: i32,
        /// CPU subtype
        cpusubtype: i32,
        /// File type
        filetype: u32,
        /// Number of load commands
        ncmds: u32,
        /// Size of the load commands
        sizeofcmds: u32,
        /// Header flags
        flags: u32,
    }

    extern "C" {
        fn _dyld_get_image_header(image_index: u32) -> *const MachHeader;
        fn _dyld_get_image_vmaddr_slide(image_index: u32) -> isize;
    }

    /// Layout of dyld image 0
    pub(super) fn primary_image() -> Result<ProcessImage, ImageError> {
        // Safety: image 0 is the main executable and dyld keeps its header mapped for the process lifetime
        unsafe {
            let header = _dyld_get_image_header(0);
            if header.is_null() {
                return Err(ImageError::NoImage);
            }
            let bias = _dyld_get_image_vmaddr_slide(0) as usize;
            let pie = (*header).flags & MH_PIE != 0;
            Ok(ProcessImage {
                // the header sits at the start of __TEXT
                image_base: (header as usize).wrapping_sub(bias),
                bias,
                pie,
            })
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
mod platform {
    use super::{ImageError, ProcessImage};

    /// No loader query is implemented here
    pub(super) fn primary_image() -> Result<ProcessImage, ImageError> {
        Err(ImageError::Unsupported)
    }
}
