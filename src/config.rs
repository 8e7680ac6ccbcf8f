//! Boot-time configuration handed to the orchestrator.
//!
//! Hardware addresses arrive here as opaque values. They are checked for
//! range and alignment only; nothing in this module dereferences them.

use core::fmt;

use bootloader_api::info::{BootInfo, PixelFormat};
use log::LevelFilter;
use x86_64::VirtAddr;

/// Height of one text line in pixels.
pub const GLYPH_HEIGHT: usize = 16;

/// Address read by the invalid-read self-test. Nothing maps it during bring-up.
pub const INVALID_READ_PROBE: u64 = 0xffff_8000_0aa0_0000;

/// Software vector raised by the fallback self-test. No handler is assigned to it.
pub const SELF_TEST_VECTOR: u8 = 0x41;

/// Byte order of one pixel in the framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    Rgb,
    Bgr,
}

/// Location and geometry of the linear framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramebufferHandle {
    pub base: VirtAddr,
    /// Total size in bytes.
    pub size: usize,
    pub width: usize,
    pub height: usize,
    /// Pixels per scanline, may exceed `width`.
    pub stride: usize,
    pub bytes_per_pixel: usize,
    pub layout: PixelLayout,
    pub glyph_height: usize,
}

impl FramebufferHandle {
    /// Bytes the visible area needs, or `None` on overflow.
    pub fn required_size(&self) -> Option<usize> {
        self.stride
            .checked_mul(self.height)?
            .checked_mul(self.bytes_per_pixel)
    }

    pub fn validate(&self) -> Result<(), BootError> {
        if self.base.is_null() {
            return Err(BootError::NullFramebuffer);
        }
        if !matches!(self.bytes_per_pixel, 3 | 4) {
            return Err(BootError::UnsupportedBytesPerPixel(self.bytes_per_pixel));
        }
        if self.width == 0 || self.height == 0 {
            return Err(BootError::EmptyFramebuffer);
        }
        if self.stride < self.width {
            return Err(BootError::StrideTooSmall {
                stride: self.stride,
                width: self.width,
            });
        }
        let needed = self.required_size().ok_or(BootError::FramebufferTooSmall {
            needed: usize::MAX,
            actual: self.size,
        })?;
        if self.size < needed {
            return Err(BootError::FramebufferTooSmall {
                needed,
                actual: self.size,
            });
        }
        if self.glyph_height == 0 || self.glyph_height > self.height {
            return Err(BootError::BadGlyphHeight(self.glyph_height));
        }
        Ok(())
    }

    /// Views the framebuffer memory as a byte slice.
    ///
    /// # Safety
    ///
    /// The handle must have passed [`validate`](Self::validate), `base..base + size`
    /// must be mapped writable for the rest of the kernel's life, and no other
    /// reference to that memory may exist.
    pub unsafe fn buffer(&self) -> &'static mut [u8] {
        core::slice::from_raw_parts_mut(self.base.as_mut_ptr::<u8>(), self.size)
    }
}

/// Which end-to-end fault exercise runs after bring-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfTest {
    None,
    /// `int SELF_TEST_VECTOR`, lands in the fallback handler and resumes.
    UnassignedVector,
    /// `int3`, lands in the breakpoint handler and resumes.
    Breakpoint,
    /// Reads an unmapped address; the page fault handler reports and parks.
    InvalidRead { addr: VirtAddr },
}

impl SelfTest {
    /// Vector the exercise is expected to raise.
    pub fn vector(&self) -> Option<u8> {
        match self {
            SelfTest::None => None,
            SelfTest::UnassignedVector => Some(SELF_TEST_VECTOR),
            SelfTest::Breakpoint => Some(3),
            SelfTest::InvalidRead { .. } => Some(14),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BootConfig {
    pub framebuffer: FramebufferHandle,
    pub log_level: LevelFilter,
    pub self_test: SelfTest,
    /// Prints formatter samples after the banner.
    pub printk_self_test: bool,
}

impl BootConfig {
    pub fn new(framebuffer: FramebufferHandle) -> Self {
        Self {
            framebuffer,
            log_level: LevelFilter::Info,
            self_test: SelfTest::InvalidRead {
                addr: VirtAddr::new(INVALID_READ_PROBE),
            },
            printk_self_test: false,
        }
    }

    pub fn from_boot_info(info: &'static mut BootInfo) -> Result<Self, BootError> {
        let fb = info.framebuffer.as_mut().ok_or(BootError::NoFramebuffer)?;
        let fb_info = fb.info();
        let layout = match fb_info.pixel_format {
            PixelFormat::Rgb => PixelLayout::Rgb,
            PixelFormat::Bgr => PixelLayout::Bgr,
            _ => return Err(BootError::UnsupportedPixelFormat),
        };
        let buffer = fb.buffer_mut();

        let handle = FramebufferHandle {
            base: VirtAddr::from_ptr(buffer.as_mut_ptr()),
            size: buffer.len(),
            width: fb_info.width,
            height: fb_info.height,
            stride: fb_info.stride,
            bytes_per_pixel: fb_info.bytes_per_pixel,
            layout,
            glyph_height: GLYPH_HEIGHT,
        };
        let config = Self::new(handle);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), BootError> {
        self.framebuffer.validate()
    }
}

/// Failures detected before or while bringing up the trap path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootError {
    NoFramebuffer,
    NullFramebuffer,
    EmptyFramebuffer,
    UnsupportedPixelFormat,
    UnsupportedBytesPerPixel(usize),
    StrideTooSmall { stride: usize, width: usize },
    FramebufferTooSmall { needed: usize, actual: usize },
    BadGlyphHeight(usize),
    LoggerAlreadySet,
    TablesAlreadyTaken,
    /// A TSS stack top is zero, misaligned, or shared with another slot.
    BadStack { slot: &'static str },
    /// An IST index outside the TSS's seven interrupt stack slots.
    BadStackIndex(u16),
    /// A handler's signature does not match whether the CPU pushes an error code.
    HandlerSignature { vector: u8 },
    /// An error-code exception would be routed to the fallback handler.
    FallbackOnErrorCodeVector(u8),
    TaskRegisterMismatch { expected: u16, found: u16 },
    VectorTableMismatch,
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootError::NoFramebuffer => write!(f, "bootloader provided no framebuffer"),
            BootError::NullFramebuffer => write!(f, "framebuffer base address is null"),
            BootError::EmptyFramebuffer => write!(f, "framebuffer has zero width or height"),
            BootError::UnsupportedPixelFormat => write!(f, "unsupported pixel format"),
            BootError::UnsupportedBytesPerPixel(bpp) => {
                write!(f, "unsupported bytes per pixel: {}", bpp)
            }
            BootError::StrideTooSmall { stride, width } => {
                write!(f, "stride {} is smaller than width {}", stride, width)
            }
            BootError::FramebufferTooSmall { needed, actual } => {
                write!(f, "framebuffer is {} bytes, needs {}", actual, needed)
            }
            BootError::BadGlyphHeight(h) => write!(f, "invalid glyph height {}", h),
            BootError::LoggerAlreadySet => write!(f, "logger already installed"),
            BootError::TablesAlreadyTaken => write!(f, "boot tables already handed out"),
            BootError::BadStack { slot } => write!(f, "invalid stack for TSS slot {}", slot),
            BootError::BadStackIndex(index) => write!(f, "IST index {} out of range", index),
            BootError::HandlerSignature { vector } => {
                write!(f, "handler signature mismatch for vector {}", vector)
            }
            BootError::FallbackOnErrorCodeVector(v) => {
                write!(f, "vector {} pushes an error code but has no dedicated handler", v)
            }
            BootError::TaskRegisterMismatch { expected, found } => write!(
                f,
                "task register holds {:#x}, expected {:#x}",
                found, expected
            ),
            BootError::VectorTableMismatch => {
                write!(f, "IDTR does not point at the vector table")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> FramebufferHandle {
        FramebufferHandle {
            base: VirtAddr::new(0x1000),
            size: 1440 * 900 * 4,
            width: 1440,
            height: 900,
            stride: 1440,
            bytes_per_pixel: 4,
            layout: PixelLayout::Bgr,
            glyph_height: GLYPH_HEIGHT,
        }
    }

    #[test]
    fn valid_handle_passes() {
        assert_eq!(handle().validate(), Ok(()));
    }

    #[test]
    fn null_base_is_rejected() {
        let fb = FramebufferHandle { base: VirtAddr::zero(), ..handle() };
        assert_eq!(fb.validate(), Err(BootError::NullFramebuffer));
    }

    #[test]
    fn undersized_buffer_is_rejected() {
        let fb = FramebufferHandle { size: 1440 * 900 * 3, ..handle() };
        assert_eq!(
            fb.validate(),
            Err(BootError::FramebufferTooSmall {
                needed: 1440 * 900 * 4,
                actual: 1440 * 900 * 3,
            })
        );
    }

    #[test]
    fn stride_padding_counts_toward_size() {
        let fb = FramebufferHandle { stride: 1536, ..handle() };
        assert!(matches!(fb.validate(), Err(BootError::FramebufferTooSmall { .. })));
        let fb = FramebufferHandle { stride: 1536, size: 1536 * 900 * 4, ..handle() };
        assert_eq!(fb.validate(), Ok(()));
    }

    #[test]
    fn geometry_edge_cases() {
        let fb = FramebufferHandle { bytes_per_pixel: 2, ..handle() };
        assert_eq!(fb.validate(), Err(BootError::UnsupportedBytesPerPixel(2)));
        let fb = FramebufferHandle { stride: 100, ..handle() };
        assert!(matches!(fb.validate(), Err(BootError::StrideTooSmall { .. })));
        let fb = FramebufferHandle { glyph_height: 0, ..handle() };
        assert_eq!(fb.validate(), Err(BootError::BadGlyphHeight(0)));
        let fb = FramebufferHandle { height: 0, ..handle() };
        assert_eq!(fb.validate(), Err(BootError::EmptyFramebuffer));
    }

    #[test]
    fn self_test_vectors() {
        assert_eq!(SelfTest::None.vector(), None);
        assert_eq!(SelfTest::UnassignedVector.vector(), Some(SELF_TEST_VECTOR));
        assert_eq!(SelfTest::Breakpoint.vector(), Some(3));
        let read = SelfTest::InvalidRead { addr: VirtAddr::new(INVALID_READ_PROBE) };
        assert_eq!(read.vector(), Some(14));
    }

    #[test]
    fn default_config_reproduces_invalid_read() {
        let config = BootConfig::new(handle());
        assert_eq!(
            config.self_test,
            SelfTest::InvalidRead { addr: VirtAddr::new(INVALID_READ_PROBE) }
        );
        assert!(!config.printk_self_test);
    }
}
