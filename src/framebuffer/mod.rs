//! # Framebuffer Graphics Module
//!
//! Pixel access to the linear framebuffer handed over by the bootloader.
//!
//! - `framebuffer`: `FramebufferWriter`, an embedded-graphics `DrawTarget`
//! - `color`: `Color` type with the console's color constants

pub mod color;
#[allow(clippy::module_inception)]
pub mod framebuffer;

pub use color::Color;
pub use framebuffer::FramebufferWriter;
