//! Framebuffer writer using embedded-graphics
use crate::config::{FramebufferHandle, PixelLayout};
use crate::framebuffer::color::Color;
use embedded_graphics::{
    mono_font::MonoTextStyle,
    primitives::{Primitive, PrimitiveStyle, Rectangle},
    text::{Baseline, Text},
    Drawable,
};
use embedded_graphics_core::{
    draw_target::DrawTarget,
    geometry::{OriginDimensions, Point, Size},
    pixelcolor::{Rgb888, RgbColor},
    Pixel,
};

pub struct FramebufferWriter<'a> {
    framebuffer: &'a mut [u8],
    pub width: usize,
    pub height: usize,
    pub stride: usize,
    pub bytes_per_pixel: usize,
    layout: PixelLayout,
}

impl<'a> FramebufferWriter<'a> {
    /// Wraps `framebuffer` using the geometry described by `handle`.
    pub fn new(framebuffer: &'a mut [u8], handle: &FramebufferHandle) -> Self {
        Self {
            framebuffer,
            width: handle.width,
            height: handle.height,
            stride: handle.stride,
            bytes_per_pixel: handle.bytes_per_pixel,
            layout: handle.layout,
        }
    }

    /// Fill entire screen with a color
    pub fn clear(&mut self, color: Color) {
        self.fill_rect(0, 0, self.width as u32, self.height as u32, color);
    }

    /// Fill a rectangular region
    pub fn fill_rect(&mut self, x: i32, y: i32, width: u32, height: u32, color: Color) {
        let rect = Rectangle::new(Point::new(x, y), Size::new(width, height));
        rect.into_styled(PrimitiveStyle::with_fill(color.to_rgb888()))
            .draw(self)
            .ok();
    }

    /// Draw a single character with its top-left corner at pixel coordinates
    pub fn draw_char(&mut self, ch: char, x: i32, y: i32, style: &MonoTextStyle<'_, Rgb888>) {
        let mut buf = [0u8; 4];
        let s = ch.encode_utf8(&mut buf);
        Text::with_baseline(s, Point::new(x, y), *style, Baseline::Top)
            .draw(self)
            .ok();
    }

    /// Moves the picture up by `rows` scanlines and fills the freed rows.
    pub fn scroll_up(&mut self, rows: usize, fill: Color) {
        let row_bytes = self.stride * self.bytes_per_pixel;
        let visible = (self.height * row_bytes).min(self.framebuffer.len());
        let shift = rows * row_bytes;
        if shift >= visible {
            self.clear(fill);
            return;
        }
        self.framebuffer.copy_within(shift..visible, 0);
        let kept = self.height - rows;
        self.fill_rect(0, kept as i32, self.width as u32, rows as u32, fill);
    }

    /// Reads back the pixel at `(x, y)`.
    pub fn pixel(&self, x: usize, y: usize) -> Option<Color> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y * self.stride + x) * self.bytes_per_pixel;
        let px = self.framebuffer.get(offset..offset + 3)?;
        Some(match self.layout {
            PixelLayout::Rgb => Color::new(px[0], px[1], px[2]),
            PixelLayout::Bgr => Color::new(px[2], px[1], px[0]),
        })
    }
}

// Implement DrawTarget for embedded-graphics
impl DrawTarget for FramebufferWriter<'_> {
    type Color = Rgb888;
    type Error = core::convert::Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(Point { x, y }, color) in pixels {
            if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
                continue;
            }

            let offset = (y as usize * self.stride + x as usize) * self.bytes_per_pixel;
            if offset + self.bytes_per_pixel <= self.framebuffer.len() {
                let (first, last) = match self.layout {
                    PixelLayout::Rgb => (color.r(), color.b()),
                    PixelLayout::Bgr => (color.b(), color.r()),
                };
                self.framebuffer[offset] = first;
                self.framebuffer[offset + 1] = color.g();
                self.framebuffer[offset + 2] = last;
                if self.bytes_per_pixel == 4 {
                    self.framebuffer[offset + 3] = 255;
                }
            }
        }
        Ok(())
    }
}

impl OriginDimensions for FramebufferWriter<'_> {
    fn size(&self) -> Size {
        Size::new(self.width as u32, self.height as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GLYPH_HEIGHT;
    use x86_64::VirtAddr;

    fn handle(width: usize, height: usize, layout: PixelLayout) -> FramebufferHandle {
        FramebufferHandle {
            base: VirtAddr::new(0x1000),
            size: width * height * 4,
            width,
            height,
            stride: width,
            bytes_per_pixel: 4,
            layout,
            glyph_height: GLYPH_HEIGHT,
        }
    }

    #[test]
    fn bgr_pixels_are_stored_blue_first() {
        let geometry = handle(4, 4, PixelLayout::Bgr);
        let mut buf = vec![0u8; geometry.size];
        let mut fb = FramebufferWriter::new(&mut buf, &geometry);
        fb.draw_iter([Pixel(Point::new(1, 0), Rgb888::new(10, 20, 30))]).ok();
        assert_eq!(fb.pixel(1, 0), Some(Color::new(10, 20, 30)));
        drop(fb);
        assert_eq!(&buf[4..8], &[30, 20, 10, 255]);
    }

    #[test]
    fn rgb_pixels_are_stored_red_first() {
        let geometry = handle(4, 4, PixelLayout::Rgb);
        let mut buf = vec![0u8; geometry.size];
        let mut fb = FramebufferWriter::new(&mut buf, &geometry);
        fb.draw_iter([Pixel(Point::new(0, 1), Rgb888::new(10, 20, 30))]).ok();
        drop(fb);
        assert_eq!(&buf[16..20], &[10, 20, 30, 255]);
    }

    #[test]
    fn out_of_bounds_pixels_are_ignored() {
        let geometry = handle(4, 4, PixelLayout::Bgr);
        let mut buf = vec![0u8; geometry.size];
        let mut fb = FramebufferWriter::new(&mut buf, &geometry);
        fb.draw_iter([
            Pixel(Point::new(-1, 0), Rgb888::WHITE),
            Pixel(Point::new(4, 0), Rgb888::WHITE),
            Pixel(Point::new(0, 4), Rgb888::WHITE),
        ])
        .ok();
        drop(fb);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn scroll_moves_rows_up_and_fills_the_bottom() {
        let geometry = handle(2, 4, PixelLayout::Bgr);
        let mut buf = vec![0u8; geometry.size];
        let mut fb = FramebufferWriter::new(&mut buf, &geometry);
        fb.fill_rect(0, 2, 2, 1, Color::RED);
        fb.scroll_up(2, Color::BLUE);
        assert_eq!(fb.pixel(0, 0), Some(Color::RED));
        assert_eq!(fb.pixel(1, 1), Some(Color::BLACK));
        assert_eq!(fb.pixel(0, 2), Some(Color::BLUE));
        assert_eq!(fb.pixel(1, 3), Some(Color::BLUE));
    }

    #[test]
    fn scrolling_past_the_screen_clears_it() {
        let geometry = handle(2, 2, PixelLayout::Bgr);
        let mut buf = vec![0u8; geometry.size];
        let mut fb = FramebufferWriter::new(&mut buf, &geometry);
        fb.fill_rect(0, 0, 2, 2, Color::RED);
        fb.scroll_up(5, Color::GREEN);
        assert_eq!(fb.pixel(1, 1), Some(Color::GREEN));
    }
}
