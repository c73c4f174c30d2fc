//! Off-screen drawing surface frames are rendered into before decoding

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use tracing::debug;

use crate::capture::{convert, Frame, Resolution};
use crate::error::{Result, ScanError};

/// Ephemeral RGBA view of a surface, valid for one decode attempt
#[derive(Debug, Clone, Copy)]
pub struct FrameSample<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
}

/// Something frames can be drawn onto and read back from
pub trait Surface: Send {
    fn resolution(&self) -> Resolution;

    /// Draw a camera frame, scaled to fill the surface
    fn draw(&mut self, frame: &Frame) -> Result<()>;

    /// Draw an already decoded image, scaled to fill the surface
    fn draw_image(&mut self, image: &RgbaImage);

    /// Read back the current pixels
    fn pixels(&self) -> FrameSample<'_>;

    /// Drop whatever image source the surface holds
    fn release(&mut self);
}

/// Creates surfaces. Injected so sessions can run without a display.
pub trait SurfaceFactory: Send + Sync {
    type Surface: Surface + 'static;

    fn create(&self, resolution: Resolution) -> Result<Self::Surface>;
}

/// In-memory RGBA canvas
pub struct Canvas {
    buffer: RgbaImage,
}

impl Canvas {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            buffer: RgbaImage::new(resolution.width, resolution.height),
        }
    }

    fn blit(&mut self, image: &RgbaImage) {
        if image.dimensions() == self.buffer.dimensions() {
            self.buffer.copy_from_slice(image.as_raw());
        } else {
            debug!(
                "Scaling {}x{} source onto {}x{} canvas",
                image.width(),
                image.height(),
                self.buffer.width(),
                self.buffer.height()
            );
            self.buffer = imageops::resize(
                image,
                self.buffer.width(),
                self.buffer.height(),
                FilterType::Nearest,
            );
        }
    }
}

impl Surface for Canvas {
    fn resolution(&self) -> Resolution {
        Resolution::new(self.buffer.width(), self.buffer.height())
    }

    fn draw(&mut self, frame: &Frame) -> Result<()> {
        let image = convert::to_rgba(frame)?;
        self.blit(&image);
        Ok(())
    }

    fn draw_image(&mut self, image: &RgbaImage) {
        self.blit(image);
    }

    fn pixels(&self) -> FrameSample<'_> {
        FrameSample {
            data: self.buffer.as_raw(),
            width: self.buffer.width(),
            height: self.buffer.height(),
        }
    }

    fn release(&mut self) {
        // Keep the dimensions, forget the last drawn image
        for px in self.buffer.pixels_mut() {
            *px = Rgba([0, 0, 0, 0]);
        }
    }
}

/// Creates [`Canvas`] surfaces up to a maximum dimension
#[derive(Debug, Clone)]
pub struct CanvasFactory {
    max_dimension: u32,
}

impl CanvasFactory {
    pub fn new(max_dimension: u32) -> Self {
        Self { max_dimension }
    }
}

impl Default for CanvasFactory {
    fn default() -> Self {
        Self::new(crate::ScannerConfig::default().max_surface_dimension)
    }
}

impl SurfaceFactory for CanvasFactory {
    type Surface = Canvas;

    fn create(&self, resolution: Resolution) -> Result<Canvas> {
        let unavailable = |reason: String| ScanError::SurfaceUnavailable {
            width: resolution.width,
            height: resolution.height,
            reason,
        };

        if !resolution.is_known() {
            return Err(unavailable("zero-sized surface".into()));
        }
        if resolution.width > self.max_dimension || resolution.height > self.max_dimension {
            return Err(unavailable(format!(
                "exceeds maximum dimension {}",
                self.max_dimension
            )));
        }

        Ok(Canvas::new(resolution))
    }
}
