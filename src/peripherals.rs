//! Peripheral handle traits
//!
//! Capability traits for the hardware the event loop drives. The firmware
//! binary implements them on top of `esp-hal`; tests implement them with
//! in-memory fakes. Digital inputs and delays use the `embedded-hal` traits
//! directly.

use crate::BridgeError;
use crate::gesture::Gesture;

/// Pixel layout of a frame or display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 16-bit RGB, big-endian byte order as delivered by the camera
    Rgb565,
    /// 8-bit luminance
    Grayscale,
}

impl PixelFormat {
    /// Bytes per pixel
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb565 => 2,
            PixelFormat::Grayscale => 1,
        }
    }
}

/// A camera frame borrowed from the hardware frame buffer
///
/// The borrow ties the frame to the camera handle, so it cannot outlive the
/// cycle it was acquired in.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub data: &'a [u8],
    pub width: u16,
    pub height: u16,
    pub format: PixelFormat,
}

impl Frame<'_> {
    /// Number of bytes a complete frame of this geometry occupies
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }
}

/// Camera handle
pub trait Camera {
    /// Bring up the sensor and capture engine
    fn begin(&mut self) -> Result<(), BridgeError>;

    /// Borrow the next frame if one is ready. Never blocks.
    fn acquire(&mut self) -> Option<Frame<'_>>;

    /// Hand the frame buffer back to the capture engine
    fn release(&mut self);
}

/// Display handle
pub trait Display {
    /// Bring up the panel
    fn begin(&mut self) -> Result<(), BridgeError>;

    fn width(&self) -> u16;

    fn height(&self) -> u16;

    /// Native pixel format of the panel
    fn pixel_format(&self) -> PixelFormat;

    /// Write a raw pixel buffer to the given window
    fn blit(&mut self, x: u16, y: u16, width: u16, height: u16, data: &[u8])
    -> Result<(), BridgeError>;
}

/// Gesture sensor handle
pub trait GestureSensor {
    /// Identify and configure the sensor
    fn begin(&mut self) -> Result<(), BridgeError>;

    /// Report gestures as soon as they are recognized
    fn set_high_rate(&mut self, enabled: bool);

    /// Return the pending gesture, if any. Never blocks.
    fn poll(&mut self) -> Option<Gesture>;
}

/// Monotonic millisecond clock
pub trait Clock {
    fn now_ms(&self) -> u64;
}
