//! Frame transcoding
//!
//! Compresses captured frames to JPEG before they are streamed. RGB565
//! rows are converted to YCbCr on the fly, so no full-size RGB888 copy of
//! the frame is ever allocated.

use crate::BridgeError;
use crate::peripherals::{Frame, PixelFormat};
use alloc::vec::Vec;
use jpeg_encoder::{ColorType, Encoder, ImageBuffer, JpegColorType};

/// Pure frame-to-bytes compression
pub trait Transcoder {
    fn transcode(&mut self, frame: &Frame<'_>, quality: u8) -> Result<Vec<u8>, BridgeError>;
}

/// Expand one big-endian RGB565 pixel to 8-bit channels
fn rgb565_to_rgb888(hi: u8, lo: u8) -> (u8, u8, u8) {
    let value = u16::from_be_bytes([hi, lo]);
    let r = ((value >> 11) & 0x1F) as u8;
    let g = ((value >> 5) & 0x3F) as u8;
    let b = (value & 0x1F) as u8;
    ((r << 3) | (r >> 2), (g << 2) | (g >> 4), (b << 3) | (b >> 2))
}

/// JFIF RGB to YCbCr, 16-bit fixed point
fn rgb_to_ycbcr(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (r, g, b) = (i32::from(r), i32::from(g), i32::from(b));

    let y = (19595 * r + 38470 * g + 7471 * b + 32768) >> 16;
    let cb = ((-11059 * r - 21709 * g + 32768 * b + 32768) >> 16) + 128;
    let cr = ((32768 * r - 27439 * g - 5329 * b + 32768) >> 16) + 128;

    (
        y.clamp(0, 255) as u8,
        cb.clamp(0, 255) as u8,
        cr.clamp(0, 255) as u8,
    )
}

/// Borrowed RGB565 frame fed to the encoder row by row
struct Rgb565Image<'a> {
    data: &'a [u8],
    width: u16,
    height: u16,
}

impl ImageBuffer for Rgb565Image<'_> {
    fn get_jpeg_color_type(&self) -> JpegColorType {
        JpegColorType::Ycbcr
    }

    fn width(&self) -> u16 {
        self.width
    }

    fn height(&self) -> u16 {
        self.height
    }

    fn fill_buffers(&self, y: u16, buffers: &mut [Vec<u8>; 4]) {
        let row_len = self.width as usize * 2;
        let start = y as usize * row_len;

        for pixel in self.data[start..start + row_len].chunks_exact(2) {
            let (r, g, b) = rgb565_to_rgb888(pixel[0], pixel[1]);
            let (y, cb, cr) = rgb_to_ycbcr(r, g, b);
            buffers[0].push(y);
            buffers[1].push(cb);
            buffers[2].push(cr);
        }
    }
}

/// Baseline JPEG encoder
#[derive(Debug, Default, Clone, Copy)]
pub struct JpegTranscoder;

impl JpegTranscoder {
    pub fn new() -> Self {
        Self
    }
}

impl Transcoder for JpegTranscoder {
    fn transcode(&mut self, frame: &Frame<'_>, quality: u8) -> Result<Vec<u8>, BridgeError> {
        let len = frame.expected_len();
        if len == 0 || frame.data.len() < len {
            return Err(BridgeError::TranscodeError);
        }

        let mut out = Vec::new();
        let encoder = Encoder::new(&mut out, quality.clamp(1, 100));

        let result = match frame.format {
            PixelFormat::Rgb565 => encoder.encode_image(Rgb565Image {
                data: &frame.data[..len],
                width: frame.width,
                height: frame.height,
            }),
            PixelFormat::Grayscale => {
                encoder.encode(&frame.data[..len], frame.width, frame.height, ColorType::Luma)
            }
        };
        result.map_err(|_| BridgeError::TranscodeError)?;

        Ok(out)
    }
}
