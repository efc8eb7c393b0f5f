//! ILI9342C panel driver
//!
//! 320x240 RGB565 over SPI with a separate data/command line.

use crate::BridgeError;
use crate::peripherals::{Display, PixelFormat};
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiDevice;
use log::debug;

pub const WIDTH: u16 = 320;
pub const HEIGHT: u16 = 240;

const CMD_SWRESET: u8 = 0x01;
const CMD_SLPOUT: u8 = 0x11;
const CMD_INVON: u8 = 0x21;
const CMD_DISPON: u8 = 0x29;
const CMD_CASET: u8 = 0x2A;
const CMD_PASET: u8 = 0x2B;
const CMD_RAMWR: u8 = 0x2C;
const CMD_MADCTL: u8 = 0x36;
const CMD_COLMOD: u8 = 0x3A;

/// 16 bits per pixel
const COLMOD_RGB565: u8 = 0x55;
/// BGR panel order, landscape
const MADCTL_BGR: u8 = 0x08;

const RESET_SETTLE_MS: u32 = 120;
const WAKE_SETTLE_MS: u32 = 120;

/// Largest single SPI write while streaming pixels
const PIXEL_CHUNK: usize = 4096;

/// ILI9342C over SPI
pub struct Ili9342<SPI, DC, D> {
    spi: SPI,
    dc: DC,
    delay: D,
    ready: bool,
}

impl<SPI, DC, D> Ili9342<SPI, DC, D>
where
    SPI: SpiDevice,
    DC: OutputPin,
    D: DelayNs,
{
    pub fn new(spi: SPI, dc: DC, delay: D) -> Self {
        Self {
            spi,
            dc,
            delay,
            ready: false,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    fn command(&mut self, command: u8, params: &[u8]) -> Result<(), BridgeError> {
        self.dc.set_low().map_err(|_| BridgeError::DisplayError)?;
        self.spi
            .write(&[command])
            .map_err(|_| BridgeError::DisplayError)?;

        if !params.is_empty() {
            self.write_data(params)?;
        }
        Ok(())
    }

    fn write_data(&mut self, data: &[u8]) -> Result<(), BridgeError> {
        self.dc.set_high().map_err(|_| BridgeError::DisplayError)?;
        for chunk in data.chunks(PIXEL_CHUNK) {
            self.spi.write(chunk).map_err(|_| BridgeError::DisplayError)?;
        }
        Ok(())
    }

    fn set_window(&mut self, x: u16, y: u16, width: u16, height: u16) -> Result<(), BridgeError> {
        let [x0h, x0l] = x.to_be_bytes();
        let [x1h, x1l] = (x + width - 1).to_be_bytes();
        let [y0h, y0l] = y.to_be_bytes();
        let [y1h, y1l] = (y + height - 1).to_be_bytes();

        self.command(CMD_CASET, &[x0h, x0l, x1h, x1l])?;
        self.command(CMD_PASET, &[y0h, y0l, y1h, y1l])?;
        self.command(CMD_RAMWR, &[])
    }
}

impl<SPI, DC, D> Display for Ili9342<SPI, DC, D>
where
    SPI: SpiDevice,
    DC: OutputPin,
    D: DelayNs,
{
    fn begin(&mut self) -> Result<(), BridgeError> {
        self.ready = false;

        self.command(CMD_SWRESET, &[])?;
        self.delay.delay_ms(RESET_SETTLE_MS);

        self.command(CMD_SLPOUT, &[])?;
        self.delay.delay_ms(WAKE_SETTLE_MS);

        self.command(CMD_COLMOD, &[COLMOD_RGB565])?;
        self.command(CMD_MADCTL, &[MADCTL_BGR])?;
        self.command(CMD_INVON, &[])?;
        self.command(CMD_DISPON, &[])?;

        self.ready = true;
        debug!("[DISPLAY] ILI9342C initialized");
        Ok(())
    }

    fn width(&self) -> u16 {
        WIDTH
    }

    fn height(&self) -> u16 {
        HEIGHT
    }

    fn pixel_format(&self) -> PixelFormat {
        PixelFormat::Rgb565
    }

    fn blit(
        &mut self,
        x: u16,
        y: u16,
        width: u16,
        height: u16,
        data: &[u8],
    ) -> Result<(), BridgeError> {
        if !self.ready || width == 0 || height == 0 {
            return Err(BridgeError::DisplayError);
        }

        let in_bounds = u32::from(x) + u32::from(width) <= u32::from(WIDTH)
            && u32::from(y) + u32::from(height) <= u32::from(HEIGHT);
        let expected = width as usize * height as usize * PixelFormat::Rgb565.bytes_per_pixel();
        if !in_bounds || data.len() != expected {
            return Err(BridgeError::DisplayError);
        }

        self.set_window(x, y, width, height)?;
        self.write_data(data)
    }
}
