//! GC0308 camera
//!
//! The sensor is configured over SCCB (I2C) for QVGA RGB565 output. Pixel
//! data arrives through a [`FrameGrabber`], which the firmware backs with
//! the LCD_CAM DVP peripheral.

use crate::BridgeError;
use crate::peripherals::{Camera, Frame, PixelFormat};
use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use log::{debug, info};

/// 7-bit SCCB address
pub const DEFAULT_ADDRESS: u8 = 0x21;

pub const FRAME_WIDTH: u16 = 320;
pub const FRAME_HEIGHT: u16 = 240;
pub const FRAME_LEN: usize = FRAME_WIDTH as usize * FRAME_HEIGHT as usize * 2;

const REG_CHIP_ID: u8 = 0x00;
const REG_PAGE_SELECT: u8 = 0xFE;
const REG_OUTPUT_FORMAT: u8 = 0x24;

const CHIP_ID: u8 = 0x9B;
const PAGE_SOFT_RESET: u8 = 0xF0;
const OUTPUT_RGB565: u8 = 0xA6;

const RESET_SETTLE_MS: u32 = 80;

/// Page 0 setup after reset, (register, value)
const SETUP_PAGE0: [(u8, u8); 6] = [
    (0xEC, 0x20), // clock: no divider
    (0x05, 0x00), // row start
    (0x06, 0x00),
    (0x07, 0x00), // column start
    (0x08, 0x00),
    (REG_OUTPUT_FORMAT, OUTPUT_RGB565),
];

/// Page 1 subsampler, VGA halved to QVGA
const SETUP_PAGE1: [(u8, u8); 8] = [
    (0x53, 0x82),
    (0x54, 0x22),
    (0x55, 0x03),
    (0x56, 0x00),
    (0x57, 0x00),
    (0x58, 0x00),
    (0x59, 0x00),
    (0x5A, 0x00),
];

/// Source of raw frame buffers from the capture engine
pub trait FrameGrabber {
    /// Start continuous capture
    fn start(&mut self) -> Result<(), BridgeError>;

    /// Latest complete frame, if one is ready. Repeated calls before
    /// `release_frame` return the same buffer.
    fn poll_frame(&mut self) -> Option<&[u8]>;

    /// Return the buffer from the last `poll_frame` to the engine
    fn release_frame(&mut self);
}

/// Sensor control interface
pub struct Gc0308<I2C> {
    i2c: I2C,
    address: u8,
}

impl<I2C: I2c> Gc0308<I2C> {
    pub fn new(i2c: I2C) -> Self {
        Self {
            i2c,
            address: DEFAULT_ADDRESS,
        }
    }

    fn write_register(&mut self, register: u8, value: u8) -> Result<(), BridgeError> {
        self.i2c
            .write(self.address, &[register, value])
            .map_err(|_| BridgeError::CameraError)
    }

    fn read_register(&mut self, register: u8) -> Result<u8, BridgeError> {
        let mut value = [0u8; 1];
        self.i2c
            .write_read(self.address, &[register], &mut value)
            .map_err(|_| BridgeError::CameraError)?;
        Ok(value[0])
    }

    pub fn read_chip_id(&mut self) -> Result<u8, BridgeError> {
        self.write_register(REG_PAGE_SELECT, 0x00)?;
        self.read_register(REG_CHIP_ID)
    }

    /// Identify, reset and configure for QVGA RGB565
    pub fn init<D: DelayNs>(&mut self, delay: &mut D) -> Result<(), BridgeError> {
        let chip_id = self.read_chip_id()?;
        if chip_id != CHIP_ID {
            debug!("[CAM] Unexpected chip id 0x{:02x}", chip_id);
            return Err(BridgeError::CameraError);
        }

        self.write_register(REG_PAGE_SELECT, PAGE_SOFT_RESET)?;
        delay.delay_ms(RESET_SETTLE_MS);

        self.write_register(REG_PAGE_SELECT, 0x00)?;
        for (register, value) in SETUP_PAGE0 {
            self.write_register(register, value)?;
        }

        self.write_register(REG_PAGE_SELECT, 0x01)?;
        for (register, value) in SETUP_PAGE1 {
            self.write_register(register, value)?;
        }
        self.write_register(REG_PAGE_SELECT, 0x00)?;

        info!("[CAM] GC0308 configured for {}x{} RGB565", FRAME_WIDTH, FRAME_HEIGHT);
        Ok(())
    }
}

/// GC0308 sensor plus its capture engine
pub struct Gc0308Camera<I2C, F, D> {
    sensor: Gc0308<I2C>,
    grabber: F,
    delay: D,
    ready: bool,
}

impl<I2C, F, D> Gc0308Camera<I2C, F, D>
where
    I2C: I2c,
    F: FrameGrabber,
    D: DelayNs,
{
    pub fn new(i2c: I2C, grabber: F, delay: D) -> Self {
        Self {
            sensor: Gc0308::new(i2c),
            grabber,
            delay,
            ready: false,
        }
    }

    pub fn get_grabber(&self) -> &F {
        &self.grabber
    }
}

impl<I2C, F, D> Camera for Gc0308Camera<I2C, F, D>
where
    I2C: I2c,
    F: FrameGrabber,
    D: DelayNs,
{
    fn begin(&mut self) -> Result<(), BridgeError> {
        self.ready = false;
        self.sensor.init(&mut self.delay)?;
        self.grabber.start()?;
        self.ready = true;
        Ok(())
    }

    fn acquire(&mut self) -> Option<Frame<'_>> {
        if !self.ready {
            return None;
        }

        let len = self.grabber.poll_frame().map(<[u8]>::len)?;
        if len < FRAME_LEN {
            debug!("[CAM] Short frame: {} bytes", len);
            self.grabber.release_frame();
            return None;
        }

        let data = self.grabber.poll_frame()?;
        Some(Frame {
            data,
            width: FRAME_WIDTH,
            height: FRAME_HEIGHT,
            format: PixelFormat::Rgb565,
        })
    }

    fn release(&mut self) {
        self.grabber.release_frame();
    }
}
