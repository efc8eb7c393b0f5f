//! PAJ7620U2 gesture sensor driver
//!
//! Talks to the sensor over I2C: wakes it, checks the part id, loads the
//! gesture-mode register table and reads the two gesture flag registers.

use crate::BridgeError;
use crate::gesture::Gesture;
use crate::peripherals::GestureSensor;
use embedded_hal::i2c::I2c;
use log::{debug, info};

/// Fixed 7-bit bus address
pub const DEFAULT_ADDRESS: u8 = 0x73;

const REG_BANK_SELECT: u8 = 0xEF;
const REG_PART_ID_LOW: u8 = 0x00;
const REG_PART_ID_HIGH: u8 = 0x01;
const REG_GESTURE_FLAGS_LOW: u8 = 0x43;
const REG_GESTURE_FLAGS_HIGH: u8 = 0x44;

const PART_ID: u16 = 0x7620;

// Gesture flag bits (0x44 shifted into the high byte)
const FLAG_RIGHT: u16 = 1 << 0;
const FLAG_LEFT: u16 = 1 << 1;
const FLAG_UP: u16 = 1 << 2;
const FLAG_DOWN: u16 = 1 << 3;
const FLAG_FORWARD: u16 = 1 << 4;
const FLAG_BACKWARD: u16 = 1 << 5;
const FLAG_CLOCKWISE: u16 = 1 << 6;
const FLAG_ANTI_CLOCKWISE: u16 = 1 << 7;
const FLAG_WAVE: u16 = 1 << 8;

/// Register bank
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bank {
    Bank0 = 0,
    Bank1 = 1,
}

/// Gesture mode register table, (register, value) pairs
const INIT_REGISTERS: [(u8, u8); 219] = [
    (0xEF, 0x00), (0x32, 0x29), (0x33, 0x01), (0x34, 0x00), (0x35, 0x01), (0x36, 0x00),
    (0x37, 0x07), (0x38, 0x17), (0x39, 0x06), (0x3A, 0x12), (0x3F, 0x00), (0x40, 0x02),
    (0x41, 0xFF), (0x42, 0x01), (0x46, 0x2D), (0x47, 0x0F), (0x48, 0x3C), (0x49, 0x00),
    (0x4A, 0x1E), (0x4B, 0x00), (0x4C, 0x20), (0x4D, 0x00), (0x4E, 0x1A), (0x4F, 0x14),
    (0x50, 0x00), (0x51, 0x10), (0x52, 0x00), (0x5C, 0x02), (0x5D, 0x00), (0x5E, 0x10),
    (0x5F, 0x3F), (0x60, 0x27), (0x61, 0x28), (0x62, 0x00), (0x63, 0x03), (0x64, 0xF7),
    (0x65, 0x03), (0x66, 0xD9), (0x67, 0x03), (0x68, 0x01), (0x69, 0xC8), (0x6A, 0x40),
    (0x6D, 0x04), (0x6E, 0x00), (0x6F, 0x00), (0x70, 0x80), (0x71, 0x00), (0x72, 0x00),
    (0x73, 0x00), (0x74, 0xF0), (0x75, 0x00), (0x80, 0x42), (0x81, 0x44), (0x82, 0x04),
    (0x83, 0x20), (0x84, 0x20), (0x85, 0x00), (0x86, 0x10), (0x87, 0x00), (0x88, 0x05),
    (0x89, 0x18), (0x8A, 0x10), (0x8B, 0x01), (0x8C, 0x37), (0x8D, 0x00), (0x8E, 0xF0),
    (0x8F, 0x81), (0x90, 0x06), (0x91, 0x06), (0x92, 0x1E), (0x93, 0x0D), (0x94, 0x0A),
    (0x95, 0x0A), (0x96, 0x0C), (0x97, 0x05), (0x98, 0x0A), (0x99, 0x41), (0x9A, 0x14),
    (0x9B, 0x0A), (0x9C, 0x3F), (0x9D, 0x33), (0x9E, 0xAE), (0x9F, 0xF9), (0xA0, 0x48),
    (0xA1, 0x13), (0xA2, 0x10), (0xA3, 0x08), (0xA4, 0x30), (0xA5, 0x19), (0xA6, 0x10),
    (0xA7, 0x08), (0xA8, 0x24), (0xA9, 0x04), (0xAA, 0x1E), (0xAB, 0x1E), (0xCC, 0x19),
    (0xCD, 0x0B), (0xCE, 0x13), (0xCF, 0x64), (0xD0, 0x21), (0xD1, 0x0F), (0xD2, 0x88),
    (0xE0, 0x01), (0xE1, 0x04), (0xE2, 0x41), (0xE3, 0xD6), (0xE4, 0x00), (0xE5, 0x0C),
    (0xE6, 0x0A), (0xE7, 0x00), (0xE8, 0x00), (0xE9, 0x00), (0xEE, 0x07), (0xEF, 0x01),
    (0x00, 0x1E), (0x01, 0x1E), (0x02, 0x0F), (0x03, 0x10), (0x04, 0x02), (0x05, 0x00),
    (0x06, 0xB0), (0x07, 0x04), (0x08, 0x0D), (0x09, 0x0E), (0x0A, 0x9C), (0x0B, 0x04),
    (0x0C, 0x05), (0x0D, 0x0F), (0x0E, 0x02), (0x0F, 0x12), (0x10, 0x02), (0x11, 0x02),
    (0x12, 0x00), (0x13, 0x01), (0x14, 0x05), (0x15, 0x07), (0x16, 0x05), (0x17, 0x07),
    (0x18, 0x01), (0x19, 0x04), (0x1A, 0x05), (0x1B, 0x0C), (0x1C, 0x2A), (0x1D, 0x01),
    (0x1E, 0x00), (0x21, 0x00), (0x22, 0x00), (0x23, 0x00), (0x25, 0x01), (0x26, 0x00),
    (0x27, 0x39), (0x28, 0x7F), (0x29, 0x08), (0x30, 0x03), (0x31, 0x00), (0x32, 0x1A),
    (0x33, 0x1A), (0x34, 0x07), (0x35, 0x07), (0x36, 0x01), (0x37, 0xFF), (0x38, 0x36),
    (0x39, 0x07), (0x3A, 0x00), (0x3E, 0xFF), (0x3F, 0x00), (0x40, 0x77), (0x41, 0x40),
    (0x42, 0x00), (0x43, 0x30), (0x44, 0xA0), (0x45, 0x5C), (0x46, 0x00), (0x47, 0x00),
    (0x48, 0x58), (0x4A, 0x1E), (0x4B, 0x1E), (0x4C, 0x00), (0x4D, 0x00), (0x4E, 0xA0),
    (0x4F, 0x80), (0x50, 0x00), (0x51, 0x00), (0x52, 0x00), (0x53, 0x00), (0x54, 0x00),
    (0x57, 0x80), (0x59, 0x10), (0x5A, 0x08), (0x5B, 0x94), (0x5C, 0xE8), (0x5D, 0x08),
    (0x5E, 0x3D), (0x5F, 0x99), (0x60, 0x45), (0x61, 0x40), (0x63, 0x2D), (0x64, 0x02),
    (0x65, 0x96), (0x66, 0x00), (0x67, 0x97), (0x68, 0x01), (0x69, 0xCD), (0x6A, 0x01),
    (0x6B, 0xB0), (0x6C, 0x04), (0x6D, 0x2C), (0x6E, 0x01), (0x6F, 0x32), (0x71, 0x00),
    (0x72, 0x01), (0x73, 0x35), (0x74, 0x00), (0x75, 0x33), (0x76, 0x31), (0x77, 0x01),
    (0x7C, 0x84), (0x7D, 0x03), (0x7E, 0x01),
];

/// Map a raw flag word to a gesture.
///
/// Opposite directions reported together mean a slow wave along that axis;
/// any other combination is a disordered slow wave.
pub fn decode_flags(flags: u16) -> Option<Gesture> {
    let gesture = match flags {
        0 => return None,
        FLAG_RIGHT => Gesture::Right,
        FLAG_LEFT => Gesture::Left,
        FLAG_UP => Gesture::Up,
        FLAG_DOWN => Gesture::Down,
        FLAG_FORWARD => Gesture::Forward,
        FLAG_BACKWARD => Gesture::Backward,
        FLAG_CLOCKWISE => Gesture::Clockwise,
        FLAG_ANTI_CLOCKWISE => Gesture::AntiClockwise,
        FLAG_WAVE => Gesture::Wave,
        f if f == FLAG_LEFT | FLAG_RIGHT => Gesture::WaveSlowlyLeftRight,
        f if f == FLAG_UP | FLAG_DOWN => Gesture::WaveSlowlyUpDown,
        f if f == FLAG_FORWARD | FLAG_BACKWARD => Gesture::WaveSlowlyForwardBackward,
        _ => Gesture::WaveSlowlyDisorder,
    };
    Some(gesture)
}

fn is_planar(gesture: Gesture) -> bool {
    matches!(
        gesture,
        Gesture::Right | Gesture::Left | Gesture::Up | Gesture::Down
    )
}

/// PAJ7620U2 on an I2C bus
pub struct Paj7620<I2C> {
    i2c: I2C,
    address: u8,
    high_rate: bool,
    initialized: bool,
    /// Low-rate mode holds a planar gesture for one poll in case the hand
    /// continues towards or away from the sensor
    held: Option<Gesture>,
}

impl<I2C: I2c> Paj7620<I2C> {
    pub fn new(i2c: I2C) -> Self {
        Self {
            i2c,
            address: DEFAULT_ADDRESS,
            high_rate: false,
            initialized: false,
            held: None,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Give the bus back
    pub fn release(self) -> I2C {
        self.i2c
    }

    fn write_register(&mut self, register: u8, value: u8) -> Result<(), BridgeError> {
        self.i2c
            .write(self.address, &[register, value])
            .map_err(|_| BridgeError::SensorError)
    }

    fn read_register(&mut self, register: u8) -> Result<u8, BridgeError> {
        let mut value = [0u8; 1];
        self.i2c
            .write_read(self.address, &[register], &mut value)
            .map_err(|_| BridgeError::SensorError)?;
        Ok(value[0])
    }

    pub fn select_bank(&mut self, bank: Bank) -> Result<(), BridgeError> {
        self.write_register(REG_BANK_SELECT, bank as u8)
    }

    pub fn read_part_id(&mut self) -> Result<u16, BridgeError> {
        self.select_bank(Bank::Bank0)?;
        let low = self.read_register(REG_PART_ID_LOW)?;
        let high = self.read_register(REG_PART_ID_HIGH)?;
        Ok(u16::from_le_bytes([low, high]))
    }

    /// Raw gesture flag word, bank 0 registers 0x43 and 0x44
    pub fn read_flags(&mut self) -> Result<u16, BridgeError> {
        let low = self.read_register(REG_GESTURE_FLAGS_LOW)?;
        let high = self.read_register(REG_GESTURE_FLAGS_HIGH)?;
        Ok(u16::from_le_bytes([low, high]))
    }

    fn next_low_rate(&mut self, current: Option<Gesture>) -> Option<Gesture> {
        match (self.held.take(), current) {
            (Some(_), Some(depth @ (Gesture::Forward | Gesture::Backward))) => Some(depth),
            (Some(held), Some(next)) if is_planar(next) => {
                self.held = Some(next);
                Some(held)
            }
            (Some(held), None) => Some(held),
            (Some(held), Some(other)) => {
                // Keep the newer gesture for the next poll
                self.held = Some(other);
                Some(held)
            }
            (None, Some(next)) if is_planar(next) => {
                self.held = Some(next);
                None
            }
            (None, other) => other,
        }
    }
}

impl<I2C: I2c> GestureSensor for Paj7620<I2C> {
    fn begin(&mut self) -> Result<(), BridgeError> {
        self.initialized = false;

        // The first transaction only wakes the sensor and may be NACKed
        let _ = self.select_bank(Bank::Bank0);

        let part_id = self.read_part_id()?;
        if part_id != PART_ID {
            debug!("[GESTURE] Unexpected part id 0x{:04x}", part_id);
            return Err(BridgeError::SensorError);
        }

        for (register, value) in INIT_REGISTERS {
            self.write_register(register, value)?;
        }
        self.select_bank(Bank::Bank0)?;

        self.initialized = true;
        info!("[GESTURE] PAJ7620U2 part id 0x{:04x}", part_id);
        Ok(())
    }

    fn set_high_rate(&mut self, enabled: bool) {
        self.high_rate = enabled;
        self.held = None;
    }

    fn poll(&mut self) -> Option<Gesture> {
        if !self.initialized {
            return None;
        }

        let current = match self.read_flags() {
            Ok(flags) => decode_flags(flags),
            Err(e) => {
                debug!("[GESTURE] Flag read failed: {}", e);
                None
            }
        };

        if self.high_rate {
            current
        } else {
            self.next_low_rate(current)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::i2c::{ErrorKind, ErrorType, Operation};
    use std::collections::VecDeque;

    /// Register-file I2C fake with bank switching
    struct FakeBus {
        bank: u8,
        banks: [[u8; 256]; 2],
        writes: Vec<(u8, u8, u8)>,
        flag_reads: VecDeque<u16>,
        nack_first: bool,
    }

    impl FakeBus {
        fn paj7620() -> Self {
            let mut banks = [[0u8; 256]; 2];
            banks[0][REG_PART_ID_LOW as usize] = 0x20;
            banks[0][REG_PART_ID_HIGH as usize] = 0x76;
            Self {
                bank: 0,
                banks,
                writes: Vec::new(),
                flag_reads: VecDeque::new(),
                nack_first: false,
            }
        }

        fn read(&mut self, register: u8) -> u8 {
            if self.bank == 0 && register == REG_GESTURE_FLAGS_LOW {
                let flags = self.flag_reads.front().copied().unwrap_or(0);
                return flags as u8;
            }
            if self.bank == 0 && register == REG_GESTURE_FLAGS_HIGH {
                let flags = self.flag_reads.pop_front().unwrap_or(0);
                return (flags >> 8) as u8;
            }
            self.banks[self.bank as usize][register as usize]
        }
    }

    impl ErrorType for FakeBus {
        type Error = ErrorKind;
    }

    impl I2c for FakeBus {
        fn transaction(
            &mut self,
            address: u8,
            operations: &mut [Operation<'_>],
        ) -> Result<(), Self::Error> {
            assert_eq!(address, DEFAULT_ADDRESS);
            if self.nack_first {
                self.nack_first = false;
                return Err(ErrorKind::Other);
            }

            let mut pointer = None;
            for op in operations {
                match op {
                    Operation::Write(bytes) => {
                        if bytes.len() == 2 {
                            let (register, value) = (bytes[0], bytes[1]);
                            if register == REG_BANK_SELECT {
                                self.bank = value;
                            } else {
                                self.writes.push((self.bank, register, value));
                            }
                        } else {
                            pointer = Some(bytes[0]);
                        }
                    }
                    Operation::Read(buf) => {
                        let register = pointer.expect("read without register pointer");
                        buf[0] = self.read(register);
                    }
                }
            }
            Ok(())
        }
    }

    fn ready_sensor(flags: &[u16]) -> Paj7620<FakeBus> {
        let mut bus = FakeBus::paj7620();
        bus.flag_reads = flags.iter().copied().collect();
        let mut sensor = Paj7620::new(bus);
        sensor.begin().unwrap();
        sensor
    }

    #[test]
    fn begin_checks_part_id_and_loads_table() {
        let sensor = ready_sensor(&[]);
        assert!(sensor.is_initialized());

        let bus = sensor.release();
        let bank_switches = INIT_REGISTERS
            .iter()
            .filter(|(register, _)| *register == REG_BANK_SELECT)
            .count();
        assert_eq!(bus.writes.len(), INIT_REGISTERS.len() - bank_switches);
        assert!(bus.writes.contains(&(1, 0x7E, 0x01)));
        assert_eq!(bus.bank, 0);
    }

    #[test]
    fn begin_survives_wakeup_nack() {
        let mut bus = FakeBus::paj7620();
        bus.nack_first = true;
        let mut sensor = Paj7620::new(bus);
        assert_eq!(sensor.begin(), Ok(()));
    }

    #[test]
    fn wrong_part_id_fails() {
        let mut bus = FakeBus::paj7620();
        bus.banks[0][REG_PART_ID_HIGH as usize] = 0x00;
        let mut sensor = Paj7620::new(bus);

        assert_eq!(sensor.begin(), Err(BridgeError::SensorError));
        assert!(!sensor.is_initialized());
        assert_eq!(sensor.poll(), None);
    }

    #[test]
    fn flags_decode_to_gestures() {
        assert_eq!(decode_flags(0), None);
        assert_eq!(decode_flags(FLAG_UP), Some(Gesture::Up));
        assert_eq!(decode_flags(FLAG_WAVE), Some(Gesture::Wave));
        assert_eq!(
            decode_flags(FLAG_LEFT | FLAG_RIGHT),
            Some(Gesture::WaveSlowlyLeftRight)
        );
        assert_eq!(
            decode_flags(FLAG_FORWARD | FLAG_BACKWARD),
            Some(Gesture::WaveSlowlyForwardBackward)
        );
        assert_eq!(
            decode_flags(FLAG_UP | FLAG_CLOCKWISE),
            Some(Gesture::WaveSlowlyDisorder)
        );
    }

    #[test]
    fn high_rate_reports_immediately() {
        let mut sensor = ready_sensor(&[FLAG_LEFT, 0, FLAG_WAVE]);
        sensor.set_high_rate(true);

        assert_eq!(sensor.poll(), Some(Gesture::Left));
        assert_eq!(sensor.poll(), None);
        assert_eq!(sensor.poll(), Some(Gesture::Wave));
    }

    #[test]
    fn low_rate_prefers_depth_after_planar() {
        let mut sensor = ready_sensor(&[FLAG_UP, FLAG_FORWARD, FLAG_RIGHT, 0]);

        assert_eq!(sensor.poll(), None);
        assert_eq!(sensor.poll(), Some(Gesture::Forward));
        assert_eq!(sensor.poll(), None);
        assert_eq!(sensor.poll(), Some(Gesture::Right));
    }

    #[test]
    fn low_rate_passes_rotations_straight_through() {
        let mut sensor = ready_sensor(&[FLAG_CLOCKWISE]);
        assert_eq!(sensor.poll(), Some(Gesture::Clockwise));
    }
}
