//! In-memory fakes for the hardware traits, shared by the unit tests

use crate::BridgeError;
use crate::connectivity::{Endpoint, LifecycleEvent, OutboundMessage, SocketSession, WifiLink};
use crate::gesture::Gesture;
use crate::peripherals::{Camera, Clock, Display, Frame, GestureSensor, PixelFormat};
use crate::transcode::Transcoder;
use crate::ws::Transport;
use core::cell::Cell;
use core::convert::Infallible;
use std::collections::VecDeque;

/// WiFi station that associates after a number of status checks
pub struct FakeWifi {
    pub associated: bool,
    pub pending_checks: u32,
    pub begin_failures: u32,
    pub begins: u32,
    /// `begin` re-associates a dropped link
    pub associate_on_begin: bool,
}

impl FakeWifi {
    pub fn associating_after(checks: u32) -> Self {
        Self {
            associated: true,
            pending_checks: checks,
            begin_failures: 0,
            begins: 0,
            associate_on_begin: true,
        }
    }

    pub fn never_associating() -> Self {
        Self {
            associated: false,
            pending_checks: 0,
            begin_failures: 0,
            begins: 0,
            associate_on_begin: false,
        }
    }
}

impl WifiLink for FakeWifi {
    fn begin(&mut self, _ssid: &str, _password: &str) -> Result<(), BridgeError> {
        self.begins += 1;
        if self.begin_failures > 0 {
            self.begin_failures -= 1;
            return Err(BridgeError::WiFiError);
        }
        if self.associate_on_begin {
            self.associated = true;
        }
        Ok(())
    }

    fn is_associated(&mut self) -> bool {
        if self.pending_checks > 0 {
            self.pending_checks -= 1;
            return false;
        }
        self.associated
    }

    fn local_ip(&mut self) -> Option<[u8; 4]> {
        self.associated.then_some([192, 168, 1, 42])
    }
}

/// Socket session that records what was sent and replays scripted events
#[derive(Default)]
pub struct FakeSession {
    pub open: bool,
    pub opened: u32,
    pub reconnect_interval_ms: u32,
    pub binaries: Vec<Vec<u8>>,
    pub texts: Vec<String>,
    events: VecDeque<LifecycleEvent>,
}

impl FakeSession {
    pub fn script(&mut self, event: LifecycleEvent) {
        self.events.push_back(event);
    }

    pub fn pending_events(&self) -> usize {
        self.events.len()
    }
}

impl SocketSession for FakeSession {
    fn open(&mut self, _endpoint: &Endpoint, reconnect_interval_ms: u32) {
        self.opened += 1;
        self.reconnect_interval_ms = reconnect_interval_ms;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    /// Every attempt is recorded, delivered or not
    fn send(&mut self, message: OutboundMessage<'_>) -> Result<(), BridgeError> {
        match message {
            OutboundMessage::Binary(bytes) => self.binaries.push(bytes.to_vec()),
            OutboundMessage::Text(text) => self.texts.push(text.to_string()),
        }

        if self.open {
            Ok(())
        } else {
            Err(BridgeError::SessionClosed)
        }
    }

    fn poll(&mut self, _now_ms: u64) -> Option<LifecycleEvent> {
        self.events.pop_front()
    }
}

/// Byte stream with an inbound queue and a record of written bytes
#[derive(Default)]
pub struct FakeTransport {
    pub connected: bool,
    pub connects: u32,
    pub closes: u32,
    pub refuse_connects: u32,
    pub fail_writes: bool,
    pub written: Vec<u8>,
    inbound: VecDeque<u8>,
}

impl FakeTransport {
    pub fn feed(&mut self, bytes: &[u8]) {
        self.inbound.extend(bytes.iter().copied());
    }

    /// Bytes fed but not yet read
    pub fn inbound_len(&self) -> usize {
        self.inbound.len()
    }
}

impl Transport for FakeTransport {
    fn connect(&mut self, _host: &str, _port: u16) -> Result<(), BridgeError> {
        self.connects += 1;
        if self.refuse_connects > 0 {
            self.refuse_connects -= 1;
            return Err(BridgeError::TransportError);
        }
        self.connected = true;
        Ok(())
    }

    fn is_connected(&mut self) -> bool {
        self.connected
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), BridgeError> {
        if self.fail_writes || !self.connected {
            return Err(BridgeError::TransportError);
        }
        self.written.extend_from_slice(data);
        Ok(())
    }

    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, BridgeError> {
        let n = buf.len().min(self.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(self.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn close(&mut self) {
        self.closes += 1;
        self.connected = false;
    }
}

/// Camera serving one static buffer, asserting acquire/release pairing
pub struct FakeCamera {
    pub buffer: Vec<u8>,
    pub width: u16,
    pub height: u16,
    pub format: PixelFormat,
    pub schedule: VecDeque<bool>,
    pub ready_by_default: bool,
    pub acquired: u32,
    pub released: u32,
    pub outstanding: bool,
    pub begins: u32,
}

impl FakeCamera {
    fn qvga(ready_by_default: bool) -> Self {
        Self {
            buffer: vec![0x5A; 320 * 240 * 2],
            width: 320,
            height: 240,
            format: PixelFormat::Rgb565,
            schedule: VecDeque::new(),
            ready_by_default,
            acquired: 0,
            released: 0,
            outstanding: false,
            begins: 0,
        }
    }

    pub fn qvga_always_ready() -> Self {
        Self::qvga(true)
    }

    pub fn never_ready() -> Self {
        Self::qvga(false)
    }

    /// Frame availability per cycle, then the default
    pub fn with_schedule(mut self, schedule: &[bool]) -> Self {
        self.schedule = schedule.iter().copied().collect();
        self
    }
}

impl Camera for FakeCamera {
    fn begin(&mut self) -> Result<(), BridgeError> {
        self.begins += 1;
        Ok(())
    }

    fn acquire(&mut self) -> Option<Frame<'_>> {
        assert!(!self.outstanding, "frame acquired before the previous one was released");

        let ready = self.schedule.pop_front().unwrap_or(self.ready_by_default);
        if !ready {
            return None;
        }

        self.outstanding = true;
        self.acquired += 1;
        Some(Frame {
            data: &self.buffer,
            width: self.width,
            height: self.height,
            format: self.format,
        })
    }

    fn release(&mut self) {
        assert!(self.outstanding, "release without an acquired frame");
        self.outstanding = false;
        self.released += 1;
    }
}

/// Display counting blits
pub struct FakeDisplay {
    pub width: u16,
    pub height: u16,
    pub blits: u32,
    pub fail: bool,
    pub begins: u32,
}

impl FakeDisplay {
    pub fn qvga() -> Self {
        Self {
            width: 320,
            height: 240,
            blits: 0,
            fail: false,
            begins: 0,
        }
    }
}

impl Display for FakeDisplay {
    fn begin(&mut self) -> Result<(), BridgeError> {
        self.begins += 1;
        Ok(())
    }

    fn width(&self) -> u16 {
        self.width
    }

    fn height(&self) -> u16 {
        self.height
    }

    fn pixel_format(&self) -> PixelFormat {
        PixelFormat::Rgb565
    }

    fn blit(
        &mut self,
        _x: u16,
        _y: u16,
        _width: u16,
        _height: u16,
        _data: &[u8],
    ) -> Result<(), BridgeError> {
        if self.fail {
            return Err(BridgeError::DisplayError);
        }
        self.blits += 1;
        Ok(())
    }
}

/// Transcoder returning a fixed payload
#[derive(Default)]
pub struct FakeTranscoder {
    pub calls: u32,
    pub fail: bool,
    pub last_quality: Option<u8>,
}

impl FakeTranscoder {
    pub const PAYLOAD: [u8; 4] = [0xFF, 0xD8, 0xFF, 0xD9];
}

impl Transcoder for FakeTranscoder {
    fn transcode(&mut self, _frame: &Frame<'_>, quality: u8) -> Result<Vec<u8>, BridgeError> {
        self.calls += 1;
        self.last_quality = Some(quality);
        if self.fail {
            return Err(BridgeError::TranscodeError);
        }
        Ok(Self::PAYLOAD.to_vec())
    }
}

/// Gesture sensor replaying a script, `None` once it runs out
pub struct FakeGestureSensor {
    pub script: VecDeque<Option<Gesture>>,
    pub begin_failures: u32,
    pub begins: u32,
    pub high_rate: bool,
    pub polls: u32,
}

impl FakeGestureSensor {
    pub fn scripted(script: &[Option<Gesture>]) -> Self {
        Self {
            script: script.iter().copied().collect(),
            begin_failures: 0,
            begins: 0,
            high_rate: false,
            polls: 0,
        }
    }
}

impl GestureSensor for FakeGestureSensor {
    fn begin(&mut self) -> Result<(), BridgeError> {
        self.begins += 1;
        if self.begin_failures > 0 {
            self.begin_failures -= 1;
            return Err(BridgeError::SensorError);
        }
        Ok(())
    }

    fn set_high_rate(&mut self, enabled: bool) {
        self.high_rate = enabled;
    }

    fn poll(&mut self) -> Option<Gesture> {
        self.polls += 1;
        self.script.pop_front().flatten()
    }
}

/// Button pin replaying raw readings (0 pressed, 1 released)
pub struct FakeButton {
    pub readings: VecDeque<u8>,
}

impl FakeButton {
    pub fn reading(readings: &[u8]) -> Self {
        Self {
            readings: readings.iter().copied().collect(),
        }
    }

    fn next(&mut self) -> u8 {
        self.readings.pop_front().unwrap_or(1)
    }
}

impl embedded_hal::digital::ErrorType for FakeButton {
    type Error = Infallible;
}

impl embedded_hal::digital::InputPin for FakeButton {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.next() != 0)
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(self.next() == 0)
    }
}

/// Clock advancing a fixed step on every read
pub struct FakeClock {
    now: Cell<u64>,
    step_ms: u64,
}

impl FakeClock {
    pub fn stepping(step_ms: u64) -> Self {
        Self {
            now: Cell::new(0),
            step_ms,
        }
    }
}

impl Clock for FakeClock {
    fn now_ms(&self) -> u64 {
        let now = self.now.get();
        self.now.set(now + self.step_ms);
        now
    }
}
