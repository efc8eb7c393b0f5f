//! WebSocket client session
//!
//! Minimal RFC 6455 client over a byte stream [`Transport`]: HTTP upgrade
//! handshake with accept-key check, masked outbound frames, inbound frame
//! parsing and a fixed reconnect interval while the session is down.
//!
//! Only unfragmented text frames and control frames are buffered. Binary
//! and pong payloads are skipped as they arrive, so a server echoing the
//! stream back costs no memory.

use crate::BridgeError;
use crate::connectivity::{Endpoint, LifecycleEvent, OutboundMessage, SocketSession};
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use heapless::Vec as HVec;
use log::{debug, warn};
use sha1::{Digest, Sha1};

/// Give up on a handshake that has not completed within this time
const HANDSHAKE_TIMEOUT_MS: u64 = 5000;

/// Largest text payload buffered; longer text is skipped
const MAX_INBOUND_TEXT: usize = 4096;

/// RFC 6455 limit for ping, pong and close payloads
const MAX_CONTROL_PAYLOAD: usize = 125;

/// Appended to the client key before hashing, RFC 6455 section 1.3
const ACCEPT_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Bytes pulled from the transport per poll
const READ_CHUNK: usize = 512;

/// Bytes masked per transport write
const WRITE_CHUNK: usize = 256;

/// Non-blocking byte stream the session runs over
pub trait Transport {
    /// Open a stream to `host:port`
    fn connect(&mut self, host: &str, port: u16) -> Result<(), BridgeError>;

    fn is_connected(&mut self) -> bool;

    fn write_all(&mut self, data: &[u8]) -> Result<(), BridgeError>;

    /// Read buffered bytes, returning `Ok(0)` when nothing is pending
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, BridgeError>;

    fn close(&mut self);
}

/// Frame opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    pub fn from_u8(value: u8) -> Result<Self, BridgeError> {
        match value {
            0x0 => Ok(Opcode::Continuation),
            0x1 => Ok(Opcode::Text),
            0x2 => Ok(Opcode::Binary),
            0x8 => Ok(Opcode::Close),
            0x9 => Ok(Opcode::Ping),
            0xA => Ok(Opcode::Pong),
            _ => Err(BridgeError::ProtocolError),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
        }
    }
}

/// Parsed frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    pub opcode: Opcode,
    pub mask: Option<[u8; 4]>,
    pub payload_len: usize,
    pub header_len: usize,
}

/// Encode a client frame header (FIN set, always masked)
pub fn encode_header(opcode: Opcode, payload_len: usize, mask: [u8; 4]) -> HVec<u8, 14> {
    let mut header = HVec::new();

    // Capacity is 14 bytes, the longest possible header
    let _ = header.push(0x80 | opcode.as_u8());
    if payload_len < 126 {
        let _ = header.push(0x80 | payload_len as u8);
    } else if payload_len <= u16::MAX as usize {
        let _ = header.push(0x80 | 126);
        let _ = header.extend_from_slice(&(payload_len as u16).to_be_bytes());
    } else {
        let _ = header.push(0x80 | 127);
        let _ = header.extend_from_slice(&(payload_len as u64).to_be_bytes());
    }
    let _ = header.extend_from_slice(&mask);

    header
}

/// Parse a frame header from the front of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed.
pub fn parse_header(buf: &[u8]) -> Result<Option<FrameHeader>, BridgeError> {
    if buf.len() < 2 {
        return Ok(None);
    }

    let fin = buf[0] & 0x80 != 0;
    if buf[0] & 0x70 != 0 {
        // No extensions negotiated, reserved bits must be clear
        return Err(BridgeError::ProtocolError);
    }
    let opcode = Opcode::from_u8(buf[0] & 0x0F)?;
    let masked = buf[1] & 0x80 != 0;

    let (payload_len, mut offset) = match buf[1] & 0x7F {
        126 => {
            if buf.len() < 4 {
                return Ok(None);
            }
            (u16::from_be_bytes([buf[2], buf[3]]) as usize, 4)
        }
        127 => {
            if buf.len() < 10 {
                return Ok(None);
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&buf[2..10]);
            let len = u64::from_be_bytes(raw);
            (usize::try_from(len).map_err(|_| BridgeError::ProtocolError)?, 10)
        }
        len => (len as usize, 2),
    };

    let mask = if masked {
        if buf.len() < offset + 4 {
            return Ok(None);
        }
        let key = [buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]];
        offset += 4;
        Some(key)
    } else {
        None
    };

    Ok(Some(FrameHeader {
        fin,
        opcode,
        mask,
        payload_len,
        header_len: offset,
    }))
}

/// XOR `data` with the 4-byte mask, starting at mask position `start`
pub fn apply_mask(data: &mut [u8], mask: [u8; 4], start: usize) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= mask[(start + i) % 4];
    }
}

/// Build the HTTP upgrade request
pub fn handshake_request(endpoint: &Endpoint, key: &str) -> String {
    format!(
        "GET {} HTTP/1.1\r\n\
         Host: {}:{}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         User-Agent: gesture-cam-rs\r\n\
         \r\n",
        endpoint.path, endpoint.host, endpoint.port, key
    )
}

/// `Sec-WebSocket-Accept` value the server must return for `key`
pub fn accept_key(key: &str) -> String {
    let digest = Sha1::new()
        .chain_update(key.as_bytes())
        .chain_update(ACCEPT_GUID)
        .finalize();
    BASE64.encode(digest)
}

/// Value of header `name` if `line` carries it, names compared ignoring case
fn header_value<'a>(line: &'a [u8], name: &[u8]) -> Option<&'a [u8]> {
    let colon = line.iter().position(|&b| b == b':')?;
    let (key, value) = line.split_at(colon);
    key.trim_ascii()
        .eq_ignore_ascii_case(name)
        .then(|| value[1..].trim_ascii())
}

/// Check an upgrade response, returning the header length when complete
fn parse_handshake_response(
    buf: &[u8],
    expected_accept: &str,
) -> Result<Option<usize>, BridgeError> {
    let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
        return Ok(None);
    };

    let mut lines = buf[..end]
        .split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line));

    let status_line = lines.next().unwrap_or(&[]);
    if !status_line.starts_with(b"HTTP/1.1 101") {
        warn!(
            "[WS] Upgrade rejected: {}",
            String::from_utf8_lossy(status_line)
        );
        return Err(BridgeError::ProtocolError);
    }

    match lines.find_map(|line| header_value(line, b"sec-websocket-accept")) {
        Some(accept) if accept == expected_accept.as_bytes() => Ok(Some(end + 4)),
        Some(accept) => {
            warn!(
                "[WS] Accept key mismatch: {}",
                String::from_utf8_lossy(accept)
            );
            Err(BridgeError::ProtocolError)
        }
        None => {
            warn!("[WS] Upgrade response has no accept key");
            Err(BridgeError::ProtocolError)
        }
    }
}

/// xorshift32 source for mask keys and handshake nonces
struct MaskSource(u32);

impl MaskSource {
    fn new(seed: u32) -> Self {
        // xorshift has a fixed point at zero
        Self(if seed == 0 { 0x2545_F491 } else { seed })
    }

    fn next_u32(&mut self) -> u32 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.0 = x;
        x
    }

    fn next_mask(&mut self) -> [u8; 4] {
        self.next_u32().to_be_bytes()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// `open` not called yet
    Idle,
    /// Waiting for the next reconnect attempt
    Backoff { since_ms: Option<u64> },
    Handshaking { since_ms: u64 },
    Open,
}

/// WebSocket client session over a [`Transport`]
pub struct WsClient<T> {
    transport: T,
    endpoint: Option<Endpoint>,
    reconnect_interval_ms: u32,
    phase: Phase,
    rx: Vec<u8>,
    /// Payload bytes of a skipped frame still to be dropped
    discard: usize,
    expected_accept: String,
    masks: MaskSource,
    pending: Option<LifecycleEvent>,
    last_now_ms: u64,
}

impl<T: Transport> WsClient<T> {
    /// Create an idle client. `seed` feeds mask keys and handshake nonces.
    pub fn new(transport: T, seed: u32) -> Self {
        Self {
            transport,
            endpoint: None,
            reconnect_interval_ms: 0,
            phase: Phase::Idle,
            rx: Vec::new(),
            discard: 0,
            expected_accept: String::new(),
            masks: MaskSource::new(seed),
            pending: None,
            last_now_ms: 0,
        }
    }

    pub fn get_transport(&self) -> &T {
        &self.transport
    }

    pub fn get_transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn remote_url(endpoint: &Endpoint) -> String {
        format!("ws://{}:{}{}", endpoint.host, endpoint.port, endpoint.path)
    }

    fn new_key(&mut self) -> String {
        let mut nonce = [0u8; 16];
        for chunk in nonce.chunks_mut(4) {
            chunk.copy_from_slice(&self.masks.next_u32().to_be_bytes());
        }
        BASE64.encode(nonce)
    }

    /// Drop the stream and wait for the next reconnect slot
    fn drop_stream(&mut self, now_ms: u64) {
        self.transport.close();
        self.rx.clear();
        self.discard = 0;
        self.phase = Phase::Backoff {
            since_ms: Some(now_ms),
        };
    }

    fn try_connect(&mut self, endpoint: Endpoint, now_ms: u64) {
        debug!(
            "[WS] Connecting to {}:{}",
            endpoint.host, endpoint.port
        );

        if let Err(e) = self.transport.connect(endpoint.host, endpoint.port) {
            debug!("[WS] Connect failed: {}", e);
            self.drop_stream(now_ms);
            return;
        }

        let key = self.new_key();
        let request = handshake_request(&endpoint, &key);
        if let Err(e) = self.transport.write_all(request.as_bytes()) {
            debug!("[WS] Handshake write failed: {}", e);
            self.drop_stream(now_ms);
            return;
        }

        self.expected_accept = accept_key(&key);
        self.rx.clear();
        self.discard = 0;
        self.phase = Phase::Handshaking { since_ms: now_ms };
    }

    /// Pull available bytes into the receive buffer
    fn fill_rx(&mut self) -> Result<usize, BridgeError> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = self.transport.read_available(&mut chunk)?;
        self.rx.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    /// Drop the rest of a skipped frame, reading straight from the transport.
    ///
    /// Never reads past the end of the frame.
    fn skip_payload(&mut self) -> Result<(), BridgeError> {
        let buffered = self.discard.min(self.rx.len());
        self.rx.drain(..buffered);
        self.discard -= buffered;

        let mut chunk = [0u8; READ_CHUNK];
        while self.discard > 0 {
            let want = self.discard.min(READ_CHUNK);
            let n = self.transport.read_available(&mut chunk[..want])?;
            if n == 0 {
                break;
            }
            self.discard -= n;
        }
        Ok(())
    }

    fn send_frame(&mut self, opcode: Opcode, payload: &[u8]) -> Result<(), BridgeError> {
        let mask = self.masks.next_mask();
        let header = encode_header(opcode, payload.len(), mask);
        self.transport.write_all(&header)?;

        let mut buf = [0u8; WRITE_CHUNK];
        for (index, chunk) in payload.chunks(WRITE_CHUNK).enumerate() {
            let masked = &mut buf[..chunk.len()];
            masked.copy_from_slice(chunk);
            apply_mask(masked, mask, index * WRITE_CHUNK);
            self.transport.write_all(masked)?;
        }

        Ok(())
    }

    fn poll_handshake(&mut self, since_ms: u64, now_ms: u64) -> Option<LifecycleEvent> {
        if let Err(e) = self.fill_rx() {
            debug!("[WS] Read during handshake failed: {}", e);
            self.drop_stream(now_ms);
            return Some(LifecycleEvent::TransportError);
        }

        match parse_handshake_response(&self.rx, &self.expected_accept) {
            Ok(Some(header_len)) => {
                // Anything after the headers is already frame data
                self.rx.drain(..header_len);
                self.phase = Phase::Open;
                let url = self.endpoint.as_ref().map(Self::remote_url).unwrap_or_default();
                Some(LifecycleEvent::Opened(url))
            }
            Ok(None) if now_ms.saturating_sub(since_ms) > HANDSHAKE_TIMEOUT_MS => {
                warn!("[WS] Handshake timed out");
                self.drop_stream(now_ms);
                Some(LifecycleEvent::TransportError)
            }
            Ok(None) => None,
            Err(_) => {
                self.drop_stream(now_ms);
                Some(LifecycleEvent::TransportError)
            }
        }
    }

    fn poll_open(&mut self, now_ms: u64) -> Option<LifecycleEvent> {
        if !self.transport.is_connected() {
            self.drop_stream(now_ms);
            return Some(LifecycleEvent::Closed);
        }

        if let Err(e) = self.fill_rx() {
            debug!("[WS] Read failed: {}", e);
            self.drop_stream(now_ms);
            self.pending = Some(LifecycleEvent::Closed);
            return Some(LifecycleEvent::TransportError);
        }

        loop {
            if self.discard > 0 {
                if let Err(e) = self.skip_payload() {
                    return self.fail_open(now_ms, e);
                }
                if self.discard > 0 {
                    return None;
                }
            }

            let header = match parse_header(&self.rx) {
                Ok(Some(header)) => header,
                Ok(None) => return None,
                Err(e) => return self.fail_open(now_ms, e),
            };

            match header.opcode {
                Opcode::Ping | Opcode::Close if header.payload_len > MAX_CONTROL_PAYLOAD => {
                    return self.fail_open(now_ms, BridgeError::ProtocolError);
                }
                Opcode::Text if header.fin && header.payload_len <= MAX_INBOUND_TEXT => {}
                Opcode::Ping | Opcode::Close => {}
                opcode => {
                    self.rx.drain(..header.header_len);
                    self.discard = header.payload_len;
                    match opcode {
                        Opcode::Binary | Opcode::Pong => continue,
                        _ => {
                            debug!(
                                "[WS] Skipping {:?} frame of {} bytes",
                                opcode, header.payload_len
                            );
                            return Some(LifecycleEvent::Fragment);
                        }
                    }
                }
            }

            let frame_len = header.header_len + header.payload_len;
            if self.rx.len() < frame_len {
                return None;
            }

            let mut payload: Vec<u8> = self.rx.drain(..frame_len).skip(header.header_len).collect();
            if let Some(mask) = header.mask {
                apply_mask(&mut payload, mask, 0);
            }

            match header.opcode {
                Opcode::Ping => {
                    if let Err(e) = self.send_frame(Opcode::Pong, &payload) {
                        return self.fail_open(now_ms, e);
                    }
                }
                Opcode::Close => {
                    // Echo the close and drop the stream
                    let _ = self.send_frame(Opcode::Close, &payload);
                    self.drop_stream(now_ms);
                    return Some(LifecycleEvent::Closed);
                }
                _ => return Some(LifecycleEvent::InboundText(payload)),
            }
        }
    }

    fn fail_open(&mut self, now_ms: u64, error: BridgeError) -> Option<LifecycleEvent> {
        warn!("[WS] Dropping session: {}", error);
        self.drop_stream(now_ms);
        self.pending = Some(LifecycleEvent::Closed);
        Some(LifecycleEvent::TransportError)
    }
}

impl<T: Transport> SocketSession for WsClient<T> {
    fn open(&mut self, endpoint: &Endpoint, reconnect_interval_ms: u32) {
        if self.phase == Phase::Open {
            self.pending = Some(LifecycleEvent::Closed);
        }
        self.transport.close();
        self.rx.clear();
        self.discard = 0;
        self.endpoint = Some(*endpoint);
        self.reconnect_interval_ms = reconnect_interval_ms;
        // Connect on the next poll
        self.phase = Phase::Backoff { since_ms: None };
    }

    fn is_open(&self) -> bool {
        self.phase == Phase::Open
    }

    fn send(&mut self, message: OutboundMessage<'_>) -> Result<(), BridgeError> {
        if self.phase != Phase::Open {
            return Err(BridgeError::SessionClosed);
        }

        let result = match message {
            OutboundMessage::Binary(bytes) => self.send_frame(Opcode::Binary, bytes),
            OutboundMessage::Text(text) => self.send_frame(Opcode::Text, text.as_bytes()),
        };

        if let Err(e) = result {
            warn!("[WS] Send failed: {}", e);
            self.drop_stream(self.last_now_ms);
            self.pending = Some(LifecycleEvent::Closed);
            return Err(BridgeError::TransportError);
        }

        Ok(())
    }

    fn poll(&mut self, now_ms: u64) -> Option<LifecycleEvent> {
        self.last_now_ms = now_ms;

        if let Some(event) = self.pending.take() {
            return Some(event);
        }

        match self.phase {
            Phase::Idle => None,
            Phase::Backoff { since_ms } => {
                let due = since_ms.is_none_or(|since| {
                    now_ms.saturating_sub(since) >= u64::from(self.reconnect_interval_ms)
                });
                if due {
                    if let Some(endpoint) = self.endpoint {
                        self.try_connect(endpoint, now_ms);
                    }
                }
                None
            }
            Phase::Handshaking { since_ms } => self.poll_handshake(since_ms, now_ms),
            Phase::Open => self.poll_open(now_ms),
        }
    }
}
