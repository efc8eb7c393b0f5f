//! Error types for the gesture camera bridge

use crate::peripherals::PixelFormat;

/// Errors raised by the bridge components
///
/// Only the startup paths propagate these to the caller. Inside the event
/// loop they are logged and the cycle continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    /// WiFi configuration or association error
    #[error("WiFi error")]
    WiFiError,
    /// Socket session is not open or rejected the message
    #[error("socket session not open")]
    SessionClosed,
    /// Underlying byte transport failed
    #[error("transport error")]
    TransportError,
    /// WebSocket handshake or framing violation
    #[error("protocol error")]
    ProtocolError,
    /// Frame cannot be rendered on the display as-is
    #[error(
        "frame {frame_width}x{frame_height} {frame_format:?} does not fit display {display_width}x{display_height} {display_format:?}"
    )]
    FrameMismatch {
        frame_width: u16,
        frame_height: u16,
        frame_format: PixelFormat,
        display_width: u16,
        display_height: u16,
        display_format: PixelFormat,
    },
    /// Display bus error
    #[error("display error")]
    DisplayError,
    /// Camera sensor or capture error
    #[error("camera error")]
    CameraError,
    /// JPEG transcoding error
    #[error("transcode error")]
    TranscodeError,
    /// Gesture sensor bus or identification error
    #[error("gesture sensor error")]
    SensorError,
    /// JSON serialization error
    #[error("serialization error")]
    SerializationError,
    /// A bounded retry policy gave up
    #[error("gave up after {0} attempts")]
    RetriesExhausted(u32),
}
