#![cfg_attr(not(test), no_std)]

//! ESP32-S3 Gesture Camera Bridge Library
//!
//! This library provides the control loop for a handheld camera bridge that
//! streams JPEG frames and gesture events to a WebSocket endpoint, together
//! with the sensor and display drivers it runs on. Hardware is reached
//! through `embedded-hal` traits so the loop runs against fakes on the host.

extern crate alloc;

pub mod connectivity;
pub mod error;
pub mod gc0308;
pub mod gesture;
pub mod ili9342;
pub mod mode_toggle;
pub mod paj7620;
pub mod peripherals;
pub mod pipeline;
pub mod retry;
pub mod scheduler;
#[cfg(test)]
mod testing;
pub mod transcode;
pub mod ws;

pub use error::BridgeError;

/// Project version information
pub const VERSION: &str = "0.1.0-dev";

/// Default configuration constants
pub mod config {
    /// WiFi configuration
    /// Read from environment variables at compile time
    pub const WIFI_SSID: &str = env!("WIFI_SSID");
    pub const WIFI_PASSWORD: &str = env!("WIFI_PASSWORD");

    /// Bridge endpoint (IPv4 literal, the bare-metal stack has no resolver)
    pub const BRIDGE_HOST: &str = env!("BRIDGE_HOST");
    pub const BRIDGE_PORT: u16 = parse_port(env!("BRIDGE_PORT"), 1880);
    pub const BRIDGE_PATH: &str = env!("BRIDGE_PATH");

    /// Delay between WiFi association checks in milliseconds
    pub const WIFI_RETRY_INTERVAL_MS: u32 = 500;

    /// WebSocket reconnection interval in milliseconds
    pub const SOCKET_RECONNECT_INTERVAL_MS: u32 = 500;

    /// Delay between gesture sensor init attempts in milliseconds
    pub const SENSOR_RETRY_INTERVAL_MS: u32 = 500;

    /// JPEG quality used for streamed frames
    pub const JPEG_QUALITY: u8 = 40;

    /// Streaming toggle button GPIO (active low)
    pub const BUTTON_PIN: u8 = 8;

    /// Upper bound on lifecycle events handled by one pump
    pub const MAX_EVENTS_PER_PUMP: usize = 8;

    const fn parse_port(text: &str, fallback: u16) -> u16 {
        let bytes = text.as_bytes();
        if bytes.is_empty() {
            return fallback;
        }

        let mut value: u32 = 0;
        let mut i = 0;
        while i < bytes.len() {
            let digit = bytes[i];
            if !digit.is_ascii_digit() {
                return fallback;
            }
            value = value * 10 + (digit - b'0') as u32;
            if value > u16::MAX as u32 {
                return fallback;
            }
            i += 1;
        }

        value as u16
    }

}
