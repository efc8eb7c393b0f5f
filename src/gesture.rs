//! Gesture poller
//!
//! Polls the gesture sensor once per cycle, forwards recognized gestures as
//! `{"grove_gesture": "<description>"}` text messages and triggers WiFi
//! reconnection when the link has dropped.

use crate::connectivity::{
    ConnectivityState, ConnectivitySupervisor, OutboundMessage, SocketSession, WifiLink,
};
use crate::peripherals::GestureSensor;
use crate::retry::{RetryPolicy, retry};
use crate::{BridgeError, config};
use alloc::string::{String, ToString};
use embedded_hal::delay::DelayNs;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

/// Gestures reported by the sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gesture {
    Right,
    Left,
    Up,
    Down,
    Forward,
    Backward,
    Clockwise,
    AntiClockwise,
    Wave,
    WaveSlowlyDisorder,
    WaveSlowlyLeftRight,
    WaveSlowlyUpDown,
    WaveSlowlyForwardBackward,
}

impl Gesture {
    /// Human-readable name sent to the bridge endpoint
    pub fn describe(&self) -> &'static str {
        match self {
            Gesture::Right => "Right",
            Gesture::Left => "Left",
            Gesture::Up => "Up",
            Gesture::Down => "Down",
            Gesture::Forward => "Forward",
            Gesture::Backward => "Backward",
            Gesture::Clockwise => "Clockwise",
            Gesture::AntiClockwise => "Anti-Clockwise",
            Gesture::Wave => "Wave",
            Gesture::WaveSlowlyDisorder => "WaveSlowlyDisorder",
            Gesture::WaveSlowlyLeftRight => "WaveSlowlyLeftRight",
            Gesture::WaveSlowlyUpDown => "WaveSlowlyUpDown",
            Gesture::WaveSlowlyForwardBackward => "WaveSlowlyForwardBackward",
        }
    }
}

/// Text message carrying one gesture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GestureMessage {
    pub grove_gesture: String,
}

impl GestureMessage {
    pub fn new(description: &str) -> Self {
        Self {
            grove_gesture: description.to_string(),
        }
    }

    pub fn to_json(&self) -> Result<String, BridgeError> {
        serde_json::to_string(self).map_err(|_| BridgeError::SerializationError)
    }

    pub fn from_json(text: &str) -> Result<Self, BridgeError> {
        serde_json::from_str(text).map_err(|_| BridgeError::SerializationError)
    }
}

/// What one poll did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GestureOutcome {
    /// Gesture recognized this cycle
    pub gesture: Option<Gesture>,
    /// The text message was accepted by the session
    pub sent: bool,
    /// WiFi reconnection was run
    pub reconnected: bool,
}

/// Per-cycle gesture sensing
pub struct GesturePoller<G> {
    sensor: G,
    init_policy: RetryPolicy,
}

impl<G: GestureSensor> GesturePoller<G> {
    pub fn new(sensor: G) -> Self {
        Self {
            sensor,
            init_policy: RetryPolicy::forever(config::SENSOR_RETRY_INTERVAL_MS),
        }
    }

    pub fn with_init_policy(mut self, policy: RetryPolicy) -> Self {
        self.init_policy = policy;
        self
    }

    pub fn get_sensor(&self) -> &G {
        &self.sensor
    }

    pub fn get_sensor_mut(&mut self) -> &mut G {
        &mut self.sensor
    }

    /// Initialize the sensor, retrying until it answers, then switch it to
    /// high-rate reporting
    pub fn begin<D: DelayNs>(&mut self, delay: &mut D) -> Result<(), BridgeError> {
        info!("[GESTURE] PAJ7620U2 Init");

        let sensor = &mut self.sensor;
        retry(
            &self.init_policy,
            delay,
            || sensor.begin(),
            |attempt, e| warn!("[GESTURE] initial PAJ7620U2 failure! ({}, attempt {})", e, attempt),
        )?;

        self.sensor.set_high_rate(true);
        info!("[GESTURE] PAJ7620U2 init succeed.");
        Ok(())
    }

    /// Poll once, forward any gesture, then reconnect if the link is down
    pub fn poll<W, S, D>(
        &mut self,
        supervisor: &mut ConnectivitySupervisor<W, S>,
        delay: &mut D,
    ) -> GestureOutcome
    where
        W: WifiLink,
        S: SocketSession,
        D: DelayNs,
    {
        let mut outcome = GestureOutcome::default();

        if let Some(gesture) = self.sensor.poll() {
            outcome.gesture = Some(gesture);
            outcome.sent = Self::forward(gesture, supervisor);
        }

        supervisor.is_linked();
        if supervisor.get_state() == ConnectivityState::Disconnected {
            info!("[GESTURE] Link down, reconnecting");
            if let Err(e) = supervisor.connect(delay) {
                warn!("[GESTURE] Reconnect failed: {}", e);
            }
            outcome.reconnected = true;
        }

        outcome
    }

    fn forward<W, S>(gesture: Gesture, supervisor: &mut ConnectivitySupervisor<W, S>) -> bool
    where
        W: WifiLink,
        S: SocketSession,
    {
        let description = gesture.describe();
        info!("[GESTURE] {}", description);

        let json = match GestureMessage::new(description).to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!("[GESTURE] Failed to encode gesture: {}", e);
                return false;
            }
        };
        info!("[GESTURE] {}", json);

        match supervisor.send(OutboundMessage::Text(&json)) {
            Ok(()) => true,
            Err(e) => {
                debug!("[GESTURE] Gesture not sent: {}", e);
                false
            }
        }
    }
}
