//! Connectivity supervisor
//!
//! Owns WiFi association and the single persistent socket session. Socket
//! lifecycle events are pulled from the session during [`pump`] and handled
//! synchronously, so the whole module runs on the event loop thread.
//!
//! [`pump`]: ConnectivitySupervisor::pump

use crate::retry::{RetryPolicy, retry};
use crate::{BridgeError, config};
use alloc::string::String;
use alloc::vec::Vec;
use embedded_hal::delay::DelayNs;
use log::{debug, info, warn};

/// Link state as seen by the rest of the firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    /// WiFi is not associated
    Disconnected,
    /// WiFi is associated, socket session not open yet
    Connecting,
    /// Socket session is open
    Connected,
}

/// Remote WebSocket endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub host: &'static str,
    pub port: u16,
    pub path: &'static str,
}

impl Endpoint {
    /// Endpoint from the build-time configuration
    pub const fn from_config() -> Self {
        Self {
            host: config::BRIDGE_HOST,
            port: config::BRIDGE_PORT,
            path: config::BRIDGE_PATH,
        }
    }
}

/// Unit handed to the socket session for best-effort delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundMessage<'a> {
    Binary(&'a [u8]),
    Text(&'a str),
}

/// Socket session lifecycle events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Session established, carries the remote URL
    Opened(String),
    Closed,
    InboundText(Vec<u8>),
    TransportError,
    /// Partial or otherwise ignored frames
    Fragment,
}

/// WiFi station interface
pub trait WifiLink {
    /// Configure credentials and start association. Does not wait.
    fn begin(&mut self, ssid: &str, password: &str) -> Result<(), BridgeError>;

    fn is_associated(&mut self) -> bool;

    fn local_ip(&mut self) -> Option<[u8; 4]>;
}

/// Persistent message session with automatic reconnection
pub trait SocketSession {
    /// Start (or restart) the session towards `endpoint`, reconnecting
    /// every `reconnect_interval_ms` while it is down
    fn open(&mut self, endpoint: &Endpoint, reconnect_interval_ms: u32);

    fn is_open(&self) -> bool;

    fn send(&mut self, message: OutboundMessage<'_>) -> Result<(), BridgeError>;

    /// Process pending I/O and return the next lifecycle event, if any
    fn poll(&mut self, now_ms: u64) -> Option<LifecycleEvent>;
}

/// WiFi association plus one socket session
pub struct ConnectivitySupervisor<W, S> {
    wifi: W,
    session: S,
    endpoint: Endpoint,
    ssid: &'static str,
    password: &'static str,
    association_policy: RetryPolicy,
    reconnect_interval_ms: u32,
    state: ConnectivityState,
    connect_count: u32,
}

impl<W, S> ConnectivitySupervisor<W, S>
where
    W: WifiLink,
    S: SocketSession,
{
    /// Create a supervisor using the build-time configuration
    pub fn new(wifi: W, session: S) -> Self {
        Self {
            wifi,
            session,
            endpoint: Endpoint::from_config(),
            ssid: config::WIFI_SSID,
            password: config::WIFI_PASSWORD,
            association_policy: RetryPolicy::forever(config::WIFI_RETRY_INTERVAL_MS),
            reconnect_interval_ms: config::SOCKET_RECONNECT_INTERVAL_MS,
            state: ConnectivityState::Disconnected,
            connect_count: 0,
        }
    }

    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn with_credentials(mut self, ssid: &'static str, password: &'static str) -> Self {
        self.ssid = ssid;
        self.password = password;
        self
    }

    pub fn with_association_policy(mut self, policy: RetryPolicy) -> Self {
        self.association_policy = policy;
        self
    }

    pub fn get_state(&self) -> ConnectivityState {
        self.state
    }

    pub fn get_endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Number of times `connect` has run to completion
    pub fn get_connect_count(&self) -> u32 {
        self.connect_count
    }

    pub fn get_session(&self) -> &S {
        &self.session
    }

    pub fn get_session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    pub fn get_wifi_mut(&mut self) -> &mut W {
        &mut self.wifi
    }

    /// Associate with WiFi, then open the socket session.
    ///
    /// Blocks until associated. With the default (unbounded) policy this
    /// never returns an error.
    pub fn connect<D: DelayNs>(&mut self, delay: &mut D) -> Result<(), BridgeError> {
        info!("[WIFI] Connecting to WiFi network: {}", self.ssid);
        self.state = ConnectivityState::Connecting;

        let wifi = &mut self.wifi;
        let (ssid, password) = (self.ssid, self.password);
        let mut started = false;

        let associated = retry(
            &self.association_policy,
            delay,
            || {
                if !started {
                    wifi.begin(ssid, password)?;
                    started = true;
                }
                if wifi.is_associated() {
                    Ok(())
                } else {
                    Err(BridgeError::WiFiError)
                }
            },
            |attempt, e| debug!("[WIFI] Not associated yet (attempt {}): {}", attempt, e),
        );

        if let Err(e) = associated {
            warn!("[WIFI] Failed to connect to WiFi network: {}", e);
            self.state = ConnectivityState::Disconnected;
            return Err(e);
        }

        match self.wifi.local_ip() {
            Some(ip) => info!(
                "[WIFI] WiFi connected, IP address = {}.{}.{}.{}",
                ip[0], ip[1], ip[2], ip[3]
            ),
            None => info!("[WIFI] WiFi connected, IP address not assigned yet"),
        }

        info!(
            "[WS] Opening session to ws://{}:{}{}",
            self.endpoint.host, self.endpoint.port, self.endpoint.path
        );
        self.session.open(&self.endpoint, self.reconnect_interval_ms);
        self.connect_count += 1;

        Ok(())
    }

    /// Query WiFi association, marking the link down when it was lost
    pub fn is_linked(&mut self) -> bool {
        let linked = self.wifi.is_associated();

        if !linked && self.state != ConnectivityState::Disconnected {
            warn!("[WIFI] WiFi connection lost!");
            self.state = ConnectivityState::Disconnected;
        }

        linked
    }

    /// Let the session process I/O and dispatch its lifecycle events
    pub fn pump(&mut self, now_ms: u64) {
        for _ in 0..config::MAX_EVENTS_PER_PUMP {
            match self.session.poll(now_ms) {
                Some(event) => self.handle_event(event),
                None => break,
            }
        }
    }

    /// Best-effort transmit over the session
    pub fn send(&mut self, message: OutboundMessage<'_>) -> Result<(), BridgeError> {
        self.session.send(message)
    }

    fn handle_event(&mut self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::Opened(url) => {
                info!("[WS] Connected to url: {}", url);
                self.state = ConnectivityState::Connected;
            }
            LifecycleEvent::Closed => {
                info!("[WS] Disconnected!");
                if self.state == ConnectivityState::Connected {
                    self.state = ConnectivityState::Connecting;
                }
            }
            LifecycleEvent::InboundText(payload) => {
                info!("[WS] get text: {}", String::from_utf8_lossy(&payload));
            }
            LifecycleEvent::TransportError => {
                warn!("[WS] Transport error");
            }
            LifecycleEvent::Fragment => {}
        }
    }
}
