//! Streaming mode toggle
//!
//! Debounced-by-cycle edge detector on the active-low button. A press
//! (released on the previous cycle, pressed on this one) flips streaming.

use log::info;

/// Button reading for one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonLevel {
    /// Pin reads 0
    Pressed,
    /// Pin reads 1
    Released,
}

impl ButtonLevel {
    /// Map a raw pin reading (0 = pressed, 1 = released)
    pub fn from_raw(raw: u8) -> Self {
        if raw == 0 {
            ButtonLevel::Pressed
        } else {
            ButtonLevel::Released
        }
    }
}

/// Whether captured frames are transcoded and transmitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamingMode(bool);

impl StreamingMode {
    pub fn is_enabled(&self) -> bool {
        self.0
    }

    fn flip(&mut self) {
        self.0 = !self.0;
    }
}

/// Current and previous button readings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonState {
    current: ButtonLevel,
    previous: ButtonLevel,
}

impl ButtonState {
    /// Both readings start released
    pub fn new() -> Self {
        Self {
            current: ButtonLevel::Released,
            previous: ButtonLevel::Released,
        }
    }

    pub fn get_current(&self) -> ButtonLevel {
        self.current
    }

    pub fn get_previous(&self) -> ButtonLevel {
        self.previous
    }

    /// Record this cycle's reading
    pub fn sample(&mut self, level: ButtonLevel) {
        self.current = level;
    }

    pub fn is_falling_edge(&self) -> bool {
        self.previous == ButtonLevel::Released && self.current == ButtonLevel::Pressed
    }

    /// End of cycle: previous ← current
    pub fn commit(&mut self) {
        self.previous = self.current;
    }
}

impl Default for ButtonState {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-lifetime loop state shared by the components
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopState {
    pub streaming: StreamingMode,
    pub button: ButtonState,
}

impl LoopState {
    /// Streaming disabled, button released
    pub fn new() -> Self {
        Self::default()
    }
}

/// Sample `reading` and flip streaming on a falling edge.
///
/// Returns `true` when streaming was flipped.
pub fn update(state: &mut LoopState, reading: ButtonLevel) -> bool {
    state.button.sample(reading);

    if !state.button.is_falling_edge() {
        return false;
    }

    state.streaming.flip();
    info!(
        "[MODE] Streaming {}",
        if state.streaming.is_enabled() {
            "enabled"
        } else {
            "disabled"
        }
    );
    true
}
