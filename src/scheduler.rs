//! Event loop scheduler
//!
//! Drives the components in a fixed order once per iteration:
//! button and mode toggle, capture pipeline, gesture poller, socket pump,
//! then the end-of-cycle button commit.

use crate::BridgeError;
use crate::connectivity::{ConnectivitySupervisor, SocketSession, WifiLink};
use crate::gesture::{GestureOutcome, GesturePoller};
use crate::mode_toggle::{self, ButtonLevel, LoopState};
use crate::peripherals::{Camera, Clock, Display, GestureSensor};
use crate::pipeline::{CapturePipeline, FrameOutcome};
use crate::transcode::Transcoder;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::InputPin;
use log::{debug, info};

/// Summary of one loop iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    /// Streaming mode flipped this cycle
    pub toggled: bool,
    pub frame: FrameOutcome,
    pub gesture: GestureOutcome,
}

/// The firmware main loop
pub struct EventLoop<B, C, D, T, G, W, S, Dl, K> {
    state: LoopState,
    button: B,
    pipeline: CapturePipeline<C, D, T>,
    gestures: GesturePoller<G>,
    supervisor: ConnectivitySupervisor<W, S>,
    delay: Dl,
    clock: K,
    cycles: u64,
}

impl<B, C, D, T, G, W, S, Dl, K> EventLoop<B, C, D, T, G, W, S, Dl, K>
where
    B: InputPin,
    C: Camera,
    D: Display,
    T: Transcoder,
    G: GestureSensor,
    W: WifiLink,
    S: SocketSession,
    Dl: DelayNs,
    K: Clock,
{
    /// Streaming starts disabled, button starts released
    pub fn new(
        button: B,
        pipeline: CapturePipeline<C, D, T>,
        gestures: GesturePoller<G>,
        supervisor: ConnectivitySupervisor<W, S>,
        delay: Dl,
        clock: K,
    ) -> Self {
        Self {
            state: LoopState::new(),
            button,
            pipeline,
            gestures,
            supervisor,
            delay,
            clock,
            cycles: 0,
        }
    }

    pub fn get_state(&self) -> &LoopState {
        &self.state
    }

    pub fn get_cycle_count(&self) -> u64 {
        self.cycles
    }

    pub fn get_pipeline(&self) -> &CapturePipeline<C, D, T> {
        &self.pipeline
    }

    pub fn get_gestures(&self) -> &GesturePoller<G> {
        &self.gestures
    }

    pub fn get_supervisor(&self) -> &ConnectivitySupervisor<W, S> {
        &self.supervisor
    }

    pub fn get_supervisor_mut(&mut self) -> &mut ConnectivitySupervisor<W, S> {
        &mut self.supervisor
    }

    /// Startup sequence: peripherals, gesture sensor, then network.
    ///
    /// Blocks until the gesture sensor answers and WiFi is associated.
    pub fn start(&mut self) -> Result<(), BridgeError> {
        self.pipeline.begin();
        self.gestures.begin(&mut self.delay)?;
        self.supervisor.connect(&mut self.delay)?;

        info!("[LOOP] Startup complete, streaming disabled");
        Ok(())
    }

    /// Run one iteration
    pub fn run_cycle(&mut self) -> CycleReport {
        let reading = self.read_button();
        let toggled = mode_toggle::update(&mut self.state, reading);

        let frame = self
            .pipeline
            .run_cycle(self.state.streaming, &mut self.supervisor);

        let gesture = self.gestures.poll(&mut self.supervisor, &mut self.delay);

        self.supervisor.pump(self.clock.now_ms());

        self.state.button.commit();
        self.cycles = self.cycles.wrapping_add(1);

        CycleReport {
            toggled,
            frame,
            gesture,
        }
    }

    /// Loop forever
    pub fn run(mut self) -> ! {
        info!("[LOOP] Entering main loop");
        loop {
            self.run_cycle();
        }
    }

    fn read_button(&mut self) -> ButtonLevel {
        match self.button.is_low() {
            Ok(true) => ButtonLevel::Pressed,
            Ok(false) => ButtonLevel::Released,
            Err(_) => {
                debug!("[LOOP] Button read failed, treating as released");
                ButtonLevel::Released
            }
        }
    }
}
