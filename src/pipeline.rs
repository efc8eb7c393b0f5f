//! Capture-and-stream pipeline
//!
//! One pass per cycle: take a frame from the camera if one is ready, show
//! it on the display, and while streaming is enabled compress it and send
//! it as a binary message. The frame always goes back to the camera before
//! the pass ends.

use crate::connectivity::{ConnectivitySupervisor, OutboundMessage, SocketSession, WifiLink};
use crate::mode_toggle::StreamingMode;
use crate::peripherals::{Camera, Display, Frame};
use crate::transcode::Transcoder;
use crate::{BridgeError, config};
use log::{debug, info, warn};

/// What happened to this cycle's frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Camera had nothing ready
    NoFrame,
    Captured {
        rendered: bool,
        /// A binary message was handed to the session
        streamed: bool,
    },
}

/// Check that `frame` can be pushed to `display` unchanged
pub fn check_frame_fits<D: Display>(display: &D, frame: &Frame<'_>) -> Result<(), BridgeError> {
    let fits = frame.width == display.width()
        && frame.height == display.height()
        && frame.format == display.pixel_format()
        && frame.data.len() >= frame.expected_len();

    if fits {
        Ok(())
    } else {
        Err(BridgeError::FrameMismatch {
            frame_width: frame.width,
            frame_height: frame.height,
            frame_format: frame.format,
            display_width: display.width(),
            display_height: display.height(),
            display_format: display.pixel_format(),
        })
    }
}

/// Camera to display and socket pipeline
pub struct CapturePipeline<C, D, T> {
    camera: C,
    display: D,
    transcoder: T,
    quality: u8,
}

impl<C, D, T> CapturePipeline<C, D, T>
where
    C: Camera,
    D: Display,
    T: Transcoder,
{
    pub fn new(camera: C, display: D, transcoder: T) -> Self {
        Self {
            camera,
            display,
            transcoder,
            quality: config::JPEG_QUALITY,
        }
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality;
        self
    }

    pub fn get_camera(&self) -> &C {
        &self.camera
    }

    pub fn get_camera_mut(&mut self) -> &mut C {
        &mut self.camera
    }

    pub fn get_display(&self) -> &D {
        &self.display
    }

    pub fn get_display_mut(&mut self) -> &mut D {
        &mut self.display
    }

    pub fn get_transcoder(&self) -> &T {
        &self.transcoder
    }

    /// Bring up display and camera. Failures are logged; the loop still
    /// runs and simply never sees a frame.
    pub fn begin(&mut self) {
        match self.display.begin() {
            Ok(()) => info!(
                "[DISPLAY] Display ready: {}x{}",
                self.display.width(),
                self.display.height()
            ),
            Err(e) => warn!("[DISPLAY] Display init failed: {}", e),
        }

        match self.camera.begin() {
            Ok(()) => info!("[CAM] Camera ready"),
            Err(e) => warn!("[CAM] Camera init failed: {}", e),
        }
    }

    /// Run one capture cycle
    pub fn run_cycle<W, S>(
        &mut self,
        streaming: StreamingMode,
        supervisor: &mut ConnectivitySupervisor<W, S>,
    ) -> FrameOutcome
    where
        W: WifiLink,
        S: SocketSession,
    {
        let Some(frame) = self.camera.acquire() else {
            return FrameOutcome::NoFrame;
        };

        let rendered = match Self::render(&mut self.display, &frame) {
            Ok(()) => true,
            Err(e) => {
                warn!("[DISPLAY] {}", e);
                false
            }
        };

        let streamed = streaming.is_enabled()
            && Self::stream(&mut self.transcoder, self.quality, &frame, supervisor);

        self.camera.release();

        FrameOutcome::Captured { rendered, streamed }
    }

    fn render(display: &mut D, frame: &Frame<'_>) -> Result<(), BridgeError> {
        check_frame_fits(display, frame)?;
        display.blit(
            0,
            0,
            frame.width,
            frame.height,
            &frame.data[..frame.expected_len()],
        )
    }

    fn stream<W, S>(
        transcoder: &mut T,
        quality: u8,
        frame: &Frame<'_>,
        supervisor: &mut ConnectivitySupervisor<W, S>,
    ) -> bool
    where
        W: WifiLink,
        S: SocketSession,
    {
        let payload = match transcoder.transcode(frame, quality) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("[CAM] Transcode failed: {}", e);
                return false;
            }
        };

        let result = supervisor.send(OutboundMessage::Binary(&payload));
        drop(payload);

        if let Err(e) = result {
            debug!("[CAM] Frame not sent: {}", e);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peripherals::PixelFormat;
    use crate::retry::tests::RecordingDelay;
    use crate::testing::{FakeCamera, FakeDisplay, FakeSession, FakeTranscoder, FakeWifi};

    type TestPipeline = CapturePipeline<FakeCamera, FakeDisplay, FakeTranscoder>;

    fn pipeline(camera: FakeCamera) -> TestPipeline {
        CapturePipeline::new(camera, FakeDisplay::qvga(), FakeTranscoder::default())
    }

    fn supervisor() -> ConnectivitySupervisor<FakeWifi, FakeSession> {
        let mut sup =
            ConnectivitySupervisor::new(FakeWifi::associating_after(0), FakeSession::default());
        sup.connect(&mut RecordingDelay::default()).unwrap();
        sup.get_session_mut().open = true;
        sup
    }

    fn enabled() -> StreamingMode {
        let mut state = crate::mode_toggle::LoopState::new();
        crate::mode_toggle::update(&mut state, crate::mode_toggle::ButtonLevel::Pressed);
        state.streaming
    }

    #[test]
    fn disabled_streaming_renders_without_sending() {
        let mut pipe = pipeline(FakeCamera::qvga_always_ready());
        let mut sup = supervisor();

        for _ in 0..5 {
            let outcome = pipe.run_cycle(StreamingMode::default(), &mut sup);
            assert_eq!(
                outcome,
                FrameOutcome::Captured {
                    rendered: true,
                    streamed: false
                }
            );
        }

        assert!(sup.get_session().binaries.is_empty());
        assert_eq!(pipe.get_transcoder().calls, 0);
        assert_eq!(pipe.get_display().blits, 5);
        assert_eq!(pipe.get_camera().released, 5);
    }

    #[test]
    fn enabled_streaming_sends_one_binary_per_cycle() {
        let mut pipe = pipeline(FakeCamera::qvga_always_ready());
        let mut sup = supervisor();

        for cycle in 1..=3 {
            pipe.run_cycle(enabled(), &mut sup);
            assert_eq!(sup.get_session().binaries.len(), cycle);
            assert_eq!(pipe.get_camera().released, cycle as u32);
        }

        assert_eq!(sup.get_session().binaries[0], FakeTranscoder::PAYLOAD.to_vec());
        assert_eq!(pipe.get_transcoder().last_quality, Some(config::JPEG_QUALITY));
    }

    #[test]
    fn intermittent_frames_stream_only_when_ready() {
        let mut pipe = pipeline(FakeCamera::never_ready().with_schedule(&[true, false, true]));
        let mut sup = supervisor();

        let outcomes: Vec<FrameOutcome> = (0..4)
            .map(|_| pipe.run_cycle(enabled(), &mut sup))
            .collect();

        let streamed = FrameOutcome::Captured {
            rendered: true,
            streamed: true,
        };
        assert_eq!(
            outcomes,
            vec![streamed, FrameOutcome::NoFrame, streamed, FrameOutcome::NoFrame]
        );
        assert_eq!(sup.get_session().binaries.len(), 2);
        assert_eq!(pipe.get_camera().acquired, 2);
        assert_eq!(pipe.get_camera().released, 2);
        assert_eq!(pipe.get_display().blits, 2);
    }

    #[test]
    fn frame_is_released_when_send_fails() {
        let mut pipe = pipeline(FakeCamera::qvga_always_ready());
        let mut sup = supervisor();
        sup.get_session_mut().open = false;

        let outcome = pipe.run_cycle(enabled(), &mut sup);

        assert_eq!(
            outcome,
            FrameOutcome::Captured {
                rendered: true,
                streamed: true
            }
        );
        assert_eq!(sup.get_session().binaries.len(), 1);
        assert_eq!(pipe.get_camera().released, 1);
        assert!(!pipe.get_camera().outstanding);
    }

    #[test]
    fn frame_is_released_when_transcode_fails() {
        let mut pipe = pipeline(FakeCamera::qvga_always_ready());
        pipe.transcoder.fail = true;
        let mut sup = supervisor();

        let outcome = pipe.run_cycle(enabled(), &mut sup);

        assert_eq!(
            outcome,
            FrameOutcome::Captured {
                rendered: true,
                streamed: false
            }
        );
        assert!(sup.get_session().binaries.is_empty());
        assert_eq!(pipe.get_camera().released, 1);
    }

    #[test]
    fn missing_frames_are_silent_no_ops() {
        let mut pipe = pipeline(FakeCamera::never_ready());
        let mut sup = supervisor();

        for _ in 0..3 {
            assert_eq!(pipe.run_cycle(enabled(), &mut sup), FrameOutcome::NoFrame);
        }

        assert_eq!(pipe.get_display().blits, 0);
        assert!(sup.get_session().binaries.is_empty());
        assert_eq!(pipe.get_camera().released, 0);
    }

    #[test]
    fn mismatched_frame_is_not_rendered_but_still_streamed() {
        let mut camera = FakeCamera::qvga_always_ready();
        camera.width = 160;
        camera.height = 120;
        let mut pipe = pipeline(camera);
        let mut sup = supervisor();

        let outcome = pipe.run_cycle(enabled(), &mut sup);

        assert_eq!(
            outcome,
            FrameOutcome::Captured {
                rendered: false,
                streamed: true
            }
        );
        assert_eq!(pipe.get_display().blits, 0);
        assert_eq!(pipe.get_camera().released, 1);
    }

    #[test]
    fn display_failure_still_releases_frame() {
        let mut pipe = pipeline(FakeCamera::qvga_always_ready());
        pipe.get_display_mut().fail = true;
        let mut sup = supervisor();

        pipe.run_cycle(StreamingMode::default(), &mut sup);
        assert_eq!(pipe.get_camera().released, 1);
    }

    #[test]
    fn fit_check_reports_both_geometries() {
        let display = FakeDisplay::qvga();
        let data = [0u8; 8];
        let frame = Frame {
            data: &data,
            width: 2,
            height: 2,
            format: PixelFormat::Grayscale,
        };

        assert_eq!(
            check_frame_fits(&display, &frame),
            Err(BridgeError::FrameMismatch {
                frame_width: 2,
                frame_height: 2,
                frame_format: PixelFormat::Grayscale,
                display_width: 320,
                display_height: 240,
                display_format: PixelFormat::Rgb565,
            })
        );
    }

    #[test]
    fn fit_check_rejects_short_buffer() {
        let display = FakeDisplay::qvga();
        let data = [0u8; 16];
        let frame = Frame {
            data: &data,
            width: 320,
            height: 240,
            format: PixelFormat::Rgb565,
        };

        assert!(check_frame_fits(&display, &frame).is_err());
    }
}
