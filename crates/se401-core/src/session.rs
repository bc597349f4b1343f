//! Capture session: configuration, stream start/stop, chunk dispatch and the
//! per-frame housekeeping (stream restart after desync, reset level
//! calibration).
//!
//! The session owns the control channel. Bulk chunks and control changes
//! are both handled through `&mut self`, so the host must serialise them;
//! only the exposure gate is shared, see [`CaptureSession::exposure_gate`].

use crate::assembler::{FeedOutcome, FrameAssembler};
use crate::button::{ButtonError, SnapshotButton};
use crate::exposure::ExposureGate;
use crate::frame::FrameSink;
use se401_hw::calibration::{CalibrationLoop, DEFAULT_PERIOD, DEFAULT_RESET_LEVEL};
use se401_hw::controls::{self, BRIGHTNESS_RANGE, EXPOSURE_RANGE, GAIN_RANGE};
use se401_hw::descriptor::parse_descriptor;
use se401_hw::registers::{
    Request, HV7131_REG_MODE_B, OPERATING_MODE, QUANT_FACTOR, READ_REQ_SIZE,
};
use se401_hw::{
    CameraDescriptor, CaptureProfile, ControlChannel, ControlError, ControlValues,
    DescriptorError, LineFrequency, Mode, Transport,
};
use serde::Deserialize;
use std::ops::RangeInclusive;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("control request failed: {0}")]
    Control(#[from] ControlError),
    #[error("configuration invariant violated: {0}")]
    ConfigInvariant(ControlError),
    #[error("unsupported device: {0}")]
    Descriptor(#[from] DescriptorError),
    #[error("no capture profile {0}")]
    NoSuchProfile(usize),
    #[error("{control} value {value} out of range {min}..={max}")]
    OutOfRange {
        control: &'static str,
        value: u16,
        min: u16,
        max: u16,
    },
}

/// Static session parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Delivered frames between reset level calibration cycles.
    pub calibration_period: u32,
    /// Reset level programmed on the first stream start.
    pub initial_reset_level: u8,
    /// Control transfer buffer size in bytes.
    pub transfer_buffer: usize,
    /// Initial image control values.
    pub controls: ControlValues,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            calibration_period: DEFAULT_PERIOD,
            initial_reset_level: DEFAULT_RESET_LEVEL,
            transfer_buffer: READ_REQ_SIZE,
            controls: ControlValues::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Configuring,
    Streaming,
}

pub struct CaptureSession<T: Transport> {
    channel: ControlChannel<T>,
    descriptor: CameraDescriptor,
    brightness_supported: bool,
    controls: ControlValues,
    calibration: CalibrationLoop,
    gate: Arc<ExposureGate>,
    assembler: Option<FrameAssembler>,
    active: Option<usize>,
    state: SessionState,
    /// A desync restart failed and is retried on the next chunk.
    restart_failed: bool,
    button: SnapshotButton,
}

impl<T: Transport> CaptureSession<T> {
    /// Probe the camera: read and parse its descriptor and check which
    /// optional controls it supports.
    pub fn configure(transport: T, config: SessionConfig) -> Result<Self, SessionError> {
        let mut channel = ControlChannel::new(transport, config.transfer_buffer);
        channel.check_buffer().map_err(SessionError::ConfigInvariant)?;

        let first = channel
            .read_request_silent(Request::GetCameraDescriptor)
            .map(<[u8]>::to_vec);
        let cd = match first {
            Ok(cd) => cd,
            Err(_) => {
                // Sometimes after sitting idle the bridge needs a good kicking.
                channel.reset_device();
                channel
                    .read_request(Request::GetCameraDescriptor)
                    .map(<[u8]>::to_vec)
                    .unwrap_or_default()
            }
        };

        // Some cameras start with their LED on.
        let _ = channel.write_request(Request::LedControl, 0);
        channel.status()?;

        let descriptor = parse_descriptor(&cd)?;

        let brightness_supported = channel
            .read_request_silent(Request::GetBrightness)
            .is_ok();
        if !brightness_supported {
            tracing::info!("brightness control not supported");
            channel.clear_error();
        }

        tracing::info!(
            profiles = descriptor.profiles.len(),
            brightness_supported,
            "camera configured"
        );

        Ok(Self {
            channel,
            descriptor,
            brightness_supported,
            controls: config.controls,
            calibration: CalibrationLoop::new(
                config.initial_reset_level,
                config.calibration_period,
            ),
            gate: Arc::new(ExposureGate::new()),
            assembler: None,
            active: None,
            state: SessionState::Idle,
            restart_failed: false,
            button: SnapshotButton::new(),
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn profiles(&self) -> &[CaptureProfile] {
        &self.descriptor.profiles
    }

    /// Profile of the current (or last) stream.
    pub fn active_profile(&self) -> Option<&CaptureProfile> {
        self.active.and_then(|i| self.descriptor.profiles.get(i))
    }

    pub fn controls(&self) -> &ControlValues {
        &self.controls
    }

    pub fn brightness_supported(&self) -> bool {
        self.brightness_supported
    }

    pub fn reset_level(&self) -> u8 {
        self.calibration.reset_level()
    }

    pub fn channel(&self) -> &ControlChannel<T> {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut ControlChannel<T> {
        &mut self.channel
    }

    /// Handle to the exposure gate, for arming from another thread.
    pub fn exposure_gate(&self) -> Arc<ExposureGate> {
        Arc::clone(&self.gate)
    }

    /// A desync restart is queued or a failed one awaits retry.
    pub fn restart_pending(&self) -> bool {
        self.restart_failed
            || self
                .assembler
                .as_ref()
                .is_some_and(FrameAssembler::restart_pending)
    }

    /// Program the sensor for profile `index` and begin streaming.
    pub fn start(&mut self, index: usize) -> Result<(), SessionError> {
        let profile = *self
            .descriptor
            .profiles
            .get(index)
            .ok_or(SessionError::NoSuchProfile(index))?;
        self.active = Some(index);
        self.begin(profile)?;
        Ok(())
    }

    fn begin(&mut self, profile: CaptureProfile) -> Result<(), ControlError> {
        self.state = SessionState::Configuring;
        self.restart_failed = false;
        self.channel.clear_error();

        if let Err(e) = self.program(&profile) {
            self.state = SessionState::Idle;
            return Err(e);
        }

        let mut assembler = FrameAssembler::new(&profile, Arc::clone(&self.gate));
        assembler.reset();
        self.assembler = Some(assembler);
        self.calibration.restart();
        self.gate.reset();

        if let Err(e) = self
            .channel
            .write_request(Request::StartContinuousCapture, 0)
        {
            self.state = SessionState::Idle;
            return Err(e);
        }

        self.state = SessionState::Streaming;
        tracing::info!(%profile, reset_level = self.calibration.reset_level(), "stream started");
        Ok(())
    }

    fn program(&mut self, profile: &CaptureProfile) -> Result<(), ControlError> {
        let ch = &mut self.channel;
        if ch.write_request_silent(Request::CameraPower, 1).is_err() {
            ch.reset_device();
            ch.write_request(Request::CameraPower, 1)?;
        }
        ch.write_request(Request::LedControl, 1)?;
        ch.set_feature(HV7131_REG_MODE_B, 0x05)?;

        let mult = profile.mode.mult();
        ch.write_request(Request::SetWidth, profile.width * mult)?;
        ch.write_request(Request::SetHeight, profile.height * mult)?;
        ch.set_feature(OPERATING_MODE, operating_mode(profile.mode))?;

        let c = self.controls;
        if self.brightness_supported {
            controls::write_brightness(ch, c.brightness)?;
        }
        controls::write_gain(ch, c.gain)?;
        self.gate.mark_changed();
        controls::write_exposure(ch, c.exposure, c.line_frequency)?;
        self.calibration.apply(ch)
    }

    /// End streaming and power the sensor down. Best effort: failures stay
    /// in the channel's latch and are cleared by the next start.
    pub fn stop(&mut self) {
        let ch = &mut self.channel;
        let _ = ch.write_request(Request::StopContinuousCapture, 0);
        let _ = ch.write_request(Request::LedControl, 0);
        let _ = ch.write_request(Request::CameraPower, 0);
        if let Some(e) = ch.error() {
            tracing::warn!(error = %e, "stream stop incomplete");
        }
        self.state = SessionState::Idle;
        self.restart_failed = false;
    }

    /// Feed one bulk chunk from the video endpoint.
    ///
    /// Runs the post-frame callback for every frame delivered to `sink`.
    /// After a failed desync restart each chunk first retries the restart;
    /// the chunk is dropped while it keeps failing.
    pub fn handle_chunk(&mut self, data: &[u8], sink: &mut dyn FrameSink) -> FeedOutcome {
        if self.restart_failed {
            if let Err(e) = self.restart() {
                return FeedOutcome {
                    restart_error: Some(e),
                    ..FeedOutcome::default()
                };
            }
        }
        if self.state != SessionState::Streaming {
            return FeedOutcome::default();
        }
        let Some(assembler) = self.assembler.as_mut() else {
            return FeedOutcome::default();
        };

        let mut outcome = assembler.feed(data, sink);
        for _ in 0..outcome.delivered {
            if let Err(e) = self.frame_delivered() {
                outcome.restart_error = Some(e);
                break;
            }
        }
        outcome
    }

    /// Restart after a desync, otherwise count the frame for calibration.
    fn frame_delivered(&mut self) -> Result<(), ControlError> {
        if self.restart_pending() {
            return self.restart();
        }
        if let Some(level) = self.calibration.on_frame(&mut self.channel) {
            tracing::debug!(level, "reset level adjusted");
        }
        Ok(())
    }

    fn restart(&mut self) -> Result<(), ControlError> {
        let Some(profile) = self.active_profile().copied() else {
            self.restart_failed = false;
            return Ok(());
        };
        tracing::info!("restarting stream");
        self.stop();
        if let Err(e) = self.begin(profile) {
            tracing::warn!(error = %e, "stream restart failed");
            self.restart_failed = true;
            return Err(e);
        }
        Ok(())
    }

    /// Decode a packet from the interrupt endpoint.
    pub fn handle_interrupt(&mut self, data: &[u8]) -> Result<Option<bool>, ButtonError> {
        let changed = self.button.scan(data)?;
        if let Some(pressed) = changed {
            tracing::info!(pressed, "snapshot button");
        }
        Ok(changed)
    }

    pub fn set_brightness(&mut self, value: u16) -> Result<(), SessionError> {
        check_range("brightness", value, BRIGHTNESS_RANGE)?;
        self.controls.brightness = value;
        if self.state == SessionState::Streaming && self.brightness_supported {
            let r = controls::write_brightness(&mut self.channel, value);
            absorb("brightness", r);
        }
        Ok(())
    }

    pub fn set_gain(&mut self, value: u16) -> Result<(), SessionError> {
        check_range("gain", value, GAIN_RANGE)?;
        self.controls.gain = value;
        if self.state == SessionState::Streaming {
            let r = controls::write_gain(&mut self.channel, value);
            absorb("gain", r);
        }
        Ok(())
    }

    pub fn set_exposure(&mut self, value: u16) -> Result<(), SessionError> {
        check_range("exposure", value, EXPOSURE_RANGE)?;
        self.controls.exposure = value;
        self.apply_exposure();
        Ok(())
    }

    pub fn set_line_frequency(&mut self, freq: LineFrequency) {
        self.controls.line_frequency = freq;
        self.apply_exposure();
    }

    fn apply_exposure(&mut self) {
        if self.state != SessionState::Streaming {
            return;
        }
        // Armed before the writes so the frame in flight is judged correctly.
        self.gate.mark_changed();
        let c = self.controls;
        let r = controls::write_exposure(&mut self.channel, c.exposure, c.line_frequency);
        absorb("exposure", r);
    }
}

/// Bridge operating mode for a capture mode.
pub fn operating_mode(mode: Mode) -> u16 {
    match mode {
        Mode::Raw => 0x03,
        Mode::Compressed(4) => (QUANT_FACTOR << 4) | 0x02,
        Mode::Compressed(_) => QUANT_FACTOR << 4,
    }
}

fn check_range(
    control: &'static str,
    value: u16,
    range: RangeInclusive<u16>,
) -> Result<(), SessionError> {
    if range.contains(&value) {
        return Ok(());
    }
    Err(SessionError::OutOfRange {
        control,
        value,
        min: *range.start(),
        max: *range.end(),
    })
}

/// Steady-state control failures leave the stream running on stale values.
fn absorb(control: &'static str, result: Result<(), ControlError>) {
    if let Err(e) = result {
        tracing::warn!(control, error = %e, "control write failed");
    }
}
