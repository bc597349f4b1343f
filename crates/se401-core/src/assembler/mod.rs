//! Bulk transfer to frame demultiplexing.
//!
//! The video endpoint delivers 4 KiB bulk chunks that are not frame
//! aligned. A [`PacketScanner`] for the active [`Mode`] slices them into
//! frames and reports boundaries through a [`FrameEmitter`], which keeps
//! the sink's begin/append/end sequence well formed and asks the
//! [`ExposureGate`] whether each completed frame is valid.

mod janggu;
mod raw;

pub use janggu::{JangguScanner, PacketHeader, PacketInfo};
pub use raw::RawScanner;

use crate::exposure::ExposureGate;
use crate::frame::FrameSink;
use se401_hw::{CaptureProfile, ControlError, Mode};
use std::sync::Arc;
use thiserror::Error;

/// Compressed stream lost sync. Recovered by restarting the stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Desync {
    #[error("invalid packet length {0}")]
    PacketTooLong(usize),
    #[error("unknown frame info value")]
    InvalidInfo,
    #[error("frame size {actual} pixels, expected {expected}")]
    PixelCount { actual: u32, expected: u32 },
}

/// Role of the last thing handed to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    First,
    Inter,
    Last,
    /// Dropping until the next frame start.
    Discard,
}

/// Framing state shared by all scanners.
#[derive(Debug, Clone)]
pub struct EmitState {
    last: PacketType,
    image_len: usize,
    delivered: usize,
    discarded: usize,
}

impl EmitState {
    fn new() -> Self {
        Self {
            last: PacketType::Discard,
            image_len: 0,
            delivered: 0,
            discarded: 0,
        }
    }
}

/// Frame boundary reporting for one call into a scanner.
pub struct FrameEmitter<'a> {
    state: &'a mut EmitState,
    sink: &'a mut dyn FrameSink,
    gate: &'a ExposureGate,
}

impl<'a> FrameEmitter<'a> {
    pub fn new(
        state: &'a mut EmitState,
        sink: &'a mut dyn FrameSink,
        gate: &'a ExposureGate,
    ) -> Self {
        Self { state, sink, gate }
    }

    /// A frame has begun and not yet ended.
    pub fn is_open(&self) -> bool {
        matches!(self.state.last, PacketType::First | PacketType::Inter)
    }

    pub fn last_packet(&self) -> PacketType {
        self.state.last
    }

    /// Bytes appended to the frame in progress.
    pub fn image_len(&self) -> usize {
        self.state.image_len
    }

    /// Start a new frame with `data` as its first fragment. A frame still
    /// open at this point is abandoned and ended invalid.
    pub fn first(&mut self, data: &[u8]) {
        if self.is_open() {
            tracing::debug!(len = self.state.image_len, "abandoning incomplete frame");
            self.sink.end_frame(false);
            self.state.discarded += 1;
        }
        self.sink.begin_frame();
        self.append(data);
        self.state.last = PacketType::First;
    }

    /// Interior fragment. Swallowed when no frame is open.
    pub fn inter(&mut self, data: &[u8]) {
        if !self.is_open() {
            return;
        }
        self.append(data);
        self.state.last = PacketType::Inter;
    }

    /// Final fragment; the exposure gate decides validity.
    pub fn complete(&mut self, data: &[u8]) {
        let valid = self.gate.on_frame_complete();
        self.last(data, valid);
    }

    /// Final fragment with explicit validity, bypassing the exposure gate.
    pub fn last(&mut self, data: &[u8], valid: bool) {
        if !self.is_open() {
            self.state.last = PacketType::Last;
            return;
        }
        self.append(data);
        self.sink.end_frame(valid);
        self.state.last = PacketType::Last;
        self.state.image_len = 0;
        if valid {
            self.state.delivered += 1;
        } else {
            self.state.discarded += 1;
        }
    }

    /// Drop everything until the next frame start.
    pub fn discard(&mut self) {
        self.state.last = PacketType::Discard;
    }

    fn append(&mut self, data: &[u8]) {
        if !data.is_empty() {
            self.sink.append_fragment(data);
        }
        self.state.image_len += data.len();
    }
}

/// A per-format packet scanner.
pub trait PacketScanner: Send {
    /// Consume one bulk chunk, left to right.
    fn scan(&mut self, data: &[u8], frame: &mut FrameEmitter<'_>) -> Result<(), Desync>;

    /// Forget any partially received packet or frame accounting.
    fn reset(&mut self);
}

/// What one [`FrameAssembler::feed`] call produced.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FeedOutcome {
    /// Frames ended valid, including zero-length resync frames.
    pub delivered: usize,
    /// Frames ended invalid.
    pub discarded: usize,
    pub desync: Option<Desync>,
    /// The stream restart after a desync failed. The session retries it on
    /// every following chunk until it succeeds or the stream is stopped.
    pub restart_error: Option<ControlError>,
}

/// Mode-selected demultiplexer for one streaming session.
pub struct FrameAssembler {
    mode: Mode,
    scanner: Box<dyn PacketScanner>,
    emit: EmitState,
    gate: Arc<ExposureGate>,
    restart_pending: bool,
}

impl FrameAssembler {
    pub fn new(profile: &CaptureProfile, gate: Arc<ExposureGate>) -> Self {
        let scanner: Box<dyn PacketScanner> = match profile.mode {
            Mode::Raw => Box::new(RawScanner::new(profile.pixels())),
            Mode::Compressed(_) => Box::new(JangguScanner::new(profile.pixels() as u32)),
        };
        Self {
            mode: profile.mode,
            scanner,
            emit: EmitState::new(),
            gate,
            restart_pending: false,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Set after a desync; input is dropped until [`reset`](Self::reset).
    pub fn restart_pending(&self) -> bool {
        self.restart_pending
    }

    pub fn reset(&mut self) {
        self.scanner.reset();
        self.emit = EmitState::new();
        self.restart_pending = false;
    }

    /// Consume one bulk chunk.
    pub fn feed(&mut self, data: &[u8], sink: &mut dyn FrameSink) -> FeedOutcome {
        if data.is_empty() || self.restart_pending {
            return FeedOutcome::default();
        }

        let (delivered0, discarded0) = (self.emit.delivered, self.emit.discarded);
        let mut frame = FrameEmitter::new(&mut self.emit, sink, &self.gate);
        let result = self.scanner.scan(data, &mut frame);

        let desync = match result {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!(error = %e, "stream desync, restarting");
                self.restart_pending = true;
                // Empty frame so the post-frame callback gets to run.
                frame.first(&[]);
                frame.last(&[], true);
                Some(e)
            }
        };

        FeedOutcome {
            delivered: self.emit.delivered - delivered0,
            discarded: self.emit.discarded - discarded0,
            desync,
            restart_error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameCollector;

    #[test]
    fn test_inter_without_frame_is_swallowed() {
        let gate = ExposureGate::new();
        let mut state = EmitState::new();
        let mut sink = FrameCollector::new();
        let mut frame = FrameEmitter::new(&mut state, &mut sink, &gate);
        frame.inter(&[1, 2, 3]);
        frame.last(&[4], true);
        assert!(sink.frames().is_empty());
        assert!(!sink.in_frame());
    }

    #[test]
    fn test_first_abandons_open_frame() {
        let gate = ExposureGate::new();
        let mut state = EmitState::new();
        let mut sink = FrameCollector::new();
        let mut frame = FrameEmitter::new(&mut state, &mut sink, &gate);
        frame.first(&[1]);
        frame.first(&[2]);
        frame.complete(&[3]);
        assert_eq!(state.delivered, 1);
        assert_eq!(state.discarded, 1);
        assert_eq!(sink.frames()[0].data, vec![1]);
        assert!(!sink.frames()[0].valid);
        assert_eq!(sink.frames()[1].data, vec![2, 3]);
    }
}
