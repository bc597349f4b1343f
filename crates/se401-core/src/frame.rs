//! Frame sink boundary and an in-memory collecting sink.

use serde::Serialize;

/// Consumer of assembled frames.
///
/// Calls arrive in `begin_frame`, `append_fragment`*, `end_frame` order.
/// A zero-length begin/end pair is legal: it is how a resynchronisation is
/// signalled downstream.
pub trait FrameSink {
    fn begin_frame(&mut self);
    fn append_fragment(&mut self, bytes: &[u8]);
    /// `valid == false` means the frame must be dropped by the consumer.
    fn end_frame(&mut self, valid: bool);
}

/// A completed frame as collected by [`FrameCollector`].
#[derive(Clone, Debug, Serialize)]
pub struct Frame {
    /// Bayer pixels (raw mode) or janggu packets, headers included.
    pub data: Vec<u8>,
    pub sequence: u32,
    pub valid: bool,
}

/// Sink that keeps every frame it is given.
#[derive(Debug, Default)]
pub struct FrameCollector {
    current: Option<Vec<u8>>,
    frames: Vec<Frame>,
    sequence: u32,
}

impl FrameCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// All ended frames, including discarded ones.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Ended frames with `valid == true`.
    pub fn valid_frames(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter().filter(|f| f.valid)
    }

    pub fn take_frames(&mut self) -> Vec<Frame> {
        std::mem::take(&mut self.frames)
    }

    /// True while a frame has begun but not ended.
    pub fn in_frame(&self) -> bool {
        self.current.is_some()
    }
}

impl FrameSink for FrameCollector {
    fn begin_frame(&mut self) {
        self.current = Some(Vec::new());
    }

    fn append_fragment(&mut self, bytes: &[u8]) {
        match self.current.as_mut() {
            Some(buf) => buf.extend_from_slice(bytes),
            None => tracing::trace!(len = bytes.len(), "fragment outside frame ignored"),
        }
    }

    fn end_frame(&mut self, valid: bool) {
        let Some(data) = self.current.take() else {
            return;
        };
        self.frames.push(Frame {
            data,
            sequence: self.sequence,
            valid,
        });
        self.sequence = self.sequence.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collects_fragments() {
        let mut sink = FrameCollector::new();
        sink.begin_frame();
        sink.append_fragment(&[1, 2]);
        sink.append_fragment(&[3]);
        assert!(sink.in_frame());
        sink.end_frame(true);
        assert_eq!(sink.frames().len(), 1);
        assert_eq!(sink.frames()[0].data, vec![1, 2, 3]);
        assert!(!sink.in_frame());
    }

    #[test]
    fn test_zero_length_pair() {
        let mut sink = FrameCollector::new();
        sink.begin_frame();
        sink.end_frame(true);
        assert_eq!(sink.frames().len(), 1);
        assert!(sink.frames()[0].data.is_empty());
    }

    #[test]
    fn test_orphan_calls_ignored() {
        let mut sink = FrameCollector::new();
        sink.append_fragment(&[9]);
        sink.end_frame(true);
        assert!(sink.frames().is_empty());
    }

    #[test]
    fn test_discarded_frames_kept_but_flagged() {
        let mut sink = FrameCollector::new();
        for valid in [true, false, true] {
            sink.begin_frame();
            sink.append_fragment(&[0]);
            sink.end_frame(valid);
        }
        assert_eq!(sink.frames().len(), 3);
        assert_eq!(sink.valid_frames().count(), 2);
        assert_eq!(sink.frames()[2].sequence, 2);
    }
}
