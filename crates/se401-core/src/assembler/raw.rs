//! Raw bayer framing: no headers, frames are counted out by size.

use super::{Desync, FrameEmitter, PacketScanner};

pub struct RawScanner {
    frame_size: usize,
}

impl RawScanner {
    /// `frame_size` is `width * height`, one byte per bayer pixel.
    pub fn new(frame_size: usize) -> Self {
        Self { frame_size }
    }
}

impl PacketScanner for RawScanner {
    fn scan(&mut self, data: &[u8], frame: &mut FrameEmitter<'_>) -> Result<(), Desync> {
        if self.frame_size == 0 {
            return Ok(());
        }

        let mut rest = data;
        while !rest.is_empty() {
            let filled = if frame.is_open() { frame.image_len() } else { 0 };
            let needed = self.frame_size.saturating_sub(filled);
            let (head, tail) = rest.split_at(rest.len().min(needed));

            if !frame.is_open() {
                frame.first(head);
                if head.len() == self.frame_size {
                    frame.complete(&[]);
                }
            } else if head.len() == needed {
                frame.complete(head);
            } else {
                frame.inter(head);
            }
            rest = tail;
        }
        Ok(())
    }

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::FrameAssembler;
    use crate::exposure::ExposureGate;
    use crate::frame::FrameCollector;
    use se401_hw::{CaptureProfile, Mode};
    use std::sync::Arc;

    fn assembler(width: u16, height: u16) -> FrameAssembler {
        let profile = CaptureProfile {
            width,
            height,
            mode: Mode::Raw,
        };
        FrameAssembler::new(&profile, Arc::new(ExposureGate::new()))
    }

    fn stream(frames: usize, size: usize) -> Vec<u8> {
        (0..frames * size).map(|i| (i % 251) as u8).collect()
    }

    fn collect(chunks: &[&[u8]]) -> Vec<Vec<u8>> {
        let mut asm = assembler(8, 4);
        let mut sink = FrameCollector::new();
        for c in chunks {
            asm.feed(c, &mut sink);
        }
        sink.take_frames().into_iter().map(|f| f.data).collect()
    }

    #[test]
    fn test_aligned_chunks() {
        let data = stream(2, 32);
        let chunks: Vec<&[u8]> = data.chunks(8).collect();
        let frames = collect(&chunks);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], data[..32]);
        assert_eq!(frames[1], data[32..]);
    }

    #[test]
    fn test_chunk_boundary_invariance() {
        let data = stream(3, 32);
        let whole = collect(&[&data]);
        assert_eq!(whole.len(), 3);

        for size in [1, 3, 7, 31, 33, 50, 95] {
            let chunks: Vec<&[u8]> = data.chunks(size).collect();
            assert_eq!(collect(&chunks), whole, "chunk size {size}");
        }

        // Irregular partition.
        let parts: Vec<&[u8]> = vec![&data[..5], &data[5..40], &data[40..41], &data[41..]];
        assert_eq!(collect(&parts), whole);
    }

    #[test]
    fn test_partial_frame_not_delivered() {
        let data = stream(1, 32);
        let mut asm = assembler(8, 4);
        let mut sink = FrameCollector::new();
        let outcome = asm.feed(&data[..31], &mut sink);
        assert_eq!(outcome.delivered, 0);
        assert!(sink.in_frame());
        let outcome = asm.feed(&data[31..], &mut sink);
        assert_eq!(outcome.delivered, 1);
        assert!(outcome.desync.is_none());
    }

    #[test]
    fn test_exposure_change_drops_second_frame() {
        let gate = Arc::new(ExposureGate::new());
        let profile = CaptureProfile {
            width: 8,
            height: 4,
            mode: Mode::Raw,
        };
        let mut asm = FrameAssembler::new(&profile, Arc::clone(&gate));
        let mut sink = FrameCollector::new();
        let data = stream(3, 32);

        gate.mark_changed();
        let outcome = asm.feed(&data, &mut sink);
        assert_eq!(outcome.delivered, 2);
        assert_eq!(outcome.discarded, 1);
        let valid: Vec<bool> = sink.frames().iter().map(|f| f.valid).collect();
        assert_eq!(valid, vec![true, false, true]);
    }
}
