//! Frame validity around exposure changes.
//!
//! A new integration time takes effect somewhere inside the frame that is
//! being captured when it is written. The frame already in flight is fine,
//! the one after it is likely under- or over-exposed and is dropped.
//!
//! This is a heuristic. The write and the frame boundary race; if a bad
//! frame sneaks through once in a while, so be it.

use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExposureState {
    Changed = 0,
    DropFrame = 1,
    NoChange = 2,
}

impl ExposureState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ExposureState::Changed,
            1 => ExposureState::DropFrame,
            _ => ExposureState::NoChange,
        }
    }
}

/// Single-slot exposure change tracker, safe to arm from any thread.
#[derive(Debug)]
pub struct ExposureGate {
    state: AtomicU8,
}

impl ExposureGate {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ExposureState::NoChange as u8),
        }
    }

    pub fn state(&self) -> ExposureState {
        ExposureState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Record that an exposure write is being issued. Re-arms if a previous
    /// change is still being tracked.
    pub fn mark_changed(&self) {
        self.state
            .store(ExposureState::Changed as u8, Ordering::Release);
    }

    pub fn reset(&self) {
        self.state
            .store(ExposureState::NoChange as u8, Ordering::Release);
    }

    /// Advance on a completed frame. Returns whether the frame is valid.
    pub fn on_frame_complete(&self) -> bool {
        match self.state() {
            ExposureState::Changed => {
                // Lost exchange means a new change arrived; keep it armed.
                let _ = self.advance(ExposureState::Changed, ExposureState::DropFrame);
                true
            }
            ExposureState::DropFrame => {
                let _ = self.advance(ExposureState::DropFrame, ExposureState::NoChange);
                tracing::debug!("dropping frame captured across exposure change");
                false
            }
            ExposureState::NoChange => true,
        }
    }

    fn advance(&self, from: ExposureState, to: ExposureState) -> Result<u8, u8> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
    }
}

impl Default for ExposureGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_full_cycle() {
        let gate = ExposureGate::new();
        assert!(gate.on_frame_complete());
        gate.mark_changed();
        assert_eq!(gate.state(), ExposureState::Changed);
        assert!(gate.on_frame_complete());
        assert_eq!(gate.state(), ExposureState::DropFrame);
        assert!(!gate.on_frame_complete());
        assert_eq!(gate.state(), ExposureState::NoChange);
        assert!(gate.on_frame_complete());
    }

    #[test]
    fn test_rearm_before_drop() {
        let gate = ExposureGate::new();
        gate.mark_changed();
        assert!(gate.on_frame_complete());
        // Second change lands before the would-be dropped frame completes.
        gate.mark_changed();
        assert!(gate.on_frame_complete());
        assert!(!gate.on_frame_complete());
        assert!(gate.on_frame_complete());
    }

    #[test]
    fn test_armed_from_other_thread() {
        let gate = Arc::new(ExposureGate::new());
        let remote = Arc::clone(&gate);
        std::thread::spawn(move || remote.mark_changed())
            .join()
            .unwrap();
        assert_eq!(gate.state(), ExposureState::Changed);
    }

    #[test]
    fn test_reset() {
        let gate = ExposureGate::new();
        gate.mark_changed();
        gate.reset();
        assert_eq!(gate.state(), ExposureState::NoChange);
    }
}
