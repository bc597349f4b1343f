//! Snapshot button reported on the interrupt endpoint.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ButtonError {
    #[error("interrupt packet length {0}, expected 2")]
    BadLength(usize),
    #[error("unknown button state {0:#04x}")]
    BadState(u8),
}

/// Debounced snapshot button state.
#[derive(Debug, Default, Clone)]
pub struct SnapshotButton {
    pressed: bool,
}

impl SnapshotButton {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one interrupt packet. Returns the new state when it changed.
    pub fn scan(&mut self, data: &[u8]) -> Result<Option<bool>, ButtonError> {
        if data.len() != 2 {
            return Err(ButtonError::BadLength(data.len()));
        }
        let pressed = match data[0] {
            0 => false,
            1 => true,
            other => return Err(ButtonError::BadState(other)),
        };
        if pressed == self.pressed {
            return Ok(None);
        }
        self.pressed = pressed;
        Ok(Some(pressed))
    }
}
