//! Camera descriptor parsing into capture profiles.
//!
//! The bridge reports its supported frame sizes in a 64-byte descriptor.
//! Sizes that are exactly a half or a quarter of another advertised size can
//! be captured in the compressed janggu format by programming the sensor at
//! the larger size; everything else is streamed as raw bayer.

use crate::registers::{DESCRIPTOR_TYPE, FORMAT_BAYER, MAX_MODES};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("wrong descriptor type {0:#04x}")]
    WrongType(u8),
    #[error("bayer format not supported")]
    BayerUnsupported,
    #[error("too many frame sizes: {0} (max {MAX_MODES})")]
    TooManyModes(usize),
    #[error("descriptor truncated: {0} bytes")]
    Truncated(usize),
}

/// On-wire pixel format of a capture profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Mode {
    /// Single-plane 8-bit BGGR bayer, framed by byte count.
    Raw,
    /// Janggu packets; the sensor runs at `ratio` times the output size.
    Compressed(u8),
}

impl Mode {
    /// Sensor size multiplier programmed into `SET_WIDTH`/`SET_HEIGHT`.
    pub fn mult(self) -> u16 {
        match self {
            Mode::Raw => 1,
            Mode::Compressed(ratio) => ratio as u16,
        }
    }
}

/// One resolved `{width, height, mode}` tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CaptureProfile {
    pub width: u16,
    pub height: u16,
    pub mode: Mode,
}

impl CaptureProfile {
    /// Pixels in one output frame.
    pub fn pixels(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Buffer size a consumer needs for one frame.
    ///
    /// Janggu frames are variable length; three bytes per pixel bounds them.
    pub fn frame_buffer_size(&self) -> usize {
        match self.mode {
            Mode::Raw => self.pixels(),
            Mode::Compressed(_) => self.pixels() * 3,
        }
    }
}

impl std::fmt::Display for CaptureProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.mode {
            Mode::Raw => write!(f, "{}x{} bayer", self.width, self.height),
            Mode::Compressed(r) => {
                write!(f, "{}x{} 1/{}th janggu", self.width, self.height, r * r)
            }
        }
    }
}

/// Parsed camera descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraDescriptor {
    pub extra_features: u8,
    pub profiles: Vec<CaptureProfile>,
}

/// Parse the raw descriptor returned by `GetCameraDescriptor`.
pub fn parse_descriptor(cd: &[u8]) -> Result<CameraDescriptor, DescriptorError> {
    if cd.len() < 6 {
        return Err(DescriptorError::Truncated(cd.len()));
    }
    if cd[1] != DESCRIPTOR_TYPE {
        return Err(DescriptorError::WrongType(cd[1]));
    }
    if cd[2] & FORMAT_BAYER == 0 {
        return Err(DescriptorError::BayerUnsupported);
    }
    let extra_features = cd[3];
    if extra_features != 0 {
        tracing::info!(extra_features, "descriptor advertises extra features");
    }

    let n = u16::from_le_bytes([cd[4], cd[5]]) as usize;
    if n > MAX_MODES {
        return Err(DescriptorError::TooManyModes(n));
    }
    if cd.len() < 6 + n * 4 {
        return Err(DescriptorError::Truncated(cd.len()));
    }

    let sizes: Vec<(u16, u16)> = (0..n)
        .map(|i| {
            let off = 6 + i * 4;
            (
                u16::from_le_bytes([cd[off], cd[off + 1]]),
                u16::from_le_bytes([cd[off + 2], cd[off + 3]]),
            )
        })
        .collect();

    let profiles = sizes
        .iter()
        .map(|&(width, height)| {
            let profile = CaptureProfile {
                width,
                height,
                mode: mode_for(width, height, &sizes),
            };
            tracing::info!(%profile, "frame size");
            profile
        })
        .collect();

    Ok(CameraDescriptor {
        extra_features,
        profiles,
    })
}

/// Janggu only works at 1/4 or 1/16 of a native size; prefer 1/16 since it
/// uses a larger area of the sensor.
fn mode_for(width: u16, height: u16, sizes: &[(u16, u16)]) -> Mode {
    let scaled = |div: u16| {
        sizes
            .iter()
            .any(|&(w, h)| w / div == width && h / div == height)
    };
    if scaled(4) {
        Mode::Compressed(4)
    } else if scaled(2) {
        Mode::Compressed(2)
    } else {
        Mode::Raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::build_descriptor;

    #[test]
    fn test_modes_by_scale() {
        let cd = build_descriptor(&[(640, 480), (320, 240), (160, 120)]);
        let desc = parse_descriptor(&cd).unwrap();
        let modes: Vec<Mode> = desc.profiles.iter().map(|p| p.mode).collect();
        assert_eq!(modes, vec![Mode::Raw, Mode::Compressed(2), Mode::Compressed(4)]);
        assert_eq!(desc.profiles[1].frame_buffer_size(), 320 * 240 * 3);
        assert_eq!(desc.profiles[0].frame_buffer_size(), 640 * 480);
    }

    #[test]
    fn test_quarter_preferred_over_half() {
        // 100x100 is half of 200x200 and a quarter of 400x400.
        let cd = build_descriptor(&[(400, 400), (200, 200), (100, 100)]);
        let desc = parse_descriptor(&cd).unwrap();
        assert_eq!(desc.profiles[2].mode, Mode::Compressed(4));
        assert_eq!(desc.profiles[2].mode.mult(), 4);
    }

    #[test]
    fn test_wrong_type() {
        let mut cd = build_descriptor(&[(352, 288)]);
        cd[1] = 0x40;
        assert_eq!(parse_descriptor(&cd), Err(DescriptorError::WrongType(0x40)));
    }

    #[test]
    fn test_bayer_required() {
        let mut cd = build_descriptor(&[(352, 288)]);
        cd[2] = 0;
        assert_eq!(parse_descriptor(&cd), Err(DescriptorError::BayerUnsupported));
    }

    #[test]
    fn test_too_many_modes() {
        let mut cd = build_descriptor(&[(352, 288)]);
        cd[4] = 15;
        assert_eq!(parse_descriptor(&cd), Err(DescriptorError::TooManyModes(15)));
    }

    #[test]
    fn test_display() {
        let p = CaptureProfile {
            width: 88,
            height: 72,
            mode: Mode::Compressed(4),
        };
        assert_eq!(p.to_string(), "88x72 1/16th janggu");
    }
}
