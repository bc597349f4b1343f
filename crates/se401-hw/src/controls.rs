//! User-facing image controls and their sensor register encodings.

use crate::control::{ControlChannel, ControlError};
use crate::registers::{
    Request, HV7131_REG_ABCG, HV7131_REG_AGCG, HV7131_REG_ARCG, HV7131_REG_TITL,
    HV7131_REG_TITM, HV7131_REG_TITU,
};
use crate::transport::Transport;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

pub const BRIGHTNESS_RANGE: RangeInclusive<u16> = 0..=255;
/// The register accepts up to 63, but anything past 50 looks bad.
pub const GAIN_RANGE: RangeInclusive<u16> = 0..=50;
pub const EXPOSURE_RANGE: RangeInclusive<u16> = 0..=32767;

/// Integration time units per mains half-cycle.
const PERIOD_50HZ: u32 = 106_667;
const PERIOD_60HZ: u32 = 88_889;

/// Power line frequency filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineFrequency {
    #[default]
    Disabled,
    #[serde(rename = "50hz")]
    Hz50,
    #[serde(rename = "60hz")]
    Hz60,
}

impl LineFrequency {
    /// Menu label shown for this entry.
    pub fn label(self) -> &'static str {
        match self {
            LineFrequency::Disabled => "NoFliker",
            LineFrequency::Hz50 => "50 Hz",
            LineFrequency::Hz60 => "60 Hz",
        }
    }

    /// Menu index, matching the V4L2 power line frequency control.
    pub fn from_index(index: u32) -> Option<Self> {
        match index {
            0 => Some(LineFrequency::Disabled),
            1 => Some(LineFrequency::Hz50),
            2 => Some(LineFrequency::Hz60),
            _ => None,
        }
    }
}

impl std::fmt::Display for LineFrequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Current values of the image controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlValues {
    pub brightness: u16,
    pub gain: u16,
    pub exposure: u16,
    pub line_frequency: LineFrequency,
}

impl Default for ControlValues {
    fn default() -> Self {
        Self {
            brightness: 15,
            gain: 25,
            exposure: 15000,
            line_frequency: LineFrequency::Disabled,
        }
    }
}

/// Gain register value for a user gain; the sensor's scale is inverted.
pub fn gain_register(gain: u16) -> u16 {
    63 - gain.min(63)
}

/// 24-bit integration time for `exposure`, snapped down to a whole number of
/// mains periods when a line frequency filter is active.
pub fn integration_time(exposure: u16, freq: LineFrequency) -> u32 {
    let integration = (exposure as u32) << 6;
    match freq {
        LineFrequency::Disabled => integration,
        LineFrequency::Hz50 => integration - integration % PERIOD_50HZ,
        LineFrequency::Hz60 => integration - integration % PERIOD_60HZ,
    }
}

pub fn write_brightness<T: Transport>(
    ch: &mut ControlChannel<T>,
    brightness: u16,
) -> Result<(), ControlError> {
    ch.write_request(Request::SetBrightness, brightness)
}

/// Program the same gain into the red, green and blue channels.
pub fn write_gain<T: Transport>(ch: &mut ControlChannel<T>, gain: u16) -> Result<(), ControlError> {
    let reg = gain_register(gain);
    ch.set_feature(HV7131_REG_ARCG, reg)?;
    ch.set_feature(HV7131_REG_AGCG, reg)?;
    ch.set_feature(HV7131_REG_ABCG, reg)
}

pub fn write_exposure<T: Transport>(
    ch: &mut ControlChannel<T>,
    exposure: u16,
    freq: LineFrequency,
) -> Result<(), ControlError> {
    let integration = integration_time(exposure, freq);
    tracing::debug!(exposure, %freq, integration, "programming integration time");
    ch.set_feature(HV7131_REG_TITL, (integration & 0xff) as u16)?;
    ch.set_feature(HV7131_REG_TITM, ((integration >> 8) & 0xff) as u16)?;
    ch.set_feature(HV7131_REG_TITU, ((integration >> 16) & 0xff) as u16)
}
