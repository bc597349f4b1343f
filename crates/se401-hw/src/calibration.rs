//! Automatic sensor reset level (black level) adjustment.
//!
//! The HV7131 counts pixels that fall below / above its reference levels.
//! Every [`CalibrationLoop::period`] delivered frames those counters are read
//! back and the reset level is nudged until both counts are small. Not an
//! exact science, but it converges well in practice.

use crate::control::{ControlChannel, ControlError};
use crate::registers::{
    HV7131_REG_ARLV, HV7131_REG_HIREFNOH, HV7131_REG_HIREFNOL, HV7131_REG_LOREFNOH,
    HV7131_REG_LOREFNOL,
};
use crate::transport::Transport;

pub const RESET_LEVEL_MAX: u8 = 63;
pub const DEFAULT_RESET_LEVEL: u8 = 0x2d;
pub const DEFAULT_PERIOD: u32 = 20;

const LOW_REF_LIMIT: u32 = 10;
const HIGH_REF_LIMIT: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

/// Reference pixel counts read back from the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefCounts {
    pub high: u32,
    pub low: u32,
}

/// Outcome of one adjustment step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Adjustment {
    pub level: u8,
    pub direction: Direction,
}

/// Compute the next reset level from the reference counts.
///
/// Too many pixels under the low reference raises the level, too many over
/// the high reference lowers it, one step per halving of the count. A move
/// opposite to `last` is halved so the loop does not ping-pong.
pub fn next_reset_level(old: u8, counts: RefCounts, last: Option<Direction>) -> Adjustment {
    let mut level = old;
    let RefCounts { mut high, mut low } = counts;

    if low > LOW_REF_LIMIT {
        while low >= LOW_REF_LIMIT && level < RESET_LEVEL_MAX {
            level += 1;
            low /= 2;
        }
    } else if high > HIGH_REF_LIMIT {
        while high >= HIGH_REF_LIMIT && level > 0 {
            level -= 1;
            high /= 2;
        }
    }

    let direction = if level > old {
        Direction::Up
    } else {
        Direction::Down
    };
    if matches!(last, Some(prev) if prev != direction) {
        let delta = (level as i16 - old as i16) / 2;
        level = (old as i16 + delta) as u8;
    }

    Adjustment { level, direction }
}

/// Frame-count driven reset level controller.
///
/// The learned level survives stream restarts; only the frame counter and
/// the remembered direction are reset by [`CalibrationLoop::restart`].
#[derive(Debug, Clone)]
pub struct CalibrationLoop {
    reset_level: u8,
    frame_count: u32,
    period: u32,
    last_direction: Option<Direction>,
}

impl CalibrationLoop {
    pub fn new(initial_level: u8, period: u32) -> Self {
        Self {
            reset_level: initial_level.min(RESET_LEVEL_MAX),
            frame_count: 0,
            period: period.max(1),
            last_direction: None,
        }
    }

    pub fn reset_level(&self) -> u8 {
        self.reset_level
    }

    pub fn period(&self) -> u32 {
        self.period
    }

    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    pub fn last_direction(&self) -> Option<Direction> {
        self.last_direction
    }

    /// Forget per-stream state at stream start.
    pub fn restart(&mut self) {
        self.frame_count = 0;
        self.last_direction = None;
    }

    /// Program the current level, used when the stream is (re)started.
    pub fn apply<T: Transport>(&self, ch: &mut ControlChannel<T>) -> Result<(), ControlError> {
        ch.set_feature(HV7131_REG_ARLV, self.reset_level as u16)
    }

    /// Count one delivered frame, running a cycle every `period` frames.
    ///
    /// Returns the newly programmed level when the cycle changed it. Control
    /// errors end the cycle early and are left in the channel's latch.
    pub fn on_frame<T: Transport>(&mut self, ch: &mut ControlChannel<T>) -> Option<u8> {
        self.frame_count += 1;
        if self.frame_count < self.period {
            return None;
        }
        self.frame_count = 0;

        match self.cycle(ch) {
            Ok(changed) => changed,
            Err(e) => {
                tracing::warn!(error = %e, "reset level calibration skipped");
                None
            }
        }
    }

    fn cycle<T: Transport>(&mut self, ch: &mut ControlChannel<T>) -> Result<Option<u8>, ControlError> {
        let counts = read_ref_counts(ch)?;
        let old = self.reset_level;
        let adj = next_reset_level(old, counts, self.last_direction);
        tracing::debug!(
            high = counts.high,
            low = counts.low,
            old,
            new = adj.level,
            "reset level cycle"
        );

        if adj.level == old {
            return Ok(None);
        }
        self.reset_level = adj.level;
        self.last_direction = Some(adj.direction);
        ch.set_feature(HV7131_REG_ARLV, adj.level as u16)?;
        Ok(Some(adj.level))
    }
}

impl Default for CalibrationLoop {
    fn default() -> Self {
        Self::new(DEFAULT_RESET_LEVEL, DEFAULT_PERIOD)
    }
}

/// Read both reference counters.
///
/// The counter registers do not clear after a single read, so each is read
/// once and discarded before the reading that is kept.
pub fn read_ref_counts<T: Transport>(ch: &mut ControlChannel<T>) -> Result<RefCounts, ControlError> {
    for reg in [
        HV7131_REG_HIREFNOH,
        HV7131_REG_HIREFNOL,
        HV7131_REG_LOREFNOH,
        HV7131_REG_LOREFNOL,
    ] {
        ch.get_feature(reg)?;
    }
    let high = read_pair(ch, HV7131_REG_HIREFNOH, HV7131_REG_HIREFNOL)?;
    let low = read_pair(ch, HV7131_REG_LOREFNOH, HV7131_REG_LOREFNOL)?;
    Ok(RefCounts { high, low })
}

fn read_pair<T: Transport>(
    ch: &mut ControlChannel<T>,
    hi_reg: u16,
    lo_reg: u16,
) -> Result<u32, ControlError> {
    let hi = ch.get_feature(hi_reg)? as u32;
    let lo = ch.get_feature(lo_reg)? as u32;
    Ok(hi * 256 + lo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::READ_REQ_SIZE;
    use crate::sim::SimulatedSensor;
    use crate::transport::TransportError;

    fn counts(high: u32, low: u32) -> RefCounts {
        RefCounts { high, low }
    }

    #[test]
    fn test_low_counts_raise_level() {
        // 40 -> 20 -> 10 -> 5
        let adj = next_reset_level(30, counts(0, 40), None);
        assert_eq!(adj.level, 33);
        assert_eq!(adj.direction, Direction::Up);
    }

    #[test]
    fn test_high_counts_lower_level() {
        // 100 -> 50 -> 25 -> 12
        let adj = next_reset_level(30, counts(100, 0), None);
        assert_eq!(adj.level, 27);
        assert_eq!(adj.direction, Direction::Down);
    }

    #[test]
    fn test_low_counts_take_priority() {
        let adj = next_reset_level(30, counts(1000, 11), None);
        assert_eq!(adj.level, 31);
    }

    #[test]
    fn test_within_limits_no_change() {
        let adj = next_reset_level(30, counts(20, 10), None);
        assert_eq!(adj.level, 30);
    }

    #[test]
    fn test_clamped_at_bounds() {
        assert_eq!(next_reset_level(62, counts(0, 4000), None).level, 63);
        assert_eq!(next_reset_level(1, counts(4000, 0), None).level, 0);
    }

    #[test]
    fn test_reversal_is_damped() {
        // Undamped move would be 30 -> 33; previous move was down.
        let adj = next_reset_level(30, counts(0, 40), Some(Direction::Down));
        assert_eq!(adj.level, 31);
        // Same direction as last time: full move.
        let adj = next_reset_level(30, counts(0, 40), Some(Direction::Up));
        assert_eq!(adj.level, 33);
        // Downward reversal truncates toward the start value.
        let adj = next_reset_level(30, counts(100, 0), Some(Direction::Up));
        assert_eq!(adj.level, 29);
    }

    #[test]
    fn test_cycle_every_period_frames() {
        let mut ch = ControlChannel::new(SimulatedSensor::new(), READ_REQ_SIZE);
        let mut cal = CalibrationLoop::new(30, 20);
        for _ in 0..19 {
            assert_eq!(cal.on_frame(&mut ch), None);
        }
        assert!(ch.transport().requests().is_empty());

        // Counters read 0, so the 20th frame reads registers but changes nothing.
        assert_eq!(cal.on_frame(&mut ch), None);
        assert_eq!(ch.transport().requests().len(), 8);
        assert_eq!(cal.frame_count(), 0);
        assert!(ch.transport().feature_writes(HV7131_REG_ARLV).is_empty());
    }

    #[test]
    fn test_first_reading_is_discarded() {
        let mut ch = ControlChannel::new(SimulatedSensor::new(), READ_REQ_SIZE);
        let sim = ch.transport_mut();
        // Stale first readings would push the level down; the second say 40 low.
        sim.script_reads(HV7131_REG_HIREFNOH, &[9, 0]);
        sim.script_reads(HV7131_REG_HIREFNOL, &[9, 0]);
        sim.script_reads(HV7131_REG_LOREFNOH, &[0, 0]);
        sim.script_reads(HV7131_REG_LOREFNOL, &[0, 40]);

        let mut cal = CalibrationLoop::new(30, 1);
        assert_eq!(cal.on_frame(&mut ch), Some(33));
        assert_eq!(ch.transport().feature_writes(HV7131_REG_ARLV), vec![33]);
        assert_eq!(cal.last_direction(), Some(Direction::Up));
    }

    #[test]
    fn test_control_error_is_absorbed() {
        let mut ch = ControlChannel::new(SimulatedSensor::new(), READ_REQ_SIZE);
        ch.transport_mut().fail_next(TransportError::Timeout);
        let mut cal = CalibrationLoop::new(30, 1);
        assert_eq!(cal.on_frame(&mut ch), None);
        assert_eq!(cal.reset_level(), 30);
        assert!(ch.error().is_some());
    }

    #[test]
    fn test_restart_keeps_learned_level() {
        let mut cal = CalibrationLoop::new(40, 20);
        cal.frame_count = 7;
        cal.last_direction = Some(Direction::Up);
        cal.restart();
        assert_eq!(cal.reset_level(), 40);
        assert_eq!(cal.frame_count(), 0);
        assert_eq!(cal.last_direction(), None);
    }
}
