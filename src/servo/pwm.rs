// Timed pulse-output peripheral abstraction
//
// The servo driver only needs two things from the platform: configure a
// channel (pin, frequency, resolution) and set its duty. Anything that can do
// that implements PulseOutput.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use crate::config::{
    PWM_FREQUENCY_HZ, PWM_PERIOD_US, PWM_RESOLUTION_BITS, SERVO_MAX_DEGREE, SERVO_MAX_PULSE_US,
    SERVO_MIN_PULSE_US,
};

/// Error types for the pulse-output layer
#[derive(Debug, thiserror::Error)]
pub enum PwmError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Channel {channel} is not configured")]
    NotConfigured { channel: u8 },

    #[error("Duty {duty} out of range for channel {channel} (max {max})")]
    DutyOutOfRange { channel: u8, duty: u32, max: u32 },

    #[error("Invalid response from bridge for channel {channel}: {reason}")]
    InvalidResponse { channel: u8, reason: String },

    #[error("Checksum mismatch for channel {channel}")]
    ChecksumMismatch { channel: u8 },

    #[error("Bridge rejected command for channel {channel}: status 0x{status:02X}")]
    Rejected { channel: u8, status: u8 },

    #[error("Timeout waiting for bridge acknowledgment on channel {channel}")]
    Timeout { channel: u8 },

    #[error("Simulated write failure on channel {channel}")]
    Injected { channel: u8 },
}

pub type Result<T> = std::result::Result<T, PwmError>;

/// Per-channel timer configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    pub gpio: u8,
    pub frequency_hz: u32,
    pub resolution_bits: u8,
}

impl ChannelConfig {
    /// Standard hobby-servo timing on the given pin
    pub fn servo(gpio: u8) -> Self {
        Self {
            gpio,
            frequency_hz: PWM_FREQUENCY_HZ,
            resolution_bits: PWM_RESOLUTION_BITS,
        }
    }

    /// Number of duty levels per period
    pub fn duty_levels(&self) -> u32 {
        1 << self.resolution_bits
    }
}

/// A fixed-frequency pulse output with independent channels
pub trait PulseOutput: Send {
    fn configure_channel(&mut self, channel: u8, config: ChannelConfig) -> Result<()>;

    fn set_duty(&mut self, channel: u8, duty: u32) -> Result<()>;
}

/// Pulse width in microseconds for an angle: 0° -> 500us, 180° -> 2500us
pub fn angle_to_pulse_us(angle: u8) -> u32 {
    let angle = angle.min(SERVO_MAX_DEGREE) as u32;
    SERVO_MIN_PULSE_US + angle * (SERVO_MAX_PULSE_US - SERVO_MIN_PULSE_US) / SERVO_MAX_DEGREE as u32
}

/// Duty value for an angle on the 50Hz, 13-bit output
pub fn angle_to_duty(angle: u8) -> u32 {
    let levels = 1u32 << PWM_RESOLUTION_BITS;
    angle_to_pulse_us(angle) * levels / PWM_PERIOD_US
}

/// Inverse of angle_to_duty, rounded to the nearest degree
pub fn duty_to_angle(duty: u32) -> u8 {
    let levels = (1u32 << PWM_RESOLUTION_BITS) as f32;
    let pulse_us = duty as f32 * PWM_PERIOD_US as f32 / levels;
    let span = (SERVO_MAX_PULSE_US - SERVO_MIN_PULSE_US) as f32;
    let angle = (pulse_us - SERVO_MIN_PULSE_US as f32) * SERVO_MAX_DEGREE as f32 / span;
    angle.round().clamp(0.0, SERVO_MAX_DEGREE as f32) as u8
}

/// One recorded duty write
#[derive(Debug, Clone, Copy)]
pub struct DutyWrite {
    pub channel: u8,
    pub duty: u32,
    pub at: Instant,
}

impl DutyWrite {
    /// Physical (unmirrored) angle this write commands
    pub fn angle(&self) -> u8 {
        duty_to_angle(self.duty)
    }
}

#[derive(Debug, Default)]
struct SimState {
    configs: [Option<ChannelConfig>; 4],
    writes: VecDeque<DutyWrite>,
    /// Writes accepted so far, including ones dropped from the log
    accepted: usize,
    /// Keep only the most recent writes
    log_limit: Option<usize>,
    fail_after: Option<usize>,
}

/// In-memory pulse output that records every write.
///
/// Clones share the same log, so a test can keep one handle while the
/// driver (and its worker thread) owns the other. Long-running users should
/// cap the log with `with_log_limit`.
#[derive(Debug, Clone, Default)]
pub struct SimulatedPwm {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedPwm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `writes` duty writes, then fail every write after that
    pub fn failing_after(writes: usize) -> Self {
        let sim = Self::default();
        sim.lock().fail_after = Some(writes);
        sim
    }

    /// Keep only the last `limit` writes
    pub fn with_log_limit(limit: usize) -> Self {
        let sim = Self::default();
        sim.lock().log_limit = Some(limit);
        sim
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        // A panicking test thread must not hide the log from the others
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn channel_config(&self, channel: u8) -> Option<ChannelConfig> {
        self.lock().configs.get(channel as usize).copied().flatten()
    }

    pub fn writes(&self) -> Vec<DutyWrite> {
        self.lock().writes.iter().copied().collect()
    }

    /// Total writes accepted since creation
    pub fn accepted(&self) -> usize {
        self.lock().accepted
    }

    pub fn writes_for(&self, channel: u8) -> Vec<DutyWrite> {
        self.lock()
            .writes
            .iter()
            .filter(|w| w.channel == channel)
            .copied()
            .collect()
    }

    pub fn clear(&self) {
        self.lock().writes.clear();
    }
}

impl PulseOutput for SimulatedPwm {
    fn configure_channel(&mut self, channel: u8, config: ChannelConfig) -> Result<()> {
        let mut state = self.lock();
        let slot = state
            .configs
            .get_mut(channel as usize)
            .ok_or(PwmError::NotConfigured { channel })?;
        *slot = Some(config);
        Ok(())
    }

    fn set_duty(&mut self, channel: u8, duty: u32) -> Result<()> {
        let mut state = self.lock();
        let config = state
            .configs
            .get(channel as usize)
            .copied()
            .flatten()
            .ok_or(PwmError::NotConfigured { channel })?;

        if duty >= config.duty_levels() {
            return Err(PwmError::DutyOutOfRange {
                channel,
                duty,
                max: config.duty_levels() - 1,
            });
        }
        if state.fail_after.is_some_and(|limit| state.accepted >= limit) {
            return Err(PwmError::Injected { channel });
        }

        if let Some(limit) = state.log_limit {
            while state.writes.len() >= limit.max(1) {
                state.writes.pop_front();
            }
        }
        state.writes.push_back(DutyWrite {
            channel,
            duty,
            at: Instant::now(),
        });
        state.accepted += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pulse_width_endpoints() {
        assert_eq!(angle_to_pulse_us(0), 500);
        assert_eq!(angle_to_pulse_us(90), 1500);
        assert_eq!(angle_to_pulse_us(180), 2500);
        // Anything past the end stop is treated as 180
        assert_eq!(angle_to_pulse_us(250), 2500);
    }

    #[test]
    fn test_duty_values() {
        // duty = pulse * 8192 / 20000
        assert_eq!(angle_to_duty(0), 204);
        assert_eq!(angle_to_duty(90), 614);
        assert_eq!(angle_to_duty(180), 1024);
    }

    #[test]
    fn test_duty_to_angle_recovers_every_degree() {
        for angle in 0..=180u8 {
            assert_eq!(duty_to_angle(angle_to_duty(angle)), angle);
        }
    }

    #[test]
    fn test_simulated_requires_configuration() {
        let mut sim = SimulatedPwm::new();
        assert!(matches!(
            sim.set_duty(0, 614),
            Err(PwmError::NotConfigured { channel: 0 })
        ));

        sim.configure_channel(0, ChannelConfig::servo(9)).unwrap();
        sim.set_duty(0, 614).unwrap();
        assert_eq!(sim.writes().len(), 1);
        assert_eq!(sim.channel_config(0).unwrap().gpio, 9);
    }

    #[test]
    fn test_simulated_rejects_out_of_range_duty() {
        let mut sim = SimulatedPwm::new();
        sim.configure_channel(1, ChannelConfig::servo(10)).unwrap();
        assert!(matches!(
            sim.set_duty(1, 8192),
            Err(PwmError::DutyOutOfRange { max: 8191, .. })
        ));
    }

    #[test]
    fn test_failure_injection() {
        let mut sim = SimulatedPwm::failing_after(1);
        sim.configure_channel(0, ChannelConfig::servo(9)).unwrap();
        sim.set_duty(0, 300).unwrap();
        assert!(matches!(sim.set_duty(0, 300), Err(PwmError::Injected { channel: 0 })));
    }

    #[test]
    fn test_log_limit_keeps_latest_writes() {
        let mut sim = SimulatedPwm::with_log_limit(3);
        sim.configure_channel(0, ChannelConfig::servo(9)).unwrap();
        for angle in [10, 20, 30, 40, 50] {
            sim.set_duty(0, angle_to_duty(angle)).unwrap();
        }

        let angles: Vec<u8> = sim.writes().iter().map(DutyWrite::angle).collect();
        assert_eq!(angles, vec![30, 40, 50]);
        assert_eq!(sim.accepted(), 5);
    }

    #[test]
    fn test_clones_share_log() {
        let mut sim = SimulatedPwm::new();
        let observer = sim.clone();
        sim.configure_channel(2, ChannelConfig::servo(11)).unwrap();
        sim.set_duty(2, angle_to_duty(45)).unwrap();

        let writes = observer.writes_for(2);
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].angle(), 45);
    }
}
