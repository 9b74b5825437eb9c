// Four-joint servo driver for the pet's legs
//
// Maps joint angles to duty writes and protects the shared boost converter:
// per-channel throttling, sub-stepping of large moves, and staggered
// multi-channel updates.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::pwm::{ChannelConfig, PulseOutput, PwmError, angle_to_duty};
use crate::config::{
    CHANNEL_STAGGER, MIN_MOVE_INTERVAL, NEUTRAL_ANGLE, SERVO_MAX_DEGREE, SERVO_PINS,
    SMOOTHING_STEP_DEG, SMOOTHING_STEP_PAUSE, SMOOTHING_THRESHOLD_DEG,
};

/// Leg joints, in channel order
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Joint {
    LeftFront = 0,
    RightFront = 1,
    LeftBack = 2,
    RightBack = 3,
}

impl Joint {
    pub const ALL: [Joint; 4] = [
        Joint::LeftFront,
        Joint::RightFront,
        Joint::LeftBack,
        Joint::RightBack,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Right-side servos are mounted mirrored and run inverted
    pub fn is_mirrored(self) -> bool {
        matches!(self, Joint::RightFront | Joint::RightBack)
    }

    pub fn gpio(self) -> u8 {
        SERVO_PINS[self.index()]
    }
}

impl fmt::Display for Joint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Joint::LeftFront => "left-front",
            Joint::RightFront => "right-front",
            Joint::LeftBack => "left-back",
            Joint::RightBack => "right-back",
        };
        f.write_str(name)
    }
}

/// Error types for the servo driver
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("Failed to configure {joint} servo on GPIO{gpio}: {source}")]
    Configure {
        joint: Joint,
        gpio: u8,
        #[source]
        source: PwmError,
    },

    #[error("PWM write failed on {joint} servo: {source}")]
    Write {
        joint: Joint,
        #[source]
        source: PwmError,
    },
}

pub type Result<T> = std::result::Result<T, DriverError>;

/// Power-protection timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverTiming {
    /// Minimum time between two writes on the same channel
    pub min_move_interval: Duration,
    /// Moves larger than this are split into steps
    pub smoothing_threshold_deg: u8,
    pub smoothing_step_deg: u8,
    pub smoothing_step_pause: Duration,
    /// Delay between consecutive channels in set_all_angles
    pub channel_stagger: Duration,
}

impl Default for DriverTiming {
    fn default() -> Self {
        Self {
            min_move_interval: MIN_MOVE_INTERVAL,
            smoothing_threshold_deg: SMOOTHING_THRESHOLD_DEG,
            smoothing_step_deg: SMOOTHING_STEP_DEG,
            smoothing_step_pause: SMOOTHING_STEP_PAUSE,
            channel_stagger: CHANNEL_STAGGER,
        }
    }
}

impl DriverTiming {
    /// Same stepping geometry, no waiting. For simulation only: a real boost
    /// converter will brown out without the pauses.
    pub fn unthrottled() -> Self {
        Self {
            min_move_interval: Duration::ZERO,
            smoothing_step_pause: Duration::ZERO,
            channel_stagger: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Last commanded angle of every joint, readable from any thread
#[derive(Debug)]
pub struct SharedPose {
    angles: [AtomicU8; 4],
}

impl Default for SharedPose {
    fn default() -> Self {
        Self {
            angles: std::array::from_fn(|_| AtomicU8::new(NEUTRAL_ANGLE)),
        }
    }
}

impl SharedPose {
    pub fn angle(&self, joint: Joint) -> u8 {
        self.angles[joint.index()].load(Ordering::Acquire)
    }

    /// Angles as [left-front, right-front, left-back, right-back]
    pub fn angles(&self) -> [u8; 4] {
        Joint::ALL.map(|joint| self.angle(joint))
    }

    fn store(&self, joint: Joint, angle: u8) {
        self.angles[joint.index()].store(angle, Ordering::Release);
    }
}

/// Clamp a requested angle into the servo's travel
pub fn clamp_angle(angle: i32) -> u8 {
    angle.clamp(0, SERVO_MAX_DEGREE as i32) as u8
}

/// Intermediate angles for a move from `current` to `target`.
///
/// Empty when the move is within `threshold`; otherwise every `step` degrees
/// from `current` toward `target`, stopping short of the target itself.
pub fn smoothing_path(current: u8, target: u8, threshold: u8, step: u8) -> Vec<u8> {
    let diff = current.abs_diff(target);
    if diff <= threshold || step == 0 {
        return Vec::new();
    }

    // u16 so a step of 128 or more cannot wrap
    let (current, diff) = (current as u16, diff as u16);
    (step as u16..diff)
        .step_by(step as usize)
        .map(|offset| {
            if (target as u16) > current {
                (current + offset) as u8
            } else {
                (current - offset) as u8
            }
        })
        .collect()
}

/// Servo driver for the four leg joints
pub struct ServoDriver<P: PulseOutput> {
    output: P,
    angles: [u8; 4],
    last_move: [Option<Instant>; 4],
    timing: DriverTiming,
    pose: Arc<SharedPose>,
}

impl<P: PulseOutput> ServoDriver<P> {
    /// Create a driver and configure all four channels on the output
    pub fn new(output: P) -> Result<Self> {
        Self::with_timing(output, DriverTiming::default())
    }

    pub fn with_timing(mut output: P, timing: DriverTiming) -> Result<Self> {
        for joint in Joint::ALL {
            let gpio = joint.gpio();
            output
                .configure_channel(joint as u8, ChannelConfig::servo(gpio))
                .map_err(|source| DriverError::Configure {
                    joint,
                    gpio,
                    source,
                })?;
            debug!("Servo {} configured on GPIO{}", joint, gpio);
        }

        Ok(Self {
            output,
            angles: [NEUTRAL_ANGLE; 4],
            last_move: [None; 4],
            timing,
            pose: Arc::new(SharedPose::default()),
        })
    }

    /// Bring every joint to the standing angle, one channel at a time
    pub fn init(&mut self) -> Result<()> {
        info!("Initializing pet servos on GPIO{:?}", SERVO_PINS);
        self.set_all_angles([NEUTRAL_ANGLE as i32; 4])?;
        info!("All servos at {} degrees (standing position)", NEUTRAL_ANGLE);
        Ok(())
    }

    /// Move one joint, clamping the angle to 0..=180
    pub fn set_angle(&mut self, joint: Joint, angle: i32) -> Result<()> {
        let target = clamp_angle(angle);
        let idx = joint.index();

        // Give the boost converter time to recover between moves on a channel
        if let Some(last) = self.last_move[idx] {
            let elapsed = last.elapsed();
            if elapsed < self.timing.min_move_interval {
                let wait = self.timing.min_move_interval - elapsed;
                debug!("Throttling {} servo for {:?}", joint, wait);
                thread::sleep(wait);
            }
        }

        let path = smoothing_path(
            self.angles[idx],
            target,
            self.timing.smoothing_threshold_deg,
            self.timing.smoothing_step_deg,
        );
        for angle in path {
            self.write(joint, angle)?;
            thread::sleep(self.timing.smoothing_step_pause);
        }

        self.write(joint, target)?;
        self.last_move[idx] = Some(Instant::now());
        Ok(())
    }

    /// Set a joint by raw channel index; unknown indices are logged and ignored
    pub fn set_angle_by_index(&mut self, index: usize, angle: i32) -> Result<()> {
        match Joint::from_index(index) {
            Some(joint) => self.set_angle(joint, angle),
            None => {
                warn!("Invalid servo index: {}", index);
                Ok(())
            }
        }
    }

    /// Set all four joints ([left-front, right-front, left-back, right-back]),
    /// staggering the channels to avoid four simultaneous current draws
    pub fn set_all_angles(&mut self, angles: [i32; 4]) -> Result<()> {
        for (i, joint) in Joint::ALL.into_iter().enumerate() {
            if i > 0 {
                thread::sleep(self.timing.channel_stagger);
            }
            self.set_angle(joint, angles[i])?;
        }
        Ok(())
    }

    /// Move one degree at a time, spreading the move over `duration_ms`
    /// (at least 5ms per degree)
    pub fn smooth_move(&mut self, joint: Joint, target: i32, duration_ms: u32) -> Result<()> {
        let target = clamp_angle(target);
        let current = self.angles[joint.index()];
        if current == target {
            return Ok(());
        }

        let steps = current.abs_diff(target) as u32;
        let per_step = Duration::from_millis((duration_ms / steps).max(5) as u64);
        let mut angle = current;
        while angle != target {
            angle = if target > angle { angle + 1 } else { angle - 1 };
            self.set_angle(joint, angle as i32)?;
            thread::sleep(per_step);
        }
        Ok(())
    }

    /// Last commanded angle (open loop, not a sensed position)
    pub fn angle(&self, joint: Joint) -> u8 {
        self.angles[joint.index()]
    }

    pub fn angles(&self) -> [u8; 4] {
        self.angles
    }

    /// Handle that keeps tracking this driver's angles after it moves to another thread
    pub fn pose_handle(&self) -> Arc<SharedPose> {
        Arc::clone(&self.pose)
    }

    pub fn timing(&self) -> DriverTiming {
        self.timing
    }

    pub fn output(&self) -> &P {
        &self.output
    }

    fn write(&mut self, joint: Joint, angle: u8) -> Result<()> {
        let physical = if joint.is_mirrored() {
            SERVO_MAX_DEGREE - angle
        } else {
            angle
        };
        self.output
            .set_duty(joint as u8, angle_to_duty(physical))
            .map_err(|source| DriverError::Write { joint, source })?;

        self.angles[joint.index()] = angle;
        self.pose.store(joint, angle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::servo::pwm::SimulatedPwm;

    fn driver(timing: DriverTiming) -> (ServoDriver<SimulatedPwm>, SimulatedPwm) {
        let sim = SimulatedPwm::new();
        let driver = ServoDriver::with_timing(sim.clone(), timing).unwrap();
        (driver, sim)
    }

    fn angles_on(sim: &SimulatedPwm, joint: Joint) -> Vec<u8> {
        sim.writes_for(joint as u8).iter().map(|w| w.angle()).collect()
    }

    #[test]
    fn test_channels_configured_with_pin_table() {
        let (_driver, sim) = driver(DriverTiming::unthrottled());
        for joint in Joint::ALL {
            let config = sim.channel_config(joint as u8).unwrap();
            assert_eq!(config.gpio, SERVO_PINS[joint.index()]);
            assert_eq!(config.frequency_hz, 50);
            assert_eq!(config.resolution_bits, 13);
        }
    }

    #[test]
    fn test_angle_clamped() {
        let (mut driver, _sim) = driver(DriverTiming::unthrottled());

        driver.set_angle(Joint::LeftFront, 250).unwrap();
        assert_eq!(driver.angle(Joint::LeftFront), 180);

        driver.set_angle(Joint::LeftBack, -40).unwrap();
        assert_eq!(driver.angle(Joint::LeftBack), 0);
    }

    #[test]
    fn test_mirrored_joints_inverted() {
        let (mut driver, sim) = driver(DriverTiming::unthrottled());
        driver.set_angle(Joint::RightFront, 100).unwrap();
        driver.set_angle(Joint::LeftFront, 100).unwrap();

        assert_eq!(angles_on(&sim, Joint::RightFront), vec![80]);
        assert_eq!(angles_on(&sim, Joint::LeftFront), vec![100]);
        // Commanded angle is the logical one
        assert_eq!(driver.angle(Joint::RightFront), 100);
    }

    #[test]
    fn test_smoothing_path() {
        assert!(smoothing_path(90, 110, 20, 10).is_empty());
        assert_eq!(smoothing_path(90, 130, 20, 10), vec![100, 110, 120]);
        assert_eq!(smoothing_path(90, 45, 20, 10), vec![80, 70, 60, 50]);
        assert_eq!(smoothing_path(90, 125, 20, 10), vec![100, 110, 120]);
        assert_eq!(smoothing_path(0, 180, 20, 10).len(), 17);
    }

    #[test]
    fn test_smoothing_path_wide_step() {
        assert_eq!(smoothing_path(0, 180, 20, 150), vec![150]);
        assert_eq!(smoothing_path(180, 0, 20, 200), Vec::<u8>::new());
        assert_eq!(smoothing_path(180, 0, 20, 128), vec![52]);
    }

    #[test]
    fn test_large_move_sub_stepped() {
        let (mut driver, sim) = driver(DriverTiming::unthrottled());
        driver.set_angle(Joint::LeftFront, 135).unwrap();
        assert_eq!(
            angles_on(&sim, Joint::LeftFront),
            vec![100, 110, 120, 130, 135]
        );

        sim.clear();
        driver.set_angle(Joint::RightBack, 45).unwrap();
        // Logical 80..50 then 45, written inverted
        assert_eq!(
            angles_on(&sim, Joint::RightBack),
            vec![100, 110, 120, 130, 135]
        );
        assert_eq!(driver.angle(Joint::RightBack), 45);
    }

    #[test]
    fn test_sub_steps_paced() {
        let (mut driver, sim) = driver(DriverTiming::default());
        driver.set_angle(Joint::LeftFront, 120).unwrap();

        let writes = sim.writes_for(Joint::LeftFront as u8);
        assert_eq!(writes.len(), 3); // 100, 110, then 120
        for pair in writes.windows(2) {
            assert!(pair[1].at.duration_since(pair[0].at) >= Duration::from_millis(15));
        }
    }

    #[test]
    fn test_same_channel_throttled() {
        let (mut driver, sim) = driver(DriverTiming::default());
        driver.set_angle(Joint::LeftBack, 95).unwrap();
        driver.set_angle(Joint::LeftBack, 100).unwrap();

        let writes = sim.writes_for(Joint::LeftBack as u8);
        assert_eq!(writes.len(), 2);
        let gap = writes[1].at.duration_since(writes[0].at);
        assert!(gap >= Duration::from_millis(60), "gap was {:?}", gap);
    }

    #[test]
    fn test_different_channels_not_throttled() {
        let (mut driver, sim) = driver(DriverTiming::default());
        driver.set_angle(Joint::LeftFront, 95).unwrap();
        driver.set_angle(Joint::RightFront, 95).unwrap();

        let writes = sim.writes();
        let gap = writes[1].at.duration_since(writes[0].at);
        assert!(gap < Duration::from_millis(50), "gap was {:?}", gap);
    }

    #[test]
    fn test_set_all_staggered_in_order() {
        let (mut driver, sim) = driver(DriverTiming::default());
        driver.set_all_angles([95, 85, 100, 80]).unwrap();

        let writes = sim.writes();
        let channels: Vec<u8> = writes.iter().map(|w| w.channel).collect();
        assert_eq!(channels, vec![0, 1, 2, 3]);
        for pair in writes.windows(2) {
            assert!(pair[1].at.duration_since(pair[0].at) >= Duration::from_millis(50));
        }
        assert_eq!(driver.angles(), [95, 85, 100, 80]);
    }

    #[test]
    fn test_invalid_index_ignored() {
        let (mut driver, sim) = driver(DriverTiming::unthrottled());
        driver.set_angle_by_index(4, 45).unwrap();
        assert!(sim.writes().is_empty());
        assert_eq!(driver.angles(), [90; 4]);

        driver.set_angle_by_index(2, 45).unwrap();
        assert_eq!(driver.angle(Joint::LeftBack), 45);
    }

    #[test]
    fn test_init_writes_neutral_pose() {
        let (mut driver, sim) = driver(DriverTiming::unthrottled());
        driver.init().unwrap();
        let writes = sim.writes();
        assert_eq!(writes.len(), 4);
        assert!(writes.iter().all(|w| w.angle() == 90));
    }

    #[test]
    fn test_smooth_move_single_degrees() {
        let (mut driver, sim) = driver(DriverTiming::unthrottled());
        driver.smooth_move(Joint::LeftFront, 94, 20).unwrap();
        assert_eq!(angles_on(&sim, Joint::LeftFront), vec![91, 92, 93, 94]);
    }

    #[test]
    fn test_pose_handle_tracks_writes() {
        let (mut driver, _sim) = driver(DriverTiming::unthrottled());
        let pose = driver.pose_handle();
        driver.set_all_angles([90, 90, 20, 20]).unwrap();
        assert_eq!(pose.angles(), [90, 90, 20, 20]);
    }

    #[test]
    fn test_write_error_propagated() {
        let sim = SimulatedPwm::failing_after(0);
        let mut driver = ServoDriver::with_timing(sim, DriverTiming::unthrottled()).unwrap();
        let err = driver.set_angle(Joint::LeftBack, 80).unwrap_err();
        assert!(matches!(err, DriverError::Write { joint: Joint::LeftBack, .. }));
        // Nothing was written, so nothing changed
        assert_eq!(driver.angle(Joint::LeftBack), 90);
    }
}
