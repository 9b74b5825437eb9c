// Timing, queue and pin configuration for the pet motion runtime
use std::time::Duration;

// PWM output: SG90-class servos on a 50Hz, 13-bit timed output
pub const PWM_FREQUENCY_HZ: u32 = 50;
pub const PWM_RESOLUTION_BITS: u8 = 13;
pub const PWM_PERIOD_US: u32 = 1_000_000 / PWM_FREQUENCY_HZ; // 20ms
pub const SERVO_MIN_PULSE_US: u32 = 500; // 0°
pub const SERVO_MAX_PULSE_US: u32 = 2500; // 180°
pub const SERVO_MAX_DEGREE: u8 = 180;

// Neutral (standing) angle for every joint
pub const NEUTRAL_ANGLE: u8 = 90;

// GPIO assignment, indexed by joint: [left-front, right-front, left-back, right-back]
pub const SERVO_PINS: [u8; 4] = [9, 10, 11, 12];

// Boost converter protection
pub const MIN_MOVE_INTERVAL: Duration = Duration::from_millis(60); // per-channel throttle
pub const SMOOTHING_THRESHOLD_DEG: u8 = 20; // larger moves get sub-stepped
pub const SMOOTHING_STEP_DEG: u8 = 10;
pub const SMOOTHING_STEP_PAUSE: Duration = Duration::from_millis(15);
pub const CHANNEL_STAGGER: Duration = Duration::from_millis(50); // between channels in set_all

// Default action parameters
pub const DEFAULT_SPEED_DELAY_MS: u16 = 80;
pub const DEFAULT_SWING_DELAY_MS: u16 = 10;
pub const DEFAULT_REPEAT_COUNT: u8 = 1;

// Command scheduler
pub const COMMAND_QUEUE_CAPACITY: usize = 10;
pub const ENQUEUE_TIMEOUT: Duration = Duration::from_millis(100);
// Upper bound on how long perform() waits for a running action to notice the stop flag
pub const PREEMPT_GRACE: Duration = Duration::from_millis(100);
pub const WORKER_THREAD_NAME: &str = "pet-motion";

// Remote tool argument ranges
pub const TOOL_REPEAT_RANGE: (i64, i64) = (1, 10);
pub const TOOL_SPEED_RANGE_MS: (i64, i64) = (20, 200);

// Serial PWM bridge (host side of a USB-attached servo board)
pub const BRIDGE_PORT: &str = "/dev/ttyACM0";
pub const BRIDGE_BAUDRATE: u32 = 115_200;
pub const BRIDGE_TIMEOUT: Duration = Duration::from_millis(100);

// Simulated servos: duty writes kept for inspection
pub const SIM_LOG_LIMIT: usize = 1024;
