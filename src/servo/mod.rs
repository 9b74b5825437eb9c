// Servo control for the pet's four legs
//
// Provides:
// - Pulse-output abstraction with a recording simulator
// - Serial bridge to an external servo board
// - Four-joint driver with current-spike protection

pub mod bridge;
mod driver;
pub mod pwm;

pub use bridge::SerialPwm;
pub use driver::{
    DriverError, DriverTiming, Joint, ServoDriver, SharedPose, clamp_angle, smoothing_path,
};
pub use pwm::{ChannelConfig, PulseOutput, PwmError, SimulatedPwm};
