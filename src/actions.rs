// Choreography library: every named action as a sequence of servo moves
//
// Each action polls the stop flag after every move+delay sub-step and
// returns early when it is set, leaving the legs wherever they got to.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::debug;

use crate::config::{
    DEFAULT_REPEAT_COUNT, DEFAULT_SPEED_DELAY_MS, DEFAULT_SWING_DELAY_MS, NEUTRAL_ANGLE,
};
use crate::servo::{DriverError, Joint, PulseOutput, ServoDriver};

use crate::servo::Joint::{LeftBack as LB, LeftFront as LF, RightBack as RB, RightFront as RF};

/// Action identifiers. 9 and 12 are reserved.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionId {
    RelaxedGetdown = 0,
    Sit = 1,
    Upright = 2,
    Getdown = 3,
    Advance = 4,
    Retreat = 5,
    RotateLeft = 6,
    RotateRight = 7,
    Swing = 8,
    JumpForward = 10,
    JumpBack = 11,
    Greet = 13,
    Stretch = 14,
}

impl ActionId {
    pub const ALL: [ActionId; 13] = [
        ActionId::RelaxedGetdown,
        ActionId::Sit,
        ActionId::Upright,
        ActionId::Getdown,
        ActionId::Advance,
        ActionId::Retreat,
        ActionId::RotateLeft,
        ActionId::RotateRight,
        ActionId::Swing,
        ActionId::JumpForward,
        ActionId::JumpBack,
        ActionId::Greet,
        ActionId::Stretch,
    ];

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            ActionId::RelaxedGetdown => "relaxed-getdown",
            ActionId::Sit => "sit",
            ActionId::Upright => "stand",
            ActionId::Getdown => "lie-down",
            ActionId::Advance => "advance",
            ActionId::Retreat => "retreat",
            ActionId::RotateLeft => "rotate-left",
            ActionId::RotateRight => "rotate-right",
            ActionId::Swing => "swing",
            ActionId::JumpForward => "jump-forward",
            ActionId::JumpBack => "jump-back",
            ActionId::Greet => "greet",
            ActionId::Stretch => "stretch",
        }
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id(), self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Unknown action ID: {0}")]
pub struct UnknownAction(pub i64);

impl TryFrom<i64> for ActionId {
    type Error = UnknownAction;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        ActionId::ALL
            .into_iter()
            .find(|action| action.id() as i64 == value)
            .ok_or(UnknownAction(value))
    }
}

/// Per-invocation tuning, captured when a request is submitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionParams {
    /// Delay after each step of an action (ms)
    pub speed_delay: u16,
    /// Delay between the small increments of swing and wave motions (ms)
    pub swing_delay: u16,
    pub repeat_count: u8,
    /// Repeat until stopped instead of counting down
    pub continuous: bool,
}

impl Default for ActionParams {
    fn default() -> Self {
        Self {
            speed_delay: DEFAULT_SPEED_DELAY_MS,
            swing_delay: DEFAULT_SWING_DELAY_MS,
            repeat_count: DEFAULT_REPEAT_COUNT,
            continuous: false,
        }
    }
}

impl ActionParams {
    pub fn with_repeat(self, repeat_count: u8) -> Self {
        Self {
            repeat_count,
            ..self
        }
    }

    pub fn continuous(self) -> Self {
        Self {
            continuous: true,
            ..self
        }
    }
}

/// One unit of work for the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionRequest {
    pub action: ActionId,
    pub params: ActionParams,
}

/// How an action ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Completed,
    Cancelled,
}

/// Run one action to completion or until `stop` is raised
pub fn perform<P: PulseOutput>(
    driver: &mut ServoDriver<P>,
    action: ActionId,
    params: &ActionParams,
    stop: &AtomicBool,
) -> Result<ActionOutcome, DriverError> {
    let mut choreo = Choreographer {
        driver,
        params: *params,
        stop,
    };

    match choreo.run(action) {
        Ok(()) => Ok(ActionOutcome::Completed),
        Err(Interrupt::Cancelled) => Ok(ActionOutcome::Cancelled),
        Err(Interrupt::Fault(e)) => Err(e),
    }
}

/// Why a sequence left early
enum Interrupt {
    Cancelled,
    Fault(DriverError),
}

impl From<DriverError> for Interrupt {
    fn from(e: DriverError) -> Self {
        Interrupt::Fault(e)
    }
}

type Step = Result<(), Interrupt>;

/// One phase of a gait: two joints moved together
type Phase = (Joint, i32, Joint, i32);

// Diagonal pairs: (right-front, left-back) and (left-front, right-back)
const ADVANCE_CYCLE: [Phase; 8] = [
    (RF, 45, LB, 45),
    (LF, 135, RB, 135),
    (RF, 90, LB, 90),
    (LF, 90, RB, 90),
    (LF, 45, RB, 45),
    (RF, 135, LB, 135),
    (LF, 90, RB, 90),
    (RF, 90, LB, 90),
];

const RETREAT_CYCLE: [Phase; 8] = [
    (RF, 135, LB, 135),
    (LF, 45, RB, 45),
    (RF, 90, LB, 90),
    (LF, 90, RB, 90),
    (LF, 135, RB, 135),
    (RF, 45, LB, 45),
    (LF, 90, RB, 90),
    (RF, 90, LB, 90),
];

const ROTATE_LEFT: [Phase; 2] = [(RF, 45, LB, 135), (LF, 45, RB, 135)];
const ROTATE_RIGHT: [Phase; 2] = [(LF, 45, RB, 135), (RF, 45, LB, 135)];

const NEUTRAL: i32 = NEUTRAL_ANGLE as i32;
const SWING_LOW: i32 = 30;
const SWING_HIGH: i32 = 150;
const RAMP_STEP: usize = 5;
const JUMP_EXTEND: i32 = 140;
const JUMP_FLEX: i32 = 35;
const JUMP_HOLD_EXTRA_MS: u64 = 80;
const GREET_PAUSE_MS: u64 = 100;
const WAVE_LOW: i32 = 45;
const STRETCH_STEP_MS: u64 = 15;
const STRETCH_FRONT_LOW: i32 = 10;
const STRETCH_BACK_HIGH: i32 = 170;

struct Choreographer<'a, P: PulseOutput> {
    driver: &'a mut ServoDriver<P>,
    params: ActionParams,
    stop: &'a AtomicBool,
}

impl<P: PulseOutput> Choreographer<'_, P> {
    fn run(&mut self, action: ActionId) -> Step {
        match action {
            ActionId::RelaxedGetdown => self.two_stage(20, 160),
            ActionId::Sit => self.sit(),
            ActionId::Upright => self.stand(),
            ActionId::Getdown => self.two_stage(20, 20),
            ActionId::Advance => self.gait(&ADVANCE_CYCLE),
            ActionId::Retreat => self.gait(&RETREAT_CYCLE),
            ActionId::RotateLeft => self.rotate(&ROTATE_LEFT),
            ActionId::RotateRight => self.rotate(&ROTATE_RIGHT),
            ActionId::Swing => self.swing(),
            ActionId::JumpForward => self.jump([LF, RF], [LB, RB]),
            ActionId::JumpBack => self.jump([LB, RB], [LF, RF]),
            ActionId::Greet => self.greet(),
            ActionId::Stretch => self.stretch(),
        }
    }

    fn checkpoint(&self) -> Step {
        if self.stop.load(Ordering::Acquire) {
            debug!("Stop observed");
            return Err(Interrupt::Cancelled);
        }
        Ok(())
    }

    fn pause_ms(&self, ms: u64) -> Step {
        thread::sleep(Duration::from_millis(ms));
        self.checkpoint()
    }

    fn step_pause(&self) -> Step {
        self.pause_ms(self.params.speed_delay as u64)
    }

    fn swing_pause(&self) -> Step {
        self.pause_ms(self.params.swing_delay as u64)
    }

    fn pair(&mut self, (a, a_angle, b, b_angle): Phase) -> Result<(), DriverError> {
        self.driver.set_angle(a, a_angle)?;
        self.driver.set_angle(b, b_angle)
    }

    /// Run `cycle` repeat_count times, or until stopped when continuous
    fn repeat(&mut self, mut cycle: impl FnMut(&mut Self) -> Step) -> Step {
        let mut remaining = self.params.repeat_count.max(1);
        while remaining > 0 {
            self.checkpoint()?;
            cycle(self)?;
            if !self.params.continuous {
                remaining -= 1;
            }
        }
        Ok(())
    }

    /// Front pair, step delay, back pair
    fn two_stage(&mut self, front: i32, back: i32) -> Step {
        self.pair((LF, front, RF, front))?;
        self.step_pause()?;
        self.pair((LB, back, RB, back))?;
        Ok(())
    }

    fn stand(&mut self) -> Step {
        self.two_stage(NEUTRAL, NEUTRAL)
    }

    fn sit(&mut self) -> Step {
        self.two_stage(NEUTRAL, 20)
    }

    fn gait(&mut self, cycle: &[Phase]) -> Step {
        self.repeat(|c| {
            for &phase in cycle {
                c.pair(phase)?;
                c.step_pause()?;
            }
            Ok(())
        })
    }

    fn rotate(&mut self, phases: &[Phase]) -> Step {
        self.repeat(|c| {
            for &phase in phases {
                c.pair(phase)?;
                c.step_pause()?;
            }
            c.driver.set_all_angles([NEUTRAL; 4])?;
            c.step_pause()
        })
    }

    fn swing(&mut self) -> Step {
        self.repeat(|c| {
            for angle in (SWING_LOW..SWING_HIGH).step_by(RAMP_STEP) {
                c.driver.set_all_angles([angle; 4])?;
                c.swing_pause()?;
            }
            for angle in (SWING_LOW + 5..=SWING_HIGH).rev().step_by(RAMP_STEP) {
                c.driver.set_all_angles([angle; 4])?;
                c.swing_pause()?;
            }
            Ok(())
        })?;
        self.driver.set_all_angles([NEUTRAL; 4])?;
        Ok(())
    }

    /// `push` pair extends, `tuck` pair flexes and holds, then stand
    fn jump(&mut self, push: [Joint; 2], tuck: [Joint; 2]) -> Step {
        self.pair((push[0], JUMP_EXTEND, push[1], JUMP_EXTEND))?;
        self.step_pause()?;
        self.pair((tuck[0], JUMP_FLEX, tuck[1], JUMP_FLEX))?;
        self.pause_ms(self.params.speed_delay as u64 + JUMP_HOLD_EXTRA_MS)?;
        self.stand()
    }

    fn greet(&mut self) -> Step {
        self.sit()?;
        self.pause_ms(GREET_PAUSE_MS)?;
        self.repeat(|c| {
            for angle in (WAVE_LOW..=NEUTRAL).rev().step_by(RAMP_STEP) {
                c.driver.set_angle(LF, angle)?;
                c.swing_pause()?;
            }
            for angle in (WAVE_LOW..=NEUTRAL).step_by(RAMP_STEP) {
                c.driver.set_angle(LF, angle)?;
                c.swing_pause()?;
            }
            Ok(())
        })?;
        self.stand()
    }

    fn stretch(&mut self) -> Step {
        self.pair((LB, NEUTRAL, RB, NEUTRAL))?;
        self.step_pause()?;

        // Front legs down and back up
        for angle in (STRETCH_FRONT_LOW + 5..=NEUTRAL).rev().step_by(RAMP_STEP) {
            self.pair((LF, angle, RF, angle))?;
            self.pause_ms(STRETCH_STEP_MS)?;
        }
        for angle in (STRETCH_FRONT_LOW..NEUTRAL).step_by(RAMP_STEP) {
            self.pair((LF, angle, RF, angle))?;
            self.pause_ms(STRETCH_STEP_MS)?;
        }

        // Back legs up and back down
        for angle in (NEUTRAL..STRETCH_BACK_HIGH).step_by(RAMP_STEP) {
            self.pair((LB, angle, RB, angle))?;
            self.pause_ms(STRETCH_STEP_MS)?;
        }
        for angle in (NEUTRAL + 5..=STRETCH_BACK_HIGH).rev().step_by(RAMP_STEP) {
            self.pair((LB, angle, RB, angle))?;
            self.pause_ms(STRETCH_STEP_MS)?;
        }

        self.stand()
    }
}
