// Narrow interface exposed to the remote tool layer
//
// Validates tool arguments, drives the scheduler, and turns every outcome
// into status text.

use std::sync::Arc;
use tracing::{info, warn};

use crate::actions::{ActionId, UnknownAction};
use crate::config::{TOOL_REPEAT_RANGE, TOOL_SPEED_RANGE_MS};
use crate::messages::{ToolCall, ToolReply};
use crate::scheduler::{CommandScheduler, SchedulerError};

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error(transparent)]
    UnknownAction(#[from] UnknownAction),

    #[error("{name} must be between {min} and {max}, got {value}")]
    OutOfRange {
        name: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

fn check_range(name: &'static str, value: i64, (min, max): (i64, i64)) -> Result<i64, ToolError> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(ToolError::OutOfRange {
            name,
            value,
            min,
            max,
        })
    }
}

/// Tool handlers bound to one scheduler
#[derive(Clone)]
pub struct PetTools {
    scheduler: Arc<CommandScheduler>,
}

impl PetTools {
    pub fn new(scheduler: Arc<CommandScheduler>) -> Self {
        Self { scheduler }
    }

    /// Dispatch a decoded tool call
    pub fn call(&self, call: ToolCall) -> ToolReply {
        let result = match call {
            ToolCall::Perform { action_id, repeat } => self.perform(action_id, repeat),
            ToolCall::SetSpeed { speed_ms } => self.set_speed(speed_ms),
            ToolCall::Stop => self.stop(),
            ToolCall::GetStatus => Ok(self.get_status()),
        };

        match result {
            Ok(status) => ToolReply::ok(status),
            Err(e) => {
                warn!("Tool call failed: {}", e);
                ToolReply::error(format!("error: {}", e))
            }
        }
    }

    /// Preempt the current action and run `action_id` `repeat` times at the default speed
    pub fn perform(&self, action_id: i64, repeat: i64) -> Result<String, ToolError> {
        let action = ActionId::try_from(action_id)?;
        let repeat = check_range("repeat", repeat, TOOL_REPEAT_RANGE)?;

        let params = self.scheduler.default_params().with_repeat(repeat as u8);
        self.scheduler.perform(action, Some(params))?;
        info!("Tool perform: {} x{}", action, repeat);
        Ok(format!("performing action {} x{}", action, repeat))
    }

    pub fn set_speed(&self, speed_ms: i64) -> Result<String, ToolError> {
        let speed = check_range("speed_ms", speed_ms, TOOL_SPEED_RANGE_MS)?;
        self.scheduler.set_speed(speed as u16)?;
        Ok(format!("speed set to {}ms", speed))
    }

    pub fn stop(&self) -> Result<String, ToolError> {
        self.scheduler.stop_current_action()?;
        Ok("stopped".to_string())
    }

    /// "idle" or "running: action <id>"
    pub fn get_status(&self) -> String {
        if self.scheduler.is_idle() {
            "idle".to_string()
        } else {
            format!("running: action {}", self.scheduler.current_action().id())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::SchedulerConfig;
    use crate::servo::{DriverTiming, ServoDriver, SimulatedPwm};
    use std::time::Duration;

    fn tools() -> (PetTools, Arc<CommandScheduler>) {
        let driver = ServoDriver::with_timing(SimulatedPwm::new(), DriverTiming::unthrottled()).unwrap();
        let scheduler = Arc::new(CommandScheduler::start(driver, SchedulerConfig::default()));
        (PetTools::new(Arc::clone(&scheduler)), scheduler)
    }

    #[test]
    fn test_status_idle() {
        let (tools, _scheduler) = tools();
        assert_eq!(tools.get_status(), "idle");
        assert_eq!(tools.call(ToolCall::GetStatus), ToolReply::ok("idle"));
    }

    #[test]
    fn test_status_running() {
        let (tools, scheduler) = tools();
        let slow = crate::actions::ActionParams::default().continuous();
        scheduler.enqueue(ActionId::Swing, Some(slow)).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while scheduler.is_idle() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(tools.get_status(), "running: action 8");

        assert!(tools.call(ToolCall::Stop).ok);
        assert!(scheduler.wait_until_drained(Duration::from_secs(2)));
        assert_eq!(tools.get_status(), "idle");
    }

    #[test]
    fn test_perform_validates_action() {
        let (tools, _scheduler) = tools();
        for bad in [9, 12, 15, -1] {
            let reply = tools.call(ToolCall::Perform {
                action_id: bad,
                repeat: 1,
            });
            assert!(!reply.ok);
            assert!(reply.status.contains("Unknown action"), "{}", reply.status);
        }
    }

    #[test]
    fn test_perform_validates_repeat() {
        let (tools, _scheduler) = tools();
        let reply = tools.call(ToolCall::Perform {
            action_id: 1,
            repeat: 11,
        });
        assert!(!reply.ok);
        assert!(reply.status.contains("repeat must be between 1 and 10"));
    }

    #[test]
    fn test_perform_uses_default_speed() {
        let sim = SimulatedPwm::new();
        let driver = ServoDriver::with_timing(sim.clone(), DriverTiming::unthrottled()).unwrap();
        let scheduler = Arc::new(CommandScheduler::start(driver, SchedulerConfig::default()));
        let tools = PetTools::new(Arc::clone(&scheduler));

        tools.set_speed(20).unwrap();
        let reply = tools.call(ToolCall::Perform {
            action_id: 1,
            repeat: 2,
        });
        assert!(reply.ok, "{}", reply.status);
        assert!(scheduler.wait_until_drained(Duration::from_secs(2)));
        assert_eq!(scheduler.pose(), [90, 90, 20, 20]);

        // Sit pauses one step delay between its front and back stage
        let writes = sim.writes();
        let gap = writes
            .windows(2)
            .find(|pair| pair[0].channel == 1 && pair[1].channel == 2)
            .map(|pair| pair[1].at - pair[0].at)
            .unwrap();
        assert!(gap >= Duration::from_millis(20), "{:?}", gap);
        assert!(gap < Duration::from_millis(60), "{:?}", gap);
    }

    #[test]
    fn test_set_speed_range() {
        let (tools, scheduler) = tools();
        assert!(!tools.call(ToolCall::SetSpeed { speed_ms: 250 }).ok);
        assert!(!tools.call(ToolCall::SetSpeed { speed_ms: 10 }).ok);
        assert_eq!(scheduler.default_params().speed_delay, 80);

        let reply = tools.call(ToolCall::SetSpeed { speed_ms: 120 });
        assert_eq!(reply, ToolReply::ok("speed set to 120ms"));
        assert_eq!(scheduler.default_params().speed_delay, 120);
    }
}
