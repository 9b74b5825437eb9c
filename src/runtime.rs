// Tool-call loop: JSON lines on stdin, JSON replies on stdout
//
// Stands in for the remote command layer. Each line is one ToolCall; the
// handler runs on the blocking pool because perform() may wait out the
// preempt grace.

use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use crate::messages::{ToolCall, ToolReply};
use crate::scheduler::CommandScheduler;
use crate::tools::PetTools;

/// Decode one input line into a reply
async fn handle_line(tools: &PetTools, line: &str) -> Result<ToolReply, tokio::task::JoinError> {
    match serde_json::from_str::<ToolCall>(line) {
        Ok(call) => {
            info!("Received tool call: {:?}", &call);
            let tools = tools.clone();
            tokio::task::spawn_blocking(move || tools.call(call)).await
        }
        Err(e) => {
            warn!("Failed to parse tool call: {}", e);
            Ok(ToolReply::error(format!("error: invalid tool call: {}", e)))
        }
    }
}

/// Ctrl-C: cut the running action short. Returns whether the stop was accepted.
fn stop_on_interrupt(scheduler: &CommandScheduler) -> bool {
    info!("Interrupted, stopping current action");
    match scheduler.stop_current_action() {
        Ok(()) => true,
        Err(e) => {
            warn!("Could not stop current action: {}", e);
            false
        }
    }
}

pub async fn run(scheduler: Arc<CommandScheduler>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let tools = PetTools::new(Arc::clone(&scheduler));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    info!("Runtime ready: reading tool calls from stdin (health: {:?})", scheduler.health());

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                stop_on_interrupt(&scheduler);
                break;
            }
        };

        // EOF
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let reply = handle_line(&tools, &line).await?;
        let mut reply_json = serde_json::to_string(&reply)?;
        reply_json.push('\n');
        stdout.write_all(reply_json.as_bytes()).await?;
        stdout.flush().await?;
    }

    info!("Runtime stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::SchedulerConfig;
    use crate::servo::{DriverTiming, ServoDriver, SimulatedPwm};

    fn tools() -> PetTools {
        let driver = ServoDriver::with_timing(SimulatedPwm::new(), DriverTiming::unthrottled()).unwrap();
        PetTools::new(Arc::new(CommandScheduler::start(driver, SchedulerConfig::default())))
    }

    #[tokio::test]
    async fn test_status_line() {
        let reply = handle_line(&tools(), r#"{"tool":"get_status"}"#).await.unwrap();
        assert_eq!(reply, ToolReply::ok("idle"));
    }

    #[tokio::test]
    async fn test_garbage_line_gets_error_reply() {
        let reply = handle_line(&tools(), "sit down please").await.unwrap();
        assert!(!reply.ok);
        assert!(reply.status.starts_with("error: invalid tool call"));
    }

    #[test]
    fn test_interrupt_on_disabled_scheduler_reports_failure() {
        let driver = ServoDriver::with_timing(SimulatedPwm::new(), DriverTiming::unthrottled()).unwrap();
        let disabled = CommandScheduler::start(
            driver,
            SchedulerConfig {
                queue_capacity: 0,
                ..SchedulerConfig::default()
            },
        );
        assert!(!stop_on_interrupt(&disabled));

        let driver = ServoDriver::with_timing(SimulatedPwm::new(), DriverTiming::unthrottled()).unwrap();
        let running = CommandScheduler::start(driver, SchedulerConfig::default());
        assert!(stop_on_interrupt(&running));
        assert!(running.run_state().stop_requested());
    }

    #[tokio::test]
    async fn test_out_of_range_speed_line() {
        let reply = handle_line(&tools(), r#"{"tool":"set_speed","speed_ms":500}"#)
            .await
            .unwrap();
        assert!(!reply.ok);
    }
}
