// Message types exchanged with the remote tool layer

use serde::{Deserialize, Serialize};

fn default_repeat() -> i64 {
    1
}

// Tool invocation from the remote command layer -> runtime
// Arguments stay as wide integers so out-of-range values reach validation
// instead of failing to parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum ToolCall {
    Perform {
        action_id: i64,
        #[serde(default = "default_repeat")]
        repeat: i64,
    },
    SetSpeed {
        speed_ms: i64,
    },
    Stop,
    GetStatus,
}

// Reply to a tool invocation: always a definite outcome plus status text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolReply {
    pub ok: bool,
    pub status: String,
}

impl ToolReply {
    pub fn ok(status: impl Into<String>) -> Self {
        Self {
            ok: true,
            status: status.into(),
        }
    }

    pub fn error(status: impl Into<String>) -> Self {
        Self {
            ok: false,
            status: status.into(),
        }
    }
}

/// Overall controller health
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ControllerHealth {
    Ok,
    Faulted,
    Disabled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_perform_with_default_repeat() {
        let call: ToolCall = serde_json::from_str(r#"{"tool":"perform","action_id":4}"#).unwrap();
        assert_eq!(
            call,
            ToolCall::Perform {
                action_id: 4,
                repeat: 1
            }
        );
    }

    #[test]
    fn test_parse_unit_tools() {
        let stop: ToolCall = serde_json::from_str(r#"{"tool":"stop"}"#).unwrap();
        assert_eq!(stop, ToolCall::Stop);
        let status: ToolCall = serde_json::from_str(r#"{"tool":"get_status"}"#).unwrap();
        assert_eq!(status, ToolCall::GetStatus);
    }

    #[test]
    fn test_unknown_tool_rejected() {
        assert!(serde_json::from_str::<ToolCall>(r#"{"tool":"dance"}"#).is_err());
    }

    #[test]
    fn test_reply_and_health_json() {
        let reply = serde_json::to_string(&ToolReply::ok("idle")).unwrap();
        assert_eq!(reply, r#"{"ok":true,"status":"idle"}"#);
        let health = serde_json::to_string(&ControllerHealth::Faulted).unwrap();
        assert_eq!(health, r#""faulted""#);
    }
}
