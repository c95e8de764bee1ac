//! Wire protocol
//!
//! Newline-delimited JSON-RPC as spoken by Seestar-class smart telescopes.
//! Requests carry a client-chosen numeric `id`; replies echo it. Messages
//! without an `id` are unsolicited device events.

use crate::error::LinkError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default control port
pub const DEFAULT_PORT: u16 = 4700;

/// Equipment is moving; the command may succeed once motion stops
pub const CODE_EQUIPMENT_MOVING: i64 = 203;
/// Operation failed on the device
pub const CODE_OPERATION_FAILED: i64 = 207;

/// Method names
pub mod methods {
    pub const START_VIEW: &str = "iscope_start_view";
    pub const STOP_VIEW: &str = "iscope_stop_view";
    pub const START_STACK: &str = "iscope_start_stack";
    pub const AUTO_FOCUS: &str = "start_auto_focuse";
    pub const PARK: &str = "scope_park";
    pub const GET_DEVICE_STATE: &str = "get_device_state";
    pub const GET_VIEW_STATE: &str = "get_view_state";
    pub const SET_SETTING: &str = "set_setting";
}

/// Stage names used by `iscope_stop_view` and view-state reports
pub mod stages {
    pub const AUTO_GOTO: &str = "AutoGoto";
    pub const AUTO_FOCUS: &str = "AutoFocus";
    pub const STACK: &str = "Stack";
}

#[derive(Debug, Clone, Serialize)]
pub struct Request<'a> {
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<&'a Value>,
    pub id: u64,
}

/// Reply to a request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub code: Option<i64>,
    pub id: u64,
}

impl Response {
    /// Placeholder for a reply whose body could not be decoded
    pub fn malformed(id: u64, reason: impl Into<String>) -> Self {
        Self {
            id,
            error: Some(Value::String(reason.into())),
            code: Some(-1),
            ..Default::default()
        }
    }

    /// Split into the result payload or a command error
    pub fn into_result(self, method: &str) -> Result<Value, LinkError> {
        let code = self.code.unwrap_or(0);
        if code != 0 || self.error.is_some() {
            let message = match self.error {
                Some(Value::String(s)) => s,
                Some(other) => other.to_string(),
                None => format!("error code {}", code),
            };
            return Err(LinkError::CommandError {
                method: method.to_string(),
                code,
                message,
            });
        }
        Ok(self.result.unwrap_or(Value::Null))
    }
}

/// Progress of one device stage (goto, focus, stacking)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    Idle,
    Working,
    Complete,
    Failed,
    Cancelled,
    Unknown,
}

impl StageStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "idle" => StageStatus::Idle,
            "start" | "working" | "running" => StageStatus::Working,
            "complete" | "completed" | "finished" => StageStatus::Complete,
            "fail" | "failed" | "error" => StageStatus::Failed,
            "cancel" | "cancelled" | "canceled" | "stopped" => StageStatus::Cancelled,
            _ => StageStatus::Unknown,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StageStatus::Complete | StageStatus::Failed | StageStatus::Cancelled)
    }
}

/// Per-stage report inside a view state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub stacked_frame: Option<u32>,
    #[serde(default)]
    pub dropped_frame: Option<u32>,
}

impl StageReport {
    pub fn status(&self) -> StageStatus {
        self.state.as_deref().map(StageStatus::parse).unwrap_or(StageStatus::Unknown)
    }
}

/// Decoded `get_view_state` result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewState {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub target_name: Option<String>,
    #[serde(rename = "AutoGoto", default)]
    pub auto_goto: Option<StageReport>,
    #[serde(rename = "AutoFocus", default)]
    pub auto_focus: Option<StageReport>,
    #[serde(rename = "Stack", default)]
    pub stack: Option<StageReport>,
}

#[derive(Deserialize)]
struct ViewEnvelope {
    #[serde(rename = "View", default)]
    view: Option<ViewState>,
}

impl ViewState {
    /// Decode from the `result` of `get_view_state`. A missing `View` object
    /// means the device has nothing running.
    pub fn from_result(result: &Value) -> Result<Self, LinkError> {
        let envelope: ViewEnvelope = serde_json::from_value(result.clone())?;
        Ok(envelope.view.unwrap_or_default())
    }

    pub fn stage_report(&self, stage: &str) -> Option<&StageReport> {
        match stage {
            stages::AUTO_GOTO => self.auto_goto.as_ref(),
            stages::AUTO_FOCUS => self.auto_focus.as_ref(),
            stages::STACK => self.stack.as_ref(),
            _ => None,
        }
    }

    pub fn stage_status(&self, stage: &str) -> StageStatus {
        self.stage_report(stage)
            .map(StageReport::status)
            .unwrap_or(StageStatus::Unknown)
    }

    pub fn stacked_frames(&self) -> u32 {
        self.stack.as_ref().and_then(|s| s.stacked_frame).unwrap_or(0)
    }
}

/// Firmware version from a `get_device_state` result
pub fn firmware_version(device_state: &Value) -> Option<String> {
    device_state
        .get("device")
        .and_then(|d| d.get("firmware_ver_string"))
        .and_then(Value::as_str)
        .map(str::to_string)
}
