use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::actions::{Action, DeviceAction};
use crate::device::Device;
use crate::errors::AutoGlmResult;
use crate::executor::coordinator::CoordinateSpace;

const DEFAULT_WAIT: Duration = Duration::from_secs(1);
const MAX_WAIT: Duration = Duration::from_secs(60);

/// Outcome of one dispatched action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub should_finish: bool,
    pub message: Option<String>,
}

impl ActionResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            should_finish: false,
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            should_finish: false,
            message: Some(message.into()),
        }
    }

    /// `{"success": .., "message": ..}` as fed back to tool-calling models.
    pub fn to_tool_content(&self) -> String {
        serde_json::json!({
            "success": self.success,
            "message": self.message.as_deref().unwrap_or("OK"),
        })
        .to_string()
    }
}

/// Carries an [`Action`] out on a screen of the given size.
///
/// Device failures come back as `Err`; the caller decides how a failed
/// dispatch affects the run.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, action: &Action, width: u32, height: u32)
        -> AutoGlmResult<ActionResult>;
}

/// Default executor: translates actions into [`Device`] calls.
pub struct DeviceActionHandler {
    device: Arc<dyn Device>,
    space: CoordinateSpace,
}

impl DeviceActionHandler {
    pub fn new(device: Arc<dyn Device>, space: CoordinateSpace) -> Self {
        Self { device, space }
    }

    async fn dispatch(
        &self,
        action: &DeviceAction,
        width: u32,
        height: u32,
    ) -> AutoGlmResult<ActionResult> {
        let at = |p: [i32; 2]| self.space.to_device(p, width, height);
        match action {
            DeviceAction::Tap { element } => {
                let (x, y) = at(*element);
                self.device.tap(x, y).await?;
            }
            DeviceAction::DoubleTap { element } => {
                let (x, y) = at(*element);
                self.device.double_tap(x, y).await?;
            }
            DeviceAction::LongPress { element } => {
                let (x, y) = at(*element);
                self.device.long_press(x, y).await?;
            }
            DeviceAction::Swipe { start, end } => {
                let (x1, y1) = at(*start);
                let (x2, y2) = at(*end);
                self.device.swipe(x1, y1, x2, y2).await?;
            }
            DeviceAction::Type { text } => self.device.type_text(text).await?,
            DeviceAction::Launch { app } => {
                if !self.device.launch_app(app).await? {
                    return Ok(ActionResult::failed(format!("App not found: {app}")));
                }
            }
            DeviceAction::Back => self.device.back().await?,
            DeviceAction::Home => self.device.home().await?,
            DeviceAction::Wait { duration } => {
                tokio::time::sleep(parse_wait(duration)).await;
            }
        }
        Ok(ActionResult::ok())
    }
}

#[async_trait]
impl ActionExecutor for DeviceActionHandler {
    async fn execute(
        &self,
        action: &Action,
        width: u32,
        height: u32,
    ) -> AutoGlmResult<ActionResult> {
        match action {
            Action::Finish { message } => Ok(ActionResult {
                success: true,
                should_finish: true,
                message: Some(message.clone()),
            }),
            Action::Do(inner) => {
                tracing::debug!(
                    device = self.device.device_id(),
                    action = inner.name(),
                    width,
                    height,
                    "dispatching action"
                );
                self.dispatch(inner, width, height).await
            }
        }
    }
}

/// Reads `"2 seconds"`, `"1.5s"` or `"500ms"`; anything else waits one second.
pub fn parse_wait(duration: &str) -> Duration {
    static WAIT_RE: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(re) = WAIT_RE
        .get_or_init(|| {
            Regex::new(r"(?i)^\s*(\d+(?:\.\d+)?)\s*(ms|milliseconds?|s|secs?|seconds?)?\s*$").ok()
        })
        .as_ref()
    else {
        return DEFAULT_WAIT;
    };
    let Some(caps) = re.captures(duration) else {
        return DEFAULT_WAIT;
    };
    let Ok(amount) = caps[1].parse::<f64>() else {
        return DEFAULT_WAIT;
    };
    let millis = caps
        .get(2)
        .is_some_and(|u| u.as_str().to_ascii_lowercase().starts_with("m"));
    let wait = if millis {
        Duration::from_secs_f64(amount / 1000.0)
    } else {
        Duration::from_secs_f64(amount)
    };
    wait.min(MAX_WAIT)
}
