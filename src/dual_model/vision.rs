use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::actions::{parse_or_finish, split_response, Action, DeviceAction};
use crate::agent_engine::context::user_message;
use crate::agent_engine::step::{cancellable, observe, Observation};
use crate::device::{Device, Screenshot};
use crate::dual_model::protocols::{ActionRequest, DecisionAction, ExecutionResult, ScreenDescription};
use crate::errors::AutoGlmResult;
use crate::executor::{relative_to_absolute, ActionExecutor, CoordinateSpace, DeviceActionHandler};
use crate::llm::provider::LlmProvider;
use crate::llm::types::CallConfig;
use crate::prompts::{vision_locate_prompt, VISION_DESCRIBE_PROMPT};

const SCROLL_LOW: [i32; 2] = [500, 700];
const SCROLL_HIGH: [i32; 2] = [500, 300];

/// The perceiving half of the dual-model agent: reads the screen and turns
/// decisions into device actions.
pub struct VisionModel {
    provider: Arc<dyn LlmProvider>,
    call_config: CallConfig,
    device: Arc<dyn Device>,
    executor: DeviceActionHandler,
}

impl VisionModel {
    pub fn new(provider: Arc<dyn LlmProvider>, call_config: CallConfig, device: Arc<dyn Device>) -> Self {
        let call_config = CallConfig {
            stream: false,
            ..call_config
        };
        Self {
            provider,
            call_config,
            executor: DeviceActionHandler::new(device.clone(), CoordinateSpace::Relative),
            device,
        }
    }

    pub async fn capture(&self, cancel: &CancellationToken) -> AutoGlmResult<Observation> {
        observe(self.device.as_ref(), cancel).await
    }

    pub async fn describe(
        &self,
        observation: &Observation,
        cancel: &CancellationToken,
    ) -> AutoGlmResult<ScreenDescription> {
        let text = self
            .ask(VISION_DESCRIBE_PROMPT.to_string(), &observation.screenshot, cancel)
            .await?;
        let description = parse_description(&text, &observation.current_app);
        tracing::debug!(
            app = %description.current_app,
            elements = description.elements.len(),
            "screen described"
        );
        Ok(description)
    }

    /// Carry out one decision on the screen captured this step.
    pub async fn execute(
        &self,
        request: &ActionRequest,
        screenshot: &Screenshot,
        cancel: &CancellationToken,
    ) -> AutoGlmResult<ExecutionResult> {
        let action = match request.action {
            DecisionAction::Back => DeviceAction::Back,
            DecisionAction::Home => DeviceAction::Home,
            DecisionAction::Launch => DeviceAction::Launch {
                app: non_empty(&request.content, &request.target).to_string(),
            },
            DecisionAction::Type => DeviceAction::Type {
                text: request.content.clone(),
            },
            DecisionAction::Scroll => {
                let direction = non_empty(&request.content, &request.target);
                let (start, end) = if direction.contains("up") || direction.contains('上') {
                    (SCROLL_HIGH, SCROLL_LOW)
                } else {
                    (SCROLL_LOW, SCROLL_HIGH)
                };
                DeviceAction::Swipe { start, end }
            }
            DecisionAction::Tap | DecisionAction::Swipe => {
                match self.locate(request, screenshot, cancel).await? {
                    Action::Do(action) => action,
                    Action::Finish { message } => {
                        tracing::warn!(
                            element = %request.target,
                            %message,
                            "vision model could not locate target"
                        );
                        return Ok(self.report(request, None, false, message));
                    }
                }
            }
            DecisionAction::Finish => {
                let mut report = self.report(request, None, true, String::new());
                report.finished = true;
                return Ok(report);
            }
        };

        let position = position_of(&action, screenshot);
        let result = self
            .executor
            .execute(&Action::Do(action), screenshot.width, screenshot.height)
            .await?;
        let message = result.message.unwrap_or_default();
        let mut report = self.report(request, position, result.success, message);
        report.finished = result.should_finish;
        Ok(report)
    }

    /// Ask the vision model where `request.target` is, in DSL form.
    async fn locate(
        &self,
        request: &ActionRequest,
        screenshot: &Screenshot,
        cancel: &CancellationToken,
    ) -> AutoGlmResult<Action> {
        let prompt = vision_locate_prompt(request.action.as_str(), &request.target);
        let text = self.ask(prompt, screenshot, cancel).await?;
        let (_, action_text) = split_response(&text);
        Ok(parse_or_finish(&action_text))
    }

    async fn ask(
        &self,
        prompt: String,
        screenshot: &Screenshot,
        cancel: &CancellationToken,
    ) -> AutoGlmResult<String> {
        let messages = [user_message(prompt, Some(screenshot))];
        let response = cancellable(
            cancel,
            self.provider.chat(&messages, &[], &self.call_config),
        )
        .await?;
        Ok(response.content)
    }

    fn report(
        &self,
        request: &ActionRequest,
        position: Option<[i32; 2]>,
        success: bool,
        message: String,
    ) -> ExecutionResult {
        ExecutionResult {
            action_type: request.action.as_str().to_string(),
            target: request.target.clone(),
            position,
            success,
            finished: false,
            message,
        }
    }
}

fn non_empty<'a>(first: &'a str, fallback: &'a str) -> &'a str {
    if first.trim().is_empty() {
        fallback
    } else {
        first
    }
}

fn position_of(action: &DeviceAction, screenshot: &Screenshot) -> Option<[i32; 2]> {
    let point = match action {
        DeviceAction::Tap { element }
        | DeviceAction::DoubleTap { element }
        | DeviceAction::LongPress { element } => *element,
        DeviceAction::Swipe { start, .. } => *start,
        _ => return None,
    };
    let (x, y) = relative_to_absolute(point, screenshot.width, screenshot.height);
    Some([x, y])
}

/// Split the `应用: / 描述: / 元素:` answer format. Free-form answers become
/// the description as-is; the foreground app from the device wins when known.
fn parse_description(text: &str, device_app: &str) -> ScreenDescription {
    let mut app = String::new();
    let mut description = String::new();
    let mut elements = Vec::new();
    let mut in_elements = false;

    for line in text.lines() {
        let line = line.trim();
        if let Some(rest) = strip_label(line, "应用") {
            app = rest.to_string();
            in_elements = false;
        } else if let Some(rest) = strip_label(line, "描述") {
            description = rest.to_string();
            in_elements = false;
        } else if strip_label(line, "元素").is_some() {
            in_elements = true;
        } else if in_elements {
            if let Some(item) = line.strip_prefix("- ").or_else(|| line.strip_prefix('-')) {
                let item = item.trim();
                if !item.is_empty() {
                    elements.push(item.to_string());
                }
            }
        }
    }

    if description.is_empty() {
        description = text.trim().to_string();
    }
    let current_app = if device_app.is_empty() {
        app
    } else {
        device_app.to_string()
    };
    ScreenDescription {
        description,
        current_app,
        elements,
    }
}

fn strip_label<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(label)?;
    let rest = rest.strip_prefix(':').or_else(|| rest.strip_prefix('：'))?;
    Some(rest.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::{DeviceCommand, MockDevice};
    use crate::llm::providers::scripted::{ScriptedProvider, ScriptedReply};

    fn vision(device: Arc<MockDevice>, replies: Vec<ScriptedReply>) -> VisionModel {
        VisionModel::new(
            Arc::new(ScriptedProvider::new(replies)),
            CallConfig::default(),
            device,
        )
    }

    fn request(action: DecisionAction, target: &str, content: &str) -> ActionRequest {
        ActionRequest {
            action,
            target: target.into(),
            content: content.into(),
        }
    }

    #[test]
    fn description_format_is_split() {
        let text = "应用: 微信\n描述: 聊天列表\n元素:\n- 搜索框\n- 张三\n\n";
        let desc = parse_description(text, "");
        assert_eq!(desc.current_app, "微信");
        assert_eq!(desc.description, "聊天列表");
        assert_eq!(desc.elements, vec!["搜索框", "张三"]);

        let desc = parse_description("一个空白页面", "com.android.settings");
        assert_eq!(desc.description, "一个空白页面");
        assert_eq!(desc.current_app, "com.android.settings");
        assert!(desc.elements.is_empty());
    }

    #[tokio::test]
    async fn tap_is_located_then_executed() {
        let device = Arc::new(MockDevice::new("m"));
        let vm = vision(
            device.clone(),
            vec![ScriptedReply::text("do(action=\"Tap\", element=[500, 300])")],
        );
        let cancel = CancellationToken::new();
        let obs = vm.capture(&cancel).await.unwrap();
        let result = vm
            .execute(&request(DecisionAction::Tap, "发送按钮", ""), &obs.screenshot, &cancel)
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.position, Some([540, 576]));
        assert_eq!(device.actions(), vec![DeviceCommand::Tap { x: 540, y: 576 }]);
    }

    #[tokio::test]
    async fn scroll_and_unlocated_targets() {
        let device = Arc::new(MockDevice::new("m"));
        let vm = vision(
            device.clone(),
            vec![ScriptedReply::text("finish(message=\"未找到目标\")")],
        );
        let cancel = CancellationToken::new();
        let shot = device.get_screenshot().await.unwrap();

        let scrolled = vm
            .execute(&request(DecisionAction::Scroll, "", "up"), &shot, &cancel)
            .await
            .unwrap();
        assert!(scrolled.success);
        assert_eq!(scrolled.position, Some([540, 576]));

        let missing = vm
            .execute(&request(DecisionAction::Tap, "不存在", ""), &shot, &cancel)
            .await
            .unwrap();
        assert!(!missing.success);
        assert!(!missing.finished);
        assert_eq!(missing.message, "未找到目标");

        assert_eq!(
            device.actions(),
            vec![DeviceCommand::Swipe {
                x1: 540,
                y1: 576,
                x2: 540,
                y2: 1344
            }]
        );
    }
}
