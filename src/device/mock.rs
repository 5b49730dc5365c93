use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use base64::Engine;

use crate::device::{Device, Screenshot};
use crate::errors::{AutoGlmError, AutoGlmResult};

const LAUNCHER: &str = "System Home";

/// Every call a `MockDevice` received, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCommand {
    Screenshot,
    CurrentApp,
    Tap { x: i32, y: i32 },
    DoubleTap { x: i32, y: i32 },
    LongPress { x: i32, y: i32 },
    Swipe { x1: i32, y1: i32, x2: i32, y2: i32 },
    TypeText(String),
    LaunchApp(String),
    Back,
    Home,
}

impl DeviceCommand {
    /// True for commands that change what is on screen.
    pub fn is_action(&self) -> bool {
        !matches!(self, DeviceCommand::Screenshot | DeviceCommand::CurrentApp)
    }
}

type CommandHook = Arc<dyn Fn(&DeviceCommand) + Send + Sync>;

struct MockState {
    current_app: String,
    commands: Vec<DeviceCommand>,
    screenshots_taken: usize,
}

/// In-memory phone used by tests and dry runs.
pub struct MockDevice {
    id: String,
    width: u32,
    height: u32,
    installed: Vec<String>,
    fail_screenshots_after: Option<usize>,
    fail_actions: bool,
    hook: Option<CommandHook>,
    state: Mutex<MockState>,
}

impl MockDevice {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            width: 1080,
            height: 1920,
            installed: Vec::new(),
            fail_screenshots_after: None,
            fail_actions: false,
            hook: None,
            state: Mutex::new(MockState {
                current_app: LAUNCHER.to_string(),
                commands: Vec::new(),
                screenshots_taken: 0,
            }),
        }
    }

    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_current_app(self, app: impl Into<String>) -> Self {
        self.lock().current_app = app.into();
        self
    }

    pub fn with_installed_apps<I, S>(mut self, apps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.installed = apps.into_iter().map(Into::into).collect();
        self
    }

    /// Screenshots beyond the first `n` fail with a device error.
    pub fn fail_screenshots_after(mut self, n: usize) -> Self {
        self.fail_screenshots_after = Some(n);
        self
    }

    /// Every screen-changing command fails with a device error.
    pub fn fail_actions(mut self) -> Self {
        self.fail_actions = true;
        self
    }

    /// Called after each command is recorded, before it returns.
    pub fn on_command<F>(mut self, hook: F) -> Self
    where
        F: Fn(&DeviceCommand) + Send + Sync + 'static,
    {
        self.hook = Some(Arc::new(hook));
        self
    }

    pub fn commands(&self) -> Vec<DeviceCommand> {
        self.lock().commands.clone()
    }

    /// Recorded commands that changed the screen.
    pub fn actions(&self) -> Vec<DeviceCommand> {
        self.lock()
            .commands
            .iter()
            .filter(|c| c.is_action())
            .cloned()
            .collect()
    }

    pub fn screenshots_taken(&self) -> usize {
        self.lock().screenshots_taken
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, command: DeviceCommand) -> AutoGlmResult<()> {
        let is_action = command.is_action();
        self.lock().commands.push(command.clone());
        if let Some(hook) = &self.hook {
            hook(&command);
        }
        if is_action && self.fail_actions {
            return Err(AutoGlmError::Device(format!(
                "{}: device disconnected",
                self.id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Device for MockDevice {
    fn device_id(&self) -> &str {
        &self.id
    }

    async fn get_screenshot(&self) -> AutoGlmResult<Screenshot> {
        self.record(DeviceCommand::Screenshot)?;
        let taken = {
            let mut state = self.lock();
            state.screenshots_taken += 1;
            state.screenshots_taken
        };
        if let Some(limit) = self.fail_screenshots_after {
            if taken > limit {
                return Err(AutoGlmError::Device(format!(
                    "{}: screenshot capture failed",
                    self.id
                )));
            }
        }
        let frame = format!("mock-frame-{taken}");
        Ok(Screenshot {
            base64_data: base64::engine::general_purpose::STANDARD.encode(frame),
            width: self.width,
            height: self.height,
        })
    }

    async fn get_current_app(&self) -> AutoGlmResult<String> {
        self.record(DeviceCommand::CurrentApp)?;
        Ok(self.lock().current_app.clone())
    }

    async fn tap(&self, x: i32, y: i32) -> AutoGlmResult<()> {
        self.record(DeviceCommand::Tap { x, y })
    }

    async fn double_tap(&self, x: i32, y: i32) -> AutoGlmResult<()> {
        self.record(DeviceCommand::DoubleTap { x, y })
    }

    async fn long_press(&self, x: i32, y: i32) -> AutoGlmResult<()> {
        self.record(DeviceCommand::LongPress { x, y })
    }

    async fn swipe(&self, x1: i32, y1: i32, x2: i32, y2: i32) -> AutoGlmResult<()> {
        self.record(DeviceCommand::Swipe { x1, y1, x2, y2 })
    }

    async fn type_text(&self, text: &str) -> AutoGlmResult<()> {
        self.record(DeviceCommand::TypeText(text.to_string()))
    }

    async fn launch_app(&self, name: &str) -> AutoGlmResult<bool> {
        self.record(DeviceCommand::LaunchApp(name.to_string()))?;
        if self.installed.iter().any(|a| a == name) {
            self.lock().current_app = name.to_string();
            return Ok(true);
        }
        Ok(false)
    }

    async fn back(&self) -> AutoGlmResult<()> {
        self.record(DeviceCommand::Back)
    }

    async fn home(&self) -> AutoGlmResult<()> {
        self.record(DeviceCommand::Home)?;
        self.lock().current_app = LAUNCHER.to_string();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn records_commands_and_tracks_foreground_app() {
        let device = MockDevice::new("mock").with_installed_apps(["微信"]);
        assert!(device.launch_app("微信").await.unwrap());
        assert_eq!(device.get_current_app().await.unwrap(), "微信");
        assert!(!device.launch_app("Nope").await.unwrap());
        device.home().await.unwrap();
        assert_eq!(device.get_current_app().await.unwrap(), LAUNCHER);
        assert_eq!(device.actions().len(), 3);
    }

    #[tokio::test]
    async fn screenshots_fail_after_limit() {
        let device = MockDevice::new("mock").with_resolution(720, 1280).fail_screenshots_after(1);
        let shot = device.get_screenshot().await.unwrap();
        assert_eq!((shot.width, shot.height), (720, 1280));
        assert!(shot.data_url().starts_with("data:image/png;base64,"));
        assert!(device.get_screenshot().await.is_err());
    }

    #[tokio::test]
    async fn hook_sees_commands_even_when_actions_fail() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let device = MockDevice::new("mock")
            .fail_actions()
            .on_command(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        assert!(device.tap(1, 2).await.is_err());
        assert!(device.get_current_app().await.is_ok());
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
