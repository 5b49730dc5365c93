pub mod mock;
pub mod remote;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::AutoGlmResult;

/// One captured frame. Never cached across steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Screenshot {
    /// PNG bytes, base64 encoded.
    pub base64_data: String,
    pub width: u32,
    pub height: u32,
}

impl Screenshot {
    /// `data:` URL form used in image message parts.
    pub fn data_url(&self) -> String {
        format!("data:image/png;base64,{}", self.base64_data)
    }
}

/// Capability surface of a controllable phone. Coordinates are absolute pixels.
/// Every method may fail with `AutoGlmError::Device`.
#[async_trait]
pub trait Device: Send + Sync {
    fn device_id(&self) -> &str;

    async fn get_screenshot(&self) -> AutoGlmResult<Screenshot>;

    /// Foreground app identifier.
    async fn get_current_app(&self) -> AutoGlmResult<String>;

    async fn tap(&self, x: i32, y: i32) -> AutoGlmResult<()>;

    async fn double_tap(&self, x: i32, y: i32) -> AutoGlmResult<()>;

    async fn long_press(&self, x: i32, y: i32) -> AutoGlmResult<()>;

    async fn swipe(&self, x1: i32, y1: i32, x2: i32, y2: i32) -> AutoGlmResult<()>;

    async fn type_text(&self, text: &str) -> AutoGlmResult<()>;

    /// `false` when no installed app matches `name`.
    async fn launch_app(&self, name: &str) -> AutoGlmResult<bool>;

    async fn back(&self) -> AutoGlmResult<()>;

    async fn home(&self) -> AutoGlmResult<()>;
}
