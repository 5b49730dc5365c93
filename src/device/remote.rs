use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::DeviceSection;
use crate::device::{Device, Screenshot};
use crate::errors::{AutoGlmError, AutoGlmResult};

/// HTTP client for a device agent exposing `POST /device/{id}/{command}`.
pub struct RemoteDevice {
    id: String,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct CurrentAppReply {
    app: String,
}

#[derive(Deserialize)]
struct LaunchReply {
    success: bool,
}

impl RemoteDevice {
    pub fn new(id: impl Into<String>, base_url: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "falling back to default HTTP client");
                reqwest::Client::new()
            });
        Self {
            id: id.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn from_config(cfg: &DeviceSection) -> Self {
        Self::new(
            cfg.device_id.clone(),
            &cfg.remote_url,
            Duration::from_secs(cfg.timeout_secs),
        )
    }

    fn url(&self, command: &str) -> String {
        format!("{}/device/{}/{}", self.base_url, self.id, command)
    }

    async fn post(
        &self,
        command: &str,
        body: serde_json::Value,
    ) -> AutoGlmResult<reqwest::Response> {
        tracing::debug!(device = %self.id, command, "remote device call");
        let response = self
            .client
            .post(self.url(command))
            .json(&body)
            .send()
            .await
            .map_err(|e| AutoGlmError::Device(format!("{command}: {e}")))?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AutoGlmError::Device(format!("{command}: {status}: {text}")));
        }
        Ok(response)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        command: &str,
        body: serde_json::Value,
    ) -> AutoGlmResult<T> {
        self.post(command, body)
            .await?
            .json::<T>()
            .await
            .map_err(|e| AutoGlmError::Device(format!("{command}: bad reply: {e}")))
    }

    async fn fire(&self, command: &str, body: serde_json::Value) -> AutoGlmResult<()> {
        self.post(command, body).await.map(|_| ())
    }
}

#[async_trait]
impl Device for RemoteDevice {
    fn device_id(&self) -> &str {
        &self.id
    }

    async fn get_screenshot(&self) -> AutoGlmResult<Screenshot> {
        self.call("screenshot", serde_json::json!({})).await
    }

    async fn get_current_app(&self) -> AutoGlmResult<String> {
        let reply: CurrentAppReply = self.call("current_app", serde_json::json!({})).await?;
        Ok(reply.app)
    }

    async fn tap(&self, x: i32, y: i32) -> AutoGlmResult<()> {
        self.fire("tap", serde_json::json!({"x": x, "y": y})).await
    }

    async fn double_tap(&self, x: i32, y: i32) -> AutoGlmResult<()> {
        self.fire("double_tap", serde_json::json!({"x": x, "y": y}))
            .await
    }

    async fn long_press(&self, x: i32, y: i32) -> AutoGlmResult<()> {
        self.fire("long_press", serde_json::json!({"x": x, "y": y}))
            .await
    }

    async fn swipe(&self, x1: i32, y1: i32, x2: i32, y2: i32) -> AutoGlmResult<()> {
        self.fire(
            "swipe",
            serde_json::json!({"start_x": x1, "start_y": y1, "end_x": x2, "end_y": y2}),
        )
        .await
    }

    async fn type_text(&self, text: &str) -> AutoGlmResult<()> {
        self.fire("type_text", serde_json::json!({"text": text}))
            .await
    }

    async fn launch_app(&self, name: &str) -> AutoGlmResult<bool> {
        let reply: LaunchReply = self
            .call("launch_app", serde_json::json!({"app_name": name}))
            .await?;
        Ok(reply.success)
    }

    async fn back(&self) -> AutoGlmResult<()> {
        self.fire("back", serde_json::json!({})).await
    }

    async fn home(&self) -> AutoGlmResult<()> {
        self.fire("home", serde_json::json!({})).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_built_per_device() {
        let device = RemoteDevice::new("phone_001", "http://agent:8001/", Duration::from_secs(5));
        assert_eq!(device.url("tap"), "http://agent:8001/device/phone_001/tap");
    }

    #[tokio::test]
    async fn unreachable_agent_is_a_device_error() {
        let device = RemoteDevice::new("p", "http://127.0.0.1:9", Duration::from_millis(500));
        let err = device.back().await.unwrap_err();
        assert!(matches!(err, AutoGlmError::Device(_)));
    }
}
