use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{AutoGlmError, AutoGlmResult};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub dual_model: DualModelSection,
    #[serde(default)]
    pub device: DeviceSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    pub active_provider: String,
    #[serde(default)]
    pub providers: HashMap<String, ProviderEntry>,
    /// Role-to-model mapping. If a role is absent, falls back to active_provider defaults.
    #[serde(default)]
    pub roles: RolesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub display_name: String,
    pub api_base: String,
    /// Default model for this provider (used as fallback when no role config exists).
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub frequency_penalty: Option<f64>,
    /// Optional API key stored in config.toml (falls back to env var AUTOGLM_<ID>_API_KEY).
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Maps agent roles to specific provider+model combinations.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RolesConfig {
    /// Single-model phone agent (GLM DSL or tool calling).
    pub agent: Option<RoleEntry>,
    /// Planner in the dual-model setup.
    pub decision: Option<RoleEntry>,
    /// Screen reader / executor in the dual-model setup.
    pub vision: Option<RoleEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleEntry {
    /// Must match a key under [llm.providers.*].
    pub provider: String,
    /// Model name sent to the API.
    pub model: String,
    #[serde(default = "default_true")]
    pub stream: bool,
    /// Overrides the provider-level temperature for this role.
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentKindConfig {
    #[default]
    Glm,
    ToolCall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CoordinateConfig {
    /// 0–1000 normalised units.
    #[default]
    Relative,
    Absolute,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    #[serde(default)]
    pub kind: AgentKindConfig,
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    #[serde(default = "default_lang")]
    pub lang: String,
    /// Replaces the built-in system prompt when set.
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub coordinates: CoordinateConfig,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            kind: AgentKindConfig::default(),
            max_steps: default_max_steps(),
            lang: default_lang(),
            system_prompt: None,
            coordinates: CoordinateConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DualModelSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_dual_max_steps")]
    pub max_steps: u32,
    #[serde(default = "default_step_delay_ms")]
    pub step_delay_ms: u64,
}

impl Default for DualModelSection {
    fn default() -> Self {
        Self {
            enabled: false,
            max_steps: default_dual_max_steps(),
            step_delay_ms: default_step_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSection {
    #[serde(default = "default_device_id")]
    pub device_id: String,
    #[serde(default = "default_remote_url")]
    pub remote_url: String,
    #[serde(default = "default_device_timeout")]
    pub timeout_secs: u64,
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            device_id: default_device_id(),
            remote_url: default_remote_url(),
            timeout_secs: default_device_timeout(),
        }
    }
}

fn default_temperature() -> f64 {
    0.1
}

fn default_true() -> bool {
    true
}

fn default_max_steps() -> u32 {
    100
}

fn default_dual_max_steps() -> u32 {
    50
}

fn default_step_delay_ms() -> u64 {
    500
}

fn default_lang() -> String {
    "cn".to_string()
}

fn default_device_id() -> String {
    "default".to_string()
}

fn default_remote_url() -> String {
    "http://127.0.0.1:8765".to_string()
}

fn default_device_timeout() -> u64 {
    30
}

fn resolve_config_path() -> AutoGlmResult<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join("config.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    Err(AutoGlmError::Config(
        "config.toml not found next to executable or in working directory".into(),
    ))
}

pub fn load_config() -> AutoGlmResult<AppConfig> {
    let path = resolve_config_path()?;
    load_config_from(&path)
}

pub fn load_config_from(path: &Path) -> AutoGlmResult<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    if !config.llm.active_provider.is_empty()
        && !config.llm.providers.contains_key(&config.llm.active_provider)
    {
        return Err(AutoGlmError::Config(format!(
            "active_provider '{}' has no [llm.providers.{}] entry",
            config.llm.active_provider, config.llm.active_provider
        )));
    }
    tracing::info!(path = %path.display(), provider = %config.llm.active_provider, "config loaded");
    Ok(config)
}

pub fn save_config(config: &AppConfig) -> AutoGlmResult<()> {
    let path = resolve_config_path()?;
    save_config_to(config, &path)
}

pub fn save_config_to(config: &AppConfig, path: &Path) -> AutoGlmResult<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    tracing::info!(path = %path.display(), "config saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[llm]
active_provider = "zhipu"

[llm.providers.zhipu]
display_name = "Zhipu"
api_base = "https://open.bigmodel.cn/api/paas/v4"
model = "autoglm-phone"
max_tokens = 3000
top_p = 0.85
frequency_penalty = 0.2

[llm.roles.decision]
provider = "zhipu"
model = "glm-4-plus"
temperature = 0.3

[agent]
kind = "tool_call"
max_steps = 20
coordinates = "absolute"

[device]
device_id = "emulator-5554"
"#;

    #[test]
    fn parses_sections_with_defaults() {
        let cfg: AppConfig = toml::from_str(SAMPLE).unwrap();
        let zhipu = &cfg.llm.providers["zhipu"];
        assert_eq!(zhipu.temperature, 0.1);
        assert_eq!(zhipu.max_tokens, Some(3000));
        assert_eq!(cfg.agent.kind, AgentKindConfig::ToolCall);
        assert_eq!(cfg.agent.max_steps, 20);
        assert_eq!(cfg.agent.lang, "cn");
        assert_eq!(cfg.agent.coordinates, CoordinateConfig::Absolute);
        assert!(!cfg.dual_model.enabled);
        assert_eq!(cfg.dual_model.step_delay_ms, 500);
        assert_eq!(cfg.device.device_id, "emulator-5554");
        assert_eq!(cfg.device.timeout_secs, 30);
        let decision = cfg.llm.roles.decision.as_ref().unwrap();
        assert!(decision.stream);
        assert!(cfg.llm.roles.vision.is_none());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let cfg: AppConfig = toml::from_str(SAMPLE).unwrap();
        save_config_to(&cfg, &path).unwrap();
        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.llm.active_provider, "zhipu");
        assert_eq!(loaded.llm.providers["zhipu"].top_p, Some(0.85));
        assert_eq!(loaded.agent.kind, AgentKindConfig::ToolCall);
    }

    #[test]
    fn unknown_active_provider_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[llm]\nactive_provider = \"missing\"\n").unwrap();
        let err = load_config_from(&path).unwrap_err();
        assert!(matches!(err, AutoGlmError::Config(_)));
    }
}
