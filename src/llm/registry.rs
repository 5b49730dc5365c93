use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{AppConfig, LlmConfig};
use crate::errors::{AutoGlmError, AutoGlmResult};
use crate::llm::provider::LlmProvider;
use crate::llm::providers::openai_compatible::OpenAiCompatibleProvider;
use crate::llm::types::CallConfig;

/// Registry of all available LLM providers, keyed by their config.toml identifier.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    active: String,
    llm_config: LlmConfig,
}

impl ProviderRegistry {
    pub fn new(active: String) -> Self {
        Self {
            providers: HashMap::new(),
            active,
            llm_config: LlmConfig::default(),
        }
    }

    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get_active(&self) -> AutoGlmResult<Arc<dyn LlmProvider>> {
        self.providers.get(&self.active).cloned().ok_or_else(|| {
            AutoGlmError::Config(format!(
                "Active provider '{}' not found in registry",
                self.active
            ))
        })
    }

    /// Return the provider and call configuration for a named role.
    ///
    /// Role resolution order:
    /// 1. `[llm.roles.<role>]` in config.toml
    /// 2. Fallback: active provider with its default model / sampling and `stream = true`
    pub fn call_config_for_role(
        &self,
        role: &str,
    ) -> AutoGlmResult<(Arc<dyn LlmProvider>, CallConfig)> {
        let role_entry = match role {
            "agent" => self.llm_config.roles.agent.as_ref(),
            "decision" => self.llm_config.roles.decision.as_ref(),
            "vision" => self.llm_config.roles.vision.as_ref(),
            other => {
                tracing::warn!(role = other, "unknown role, falling back to active provider");
                None
            }
        };

        if let Some(entry) = role_entry {
            let provider = self.providers.get(&entry.provider).cloned().ok_or_else(|| {
                AutoGlmError::Config(format!(
                    "Role '{}' references unknown provider '{}'",
                    role, entry.provider
                ))
            })?;
            let mut cfg = self.provider_defaults(&entry.provider);
            cfg.model = entry.model.clone();
            cfg.stream = entry.stream;
            if let Some(t) = entry.temperature {
                cfg.temperature = t;
            }
            tracing::debug!(
                role = role,
                provider = %entry.provider,
                model = %cfg.model,
                stream = cfg.stream,
                temperature = cfg.temperature,
                "resolved role config"
            );
            return Ok((provider, cfg));
        }

        let provider = self.get_active()?;
        let cfg = self.provider_defaults(&self.active);
        tracing::debug!(
            role = role,
            provider = %self.active,
            model = %cfg.model,
            "role not configured, using active provider fallback"
        );
        Ok((provider, cfg))
    }

    fn provider_defaults(&self, id: &str) -> CallConfig {
        match self.llm_config.providers.get(id) {
            Some(p) => CallConfig {
                model: p.model.clone(),
                stream: true,
                temperature: p.temperature,
                max_tokens: p.max_tokens,
                top_p: p.top_p,
                frequency_penalty: p.frequency_penalty,
                tool_choice: None,
            },
            None => CallConfig {
                stream: true,
                temperature: 0.1,
                ..CallConfig::default()
            },
        }
    }

    /// Build a registry from the loaded app config.
    /// API keys are read from environment variables named `AUTOGLM_<ID>_API_KEY`.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut registry = Self {
            providers: HashMap::new(),
            active: config.llm.active_provider.clone(),
            llm_config: config.llm.clone(),
        };
        for (id, entry) in &config.llm.providers {
            let api_key = std::env::var(api_key_var(id))
                .unwrap_or_else(|_| entry.api_key.clone().unwrap_or_default());
            let provider =
                OpenAiCompatibleProvider::new(id.clone(), entry.api_base.clone(), api_key);
            registry.register(Arc::new(provider));
        }
        registry
    }
}

fn api_key_var(id: &str) -> String {
    format!("AUTOGLM_{}_API_KEY", id.to_uppercase().replace('-', "_"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::providers::scripted::ScriptedProvider;

    fn config() -> AppConfig {
        toml::from_str(
            r#"
[llm]
active_provider = "local"

[llm.providers.local]
display_name = "Local vLLM"
api_base = "http://localhost:8000/v1"
model = "autoglm-phone-9b"
temperature = 0.0
max_tokens = 3000

[llm.roles.vision]
provider = "local"
model = "qwen-vl"
stream = false
"#,
        )
        .unwrap()
    }

    #[test]
    fn role_overrides_model_and_keeps_provider_sampling() {
        let registry = ProviderRegistry::from_config(&config());
        let (provider, cfg) = registry.call_config_for_role("vision").unwrap();
        assert_eq!(provider.name(), "local");
        assert_eq!(cfg.model, "qwen-vl");
        assert!(!cfg.stream);
        assert_eq!(cfg.max_tokens, Some(3000));
    }

    #[test]
    fn missing_role_falls_back_to_active_provider() {
        let registry = ProviderRegistry::from_config(&config());
        let (_, cfg) = registry.call_config_for_role("decision").unwrap();
        assert_eq!(cfg.model, "autoglm-phone-9b");
        assert!(cfg.stream);
    }

    #[test]
    fn active_provider_must_be_registered() {
        let mut registry = ProviderRegistry::new("scripted".into());
        assert!(registry.get_active().is_err());
        registry.register(Arc::new(ScriptedProvider::new(Vec::new())));
        assert_eq!(registry.get_active().unwrap().name(), "scripted");
    }

    #[test]
    fn api_key_variable_name() {
        assert_eq!(api_key_var("zhipu-cn"), "AUTOGLM_ZHIPU_CN_API_KEY");
    }
}
