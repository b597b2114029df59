use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{api_key_for, LlmConfig, ProviderEntry};
use crate::errors::{PilotError, PilotResult};
use crate::grounding::resolver::GroundingMode;
use crate::llm::adapter::{AdapterCapabilities, VisionAdapter};
use crate::llm::adapters::anthropic::AnthropicAdapter;
use crate::llm::adapters::gemini::GeminiAdapter;
use crate::llm::adapters::openai::OpenAiAdapter;

/// Provider id → adapter table, built once from config at startup.
#[derive(Debug)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn VisionAdapter>>,
    baseline_id: String,
}

impl AdapterRegistry {
    pub fn from_config(config: &LlmConfig) -> PilotResult<Self> {
        let mut adapters: HashMap<String, Arc<dyn VisionAdapter>> = HashMap::new();
        for (id, entry) in &config.providers {
            adapters.insert(id.clone(), build_adapter(id, entry)?);
        }
        if !adapters.contains_key(&config.baseline_provider) {
            return Err(PilotError::Config(format!(
                "baseline provider '{}' is not configured",
                config.baseline_provider
            )));
        }
        tracing::info!(
            providers = adapters.len(),
            baseline = %config.baseline_provider,
            "adapter registry ready"
        );
        Ok(Self {
            adapters,
            baseline_id: config.baseline_provider.clone(),
        })
    }

    #[cfg(test)]
    pub(crate) fn from_parts(
        adapters: HashMap<String, Arc<dyn VisionAdapter>>,
        baseline_id: String,
    ) -> Self {
        Self { adapters, baseline_id }
    }

    /// Unknown ids are fatal; the session must fail before any screenshot or
    /// network activity happens.
    pub fn get(&self, id: &str) -> PilotResult<Arc<dyn VisionAdapter>> {
        self.adapters
            .get(id)
            .cloned()
            .ok_or_else(|| PilotError::UnrecognizedProvider(id.to_string()))
    }

    pub fn baseline(&self) -> Arc<dyn VisionAdapter> {
        // Presence is checked in from_config.
        self.adapters[&self.baseline_id].clone()
    }

    pub fn baseline_id(&self) -> &str {
        &self.baseline_id
    }
}

fn build_adapter(id: &str, entry: &ProviderEntry) -> PilotResult<Arc<dyn VisionAdapter>> {
    let capabilities = AdapterCapabilities {
        grounding: GroundingMode::from_config(&entry.grounding)?,
        self_correction_attempts: entry.self_correction_attempts,
        quiz_tool: entry.quiz_tool,
    };
    let api_key = api_key_for(id, entry);

    let adapter: Arc<dyn VisionAdapter> = match entry.adapter.as_str() {
        "openai" => Arc::new(OpenAiAdapter::new(
            id.to_string(),
            entry.display_name.clone(),
            entry.api_base.clone(),
            api_key,
            entry.model.clone(),
            entry.temperature,
            capabilities,
        )),
        "gemini" => Arc::new(GeminiAdapter::new(
            id.to_string(),
            entry.display_name.clone(),
            entry.api_base.clone(),
            api_key,
            entry.model.clone(),
            entry.temperature,
            capabilities,
        )),
        "anthropic" => Arc::new(AnthropicAdapter::new(
            id.to_string(),
            entry.display_name.clone(),
            entry.api_base.clone(),
            api_key,
            entry.model.clone(),
            entry.temperature,
            capabilities,
        )),
        other => {
            return Err(PilotError::Config(format!(
                "provider '{id}' has unknown adapter kind '{other}'"
            )))
        }
    };
    Ok(adapter)
}
