use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{PilotError, PilotResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub llm: LlmConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    /// Provider used for the single fallback hop when another adapter fails.
    pub baseline_provider: String,
    pub providers: HashMap<String, ProviderEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub display_name: String,
    pub api_base: String,
    /// Model name sent to the API.
    pub model: String,
    /// Wire format: "openai" | "gemini" | "anthropic".
    pub adapter: String,
    /// How symbolic targets are grounded: "coordinates" | "ocr" | "labels".
    #[serde(default = "default_grounding")]
    pub grounding: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Retries against the same adapter when its reply omits the
    /// operation discriminator (0 disables self-correction).
    #[serde(default)]
    pub self_correction_attempts: u32,
    /// Expose the solve_quiz function declaration to this provider.
    #[serde(default)]
    pub quiz_tool: bool,
    /// Optional API key stored in config.toml
    /// (falls back to env var SCREENPILOT_<ID>_API_KEY).
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_grounding() -> String {
    "coordinates".into()
}

fn default_temperature() -> f64 {
    0.1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_secs: f64,
}

fn default_max_iterations() -> u32 {
    50
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff() -> f64 {
    1.0
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_retries: default_max_retries(),
            initial_backoff_secs: default_initial_backoff(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    /// OCR sidecar endpoint accepting a base64 image and returning
    /// detected text boxes.
    pub endpoint: String,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8701/readtext".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub model_path: String,
    #[serde(default = "default_conf_threshold")]
    pub conf_threshold: f32,
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,
}

fn default_conf_threshold() -> f32 {
    0.35
}

fn default_iou_threshold() -> f32 {
    0.45
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: "models/ui-elements.onnx".into(),
            conf_threshold: default_conf_threshold(),
            iou_threshold: default_iou_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    /// JSON file mapping quiz questions to their correct answers.
    pub store_path: String,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            store_path: "knowledge/answers.json".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    /// Step log directory. Empty means the platform data dir.
    #[serde(default)]
    pub log_dir: String,
}

fn resolve_config_path() -> PilotResult<PathBuf> {
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

    Err(PilotError::Config(
        "config.toml not found next to executable or in working directory".into(),
    ))
}

pub fn load_config() -> PilotResult<AppConfig> {
    let path = resolve_config_path()?;
    let content = std::fs::read_to_string(&path)?;
    let config: AppConfig = toml::from_str(&content)?;
    tracing::info!(
        path = %path.display(),
        baseline = %config.llm.baseline_provider,
        providers = config.llm.providers.len(),
        "config loaded"
    );
    Ok(config)
}

/// API key for a provider id: env var first, then the config entry.
pub fn api_key_for(id: &str, entry: &ProviderEntry) -> String {
    std::env::var(format!("SCREENPILOT_{}_API_KEY", id.to_uppercase().replace('-', "_")))
        .unwrap_or_else(|_| entry.api_key.clone().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let toml_src = r#"
            [llm]
            baseline_provider = "gpt-4o"

            [llm.providers.gpt-4o]
            display_name = "GPT-4o"
            api_base = "https://api.openai.com/v1"
            model = "gpt-4o"
            adapter = "openai"

            [llm.providers.gemini-flash-ocr]
            display_name = "Gemini Flash + OCR"
            api_base = "https://generativelanguage.googleapis.com/v1beta"
            model = "gemini-2.5-flash"
            adapter = "gemini"
            grounding = "ocr"
            self_correction_attempts = 3
            quiz_tool = true
        "#;
        let cfg: AppConfig = toml::from_str(toml_src).unwrap();
        assert_eq!(cfg.llm.baseline_provider, "gpt-4o");
        assert_eq!(cfg.agent.max_iterations, 50);
        assert_eq!(cfg.agent.max_retries, 3);

        let gemini = &cfg.llm.providers["gemini-flash-ocr"];
        assert_eq!(gemini.grounding, "ocr");
        assert_eq!(gemini.self_correction_attempts, 3);
        assert!(gemini.quiz_tool);

        let baseline = &cfg.llm.providers["gpt-4o"];
        assert_eq!(baseline.grounding, "coordinates");
        assert_eq!(baseline.self_correction_attempts, 0);
    }
}
