//! Stored quiz answers behind a mockable lookup trait.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::config::KnowledgeConfig;
use crate::errors::{PilotError, PilotResult};

/// Sentinel returned when no stored answer matches the question.
pub const ANSWER_NOT_FOUND: &str = "Answer not found.";

#[async_trait]
pub trait KnowledgeLookup: Send + Sync {
    /// Returns the stored answer text, or [`ANSWER_NOT_FOUND`].
    async fn answer(&self, question: &str, choices: &[String]) -> PilotResult<String>;
}

/// Answers kept in a flat JSON object `{ "question": "answer", ... }`.
/// The file is re-read per lookup so it can be edited while a session runs.
pub struct JsonKnowledgeStore {
    path: PathBuf,
}

impl JsonKnowledgeStore {
    pub fn new(config: &KnowledgeConfig) -> Self {
        Self { path: PathBuf::from(&config.store_path) }
    }

    async fn load(&self) -> PilotResult<HashMap<String, String>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => {
                return Err(PilotError::Knowledge(format!(
                    "cannot read {}: {e}",
                    self.path.display()
                )))
            }
        };
        serde_json::from_str(&raw).map_err(|e| {
            PilotError::Knowledge(format!("malformed store {}: {e}", self.path.display()))
        })
    }
}

fn normalize(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

#[async_trait]
impl KnowledgeLookup for JsonKnowledgeStore {
    async fn answer(&self, question: &str, choices: &[String]) -> PilotResult<String> {
        let store = self.load().await?;
        let wanted = normalize(question);
        for (stored_question, answer) in &store {
            if normalize(stored_question) == wanted {
                if !choices.is_empty() && !choices.iter().any(|c| normalize(c) == normalize(answer))
                {
                    tracing::warn!(
                        question = %question,
                        answer = %answer,
                        "stored answer is not among the offered choices"
                    );
                }
                return Ok(answer.clone());
            }
        }
        tracing::debug!(question = %question, "no stored answer");
        Ok(ANSWER_NOT_FOUND.to_string())
    }
}
