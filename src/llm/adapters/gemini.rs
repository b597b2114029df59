//! Gemini generateContent adapter.
//!
//! Gemini is the one provider that may answer with a structured function
//! call (`solve_quiz`) instead of text, and the one whose replies most often
//! need the self-correction retry, so both knobs are usually enabled for it
//! in config.

use async_trait::async_trait;

use crate::errors::{PilotError, PilotResult};
use crate::llm::adapter::{AdapterCapabilities, RawReply, VisionAdapter};
use crate::llm::adapters::condition_image;
use crate::session::{Content, Conversation, Role};

const IMAGE_MAX_WIDTH: u32 = 1024;

pub struct GeminiAdapter {
    id: String,
    display_name: String,
    api_base: String,
    api_key: String,
    model: String,
    temperature: f64,
    capabilities: AdapterCapabilities,
    client: reqwest::Client,
}

impl GeminiAdapter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        display_name: String,
        api_base: String,
        api_key: String,
        model: String,
        temperature: f64,
        capabilities: AdapterCapabilities,
    ) -> Self {
        Self {
            id,
            display_name,
            api_base,
            api_key,
            model,
            temperature,
            capabilities,
            client: reqwest::Client::new(),
        }
    }

    fn quiz_tool_declaration() -> serde_json::Value {
        serde_json::json!({
            "function_declarations": [{
                "name": "solve_quiz",
                "description": "Answer an on-screen quiz question",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "question": { "type": "string" },
                        "choices": { "type": "array", "items": { "type": "string" } }
                    },
                    "required": ["question", "choices"]
                }
            }]
        })
    }

    fn wire_contents(conversation: &Conversation) -> PilotResult<Vec<serde_json::Value>> {
        let mut contents = Vec::new();
        for m in conversation.messages() {
            let role = match m.role {
                Role::System => continue, // carried in system_instruction
                Role::User => "user",
                Role::Assistant => "model",
            };
            let parts = match &m.content {
                Content::Text(t) => serde_json::json!([{ "text": t }]),
                Content::Multimodal { text, image_base64 } => {
                    let data = condition_image(image_base64, IMAGE_MAX_WIDTH, image::ImageFormat::Png)?;
                    serde_json::json!([
                        { "text": text },
                        { "inline_data": { "mime_type": "image/png", "data": data } }
                    ])
                }
            };
            contents.push(serde_json::json!({ "role": role, "parts": parts }));
        }
        Ok(contents)
    }
}

#[async_trait]
impl VisionAdapter for GeminiAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn capabilities(&self) -> &AdapterCapabilities {
        &self.capabilities
    }

    async fn send(&self, conversation: &Conversation) -> PilotResult<RawReply> {
        let mut body = serde_json::json!({
            "contents": Self::wire_contents(conversation)?,
            "generationConfig": { "temperature": self.temperature },
        });
        if let Some(system) = conversation.system() {
            body["system_instruction"] =
                serde_json::json!({ "parts": [{ "text": system.content.text() }] });
        }
        if self.capabilities.quiz_tool {
            body["tools"] = serde_json::json!([Self::quiz_tool_declaration()]);
        }

        tracing::debug!(
            provider = %self.id,
            model = %self.model,
            messages = conversation.len(),
            "sending generateContent request"
        );

        let response = self
            .client
            .post(format!(
                "{}/models/{}:generateContent?key={}",
                self.api_base, self.model, self.api_key
            ))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(PilotError::Upstream(format!("{status}: {err_body}")));
        }

        let json: serde_json::Value = response.json().await?;
        let part = &json["candidates"][0]["content"]["parts"][0];

        if part["functionCall"]["name"].as_str() == Some("solve_quiz") {
            let args = &part["functionCall"]["args"];
            let question = args["question"].as_str().unwrap_or("").to_string();
            let choices = args["choices"]
                .as_array()
                .map(|arr| {
                    arr.iter()
                        .filter_map(|c| c.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();
            tracing::debug!(provider = %self.id, question = %question, "quiz call received");
            return Ok(RawReply::QuizCall { question, choices });
        }

        let content = part["text"].as_str().unwrap_or("").to_string();
        tracing::debug!(provider = %self.id, content_len = content.len(), "reply received");
        Ok(RawReply::Text(content))
    }
}
