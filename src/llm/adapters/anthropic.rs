//! Anthropic messages-API adapter. Screenshots are downscaled to JPEG to
//! stay under the vendor's request size cap.

use async_trait::async_trait;

use crate::errors::{PilotError, PilotResult};
use crate::llm::adapter::{AdapterCapabilities, RawReply, VisionAdapter};
use crate::llm::adapters::condition_image;
use crate::session::{Content, Conversation, Role};

const IMAGE_MAX_WIDTH: u32 = 2560;
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 2048;

pub struct AnthropicAdapter {
    id: String,
    display_name: String,
    api_base: String,
    api_key: String,
    model: String,
    temperature: f64,
    capabilities: AdapterCapabilities,
    client: reqwest::Client,
}

impl AnthropicAdapter {
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

    fn wire_messages(conversation: &Conversation) -> PilotResult<Vec<serde_json::Value>> {
        let mut messages = Vec::new();
        for m in conversation.messages() {
            let role = match m.role {
                Role::System => continue, // sent as the top-level system field
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            let content = match &m.content {
                Content::Text(t) => serde_json::json!(t),
                Content::Multimodal { text, image_base64 } => {
                    let data =
                        condition_image(image_base64, IMAGE_MAX_WIDTH, image::ImageFormat::Jpeg)?;
                    serde_json::json!([
                        {
                            "type": "image",
                            "source": {
                                "type": "base64",
                                "media_type": "image/jpeg",
                                "data": data
                            }
                        },
                        { "type": "text", "text": text }
                    ])
                }
            };
            messages.push(serde_json::json!({ "role": role, "content": content }));
        }
        Ok(messages)
    }
}

#[async_trait]
impl VisionAdapter for AnthropicAdapter {
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
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "temperature": self.temperature,
            "messages": Self::wire_messages(conversation)?,
        });
        if let Some(system) = conversation.system() {
            body["system"] = serde_json::json!(system.content.text());
        }

        tracing::debug!(
            provider = %self.id,
            model = %self.model,
            messages = conversation.len(),
            "sending messages request"
        );

        let response = self
            .client
            .post(format!("{}/messages", self.api_base))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(PilotError::Upstream(format!("{status}: {err_body}")));
        }

        let json: serde_json::Value = response.json().await?;
        let content = json["content"][0]["text"].as_str().unwrap_or("").to_string();

        tracing::debug!(provider = %self.id, content_len = content.len(), "reply received");
        Ok(RawReply::Text(content))
    }
}
