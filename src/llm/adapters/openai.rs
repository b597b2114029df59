//! OpenAI-compatible chat-completions adapter. Also serves as the baseline
//! fallback target and the annotated-screenshot (labeled) variant; only the
//! capability descriptor differs between those registrations.

use async_trait::async_trait;

use crate::errors::{PilotError, PilotResult};
use crate::llm::adapter::{AdapterCapabilities, RawReply, VisionAdapter};
use crate::session::{Content, Conversation, Role};

pub struct OpenAiAdapter {
    id: String,
    display_name: String,
    api_base: String,
    api_key: String,
    model: String,
    temperature: f64,
    capabilities: AdapterCapabilities,
    client: reqwest::Client,
}

impl OpenAiAdapter {
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

    fn wire_messages(conversation: &Conversation) -> Vec<serde_json::Value> {
        conversation
            .messages()
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                let content = match &m.content {
                    Content::Text(t) => serde_json::json!(t),
                    Content::Multimodal { text, image_base64 } => serde_json::json!([
                        { "type": "text", "text": text },
                        {
                            "type": "image_url",
                            "image_url": {
                                "url": format!("data:image/png;base64,{image_base64}")
                            }
                        }
                    ]),
                };
                serde_json::json!({ "role": role, "content": content })
            })
            .collect()
    }
}

#[async_trait]
impl VisionAdapter for OpenAiAdapter {
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
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": Self::wire_messages(conversation),
        });

        tracing::debug!(
            provider = %self.id,
            model = %self.model,
            messages = conversation.len(),
            "sending chat-completions request"
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(PilotError::Upstream(format!("{status}: {err_body}")));
        }

        let json: serde_json::Value = response.json().await?;
        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();

        tracing::debug!(provider = %self.id, content_len = content.len(), "reply received");
        Ok(RawReply::Text(content))
    }
}
