use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Vendor-neutral message content. Each adapter serializes this into its own
/// wire shape at request time, so the conversation itself never has to be
/// rewritten when the dispatcher switches adapters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Content {
    Text(String),
    Multimodal { text: String, image_base64: String },
}

impl Content {
    pub fn text(&self) -> &str {
        match self {
            Content::Text(t) => t,
            Content::Multimodal { text, .. } => text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: Content,
}

/// Append/replace-only message buffer. Index 0 is always the system message;
/// replacing it is the only mutation of an existing entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<ConversationMessage>,
}

impl Conversation {
    pub fn with_system(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![ConversationMessage {
                role: Role::System,
                content: Content::Text(system_prompt.into()),
            }],
        }
    }

    pub fn push(&mut self, message: ConversationMessage) {
        self.messages.push(message);
    }

    pub fn push_user(&mut self, content: Content) {
        self.messages.push(ConversationMessage { role: Role::User, content });
    }

    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.messages.push(ConversationMessage {
            role: Role::Assistant,
            content: Content::Text(text.into()),
        });
    }

    /// Atomically replace the active system message (used for the fallback
    /// hop to the baseline adapter).
    pub fn replace_system(&mut self, system_prompt: impl Into<String>) {
        let message = ConversationMessage {
            role: Role::System,
            content: Content::Text(system_prompt.into()),
        };
        if self.messages.is_empty() {
            self.messages.push(message);
        } else {
            self.messages[0] = message;
        }
    }

    pub fn system(&self) -> Option<&ConversationMessage> {
        self.messages.first()
    }

    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    /// True until the first assistant turn has been recorded; the user prompt
    /// wording differs on the opening turn.
    pub fn is_first_turn(&self) -> bool {
        !self.messages.iter().any(|m| m.role == Role::Assistant)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Per-objective session state, exclusively owned by the loop controller.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    /// Opaque continuation token some vendors hand back; absent by default.
    pub provider_session: Option<String>,
    pub objective: String,
    pub loop_count: u32,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub conversation: Conversation,
}

impl Session {
    pub fn new(objective: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            provider_session: None,
            objective: objective.into(),
            loop_count: 0,
            started_at: chrono::Utc::now(),
            conversation: Conversation::with_system(system_prompt),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        duration_secs(chrono::Utc::now() - self.started_at)
    }
}

/// Microsecond-resolution seconds; millisecond truncation reads as zero for
/// short intervals.
pub fn duration_secs(d: chrono::Duration) -> f64 {
    d.num_microseconds().unwrap_or(i64::MAX) as f64 / 1_000_000.0
}
