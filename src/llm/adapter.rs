use async_trait::async_trait;

use crate::errors::PilotResult;
use crate::grounding::resolver::GroundingMode;
use crate::session::Conversation;

/// What a provider's reply looks like before parsing.
///
/// Providers that expose the quiz function declaration may answer with a
/// structured call instead of text; the dispatcher maps that straight to a
/// `solve_quiz` operation without going through the text parser.
#[derive(Debug, Clone, PartialEq)]
pub enum RawReply {
    Text(String),
    QuizCall { question: String, choices: Vec<String> },
}

/// Per-provider behavior knobs, fixed at registry construction.
#[derive(Debug, Clone)]
pub struct AdapterCapabilities {
    pub grounding: GroundingMode,
    /// Re-invocations of the same adapter allowed after a malformed reply.
    /// 0 disables self-correction.
    pub self_correction_attempts: u32,
    pub quiz_tool: bool,
}

/// One vision model behind a common interface. Adapters own their wire
/// format and image conditioning; the conversation stays vendor-neutral.
#[async_trait]
pub trait VisionAdapter: Send + Sync {
    fn id(&self) -> &str;
    fn display_name(&self) -> &str;
    fn capabilities(&self) -> &AdapterCapabilities;
    async fn send(&self, conversation: &Conversation) -> PilotResult<RawReply>;
}

impl std::fmt::Debug for dyn VisionAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisionAdapter").field("id", &self.id()).finish()
    }
}
