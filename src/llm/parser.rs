//! Turns raw model text into a validated operation batch.

use std::sync::OnceLock;

use regex::Regex;

use crate::errors::{PilotError, PilotResult};
use crate::operations::Operation;

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Opening fence with optional language tag, or a closing fence.
    RE.get_or_init(|| Regex::new(r"```[a-zA-Z]*\n?|```").unwrap())
}

/// Strip markdown code fences the models like to wrap JSON in.
pub fn strip_fences(raw: &str) -> String {
    fence_re().replace_all(raw, "").trim().to_string()
}

/// Parse a reply into operations. Anything that is not a JSON array of
/// objects carrying a known `operation` discriminator is a validation
/// failure, which the caller treats as transient.
pub fn parse_operations(raw: &str) -> PilotResult<Vec<Operation>> {
    let cleaned = strip_fences(raw);
    serde_json::from_str::<Vec<Operation>>(&cleaned).map_err(|e| {
        PilotError::ResponseValidation(format!("unusable model reply: {e}"))
    })
}
