use thiserror::Error;

/// Error taxonomy for a ScreenPilot session.
///
/// The retry controller only distinguishes transient from fatal kinds:
/// transient errors are retried with backoff, fatal ones abort the session
/// immediately. See [`PilotError::is_transient`].
#[derive(Debug, Error)]
pub enum PilotError {
    #[error("Provider not recognized: {0}")]
    UnrecognizedProvider(String),

    #[error("Upstream provider call failed: {0}")]
    Upstream(String),

    #[error("Invalid model response: {0}")]
    ResponseValidation(String),

    #[error("Execution of '{operation}' failed: {message}")]
    Execution { operation: String, message: String },

    #[error("Grounding failed: {0}")]
    Grounding(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Knowledge lookup error: {0}")]
    Knowledge(String),

    #[error("Iteration limit of {0} exceeded")]
    IterationLimit(u32),

    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("Session cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TOML deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

impl PilotError {
    /// Transient errors drive the retry/backoff path; everything else
    /// terminates the session on first occurrence.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PilotError::Upstream(_)
                | PilotError::ResponseValidation(_)
                | PilotError::Execution { .. }
                | PilotError::Grounding(_)
                | PilotError::Http(_)
                | PilotError::Io(_)
                | PilotError::Json(_)
        )
    }

    /// Wrap an actuation failure with the operation kind that triggered it.
    pub fn execution(operation: impl Into<String>, message: impl std::fmt::Display) -> Self {
        PilotError::Execution {
            operation: operation.into(),
            message: message.to_string(),
        }
    }
}

pub type PilotResult<T> = Result<T, PilotError>;
