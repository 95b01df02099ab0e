//! Error types for the HR mail agent.
//!
//! One enum per collaborator domain. The taxonomy the run loop cares about:
//! transport failures are never retried in-process (the unlabeled message is
//! re-selected next poll), auth failures abort the iteration after a single
//! re-login attempt, config failures abort the process before the loop starts.

/// Configuration-related errors. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Mailbox gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Mailbox request failed: {0}")]
    Transport(String),

    #[error("Mailbox returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Invalid mailbox response: {0}")]
    InvalidResponse(String),

    #[error("Label mutation refused for message {message_id}")]
    LabelRefused { message_id: String },
}

/// Backend API errors.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Backend request failed: {0}")]
    Transport(String),

    #[error("Backend returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Invalid backend response: {0}")]
    InvalidResponse(String),

    #[error("Backend authentication failed: {0}")]
    Auth(String),
}

/// LLM provider errors. Classification degrades on these — they never
/// propagate out of the classifier.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    Transport(String),

    #[error("LLM returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Invalid LLM response: {0}")]
    InvalidResponse(String),
}

/// Template store errors (loading only — `fill` reports validation and
/// rendering problems through its own outcome type, not through this enum).
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-item pipeline errors. Caught at the item boundary by the orchestrator
/// and recorded on the outcome; they never abort the batch.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
}

impl PipelineError {
    /// Auth failures abort the whole iteration, not just the item.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Backend(BackendError::Auth(_)))
    }
}

/// Run-level errors that abort a single iteration of the loop. The loop
/// logs these and proceeds to the next iteration after sleeping.
#[derive(Debug, thiserror::Error)]
pub enum IterationError {
    #[error("Backend health check failed")]
    Unhealthy,

    #[error("Message fetch failed: {0}")]
    Fetch(#[from] MailboxError),
}

