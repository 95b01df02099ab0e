//! Agent configuration, read once from the environment at startup.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Hard upper bound on messages per iteration, enforced at the run-loop
/// boundary regardless of what the fetch call was asked for.
pub const HARD_MESSAGE_CAP: usize = 10;

/// Seed placeholder shipped in example env files — treated as unset.
const PASSWORD_PLACEHOLDER: &str = "<CHANGE_ME_IN_PRODUCTION>";

/// Settings for the optional LLM classification fallback.
///
/// When absent, deterministic routing is the only classifier and everything
/// unrouted stays `Other`.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub api_key: SecretString,
    pub model: String,
    pub api_url: String,
}

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Backend base URL.
    pub backend_url: String,
    /// Backend service account login.
    pub agent_email: String,
    pub agent_password: SecretString,
    /// Mail gateway base URL.
    pub mailbox_url: String,
    /// Bearer token for the mail gateway, if it requires one.
    pub mailbox_token: Option<String>,
    /// Sleep between polling iterations.
    pub poll_interval: Duration,
    /// Per-iteration batch size, clamped to [`HARD_MESSAGE_CAP`].
    pub max_messages_per_poll: usize,
    /// Total iteration bound — this agent is not meant to run forever.
    pub max_iterations: u32,
    /// Label selecting candidate messages.
    pub inbox_label: String,
    /// The durable processed marker.
    pub processed_label: String,
    /// Recipient token routing to candidate applications.
    pub candidate_token: String,
    /// Recipient token routing to position announcements.
    pub position_token: String,
    /// Whether to stage courtesy reply drafts.
    pub draft_replies: bool,
    /// Fallback department for positions created from mail.
    pub default_department: String,
    /// Optional directory of template overrides.
    pub template_dir: Option<PathBuf>,
    /// LLM fallback, enabled by setting `LLM_API_KEY`.
    pub llm: Option<LlmSettings>,
}

impl AgentConfig {
    /// Read configuration from the environment.
    ///
    /// Only `AGENT_PASSWORD` and `MAILBOX_URL` are required; everything else
    /// has a default. A password left at the seed placeholder counts as
    /// missing.
    pub fn from_env() -> Result<Self, ConfigError> {
        let agent_password = match std::env::var("AGENT_PASSWORD") {
            Ok(p) if !p.is_empty() && p != PASSWORD_PLACEHOLDER => SecretString::from(p),
            _ => return Err(ConfigError::MissingEnvVar("AGENT_PASSWORD".into())),
        };

        let mailbox_url = std::env::var("MAILBOX_URL")
            .map_err(|_| ConfigError::MissingEnvVar("MAILBOX_URL".into()))?;

        let poll_interval_secs: u64 = env_parsed("POLL_INTERVAL_SECONDS", 60);

        let max_messages_per_poll: usize =
            env_parsed("MAX_MESSAGES_PER_POLL", 5).min(HARD_MESSAGE_CAP);

        let max_iterations: u32 = env_parsed("MAX_ITERATIONS", 8);

        let draft_replies = match std::env::var("DRAFT_REPLIES") {
            Ok(v) => match v.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                other => {
                    return Err(ConfigError::InvalidValue {
                        key: "DRAFT_REPLIES".into(),
                        message: format!("expected a boolean, got '{other}'"),
                    });
                }
            },
            Err(_) => true,
        };

        let llm = std::env::var("LLM_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .map(|key| LlmSettings {
                api_key: SecretString::from(key),
                model: std::env::var("LLM_MODEL")
                    .unwrap_or_else(|_| "claude-3-5-haiku-latest".to_string()),
                api_url: std::env::var("LLM_API_URL")
                    .unwrap_or_else(|_| "https://api.anthropic.com/v1/messages".to_string()),
            });

        Ok(Self {
            backend_url: std::env::var("BACKEND_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            agent_email: std::env::var("AGENT_EMAIL")
                .unwrap_or_else(|_| "agent@example.com".to_string()),
            agent_password,
            mailbox_url,
            mailbox_token: std::env::var("MAILBOX_TOKEN").ok().filter(|t| !t.is_empty()),
            poll_interval: Duration::from_secs(poll_interval_secs),
            max_messages_per_poll,
            max_iterations,
            inbox_label: std::env::var("INBOX_LABEL")
                .unwrap_or_else(|_| "hr-agent/inbox".to_string()),
            processed_label: std::env::var("PROCESSED_LABEL")
                .unwrap_or_else(|_| "hr-agent/processed".to_string()),
            candidate_token: std::env::var("CANDIDATE_TOKEN")
                .unwrap_or_else(|_| "+candidates@".to_string()),
            position_token: std::env::var("POSITION_TOKEN")
                .unwrap_or_else(|_| "+positions@".to_string()),
            draft_replies,
            default_department: std::env::var("DEFAULT_DEPARTMENT")
                .unwrap_or_else(|_| "Engineering".to_string()),
            template_dir: std::env::var("TEMPLATE_DIR").ok().map(PathBuf::from),
            llm,
        })
    }
}

/// Parse an env var, falling back to `default` when unset or unparseable.
fn env_parsed<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
