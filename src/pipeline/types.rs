//! Shared types for the message processing pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

// ── Inbound message ─────────────────────────────────────────────────

/// Attachment identity and metadata. Content bytes are fetched lazily,
/// and only ever for the first attachment of a message that needs ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    pub filename: String,
    pub mime_type: String,
    #[serde(default)]
    pub size: u64,
}

/// A message as returned by the mail gateway. Transient — fetched fresh each
/// poll, never persisted by the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub id: String,
    #[serde(default)]
    pub thread_id: String,
    /// Sender header, possibly in `Name <addr>` form.
    pub from: String,
    /// Recipient address the message was routed to.
    pub to: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

// ── Classification ──────────────────────────────────────────────────

/// Message intent, decided once per message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    CandidateApplication,
    PositionAnnouncement,
    Other,
}

impl MessageType {
    /// Short label for logs and notification metadata.
    pub fn label(&self) -> &'static str {
        match self {
            Self::CandidateApplication => "candidate_application",
            Self::PositionAnnouncement => "position_announcement",
            Self::Other => "other",
        }
    }
}

/// Which branch produced the classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationMethod {
    /// Recipient address pattern matched — authoritative.
    Deterministic,
    /// LLM fallback produced a clean category.
    Llm,
    /// LLM fallback failed or returned garbage; degraded to `Other`.
    Error,
}

impl ClassificationMethod {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Deterministic => "deterministic",
            Self::Llm => "llm",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// Metadata lifted from the message during classification. Always populated,
/// whichever branch decided the type — notification text depends on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedInfo {
    pub sender: String,
    pub subject: String,
    pub recipient: String,
    pub received_at: DateTime<Utc>,
    pub attachment_count: usize,
    pub has_body: bool,
}

/// Result of classifying one message.
#[derive(Debug, Clone)]
pub struct ClassificationResult {
    pub message_type: MessageType,
    pub method: ClassificationMethod,
    pub confidence: Confidence,
    /// Human-readable note on which rule or fallback decided.
    pub detail: String,
    pub info: ExtractedInfo,
}

// ── Pipeline outcome ────────────────────────────────────────────────

/// Ordered pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Classify,
    Ingest,
    Draft,
    Notify,
    Commit,
}

impl Stage {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Classify => "classify",
            Self::Ingest => "ingest",
            Self::Draft => "draft",
            Self::Notify => "notify",
            Self::Commit => "commit",
        }
    }
}

/// The stage a message failed at, and why.
#[derive(Debug)]
pub struct StageFailure {
    pub stage: Stage,
    pub error: PipelineError,
}

/// Per-message outcome, built incrementally as stages run. Discarded after
/// the run — only the side effects it triggered persist, plus the processed
/// label when every required stage succeeded.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub message_id: String,
    pub classification: ClassificationResult,
    pub candidate_id: Option<String>,
    pub document_id: Option<String>,
    pub position_id: Option<String>,
    pub draft_id: Option<String>,
    pub notification_id: Option<String>,
    pub failure: Option<StageFailure>,
}

impl PipelineOutcome {
    pub fn new(message_id: impl Into<String>, classification: ClassificationResult) -> Self {
        Self {
            message_id: message_id.into(),
            classification,
            candidate_id: None,
            document_id: None,
            position_id: None,
            draft_id: None,
            notification_id: None,
            failure: None,
        }
    }

    /// True when every required stage completed and the marker was applied.
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}
