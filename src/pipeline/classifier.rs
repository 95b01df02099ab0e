//! Message classification — deterministic routing first, LLM fallback.
//!
//! The deterministic pass inspects only the recipient address and is
//! authoritative when it matches. The LLM fallback runs only for unrouted
//! mail and only when a model is configured; it is best-effort and can
//! never fail the message — transport errors and garbage output degrade
//! to `Other`.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::llm::{GenerateRequest, LlmClient};
use crate::mailbox::{display_name, parse_address};
use crate::pipeline::types::{
    ClassificationMethod, ClassificationResult, Confidence, ExtractedInfo, InboundMessage,
    MessageType,
};

/// Body preview included in the fallback prompt.
const BODY_PREVIEW_CHARS: usize = 500;

/// The fallback answers with a single category token.
const CLASSIFY_MAX_TOKENS: u32 = 32;

const CLASSIFY_TEMPERATURE: f32 = 0.1;

/// Recipient-address routing rules.
#[derive(Debug, Clone)]
pub struct RoutingRules {
    /// Plus-token routing to candidate applications, e.g. `+candidates@`.
    pub candidate_token: String,
    /// Plus-token routing to position announcements, e.g. `+positions@`.
    pub position_token: String,
}

impl RoutingRules {
    pub fn new(candidate_token: impl Into<String>, position_token: impl Into<String>) -> Self {
        Self {
            candidate_token: candidate_token.into(),
            position_token: position_token.into(),
        }
    }
}

impl Default for RoutingRules {
    fn default() -> Self {
        Self::new("+candidates@", "+positions@")
    }
}

/// Classifier — pure decision logic plus an optional LLM handle.
pub struct Classifier {
    rules: RoutingRules,
    llm: Option<Arc<dyn LlmClient>>,
}

impl Classifier {
    pub fn new(rules: RoutingRules, llm: Option<Arc<dyn LlmClient>>) -> Self {
        Self { rules, llm }
    }

    /// Classify a message. Total — always returns a result, whatever the
    /// fallback does.
    pub async fn classify(&self, message: &InboundMessage) -> ClassificationResult {
        let info = extract_info(message);

        let (message_type, detail) = self.classify_deterministic(&message.to);
        if message_type != MessageType::Other {
            debug!(id = %message.id, kind = message_type.label(), detail, "Routed deterministically");
            return ClassificationResult {
                message_type,
                method: ClassificationMethod::Deterministic,
                confidence: Confidence::High,
                detail: detail.to_string(),
                info,
            };
        }

        let Some(llm) = &self.llm else {
            return ClassificationResult {
                message_type: MessageType::Other,
                method: ClassificationMethod::Deterministic,
                confidence: Confidence::High,
                detail: detail.to_string(),
                info,
            };
        };

        match self.classify_with_llm(llm.as_ref(), message).await {
            Some(llm_type) => ClassificationResult {
                message_type: llm_type,
                method: ClassificationMethod::Llm,
                confidence: Confidence::Medium,
                detail: format!("llm ({})", llm.model()),
                info,
            },
            None => ClassificationResult {
                message_type: MessageType::Other,
                method: ClassificationMethod::Error,
                confidence: Confidence::Low,
                detail: "llm fallback degraded".to_string(),
                info,
            },
        }
    }

    /// Address-pattern routing. Case-insensitive, inspects only the
    /// recipient. `Other` here is provisional — the fallback may refine it.
    pub fn classify_deterministic(&self, to: &str) -> (MessageType, &'static str) {
        let address = parse_address(to);
        let candidate_token = self.rules.candidate_token.to_lowercase();
        let position_token = self.rules.position_token.to_lowercase();

        if address.contains(&candidate_token) || local_part(&address) == bare_token(&candidate_token)
        {
            return (MessageType::CandidateApplication, "candidate routing address");
        }
        if address.contains(&position_token) || local_part(&address) == bare_token(&position_token) {
            return (MessageType::PositionAnnouncement, "position routing address");
        }
        (MessageType::Other, "no routing pattern matched")
    }

    /// One bounded completion; `None` on any failure.
    async fn classify_with_llm(
        &self,
        llm: &dyn LlmClient,
        message: &InboundMessage,
    ) -> Option<MessageType> {
        let request = GenerateRequest {
            prompt: build_classification_prompt(message),
            system: None,
            max_tokens: CLASSIFY_MAX_TOKENS,
            temperature: CLASSIFY_TEMPERATURE,
        };

        let response = match llm.generate(request).await {
            Ok(r) => r,
            Err(e) => {
                warn!(id = %message.id, error = %e, "LLM classification failed, degrading to Other");
                return None;
            }
        };

        match parse_category(&response.text) {
            Some(kind) => {
                debug!(id = %message.id, kind = kind.label(), "LLM classified message");
                Some(kind)
            }
            None => {
                warn!(
                    id = %message.id,
                    raw = %response.text.chars().take(80).collect::<String>(),
                    "Unparseable LLM classification, degrading to Other"
                );
                None
            }
        }
    }
}

fn bare_token(token: &str) -> &str {
    token.trim_matches(|c| c == '+' || c == '@')
}

fn local_part(address: &str) -> &str {
    address.split('@').next().unwrap_or(address)
}

/// Metadata later steps and the notification text depend on. Populated for
/// every message, whichever branch decided the type.
fn extract_info(message: &InboundMessage) -> ExtractedInfo {
    ExtractedInfo {
        sender: message.from.clone(),
        subject: message.subject.clone(),
        recipient: message.to.clone(),
        received_at: message.received_at,
        attachment_count: message.attachments.len(),
        has_body: !message.body.trim().is_empty(),
    }
}

// ── Prompt construction and parsing ─────────────────────────────────

fn build_classification_prompt(message: &InboundMessage) -> String {
    let body_preview: String = message.body.chars().take(BODY_PREVIEW_CHARS).collect();

    format!(
        "You are an HR email classifier. Analyze this email and determine if it is:\n\
         1. CANDIDATE_APPLICATION - Person applying for a job, submitting a CV, expressing interest\n\
         2. POSITION_ANNOUNCEMENT - Job opening announcement, hiring manager requesting to post a role\n\
         3. OTHER - Any other email (general inquiry, spam, internal communication)\n\n\
         Email details:\n\
         Subject: {}\n\
         From: {}\n\
         Body preview: {}\n\n\
         Respond with ONLY one of: CANDIDATE_APPLICATION, POSITION_ANNOUNCEMENT, OTHER\n\
         If uncertain, respond with OTHER.",
        message.subject, message.from, body_preview
    )
}

/// Parse the single category token out of the model output. Tolerates
/// whitespace and surrounding prose; anything ambiguous is `None`.
fn parse_category(text: &str) -> Option<MessageType> {
    let upper = text.to_uppercase();
    if upper.contains("CANDIDATE_APPLICATION") {
        Some(MessageType::CandidateApplication)
    } else if upper.contains("POSITION_ANNOUNCEMENT") {
        Some(MessageType::PositionAnnouncement)
    } else if upper.contains("OTHER") {
        Some(MessageType::Other)
    } else {
        None
    }
}

// ── Notification formatting ─────────────────────────────────────────

/// Title and message body for the coordinator notification.
pub fn format_notification(result: &ClassificationResult) -> (String, String) {
    let info = &result.info;
    let subject = if info.subject.is_empty() {
        "(no subject)"
    } else {
        &info.subject
    };
    let method = result.method.label();

    match result.message_type {
        MessageType::CandidateApplication => {
            let name = display_name(&info.sender);
            let title = format!("New Candidate Application: {name}");
            let message = format!(
                "From: {}\nSubject: {}\n\n\
                 Classification: Candidate Application (via {})\n\
                 Attachments: {} file(s)\n\n\
                 Action Required: Review the application and decide next steps.",
                info.sender, subject, method, info.attachment_count
            );
            (title, message)
        }
        MessageType::PositionAnnouncement => {
            let title = format!("New Position Announcement: {}", clip(subject, 50));
            let message = format!(
                "From: {}\nSubject: {}\n\n\
                 Classification: Position Announcement (via {})\n\
                 Attachments: {} file(s)\n\n\
                 Action Required: Review the position details.",
                info.sender, subject, method, info.attachment_count
            );
            (title, message)
        }
        MessageType::Other => {
            let title = format!("Unclassified Email: {}", clip(subject, 30));
            let message = format!(
                "From: {}\nSubject: {}\n\n\
                 Classification: Other (via {})\n\n\
                 Action Required: Review manually to determine the appropriate action.",
                info.sender, subject, method
            );
            (title, message)
        }
    }
}

/// Char-safe truncation with an ellipsis marker.
fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let clipped: String = text.chars().take(max_chars).collect();
    format!("{clipped}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;

    use crate::error::LlmError;
    use crate::llm::{GenerateResponse, TokenUsage};
    use crate::pipeline::types::Attachment;

    fn make_message(to: &str) -> InboundMessage {
        InboundMessage {
            id: "msg-1".into(),
            thread_id: "thread-1".into(),
            from: "Jane Doe <jane@example.com>".into(),
            to: to.into(),
            subject: "Hello".into(),
            body: "Some body text".into(),
            received_at: Utc::now(),
            labels: vec![],
            attachments: vec![],
        }
    }

    struct FixedLlm {
        response: String,
    }

    #[async_trait]
    impl LlmClient for FixedLlm {
        fn model(&self) -> &str {
            "fixed-test-model"
        }
        async fn generate(&self, _req: GenerateRequest) -> Result<GenerateResponse, LlmError> {
            Ok(GenerateResponse {
                text: self.response.clone(),
                usage: TokenUsage::default(),
            })
        }
    }

    struct FailingLlm;

    #[async_trait]
    impl LlmClient for FailingLlm {
        fn model(&self) -> &str {
            "failing-test-model"
        }
        async fn generate(&self, _req: GenerateRequest) -> Result<GenerateResponse, LlmError> {
            Err(LlmError::Transport("connection refused".into()))
        }
    }

    fn classifier_without_llm() -> Classifier {
        Classifier::new(RoutingRules::default(), None)
    }

    // ── Deterministic routing ───────────────────────────────────────

    #[tokio::test]
    async fn candidate_address_routes_deterministically() {
        let c = classifier_without_llm();
        let result = c.classify(&make_message("jane+candidates@co.com")).await;
        assert_eq!(result.message_type, MessageType::CandidateApplication);
        assert_eq!(result.method, ClassificationMethod::Deterministic);
        assert_eq!(result.confidence, Confidence::High);
    }

    #[tokio::test]
    async fn position_address_routes_deterministically() {
        let c = classifier_without_llm();
        let result = c.classify(&make_message("ops+positions@co.com")).await;
        assert_eq!(result.message_type, MessageType::PositionAnnouncement);
        assert_eq!(result.method, ClassificationMethod::Deterministic);
        assert_eq!(result.confidence, Confidence::High);
    }

    #[tokio::test]
    async fn unrouted_address_without_model_stays_other() {
        let c = classifier_without_llm();
        let result = c.classify(&make_message("random@co.com")).await;
        assert_eq!(result.message_type, MessageType::Other);
        assert_eq!(result.method, ClassificationMethod::Deterministic);
    }

    #[test]
    fn routing_is_case_insensitive() {
        let c = classifier_without_llm();
        let (kind, _) = c.classify_deterministic("Jane+Candidates@Co.COM");
        assert_eq!(kind, MessageType::CandidateApplication);
    }

    #[test]
    fn bracketed_recipient_is_parsed_before_matching() {
        let c = classifier_without_llm();
        let (kind, _) = c.classify_deterministic("HR Team <hr+positions@co.com>");
        assert_eq!(kind, MessageType::PositionAnnouncement);
    }

    #[test]
    fn bare_routing_local_part_matches() {
        let c = classifier_without_llm();
        let (kind, _) = c.classify_deterministic("candidates@co.com");
        assert_eq!(kind, MessageType::CandidateApplication);
        let (kind, _) = c.classify_deterministic("positions@co.com");
        assert_eq!(kind, MessageType::PositionAnnouncement);
    }

    #[test]
    fn custom_tokens_are_honored() {
        let c = Classifier::new(RoutingRules::new("+applicants@", "+openings@"), None);
        let (kind, _) = c.classify_deterministic("hr+applicants@co.com");
        assert_eq!(kind, MessageType::CandidateApplication);
        let (kind, _) = c.classify_deterministic("hr+candidates@co.com");
        assert_eq!(kind, MessageType::Other);
    }

    // ── LLM fallback ────────────────────────────────────────────────

    #[tokio::test]
    async fn llm_fallback_refines_other() {
        let llm: Arc<dyn LlmClient> = Arc::new(FixedLlm {
            response: "CANDIDATE_APPLICATION".into(),
        });
        let c = Classifier::new(RoutingRules::default(), Some(llm));
        let result = c.classify(&make_message("hr@co.com")).await;
        assert_eq!(result.message_type, MessageType::CandidateApplication);
        assert_eq!(result.method, ClassificationMethod::Llm);
        assert_eq!(result.confidence, Confidence::Medium);
    }

    #[tokio::test]
    async fn llm_is_skipped_when_deterministic_matches() {
        // A model that would say OTHER must not override a routed address.
        let llm: Arc<dyn LlmClient> = Arc::new(FixedLlm {
            response: "OTHER".into(),
        });
        let c = Classifier::new(RoutingRules::default(), Some(llm));
        let result = c.classify(&make_message("jane+candidates@co.com")).await;
        assert_eq!(result.message_type, MessageType::CandidateApplication);
        assert_eq!(result.method, ClassificationMethod::Deterministic);
    }

    #[tokio::test]
    async fn llm_transport_failure_degrades() {
        let c = Classifier::new(RoutingRules::default(), Some(Arc::new(FailingLlm)));
        let result = c.classify(&make_message("hr@co.com")).await;
        assert_eq!(result.message_type, MessageType::Other);
        assert_eq!(result.method, ClassificationMethod::Error);
        assert_eq!(result.confidence, Confidence::Low);
    }

    #[tokio::test]
    async fn llm_garbage_output_degrades() {
        let llm: Arc<dyn LlmClient> = Arc::new(FixedLlm {
            response: "I think this might be about a job?".into(),
        });
        let c = Classifier::new(RoutingRules::default(), Some(llm));
        let result = c.classify(&make_message("hr@co.com")).await;
        assert_eq!(result.message_type, MessageType::Other);
        assert_eq!(result.method, ClassificationMethod::Error);
    }

    #[test]
    fn category_parsing_tolerates_prose() {
        assert_eq!(
            parse_category("The category is POSITION_ANNOUNCEMENT."),
            Some(MessageType::PositionAnnouncement)
        );
        assert_eq!(parse_category("  other\n"), Some(MessageType::Other));
        assert_eq!(parse_category("no idea"), None);
    }

    #[test]
    fn prompt_contains_details_and_truncates_body() {
        let mut msg = make_message("hr@co.com");
        msg.body = "x".repeat(2000);
        let prompt = build_classification_prompt(&msg);
        assert!(prompt.contains("Subject: Hello"));
        assert!(prompt.contains("jane@example.com"));
        assert!(prompt.len() < 1500);
    }

    // ── Extracted info ──────────────────────────────────────────────

    #[tokio::test]
    async fn extracted_info_always_populated() {
        let mut msg = make_message("hr@co.com");
        msg.attachments.push(Attachment {
            id: "att-1".into(),
            filename: "cv.pdf".into(),
            mime_type: "application/pdf".into(),
            size: 100,
        });
        msg.body = "  ".into();

        let c = classifier_without_llm();
        let result = c.classify(&msg).await;
        assert_eq!(result.info.attachment_count, 1);
        assert!(!result.info.has_body);
        assert_eq!(result.info.recipient, "hr@co.com");
        assert_eq!(result.info.sender, "Jane Doe <jane@example.com>");
    }

    // ── Notification formatting ─────────────────────────────────────

    #[tokio::test]
    async fn candidate_notification_format() {
        let c = classifier_without_llm();
        let mut msg = make_message("jane+candidates@co.com");
        msg.subject = "Application for Frontend Developer".into();
        let result = c.classify(&msg).await;

        let (title, message) = format_notification(&result);
        assert_eq!(title, "New Candidate Application: Jane Doe");
        assert!(message.contains("From: Jane Doe <jane@example.com>"));
        assert!(message.contains("via deterministic"));
        assert!(message.contains("Action Required"));
    }

    #[tokio::test]
    async fn position_notification_clips_long_subject() {
        let c = classifier_without_llm();
        let mut msg = make_message("hr+positions@co.com");
        msg.subject = "P".repeat(80);
        let result = c.classify(&msg).await;

        let (title, _) = format_notification(&result);
        assert!(title.starts_with("New Position Announcement: "));
        assert!(title.ends_with("..."));
        assert!(title.len() < 90);
    }

    #[tokio::test]
    async fn other_notification_handles_empty_subject() {
        let c = classifier_without_llm();
        let mut msg = make_message("hr@co.com");
        msg.subject = String::new();
        let result = c.classify(&msg).await;

        let (title, message) = format_notification(&result);
        assert_eq!(title, "Unclassified Email: (no subject)");
        assert!(message.contains("Review manually"));
    }
}
