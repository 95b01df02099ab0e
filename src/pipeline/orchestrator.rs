//! Pipeline orchestrator — drives one message through the ordered steps.
//!
//! classify → conditional ingest → conditional draft → notify → commit.
//! No step begins until the previous one completed. Classification cannot
//! fail the item; ingest and notify failures abort it (skipping everything
//! later, leaving the message unlabeled for the next poll); a draft failure
//! is logged and skipped. The processed label is applied strictly after
//! notification succeeds and is never retracted.
//!
//! Retries are driven purely by the absence of the label: a failure between
//! a successful notify and the label commit means the next poll repeats the
//! whole item, duplicating the notification (and, for candidates, the
//! document upload — uploads carry no dedup key). A message is never
//! silently dropped.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::backend::{Backend, NotificationRequest};
use crate::error::PipelineError;
use crate::mailbox::{DraftRequest, Mailbox, display_name, parse_address};
use crate::pipeline::classifier::{Classifier, format_notification};
use crate::pipeline::types::{
    InboundMessage, MessageType, PipelineOutcome, Stage, StageFailure,
};
use crate::templates::{FieldValues, FillOutcome, TemplateStore};

/// Notification type string understood by the backend.
const NOTIFICATION_KIND: &str = "email_processed";

/// Subject prefixes stripped when deriving a position title.
const TITLE_PREFIXES: [&str; 5] = [
    "New Position:",
    "Job Opening:",
    "Position:",
    "Role:",
    "Hiring:",
];

/// Position titles are clamped to this many characters.
const POSITION_TITLE_MAX: usize = 200;

/// Orchestrator behavior knobs, fixed at construction.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Stage courtesy reply drafts for routed messages.
    pub draft_replies: bool,
    /// Department assigned to positions created from mail.
    pub default_department: String,
    /// The durable processed marker.
    pub processed_label: String,
}

/// The per-message state machine. Collaborators are explicit handles,
/// constructed once at startup and shared with the run loop.
pub struct Orchestrator {
    mailbox: Arc<dyn Mailbox>,
    backend: Arc<dyn Backend>,
    templates: Arc<TemplateStore>,
    classifier: Classifier,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        mailbox: Arc<dyn Mailbox>,
        backend: Arc<dyn Backend>,
        templates: Arc<TemplateStore>,
        classifier: Classifier,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            mailbox,
            backend,
            templates,
            classifier,
            settings,
        }
    }

    /// Run one message through the full pipeline. Never errors — every
    /// failure is caught at the item boundary and recorded on the outcome,
    /// so one bad message cannot affect its batch siblings.
    pub async fn process(&self, message: &InboundMessage) -> PipelineOutcome {
        info!(
            id = %message.id,
            from = %message.from,
            subject = %message.subject,
            "Processing message"
        );

        // Classify — total, degrades to Other rather than failing.
        let classification = self.classifier.classify(message).await;
        debug!(
            id = %message.id,
            kind = classification.message_type.label(),
            method = classification.method.label(),
            "Classified"
        );
        let mut outcome = PipelineOutcome::new(&message.id, classification);

        // Conditional ingest — fatal on failure.
        if let Err(e) = self.ingest(message, &mut outcome).await {
            error!(id = %message.id, stage = Stage::Ingest.label(), error = %e, "Aborting item");
            outcome.failure = Some(StageFailure {
                stage: Stage::Ingest,
                error: e,
            });
            return outcome;
        }

        // Conditional draft — a missing courtesy reply never fails the item.
        if self.settings.draft_replies {
            self.draft(message, &mut outcome).await;
        }

        // Notify — must succeed for the run to count.
        let notification = self.build_notification(message, &outcome);
        match self.backend.create_notification(&notification).await {
            Ok(id) => {
                debug!(id = %message.id, notification_id = %id, "Notification created");
                outcome.notification_id = Some(id);
            }
            Err(e) => {
                error!(id = %message.id, stage = Stage::Notify.label(), error = %e, "Aborting item");
                outcome.failure = Some(StageFailure {
                    stage: Stage::Notify,
                    error: e.into(),
                });
                return outcome;
            }
        }

        // Commit — the single durable checkpoint.
        match self
            .mailbox
            .add_label(&message.id, &self.settings.processed_label)
            .await
        {
            Ok(true) => {
                info!(id = %message.id, "Processed marker applied");
            }
            Ok(false) => {
                error!(id = %message.id, "Gateway refused processed marker; item will retry");
                outcome.failure = Some(StageFailure {
                    stage: Stage::Commit,
                    error: crate::error::MailboxError::LabelRefused {
                        message_id: message.id.clone(),
                    }
                    .into(),
                });
            }
            Err(e) => {
                error!(id = %message.id, error = %e, "Failed to apply processed marker; item will retry");
                outcome.failure = Some(StageFailure {
                    stage: Stage::Commit,
                    error: e.into(),
                });
            }
        }

        outcome
    }

    /// Type-conditional ingestion.
    ///
    /// Candidate applications ingest exactly the first attachment, however
    /// many arrived; a message without attachments skips the step. Position
    /// announcements create a position record from subject and body.
    async fn ingest(
        &self,
        message: &InboundMessage,
        outcome: &mut PipelineOutcome,
    ) -> Result<(), PipelineError> {
        match outcome.classification.message_type {
            MessageType::CandidateApplication => {
                let Some(attachment) = message.attachments.first() else {
                    warn!(id = %message.id, "Candidate application without attachment; ingest skipped");
                    return Ok(());
                };
                if message.attachments.len() > 1 {
                    debug!(
                        id = %message.id,
                        ignored = message.attachments.len() - 1,
                        "Only the first attachment is ingested"
                    );
                }

                let content = self
                    .mailbox
                    .download_attachment(&message.id, &attachment.id)
                    .await?;

                let email = parse_address(&message.from);
                let name = display_name(&message.from);
                let candidate = self.backend.create_or_get_candidate(&email, &name).await?;

                let document_id = self
                    .backend
                    .upload_document(&candidate.id, content, &attachment.filename)
                    .await?;

                info!(
                    id = %message.id,
                    candidate_id = %candidate.id,
                    document_id = %document_id,
                    "Candidate ingested"
                );
                outcome.candidate_id = Some(candidate.id);
                outcome.document_id = Some(document_id);
                Ok(())
            }
            MessageType::PositionAnnouncement => {
                let title = derive_position_title(&message.subject);
                let body = message.body.trim();
                let description = if body.is_empty() {
                    message.subject.as_str()
                } else {
                    body
                };

                let position = self
                    .backend
                    .create_position(&title, &self.settings.default_department, description)
                    .await?;

                info!(id = %message.id, position_id = %position.id, title = %title, "Position created");
                outcome.position_id = Some(position.id);
                Ok(())
            }
            MessageType::Other => Ok(()),
        }
    }

    /// Stage a reply draft for routed messages. Best-effort: template or
    /// gateway failures are logged as warnings and the pipeline continues.
    async fn draft(&self, message: &InboundMessage, outcome: &mut PipelineOutcome) {
        let (template_id, fields) = match outcome.classification.message_type {
            MessageType::CandidateApplication => {
                let mut fields = FieldValues::new();
                fields.insert("candidate_name".into(), display_name(&message.from));
                ("candidate_welcome", fields)
            }
            MessageType::PositionAnnouncement => {
                let mut fields = FieldValues::new();
                fields.insert("position_title".into(), derive_position_title(&message.subject));
                fields.insert("department".into(), self.settings.default_department.clone());
                fields.insert("candidate_match_info".into(), String::new());
                ("position_acknowledgment", fields)
            }
            // No reply template for unclassified mail.
            MessageType::Other => return,
        };

        let rendered = match self.templates.fill(template_id, &fields) {
            FillOutcome::Rendered(rendered) => rendered,
            failed => {
                warn!(
                    id = %message.id,
                    template = template_id,
                    code = failed.error_code().unwrap_or("UNKNOWN"),
                    "Draft template failed; continuing without draft"
                );
                return;
            }
        };

        let request = DraftRequest {
            in_reply_to: message.id.clone(),
            to: parse_address(&message.from),
            subject: rendered.subject,
            body: rendered.body,
        };
        match self.mailbox.create_draft(&request).await {
            Ok(draft_id) => {
                info!(id = %message.id, draft_id = %draft_id, "Reply draft staged");
                outcome.draft_id = Some(draft_id);
            }
            Err(e) => {
                warn!(id = %message.id, error = %e, "Draft creation failed; continuing without draft");
            }
        }
    }

    /// Bundle the classification and any produced ids into the coordinator
    /// notification.
    fn build_notification(
        &self,
        message: &InboundMessage,
        outcome: &PipelineOutcome,
    ) -> NotificationRequest {
        let (title, mut body) = format_notification(&outcome.classification);

        if let Some(candidate_id) = &outcome.candidate_id {
            body.push_str(&format!("\n\nCandidate ID: {candidate_id}"));
        }
        if let Some(position_id) = &outcome.position_id {
            body.push_str(&format!(
                "\n\nPosition ID: {position_id}\nTitle: {}",
                derive_position_title(&message.subject)
            ));
        }
        if outcome.draft_id.is_some() {
            body.push_str("\nDraft reply created - check the drafts folder");
        }

        NotificationRequest {
            kind: NOTIFICATION_KIND.into(),
            title,
            message: body,
            metadata: json!({
                "emailId": message.id,
                "type": outcome.classification.message_type.label(),
                "method": outcome.classification.method.label(),
                "attachmentCount": outcome.classification.info.attachment_count,
                "candidateId": outcome.candidate_id,
                "positionId": outcome.position_id,
                "draftId": outcome.draft_id,
            }),
        }
    }
}

/// Derive a position title from a subject: strip the first matching known
/// prefix, then clamp.
pub fn derive_position_title(subject: &str) -> String {
    let mut title = subject.trim();
    for prefix in TITLE_PREFIXES {
        if let Some(head) = title.get(..prefix.len())
            && head.eq_ignore_ascii_case(prefix)
        {
            title = title[prefix.len()..].trim_start();
            break;
        }
    }
    title.chars().take(POSITION_TITLE_MAX).collect()
}
