//! Mailbox collaborator — pure I/O against the mail gateway, no business
//! logic.
//!
//! The pipeline only ever needs four operations: query by label filter,
//! apply a label (the durable processed marker), download one attachment,
//! and stage a threaded reply draft. Drafts are never sent from here —
//! a human reviews and sends them from the mail client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::MailboxError;
use crate::pipeline::types::InboundMessage;

/// Timeout for metadata calls (query, label, draft).
const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for attachment downloads.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// A reply draft to stage, threaded onto the original message.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftRequest {
    pub in_reply_to: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Mailbox operations the pipeline depends on.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Fetch messages matching a label filter, newest first, bounded by
    /// `max_results`. The caller re-checks the bound — gateways have been
    /// seen to ignore it.
    async fn query(
        &self,
        filter: &str,
        max_results: usize,
    ) -> Result<Vec<InboundMessage>, MailboxError>;

    /// Apply a label to a message. `Ok(false)` means the gateway refused
    /// the mutation without a transport failure.
    async fn add_label(&self, message_id: &str, label: &str) -> Result<bool, MailboxError>;

    /// Download one attachment's content bytes.
    async fn download_attachment(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<Vec<u8>, MailboxError>;

    /// Stage an unsent reply draft. Returns the draft id.
    async fn create_draft(&self, draft: &DraftRequest) -> Result<String, MailboxError>;
}

// ── HTTP implementation ─────────────────────────────────────────────

/// REST client for the mail gateway.
pub struct HttpMailbox {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    messages: Vec<InboundMessage>,
}

#[derive(Deserialize)]
struct LabelResponse {
    ok: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DraftResponse {
    draft_id: String,
}

impl HttpMailbox {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            client: reqwest::Client::new(),
        }
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, MailboxError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(MailboxError::Api {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl Mailbox for HttpMailbox {
    async fn query(
        &self,
        filter: &str,
        max_results: usize,
    ) -> Result<Vec<InboundMessage>, MailboxError> {
        debug!(filter, max_results, "Querying mailbox");
        let max = max_results.to_string();
        let resp = self
            .request(self.client.get(format!("{}/messages", self.base_url)))
            .query(&[("query", filter), ("maxResults", max.as_str())])
            .timeout(METADATA_TIMEOUT)
            .send()
            .await
            .map_err(|e| MailboxError::Transport(e.to_string()))?;

        let parsed: QueryResponse = Self::check(resp)
            .await?
            .json()
            .await
            .map_err(|e| MailboxError::InvalidResponse(e.to_string()))?;
        Ok(parsed.messages)
    }

    async fn add_label(&self, message_id: &str, label: &str) -> Result<bool, MailboxError> {
        let resp = self
            .request(
                self.client
                    .post(format!("{}/messages/{}/labels", self.base_url, message_id)),
            )
            .json(&serde_json::json!({ "label": label }))
            .timeout(METADATA_TIMEOUT)
            .send()
            .await
            .map_err(|e| MailboxError::Transport(e.to_string()))?;

        let parsed: LabelResponse = Self::check(resp)
            .await?
            .json()
            .await
            .map_err(|e| MailboxError::InvalidResponse(e.to_string()))?;
        Ok(parsed.ok)
    }

    async fn download_attachment(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<Vec<u8>, MailboxError> {
        let resp = self
            .request(self.client.get(format!(
                "{}/messages/{}/attachments/{}",
                self.base_url, message_id, attachment_id
            )))
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await
            .map_err(|e| MailboxError::Transport(e.to_string()))?;

        let bytes = Self::check(resp)
            .await?
            .bytes()
            .await
            .map_err(|e| MailboxError::Transport(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn create_draft(&self, draft: &DraftRequest) -> Result<String, MailboxError> {
        let resp = self
            .request(self.client.post(format!("{}/drafts", self.base_url)))
            .json(draft)
            .timeout(METADATA_TIMEOUT)
            .send()
            .await
            .map_err(|e| MailboxError::Transport(e.to_string()))?;

        let parsed: DraftResponse = Self::check(resp)
            .await?
            .json()
            .await
            .map_err(|e| MailboxError::InvalidResponse(e.to_string()))?;
        Ok(parsed.draft_id)
    }
}

// ── Address helpers ─────────────────────────────────────────────────

/// Extract the bare address from a `Name <addr@domain>` header field,
/// lowercased.
pub fn parse_address(field: &str) -> String {
    if let (Some(start), Some(end)) = (field.find('<'), field.find('>'))
        && end > start
    {
        return field[start + 1..end].trim().to_lowercase();
    }
    field.trim().to_lowercase()
}

/// Extract the display name from a header field, falling back to the bare
/// address when no name is present.
pub fn display_name(field: &str) -> String {
    if let Some(start) = field.find('<') {
        let name = field[..start].trim().trim_matches('"');
        if !name.is_empty() {
            return name.to_string();
        }
    }
    parse_address(field)
}
