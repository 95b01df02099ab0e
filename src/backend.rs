//! Backend API collaborator — notifications, candidates, documents,
//! positions.
//!
//! The HTTP client logs in with a service account and holds the JWT in a
//! single-slot cell, refreshed lazily when the expiry margin is reached.
//! Execution is single-threaded, so the cell's mutex is never contended;
//! it exists only because the client is shared behind `Arc`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::BackendError;

/// Timeout for metadata calls.
const API_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for document uploads.
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for the health probe.
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Tokens are issued for 24 h; refresh an hour early.
const TOKEN_LIFETIME_HOURS: i64 = 23;

/// Notification to surface to the coordinator.
#[derive(Debug, Clone)]
pub struct NotificationRequest {
    /// Notification type string, e.g. `email_processed`.
    pub kind: String,
    pub title: String,
    pub message: String,
    pub metadata: Value,
}

/// Candidate record as returned by the backend.
#[derive(Debug, Clone, Deserialize)]
pub struct CandidateRecord {
    pub id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
}

/// Position record as returned by the backend.
#[derive(Debug, Clone, Deserialize)]
pub struct PositionRecord {
    pub id: String,
    #[serde(default)]
    pub title: String,
}

/// Backend operations the pipeline depends on.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Liveness probe. Never errors — an unreachable backend is `false`.
    async fn health_check(&self) -> bool;

    /// Create a notification; returns its id.
    async fn create_notification(&self, req: &NotificationRequest)
    -> Result<String, BackendError>;

    /// Resolve or create a candidate keyed by email. Idempotent: two calls
    /// with the same email return the same record.
    async fn create_or_get_candidate(
        &self,
        email: &str,
        name: &str,
    ) -> Result<CandidateRecord, BackendError>;

    /// Upload a document for a candidate, triggering asynchronous extraction.
    /// Returns the document id without waiting for extraction.
    async fn upload_document(
        &self,
        candidate_id: &str,
        content: Vec<u8>,
        filename: &str,
    ) -> Result<String, BackendError>;

    /// Create a position record; returns it.
    async fn create_position(
        &self,
        title: &str,
        department: &str,
        description: &str,
    ) -> Result<PositionRecord, BackendError>;
}

// ── HTTP implementation ─────────────────────────────────────────────

struct TokenState {
    value: String,
    expires_at: DateTime<Utc>,
}

/// HTTP client for the backend API.
pub struct HttpBackend {
    base_url: String,
    agent_email: String,
    agent_password: SecretString,
    client: reqwest::Client,
    token: Mutex<Option<TokenState>>,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Deserialize)]
struct IdResponse {
    id: String,
}

#[derive(Deserialize)]
struct UploadResponse {
    document: IdResponse,
}

impl HttpBackend {
    pub fn new(
        base_url: impl Into<String>,
        agent_email: impl Into<String>,
        agent_password: SecretString,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            agent_email: agent_email.into(),
            agent_password,
            client: reqwest::Client::new(),
            token: Mutex::new(None),
        }
    }

    /// Log in and store a fresh token.
    async fn authenticate(&self) -> Result<String, BackendError> {
        let resp = self
            .client
            .post(format!("{}/api/auth/login", self.base_url))
            .json(&serde_json::json!({
                "email": self.agent_email,
                "password": self.agent_password.expose_secret(),
            }))
            .timeout(API_TIMEOUT)
            .send()
            .await
            .map_err(|e| BackendError::Auth(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(BackendError::Auth(format!("login returned HTTP {status}: {body}")));
        }

        let parsed: LoginResponse = resp
            .json()
            .await
            .map_err(|e| BackendError::Auth(format!("login response: {e}")))?;

        let mut slot = self.token.lock().await;
        *slot = Some(TokenState {
            value: parsed.token.clone(),
            expires_at: Utc::now() + chrono::Duration::hours(TOKEN_LIFETIME_HOURS),
        });
        info!(agent = %self.agent_email, "Authenticated with backend");
        Ok(parsed.token)
    }

    /// Current token, logging in when absent or stale.
    async fn ensure_token(&self) -> Result<String, BackendError> {
        {
            let slot = self.token.lock().await;
            if let Some(state) = slot.as_ref()
                && Utc::now() < state.expires_at
            {
                return Ok(state.value.clone());
            }
        }
        debug!("Backend token missing or stale, re-authenticating");
        self.authenticate().await
    }

    /// Send an authenticated request built by `build`. On a 401 the client
    /// re-authenticates once and retries once; a second 401 is an auth
    /// failure, which aborts the current iteration upstream.
    async fn send_authed(
        &self,
        build: impl Fn(&reqwest::Client, &str) -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, BackendError> {
        let token = self.ensure_token().await?;
        let resp = build(&self.client, &token)
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        if resp.status().as_u16() != 401 {
            return Self::check(resp).await;
        }

        warn!("Backend rejected token, re-authenticating once");
        let token = self.authenticate().await?;
        let retry = build(&self.client, &token)
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        if retry.status().as_u16() == 401 {
            return Err(BackendError::Auth("credential rejected after re-login".into()));
        }
        Self::check(retry).await
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, BackendError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(BackendError::Api {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn health_check(&self) -> bool {
        let resp = self
            .client
            .get(format!("{}/health", self.base_url))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await;
        matches!(resp, Ok(r) if r.status().is_success())
    }

    async fn create_notification(
        &self,
        req: &NotificationRequest,
    ) -> Result<String, BackendError> {
        let payload = serde_json::json!({
            "type": req.kind,
            "title": req.title,
            "message": req.message,
            "metadata": req.metadata,
        });
        let resp = self
            .send_authed(|client, token| {
                client
                    .post(format!("{}/api/notifications", self.base_url))
                    .bearer_auth(token)
                    .json(&payload)
                    .timeout(API_TIMEOUT)
            })
            .await?;

        let parsed: IdResponse = resp
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
        debug!(id = %parsed.id, title = %req.title, "Created notification");
        Ok(parsed.id)
    }

    async fn create_or_get_candidate(
        &self,
        email: &str,
        name: &str,
    ) -> Result<CandidateRecord, BackendError> {
        let resp = self
            .send_authed(|client, token| {
                client
                    .get(format!("{}/api/candidates", self.base_url))
                    .bearer_auth(token)
                    .timeout(API_TIMEOUT)
            })
            .await?;

        let existing: Vec<CandidateRecord> = resp
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;

        if let Some(found) = existing
            .into_iter()
            .find(|c| c.email.eq_ignore_ascii_case(email))
        {
            debug!(id = %found.id, email, "Found existing candidate");
            return Ok(found);
        }

        let payload = serde_json::json!({
            "name": name,
            "email": email,
            "phone": "",
            "skills": [],
            "status": "active",
        });
        let resp = self
            .send_authed(|client, token| {
                client
                    .post(format!("{}/api/candidates", self.base_url))
                    .bearer_auth(token)
                    .json(&payload)
                    .timeout(API_TIMEOUT)
            })
            .await?;

        let created: CandidateRecord = resp
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
        info!(id = %created.id, email, "Created candidate");
        Ok(created)
    }

    async fn upload_document(
        &self,
        candidate_id: &str,
        content: Vec<u8>,
        filename: &str,
    ) -> Result<String, BackendError> {
        let candidate_id = candidate_id.to_string();
        let filename_owned = filename.to_string();
        let resp = self
            .send_authed(move |client, token| {
                let part = reqwest::multipart::Part::bytes(content.clone())
                    .file_name(filename_owned.clone());
                let form = reqwest::multipart::Form::new()
                    .part("file", part)
                    .text("entityType", "candidate")
                    .text("entityId", candidate_id.clone())
                    .text("useLLM", "true");
                client
                    .post(format!("{}/api/documents/ingest", self.base_url))
                    .bearer_auth(token)
                    .multipart(form)
                    .timeout(UPLOAD_TIMEOUT)
            })
            .await?;

        let parsed: UploadResponse = resp
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
        info!(document_id = %parsed.document.id, filename, "Uploaded document for extraction");
        Ok(parsed.document.id)
    }

    async fn create_position(
        &self,
        title: &str,
        department: &str,
        description: &str,
    ) -> Result<PositionRecord, BackendError> {
        let payload = serde_json::json!({
            "title": title,
            "department": department,
            "description": description,
        });
        let resp = self
            .send_authed(|client, token| {
                client
                    .post(format!("{}/api/positions", self.base_url))
                    .bearer_auth(token)
                    .json(&payload)
                    .timeout(API_TIMEOUT)
            })
            .await?;

        let parsed: PositionRecord = resp
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
        info!(id = %parsed.id, title = %parsed.title, "Created position");
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_record_deserializes_with_extra_fields() {
        let raw = r#"{"id": "cand-1", "email": "a@b.com", "name": "A", "phone": "", "status": "active"}"#;
        let rec: CandidateRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(rec.id, "cand-1");
        assert_eq!(rec.email, "a@b.com");
    }

    #[test]
    fn upload_response_nesting() {
        let raw = r#"{"document": {"id": "doc-9", "processingStatus": "queued"}}"#;
        let parsed: UploadResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.document.id, "doc-9");
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let backend = HttpBackend::new(
            "http://localhost:3000/",
            "agent@example.com",
            SecretString::from("secret".to_string()),
        );
        assert_eq!(backend.base_url, "http://localhost:3000");
    }
}
