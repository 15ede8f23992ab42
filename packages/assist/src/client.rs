//! Wire contracts and service capabilities consumed by the pipeline.
//!
//! Three upstream collaborators, all JSON over HTTP:
//! - the model service (suggestions)
//! - the persistence endpoint (document content)
//! - the chat/audit history endpoint (read-only)
//!
//! Each is abstracted behind a trait so the orchestrator and tests can
//! substitute programmable implementations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::AssistError;

/// Distinguished `errorCode` value signalling quota exhaustion; must
/// short-circuit retry.
pub const QUOTA_ERROR_CODE: &str = "quota_exceeded";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionRequest {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_input: Option<String>,
    pub is_user_prompt: bool,
    pub document_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub markup: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stylesheet: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionPayload {
    pub explanation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operations: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_markup: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_stylesheet: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<SuggestionPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A model response, reduced to exactly one of its two shapes.
///
/// Replacement is the preferred path: when a payload carries both a
/// replacement and operations, the replacement wins and the operations are
/// dropped with a debug log.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationResult {
    ImperativeEdit {
        explanation: String,
        operations: serde_json::Value,
    },
    DocumentReplacement {
        explanation: String,
        new_markup: String,
        new_stylesheet: Option<String>,
    },
}

impl MutationResult {
    pub fn from_payload(payload: SuggestionPayload) -> Result<Self, AssistError> {
        let SuggestionPayload {
            explanation,
            operations,
            new_markup,
            new_stylesheet,
        } = payload;

        if let Some(new_markup) = new_markup {
            if operations.is_some() {
                tracing::debug!("payload carried both replacement and operations; using replacement");
            }
            return Ok(MutationResult::DocumentReplacement {
                explanation,
                new_markup,
                new_stylesheet,
            });
        }
        if let Some(operations) = operations {
            return Ok(MutationResult::ImperativeEdit {
                explanation,
                operations,
            });
        }
        Err(AssistError::EmptySuggestion)
    }

    pub fn explanation(&self) -> &str {
        match self {
            MutationResult::ImperativeEdit { explanation, .. } => explanation,
            MutationResult::DocumentReplacement { explanation, .. } => explanation,
        }
    }
}

/// Document content as the persistence endpoint sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveContent {
    pub markup: String,
    pub stylesheet: String,
}

/// Persistence failures, split by retryability.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SaveError {
    #[error("transient save failure: {0}")]
    Transient(String),

    #[error("not authorized: {0}")]
    Unauthorized(String),

    #[error("validation rejected content: {0}")]
    Validation(String),
}

impl SaveError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SaveError::Transient(_))
    }
}

/// One record in the conversation audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub role: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub records: Vec<HistoryRecord>,
    pub page: u32,
    pub total_pages: u32,
}

/// Upstream model call.
#[async_trait]
pub trait SuggestionService: Send + Sync {
    async fn request_suggestion(
        &self,
        request: &SuggestionRequest,
    ) -> Result<SuggestionResponse, AssistError>;
}

/// Durable document storage.
#[async_trait]
pub trait PersistenceService: Send + Sync {
    async fn save(&self, document_id: &str, content: &SaveContent) -> Result<(), SaveError>;

    /// Previously persisted content, if any.
    async fn load_previous(&self, document_id: &str) -> Result<Option<SaveContent>, SaveError>;
}

/// Paginated conversation records keyed by document identity. Read-only.
#[async_trait]
pub trait HistoryService: Send + Sync {
    async fn conversation_page(
        &self,
        document_id: &str,
        page: u32,
    ) -> Result<HistoryPage, AssistError>;
}

/// Shared endpoint configuration for the HTTP implementations.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub base_url: String,
    pub auth_token: Option<String>,
}

impl ServiceConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            auth_token: None,
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    fn apply_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

fn classify_request_error(err: reqwest::Error) -> AssistError {
    // Anything at the connection/timeout layer is retryable.
    AssistError::transient(err.to_string())
}

pub struct HttpSuggestionService {
    client: reqwest::Client,
    config: ServiceConfig,
}

impl HttpSuggestionService {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl SuggestionService for HttpSuggestionService {
    async fn request_suggestion(
        &self,
        request: &SuggestionRequest,
    ) -> Result<SuggestionResponse, AssistError> {
        let url = format!("{}/assist/suggest", self.config.base_url);
        let builder = self.config.apply_auth(self.client.post(&url).json(request));
        let response = builder.send().await.map_err(classify_request_error)?;

        let status = response.status();
        if status.is_server_error() {
            return Err(AssistError::transient(format!(
                "model service returned {}",
                status
            )));
        }
        response
            .json::<SuggestionResponse>()
            .await
            .map_err(classify_request_error)
    }
}

pub struct HttpPersistenceService {
    client: reqwest::Client,
    config: ServiceConfig,
}

impl HttpPersistenceService {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn content_url(&self, document_id: &str) -> String {
        format!("{}/documents/{}/content", self.config.base_url, document_id)
    }
}

#[async_trait]
impl PersistenceService for HttpPersistenceService {
    async fn save(&self, document_id: &str, content: &SaveContent) -> Result<(), SaveError> {
        let builder = self
            .config
            .apply_auth(self.client.post(self.content_url(document_id)).json(content));
        let response = builder
            .send()
            .await
            .map_err(|e| SaveError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        match status.as_u16() {
            401 | 403 => Err(SaveError::Unauthorized(body)),
            400 | 422 => Err(SaveError::Validation(body)),
            _ => Err(SaveError::Transient(format!("{}: {}", status, body))),
        }
    }

    async fn load_previous(&self, document_id: &str) -> Result<Option<SaveContent>, SaveError> {
        let builder = self
            .config
            .apply_auth(self.client.get(self.content_url(document_id)));
        let response = builder
            .send()
            .await
            .map_err(|e| SaveError::Transient(e.to_string()))?;

        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(SaveError::Transient(format!(
                "load returned {}",
                response.status()
            )));
        }
        response
            .json::<SaveContent>()
            .await
            .map(Some)
            .map_err(|e| SaveError::Transient(e.to_string()))
    }
}

pub struct HttpHistoryService {
    client: reqwest::Client,
    config: ServiceConfig,
}

impl HttpHistoryService {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl HistoryService for HttpHistoryService {
    async fn conversation_page(
        &self,
        document_id: &str,
        page: u32,
    ) -> Result<HistoryPage, AssistError> {
        let url = format!(
            "{}/documents/{}/chat?page={}",
            self.config.base_url, document_id, page
        );
        let builder = self.config.apply_auth(self.client.get(&url));
        let response = builder.send().await.map_err(classify_request_error)?;

        if response.status().is_server_error() {
            return Err(AssistError::transient(format!(
                "history endpoint returned {}",
                response.status()
            )));
        }
        response
            .json::<HistoryPage>()
            .await
            .map_err(classify_request_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serializes_camel_case() {
        let request = SuggestionRequest {
            prompt: "p".to_string(),
            user_input: Some("make it blue".to_string()),
            is_user_prompt: true,
            document_id: "doc-1".to_string(),
            conversation_id: None,
            markup: None,
            stylesheet: None,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"isUserPrompt\":true"));
        assert!(json.contains("\"userInput\""));
        assert!(json.contains("\"documentId\""));
        assert!(!json.contains("conversationId"));
    }

    #[test]
    fn test_replacement_preferred_over_operations() {
        let payload = SuggestionPayload {
            explanation: "Done".to_string(),
            operations: Some(serde_json::json!([])),
            new_markup: Some("<div></div>".to_string()),
            new_stylesheet: None,
        };
        let result = MutationResult::from_payload(payload).unwrap();
        assert!(matches!(result, MutationResult::DocumentReplacement { .. }));
    }

    #[test]
    fn test_empty_payload_is_rejected() {
        let payload = SuggestionPayload {
            explanation: "Nothing".to_string(),
            operations: None,
            new_markup: None,
            new_stylesheet: None,
        };
        assert!(matches!(
            MutationResult::from_payload(payload),
            Err(AssistError::EmptySuggestion)
        ));
    }

    #[test]
    fn test_history_page_deserializes_camel_case() {
        let page: HistoryPage = serde_json::from_str(
            r#"{"records":[{"role":"user","message":"make it blue",
                "timestamp":"2026-03-01T12:00:00Z"}],"page":0,"totalPages":4}"#,
        )
        .unwrap();
        assert_eq!(page.total_pages, 4);
        assert_eq!(page.records[0].role, "user");
    }

    #[test]
    fn test_quota_error_code_round_trips() {
        let response: SuggestionResponse = serde_json::from_str(
            r#"{"success":false,"errorCode":"quota_exceeded","error":"limit reached"}"#,
        )
        .unwrap();
        assert_eq!(response.error_code.as_deref(), Some(QUOTA_ERROR_CODE));
    }
}
