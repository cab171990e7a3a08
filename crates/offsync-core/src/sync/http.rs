//! HTTP client for a REST-style remote authority.

use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};

use super::authority::{AuthorityError, RemoteAuthority, RemoteState, SubmitOutcome};
use crate::config::AuthorityConfig;
use crate::error::{Error, Result};
use crate::models::{Action, ActionPayload, EntityType, Operation};
use crate::util::compact_text;

#[derive(Clone)]
pub struct HttpAuthority {
    base_url: String,
    api_token: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpAuthority {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpAuthority")
            .field("base_url", &self.base_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    local_id: &'a str,
    user_key: &'a str,
    entity_type: EntityType,
    entity_id: &'a str,
    created_at: i64,
    payload: &'a ActionPayload,
}

#[derive(Debug, Default, Deserialize)]
struct SubmitResponse {
    remote_id: Option<String>,
    id: Option<String>,
    conflict: Option<RemoteState>,
    error: Option<String>,
    message: Option<String>,
}

impl HttpAuthority {
    pub fn new(config: &AuthorityConfig, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|err| Error::InvalidInput(format!("failed to build HTTP client: {err}")))?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            client,
        })
    }

    /// Method and URL for an action.
    ///
    /// Creations post to the collection; updates and deletes address the entity.
    pub fn endpoint(&self, action: &Action) -> (Method, String) {
        let collection = format!("{}/actions/{}", self.base_url, action.action_type);
        match action.action_type.operation() {
            Operation::Create => (Method::POST, collection),
            Operation::Update => (Method::PUT, format!("{collection}/{}", action.entity_id)),
            Operation::Delete => (Method::DELETE, format!("{collection}/{}", action.entity_id)),
        }
    }
}

impl RemoteAuthority for HttpAuthority {
    async fn submit(&self, action: &Action) -> std::result::Result<SubmitOutcome, AuthorityError> {
        let (method, url) = self.endpoint(action);
        let body = SubmitRequest {
            local_id: action.local_id.as_str(),
            user_key: &action.user_key,
            entity_type: action.entity_type,
            entity_id: &action.entity_id,
            created_at: action.created_at,
            payload: &action.payload,
        };

        let mut request = self
            .client
            .request(method, &url)
            .header("Accept", "application/json")
            .header("Idempotency-Key", action.local_id.as_str())
            .json(&body);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;
        tracing::debug!(
            local_id = %action.local_id,
            status = status.as_u16(),
            "Authority responded"
        );
        classify_response(status, &text)
    }
}

fn transport_error(err: reqwest::Error) -> AuthorityError {
    if err.is_connect() {
        AuthorityError::Unreachable(err.to_string())
    } else {
        AuthorityError::Transient(err.to_string())
    }
}

/// Map an HTTP response to a submit outcome.
///
/// A conflict body wins over any status so a conflict wrapped in a retryable
/// status is never retried away. Anything that is neither clearly accepted,
/// clearly conflicting, nor a clear client error is treated as transient.
pub fn classify_response(
    status: StatusCode,
    body: &str,
) -> std::result::Result<SubmitOutcome, AuthorityError> {
    let parsed = serde_json::from_str::<SubmitResponse>(body).ok();

    if let Some(state) = parsed.as_ref().and_then(|p| p.conflict.clone()) {
        return Ok(SubmitOutcome::Conflict(state));
    }
    if status == StatusCode::CONFLICT {
        // No counters to compare, so this classifies as a timestamp conflict.
        return Ok(SubmitOutcome::Conflict(RemoteState::default()));
    }

    if status.is_success() {
        let remote_id = parsed.and_then(|p| p.remote_id.or(p.id));
        return Ok(SubmitOutcome::Accepted { remote_id });
    }

    let message = parse_api_error(status, parsed, body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(AuthorityError::Unauthorized(message))
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            Err(AuthorityError::Transient(message))
        }
        status if status.is_client_error() => Err(AuthorityError::Rejected {
            status: status.as_u16(),
            message,
        }),
        _ => Err(AuthorityError::Transient(message)),
    }
}

fn parse_api_error(status: StatusCode, parsed: Option<SubmitResponse>, body: &str) -> String {
    if let Some(message) = parsed.and_then(|p| p.message.or(p.error)) {
        return format!("{} ({})", message.trim(), status.as_u16());
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}
