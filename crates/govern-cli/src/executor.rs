//! Action executors used by `govern worker`.
//!
//! `HttpExecutor` posts each approved action to a connector gateway. The
//! response status decides how the failure is classified, which in turn
//! decides whether the circuit breaker counts it and whether the job retries.

use std::time::Duration;

use async_trait::async_trait;
use govern_core::collab::ActionExecutor;
use govern_core::error::{ExternalErrorKind, GovernError, Result};
use govern_core::jobs::{ApprovedAction, PlaybookStep};
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::{json, Value};

/// Map a non-success HTTP status onto the external error taxonomy.
pub fn classify_status(status: StatusCode) -> ExternalErrorKind {
    match status.as_u16() {
        401 | 403 => ExternalErrorKind::Auth,
        402 => ExternalErrorKind::Quota,
        429 => ExternalErrorKind::RateLimited,
        s if s >= 500 => ExternalErrorKind::Server,
        _ => ExternalErrorKind::Validation,
    }
}

pub fn classify_transport(err: &reqwest::Error) -> ExternalErrorKind {
    if err.is_timeout() {
        ExternalErrorKind::Timeout
    } else {
        ExternalErrorKind::Transport
    }
}

/// POST `body` as JSON and turn the outcome into a `GovernError` taxonomy.
pub(crate) async fn post_json<B: Serialize + ?Sized>(
    client: &reqwest::Client,
    url: &str,
    body: &B,
) -> Result<Value> {
    let resp = client
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|e| GovernError::external(classify_transport(&e), e.to_string()))?;
    let status = resp.status();
    let text = resp
        .text()
        .await
        .map_err(|e| GovernError::external(classify_transport(&e), e.to_string()))?;
    if !status.is_success() {
        let snippet: String = text.chars().take(200).collect();
        return Err(GovernError::external(
            classify_status(status),
            format!("{url} returned {status}: {snippet}"),
        ));
    }
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
}

// ---------------------------------------------------------------------------
// HttpExecutor
// ---------------------------------------------------------------------------

pub struct HttpExecutor {
    client: reqwest::Client,
    base_url: String,
}

impl HttpExecutor {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn action_url(&self, action: &ApprovedAction) -> String {
        format!(
            "{}/actions/{}",
            self.base_url,
            action.action_type.as_str().to_ascii_lowercase()
        )
    }
}

#[async_trait]
impl ActionExecutor for HttpExecutor {
    async fn execute(&self, action: &ApprovedAction) -> Result<Value> {
        let url = self.action_url(action);
        tracing::debug!(url = %url, job_id = %action.job_id, "posting action");
        post_json(&self.client, &url, action).await
    }

    async fn advance_playbook_step(&self, step: &PlaybookStep) -> Result<Value> {
        let url = format!(
            "{}/playbooks/{}/steps/{}/advance",
            self.base_url, step.run_id, step.step_id
        );
        post_json(&self.client, &url, step).await
    }
}

// ---------------------------------------------------------------------------
// LoggingExecutor
// ---------------------------------------------------------------------------

/// Used when no connector is configured: logs the action and reports success.
#[derive(Debug, Default)]
pub struct LoggingExecutor;

#[async_trait]
impl ActionExecutor for LoggingExecutor {
    async fn execute(&self, action: &ApprovedAction) -> Result<Value> {
        tracing::info!(
            job_id = %action.job_id,
            action = %action.action_type,
            org = %action.organization_id,
            "no connector configured; action logged only"
        );
        Ok(json!({ "logged": true }))
    }

    async fn advance_playbook_step(&self, step: &PlaybookStep) -> Result<Value> {
        tracing::info!(run_id = %step.run_id, step_id = %step.step_id, "playbook step logged only");
        Ok(json!({ "logged": true }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use govern_core::types::ActionType;
    use serde_json::Map;
    use uuid::Uuid;

    fn action() -> ApprovedAction {
        let mut payload = Map::new();
        payload.insert("title".into(), Value::from("Call vendor"));
        ApprovedAction {
            job_id: Uuid::new_v4(),
            decision_id: Uuid::new_v4(),
            proposal_id: "p-1".into(),
            organization_id: "org-1".into(),
            project_id: None,
            action_type: ActionType::TaskCreate,
            payload,
            decided_by_user_id: "u-1".into(),
        }
    }

    #[test]
    fn status_classification() {
        let kind = |s: u16| classify_status(StatusCode::from_u16(s).unwrap());
        assert_eq!(kind(401), ExternalErrorKind::Auth);
        assert_eq!(kind(403), ExternalErrorKind::Auth);
        assert_eq!(kind(402), ExternalErrorKind::Quota);
        assert_eq!(kind(404), ExternalErrorKind::Validation);
        assert_eq!(kind(422), ExternalErrorKind::Validation);
        assert_eq!(kind(429), ExternalErrorKind::RateLimited);
        assert_eq!(kind(503), ExternalErrorKind::Server);
        assert!(kind(429).is_system());
        assert!(!kind(402).is_system());
    }

    #[tokio::test]
    async fn posts_action_and_returns_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/actions/task_create")
            .match_body(mockito::Matcher::PartialJson(json!({"payload": {"title": "Call vendor"}})))
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"task_id":"t-9"}"#)
            .create_async()
            .await;

        let exec = HttpExecutor::new(&server.url(), Duration::from_secs(5)).unwrap();
        let out = exec.execute(&action()).await.unwrap();
        assert_eq!(out["task_id"], "t-9");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn server_error_is_retryable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/actions/task_create")
            .with_status(502)
            .create_async()
            .await;

        let exec = HttpExecutor::new(&server.url(), Duration::from_secs(5)).unwrap();
        let err = exec.execute(&action()).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn auth_error_is_permanent() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/actions/task_create")
            .with_status(401)
            .create_async()
            .await;

        let exec = HttpExecutor::new(&server.url(), Duration::from_secs(5)).unwrap();
        let err = exec.execute(&action()).await.unwrap_err();
        assert!(matches!(
            err,
            GovernError::External {
                kind: ExternalErrorKind::Auth,
                ..
            }
        ));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn playbook_step_url() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/playbooks/run-1/steps/s-2/advance")
            .with_status(204)
            .create_async()
            .await;

        let exec = HttpExecutor::new(&server.url(), Duration::from_secs(5)).unwrap();
        let out = exec
            .advance_playbook_step(&PlaybookStep {
                job_id: Uuid::new_v4(),
                run_id: "run-1".into(),
                step_id: "s-2".into(),
                organization_id: "org-1".into(),
            })
            .await
            .unwrap();
        assert_eq!(out, Value::Null);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn unreachable_connector_is_transport_error() {
        // Port 9 (discard) on localhost is not listening in test environments.
        let exec = HttpExecutor::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let err = exec.execute(&action()).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
