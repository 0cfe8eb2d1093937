//! REST task store client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::types::{Task, TaskDraft, TaskFilter, TaskId, TaskStatus};

use super::{StoreError, TaskStore};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Endpoint {
    List,
    Create,
    Update,
    Delete,
    Move,
    BulkReplace,
}

#[derive(Debug, Clone)]
pub struct HttpTaskStore {
    client: Client,
    base_url: String,
}

impl HttpTaskStore {
    pub fn new(base_url: impl AsRef<str>, request_timeout: Duration) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|err| StoreError::Unavailable(format!("failed to build HTTP client: {err}")))?;
        Ok(Self {
            client,
            base_url: base_url.as_ref().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn tasks_url(&self) -> String {
        format!("{}/tasks", self.base_url)
    }

    fn task_url(&self, id: &TaskId) -> String {
        format!("{}/tasks/{}", self.base_url, urlencoding::encode(id.as_str()))
    }

    fn move_url(&self, id: &TaskId, status: TaskStatus) -> String {
        format!("{}/move/{}", self.task_url(id), status.as_str())
    }

    fn list_url(&self, filter: &TaskFilter) -> String {
        let mut params = Vec::new();
        if let Some(status) = filter.status {
            params.push(format!("status={}", status.as_str()));
        }
        if let Some(priority) = filter.priority {
            params.push(format!("priority={}", priority.as_str()));
        }
        if let Some(term) = filter.search_term() {
            params.push(format!("search={}", urlencoding::encode(term)));
        }

        if params.is_empty() {
            self.tasks_url()
        } else {
            format!("{}?{}", self.tasks_url(), params.join("&"))
        }
    }
}

#[async_trait]
impl TaskStore for HttpTaskStore {
    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError> {
        let url = self.list_url(filter);
        debug!(%url, "listing tasks");
        let response = self.client.get(&url).send().await.map_err(transport_error)?;
        let response = check_status(Endpoint::List, None, response).await?;
        decode(response).await
    }

    async fn create(&self, draft: &TaskDraft) -> Result<Task, StoreError> {
        let response = self
            .client
            .post(self.tasks_url())
            .json(draft)
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(Endpoint::Create, None, response).await?;
        decode(response).await
    }

    async fn update(&self, task: &Task) -> Result<Task, StoreError> {
        let response = self
            .client
            .put(self.task_url(&task.id))
            .json(task)
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(Endpoint::Update, Some(&task.id), response).await?;
        decode(response).await
    }

    async fn delete(&self, id: &TaskId) -> Result<(), StoreError> {
        let response = self
            .client
            .delete(self.task_url(id))
            .send()
            .await
            .map_err(transport_error)?;
        check_status(Endpoint::Delete, Some(id), response).await?;
        Ok(())
    }

    async fn move_task(&self, id: &TaskId, status: TaskStatus) -> Result<(), StoreError> {
        debug!(task_id = %id, %status, "moving task");
        let response = self
            .client
            .post(self.move_url(id, status))
            .send()
            .await
            .map_err(transport_error)?;
        check_status(Endpoint::Move, Some(id), response).await?;
        Ok(())
    }

    async fn bulk_replace(&self, tasks: &[Task]) -> Result<(), StoreError> {
        let response = self
            .client
            .post(format!("{}/bulk", self.tasks_url()))
            .json(tasks)
            .send()
            .await
            .map_err(transport_error)?;
        check_status(Endpoint::BulkReplace, None, response).await?;
        Ok(())
    }
}

async fn check_status(
    endpoint: Endpoint,
    id: Option<&TaskId>,
    response: Response,
) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let error = classify_status(endpoint, id, status, &body);
    warn!(?endpoint, status = status.as_u16(), error = %error, "task store request failed");
    Err(error)
}

fn classify_status(
    endpoint: Endpoint,
    id: Option<&TaskId>,
    status: StatusCode,
    body: &str,
) -> StoreError {
    let message = error_detail(body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("unexpected response")
            .to_string()
    });

    match (status, id) {
        (StatusCode::NOT_FOUND, Some(id)) => StoreError::NotFound(id.clone()),
        (StatusCode::BAD_REQUEST, _) if endpoint == Endpoint::Move => {
            StoreError::InvalidStatus(message)
        }
        (StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY, _) => {
            StoreError::Validation(message)
        }
        (status, _) if status.is_server_error() => {
            StoreError::Unavailable(format!("HTTP {}: {message}", status.as_u16()))
        }
        (status, _) => StoreError::Rejected {
            status: status.as_u16(),
            message,
        },
    }
}

/// Pulls the `detail` field out of a JSON error body, if present.
fn error_detail(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    match value.get("detail")? {
        serde_json::Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, StoreError> {
    response
        .json::<T>()
        .await
        .map_err(|err| StoreError::Decode(err.to_string()))
}

fn transport_error(err: reqwest::Error) -> StoreError {
    if err.is_decode() {
        StoreError::Decode(err.to_string())
    } else {
        StoreError::Unavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Priority;

    fn store() -> HttpTaskStore {
        HttpTaskStore::new("http://localhost:8000/", Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        assert_eq!(store().base_url(), "http://localhost:8000");
    }

    #[test]
    fn list_url_encodes_filters() {
        let store = store();
        assert_eq!(store.list_url(&TaskFilter::new()), "http://localhost:8000/tasks");
        let filter = TaskFilter::new()
            .with_status(TaskStatus::InProgress)
            .with_priority(Priority::High)
            .with_search("fix bug&ship");
        assert_eq!(
            store.list_url(&filter),
            "http://localhost:8000/tasks?status=inProgress&priority=high&search=fix%20bug%26ship"
        );
    }

    #[test]
    fn task_urls_escape_ids() {
        let store = store();
        assert_eq!(
            store.task_url(&TaskId::from("a/b")),
            "http://localhost:8000/tasks/a%2Fb"
        );
        assert_eq!(
            store.move_url(&TaskId::from("t1"), TaskStatus::Done),
            "http://localhost:8000/tasks/t1/move/done"
        );
    }

    #[test]
    fn not_found_maps_to_task_id() {
        let id = TaskId::from("t1");
        let error = classify_status(
            Endpoint::Move,
            Some(&id),
            StatusCode::NOT_FOUND,
            r#"{"detail":"Task not found"}"#,
        );
        assert_eq!(error, StoreError::NotFound(id));
    }

    #[test]
    fn bad_request_on_move_is_invalid_status() {
        let error = classify_status(
            Endpoint::Move,
            Some(&TaskId::from("t1")),
            StatusCode::BAD_REQUEST,
            r#"{"detail":"Invalid status"}"#,
        );
        assert_eq!(error, StoreError::InvalidStatus("Invalid status".to_string()));
    }

    #[test]
    fn validation_and_server_errors_are_classified() {
        let error = classify_status(
            Endpoint::Create,
            None,
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"detail":[{"msg":"field required"}]}"#,
        );
        assert!(matches!(error, StoreError::Validation(ref detail) if detail.contains("field required")));

        let error = classify_status(Endpoint::List, None, StatusCode::BAD_GATEWAY, "");
        assert_eq!(
            error,
            StoreError::Unavailable("HTTP 502: Bad Gateway".to_string())
        );

        let error = classify_status(Endpoint::Delete, None, StatusCode::CONFLICT, "nope");
        assert_eq!(
            error,
            StoreError::Rejected {
                status: 409,
                message: "Conflict".to_string()
            }
        );
    }
}
