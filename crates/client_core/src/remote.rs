//! Remote task store: the trait the board depends on and its REST client.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use shared::{
    domain::{Project, ProjectId, StatusKey, Task, TaskId},
    error::{ApiError, ApiException},
    protocol::{ProjectInput, TaskInput, TaskQuery, TaskStats, UpdateStatusRequest},
};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
    config::Settings,
    session::{AuthClient, SharedSession},
};

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("invalid endpoint url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("remote store returned {status}: {source}")]
    Status {
        status: u16,
        #[source]
        source: ApiException,
    },
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("not authenticated")]
    NotAuthenticated,
}

impl RemoteError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Transport(err) => err.status().map(|status| status.as_u16()),
            _ => None,
        }
    }
}

/// Which listing hydrates a board: the global task board or a single
/// project's detail view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoardScope {
    #[default]
    AllTasks,
    Project(ProjectId),
}

impl BoardScope {
    pub fn tasks_path(self) -> String {
        match self {
            Self::AllTasks => "tasks/".to_string(),
            Self::Project(project_id) => format!("projects/{project_id}/tasks/"),
        }
    }
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn fetch_tasks(&self, scope: BoardScope) -> Result<Vec<Task>, RemoteError>;
    async fn update_status(&self, task_id: TaskId, status: &StatusKey) -> Result<(), RemoteError>;
}

/// Appends a trailing slash so relative joins keep the base path.
pub(crate) fn normalize_base_url(raw: &str) -> Result<Url, RemoteError> {
    let raw = raw.trim();
    let url = if raw.ends_with('/') {
        Url::parse(raw)?
    } else {
        Url::parse(&format!("{raw}/"))?
    };
    Ok(url)
}

pub(crate) async fn check_status(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let api_error = ApiError::from_response(status.as_u16(), &body);
    Err(RemoteError::Status {
        status: status.as_u16(),
        source: api_error.into(),
    })
}

pub(crate) async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, RemoteError> {
    let response = check_status(response).await?;
    let body = response.text().await?;
    Ok(serde_json::from_str(&body)?)
}

pub(crate) fn build_http_client(settings: &Settings) -> Result<Client, RemoteError> {
    Ok(Client::builder()
        .timeout(settings.request_timeout())
        .build()?)
}

fn with_bearer(builder: RequestBuilder, token: Option<&str>) -> RequestBuilder {
    match token {
        Some(token) => builder.bearer_auth(token),
        None => builder,
    }
}

pub struct HttpTaskStore {
    http: Client,
    base_url: Url,
    session: SharedSession,
    auth: AuthClient,
}

impl HttpTaskStore {
    pub fn new(settings: &Settings, session: SharedSession) -> Result<Self, RemoteError> {
        let http = build_http_client(settings)?;
        let base_url = normalize_base_url(&settings.api_url)?;
        let auth = AuthClient::with_client(http.clone(), base_url.clone(), Arc::clone(&session));
        Ok(Self {
            http,
            base_url,
            session,
            auth,
        })
    }

    pub fn auth(&self) -> &AuthClient {
        &self.auth
    }

    fn endpoint(&self, path: &str) -> Result<Url, RemoteError> {
        Ok(self.base_url.join(path)?)
    }

    /// Sends with the session's bearer token. An expired or rejected access
    /// token is refreshed once and the request replayed.
    async fn send_authorized<F>(&self, build: F) -> Result<Response, RemoteError>
    where
        F: Fn() -> RequestBuilder,
    {
        let (token, expired, can_refresh) = {
            let session = self.session.read().await;
            (
                session.access_token().map(str::to_owned),
                session.access_token_expired(Utc::now()),
                session.refresh_token().is_some(),
            )
        };
        if expired && can_refresh {
            debug!("remote: access token expired, refreshing before request");
            self.auth.refresh_replacing(token.as_deref()).await?;
        }

        let token = self.session.read().await.access_token().map(str::to_owned);
        let response = with_bearer(build(), token.as_deref()).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED || !can_refresh {
            return check_status(response).await;
        }

        info!("remote: access token rejected, refreshing and replaying request");
        self.auth.refresh_replacing(token.as_deref()).await?;
        let token = self.session.read().await.access_token().map(str::to_owned);
        let response = with_bearer(build(), token.as_deref()).send().await?;
        check_status(response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RemoteError> {
        let url = self.endpoint(path)?;
        self.get_url(url).await
    }

    async fn get_url<T: DeserializeOwned>(&self, url: Url) -> Result<T, RemoteError> {
        let response = self.send_authorized(|| self.http.get(url.clone())).await?;
        read_json(response).await
    }

    async fn send_json<B, T>(&self, method: Method, path: &str, body: &B) -> Result<T, RemoteError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        let response = self
            .send_authorized(|| self.http.request(method.clone(), url.clone()).json(body))
            .await?;
        read_json(response).await
    }

    async fn delete(&self, path: &str) -> Result<(), RemoteError> {
        let url = self.endpoint(path)?;
        self.send_authorized(|| self.http.delete(url.clone()))
            .await?;
        Ok(())
    }

    /// The list view's listing: filtered by status and ordered by `sort`.
    pub async fn fetch_tasks_filtered(&self, query: &TaskQuery) -> Result<Vec<Task>, RemoteError> {
        let mut url = self.endpoint("tasks/")?;
        url.query_pairs_mut().extend_pairs(query.pairs());
        self.get_url(url).await
    }

    /// Status change outside drag-and-drop: patch, then refetch the listing.
    /// A failed patch is returned as is and nothing is refetched.
    pub async fn change_status(
        &self,
        task_id: TaskId,
        status: &StatusKey,
        query: &TaskQuery,
    ) -> Result<Vec<Task>, RemoteError> {
        self.update_status(task_id, status).await?;
        self.fetch_tasks_filtered(query).await
    }

    pub async fn create_task(&self, input: &TaskInput) -> Result<Task, RemoteError> {
        let task: Task = self.send_json(Method::POST, "tasks/", input).await?;
        info!(task_id = task.id.0, "remote: task created");
        Ok(task)
    }

    pub async fn update_task(&self, task_id: TaskId, input: &TaskInput) -> Result<Task, RemoteError> {
        self.send_json(Method::PUT, &format!("tasks/{task_id}/"), input)
            .await
    }

    pub async fn delete_task(&self, task_id: TaskId) -> Result<(), RemoteError> {
        self.delete(&format!("tasks/{task_id}/")).await?;
        info!(task_id = task_id.0, "remote: task deleted");
        Ok(())
    }

    pub async fn create_project(&self, input: &ProjectInput) -> Result<Project, RemoteError> {
        let project: Project = self.send_json(Method::POST, "projects/", input).await?;
        info!(project_id = project.id.0, "remote: project created");
        Ok(project)
    }

    pub async fn update_project(
        &self,
        project_id: ProjectId,
        input: &ProjectInput,
    ) -> Result<Project, RemoteError> {
        self.send_json(Method::PUT, &format!("projects/{project_id}/"), input)
            .await
    }

    pub async fn delete_project(&self, project_id: ProjectId) -> Result<(), RemoteError> {
        self.delete(&format!("projects/{project_id}/")).await?;
        info!(project_id = project_id.0, "remote: project deleted");
        Ok(())
    }

    /// Creates a task inside a project (`POST /projects/{id}/tasks/`).
    pub async fn add_project_task(
        &self,
        project_id: ProjectId,
        input: &TaskInput,
    ) -> Result<Task, RemoteError> {
        self.send_json(Method::POST, &BoardScope::Project(project_id).tasks_path(), input)
            .await
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>, RemoteError> {
        self.get_json("projects/").await
    }

    pub async fn get_project(&self, project_id: ProjectId) -> Result<Project, RemoteError> {
        self.get_json(&format!("projects/{project_id}/")).await
    }

    pub async fn task_stats(&self) -> Result<TaskStats, RemoteError> {
        self.get_json("tasks/dashboard_stats/").await
    }
}

#[async_trait]
impl TaskStore for HttpTaskStore {
    async fn fetch_tasks(&self, scope: BoardScope) -> Result<Vec<Task>, RemoteError> {
        self.get_json(&scope.tasks_path()).await
    }

    async fn update_status(&self, task_id: TaskId, status: &StatusKey) -> Result<(), RemoteError> {
        let url = self.endpoint(&format!("tasks/{task_id}/"))?;
        let body = UpdateStatusRequest {
            status: status.clone(),
        };
        self.send_authorized(|| self.http.patch(url.clone()).json(&body))
            .await?;
        Ok(())
    }
}
