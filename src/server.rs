use std::collections::HashMap;
use std::{net::SocketAddr, sync::Arc};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{routing::{get, post}, Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::agent::intent::IntentJudgment;
use crate::agent::tools::ToolInvocationRecord;
use crate::agent::{Workflow, WorkflowError};
use crate::responses::AgentResponse;
use crate::session::{SessionSnapshot, SessionState};
use crate::settings::{RequestOverrides, SessionSettings};
use crate::storage::SessionRepository;

type SessionHandle = Arc<Mutex<SessionState>>;

#[derive(Clone)]
pub struct AppState {
    pub workflow: Arc<Workflow>,
    pub sessions: Arc<RwLock<HashMap<Uuid, SessionHandle>>>,
    pub repo: Option<Arc<dyn SessionRepository>>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(workflow: Arc<Workflow>) -> Self {
        Self { workflow, sessions: Arc::default(), repo: None, metrics: None }
    }

    pub fn with_repository(mut self, repo: Arc<dyn SessionRepository>) -> Self {
        self.repo = Some(repo);
        self
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Finds a live session, resuming it from the repository if needed.
    async fn session(&self, id: Uuid) -> Result<Option<SessionHandle>, ApiError> {
        if let Some(handle) = self.sessions.read().await.get(&id) {
            return Ok(Some(handle.clone()));
        }
        let Some(repo) = &self.repo else { return Ok(None) };
        let Some(snapshot) = repo.load_session(id).await.map_err(ApiError::internal)? else {
            return Ok(None);
        };
        let mut sessions = self.sessions.write().await;
        let handle = sessions
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(SessionState::from_snapshot(snapshot))))
            .clone();
        tracing::info!(session_id = %id, "session resumed from store");
        Ok(Some(handle))
    }

    /// Writes the session and its tool log. Failures are logged, not raised.
    async fn persist(&self, state: &SessionState) -> bool {
        let Some(repo) = &self.repo else { return false };
        let log = self.workflow.tools().logger().snapshot(state.session_id).await;
        let result = async {
            repo.save_session(&state.snapshot()).await?;
            repo.save_tool_log(state.session_id, &log).await?;
            anyhow::Ok(())
        }
        .await;
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(session_id = %state.session_id, error = %e, "failed to persist session");
                false
            }
        }
    }
}

#[derive(Debug)]
pub struct ApiError(StatusCode, String);

impl ApiError {
    fn not_found(id: Uuid) -> Self {
        Self(StatusCode::NOT_FOUND, format!("session {} not found", id))
    }

    fn internal(e: impl std::fmt::Display) -> Self {
        Self(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(serde_json::json!({ "error": self.1 }))).into_response()
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct CreateSessionBody {
    pub user_id: Option<String>,
    pub settings: Option<SessionSettings>,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub id: Uuid,
}

async fn create_session(
    State(state): State<AppState>,
    body: Option<Json<CreateSessionBody>>,
) -> Json<CreateSessionResponse> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let session = SessionState::new(
        body.user_id.unwrap_or_else(|| "anonymous".into()),
        body.settings.unwrap_or_default(),
    );
    let id = session.session_id;
    state.sessions.write().await.insert(id, Arc::new(Mutex::new(session)));
    tracing::info!(session_id = %id, "session created");
    Json(CreateSessionResponse { id })
}

#[derive(Debug, Serialize)]
pub struct ListSessionsResponse {
    pub sessions: Vec<Uuid>,
}

async fn list_sessions(State(state): State<AppState>) -> Result<Json<ListSessionsResponse>, ApiError> {
    let mut ids: Vec<Uuid> = state.sessions.read().await.keys().copied().collect();
    if let Some(repo) = &state.repo {
        for id in repo.list_sessions().await.map_err(ApiError::internal)? {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    Ok(Json(ListSessionsResponse { sessions: ids }))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let handle = state.session(id).await?.ok_or_else(|| ApiError::not_found(id))?;
    let session = handle.lock().await;
    Ok(Json(session.snapshot()))
}

#[derive(Debug, Deserialize)]
pub struct TurnBody {
    pub input: String,
    #[serde(default)]
    pub overrides: Option<RequestOverrides>,
}

#[derive(Debug, Serialize)]
pub struct TurnResponse {
    pub session_id: Uuid,
    pub intent: IntentJudgment,
    pub rendered: String,
    pub response: AgentResponse,
    pub tools_used: Vec<String>,
    pub persisted: bool,
}

async fn post_turn(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<TurnBody>,
) -> Result<Json<TurnResponse>, ApiError> {
    let handle = state.session(id).await?.ok_or_else(|| ApiError::not_found(id))?;
    // One turn at a time per session; the state is only replaced once the turn ends.
    let mut session = handle.lock().await;
    let overrides = body.overrides.unwrap_or_default();
    let outcome = state
        .workflow
        .run_turn_with(session.clone(), &body.input, &overrides)
        .await
        .map_err(|e| match e {
            WorkflowError::EmptyInput => ApiError(StatusCode::BAD_REQUEST, e.to_string()),
            other => ApiError::internal(other),
        })?;
    *session = outcome.state;
    let persisted = state.persist(&session).await;

    Ok(Json(TurnResponse {
        session_id: id,
        intent: outcome.intent,
        rendered: outcome.rendered,
        response: outcome.response,
        tools_used: outcome.tools_used,
        persisted,
    }))
}

async fn get_logs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<ToolInvocationRecord>>, ApiError> {
    state.session(id).await?.ok_or_else(|| ApiError::not_found(id))?;
    let live = state.workflow.tools().logger().snapshot(id).await;
    if !live.is_empty() {
        return Ok(Json(live));
    }
    match &state.repo {
        Some(repo) => Ok(Json(repo.load_tool_log(id).await.map_err(ApiError::internal)?)),
        None => Ok(Json(live)),
    }
}

async fn render_metrics(State(state): State<AppState>) -> Result<String, StatusCode> {
    state.metrics.as_ref().map(PrometheusHandle::render).ok_or(StatusCode::NOT_FOUND)
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/sessions", post(create_session).get(list_sessions))
        .route("/v1/sessions/:id", get(get_session))
        .route("/v1/sessions/:id/turns", post(post_turn))
        .route("/v1/sessions/:id/logs", get(get_logs))
        .route("/metrics", get(render_metrics))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
