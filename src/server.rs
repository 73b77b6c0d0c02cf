//! HTTP surface: the artifact file route used by routed links, plus a small
//! read-only JSON API over the execution history.

use crate::config::Config;
use crate::delivery::{resolve_served_path, DeliveryError};
use crate::history::{HistoryError, HistoryFilter, HistoryStore};
use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info};

const DEFAULT_PAGE_SIZE: usize = 20;
const MAX_PAGE_SIZE: usize = 100;

pub struct ServerState {
    pub history: Arc<HistoryStore>,
    pub served_root: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
}

impl From<HistoryError> for ApiError {
    fn from(e: HistoryError) -> Self {
        match e {
            HistoryError::NotFound(_) => ApiError::NotFound(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<DeliveryError> for ApiError {
    fn from(e: DeliveryError) -> Self {
        match e {
            DeliveryError::PathTraversal { .. } => ApiError::Forbidden("access denied".to_string()),
            DeliveryError::MissingArtifact => ApiError::NotFound("file not found".to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "request failed");
        }
        let body = json!({ "error": { "code": code, "message": self.to_string() } });
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    pub page: Option<usize>,
    pub page_size: Option<usize>,
    pub sender_id: Option<String>,
    pub search: Option<String>,
    pub success_filter: Option<bool>,
}

/// `/files` is only mounted when routed links are handed out.
pub fn build_router(state: Arc<ServerState>, serve_files: bool) -> Router {
    let mut app = Router::new()
        .route("/api/history", get(history))
        .route("/api/detail/:id", get(detail))
        .route("/api/statistics", get(statistics))
        .route("/health", get(health));
    if serve_files {
        app = app.route("/files/*path", get(serve_file));
    }
    app.with_state(state)
}

pub async fn serve(config: &Config, history: Arc<HistoryStore>) -> Result<()> {
    let state = Arc::new(ServerState {
        history,
        served_root: config.execution.effective_output_dir(),
    });
    let app = build_router(state, config.delivery.enable_routed_link_channel);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.delivery.served_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, files = config.delivery.enable_routed_link_channel, "http server listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("http server stopped: {}", e))
}

async fn blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
}

async fn health() -> &'static str {
    "ok"
}

async fn history(
    State(state): State<Arc<ServerState>>,
    Query(params): Query<HistoryParams>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = HistoryFilter {
        requester_id: params.sender_id.filter(|s| !s.is_empty()),
        success: params.success_filter,
        search: params.search.filter(|s| !s.is_empty()),
    };
    let page = params.page.unwrap_or(1).max(1);
    let page_size = params.page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);

    let result = blocking(move || Ok(state.history.query(&filter, page, page_size)?)).await?;
    Ok(Json(result))
}

async fn detail(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<u64>,
) -> Result<impl IntoResponse, ApiError> {
    let record = blocking(move || Ok(state.history.get(id)?)).await?;
    Ok(Json(record))
}

async fn statistics(State(state): State<Arc<ServerState>>) -> Result<impl IntoResponse, ApiError> {
    let stats = blocking(move || Ok(state.history.stats()?)).await?;
    Ok(Json(stats))
}

async fn serve_file(
    State(state): State<Arc<ServerState>>,
    Path(path): Path<String>,
) -> Result<Response, ApiError> {
    debug!(path = %path, "file requested");
    let served = resolve_served_path(&state.served_root, std::path::Path::new(&path))?;
    if !served.absolute.is_file() {
        return Err(ApiError::NotFound("file not found".to_string()));
    }

    let bytes = tokio::fs::read(&served.absolute)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let name = served
        .absolute
        .file_name()
        .map(|n| n.to_string_lossy().replace('"', ""))
        .unwrap_or_default();

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", name)),
        ],
        bytes,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::NewRecord;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use std::fs;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct Fixture {
        _dir: TempDir,
        served: PathBuf,
        state: Arc<ServerState>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let served = dir.path().join("served");
        fs::create_dir(&served).unwrap();
        let history = Arc::new(HistoryStore::open(&dir.path().join("data")).unwrap());
        Fixture {
            state: Arc::new(ServerState {
                history,
                served_root: served.clone(),
            }),
            served,
            _dir: dir,
        }
    }

    fn record(requester: &str, success: bool) -> NewRecord {
        NewRecord {
            requester_id: requester.to_string(),
            requester_name: requester.to_string(),
            code: "print(1)".to_string(),
            description: None,
            success,
            output: "1\n".to_string(),
            error_msg: (!success).then(|| "NameError: x".to_string()),
            artifacts: Vec::new(),
            duration_ms: 50,
        }
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_health() {
        let f = fixture();
        let (status, body) = get(build_router(f.state, false), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"ok");
    }

    #[tokio::test]
    async fn test_file_route_serves_and_guards_root() {
        let f = fixture();
        fs::create_dir(f.served.join("plots")).unwrap();
        fs::write(f.served.join("plots").join("chart.png"), b"\x89PNG").unwrap();
        fs::write(f.served.parent().unwrap().join("secret.txt"), "nope").unwrap();
        let app = build_router(f.state.clone(), true);

        let (status, body) = get(app.clone(), "/files/plots/chart.png").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"\x89PNG");

        let (status, _) = get(app.clone(), "/files/..%2Fsecret.txt").await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = get(app.clone(), "/files/missing.png").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = get(app, "/files/plots").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_file_route_absent_without_routed_links() {
        let f = fixture();
        fs::write(f.served.join("a.txt"), "a").unwrap();
        let (status, _) = get(build_router(f.state, false), "/files/a.txt").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_history_filters_and_clamps_page_size() {
        let f = fixture();
        for (who, ok) in [("alice", true), ("bob", false), ("alice", false), ("alice", true)] {
            f.state.history.append(record(who, ok)).unwrap();
        }
        let app = build_router(f.state.clone(), false);

        let (status, body) = get(app.clone(), "/api/history?sender_id=alice&success_filter=true").await;
        assert_eq!(status, StatusCode::OK);
        let page: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(page["total_count"], 2);
        assert_eq!(page["page_size"], 20);
        assert_eq!(page["records"][0]["id"], 4);

        let (_, body) = get(app, "/api/history?page_size=500&page=0").await;
        let page: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(page["page_size"], 100);
        assert_eq!(page["page"], 1);
        assert_eq!(page["total_count"], 4);
    }

    #[tokio::test]
    async fn test_detail_and_statistics() {
        let f = fixture();
        f.state.history.append(record("alice", true)).unwrap();
        f.state.history.append(record("bob", false)).unwrap();
        let app = build_router(f.state.clone(), false);

        let (status, body) = get(app.clone(), "/api/detail/2").await;
        assert_eq!(status, StatusCode::OK);
        let detail: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(detail["requester_id"], "bob");
        assert_eq!(detail["error_msg"], "NameError: x");

        let (status, _) = get(app.clone(), "/api/detail/99").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, body) = get(app, "/api/statistics").await;
        let stats: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(stats["total"], 2);
        assert_eq!(stats["success_rate"], 50.0);
        assert_eq!(stats["unique_requesters"], 2);
    }
}
