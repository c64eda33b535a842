use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use subtitler::{ActionResult, BatchRequest, BatchRunner, JobAction, Language, ModelSize};
use tracing::info;

use crate::error::ApiError;
use crate::ws;

#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<BatchRunner>,
    /// Canonical media library root.
    pub media_root: Arc<PathBuf>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/run-whisper", post(run_whisper))
        .route("/api/jobs", get(list_jobs))
        .route("/api/job/:job_id/action", post(job_action))
        .route("/ws/:client_id", get(ws::websocket_handler))
        .with_state(state)
}

fn default_model() -> String {
    ModelSize::default().name().to_string()
}

fn default_language() -> String {
    "auto".to_string()
}

#[derive(Debug, Deserialize)]
pub struct RunWhisperRequest {
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default = "default_model")]
    pub model_size: String,
    #[serde(default = "default_language")]
    pub language: String,
}

#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    pub action: String,
}

/// Resolve a submitted path and make sure it is a file inside the library.
async fn validate_media_path(root: &FsPath, raw: &str) -> Result<PathBuf, ApiError> {
    let resolved = tokio::fs::canonicalize(raw)
        .await
        .map_err(|_| ApiError::NotAFile(raw.to_string()))?;
    if !resolved.starts_with(root) {
        return Err(ApiError::OutsideMediaRoot(raw.to_string()));
    }
    let meta = tokio::fs::metadata(&resolved)
        .await
        .map_err(|_| ApiError::NotAFile(raw.to_string()))?;
    if !meta.is_file() {
        return Err(ApiError::NotAFile(raw.to_string()));
    }
    Ok(resolved)
}

async fn run_whisper(
    State(state): State<AppState>,
    payload: Result<Json<RunWhisperRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::BadBody(e.body_text()))?;

    let client_id = req.client_id.filter(|id| !id.is_empty());
    let Some(client_id) = client_id.filter(|_| !req.files.is_empty()) else {
        return Err(ApiError::MissingInput);
    };

    let model: ModelSize = req
        .model_size
        .parse()
        .map_err(|_| ApiError::UnknownModel(req.model_size.clone()))?;
    let language = Language::new(&req.language);

    for raw in &req.files {
        validate_media_path(&state.media_root, raw).await?;
    }

    if state.runner.connections().is_active(&client_id) {
        return Err(ApiError::BatchActive);
    }

    info!(
        client_id = %client_id,
        files = req.files.len(),
        %model,
        %language,
        "batch requested"
    );

    let count = req.files.len();
    let ticket = state.runner.submit(BatchRequest {
        client_id,
        files: req.files.into_iter().map(PathBuf::from).collect(),
        model,
        language,
    });

    Ok(Json(json!({
        "message": format!("Started processing {count} file(s)"),
        "client_id": ticket.client_id,
        "job_ids": ticket.job_ids,
    })))
}

async fn list_jobs(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "jobs": state.runner.jobs().list_all() }))
}

async fn job_action(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    payload: Result<Json<ActionRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::BadBody(e.body_text()))?;
    let jobs = state.runner.jobs();

    if jobs.get(&job_id).is_none() {
        return Ok(Json(json!({ "error": "Job not found" })));
    }
    let Ok(action) = serde_json::from_value::<JobAction>(Value::String(req.action)) else {
        return Ok(Json(json!({ "error": "Unknown action" })));
    };

    let body = match jobs.apply_action(&job_id, action) {
        ActionResult::Updated(job) => json!({ "result": "ok", "job": job }),
        ActionResult::Deleted => json!({ "result": "deleted" }),
        ActionResult::NotFound => json!({ "error": "Job not found" }),
    };
    Ok(Json(body))
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use subtitler::{
        ConnectionRegistry, JobRegistry, JobStatus, NewJob, RunnerConfig, TrackedTask,
        UnavailableEngine,
    };
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use super::*;

    fn state(root: &FsPath) -> AppState {
        let config = RunnerConfig::default();
        let runner = BatchRunner::new(
            config.clone(),
            Arc::new(UnavailableEngine),
            Arc::new(ConnectionRegistry::new(config.cancel_wait)),
            Arc::new(JobRegistry::new(config.job_retention)),
        );
        AppState {
            runner: Arc::new(runner),
            media_root: Arc::new(root.canonicalize().unwrap()),
        }
    }

    async fn post_json(state: &AppState, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        send(state, request).await
    }

    async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, Value) {
        let response = router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn media_file(dir: &tempfile::TempDir, name: &str) -> String {
        let path = dir.path().join(name);
        std::fs::write(&path, b"").unwrap();
        path.to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn test_run_whisper_requires_files_and_client() {
        let root = tempfile::tempdir().unwrap();
        let state = state(root.path());
        let file = media_file(&root, "a.mkv");

        let (status, body) = post_json(&state, "/run-whisper", json!({ "files": [file] })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().contains("client id"));

        let (status, _) =
            post_json(&state, "/run-whisper", json!({ "files": [], "client_id": "c1" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_run_whisper_rejects_unknown_model() {
        let root = tempfile::tempdir().unwrap();
        let state = state(root.path());
        let file = media_file(&root, "a.mkv");

        let (status, body) = post_json(
            &state,
            "/run-whisper",
            json!({ "files": [file], "client_id": "c1", "model_size": "enormous" }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().contains("enormous"));
    }

    #[tokio::test]
    async fn test_run_whisper_rejects_paths_outside_root() {
        let root = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        let state = state(root.path());
        let outside = media_file(&elsewhere, "secret.mkv");

        let (status, _) = post_json(
            &state,
            "/run-whisper",
            json!({ "files": [outside], "client_id": "c1" }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let sneaky = format!("{}/../{}", root.path().display(), "x.mkv");
        let (status, _) =
            post_json(&state, "/run-whisper", json!({ "files": [sneaky], "client_id": "c1" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_run_whisper_rejects_directories() {
        let root = tempfile::tempdir().unwrap();
        let state = state(root.path());
        std::fs::create_dir(root.path().join("season1")).unwrap();
        let dir = root.path().join("season1").to_string_lossy().into_owned();

        let (status, body) =
            post_json(&state, "/run-whisper", json!({ "files": [dir], "client_id": "c1" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().contains("not a file"));
    }

    #[tokio::test]
    async fn test_run_whisper_conflicts_with_active_batch() {
        let root = tempfile::tempdir().unwrap();
        let state = state(root.path());
        let file = media_file(&root, "a.mkv");

        let token = CancellationToken::new();
        let watched = token.clone();
        state.runner.connections().register_task(
            "c1",
            TrackedTask::spawn(token.clone(), async move { watched.cancelled().await }),
        );

        let (status, _) =
            post_json(&state, "/run-whisper", json!({ "files": [file], "client_id": "c1" })).await;
        assert_eq!(status, StatusCode::CONFLICT);
        token.cancel();
    }

    #[tokio::test]
    async fn test_run_whisper_starts_batch_and_lists_jobs() {
        let root = tempfile::tempdir().unwrap();
        let state = state(root.path());
        let a = media_file(&root, "a.mkv");
        let b = media_file(&root, "b.mkv");

        let (status, body) = post_json(
            &state,
            "/run-whisper",
            json!({ "files": [a, b], "client_id": "c1", "language": "auto" }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["client_id"], "c1");
        assert_eq!(body["job_ids"].as_array().unwrap().len(), 2);

        let request = Request::get("/api/jobs").body(Body::empty()).unwrap();
        let (status, body) = send(&state, request).await;
        assert_eq!(status, StatusCode::OK);
        let jobs = body["jobs"].as_array().unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0]["filename"], "a.mkv");
        assert_eq!(jobs[0]["model"], "base");
        assert_eq!(jobs[0]["language"], "auto");
    }

    #[tokio::test]
    async fn test_job_actions() {
        let root = tempfile::tempdir().unwrap();
        let state = state(root.path());
        let jobs = state.runner.jobs().clone();
        let id = jobs.submit(NewJob::for_file(
            "/media/a.mkv",
            "c1",
            ModelSize::Base,
            Language::Auto,
        ));
        let uri = format!("/api/job/{id}/action");

        let (_, body) = post_json(&state, "/api/job/nope/action", json!({ "action": "pause" })).await;
        assert_eq!(body, json!({ "error": "Job not found" }));

        let (_, body) = post_json(&state, &uri, json!({ "action": "explode" })).await;
        assert_eq!(body, json!({ "error": "Unknown action" }));

        let (status, body) = post_json(&state, &uri, json!({ "action": "pause" })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["result"], "ok");
        assert_eq!(body["job"]["status"], "paused");

        jobs.set_progress(&id, 40);
        let (_, body) = post_json(&state, &uri, json!({ "action": "stop" })).await;
        assert_eq!(body["job"]["status"], "stopped");
        assert_eq!(body["job"]["progress"], 0);
        assert_eq!(jobs.get(&id).unwrap().status, JobStatus::Stopped);

        let (_, body) = post_json(&state, &uri, json!({ "action": "delete" })).await;
        assert_eq!(body, json!({ "result": "deleted" }));

        let (_, body) = post_json(&state, &uri, json!({ "action": "delete" })).await;
        assert_eq!(body, json!({ "error": "Job not found" }));
    }
}
