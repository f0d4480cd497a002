//! TTS job HTTP endpoints.

use crate::server::AppState;
use crate::tts::job::JobStatus;
use crate::tts::{CancelOutcome, CleanupOutcome};
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;
use uuid::Uuid;

/// `POST /api/v1/tts/start` body.
#[derive(Debug, Deserialize)]
pub struct StartRequest {
    /// Text to synthesize.
    pub text: String,
    /// Voice to use; the configured default applies when absent.
    #[serde(default)]
    pub voice: Option<String>,
}

/// `POST /api/v1/tts/cancel` body.
#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    /// Job to cancel.
    pub job_id: String,
}

/// `POST /api/v1/tts/start` — submit a synthesis job.
pub async fn start(
    State(state): State<AppState>,
    Json(request): Json<StartRequest>,
) -> (StatusCode, Json<Value>) {
    if request.text.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"status": "error", "message": "text 不能为空"})),
        );
    }

    match state.tts.start(request.text, request.voice) {
        Ok(job_id) => {
            info!("TTS job {job_id} accepted");
            (
                StatusCode::OK,
                Json(json!({
                    "status": "started",
                    "job_id": job_id.to_string(),
                    "message": "TTS 任务已启动",
                })),
            )
        }
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"status": "error", "message": e.to_string()})),
        ),
    }
}

/// `POST /api/v1/tts/cancel` — cancel a job unless it completed.
pub async fn cancel(
    State(state): State<AppState>,
    Json(request): Json<CancelRequest>,
) -> (StatusCode, Json<Value>) {
    let Ok(job_id) = Uuid::parse_str(&request.job_id) else {
        return job_not_found(&request.job_id);
    };

    let (status, message) = match state.tts.cancel(job_id) {
        CancelOutcome::NotFound => return job_not_found(&request.job_id),
        CancelOutcome::AlreadyCompleted => ("already_completed", "任务已完成，无法取消"),
        CancelOutcome::AlreadyCancelled => ("already_cancelled", "任务已被取消"),
        CancelOutcome::Cancelled => ("cancelled", "任务已取消"),
    };
    (
        StatusCode::OK,
        Json(json!({
            "status": status,
            "job_id": request.job_id,
            "message": message,
        })),
    )
}

/// `GET /api/v1/tts/result/{job_id}` — poll a job.
pub async fn result(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> (StatusCode, Json<Value>) {
    let Ok(parsed) = Uuid::parse_str(&job_id) else {
        return job_not_found(&job_id);
    };
    let Some(snapshot) = state.tts.snapshot(parsed) else {
        return job_not_found(&job_id);
    };

    let body = match snapshot.status {
        JobStatus::Pending | JobStatus::Processing => json!({
            "status": "processing",
            "job_id": job_id,
            "message": "任务处理中，请稍后重试",
        }),
        JobStatus::Cancelled => json!({
            "status": "cancelled",
            "job_id": job_id,
            "message": "任务已取消",
        }),
        JobStatus::Error => json!({
            "status": "error",
            "job_id": job_id,
            "error": snapshot.error.unwrap_or_else(|| "未知错误".to_owned()),
        }),
        JobStatus::Completed => json!({
            "status": "completed",
            "job_id": job_id,
            "audio_base64": snapshot.audio_base64.unwrap_or_default(),
            "audio_size": snapshot.audio_size.unwrap_or_default(),
            "text": snapshot.text,
        }),
    };
    (StatusCode::OK, Json(body))
}

/// `DELETE /api/v1/tts/jobs/{job_id}` — remove a terminal job record.
pub async fn cleanup(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> (StatusCode, Json<Value>) {
    let Ok(parsed) = Uuid::parse_str(&job_id) else {
        return job_not_found(&job_id);
    };

    match state.tts.cleanup(parsed) {
        CleanupOutcome::NotFound => job_not_found(&job_id),
        CleanupOutcome::NotTerminal => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "status": "cannot_cleanup",
                "job_id": job_id,
                "message": "只能清理已完成/已取消/失败的任务",
            })),
        ),
        CleanupOutcome::Deleted => (
            StatusCode::OK,
            Json(json!({"status": "deleted", "job_id": job_id})),
        ),
    }
}

fn job_not_found(job_id: &str) -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "status": "not_found",
            "job_id": job_id,
            "message": format!("任务 {job_id} 不存在"),
        })),
    )
}
