use crate::streaming::{SegmentStore, StreamController, StreamError};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use common::{
    format_uptime, ControlResponse, ErrorResponse, HealthResponse, PlayerInstructions,
    StreamInfoResponse, StreamUrls,
};
use std::io;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::files::serve_media_file;

const NO_ACTIVE_STREAM: &str = "No active stream available";
const FILE_NOT_FOUND: &str = "File not found";

/// HTTP层共享状态
#[derive(Clone)]
pub struct AppState {
    pub controller: StreamController,
    pub store: SegmentStore,
    /// 服务运行时长的起点，`/restart_count` 会重置它
    pub server_started_at: Arc<RwLock<DateTime<Utc>>>,
    pub ffmpeg_available: bool,
    /// 生成播放地址用的主机名
    pub public_host: String,
    pub port: u16,
}

impl AppState {
    pub fn new(
        controller: StreamController,
        store: SegmentStore,
        ffmpeg_available: bool,
        public_host: String,
        port: u16,
    ) -> Self {
        Self {
            controller,
            store,
            server_started_at: Arc::new(RwLock::new(Utc::now())),
            ffmpeg_available,
            public_host,
            port,
        }
    }

    fn playlist_url(&self, host: &str) -> String {
        format!("http://{}:{}/playlist.m3u8", host, self.port)
    }

    /// 推流中才报告目录内容
    async fn published_files(&self, active: bool) -> (bool, usize) {
        if !active {
            return (false, 0);
        }
        (
            self.store.manifest_exists().await,
            self.store.segment_count().await,
        )
    }
}

/// API错误
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// 请求的资源当前不可用
    #[error("{0}")]
    NotFound(&'static str),

    /// 控制命令失败
    #[error("{0}")]
    Control(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StreamError> for ApiError {
    fn from(err: StreamError) -> Self {
        ApiError::Control(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound(message) => (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    error: message.to_string(),
                }),
            )
                .into_response(),
            ApiError::Control(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ControlResponse::failed(message)),
            )
                .into_response(),
            ApiError::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse { error: message }),
            )
                .into_response(),
        }
    }
}

/// 播放页
pub async fn index() -> Html<&'static str> {
    Html(include_str!("index.html"))
}

/// 健康检查
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = state.controller.status();
    let active = status.is_active();
    let (playlist_exists, segment_count) = state.published_files(active).await;

    let now = Utc::now();
    let server_started_at = *state.server_started_at.read().await;
    let stream_uptime = status
        .started_at
        .filter(|_| active)
        .map(|started_at| format_uptime(now - started_at));

    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: now,
        ffmpeg_available: state.ffmpeg_available,
        stream_active: active,
        stream_state: status.state,
        hls_playlist_exists: playlist_exists,
        hls_segment_count: segment_count,
        server_uptime: format_uptime(now - server_started_at),
        stream_uptime,
    })
}

/// 播放地址与常用播放器说明
pub async fn stream_info(State(state): State<AppState>) -> Json<StreamInfoResponse> {
    let active = state.controller.status().is_active();
    let (playlist_exists, segment_count) = state.published_files(active).await;

    let playlist_url = state.playlist_url(&state.public_host);
    Json(StreamInfoResponse {
        stream_active: active,
        playlist_exists,
        segment_count,
        stream_urls: StreamUrls {
            playlist_url: playlist_url.clone(),
            localhost_url: state.playlist_url("localhost"),
            direct_playlist: playlist_url.clone(),
        },
        instructions: PlayerInstructions::for_url(&playlist_url),
        timestamp: Utc::now(),
    })
}

/// HLS 播放列表
pub async fn playlist(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    if !state.controller.status().is_active() {
        debug!("Playlist requested while stream is not active");
        return Err(ApiError::NotFound(NO_ACTIVE_STREAM));
    }

    serve_media_file(&state.store.manifest_path(), &headers)
        .await
        .map_err(|e| media_error(e, NO_ACTIVE_STREAM))
}

/// HLS 分片
pub async fn segment(
    State(state): State<AppState>,
    Path(file): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let path = state
        .store
        .resolve_segment(&file)
        .ok_or(ApiError::NotFound(FILE_NOT_FOUND))?;

    if !state.controller.status().is_active() {
        return Err(ApiError::NotFound(NO_ACTIVE_STREAM));
    }

    serve_media_file(&path, &headers)
        .await
        .map_err(|e| media_error(e, FILE_NOT_FOUND))
}

/// 重启直播流
pub async fn restart_stream(
    State(state): State<AppState>,
) -> Result<Json<ControlResponse>, ApiError> {
    info!("📡 Restart requested via API");
    state
        .controller
        .restart()
        .await
        .map_err(|e| ApiError::Control(format!("Failed to restart stream: {}", e)))?;
    Ok(Json(ControlResponse::ok("Stream restarted successfully")))
}

/// 启动直播流（已在推流时直接成功）
pub async fn start_stream(
    State(state): State<AppState>,
) -> Result<Json<ControlResponse>, ApiError> {
    info!("📡 Start requested via API");
    state
        .controller
        .start()
        .await
        .map_err(|e| ApiError::Control(format!("Failed to start live stream: {}", e)))?;
    Ok(Json(ControlResponse::ok("Live stream started successfully")))
}

/// 停止直播流
pub async fn stop_stream(
    State(state): State<AppState>,
) -> Result<Json<ControlResponse>, ApiError> {
    info!("📡 Stop requested via API");
    state.controller.stop().await?;
    Ok(Json(ControlResponse::ok("Live stream stopped")))
}

/// 重置服务运行时长，推流中则一并重启
pub async fn restart_count(
    State(state): State<AppState>,
) -> Result<Json<ControlResponse>, ApiError> {
    let new_start_time = Utc::now();
    *state.server_started_at.write().await = new_start_time;
    info!("⏱️ Server uptime reset to {}", new_start_time);

    if state.controller.status().is_active() {
        state.controller.restart().await.map_err(|e| {
            ApiError::Control(format!(
                "Count restarted but failed to restart stream: {}",
                e
            ))
        })?;
    }

    let mut response = ControlResponse::ok("Count and stream restarted successfully");
    response.new_start_time = Some(new_start_time);
    Ok(Json(response))
}

/// 文件不存在按404处理，其余IO错误是500
fn media_error(err: io::Error, not_found: &'static str) -> ApiError {
    if err.kind() == io::ErrorKind::NotFound {
        ApiError::NotFound(not_found)
    } else {
        warn!("Failed to serve HLS file: {}", err);
        ApiError::Internal(err.to_string())
    }
}
