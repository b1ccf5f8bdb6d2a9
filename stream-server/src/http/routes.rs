use super::handlers::{self, AppState};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub fn create_router(state: AppState) -> Router {
    Router::new()
        // 播放页
        .route("/", get(handlers::index))

        // 状态查询
        .route("/health", get(handlers::health_check))
        .route("/stream_info", get(handlers::stream_info))

        // HLS 文件
        .route("/playlist.m3u8", get(handlers::playlist))
        .route("/:file", get(handlers::segment))

        // 流控制
        .route("/restart_stream", post(handlers::restart_stream))
        .route("/start_stream", post(handlers::start_stream))
        .route("/stop_stream", post(handlers::stop_stream))
        .route("/restart_count", post(handlers::restart_count))

        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
