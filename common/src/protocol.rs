use crate::types::StreamState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 健康检查响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub ffmpeg_available: bool,
    pub stream_active: bool,
    pub stream_state: StreamState,
    pub hls_playlist_exists: bool,
    pub hls_segment_count: usize,
    /// HH:MM:SS
    pub server_uptime: String,
    /// 当前会话的推流时长，未推流时为空
    pub stream_uptime: Option<String>,
}

/// 播放地址
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamUrls {
    pub playlist_url: String,
    pub localhost_url: String,
    pub direct_playlist: String,
}

/// 常见播放器的使用说明
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerInstructions {
    pub vlc: String,
    pub obs: String,
    pub ffplay: String,
    pub browser: String,
}

impl PlayerInstructions {
    pub fn for_url(url: &str) -> Self {
        Self {
            vlc: format!("Open VLC → Media → Open Network Stream → Enter: {}", url),
            obs: format!("Add Media Source → Enter URL: {}", url),
            ffplay: format!("Run: ffplay {}", url),
            browser: format!("Open: {}", url),
        }
    }
}

/// 流信息响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamInfoResponse {
    pub stream_active: bool,
    pub playlist_exists: bool,
    pub segment_count: usize,
    pub stream_urls: StreamUrls,
    pub instructions: PlayerInstructions,
    pub timestamp: DateTime<Utc>,
}

/// 控制类接口（启动/停止/重启）的统一响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 仅 restart_count 返回
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_start_time: Option<DateTime<Utc>>,
    pub timestamp: DateTime<Utc>,
}

impl ControlResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
            new_start_time: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.into()),
            new_start_time: None,
            timestamp: Utc::now(),
        }
    }
}

/// 资源不可用时返回的错误体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
