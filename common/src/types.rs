use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 直播流生命周期状态
///
/// 合法的状态转换只有一个循环：
/// `Stopped -> Starting -> Active -> Stopping -> Stopped`，
/// 另外 `Starting` 可以在宽限期内失败直接进入 `Stopping`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    /// 已停止：没有编码进程，也没有帧定时器
    Stopped,
    /// 启动中：编码进程已拉起，正在宽限期内观察
    Starting,
    /// 推流中
    Active,
    /// 停止中：正在回收定时器、编码进程和分片目录
    Stopping,
}

impl StreamState {
    /// 检查到 `next` 的转换是否合法
    pub fn can_transition_to(self, next: StreamState) -> bool {
        use StreamState::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Active)
                | (Starting, Stopping)
                | (Active, Stopping)
                | (Stopping, Stopped)
        )
    }

    /// 帧定时器只在这两个状态下运行
    pub fn is_ticking(self) -> bool {
        matches!(self, StreamState::Starting | StreamState::Active)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StreamState::Stopped => "stopped",
            StreamState::Starting => "starting",
            StreamState::Active => "active",
            StreamState::Stopping => "stopping",
        }
    }
}

impl Default for StreamState {
    fn default() -> Self {
        StreamState::Stopped
    }
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 流状态快照
///
/// 由控制器在每次状态转换后发布，HTTP层只读取最近一次的快照。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamStatus {
    pub state: StreamState,
    /// 当前（或最近一次）会话ID
    pub session_id: Option<Uuid>,
    /// 会话代数，每次启动递增
    pub generation: u64,
    /// 进入 Starting 的时间
    pub started_at: Option<DateTime<Utc>>,
    /// 编码进程PID
    pub encoder_pid: Option<u32>,
    /// 编码进程最近一次的退出码
    pub last_exit_code: Option<i32>,
    /// 最近一次失败原因（仅用于诊断）
    pub last_error: Option<String>,
    pub frames_produced: u64,
    pub frames_dropped: u64,
    /// 本进程内成功启动的次数
    pub start_count: u64,
}

impl StreamStatus {
    pub fn is_active(&self) -> bool {
        self.state == StreamState::Active
    }
}
