// 直播流错误类型
//
// 控制器对调用方暴露的所有失败都归入 `StreamError`。
// 推流过程中编码器退出不是错误值，而是一次状态转换。

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// 流错误类型
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    /// 编码器进程无法拉起
    #[error("failed to spawn encoder {program:?}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    /// 编码器在宽限期内退出
    #[error("encoder exited during startup: {reason}")]
    EncoderExited { reason: String },

    /// 分片目录操作失败
    #[error("segment directory error at {path:?}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    /// 启动尚未完成就被停止
    #[error("start superseded by a later stop")]
    Superseded,

    /// 控制器已退出
    #[error("stream controller is not running")]
    ControllerClosed,
}

impl StreamError {
    pub(crate) fn spawn(program: impl Into<PathBuf>, source: io::Error) -> Self {
        StreamError::Spawn {
            program: program.into(),
            source: Arc::new(source),
        }
    }

    pub(crate) fn filesystem(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StreamError::Filesystem {
            path: path.into(),
            source: Arc::new(source),
        }
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for StreamError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        StreamError::ControllerClosed
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for StreamError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        StreamError::ControllerClosed
    }
}
