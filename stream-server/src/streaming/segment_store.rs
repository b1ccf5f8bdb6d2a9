// HLS 分片目录
//
// 编码器把播放列表和分片写进这个目录，HTTP层从这里读。
// 清理只在进入 Starting 和 Stopping 时由控制器发起。

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use super::error::StreamError;

/// 播放列表文件名
pub const PLAYLIST_FILE: &str = "playlist.m3u8";
/// 分片文件名模板（编码器侧）
pub const SEGMENT_PATTERN: &str = "segment_%03d.ts";

const SEGMENT_PREFIX: &str = "segment_";
const SEGMENT_SUFFIX: &str = ".ts";

/// 分片目录管理
#[derive(Debug, Clone)]
pub struct SegmentStore {
    directory: PathBuf,
}

impl SegmentStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.directory.join(PLAYLIST_FILE)
    }

    pub fn segment_template(&self) -> PathBuf {
        self.directory.join(SEGMENT_PATTERN)
    }

    /// 清空目录中的播放列表与分片，目录不存在时创建
    ///
    /// 返回删除的文件数。清理过程中文件被编码器并发删除属于正常情况。
    pub async fn purge(&self) -> Result<usize, StreamError> {
        fs::create_dir_all(&self.directory)
            .await
            .map_err(|e| StreamError::filesystem(&self.directory, e))?;

        let mut entries = fs::read_dir(&self.directory)
            .await
            .map_err(|e| StreamError::filesystem(&self.directory, e))?;

        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StreamError::filesystem(&self.directory, e))?
        {
            let path = entry.path();
            if !is_stream_artifact(&path) {
                continue;
            }
            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(StreamError::filesystem(path, e)),
            }
        }

        if removed > 0 {
            info!("🧹 Purged {} HLS file(s) from {:?}", removed, self.directory);
        } else {
            debug!("HLS directory {:?} already clean", self.directory);
        }
        Ok(removed)
    }

    pub async fn manifest_exists(&self) -> bool {
        fs::metadata(self.manifest_path())
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    /// 当前目录中的分片数，目录不存在时为0
    pub async fn segment_count(&self) -> usize {
        let Ok(mut entries) = fs::read_dir(&self.directory).await else {
            return 0;
        };
        let mut count = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            if let Some(name) = entry.file_name().to_str() {
                if is_segment_name(name) {
                    count += 1;
                }
            }
        }
        count
    }

    /// 把请求中的分片名映射为目录内路径，非法名字返回 None
    pub fn resolve_segment(&self, name: &str) -> Option<PathBuf> {
        is_segment_name(name).then(|| self.directory.join(name))
    }
}

/// `segment_<数字>.ts`
pub fn is_segment_name(name: &str) -> bool {
    name.strip_prefix(SEGMENT_PREFIX)
        .and_then(|rest| rest.strip_suffix(SEGMENT_SUFFIX))
        .map(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
        .unwrap_or(false)
}

fn is_stream_artifact(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name.ends_with(".ts") || name.ends_with(".m3u8") || name.ends_with(".m3u8.tmp")
}
