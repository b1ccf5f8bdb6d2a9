use axum::{
    body::Body,
    http::{header, HeaderMap, StatusCode},
    response::Response,
};
use std::io;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

/// 以流的方式返回HLS文件（支持单段 HTTP Range 请求）
///
/// 文件不存在时返回 `io::ErrorKind::NotFound`，由调用方映射为404。
pub async fn serve_media_file(path: &Path, headers: &HeaderMap) -> io::Result<Response> {
    let metadata = tokio::fs::metadata(path).await?;
    if !metadata.is_file() {
        return Err(io::Error::from(io::ErrorKind::NotFound));
    }
    let file_size = metadata.len();

    // 检查是否有 Range 请求
    if let Some(range) = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| parse_range(value, file_size))
    {
        return serve_range(path, range, file_size).await;
    }

    serve_full_file(path, file_size).await
}

/// 解析 Range 头（格式: bytes=start-end）
fn parse_range(range_str: &str, file_size: u64) -> Option<(u64, u64)> {
    let range_part = range_str.strip_prefix("bytes=")?;
    if file_size == 0 {
        return None;
    }

    let (start, end) = range_part.split_once('-')?;
    let start = start.trim().parse::<u64>().ok()?;
    let end = if end.trim().is_empty() {
        file_size - 1
    } else {
        end.trim().parse::<u64>().ok()?
    };

    if start > end || start >= file_size {
        return None;
    }

    Some((start, end.min(file_size - 1)))
}

/// 获取文件的 Content-Type
fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|s| s.to_str()) {
        Some("m3u8") => "application/vnd.apple.mpegurl",
        Some("ts") => "video/mp2t",
        _ => "application/octet-stream",
    }
}

/// 返回部分内容（206 Partial Content）
async fn serve_range(path: &Path, range: (u64, u64), file_size: u64) -> io::Result<Response> {
    let (start, end) = range;
    let content_length = end - start + 1;

    let mut file = File::open(path).await?;
    file.seek(io::SeekFrom::Start(start)).await?;

    // 创建限制读取长度的 reader
    let stream = ReaderStream::new(file.take(content_length));

    Response::builder()
        .status(StatusCode::PARTIAL_CONTENT)
        .header(header::CONTENT_TYPE, content_type(path))
        .header(header::CONTENT_LENGTH, content_length)
        .header(
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{}", start, end, file_size),
        )
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(stream))
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
}

/// 返回完整文件
async fn serve_full_file(path: &Path, file_size: u64) -> io::Result<Response> {
    let file = File::open(path).await?;
    let stream = ReaderStream::new(file);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type(path))
        .header(header::CONTENT_LENGTH, file_size)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(stream))
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
}
