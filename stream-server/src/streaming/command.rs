// 编码器命令行
//
// 参数列表在启动前一次性拼好，运行期不再改动。

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use super::segment_store::SegmentStore;
use crate::config::Config;
use crate::render::FrameCodec;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// 编码参数
#[derive(Debug, Clone)]
pub struct EncoderSettings {
    pub program: PathBuf,
    pub codec: FrameCodec,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub preset: String,
    pub crf: u8,
    pub maxrate: String,
    pub bufsize: String,
    pub hls_time: u32,
    pub hls_list_size: u32,
    pub silent_audio: bool,
    pub log_level: String,
}

impl EncoderSettings {
    pub fn from_config(config: &Config) -> Self {
        let encoder = &config.encoder;
        Self {
            program: encoder.program.clone(),
            codec: config.stream.frame_codec,
            width: config.stream.width,
            height: config.stream.height,
            fps: config.stream.fps,
            preset: encoder.preset.clone(),
            crf: encoder.crf,
            maxrate: encoder.maxrate.clone(),
            bufsize: encoder.bufsize.clone(),
            hls_time: encoder.hls_time,
            hls_list_size: encoder.hls_list_size,
            silent_audio: encoder.silent_audio,
            log_level: encoder.log_level.clone(),
        }
    }
}

/// 可执行文件 + 参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl EncoderCommand {
    pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// stdin 输入帧，输出 HLS 播放列表与分片
    pub fn hls(settings: &EncoderSettings, store: &SegmentStore) -> Self {
        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            settings.log_level.clone(),
            "-y".into(),
        ];

        args.extend(
            settings
                .codec
                .input_args(settings.width, settings.height, settings.fps),
        );

        if settings.silent_audio {
            args.extend(
                ["-f", "lavfi", "-i", "anullsrc=channel_layout=stereo:sample_rate=22050"]
                    .map(String::from),
            );
        }

        args.extend(
            [
                "-c:v", "libx264", "-preset", settings.preset.as_str(), "-tune", "zerolatency", "-crf",
            ]
            .map(String::from),
        );
        args.push(settings.crf.to_string());
        args.extend(
            [
                "-maxrate",
                settings.maxrate.as_str(),
                "-bufsize",
                settings.bufsize.as_str(),
                "-pix_fmt",
                "yuv420p",
                "-s",
            ]
            .map(String::from),
        );
        args.push(format!("{}x{}", settings.width, settings.height));
        // 关键帧间隔与分片时长对齐
        args.push("-g".into());
        args.push((settings.fps * settings.hls_time).to_string());

        if settings.silent_audio {
            args.extend(
                ["-c:a", "aac", "-b:a", "64k", "-ar", "22050", "-ac", "1", "-shortest"]
                    .map(String::from),
            );
        }

        args.extend(["-f", "hls", "-hls_time"].map(String::from));
        args.push(settings.hls_time.to_string());
        args.push("-hls_list_size".into());
        args.push(settings.hls_list_size.to_string());
        args.extend(
            [
                "-hls_flags",
                "delete_segments+independent_segments",
                "-hls_segment_filename",
            ]
            .map(String::from),
        );
        args.push(path_arg(&store.segment_template()));
        args.push(path_arg(&store.manifest_path()));

        Self::new(settings.program.clone(), args)
    }

    /// stdin/stderr 走管道，stdout 丢弃，句柄drop时杀进程
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl fmt::Display for EncoderCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// 检查编码器是否可用（`<program> -version` 成功退出）
pub async fn probe_encoder(program: &Path) -> bool {
    let status = Command::new(program)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status();

    match tokio::time::timeout(PROBE_TIMEOUT, status).await {
        Ok(Ok(status)) => status.success(),
        Ok(Err(e)) => {
            debug!("Encoder probe for {:?} failed: {}", program, e);
            false
        }
        Err(_) => {
            debug!("Encoder probe for {:?} timed out", program);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> EncoderSettings {
        EncoderSettings::from_config(&Config::default())
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn test_default_hls_command() {
        let store = SegmentStore::new("/srv/hls");
        let cmd = EncoderCommand::hls(&settings(), &store);
        let args = &cmd.args;

        assert_eq!(cmd.program, PathBuf::from("ffmpeg"));
        assert_eq!(value_after(args, "-vcodec"), Some("png"));
        assert_eq!(value_after(args, "-r"), Some("30"));
        assert_eq!(value_after(args, "-c:v"), Some("libx264"));
        assert_eq!(value_after(args, "-preset"), Some("medium"));
        assert_eq!(value_after(args, "-tune"), Some("zerolatency"));
        assert_eq!(value_after(args, "-crf"), Some("20"));
        assert_eq!(value_after(args, "-maxrate"), Some("2M"));
        assert_eq!(value_after(args, "-bufsize"), Some("4M"));
        assert_eq!(value_after(args, "-pix_fmt"), Some("yuv420p"));
        assert_eq!(value_after(args, "-s"), Some("1280x720"));
        assert_eq!(value_after(args, "-c:a"), Some("aac"));
        assert_eq!(value_after(args, "-hls_time"), Some("4"));
        assert_eq!(value_after(args, "-hls_list_size"), Some("10"));
        assert_eq!(
            value_after(args, "-hls_flags"),
            Some("delete_segments+independent_segments")
        );
        assert_eq!(
            value_after(args, "-hls_segment_filename"),
            Some("/srv/hls/segment_%03d.ts")
        );
        assert_eq!(args.last().map(String::as_str), Some("/srv/hls/playlist.m3u8"));
    }

    #[test]
    fn test_without_silent_audio() {
        let mut settings = settings();
        settings.silent_audio = false;
        let cmd = EncoderCommand::hls(&settings, &SegmentStore::new("hls"));

        assert!(!cmd.args.iter().any(|a| a.starts_with("anullsrc")));
        assert!(!cmd.args.iter().any(|a| a == "-c:a"));
        // 只有一个输入
        assert_eq!(cmd.args.iter().filter(|a| *a == "-i").count(), 1);
    }

    #[test]
    fn test_raw_input_args() {
        let mut settings = settings();
        settings.codec = FrameCodec::RawRgb24;
        let cmd = EncoderCommand::hls(&settings, &SegmentStore::new("hls"));
        assert_eq!(value_after(&cmd.args, "-pix_fmt"), Some("rgb24"));
        assert_eq!(value_after(&cmd.args, "-f"), Some("rawvideo"));
    }

    #[test]
    fn test_display() {
        let cmd = EncoderCommand::new("/bin/sh", ["-c", "exit 0"]);
        assert_eq!(cmd.to_string(), "/bin/sh -c exit 0");
    }

    #[tokio::test]
    async fn test_probe_missing_encoder() {
        assert!(!probe_encoder(Path::new("/nonexistent/ffmpeg")).await);
    }
}
