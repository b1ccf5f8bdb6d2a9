// 直播流模块
//
// 把周期性生成的原始帧变成可随时重启的 HLS 直播流。
//
// # 核心组件
//
// - `StreamController`: 生命周期状态机，唯一持有编码器和帧定时器
// - `EncoderSupervisor`: 编码器子进程（拉起、喂帧、观察退出、终止）
// - `SegmentStore`: HLS 输出目录（清理、计数、安全路径解析）
// - `FrameTicker`: 按帧率产生tick，落后时跳帧
// - `EncoderCommand`: 预先拼好的编码器命令行

pub mod command;
pub mod controller;
pub mod encoder;
pub mod error;
pub mod pacer;
pub mod segment_store;

// 重新导出核心类型
pub use command::probe_encoder;
pub use controller::{ControllerSettings, StreamController};
pub use error::StreamError;
pub use segment_store::SegmentStore;

/// 测试用的假编码器与帧源
#[cfg(all(test, unix))]
pub(crate) mod test_support {
    use super::command::EncoderCommand;
    use super::controller::ControllerSettings;
    use crate::render::{Frame, FrameCodec, FrameSource};
    use image::Rgb;
    use std::path::Path;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    pub fn sh(script: &str) -> EncoderCommand {
        EncoderCommand::new("/bin/sh", ["-c", script])
    }

    /// 写出播放列表和一个分片，然后一直读 stdin 直到EOF
    pub fn fake_hls_encoder(dir: &Path) -> EncoderCommand {
        EncoderCommand::new(
            "/bin/sh",
            [
                "-c".to_string(),
                concat!(
                    "printf '#EXTM3U\\n#EXT-X-TARGETDURATION:4\\n#EXTINF:4.0,\\nsegment_000.ts\\n' > \"$1/playlist.m3u8\"; ",
                    "printf 'fake-transport-stream' > \"$1/segment_000.ts\"; ",
                    "exec cat > /dev/null"
                )
                .to_string(),
                "fake-ffmpeg".to_string(),
                dir.to_string_lossy().into_owned(),
            ],
        )
    }

    /// 运行一段时间后以退出码7退出
    pub fn dying_encoder() -> EncoderCommand {
        sh("sleep 0.8; exit 7")
    }

    /// 启动后立即失败
    pub fn failing_encoder() -> EncoderCommand {
        sh("echo 'Invalid argument' >&2; exit 3")
    }

    pub fn missing_encoder() -> EncoderCommand {
        EncoderCommand::new("/nonexistent/ffmpeg", ["-version"])
    }

    pub fn solid_frame(width: u32, height: u32) -> Frame {
        Frame::from_pixel(width, height, Rgb([16, 128, 240]))
    }

    pub fn fast_settings(command: EncoderCommand) -> ControllerSettings {
        ControllerSettings {
            encoder_command: command,
            codec: FrameCodec::RawRgb24,
            fps: 30,
            grace_period: Duration::from_millis(300),
            settle_delay: Duration::from_millis(50),
            stop_timeout: Duration::from_millis(500),
            frame_queue_capacity: 8,
        }
    }

    /// 纯色帧源，记录生成的帧数
    #[derive(Clone, Default)]
    pub struct CountingSource {
        pub produced: Arc<AtomicU64>,
    }

    impl CountingSource {
        pub fn produced(&self) -> u64 {
            self.produced.load(Ordering::SeqCst)
        }
    }

    impl FrameSource for CountingSource {
        fn dimensions(&self) -> (u32, u32) {
            (16, 16)
        }

        fn produce_frame(&mut self) -> Frame {
            self.produced.fetch_add(1, Ordering::SeqCst);
            solid_frame(16, 16)
        }
    }
}
