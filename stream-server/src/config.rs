use anyhow::{Context, Result};
use clap::Parser;
use common::ServiceError;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, UdpSocket};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::render::FrameCodec;

/// 命令行参数
#[derive(Debug, Default, Parser)]
#[command(name = "stream-server", version, about = "Live HLS test-pattern stream server")]
pub struct Cli {
    /// TOML配置文件路径
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// HTTP监听端口
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// HLS输出目录
    #[arg(long, env = "HLS_DIR", value_name = "DIR")]
    pub hls_dir: Option<PathBuf>,

    /// 对外展示的主机名（用于生成播放地址）
    #[arg(long, env = "PUBLIC_HOST")]
    pub public_host: Option<String>,

    /// 编码器可执行文件
    #[arg(long, env = "FFMPEG_PATH", value_name = "PATH")]
    pub ffmpeg: Option<PathBuf>,

    /// 启动后不自动推流
    #[arg(long)]
    pub no_auto_start: bool,
}

/// 服务配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub stream: StreamConfig,
    pub encoder: EncoderConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// 为空时自动探测本机出口地址
    pub public_host: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            public_host: None,
        }
    }
}

impl ServerConfig {
    /// 播放地址中使用的主机名：配置值优先，否则探测出口地址，最后回退到 localhost
    pub fn advertised_host(&self) -> String {
        if let Some(host) = self.public_host.as_deref().filter(|h| !h.is_empty()) {
            return host.to_string();
        }
        match detect_outbound_ip() {
            Some(ip) => ip.to_string(),
            None => "localhost".to_string(),
        }
    }
}

/// 通过UDP "connect" 得到默认路由上的本机地址，不会发出数据包
fn detect_outbound_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    let ip = socket.local_addr().ok()?.ip();
    if ip.is_loopback() || ip.is_unspecified() {
        debug!("Outbound address detection returned {}", ip);
        return None;
    }
    Some(ip)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// 每帧写入编码器stdin的格式
    pub frame_codec: FrameCodec,
    /// 测试图案的随机种子
    pub seed: u64,
    pub auto_start: bool,
    pub auto_start_delay_ms: u64,
    /// 启动后检查编码器是否存活的宽限期
    pub grace_period_ms: u64,
    /// 重启时停止与再次启动之间的间隔
    pub settle_delay_ms: u64,
    /// 写入线程前的帧队列长度
    pub frame_queue_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30,
            frame_codec: FrameCodec::Png,
            seed: 0x5eed,
            auto_start: true,
            auto_start_delay_ms: 3000,
            grace_period_ms: 2000,
            settle_delay_ms: 2000,
            frame_queue_capacity: 60,
        }
    }
}

impl StreamConfig {
    pub fn auto_start_delay(&self) -> Duration {
        Duration::from_millis(self.auto_start_delay_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub program: PathBuf,
    pub preset: String,
    pub crf: u8,
    pub maxrate: String,
    pub bufsize: String,
    /// 单个分片时长（秒）
    pub hls_time: u32,
    /// 播放列表保留的分片数
    pub hls_list_size: u32,
    /// 附加一条静音音轨
    pub silent_audio: bool,
    pub log_level: String,
    /// 发送SIGTERM后等待退出的时间，超时强杀
    pub stop_timeout_ms: u64,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            preset: "medium".to_string(),
            crf: 20,
            maxrate: "2M".to_string(),
            bufsize: "4M".to_string(),
            hls_time: 4,
            hls_list_size: 10,
            silent_audio: true,
            log_level: "warning".to_string(),
            stop_timeout_ms: 5000,
        }
    }
}

impl EncoderConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub hls_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            hls_dir: PathBuf::from("./hls"),
        }
    }
}

impl Config {
    /// 加载配置：默认值 → 配置文件 → 环境变量/命令行
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        config.apply_cli(cli);
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        Self::from_toml_str(&content).with_context(|| format!("invalid config file {:?}", path))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    fn apply_cli(&mut self, cli: &Cli) {
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(dir) = &cli.hls_dir {
            self.storage.hls_dir = dir.clone();
        }
        if let Some(host) = &cli.public_host {
            self.server.public_host = Some(host.clone());
        }
        if let Some(program) = &cli.ffmpeg {
            self.encoder.program = program.clone();
        }
        if cli.no_auto_start {
            self.stream.auto_start = false;
        }
    }

    pub fn validate(&self) -> common::Result<()> {
        let stream = &self.stream;
        if stream.fps == 0 {
            return Err(ServiceError::InvalidConfig("stream.fps must be non-zero".into()));
        }
        if stream.width == 0 || stream.height == 0 {
            return Err(ServiceError::InvalidConfig(
                "stream.width/height must be non-zero".into(),
            ));
        }
        // yuv420p 要求偶数尺寸
        if stream.width % 2 != 0 || stream.height % 2 != 0 {
            return Err(ServiceError::InvalidConfig(
                "stream.width/height must be even".into(),
            ));
        }
        if stream.frame_queue_capacity == 0 {
            return Err(ServiceError::InvalidConfig(
                "stream.frame_queue_capacity must be non-zero".into(),
            ));
        }
        if self.encoder.hls_time == 0 || self.encoder.hls_list_size == 0 {
            return Err(ServiceError::InvalidConfig(
                "encoder.hls_time and encoder.hls_list_size must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
