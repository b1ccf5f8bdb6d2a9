mod config;
mod http;
mod render;
mod streaming;

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{Cli, Config};
use crate::http::{AppState, HttpServer};
use crate::render::TestPatternSource;
use crate::streaming::{probe_encoder, ControllerSettings, SegmentStore, StreamController};

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("🚀 Stream server starting...");

    // 加载配置
    let cli = Cli::parse();
    let config = Config::load(&cli)?;
    info!("✓ Configuration loaded");

    // 清理上次运行残留的分片
    let store = SegmentStore::new(config.storage.hls_dir.clone());
    store
        .purge()
        .await
        .context("failed to prepare HLS output directory")?;
    info!("✓ HLS directory ready at {:?}", store.directory());

    let ffmpeg_available = probe_encoder(&config.encoder.program).await;
    if ffmpeg_available {
        info!("✓ Encoder available: {:?}", config.encoder.program);
    } else {
        warn!(
            "⚠️ Encoder {:?} not found or not runnable, streaming will fail until it is installed",
            config.encoder.program
        );
    }

    // 帧源 + 控制器
    let source = TestPatternSource::new(
        config.stream.width,
        config.stream.height,
        config.stream.fps,
        config.stream.seed,
    );
    let settings = ControllerSettings::from_config(&config, &store);
    let (controller, controller_task) =
        StreamController::spawn(settings, store.clone(), Box::new(source));
    info!(
        "✓ Stream controller initialized ({}x{} @ {}fps, {:?} frames)",
        config.stream.width, config.stream.height, config.stream.fps, config.stream.frame_codec
    );

    // 延迟自动推流
    let auto_start = config.stream.auto_start.then(|| {
        let controller = controller.clone();
        let delay = config.stream.auto_start_delay();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            info!("Auto-starting stream");
            if let Err(e) = controller.start().await {
                error!("❌ Auto-start failed: {}", e);
            }
        })
    });

    // HTTP服务
    let public_host = config.server.advertised_host();
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "invalid listen address {}:{}",
                config.server.host, config.server.port
            )
        })?;
    let state = AppState::new(
        controller.clone(),
        store,
        ffmpeg_available,
        public_host.clone(),
        config.server.port,
    );
    let server = HttpServer::new(addr, state);

    info!("✅ Stream server ready");
    info!(
        "   Playlist: http://{}:{}/playlist.m3u8",
        public_host, config.server.port
    );

    let served = server.run(shutdown_signal()).await;

    // 停止推流并清理分片目录
    if let Some(task) = auto_start {
        task.abort();
    }
    if let Err(e) = controller.shutdown().await {
        warn!("Stream controller shutdown: {}", e);
    }
    if let Err(e) = controller_task.await {
        error!("Stream controller task failed: {}", e);
    }

    served?;
    info!("👋 Shutdown complete");
    Ok(())
}

/// 等待 SIGINT (Ctrl+C) 或 SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to setup SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C), shutting down gracefully..."),
        _ = terminate => info!("Received SIGTERM, shutting down gracefully..."),
    }
}
