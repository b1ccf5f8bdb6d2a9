// 直播流控制器
//
// 单个任务持有全部生命周期状态：编码器、帧定时器、宽限期检查、
// 等待启动结果的调用方。命令、编码器事件、tick、宽限期到期
// 在同一个 select 循环里串行处理，状态转换全序。
//
// 状态机：Stopped -> Starting -> Active -> Stopping -> Stopped
// 清目录或拉起编码器失败时停留在 Stopped；进入 Starting 之后的失败
// 都经过 Stopping 回收后回到 Stopped。发布 Starting 时帧定时器已经在跑。

use chrono::Utc;
use common::{StreamState, StreamStatus};
use std::future::pending;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::command::{EncoderCommand, EncoderSettings};
use super::encoder::{EncoderEvent, EncoderOptions, EncoderSupervisor, FeedOutcome};
use super::error::StreamError;
use super::pacer::FrameTicker;
use super::segment_store::SegmentStore;
use crate::config::Config;
use crate::render::{FrameCodec, FrameSource};

const COMMAND_QUEUE_CAPACITY: usize = 32;
/// 丢帧告警间隔
const DROP_WARN_EVERY: u64 = 100;

/// 控制器参数
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub encoder_command: EncoderCommand,
    pub codec: FrameCodec,
    pub fps: u32,
    /// 启动后多久检查编码器存活
    pub grace_period: Duration,
    /// 重启时停止与启动之间的间隔
    pub settle_delay: Duration,
    pub stop_timeout: Duration,
    pub frame_queue_capacity: usize,
}

impl ControllerSettings {
    pub fn from_config(config: &Config, store: &SegmentStore) -> Self {
        let encoder = EncoderSettings::from_config(config);
        Self {
            encoder_command: EncoderCommand::hls(&encoder, store),
            codec: config.stream.frame_codec,
            fps: config.stream.fps,
            grace_period: config.stream.grace_period(),
            settle_delay: config.stream.settle_delay(),
            stop_timeout: config.encoder.stop_timeout(),
            frame_queue_capacity: config.stream.frame_queue_capacity,
        }
    }

    fn encoder_options(&self) -> EncoderOptions {
        EncoderOptions {
            codec: self.codec,
            queue_capacity: self.frame_queue_capacity,
            stop_timeout: self.stop_timeout,
        }
    }
}

type Reply = oneshot::Sender<Result<(), StreamError>>;

enum Command {
    Start(Reply),
    Stop(Reply),
    Restart(Reply),
    Shutdown(Reply),
}

/// 控制器句柄，可随意克隆
#[derive(Clone)]
pub struct StreamController {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<StreamStatus>,
}

impl StreamController {
    /// 启动控制器任务
    pub fn spawn(
        settings: ControllerSettings,
        store: SegmentStore,
        source: Box<dyn FrameSource>,
    ) -> (Self, JoinHandle<()>) {
        let (width, height) = source.dimensions();
        debug!("Frame source produces {}x{} frames", width, height);

        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (status_tx, status_rx) = watch::channel(StreamStatus::default());
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let task = ControllerTask {
            settings,
            store,
            source,
            status: status_tx,
            events_tx,
            events_rx,
            encoder: None,
            ticker: None,
            grace: None,
            waiters: Vec::new(),
            generation: 0,
        };
        let handle = tokio::spawn(task.run(command_rx));

        (
            Self {
                commands: command_tx,
                status: status_rx,
            },
            handle,
        )
    }

    /// 确保在推流；在 Starting 阶段结束后返回
    pub async fn start(&self) -> Result<(), StreamError> {
        self.request(Command::Start).await
    }

    /// 停止推流并清空分片目录
    pub async fn stop(&self) -> Result<(), StreamError> {
        self.request(Command::Stop).await
    }

    /// 停止，等待 settle_delay，再启动
    pub async fn restart(&self) -> Result<(), StreamError> {
        self.request(Command::Restart).await
    }

    /// 停止推流并结束控制器任务
    pub async fn shutdown(&self) -> Result<(), StreamError> {
        self.request(Command::Shutdown).await
    }

    /// 最近一次发布的状态快照
    pub fn status(&self) -> StreamStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StreamStatus> {
        self.status.clone()
    }

    async fn request(&self, command: impl FnOnce(Reply) -> Command) -> Result<(), StreamError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands.send(command(reply_tx)).await?;
        reply_rx.await?
    }
}

struct ControllerTask {
    settings: ControllerSettings,
    store: SegmentStore,
    source: Box<dyn FrameSource>,
    status: watch::Sender<StreamStatus>,
    events_tx: mpsc::UnboundedSender<EncoderEvent>,
    events_rx: mpsc::UnboundedReceiver<EncoderEvent>,
    encoder: Option<EncoderSupervisor>,
    ticker: Option<FrameTicker>,
    /// (代数, 截止时间)，只在 Starting 时存在
    grace: Option<(u64, Instant)>,
    /// 等待本次启动结果的调用方
    waiters: Vec<Reply>,
    generation: u64,
}

impl ControllerTask {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        info!("✓ Stream controller running");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown(reply)) => {
                        let result = self.shutdown().await;
                        let _ = reply.send(result);
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        let _ = self.shutdown().await;
                        break;
                    }
                },
                Some(event) = self.events_rx.recv() => self.handle_event(event).await,
                _ = next_tick(&mut self.ticker) => self.on_tick(),
                generation = grace_elapsed(self.grace) => self.on_grace_elapsed(generation).await,
            }
        }

        info!("Stream controller stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start(reply) => match self.state() {
                // 已在推流或正在启动：不重复拉起
                StreamState::Active | StreamState::Starting => {
                    let _ = reply.send(Ok(()));
                }
                StreamState::Stopped | StreamState::Stopping => {
                    self.waiters.push(reply);
                    self.begin_start().await;
                }
            },
            Command::Stop(reply) => {
                if self.state() == StreamState::Stopped {
                    let _ = reply.send(Ok(()));
                    return;
                }
                info!("Stopping stream on request");
                let result = self.teardown().await;
                reply_all(self.take_waiters(), Err(StreamError::Superseded));
                let _ = reply.send(result);
            }
            Command::Restart(reply) => {
                info!("🔄 Restarting stream");
                let mut carried = Vec::new();
                if self.state() != StreamState::Stopped {
                    if let Err(e) = self.teardown().await {
                        warn!("Teardown before restart incomplete: {}", e);
                    }
                    // 被替代的启动请求跟随新的启动拿结果
                    carried = self.take_waiters();
                }
                time::sleep(self.settings.settle_delay).await;

                self.waiters.extend(carried);
                self.waiters.push(reply);
                self.begin_start().await;
            }
            // 在 run 中处理
            Command::Shutdown(reply) => {
                let _ = reply.send(Ok(()));
            }
        }
    }

    /// Stopped -> Starting：清目录、拉起编码器，再一次性发布 Starting
    ///
    /// 发布 Starting 时帧定时器和宽限期检查已经就位；
    /// 清目录或拉起失败时状态保持 Stopped。
    async fn begin_start(&mut self) {
        self.generation += 1;
        let generation = self.generation;
        let session_id = Uuid::new_v4();
        info!(
            "▶️ Starting stream session {} (generation {})",
            session_id, generation
        );

        if let Err(e) = self.store.purge().await {
            self.abort_start(e);
            return;
        }

        let encoder = match EncoderSupervisor::start(
            &self.settings.encoder_command,
            self.settings.encoder_options(),
            generation,
            self.events_tx.clone(),
        ) {
            Ok(encoder) => encoder,
            Err(e) => {
                self.abort_start(e);
                return;
            }
        };

        let pid = encoder.pid();
        self.encoder = Some(encoder);
        self.source.reset();
        self.ticker = Some(FrameTicker::new(self.settings.fps));
        self.grace = Some((generation, Instant::now() + self.settings.grace_period));

        self.status.send_modify(|s| {
            s.session_id = Some(session_id);
            s.generation = generation;
            s.started_at = Some(Utc::now());
            s.encoder_pid = pid;
            s.last_exit_code = None;
            s.last_error = None;
            s.frames_produced = 0;
            s.frames_dropped = 0;
        });
        self.transition(StreamState::Starting);
    }

    /// 还没进入 Starting 就失败：不需要回收，直接通知等待者
    fn abort_start(&mut self, err: StreamError) {
        error!("❌ Stream start failed: {}", err);
        let generation = self.generation;
        self.status.send_modify(|s| {
            s.generation = generation;
            s.last_error = Some(err.to_string());
        });
        reply_all(self.take_waiters(), Err(err));
    }

    async fn on_grace_elapsed(&mut self, generation: u64) {
        self.grace = None;
        if self.state() != StreamState::Starting || self.generation != generation {
            debug!("Ignoring stale grace check for generation {}", generation);
            return;
        }

        let observation = self.encoder.as_ref().map(EncoderSupervisor::observe);
        match observation {
            Some(observation) if observation.running => {
                self.transition(StreamState::Active);
                self.status.send_modify(|s| s.start_count += 1);
                info!("✅ Stream active (generation {})", generation);
                reply_all(self.take_waiters(), Ok(()));
            }
            other => {
                let reason = match other.and_then(|o| o.exit_code) {
                    Some(code) => format!("encoder exited with code {}", code),
                    None => "encoder not running after grace period".to_string(),
                };
                self.fail_start(StreamError::EncoderExited { reason }).await;
            }
        }
    }

    async fn handle_event(&mut self, event: EncoderEvent) {
        let current = self.encoder.as_ref().map(EncoderSupervisor::generation);
        if current != Some(event.generation) {
            debug!(
                "Ignoring encoder event from generation {}: {}",
                event.generation, event.kind
            );
            return;
        }

        let reason = event.kind.to_string();
        let exit_code = event.kind.exit_code();
        self.status.send_modify(|s| {
            if exit_code.is_some() {
                s.last_exit_code = exit_code;
            }
            s.last_error = Some(reason.clone());
        });

        match self.state() {
            StreamState::Starting => {
                self.fail_start(StreamError::EncoderExited { reason }).await;
            }
            _ => {
                warn!("⚠️ Encoder failed while streaming: {}", reason);
                if let Err(e) = self.teardown().await {
                    error!("Teardown after encoder failure incomplete: {}", e);
                }
            }
        }
    }

    fn on_tick(&mut self) {
        let Some(encoder) = &self.encoder else {
            return;
        };
        let frame = self.source.produce_frame();
        let outcome = encoder.feed(frame);

        let mut dropped_total = None;
        self.status.send_modify(|s| {
            s.frames_produced += 1;
            if outcome == FeedOutcome::Dropped {
                s.frames_dropped += 1;
                dropped_total = Some(s.frames_dropped);
            }
        });
        if let Some(total) = dropped_total {
            if total % DROP_WARN_EVERY == 1 {
                warn!("Encoder falling behind, {} frame(s) dropped so far", total);
            }
        }
    }

    /// Starting 阶段失败（宽限期内退出）：记录原因，回收资源，通知等待者
    async fn fail_start(&mut self, err: StreamError) {
        error!("❌ Stream start failed: {}", err);
        self.status
            .send_modify(|s| s.last_error = Some(err.to_string()));
        if let Err(e) = self.teardown().await {
            error!("Teardown after failed start incomplete: {}", e);
        }
        reply_all(self.take_waiters(), Err(err));
    }

    /// 回收顺序：tick -> 宽限期检查 -> 编码器 -> 分片目录
    async fn teardown(&mut self) -> Result<(), StreamError> {
        self.transition(StreamState::Stopping);
        if let Some(ticker) = self.ticker.take() {
            debug!(
                "Frame ticker stopped after {} ticks ({} late)",
                ticker.ticks(),
                ticker.late_ticks()
            );
        }
        self.grace = None;

        if let Some(mut encoder) = self.encoder.take() {
            let code = encoder.stop().await;
            self.status.send_modify(|s| {
                if code.is_some() {
                    s.last_exit_code = code;
                }
                s.encoder_pid = None;
            });
        }

        let purged = self.store.purge().await;
        if let Err(e) = &purged {
            error!("Failed to purge HLS directory: {}", e);
            self.status.send_modify(|s| s.last_error = Some(e.to_string()));
        }

        self.transition(StreamState::Stopped);
        self.status.send_modify(|s| s.started_at = None);
        purged.map(|_| ())
    }

    async fn shutdown(&mut self) -> Result<(), StreamError> {
        info!("Shutting down stream controller");
        let result = if self.state() == StreamState::Stopped {
            Ok(())
        } else {
            self.teardown().await
        };
        reply_all(self.take_waiters(), Err(StreamError::Superseded));
        result
    }

    fn state(&self) -> StreamState {
        self.status.borrow().state
    }

    fn transition(&self, next: StreamState) {
        let current = self.state();
        if !current.can_transition_to(next) {
            error!("Illegal stream transition {} -> {}", current, next);
            debug_assert!(false, "illegal stream transition {} -> {}", current, next);
        }
        info!("Stream state: {} -> {}", current, next);
        self.status.send_modify(|s| s.state = next);
    }

    fn take_waiters(&mut self) -> Vec<Reply> {
        std::mem::take(&mut self.waiters)
    }
}

fn reply_all(waiters: Vec<Reply>, result: Result<(), StreamError>) {
    for waiter in waiters {
        let _ = waiter.send(result.clone());
    }
}

async fn next_tick(ticker: &mut Option<FrameTicker>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => pending().await,
    }
}

async fn grace_elapsed(grace: Option<(u64, Instant)>) -> u64 {
    match grace {
        Some((generation, deadline)) => {
            time::sleep_until(deadline).await;
            generation
        }
        None => pending().await,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::streaming::test_support::{
        dying_encoder, failing_encoder, fake_hls_encoder, fast_settings, missing_encoder, sh,
        CountingSource,
    };
    use tempfile::{tempdir, TempDir};

    fn spawn_controller(
        command: impl FnOnce(&std::path::Path) -> EncoderCommand,
    ) -> (StreamController, JoinHandle<()>, SegmentStore, CountingSource, TempDir) {
        let dir = tempdir().unwrap();
        let store = SegmentStore::new(dir.path());
        let source = CountingSource::default();
        let (controller, handle) = StreamController::spawn(
            fast_settings(command(dir.path())),
            store.clone(),
            Box::new(source.clone()),
        );
        (controller, handle, store, source, dir)
    }

    async fn wait_for_state(controller: &StreamController, state: StreamState) -> StreamStatus {
        let mut rx = controller.subscribe();
        let status = time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.state == state))
            .await
            .expect("timed out waiting for state")
            .expect("controller gone")
            .clone();
        status
    }

    #[tokio::test]
    async fn test_start_then_stop_purges_directory() {
        let (controller, _handle, store, source, _dir) = spawn_controller(fake_hls_encoder);

        controller.start().await.unwrap();
        let status = controller.status();
        assert_eq!(status.state, StreamState::Active);
        assert_eq!(status.generation, 1);
        assert!(status.session_id.is_some());
        assert!(status.encoder_pid.is_some());
        assert!(status.started_at.is_some());
        assert_eq!(status.start_count, 1);
        assert!(store.manifest_exists().await);
        assert_eq!(store.segment_count().await, 1);
        assert!(source.produced() > 0);

        controller.stop().await.unwrap();
        let status = controller.status();
        assert_eq!(status.state, StreamState::Stopped);
        assert_eq!(status.encoder_pid, None);
        assert!(!store.manifest_exists().await);
        assert_eq!(store.segment_count().await, 0);
    }

    #[tokio::test]
    async fn test_double_start_keeps_one_encoder() {
        let (controller, _handle, _store, _source, _dir) = spawn_controller(fake_hls_encoder);

        controller.start().await.unwrap();
        let first = controller.status();
        controller.start().await.unwrap();
        let second = controller.status();

        assert_eq!(first.encoder_pid, second.encoder_pid);
        assert_eq!(first.session_id, second.session_id);
        assert_eq!(second.generation, 1);

        controller.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_restart_creates_new_session() {
        let (controller, _handle, store, _source, _dir) = spawn_controller(fake_hls_encoder);

        controller.start().await.unwrap();
        let before = controller.status();

        controller.restart().await.unwrap();
        let after = controller.status();

        assert_eq!(after.state, StreamState::Active);
        assert_eq!(after.generation, 2);
        assert_ne!(before.session_id, after.session_id);
        assert_ne!(before.encoder_pid, after.encoder_pid);
        assert_eq!(after.start_count, 2);
        assert!(store.manifest_exists().await);

        controller.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_encoder_death_stops_stream() {
        let (controller, _handle, store, source, _dir) = spawn_controller(|_| dying_encoder());

        controller.start().await.unwrap();
        assert_eq!(controller.status().state, StreamState::Active);

        let status = wait_for_state(&controller, StreamState::Stopped).await;
        assert_eq!(status.last_exit_code, Some(7));
        assert!(status.last_error.is_some());
        assert!(!store.manifest_exists().await);

        // tick 已经停止
        let produced = source.produced();
        time::sleep(Duration::from_millis(200)).await;
        assert_eq!(source.produced(), produced);
    }

    #[tokio::test]
    async fn test_exit_during_grace_fails_start() {
        let (controller, _handle, _store, _source, _dir) = spawn_controller(|_| failing_encoder());

        let err = controller.start().await.unwrap_err();
        assert!(matches!(err, StreamError::EncoderExited { .. }));

        let status = controller.status();
        assert_eq!(status.state, StreamState::Stopped);
        assert_eq!(status.last_exit_code, Some(3));
        assert_eq!(status.start_count, 0);
    }

    #[tokio::test]
    async fn test_spawn_failure_returns_to_stopped() {
        let (controller, _handle, _store, _source, _dir) = spawn_controller(|_| missing_encoder());

        let err = controller.restart().await.unwrap_err();
        assert!(matches!(err, StreamError::Spawn { .. }));

        let status = controller.status();
        assert_eq!(status.state, StreamState::Stopped);
        assert!(status.last_error.is_some());
    }

    #[tokio::test]
    async fn test_stop_when_stopped_is_noop() {
        let (controller, _handle, _store, _source, _dir) = spawn_controller(fake_hls_encoder);

        controller.stop().await.unwrap();
        let status = controller.status();
        assert_eq!(status.state, StreamState::Stopped);
        assert_eq!(status.generation, 0);
    }

    #[tokio::test]
    async fn test_stop_supersedes_pending_start() {
        let (controller, _handle, _store, _source, _dir) = spawn_controller(fake_hls_encoder);

        let starter = controller.clone();
        let pending_start = tokio::spawn(async move { starter.start().await });
        wait_for_state(&controller, StreamState::Starting).await;

        controller.stop().await.unwrap();
        let result = pending_start.await.unwrap();
        assert!(matches!(result, Err(StreamError::Superseded)));
        assert_eq!(controller.status().state, StreamState::Stopped);
    }

    #[tokio::test]
    async fn test_concurrent_restarts_serialize() {
        let (controller, _handle, _store, _source, _dir) = spawn_controller(fake_hls_encoder);

        let (a, b, c) = tokio::join!(
            controller.restart(),
            controller.restart(),
            controller.restart()
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());

        let status = controller.status();
        assert_eq!(status.state, StreamState::Active);
        assert_eq!(status.generation, 3);

        controller.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_ends_controller() {
        let (controller, handle, store, _source, _dir) = spawn_controller(fake_hls_encoder);

        controller.start().await.unwrap();
        controller.shutdown().await.unwrap();
        handle.await.unwrap();

        assert!(!store.manifest_exists().await);
        assert!(matches!(
            controller.start().await,
            Err(StreamError::ControllerClosed)
        ));
    }

    #[tokio::test]
    async fn test_start_while_starting_reports_success() {
        let dir = tempdir().unwrap();
        let store = SegmentStore::new(dir.path());
        let mut settings = fast_settings(sh("sleep 0.3; exit 9"));
        settings.grace_period = Duration::from_secs(2);
        let (controller, _handle) =
            StreamController::spawn(settings, store, Box::new(CountingSource::default()));

        let starter = controller.clone();
        let first = tokio::spawn(async move { starter.start().await });
        wait_for_state(&controller, StreamState::Starting).await;

        // 第二次启动立即成功，不等待宽限期结果
        controller.start().await.unwrap();
        assert_eq!(controller.status().generation, 1);

        let result = first.await.unwrap();
        assert!(matches!(result, Err(StreamError::EncoderExited { .. })));
        assert_eq!(controller.status().state, StreamState::Stopped);
    }

    #[tokio::test]
    async fn test_ticking_when_starting_is_published() {
        let dir = tempdir().unwrap();
        let store = SegmentStore::new(dir.path());
        let source = CountingSource::default();
        let mut settings = fast_settings(fake_hls_encoder(dir.path()));
        settings.grace_period = Duration::from_secs(2);
        let (controller, _handle) =
            StreamController::spawn(settings, store, Box::new(source.clone()));

        let starter = controller.clone();
        let pending_start = tokio::spawn(async move { starter.start().await });
        let status = wait_for_state(&controller, StreamState::Starting).await;
        assert!(status.encoder_pid.is_some());
        assert_eq!(status.generation, 1);

        // 第一个tick立即触发
        time::sleep(Duration::from_millis(200)).await;
        assert!(source.produced() > 0);
        assert_eq!(controller.status().state, StreamState::Starting);

        controller.stop().await.unwrap();
        assert!(matches!(
            pending_start.await.unwrap(),
            Err(StreamError::Superseded)
        ));
    }

    #[tokio::test]
    async fn test_purge_failure_surfaces_filesystem_error() {
        let (controller, _handle, _store, _source, dir) = spawn_controller(fake_hls_encoder);

        controller.start().await.unwrap();
        // 同名目录让 remove_file 失败
        std::fs::create_dir(dir.path().join("segment_999.ts")).unwrap();

        let err = controller.restart().await.unwrap_err();
        assert!(matches!(err, StreamError::Filesystem { .. }));

        let status = controller.status();
        assert_eq!(status.state, StreamState::Stopped);
        assert_eq!(status.encoder_pid, None);
        assert!(status.last_error.is_some());
    }
}
