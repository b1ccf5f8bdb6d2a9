// 编码器进程管理
//
// 一个 `EncoderSupervisor` 对应一个编码器子进程，内部有三个任务：
// - 等待任务：持有 Child，观察退出并发布退出码
// - 写入任务：从有界队列取帧，序列化后写入 stdin
// - stderr任务：逐行转发编码器日志
//
// 退出、等待失败、写管道失败三种情况都以 `EncoderEvent` 通知控制器，
// 事件带有会话代数，旧会话的事件由控制器丢弃。

use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};

use super::command::EncoderCommand;
use super::error::StreamError;
use crate::render::{Frame, FrameCodec};

/// 等待stderr任务收尾的上限
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);
/// stop() 中等待写入任务退出的上限
const WRITER_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// 编码器运行参数
#[derive(Debug, Clone, Copy)]
pub struct EncoderOptions {
    pub codec: FrameCodec,
    pub queue_capacity: usize,
    pub stop_timeout: Duration,
}

/// 编码器事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderEvent {
    pub generation: u64,
    pub kind: EncoderEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderEventKind {
    /// 进程退出；被信号杀死时没有退出码
    Exited {
        code: Option<i32>,
        stderr_tail: Option<String>,
    },
    /// 等待进程时出错
    Error { message: String },
    /// 写 stdin 失败
    BrokenPipe { message: String },
}

impl EncoderEventKind {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            EncoderEventKind::Exited { code, .. } => *code,
            _ => None,
        }
    }
}

impl fmt::Display for EncoderEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncoderEventKind::Exited { code, stderr_tail } => {
                match code {
                    Some(code) => write!(f, "encoder exited with code {}", code)?,
                    None => write!(f, "encoder killed by signal")?,
                }
                if let Some(line) = stderr_tail {
                    write!(f, " ({})", line)?;
                }
                Ok(())
            }
            EncoderEventKind::Error { message } => write!(f, "encoder error: {}", message),
            EncoderEventKind::BrokenPipe { message } => {
                write!(f, "encoder input closed: {}", message)
            }
        }
    }
}

/// 非阻塞观察结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderObservation {
    pub running: bool,
    pub exit_code: Option<i32>,
}

/// `feed` 的结果，调用方只用于计数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    Queued,
    /// 队列已满，丢帧
    Dropped,
    /// 写入端已关闭（失败已经通过事件通知）
    Closed,
}

#[derive(Debug, Clone)]
struct ExitRecord {
    code: Option<i32>,
}

/// 编码器子进程句柄
pub struct EncoderSupervisor {
    generation: u64,
    pid: Option<u32>,
    frames: Option<mpsc::Sender<Frame>>,
    exit: watch::Receiver<Option<ExitRecord>>,
    kill: Option<oneshot::Sender<()>>,
    stop_timeout: Duration,
    writer: Option<JoinHandle<()>>,
    waiter: Option<JoinHandle<()>>,
}

impl EncoderSupervisor {
    /// 拉起编码器进程
    ///
    /// 只有进程无法启动时返回错误，之后的所有失败都通过 `events` 通知。
    pub fn start(
        command: &EncoderCommand,
        options: EncoderOptions,
        generation: u64,
        events: mpsc::UnboundedSender<EncoderEvent>,
    ) -> Result<Self, StreamError> {
        let mut child = command
            .to_command()
            .spawn()
            .map_err(|source| StreamError::spawn(&command.program, source))?;

        let pid = child.id();
        info!(
            "🎬 Encoder started (generation {}, pid {:?}): {}",
            generation, pid, command
        );

        let (frame_tx, frame_rx) = mpsc::channel(options.queue_capacity.max(1));
        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel();

        let writer = child.stdin.take().map(|stdin| {
            tokio::spawn(write_frames(
                stdin,
                frame_rx,
                options.codec,
                generation,
                events.clone(),
            ))
        });
        let stderr = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(forward_stderr(stderr, generation)));
        let waiter = tokio::spawn(wait_for_exit(
            child, kill_rx, stderr, exit_tx, generation, events,
        ));

        Ok(Self {
            generation,
            pid,
            frames: Some(frame_tx),
            exit: exit_rx,
            kill: Some(kill_tx),
            stop_timeout: options.stop_timeout,
            writer,
            waiter: Some(waiter),
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// 把一帧交给写入任务，从不阻塞
    pub fn feed(&self, frame: Frame) -> FeedOutcome {
        let Some(frames) = &self.frames else {
            return FeedOutcome::Closed;
        };
        match frames.try_send(frame) {
            Ok(()) => FeedOutcome::Queued,
            Err(TrySendError::Full(_)) => FeedOutcome::Dropped,
            Err(TrySendError::Closed(_)) => FeedOutcome::Closed,
        }
    }

    pub fn observe(&self) -> EncoderObservation {
        match &*self.exit.borrow() {
            Some(record) => EncoderObservation {
                running: false,
                exit_code: record.code,
            },
            None => EncoderObservation {
                running: true,
                exit_code: None,
            },
        }
    }

    /// 关闭输入并终止进程
    ///
    /// 先发 SIGTERM，`stop_timeout` 内未退出则强杀。可重复调用。
    pub async fn stop(&mut self) -> Option<i32> {
        // 关闭队列，写入任务写完手上的帧后关闭 stdin
        self.frames.take();

        if self.observe().running {
            self.terminate();
            let exited = matches!(
                time::timeout(self.stop_timeout, self.exit.wait_for(Option::is_some)).await,
                Ok(Ok(_))
            );
            if !exited {
                warn!(
                    "Encoder (generation {}) did not exit within {:?}, killing",
                    self.generation, self.stop_timeout
                );
                self.force_kill();
                let _ = self.exit.wait_for(Option::is_some).await;
            }
        }

        if let Some(writer) = self.writer.take() {
            if time::timeout(WRITER_JOIN_TIMEOUT, writer).await.is_err() {
                debug!("Frame writer (generation {}) still busy, detaching", self.generation);
            }
        }
        if let Some(waiter) = self.waiter.take() {
            let _ = waiter.await;
        }

        let code = self.observe().exit_code;
        info!(
            "⏹️ Encoder stopped (generation {}, exit code {:?})",
            self.generation, code
        );
        code
    }

    #[cfg(unix)]
    fn terminate(&mut self) {
        let Some(pid) = self.pid else {
            self.force_kill();
            return;
        };
        // SAFETY: kill(2) 只发送信号，不涉及内存
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc != 0 {
            debug!(
                "SIGTERM to encoder pid {} failed: {}",
                pid,
                std::io::Error::last_os_error()
            );
            self.force_kill();
        }
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) {
        self.force_kill();
    }

    fn force_kill(&mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
    }
}

impl fmt::Debug for EncoderSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncoderSupervisor")
            .field("generation", &self.generation)
            .field("pid", &self.pid)
            .field("observation", &self.observe())
            .finish()
    }
}

/// 持有子进程直到退出；收到强杀请求（或请求端被丢弃）时杀掉进程
async fn wait_for_exit(
    mut child: Child,
    mut kill_rx: oneshot::Receiver<()>,
    stderr: Option<JoinHandle<Option<String>>>,
    exit_tx: watch::Sender<Option<ExitRecord>>,
    generation: u64,
    events: mpsc::UnboundedSender<EncoderEvent>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = &mut kill_rx => {
            if let Err(e) = child.start_kill() {
                warn!("Failed to kill encoder (generation {}): {}", generation, e);
            }
            child.wait().await
        }
    };

    let stderr_tail = match stderr {
        Some(handle) => time::timeout(STDERR_DRAIN_TIMEOUT, handle)
            .await
            .ok()
            .and_then(Result::ok)
            .flatten(),
        None => None,
    };

    let (code, kind) = match status {
        Ok(status) => {
            let code = status.code();
            (code, EncoderEventKind::Exited { code, stderr_tail })
        }
        Err(e) => {
            error!("Failed to wait for encoder (generation {}): {}", generation, e);
            (
                None,
                EncoderEventKind::Error {
                    message: e.to_string(),
                },
            )
        }
    };

    debug!("Encoder (generation {}) finished: {}", generation, kind);
    exit_tx.send_replace(Some(ExitRecord { code }));
    let _ = events.send(EncoderEvent { generation, kind });
}

async fn write_frames(
    mut stdin: ChildStdin,
    mut frames: mpsc::Receiver<Frame>,
    codec: FrameCodec,
    generation: u64,
    events: mpsc::UnboundedSender<EncoderEvent>,
) {
    while let Some(frame) = frames.recv().await {
        let bytes = match tokio::task::spawn_blocking(move || codec.encode(&frame)).await {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                warn!("Failed to encode frame: {}", e);
                continue;
            }
            Err(e) => {
                warn!("Frame encoding task failed: {}", e);
                continue;
            }
        };

        if let Err(e) = stdin.write_all(&bytes).await {
            warn!(
                "Failed to write frame to encoder (generation {}): {}",
                generation, e
            );
            let _ = events.send(EncoderEvent {
                generation,
                kind: EncoderEventKind::BrokenPipe {
                    message: e.to_string(),
                },
            });
            return;
        }
    }

    // 队列关闭：关闭 stdin，让编码器收尾
    let _ = stdin.shutdown().await;
}

/// 转发编码器日志，返回最后一行
async fn forward_stderr(stderr: ChildStderr, generation: u64) -> Option<String> {
    let mut lines = BufReader::new(stderr).lines();
    let mut last = None;
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        if line.to_ascii_lowercase().contains("error") {
            warn!("[encoder#{}] {}", generation, line);
        } else {
            debug!("[encoder#{}] {}", generation, line);
        }
        last = Some(line);
    }
    last
}
