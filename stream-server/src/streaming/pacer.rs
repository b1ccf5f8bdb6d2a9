// 帧率定时器
//
// 按目标帧率产生tick。落后时跳过错过的tick，不补发。

use std::time::Duration;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, warn};

/// 默认30fps的帧间隔（微秒）
const DEFAULT_FRAME_INTERVAL_US: u64 = 33_333;
/// 超过该值视为迟到
const LATE_THRESHOLD: Duration = Duration::from_millis(10);
/// 迟到告警的最小间隔（按迟到次数计）
const LATE_WARN_EVERY: u64 = 100;

/// 计算帧间隔
pub fn frame_interval(fps: u32) -> Duration {
    if fps > 0 {
        Duration::from_micros(1_000_000 / fps as u64)
    } else {
        Duration::from_micros(DEFAULT_FRAME_INTERVAL_US)
    }
}

/// 帧定时器
pub struct FrameTicker {
    interval: Interval,
    ticks: u64,
    late_ticks: u64,
}

impl FrameTicker {
    /// 第一个tick立即触发
    pub fn new(fps: u32) -> Self {
        let period = frame_interval(fps);
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        debug!(
            "Creating FrameTicker: fps={}, interval={}us",
            fps,
            period.as_micros()
        );

        Self {
            interval,
            ticks: 0,
            late_ticks: 0,
        }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn late_ticks(&self) -> u64 {
        self.late_ticks
    }

    /// 等待下一个tick，取消安全
    pub async fn tick(&mut self) -> Instant {
        let scheduled = self.interval.tick().await;
        self.ticks += 1;

        let lateness = Instant::now().saturating_duration_since(scheduled);
        if lateness > LATE_THRESHOLD {
            self.late_ticks += 1;
            if self.late_ticks % LATE_WARN_EVERY == 1 {
                warn!(
                    "Frame tick running late by {:.1}ms ({} late of {} ticks)",
                    lateness.as_secs_f64() * 1000.0,
                    self.late_ticks,
                    self.ticks
                );
            }
        }
        scheduled
    }
}
