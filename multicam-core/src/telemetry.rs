use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// 采集流水线的计数器
///
/// 采集任务与编码任务并发更新，控制器随时读取快照。
/// 所有计数只用于统计，不参与同步，因此使用 Relaxed。
#[derive(Debug, Default)]
pub struct CaptureCounters {
    acquired: AtomicU64,
    enqueued: AtomicU64,
    evicted: AtomicU64,
    written: AtomicU64,
    stale_discarded: AtomicU64,
    timeouts: AtomicU64,
    device_errors: AtomicU64,
    consecutive_device_errors: AtomicU64,
    unavailable: AtomicBool,
}

impl CaptureCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_acquired(&self) {
        self.acquired.fetch_add(1, Ordering::Relaxed);
        self.consecutive_device_errors.store(0, Ordering::Relaxed);
    }

    pub fn record_enqueued(&self, evicted: bool) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        if evicted {
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_written(&self) {
        self.written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale(&self) {
        self.stale_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// 返回当前连续错误次数
    pub fn record_device_error(&self) -> u64 {
        self.device_errors.fetch_add(1, Ordering::Relaxed);
        self.consecutive_device_errors.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn mark_unavailable(&self) {
        self.unavailable.store(true, Ordering::Release);
    }

    pub fn is_unavailable(&self) -> bool {
        self.unavailable.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> CaptureTelemetry {
        CaptureTelemetry {
            acquired_frames: self.acquired.load(Ordering::Relaxed),
            enqueued_frames: self.enqueued.load(Ordering::Relaxed),
            evicted_frames: self.evicted.load(Ordering::Relaxed),
            written_frames: self.written.load(Ordering::Relaxed),
            stale_frames: self.stale_discarded.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            device_errors: self.device_errors.load(Ordering::Relaxed),
            consecutive_device_errors: self.consecutive_device_errors.load(Ordering::Relaxed),
            unavailable: self.is_unavailable(),
        }
    }
}

/// 某一时刻的遥测快照
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CaptureTelemetry {
    /// 从设备成功取到的帧
    pub acquired_frames: u64,

    /// 录制期间送入队列的帧
    pub enqueued_frames: u64,

    /// 队列满时被挤掉的最旧帧 (编码跟不上)
    pub evicted_frames: u64,

    /// 成功写入编码器的帧
    pub written_frames: u64,

    /// 属于上一次录制、被编码任务丢弃的帧
    pub stale_frames: u64,

    /// 取帧超时次数 (正常现象)
    pub timeouts: u64,

    /// 设备错误总数
    pub device_errors: u64,

    pub consecutive_device_errors: u64,

    /// 设备已被判定为不可用
    pub unavailable: bool,
}

impl fmt::Debug for CaptureTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureTelemetry")
            .field("acquired", &self.acquired_frames)
            .field("written", &self.written_frames)
            .field("evicted", &self.evicted_frames)
            .field("timeouts", &self.timeouts)
            .field("errors", &self.device_errors)
            .field("unavailable", &self.unavailable)
            .finish()
    }
}

/// 简单的状态指示灯
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceHealthStatus {
    Healthy,
    Warning(HealthIssue),
    Critical(HealthIssue),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthIssue {
    /// 设备丢失，采集已停止
    DeviceLost,
    /// 编码跟不上采集，队列在丢帧
    FrameLoss,
    /// 近期有连续设备错误
    DeviceErrors,
}

impl CaptureTelemetry {
    /// 基于遥测数据简单的健康评估
    pub fn assess_health(&self) -> DeviceHealthStatus {
        if self.unavailable {
            return DeviceHealthStatus::Critical(HealthIssue::DeviceLost);
        }

        if self.consecutive_device_errors > 0 {
            return DeviceHealthStatus::Warning(HealthIssue::DeviceErrors);
        }

        // 丢帧超过 10%
        if self.enqueued_frames > 0 && self.evicted_frames * 10 > self.enqueued_frames {
            return DeviceHealthStatus::Warning(HealthIssue::FrameLoss);
        }

        DeviceHealthStatus::Healthy
    }
}
