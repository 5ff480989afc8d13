use crate::pixel_format::PixelFormat;
use thiserror::Error;

/// 错误分类，用于上层决定处理策略 (排除相机 / 重试 / 结束录制)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// 配置错误：格式不支持、显示格式非法。打开相机时致命。
    Configuration,
    /// 设备错误：FrameSource 调用失败。瞬时错误会重试。
    Device,
    /// 取帧超时：正常现象，直接重试。
    Timeout,
    /// 编码器错误：只终止当前录制会话。
    Encoder,
    /// 资源分配错误：没有相机 / 总权重为零。
    Allocation,
    /// 状态机调用顺序错误 (重复 start、越界索引等)。
    State,
    /// 底层 IO 错误。
    Io,
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Unsupported pixel format: {0}")]
    UnsupportedFormat(String),

    #[error("Display format {0} is not supported: the renderer accepts Mono8 or RGB8 only")]
    UnsupportedDisplayFormat(PixelFormat),

    #[error("Pixel conversion {from} -> {to} is not supported")]
    ConversionUnsupported { from: PixelFormat, to: PixelFormat },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Device error: {message}")]
    Device {
        message: String,
        /// 永久性故障 (断线、句柄失效)，重试没有意义
        permanent: bool,
    },

    #[error("Frame fetch timed out")]
    Timeout,

    #[error("Encoder error: {0}")]
    Encoder(String),

    #[error("No cameras available")]
    NoCamerasAvailable,

    #[error("Resource allocation failed: {0}")]
    Allocation(String),

    #[error("Capture is already running")]
    AlreadyCapturing,

    #[error("Previous recording is still draining")]
    StillDraining,

    #[error("Acquisition is not running")]
    NotAcquiring,

    #[error("Acquisition is already running")]
    AlreadyAcquiring,

    #[error("Camera index {index} out of range (fleet has {len} cameras)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Camera is closed")]
    Closed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CaptureError {
    /// 瞬时设备错误
    pub fn device(message: impl Into<String>) -> Self {
        Self::Device {
            message: message.into(),
            permanent: false,
        }
    }

    /// 永久设备错误 (例如设备被拔出)
    pub fn device_lost(message: impl Into<String>) -> Self {
        Self::Device {
            message: message.into(),
            permanent: true,
        }
    }

    pub fn encoder(message: impl std::fmt::Display) -> Self {
        Self::Encoder(message.to_string())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedFormat(_)
            | Self::UnsupportedDisplayFormat(_)
            | Self::ConversionUnsupported { .. }
            | Self::Configuration(_) => ErrorKind::Configuration,
            Self::Device { .. } => ErrorKind::Device,
            Self::Timeout => ErrorKind::Timeout,
            Self::Encoder(_) => ErrorKind::Encoder,
            Self::NoCamerasAvailable | Self::Allocation(_) => ErrorKind::Allocation,
            Self::AlreadyCapturing
            | Self::StillDraining
            | Self::NotAcquiring
            | Self::AlreadyAcquiring
            | Self::IndexOutOfRange { .. }
            | Self::Closed => ErrorKind::State,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Device { permanent: true, .. })
    }
}

pub type Result<T> = std::result::Result<T, CaptureError>;
