use crate::builder::{CaptureConfig, CodecOptions};
use crate::error::Result;
use crate::frame::{Frame, StreamProfile};
use crate::pixel_format::PixelFormat;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

/// 设备基本信息
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceInfo {
    /// 型号 (e.g. "acA1300-60gm")
    pub model: String,

    /// 序列号，同型号下唯一
    pub serial: String,

    /// 后端类型标识 (e.g. "GigE", "Simulation")
    pub backend: String,

    /// 硬件总线信息 (可选，e.g. "usb-0000:00:14.0-1")
    pub bus_info: Option<String>,
}

impl DeviceInfo {
    pub fn new(model: impl Into<String>, serial: impl Into<String>, backend: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            serial: serial.into(),
            backend: backend.into(),
            bus_info: None,
        }
    }

    /// 配置文件中的分区名："型号 序列号"
    pub fn identity(&self) -> String {
        format!("{} {}", self.model, self.serial)
    }
}

/// 触发配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serialize", serde(default))]
pub struct TriggerConfig {
    /// 触发模式
    pub mode: TriggerMode,

    /// 硬件触发线 (仅 Hardware 模式有效)
    pub source: TriggerSource,

    /// 触发极性/边缘
    pub polarity: TriggerPolarity,

    /// 触发延迟 (微秒)，硬件接收信号后延迟多久开始曝光
    pub delay_us: u32,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            mode: TriggerMode::Off,
            source: TriggerSource::Line0,
            polarity: TriggerPolarity::RisingEdge,
            delay_us: 0,
        }
    }
}

impl TriggerConfig {
    pub fn hardware(source: TriggerSource, polarity: TriggerPolarity) -> Self {
        Self {
            mode: TriggerMode::Hardware,
            source,
            polarity,
            delay_us: 0,
        }
    }

    pub fn software() -> Self {
        Self {
            mode: TriggerMode::Software,
            ..Self::default()
        }
    }
}

/// 触发模式枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub enum TriggerMode {
    /// 关闭触发，连续采集 (Free Run)
    Off,
    /// 软件触发 (通过 API 调用触发)
    Software,
    /// 外部硬件线路触发
    Hardware,
}

/// 硬件触发线
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub enum TriggerSource {
    /// 外部硬件线路 0 (GPIO / Opto-isolated Input)
    Line0,
    Line1,
    Line2,
    Line3,
}

/// 触发极性/边缘枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub enum TriggerPolarity {
    /// 上升沿触发
    RisingEdge,
    /// 下降沿触发
    FallingEdge,
}

/// 从设备读回的实际参数 (设备可能把请求值取整或截断)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct CameraParameters {
    pub frame_rate: f64,
    pub gain: f64,
    pub exposure_us: f64,
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
}

// --- 核心 Trait 定义 ---

/// 1. 驱动入口：设备枚举与连接
pub trait Driver: Send + Sync {
    /// 扫描总线，返回设备列表
    fn list_devices(&self) -> Result<Vec<DeviceInfo>>;

    /// 连接设备 (此时还没有打开流)
    fn connect(&self, info: &DeviceInfo) -> Result<Box<dyn FrameSource>>;
}

/// 2. 控制面：同步的参数读写
pub trait SourceControls: Send {
    fn set_frame_rate(&mut self, fps: f64) -> Result<()>;
    fn frame_rate(&self) -> Result<f64>;

    fn set_exposure(&mut self, exposure_us: f64) -> Result<()>;
    fn exposure(&self) -> Result<f64>;

    fn set_gain(&mut self, gain: f64) -> Result<()>;
    fn gain(&self) -> Result<f64>;

    fn set_flip(&mut self, horizontal: bool, vertical: bool) -> Result<()>;
    fn flip(&self) -> Result<(bool, bool)>;

    /// 设置触发模式
    fn set_trigger(&mut self, config: TriggerConfig) -> Result<()>;

    /// 把一份配置快照下发到设备
    fn apply_config(&mut self, config: &CaptureConfig) -> Result<()> {
        self.set_trigger(config.trigger)?;
        self.set_frame_rate(config.target_frame_rate)?;
        self.set_exposure(config.exposure_us)?;
        self.set_gain(config.gain)?;
        self.set_flip(config.flip_horizontal, config.flip_vertical)
    }

    /// 读回设备上的实际参数
    fn read_parameters(&self) -> Result<CameraParameters> {
        let (flip_horizontal, flip_vertical) = self.flip()?;
        Ok(CameraParameters {
            frame_rate: self.frame_rate()?,
            gain: self.gain()?,
            exposure_us: self.exposure()?,
            flip_horizontal,
            flip_vertical,
        })
    }
}

/// 3. 数据面：一台物理相机
/// 必须是 Send，以便移动进 Tokio 任务
#[async_trait]
pub trait FrameSource: SourceControls {
    fn info(&self) -> &DeviceInfo;

    /// 打开设备 (分配句柄)
    async fn open(&mut self) -> Result<()>;

    /// 关闭设备，重复调用无副作用
    async fn close(&mut self) -> Result<()>;

    /// 打开后有效：分辨率、原生格式、原生帧率
    fn stream_profile(&self) -> Result<StreamProfile>;

    /// 启动采集 (Start DMA)
    async fn begin_streaming(&mut self) -> Result<()>;

    /// 停止采集
    async fn end_streaming(&mut self) -> Result<()>;

    /// 获取下一帧，最多等待 `timeout`
    /// 超时返回 `CaptureError::Timeout`
    async fn fetch_next_frame(&mut self, timeout: Duration) -> Result<Frame>;
}

/// 4. 编码器：每次录制打开一个会话
pub trait EncoderFactory: Send + Sync {
    fn open(&self, path: &Path, options: &CodecOptions) -> Result<Box<dyn EncoderSession>>;
}

pub trait EncoderSession: Send {
    /// 追加一帧 (阻塞操作，在 blocking 线程池中调用)
    fn append(&mut self, frame: &Frame) -> Result<()>;

    /// 写尾并关闭文件。消耗 self，保证只关闭一次。
    fn close(self: Box<Self>) -> Result<()>;
}

/// 5. 预览：接收已转换到显示格式的帧
pub trait PreviewSink: Send {
    fn present_frame(&mut self, format: PixelFormat, width: u32, height: u32, data: &[u8]);
}

pub trait PreviewFactory: Send + Sync {
    fn sink_for(&self, info: &DeviceInfo) -> Box<dyn PreviewSink>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_model_and_serial() {
        let info = DeviceInfo::new("acA1300-60gm", "21234567", "GigE");
        assert_eq!(info.identity(), "acA1300-60gm 21234567");
    }

    #[test]
    fn trigger_defaults_to_free_run() {
        let trigger = TriggerConfig::default();
        assert_eq!(trigger.mode, TriggerMode::Off);
        let hw = TriggerConfig::hardware(TriggerSource::Line2, TriggerPolarity::FallingEdge);
        assert_eq!(hw.mode, TriggerMode::Hardware);
        assert_eq!(hw.source, TriggerSource::Line2);
        assert_eq!(TriggerConfig::software().mode, TriggerMode::Software);
    }
}
