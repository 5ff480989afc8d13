use crate::error::{CaptureError, Result};
use crate::pixel_format::PixelFormat;
use crate::traits::TriggerConfig;

#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

/// 编码方式
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serialize", serde(tag = "kind", rename_all = "snake_case"))]
pub enum CodecKind {
    /// 原始帧直接落盘
    Uncompressed,
    /// 帧内压缩 (每帧一个 JPEG)
    Mjpeg { quality: u8 },
    /// 帧间压缩
    H264 { bitrate: u32 },
}

impl CodecKind {
    pub const DEFAULT_MJPEG_QUALITY: u8 = 75;
    pub const DEFAULT_H264_BITRATE: u32 = 1_000_000;

    pub fn mjpeg() -> Self {
        Self::Mjpeg {
            quality: Self::DEFAULT_MJPEG_QUALITY,
        }
    }

    pub fn h264() -> Self {
        Self::H264 {
            bitrate: Self::DEFAULT_H264_BITRATE,
        }
    }
}

impl Default for CodecKind {
    fn default() -> Self {
        Self::mjpeg()
    }
}

/// 打开编码会话时传给 EncoderFactory 的参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CodecOptions {
    pub kind: CodecKind,
    pub frame_rate: f64,
    pub width: u32,
    pub height: u32,
    /// 写入文件的像素格式 (即采集格式)
    pub pixel_format: PixelFormat,
}

/// 单台相机的采集配置
///
/// 控制器持有一份快照，只能通过 `apply_config` 整体替换。
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serialize", serde(default))]
pub struct CaptureConfig {
    pub target_frame_rate: f64,
    pub gain: f64,
    pub exposure_us: f64,
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
    /// None 表示使用相机原生格式
    pub capture_pixel_format: Option<String>,
    pub display_pixel_format: String,
    pub output_path: String,
    pub filename_prefix: String,
    pub filename_suffix: String,
    pub codec: CodecKind,
    pub trigger: TriggerConfig,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureConfig {
    pub const DEFAULT_FRAME_RATE: f64 = 25.0;
    pub const DEFAULT_EXPOSURE_US: f64 = 39_000.0;

    pub fn new() -> Self {
        Self {
            target_frame_rate: Self::DEFAULT_FRAME_RATE,
            gain: 0.0,
            exposure_us: Self::DEFAULT_EXPOSURE_US,
            flip_horizontal: false,
            flip_vertical: false,
            capture_pixel_format: None,
            display_pixel_format: PixelFormat::Mono8.name().to_string(),
            output_path: ".".to_string(),
            filename_prefix: "Camera_".to_string(),
            filename_suffix: "mjpeg".to_string(),
            codec: CodecKind::default(),
            trigger: TriggerConfig::default(),
        }
    }

    pub fn frame_rate(mut self, fps: f64) -> Self {
        self.target_frame_rate = fps;
        self
    }

    pub fn gain(mut self, gain: f64) -> Self {
        self.gain = gain;
        self
    }

    pub fn exposure(mut self, exposure_us: f64) -> Self {
        self.exposure_us = exposure_us;
        self
    }

    pub fn flip(mut self, horizontal: bool, vertical: bool) -> Self {
        self.flip_horizontal = horizontal;
        self.flip_vertical = vertical;
        self
    }

    /// 【可选】录制时使用的像素格式，默认为原生格式
    pub fn capture_format(mut self, name: impl Into<String>) -> Self {
        self.capture_pixel_format = Some(name.into());
        self
    }

    pub fn display_format(mut self, name: impl Into<String>) -> Self {
        self.display_pixel_format = name.into();
        self
    }

    pub fn output(mut self, path: impl Into<String>) -> Self {
        self.output_path = path.into();
        self
    }

    pub fn filename(mut self, prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        self.filename_prefix = prefix.into();
        self.filename_suffix = suffix.into();
        self
    }

    pub fn codec(mut self, codec: CodecKind) -> Self {
        self.codec = codec;
        self
    }

    pub fn trigger(mut self, trigger: TriggerConfig) -> Self {
        self.trigger = trigger;
        self
    }

    /// 范围检查
    ///
    /// 曝光时间必须能放进一帧：exposure_us × fps < 10^7 (留 10 倍余量)
    pub fn validate(&self) -> Result<()> {
        if !(self.target_frame_rate.is_finite() && self.target_frame_rate > 0.0) {
            return Err(CaptureError::Configuration(format!(
                "frame rate must be positive, got {}",
                self.target_frame_rate
            )));
        }
        if !(self.exposure_us.is_finite() && self.exposure_us > 0.0) {
            return Err(CaptureError::Configuration(format!(
                "exposure must be positive, got {} us",
                self.exposure_us
            )));
        }
        if self.exposure_us * self.target_frame_rate >= 1.0e7 {
            return Err(CaptureError::Configuration(format!(
                "exposure {} us does not fit into a frame at {} fps",
                self.exposure_us, self.target_frame_rate
            )));
        }
        if !(self.gain.is_finite() && self.gain >= 0.0) {
            return Err(CaptureError::Configuration(format!(
                "gain must be non-negative, got {}",
                self.gain
            )));
        }
        match self.codec {
            CodecKind::Mjpeg { quality } if quality == 0 || quality > 100 => {
                return Err(CaptureError::Configuration(format!(
                    "MJPEG quality must be within 1..=100, got {quality}"
                )));
            }
            CodecKind::H264 { bitrate: 0 } => {
                return Err(CaptureError::Configuration(
                    "H.264 bitrate must be positive".to_string(),
                ));
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_values() {
        let cfg = CaptureConfig::default();
        assert_eq!(cfg.target_frame_rate, 25.0);
        assert_eq!(cfg.exposure_us, 39_000.0);
        assert_eq!(cfg.gain, 0.0);
        assert_eq!(cfg.display_pixel_format, "Mono8");
        assert_eq!(cfg.filename_prefix, "Camera_");
        assert_eq!(cfg.codec, CodecKind::Mjpeg { quality: 75 });
        assert!(cfg.capture_pixel_format.is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn builder_chains() {
        let cfg = CaptureConfig::new()
            .frame_rate(60.0)
            .exposure(1000.0)
            .capture_format("RGB8")
            .display_format("RGB8")
            .codec(CodecKind::Uncompressed)
            .flip(true, false);
        assert_eq!(cfg.target_frame_rate, 60.0);
        assert_eq!(cfg.capture_pixel_format.as_deref(), Some("RGB8"));
        assert!(cfg.flip_horizontal && !cfg.flip_vertical);
    }

    #[test]
    fn exposure_must_fit_frame_period() {
        // 25 fps × 400000 us = 1e7
        let cfg = CaptureConfig::new().exposure(400_000.0);
        assert!(matches!(cfg.validate(), Err(CaptureError::Configuration(_))));

        let cfg = CaptureConfig::new().exposure(399_000.0);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn invalid_codec_settings_rejected() {
        let cfg = CaptureConfig::new().codec(CodecKind::Mjpeg { quality: 0 });
        assert!(cfg.validate().is_err());
        let cfg = CaptureConfig::new().codec(CodecKind::H264 { bitrate: 0 });
        assert!(cfg.validate().is_err());
        assert!(CaptureConfig::new().frame_rate(0.0).validate().is_err());
    }
}
