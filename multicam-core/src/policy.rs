use crate::convert;
use crate::error::{CaptureError, Result};
use crate::frame::Frame;
use crate::pixel_format::PixelFormat;
use bitflags::bitflags;

/// 转换方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionMethod {
    /// 格式一致，原样透传 (快速路径)
    NoColorProcessing,
    /// 需要重采样 / Demosaic (高开销)
    Quality,
}

/// 一条链路 (采集或显示) 上的格式转换
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conversion {
    pub from: PixelFormat,
    pub to: PixelFormat,
    pub method: ConversionMethod,
}

impl Conversion {
    pub fn between(from: PixelFormat, to: PixelFormat) -> Self {
        let method = if from == to {
            ConversionMethod::NoColorProcessing
        } else {
            ConversionMethod::Quality
        };
        Self { from, to, method }
    }

    pub fn is_passthrough(&self) -> bool {
        self.method == ConversionMethod::NoColorProcessing
    }

    /// 对一帧应用转换 (透传时不拷贝)
    pub fn apply(&self, frame: Frame) -> Result<Frame> {
        convert::convert_frame(frame, self.to)
    }
}

bitflags! {
    /// 哪些链路需要非平凡的转换
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ConversionFlags: u8 {
        const CAPTURE = 0b01;
        const DISPLAY = 0b10;
    }
}

/// 打开流时解析一次，下游只消费这个结构体，不再比较字符串
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FormatResolution {
    pub native: PixelFormat,
    pub capture: Conversion,
    pub display: Conversion,
    /// 采集格式每像素字节数
    pub buffer_multiplier: f64,
}

impl FormatResolution {
    pub fn flags(&self) -> ConversionFlags {
        let mut flags = ConversionFlags::empty();
        if !self.capture.is_passthrough() {
            flags |= ConversionFlags::CAPTURE;
        }
        if !self.display.is_passthrough() {
            flags |= ConversionFlags::DISPLAY;
        }
        flags
    }

    /// 以采集格式存储一帧需要的字节数
    pub fn capture_frame_bytes(&self, width: u32, height: u32) -> usize {
        self.capture.to.frame_bytes(width, height)
    }
}

/// 解析采集/显示格式
///
/// * `requested_capture`: None 表示沿用原生格式
/// * `requested_display`: 只能是 Mono8 或 RGB8
pub fn resolve(
    native: PixelFormat,
    requested_capture: Option<&str>,
    requested_display: &str,
) -> Result<FormatResolution> {
    let capture_format = match requested_capture {
        Some(name) => PixelFormat::from_name(name)?,
        None => native,
    };
    let display_format = PixelFormat::from_name(requested_display)?;

    resolve_formats(native, capture_format, display_format)
}

/// 与 `resolve` 相同，但输入已经是强类型
pub fn resolve_formats(
    native: PixelFormat,
    capture_format: PixelFormat,
    display_format: PixelFormat,
) -> Result<FormatResolution> {
    // 显示格式必须在打开流时就失败，不能等到采集线程里
    if !display_format.is_displayable() {
        return Err(CaptureError::UnsupportedDisplayFormat(display_format));
    }

    for to in [capture_format, display_format] {
        if !convert::is_supported(native, to) {
            return Err(CaptureError::ConversionUnsupported { from: native, to });
        }
    }

    let capture = Conversion::between(native, capture_format);
    let display = Conversion::between(native, display_format);

    if !capture.is_passthrough() {
        tracing::warn!(
            target: "multicam::policy",
            "Capture format {} differs from native {}: every recorded frame will be converted",
            capture_format,
            native
        );
    }
    if !display.is_passthrough() {
        tracing::debug!(
            target: "multicam::policy",
            "Preview converts {} -> {}",
            native,
            display_format
        );
    }

    Ok(FormatResolution {
        native,
        capture,
        display,
        buffer_multiplier: capture_format.bits_per_pixel() as f64 / 8.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_capture_is_fast_path() -> anyhow::Result<()> {
        let res = resolve(PixelFormat::Mono8, Some("Mono8"), "Mono8")?;
        assert_eq!(res.capture.method, ConversionMethod::NoColorProcessing);
        assert!(res.display.is_passthrough());
        assert!(res.flags().is_empty());
        assert_eq!(res.buffer_multiplier, 1.0);
        Ok(())
    }

    #[test]
    fn missing_capture_request_defaults_to_native() -> anyhow::Result<()> {
        let res = resolve(PixelFormat::BayerRG8, None, "RGB8")?;
        assert_eq!(res.capture.to, PixelFormat::BayerRG8);
        assert!(res.capture.is_passthrough());
        assert_eq!(res.flags(), ConversionFlags::DISPLAY);
        Ok(())
    }

    #[test]
    fn differing_capture_format_is_quality() -> anyhow::Result<()> {
        let res = resolve(PixelFormat::BayerRG8, Some("RGB8"), "RGB8")?;
        assert_eq!(res.capture.method, ConversionMethod::Quality);
        assert_eq!(res.flags(), ConversionFlags::CAPTURE | ConversionFlags::DISPLAY);
        assert_eq!(res.buffer_multiplier, 3.0);
        assert_eq!(res.capture_frame_bytes(2, 2), 12);
        Ok(())
    }

    #[test]
    fn display_outside_mono8_rgb8_is_configuration_error() {
        for display in ["Mono16", "BGR8", "BayerRG8", "YCbCr422_8"] {
            let err = resolve(PixelFormat::Mono8, None, display).unwrap_err();
            assert!(
                matches!(err, CaptureError::UnsupportedDisplayFormat(_)),
                "{display} accepted"
            );
            assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
        }
    }

    #[test]
    fn unknown_names_fail_before_conversion() {
        let err = resolve(PixelFormat::Mono8, Some("Mono10p"), "Mono8").unwrap_err();
        assert!(matches!(err, CaptureError::UnsupportedFormat(_)));

        let err = resolve(PixelFormat::Mono8, None, "Grey").unwrap_err();
        assert!(matches!(err, CaptureError::UnsupportedFormat(_)));
    }

    #[test]
    fn unconvertible_capture_target_fails_at_open() {
        let err = resolve(PixelFormat::Mono8, Some("Mono16"), "Mono8").unwrap_err();
        assert!(matches!(
            err,
            CaptureError::ConversionUnsupported {
                from: PixelFormat::Mono8,
                to: PixelFormat::Mono16
            }
        ));
    }
}
