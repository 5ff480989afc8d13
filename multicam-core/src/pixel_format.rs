use crate::error::{CaptureError, Result};
use std::fmt::{self, Display};
use std::str::FromStr;

/// 相机原生像素格式 (GenICam PFNC 命名)
///
/// 枚举顺序与 `FORMAT_TABLE` 一一对应，`spec()` 直接按下标查表。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum PixelFormat {
    Mono8 = 0,
    Mono12Packed,
    Mono16,
    Rgb8,
    Bgr8,
    BayerRG8,
    BayerGB8,
    BayerGR8,
    BayerBG8,
    BayerRG16,
    /// 4:4:4，每像素 Cb Y Cr 三个字节
    YCbCr8CbYCr,
    /// 4:2:2，Y0 Cb Y1 Cr
    YCbCr422_8,
    /// 4:1:1，Cb Y0 Y1 Cr Y2 Y3
    YCbCr411_8,
}

/// 像素格式描述表中的一项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormatSpec {
    pub format: PixelFormat,
    /// 配置文件与日志中使用的名字
    pub name: &'static str,
    /// 每像素比特数 (Packed 格式不是 8 的整数倍)
    pub bits_per_pixel: u32,
    pub is_color: bool,
    /// 渲染器能接受的最近格式 (只有 Mono8 / RGB8 两种)
    pub display_format: PixelFormat,
}

const fn entry(
    format: PixelFormat,
    name: &'static str,
    bits_per_pixel: u32,
    is_color: bool,
) -> PixelFormatSpec {
    PixelFormatSpec {
        format,
        name,
        bits_per_pixel,
        is_color,
        display_format: if is_color {
            PixelFormat::Rgb8
        } else {
            PixelFormat::Mono8
        },
    }
}

/// 全部支持的格式。顺序必须与 `PixelFormat` 的判别值一致。
pub const FORMAT_TABLE: [PixelFormatSpec; 13] = [
    entry(PixelFormat::Mono8, "Mono8", 8, false),
    entry(PixelFormat::Mono12Packed, "Mono12Packed", 12, false),
    entry(PixelFormat::Mono16, "Mono16", 16, false),
    entry(PixelFormat::Rgb8, "RGB8", 24, true),
    entry(PixelFormat::Bgr8, "BGR8", 24, true),
    entry(PixelFormat::BayerRG8, "BayerRG8", 8, true),
    entry(PixelFormat::BayerGB8, "BayerGB8", 8, true),
    entry(PixelFormat::BayerGR8, "BayerGR8", 8, true),
    entry(PixelFormat::BayerBG8, "BayerBG8", 8, true),
    entry(PixelFormat::BayerRG16, "BayerRG16", 16, true),
    entry(PixelFormat::YCbCr8CbYCr, "YCbCr8_CbYCr", 24, true),
    entry(PixelFormat::YCbCr422_8, "YCbCr422_8", 16, true),
    entry(PixelFormat::YCbCr411_8, "YCbCr411_8", 12, true),
];

impl PixelFormat {
    /// 查表，O(1)
    pub const fn spec(self) -> &'static PixelFormatSpec {
        &FORMAT_TABLE[self as usize]
    }

    pub const fn name(self) -> &'static str {
        self.spec().name
    }

    pub const fn bits_per_pixel(self) -> u32 {
        self.spec().bits_per_pixel
    }

    pub const fn is_color(self) -> bool {
        self.spec().is_color
    }

    pub const fn display_format(self) -> PixelFormat {
        self.spec().display_format
    }

    /// 判断是否为 Bayer 原始格式 (需要 Demosaic)
    pub fn is_bayer(self) -> bool {
        matches!(
            self,
            Self::BayerRG8 | Self::BayerGB8 | Self::BayerGR8 | Self::BayerBG8 | Self::BayerRG16
        )
    }

    /// 渲染器只接受这两种格式
    pub fn is_displayable(self) -> bool {
        matches!(self, Self::Mono8 | Self::Rgb8)
    }

    /// 一帧图像数据的字节数 (不含 padding)
    pub fn frame_bytes(self, width: u32, height: u32) -> usize {
        let bits = width as u64 * height as u64 * self.bits_per_pixel() as u64;
        bits.div_ceil(8) as usize
    }

    /// 按名字查找 (大小写不敏感)
    pub fn from_name(name: &str) -> Result<Self> {
        let name = name.trim();
        FORMAT_TABLE
            .iter()
            .find(|spec| spec.name.eq_ignore_ascii_case(name))
            .map(|spec| spec.format)
            .ok_or_else(|| CaptureError::UnsupportedFormat(name.to_string()))
    }

    /// 由判别值还原 (与 `as u8` 互逆)
    pub fn from_index(index: u8) -> Option<Self> {
        FORMAT_TABLE.get(index as usize).map(|spec| spec.format)
    }

    pub fn all() -> impl Iterator<Item = PixelFormat> {
        FORMAT_TABLE.iter().map(|spec| spec.format)
    }
}

impl Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PixelFormat {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_name(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_order_matches_discriminants() {
        for (i, spec) in FORMAT_TABLE.iter().enumerate() {
            assert_eq!(spec.format as usize, i, "{} is out of order", spec.name);
            assert_eq!(PixelFormat::from_index(i as u8), Some(spec.format));
        }
        assert_eq!(PixelFormat::from_index(FORMAT_TABLE.len() as u8), None);
    }

    #[test]
    fn names_round_trip_case_insensitively() -> anyhow::Result<()> {
        for format in PixelFormat::all() {
            assert_eq!(PixelFormat::from_name(format.name())?, format);
            let lower = format.name().to_ascii_lowercase();
            assert_eq!(lower.parse::<PixelFormat>()?, format);
        }
        Ok(())
    }

    #[test]
    fn unknown_name_is_unsupported() {
        let err = PixelFormat::from_name("Mono10p").unwrap_err();
        assert!(matches!(err, CaptureError::UnsupportedFormat(ref n) if n == "Mono10p"));
    }

    #[test]
    fn display_formats_are_mono8_or_rgb8() {
        for format in PixelFormat::all() {
            assert!(format.display_format().is_displayable());
            assert_eq!(format.display_format() == PixelFormat::Rgb8, format.is_color());
        }
    }

    #[test]
    fn packed_frame_sizes() {
        assert_eq!(PixelFormat::Mono8.frame_bytes(640, 480), 307_200);
        assert_eq!(PixelFormat::Rgb8.frame_bytes(640, 480), 921_600);
        assert_eq!(PixelFormat::Mono12Packed.frame_bytes(4, 2), 12);
        assert_eq!(PixelFormat::YCbCr411_8.frame_bytes(4, 1), 6);
    }
}
