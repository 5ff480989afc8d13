use crate::pixel_format::PixelFormat;
use std::time::Duration;

/// 非标准尺寸帧的额外余量 (字节)
pub const FRAME_PADDING_BYTES: usize = 512;

/// 核心帧结构体
///
/// 与驱动层的借用帧不同，这里的 Frame 拥有自己的数据：
/// 采集任务产生它，入队时所有权转移给队列，编码任务消费一次后释放。
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// 原始图像数据 (Packed，无行尾 padding)
    pub data: Vec<u8>,

    /// 图像宽度 (Pixels)
    pub width: u32,

    /// 图像高度 (Pixels)
    pub height: u32,

    /// 数据对应的像素格式
    pub format: PixelFormat,

    /// 帧序号 (由 FrameSource 单调递增分配，用于丢帧统计)
    pub sequence: u64,

    /// 相对采集开始的时间戳
    pub timestamp: Duration,

    /// 帧级元数据 (曝光、增益)
    pub metadata: FrameMetadata,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameMetadata {
    pub actual_exposure_us: Option<f64>,
    pub actual_gain_db: Option<f64>,
    pub trigger_fired: bool,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            data,
            width,
            height,
            format,
            sequence: 0,
            timestamp: Duration::ZERO,
            metadata: FrameMetadata::default(),
        }
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn with_timestamp(mut self, timestamp: Duration) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// 数据长度是否与格式/尺寸一致
    pub fn is_complete(&self) -> bool {
        self.data.len() >= self.format.frame_bytes(self.width, self.height)
    }
}

/// 相机打开时确定的流参数，在相机重新打开前保持不变
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamProfile {
    pub width: u32,
    pub height: u32,
    pub native_frame_rate: f64,
    pub native_format: PixelFormat,
    /// width × height × bpp(native) + FRAME_PADDING_BYTES
    pub frame_byte_size: usize,
}

impl StreamProfile {
    pub fn new(width: u32, height: u32, native_frame_rate: f64, native_format: PixelFormat) -> Self {
        Self {
            width,
            height,
            native_frame_rate,
            native_format,
            frame_byte_size: native_format.frame_bytes(width, height) + FRAME_PADDING_BYTES,
        }
    }

    /// 流带宽 (字节/秒)
    pub fn bandwidth(&self) -> f64 {
        self.frame_byte_size as f64 * self.native_frame_rate.max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_byte_size_includes_padding() {
        let mono = StreamProfile::new(640, 480, 30.0, PixelFormat::Mono8);
        assert_eq!(mono.frame_byte_size, 640 * 480 + FRAME_PADDING_BYTES);

        let rgb = StreamProfile::new(1280, 1024, 60.0, PixelFormat::Rgb8);
        assert_eq!(rgb.frame_byte_size, 1280 * 1024 * 3 + FRAME_PADDING_BYTES);
    }

    #[test]
    fn completeness_checks_payload_length() {
        let frame = Frame::new(vec![0; 12], 4, 3, PixelFormat::Mono8);
        assert!(frame.is_complete());
        let short = Frame::new(vec![0; 11], 4, 3, PixelFormat::Mono8);
        assert!(!short.is_complete());
    }
}
