use image::codecs::jpeg::JpegEncoder;
use image::ColorType;
use multicam_core::builder::CodecOptions;
use multicam_core::convert;
use multicam_core::error::{CaptureError, Result};
use multicam_core::frame::Frame;
use multicam_core::pixel_format::PixelFormat;
use multicam_core::traits::EncoderSession;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// 帧内压缩：每帧一张 JPEG，首尾相接 (MJPEG 基本流)
///
/// JPEG 只接受灰度或 RGB，其它格式先转换到对应的显示格式。
#[derive(Debug)]
pub struct MjpegWriter {
    out: BufWriter<File>,
    quality: u8,
}

impl MjpegWriter {
    pub fn create(path: &Path, options: &CodecOptions, quality: u8) -> Result<Self> {
        tracing::debug!(
            target: "multicam::videoio",
            "MJPEG {}x{} {} q={} -> {}",
            options.width,
            options.height,
            options.pixel_format,
            quality,
            path.display()
        );
        Ok(Self {
            out: BufWriter::new(File::create(path)?),
            quality: quality.clamp(1, 100),
        })
    }
}

impl EncoderSession for MjpegWriter {
    fn append(&mut self, frame: &Frame) -> Result<()> {
        // 1. 统一到 JPEG 能接受的格式
        let target = frame.format.display_format();
        let converted;
        let pixels: &[u8] = if frame.format == target {
            &frame.data
        } else {
            converted =
                convert::convert_pixels(&frame.data, frame.width, frame.height, frame.format, target)?;
            &converted
        };

        let color = match target {
            PixelFormat::Rgb8 => ColorType::Rgb8,
            _ => ColorType::L8,
        };

        // 2. 压缩并追加
        let expected = target.frame_bytes(frame.width, frame.height);
        JpegEncoder::new_with_quality(&mut self.out, self.quality)
            .encode(&pixels[..expected.min(pixels.len())], frame.width, frame.height, color)
            .map_err(CaptureError::encoder)
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use multicam_core::builder::CodecKind;

    #[test]
    fn every_frame_becomes_a_jpeg() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("Camera_1.mjpeg");
        let options = CodecOptions {
            kind: CodecKind::mjpeg(),
            frame_rate: 25.0,
            width: 8,
            height: 8,
            pixel_format: PixelFormat::BayerRG8,
        };

        let mut writer: Box<dyn EncoderSession> = Box::new(MjpegWriter::create(&path, &options, 75)?);
        for seq in 0..2u64 {
            let data = (0..64).map(|i| (i * 4) as u8).collect();
            writer.append(&Frame::new(data, 8, 8, PixelFormat::BayerRG8).with_sequence(seq))?;
        }
        writer.close()?;

        let bytes = std::fs::read(&path)?;
        // 两帧：至少两个 SOI 标记，以 EOI 结尾
        let soi = bytes.windows(2).filter(|w| *w == [0xFF, 0xD8]).count();
        assert!(soi >= 2);
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        assert_eq!(&bytes[bytes.len() - 2..], &[0xFF, 0xD9]);
        Ok(())
    }

    #[test]
    fn mono_frames_encode_as_grayscale() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("mono.mjpeg");
        let options = CodecOptions {
            kind: CodecKind::mjpeg(),
            frame_rate: 25.0,
            width: 4,
            height: 4,
            pixel_format: PixelFormat::Mono8,
        };
        let mut writer = MjpegWriter::create(&path, &options, 90)?;
        writer.append(&Frame::new(vec![128; 16], 4, 4, PixelFormat::Mono8))?;
        Box::new(writer).close()?;

        let img = image::load_from_memory(&std::fs::read(&path)?)?;
        assert_eq!((img.width(), img.height()), (4, 4));
        assert_eq!(img.color(), ColorType::L8);
        Ok(())
    }
}
