//! 未压缩录制格式
//!
//! ```text
//! header: "MCRAW1\0\0" | width u32 | height u32 | format u8 | 0u8 × 3 | fps f64
//! frame : sequence u64 | timestamp_us u64 | len u32 | data[len]
//! ```
//! 全部小端。

use multicam_core::builder::CodecOptions;
use multicam_core::error::{CaptureError, Result};
use multicam_core::frame::Frame;
use multicam_core::pixel_format::PixelFormat;
use multicam_core::traits::EncoderSession;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::time::Duration;

pub const MAGIC: &[u8; 8] = b"MCRAW1\0\0";

#[derive(Debug)]
pub struct RawWriter {
    out: BufWriter<File>,
    options: CodecOptions,
}

impl RawWriter {
    pub fn create(path: &Path, options: &CodecOptions) -> Result<Self> {
        let mut out = BufWriter::new(File::create(path)?);
        out.write_all(MAGIC)?;
        out.write_all(&options.width.to_le_bytes())?;
        out.write_all(&options.height.to_le_bytes())?;
        out.write_all(&[options.pixel_format as u8, 0, 0, 0])?;
        out.write_all(&options.frame_rate.to_le_bytes())?;
        Ok(Self {
            out,
            options: *options,
        })
    }
}

impl EncoderSession for RawWriter {
    fn append(&mut self, frame: &Frame) -> Result<()> {
        if frame.format != self.options.pixel_format {
            return Err(CaptureError::Encoder(format!(
                "frame is {}, stream was opened as {}",
                frame.format, self.options.pixel_format
            )));
        }
        let len = u32::try_from(frame.data.len())
            .map_err(|_| CaptureError::encoder("frame larger than 4 GiB"))?;

        self.out.write_all(&frame.sequence.to_le_bytes())?;
        self.out
            .write_all(&(frame.timestamp.as_micros() as u64).to_le_bytes())?;
        self.out.write_all(&len.to_le_bytes())?;
        self.out.write_all(&frame.data)?;
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        self.out.flush()?;
        self.out.get_ref().sync_all()?;
        Ok(())
    }
}

/// 读取整个录制文件 (离线校验用)
pub fn read_all(mut input: impl Read) -> Result<(CodecOptions, Vec<Frame>)> {
    let mut header = [0u8; 28];
    input.read_exact(&mut header)?;
    if &header[..8] != MAGIC {
        return Err(CaptureError::encoder("not a raw multicam recording"));
    }
    let width = u32::from_le_bytes(field(&header[8..12]));
    let height = u32::from_le_bytes(field(&header[12..16]));
    let format = PixelFormat::from_index(header[16])
        .ok_or_else(|| CaptureError::encoder(format!("unknown pixel format id {}", header[16])))?;
    let frame_rate = f64::from_le_bytes(field(&header[20..28]));

    let options = CodecOptions {
        kind: multicam_core::builder::CodecKind::Uncompressed,
        frame_rate,
        width,
        height,
        pixel_format: format,
    };

    let mut frames = Vec::new();
    loop {
        let mut prefix = [0u8; 20];
        match input.read_exact(&mut prefix) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let sequence = u64::from_le_bytes(field(&prefix[0..8]));
        let timestamp_us = u64::from_le_bytes(field(&prefix[8..16]));
        let len = u32::from_le_bytes(field(&prefix[16..20])) as usize;
        let mut data = vec![0u8; len];
        input.read_exact(&mut data)?;
        frames.push(
            Frame::new(data, width, height, format)
                .with_sequence(sequence)
                .with_timestamp(Duration::from_micros(timestamp_us)),
        );
    }
    Ok((options, frames))
}

fn field<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use multicam_core::builder::CodecKind;

    #[test]
    fn recorded_frames_read_back_in_order() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("Camera_1.raw");
        let options = CodecOptions {
            kind: CodecKind::Uncompressed,
            frame_rate: 30.0,
            width: 3,
            height: 2,
            pixel_format: PixelFormat::Mono8,
        };

        let mut writer: Box<dyn EncoderSession> = Box::new(RawWriter::create(&path, &options)?);
        for seq in 0..3u64 {
            let frame = Frame::new(vec![seq as u8; 6], 3, 2, PixelFormat::Mono8)
                .with_sequence(seq)
                .with_timestamp(Duration::from_millis(seq * 33));
            writer.append(&frame)?;
        }
        writer.close()?;

        let (read_options, frames) = read_all(File::open(&path)?)?;
        assert_eq!(read_options, options);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[2].sequence, 2);
        assert_eq!(frames[2].timestamp, Duration::from_millis(66));
        assert_eq!(frames[1].data, vec![1u8; 6]);
        Ok(())
    }

    #[test]
    fn format_mismatch_is_rejected() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let options = CodecOptions {
            kind: CodecKind::Uncompressed,
            frame_rate: 30.0,
            width: 1,
            height: 1,
            pixel_format: PixelFormat::Mono8,
        };
        let mut writer = RawWriter::create(&dir.path().join("x.raw"), &options)?;
        let rgb = Frame::new(vec![0; 3], 1, 1, PixelFormat::Rgb8);
        assert!(writer.append(&rgb).is_err());
        Ok(())
    }
}
