//! 录制文件：文件名规则与编码器实现

pub mod mjpeg;
pub mod raw;

use chrono::NaiveDateTime;
use multicam_core::builder::{CodecKind, CodecOptions};
use multicam_core::error::{CaptureError, Result};
use multicam_core::traits::{EncoderFactory, EncoderSession};
use std::path::{Path, PathBuf};

/// 文件名中时间戳的格式 (精确到秒)
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// `{prefix}{serial}.{YYYYMMDD_HHMMSS}.{suffix}`
///
/// 纯函数。同一秒内对同一台相机调用两次会得到相同的名字，
/// 去重由 [`recording_path`] 负责。
pub fn recording_filename(prefix: &str, serial: &str, suffix: &str, at: NaiveDateTime) -> String {
    format!("{prefix}{serial}.{}.{suffix}", at.format(TIMESTAMP_FORMAT))
}

/// 在 `dir` 下生成不与现有文件冲突的录制路径
///
/// 冲突时在时间戳后追加 `-1`、`-2` …
pub fn recording_path(
    dir: &Path,
    prefix: &str,
    serial: &str,
    suffix: &str,
    at: NaiveDateTime,
) -> PathBuf {
    let candidate = dir.join(recording_filename(prefix, serial, suffix, at));
    if !candidate.exists() {
        return candidate;
    }

    let stamp = at.format(TIMESTAMP_FORMAT).to_string();
    (1u32..)
        .map(|n| dir.join(format!("{prefix}{serial}.{stamp}-{n}.{suffix}")))
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}

/// 写真实文件的编码器工厂
///
/// * `Uncompressed` → [`raw::RawWriter`]
/// * `Mjpeg` → [`mjpeg::MjpegWriter`]
/// * `H264` → 未链接帧间编码器，打开即失败
#[derive(Debug, Clone, Copy, Default)]
pub struct FileEncoderFactory;

impl FileEncoderFactory {
    pub fn new() -> Self {
        Self
    }
}

impl EncoderFactory for FileEncoderFactory {
    fn open(&self, path: &Path, options: &CodecOptions) -> Result<Box<dyn EncoderSession>> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }

        match options.kind {
            CodecKind::Uncompressed => Ok(Box::new(raw::RawWriter::create(path, options)?)),
            CodecKind::Mjpeg { quality } => {
                Ok(Box::new(mjpeg::MjpegWriter::create(path, options, quality)?))
            }
            CodecKind::H264 { bitrate } => Err(CaptureError::Encoder(format!(
                "H.264 ({bitrate} bit/s) is not available in this build, choose mjpeg or uncompressed"
            ))),
        }
    }
}
