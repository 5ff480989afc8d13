use crate::lock;
use multicam_core::builder::CodecOptions;
use multicam_core::error::{CaptureError, Result};
use multicam_core::frame::Frame;
use multicam_core::traits::{EncoderFactory, EncoderSession};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// 一次录制会话的记录
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub path: PathBuf,
    pub options: CodecOptions,
    /// 按追加顺序记录的帧序号
    pub sequences: Vec<u64>,
    pub bytes_written: usize,
    pub close_calls: u32,
}

#[derive(Debug, Default)]
struct EncoderLog {
    sessions: Vec<SessionRecord>,
    fail_open: bool,
    /// 每个会话写入这么多帧之后，下一次 append 失败
    fail_append_after: Option<usize>,
}

/// 把帧记在内存里的编码器，用作测试替身
///
/// Clone 之后共享同一份日志：一份交给控制器，一份留给测试断言。
#[derive(Debug, Clone, Default)]
pub struct MemoryEncoderFactory {
    log: Arc<Mutex<EncoderLog>>,
}

impl MemoryEncoderFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 之后打开的会话全部失败
    pub fn fail_open(&self, fail: bool) {
        lock(&self.log).fail_open = fail;
    }

    /// 每个会话成功写入 `frames` 帧后，下一次 append 失败
    pub fn fail_append_after(&self, frames: Option<usize>) {
        lock(&self.log).fail_append_after = frames;
    }

    pub fn sessions(&self) -> Vec<SessionRecord> {
        lock(&self.log).sessions.clone()
    }

    pub fn session_count(&self) -> usize {
        lock(&self.log).sessions.len()
    }

    pub fn total_frames(&self) -> usize {
        lock(&self.log)
            .sessions
            .iter()
            .map(|s| s.sequences.len())
            .sum()
    }
}

impl EncoderFactory for MemoryEncoderFactory {
    fn open(&self, path: &Path, options: &CodecOptions) -> Result<Box<dyn EncoderSession>> {
        let mut log = lock(&self.log);
        if log.fail_open {
            return Err(CaptureError::encoder(format!(
                "cannot open {}",
                path.display()
            )));
        }
        log.sessions.push(SessionRecord {
            path: path.to_path_buf(),
            options: *options,
            sequences: Vec::new(),
            bytes_written: 0,
            close_calls: 0,
        });
        Ok(Box::new(MemorySession {
            log: Arc::clone(&self.log),
            index: log.sessions.len() - 1,
        }))
    }
}

#[derive(Debug)]
struct MemorySession {
    log: Arc<Mutex<EncoderLog>>,
    index: usize,
}

impl EncoderSession for MemorySession {
    fn append(&mut self, frame: &Frame) -> Result<()> {
        let mut log = lock(&self.log);
        let limit = log.fail_append_after;
        let record = &mut log.sessions[self.index];
        if limit.is_some_and(|n| record.sequences.len() >= n) {
            return Err(CaptureError::encoder("simulated write failure"));
        }
        record.sequences.push(frame.sequence);
        record.bytes_written += frame.data.len();
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        lock(&self.log).sessions[self.index].close_calls += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use multicam_core::builder::CodecKind;
    use multicam_core::pixel_format::PixelFormat;

    fn options() -> CodecOptions {
        CodecOptions {
            kind: CodecKind::Uncompressed,
            frame_rate: 30.0,
            width: 2,
            height: 2,
            pixel_format: PixelFormat::Mono8,
        }
    }

    fn frame(seq: u64) -> Frame {
        Frame::new(vec![0; 4], 2, 2, PixelFormat::Mono8).with_sequence(seq)
    }

    #[test]
    fn records_frames_and_close() -> anyhow::Result<()> {
        let factory = MemoryEncoderFactory::new();
        let mut session = factory.open(Path::new("a.raw"), &options())?;
        session.append(&frame(3))?;
        session.append(&frame(4))?;
        session.close()?;

        let sessions = factory.sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].sequences, vec![3, 4]);
        assert_eq!(sessions[0].bytes_written, 8);
        assert_eq!(sessions[0].close_calls, 1);
        Ok(())
    }

    #[test]
    fn injected_failures() -> anyhow::Result<()> {
        let factory = MemoryEncoderFactory::new();
        factory.fail_append_after(Some(1));
        let mut session = factory.open(Path::new("b.raw"), &options())?;
        session.append(&frame(0))?;
        assert!(session.append(&frame(1)).is_err());

        factory.fail_open(true);
        assert!(factory.open(Path::new("c.raw"), &options()).is_err());
        assert_eq!(factory.session_count(), 1);
        Ok(())
    }
}
