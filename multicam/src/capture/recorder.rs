use crate::queue::FrameQueue;
use multicam_core::error::{CaptureError, Result};
use multicam_core::frame::Frame;
use multicam_core::pixel_format::PixelFormat;
use multicam_core::telemetry::CaptureCounters;
use multicam_core::traits::EncoderSession;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// 录制状态机
///
/// Idle → Capturing (start) → Draining (stop) → Idle (队列排空后自动)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureState {
    Idle,
    Capturing,
    Draining,
}

impl CaptureState {
    const fn bits(self) -> u64 {
        match self {
            Self::Idle => 0,
            Self::Capturing => 1,
            Self::Draining => 2,
        }
    }

    const fn from_bits(bits: u64) -> Self {
        match bits & STATE_MASK {
            1 => Self::Capturing,
            2 => Self::Draining,
            _ => Self::Idle,
        }
    }
}

// 闸门布局：[epoch: 54 bit][capture format: 8 bit][state: 2 bit]
// 一次原子读就能拿到状态、会话编号和该会话的录制格式
const STATE_MASK: u64 = 0b11;
const FORMAT_SHIFT: u32 = 2;
const FORMAT_MASK: u64 = 0xff;
const EPOCH_SHIFT: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Gate {
    state: CaptureState,
    format: u8,
    epoch: u64,
}

impl Gate {
    fn pack(self) -> u64 {
        (self.epoch << EPOCH_SHIFT) | ((self.format as u64) << FORMAT_SHIFT) | self.state.bits()
    }

    fn unpack(raw: u64) -> Self {
        Self {
            state: CaptureState::from_bits(raw),
            format: ((raw >> FORMAT_SHIFT) & FORMAT_MASK) as u8,
            epoch: raw >> EPOCH_SHIFT,
        }
    }
}

/// 采集侧在 Capturing 状态下拿到的入场券
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub epoch: u64,
    /// 本次录制写入文件的像素格式
    pub format: PixelFormat,
}

#[derive(Debug)]
struct QueuedFrame {
    epoch: u64,
    frame: Frame,
}

struct ActiveSession {
    session: Box<dyn EncoderSession>,
    path: PathBuf,
    epoch: u64,
    frames_written: u64,
}

/// 一次采集会话内的录制器：队列 + 状态机 + 编码会话
///
/// 采集任务调用 `admission`/`enqueue`，编码任务调用 `encode_tick`，
/// 控制器调用 `start`/`stop`。会话对象只在 `encode_tick` 与 `start` 中被触碰。
pub struct Recorder {
    identity: String,
    gate: AtomicU64,
    queue: FrameQueue<QueuedFrame>,
    session: Mutex<Option<ActiveSession>>,
    last_error: Mutex<Option<CaptureError>>,
    counters: Arc<CaptureCounters>,
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("identity", &self.identity)
            .field("state", &self.state())
            .field("queued", &self.queue.len())
            .field("capacity", &self.queue.capacity())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Recorder {
    pub fn new(identity: impl Into<String>, capacity: usize, counters: Arc<CaptureCounters>) -> Self {
        Self {
            identity: identity.into(),
            gate: AtomicU64::new(
                Gate {
                    state: CaptureState::Idle,
                    format: 0,
                    epoch: 0,
                }
                .pack(),
            ),
            queue: FrameQueue::new(capacity),
            session: Mutex::new(None),
            last_error: Mutex::new(None),
            counters,
        }
    }

    fn gate(&self) -> Gate {
        Gate::unpack(self.gate.load(Ordering::Acquire))
    }

    pub fn state(&self) -> CaptureState {
        self.gate().state
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// 当前会话已写入的帧数 (没有会话时为 0)
    pub fn frames_written(&self) -> u64 {
        lock(&self.session)
            .as_ref()
            .map_or(0, |active| active.frames_written)
    }

    /// Idle → Capturing
    ///
    /// `open` 只有在状态检查通过后才会被调用，失败时状态保持 Idle。
    pub fn start<F>(&self, format: PixelFormat, open: F) -> Result<PathBuf>
    where
        F: FnOnce() -> Result<(Box<dyn EncoderSession>, PathBuf)>,
    {
        let mut guard = lock(&self.session);
        let gate = self.gate();
        match gate.state {
            CaptureState::Capturing => return Err(CaptureError::AlreadyCapturing),
            CaptureState::Draining => return Err(CaptureError::StillDraining),
            CaptureState::Idle => {}
        }

        let (session, path) = open()?;

        // 上一次录制结束后迟到的帧，epoch 不匹配，直接丢掉
        let stale = self.queue.clear();
        if stale > 0 {
            tracing::debug!("{}: discarded {} stale frames", self.identity, stale);
        }

        let epoch = gate.epoch + 1;
        *guard = Some(ActiveSession {
            session,
            path: path.clone(),
            epoch,
            frames_written: 0,
        });
        self.gate.store(
            Gate {
                state: CaptureState::Capturing,
                format: format as u8,
                epoch,
            }
            .pack(),
            Ordering::Release,
        );

        tracing::info!("{}: recording to {}", self.identity, path.display());
        Ok(path)
    }

    /// Capturing → Draining，其他状态下无操作。返回是否发生了转换。
    pub fn stop(&self) -> bool {
        let mut current = self.gate.load(Ordering::Acquire);
        loop {
            let gate = Gate::unpack(current);
            if gate.state != CaptureState::Capturing {
                return false;
            }
            let next = Gate {
                state: CaptureState::Draining,
                ..gate
            }
            .pack();
            match self
                .gate
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    tracing::debug!(
                        "{}: stop requested, draining {} queued frames",
                        self.identity,
                        self.queue.len()
                    );
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// 只有 Capturing 状态才发放入场券
    pub fn admission(&self) -> Option<Admission> {
        let gate = self.gate();
        if gate.state != CaptureState::Capturing {
            return None;
        }
        PixelFormat::from_index(gate.format).map(|format| Admission {
            epoch: gate.epoch,
            format,
        })
    }

    /// 把已转换好的帧放入队列。队列满时挤掉最旧的一帧。
    pub fn enqueue(&self, admission: Admission, frame: Frame) {
        let evicted = self.queue.enqueue(QueuedFrame {
            epoch: admission.epoch,
            frame,
        });
        self.counters.record_enqueued(evicted);
    }

    /// 便捷入口：Capturing 时入队 (不做格式转换)，返回是否被接受
    pub fn offer(&self, frame: Frame) -> bool {
        match self.admission() {
            Some(admission) => {
                self.enqueue(admission, frame);
                true
            }
            None => false,
        }
    }

    /// 编码任务的一拍：最多取一帧写入。返回本拍结束后的状态。
    ///
    /// 阻塞调用 (可能写盘)，应在 blocking 线程池中执行。
    pub fn encode_tick(&self) -> CaptureState {
        let gate = self.gate();
        if gate.state == CaptureState::Idle {
            return CaptureState::Idle;
        }

        let mut guard = lock(&self.session);
        let Some(active) = guard.as_mut() else {
            return self.state();
        };

        // 必须在出队之前读状态：读到 Draining 时 stop 之前入队的帧都已在队列里，
        // 此后出队为空才能收尾
        let draining = self.state() == CaptureState::Draining;

        match self.queue.dequeue() {
            Some(queued) if queued.epoch != active.epoch => {
                self.counters.record_stale();
            }
            Some(queued) => match active.session.append(&queued.frame) {
                Ok(()) => {
                    active.frames_written += 1;
                    self.counters.record_written();
                }
                Err(err) => {
                    self.fail(&mut guard, err);
                    return CaptureState::Idle;
                }
            },
            None => {
                if draining {
                    self.finalize(&mut guard);
                    return CaptureState::Idle;
                }
            }
        }
        self.state()
    }

    /// stop 之后同步排空队列直到 Idle (采集结束时使用)
    pub fn flush(&self) {
        self.stop();
        while self.encode_tick() != CaptureState::Idle {}
    }

    /// 取走最近一次编码错误
    pub fn take_error(&self) -> Option<CaptureError> {
        lock(&self.last_error).take()
    }

    fn set_idle(&self) {
        let gate = self.gate();
        self.gate.store(
            Gate {
                state: CaptureState::Idle,
                ..gate
            }
            .pack(),
            Ordering::Release,
        );
    }

    fn finalize(&self, guard: &mut MutexGuard<'_, Option<ActiveSession>>) {
        let Some(active) = guard.take() else {
            return;
        };
        self.set_idle();

        let ActiveSession {
            session,
            path,
            frames_written,
            ..
        } = active;
        match session.close() {
            Ok(()) => tracing::info!(
                "{}: recording finished, {} frames written to {}",
                self.identity,
                frames_written,
                path.display()
            ),
            Err(err) => {
                tracing::error!(
                    "{}: failed to finalize {}: {}",
                    self.identity,
                    path.display(),
                    err
                );
                *lock(&self.last_error) = Some(err);
            }
        }
    }

    /// 写入失败后会话不可再用：不经过 Draining，直接回到 Idle，
    /// 队列中剩余的帧丢弃，会话只关闭一次
    fn fail(&self, guard: &mut MutexGuard<'_, Option<ActiveSession>>, err: CaptureError) {
        // 先关闸门，采集侧立刻停止入队
        self.set_idle();
        let dropped = self.queue.clear();

        if let Some(active) = guard.take() {
            tracing::error!(
                "{}: encoder failed after {} frames ({} queued frames dropped): {}",
                self.identity,
                active.frames_written,
                dropped,
                err
            );
            if let Err(close_err) = active.session.close() {
                tracing::warn!("{}: close after failure: {}", self.identity, close_err);
            }
        }
        *lock(&self.last_error) = Some(err);
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        let session = self
            .session
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(active) = session {
            tracing::warn!(
                "{}: recorder dropped while recording, closing {}",
                self.identity,
                active.path.display()
            );
            let _ = active.session.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use multicam_core::builder::{CodecKind, CodecOptions};
    use multicam_core::traits::EncoderFactory;
    use multicam_simulation::MemoryEncoderFactory;
    use std::path::Path;

    fn recorder(capacity: usize) -> Recorder {
        Recorder::new("Sim 0001", capacity, Arc::new(CaptureCounters::new()))
    }

    fn frame(seq: u64) -> Frame {
        Frame::new(vec![seq as u8; 4], 2, 2, PixelFormat::Mono8).with_sequence(seq)
    }

    fn opener(
        factory: &MemoryEncoderFactory,
    ) -> impl FnOnce() -> Result<(Box<dyn EncoderSession>, PathBuf)> + '_ {
        move || {
            let path = PathBuf::from("Camera_0001.mjpeg");
            let options = CodecOptions {
                kind: CodecKind::Uncompressed,
                frame_rate: 25.0,
                width: 2,
                height: 2,
                pixel_format: PixelFormat::Mono8,
            };
            let session = factory.open(Path::new(&path), &options)?;
            Ok((session, path))
        }
    }

    #[test]
    fn gate_round_trips() {
        let gate = Gate {
            state: CaptureState::Draining,
            format: PixelFormat::YCbCr411_8 as u8,
            epoch: 123_456,
        };
        assert_eq!(Gate::unpack(gate.pack()), gate);
    }

    #[test]
    fn drain_writes_every_queued_frame_then_closes_once() {
        let factory = MemoryEncoderFactory::new();
        let rec = recorder(8);
        rec.start(PixelFormat::Mono8, opener(&factory)).unwrap();

        for seq in 0..5 {
            assert!(rec.offer(frame(seq)));
        }
        assert!(rec.stop());
        assert_eq!(rec.state(), CaptureState::Draining);
        // Draining 时不再接收新帧
        assert!(!rec.offer(frame(99)));

        for _ in 0..5 {
            assert_eq!(rec.encode_tick(), CaptureState::Draining);
        }
        assert_eq!(rec.encode_tick(), CaptureState::Idle);

        let sessions = factory.sessions();
        assert_eq!(sessions[0].sequences, vec![0, 1, 2, 3, 4]);
        assert_eq!(sessions[0].close_calls, 1);
        assert_eq!(rec.state(), CaptureState::Idle);
    }

    #[test]
    fn start_is_rejected_while_capturing_or_draining() {
        let factory = MemoryEncoderFactory::new();
        let rec = recorder(4);
        rec.start(PixelFormat::Mono8, opener(&factory)).unwrap();
        assert!(matches!(
            rec.start(PixelFormat::Mono8, opener(&factory)),
            Err(CaptureError::AlreadyCapturing)
        ));

        rec.offer(frame(0));
        rec.stop();
        assert!(matches!(
            rec.start(PixelFormat::Mono8, opener(&factory)),
            Err(CaptureError::StillDraining)
        ));
        assert_eq!(rec.state(), CaptureState::Draining);
        // 被拒绝的 start 不会打开新会话
        assert_eq!(factory.session_count(), 1);
    }

    #[test]
    fn stop_while_idle_is_noop() {
        let rec = recorder(4);
        assert!(!rec.stop());
        assert_eq!(rec.state(), CaptureState::Idle);
        assert_eq!(rec.encode_tick(), CaptureState::Idle);
    }

    #[test]
    fn stale_epoch_frames_never_reach_next_session() {
        let factory = MemoryEncoderFactory::new();
        let rec = recorder(8);
        rec.start(PixelFormat::Mono8, opener(&factory)).unwrap();
        // 采集侧在第一次录制中拿到入场券，但入队被延迟
        let late = rec.admission().unwrap();
        rec.stop();
        rec.flush();
        assert_eq!(rec.state(), CaptureState::Idle);

        rec.start(PixelFormat::Mono8, opener(&factory)).unwrap();
        rec.enqueue(late, frame(7));
        rec.offer(frame(8));
        rec.flush();

        let sessions = factory.sessions();
        assert!(sessions[0].sequences.is_empty());
        assert_eq!(sessions[1].sequences, vec![8]);
        assert_eq!(sessions[1].close_calls, 1);
    }

    #[test]
    fn append_failure_returns_to_idle_with_single_close() {
        let factory = MemoryEncoderFactory::new();
        factory.fail_append_after(Some(2));
        let rec = recorder(8);
        rec.start(PixelFormat::Mono8, opener(&factory)).unwrap();
        for seq in 0..5 {
            rec.offer(frame(seq));
        }

        assert_eq!(rec.encode_tick(), CaptureState::Capturing);
        assert_eq!(rec.encode_tick(), CaptureState::Capturing);
        assert_eq!(rec.encode_tick(), CaptureState::Idle);
        assert_eq!(rec.queued(), 0);
        assert!(!rec.offer(frame(10)));

        let err = rec.take_error().expect("error kept for the caller");
        assert_eq!(err.kind(), multicam_core::error::ErrorKind::Encoder);
        assert!(rec.take_error().is_none());

        // 再次 stop / flush 不会重复关闭
        rec.flush();
        let sessions = factory.sessions();
        assert_eq!(sessions[0].sequences, vec![0, 1]);
        assert_eq!(sessions[0].close_calls, 1);
    }

    #[test]
    fn overflow_evicts_oldest_while_capturing() {
        let factory = MemoryEncoderFactory::new();
        let rec = recorder(2);
        rec.start(PixelFormat::Mono8, opener(&factory)).unwrap();
        for seq in 0..4 {
            rec.offer(frame(seq));
        }
        rec.flush();
        assert_eq!(factory.sessions()[0].sequences, vec![2, 3]);
        assert_eq!(rec.queued(), 0);
    }

    #[test]
    fn failed_open_leaves_state_idle() {
        let factory = MemoryEncoderFactory::new();
        factory.fail_open(true);
        let rec = recorder(2);
        let err = rec.start(PixelFormat::Mono8, opener(&factory)).unwrap_err();
        assert_eq!(err.kind(), multicam_core::error::ErrorKind::Encoder);
        assert_eq!(rec.state(), CaptureState::Idle);
    }

    #[test]
    fn admission_carries_session_format() {
        let factory = MemoryEncoderFactory::new();
        let rec = recorder(2);
        assert!(rec.admission().is_none());
        rec.start(PixelFormat::Rgb8, opener(&factory)).unwrap();
        let admission = rec.admission().unwrap();
        assert_eq!(admission.format, PixelFormat::Rgb8);
        assert_eq!(admission.epoch, 1);
    }

    #[test]
    fn frame_offered_before_stop_survives_concurrent_drain() {
        // 编码线程一直在转，主线程入队后立即 stop：这一帧必须被写出
        for _ in 0..2_000 {
            let factory = MemoryEncoderFactory::new();
            let rec = recorder(4);
            rec.start(PixelFormat::Mono8, opener(&factory)).unwrap();

            std::thread::scope(|s| {
                s.spawn(|| while rec.encode_tick() != CaptureState::Idle {});
                assert!(rec.offer(frame(7)));
                assert!(rec.stop());
            });

            let sessions = factory.sessions();
            assert_eq!(sessions[0].sequences, vec![7]);
            assert_eq!(sessions[0].close_calls, 1);
            assert_eq!(rec.queued(), 0);
        }
    }
}
