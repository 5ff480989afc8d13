use super::recorder::Recorder;
use super::{resolve_config_formats, stop_requested};
use multicam_core::builder::CaptureConfig;
use multicam_core::convert;
use multicam_core::error::CaptureError;
use multicam_core::frame::{Frame, StreamProfile};
use multicam_core::policy::{Conversion, FormatResolution};
use multicam_core::telemetry::CaptureCounters;
use multicam_core::traits::{CameraParameters, FrameSource, PreviewSink};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// 连续设备错误超过此值即判定设备不可用
pub const MAX_CONSECUTIVE_DEVICE_ERRORS: u64 = 50;

/// 瞬时设备错误后的退避时间
pub const DEVICE_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// 预览抽帧间隔：k = max(1, round(原生帧率 / 显示帧率))
pub fn preview_decimation(native_fps: f64, display_fps: f64) -> u64 {
    if !(native_fps.is_finite() && display_fps.is_finite() && display_fps > 0.0) {
        return 1;
    }
    (native_fps / display_fps).round().max(1.0) as u64
}

/// 采集任务需要的全部状态，整体移动进任务
pub(crate) struct AcquisitionTask {
    pub(crate) source: Box<dyn FrameSource>,
    pub(crate) recorder: Arc<Recorder>,
    pub(crate) counters: Arc<CaptureCounters>,
    pub(crate) preview: Option<Box<dyn PreviewSink>>,
    pub(crate) profile: StreamProfile,
    pub(crate) formats: FormatResolution,
    pub(crate) config_rx: watch::Receiver<CaptureConfig>,
    pub(crate) applied_tx: watch::Sender<CameraParameters>,
    pub(crate) stop_rx: watch::Receiver<bool>,
    pub(crate) fetch_timeout: Duration,
    pub(crate) display_frame_rate: f64,
}

impl AcquisitionTask {
    /// 采集循环。退出时把 FrameSource 交还给调用者。
    pub(crate) async fn run(mut self) -> Box<dyn FrameSource> {
        let identity = self.source.info().identity();
        let decimation = preview_decimation(self.profile.native_frame_rate, self.display_frame_rate);
        let mut frame_index: u64 = 0;

        // 启动时下发一次当前配置
        let config = self.config_rx.borrow_and_update().clone();
        self.apply_snapshot(&identity, &config);

        tracing::info!(
            "{}: acquisition started ({}x{} {} @ {:.1} fps, preview every {} frames)",
            identity,
            self.profile.width,
            self.profile.height,
            self.profile.native_format,
            self.profile.native_frame_rate,
            decimation
        );

        loop {
            if stop_requested(&self.stop_rx) {
                break;
            }

            // 1. 配置快照有变化时先下发到设备
            if self.config_rx.has_changed().unwrap_or(false) {
                let config = self.config_rx.borrow_and_update().clone();
                self.apply_snapshot(&identity, &config);
            }

            // 2. 有界等待取帧
            let fetched = self
                .source
                .fetch_next_frame(self.fetch_timeout)
                .await
                .and_then(|frame| {
                    // 数据不足一帧按传输错误处理
                    if frame.is_complete() {
                        Ok(frame)
                    } else {
                        Err(CaptureError::device(format!(
                            "incomplete frame #{}: {} bytes",
                            frame.sequence,
                            frame.data.len()
                        )))
                    }
                });
            match fetched {
                Ok(frame) => {
                    self.counters.record_acquired();

                    // 3. 预览路径 (抽帧)
                    if frame_index % decimation == 0 {
                        self.present(&identity, &frame);
                    }
                    frame_index = frame_index.wrapping_add(1);

                    // 4. 录制路径
                    self.capture(&identity, frame);
                }
                Err(CaptureError::Timeout) => {
                    self.counters.record_timeout();
                }
                Err(err) => {
                    let consecutive = self.counters.record_device_error();
                    if err.is_permanent() || consecutive > MAX_CONSECUTIVE_DEVICE_ERRORS {
                        tracing::error!(
                            "{}: camera unavailable after {} consecutive errors: {}",
                            identity,
                            consecutive,
                            err
                        );
                        self.counters.mark_unavailable();
                        self.recorder.stop();
                        break;
                    }
                    tracing::warn!("{}: frame fetch failed ({}), retrying", identity, err);
                    tokio::time::sleep(DEVICE_ERROR_BACKOFF).await;
                }
            }
        }

        tracing::info!("{}: acquisition stopped", identity);
        self.source
    }

    fn apply_snapshot(&mut self, identity: &str, config: &CaptureConfig) {
        if let Err(err) = self.source.apply_config(config) {
            tracing::warn!("{}: failed to apply configuration: {}", identity, err);
        }

        match resolve_config_formats(identity, config, self.profile.native_format) {
            Ok(formats) => self.formats = formats,
            Err(err) => tracing::warn!(
                "{}: keeping {} preview format: {}",
                identity,
                self.formats.display.to,
                err
            ),
        }

        match self.source.read_parameters() {
            Ok(params) => {
                self.applied_tx.send_replace(params);
            }
            Err(err) => tracing::warn!("{}: failed to read back parameters: {}", identity, err),
        }
    }

    fn present(&mut self, identity: &str, frame: &Frame) {
        let Some(preview) = self.preview.as_mut() else {
            return;
        };
        let to = self.formats.display.to;
        if frame.format == to {
            preview.present_frame(to, frame.width, frame.height, &frame.data);
            return;
        }
        match convert::convert_pixels(&frame.data, frame.width, frame.height, frame.format, to) {
            Ok(pixels) => preview.present_frame(to, frame.width, frame.height, &pixels),
            Err(err) => tracing::debug!("{}: preview conversion failed: {}", identity, err),
        }
    }

    fn capture(&self, identity: &str, frame: Frame) {
        let Some(admission) = self.recorder.admission() else {
            return;
        };
        // 快速路径直接移动缓冲区
        match Conversion::between(frame.format, admission.format).apply(frame) {
            Ok(converted) => self.recorder.enqueue(admission, converted),
            Err(err) => tracing::warn!("{}: dropping frame, conversion failed: {}", identity, err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimation_rounds_to_nearest() {
        assert_eq!(preview_decimation(25.0, 25.0), 1);
        assert_eq!(preview_decimation(10.0, 25.0), 1);
        assert_eq!(preview_decimation(60.0, 25.0), 2);
        assert_eq!(preview_decimation(90.0, 25.0), 4);
        assert_eq!(preview_decimation(200.0, 25.0), 8);
        assert_eq!(preview_decimation(30.0, 0.0), 1);
    }
}
