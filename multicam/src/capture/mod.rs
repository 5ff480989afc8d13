//! 单台相机的采集控制器
//!
//! 每台相机两个任务：
//! 1. 采集任务：有界等待取帧 → 预览 (抽帧) → 录制时转换并入队
//! 2. 编码任务：按 2 倍目标帧率的节拍出队写盘
//!
//! 两个任务之间唯一的数据通道是 Recorder 内的有界队列。

pub mod acquisition;
pub mod encoding;
pub mod recorder;

pub use acquisition::{preview_decimation, MAX_CONSECUTIVE_DEVICE_ERRORS};
pub use recorder::{Admission, CaptureState, Recorder};

use crate::videoio;
use acquisition::AcquisitionTask;
use multicam_core::builder::{CaptureConfig, CodecOptions};
use multicam_core::error::{CaptureError, Result};
use multicam_core::frame::StreamProfile;
use multicam_core::pixel_format::PixelFormat;
use multicam_core::policy::{self, FormatResolution};
use multicam_core::telemetry::{CaptureCounters, CaptureTelemetry, DeviceHealthStatus};
use multicam_core::traits::{
    CameraParameters, DeviceInfo, EncoderFactory, FrameSource, PreviewFactory,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// 控制器的运行参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerSettings {
    /// 单次取帧的最长等待
    pub fetch_timeout: Duration,
    /// 预览的目标帧率，用于计算抽帧间隔
    pub display_frame_rate: f64,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_millis(100),
            display_frame_rate: 25.0,
        }
    }
}

/// 停止信号已发出，或者发送端已经不存在
pub(crate) fn stop_requested(stop_rx: &watch::Receiver<bool>) -> bool {
    *stop_rx.borrow() || stop_rx.has_changed().is_err()
}

/// 按配置解析采集/显示格式
///
/// 名字无法识别时回退：采集用原生格式，显示用原生格式对应的显示格式。
/// 显示格式合法但不是 Mono8/RGB8、或者转换不支持时报错。
pub fn resolve_config_formats(
    identity: &str,
    config: &CaptureConfig,
    native: PixelFormat,
) -> Result<FormatResolution> {
    let capture = match config.capture_pixel_format.as_deref() {
        None => native,
        Some(name) => PixelFormat::from_name(name).unwrap_or_else(|err| {
            tracing::warn!("{}: {}, recording in native {}", identity, err, native);
            native
        }),
    };
    let display = PixelFormat::from_name(&config.display_pixel_format).unwrap_or_else(|err| {
        let fallback = native.display_format();
        tracing::warn!("{}: {}, previewing as {}", identity, err, fallback);
        fallback
    });
    policy::resolve_formats(native, capture, display)
}

struct RunningAcquisition {
    recorder: Arc<Recorder>,
    stop_tx: watch::Sender<bool>,
    applied_rx: watch::Receiver<CameraParameters>,
    acquisition: JoinHandle<Box<dyn FrameSource>>,
    encoding: JoinHandle<()>,
}

/// 单台相机：拥有 FrameSource、录制器与两个后台任务
pub struct CaptureController {
    info: DeviceInfo,
    profile: StreamProfile,
    /// 采集运行期间 FrameSource 在采集任务里，这里为 None
    source: Option<Box<dyn FrameSource>>,
    config_tx: watch::Sender<CaptureConfig>,
    parameters: CameraParameters,
    encoder: Arc<dyn EncoderFactory>,
    preview: Option<Arc<dyn PreviewFactory>>,
    settings: ControllerSettings,
    counters: Arc<CaptureCounters>,
    running: Option<RunningAcquisition>,
    last_error: Option<CaptureError>,
    closed: bool,
}

impl std::fmt::Debug for CaptureController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureController")
            .field("identity", &self.info.identity())
            .field("profile", &self.profile)
            .field("acquiring", &self.is_acquiring())
            .field("state", &self.state())
            .field("closed", &self.closed)
            .finish()
    }
}

impl CaptureController {
    /// 打开相机并校验配置
    ///
    /// 配置错误 (显示格式非法、转换不支持、范围检查失败) 在这里就失败，
    /// 失败时相机会被关闭。
    pub async fn open(
        mut source: Box<dyn FrameSource>,
        config: CaptureConfig,
        encoder: Arc<dyn EncoderFactory>,
        preview: Option<Arc<dyn PreviewFactory>>,
        settings: ControllerSettings,
    ) -> Result<Self> {
        let info = source.info().clone();
        let identity = info.identity();

        config.validate()?;
        source.open().await?;

        let prepared = Self::prepare(&mut *source, &identity, &config);
        let (profile, parameters) = match prepared {
            Ok(ready) => ready,
            Err(err) => {
                if let Err(close_err) = source.close().await {
                    tracing::warn!("{}: close after failed open: {}", identity, close_err);
                }
                return Err(err);
            }
        };

        tracing::info!(
            "{}: opened ({}x{} {} @ {:.1} fps, {} bytes/frame)",
            identity,
            profile.width,
            profile.height,
            profile.native_format,
            profile.native_frame_rate,
            profile.frame_byte_size
        );

        let (config_tx, _) = watch::channel(config);
        Ok(Self {
            info,
            profile,
            source: Some(source),
            config_tx,
            parameters,
            encoder,
            preview,
            settings,
            counters: Arc::new(CaptureCounters::new()),
            running: None,
            last_error: None,
            closed: false,
        })
    }

    fn prepare(
        source: &mut dyn FrameSource,
        identity: &str,
        config: &CaptureConfig,
    ) -> Result<(StreamProfile, CameraParameters)> {
        let profile = source.stream_profile()?;
        resolve_config_formats(identity, config, profile.native_format)?;
        source.apply_config(config)?;
        let parameters = source.read_parameters()?;
        Ok((profile, parameters))
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn identity(&self) -> String {
        self.info.identity()
    }

    pub fn profile(&self) -> StreamProfile {
        self.profile
    }

    /// 当前配置快照
    pub fn config(&self) -> CaptureConfig {
        self.config_tx.borrow().clone()
    }

    pub fn is_acquiring(&self) -> bool {
        self.running.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn state(&self) -> CaptureState {
        self.running
            .as_ref()
            .map_or(CaptureState::Idle, |run| run.recorder.state())
    }

    /// 本次采集的队列容量 (未采集时为 None)
    pub fn queue_capacity(&self) -> Option<usize> {
        self.running.as_ref().map(|run| run.recorder.capacity())
    }

    pub fn telemetry(&self) -> CaptureTelemetry {
        self.counters.snapshot()
    }

    pub fn health(&self) -> DeviceHealthStatus {
        self.telemetry().assess_health()
    }

    pub fn is_unavailable(&self) -> bool {
        self.counters.is_unavailable()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(CaptureError::Closed);
        }
        Ok(())
    }

    /// 启动采集：开流，创建容量为 `capacity` 的队列，启动两个任务
    pub async fn start_acquisition(&mut self, capacity: usize) -> Result<()> {
        self.ensure_open()?;
        if self.running.is_some() {
            return Err(CaptureError::AlreadyAcquiring);
        }
        let identity = self.identity();
        let config = self.config();
        let formats = resolve_config_formats(&identity, &config, self.profile.native_format)?;

        let mut source = self.source.take().ok_or(CaptureError::Closed)?;
        if let Err(err) = source.begin_streaming().await {
            self.source = Some(source);
            return Err(err);
        }

        let recorder = Arc::new(Recorder::new(
            identity.clone(),
            capacity,
            Arc::clone(&self.counters),
        ));
        let (stop_tx, stop_rx) = watch::channel(false);
        let (applied_tx, applied_rx) = watch::channel(self.parameters);

        let task = AcquisitionTask {
            source,
            recorder: Arc::clone(&recorder),
            counters: Arc::clone(&self.counters),
            preview: self.preview.as_ref().map(|factory| factory.sink_for(&self.info)),
            profile: self.profile,
            formats,
            config_rx: self.config_tx.subscribe(),
            applied_tx,
            stop_rx: stop_rx.clone(),
            fetch_timeout: self.settings.fetch_timeout,
            display_frame_rate: self.settings.display_frame_rate,
        };
        let acquisition = tokio::spawn(task.run());
        let encoding = tokio::spawn(encoding::run(
            identity.clone(),
            Arc::clone(&recorder),
            self.config_tx.subscribe(),
            stop_rx,
        ));

        tracing::debug!("{}: queue capacity {} frames", identity, recorder.capacity());
        self.running = Some(RunningAcquisition {
            recorder,
            stop_tx,
            applied_rx,
            acquisition,
            encoding,
        });
        Ok(())
    }

    /// 停止采集
    ///
    /// 顺序：停止录制 → 通知两个任务 → 等待退出 → 同步写完剩余帧 → 关流 → 交还 FrameSource
    pub async fn stop_acquisition(&mut self) -> Result<()> {
        let Some(run) = self.running.take() else {
            return Ok(());
        };
        let identity = self.identity();

        // 1. 不再接收新帧，已排队的帧照常写出
        run.recorder.stop();
        run.stop_tx.send_replace(true);

        // 2. 等待两个任务退出
        let source = run.acquisition.await;
        if let Err(err) = run.encoding.await {
            tracing::error!("{}: encoding task failed: {}", identity, err);
        }

        // 3. 任务都退出后，在 blocking 线程中把队列写完
        let recorder = Arc::clone(&run.recorder);
        if let Err(err) = tokio::task::spawn_blocking(move || recorder.flush()).await {
            tracing::error!("{}: final flush failed: {}", identity, err);
        }
        if let Some(err) = run.recorder.take_error() {
            self.last_error = Some(err);
        }
        self.parameters = *run.applied_rx.borrow();

        // 4. 关流并取回 FrameSource
        let mut source = match source {
            Ok(source) => source,
            Err(err) => {
                // 任务 panic 时 FrameSource 已经随任务一起释放
                self.closed = true;
                return Err(CaptureError::device_lost(format!(
                    "acquisition task for {identity} failed: {err}"
                )));
            }
        };
        if let Err(err) = source.end_streaming().await {
            tracing::warn!("{}: end streaming: {}", identity, err);
        }
        self.source = Some(source);
        Ok(())
    }

    /// Idle → Capturing：按当前配置打开编码会话
    pub fn start_capture(&self) -> Result<PathBuf> {
        self.ensure_open()?;
        let run = self.running.as_ref().ok_or(CaptureError::NotAcquiring)?;

        let identity = self.info.identity();
        let config = self.config_tx.borrow().clone();
        let formats = resolve_config_formats(&identity, &config, self.profile.native_format)?;
        let options = CodecOptions {
            kind: config.codec,
            frame_rate: config.target_frame_rate,
            width: self.profile.width,
            height: self.profile.height,
            pixel_format: formats.capture.to,
        };

        let encoder = Arc::clone(&self.encoder);
        let serial = self.info.serial.clone();
        run.recorder.start(formats.capture.to, move || {
            let path = videoio::recording_path(
                Path::new(&config.output_path),
                &config.filename_prefix,
                &serial,
                &config.filename_suffix,
                chrono::Local::now().naive_local(),
            );
            let session = encoder.open(&path, &options)?;
            Ok((session, path))
        })
    }

    /// Capturing → Draining。未在录制时无操作。
    pub fn stop_capture(&self) {
        if let Some(run) = &self.running {
            run.recorder.stop();
        }
    }

    /// 取走最近一次编码错误 (编码失败会把录制强制结束)
    pub fn take_error(&mut self) -> Option<CaptureError> {
        let running = self.running.as_ref().and_then(|run| run.recorder.take_error());
        running.or_else(|| self.last_error.take())
    }

    /// 替换配置快照
    ///
    /// 采集中由采集任务在下一次循环开始时下发到设备；否则立即下发。
    /// 录制格式的变化从下一次 `start_capture` 开始生效。
    pub fn apply_config(&mut self, config: CaptureConfig) -> Result<()> {
        self.ensure_open()?;
        config.validate()?;
        resolve_config_formats(&self.info.identity(), &config, self.profile.native_format)?;

        if let Some(source) = self.source.as_mut() {
            source.apply_config(&config)?;
            self.parameters = source.read_parameters()?;
        }
        self.config_tx.send_replace(config);
        Ok(())
    }

    /// 设备上的实际参数
    pub fn parameters(&self) -> Result<CameraParameters> {
        self.ensure_open()?;
        match (&self.running, &self.source) {
            (Some(run), _) => Ok(*run.applied_rx.borrow()),
            (None, Some(source)) => source.read_parameters(),
            (None, None) => Ok(self.parameters),
        }
    }

    /// 停止录制 → 停止采集 → 关闭设备。只执行一次，重复调用无副作用。
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.stop_capture();
        let stopped = self.stop_acquisition().await;
        self.closed = true;

        if let Some(mut source) = self.source.take() {
            source.close().await?;
        }
        tracing::info!("{}: closed", self.identity());
        stopped
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        if let Some(run) = &self.running {
            tracing::warn!(
                "{}: controller dropped without close(), signalling tasks to stop",
                self.info.identity()
            );
            run.recorder.stop();
            run.stop_tx.send_replace(true);
        }
    }
}
