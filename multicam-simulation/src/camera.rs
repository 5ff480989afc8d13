use crate::lock;
use async_trait::async_trait;
use multicam_core::error::{CaptureError, Result};
use multicam_core::frame::{Frame, FrameMetadata, StreamProfile};
use multicam_core::pixel_format::PixelFormat;
use multicam_core::traits::{
    CameraParameters, DeviceInfo, Driver, FrameSource, SourceControls, TriggerConfig, TriggerMode,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const BACKEND_NAME: &str = "Simulation";

// 仿真传感器的参数范围
const MIN_FRAME_RATE: f64 = 1.0;
const EXPOSURE_RANGE_US: (f64, f64) = (10.0, 1_000_000.0);
const GAIN_RANGE_DB: (f64, f64) = (0.0, 24.0);
const DEFAULT_EXPOSURE_US: f64 = 10_000.0;

/// 可注入的故障，按注入顺序在后续的取帧调用中依次生效
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// 等满超时时间后返回 Timeout
    Timeout,
    /// 瞬时设备错误 (可重试)
    Transient,
    /// 设备断开，此后所有调用都返回永久错误
    Lost,
    /// 下一帧只传回一半数据
    Truncated,
}

/// 一台仿真相机的静态描述
#[derive(Debug, Clone)]
pub struct SimulatedCameraSpec {
    pub info: DeviceInfo,
    pub width: u32,
    pub height: u32,
    pub native_frame_rate: f64,
    pub native_format: PixelFormat,
    /// 打开设备时失败
    pub fail_open: bool,
}

impl SimulatedCameraSpec {
    pub fn new(
        model: impl Into<String>,
        serial: impl Into<String>,
        width: u32,
        height: u32,
        native_frame_rate: f64,
        native_format: PixelFormat,
    ) -> Self {
        Self {
            info: DeviceInfo::new(model, serial, BACKEND_NAME),
            width,
            height,
            native_frame_rate,
            native_format,
            fail_open: false,
        }
    }

    pub fn fail_on_open(mut self) -> Self {
        self.fail_open = true;
        self
    }
}

#[derive(Debug, Default)]
struct SimState {
    open: bool,
    streaming: bool,
    lost: bool,
    open_count: u32,
    close_count: u32,
    stream_starts: u32,
    faults: VecDeque<Fault>,
    pending_triggers: u32,
    frames_delivered: u64,
    params: CameraParameters,
    trigger: TriggerConfig,
}

/// 测试侧的观察/控制句柄
///
/// 与 Driver 连接出的 SimulatedCamera 共享状态，
/// 即使相机已经被移动进采集任务也能注入故障或读取计数。
#[derive(Debug, Clone, Default)]
pub struct SimulatedHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedHandle {
    pub fn inject(&self, fault: Fault) {
        lock(&self.state).faults.push_back(fault);
    }

    pub fn inject_many(&self, faults: impl IntoIterator<Item = Fault>) {
        lock(&self.state).faults.extend(faults);
    }

    /// 软件触发一帧 (仅在触发模式下有意义)
    pub fn fire_trigger(&self) {
        lock(&self.state).pending_triggers += 1;
    }

    /// 模拟拔线
    pub fn disconnect(&self) {
        lock(&self.state).lost = true;
    }

    pub fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    pub fn is_streaming(&self) -> bool {
        lock(&self.state).streaming
    }

    pub fn open_count(&self) -> u32 {
        lock(&self.state).open_count
    }

    pub fn close_count(&self) -> u32 {
        lock(&self.state).close_count
    }

    pub fn stream_starts(&self) -> u32 {
        lock(&self.state).stream_starts
    }

    pub fn frames_delivered(&self) -> u64 {
        lock(&self.state).frames_delivered
    }

    pub fn parameters(&self) -> CameraParameters {
        lock(&self.state).params
    }

    pub fn trigger(&self) -> TriggerConfig {
        lock(&self.state).trigger
    }
}

/// 按帧率产生测试图案的相机
#[derive(Debug)]
pub struct SimulatedCamera {
    spec: SimulatedCameraSpec,
    handle: SimulatedHandle,
    sequence: u64,
    started: Instant,
}

// 一次取帧在锁外要做的事
enum FetchPlan {
    Fail(CaptureError),
    WaitThenTimeout(Duration),
    Produce {
        wait: Duration,
        params: CameraParameters,
        truncated: bool,
    },
}

impl SimulatedCamera {
    pub fn new(spec: SimulatedCameraSpec) -> Self {
        Self::with_handle(spec, SimulatedHandle::default())
    }

    fn with_handle(spec: SimulatedCameraSpec, handle: SimulatedHandle) -> Self {
        Self {
            spec,
            handle,
            sequence: 0,
            started: Instant::now(),
        }
    }

    pub fn handle(&self) -> SimulatedHandle {
        self.handle.clone()
    }

    fn check_alive(&self) -> Result<()> {
        if lock(&self.handle.state).lost {
            return Err(self.lost_error());
        }
        Ok(())
    }

    fn lost_error(&self) -> CaptureError {
        CaptureError::device_lost(format!(
            "{} disconnected",
            self.spec.info.identity()
        ))
    }

    fn plan_fetch(&self, timeout: Duration) -> FetchPlan {
        let mut st = lock(&self.handle.state);
        if st.lost {
            return FetchPlan::Fail(self.lost_error());
        }
        if !st.streaming {
            return FetchPlan::Fail(CaptureError::device("stream not started"));
        }

        let mut truncated = false;
        match st.faults.pop_front() {
            Some(Fault::Truncated) => truncated = true,
            Some(Fault::Timeout) => return FetchPlan::WaitThenTimeout(timeout),
            Some(Fault::Transient) => {
                return FetchPlan::Fail(CaptureError::device("simulated transfer error"))
            }
            Some(Fault::Lost) => {
                st.lost = true;
                return FetchPlan::Fail(self.lost_error());
            }
            None => {}
        }

        if st.trigger.mode != TriggerMode::Off {
            // 触发模式：没有触发信号就一直等到超时
            if st.pending_triggers == 0 {
                return FetchPlan::WaitThenTimeout(timeout);
            }
            st.pending_triggers -= 1;
            return FetchPlan::Produce {
                wait: Duration::ZERO,
                params: st.params,
                truncated,
            };
        }

        let period = Duration::from_secs_f64(1.0 / st.params.frame_rate.max(MIN_FRAME_RATE));
        if period > timeout {
            return FetchPlan::WaitThenTimeout(timeout);
        }
        FetchPlan::Produce {
            wait: period,
            params: st.params,
            truncated,
        }
    }

    fn render(&mut self, params: CameraParameters) -> Frame {
        let len = self
            .spec
            .native_format
            .frame_bytes(self.spec.width, self.spec.height);
        let seq = self.sequence;
        // 斜向渐变，序号让图案逐帧移动
        let data = (0..len)
            .map(|i| ((i as u64).wrapping_add(seq) & 0xff) as u8)
            .collect();

        self.sequence += 1;
        let mut frame = Frame::new(
            data,
            self.spec.width,
            self.spec.height,
            self.spec.native_format,
        )
        .with_sequence(seq)
        .with_timestamp(self.started.elapsed());
        frame.metadata = FrameMetadata {
            actual_exposure_us: Some(params.exposure_us),
            actual_gain_db: Some(params.gain),
            trigger_fired: lock(&self.handle.state).trigger.mode != TriggerMode::Off,
        };
        frame
    }
}

impl SourceControls for SimulatedCamera {
    fn set_frame_rate(&mut self, fps: f64) -> Result<()> {
        self.check_alive()?;
        let max = self.spec.native_frame_rate.max(MIN_FRAME_RATE);
        lock(&self.handle.state).params.frame_rate = fps.clamp(MIN_FRAME_RATE, max);
        Ok(())
    }

    fn frame_rate(&self) -> Result<f64> {
        self.check_alive()?;
        Ok(lock(&self.handle.state).params.frame_rate)
    }

    fn set_exposure(&mut self, exposure_us: f64) -> Result<()> {
        self.check_alive()?;
        lock(&self.handle.state).params.exposure_us =
            exposure_us.clamp(EXPOSURE_RANGE_US.0, EXPOSURE_RANGE_US.1);
        Ok(())
    }

    fn exposure(&self) -> Result<f64> {
        self.check_alive()?;
        Ok(lock(&self.handle.state).params.exposure_us)
    }

    fn set_gain(&mut self, gain: f64) -> Result<()> {
        self.check_alive()?;
        lock(&self.handle.state).params.gain = gain.clamp(GAIN_RANGE_DB.0, GAIN_RANGE_DB.1);
        Ok(())
    }

    fn gain(&self) -> Result<f64> {
        self.check_alive()?;
        Ok(lock(&self.handle.state).params.gain)
    }

    fn set_flip(&mut self, horizontal: bool, vertical: bool) -> Result<()> {
        self.check_alive()?;
        let mut st = lock(&self.handle.state);
        st.params.flip_horizontal = horizontal;
        st.params.flip_vertical = vertical;
        Ok(())
    }

    fn flip(&self) -> Result<(bool, bool)> {
        self.check_alive()?;
        let st = lock(&self.handle.state);
        Ok((st.params.flip_horizontal, st.params.flip_vertical))
    }

    fn set_trigger(&mut self, config: TriggerConfig) -> Result<()> {
        self.check_alive()?;
        lock(&self.handle.state).trigger = config;
        Ok(())
    }
}

#[async_trait]
impl FrameSource for SimulatedCamera {
    fn info(&self) -> &DeviceInfo {
        &self.spec.info
    }

    async fn open(&mut self) -> Result<()> {
        if self.spec.fail_open {
            return Err(CaptureError::device(format!(
                "{} refused to open",
                self.spec.info.identity()
            )));
        }
        self.check_alive()?;

        let mut st = lock(&self.handle.state);
        st.open = true;
        st.open_count += 1;
        st.params = CameraParameters {
            frame_rate: self.spec.native_frame_rate,
            gain: 0.0,
            exposure_us: DEFAULT_EXPOSURE_US,
            flip_horizontal: false,
            flip_vertical: false,
        };
        tracing::debug!("Simulated camera {} opened", self.spec.info.identity());
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let mut st = lock(&self.handle.state);
        if st.open {
            st.open = false;
            st.streaming = false;
            st.close_count += 1;
        }
        Ok(())
    }

    fn stream_profile(&self) -> Result<StreamProfile> {
        if !lock(&self.handle.state).open {
            return Err(CaptureError::Closed);
        }
        Ok(StreamProfile::new(
            self.spec.width,
            self.spec.height,
            self.spec.native_frame_rate,
            self.spec.native_format,
        ))
    }

    async fn begin_streaming(&mut self) -> Result<()> {
        self.check_alive()?;
        let mut st = lock(&self.handle.state);
        if !st.open {
            return Err(CaptureError::Closed);
        }
        st.streaming = true;
        st.stream_starts += 1;
        self.started = Instant::now();
        Ok(())
    }

    async fn end_streaming(&mut self) -> Result<()> {
        lock(&self.handle.state).streaming = false;
        Ok(())
    }

    async fn fetch_next_frame(&mut self, timeout: Duration) -> Result<Frame> {
        match self.plan_fetch(timeout) {
            FetchPlan::Fail(err) => Err(err),
            FetchPlan::WaitThenTimeout(wait) => {
                tokio::time::sleep(wait).await;
                Err(CaptureError::Timeout)
            }
            FetchPlan::Produce {
                wait,
                params,
                truncated,
            } => {
                if !wait.is_zero() {
                    tokio::time::sleep(wait).await;
                }
                let mut frame = self.render(params);
                if truncated {
                    let half = frame.data.len() / 2;
                    frame.data.truncate(half);
                }
                lock(&self.handle.state).frames_delivered += 1;
                Ok(frame)
            }
        }
    }
}

/// 仿真驱动：管理一组预先登记的仿真相机
#[derive(Debug, Default)]
pub struct SimulatedDriver {
    cameras: Vec<(SimulatedCameraSpec, SimulatedHandle)>,
}

impl SimulatedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一台相机
    pub fn with_camera(mut self, spec: SimulatedCameraSpec) -> Self {
        self.cameras.push((spec, SimulatedHandle::default()));
        self
    }

    /// 按序列号取得观察句柄。多次 connect 同一台相机共享同一份状态。
    pub fn handle(&self, serial: &str) -> Option<SimulatedHandle> {
        self.cameras
            .iter()
            .find(|(spec, _)| spec.info.serial == serial)
            .map(|(_, handle)| handle.clone())
    }
}

impl Driver for SimulatedDriver {
    fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        Ok(self.cameras.iter().map(|(spec, _)| spec.info.clone()).collect())
    }

    fn connect(&self, info: &DeviceInfo) -> Result<Box<dyn FrameSource>> {
        let (spec, handle) = self
            .cameras
            .iter()
            .find(|(spec, _)| spec.info == *info)
            .ok_or_else(|| CaptureError::device_lost(format!("{} not found", info.identity())))?;

        Ok(Box::new(SimulatedCamera::with_handle(
            spec.clone(),
            handle.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    fn mono_spec() -> SimulatedCameraSpec {
        SimulatedCameraSpec::new("SimMono", "0001", 8, 4, 100.0, PixelFormat::Mono8)
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_sequenced_frames() -> Result<()> {
        let mut cam = SimulatedCamera::new(mono_spec());
        cam.open().await?;
        let profile = cam.stream_profile()?;
        assert_eq!(profile.frame_byte_size, 32 + multicam_core::frame::FRAME_PADDING_BYTES);

        cam.begin_streaming().await?;
        let a = cam.fetch_next_frame(Duration::from_millis(100)).await?;
        let b = cam.fetch_next_frame(Duration::from_millis(100)).await?;
        assert_eq!((a.sequence, b.sequence), (0, 1));
        assert!(a.is_complete());
        assert_eq!(cam.handle().frames_delivered(), 2);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn injected_faults_fire_in_order() -> Result<()> {
        let mut cam = SimulatedCamera::new(mono_spec());
        let handle = cam.handle();
        cam.open().await?;
        cam.begin_streaming().await?;

        handle.inject_many([Fault::Timeout, Fault::Transient, Fault::Lost]);
        let timeout = Duration::from_millis(50);

        assert!(cam.fetch_next_frame(timeout).await.unwrap_err().is_timeout());
        let transient = cam.fetch_next_frame(timeout).await.unwrap_err();
        assert!(!transient.is_permanent());
        assert!(cam.fetch_next_frame(timeout).await.unwrap_err().is_permanent());
        // 断开后一直是永久错误
        assert!(cam.fetch_next_frame(timeout).await.unwrap_err().is_permanent());
        assert!(cam.set_gain(1.0).is_err());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_mode_waits_for_trigger() -> Result<()> {
        let mut cam = SimulatedCamera::new(mono_spec());
        let handle = cam.handle();
        cam.open().await?;
        cam.set_trigger(TriggerConfig::software())?;
        cam.begin_streaming().await?;

        let timeout = Duration::from_millis(20);
        assert!(cam.fetch_next_frame(timeout).await.unwrap_err().is_timeout());

        handle.fire_trigger();
        let frame = cam.fetch_next_frame(timeout).await?;
        assert!(frame.metadata.trigger_fired);
        Ok(())
    }

    #[tokio::test]
    async fn controls_are_clamped_to_sensor_range() -> Result<()> {
        let mut cam = SimulatedCamera::new(mono_spec());
        cam.open().await?;
        cam.set_frame_rate(500.0)?;
        cam.set_exposure(1.0)?;
        cam.set_gain(-3.0)?;
        let params = cam.read_parameters()?;
        assert_eq!(params.frame_rate, 100.0);
        assert_eq!(params.exposure_us, 10.0);
        assert_eq!(params.gain, 0.0);
        Ok(())
    }

    #[tokio::test]
    async fn driver_shares_state_between_connections() -> Result<()> {
        let driver = SimulatedDriver::new()
            .with_camera(mono_spec())
            .with_camera(SimulatedCameraSpec::new("SimMono", "0002", 8, 4, 30.0, PixelFormat::Mono8).fail_on_open());

        let devices = driver.list_devices()?;
        assert_eq!(devices.len(), 2);

        let mut first = driver.connect(&devices[0])?;
        first.open().await?;
        first.close().await?;
        first.close().await?;

        let handle = driver.handle("0001").expect("registered");
        assert_eq!(handle.open_count(), 1);
        assert_eq!(handle.close_count(), 1);

        let mut broken = driver.connect(&devices[1])?;
        assert!(broken.open().await.is_err());
        Ok(())
    }
}
