//! 多相机编排
//!
//! 打开全部相机 → 统一分配内存预算 → 启动采集 → 广播录制开始/停止 → 关闭。
//! 单台相机的失败不会中断其它相机，结果汇总在 [`FleetReport`] 里。

use crate::allocator::{self, QueueAllocation, ResourceBudget};
use crate::capture::{CaptureController, CaptureState, ControllerSettings};
use crate::config::ConfigProvider;
use multicam_core::builder::CaptureConfig;
use multicam_core::error::{CaptureError, ErrorKind, Result};
use multicam_core::frame::StreamProfile;
use multicam_core::telemetry::CaptureTelemetry;
use multicam_core::traits::{CameraParameters, DeviceInfo, Driver, EncoderFactory, PreviewFactory};
use std::path::PathBuf;
use std::sync::Arc;

/// 内存预算从哪里来
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BudgetSource {
    /// 当前可用物理内存的一部分
    System { fraction: f64 },
    /// 固定字节数
    Fixed { bytes: u64 },
}

impl BudgetSource {
    pub fn resolve(self) -> ResourceBudget {
        match self {
            Self::System { fraction } => ResourceBudget::from_system(fraction),
            Self::Fixed { bytes } => ResourceBudget::new(bytes),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FleetSettings {
    pub budget: BudgetSource,
    pub controller: ControllerSettings,
}

impl Default for FleetSettings {
    fn default() -> Self {
        Self {
            budget: BudgetSource::System {
                fraction: ResourceBudget::DEFAULT_SYSTEM_FRACTION,
            },
            controller: ControllerSettings::default(),
        }
    }
}

/// 单台相机的操作结果
#[derive(Debug)]
pub struct CameraOutcome<T = ()> {
    pub identity: String,
    /// 在编排器中的下标 (打开失败的相机没有下标)
    pub index: Option<usize>,
    pub result: Result<T>,
}

/// 一次广播操作的汇总
#[derive(Debug)]
pub struct FleetReport<T = ()> {
    pub outcomes: Vec<CameraOutcome<T>>,
}

impl<T> Default for FleetReport<T> {
    fn default() -> Self {
        Self {
            outcomes: Vec::new(),
        }
    }
}

impl<T> FleetReport<T> {
    fn push(&mut self, identity: String, index: Option<usize>, result: Result<T>) {
        self.outcomes.push(CameraOutcome {
            identity,
            index,
            result,
        });
    }

    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &CameraOutcome<T>> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

/// 被排除在外的相机
#[derive(Debug, Clone, PartialEq)]
pub struct ExcludedCamera {
    pub info: DeviceInfo,
    pub kind: ErrorKind,
    pub reason: String,
}

/// 多相机编排器。没有全局单例，由调用方显式构造并持有。
pub struct FleetCoordinator {
    driver: Arc<dyn Driver>,
    configs: Arc<dyn ConfigProvider>,
    encoder: Arc<dyn EncoderFactory>,
    preview: Option<Arc<dyn PreviewFactory>>,
    settings: FleetSettings,
    controllers: Vec<CaptureController>,
    excluded: Vec<ExcludedCamera>,
    allocations: Vec<QueueAllocation>,
}

impl std::fmt::Debug for FleetCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetCoordinator")
            .field("controllers", &self.controllers)
            .field("excluded", &self.excluded)
            .field("settings", &self.settings)
            .finish()
    }
}

impl FleetCoordinator {
    pub fn new(
        driver: Arc<dyn Driver>,
        configs: Arc<dyn ConfigProvider>,
        encoder: Arc<dyn EncoderFactory>,
    ) -> Self {
        Self {
            driver,
            configs,
            encoder,
            preview: None,
            settings: FleetSettings::default(),
            controllers: Vec::new(),
            excluded: Vec::new(),
            allocations: Vec::new(),
        }
    }

    pub fn with_preview(mut self, preview: Arc<dyn PreviewFactory>) -> Self {
        self.preview = Some(preview);
        self
    }

    pub fn with_settings(mut self, settings: FleetSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    /// 打开失败或被剔除的相机
    pub fn excluded(&self) -> &[ExcludedCamera] {
        &self.excluded
    }

    /// 最近一次采集启动时的分配结果 (与控制器一一对应)
    pub fn allocations(&self) -> &[QueueAllocation] {
        &self.allocations
    }

    pub fn controller(&self, index: usize) -> Result<&CaptureController> {
        let len = self.controllers.len();
        self.controllers
            .get(index)
            .ok_or(CaptureError::IndexOutOfRange { index, len })
    }

    fn controller_mut(&mut self, index: usize) -> Result<&mut CaptureController> {
        let len = self.controllers.len();
        self.controllers
            .get_mut(index)
            .ok_or(CaptureError::IndexOutOfRange { index, len })
    }

    pub fn identities(&self) -> Vec<String> {
        self.controllers.iter().map(|c| c.identity()).collect()
    }

    pub fn states(&self) -> Vec<CaptureState> {
        self.controllers.iter().map(|c| c.state()).collect()
    }

    /// 枚举并打开全部相机
    ///
    /// 已有的相机先全部关闭。打开失败的相机被排除并记录在报告里，
    /// 一台都没有打开时返回 `NoCamerasAvailable`。
    pub async fn open_all(&mut self) -> Result<FleetReport> {
        if !self.controllers.is_empty() {
            self.close_all().await;
        }
        self.excluded.clear();
        self.allocations.clear();

        let devices = self.driver.list_devices()?;
        tracing::info!(target: "multicam::fleet", "Found {} cameras", devices.len());

        let mut report = FleetReport::default();
        for info in devices {
            let identity = info.identity();
            let opened = open_one(
                Arc::clone(&self.driver),
                Arc::clone(&self.configs),
                Arc::clone(&self.encoder),
                self.preview.clone(),
                self.settings.controller,
                &info,
            )
            .await;
            match opened {
                Ok(controller) => {
                    report.push(identity, Some(self.controllers.len()), Ok(()));
                    self.controllers.push(controller);
                }
                Err(err) => {
                    tracing::warn!(
                        target: "multicam::fleet",
                        "Excluding {}: {}",
                        identity,
                        err
                    );
                    self.excluded.push(ExcludedCamera {
                        info,
                        kind: err.kind(),
                        reason: err.to_string(),
                    });
                    report.push(identity, None, Err(err));
                }
            }
        }

        if self.controllers.is_empty() {
            return Err(CaptureError::NoCamerasAvailable);
        }
        Ok(report)
    }

    /// 读取一次预算、分配一次，按容量启动每台相机的采集
    pub async fn start_acquisition_all(&mut self) -> Result<FleetReport> {
        if self.controllers.is_empty() {
            return Err(CaptureError::Allocation(
                "no cameras to allocate memory for".to_string(),
            ));
        }

        let budget = self.settings.budget.resolve();
        let profiles: Vec<StreamProfile> = self.controllers.iter().map(|c| c.profile()).collect();
        let allocations = allocator::allocate(&profiles, budget)?;

        let mut report = FleetReport::default();
        for (index, (controller, alloc)) in self.controllers.iter_mut().zip(&allocations).enumerate() {
            let result = controller.start_acquisition(alloc.capacity).await;
            report.push(controller.identity(), Some(index), result);
        }
        self.allocations = allocations;
        Ok(report)
    }

    /// 每台相机开始录制，返回各自的输出文件
    pub fn start_recording_all(&mut self) -> FleetReport<PathBuf> {
        let mut report = FleetReport::default();
        for (index, controller) in self.controllers.iter().enumerate() {
            report.push(controller.identity(), Some(index), controller.start_capture());
        }
        report
    }

    /// 每台相机进入 Draining，已排队的帧会继续写完
    pub fn stop_recording_all(&mut self) -> FleetReport {
        let mut report = FleetReport::default();
        for (index, controller) in self.controllers.iter().enumerate() {
            let result = if controller.is_closed() {
                Err(CaptureError::Closed)
            } else {
                controller.stop_capture();
                Ok(())
            };
            report.push(controller.identity(), Some(index), result);
        }
        report
    }

    pub async fn stop_acquisition_all(&mut self) -> FleetReport {
        let mut report = FleetReport::default();
        for (index, controller) in self.controllers.iter_mut().enumerate() {
            let result = controller.stop_acquisition().await;
            report.push(controller.identity(), Some(index), result);
        }
        report
    }

    pub fn set_parameters(&mut self, index: usize, config: CaptureConfig) -> Result<()> {
        self.controller_mut(index)?.apply_config(config)
    }

    pub fn parameters(&self, index: usize) -> Result<CameraParameters> {
        self.controller(index)?.parameters()
    }

    pub fn config(&self, index: usize) -> Result<CaptureConfig> {
        Ok(self.controller(index)?.config())
    }

    /// 取走某台相机最近一次编码错误
    pub fn take_error(&mut self, index: usize) -> Result<Option<CaptureError>> {
        Ok(self.controller_mut(index)?.take_error())
    }

    pub fn health(&self, index: usize) -> Result<CaptureTelemetry> {
        Ok(self.controller(index)?.telemetry())
    }

    /// 关闭并剔除已被判定为不可用的相机，返回被剔除的设备
    ///
    /// 剩余相机的下标会前移。
    pub async fn prune_unavailable(&mut self) -> Vec<DeviceInfo> {
        let (lost, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.controllers)
            .into_iter()
            .partition(|c| c.is_unavailable());
        self.controllers = kept;
        if !lost.is_empty() {
            // 分配结果与下标不再对应
            self.allocations.clear();
        }

        let mut pruned = Vec::with_capacity(lost.len());
        for mut controller in lost {
            let info = controller.info().clone();
            if let Err(err) = controller.close().await {
                tracing::warn!(
                    target: "multicam::fleet",
                    "Closing lost camera {}: {}",
                    info.identity(),
                    err
                );
            }
            tracing::warn!(target: "multicam::fleet", "Excluded lost camera {}", info.identity());
            self.excluded.push(ExcludedCamera {
                info: info.clone(),
                kind: ErrorKind::Device,
                reason: "camera became unavailable during acquisition".to_string(),
            });
            pruned.push(info);
        }
        pruned
    }

    /// 停止录制 → 停止采集 → 关闭设备。重复调用无副作用。
    pub async fn close_all(&mut self) -> FleetReport {
        let mut report = FleetReport::default();
        if self.controllers.is_empty() {
            return report;
        }

        // 所有相机都停止采集之后才开始关闭设备
        for controller in &self.controllers {
            controller.stop_capture();
        }
        let mut stopped = Vec::with_capacity(self.controllers.len());
        for controller in self.controllers.iter_mut() {
            stopped.push(controller.stop_acquisition().await);
        }
        let controllers = std::mem::take(&mut self.controllers);
        for (index, (mut controller, stop)) in controllers.into_iter().zip(stopped).enumerate() {
            let closed = controller.close().await;
            // 先报告停止采集时的错误
            report.push(controller.identity(), Some(index), stop.and(closed));
        }
        self.allocations.clear();
        tracing::info!(target: "multicam::fleet", "All cameras closed");
        report
    }
}

/// 连接并打开单台相机 (不借用编排器，future 可以跨线程)
async fn open_one(
    driver: Arc<dyn Driver>,
    configs: Arc<dyn ConfigProvider>,
    encoder: Arc<dyn EncoderFactory>,
    preview: Option<Arc<dyn PreviewFactory>>,
    settings: ControllerSettings,
    info: &DeviceInfo,
) -> Result<CaptureController> {
    let source = driver.connect(info)?;
    let config = configs.camera_config(&info.identity());
    CaptureController::open(source, config, encoder, preview, settings).await
}

impl Drop for FleetCoordinator {
    fn drop(&mut self) {
        if !self.controllers.is_empty() {
            tracing::warn!(
                target: "multicam::fleet",
                "Coordinator dropped with {} open cameras, call close_all() first",
                self.controllers.len()
            );
        }
    }
}
