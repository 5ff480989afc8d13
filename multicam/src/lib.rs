pub mod allocator;
pub mod capture;
pub mod config;
pub mod core;
pub mod fleet;
pub mod highgui;
pub mod queue;
pub mod videoio;

pub use multicam_core;

/// 预置模块，用户可以通过 `use multicam::prelude::*;` 导入常用项
pub mod prelude {
    pub use crate::allocator::{allocate, QueueAllocation, ResourceBudget};
    pub use crate::capture::{CaptureController, CaptureState, ControllerSettings};
    pub use crate::config::{ConfigProvider, ConfigStore};
    pub use crate::fleet::{BudgetSource, FleetCoordinator, FleetReport, FleetSettings};
    pub use crate::highgui::{PreviewBoard, PreviewImage};
    pub use crate::queue::FrameQueue;
    pub use crate::videoio::FileEncoderFactory;
    pub use multicam_core::prelude::*;
}
