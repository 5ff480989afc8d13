// 开启一些 Clippy 检查，保证代码质量
#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

// 模块定义
pub mod builder;
pub mod convert;
pub mod error;
pub mod frame;
pub mod pixel_format;
pub mod policy;
pub mod telemetry;
pub mod time;
pub mod traits;

// 方便用户使用的 Prelude
pub mod prelude {
    pub use crate::builder::{CaptureConfig, CodecKind, CodecOptions};
    pub use crate::error::{CaptureError, ErrorKind, Result};
    pub use crate::frame::{Frame, FrameMetadata, StreamProfile};
    pub use crate::pixel_format::PixelFormat;
    pub use crate::policy::{ConversionFlags, FormatResolution};
    pub use crate::traits::{
        CameraParameters, DeviceInfo, Driver, EncoderFactory, EncoderSession, FrameSource,
        PreviewFactory, PreviewSink, SourceControls, TriggerConfig,
    };
}

// 重新导出依赖中的关键类型，避免用户版本冲突
pub use async_trait::async_trait;

// 版本与构建信息常量
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
