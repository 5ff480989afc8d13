//! 预览
//!
//! [`PreviewBoard`] 为每台相机保存最新一帧显示图像，采集任务通过
//! [`PreviewSink`] 写入，界面线程随时读取。开启 `preview-window` 特性后
//! 可以用 [`PreviewWindow`] 把它画到 minifb 窗口里。

use crate::core::RateMeter;
use anyhow::{anyhow, Result};
use multicam_core::pixel_format::PixelFormat;
use multicam_core::traits::{DeviceInfo, PreviewFactory, PreviewSink};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// 一帧显示图像 (Mono8 或 RGB8)
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewImage {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    /// 该相机累计送来的预览帧数
    pub frames: u64,
    /// 预览帧率 (每秒)
    pub fps: f64,
}

#[derive(Debug, Default)]
struct Slot {
    image: Option<PreviewImage>,
    meter: RateMeter,
}

/// 每台相机一块的预览板
#[derive(Debug, Clone, Default)]
pub struct PreviewBoard {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
}

impl PreviewBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 某台相机最近一帧
    pub fn latest(&self, identity: &str) -> Option<PreviewImage> {
        self.lock().get(identity).and_then(|slot| slot.image.clone())
    }

    /// 已经送来过预览的相机
    pub fn identities(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn publish(&self, identity: &str, format: PixelFormat, width: u32, height: u32, data: &[u8]) {
        let mut slots = self.lock();
        let slot = slots.entry(identity.to_string()).or_default();
        slot.meter.tick();

        // 尺寸不变时复用缓冲区
        match slot.image.as_mut() {
            Some(image) => {
                image.format = format;
                image.width = width;
                image.height = height;
                image.data.clear();
                image.data.extend_from_slice(data);
                image.frames = slot.meter.total();
                image.fps = slot.meter.rate();
            }
            None => {
                slot.image = Some(PreviewImage {
                    format,
                    width,
                    height,
                    data: data.to_vec(),
                    frames: slot.meter.total(),
                    fps: slot.meter.rate(),
                });
            }
        }
    }
}

struct BoardSink {
    identity: String,
    board: PreviewBoard,
}

impl PreviewSink for BoardSink {
    fn present_frame(&mut self, format: PixelFormat, width: u32, height: u32, data: &[u8]) {
        self.board.publish(&self.identity, format, width, height, data);
    }
}

impl PreviewFactory for PreviewBoard {
    fn sink_for(&self, info: &DeviceInfo) -> Box<dyn PreviewSink> {
        Box::new(BoardSink {
            identity: info.identity(),
            board: self.clone(),
        })
    }
}

/// 将 Mono8 / RGB8 图像转换为 minifb 需要的 0RGB u32 buffer
pub fn to_u32_buffer(image: &PreviewImage) -> Result<Vec<u32>> {
    let pixel_count = image.width as usize * image.height as usize;
    let channels = match image.format {
        PixelFormat::Mono8 => 1,
        PixelFormat::Rgb8 => 3,
        other => return Err(anyhow!("Cannot display {} directly", other)),
    };
    if image.data.len() < pixel_count * channels {
        return Err(anyhow!(
            "Preview buffer too short: {} < {}",
            image.data.len(),
            pixel_count * channels
        ));
    }

    let buffer = image
        .data
        .chunks_exact(channels)
        .take(pixel_count)
        .map(|px| match px {
            [y] => {
                let y = *y as u32;
                (y << 16) | (y << 8) | y
            }
            // Pack: 00 | R | G | B
            _ => ((px[0] as u32) << 16) | ((px[1] as u32) << 8) | px[2] as u32,
        })
        .collect();
    Ok(buffer)
}

#[cfg(feature = "preview-window")]
pub use window::PreviewWindow;

#[cfg(feature = "preview-window")]
mod window {
    use super::{to_u32_buffer, PreviewImage};
    use anyhow::{anyhow, Result};
    use minifb::{Key, Window, WindowOptions};

    /// 显示单台相机预览的窗口
    pub struct PreviewWindow {
        window: Window,
    }

    impl std::fmt::Debug for PreviewWindow {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("PreviewWindow").finish_non_exhaustive()
        }
    }

    impl PreviewWindow {
        pub fn new(title: &str, width: u32, height: u32) -> Result<Self> {
            let window = Window::new(
                title,
                width as usize,
                height as usize,
                WindowOptions {
                    resize: true, // 允许调整大小
                    ..WindowOptions::default()
                },
            )
            .map_err(|e| anyhow!("Failed to create window: {}", e))?;
            Ok(Self { window })
        }

        /// 窗口仍然打开且没有按下 ESC
        pub fn is_open(&self) -> bool {
            self.window.is_open() && !self.window.is_key_down(Key::Escape)
        }

        pub fn show(&mut self, image: &PreviewImage) -> Result<()> {
            let buffer = to_u32_buffer(image)?;
            self.window
                .update_with_buffer(&buffer, image.width as usize, image.height as usize)
                .map_err(|e| anyhow!("Window update failed: {}", e))
        }
    }
}
