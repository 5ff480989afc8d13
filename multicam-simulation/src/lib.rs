//! 仿真后端
//!
//! 没有真实硬件时用于演示和测试：
//! * [`SimulatedDriver`] / [`SimulatedCamera`]：按帧率生成测试图案，可注入故障
//! * [`MemoryEncoderFactory`]：把追加的帧记录在内存里，可注入写失败

pub mod camera;
pub mod encoder;

pub use camera::{Fault, SimulatedCamera, SimulatedCameraSpec, SimulatedDriver, SimulatedHandle};
pub use encoder::{MemoryEncoderFactory, SessionRecord};

use std::sync::{Mutex, MutexGuard, PoisonError};

// 仿真状态只有计数与标志位，锁中毒后继续使用即可
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
