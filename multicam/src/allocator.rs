//! 跨相机的内存预算分配
//!
//! 每台相机的权重 = 单帧字节数 × 帧率²。
//! 帧率取平方：高帧率相机不仅每秒产生更多字节，编码跟不上时积压也增长得更快。

use multicam_core::error::{CaptureError, Result};
use multicam_core::frame::StreamProfile;
use sysinfo::System;

/// 单个队列的容量上限 (帧)。帧很小而预算很大时，
/// 按字节换算出的容量没有意义，只会让录制停止后的收尾变得很长
pub const MAX_QUEUE_FRAMES: usize = 4096;

/// 一次分配可用的总内存
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceBudget {
    pub total_available_bytes: u64,
}

impl ResourceBudget {
    pub const DEFAULT_SYSTEM_FRACTION: f64 = 0.5;

    pub fn new(total_available_bytes: u64) -> Self {
        Self {
            total_available_bytes,
        }
    }

    /// 读取当前可用物理内存，取其中 `fraction` 作为预算
    pub fn from_system(fraction: f64) -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        let available = sys.available_memory();
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            Self::DEFAULT_SYSTEM_FRACTION
        };
        let total = (available as f64 * fraction) as u64;
        tracing::debug!(
            target: "multicam::allocator",
            "Available memory {} bytes, budget {} bytes",
            available,
            total
        );
        Self::new(total)
    }
}

/// 单台相机的分配结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueueAllocation {
    pub weight: f64,
    pub share: f64,
    pub bytes: u64,
    /// 队列容量 (帧)，在 `1..=MAX_QUEUE_FRAMES` 之间
    pub capacity: usize,
}

// 带宽 × 帧率
fn weight(profile: &StreamProfile) -> f64 {
    profile.bandwidth() * profile.native_frame_rate.max(0.0)
}

/// 按带宽权重把预算分给每台相机，结果与输入一一对应
pub fn allocate(profiles: &[StreamProfile], budget: ResourceBudget) -> Result<Vec<QueueAllocation>> {
    if profiles.is_empty() {
        return Ok(Vec::new());
    }

    let weights: Vec<f64> = profiles.iter().map(weight).collect();
    let total_weight: f64 = weights.iter().sum();
    if !(total_weight.is_finite() && total_weight > 0.0) {
        return Err(CaptureError::Allocation(format!(
            "total stream weight is {total_weight}, cannot divide budget"
        )));
    }

    let total = budget.total_available_bytes as f64;
    let allocations = profiles
        .iter()
        .zip(weights)
        .map(|(profile, weight)| {
            let share = weight / total_weight;
            let bytes = (total * share).floor() as u64;
            let per_frame = profile.frame_byte_size.max(1) as u64;
            let frames = usize::try_from(bytes / per_frame).unwrap_or(usize::MAX);
            let capacity = frames.clamp(1, MAX_QUEUE_FRAMES);
            QueueAllocation {
                weight,
                share,
                bytes,
                capacity,
            }
        })
        .collect::<Vec<_>>();

    for (profile, alloc) in profiles.iter().zip(&allocations) {
        tracing::info!(
            target: "multicam::allocator",
            "{}x{} {} @ {:.1} fps: {:.1}% of budget, {} frames",
            profile.width,
            profile.height,
            profile.native_format,
            profile.native_frame_rate,
            alloc.share * 100.0,
            alloc.capacity
        );
    }

    Ok(allocations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use multicam_core::pixel_format::PixelFormat;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn single_stream_gets_whole_budget() {
        let profile = StreamProfile::new(640, 480, 30.0, PixelFormat::Mono8);
        let out = allocate(&[profile], ResourceBudget::new(100 * MIB)).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].share, 1.0);
        assert_eq!(out[0].bytes, 100 * MIB);
        assert_eq!(out[0].capacity, (100 * MIB / 307_712) as usize);
    }

    #[test]
    fn two_streams_split_by_bandwidth_squared() {
        let a = StreamProfile::new(640, 480, 30.0, PixelFormat::Mono8);
        let b = StreamProfile::new(1280, 1024, 60.0, PixelFormat::Rgb8);
        assert_eq!(a.frame_byte_size, 307_712);
        assert_eq!(b.frame_byte_size, 3_932_672);

        let out = allocate(&[a, b], ResourceBudget::new(100 * MIB)).unwrap();
        let wa = 307_712.0 * 900.0;
        let wb = 3_932_672.0 * 3600.0;
        assert!((out[0].share - wa / (wa + wb)).abs() < 1e-12);
        assert!((out[0].share + out[1].share - 1.0).abs() < 1e-12);
        assert_eq!(out[0].capacity, 6);
        assert_eq!(out[1].capacity, 26);
        assert!(out[0].bytes + out[1].bytes <= 100 * MIB);
    }

    #[test]
    fn tiny_budget_still_yields_one_frame() {
        let profile = StreamProfile::new(1920, 1080, 60.0, PixelFormat::Rgb8);
        let out = allocate(&[profile], ResourceBudget::new(1024)).unwrap();
        assert_eq!(out[0].capacity, 1);
    }

    #[test]
    fn tiny_frames_are_capped() {
        let profile = StreamProfile::new(1, 1, 30.0, PixelFormat::Mono8);
        let out = allocate(&[profile], ResourceBudget::new(64 * 1024 * MIB)).unwrap();
        assert_eq!(out[0].bytes, 64 * 1024 * MIB);
        assert_eq!(out[0].capacity, MAX_QUEUE_FRAMES);
    }

    #[test]
    fn weight_is_bandwidth_times_frame_rate() {
        let profile = StreamProfile::new(640, 480, 30.0, PixelFormat::Mono8);
        assert_eq!(weight(&profile), profile.bandwidth() * 30.0);
        assert_eq!(weight(&profile), 307_712.0 * 900.0);
    }

    #[test]
    fn empty_input_is_empty_output() {
        assert!(allocate(&[], ResourceBudget::new(MIB)).unwrap().is_empty());
    }

    #[test]
    fn zero_weight_is_allocation_error() {
        let still = StreamProfile::new(640, 480, 0.0, PixelFormat::Mono8);
        let err = allocate(&[still], ResourceBudget::new(MIB)).unwrap_err();
        assert_eq!(err.kind(), multicam_core::error::ErrorKind::Allocation);
    }

    #[test]
    fn system_budget_is_readable() {
        let budget = ResourceBudget::from_system(0.0);
        assert_eq!(budget.total_available_bytes, 0);
    }
}
