//! 像素格式转换
//!
//! 只实现采集/显示链路真正需要的目标格式：Mono8、RGB8、BGR8。
//! 任意表内格式都可以转换到这三种；其他目标格式只允许原样透传。

use crate::error::{CaptureError, Result};
use crate::frame::Frame;
use crate::pixel_format::PixelFormat;

const R: usize = 0;
const G: usize = 1;
const B: usize = 2;

/// 判断 from -> to 是否可以转换
pub fn is_supported(from: PixelFormat, to: PixelFormat) -> bool {
    from == to || matches!(to, PixelFormat::Mono8 | PixelFormat::Rgb8 | PixelFormat::Bgr8)
}

/// 转换一帧 (消耗输入)。格式相同时直接返回原 buffer，不做拷贝。
pub fn convert_frame(mut frame: Frame, to: PixelFormat) -> Result<Frame> {
    if frame.format == to {
        return Ok(frame);
    }
    frame.data = convert_pixels(&frame.data, frame.width, frame.height, frame.format, to)?;
    frame.format = to;
    Ok(frame)
}

/// 将一段 Packed 像素数据从 from 转换为 to
pub fn convert_pixels(
    src: &[u8],
    width: u32,
    height: u32,
    from: PixelFormat,
    to: PixelFormat,
) -> Result<Vec<u8>> {
    if !is_supported(from, to) {
        return Err(CaptureError::ConversionUnsupported { from, to });
    }

    let expected = from.frame_bytes(width, height);
    if src.len() < expected {
        return Err(CaptureError::device(format!(
            "incomplete {} frame: {} of {} bytes",
            from,
            src.len(),
            expected
        )));
    }
    let src = &src[..expected];
    let (w, h) = (width as usize, height as usize);

    match to {
        _ if from == to => Ok(src.to_vec()),
        PixelFormat::Mono8 => to_mono8(src, w, h, from),
        PixelFormat::Rgb8 => to_rgb8(src, w, h, from),
        PixelFormat::Bgr8 => {
            let mut rgb = to_rgb8(src, w, h, from)?;
            swap_red_blue(&mut rgb);
            Ok(rgb)
        }
        _ => Err(CaptureError::ConversionUnsupported { from, to }),
    }
}

fn to_mono8(src: &[u8], w: usize, h: usize, from: PixelFormat) -> Result<Vec<u8>> {
    let pixels = w * h;
    let mono = match from {
        PixelFormat::Mono8 => src.to_vec(),
        PixelFormat::Mono12Packed => {
            require_multiple(from, pixels, 2)?;
            // 每 3 字节两个像素：byte0 / byte2 是两个像素的高 8 位
            src.chunks_exact(3).flat_map(|c| [c[0], c[2]]).collect()
        }
        // Little Endian，取高字节
        PixelFormat::Mono16 => src.chunks_exact(2).map(|c| c[1]).collect(),
        PixelFormat::Rgb8 => src.chunks_exact(3).map(|c| luma(c[0], c[1], c[2])).collect(),
        PixelFormat::Bgr8 => src.chunks_exact(3).map(|c| luma(c[2], c[1], c[0])).collect(),
        PixelFormat::YCbCr8CbYCr => src.chunks_exact(3).map(|c| c[1]).collect(),
        PixelFormat::YCbCr422_8 => {
            require_multiple(from, pixels, 2)?;
            src.chunks_exact(4).flat_map(|c| [c[0], c[2]]).collect()
        }
        PixelFormat::YCbCr411_8 => {
            require_multiple(from, pixels, 4)?;
            src.chunks_exact(6)
                .flat_map(|c| [c[1], c[2], c[4], c[5]])
                .collect()
        }
        PixelFormat::BayerRG8
        | PixelFormat::BayerGB8
        | PixelFormat::BayerGR8
        | PixelFormat::BayerBG8
        | PixelFormat::BayerRG16 => {
            let rgb = to_rgb8(src, w, h, from)?;
            rgb.chunks_exact(3).map(|c| luma(c[0], c[1], c[2])).collect()
        }
    };
    Ok(mono)
}

fn to_rgb8(src: &[u8], w: usize, h: usize, from: PixelFormat) -> Result<Vec<u8>> {
    let pixels = w * h;
    let rgb = match from {
        PixelFormat::Mono8 => expand_gray(src),
        PixelFormat::Mono12Packed | PixelFormat::Mono16 => {
            let mono = to_mono8(src, w, h, from)?;
            expand_gray(&mono)
        }
        PixelFormat::Rgb8 => src.to_vec(),
        PixelFormat::Bgr8 => {
            let mut rgb = src.to_vec();
            swap_red_blue(&mut rgb);
            rgb
        }
        PixelFormat::BayerRG8 | PixelFormat::BayerGB8 | PixelFormat::BayerGR8 | PixelFormat::BayerBG8 => {
            demosaic(src, w, h, bayer_pattern(from))
        }
        PixelFormat::BayerRG16 => {
            let raw: Vec<u8> = src.chunks_exact(2).map(|c| c[1]).collect();
            demosaic(&raw, w, h, bayer_pattern(from))
        }
        PixelFormat::YCbCr8CbYCr => src
            .chunks_exact(3)
            .flat_map(|c| ycbcr_to_rgb(c[1], c[0], c[2]))
            .collect(),
        PixelFormat::YCbCr422_8 => {
            require_multiple(from, pixels, 2)?;
            let mut out = Vec::with_capacity(pixels * 3);
            for c in src.chunks_exact(4) {
                let (y0, cb, y1, cr) = (c[0], c[1], c[2], c[3]);
                out.extend_from_slice(&ycbcr_to_rgb(y0, cb, cr));
                out.extend_from_slice(&ycbcr_to_rgb(y1, cb, cr));
            }
            out
        }
        PixelFormat::YCbCr411_8 => {
            require_multiple(from, pixels, 4)?;
            let mut out = Vec::with_capacity(pixels * 3);
            for c in src.chunks_exact(6) {
                let (cb, cr) = (c[0], c[3]);
                for y in [c[1], c[2], c[4], c[5]] {
                    out.extend_from_slice(&ycbcr_to_rgb(y, cb, cr));
                }
            }
            out
        }
    };
    Ok(rgb)
}

fn require_multiple(format: PixelFormat, pixels: usize, n: usize) -> Result<()> {
    if pixels % n != 0 {
        return Err(CaptureError::Configuration(format!(
            "{} requires a pixel count divisible by {}, got {}",
            format, n, pixels
        )));
    }
    Ok(())
}

/// ITU-R BT.601 近似亮度
#[inline]
fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((77 * r as u32 + 150 * g as u32 + 29 * b as u32) >> 8) as u8
}

fn expand_gray(mono: &[u8]) -> Vec<u8> {
    mono.iter().flat_map(|&v| [v, v, v]).collect()
}

fn swap_red_blue(pixels: &mut [u8]) {
    for px in pixels.chunks_exact_mut(3) {
        px.swap(0, 2);
    }
}

/// BT.601 全范围 YCbCr -> RGB，16.16 定点
#[inline]
fn ycbcr_to_rgb(y: u8, cb: u8, cr: u8) -> [u8; 3] {
    let y = y as i32;
    let cb = cb as i32 - 128;
    let cr = cr as i32 - 128;
    let r = y + ((91_881 * cr) >> 16);
    let g = y - ((22_554 * cb + 46_802 * cr) >> 16);
    let b = y + ((116_130 * cb) >> 16);
    [clamp_u8(r), clamp_u8(g), clamp_u8(b)]
}

#[inline]
fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// 2x2 CFA 排列，按 [行][列] 给出通道
fn bayer_pattern(format: PixelFormat) -> [[usize; 2]; 2] {
    match format {
        PixelFormat::BayerGB8 => [[G, B], [R, G]],
        PixelFormat::BayerGR8 => [[G, R], [B, G]],
        PixelFormat::BayerBG8 => [[B, G], [G, R]],
        // BayerRG8 / BayerRG16
        _ => [[R, G], [G, B]],
    }
}

/// 双线性 Demosaic：缺失通道取 3x3 邻域内同色像素的平均值
fn demosaic(raw: &[u8], w: usize, h: usize, pattern: [[usize; 2]; 2]) -> Vec<u8> {
    let mut out = vec![0u8; w * h * 3];

    for y in 0..h {
        for x in 0..w {
            let own = pattern[y & 1][x & 1];
            let mut sum = [0u32; 3];
            let mut count = [0u32; 3];

            for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                    let channel = pattern[ny & 1][nx & 1];
                    sum[channel] += raw[ny * w + nx] as u32;
                    count[channel] += 1;
                }
            }

            let o = (y * w + x) * 3;
            for channel in [R, G, B] {
                out[o + channel] = if channel == own {
                    raw[y * w + x]
                } else if count[channel] > 0 {
                    (sum[channel] / count[channel]) as u8
                } else {
                    0
                };
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_format_moves_buffer() -> anyhow::Result<()> {
        let frame = Frame::new(vec![1, 2, 3, 4], 2, 2, PixelFormat::Mono8);
        let ptr = frame.data.as_ptr();
        let out = convert_frame(frame, PixelFormat::Mono8)?;
        assert_eq!(out.data.as_ptr(), ptr);
        Ok(())
    }

    #[test]
    fn every_format_reaches_display_formats() {
        let (w, h) = (8u32, 4u32);
        for from in PixelFormat::all() {
            let src = vec![0x80; from.frame_bytes(w, h)];
            for to in [PixelFormat::Mono8, PixelFormat::Rgb8, PixelFormat::Bgr8] {
                let out = convert_pixels(&src, w, h, from, to)
                    .unwrap_or_else(|e| panic!("{} -> {}: {}", from, to, e));
                assert_eq!(out.len(), to.frame_bytes(w, h), "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn unsupported_target_is_rejected() {
        let err = convert_pixels(&[0; 8], 2, 2, PixelFormat::Mono8, PixelFormat::Mono16).unwrap_err();
        assert!(matches!(err, CaptureError::ConversionUnsupported { .. }));
    }

    #[test]
    fn short_buffer_is_a_device_error() {
        let err = convert_pixels(&[0; 3], 2, 2, PixelFormat::Mono8, PixelFormat::Rgb8).unwrap_err();
        assert!(matches!(err, CaptureError::Device { permanent: false, .. }));
    }

    #[test]
    fn bgr_and_rgb_swap_channels() -> anyhow::Result<()> {
        let out = convert_pixels(&[10, 20, 30], 1, 1, PixelFormat::Bgr8, PixelFormat::Rgb8)?;
        assert_eq!(out, vec![30, 20, 10]);
        Ok(())
    }

    #[test]
    fn mono16_keeps_high_byte() -> anyhow::Result<()> {
        let src = [0x34, 0x12, 0xff, 0xab];
        let out = convert_pixels(&src, 2, 1, PixelFormat::Mono16, PixelFormat::Mono8)?;
        assert_eq!(out, vec![0x12, 0xab]);
        Ok(())
    }

    #[test]
    fn neutral_chroma_is_gray() -> anyhow::Result<()> {
        let out = convert_pixels(&[128, 200, 128], 1, 1, PixelFormat::YCbCr8CbYCr, PixelFormat::Rgb8)?;
        assert_eq!(out, vec![200, 200, 200]);
        Ok(())
    }

    #[test]
    fn uniform_bayer_demosaics_to_uniform_rgb() -> anyhow::Result<()> {
        let raw = vec![90u8; 16];
        let out = convert_pixels(&raw, 4, 4, PixelFormat::BayerRG8, PixelFormat::Rgb8)?;
        assert!(out.iter().all(|&v| v == 90));
        Ok(())
    }

    #[test]
    fn bayer_red_site_keeps_red_sample() -> anyhow::Result<()> {
        // RGGB：(0,0) 是红色像素
        let raw = [200, 50, 50, 10];
        let out = convert_pixels(&raw, 2, 2, PixelFormat::BayerRG8, PixelFormat::Rgb8)?;
        assert_eq!(&out[0..3], &[200, 50, 10]);
        Ok(())
    }

    #[test]
    fn odd_pixel_count_for_422_is_configuration_error() {
        let src = vec![0; PixelFormat::YCbCr422_8.frame_bytes(3, 1)];
        let err = convert_pixels(&src, 3, 1, PixelFormat::YCbCr422_8, PixelFormat::Mono8).unwrap_err();
        assert!(matches!(err, CaptureError::Configuration(_)));
    }
}
