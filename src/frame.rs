// 该文件是 Maoyan （猫眼） 项目的一部分。
// src/frame.rs - 帧定义
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use chrono::{DateTime, Utc};
use image::RgbImage;
use thiserror::Error;

const RGB_CHANNELS: usize = 3;

/// 摄像头原始像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
  Rgb24,
  Bgr24,
  /// YUV 4:2:2，每 4 字节两个像素
  Yuyv,
}

impl PixelFormat {
  pub fn expected_len(&self, width: u32, height: u32) -> usize {
    let pixels = width as usize * height as usize;
    match self {
      PixelFormat::Rgb24 | PixelFormat::Bgr24 => pixels * RGB_CHANNELS,
      PixelFormat::Yuyv => pixels * 2,
    }
  }
}

#[derive(Error, Debug)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
}

/// 摄像头采集到的原始缓冲区（颜色转换之前）
#[derive(Debug, Clone)]
pub struct RawFrame {
  pub width: u32,
  pub height: u32,
  pub format: PixelFormat,
  pub data: Vec<u8>,
}

impl RawFrame {
  pub fn new(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Result<Self, FrameError> {
    let expected = format.expected_len(width, height);
    if data.len() != expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }
    Ok(Self {
      width,
      height,
      format,
      data,
    })
  }

  /// 转换为 RGB 图像
  pub fn into_rgb(self) -> Result<RgbImage, FrameError> {
    let RawFrame {
      width,
      height,
      format,
      mut data,
    } = self;

    let rgb = match format {
      PixelFormat::Rgb24 => data,
      PixelFormat::Bgr24 => {
        for px in data.chunks_exact_mut(RGB_CHANNELS) {
          px.swap(0, 2);
        }
        data
      }
      PixelFormat::Yuyv => yuyv_to_rgb(&data, width, height),
    };

    let actual = rgb.len();
    RgbImage::from_raw(width, height, rgb).ok_or(FrameError::LengthMismatch {
      expected: width as usize * height as usize * RGB_CHANNELS,
      actual,
    })
  }
}

/// 将 YUYV 格式转换为 RGB
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Vec<u8> {
  let mut rgb = Vec::with_capacity((width * height) as usize * RGB_CHANNELS);

  for chunk in yuyv.chunks_exact(4) {
    let y0 = chunk[0] as f32;
    let u = chunk[1] as f32 - 128.0;
    let y1 = chunk[2] as f32;
    let v = chunk[3] as f32 - 128.0;

    for y in [y0, y1] {
      let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
      let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
      let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
      rgb.extend_from_slice(&[r, g, b]);
    }
  }

  rgb
}

/// 颜色转换后的帧，产生后不再修改
#[derive(Debug, Clone)]
pub struct Frame {
  /// RGB 图像数据
  pub image: RgbImage,
  /// 帧序号（单调递增）
  pub sequence: u64,
  /// 采集时间
  pub captured_at: DateTime<Utc>,
}

impl Frame {
  pub fn new(image: RgbImage, sequence: u64) -> Self {
    Self {
      image,
      sequence,
      captured_at: Utc::now(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn bgr_is_swapped_to_rgb() {
    let raw = RawFrame::new(2, 1, PixelFormat::Bgr24, vec![1, 2, 3, 4, 5, 6]).unwrap();
    let image = raw.into_rgb().unwrap();
    assert_eq!(image.get_pixel(0, 0).0, [3, 2, 1]);
    assert_eq!(image.get_pixel(1, 0).0, [6, 5, 4]);
  }

  #[test]
  fn yuyv_grey_stays_grey() {
    // U = V = 128 时没有色度
    let raw = RawFrame::new(2, 1, PixelFormat::Yuyv, vec![100, 128, 200, 128]).unwrap();
    let image = raw.into_rgb().unwrap();
    assert_eq!(image.get_pixel(0, 0).0, [100, 100, 100]);
    assert_eq!(image.get_pixel(1, 0).0, [200, 200, 200]);
  }

  #[test]
  fn wrong_length_is_rejected() {
    let err = RawFrame::new(4, 4, PixelFormat::Rgb24, vec![0; 10]).unwrap_err();
    assert!(matches!(
      err,
      FrameError::LengthMismatch {
        expected: 48,
        actual: 10
      }
    ));
  }
}
