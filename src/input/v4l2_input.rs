// 该文件是 Maoyan （猫眼） 项目的一部分。
// src/input/v4l2_input.rs - V4L2 摄像头输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use thiserror::Error;
use tracing::{info, warn};
use url::Url;
use v4l::FourCC;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{FrameError, PixelFormat, RawFrame},
  input::Camera,
};

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum V4l2InputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("无法打开设备 {0}: {1}")]
  OpenDevice(String, std::io::Error),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("设备不支持 YUYV 格式，实际格式: {0}")]
  UnsupportedFormat(String),
  #[error("无效的查询参数: {0}")]
  InvalidQuery(String),
  #[error("帧错误: {0}")]
  FrameError(#[from] FrameError),
  #[error("捕获流未初始化")]
  NoStream,
}

/// V4L2 摄像头输入源
///
/// `v4l2:///dev/video0?width=640&height=480`
///
/// v4l 的 Stream 需要引用 Device，这里把 Device 放在 Box 中保证地址稳定，
/// 从而可以安全地创建引用它的 Stream。
pub struct V4l2Input {
  /// 捕获流（生命周期与 device 关联，必须先于 device 释放）
  stream: Option<Stream<'static>>,
  device: Box<Device>,
  width: u32,
  height: u32,
}

impl FromUrlWithScheme for V4l2Input {
  const SCHEME: &'static str = "v4l2";
}

impl FromUrl for V4l2Input {
  type Error = V4l2InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(V4l2InputError::SchemeMismatch);
    }

    let mut width = DEFAULT_WIDTH;
    let mut height = DEFAULT_HEIGHT;
    for (k, v) in url.query_pairs() {
      let parse = |v: &str| {
        v.parse::<u32>()
          .map_err(|_| V4l2InputError::InvalidQuery(format!("{}={}", k, v)))
      };
      match k.as_ref() {
        "width" => width = parse(&v)?,
        "height" => height = parse(&v)?,
        _ => warn!("忽略未知参数: {}", k),
      }
    }

    V4l2Input::open(&crate::url_path(url), width, height)
  }
}

impl V4l2Input {
  pub fn open(device_path: &str, width: u32, height: u32) -> Result<Self, V4l2InputError> {
    let device = Box::new(
      Device::with_path(device_path)
        .map_err(|e| V4l2InputError::OpenDevice(device_path.to_string(), e))?,
    );

    // 设置视频格式
    let mut format = device.format()?;
    format.width = width;
    format.height = height;
    format.fourcc = FourCC::new(b"YUYV");
    let format = device.set_format(&format)?;

    if format.fourcc != FourCC::new(b"YUYV") {
      return Err(V4l2InputError::UnsupportedFormat(format.fourcc.to_string()));
    }

    info!(
      "V4L2 设备已打开: {} ({}x{})",
      device_path, format.width, format.height
    );

    let mut input = Self {
      stream: None,
      device,
      width: format.width,
      height: format.height,
    };

    // SAFETY: device 在堆上且不会移动；stream 与 device 存放在同一结构体中，
    // Drop 时先取出 stream 再释放 device
    let device_ref: &Device = &input.device;
    let stream = unsafe {
      let device_static: &'static Device = std::mem::transmute(device_ref);
      Stream::with_buffers(device_static, Type::VideoCapture, STREAM_BUFFERS)?
    };

    input.stream = Some(stream);
    Ok(input)
  }
}

impl Drop for V4l2Input {
  fn drop(&mut self) {
    // 确保 stream 在 device 之前被 drop
    self.stream.take();
  }
}

impl Camera for V4l2Input {
  type Error = V4l2InputError;

  fn capture_frame(&mut self) -> Result<RawFrame, Self::Error> {
    let stream = self.stream.as_mut().ok_or(V4l2InputError::NoStream)?;
    let (buffer, _meta) = stream.next()?;

    // 部分驱动返回的缓冲区比有效数据长
    let expected = PixelFormat::Yuyv.expected_len(self.width, self.height);
    let data = buffer[..expected.min(buffer.len())].to_vec();

    Ok(RawFrame::new(
      self.width,
      self.height,
      PixelFormat::Yuyv,
      data,
    )?)
  }
}
