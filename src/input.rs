// 该文件是 Maoyan （猫眼） 项目的一部分。
// src/input.rs - 摄像头/图像输入
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

use thiserror::Error;

use crate::{FromUrl, frame::RawFrame};

/// 摄像头：每次调用采集一帧原始数据
///
/// 摄像头由采集循环独占，因此只要求 `Send`。
pub trait Camera: Send {
  type Error: std::error::Error + Send + Sync + 'static;

  fn capture_frame(&mut self) -> Result<RawFrame, Self::Error>;
}

impl<C: Camera + ?Sized> Camera for Box<C> {
  type Error = C::Error;

  fn capture_frame(&mut self) -> Result<RawFrame, Self::Error> {
    (**self).capture_frame()
  }
}

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

#[cfg(feature = "v4l2_input")]
mod v4l2_input;
#[cfg(feature = "v4l2_input")]
pub use self::v4l2_input::{V4l2Input, V4l2InputError};

#[derive(Error, Debug)]
pub enum CameraError {
  #[cfg(feature = "read_image_file")]
  #[error("图像文件输入错误: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[cfg(feature = "v4l2_input")]
  #[error("V4L2 输入错误: {0}")]
  V4l2InputError(#[from] V4l2InputError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum InputWrapper {
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileInput),
  #[cfg(feature = "v4l2_input")]
  V4l2(V4l2Input),
}

impl FromUrl for InputWrapper {
  type Error = CameraError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "read_image_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ImageFileInput::SCHEME {
        let input = ImageFileInput::from_url(url)?;
        return Ok(InputWrapper::ReadImageFile(input));
      }
    }
    #[cfg(feature = "v4l2_input")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == V4l2Input::SCHEME {
        let input = V4l2Input::from_url(url)?;
        return Ok(InputWrapper::V4l2(input));
      }
    }
    Err(CameraError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl Camera for InputWrapper {
  type Error = CameraError;

  fn capture_frame(&mut self) -> Result<RawFrame, Self::Error> {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.capture_frame().map_err(CameraError::from),
      #[cfg(feature = "v4l2_input")]
      InputWrapper::V4l2(input) => input.capture_frame().map_err(CameraError::from),
      #[allow(unreachable_patterns)]
      _ => unreachable!("没有启用任何输入源"),
    }
  }
}
