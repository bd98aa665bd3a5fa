// 该文件是 Maoyan （猫眼） 项目的一部分。
// src/output.rs - 标注结果与输出定义
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use chrono::{DateTime, Utc};
use image::RgbImage;
use thiserror::Error;
use url::Url;

use crate::{FromUrl, detector::BBox};

mod draw;
pub use self::draw::{Annotator, format_confidence};

#[cfg(feature = "save_image_file")]
mod save_image_file;
#[cfg(feature = "save_image_file")]
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

/// 画在帧上的一个标签
#[derive(Debug, Clone, PartialEq)]
pub struct DrawnLabel {
  pub text: String,
  pub bbox: BBox,
  /// 文字左上角
  pub origin: (i32, i32),
}

/// 标注后的帧，发布到帧总线后只读
#[derive(Debug, Clone)]
pub struct AnnotatedFrame {
  pub image: RgbImage,
  pub sequence: u64,
  pub captured_at: DateTime<Utc>,
  pub armed: bool,
  pub labels: Vec<DrawnLabel>,
}

pub trait Render: Sized {
  type Error;
  fn render(&self, frame: &AnnotatedFrame) -> Result<(), Self::Error>;
}

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "save_image_file")]
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum OutputWrapper {
  #[cfg(feature = "save_image_file")]
  SaveImageFileOutput(SaveImageFileOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "save_image_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == SaveImageFileOutput::SCHEME {
        let output = SaveImageFileOutput::from_url(url)?;
        return Ok(OutputWrapper::SaveImageFileOutput(output));
      }
    }
    Err(OutputError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl Render for OutputWrapper {
  type Error = OutputError;

  fn render(&self, frame: &AnnotatedFrame) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFileOutput(output) => output.render(frame).map_err(OutputError::from),
      #[allow(unreachable_patterns)]
      _ => unreachable!("没有启用任何输出"),
    }
  }
}
