// 该文件是 Maoyan （猫眼） 项目的一部分。
// src/output/save_image_file.rs - 保存标注图像
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

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{AnnotatedFrame, Render},
};

/// `image:///tmp/out.png`，格式由扩展名决定
pub struct SaveImageFileOutput {
  path: PathBuf,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    Ok(SaveImageFileOutput::new(crate::url_path(uri)))
  }
}

impl SaveImageFileOutput {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl Render for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render(&self, frame: &AnnotatedFrame) -> Result<(), Self::Error> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    frame.image.save(&self.path)?;
    info!(
      "保存第 {} 帧标注图像到文件: {}",
      frame.sequence,
      self.path.display()
    );

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Utc;
  use image::RgbImage;

  #[test]
  fn saves_into_missing_directory() {
    let dir = std::env::temp_dir().join(format!("maoyan-save-{}", std::process::id()));
    let path = dir.join("nested").join("out.png");
    let output = SaveImageFileOutput::new(&path);

    let frame = AnnotatedFrame {
      image: RgbImage::new(8, 8),
      sequence: 1,
      captured_at: Utc::now(),
      armed: false,
      labels: vec![],
    };
    output.render(&frame).unwrap();
    assert!(path.exists());

    std::fs::remove_dir_all(dir).unwrap();
  }

  #[test]
  fn rejects_other_schemes() {
    let url = Url::parse("file:///tmp/out.png").unwrap();
    assert!(matches!(
      SaveImageFileOutput::from_url(&url),
      Err(SaveImageFileError::SchemeMismatch(_))
    ));
  }
}
