// 该文件是 Maoyan （猫眼） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入（静态图像/目录回放摄像头）
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{
  path::{Path, PathBuf},
  thread,
  time::{Duration, Instant},
};

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{FrameError, PixelFormat, RawFrame},
  input::Camera,
};

const DEFAULT_INTERVAL_MS: u64 = 100;
const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("No image found in {0}")]
  NoImage(String),
  #[error("Invalid query parameter: {0}")]
  InvalidQuery(String),
  #[error("Frame error: {0}")]
  FrameError(#[from] FrameError),
}

/// 把一张图片或一个目录中的图片当作摄像头循环输出
///
/// `image:///path/to/cat.jpg?interval_ms=100`
pub struct ImageFileInput {
  images: Vec<RgbImage>,
  cursor: usize,
  interval: Duration,
  next_due: Option<Instant>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    let mut interval = Duration::from_millis(DEFAULT_INTERVAL_MS);
    for (k, v) in url.query_pairs() {
      if k == "interval_ms" {
        let ms = v
          .parse::<u64>()
          .map_err(|_| ImageFileInputError::InvalidQuery(format!("interval_ms={}", v)))?;
        interval = Duration::from_millis(ms);
      }
    }

    let path = PathBuf::from(crate::url_path(url));
    let images = load_images(&path)?;
    info!("已加载 {} 张图像: {}", images.len(), path.display());

    Ok(ImageFileInput::new(images, interval))
  }
}

impl ImageFileInput {
  pub fn new(images: Vec<RgbImage>, interval: Duration) -> Self {
    Self {
      images,
      cursor: 0,
      interval,
      next_due: None,
    }
  }
}

fn load_images(path: &Path) -> Result<Vec<RgbImage>, ImageFileInputError> {
  let files = if path.is_dir() {
    let mut files = std::fs::read_dir(path)?
      .filter_map(|entry| entry.ok().map(|e| e.path()))
      .filter(|p| {
        p.extension()
          .and_then(|ext| ext.to_str())
          .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
          .unwrap_or(false)
      })
      .collect::<Vec<_>>();
    files.sort();
    files
  } else {
    vec![path.to_path_buf()]
  };

  if files.is_empty() {
    return Err(ImageFileInputError::NoImage(path.display().to_string()));
  }

  files
    .iter()
    .map(|file| {
      debug!("读取图像: {}", file.display());
      Ok(ImageReader::open(file)?.decode()?.to_rgb8())
    })
    .collect()
}

impl Camera for ImageFileInput {
  type Error = ImageFileInputError;

  fn capture_frame(&mut self) -> Result<RawFrame, Self::Error> {
    // 按照设定的帧间隔输出，模拟真实摄像头的帧率
    if let Some(due) = self.next_due {
      let now = Instant::now();
      if due > now {
        thread::sleep(due - now);
      }
    }
    self.next_due = Some(Instant::now() + self.interval);

    let Some(image) = self.images.get(self.cursor) else {
      return Err(ImageFileInputError::NoImage("回放列表为空".to_string()));
    };
    self.cursor = (self.cursor + 1) % self.images.len();

    Ok(RawFrame::new(
      image.width(),
      image.height(),
      PixelFormat::Rgb24,
      image.as_raw().clone(),
    )?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn cycles_through_images() {
    let red = RgbImage::from_pixel(4, 4, Rgb([255, 0, 0]));
    let blue = RgbImage::from_pixel(4, 4, Rgb([0, 0, 255]));
    let mut input = ImageFileInput::new(vec![red, blue], Duration::ZERO);

    let first = input.capture_frame().unwrap();
    let second = input.capture_frame().unwrap();
    let third = input.capture_frame().unwrap();
    assert_eq!(&first.data[..3], &[255, 0, 0]);
    assert_eq!(&second.data[..3], &[0, 0, 255]);
    assert_eq!(&third.data[..3], &[255, 0, 0]);
    assert_eq!(first.format, PixelFormat::Rgb24);
  }

  #[test]
  fn rejects_other_schemes() {
    let url = Url::parse("v4l2:///dev/video0").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::SchemaMismatch)
    ));
  }

  #[test]
  fn missing_file_is_an_error() {
    let url = Url::parse("image:///definitely/not/here.jpg").unwrap();
    assert!(ImageFileInput::from_url(&url).is_err());
  }
}
