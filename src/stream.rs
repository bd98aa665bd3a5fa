// 该文件是 Maoyan （猫眼） 项目的一部分。
// src/stream.rs - MJPEG 多段流编码
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

use std::convert::Infallible;

use bytes::Bytes;
use futures::{Stream, stream};
use image::{RgbImage, codecs::jpeg::JpegEncoder};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{bus::Subscriber, output::AnnotatedFrame};

pub const BOUNDARY: &str = "frame";
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

const PART_HEADER: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
const PART_TRAILER: &[u8] = b"\r\n";

#[derive(Error, Debug)]
pub enum StreamError {
  #[error("JPEG 编码失败: {0}")]
  EncodeError(#[from] image::ImageError),
}

/// 把标注帧编码为 `multipart/x-mixed-replace` 的一段
#[derive(Debug, Clone, Copy)]
pub struct StreamEncoder {
  quality: u8,
}

impl Default for StreamEncoder {
  fn default() -> Self {
    Self::new(DEFAULT_JPEG_QUALITY)
  }
}

impl StreamEncoder {
  pub fn new(quality: u8) -> Self {
    Self {
      quality: quality.clamp(1, 100),
    }
  }

  pub fn quality(&self) -> u8 {
    self.quality
  }

  pub fn encode_jpeg(&self, image: &RgbImage) -> Result<Vec<u8>, StreamError> {
    let mut jpeg = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut jpeg, self.quality);
    image.write_with_encoder(encoder)?;
    Ok(jpeg)
  }

  pub fn encode_frame(&self, frame: &AnnotatedFrame) -> Result<Bytes, StreamError> {
    let jpeg = self.encode_jpeg(&frame.image)?;
    Ok(multipart_chunk(&jpeg))
  }

  /// 一个观看者的输出流
  ///
  /// 编码失败的帧被跳过；总线关闭时流结束。丢弃流即断开该观看者。
  pub fn stream(
    self,
    subscriber: Subscriber<AnnotatedFrame>,
  ) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    stream::unfold((self, subscriber), |(encoder, mut subscriber)| async move {
      loop {
        let Some(frame) = subscriber.consume().await else {
          debug!("帧总线已关闭，结束视频流");
          return None;
        };
        match encoder.encode_frame(&frame) {
          Ok(chunk) => return Some((Ok(chunk), (encoder, subscriber))),
          Err(e) => warn!("跳过第 {} 帧: {}", frame.sequence, e),
        }
      }
    })
  }
}

pub fn multipart_chunk(jpeg: &[u8]) -> Bytes {
  let mut chunk = Vec::with_capacity(PART_HEADER.len() + jpeg.len() + PART_TRAILER.len());
  chunk.extend_from_slice(PART_HEADER);
  chunk.extend_from_slice(jpeg);
  chunk.extend_from_slice(PART_TRAILER);
  Bytes::from(chunk)
}
