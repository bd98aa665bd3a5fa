// 该文件是 Maoyan （猫眼） 项目的一部分。
// src/model.rs - 模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{borrow::Cow, path::Path};

use thiserror::Error;
use tracing::info;

use crate::FromUrl;

/// 推理后端
///
/// 模型由采集循环独占，`infer` 因此可以使用 `&mut self`。
pub trait Model: Send {
  type Error: std::error::Error + Send + Sync + 'static;

  /// 模型固定的输入分辨率 (宽, 高)
  fn input_size(&self) -> (u32, u32);

  fn infer(&mut self, input: &InputTensor) -> Result<RawOutput, Self::Error>;
}

impl<M: Model + ?Sized> Model for Box<M> {
  type Error = M::Error;

  fn input_size(&self) -> (u32, u32) {
    (**self).input_size()
  }

  fn infer(&mut self, input: &InputTensor) -> Result<RawOutput, Self::Error> {
    (**self).infer(input)
  }
}

/// NCHW 排列、归一化到 [0, 1] 的输入张量，批大小固定为 1
#[derive(Debug, Clone)]
pub struct InputTensor {
  pub width: u32,
  pub height: u32,
  pub data: Vec<f32>,
}

impl InputTensor {
  pub fn shape(&self) -> [usize; 4] {
    [1, 3, self.height as usize, self.width as usize]
  }
}

/// 一个输出层：按行存放的 `[cx, cy, w, h, objectness, score_0, score_1, ...]`
///
/// 坐标相对于输入尺寸归一化。
#[derive(Debug, Clone, Default)]
pub struct OutputLayer {
  pub row_len: usize,
  pub data: Vec<f32>,
}

/// 每行最少要有框坐标、目标置信度和一个类别分数
pub const MIN_ROW_LEN: usize = 6;

impl OutputLayer {
  pub fn new(row_len: usize, data: Vec<f32>) -> Self {
    Self { row_len, data }
  }

  pub fn is_well_formed(&self) -> bool {
    self.row_len >= MIN_ROW_LEN && !self.data.is_empty() && self.data.len() % self.row_len == 0
  }

  pub fn rows(&self) -> std::slice::ChunksExact<'_, f32> {
    self.data.chunks_exact(self.row_len.max(1))
  }
}

#[derive(Debug, Clone, Default)]
pub struct RawOutput {
  pub layers: Vec<OutputLayer>,
}

/// 类别名称表
#[derive(Debug, Clone)]
pub struct Labels(Vec<String>);

impl Default for Labels {
  fn default() -> Self {
    Labels(vec!["cat".to_string()])
  }
}

impl Labels {
  pub fn new<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
    Labels(names.into_iter().map(Into::into).collect())
  }

  /// 从文本文件读取，每行一个类别，忽略空行与 `#` 注释
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
    let content = std::fs::read_to_string(path.as_ref())?;
    let labels = Self::parse(&content);
    info!(
      "已加载 {} 个类别: {}",
      labels.len(),
      path.as_ref().display()
    );
    Ok(labels)
  }

  pub fn parse(content: &str) -> Self {
    Labels(
      content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect(),
    )
  }

  pub fn name(&self, class_id: usize) -> Cow<'_, str> {
    match self.0.get(class_id) {
      Some(name) => Cow::Borrowed(name.as_str()),
      None => Cow::Owned(format!("class{}", class_id)),
    }
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

#[cfg(feature = "model_onnx")]
mod onnx;
#[cfg(feature = "model_onnx")]
pub use self::onnx::{OnnxModel, OnnxModelError};

#[derive(Error, Debug)]
pub enum ModelError {
  #[cfg(feature = "model_onnx")]
  #[error("ONNX 模型错误: {0}")]
  OnnxModelError(#[from] OnnxModelError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum ModelWrapper {
  #[cfg(feature = "model_onnx")]
  Onnx(OnnxModel),
}

impl FromUrl for ModelWrapper {
  type Error = ModelError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "model_onnx")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == OnnxModel::SCHEME {
        return Ok(ModelWrapper::Onnx(OnnxModel::from_url(url)?));
      }
    }
    Err(ModelError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl Model for ModelWrapper {
  type Error = ModelError;

  fn input_size(&self) -> (u32, u32) {
    match self {
      #[cfg(feature = "model_onnx")]
      ModelWrapper::Onnx(model) => model.input_size(),
      #[allow(unreachable_patterns)]
      _ => unreachable!("没有启用任何推理后端"),
    }
  }

  fn infer(&mut self, input: &InputTensor) -> Result<RawOutput, Self::Error> {
    match self {
      #[cfg(feature = "model_onnx")]
      ModelWrapper::Onnx(model) => model.infer(input).map_err(ModelError::from),
      #[allow(unreachable_patterns)]
      _ => unreachable!("没有启用任何推理后端"),
    }
  }
}
