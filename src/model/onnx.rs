// 该文件是 Maoyan （猫眼） 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 推理后端
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{InputTensor, Model, OutputLayer, RawOutput},
};

const DEFAULT_INPUT_SIZE: u32 = 320;

#[derive(Error, Debug)]
pub enum OnnxModelError {
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(#[from] ort::Error),
  #[error("无效的查询参数: {0}")]
  InvalidQuery(String),
}

/// 以 ONNX 格式导出的 Darknet/YOLO 检测网络
///
/// `onnx:///path/to/model.onnx?width=320&height=320`
///
/// 每个输出张量的最后一维视为一行 `[cx, cy, w, h, objectness, scores...]`。
pub struct OnnxModel {
  session: Session,
  input_width: u32,
  input_height: u32,
}

impl FromUrlWithScheme for OnnxModel {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for OnnxModel {
  type Error = OnnxModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OnnxModelError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let mut width = DEFAULT_INPUT_SIZE;
    let mut height = DEFAULT_INPUT_SIZE;
    for (k, v) in url.query_pairs() {
      let value = v
        .parse::<u32>()
        .map_err(|_| OnnxModelError::InvalidQuery(format!("{}={}", k, v)))?;
      match k.as_ref() {
        "width" => width = value,
        "height" => height = value,
        "size" => {
          width = value;
          height = value;
        }
        _ => return Err(OnnxModelError::InvalidQuery(k.to_string())),
      }
    }

    OnnxModel::load(&crate::url_path(url), width, height)
  }
}

impl OnnxModel {
  pub fn load(path: &str, input_width: u32, input_height: u32) -> Result<Self, OnnxModelError> {
    info!("加载模型文件: {}", path);
    let metadata = std::fs::metadata(path)
      .map_err(|e| OnnxModelError::ModelPathError(format!("{}: {}", path, e)))?;
    debug!(
      "模型文件大小: {:.2} MB",
      metadata.len() as f64 / (1024.0 * 1024.0)
    );

    let session = Session::builder()?
      .with_optimization_level(GraphOptimizationLevel::Level3)?
      .commit_from_file(path)?;
    info!(
      "模型加载完成，输入分辨率 {}x{}",
      input_width, input_height
    );

    Ok(Self {
      session,
      input_width,
      input_height,
    })
  }
}

impl Model for OnnxModel {
  type Error = OnnxModelError;

  fn input_size(&self) -> (u32, u32) {
    (self.input_width, self.input_height)
  }

  fn infer(&mut self, input: &InputTensor) -> Result<RawOutput, Self::Error> {
    debug!("设置模型输入");
    let tensor = Tensor::from_array((input.shape(), input.data.clone()))?;

    debug!("执行模型推理");
    let outputs = self.session.run(ort::inputs![tensor])?;

    let mut layers = Vec::new();
    for (name, value) in outputs.iter() {
      let (shape, data) = value.try_extract_tensor::<f32>()?;
      let row_len = shape.last().copied().unwrap_or(0).max(0) as usize;
      debug!("输出层 {}: 形状 {:?}", name, shape);
      layers.push(OutputLayer::new(row_len, data.to_vec()));
    }

    Ok(RawOutput { layers })
  }
}
