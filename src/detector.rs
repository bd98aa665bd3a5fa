// 该文件是 Maoyan （猫眼） 项目的一部分。
// src/detector.rs - 目标检测器
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use image::{RgbImage, imageops::FilterType};
use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{InputTensor, Labels, Model, RawOutput};

mod nms;
pub use self::nms::{NmsPolicy, iou, non_max_suppression};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_NMS_THRESHOLD: f32 = 0.4;

/// 像素坐标下的检测框，(x, y) 为左上角
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BBox {
  pub x: i32,
  pub y: i32,
  pub width: i32,
  pub height: i32,
}

impl BBox {
  pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
    Self {
      x,
      y,
      width,
      height,
    }
  }

  pub fn right(&self) -> i32 {
    self.x.saturating_add(self.width)
  }

  pub fn bottom(&self) -> i32 {
    self.y.saturating_add(self.height)
  }

  pub fn area(&self) -> f32 {
    self.width.max(0) as f32 * self.height.max(0) as f32
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  pub class_id: usize,
  pub label: String,
  pub confidence: f32,
  pub bbox: BBox,
}

/// 一次检测的结果，已经过阈值过滤与 NMS，按置信度降序
#[derive(Debug, Clone, Default)]
pub struct DetectionResult {
  pub detections: Vec<Detection>,
}

impl DetectionResult {
  pub fn empty() -> Self {
    Self::default()
  }

  /// 本帧是否有目标
  pub fn detected(&self) -> bool {
    !self.detections.is_empty()
  }

  /// 置信度最高的检测
  pub fn top(&self) -> Option<&Detection> {
    self.detections.first()
  }

  pub fn len(&self) -> usize {
    self.detections.len()
  }

  pub fn is_empty(&self) -> bool {
    self.detections.is_empty()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
    self.detections.iter()
  }
}

#[derive(Debug, Clone, Copy)]
pub struct DetectorConfig {
  /// 置信度阈值（严格大于才保留）
  pub confidence_threshold: f32,
  /// NMS IoU 阈值
  pub nms_threshold: f32,
  pub nms_policy: NmsPolicy,
  /// 输入模型前交换 R/B 通道
  pub swap_rb: bool,
}

impl Default for DetectorConfig {
  fn default() -> Self {
    Self {
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      nms_threshold: DEFAULT_NMS_THRESHOLD,
      nms_policy: NmsPolicy::default(),
      swap_rb: false,
    }
  }
}

#[derive(Error, Debug)]
pub enum DetectorError {
  #[error("推理失败: {0}")]
  Inference(#[source] Box<dyn std::error::Error + Send + Sync>),
}

pub struct Detector<M> {
  model: M,
  labels: Labels,
  config: DetectorConfig,
}

impl<M: Model> Detector<M> {
  pub fn new(model: M, labels: Labels, config: DetectorConfig) -> Self {
    Self {
      model,
      labels,
      config,
    }
  }

  /// 检测一帧 RGB 图像
  ///
  /// 推理后端出错时返回错误；输出层格式不对时视为没有检测到目标。
  pub fn detect(&mut self, image: &RgbImage) -> Result<DetectionResult, DetectorError> {
    let input = preprocess(image, self.model.input_size(), self.config.swap_rb);
    let output = self
      .model
      .infer(&input)
      .map_err(|e| DetectorError::Inference(Box::new(e)))?;
    Ok(self.postprocess(&output, image.width(), image.height()))
  }

  /// 将模型输出还原为原始帧上的像素坐标，并做阈值过滤与 NMS
  pub fn postprocess(&self, output: &RawOutput, width: u32, height: u32) -> DetectionResult {
    if output.layers.is_empty() {
      warn!("模型没有输出层");
      return DetectionResult::empty();
    }
    if let Some((idx, layer)) = output
      .layers
      .iter()
      .enumerate()
      .find(|(_, layer)| !layer.is_well_formed())
    {
      warn!(
        "输出层 {} 格式错误: 行长度 {}, 数据长度 {}",
        idx,
        layer.row_len,
        layer.data.len()
      );
      return DetectionResult::empty();
    }

    let mut detections = Vec::new();
    for row in output.layers.iter().flat_map(|layer| layer.rows()) {
      let Some((class_id, score)) = argmax(&row[5..]) else {
        continue;
      };
      // NaN 也会在这里被过滤
      if !(score > self.config.confidence_threshold) {
        continue;
      }

      let Some(bbox) = denormalize(&row[..4], width, height) else {
        continue;
      };

      detections.push(Detection {
        class_id,
        label: self.labels.name(class_id).into_owned(),
        confidence: score.min(1.0),
        bbox,
      });
    }

    let candidates = detections.len();
    non_max_suppression(
      &mut detections,
      self.config.nms_threshold,
      self.config.nms_policy,
    );
    debug!("候选框 {} 个，NMS 后保留 {} 个", candidates, detections.len());

    DetectionResult { detections }
  }
}

/// 归一化的 (cx, cy, w, h) 转为帧内像素框
///
/// 坐标就近取整，左上角为中心减去宽高的一半（向下取整），再裁剪到帧内。
/// 非有限值、空框或完全在帧外的框返回 `None`。
fn denormalize(coords: &[f32], width: u32, height: u32) -> Option<BBox> {
  let (w, h) = (width as f32, height as f32);
  let center_x = (coords[0] * w).round();
  let center_y = (coords[1] * h).round();
  let box_w = (coords[2] * w).round();
  let box_h = (coords[3] * h).round();
  if ![center_x, center_y, box_w, box_h].iter().all(|v| v.is_finite()) {
    return None;
  }
  if box_w < 1.0 || box_h < 1.0 {
    return None;
  }

  let left = center_x - (box_w / 2.0).floor();
  let top = center_y - (box_h / 2.0).floor();
  let (x0, y0) = (left.max(0.0), top.max(0.0));
  let (x1, y1) = ((left + box_w).min(w), (top + box_h).min(h));
  if x1 <= x0 || y1 <= y0 {
    return None;
  }
  Some(BBox::new(
    x0 as i32,
    y0 as i32,
    (x1 - x0) as i32,
    (y1 - y0) as i32,
  ))
}

fn argmax(scores: &[f32]) -> Option<(usize, f32)> {
  scores
    .iter()
    .copied()
    .enumerate()
    .fold(None, |best, (idx, score)| match best {
      Some((_, best_score)) if best_score >= score => best,
      _ if score.is_nan() => best,
      _ => Some((idx, score)),
    })
}

/// 缩放到模型输入分辨率，归一化到 [0, 1]，排列为 NCHW
pub fn preprocess(image: &RgbImage, (width, height): (u32, u32), swap_rb: bool) -> InputTensor {
  let resized;
  let source = if image.dimensions() == (width, height) {
    image
  } else {
    resized = image::imageops::resize(image, width, height, FilterType::Triangle);
    &resized
  };

  let plane = (width * height) as usize;
  let mut data = vec![0f32; plane * 3];
  for (x, y, pixel) in source.enumerate_pixels() {
    let idx = (y * width + x) as usize;
    for c in 0..3 {
      let channel = if swap_rb { 2 - c } else { c };
      data[c * plane + idx] = pixel[channel] as f32 / 255.0;
    }
  }

  InputTensor {
    width,
    height,
    data,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::OutputLayer;
  use image::Rgb;

  struct CannedModel(RawOutput);

  #[derive(Error, Debug)]
  #[error("canned")]
  struct CannedError;

  impl Model for CannedModel {
    type Error = CannedError;

    fn input_size(&self) -> (u32, u32) {
      (32, 32)
    }

    fn infer(&mut self, input: &InputTensor) -> Result<RawOutput, Self::Error> {
      assert_eq!(input.data.len(), 3 * 32 * 32);
      Ok(self.0.clone())
    }
  }

  fn row(cx: f32, cy: f32, w: f32, h: f32, scores: &[f32]) -> Vec<f32> {
    let mut row = vec![cx, cy, w, h, 1.0];
    row.extend_from_slice(scores);
    row
  }

  fn detector(rows: Vec<Vec<f32>>) -> Detector<CannedModel> {
    let row_len = rows.first().map(Vec::len).unwrap_or(6);
    let layer = OutputLayer::new(row_len, rows.concat());
    Detector::new(
      CannedModel(RawOutput {
        layers: vec![layer],
      }),
      Labels::new(["cat", "dog"]),
      DetectorConfig::default(),
    )
  }

  #[test]
  fn boxes_are_scaled_by_original_frame_size() {
    // 640x480 帧中 (100, 100, 50, 50) 的框，模型输入只有 32x32
    let rows = vec![row(125.0 / 640.0, 125.0 / 480.0, 50.0 / 640.0, 50.0 / 480.0, &[0.9, 0.1])];
    let mut detector = detector(rows);
    let image = RgbImage::new(640, 480);
    let result = detector.detect(&image).unwrap();

    assert!(result.detected());
    let det = result.top().unwrap();
    assert_eq!(det.label, "cat");
    assert_eq!(det.bbox, BBox::new(100, 100, 50, 50));
    assert!((det.confidence - 0.9).abs() < 1e-6);
  }

  #[test]
  fn threshold_is_exclusive() {
    let rows = vec![
      row(0.2, 0.2, 0.1, 0.1, &[0.5, 0.0]),
      row(0.7, 0.7, 0.1, 0.1, &[0.0, 0.500_000_1]),
    ];
    let detector = detector(rows);
    let result = detector.postprocess(&detector.model.0, 100, 100);
    assert_eq!(result.len(), 1);
    assert_eq!(result.top().unwrap().label, "dog");

    let low = vec![row(0.5, 0.5, 0.1, 0.1, &[0.3, 0.49])];
    let detector = self::detector(low);
    assert!(!detector.postprocess(&detector.model.0, 100, 100).detected());
  }

  #[test]
  fn argmax_picks_the_class() {
    assert_eq!(argmax(&[0.1, 0.7, 0.2]), Some((1, 0.7)));
    assert_eq!(argmax(&[f32::NAN, 0.6]), Some((1, 0.6)));
    assert_eq!(argmax(&[]), None);
  }

  #[test]
  fn malformed_layers_yield_no_detections() {
    let detector = detector(vec![row(0.5, 0.5, 0.2, 0.2, &[0.9])]);
    let bad = RawOutput {
      layers: vec![OutputLayer::new(4, vec![0.5; 8])],
    };
    assert!(!detector.postprocess(&bad, 100, 100).detected());
    assert!(!detector.postprocess(&RawOutput::default(), 100, 100).detected());
  }

  #[test]
  fn out_of_range_coordinates_are_dropped() {
    let rows = vec![
      row(-1e10, 0.5, 0.1, 0.1, &[0.9, 0.0]),
      row(0.5, f32::INFINITY, 0.1, 0.1, &[0.9, 0.0]),
      row(0.5, 0.5, f32::NAN, 0.1, &[0.9, 0.0]),
      row(0.5, 0.5, 1e30, 1e30, &[0.9, 0.0]),
      row(3.0, 3.0, 0.1, 0.1, &[0.9, 0.0]),
    ];
    let detector = detector(rows);
    let result = detector.postprocess(&detector.model.0, 640, 480);

    // 只有巨大的框与帧相交，裁剪后覆盖整帧
    assert_eq!(result.len(), 1);
    assert_eq!(result.top().unwrap().bbox, BBox::new(0, 0, 640, 480));
  }

  #[test]
  fn boxes_are_clipped_to_the_frame() {
    let detector = detector(vec![row(0.0, 0.0, 0.2, 0.2, &[0.9, 0.0])]);
    let result = detector.postprocess(&detector.model.0, 100, 100);
    assert_eq!(result.top().unwrap().bbox, BBox::new(0, 0, 10, 10));
  }

  #[test]
  fn duplicate_boxes_collapse() {
    let rows = vec![
      row(0.5, 0.5, 0.2, 0.2, &[0.8, 0.0]),
      row(0.51, 0.5, 0.2, 0.2, &[0.95, 0.0]),
      row(0.1, 0.1, 0.1, 0.1, &[0.7, 0.0]),
    ];
    let detector = detector(rows);
    let result = detector.postprocess(&detector.model.0, 200, 200);
    assert_eq!(result.len(), 2);
    assert!((result.detections[0].confidence - 0.95).abs() < 1e-6);
  }

  #[test]
  fn preprocess_normalizes_planar() {
    let image = RgbImage::from_pixel(2, 2, Rgb([255, 0, 51]));
    let input = preprocess(&image, (2, 2), false);
    assert_eq!(input.shape(), [1, 3, 2, 2]);
    assert_eq!(&input.data[0..4], &[1.0; 4]);
    assert_eq!(&input.data[4..8], &[0.0; 4]);
    assert!((input.data[8] - 0.2).abs() < 1e-6);

    let swapped = preprocess(&image, (2, 2), true);
    assert!((swapped.data[0] - 0.2).abs() < 1e-6);
    assert_eq!(swapped.data[8], 1.0);
  }

  #[test]
  fn preprocess_resizes_to_model_input() {
    let image = RgbImage::from_pixel(64, 48, Rgb([10, 20, 30]));
    let input = preprocess(&image, (16, 16), false);
    assert_eq!(input.data.len(), 3 * 16 * 16);
  }
}
