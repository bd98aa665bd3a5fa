// 该文件是 Maoyan （猫眼） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use ab_glyph::{FontRef, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_hollow_rect_mut, draw_polygon_mut, draw_text_mut},
  point::Point,
  rect::Rect,
};

use crate::{
  detector::{BBox, Detection, DetectionResult},
  frame::Frame,
  output::{AnnotatedFrame, DrawnLabel},
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_OFFSET: i32 = 10; // 标签底部与边框之间的距离
const BOX_COLOR: [u8; 3] = [0, 255, 0]; // 绿色
const BOX_THICKNESS: u32 = 2;

// 布防标记：两条对角线
const ARMED_COLOR: [u8; 3] = [255, 0, 0]; // 红色
const ARMED_THICKNESS: f32 = 5.0;
const ARMED_INSET: i32 = 50;

pub struct Annotator<'a> {
  font: FontRef<'a>,
  font_size: f32,
  box_color: [u8; 3],
  box_thickness: u32,
  armed_color: [u8; 3],
  armed_thickness: f32,
  armed_inset: i32,
}

impl Default for Annotator<'static> {
  fn default() -> Self {
    let font_data = include_bytes!("../../assets/DejaVuSans.ttf");
    let font = FontRef::try_from_slice(font_data).expect("无法加载嵌入的字体文件");

    Self {
      font,
      font_size: LABEL_FONT_SIZE,
      box_color: BOX_COLOR,
      box_thickness: BOX_THICKNESS,
      armed_color: ARMED_COLOR,
      armed_thickness: ARMED_THICKNESS,
      armed_inset: ARMED_INSET,
    }
  }
}

impl Annotator<'_> {
  /// 在新的图像上绘制检测框、标签和布防标记，输入帧保持不变
  pub fn annotate(&self, frame: &Frame, result: &DetectionResult, armed: bool) -> AnnotatedFrame {
    let mut image = frame.image.clone();

    let labels = result
      .iter()
      .filter_map(|detection| self.draw_bbox_with_label(&mut image, detection))
      .collect();

    if armed {
      self.draw_armed_cross(&mut image);
    }

    AnnotatedFrame {
      image,
      sequence: frame.sequence,
      captured_at: frame.captured_at,
      armed,
      labels,
    }
  }

  fn draw_bbox_with_label(&self, image: &mut RgbImage, detection: &Detection) -> Option<DrawnLabel> {
    let BBox {
      x,
      y,
      width,
      height,
    } = detection.bbox;
    if width <= 0 || height <= 0 {
      return None;
    }

    let color = Rgb(self.box_color);
    // 边框向内加粗
    for t in 0..self.box_thickness {
      let (w, h) = (width as u32, height as u32);
      if w <= 2 * t || h <= 2 * t {
        break;
      }
      let rect = Rect::at(x + t as i32, y + t as i32).of_size(w - 2 * t, h - 2 * t);
      draw_hollow_rect_mut(image, rect, color);
    }

    let text = format!("{} {}", detection.label, format_confidence(detection.confidence));
    let label_x = x.max(0);
    let label_y = (y - LABEL_OFFSET - self.font_size as i32).max(0);
    draw_text_mut(
      image,
      color,
      label_x,
      label_y,
      PxScale::from(self.font_size),
      &self.font,
      &text,
    );

    Some(DrawnLabel {
      text,
      bbox: detection.bbox,
      origin: (label_x, label_y),
    })
  }

  fn draw_armed_cross(&self, image: &mut RgbImage) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    let inset = self.armed_inset;
    let color = Rgb(self.armed_color);

    draw_thick_line(
      image,
      (inset, inset),
      (w - inset, h - inset),
      self.armed_thickness,
      color,
    );
    draw_thick_line(
      image,
      (w - inset, inset),
      (inset, h - inset),
      self.armed_thickness,
      color,
    );
  }
}

/// 以填充四边形的方式画粗线
fn draw_thick_line(
  image: &mut RgbImage,
  start: (i32, i32),
  end: (i32, i32),
  thickness: f32,
  color: Rgb<u8>,
) {
  let (dx, dy) = ((end.0 - start.0) as f32, (end.1 - start.1) as f32);
  let len = (dx * dx + dy * dy).sqrt();
  if len < 1.0 {
    return;
  }

  let half = thickness / 2.0;
  let (nx, ny) = (-dy / len * half, dx / len * half);
  let offset = |p: (i32, i32), sign: f32| {
    Point::new(
      (p.0 as f32 + sign * nx).round() as i32,
      (p.1 as f32 + sign * ny).round() as i32,
    )
  };

  let polygon = [
    offset(start, 1.0),
    offset(end, 1.0),
    offset(end, -1.0),
    offset(start, -1.0),
  ];
  draw_polygon_mut(image, &polygon, color);
}

/// 置信度保留两位小数，去掉末尾多余的 0（0.90 → "0.9"，1.00 → "1.0"）
pub fn format_confidence(confidence: f32) -> String {
  let mut text = format!("{:.2}", confidence);
  while text.ends_with('0') {
    text.pop();
  }
  if text.ends_with('.') {
    text.push('0');
  }
  text
}

#[cfg(test)]
mod tests {
  use super::*;

  fn frame(width: u32, height: u32) -> Frame {
    Frame::new(RgbImage::new(width, height), 7)
  }

  fn cat(x: i32, y: i32, w: i32, h: i32, confidence: f32) -> DetectionResult {
    DetectionResult {
      detections: vec![Detection {
        class_id: 0,
        label: "cat".into(),
        confidence,
        bbox: BBox::new(x, y, w, h),
      }],
    }
  }

  #[test]
  fn confidence_is_rounded_to_two_places() {
    assert_eq!(format_confidence(0.9), "0.9");
    assert_eq!(format_confidence(0.876), "0.88");
    assert_eq!(format_confidence(1.0), "1.0");
    assert_eq!(format_confidence(0.5000001), "0.5");
  }

  #[test]
  fn draws_box_and_label() {
    let frame = frame(320, 240);
    let annotated = Annotator::default().annotate(&frame, &cat(100, 100, 50, 50, 0.9), false);

    let green = Rgb(BOX_COLOR);
    assert_eq!(*annotated.image.get_pixel(100, 100), green);
    assert_eq!(*annotated.image.get_pixel(149, 149), green);
    assert_eq!(*annotated.image.get_pixel(101, 101), green);
    // 框内部不被填充
    assert_eq!(*annotated.image.get_pixel(125, 125), Rgb([0, 0, 0]));

    assert_eq!(annotated.labels.len(), 1);
    assert_eq!(annotated.labels[0].text, "cat 0.9");
    assert_eq!(annotated.sequence, 7);
    assert!(!annotated.armed);
  }

  #[test]
  fn input_frame_is_untouched() {
    let frame = frame(200, 200);
    let _ = Annotator::default().annotate(&frame, &cat(10, 10, 50, 50, 0.8), true);
    assert!(frame.image.pixels().all(|p| *p == Rgb([0, 0, 0])));
  }

  #[test]
  fn armed_cross_is_drawn_without_detections() {
    let frame = frame(200, 200);
    let annotated = Annotator::default().annotate(&frame, &DetectionResult::empty(), true);
    let red = Rgb(ARMED_COLOR);
    assert_eq!(*annotated.image.get_pixel(100, 100), red);
    assert_eq!(*annotated.image.get_pixel(60, 60), red);
    assert_eq!(*annotated.image.get_pixel(140, 60), red);
    assert_eq!(*annotated.image.get_pixel(10, 10), Rgb([0, 0, 0]));
    assert!(annotated.labels.is_empty());
  }

  #[test]
  fn boxes_outside_the_frame_do_not_panic() {
    let frame = frame(64, 64);
    let annotated = Annotator::default().annotate(&frame, &cat(-20, 40, 200, 100, 0.7), false);
    assert_eq!(annotated.labels.len(), 1);
  }
}
